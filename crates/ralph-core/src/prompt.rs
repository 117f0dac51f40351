//! Iteration prompt assembly.
//!
//! `build_prompt` is a pure function of its inputs: the same plan content,
//! progress, and learnings always yield byte-identical output, so a resumed
//! run reproduces the exact prompt of an uninterrupted one.

use crate::protocol::DONE_SENTINEL;

/// Default output-contract instructions appended to every iteration prompt.
pub const DEFAULT_INSTRUCTIONS: &str = "\
Work on the plan above for one iteration.

When every part of the plan is complete, reply with exactly this line and \
nothing else:

DONE DONE DONE!!!

Otherwise, end your reply with two top-level sections:

## Progress
What is done so far and what remains.

## Learnings
Anything the next iteration should know.";

/// Build the prompt for one iteration from durable state.
pub fn build_prompt(plan: &str, progress: &str, learnings: &str) -> String {
    build_prompt_with_instructions(plan, progress, learnings, DEFAULT_INSTRUCTIONS)
}

/// Variant taking a custom instruction block (configured per role).
pub fn build_prompt_with_instructions(
    plan: &str,
    progress: &str,
    learnings: &str,
    instructions: &str,
) -> String {
    let mut prompt = String::new();
    prompt.push_str("# Plan\n\n");
    prompt.push_str(plan.trim_end());
    prompt.push('\n');

    if !progress.is_empty() {
        prompt.push_str("\n## Prior Progress\n\n");
        prompt.push_str(progress.trim_end());
        prompt.push('\n');
    }
    if !learnings.is_empty() {
        prompt.push_str("\n## Prior Learnings\n\n");
        prompt.push_str(learnings.trim_end());
        prompt.push('\n');
    }

    prompt.push('\n');
    prompt.push_str(instructions.trim_end());
    prompt.push('\n');
    prompt
}

/// Prompt for the commit-message distiller: the iteration output plus the
/// working-copy diff, asking for a single line back.
pub fn build_distill_prompt(output: &str, diff: &str) -> String {
    let mut prompt = String::new();
    prompt.push_str(
        "Summarize the change below as a one-line commit message. \
         Reply with the message only, no quotes, no trailing period.\n",
    );
    prompt.push_str("\n## Iteration Output\n\n");
    prompt.push_str(output.trim_end());
    prompt.push('\n');
    prompt.push_str("\n## Diff\n\n");
    prompt.push_str(diff.trim_end());
    prompt.push('\n');
    prompt
}

/// Deterministic commit message used when distillation fails.
pub fn fallback_commit_message(iteration: u64) -> String {
    format!("iteration {iteration} updates")
}
