//! Commit-message distillation: a second, short agent session on a cheaper
//! model, fed the iteration output and the diff. Failures fall back silently
//! to a deterministic message.

use ralph_agent::Agent;
use ralph_core::prompt::{build_distill_prompt, fallback_commit_message};
use ralph_vcs::sanitize_message;
use tokio_util::sync::CancellationToken;

/// Distill a one-line commit message for an iteration. Never errors.
pub async fn distill_commit_message(
    distiller: &dyn Agent,
    output: &str,
    diff: &str,
    iteration: u64,
    cancel: CancellationToken,
) -> String {
    match try_distill(distiller, output, diff, cancel).await {
        Some(line) => line,
        None => {
            tracing::debug!(iteration, "distillation failed, using fallback message");
            fallback_commit_message(iteration)
        }
    }
}

async fn try_distill(
    distiller: &dyn Agent,
    output: &str,
    diff: &str,
    cancel: CancellationToken,
) -> Option<String> {
    let prompt = build_distill_prompt(output, diff);
    let mut session = distiller.run(&prompt, cancel).await.ok()?;

    let mut text = String::new();
    while let Some(event) = session.events.recv().await {
        if let Some(t) = event.assistant_text() {
            text.push_str(t);
            text.push('\n');
        }
    }
    session.wait().await.ok()?;

    first_line(&text)
}

/// First non-empty line, sanitized the way the VCS wrapper expects.
fn first_line(text: &str) -> Option<String> {
    text.lines()
        .map(sanitize_message)
        .find(|line| !line.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ralph_agent::{ScriptedAgent, ScriptedOutcome};

    fn assistant_line(text: &str) -> String {
        format!(r#"{{"type":"assistant","message":{{"content":"{text}"}}}}"#)
    }

    #[tokio::test]
    async fn uses_the_first_non_empty_line() {
        let agent = ScriptedAgent::new();
        let line = assistant_line("\\n  polish the widget\\nsecond line");
        agent.push_run(&[&line], ScriptedOutcome::Success);

        let msg =
            distill_commit_message(&agent, "out", "diff", 3, CancellationToken::new()).await;
        assert_eq!(msg, "polish the widget");
    }

    #[tokio::test]
    async fn agent_failure_falls_back() {
        let agent = ScriptedAgent::new();
        agent.push_run(
            &[],
            ScriptedOutcome::Exit {
                code: 1,
                stderr: "rate limited".into(),
            },
        );

        let msg =
            distill_commit_message(&agent, "out", "diff", 3, CancellationToken::new()).await;
        assert_eq!(msg, "iteration 3 updates");
    }

    #[tokio::test]
    async fn empty_reply_falls_back() {
        let agent = ScriptedAgent::new();
        agent.push_run(&[], ScriptedOutcome::Success);

        let msg =
            distill_commit_message(&agent, "out", "diff", 0, CancellationToken::new()).await;
        assert_eq!(msg, "iteration 0 updates");
    }

    #[tokio::test]
    async fn distill_prompt_carries_output_and_diff() {
        let agent = ScriptedAgent::new();
        let line = assistant_line("msg");
        agent.push_run(&[&line], ScriptedOutcome::Success);

        distill_commit_message(&agent, "the output", "the diff", 1, CancellationToken::new())
            .await;
        let prompts = agent.prompts();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].contains("the output"));
        assert!(prompts[0].contains("the diff"));
    }
}
