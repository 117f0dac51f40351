//! Agent-output protocol: DONE sentinel and progress/learnings sections.
//!
//! The last assistant text of a session either equals the sentinel after
//! trimming, or carries `## Progress` and `## Learnings` top-level headings.

/// Exact terminal marker. Matched against the trimmed accumulated output.
pub const DONE_SENTINEL: &str = "DONE DONE DONE!!!";

/// Classified result of one agent session's accumulated output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentOutcome {
    /// The plan is finished; no snapshots, no commit.
    Done,
    /// Both sections present; bodies may be empty and are stored verbatim.
    Update { progress: String, learnings: String },
    /// Neither sentinel nor both sections; the iteration is treated as failed.
    Malformed,
}

/// Interpret the accumulated assistant text of one session.
/// The sentinel is checked first, so DONE wins over heading-shaped content.
pub fn interpret(output: &str) -> AgentOutcome {
    if output.trim() == DONE_SENTINEL {
        return AgentOutcome::Done;
    }
    match (
        extract_section(output, "## Progress"),
        extract_section(output, "## Learnings"),
    ) {
        (Some(progress), Some(learnings)) => AgentOutcome::Update {
            progress,
            learnings,
        },
        _ => AgentOutcome::Malformed,
    }
}

/// Body of the section introduced by `heading`: everything up to the next
/// top-level heading or EOF, trimmed. `None` when the heading is absent.
fn extract_section(text: &str, heading: &str) -> Option<String> {
    let mut found = false;
    let mut body: Vec<&str> = Vec::new();
    for line in text.lines() {
        if !found {
            if line.trim() == heading {
                found = true;
            }
        } else if is_top_level_heading(line) {
            break;
        } else {
            body.push(line);
        }
    }
    found.then(|| body.join("\n").trim().to_string())
}

fn is_top_level_heading(line: &str) -> bool {
    line.starts_with("# ") || line.starts_with("## ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_sentinel_is_done() {
        assert_eq!(interpret("DONE DONE DONE!!!"), AgentOutcome::Done);
    }

    #[test]
    fn sentinel_with_surrounding_whitespace_is_done() {
        assert_eq!(interpret("\n  DONE DONE DONE!!!  \n\n"), AgentOutcome::Done);
    }

    #[test]
    fn sentinel_followed_by_text_is_not_done() {
        // Equality after trim, not a first-line check.
        let out = "DONE DONE DONE!!!\nand one more thing";
        assert_eq!(interpret(out), AgentOutcome::Malformed);
    }

    #[test]
    fn done_wins_over_heading_shaped_content() {
        // The sentinel check runs first; a trimmed-equal output completes
        // even though it could never also carry sections.
        let out = "  DONE DONE DONE!!!\t";
        assert_eq!(interpret(out), AgentOutcome::Done);
    }

    #[test]
    fn both_sections_produce_update() {
        let out = "## Progress\nA\n## Learnings\nL1";
        assert_eq!(
            interpret(out),
            AgentOutcome::Update {
                progress: "A".into(),
                learnings: "L1".into(),
            }
        );
    }

    #[test]
    fn sections_run_to_next_top_level_heading() {
        let out = "intro\n## Progress\nline one\nline two\n## Learnings\nwisdom\n## Notes\nignored";
        match interpret(out) {
            AgentOutcome::Update {
                progress,
                learnings,
            } => {
                assert_eq!(progress, "line one\nline two");
                assert_eq!(learnings, "wisdom");
            }
            other => panic!("expected Update, got {other:?}"),
        }
    }

    #[test]
    fn subheadings_stay_inside_a_section() {
        let out = "## Progress\ndone:\n### details\nmore\n## Learnings\nx";
        match interpret(out) {
            AgentOutcome::Update { progress, .. } => {
                assert_eq!(progress, "done:\n### details\nmore");
            }
            other => panic!("expected Update, got {other:?}"),
        }
    }

    #[test]
    fn empty_section_bodies_are_allowed() {
        let out = "## Progress\n## Learnings\n";
        assert_eq!(
            interpret(out),
            AgentOutcome::Update {
                progress: String::new(),
                learnings: String::new(),
            }
        );
    }

    #[test]
    fn missing_learnings_is_malformed() {
        assert_eq!(interpret("## Progress\nonly half"), AgentOutcome::Malformed);
    }

    #[test]
    fn missing_progress_is_malformed() {
        assert_eq!(
            interpret("## Learnings\nonly half"),
            AgentOutcome::Malformed
        );
    }

    #[test]
    fn plain_text_is_malformed() {
        assert_eq!(interpret("hello world"), AgentOutcome::Malformed);
    }

    #[test]
    fn empty_output_is_malformed() {
        assert_eq!(interpret(""), AgentOutcome::Malformed);
    }

    #[test]
    fn heading_requires_exact_level() {
        // "### Progress" is not a top-level section heading.
        let out = "### Progress\nx\n### Learnings\ny";
        assert_eq!(interpret(out), AgentOutcome::Malformed);
    }
}
