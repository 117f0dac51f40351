//! Run events: what the controller tells the TUI.

use ralph_agent::{EventPayload, StreamEvent};
use ralph_core::EventKind;
use serde::Serialize;

/// Where an iteration currently is. Reported on every transition.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IterationPhase {
    Pending,
    BuildingPrompt,
    NewChange,
    AgentRunning,
    Parsing,
    Persisting,
    Distilling,
    Committing,
    MarkComplete,
    Cancelled,
    Failed,
}

/// A controller event for the TUI channel. Serialized as tagged JSON
/// (`"type": "plan_started"`, etc.).
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    PlanStarted {
        plan_id: String,
        first_iteration: u64,
        max_iterations: u64,
    },
    PhaseChanged {
        iteration: u64,
        phase: IterationPhase,
    },
    AgentEvent {
        iteration: u64,
        kind: EventKind,
        summary: String,
    },
    IterationCompleted {
        iteration: u64,
        commit_message: Option<String>,
    },
    IterationFailed {
        iteration: u64,
        error: String,
    },
    PlanCompleted {
        plan_id: String,
        iterations: u64,
    },
    /// Max iterations reached; the plan stays `running`.
    PlanStopped {
        plan_id: String,
        iterations: u64,
    },
    RunCancelled {
        plan_id: String,
    },
}

/// One-line summary of an agent stream event for live display.
pub fn summarize(event: &StreamEvent) -> String {
    match &event.payload {
        EventPayload::Init { session_id } => format!("session {session_id}"),
        EventPayload::AssistantMessage { text, .. } => truncate(text, 80),
        EventPayload::ToolUse { name, .. } => name.clone(),
        EventPayload::ToolResult { tool_use_id, .. } => format!("result for {tool_use_id}"),
        EventPayload::Result { cost_usd, .. } => cost_usd
            .map(|c| format!("done (${c:.3})"))
            .unwrap_or_else(|| "done".to_string()),
        EventPayload::Error { message } => truncate(message, 80),
    }
}

fn truncate(s: &str, max_len: usize) -> String {
    let s = s.replace(['\n', '\r'], " ");
    if s.chars().count() <= max_len {
        s
    } else {
        let cut: String = s.chars().take(max_len).collect();
        format!("{cut}...")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ralph_agent::stream::parse_line;

    #[test]
    fn run_event_serializes_tagged() {
        let ev = RunEvent::PhaseChanged {
            iteration: 2,
            phase: IterationPhase::AgentRunning,
        };
        let json = serde_json::to_string(&ev).unwrap();
        assert!(json.contains(r#""type":"phase_changed""#));
        assert!(json.contains(r#""phase":"agent_running""#));
        assert!(json.contains(r#""iteration":2"#));
    }

    #[test]
    fn summarize_tool_use_names_the_tool() {
        let ev = parse_line(r#"{"type":"tool_use","name":"Bash","input":{}}"#).unwrap();
        assert_eq!(summarize(&ev), "Bash");
    }

    #[test]
    fn summarize_flattens_and_truncates_text() {
        let long = "x".repeat(120);
        let line = format!(r#"{{"type":"assistant","message":{{"content":"a\nb {long}"}}}}"#);
        let ev = parse_line(&line).unwrap();
        let summary = summarize(&ev);
        assert!(!summary.contains('\n'));
        assert!(summary.ends_with("..."));
    }
}
