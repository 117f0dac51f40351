//! Parser for the agent CLI's `--output-format stream-json` stdout.
//!
//! The protocol is undocumented and derived from observing the CLI. Dispatch
//! uses the `type` field when present and falls back to structural
//! discrimination (a top-level `message` object is an assistant message, a
//! top-level `result` object is the terminal summary). Malformed lines become
//! error events with the raw bytes preserved; parsing never stops.

use ralph_core::EventKind;
use serde::Deserialize;

/// Token counts from an assistant message, when the CLI reports them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
}

/// Extracted content of one stream line, by kind.
#[derive(Debug, Clone)]
pub enum EventPayload {
    Init {
        session_id: String,
    },
    AssistantMessage {
        id: String,
        role: String,
        /// Concatenated text of all text-typed content parts.
        text: String,
        stop_reason: Option<String>,
        usage: Option<TokenUsage>,
    },
    ToolUse {
        name: String,
        /// Arguments blob, verbatim.
        arguments: serde_json::Value,
    },
    ToolResult {
        tool_use_id: String,
        content: serde_json::Value,
    },
    Result {
        /// Final summary text; may duplicate the last message's text.
        text: Option<String>,
        cost_usd: Option<f64>,
    },
    Error {
        message: String,
    },
}

/// One parsed stream line. The exact raw line is retained for persistence.
#[derive(Debug, Clone)]
pub struct StreamEvent {
    pub raw: String,
    pub payload: EventPayload,
}

impl StreamEvent {
    pub fn kind(&self) -> EventKind {
        match self.payload {
            EventPayload::Init { .. } => EventKind::Init,
            EventPayload::AssistantMessage { .. } => EventKind::AssistantMessage,
            EventPayload::ToolUse { .. } => EventKind::ToolUse,
            EventPayload::ToolResult { .. } => EventKind::ToolResult,
            EventPayload::Result { .. } => EventKind::Result,
            EventPayload::Error { .. } => EventKind::Error,
        }
    }

    /// Assistant text carried by this event, if any.
    pub fn assistant_text(&self) -> Option<&str> {
        match &self.payload {
            EventPayload::AssistantMessage { text, .. } => Some(text),
            _ => None,
        }
    }
}

/// Parse one stdout line. Returns `None` for blank lines only; anything else
/// yields an event, degrading to `Error` when the line cannot be classified.
pub fn parse_line(line: &str) -> Option<StreamEvent> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }
    let raw = trimmed.to_string();

    let value: serde_json::Value = match serde_json::from_str(trimmed) {
        Ok(v) => v,
        Err(e) => {
            return Some(StreamEvent {
                raw,
                payload: EventPayload::Error {
                    message: format!("malformed json: {e}"),
                },
            })
        }
    };

    let payload = classify(&value);
    Some(StreamEvent { raw, payload })
}

fn classify(value: &serde_json::Value) -> EventPayload {
    match value.get("type").and_then(|t| t.as_str()) {
        Some("system") => {
            let session_id = value
                .get("session_id")
                .and_then(|s| s.as_str())
                .unwrap_or_default()
                .to_string();
            EventPayload::Init { session_id }
        }
        Some("assistant") => assistant_payload(value.get("message").unwrap_or(value)),
        Some("tool_use") => EventPayload::ToolUse {
            name: value
                .get("name")
                .and_then(|n| n.as_str())
                .unwrap_or_default()
                .to_string(),
            arguments: value
                .get("input")
                .or_else(|| value.get("arguments"))
                .cloned()
                .unwrap_or(serde_json::Value::Null),
        },
        Some("tool_result") => EventPayload::ToolResult {
            tool_use_id: value
                .get("tool_use_id")
                .and_then(|s| s.as_str())
                .unwrap_or_default()
                .to_string(),
            content: value
                .get("content")
                .cloned()
                .unwrap_or(serde_json::Value::Null),
        },
        Some("result") => result_payload(value),
        Some("error") => EventPayload::Error {
            message: value
                .get("message")
                .or_else(|| value.get("error"))
                .and_then(|m| m.as_str())
                .unwrap_or("unknown error")
                .to_string(),
        },
        // No usable tag: discriminate on structure.
        _ => {
            if let Some(message) = value.get("message") {
                assistant_payload(message)
            } else if value.get("result").is_some() {
                result_payload(value)
            } else {
                EventPayload::Error {
                    message: "unrecognized event shape".to_string(),
                }
            }
        }
    }
}

fn assistant_payload(message: &serde_json::Value) -> EventPayload {
    let text = match message.get("content") {
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(serde_json::Value::Array(parts)) => parts
            .iter()
            .filter(|p| p.get("type").and_then(|t| t.as_str()) == Some("text"))
            .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
            .collect::<Vec<_>>()
            .join(""),
        _ => String::new(),
    };
    let usage = message
        .get("usage")
        .and_then(|u| serde_json::from_value(u.clone()).ok());
    EventPayload::AssistantMessage {
        id: message
            .get("id")
            .and_then(|i| i.as_str())
            .unwrap_or_default()
            .to_string(),
        role: message
            .get("role")
            .and_then(|r| r.as_str())
            .unwrap_or("assistant")
            .to_string(),
        text,
        stop_reason: message
            .get("stop_reason")
            .and_then(|s| s.as_str())
            .map(String::from),
        usage,
    }
}

fn result_payload(value: &serde_json::Value) -> EventPayload {
    EventPayload::Result {
        text: value
            .get("result")
            .and_then(|r| r.as_str())
            .map(String::from),
        cost_usd: value.get("total_cost_usd").and_then(|c| c.as_f64()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_lines_are_skipped() {
        assert!(parse_line("").is_none());
        assert!(parse_line("   \t").is_none());
    }

    #[test]
    fn parse_system_init() {
        let ev = parse_line(r#"{"type":"system","subtype":"init","session_id":"abc-123"}"#)
            .unwrap();
        assert_eq!(ev.kind(), EventKind::Init);
        match ev.payload {
            EventPayload::Init { session_id } => assert_eq!(session_id, "abc-123"),
            other => panic!("expected Init, got {other:?}"),
        }
    }

    #[test]
    fn parse_assistant_concatenates_text_parts() {
        let line = r#"{"type":"assistant","message":{"id":"msg_1","role":"assistant","content":[{"type":"text","text":"hello "},{"type":"tool_use","name":"Bash"},{"type":"text","text":"world"}],"stop_reason":"end_turn","usage":{"input_tokens":10,"output_tokens":4}}}"#;
        let ev = parse_line(line).unwrap();
        assert_eq!(ev.kind(), EventKind::AssistantMessage);
        match ev.payload {
            EventPayload::AssistantMessage {
                id,
                role,
                text,
                stop_reason,
                usage,
            } => {
                assert_eq!(id, "msg_1");
                assert_eq!(role, "assistant");
                assert_eq!(text, "hello world");
                assert_eq!(stop_reason.as_deref(), Some("end_turn"));
                assert_eq!(
                    usage,
                    Some(TokenUsage {
                        input_tokens: 10,
                        output_tokens: 4
                    })
                );
            }
            other => panic!("expected AssistantMessage, got {other:?}"),
        }
    }

    #[test]
    fn parse_assistant_string_content() {
        let ev = parse_line(r#"{"type":"assistant","message":{"content":"plain"}}"#).unwrap();
        assert_eq!(ev.assistant_text(), Some("plain"));
    }

    #[test]
    fn untagged_message_object_is_assistant() {
        let ev = parse_line(r#"{"message":{"content":"structural"}}"#).unwrap();
        assert_eq!(ev.kind(), EventKind::AssistantMessage);
        assert_eq!(ev.assistant_text(), Some("structural"));
    }

    #[test]
    fn parse_tool_use() {
        let ev =
            parse_line(r#"{"type":"tool_use","name":"Write","input":{"file_path":"a.rs"}}"#)
                .unwrap();
        match ev.payload {
            EventPayload::ToolUse { name, arguments } => {
                assert_eq!(name, "Write");
                assert_eq!(arguments["file_path"], "a.rs");
            }
            other => panic!("expected ToolUse, got {other:?}"),
        }
    }

    #[test]
    fn parse_tool_result() {
        let ev = parse_line(r#"{"type":"tool_result","tool_use_id":"tu_1","content":"ok"}"#)
            .unwrap();
        match ev.payload {
            EventPayload::ToolResult {
                tool_use_id,
                content,
            } => {
                assert_eq!(tool_use_id, "tu_1");
                assert_eq!(content, "ok");
            }
            other => panic!("expected ToolResult, got {other:?}"),
        }
    }

    #[test]
    fn parse_result_with_cost() {
        let ev = parse_line(
            r#"{"type":"result","subtype":"success","result":"all done","total_cost_usd":0.42}"#,
        )
        .unwrap();
        match ev.payload {
            EventPayload::Result { text, cost_usd } => {
                assert_eq!(text.as_deref(), Some("all done"));
                assert!((cost_usd.unwrap() - 0.42).abs() < 0.001);
            }
            other => panic!("expected Result, got {other:?}"),
        }
    }

    #[test]
    fn untagged_result_object_is_result() {
        let ev = parse_line(r#"{"result":"summary"}"#).unwrap();
        assert_eq!(ev.kind(), EventKind::Result);
    }

    #[test]
    fn malformed_json_becomes_error_with_raw_preserved() {
        let ev = parse_line("{not json").unwrap();
        assert_eq!(ev.kind(), EventKind::Error);
        assert_eq!(ev.raw, "{not json");
        match ev.payload {
            EventPayload::Error { message } => assert!(message.contains("malformed json")),
            other => panic!("expected Error, got {other:?}"),
        }
    }

    #[test]
    fn unrecognized_shape_becomes_error() {
        let ev = parse_line(r#"{"something":"else"}"#).unwrap();
        assert_eq!(ev.kind(), EventKind::Error);
    }

    #[test]
    fn raw_line_is_retained_verbatim() {
        let line = r#"{"type":"system","subtype":"init","session_id":"s"}"#;
        let ev = parse_line(line).unwrap();
        assert_eq!(ev.raw, line);
    }
}
