use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Plan ID format: `plan_<ulid>`
pub type PlanId = String;

/// Session ID format: `ses_<ulid>`
pub type SessionId = String;

pub fn new_plan_id() -> PlanId {
    format!("plan_{}", Ulid::new())
}

pub fn new_session_id() -> SessionId {
    format!("ses_{}", Ulid::new())
}

pub fn new_snapshot_id() -> String {
    format!("snap_{}", Ulid::new())
}

/// Current UTC time as RFC 3339. All persisted timestamps use this format.
pub fn now_rfc3339() -> String {
    time::OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_default()
}

// ── Status enums ──

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl PlanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanStatus::Pending => "pending",
            PlanStatus::Running => "running",
            PlanStatus::Completed => "completed",
            PlanStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(PlanStatus::Pending),
            "running" => Some(PlanStatus::Running),
            "completed" => Some(PlanStatus::Completed),
            "failed" => Some(PlanStatus::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Running => "running",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
            SessionStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "running" => Some(SessionStatus::Running),
            "completed" => Some(SessionStatus::Completed),
            "failed" => Some(SessionStatus::Failed),
            "cancelled" => Some(SessionStatus::Cancelled),
            _ => None,
        }
    }

    /// Terminal statuses never transition again.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SessionStatus::Running)
    }
}

/// Kind tag for one structured line from the agent subprocess.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Init,
    AssistantMessage,
    ToolUse,
    ToolResult,
    Result,
    Error,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Init => "init",
            EventKind::AssistantMessage => "assistant_message",
            EventKind::ToolUse => "tool_use",
            EventKind::ToolResult => "tool_result",
            EventKind::Result => "result",
            EventKind::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "init" => Some(EventKind::Init),
            "assistant_message" => Some(EventKind::AssistantMessage),
            "tool_use" => Some(EventKind::ToolUse),
            "tool_result" => Some(EventKind::ToolResult),
            "result" => Some(EventKind::Result),
            "error" => Some(EventKind::Error),
            _ => None,
        }
    }
}

/// Progress and learnings snapshots share one shape; the kind discriminates.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotKind {
    Progress,
    Learnings,
}

impl SnapshotKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SnapshotKind::Progress => "progress",
            SnapshotKind::Learnings => "learnings",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "progress" => Some(SnapshotKind::Progress),
            "learnings" => Some(SnapshotKind::Learnings),
            _ => None,
        }
    }
}

// ── Records ──

/// One plan per execution. Root entity of a run; owns everything below it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanRecord {
    pub id: PlanId,
    /// Origin file path; empty for inline prompts.
    pub source_path: String,
    /// Full prompt text of the plan.
    pub content: String,
    pub status: PlanStatus,
    pub created_at: String,
    pub updated_at: String,
}

impl PlanRecord {
    pub fn new(source_path: &str, content: &str) -> Self {
        let now = now_rfc3339();
        Self {
            id: new_plan_id(),
            source_path: source_path.to_string(),
            content: content.to_string(),
            status: PlanStatus::Pending,
            created_at: now.clone(),
            updated_at: now,
        }
    }
}

/// One agent invocation for one iteration. Never deleted; the audit log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: SessionId,
    pub plan_id: PlanId,
    /// 0-based, strictly increasing per plan.
    pub iteration: u64,
    /// The exact prompt sent to the agent.
    pub prompt: String,
    /// Final accumulated assistant text, set on completion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    pub status: SessionStatus,
    pub created_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
}

impl SessionRecord {
    pub fn new(plan_id: &str, iteration: u64, prompt: &str) -> Self {
        Self {
            id: new_session_id(),
            plan_id: plan_id.to_string(),
            iteration,
            prompt: prompt.to_string(),
            output: None,
            status: SessionStatus::Running,
            created_at: now_rfc3339(),
            completed_at: None,
        }
    }
}

/// One structured line from the agent stream, raw JSON preserved verbatim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    pub session_id: SessionId,
    /// Gap-free per-session sequence in order of receipt.
    pub seq: u64,
    pub kind: EventKind,
    pub raw: String,
    pub ts: String,
}

/// A progress or learnings snapshot produced by one iteration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotRecord {
    pub id: String,
    pub plan_id: PlanId,
    pub session_id: SessionId,
    pub kind: SnapshotKind,
    /// Free text; may be empty and is stored verbatim.
    pub content: String,
    pub created_at: String,
}

impl SnapshotRecord {
    pub fn new(plan_id: &str, session_id: &str, kind: SnapshotKind, content: &str) -> Self {
        Self {
            id: new_snapshot_id(),
            plan_id: plan_id.to_string(),
            session_id: session_id.to_string(),
            kind,
            content: content.to_string(),
            created_at: now_rfc3339(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_carry_prefixes() {
        assert!(new_plan_id().starts_with("plan_"));
        assert!(new_session_id().starts_with("ses_"));
        assert!(new_snapshot_id().starts_with("snap_"));
    }

    #[test]
    fn ids_are_unique() {
        assert_ne!(new_plan_id(), new_plan_id());
    }

    #[test]
    fn status_round_trips() {
        for s in [
            PlanStatus::Pending,
            PlanStatus::Running,
            PlanStatus::Completed,
            PlanStatus::Failed,
        ] {
            assert_eq!(PlanStatus::parse(s.as_str()), Some(s));
        }
        for s in [
            SessionStatus::Running,
            SessionStatus::Completed,
            SessionStatus::Failed,
            SessionStatus::Cancelled,
        ] {
            assert_eq!(SessionStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(PlanStatus::parse("bogus"), None);
    }

    #[test]
    fn event_kind_round_trips() {
        for k in [
            EventKind::Init,
            EventKind::AssistantMessage,
            EventKind::ToolUse,
            EventKind::ToolResult,
            EventKind::Result,
            EventKind::Error,
        ] {
            assert_eq!(EventKind::parse(k.as_str()), Some(k));
        }
    }

    #[test]
    fn running_is_only_non_terminal_session_status() {
        assert!(!SessionStatus::Running.is_terminal());
        assert!(SessionStatus::Completed.is_terminal());
        assert!(SessionStatus::Failed.is_terminal());
        assert!(SessionStatus::Cancelled.is_terminal());
    }

    #[test]
    fn new_plan_starts_pending() {
        let plan = PlanRecord::new("", "do the thing");
        assert_eq!(plan.status, PlanStatus::Pending);
        assert!(plan.source_path.is_empty());
        assert_eq!(plan.created_at, plan.updated_at);
    }

    #[test]
    fn timestamps_are_rfc3339() {
        let ts = now_rfc3339();
        assert!(time::OffsetDateTime::parse(
            &ts,
            &time::format_description::well_known::Rfc3339
        )
        .is_ok());
    }

    #[test]
    fn record_serde_round_trip() {
        let session = SessionRecord::new("plan_x", 3, "build it");
        let json = serde_json::to_string(&session).unwrap();
        let restored: SessionRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.id, session.id);
        assert_eq!(restored.iteration, 3);
        assert_eq!(restored.status, SessionStatus::Running);
        assert!(restored.output.is_none());
    }
}
