pub mod runner;
pub mod stream;

pub use runner::{Agent, AgentError, AgentSession, ClaudeAgent, ScriptedAgent, ScriptedOutcome};
pub use stream::{EventPayload, StreamEvent, TokenUsage};
