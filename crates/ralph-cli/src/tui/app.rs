use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use ralph_engine::{IterationPhase, RunEvent};
use std::collections::VecDeque;
use tokio_util::sync::CancellationToken;

const RECENT_CAP: usize = 200;

/// View state, fed exclusively from the run-event channel.
pub struct App {
    pub plan_id: String,
    pub max_iterations: u64,
    pub iteration: u64,
    pub phase: Option<IterationPhase>,
    /// Rolling tail of agent stream summaries.
    pub recent: VecDeque<String>,
    /// One line per finished iteration.
    pub results: Vec<String>,
    pub finished: Option<String>,
    pub stream_closed: bool,
    pub cancel_requested: bool,
}

impl App {
    pub fn new() -> Self {
        Self {
            plan_id: String::new(),
            max_iterations: 0,
            iteration: 0,
            phase: None,
            recent: VecDeque::new(),
            results: Vec::new(),
            finished: None,
            stream_closed: false,
            cancel_requested: false,
        }
    }

    pub fn apply(&mut self, event: RunEvent) {
        match event {
            RunEvent::PlanStarted {
                plan_id,
                first_iteration,
                max_iterations,
            } => {
                self.plan_id = plan_id;
                self.iteration = first_iteration;
                self.max_iterations = max_iterations;
            }
            RunEvent::PhaseChanged { iteration, phase } => {
                self.iteration = iteration;
                self.phase = Some(phase);
            }
            RunEvent::AgentEvent { kind, summary, .. } => {
                self.recent.push_back(format!("{:<17} {summary}", kind.as_str()));
                while self.recent.len() > RECENT_CAP {
                    self.recent.pop_front();
                }
            }
            RunEvent::IterationCompleted {
                iteration,
                commit_message,
            } => {
                let line = match commit_message {
                    Some(msg) => format!("✓ {iteration}: {msg}"),
                    None => format!("✓ {iteration}: done"),
                };
                self.results.push(line);
            }
            RunEvent::IterationFailed { iteration, error } => {
                self.results.push(format!("✗ {iteration}: {error}"));
            }
            RunEvent::PlanCompleted { iterations, .. } => {
                self.finished = Some(format!("completed after {iterations} iteration(s)"));
            }
            RunEvent::PlanStopped { iterations, .. } => {
                self.finished = Some(format!("stopped at the iteration limit ({iterations})"));
            }
            RunEvent::RunCancelled { .. } => {
                self.finished = Some("cancelled".to_string());
            }
        }
    }

    pub fn handle_key(&mut self, key: KeyEvent, cancel: &CancellationToken) {
        let is_ctrl_c =
            key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL);
        if matches!(key.code, KeyCode::Char('q') | KeyCode::Esc) || is_ctrl_c {
            self.cancel_requested = true;
            cancel.cancel();
        }
    }
}
