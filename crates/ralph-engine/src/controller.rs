//! The iteration controller: plan lifecycle, phase machine, termination.
//!
//! One iteration is prompt build → new change → agent session → interpret →
//! persist → distill → commit. Iteration errors mark the session failed and
//! the loop continues; only store failures abort the run.

use crate::bus::TuiChannel;
use crate::distill::distill_commit_message;
use crate::events::{summarize, IterationPhase, RunEvent};
use anyhow::Context;
use ralph_agent::{Agent, AgentError, StreamEvent};
use ralph_core::protocol::{interpret, AgentOutcome};
use ralph_core::prompt::{build_prompt, build_prompt_with_instructions};
use ralph_core::{
    now_rfc3339, EventRecord, PlanRecord, PlanStatus, SessionRecord, SessionStatus, SnapshotKind,
    SnapshotRecord,
};
use ralph_store::Store;
use ralph_vcs::{Vcs, VcsError};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Where the plan text comes from.
pub enum PlanSource {
    File(PathBuf),
    Inline(String),
}

pub struct ControllerConfig {
    pub max_iterations: u64,
    /// Custom instruction block for the developer role, when configured.
    pub developer_instructions: Option<String>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            max_iterations: 25,
            developer_instructions: None,
        }
    }
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The agent signalled DONE; the plan is `completed`.
    Completed,
    /// Iteration limit reached; the plan stays `running`.
    Stopped,
    /// Cancellation; the plan stays `running` and is resumable.
    Cancelled,
}

#[derive(Debug)]
pub struct RunReport {
    pub plan_id: String,
    /// Total sessions recorded for the plan when the run ended.
    pub iterations: u64,
    pub outcome: RunOutcome,
}

enum IterationResult {
    Done,
    Continue,
    Cancelled,
}

pub struct Controller {
    store: Store,
    agent: Arc<dyn Agent>,
    distiller: Arc<dyn Agent>,
    vcs: Arc<dyn Vcs>,
    config: ControllerConfig,
    cancel: CancellationToken,
    tui: TuiChannel,
}

impl Controller {
    pub fn new(
        store: Store,
        agent: Arc<dyn Agent>,
        distiller: Arc<dyn Agent>,
        vcs: Arc<dyn Vcs>,
        config: ControllerConfig,
    ) -> Self {
        Self {
            store,
            agent,
            distiller,
            vcs,
            config,
            cancel: CancellationToken::new(),
            tui: TuiChannel::new(None),
        }
    }

    pub fn with_tui(mut self, tx: mpsc::Sender<RunEvent>) -> Self {
        self.tui = TuiChannel::new(Some(tx));
        self
    }

    /// Token for external cancellation (ctrl-c, TUI quit). Idempotent.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Create a plan from a file or inline text and run it.
    pub async fn run_new(&mut self, source: PlanSource) -> anyhow::Result<RunReport> {
        let (source_path, content) = match source {
            PlanSource::File(path) => {
                let content = std::fs::read_to_string(&path)
                    .with_context(|| format!("reading plan file {}", path.display()))?;
                (path.display().to_string(), content)
            }
            PlanSource::Inline(text) => (String::new(), text),
        };
        let plan = PlanRecord::new(&source_path, &content);
        self.store.create_plan(&plan)?;
        self.store.set_plan_status(&plan.id, PlanStatus::Running)?;
        tracing::info!(plan_id = %plan.id, "plan started");
        self.run_loop(plan.id).await
    }

    /// Continue an existing plan. Prior sessions are not replayed; the next
    /// iteration picks up the latest snapshots from the store.
    pub async fn resume(&mut self, plan_id: &str) -> anyhow::Result<RunReport> {
        let plan = self
            .store
            .get_plan(plan_id)?
            .ok_or_else(|| anyhow::anyhow!("plan not found: {plan_id}"))?;

        if plan.status == PlanStatus::Completed {
            tracing::info!(plan_id, "plan already completed, nothing to resume");
            return Ok(RunReport {
                plan_id: plan.id,
                iterations: self.store.next_iteration(plan_id)?,
                outcome: RunOutcome::Completed,
            });
        }

        // Sessions a dead process left running become cancelled, so the
        // at-most-one-running invariant holds for the new session.
        self.store.recover_interrupted_sessions()?;
        self.store.set_plan_status(plan_id, PlanStatus::Running)?;
        tracing::info!(plan_id, "plan resumed");
        self.run_loop(plan.id).await
    }

    async fn run_loop(&mut self, plan_id: String) -> anyhow::Result<RunReport> {
        let mut iteration = self.store.next_iteration(&plan_id)?;
        self.tui.forward(RunEvent::PlanStarted {
            plan_id: plan_id.clone(),
            first_iteration: iteration,
            max_iterations: self.config.max_iterations,
        });

        let outcome = loop {
            if self.cancel.is_cancelled() {
                break RunOutcome::Cancelled;
            }
            if iteration >= self.config.max_iterations {
                tracing::info!(%plan_id, iteration, "iteration limit reached, stopping");
                break RunOutcome::Stopped;
            }

            match self.run_iteration(&plan_id, iteration).await {
                Ok(IterationResult::Done) => {
                    self.store.set_plan_status(&plan_id, PlanStatus::Completed)?;
                    iteration += 1;
                    break RunOutcome::Completed;
                }
                Ok(IterationResult::Continue) => iteration += 1,
                Ok(IterationResult::Cancelled) => break RunOutcome::Cancelled,
                Err(e) => {
                    // Store failure: abort after persisting what we can.
                    let _ = self.store.set_plan_status(&plan_id, PlanStatus::Failed);
                    self.tui.close();
                    return Err(e);
                }
            }
        };

        match outcome {
            RunOutcome::Completed => self.tui.forward(RunEvent::PlanCompleted {
                plan_id: plan_id.clone(),
                iterations: iteration,
            }),
            RunOutcome::Stopped => self.tui.forward(RunEvent::PlanStopped {
                plan_id: plan_id.clone(),
                iterations: iteration,
            }),
            RunOutcome::Cancelled => self.tui.forward(RunEvent::RunCancelled {
                plan_id: plan_id.clone(),
            }),
        }
        self.tui.close();

        Ok(RunReport {
            plan_id,
            iterations: iteration,
            outcome,
        })
    }

    async fn run_iteration(
        &mut self,
        plan_id: &str,
        iteration: u64,
    ) -> anyhow::Result<IterationResult> {
        self.phase(iteration, IterationPhase::BuildingPrompt);

        // Always re-read from the store: a restart mid-iteration must
        // produce the same prompt as an uninterrupted run.
        let plan = self
            .store
            .get_plan(plan_id)?
            .ok_or_else(|| anyhow::anyhow!("plan not found: {plan_id}"))?;
        let progress = self
            .store
            .latest_snapshot(plan_id, SnapshotKind::Progress)?
            .map(|s| s.content)
            .unwrap_or_default();
        let learnings = self
            .store
            .latest_snapshot(plan_id, SnapshotKind::Learnings)?
            .map(|s| s.content)
            .unwrap_or_default();
        let prompt = match &self.config.developer_instructions {
            Some(instructions) => {
                build_prompt_with_instructions(&plan.content, &progress, &learnings, instructions)
            }
            None => build_prompt(&plan.content, &progress, &learnings),
        };

        let session = SessionRecord::new(plan_id, iteration, &prompt);
        self.store.create_session(&session)?;

        self.phase(iteration, IterationPhase::NewChange);
        match self.vcs.new_change(None, self.cancel.child_token()).await {
            Ok(change_id) => tracing::debug!(iteration, %change_id, "new change"),
            Err(VcsError::Cancelled) => return self.finish_cancelled(&session, iteration, None),
            Err(e) => {
                return self.finish_failed(&session, iteration, None, &format!("new change: {e}"))
            }
        }

        self.phase(iteration, IterationPhase::AgentRunning);
        let mut handle = match self.agent.run(&prompt, self.cancel.child_token()).await {
            Ok(handle) => handle,
            Err(AgentError::Cancelled) => return self.finish_cancelled(&session, iteration, None),
            Err(e) => {
                return self.finish_failed(&session, iteration, None, &format!("agent launch: {e}"))
            }
        };

        // Multiplex the stream: each event is persisted before any TUI
        // forward, so an observer never sees an event that is not durable.
        // Cancellation propagates through the runner, which kills the child
        // and closes the stream after the last parsed event.
        let mut seq: u64 = 0;
        let mut text = String::new();
        while let Some(event) = handle.events.recv().await {
            self.record_event(&session.id, iteration, &mut seq, &mut text, event)?;
        }

        self.phase(iteration, IterationPhase::Parsing);
        match handle.wait().await {
            Ok(()) => {}
            Err(AgentError::Cancelled) => {
                return self.finish_cancelled(&session, iteration, Some(&text))
            }
            Err(e) => {
                return self.finish_failed(&session, iteration, Some(&text), &format!("agent: {e}"))
            }
        }

        match interpret(&text) {
            AgentOutcome::Done => {
                self.store
                    .complete_session(&session.id, SessionStatus::Completed, Some(&text))?;
                self.phase(iteration, IterationPhase::MarkComplete);
                self.tui.forward(RunEvent::IterationCompleted {
                    iteration,
                    commit_message: None,
                });
                Ok(IterationResult::Done)
            }
            AgentOutcome::Malformed => self.finish_failed(
                &session,
                iteration,
                Some(&text),
                "agent output had neither the done marker nor progress/learnings sections",
            ),
            AgentOutcome::Update {
                progress,
                learnings,
            } => {
                self.phase(iteration, IterationPhase::Persisting);
                self.store.append_snapshot(&SnapshotRecord::new(
                    plan_id,
                    &session.id,
                    SnapshotKind::Progress,
                    &progress,
                ))?;
                self.store.append_snapshot(&SnapshotRecord::new(
                    plan_id,
                    &session.id,
                    SnapshotKind::Learnings,
                    &learnings,
                ))?;

                self.phase(iteration, IterationPhase::Distilling);
                let diff = match self.vcs.show(self.cancel.child_token()).await {
                    Ok(diff) => diff,
                    Err(VcsError::Cancelled) => {
                        return self.finish_cancelled(&session, iteration, Some(&text))
                    }
                    Err(e) => {
                        tracing::debug!(error = %e, "diff unavailable for distillation");
                        String::new()
                    }
                };
                let message = distill_commit_message(
                    self.distiller.as_ref(),
                    &text,
                    &diff,
                    iteration,
                    self.cancel.child_token(),
                )
                .await;

                self.phase(iteration, IterationPhase::Committing);
                match self.vcs.commit(&message, self.cancel.child_token()).await {
                    Ok(()) => {}
                    Err(VcsError::Cancelled) => {
                        return self.finish_cancelled(&session, iteration, Some(&text))
                    }
                    Err(e) => {
                        return self.finish_failed(
                            &session,
                            iteration,
                            Some(&text),
                            &format!("commit: {e}"),
                        )
                    }
                }

                self.store
                    .complete_session(&session.id, SessionStatus::Completed, Some(&text))?;
                tracing::info!(iteration, commit = %message, "iteration committed");
                self.tui.forward(RunEvent::IterationCompleted {
                    iteration,
                    commit_message: Some(message),
                });
                Ok(IterationResult::Continue)
            }
        }
    }

    fn record_event(
        &mut self,
        session_id: &str,
        iteration: u64,
        seq: &mut u64,
        text: &mut String,
        event: StreamEvent,
    ) -> anyhow::Result<()> {
        self.store.append_event(&EventRecord {
            session_id: session_id.to_string(),
            seq: *seq,
            kind: event.kind(),
            raw: event.raw.clone(),
            ts: now_rfc3339(),
        })?;
        *seq += 1;

        if let Some(t) = event.assistant_text() {
            if !text.is_empty() {
                text.push('\n');
            }
            text.push_str(t);
        }

        self.tui.forward(RunEvent::AgentEvent {
            iteration,
            kind: event.kind(),
            summary: summarize(&event),
        });
        Ok(())
    }

    fn finish_cancelled(
        &mut self,
        session: &SessionRecord,
        iteration: u64,
        output: Option<&str>,
    ) -> anyhow::Result<IterationResult> {
        self.store
            .complete_session(&session.id, SessionStatus::Cancelled, output)?;
        self.phase(iteration, IterationPhase::Cancelled);
        Ok(IterationResult::Cancelled)
    }

    fn finish_failed(
        &mut self,
        session: &SessionRecord,
        iteration: u64,
        output: Option<&str>,
        error: &str,
    ) -> anyhow::Result<IterationResult> {
        tracing::warn!(iteration, error, "iteration failed");
        self.store
            .complete_session(&session.id, SessionStatus::Failed, output)?;
        self.phase(iteration, IterationPhase::Failed);
        self.tui.forward(RunEvent::IterationFailed {
            iteration,
            error: error.to_string(),
        });
        Ok(IterationResult::Continue)
    }

    fn phase(&mut self, iteration: u64, phase: IterationPhase) {
        tracing::debug!(iteration, ?phase, "phase");
        self.tui
            .forward(RunEvent::PhaseChanged { iteration, phase });
    }
}
