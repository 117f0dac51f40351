//! TUI-side half of the multiplexer.
//!
//! Raw agent events go to the store first and are never dropped; that path
//! back-pressures the subprocess reader instead. This channel only carries
//! display summaries, so a stalled TUI must not stall durability: on
//! overflow the event is dropped and the drop is audited.

use crate::events::RunEvent;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

pub struct TuiChannel {
    tx: Option<mpsc::Sender<RunEvent>>,
    dropped: u64,
}

impl TuiChannel {
    pub fn new(tx: Option<mpsc::Sender<RunEvent>>) -> Self {
        Self { tx, dropped: 0 }
    }

    /// Forward an event without blocking. Full channel: drop with audit.
    pub fn forward(&mut self, event: RunEvent) {
        let Some(tx) = &self.tx else { return };
        match tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                self.dropped += 1;
                tracing::warn!(
                    dropped_total = self.dropped,
                    event = ?event,
                    "tui channel full, dropping event"
                );
            }
            Err(TrySendError::Closed(_)) => {
                // Consumer went away; stop forwarding for the rest of the run.
                self.tx = None;
            }
        }
    }

    /// Events dropped so far on this channel.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Close the outbound channel. Receivers observe end-of-stream.
    pub fn close(&mut self) {
        self.tx = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::IterationPhase;

    fn phase_event(iteration: u64) -> RunEvent {
        RunEvent::PhaseChanged {
            iteration,
            phase: IterationPhase::Pending,
        }
    }

    #[tokio::test]
    async fn forwards_when_there_is_room() {
        let (tx, mut rx) = mpsc::channel(4);
        let mut bus = TuiChannel::new(Some(tx));
        bus.forward(phase_event(0));
        assert!(matches!(
            rx.recv().await,
            Some(RunEvent::PhaseChanged { iteration: 0, .. })
        ));
        assert_eq!(bus.dropped(), 0);
    }

    #[tokio::test]
    async fn overflow_drops_with_count() {
        let (tx, mut rx) = mpsc::channel(1);
        let mut bus = TuiChannel::new(Some(tx));
        bus.forward(phase_event(0));
        bus.forward(phase_event(1)); // full, dropped
        bus.forward(phase_event(2)); // full, dropped
        assert_eq!(bus.dropped(), 2);

        // The consumer still sees the first event; nothing blocked.
        assert!(matches!(
            rx.recv().await,
            Some(RunEvent::PhaseChanged { iteration: 0, .. })
        ));
    }

    #[tokio::test]
    async fn closed_consumer_disables_forwarding() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let mut bus = TuiChannel::new(Some(tx));
        bus.forward(phase_event(0));
        bus.forward(phase_event(1));
        // Closed is not a drop; it just ends forwarding.
        assert_eq!(bus.dropped(), 0);
    }

    #[tokio::test]
    async fn close_ends_the_stream() {
        let (tx, mut rx) = mpsc::channel(4);
        let mut bus = TuiChannel::new(Some(tx));
        bus.close();
        assert!(rx.recv().await.is_none());
    }

    #[test]
    fn headless_channel_is_a_no_op() {
        let mut bus = TuiChannel::new(None);
        bus.forward(phase_event(0));
        assert_eq!(bus.dropped(), 0);
    }
}
