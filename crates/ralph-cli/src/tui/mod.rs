//! Live run view. Consumes the controller's event channel; quitting requests
//! cancellation and the view closes once the run winds down.

mod app;
mod ui;

use app::App;
use crossterm::event::{self, Event, KeyEventKind};
use ralph_engine::RunEvent;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub fn run(mut rx: mpsc::Receiver<RunEvent>, cancel: CancellationToken) -> anyhow::Result<()> {
    let mut terminal = ratatui::init();
    let result = event_loop(&mut terminal, &mut rx, &cancel);
    ratatui::restore();
    result
}

fn event_loop(
    terminal: &mut ratatui::DefaultTerminal,
    rx: &mut mpsc::Receiver<RunEvent>,
    cancel: &CancellationToken,
) -> anyhow::Result<()> {
    let mut app = App::new();
    loop {
        // Drain without blocking the render loop; the channel is bounded and
        // the controller drops (with audit) rather than waits on us.
        loop {
            match rx.try_recv() {
                Ok(event) => app.apply(event),
                Err(mpsc::error::TryRecvError::Empty) => break,
                Err(mpsc::error::TryRecvError::Disconnected) => {
                    app.stream_closed = true;
                    break;
                }
            }
        }

        terminal.draw(|f| ui::render(f, &app))?;

        if app.stream_closed {
            break;
        }

        if event::poll(Duration::from_millis(100))? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    app.handle_key(key, cancel);
                }
            }
        }
    }
    Ok(())
}
