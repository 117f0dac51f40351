use ratatui::layout::{Constraint, Direction, Layout};
use ratatui::style::{Color, Style};
use ratatui::text::Line;
use ratatui::widgets::{Block, Borders, List, ListItem, Paragraph};
use ratatui::Frame;

use super::app::App;

/// Render the full frame: header, agent stream, iteration results, status.
pub fn render(f: &mut Frame, app: &App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // header
            Constraint::Min(5),    // agent stream
            Constraint::Length(8), // iteration results
            Constraint::Length(1), // status bar
        ])
        .split(f.area());

    render_header(f, app, chunks[0]);
    render_stream(f, app, chunks[1]);
    render_results(f, app, chunks[2]);
    render_status_bar(f, app, chunks[3]);
}

fn render_header(f: &mut Frame, app: &App, area: ratatui::layout::Rect) {
    let phase = app
        .phase
        .map(|p| format!("{p:?}"))
        .unwrap_or_else(|| "-".to_string());
    let line = format!(
        " {}  iteration {}/{}  [{}]",
        app.plan_id, app.iteration, app.max_iterations, phase
    );
    let block = Block::default().title(" Ralph ").borders(Borders::ALL);
    f.render_widget(Paragraph::new(line).block(block), area);
}

fn render_stream(f: &mut Frame, app: &App, area: ratatui::layout::Rect) {
    let block = Block::default().title(" Agent ").borders(Borders::ALL);

    // Tail view: show the newest lines that fit.
    let visible = area.height.saturating_sub(2) as usize;
    let skip = app.recent.len().saturating_sub(visible);
    let items: Vec<ListItem> = app
        .recent
        .iter()
        .skip(skip)
        .map(|line| ListItem::new(Line::from(format!(" {line}"))))
        .collect();

    f.render_widget(List::new(items).block(block), area);
}

fn render_results(f: &mut Frame, app: &App, area: ratatui::layout::Rect) {
    let block = Block::default().title(" Iterations ").borders(Borders::ALL);

    let visible = area.height.saturating_sub(2) as usize;
    let skip = app.results.len().saturating_sub(visible);
    let items: Vec<ListItem> = app
        .results
        .iter()
        .skip(skip)
        .map(|line| {
            let style = if line.starts_with('✗') {
                Style::default().fg(Color::Red)
            } else {
                Style::default().fg(Color::Green)
            };
            ListItem::new(Line::from(format!(" {line}"))).style(style)
        })
        .collect();

    f.render_widget(List::new(items).block(block), area);
}

fn render_status_bar(f: &mut Frame, app: &App, area: ratatui::layout::Rect) {
    let text = match (&app.finished, app.cancel_requested) {
        (Some(status), _) => format!(" {status}"),
        (None, true) => " cancelling…".to_string(),
        (None, false) => " q: cancel and quit".to_string(),
    };
    let style = Style::default().fg(Color::DarkGray);
    f.render_widget(Paragraph::new(text).style(style), area);
}
