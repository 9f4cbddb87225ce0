//! Rendering for the hosted engine setup page.

use crate::tui::page::{App, Dialog, Field};
use nest_core::download::{format_bytes, format_rate};
use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Style},
    text::{Line, Text},
    widgets::{Block, Borders, Clear, Gauge, Paragraph, Wrap},
    Frame,
};

pub fn draw(f: &mut Frame, app: &App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .margin(1)
        .constraints(
            [
                Constraint::Length(3), // Title
                Constraint::Min(9),    // Form
                Constraint::Length(3), // Download progress
                Constraint::Length(3), // Status line
            ]
            .as_ref(),
        )
        .split(f.area());

    let title = Block::default()
        .borders(Borders::ALL)
        .title("Hosted Engine Setup");
    f.render_widget(title, chunks[0]);

    let form = Paragraph::new(Text::from(form_lines(app)))
        .block(Block::default().borders(Borders::ALL).title("Engine"));
    f.render_widget(form, chunks[1]);

    draw_progress(f, app, chunks[2]);

    let status = Paragraph::new(app.status_message.clone())
        .block(Block::default().borders(Borders::ALL).title("Status"));
    f.render_widget(status, chunks[3]);

    if let Some(dialog) = &app.dialog {
        draw_dialog(f, dialog);
    }
}

fn form_lines(app: &App) -> Vec<Line<'static>> {
    let enabled = if app.configured {
        "Configured"
    } else {
        "Not configured"
    };
    vec![
        Line::from(format!("Hosted Engine: {}", enabled)),
        Line::from(format!(
            "Engine VM Name: {}",
            app.vm_name.as_deref().unwrap_or("-")
        )),
        Line::from(format!("Engine Status: {}", app.engine_status_line)),
        Line::default(),
        field_line(
            app,
            Field::Url,
            format!("Engine ISO/OVA URL for download: {}", app.url_input),
        ),
        field_line(
            app,
            Field::Pxe,
            format!("[{}] PXE Boot Engine VM", if app.pxe { "x" } else { " " }),
        ),
        field_line(app, Field::Setup, "< Setup Hosted Engine >".to_string()),
    ]
}

fn field_line(app: &App, field: Field, text: String) -> Line<'static> {
    if app.focus == field && app.dialog.is_none() {
        Line::styled(format!("▸ {}", text), Style::default().fg(Color::Yellow))
    } else {
        Line::from(format!("  {}", text))
    }
}

fn draw_progress(f: &mut Frame, app: &App, area: Rect) {
    let block = Block::default().borders(Borders::ALL).title("Download");
    let Some(snapshot) = &app.transfer else {
        f.render_widget(block, area);
        return;
    };

    let rate = format_rate(snapshot.speed_bytes_per_sec);
    let label = match snapshot.percent() {
        Some(percent) => format!("{}% | {}", percent, rate),
        // No content-length from the remote; show raw counters instead.
        None => format!("{} | {}", format_bytes(snapshot.bytes_downloaded), rate),
    };
    let gauge = Gauge::default()
        .block(block)
        .gauge_style(Style::default().fg(Color::Yellow))
        .percent(u16::from(snapshot.percent().unwrap_or(0)))
        .label(label);
    f.render_widget(gauge, area);
}

fn draw_dialog(f: &mut Frame, dialog: &Dialog) {
    let (title, text) = match dialog {
        Dialog::Ready => (
            "Begin Hosted Engine Setup",
            "The setup configuration has been written.\n\n\
             Press Enter to leave the console and run\n\
             ovirt-hosted-engine-setup, or Esc to stay."
                .to_string(),
        ),
        Dialog::Notice(message) => ("Hosted Engine Setup", format!("{}\n\nPress Enter to continue.", message)),
    };

    let area = centered_rect(60, 40, f.area());
    f.render_widget(Clear, area);
    let body = Paragraph::new(text)
        .wrap(Wrap { trim: false })
        .block(Block::default().borders(Borders::ALL).title(title));
    f.render_widget(body, area);
}

fn centered_rect(percent_x: u16, percent_y: u16, area: Rect) -> Rect {
    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(area);
    let horizontal = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(vertical[1]);
    horizontal[1]
}
