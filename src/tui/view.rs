use ratatui::prelude::*;
use ratatui::widgets::{Block, Borders, Gauge, List, ListItem, ListState, Paragraph, Wrap};

use super::keymap;
use crate::script::Mark;
use crate::session::{SessionStats, TakeController, TakeState};

pub struct ViewState<'a> {
    pub controller: &'a TakeController,
    pub stats: &'a SessionStats,
    /// Input level of the most recent audio, 0.0 to 1.0
    pub level: f64,
    pub message: Option<&'a str>,
}

pub fn draw(frame: &mut Frame, view: &ViewState) {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(6),
            Constraint::Min(4),
            Constraint::Length(1),
            Constraint::Length(1),
            Constraint::Length(1),
        ])
        .split(frame.area());

    draw_script(frame, rows[0], view);

    let columns = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(60), Constraint::Percentage(40)])
        .split(rows[1]);

    draw_chunks(frame, columns[0], view);
    draw_takes(frame, columns[1], view);
    draw_level(frame, rows[2], view);
    draw_status(frame, rows[3], view);
    draw_controls(frame, rows[4], view);
}

fn draw_script(frame: &mut Frame, area: Rect, view: &ViewState) {
    let controller = view.controller;
    let index = controller.selected_chunk();
    let text = controller
        .document()
        .chunk(index)
        .map(|c| c.text())
        .unwrap_or_default();

    let (title, border) = match controller.state() {
        TakeState::Recording { .. } => (
            format!(" ● REC  chunk {}/{} ", index + 1, controller.document().len()),
            Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
        ),
        TakeState::Idle => (
            format!(" chunk {}/{} ", index + 1, controller.document().len()),
            Style::default(),
        ),
    };

    let para = Paragraph::new(text)
        .wrap(Wrap { trim: true })
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(border)
                .title(title),
        );

    frame.render_widget(para, area);
}

fn draw_chunks(frame: &mut Frame, area: Rect, view: &ViewState) {
    let items: Vec<ListItem> = view
        .controller
        .document()
        .chunks()
        .iter()
        .map(|chunk| {
            let good = chunk.takes().iter().any(|t| t.mark == Mark::Good);
            let marker = if good { "✓" } else { " " };
            let line = format!(
                "{} {:>3}  {}  ({})",
                marker,
                chunk.index() + 1,
                chunk.text(),
                chunk.takes().len()
            );
            ListItem::new(line)
        })
        .collect();

    let list = List::new(items)
        .block(Block::default().borders(Borders::ALL).title(" script "))
        .highlight_style(Style::default().add_modifier(Modifier::REVERSED))
        .highlight_symbol("▶");

    let mut state = ListState::default().with_selected(Some(view.controller.selected_chunk()));
    frame.render_stateful_widget(list, area, &mut state);
}

fn draw_takes(frame: &mut Frame, area: Rect, view: &ViewState) {
    let controller = view.controller;
    let buffer = controller.buffer();
    let seconds = |samples: usize| buffer.duration_of(samples).as_secs_f64();

    let mut items: Vec<ListItem> = controller
        .document()
        .chunk(controller.selected_chunk())
        .map(|c| c.takes())
        .unwrap_or_default()
        .iter()
        .enumerate()
        .map(|(i, take)| {
            let style = match take.mark {
                Mark::Good => Style::default().fg(Color::Green),
                Mark::Bad => Style::default().fg(Color::Red),
                Mark::Unmarked => Style::default(),
            };
            let line = format!(
                "#{:<2} {:>7.2}s  +{:.2}s  {}",
                i + 1,
                seconds(take.start),
                seconds(take.len()),
                take.mark
            );
            ListItem::new(line).style(style)
        })
        .collect();

    if let TakeState::Recording { anchor, .. } = controller.state() {
        let elapsed = buffer.len().saturating_sub(anchor);
        let line = format!(
            "●   {:>7.2}s  +{:.2}s  recording",
            seconds(anchor),
            seconds(elapsed)
        );
        items.push(ListItem::new(line).style(Style::default().fg(Color::Red)));
    }

    let (sel_start, sel_end) = controller.staged_selection();
    let title = match (sel_start, sel_end) {
        (None, None) => " takes ".to_string(),
        (start, end) => format!(
            " takes  sel {}..{} ",
            start.map(|s| format!("{:.2}s", seconds(s))).unwrap_or_else(|| "?".into()),
            end.map(|s| format!("{:.2}s", seconds(s))).unwrap_or_else(|| "?".into()),
        ),
    };

    let list = List::new(items)
        .block(Block::default().borders(Borders::ALL).title(title))
        .highlight_style(Style::default().add_modifier(Modifier::REVERSED))
        .highlight_symbol("▶");

    let mut state = ListState::default().with_selected(controller.selected_take());
    frame.render_stateful_widget(list, area, &mut state);
}

fn draw_level(frame: &mut Frame, area: Rect, view: &ViewState) {
    let gauge = Gauge::default()
        .gauge_style(Style::default().fg(Color::Cyan))
        .ratio(view.level.clamp(0.0, 1.0))
        .label(format!("in {:>3.0}%", view.level * 100.0));
    frame.render_widget(gauge, area);
}

fn draw_status(frame: &mut Frame, area: Rect, view: &ViewState) {
    let mut spans = vec![Span::raw(view.stats.to_string())];
    if let Some(message) = view.message {
        spans.push(Span::raw("  "));
        spans.push(Span::styled(message, Style::default().fg(Color::Yellow)));
    }
    frame.render_widget(Paragraph::new(Line::from(spans)), area);
}

fn draw_controls(frame: &mut Frame, area: Rect, view: &ViewState) {
    let status = view.controller.status();
    let mut spans = Vec::new();
    for (keys, label) in keymap::visible(&status) {
        spans.push(Span::styled(
            format!(" {} ", keys),
            Style::default().add_modifier(Modifier::REVERSED),
        ));
        spans.push(Span::raw(format!(" {}  ", label)));
    }
    frame.render_widget(Paragraph::new(Line::from(spans)), area);
}
