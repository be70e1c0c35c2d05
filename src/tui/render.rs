/// Ratatui draw entry-point for the Mission Control console.
///
/// Pure view layer: reads AppState, paints panels, never mutates. The
/// transcript pane is built bottom-up so `scroll == 0` always means "pinned
/// to the newest turn".
use ratatui::{
    Frame,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, List, ListItem, Paragraph},
};
use unicode_width::UnicodeWidthStr;

use super::{AppState, Focus, SETTING_ROWS};
use crate::session::Role;

pub const SPINNER_GLYPHS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];

const DIM: Color = Color::Rgb(100, 95, 140);
const FAINT: Color = Color::Rgb(55, 52, 80);
const RULE: Color = Color::Rgb(35, 33, 55);

// ── Main draw entry point ─────────────────────────────────────────────────────

pub fn draw(f: &mut Frame, state: &AppState) {
    let area = f.area();

    // Left mission sidebar when the terminal is wide enough
    let after_sidebar = if state.sidebar_visible {
        let cols = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Length(28), Constraint::Min(0)])
            .split(area);
        draw_mission_sidebar(f, state, cols[0]);
        cols[1]
    } else {
        area
    };

    // Right panel: run settings + intel feed
    let cols = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Min(0), Constraint::Length(36)])
        .split(after_sidebar);
    let center = cols[0];
    draw_settings_panel(f, state, cols[1]);

    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1), // header
            Constraint::Min(0),    // transcript
            Constraint::Length(1), // status bar
            Constraint::Length(3), // input box
        ])
        .split(center);

    draw_header(f, state, rows[0]);
    draw_transcript(f, state, rows[1]);
    draw_status_bar(f, state, rows[2]);
    draw_input(f, state, rows[3]);
}

// ── Header ────────────────────────────────────────────────────────────────────

fn draw_header(f: &mut Frame, state: &AppState, area: Rect) {
    let line = Line::from(vec![
        Span::styled(
            " MISSION CONTROL",
            Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
        ),
        Span::styled(
            format!("  {}", state.endpoint),
            Style::default().fg(FAINT),
        ),
        Span::styled(
            format!("  [{}]", state.profile_name),
            Style::default().fg(DIM),
        ),
    ]);
    f.render_widget(Paragraph::new(line), area);
}

// ── Transcript ────────────────────────────────────────────────────────────────

fn draw_transcript(f: &mut Frame, state: &AppState, area: Rect) {
    let width = area.width as usize;
    let mut lines: Vec<Line<'static>> = Vec::new();

    if state.session.transcript.is_empty() && !state.session.thinking.active {
        draw_empty_transcript(f, area);
        return;
    }

    for turn in &state.session.transcript {
        let (label, label_fg) = match turn.role {
            Role::User => ("USER", Color::Rgb(160, 140, 255)),
            Role::Assistant => ("PUNISHER", Color::Cyan),
        };

        let mut header = vec![Span::styled(
            label.to_string(),
            Style::default().fg(label_fg).add_modifier(Modifier::BOLD),
        )];
        if state.show_timestamps || turn.role == Role::Assistant {
            header.push(Span::styled(
                format!("  {}", turn.timestamp),
                Style::default().fg(FAINT),
            ));
        }
        lines.push(Line::from(header));

        for raw in turn.content.lines() {
            for wrapped in wrap_text(raw, width.saturating_sub(2).max(10)) {
                lines.push(Line::from(Span::styled(
                    format!("  {wrapped}"),
                    Style::default().fg(Color::Rgb(220, 218, 235)),
                )));
            }
        }
        lines.push(Line::raw(""));
    }

    // Thinking shimmer row
    if state.session.thinking.active {
        let glyph = SPINNER_GLYPHS[(state.spinner_tick as usize) % SPINNER_GLYPHS.len()];
        let mut header = vec![
            Span::styled(
                "PUNISHER ",
                Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
            ),
            Span::styled(glyph.to_string(), Style::default().fg(Color::Cyan)),
        ];
        if !state.session.thinking.label.is_empty() {
            header.push(Span::styled(
                format!("  {}", state.session.thinking.label),
                Style::default().fg(DIM).add_modifier(Modifier::ITALIC),
            ));
        }
        lines.push(Line::from(header));
        lines.push(Line::from(Span::styled(
            "  Processing intelligence stream…",
            Style::default().fg(FAINT).add_modifier(Modifier::DIM),
        )));
    }

    // Bottom-pinned window: scroll counts lines up from the end.
    let visible = area.height as usize;
    let total = lines.len();
    let max_scroll = total.saturating_sub(visible);
    let scroll = state.scroll.min(max_scroll);
    let end = total - scroll;
    let start = end.saturating_sub(visible);

    let window: Vec<Line> = lines[start..end].to_vec();
    f.render_widget(Paragraph::new(window), area);
}

fn draw_empty_transcript(f: &mut Frame, area: Rect) {
    let lines = vec![
        Line::raw(""),
        Line::from(Span::styled(
            "Awaiting Deployment",
            Style::default().fg(DIM).add_modifier(Modifier::BOLD),
        )),
        Line::from(Span::styled(
            "Define mission parameters or request tactical assessment below.",
            Style::default().fg(FAINT),
        )),
    ];
    let y = area.height / 3;
    let centered = Rect {
        y: area.y + y,
        height: area.height.saturating_sub(y),
        ..area
    };
    f.render_widget(
        Paragraph::new(lines).alignment(ratatui::layout::Alignment::Center),
        centered,
    );
}

// ── Status bar ────────────────────────────────────────────────────────────────

fn draw_status_bar(f: &mut Frame, state: &AppState, area: Rect) {
    let (status, color) = if state.session.thinking.active {
        let label = if state.session.thinking.label.is_empty() {
            "ENGAGED".to_string()
        } else {
            state.session.thinking.label.clone()
        };
        (format!(" ◉ {label}"), Color::Yellow)
    } else {
        (" ○ LINK IDLE".to_string(), FAINT)
    };

    let hint = if state.prompt_edit.is_some() {
        "Enter commit · Shift+Enter newline · Esc cancel "
    } else {
        match state.focus {
            Focus::Input => "Enter dispatch · Tab settings · ↑↓ scroll · Ctrl+C exit ",
            Focus::Settings => "↑↓ select · ←→ adjust · Enter edit prompt · Tab back ",
        }
    };
    let gap = (area.width as usize)
        .saturating_sub(status.width() + hint.width());

    let line = Line::from(vec![
        Span::styled(status, Style::default().fg(color)),
        Span::raw(" ".repeat(gap)),
        Span::styled(hint.to_string(), Style::default().fg(FAINT)),
    ]);
    f.render_widget(Paragraph::new(line), area);
}

// ── Input box ─────────────────────────────────────────────────────────────────

fn draw_input(f: &mut Frame, state: &AppState, area: Rect) {
    let focused = state.focus == Focus::Input && state.prompt_edit.is_none();
    let border = if focused { Color::Cyan } else { RULE };

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(border))
        .title(Span::styled(
            " tactical request ",
            Style::default().fg(DIM),
        ));
    let inner = block.inner(area);
    f.render_widget(block, area);

    let before = &state.input[..state.cursor];
    let after = &state.input[state.cursor..];
    let mut spans = vec![
        Span::styled("❯ ", Style::default().fg(Color::Cyan)),
        Span::raw(before.to_string()),
    ];
    if focused {
        let (cursor_ch, rest) = match after.chars().next() {
            Some(c) => (c.to_string(), after[c.len_utf8()..].to_string()),
            None => (" ".to_string(), String::new()),
        };
        spans.push(Span::styled(
            cursor_ch,
            Style::default().bg(Color::Cyan).fg(Color::Black),
        ));
        spans.push(Span::raw(rest));
    } else {
        spans.push(Span::raw(after.to_string()));
    }

    f.render_widget(Paragraph::new(Line::from(spans)), inner);
}

// ── Mission sidebar ───────────────────────────────────────────────────────────

fn draw_mission_sidebar(f: &mut Frame, state: &AppState, area: Rect) {
    let block = Block::default()
        .borders(Borders::RIGHT)
        .border_style(Style::default().fg(RULE));
    let inner = block.inner(area);
    f.render_widget(block, area);

    let w = inner.width as usize;
    let mut items: Vec<ListItem<'static>> = Vec::new();

    items.push(ListItem::new(Line::from(Span::styled(
        " Mission History",
        Style::default().fg(DIM).add_modifier(Modifier::BOLD),
    ))));
    items.push(rule(w));

    if state.tasks.is_empty() {
        items.push(ListItem::new(Line::from(Span::styled(
            " Current Operation",
            Style::default().fg(Color::Cyan),
        ))));
        items.push(ListItem::new(Line::from(Span::styled(
            " no delegated tasks",
            Style::default().fg(FAINT),
        ))));
    } else {
        for task in &state.tasks {
            let agent: String = task.agent.to_uppercase();
            let meta = format!(" {agent}  {}", task.status);
            items.push(ListItem::new(Line::from(Span::styled(
                truncate(&meta, w),
                Style::default().fg(Color::Rgb(100, 150, 255)),
            ))));
            items.push(ListItem::new(Line::from(Span::styled(
                truncate(&format!("  {}", task.task), w),
                Style::default().fg(Color::Rgb(180, 178, 200)),
            ))));
            items.push(rule(w));
        }
    }

    f.render_widget(List::new(items), inner);
}

// ── Run settings + intel feed ─────────────────────────────────────────────────

fn draw_settings_panel(f: &mut Frame, state: &AppState, area: Rect) {
    let block = Block::default()
        .borders(Borders::LEFT)
        .border_style(Style::default().fg(if state.focus == Focus::Settings {
            Color::Cyan
        } else {
            RULE
        }));
    let inner = block.inner(area);
    f.render_widget(block, area);

    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(12), Constraint::Min(0)])
        .split(inner);

    draw_run_settings(f, state, rows[0]);
    draw_intel_feed(f, state, rows[1]);
}

fn draw_run_settings(f: &mut Frame, state: &AppState, area: Rect) {
    let cfg = &state.session.run_config;
    let w = area.width as usize;
    let mut items: Vec<ListItem<'static>> = Vec::new();

    items.push(ListItem::new(Line::from(Span::styled(
        " Run Settings",
        Style::default().fg(DIM).add_modifier(Modifier::BOLD),
    ))));
    items.push(rule(w));
    items.push(kv("model", &cfg.agent_id, false));

    let values: [(String, usize); 3] = [
        (format!("{:.1}", cfg.temperature), 0),
        (
            cfg.top_p.map(|p| format!("{p:.1}")).unwrap_or_else(|| "—".to_string()),
            1,
        ),
        (
            cfg.top_k.map(|k| k.to_string()).unwrap_or_else(|| "—".to_string()),
            2,
        ),
    ];
    for (value, idx) in values {
        let selected = state.focus == Focus::Settings && state.setting_selected == idx;
        items.push(kv(SETTING_ROWS[idx], &value, selected));
    }

    // System prompt: edit buffer when active, stored value otherwise
    let prompt_selected = state.focus == Focus::Settings && state.setting_selected == 3;
    let (prompt_shown, editing) = match &state.prompt_edit {
        Some(buffer) => (buffer.clone(), true),
        None => (cfg.system_prompt.clone(), false),
    };
    items.push(kv(
        if editing { "system prompt*" } else { "system prompt" },
        "",
        prompt_selected,
    ));
    let preview = truncate(&prompt_shown, w.saturating_sub(4));
    items.push(ListItem::new(Line::from(Span::styled(
        format!("   {preview}{}", if editing { "▏" } else { "" }),
        Style::default().fg(if editing { Color::White } else { FAINT }),
    ))));

    let mode = match state.session.config_mode {
        crate::session::ConfigMode::Persisted => "synced to server",
        crate::session::ConfigMode::LocalOnly => "local only",
    };
    items.push(ListItem::new(Line::from(Span::styled(
        format!(" settings: {mode}"),
        Style::default().fg(FAINT),
    ))));

    f.render_widget(List::new(items), area);
}

fn draw_intel_feed(f: &mut Frame, state: &AppState, area: Rect) {
    let w = area.width as usize;
    let mut items: Vec<ListItem<'static>> = Vec::new();

    items.push(ListItem::new(Line::from(Span::styled(
        " Live Intel Feed",
        Style::default().fg(DIM).add_modifier(Modifier::BOLD),
    ))));
    items.push(rule(w));

    if state.session.intel.is_empty() {
        items.push(ListItem::new(Line::from(Span::styled(
            " Synchronizing Link…",
            Style::default().fg(FAINT),
        ))));
    } else {
        for line in &state.session.intel {
            items.push(ListItem::new(Line::from(Span::styled(
                truncate(&format!(" {line}"), w),
                Style::default().fg(Color::Rgb(120, 200, 160)),
            ))));
        }
    }

    f.render_widget(List::new(items), area);
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn rule(w: usize) -> ListItem<'static> {
    ListItem::new(Line::from(Span::styled(
        "─".repeat(w),
        Style::default().fg(RULE),
    )))
}

fn kv(k: &str, v: &str, selected: bool) -> ListItem<'static> {
    let key_style = if selected {
        Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD)
    } else {
        Style::default().fg(DIM)
    };
    let marker = if selected { "›" } else { " " };
    ListItem::new(Line::from(vec![
        Span::styled(format!("{marker} {k:<14}"), key_style),
        Span::styled(v.to_string(), Style::default().fg(Color::White)),
    ]))
}

fn truncate(s: &str, max: usize) -> String {
    if s.width() <= max {
        s.to_string()
    } else {
        let mut out = String::new();
        let mut used = 0;
        for c in s.chars() {
            let cw = unicode_width::UnicodeWidthChar::width(c).unwrap_or(0);
            if used + cw + 1 > max {
                break;
            }
            out.push(c);
            used += cw;
        }
        out.push('…');
        out
    }
}

/// Word-wrap a single line of text to `max_width` columns.
/// Splits on whitespace; never truncates mid-word unless the word alone
/// exceeds max_width.
pub fn wrap_text(text: &str, max_width: usize) -> Vec<String> {
    if text.is_empty() {
        return vec![String::new()];
    }
    let mut lines = Vec::new();
    let mut current = String::new();
    let mut current_width = 0usize;

    for word in text.split_whitespace() {
        let word_width = word.width();
        if current_width == 0 {
            current.push_str(word);
            current_width = word_width;
        } else if current_width + 1 + word_width <= max_width {
            current.push(' ');
            current.push_str(word);
            current_width += 1 + word_width;
        } else {
            lines.push(current.clone());
            current = word.to_string();
            current_width = word_width;
        }
    }
    if !current.is_empty() || lines.is_empty() {
        lines.push(current);
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrap_splits_on_word_boundaries() {
        let lines = wrap_text("alpha bravo charlie delta", 11);
        assert_eq!(lines, vec!["alpha bravo", "charlie", "delta"]);
    }

    #[test]
    fn wrap_keeps_empty_line() {
        assert_eq!(wrap_text("", 10), vec![String::new()]);
    }

    #[test]
    fn truncate_appends_ellipsis() {
        assert_eq!(truncate("short", 10), "short");
        let t = truncate("a very long intel line", 8);
        assert!(t.ends_with('…'));
        assert!(t.width() <= 8);
    }
}
