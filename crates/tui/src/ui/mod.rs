use ratatui::{
    layout::{Constraint, Direction, Layout, Position, Rect},
    style::{Modifier, Style},
    text::{Line, Span},
    widgets::{
        Block, Borders, Clear, Paragraph, Scrollbar, ScrollbarOrientation, ScrollbarState, Wrap,
    },
    Frame,
};
use unicode_segmentation::UnicodeSegmentation;
use unicode_width::UnicodeWidthStr;

use crate::app::{
    chat::LineKind,
    input::InputLine,
    picker::{PickerKind, PickerState},
    App, ConfirmAction, Focus, RenameState,
};
use crate::strings::{
    build_status_line, confirm_delete_chat_message, help_lines, sidebar_title, spinner,
    StatusInfo, EMPTY_CHAT, INPUT_HINT, PREFIX_ASSISTANT, PREFIX_USER, TITLE_CHAT, TITLE_CONFIRM,
    TITLE_HELP, TITLE_INPUT, TITLE_MODELS, TITLE_PERSONAS, TITLE_RENAME,
};
use crate::theme::THEME;

pub fn draw(f: &mut Frame, app: &mut App) {
    let mut constraints: Vec<Constraint> = Vec::new();
    if app.show_sidebar {
        constraints.push(Constraint::Length(28));
    }
    constraints.push(Constraint::Min(10));
    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints(constraints)
        .split(f.area());
    let main_area = if app.show_sidebar {
        app.sidebar_area = Some(chunks[0]);
        draw_sidebar(f, chunks[0], app);
        chunks[1]
    } else {
        app.sidebar_area = None;
        chunks[0]
    };
    draw_main(f, main_area, app);

    if let Some(state) = &app.rename {
        draw_rename(f, f.area(), state);
    }
    if let Some(action) = app.confirm {
        draw_confirm(f, f.area(), action, app);
    }
    if let Some(state) = &app.picker {
        draw_picker(f, f.area(), state);
    }
    if app.show_help {
        draw_help(f, f.area());
    }
}

fn title_style() -> Style {
    Style::default()
        .fg(THEME.title)
        .add_modifier(Modifier::BOLD)
}

fn selected_style(focused: bool) -> Style {
    if focused {
        Style::default()
            .fg(THEME.selected_fg)
            .bg(THEME.selected_bg)
            .add_modifier(Modifier::BOLD)
    } else {
        Style::default()
            .fg(THEME.border_focus)
            .add_modifier(Modifier::BOLD)
    }
}

fn inner_rect(area: Rect) -> Rect {
    Rect {
        x: area.x.saturating_add(1),
        y: area.y.saturating_add(1),
        width: area.width.saturating_sub(2),
        height: area.height.saturating_sub(2),
    }
}

fn draw_sidebar(f: &mut Frame, area: Rect, app: &App) {
    let focused = app.focus == Focus::Sidebar;
    let persona = app.current_persona().map(|p| p.name.as_str());
    let border_style = if focused {
        Style::default().fg(THEME.border_focus)
    } else {
        Style::default().fg(THEME.border_inactive)
    };
    let block = Block::default()
        .title(Span::styled(sidebar_title(persona), title_style()))
        .borders(Borders::ALL)
        .border_style(border_style);
    let inner_h = area.height.saturating_sub(2) as usize;
    let start = app.sidebar_scroll as usize;
    let lines: Vec<Line> = app
        .chats
        .iter()
        .enumerate()
        .skip(start)
        .take(inner_h)
        .map(|(i, c)| {
            let current = app.current_chat == Some(i);
            let prefix = if current { "> " } else { "  " };
            let style = if current {
                selected_style(focused)
            } else {
                Style::default()
            };
            Line::from(Span::styled(format!("{}{}", prefix, c.title), style))
        })
        .collect();
    f.render_widget(Paragraph::new(lines).block(block), area);

    let inner = inner_rect(area);
    if app.chats.len() > inner.height as usize {
        let mut sb_state = ScrollbarState::new(app.chats.len()).position(start);
        let sb = Scrollbar::default().orientation(ScrollbarOrientation::VerticalRight);
        f.render_stateful_widget(sb, inner, &mut sb_state);
    }
}

fn draw_main(f: &mut Frame, area: Rect, app: &mut App) {
    let inner_width = area.width.saturating_sub(2);
    let input_total_lines = measure_total_lines(app.input.text(), inner_width).max(1) as u16;
    let target_lines = input_total_lines.min(app.input_max_lines);
    let current = app.input_visible_lines.max(1);
    // grow or shrink one line per frame
    app.input_visible_lines = match current.cmp(&target_lines) {
        std::cmp::Ordering::Less => current + 1,
        std::cmp::Ordering::Greater => current - 1,
        std::cmp::Ordering::Equal => current,
    };
    let input_height = app.input_visible_lines + 2;

    let main_chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Min(5),
            Constraint::Length(3),
            Constraint::Length(input_height),
        ])
        .split(area);

    app.chat_area = Some(main_chunks[0]);
    draw_chat(f, main_chunks[0], app);
    draw_status(f, main_chunks[1], app);
    draw_input(f, main_chunks[2], app, inner_width);
}

fn draw_chat(f: &mut Frame, area: Rect, app: &mut App) {
    let title = match app.chats.get(app.current_chat.unwrap_or(usize::MAX)) {
        Some(c) => format!(" {} ", c.title),
        None => TITLE_CHAT.to_string(),
    };
    let block = Block::default()
        .title(Span::styled(title, title_style()))
        .borders(Borders::ALL)
        .border_style(Style::default().fg(THEME.chat_border));

    let inner = inner_rect(area);
    app.ensure_chat_wrapped(inner.width);
    let layout = app.compute_chat_layout(inner.height);

    if app.messages.is_empty() {
        let hint = Line::from(Span::styled(EMPTY_CHAT, Style::default().fg(THEME.notice)));
        let para = Paragraph::new(hint).block(block).wrap(Wrap { trim: true });
        f.render_widget(para, area);
        return;
    }

    let streaming_tail = if app.is_streaming() {
        Some(app.chat_cache.len().saturating_sub(1))
    } else {
        None
    };
    let lines: Vec<Line> = app
        .chat_cache
        .iter()
        .enumerate()
        .flat_map(|(idx, cached)| {
            cached
                .lines
                .iter()
                .enumerate()
                .map(move |(i, line)| (idx, cached.kind, cached.stopped, i, cached.lines.len(), line))
        })
        .skip(layout.start)
        .take(layout.viewport as usize)
        .map(|(idx, kind, stopped, i, n, line)| {
            let head = match kind {
                LineKind::User => PREFIX_USER,
                LineKind::Assistant => PREFIX_ASSISTANT,
                LineKind::Notice => "",
            };
            let head_style = match kind {
                LineKind::User => Style::default().fg(THEME.user).add_modifier(Modifier::BOLD),
                _ => Style::default()
                    .fg(THEME.assistant)
                    .add_modifier(Modifier::BOLD),
            };
            if kind == LineKind::Notice {
                return Line::from(Span::styled(line.clone(), Style::default().fg(THEME.notice)));
            }
            if stopped && i + 1 == n {
                return Line::from(Span::styled(line.clone(), Style::default().fg(THEME.stopped)));
            }
            let mut spans = Vec::new();
            if i == 0 && line.starts_with(head.trim_end()) {
                let hb = head.len().min(line.len());
                spans.push(Span::styled(line[..hb].to_string(), head_style));
                spans.push(Span::raw(line[hb..].to_string()));
            } else {
                spans.push(Span::raw(line.clone()));
            }
            if streaming_tail == Some(idx) && i + 1 == n {
                spans.push(Span::styled(
                    format!(" {}", spinner(app.tick)),
                    Style::default().fg(THEME.streaming),
                ));
            }
            Line::from(spans)
        })
        .collect();
    f.render_widget(Paragraph::new(lines).block(block), area);

    if layout.total > inner.height as usize {
        let mut sb_state = ScrollbarState::new(layout.total).position(layout.start);
        let sb = Scrollbar::default().orientation(ScrollbarOrientation::VerticalRight);
        f.render_stateful_widget(sb, inner, &mut sb_state);
    }
}

fn draw_status(f: &mut Frame, area: Rect, app: &App) {
    let left = app.rate_window.check(
        chrono::Utc::now(),
        app.image_limit,
        chrono::Duration::hours(24),
    );
    let info = StatusInfo {
        model: app.model.info().name,
        persona: app.current_persona().map(|p| p.name.as_str()),
        streaming: app.is_streaming(),
        generating_image: app.is_generating_image(),
        spinner: spinner(app.tick),
        images_left: left.remaining,
        images_total: left.total,
        scroll: app.chat_scroll,
        focus: match app.focus {
            Focus::Input => "Input",
            Focus::Sidebar => "Chats",
        },
    };
    let tips = build_status_line(&info, area.width.saturating_sub(2));
    let style = if info.streaming {
        Style::default().fg(THEME.streaming)
    } else {
        Style::default().fg(THEME.notice)
    };
    let para = Paragraph::new(Line::from(Span::styled(tips, style)))
        .block(Block::default().borders(Borders::ALL));
    f.render_widget(para, area);
}

fn draw_input(f: &mut Frame, area: Rect, app: &App, inner_width: u16) {
    let focused = app.focus == Focus::Input;
    let border_style = if focused {
        Style::default().fg(THEME.border_focus)
    } else {
        Style::default().fg(THEME.border_inactive)
    };
    let block = Block::default()
        .title(TITLE_INPUT)
        .borders(Borders::ALL)
        .border_style(border_style);
    let visible = app.input_visible_lines;
    let (line_idx, col_width) =
        measure_prefix_line_col(&app.input.before_cursor(), inner_width);
    let offset_y = line_idx.saturating_sub(visible.saturating_sub(1));
    let para = if app.input.is_empty() {
        let hint = Line::from(Span::styled(INPUT_HINT, Style::default().fg(THEME.notice)));
        Paragraph::new(hint).block(block).wrap(Wrap { trim: false })
    } else {
        Paragraph::new(app.input.text().to_string())
            .block(block)
            .wrap(Wrap { trim: false })
            .scroll((offset_y, 0))
    };
    f.render_widget(para, area);
    if focused && !popup_open(app) {
        let cursor_x = area.x + 1 + col_width;
        let cursor_y = area.y + 1 + line_idx.saturating_sub(offset_y);
        f.set_cursor_position(Position::new(cursor_x, cursor_y));
    }
}

fn popup_open(app: &App) -> bool {
    app.picker.is_some() || app.rename.is_some() || app.confirm.is_some() || app.show_help
}

fn draw_help(f: &mut Frame, area: Rect) {
    let popup_area = centered_rect(76, 76, area);
    let block = Block::default()
        .title(Span::styled(TITLE_HELP, title_style()))
        .borders(Borders::ALL);
    let lines = help_lines()
        .iter()
        .map(|s| {
            if s.starts_with(' ') {
                Line::from(*s)
            } else {
                Line::from(Span::styled(*s, title_style()))
            }
        })
        .collect::<Vec<Line>>();
    let para = Paragraph::new(lines)
        .block(block)
        .wrap(Wrap { trim: false });
    f.render_widget(Clear, popup_area);
    f.render_widget(para, popup_area);
}

/// Prompt line plus cursor shared by the text popups.
fn draw_prompt(f: &mut Frame, popup_area: Rect, row: u16, line: &InputLine) -> Line<'static> {
    let cursor_x = popup_area.x + 4 + UnicodeWidthStr::width(line.before_cursor().as_str()) as u16;
    f.set_cursor_position(Position::new(cursor_x, popup_area.y + row));
    Line::from(format!(">> {}", line.text()))
}

fn draw_picker(f: &mut Frame, area: Rect, state: &PickerState) {
    let popup_area = centered_rect(60, 50, area);
    let title = match state.kind {
        PickerKind::Model => TITLE_MODELS,
        PickerKind::Persona => TITLE_PERSONAS,
    };
    let block = Block::default()
        .title(Span::styled(title, title_style()))
        .borders(Borders::ALL);
    f.render_widget(Clear, popup_area);
    let mut lines: Vec<Line> = vec![draw_prompt(f, popup_area, 1, &state.query)];
    let max_list = popup_area.height.saturating_sub(3) as usize;
    let skip = (state.selected + 1).saturating_sub(max_list);
    for (i, item) in state.visible().enumerate().skip(skip).take(max_list) {
        let sel = i == state.selected;
        let style = if sel {
            selected_style(true)
        } else {
            Style::default()
        };
        lines.push(Line::from(vec![
            Span::styled(
                format!("{} {}", if sel { ">" } else { " " }, item.label),
                style,
            ),
            Span::styled(format!("  {}", item.detail), Style::default().fg(THEME.notice)),
        ]));
    }
    f.render_widget(Paragraph::new(lines).block(block), popup_area);
}

fn draw_rename(f: &mut Frame, area: Rect, state: &RenameState) {
    let popup_area = centered_rect(60, 30, area);
    let block = Block::default()
        .title(Span::styled(TITLE_RENAME, title_style()))
        .borders(Borders::ALL);
    f.render_widget(Clear, popup_area);
    let lines = vec![
        Line::from("Enter new title, Enter to confirm, Esc to cancel:"),
        draw_prompt(f, popup_area, 2, &state.line),
    ];
    f.render_widget(Paragraph::new(lines).block(block), popup_area);
}

fn draw_confirm(f: &mut Frame, area: Rect, action: ConfirmAction, app: &App) {
    let popup_area = centered_rect(60, 30, area);
    let block = Block::default()
        .title(Span::styled(TITLE_CONFIRM, title_style()))
        .borders(Borders::ALL);
    let text = match action {
        ConfirmAction::DeleteChat(id) => {
            let title = app
                .chats
                .iter()
                .find(|c| c.id == id)
                .map(|c| c.title.as_str())
                .unwrap_or_default();
            confirm_delete_chat_message(title)
        }
    };
    let para = Paragraph::new(Line::from(text))
        .block(block)
        .wrap(Wrap { trim: true });
    f.render_widget(Clear, popup_area);
    f.render_widget(para, popup_area);
}

fn centered_rect(percent_x: u16, percent_y: u16, r: Rect) -> Rect {
    let vert = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(r);
    let horiz = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(vert[1]);
    horiz[1]
}

fn measure_total_lines(s: &str, width: u16) -> usize {
    measure_prefix_line_col(s, width).0 as usize + 1
}

/// Zero-based (line, column) reached after laying out `s` char-wrapped at `width`.
fn measure_prefix_line_col(s: &str, width: u16) -> (u16, u16) {
    if width == 0 {
        return (0, 0);
    }
    let mut line = 0usize;
    let mut col = 0usize;
    for g in s.graphemes(true) {
        if g == "\n" {
            line += 1;
            col = 0;
            continue;
        }
        let w = UnicodeWidthStr::width(g);
        if col + w > width as usize {
            line += 1;
            col = 0;
        }
        col += w;
    }
    (line as u16, col as u16)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrap_basic_ascii() {
        assert_eq!(measure_total_lines("abcdef", 5), 2);
        assert_eq!(measure_prefix_line_col("abcde", 5), (0, 5));
        assert_eq!(measure_prefix_line_col("abcdef", 5), (1, 1));
    }

    #[test]
    fn wrap_with_newline() {
        assert_eq!(measure_total_lines("ab\ncdef", 80), 2);
        assert_eq!(measure_prefix_line_col("ab", 80), (0, 2));
        assert_eq!(measure_prefix_line_col("ab\ncd", 80), (1, 2));
    }

    #[test]
    fn wrap_fullwidth_chars() {
        assert_eq!(measure_total_lines("日本語", 4), 2);
        assert_eq!(measure_prefix_line_col("日本", 4), (0, 4));
        assert_eq!(measure_prefix_line_col("日本語", 4), (1, 2));
    }

    #[test]
    fn zero_width_is_one_line() {
        assert_eq!(measure_total_lines("anything", 0), 1);
    }
}
