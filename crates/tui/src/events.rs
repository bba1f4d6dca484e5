use std::time::{Duration, Instant};

use crossterm::event::{self, Event, MouseButton, MouseEvent, MouseEventKind};
use ratatui::{backend::Backend, layout::Rect, Terminal};
use tracing::info;

use crate::{
    app::{App, Focus},
    ui,
};

const TICK: Duration = Duration::from_millis(50);
const HEARTBEAT: Duration = Duration::from_millis(500);

pub fn run<B: Backend>(terminal: &mut Terminal<B>, app: &mut App) -> anyhow::Result<()> {
    let mut last_draw = Instant::now();
    loop {
        if app.dirty || last_draw.elapsed() >= HEARTBEAT {
            terminal.draw(|f| ui::draw(f, app))?;
            app.dirty = false;
            last_draw = Instant::now();
        }
        if app.focus == Focus::Input {
            let _ = terminal.show_cursor();
        } else {
            let _ = terminal.hide_cursor();
        }

        if event::poll(TICK)? {
            match event::read()? {
                Event::Key(key) => app.on_key(key),
                Event::Paste(s) => {
                    if let Some(st) = app.rename.as_mut() {
                        st.line.insert(&s.replace('\n', " "));
                        app.dirty = true;
                    } else if app.picker.is_none() {
                        app.insert_text(&s);
                    }
                }
                Event::Resize(_, _) => app.dirty = true,
                Event::Mouse(me) => on_mouse(app, me),
                _ => {}
            }
        }

        app.on_tick();

        if app.should_quit {
            app.shutdown();
            info!(target: "tui", "event loop exit");
            break;
        }
    }
    Ok(())
}

fn contains(area: Rect, x: u16, y: u16) -> bool {
    x >= area.x && x < area.x + area.width && y >= area.y && y < area.y + area.height
}

fn on_mouse(app: &mut App, me: MouseEvent) {
    if app.show_help || app.picker.is_some() || app.rename.is_some() || app.confirm.is_some() {
        return;
    }
    let (x, y) = (me.column, me.row);
    if app.chat_area.is_some_and(|a| contains(a, x, y)) {
        match me.kind {
            MouseEventKind::ScrollUp => app.scroll_chat_up(3),
            MouseEventKind::ScrollDown => app.scroll_chat_down(3),
            MouseEventKind::Down(MouseButton::Left) => {
                app.focus = Focus::Input;
                app.dirty = true;
            }
            _ => {}
        }
        return;
    }
    if !app.show_sidebar {
        return;
    }
    let Some(area) = app.sidebar_area.filter(|a| contains(*a, x, y)) else {
        return;
    };
    match me.kind {
        MouseEventKind::ScrollUp => {
            app.sidebar_scroll = app.sidebar_scroll.saturating_sub(1);
            app.dirty = true;
        }
        MouseEventKind::ScrollDown => {
            let max = app.sidebar_max_scroll();
            app.sidebar_scroll = (app.sidebar_scroll + 1).min(max);
            app.dirty = true;
        }
        MouseEventKind::Down(MouseButton::Left) => {
            if y > area.y && y + 1 < area.y + area.height {
                let idx = app.sidebar_scroll as usize + (y - (area.y + 1)) as usize;
                if idx < app.chats.len() {
                    app.focus = Focus::Sidebar;
                    app.open_chat(idx);
                }
            }
        }
        _ => {}
    }
}
