use std::sync::Arc;

use anyhow::{Context, Result};
use blue_core::{
    image::{ImageGenerator, RateWindow},
    llm::ModelClient,
    persona::Persona,
    ModelId, SessionHandle, StreamingChatSession,
};
use blue_providers::{AimlConfig, AimlImageClient, FileConfig, GroqClient, GroqConfig};
use chrono::Utc;
use crossterm::event::{KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use ratatui::layout::Rect;
use tokio::runtime::Runtime;
use tracing::{info, warn};
use uuid::Uuid;

use crate::store::{Chat, ChatMessage, Store, UiState, UserSettings};

pub mod chat;
pub mod chats;
pub mod commands;
mod controller;
pub mod history;
pub mod input;
pub mod picker;

use chat::WrappedMsg;
use controller::{ActiveStream, ImageJob};
use history::InputHistory;
use input::InputLine;
use picker::PickerState;

/// Streaming session over whichever chat backend was configured.
pub type ChatBackend = StreamingChatSession<Arc<dyn ModelClient>>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Focus {
    Input,
    Sidebar,
}

pub struct RenameState {
    pub chat_id: Uuid,
    pub line: InputLine,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConfirmAction {
    DeleteChat(Uuid),
}

/// Clients built from configuration. Either may be missing; the UI still starts.
pub struct Backends {
    pub chat: Option<Arc<ChatBackend>>,
    pub images: Option<Arc<dyn ImageGenerator>>,
    pub image_limit: u32,
    pub default_model: Option<ModelId>,
    pub notices: Vec<String>,
}

impl Backends {
    pub fn from_config(file: &FileConfig) -> Self {
        let mut notices = Vec::new();
        let chat = match GroqConfig::from_env_and_file(file).and_then(GroqClient::new) {
            Ok(client) => {
                let client: Arc<dyn ModelClient> = Arc::new(client);
                Some(Arc::new(StreamingChatSession::new(
                    client,
                    file.session_config(),
                )))
            }
            Err(e) => {
                warn!(target: "tui", "chat backend unavailable: {:#}", e);
                notices.push(format!("[info] chat unavailable: {}", e));
                None
            }
        };
        let images = image_backend(AimlConfig::from_env_and_file(file), &mut notices);
        Self {
            chat,
            images,
            image_limit: file.image_daily_limit(),
            default_model: file.default_model(),
            notices,
        }
    }
}

/// `None` when no key is configured; a broken config also leaves a notice.
fn image_backend(
    cfg: anyhow::Result<Option<AimlConfig>>,
    notices: &mut Vec<String>,
) -> Option<Arc<dyn ImageGenerator>> {
    match cfg.and_then(|cfg| cfg.map(AimlImageClient::new).transpose()) {
        Ok(Some(client)) => Some(Arc::new(client) as Arc<dyn ImageGenerator>),
        Ok(None) => None,
        Err(e) => {
            warn!(target: "tui", "image backend unavailable: {:#}", e);
            notices.push(format!("[image] image generation unavailable: {}", e));
            None
        }
    }
}

pub struct App {
    pub messages: Vec<ChatMessage>,
    pub chats: Vec<Chat>,
    pub current_chat: Option<usize>,
    pub personas: Vec<Persona>,
    pub persona: Option<Uuid>,
    pub model: ModelId,
    pub input: InputLine,
    pub history: InputHistory,
    pub focus: Focus,
    pub should_quit: bool,
    pub dirty: bool,
    pub tick: u64,
    pub show_sidebar: bool,
    pub show_help: bool,
    pub chat_area: Option<Rect>,
    pub sidebar_area: Option<Rect>,
    pub sidebar_scroll: u16,
    /// Lines scrolled up from the bottom; 0 follows new output.
    pub chat_scroll: u16,
    pub chat_viewport: u16,
    pub chat_wrap_width: u16,
    pub chat_cache: Vec<WrappedMsg>,
    pub input_visible_lines: u16,
    pub input_max_lines: u16,
    pub rename: Option<RenameState>,
    pub confirm: Option<ConfirmAction>,
    pub picker: Option<PickerState>,
    pub image_limit: u32,
    pub rate_window: RateWindow,
    store: Store,
    rt: Runtime,
    backend: Option<Arc<ChatBackend>>,
    images: Option<Arc<dyn ImageGenerator>>,
    handle: SessionHandle,
    stream: Option<ActiveStream>,
    image_job: Option<ImageJob>,
}

impl App {
    pub fn new(store: Store, backends: Backends) -> Result<Self> {
        let rt = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("blue-worker")
            .enable_all()
            .build()
            .context("build tokio runtime")?;
        let ui = store.load_ui_state().unwrap_or_else(|e| {
            warn!(target: "tui", "ignoring saved ui state: {:#}", e);
            UiState::default()
        });
        let settings = store.load_settings()?;
        let personas = store.list_personas()?;
        let persona = ui
            .persona_id
            .filter(|id| personas.iter().any(|p| p.id == *id));
        let model = ui
            .model
            .as_deref()
            .and_then(ModelId::parse)
            .or_else(|| settings.as_ref().map(UserSettings::default_model_id))
            .or(backends.default_model)
            .unwrap_or_default();
        let rate_window = store.load_rate_window(Utc::now())?;
        info!(target: "tui", "store at {}", store.root().display());

        let mut app = Self {
            messages: Vec::new(),
            chats: Vec::new(),
            current_chat: None,
            personas,
            persona,
            model,
            input: InputLine::default(),
            history: InputHistory::default(),
            focus: Focus::Input,
            should_quit: false,
            dirty: true,
            tick: 0,
            show_sidebar: ui.show_sidebar,
            show_help: false,
            chat_area: None,
            sidebar_area: None,
            sidebar_scroll: 0,
            chat_scroll: 0,
            chat_viewport: 0,
            chat_wrap_width: 0,
            chat_cache: Vec::new(),
            input_visible_lines: 1,
            input_max_lines: 6,
            rename: None,
            confirm: None,
            picker: None,
            image_limit: backends.image_limit,
            rate_window,
            store,
            rt,
            backend: backends.chat,
            images: backends.images,
            handle: SessionHandle::new(),
            stream: None,
            image_job: None,
        };
        app.reload_chats();
        if let Some(idx) = ui
            .chat_id
            .and_then(|id| app.chats.iter().position(|c| c.id == id))
        {
            app.open_chat(idx);
        }
        for n in backends.notices {
            app.notice(n);
        }
        info!(
            target: "tui",
            "app ready: model={} persona={:?} chats={}",
            app.model,
            app.persona,
            app.chats.len()
        );
        Ok(app)
    }

    #[cfg(test)]
    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn is_streaming(&self) -> bool {
        self.stream.is_some()
    }

    pub fn is_generating_image(&self) -> bool {
        self.image_job.is_some()
    }

    pub fn current_persona(&self) -> Option<&Persona> {
        let id = self.persona?;
        self.personas.iter().find(|p| p.id == id)
    }

    pub fn ui_state(&self) -> UiState {
        UiState {
            show_sidebar: self.show_sidebar,
            persona_id: self.persona,
            chat_id: self.current_chat_id(),
            model: Some(self.model.as_str().to_string()),
        }
    }

    /// Stops any running generation and saves the UI state.
    pub fn shutdown(&mut self) {
        self.stop_stream();
        if let Err(e) = self.store.save_ui_state(&self.ui_state()) {
            warn!(target: "tui", "save ui state failed: {:#}", e);
        }
        info!(target: "tui", "shutdown");
    }

    /// Shows an inline line that is never persisted nor sent to the model.
    pub fn notice(&mut self, text: impl Into<String>) {
        self.messages.push(ChatMessage::notice(text));
        self.chat_scroll = 0;
        self.dirty = true;
    }

    pub fn insert_text(&mut self, s: &str) {
        self.input.insert(s);
        self.dirty = true;
    }

    pub fn scroll_chat_up(&mut self, lines: u16) {
        self.chat_scroll = self.chat_scroll.saturating_add(lines);
        self.dirty = true;
    }

    pub fn scroll_chat_down(&mut self, lines: u16) {
        self.chat_scroll = self.chat_scroll.saturating_sub(lines);
        self.dirty = true;
    }

    pub fn on_key(&mut self, key: KeyEvent) {
        if key.kind != KeyEventKind::Press {
            return;
        }
        self.dirty = true;
        if self.picker.is_some() {
            self.on_picker_key(key);
            return;
        }
        if self.show_help {
            if matches!(
                key.code,
                KeyCode::Esc | KeyCode::F(1) | KeyCode::Char('?') | KeyCode::Char('q')
            ) {
                self.show_help = false;
            }
            return;
        }
        if self.rename.is_some() {
            self.on_rename_key(key);
            return;
        }
        if let Some(action) = self.confirm {
            match key.code {
                KeyCode::Char('y') | KeyCode::Char('Y') => {
                    self.confirm = None;
                    match action {
                        ConfirmAction::DeleteChat(id) => self.delete_chat(id),
                    }
                }
                KeyCode::Char('n') | KeyCode::Char('N') | KeyCode::Esc => self.confirm = None,
                _ => {}
            }
            return;
        }

        let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
        match key.code {
            KeyCode::Char('c') if ctrl => self.stop_or_quit(),
            KeyCode::Esc => self.stop_or_quit(),
            KeyCode::Char('n') if ctrl => self.new_chat(),
            KeyCode::Char('o') if ctrl => self.open_model_picker(),
            KeyCode::Char('p') if ctrl => self.open_persona_picker(),
            KeyCode::F(1) => self.show_help = true,
            KeyCode::F(2) => {
                self.show_sidebar = !self.show_sidebar;
                if !self.show_sidebar {
                    self.focus = Focus::Input;
                }
            }
            KeyCode::Tab => {
                self.focus = match self.focus {
                    Focus::Input if self.show_sidebar => Focus::Sidebar,
                    _ => Focus::Input,
                };
            }
            KeyCode::PageUp => {
                let step = self.chat_viewport.max(1);
                self.scroll_chat_up(step);
            }
            KeyCode::PageDown => {
                let step = self.chat_viewport.max(1);
                self.scroll_chat_down(step);
            }
            KeyCode::Up if ctrl => self.scroll_chat_up(1),
            KeyCode::Down if ctrl => self.scroll_chat_down(1),
            KeyCode::Home if ctrl => self.chat_scroll = u16::MAX,
            KeyCode::End if ctrl => self.chat_scroll = 0,
            _ => match self.focus {
                Focus::Input => self.on_input_key(key),
                Focus::Sidebar => self.on_sidebar_key(key),
            },
        }
    }

    fn stop_or_quit(&mut self) {
        if !self.stop_stream() {
            self.should_quit = true;
        }
    }

    fn on_input_key(&mut self, key: KeyEvent) {
        let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
        let newline = key
            .modifiers
            .intersects(KeyModifiers::SHIFT | KeyModifiers::ALT);
        match key.code {
            KeyCode::Enter if newline => self.input.insert("\n"),
            KeyCode::Enter => self.submit(),
            KeyCode::Char('?') if self.input.is_empty() => self.show_help = true,
            KeyCode::Char('w') if ctrl => self.input.delete_prev_word(),
            KeyCode::Char('u') if ctrl => self.input.kill_to_line_start(),
            KeyCode::Char('k') if ctrl => self.input.kill_to_line_end(),
            KeyCode::Char('a') if ctrl => self.input.home(),
            KeyCode::Char('e') if ctrl => self.input.end(),
            KeyCode::Char(_) if ctrl => {}
            KeyCode::Char(ch) => self.input.insert_char(ch),
            KeyCode::Backspace => self.input.backspace(),
            KeyCode::Delete => self.input.delete(),
            KeyCode::Left if ctrl => self.input.word_left(),
            KeyCode::Right if ctrl => self.input.word_right(),
            KeyCode::Left => self.input.left(),
            KeyCode::Right => self.input.right(),
            KeyCode::Home => self.input.home(),
            KeyCode::End => self.input.end(),
            KeyCode::Up => {
                if let Some(prev) = self.history.prev() {
                    let prev = prev.to_string();
                    self.input.set(prev);
                }
            }
            KeyCode::Down => {
                if let Some(next) = self.history.next() {
                    let next = next.to_string();
                    self.input.set(next);
                }
            }
            _ => {}
        }
    }

    fn on_sidebar_key(&mut self, key: KeyEvent) {
        match key.code {
            KeyCode::Up => self.sidebar_select_up(),
            KeyCode::Down => self.sidebar_select_down(),
            KeyCode::PageUp => {
                for _ in 0..self.sidebar_inner_height().max(1) {
                    self.sidebar_select_up();
                }
            }
            KeyCode::PageDown => {
                for _ in 0..self.sidebar_inner_height().max(1) {
                    self.sidebar_select_down();
                }
            }
            KeyCode::Home if !self.chats.is_empty() => self.open_chat(0),
            KeyCode::End if !self.chats.is_empty() => self.open_chat(self.chats.len() - 1),
            KeyCode::Enter => self.focus = Focus::Input,
            KeyCode::Char('n') | KeyCode::Char('N') => self.new_chat(),
            KeyCode::Char('r') | KeyCode::Char('R') => self.sidebar_rename_current(),
            KeyCode::Char('d') | KeyCode::Char('D') | KeyCode::Delete => {
                self.sidebar_delete_current()
            }
            KeyCode::Char('?') => self.show_help = true,
            _ => {}
        }
    }

    fn on_rename_key(&mut self, key: KeyEvent) {
        let Some(state) = self.rename.as_mut() else {
            return;
        };
        match key.code {
            KeyCode::Esc => self.rename = None,
            KeyCode::Enter => {
                let title = state.line.text().trim().to_string();
                let id = state.chat_id;
                self.rename = None;
                if !title.is_empty() {
                    self.rename_chat(id, &title);
                }
            }
            KeyCode::Backspace => state.line.backspace(),
            KeyCode::Delete => state.line.delete(),
            KeyCode::Left => state.line.left(),
            KeyCode::Right => state.line.right(),
            KeyCode::Home => state.line.home(),
            KeyCode::End => state.line.end(),
            KeyCode::Char(ch) if !key.modifiers.contains(KeyModifiers::CONTROL) => {
                state.line.insert_char(ch)
            }
            _ => {}
        }
    }

    pub fn on_tick(&mut self) {
        self.tick = self.tick.wrapping_add(1);
        self.pump_stream();
        self.poll_image();
        if self.stream.is_some() || self.image_job.is_some() {
            // spinner
            self.dirty = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broken_image_config_leaves_a_notice() {
        let mut notices = Vec::new();
        let images = image_backend(
            Err(anyhow::anyhow!("invalid AIML_BASE_URL 'nope'")),
            &mut notices,
        );
        assert!(images.is_none());
        assert_eq!(notices.len(), 1);
        assert!(notices[0].contains("invalid AIML_BASE_URL"));
    }

    #[test]
    fn missing_image_key_is_silent() {
        let mut notices = Vec::new();
        assert!(image_backend(Ok(None), &mut notices).is_none());
        assert!(notices.is_empty());
    }
}
