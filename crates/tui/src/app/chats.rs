use anyhow::Result;
use blue_core::{persona::Persona, ModelId};
use tracing::{error, info, warn};
use uuid::Uuid;

use super::{App, ConfirmAction, RenameState};
use crate::app::input::InputLine;

impl App {
    pub fn current_chat_id(&self) -> Option<Uuid> {
        self.current_chat
            .and_then(|i| self.chats.get(i))
            .map(|c| c.id)
    }

    /// Re-reads the sidebar list for the current persona, keeping the selection.
    pub fn reload_chats(&mut self) {
        let selected = self.current_chat_id();
        match self.store.list_chats(self.persona) {
            Ok(chats) => self.chats = chats,
            Err(e) => {
                error!(target: "tui", "list chats failed: {:#}", e);
                self.chats.clear();
            }
        }
        self.current_chat = selected.and_then(|id| self.chats.iter().position(|c| c.id == id));
        self.ensure_sidebar_visible();
        self.dirty = true;
    }

    fn reset_transcript(&mut self) {
        self.chat_cache.clear();
        self.chat_wrap_width = 0;
        self.chat_scroll = 0;
        self.dirty = true;
    }

    pub fn open_chat(&mut self, idx: usize) {
        let Some(id) = self.chats.get(idx).map(|c| c.id) else {
            return;
        };
        if self.current_chat == Some(idx) && self.stream.is_some() {
            return;
        }
        self.stop_stream();
        // stopping may reorder the list
        let Some(idx) = self.chats.iter().position(|c| c.id == id) else {
            return;
        };
        let chat = self.chats[idx].clone();
        match self.store.load_messages(chat.id) {
            Ok(msgs) => self.messages = msgs,
            Err(e) => {
                error!(target: "tui", "load chat {} failed: {:#}", chat.id, e);
                self.messages.clear();
                self.notice(format!("[error] could not load chat: {}", e));
            }
        }
        self.current_chat = Some(idx);
        self.model = ModelId::resolve(&chat.model);
        self.ensure_sidebar_visible();
        self.reset_transcript();
    }

    pub fn new_chat(&mut self) {
        self.stop_stream();
        let persona = self.current_persona().cloned();
        match self.store.create_chat(self.model, persona.as_ref()) {
            Ok(chat) => {
                self.messages.clear();
                self.current_chat = None;
                self.reload_chats();
                self.current_chat = self.chats.iter().position(|c| c.id == chat.id);
                self.ensure_sidebar_visible();
            }
            Err(e) => {
                error!(target: "tui", "create chat failed: {:#}", e);
                self.notice(format!("[error] could not create chat: {}", e));
            }
        }
        self.reset_transcript();
    }

    /// The chat new messages go to, created on first use.
    pub(crate) fn ensure_chat(&mut self) -> Result<Uuid> {
        if let Some(id) = self.current_chat_id() {
            return Ok(id);
        }
        let persona = self.current_persona().cloned();
        let chat = self.store.create_chat(self.model, persona.as_ref())?;
        self.reload_chats();
        self.current_chat = self.chats.iter().position(|c| c.id == chat.id);
        Ok(chat.id)
    }

    pub(crate) fn rename_chat(&mut self, id: Uuid, title: &str) {
        if let Err(e) = self.store.rename_chat(id, title) {
            error!(target: "tui", "rename chat failed: {:#}", e);
            self.notice(format!("[error] could not rename chat: {}", e));
            return;
        }
        self.reload_chats();
    }

    pub(crate) fn delete_chat(&mut self, id: Uuid) {
        let was_current = self.current_chat_id() == Some(id);
        if was_current {
            self.stop_stream();
        }
        let old_idx = self.chats.iter().position(|c| c.id == id).unwrap_or(0);
        if let Err(e) = self.store.delete_chat(id) {
            error!(target: "tui", "delete chat failed: {:#}", e);
            self.notice(format!("[error] could not delete chat: {}", e));
            return;
        }
        self.reload_chats();
        if was_current {
            self.current_chat = None;
            self.messages.clear();
            self.reset_transcript();
            if !self.chats.is_empty() {
                self.open_chat(old_idx.min(self.chats.len() - 1));
            }
        }
    }

    pub fn sidebar_inner_height(&self) -> u16 {
        self.sidebar_area
            .map(|a| a.height.saturating_sub(2))
            .unwrap_or(0)
    }

    pub fn sidebar_max_scroll(&self) -> u16 {
        let h = self.sidebar_inner_height() as usize;
        if h == 0 {
            0
        } else {
            self.chats.len().saturating_sub(h) as u16
        }
    }

    pub fn sidebar_select_up(&mut self) {
        match self.current_chat {
            Some(i) if i > 0 => self.open_chat(i - 1),
            None if !self.chats.is_empty() => self.open_chat(0),
            _ => {}
        }
    }

    pub fn sidebar_select_down(&mut self) {
        match self.current_chat {
            Some(i) if i + 1 < self.chats.len() => self.open_chat(i + 1),
            None if !self.chats.is_empty() => self.open_chat(0),
            _ => {}
        }
    }

    pub fn ensure_sidebar_visible(&mut self) {
        let h = self.sidebar_inner_height() as usize;
        let Some(cur) = self.current_chat else {
            self.sidebar_scroll = self.sidebar_scroll.min(self.sidebar_max_scroll());
            return;
        };
        if h == 0 {
            return;
        }
        let start = self.sidebar_scroll as usize;
        let end = start + h - 1;
        if cur < start {
            self.sidebar_scroll = cur as u16;
        } else if cur > end {
            self.sidebar_scroll = (cur + 1 - h) as u16;
        }
        self.sidebar_scroll = self.sidebar_scroll.min(self.sidebar_max_scroll());
    }

    pub fn sidebar_rename_current(&mut self) {
        let Some(chat) = self.current_chat.and_then(|i| self.chats.get(i)) else {
            return;
        };
        self.rename = Some(RenameState {
            chat_id: chat.id,
            line: InputLine::with_text(chat.title.clone()),
        });
    }

    pub fn sidebar_delete_current(&mut self) {
        if let Some(id) = self.current_chat_id() {
            self.confirm = Some(ConfirmAction::DeleteChat(id));
        }
    }

    /// Case-insensitive lookup by persona name.
    pub fn find_persona(&self, name: &str) -> Option<Uuid> {
        let name = name.trim();
        self.personas
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(name))
            .map(|p| p.id)
    }

    /// Switches persona: model follows the persona and the sidebar shows its chats.
    pub fn select_persona(&mut self, id: Option<Uuid>) {
        self.stop_stream();
        self.persona = id.filter(|id| self.personas.iter().any(|p| p.id == *id));
        self.current_chat = None;
        self.messages.clear();
        self.sidebar_scroll = 0;
        self.reload_chats();
        let label = match self.current_persona() {
            Some(p) => {
                let (name, model) = (p.name.clone(), p.model_id());
                self.model = model;
                name
            }
            None => "none".to_string(),
        };
        if !self.chats.is_empty() {
            self.open_chat(0);
        }
        self.reset_transcript();
        info!(target: "tui", "persona: {}", label);
        self.notice(format!("[info] persona: {}", label));
    }

    pub(crate) fn create_persona(&mut self, name: &str, prompt: &str) {
        if self.find_persona(name).is_some() {
            self.notice(format!("[info] persona '{}' already exists", name));
            return;
        }
        let persona = Persona::new(name, prompt, self.model);
        match self.store.create_persona(persona) {
            Ok(p) => {
                self.personas.push(p.clone());
                self.select_persona(Some(p.id));
            }
            Err(e) => {
                error!(target: "tui", "create persona failed: {:#}", e);
                self.notice(format!("[error] could not create persona: {}", e));
            }
        }
    }

    pub(crate) fn delete_persona(&mut self, id: Uuid) {
        if let Err(e) = self.store.delete_persona(id) {
            error!(target: "tui", "delete persona failed: {:#}", e);
            self.notice(format!("[error] could not delete persona: {}", e));
            return;
        }
        let name = self
            .personas
            .iter()
            .find(|p| p.id == id)
            .map(|p| p.name.clone())
            .unwrap_or_default();
        self.personas.retain(|p| p.id != id);
        if self.persona == Some(id) {
            self.select_persona(None);
        }
        warn!(target: "tui", "deleted persona {}", id);
        self.notice(format!("[info] deleted persona '{}'", name));
    }
}
