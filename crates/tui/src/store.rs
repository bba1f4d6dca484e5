//! Local conversation store.
//!
//! Everything lives under one root directory (the platform data dir by
//! default): JSON documents for chats, personas, settings, images and the image
//! quota window, plus one append-only JSONL transcript per chat. Documents are
//! written through a temp file and a rename so a crash never leaves a
//! half-written document.

use std::{
    fs::{self, OpenOptions},
    io::{BufWriter, ErrorKind, Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use blue_core::{
    image::{GeneratedImage, RateWindow},
    llm::{Message, Role},
    persona::Persona,
    ModelId,
};
use chrono::{DateTime, Utc};
use directories::BaseDirs;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

const TITLE_MAX_CHARS: usize = 50;
pub const DEFAULT_CHAT_TITLE: &str = "New Chat";

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Chat {
    pub id: Uuid,
    pub title: String,
    pub model: String,
    #[serde(default)]
    pub persona_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One transcript entry. `transient` entries (notices, error text) are shown
/// but never written to disk or sent to the model.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    #[serde(flatten)]
    pub message: Message,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub stopped: bool,
    #[serde(skip)]
    pub transient: bool,
}

fn is_false(b: &bool) -> bool {
    !*b
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            message: Message::user(content),
            model: None,
            stopped: false,
            transient: false,
        }
    }

    pub fn assistant(content: impl Into<String>, model: ModelId) -> Self {
        Self {
            message: Message::assistant(content),
            model: Some(model.as_str().to_string()),
            stopped: false,
            transient: false,
        }
    }

    pub fn notice(content: impl Into<String>) -> Self {
        Self {
            message: Message::assistant(content),
            model: None,
            stopped: false,
            transient: true,
        }
    }

    pub fn role(&self) -> Role {
        self.message.role
    }

    pub fn content(&self) -> &str {
        &self.message.content
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct UserSettings {
    pub default_model: String,
    pub updated_at: DateTime<Utc>,
}

impl Default for UserSettings {
    fn default() -> Self {
        Self {
            default_model: ModelId::DEFAULT.as_str().to_string(),
            updated_at: Utc::now(),
        }
    }
}

impl UserSettings {
    pub fn default_model_id(&self) -> ModelId {
        ModelId::resolve(&self.default_model)
    }
}

/// Terminal layout and selection restored on the next start.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct UiState {
    pub show_sidebar: bool,
    pub persona_id: Option<Uuid>,
    pub chat_id: Option<Uuid>,
    pub model: Option<String>,
}

impl Default for UiState {
    fn default() -> Self {
        Self {
            show_sidebar: true,
            persona_id: None,
            chat_id: None,
            model: None,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Stats {
    pub chats: usize,
    pub personas: usize,
    pub messages: usize,
}

/// Chat title derived from the first user message.
pub fn title_from_message(text: &str) -> String {
    let text = text.trim();
    let mut title: String = text.chars().take(TITLE_MAX_CHARS).collect();
    if text.chars().count() > TITLE_MAX_CHARS {
        title.push_str("...");
    }
    title
}

pub fn default_chat_title(persona: Option<&Persona>) -> String {
    match persona {
        Some(p) => format!("Chat with {}", p.name),
        None => DEFAULT_CHAT_TITLE.to_string(),
    }
}

pub struct Store {
    root: PathBuf,
}

impl Store {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(root.join("chats"))
            .with_context(|| format!("create store dir: {}", root.display()))?;
        debug!(target: "tui::store", "opened {}", root.display());
        Ok(Self { root })
    }

    pub fn open_default() -> Result<Self> {
        Self::open(default_root()?)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    fn transcript_path(&self, chat: Uuid) -> PathBuf {
        self.root.join("chats").join(format!("{}.jsonl", chat))
    }

    // chats

    fn load_chats(&self) -> Result<Vec<Chat>> {
        read_json(&self.path("chats.json"))
    }

    fn save_chats(&self, chats: &[Chat]) -> Result<()> {
        write_json(&self.path("chats.json"), &chats)
    }

    /// Chats belonging to `persona` (or persona-less chats for `None`), newest first.
    pub fn list_chats(&self, persona: Option<Uuid>) -> Result<Vec<Chat>> {
        let mut chats: Vec<Chat> = self
            .load_chats()?
            .into_iter()
            .filter(|c| c.persona_id == persona)
            .collect();
        chats.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(chats)
    }

    pub fn create_chat(&self, model: ModelId, persona: Option<&Persona>) -> Result<Chat> {
        let now = Utc::now();
        let chat = Chat {
            id: Uuid::new_v4(),
            title: default_chat_title(persona),
            model: model.as_str().to_string(),
            persona_id: persona.map(|p| p.id),
            created_at: now,
            updated_at: now,
        };
        let mut chats = self.load_chats()?;
        chats.push(chat.clone());
        self.save_chats(&chats)?;
        info!(target: "tui::store", "created chat {}", chat.id);
        Ok(chat)
    }

    pub fn rename_chat(&self, id: Uuid, title: &str) -> Result<()> {
        let mut chats = self.load_chats()?;
        if let Some(c) = chats.iter_mut().find(|c| c.id == id) {
            c.title = title.trim().to_string();
            c.updated_at = Utc::now();
            self.save_chats(&chats)?;
        }
        Ok(())
    }

    pub fn delete_chat(&self, id: Uuid) -> Result<()> {
        let mut chats = self.load_chats()?;
        chats.retain(|c| c.id != id);
        self.save_chats(&chats)?;
        let path = self.transcript_path(id);
        if path.exists() {
            fs::remove_file(&path)
                .with_context(|| format!("remove transcript: {}", path.display()))?;
        }
        info!(target: "tui::store", "deleted chat {}", id);
        Ok(())
    }

    pub fn load_messages(&self, chat: Uuid) -> Result<Vec<ChatMessage>> {
        let path = self.transcript_path(chat);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let data = fs::read_to_string(&path)
            .with_context(|| format!("read transcript: {}", path.display()))?;
        let mut msgs = Vec::new();
        for (n, line) in data.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<ChatMessage>(line) {
                Ok(m) => msgs.push(m),
                Err(e) => warn!(
                    target: "tui::store",
                    "skipping bad line {} in {}: {}",
                    n + 1,
                    path.display(),
                    e
                ),
            }
        }
        Ok(msgs)
    }

    /// Appends the non-transient messages and bumps the chat's `updated_at`.
    ///
    /// Existing lines are never rewritten, so an unreadable line stays on disk.
    pub fn append_messages(&self, chat: Uuid, msgs: &[ChatMessage]) -> Result<()> {
        let path = self.transcript_path(chat);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create dir: {}", parent.display()))?;
        }
        let needs_newline = !ends_with_newline(&path)?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("open transcript: {}", path.display()))?;
        let mut writer = BufWriter::new(file);
        if needs_newline {
            writer.write_all(b"\n")?;
        }
        for m in msgs.iter().filter(|m| !m.transient) {
            serde_json::to_writer(&mut writer, m)?;
            writer.write_all(b"\n")?;
        }
        writer
            .flush()
            .with_context(|| format!("write transcript: {}", path.display()))?;

        let mut chats = self.load_chats()?;
        if let Some(c) = chats.iter_mut().find(|c| c.id == chat) {
            c.updated_at = Utc::now();
            self.save_chats(&chats)?;
        }
        Ok(())
    }

    // personas

    /// All personas; the built-in templates are written on first use.
    pub fn list_personas(&self) -> Result<Vec<Persona>> {
        let path = self.path("personas.json");
        if !path.exists() {
            let seeded: Vec<Persona> = Persona::templates()
                .iter()
                .map(Persona::from_template)
                .collect();
            write_json(&path, &seeded)?;
            info!(target: "tui::store", "seeded {} personas", seeded.len());
            return Ok(seeded);
        }
        read_json(&path)
    }

    pub fn create_persona(&self, persona: Persona) -> Result<Persona> {
        let mut all = self.list_personas()?;
        all.push(persona.clone());
        write_json(&self.path("personas.json"), &all)?;
        Ok(persona)
    }

    pub fn delete_persona(&self, id: Uuid) -> Result<()> {
        let mut all = self.list_personas()?;
        all.retain(|p| p.id != id);
        write_json(&self.path("personas.json"), &all)
    }

    // settings and UI state

    /// `None` until settings have been saved once.
    pub fn load_settings(&self) -> Result<Option<UserSettings>> {
        let path = self.path("settings.json");
        if !path.exists() {
            return Ok(None);
        }
        read_json_file(&path).map(Some)
    }

    pub fn save_settings(&self, settings: &UserSettings) -> Result<()> {
        write_json(&self.path("settings.json"), settings)
    }

    pub fn load_ui_state(&self) -> Result<UiState> {
        read_json(&self.path("ui_state.json"))
    }

    pub fn save_ui_state(&self, state: &UiState) -> Result<()> {
        write_json(&self.path("ui_state.json"), state)
    }

    // images

    pub fn list_images(&self) -> Result<Vec<GeneratedImage>> {
        read_json(&self.path("images.json"))
    }

    pub fn add_image(&self, image: &GeneratedImage) -> Result<()> {
        let mut all = self.list_images()?;
        all.insert(0, image.clone());
        write_json(&self.path("images.json"), &all)
    }

    pub fn load_rate_window(&self, now: DateTime<Utc>) -> Result<RateWindow> {
        let path = self.path("image_quota.json");
        if !path.exists() {
            return Ok(RateWindow::new(now));
        }
        read_json_file(&path)
    }

    pub fn save_rate_window(&self, window: &RateWindow) -> Result<()> {
        write_json(&self.path("image_quota.json"), window)
    }

    pub fn stats(&self) -> Result<Stats> {
        let chats = self.load_chats()?;
        let mut messages = 0usize;
        for c in &chats {
            messages += self.load_messages(c.id)?.len();
        }
        Ok(Stats {
            chats: chats.len(),
            personas: self.list_personas()?.len(),
            messages,
        })
    }
}

fn default_root() -> Result<PathBuf> {
    let base = BaseDirs::new().context("no home directory")?;
    Ok(base.data_dir().join("blue"))
}

pub fn log_dir() -> Result<PathBuf> {
    Ok(default_root()?.join("logs"))
}

/// True for a missing or empty file, or one whose last byte is a newline.
fn ends_with_newline(path: &Path) -> Result<bool> {
    let mut f = match fs::File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(true),
        Err(e) => return Err(e).with_context(|| format!("open {}", path.display())),
    };
    if f.metadata()?.len() == 0 {
        return Ok(true);
    }
    let mut last = [0u8; 1];
    f.seek(SeekFrom::End(-1))?;
    f.read_exact(&mut last)?;
    Ok(last[0] == b'\n')
}

fn read_json<T: DeserializeOwned + Default>(path: &Path) -> Result<T> {
    if !path.exists() {
        return Ok(T::default());
    }
    read_json_file(path)
}

fn read_json_file<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let data = fs::read(path).with_context(|| format!("read {}", path.display()))?;
    serde_json::from_slice(&data).with_context(|| format!("parse {}", path.display()))
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let data = serde_json::to_vec_pretty(value)?;
    write_atomic(path, &data)
}

fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create dir: {}", parent.display()))?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    {
        let mut f =
            fs::File::create(&tmp).with_context(|| format!("create tmp: {}", tmp.display()))?;
        f.write_all(data)?;
        f.flush()?;
    }
    fs::rename(&tmp, path).with_context(|| format!("persist {}", path.display()))?;
    Ok(())
}
