// UI strings and labels. ASCII-friendly by default.

use unicode_width::UnicodeWidthStr;

pub const PREFIX_USER: &str = "| ";
pub const PREFIX_ASSISTANT: &str = "> ";
pub const PREFIX_NOTICE: &str = "  ";
pub const STOPPED_MARK: &str = "[stopped]";

pub const INPUT_HINT: &str = "Message Blue, Enter to send / Shift+Enter for newline / /help";

pub const TITLE_CHATS: &str = " Chats ";
pub const TITLE_CHAT: &str = " Blue ";
pub const TITLE_INPUT: &str = " Input ";
pub const TITLE_HELP: &str = " Help / Shortcuts ";
pub const TITLE_RENAME: &str = " Rename Chat ";
pub const TITLE_CONFIRM: &str = " Confirm ";
pub const TITLE_MODELS: &str = " Models ";
pub const TITLE_PERSONAS: &str = " Personas ";

pub const EMPTY_CHAT: &str = "Start a conversation. Type a message below, or /help for commands.";

pub const ERROR_REPLY: &str = "Sorry, I encountered an error. Please try again.";
pub const CHAT_UNAVAILABLE: &str = "[info] chat is unavailable: set GROQ_API_KEY and restart";
pub const IMAGES_UNAVAILABLE: &str = "[image] image generation needs AIML_API_KEY";
pub const STREAM_ABORTED: &str = "stream ended unexpectedly";
pub const IMAGE_ABORTED: &str = "image request was aborted";

const SPINNER: [&str; 4] = ["-", "\\", "|", "/"];

pub fn spinner(tick: u64) -> &'static str {
    SPINNER[(tick % SPINNER.len() as u64) as usize]
}

pub fn confirm_delete_chat_message(title: &str) -> String {
    format!("Delete chat \"{}\"? Press Y to confirm, N/Esc to cancel.", title)
}

pub fn sidebar_title(persona: Option<&str>) -> String {
    match persona {
        Some(name) => format!(" Chats: {} ", name),
        None => TITLE_CHATS.to_string(),
    }
}

/// What the status bar shows, gathered by the renderer.
pub struct StatusInfo<'a> {
    pub model: &'a str,
    pub persona: Option<&'a str>,
    pub streaming: bool,
    pub generating_image: bool,
    pub spinner: &'a str,
    pub images_left: u32,
    pub images_total: u32,
    pub scroll: u16,
    pub focus: &'a str,
}

// Segments are added in priority order and dropped once `max_width` is reached.
pub fn build_status_line(info: &StatusInfo<'_>, max_width: u16) -> String {
    let mut segments: Vec<String> = Vec::new();
    segments.push(format!(
        "[{}][{}]",
        info.model,
        info.persona.unwrap_or("no persona")
    ));
    if info.streaming {
        segments.push(format!("{} generating (Esc: stop)", info.spinner));
    } else if info.generating_image {
        segments.push(format!("{} creating image", info.spinner));
    } else {
        segments.push("Ready".to_string());
    }
    segments.push(format!("Img:{}/{}", info.images_left, info.images_total));
    segments.push(if info.scroll == 0 {
        format!("[Bottom][{}]", info.focus)
    } else {
        format!("[+{} lines][{}]", info.scroll, info.focus)
    });
    let hints: [&str; 5] = [
        "Enter: send; Shift+Enter: newline",
        "Ctrl+O: model; Ctrl+P: persona",
        "Ctrl+N: new chat",
        "F2: chats",
        "F1: help",
    ];
    segments.extend(hints.iter().map(|h| h.to_string()));

    let sep = "  |  ";
    let sep_w = UnicodeWidthStr::width(sep);
    let mut out = String::new();
    let mut used = 0usize;
    for (i, seg) in segments.iter().enumerate() {
        let segw = UnicodeWidthStr::width(seg.as_str());
        let addw = segw + if i == 0 { 0 } else { sep_w };
        if used + addw > max_width as usize {
            break;
        }
        if i > 0 {
            out.push_str(sep);
        }
        out.push_str(seg);
        used += addw;
    }
    out
}

pub fn help_lines() -> &'static [&'static str] {
    &[
        "Basic",
        "  Enter: Send    Shift+Enter: Newline    Esc/Ctrl+C: Stop generating, or quit when idle",
        "  Ctrl+N: New chat    Ctrl+O: Pick model    Ctrl+P: Pick persona",
        "Input Editing",
        "  Arrow: Move cursor    Backspace/Delete: Delete prev/next char",
        "  Home/End or Ctrl+A/E: Line start/end    Ctrl+Arrow: Word move",
        "  Ctrl+W: Delete prev word    Ctrl+U/K: Kill to line start/end    Up/Down: History",
        "Chat Scrolling",
        "  Mouse wheel / PgUp/PgDn: Scroll    Ctrl+Up/Down: Fine    Ctrl+Home/End: Top/bottom",
        "Chats",
        "  F2: Show/hide chats    Tab: Switch focus    Click: Open chat",
        "  Chats focus: Up/Down open / N new / R rename / D or Delete remove",
        "Commands",
        "  /model [id]   /persona [name|none]   /persona new <name>: <prompt>",
        "  /persona delete <name>   /new   /image <prompt>   /default <model>",
        "  /images   /stats   /stop   /help   //text: send text starting with /",
        "Help",
        "  F1 or ?: Open/close this panel",
    ]
}
