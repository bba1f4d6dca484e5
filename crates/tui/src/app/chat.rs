use blue_core::llm::Role;
use textwrap::{wrap, Options};
use unicode_width::UnicodeWidthStr;

use crate::{
    store::ChatMessage,
    strings::{PREFIX_ASSISTANT, PREFIX_NOTICE, PREFIX_USER, STOPPED_MARK},
};

use super::App;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LineKind {
    User,
    Assistant,
    Notice,
}

/// A message wrapped to the current transcript width.
#[derive(Clone, Debug)]
pub struct WrappedMsg {
    pub kind: LineKind,
    pub stopped: bool,
    pub content_len: usize,
    pub lines: Vec<String>,
}

/// Visible window into the wrapped transcript.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChatLayout {
    pub viewport: u16,
    pub max_scroll: u16,
    /// First visible line counted from the top of the transcript.
    pub start: usize,
    pub total: usize,
}

pub fn compute_layout(total: usize, viewport: u16, scroll_from_bottom: u16) -> ChatLayout {
    let max_scroll = total
        .saturating_sub(viewport as usize)
        .min(u16::MAX as usize) as u16;
    let scroll = scroll_from_bottom.min(max_scroll);
    ChatLayout {
        viewport,
        max_scroll,
        start: (max_scroll - scroll) as usize,
        total,
    }
}

pub fn wrap_message(m: &ChatMessage, width: u16) -> WrappedMsg {
    let (kind, prefix) = match (m.role(), m.transient) {
        (_, true) => (LineKind::Notice, PREFIX_NOTICE),
        (Role::User, _) => (LineKind::User, PREFIX_USER),
        _ => (LineKind::Assistant, PREFIX_ASSISTANT),
    };
    let indent = " ".repeat(UnicodeWidthStr::width(prefix));
    let mut lines: Vec<String> = Vec::new();
    for (i, para) in m.content().split('\n').enumerate() {
        let first = if i == 0 { prefix } else { indent.as_str() };
        if para.trim().is_empty() {
            lines.push(first.trim_end().to_string());
            continue;
        }
        let opts = Options::new(width.max(1) as usize)
            .initial_indent(first)
            .subsequent_indent(&indent);
        lines.extend(wrap(para, opts).into_iter().map(|c| c.into_owned()));
    }
    if m.stopped {
        lines.push(format!("{}{}", indent, STOPPED_MARK));
    }
    WrappedMsg {
        kind,
        stopped: m.stopped,
        content_len: m.content().len(),
        lines,
    }
}

impl App {
    /// Re-wraps everything when the width or message count changes; otherwise
    /// only messages whose text grew.
    pub fn ensure_chat_wrapped(&mut self, width: u16) {
        let width = width.max(1);
        if self.chat_wrap_width != width || self.chat_cache.len() != self.messages.len() {
            self.chat_cache = self
                .messages
                .iter()
                .map(|m| wrap_message(m, width))
                .collect();
            self.chat_wrap_width = width;
            return;
        }
        for (m, w) in self.messages.iter().zip(self.chat_cache.iter_mut()) {
            if m.content().len() != w.content_len || m.stopped != w.stopped {
                *w = wrap_message(m, width);
            }
        }
    }

    pub fn chat_total_lines(&self) -> usize {
        self.chat_cache.iter().map(|w| w.lines.len()).sum()
    }

    /// Clamps `chat_scroll` and returns the window for a viewport of `height` lines.
    pub fn compute_chat_layout(&mut self, height: u16) -> ChatLayout {
        self.chat_viewport = height;
        let layout = compute_layout(self.chat_total_lines(), height, self.chat_scroll);
        self.chat_scroll = self.chat_scroll.min(layout.max_scroll);
        layout
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blue_core::ModelId;

    #[test]
    fn prefixes_and_hanging_indent() {
        let m = ChatMessage::user("one two three four");
        let w = wrap_message(&m, 10);
        assert_eq!(w.kind, LineKind::User);
        assert_eq!(w.lines[0], "| one two");
        assert!(w.lines[1..].iter().all(|l| l.starts_with("  ")));
    }

    #[test]
    fn newlines_start_new_lines() {
        let m = ChatMessage::assistant("a\n\nb", ModelId::DEFAULT);
        let w = wrap_message(&m, 40);
        assert_eq!(w.lines, vec!["> a", "", "  b"]);
    }

    #[test]
    fn stopped_and_notice_markers() {
        let mut m = ChatMessage::assistant("partial", ModelId::DEFAULT);
        m.stopped = true;
        let w = wrap_message(&m, 40);
        assert_eq!(w.lines.last().map(String::as_str), Some("  [stopped]"));

        let n = wrap_message(&ChatMessage::notice("[info] hi"), 40);
        assert_eq!(n.kind, LineKind::Notice);
        assert_eq!(n.lines, vec!["  [info] hi"]);
    }

    #[test]
    fn layout_scrolls_from_bottom() {
        let l = compute_layout(50, 10, 0);
        assert_eq!((l.max_scroll, l.start), (40, 40));
        let l = compute_layout(50, 10, 15);
        assert_eq!(l.start, 25);
        let l = compute_layout(50, 10, u16::MAX);
        assert_eq!(l.start, 0);
        let l = compute_layout(3, 10, 5);
        assert_eq!((l.max_scroll, l.start), (0, 0));
    }
}
