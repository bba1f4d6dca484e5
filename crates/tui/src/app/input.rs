use unicode_segmentation::UnicodeSegmentation;

/// Editable text with a grapheme-indexed cursor.
///
/// Used by the main input box and by every popup that takes text.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InputLine {
    text: String,
    cursor: usize,
}

impl InputLine {
    pub fn with_text(text: impl Into<String>) -> Self {
        let text = text.into();
        let cursor = text.graphemes(true).count();
        Self { text, cursor }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    pub fn clear(&mut self) {
        self.text.clear();
        self.cursor = 0;
    }

    pub fn set(&mut self, text: impl Into<String>) {
        *self = Self::with_text(text);
    }

    /// Text left of the cursor.
    pub fn before_cursor(&self) -> String {
        self.text.graphemes(true).take(self.cursor).collect()
    }

    fn parts(&self) -> Vec<&str> {
        self.text.graphemes(true).collect()
    }

    pub fn insert(&mut self, s: &str) {
        let parts = self.parts();
        let idx = self.cursor.min(parts.len());
        let mut out = String::with_capacity(self.text.len() + s.len());
        out.extend(parts[..idx].iter().copied());
        out.push_str(s);
        out.extend(parts[idx..].iter().copied());
        self.text = out;
        let total = self.text.graphemes(true).count();
        self.cursor = (idx + s.graphemes(true).count()).min(total);
    }

    pub fn insert_char(&mut self, ch: char) {
        let mut buf = [0u8; 4];
        self.insert(ch.encode_utf8(&mut buf));
    }

    pub fn backspace(&mut self) {
        if self.cursor == 0 {
            return;
        }
        let mut parts = self.parts();
        let idx = self.cursor.min(parts.len());
        parts.remove(idx - 1);
        self.text = parts.concat();
        self.cursor = idx - 1;
    }

    pub fn delete(&mut self) {
        let mut parts = self.parts();
        let idx = self.cursor.min(parts.len());
        if idx < parts.len() {
            parts.remove(idx);
            self.text = parts.concat();
        }
    }

    pub fn left(&mut self) {
        self.cursor = self.cursor.saturating_sub(1);
    }

    pub fn right(&mut self) {
        let len = self.text.graphemes(true).count();
        if self.cursor < len {
            self.cursor += 1;
        }
    }

    pub fn home(&mut self) {
        self.cursor = self.line_start();
    }

    pub fn end(&mut self) {
        self.cursor = self.line_end();
    }

    fn line_start(&self) -> usize {
        let parts = self.parts();
        let mut i = self.cursor.min(parts.len());
        while i > 0 && parts[i - 1] != "\n" {
            i -= 1;
        }
        i
    }

    fn line_end(&self) -> usize {
        let parts = self.parts();
        let mut i = self.cursor.min(parts.len());
        while i < parts.len() && parts[i] != "\n" {
            i += 1;
        }
        i
    }

    fn word_left_index(&self) -> usize {
        let parts = self.parts();
        let mut i = self.cursor.min(parts.len());
        while i > 0 && parts[i - 1].trim().is_empty() {
            i -= 1;
        }
        while i > 0 && !parts[i - 1].trim().is_empty() {
            i -= 1;
        }
        i
    }

    pub fn word_right(&mut self) {
        let parts = self.parts();
        let mut i = self.cursor.min(parts.len());
        while i < parts.len() && parts[i].trim().is_empty() {
            i += 1;
        }
        while i < parts.len() && !parts[i].trim().is_empty() {
            i += 1;
        }
        self.cursor = i;
    }

    pub fn word_left(&mut self) {
        self.cursor = self.word_left_index();
    }

    fn drain(&mut self, from: usize, to: usize) {
        let mut parts = self.parts();
        let to = to.min(parts.len());
        let from = from.min(to);
        parts.drain(from..to);
        self.text = parts.concat();
        self.cursor = from;
    }

    /// Ctrl+W
    pub fn delete_prev_word(&mut self) {
        let start = self.word_left_index();
        self.drain(start, self.cursor);
    }

    /// Ctrl+U
    pub fn kill_to_line_start(&mut self) {
        let start = self.line_start();
        self.drain(start, self.cursor);
    }

    /// Ctrl+K
    pub fn kill_to_line_end(&mut self) {
        let cursor = self.cursor;
        let end = self.line_end();
        self.drain(cursor, end);
    }
}
