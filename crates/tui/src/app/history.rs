/// Previously submitted inputs, browsed with Up/Down.
#[derive(Debug, Default)]
pub struct InputHistory {
    entries: Vec<String>,
    index: Option<usize>,
}

impl InputHistory {
    /// Records `text` unless it repeats the last entry, and resets browsing.
    pub fn record(&mut self, text: &str) {
        self.index = None;
        if self.entries.last().map(String::as_str) == Some(text) {
            return;
        }
        self.entries.push(text.to_string());
    }

    pub fn prev(&mut self) -> Option<&str> {
        if self.entries.is_empty() {
            return None;
        }
        let idx = match self.index {
            None => self.entries.len() - 1,
            Some(i) => i.saturating_sub(1),
        };
        self.index = Some(idx);
        Some(&self.entries[idx])
    }

    /// Next newer entry; `Some("")` once browsing runs past the newest.
    pub fn next(&mut self) -> Option<&str> {
        let i = self.index?;
        if i + 1 < self.entries.len() {
            self.index = Some(i + 1);
            Some(&self.entries[i + 1])
        } else {
            self.index = None;
            Some("")
        }
    }
}
