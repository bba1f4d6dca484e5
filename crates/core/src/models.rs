//! Hosted models Blue is allowed to talk to.
//!
//! The list is closed. Anything else a caller passes in (stale settings, a
//! persona created for a retired model, a typo in a slash command) resolves to
//! [`ModelId::DEFAULT`] instead of failing the request.

use std::fmt;

use tracing::warn;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ModelId {
    Mixtral8x7b,
    Llama31_70b,
    Gemma2_9b,
}

/// Catalog metadata shown in pickers and the status line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ModelInfo {
    pub name: &'static str,
    pub description: &'static str,
    pub context_window: &'static str,
    pub speed: &'static str,
    pub vendor: &'static str,
}

impl ModelId {
    pub const ALL: [ModelId; 3] = [ModelId::Mixtral8x7b, ModelId::Llama31_70b, ModelId::Gemma2_9b];
    pub const DEFAULT: ModelId = ModelId::Mixtral8x7b;

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelId::Mixtral8x7b => "mixtral-8x7b-32768",
            ModelId::Llama31_70b => "llama-3.1-70b-versatile",
            ModelId::Gemma2_9b => "gemma2-9b-it",
        }
    }

    /// Strict lookup; `None` for anything outside the allow-list.
    pub fn parse(s: &str) -> Option<ModelId> {
        let s = s.trim();
        Self::ALL.iter().copied().find(|m| m.as_str() == s)
    }

    /// Lenient lookup used on the request path.
    pub fn resolve(s: &str) -> ModelId {
        match Self::parse(s) {
            Some(m) => m,
            None => {
                warn!(target: "core::models", "unknown model '{}', using {}", s, Self::DEFAULT);
                Self::DEFAULT
            }
        }
    }

    pub fn info(&self) -> ModelInfo {
        match self {
            ModelId::Mixtral8x7b => ModelInfo {
                name: "Mixtral 8x7B",
                description: "Most capable model, best for complex tasks",
                context_window: "32k",
                speed: "Fast",
                vendor: "Mistral AI",
            },
            ModelId::Llama31_70b => ModelInfo {
                name: "LLaMA3 70B",
                description: "Balanced performance and efficiency",
                context_window: "32k",
                speed: "Medium",
                vendor: "Meta",
            },
            ModelId::Gemma2_9b => ModelInfo {
                name: "Gemma2 9B",
                description: "Fast and efficient model",
                context_window: "8k",
                speed: "Fast",
                vendor: "Google",
            },
        }
    }
}

impl Default for ModelId {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
