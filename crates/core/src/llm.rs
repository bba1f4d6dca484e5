use std::pin::Pin;

use chrono::{DateTime, Utc};
use futures::Stream;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Generic message used when the provider gives no usable error text.
pub const GENERIC_PROVIDER_ERROR: &str = "An error occurred";

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn new<S: Into<String>>(role: Role, content: S) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
    pub fn system<S: Into<String>>(s: S) -> Self {
        Self::new(Role::System, s)
    }
    pub fn user<S: Into<String>>(s: S) -> Self {
        Self::new(Role::User, s)
    }
    pub fn assistant<S: Into<String>>(s: S) -> Self {
        Self::new(Role::Assistant, s)
    }
}

/// Per-request sampling options sent with a completion call.
#[derive(Clone, Debug, PartialEq)]
pub struct ChatOpts {
    pub model: String,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ChatDelta {
    RoleStart(Role),
    Text(String),
    Finish(Option<String>),
    Usage {
        prompt_tokens: Option<u32>,
        completion_tokens: Option<u32>,
    },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ChatError {
    #[error("auth error: {0}")]
    Auth(String),
    #[error("rate limit: {0}")]
    RateLimit(String),
    #[error("timeout: {0}")]
    Timeout(String),
    #[error("network: {0}")]
    Network(String),
    #[error("decode: {0}")]
    Decode(String),
    #[error("protocol: {0}")]
    Protocol(String),
    #[error("other: {0}")]
    Other(String),
}

impl ChatError {
    /// The provider-facing text carried by the error, or a generic message when empty.
    pub fn message(&self) -> &str {
        let s = match self {
            ChatError::Auth(s)
            | ChatError::RateLimit(s)
            | ChatError::Timeout(s)
            | ChatError::Network(s)
            | ChatError::Decode(s)
            | ChatError::Protocol(s)
            | ChatError::Other(s) => s.as_str(),
        };
        if s.trim().is_empty() {
            GENERIC_PROVIDER_ERROR
        } else {
            s
        }
    }
}

pub type ChatStream<'a> = Pin<Box<dyn Stream<Item = Result<ChatDelta, ChatError>> + Send + 'a>>;

/// A chat-completion backend.
///
/// `stream_chat` is lazy: no request is issued until the returned stream is
/// polled. Connection and status failures surface as the first stream item,
/// and dropping the stream aborts the underlying request.
pub trait ModelClient: Send + Sync {
    fn stream_chat<'a>(&'a self, msgs: Vec<Message>, opts: ChatOpts) -> ChatStream<'a>;
}

impl<T: ModelClient + ?Sized> ModelClient for std::sync::Arc<T> {
    fn stream_chat<'a>(&'a self, msgs: Vec<Message>, opts: ChatOpts) -> ChatStream<'a> {
        (**self).stream_chat(msgs, opts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_serializes_lowercase() {
        let m = Message::user("hi");
        let v = serde_json::to_value(&m).unwrap();
        assert_eq!(v["role"], "user");
        assert_eq!(Role::Assistant.as_str(), "assistant");
    }

    #[test]
    fn empty_error_text_falls_back_to_generic() {
        assert_eq!(ChatError::Other(String::new()).message(), GENERIC_PROVIDER_ERROR);
        assert_eq!(ChatError::Auth("bad key".into()).message(), "bad key");
    }
}
