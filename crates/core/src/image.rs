use chrono::{DateTime, Duration, Utc};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

const PROMPT_ENHANCERS: [&str; 5] = [
    "high quality",
    "detailed",
    "professional",
    "8k resolution",
    "masterpiece",
];

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ImageError {
    #[error("prompt cannot be empty")]
    EmptyPrompt,
    #[error("Rate limit reached. Try again after {}", .reset_time.format("%H:%M:%S"))]
    RateLimited { reset_time: DateTime<Utc> },
    #[error("{0}")]
    Provider(String),
    #[error("No image URL in response")]
    MissingUrl,
}

/// Text-to-image backend: one blocking request per prompt, returns the image URL.
pub trait ImageGenerator: Send + Sync {
    fn generate<'a>(&'a self, prompt: &'a str) -> BoxFuture<'a, Result<String, ImageError>>;
}

pub fn enhance_prompt(prompt: &str) -> String {
    format!("{}, {}", prompt.trim(), PROMPT_ENHANCERS.join(", "))
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct GeneratedImage {
    pub id: Uuid,
    pub prompt: String,
    pub image_url: String,
    #[serde(default)]
    pub is_public: bool,
    pub created_at: DateTime<Utc>,
}

impl GeneratedImage {
    pub fn new(prompt: impl Into<String>, image_url: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            prompt: prompt.into(),
            image_url: image_url.into(),
            is_public: false,
            created_at: Utc::now(),
        }
    }
}

/// Quota snapshot for the current window.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RateLimit {
    pub remaining: u32,
    pub reset_time: DateTime<Utc>,
    pub total: u32,
}

/// Fixed-window usage counter persisted between runs.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct RateWindow {
    pub window_start: DateTime<Utc>,
    pub used: u32,
}

impl RateWindow {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            window_start: now,
            used: 0,
        }
    }

    fn expired(&self, now: DateTime<Utc>, window: Duration) -> bool {
        now >= self.window_start + window
    }

    pub fn check(&self, now: DateTime<Utc>, limit: u32, window: Duration) -> RateLimit {
        if self.expired(now, window) {
            return RateLimit {
                remaining: limit,
                reset_time: now + window,
                total: limit,
            };
        }
        RateLimit {
            remaining: limit.saturating_sub(self.used),
            reset_time: self.window_start + window,
            total: limit,
        }
    }

    /// Fails with `RateLimited` when no quota is left in the current window.
    pub fn ensure_available(
        &self,
        now: DateTime<Utc>,
        limit: u32,
        window: Duration,
    ) -> Result<RateLimit, ImageError> {
        let rl = self.check(now, limit, window);
        if rl.remaining == 0 {
            return Err(ImageError::RateLimited {
                reset_time: rl.reset_time,
            });
        }
        Ok(rl)
    }

    pub fn record(&mut self, now: DateTime<Utc>, window: Duration) {
        if self.expired(now, window) {
            *self = Self::new(now);
        }
        self.used = self.used.saturating_add(1);
    }
}
