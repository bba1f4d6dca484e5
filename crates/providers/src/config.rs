use anyhow::Context;
use blue_core::{ModelId, SessionConfig};
use directories::BaseDirs;
use serde::Deserialize;
use std::{fs, path::PathBuf, time::Duration};
use tracing::{debug, warn};

pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_IMAGE_MODEL: &str = "dall-e-3";
pub const DEFAULT_IMAGE_DAILY_LIMIT: u32 = 10;

/// Optional settings read from `config.toml`. Every key may be omitted.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct FileConfig {
    pub model: Option<String>,
    pub system_prompt: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub pacing_ms: Option<u64>,
    pub flush_threshold: Option<usize>,
    pub timeout_ms: Option<u64>,
    pub stream_idle_timeout_ms: Option<u64>,
    pub image_model: Option<String>,
    pub image_daily_limit: Option<u32>,
}

impl FileConfig {
    /// Reads the user config file. A missing file yields defaults; a file that
    /// fails to parse is logged and ignored.
    pub fn load() -> Self {
        let Some(path) = Self::config_path() else {
            return Self::default();
        };
        if !path.exists() {
            return Self::default();
        }
        match Self::read(&path) {
            Ok(cfg) => {
                debug!(target: "providers::config", "loaded {}", path.display());
                cfg
            }
            Err(e) => {
                warn!(target: "providers::config", "ignoring config file: {:#}", e);
                Self::default()
            }
        }
    }

    fn read(path: &PathBuf) -> anyhow::Result<Self> {
        let text =
            fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("parse {}", path.display()))
    }

    pub fn parse(text: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn config_path() -> Option<PathBuf> {
        let base = BaseDirs::new()?;
        let p = if cfg!(target_os = "windows") {
            base.home_dir().join(".blue").join("config.toml")
        } else {
            base.config_dir().join("blue").join("config.toml")
        };
        Some(p)
    }

    /// Configured default model, if it names a supported model.
    pub fn default_model(&self) -> Option<ModelId> {
        self.model.as_deref().and_then(ModelId::parse)
    }

    pub fn session_config(&self) -> SessionConfig {
        let mut cfg = SessionConfig::default();
        if let Some(p) = self.system_prompt.as_ref().filter(|p| !p.trim().is_empty()) {
            cfg.system_prompt = p.clone();
        }
        if let Some(t) = self.temperature {
            cfg.temperature = t;
        }
        if let Some(m) = self.max_tokens {
            cfg.max_tokens = m;
        }
        if let Some(ms) = self.pacing_ms {
            cfg.pacing = Duration::from_millis(ms);
        }
        if let Some(n) = self.flush_threshold {
            cfg.flush_threshold = n;
        }
        cfg
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS))
    }

    /// `None` unless configured; a zero value also disables the idle check.
    pub fn stream_idle_timeout(&self) -> Option<Duration> {
        self.stream_idle_timeout_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }

    pub fn image_model(&self) -> &str {
        self.image_model.as_deref().unwrap_or(DEFAULT_IMAGE_MODEL)
    }

    pub fn image_daily_limit(&self) -> u32 {
        self.image_daily_limit.unwrap_or(DEFAULT_IMAGE_DAILY_LIMIT)
    }
}
