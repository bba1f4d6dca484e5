use crate::config::FileConfig;
use std::{env, time::Duration};

pub const DEFAULT_BASE_URL: &str = "https://api.aimlapi.com/v1";

#[derive(Clone, Debug)]
pub struct AimlConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub timeout: Duration,
    pub proxy: Option<String>,
}

impl AimlConfig {
    /// `Ok(None)` when no key is configured; image generation is then unavailable.
    pub fn from_env_and_file(file: &FileConfig) -> anyhow::Result<Option<Self>> {
        let Some(api_key) = env::var("AIML_API_KEY").ok().filter(|k| !k.trim().is_empty()) else {
            return Ok(None);
        };
        let base_url = env::var("AIML_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        url::Url::parse(&base_url)
            .map_err(|e| anyhow::anyhow!("invalid AIML_BASE_URL '{}': {}", base_url, e))?;
        let proxy = env::var("HTTPS_PROXY")
            .ok()
            .or_else(|| env::var("HTTP_PROXY").ok());
        Ok(Some(AimlConfig {
            api_key,
            base_url,
            model: file.image_model().to_string(),
            timeout: file.timeout() * 4,
            proxy,
        }))
    }

    pub fn with_base_url(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: base_url.into(),
            model: crate::config::DEFAULT_IMAGE_MODEL.to_string(),
            timeout: Duration::from_secs(120),
            proxy: None,
        }
    }
}
