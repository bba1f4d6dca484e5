use crate::config::FileConfig;
use std::{env, time::Duration};

pub const DEFAULT_BASE_URL: &str = "https://api.groq.com/openai/v1";

#[derive(Clone, Debug)]
pub struct GroqConfig {
    pub api_key: String,
    pub base_url: String,
    pub timeout: Duration,
    pub stream_idle_timeout: Option<Duration>,
    pub proxy: Option<String>,
}

impl GroqConfig {
    pub fn from_env_and_file(file: &FileConfig) -> anyhow::Result<Self> {
        let api_key = env::var("GROQ_API_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| anyhow::anyhow!("GROQ_API_KEY not set"))?;
        let base_url = env::var("GROQ_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        url::Url::parse(&base_url)
            .map_err(|e| anyhow::anyhow!("invalid GROQ_BASE_URL '{}': {}", base_url, e))?;

        let proxy = env::var("HTTPS_PROXY")
            .ok()
            .or_else(|| env::var("HTTP_PROXY").ok());

        Ok(GroqConfig {
            api_key,
            base_url,
            timeout: file.timeout(),
            stream_idle_timeout: file.stream_idle_timeout(),
            proxy,
        })
    }

    /// Config pointing at an explicit endpoint, without consulting the environment.
    pub fn with_base_url(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: base_url.into(),
            timeout: Duration::from_millis(crate::config::DEFAULT_TIMEOUT_MS),
            stream_idle_timeout: None,
            proxy: None,
        }
    }
}
