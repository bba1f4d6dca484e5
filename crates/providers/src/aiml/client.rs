use crate::aiml::config::AimlConfig;
use blue_core::image::{enhance_prompt, ImageError, ImageGenerator};
use futures::future::BoxFuture;
use reqwest::{header, Client};
use tokio::time::Duration;
use tracing::{error, info};

const FALLBACK_ERROR: &str = "Failed to generate image";

/// Text-to-image client for the AIML `images/generations` endpoint.
#[derive(Clone)]
pub struct AimlImageClient {
    http: Client,
    cfg: AimlConfig,
}

impl AimlImageClient {
    pub fn new(cfg: AimlConfig) -> anyhow::Result<Self> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            header::HeaderValue::from_str(&format!("Bearer {}", cfg.api_key))?,
        );
        let mut builder = Client::builder()
            .default_headers(headers)
            .use_rustls_tls()
            .pool_idle_timeout(Duration::from_secs(30))
            .timeout(cfg.timeout);
        if let Some(p) = &cfg.proxy {
            builder = builder.proxy(reqwest::Proxy::all(p)?);
        }
        let http = builder.build()?;
        Ok(Self { http, cfg })
    }

    fn endpoint(&self) -> String {
        format!("{}/images/generations", self.cfg.base_url.trim_end_matches('/'))
    }

    async fn request(&self, prompt: &str) -> Result<String, ImageError> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Err(ImageError::EmptyPrompt);
        }
        let body = serde_json::json!({
            "prompt": enhance_prompt(prompt),
            "model": self.cfg.model,
            "n": 1,
            "size": "1024x1024",
            "quality": "standard",
            "response_format": "url",
        });
        info!(target:"providers::aiml","generate image model={}", self.cfg.model);
        let resp = self
            .http
            .post(self.endpoint())
            .json(&body)
            .send()
            .await
            .map_err(|e| ImageError::Provider(e.to_string()))?;
        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| ImageError::Provider(e.to_string()))?;
        if !status.is_success() {
            error!(target:"providers::aiml","image non-200 status={} body={:?}", status, text);
            return Err(ImageError::Provider(error_message(&text)));
        }
        parse_image_url(&text)
    }
}

impl ImageGenerator for AimlImageClient {
    fn generate<'a>(&'a self, prompt: &'a str) -> BoxFuture<'a, Result<String, ImageError>> {
        Box::pin(self.request(prompt))
    }
}

fn error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| FALLBACK_ERROR.to_string())
}

fn parse_image_url(body: &str) -> Result<String, ImageError> {
    let v: serde_json::Value =
        serde_json::from_str(body).map_err(|e| ImageError::Provider(e.to_string()))?;
    v["data"][0]["url"]
        .as_str()
        .filter(|u| !u.is_empty())
        .map(str::to_string)
        .ok_or(ImageError::MissingUrl)
}
