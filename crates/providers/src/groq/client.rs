use crate::groq::config::GroqConfig;
use blue_core::llm::{ChatDelta, ChatError, ChatOpts, ChatStream, Message, ModelClient, Role};
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use reqwest::{header, Client, StatusCode};
use std::time::Instant;
use tokio::time::Duration;
use tracing::{debug, error, info};

/// Streaming chat-completions client for Groq's OpenAI-compatible API.
#[derive(Clone)]
pub struct GroqClient {
    http: Client,
    cfg: GroqConfig,
}

impl GroqClient {
    pub fn new(cfg: GroqConfig) -> anyhow::Result<Self> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            header::HeaderValue::from_str(&format!("Bearer {}", cfg.api_key))?,
        );
        // No total timeout; a running stream is bounded by the idle check.
        let mut builder = Client::builder()
            .default_headers(headers)
            .use_rustls_tls()
            .pool_idle_timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(2)
            .connect_timeout(cfg.timeout);
        if let Some(p) = &cfg.proxy {
            builder = builder.proxy(reqwest::Proxy::all(p)?);
        }
        let http = builder.build()?;
        Ok(Self { http, cfg })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.cfg.base_url.trim_end_matches('/'))
    }

    fn map_messages(msgs: &[Message]) -> Vec<serde_json::Value> {
        msgs.iter()
            .map(|m| serde_json::json!({"role": m.role.as_str(), "content": m.content}))
            .collect()
    }
}

impl ModelClient for GroqClient {
    fn stream_chat<'a>(&'a self, msgs: Vec<Message>, opts: ChatOpts) -> ChatStream<'a> {
        let url = self.endpoint();
        info!(target:"providers::groq","start chat stream model={} messages={}", opts.model, msgs.len());
        let body = serde_json::json!({
            "model": opts.model,
            "messages": Self::map_messages(&msgs),
            "stream": true,
            "temperature": opts.temperature,
            "max_tokens": opts.max_tokens,
        });
        let send = self.http.post(url).json(&body).send();
        let idle = self.cfg.stream_idle_timeout;

        Box::pin(async_stream::stream! {
            let sent = match idle {
                Some(limit) => match tokio::time::timeout(limit, send).await {
                    Ok(r) => r,
                    Err(_) => {
                        yield Err(ChatError::Timeout("no response from server".into()));
                        return;
                    }
                },
                None => send.await,
            };
            let resp = match sent {
                Ok(r) => r,
                Err(e) => { yield Err(map_reqwest_err(e)); return; }
            };
            if !resp.status().is_success() {
                let status = resp.status();
                let body = resp.text().await.ok();
                error!(target:"providers::groq","chat stream non-200 status={} body={:?}", status, body);
                yield Err(map_status_err(status, body));
                return;
            }
            let mut stream = resp.bytes_stream();
            let mut buf = BytesMut::new();
            let mut last = Instant::now();
            // Set once the server signals the end of the reply.
            let mut finished = false;
            'outer: loop {
                tokio::select! {
                    chunk = stream.next() => {
                        match chunk {
                            Some(Ok(b)) => {
                                buf.extend_from_slice(&b);
                                last = Instant::now();
                                while let Some(ev) = next_event(&mut buf) {
                                    match parse_chat_sse_event(&ev) {
                                        Ok(Some(SseEvent::Delta(delta))) => {
                                            if matches!(delta, ChatDelta::Finish(_)) {
                                                finished = true;
                                            }
                                            yield Ok(delta);
                                        }
                                        Ok(Some(SseEvent::Done)) => {
                                            debug!(target:"providers::groq","stream done");
                                            break 'outer;
                                        }
                                        Ok(None) => {}
                                        Err(e) => { yield Err(e); break 'outer; }
                                    }
                                }
                            }
                            Some(Err(e)) => { yield Err(map_reqwest_err(e)); break 'outer; }
                            None => {
                                let leftover = buf.iter().any(|b| !b.is_ascii_whitespace());
                                if !finished || leftover {
                                    error!(target:"providers::groq","stream truncated finished={} leftover={}B", finished, buf.len());
                                    yield Err(ChatError::Decode("stream ended before [DONE]".into()));
                                }
                                break 'outer;
                            }
                        }
                    }
                    _ = tokio::time::sleep(Duration::from_millis(500)), if idle.is_some() => {
                        if let Some(limit) = idle {
                            if last.elapsed() > limit {
                                yield Err(ChatError::Timeout("stream idle".into()));
                                break 'outer;
                            }
                        }
                    }
                }
            }
        })
    }
}

#[derive(Debug, PartialEq)]
enum SseEvent {
    Delta(ChatDelta),
    Done,
}

fn map_reqwest_err(e: reqwest::Error) -> ChatError {
    if e.is_timeout() {
        ChatError::Timeout(e.to_string())
    } else if e.is_request() || e.is_connect() {
        ChatError::Network(e.to_string())
    } else {
        ChatError::Other(e.to_string())
    }
}

/// Pulls `error.message` out of an OpenAI-style error body.
fn error_message(body: &str) -> Option<String> {
    let v: serde_json::Value = serde_json::from_str(body).ok()?;
    let err = v.get("error")?;
    err["message"]
        .as_str()
        .or_else(|| err.as_str())
        .map(str::to_string)
}

fn map_status_err(status: StatusCode, body: Option<String>) -> ChatError {
    let body = body.unwrap_or_default();
    let s = error_message(&body).unwrap_or_else(|| body.trim().to_string());
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ChatError::Auth(s),
        StatusCode::TOO_MANY_REQUESTS => ChatError::RateLimit(s),
        StatusCode::INTERNAL_SERVER_ERROR
        | StatusCode::BAD_GATEWAY
        | StatusCode::SERVICE_UNAVAILABLE
        | StatusCode::GATEWAY_TIMEOUT => ChatError::Network(s),
        StatusCode::NOT_FOUND => ChatError::Protocol(s),
        _ => ChatError::Other(s),
    }
}

fn find_event_boundary(buf: &[u8]) -> Option<(usize, usize)> {
    let crlf = twoway::find_bytes(buf, b"\r\n\r\n").map(|p| (p, 4));
    let lf = twoway::find_bytes(buf, b"\n\n").map(|p| (p, 2));
    match (crlf, lf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (a, b) => a.or(b),
    }
}

/// Splits the next complete event off the front of `buf`.
fn next_event(buf: &mut BytesMut) -> Option<Bytes> {
    let (pos, sep) = find_event_boundary(&buf[..])?;
    let ev = buf.split_to(pos).freeze();
    let _ = buf.split_to(sep);
    Some(ev)
}

fn parse_chat_sse_event(ev: &[u8]) -> Result<Option<SseEvent>, ChatError> {
    let s = std::str::from_utf8(ev).map_err(|e| ChatError::Decode(e.to_string()))?;
    let data_lines: Vec<&str> = s
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(str::trim_start)
        .collect();
    if data_lines.is_empty() {
        return Ok(None);
    }
    if data_lines.len() == 1 && data_lines[0].trim() == "[DONE]" {
        return Ok(Some(SseEvent::Done));
    }
    let json_text = data_lines.join("\n");
    let v: serde_json::Value =
        serde_json::from_str(&json_text).map_err(|e| ChatError::Decode(e.to_string()))?;

    if let Some(err) = v.get("error") {
        let msg = err["message"].as_str().or_else(|| err.as_str()).unwrap_or("");
        return Err(ChatError::Protocol(msg.to_string()));
    }
    let choice = &v["choices"][0];
    if let Some(content) = choice["delta"]["content"].as_str().filter(|c| !c.is_empty()) {
        return Ok(Some(SseEvent::Delta(ChatDelta::Text(content.to_string()))));
    }
    if let Some(fr) = choice["finish_reason"].as_str() {
        return Ok(Some(SseEvent::Delta(ChatDelta::Finish(Some(fr.to_string())))));
    }
    if let Some(role) = choice["delta"]["role"].as_str() {
        let r = match role {
            "user" => Role::User,
            "system" => Role::System,
            _ => Role::Assistant,
        };
        return Ok(Some(SseEvent::Delta(ChatDelta::RoleStart(r))));
    }
    let usage = v
        .get("usage")
        .or_else(|| v["x_groq"].get("usage"))
        .filter(|u| u.is_object());
    if let Some(u) = usage {
        return Ok(Some(SseEvent::Delta(ChatDelta::Usage {
            prompt_tokens: u["prompt_tokens"].as_u64().map(|n| n as u32),
            completion_tokens: u["completion_tokens"].as_u64().map(|n| n as u32),
        })));
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(s: &str) -> Result<Option<SseEvent>, ChatError> {
        parse_chat_sse_event(s.as_bytes())
    }

    #[test]
    fn content_delta() {
        let ev = parse(r#"data: {"choices":[{"delta":{"content":"Hi"},"finish_reason":null}]}"#);
        assert_eq!(ev, Ok(Some(SseEvent::Delta(ChatDelta::Text("Hi".into())))));
    }

    #[test]
    fn role_only_first_chunk() {
        let ev = parse(r#"data: {"choices":[{"delta":{"role":"assistant","content":""}}]}"#);
        assert_eq!(ev, Ok(Some(SseEvent::Delta(ChatDelta::RoleStart(Role::Assistant)))));
    }

    #[test]
    fn finish_reason_and_done() {
        let ev = parse(r#"data: {"choices":[{"delta":{},"finish_reason":"stop"}]}"#);
        assert_eq!(ev, Ok(Some(SseEvent::Delta(ChatDelta::Finish(Some("stop".into()))))));
        assert_eq!(parse("data: [DONE]"), Ok(Some(SseEvent::Done)));
    }

    #[test]
    fn groq_usage_trailer() {
        let ev = parse(
            r#"data: {"choices":[{"delta":{}}],"x_groq":{"usage":{"prompt_tokens":12,"completion_tokens":3}}}"#,
        );
        assert_eq!(
            ev,
            Ok(Some(SseEvent::Delta(ChatDelta::Usage {
                prompt_tokens: Some(12),
                completion_tokens: Some(3)
            })))
        );
    }

    #[test]
    fn comments_and_blank_events_are_skipped() {
        assert_eq!(parse(": keep-alive"), Ok(None));
        assert_eq!(parse("event: ping"), Ok(None));
    }

    #[test]
    fn error_object_is_fatal() {
        let ev = parse(r#"data: {"error":{"message":"model overloaded","type":"server_error"}}"#);
        assert_eq!(ev, Err(ChatError::Protocol("model overloaded".into())));
    }

    #[test]
    fn malformed_json_is_decode_error() {
        assert!(matches!(parse("data: {not json"), Err(ChatError::Decode(_))));
    }

    #[test]
    fn events_split_on_either_separator() {
        let mut buf = BytesMut::from(&b"data: a\r\n\r\ndata: b\n\ndata: c"[..]);
        assert_eq!(next_event(&mut buf).as_deref(), Some(&b"data: a"[..]));
        assert_eq!(next_event(&mut buf).as_deref(), Some(&b"data: b"[..]));
        assert_eq!(next_event(&mut buf), None);
        assert_eq!(&buf[..], b"data: c");
    }

    #[test]
    fn status_mapping_uses_error_message() {
        let body = Some(r#"{"error":{"message":"Invalid API Key"}}"#.to_string());
        assert_eq!(
            map_status_err(StatusCode::UNAUTHORIZED, body),
            ChatError::Auth("Invalid API Key".into())
        );
        assert!(matches!(
            map_status_err(StatusCode::TOO_MANY_REQUESTS, None),
            ChatError::RateLimit(_)
        ));
        assert!(matches!(
            map_status_err(StatusCode::BAD_GATEWAY, Some("upstream".into())),
            ChatError::Network(_)
        ));
        assert_eq!(
            map_status_err(StatusCode::BAD_REQUEST, Some(String::new())).message(),
            blue_core::llm::GENERIC_PROVIDER_ERROR
        );
    }
}
