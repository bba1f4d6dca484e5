//! Streaming chat sessions.
//!
//! A [`StreamingChatSession`] turns one user submission into a lazy stream of
//! text fragments. Provider deltas are batched into word-ish chunks, each
//! chunk is followed by a short pacing delay, and a [`CancelToken`] is raced
//! against every suspension point so a stop request takes effect within one
//! fragment.

use std::{
    pin::Pin,
    sync::{Mutex, PoisonError},
    task::{Context, Poll},
    time::Duration,
};

use futures::{Stream, StreamExt};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::{
    cancel::CancelToken,
    llm::{ChatDelta, ChatError, ChatOpts, Message, ModelClient},
    models::ModelId,
    persona::DEFAULT_SYSTEM_PROMPT,
};

#[derive(Clone, Debug, PartialEq)]
pub struct SessionConfig {
    pub system_prompt: String,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Delay after each yielded fragment.
    pub pacing: Duration,
    /// A buffer longer than this many characters is flushed even without whitespace.
    pub flush_threshold: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            temperature: 0.7,
            max_tokens: 2048,
            pacing: Duration::from_millis(30),
            flush_threshold: 3,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SessionError {
    #[error("message cannot be empty")]
    EmptyInput,
    #[error("generation stopped by user")]
    Cancelled,
    #[error("failed to generate response: {}", .0.message())]
    Provider(#[from] ChatError),
}

impl SessionError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, SessionError::Cancelled)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Validating,
    Connecting,
    Streaming,
    Completed,
    Cancelled,
    Failed,
}

/// Everything one submission needs besides the injected [`SessionConfig`].
#[derive(Clone, Debug)]
pub struct StreamRequest {
    pub new_message: String,
    pub model: String,
    pub history: Vec<Message>,
    pub system_prompt: Option<String>,
    pub cancel: CancelToken,
}

impl StreamRequest {
    pub fn new(new_message: impl Into<String>, cancel: CancelToken) -> Self {
        Self {
            new_message: new_message.into(),
            model: ModelId::DEFAULT.as_str().to_string(),
            history: Vec::new(),
            system_prompt: None,
            cancel,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_history(mut self, history: Vec<Message>) -> Self {
        self.history = history;
        self
    }

    pub fn with_system_prompt(mut self, prompt: Option<String>) -> Self {
        self.system_prompt = prompt;
        self
    }
}

/// Accumulates provider deltas until they form a fragment worth showing.
#[derive(Debug)]
struct FragmentBuffer {
    buf: String,
    threshold: usize,
}

impl FragmentBuffer {
    fn new(threshold: usize) -> Self {
        Self {
            buf: String::new(),
            threshold,
        }
    }

    fn push(&mut self, delta: &str) -> Option<String> {
        self.buf.push_str(delta);
        if self.buf.is_empty() {
            return None;
        }
        let boundary = delta.contains(' ') || delta.contains('\n');
        if boundary || self.buf.chars().count() > self.threshold {
            Some(std::mem::take(&mut self.buf))
        } else {
            None
        }
    }

    fn finish(&mut self) -> Option<String> {
        if self.buf.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.buf))
        }
    }
}

enum End {
    Completed,
    Cancelled,
    Failed(ChatError),
}

type FragmentStream<'a> = Pin<Box<dyn Stream<Item = Result<String, SessionError>> + Send + 'a>>;

/// Single-pass stream of reply fragments for one session.
///
/// Ends after the first error. Once it has ended it keeps returning `None`.
pub struct Fragments<'a> {
    inner: FragmentStream<'a>,
    state: watch::Receiver<SessionState>,
    model: ModelId,
}

impl<'a> Fragments<'a> {
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn model(&self) -> ModelId {
        self.model
    }

    /// Drains the stream and returns the concatenated reply.
    pub async fn into_text(mut self) -> Result<String, SessionError> {
        let mut out = String::new();
        while let Some(fragment) = self.next().await {
            out.push_str(&fragment?);
        }
        Ok(out)
    }
}

impl<'a> Stream for Fragments<'a> {
    type Item = Result<String, SessionError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

pub struct StreamingChatSession<C> {
    client: C,
    config: SessionConfig,
}

impl<C: ModelClient> StreamingChatSession<C> {
    pub fn new(client: C, config: SessionConfig) -> Self {
        Self { client, config }
    }

    fn build_messages(&self, request: &StreamRequest) -> Vec<Message> {
        let system = request
            .system_prompt
            .clone()
            .unwrap_or_else(|| self.config.system_prompt.clone());
        let mut msgs = Vec::with_capacity(request.history.len() + 2);
        msgs.push(Message::system(system));
        msgs.extend(request.history.iter().cloned());
        msgs.push(Message::user(request.new_message.clone()));
        msgs
    }

    /// Validates the request and returns the fragment stream.
    ///
    /// Empty input fails here, before the provider is contacted. The upstream
    /// request is only opened once the returned stream is first polled.
    pub fn start(&self, request: StreamRequest) -> Result<Fragments<'_>, SessionError> {
        let (state_tx, state_rx) = watch::channel(SessionState::Validating);
        if request.new_message.trim().is_empty() {
            state_tx.send_replace(SessionState::Failed);
            return Err(SessionError::EmptyInput);
        }
        let model = ModelId::resolve(&request.model);
        let messages = self.build_messages(&request);
        let opts = ChatOpts {
            model: model.as_str().to_string(),
            temperature: Some(self.config.temperature),
            max_tokens: Some(self.config.max_tokens),
        };
        info!(target: "core::session", "start model={} history={} persona={}",
            model, request.history.len(), request.system_prompt.is_some());

        let cancel = request.cancel;
        let pacing = self.config.pacing;
        let mut buffer = FragmentBuffer::new(self.config.flush_threshold);
        let client = &self.client;

        let s = async_stream::stream! {
            state_tx.send_replace(SessionState::Connecting);
            let mut upstream = client.stream_chat(messages, opts);
            let mut fragments = 0usize;
            let end = loop {
                if cancel.is_active() {
                    break End::Cancelled;
                }
                let item = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break End::Cancelled,
                    item = upstream.next() => item,
                };
                let delta = match item {
                    Some(Ok(delta)) => delta,
                    Some(Err(e)) => break End::Failed(e),
                    None => break End::Completed,
                };
                if *state_tx.borrow() == SessionState::Connecting {
                    state_tx.send_replace(SessionState::Streaming);
                }
                match delta {
                    ChatDelta::Text(text) => {
                        let Some(fragment) = buffer.push(&text) else {
                            continue;
                        };
                        if cancel.is_active() {
                            break End::Cancelled;
                        }
                        fragments += 1;
                        yield Ok(fragment);
                        if !pacing.is_zero() {
                            tokio::select! {
                                biased;
                                _ = cancel.cancelled() => break End::Cancelled,
                                _ = tokio::time::sleep(pacing) => {}
                            }
                        }
                    }
                    ChatDelta::Finish(reason) => {
                        debug!(target: "core::session", "finish reason={:?}", reason);
                        break End::Completed;
                    }
                    ChatDelta::RoleStart(_) | ChatDelta::Usage { .. } => {}
                }
            };
            drop(upstream);

            match end {
                End::Completed => {
                    if let Some(rest) = buffer.finish() {
                        if cancel.is_active() {
                            state_tx.send_replace(SessionState::Cancelled);
                            info!(target: "core::session", "cancelled before final flush");
                            yield Err(SessionError::Cancelled);
                            return;
                        }
                        fragments += 1;
                        yield Ok(rest);
                    }
                    state_tx.send_replace(SessionState::Completed);
                    debug!(target: "core::session", "completed fragments={}", fragments);
                }
                End::Cancelled => {
                    state_tx.send_replace(SessionState::Cancelled);
                    info!(target: "core::session", "cancelled after {} fragments", fragments);
                    yield Err(SessionError::Cancelled);
                }
                End::Failed(e) => {
                    state_tx.send_replace(SessionState::Failed);
                    warn!(target: "core::session", "provider error after {} fragments: {}", fragments, e);
                    yield Err(SessionError::Provider(e));
                }
            }
        };

        Ok(Fragments {
            inner: Box::pin(s),
            state: state_rx,
            model,
        })
    }
}

/// Controller-side slot for the one session allowed to stream at a time.
#[derive(Debug, Default)]
pub struct SessionHandle {
    current: Mutex<Option<CancelToken>>,
}

impl SessionHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancels whatever is running and registers a fresh token for the next session.
    pub fn begin(&self) -> CancelToken {
        let mut slot = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(prev) = slot.take() {
            prev.trigger();
        }
        let token = CancelToken::new();
        *slot = Some(token.clone());
        token
    }

    /// Triggers the current token. Returns false when nothing was streaming.
    pub fn cancel(&self) -> bool {
        let slot = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        match slot.as_ref() {
            Some(t) => {
                t.trigger();
                true
            }
            None => false,
        }
    }

    /// Clears the slot if it still belongs to `token`.
    pub fn finish(&self, token: &CancelToken) {
        let mut slot = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.as_ref().is_some_and(|t| t.same_as(token)) {
            *slot = None;
        }
    }

    pub fn is_streaming(&self) -> bool {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ChatStream, Role};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ScriptedClient {
        script: Vec<Result<ChatDelta, ChatError>>,
        gap: Duration,
        calls: AtomicUsize,
        seen: Mutex<Vec<(Vec<Message>, ChatOpts)>>,
    }

    impl ScriptedClient {
        fn new(script: Vec<Result<ChatDelta, ChatError>>) -> Self {
            Self {
                script,
                gap: Duration::ZERO,
                calls: AtomicUsize::new(0),
                seen: Mutex::new(Vec::new()),
            }
        }

        fn text(chunks: &[&str]) -> Self {
            let mut script: Vec<_> = chunks
                .iter()
                .map(|c| Ok(ChatDelta::Text(c.to_string())))
                .collect();
            script.push(Ok(ChatDelta::Finish(Some("stop".into()))));
            Self::new(script)
        }

        fn last_request(&self) -> (Vec<Message>, ChatOpts) {
            self.seen.lock().unwrap().last().cloned().unwrap()
        }
    }

    impl ModelClient for ScriptedClient {
        fn stream_chat<'a>(&'a self, msgs: Vec<Message>, opts: ChatOpts) -> ChatStream<'a> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().unwrap().push((msgs, opts));
            let script = self.script.clone();
            let gap = self.gap;
            Box::pin(async_stream::stream! {
                for item in script {
                    if !gap.is_zero() {
                        tokio::time::sleep(gap).await;
                    }
                    yield item;
                }
            })
        }
    }

    fn fast_config() -> SessionConfig {
        SessionConfig {
            pacing: Duration::from_millis(1),
            ..SessionConfig::default()
        }
    }

    async fn drain(mut f: Fragments<'_>) -> Vec<Result<String, SessionError>> {
        let mut out = Vec::new();
        while let Some(item) = f.next().await {
            out.push(item);
        }
        out
    }

    #[test]
    fn buffer_flushes_on_whitespace_or_length() {
        let mut b = FragmentBuffer::new(3);
        assert_eq!(b.push("Hi"), None);
        assert_eq!(b.push(" there"), Some("Hi there".to_string()));
        assert_eq!(b.push("!"), None);
        assert_eq!(b.push("ab"), None);
        assert_eq!(b.push("c"), Some("!abc".to_string()));
        assert_eq!(b.push("x\n"), Some("x\n".to_string()));
        assert_eq!(b.push(""), None);
        assert_eq!(b.finish(), None);
        b.push("z");
        assert_eq!(b.finish(), Some("z".to_string()));
    }

    #[tokio::test]
    async fn fragments_concatenate_to_full_reply() {
        let session = StreamingChatSession::new(
            ScriptedClient::text(&["Hi", " there", "!"]),
            fast_config(),
        );
        let f = session
            .start(StreamRequest::new("Hello", CancelToken::new()).with_model("mixtral-8x7b-32768"))
            .unwrap();
        let items = drain(f).await;
        let fragments: Vec<String> = items.into_iter().map(Result::unwrap).collect();
        assert_eq!(fragments, vec!["Hi there".to_string(), "!".to_string()]);
        assert_eq!(fragments.concat(), "Hi there!");
    }

    #[tokio::test]
    async fn long_reply_survives_batching_unchanged() {
        let reply = "The quick brown fox jumps over the lazy dog.\nThen it naps.";
        let chunks: Vec<String> = reply.chars().map(|c| c.to_string()).collect();
        let refs: Vec<&str> = chunks.iter().map(String::as_str).collect();
        let session = StreamingChatSession::new(
            ScriptedClient::text(&refs),
            SessionConfig {
                pacing: Duration::ZERO,
                ..SessionConfig::default()
            },
        );
        let f = session
            .start(StreamRequest::new("tell me", CancelToken::new()))
            .unwrap();
        assert_eq!(f.state(), SessionState::Validating);
        let items = drain(f).await;
        assert!(items.iter().all(|i| i.as_ref().is_ok_and(|s| !s.is_empty())));
        let text: String = items.into_iter().map(Result::unwrap).collect();
        assert_eq!(text, reply);
    }

    #[tokio::test]
    async fn empty_input_fails_without_provider_call() {
        let session = StreamingChatSession::new(ScriptedClient::text(&["x"]), fast_config());
        for input in ["", "   ", "\n\t"] {
            let err = session
                .start(StreamRequest::new(input, CancelToken::new()))
                .err()
                .unwrap();
            assert_eq!(err, SessionError::EmptyInput);
        }
        assert_eq!(session.client.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unknown_model_uses_default() {
        let session = StreamingChatSession::new(ScriptedClient::text(&["ok"]), fast_config());
        let f = session
            .start(StreamRequest::new("hi", CancelToken::new()).with_model("not-a-real-model"))
            .unwrap();
        assert_eq!(f.model(), ModelId::DEFAULT);
        assert_eq!(f.into_text().await.unwrap(), "ok");
        let (_, opts) = session.client.last_request();
        assert_eq!(opts.model, ModelId::DEFAULT.as_str());
        assert_eq!(opts.temperature, Some(0.7));
        assert_eq!(opts.max_tokens, Some(2048));
    }

    #[tokio::test]
    async fn system_prompt_override_and_default() {
        let session = StreamingChatSession::new(ScriptedClient::text(&["ok"]), fast_config());
        let history = vec![Message::user("earlier"), Message::assistant("reply")];

        let f = session
            .start(
                StreamRequest::new("next", CancelToken::new())
                    .with_history(history.clone())
                    .with_system_prompt(Some("You are Luna.".into())),
            )
            .unwrap();
        f.into_text().await.unwrap();
        let (msgs, _) = session.client.last_request();
        assert_eq!(msgs[0].role, Role::System);
        assert_eq!(msgs[0].content, "You are Luna.");
        assert_eq!(&msgs[1..3], &history[..]);
        assert_eq!(msgs[3].role, Role::User);
        assert_eq!(msgs[3].content, "next");

        let f = session
            .start(StreamRequest::new("again", CancelToken::new()))
            .unwrap();
        f.into_text().await.unwrap();
        let (msgs, _) = session.client.last_request();
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0].content, DEFAULT_SYSTEM_PROMPT);
    }

    #[tokio::test]
    async fn cancel_after_first_fragment_stops_quickly() {
        let words: Vec<String> = (0..20).map(|i| format!("word{} ", i)).collect();
        let refs: Vec<&str> = words.iter().map(String::as_str).collect();
        let session = StreamingChatSession::new(ScriptedClient::text(&refs), fast_config());
        let cancel = CancelToken::new();
        let mut f = session
            .start(StreamRequest::new("go", cancel.clone()))
            .unwrap();

        let first = f.next().await.unwrap().unwrap();
        assert_eq!(first, "word0 ");
        cancel.trigger();

        let rest = drain(f).await;
        let extra = rest.iter().filter(|i| i.is_ok()).count();
        assert!(extra <= 1, "got {} extra fragments", extra);
        assert_eq!(rest.last(), Some(&Err(SessionError::Cancelled)));
    }

    #[tokio::test]
    async fn cancel_before_first_poll_yields_only_cancelled() {
        let session = StreamingChatSession::new(ScriptedClient::text(&["a ", "b "]), fast_config());
        let cancel = CancelToken::new();
        cancel.trigger();
        let mut f = session.start(StreamRequest::new("go", cancel)).unwrap();
        assert_eq!(f.next().await, Some(Err(SessionError::Cancelled)));
        assert_eq!(f.next().await, None);
        assert_eq!(f.state(), SessionState::Cancelled);
    }

    #[tokio::test]
    async fn cancel_interrupts_pacing_delay() {
        let session = StreamingChatSession::new(
            ScriptedClient::text(&["one ", "two "]),
            SessionConfig {
                pacing: Duration::from_secs(30),
                ..SessionConfig::default()
            },
        );
        let cancel = CancelToken::new();
        let mut f = session
            .start(StreamRequest::new("go", cancel.clone()))
            .unwrap();
        assert_eq!(f.next().await, Some(Ok("one ".to_string())));
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.trigger();
        });
        let next = tokio::time::timeout(Duration::from_secs(2), f.next())
            .await
            .expect("pacing delay observed cancellation");
        assert_eq!(next, Some(Err(SessionError::Cancelled)));
    }

    #[tokio::test]
    async fn cancel_while_waiting_on_provider() {
        let mut client = ScriptedClient::text(&["slow "]);
        client.gap = Duration::from_secs(30);
        let session = StreamingChatSession::new(client, fast_config());
        let cancel = CancelToken::new();
        let mut f = session
            .start(StreamRequest::new("go", cancel.clone()))
            .unwrap();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.trigger();
        });
        let next = tokio::time::timeout(Duration::from_secs(2), f.next())
            .await
            .expect("cancel observed while upstream idle");
        assert_eq!(next, Some(Err(SessionError::Cancelled)));
    }

    #[tokio::test]
    async fn double_cancel_and_cancel_after_completion_are_noops() {
        let session = StreamingChatSession::new(ScriptedClient::text(&["done"]), fast_config());
        let cancel = CancelToken::new();
        let mut f = session
            .start(StreamRequest::new("go", cancel.clone()))
            .unwrap();
        assert_eq!(f.next().await, Some(Ok("done".to_string())));
        assert_eq!(f.next().await, None);
        assert_eq!(f.state(), SessionState::Completed);
        cancel.trigger();
        cancel.trigger();
        assert_eq!(f.next().await, None);
        assert_eq!(f.state(), SessionState::Completed);
    }

    #[tokio::test]
    async fn provider_error_keeps_earlier_fragments_and_ends() {
        let session = StreamingChatSession::new(
            ScriptedClient::new(vec![
                Ok(ChatDelta::Text("Hello ".into())),
                Ok(ChatDelta::Text("wor".into())),
                Err(ChatError::Protocol("model overloaded".into())),
                Ok(ChatDelta::Text("never".into())),
            ]),
            fast_config(),
        );
        let f = session
            .start(StreamRequest::new("go", CancelToken::new()))
            .unwrap();
        let mut f = f;
        assert_eq!(f.next().await, Some(Ok("Hello ".to_string())));
        let err = f.next().await.unwrap().unwrap_err();
        assert!(err.to_string().contains("model overloaded"));
        assert!(matches!(err, SessionError::Provider(ChatError::Protocol(_))));
        assert_eq!(f.next().await, None);
        assert_eq!(f.state(), SessionState::Failed);
    }

    #[tokio::test]
    async fn connect_failure_surfaces_as_provider_error() {
        let session = StreamingChatSession::new(
            ScriptedClient::new(vec![Err(ChatError::Auth(String::new()))]),
            fast_config(),
        );
        let err = session
            .start(StreamRequest::new("go", CancelToken::new()))
            .unwrap()
            .into_text()
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "failed to generate response: An error occurred");
    }

    #[test]
    fn handle_cancels_previous_session_on_begin() {
        let handle = SessionHandle::new();
        assert!(!handle.is_streaming());
        assert!(!handle.cancel());

        let first = handle.begin();
        let second = handle.begin();
        assert!(first.is_active());
        assert!(!second.is_active());

        handle.finish(&first);
        assert!(handle.is_streaming());

        assert!(handle.cancel());
        assert!(second.is_active());
        handle.finish(&second);
        assert!(!handle.is_streaming());
    }
}
