use std::sync::mpsc::{self, Receiver, TryRecvError};

use blue_core::{
    image::{GeneratedImage, ImageError},
    llm::{Message, Role},
    CancelToken, ModelId, SessionError, StreamRequest,
};
use chrono::{Duration, Utc};
use futures::StreamExt;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::{
    commands::{literal_message, Command},
    App,
};
use crate::{
    store::{title_from_message, ChatMessage},
    strings,
};

const RECENT_IMAGES: usize = 5;

fn image_window() -> Duration {
    Duration::hours(24)
}

/// Messages from a session task to the UI thread.
pub(crate) enum StreamUpdate {
    Fragment(String),
    End(StreamEnd),
}

#[derive(Debug)]
pub(crate) enum StreamEnd {
    Completed,
    Cancelled,
    Failed(String),
}

impl From<SessionError> for StreamEnd {
    fn from(e: SessionError) -> Self {
        if e.is_cancelled() {
            StreamEnd::Cancelled
        } else {
            StreamEnd::Failed(e.to_string())
        }
    }
}

/// Bookkeeping for the reply currently being streamed into `messages`.
pub(crate) struct ActiveStream {
    rx: Receiver<StreamUpdate>,
    token: CancelToken,
    chat_id: Uuid,
    assistant_index: usize,
    first_exchange: bool,
}

pub(crate) struct ImageJob {
    rx: Receiver<Result<String, ImageError>>,
    prompt: String,
}

impl App {
    pub fn submit(&mut self) {
        let text = self.input.text().trim().to_string();
        if text.is_empty() {
            return;
        }
        self.history.record(&text);
        self.input.clear();
        self.chat_scroll = 0;
        self.dirty = true;
        match Command::parse(&text) {
            Some(cmd) => self.run_command(cmd),
            None => self.send_message(literal_message(&text).to_string()),
        }
    }

    fn send_message(&mut self, text: String) {
        self.stop_stream();
        let Some(backend) = self.backend.clone() else {
            self.notice(strings::CHAT_UNAVAILABLE);
            return;
        };
        let chat_id = match self.ensure_chat() {
            Ok(id) => id,
            Err(e) => {
                error!(target: "tui", "create chat failed: {:#}", e);
                self.notice(format!("[error] could not create chat: {}", e));
                return;
            }
        };

        let history: Vec<Message> = self
            .messages
            .iter()
            .filter(|m| !m.transient && !m.content().is_empty())
            .map(|m| m.message.clone())
            .collect();
        let first_exchange = !history.iter().any(|m| m.role == Role::User);
        let system_prompt = self.current_persona().map(|p| p.system_prompt.clone());

        self.messages.push(ChatMessage::user(text.clone()));
        let assistant_index = self.messages.len();
        self.messages.push(ChatMessage::assistant("", self.model));

        let token = self.handle.begin();
        let request = StreamRequest::new(text, token.clone())
            .with_model(self.model.as_str())
            .with_history(history)
            .with_system_prompt(system_prompt);
        info!(
            target: "tui",
            "submit: chat={} model={} history={}",
            chat_id,
            self.model,
            request.history.len()
        );

        let (tx, rx) = mpsc::channel();
        self.rt.spawn(async move {
            let end = match backend.start(request) {
                Err(e) => StreamEnd::from(e),
                Ok(mut fragments) => {
                    let mut end = StreamEnd::Completed;
                    while let Some(item) = fragments.next().await {
                        match item {
                            Ok(text) => {
                                if tx.send(StreamUpdate::Fragment(text)).is_err() {
                                    debug!(target: "tui", "receiver gone, dropping stream");
                                    return;
                                }
                            }
                            Err(e) => {
                                end = StreamEnd::from(e);
                                break;
                            }
                        }
                    }
                    end
                }
            };
            let _ = tx.send(StreamUpdate::End(end));
        });

        self.stream = Some(ActiveStream {
            rx,
            token,
            chat_id,
            assistant_index,
            first_exchange,
        });
    }

    /// Appends pending fragments; returns the terminal update if one arrived.
    fn drain_stream(&mut self) -> Option<StreamEnd> {
        let active = self.stream.as_ref()?;
        loop {
            match active.rx.try_recv() {
                Ok(StreamUpdate::Fragment(text)) => {
                    if let Some(m) = self.messages.get_mut(active.assistant_index) {
                        m.message.content.push_str(&text);
                    }
                    self.dirty = true;
                }
                Ok(StreamUpdate::End(end)) => return Some(end),
                Err(TryRecvError::Empty) => return None,
                Err(TryRecvError::Disconnected) => {
                    return Some(StreamEnd::Failed(strings::STREAM_ABORTED.to_string()))
                }
            }
        }
    }

    pub(crate) fn pump_stream(&mut self) {
        if let Some(end) = self.drain_stream() {
            self.finish_stream(end);
        }
    }

    /// Cancels the running reply, keeping the text received so far.
    /// Returns false when nothing was streaming.
    pub fn stop_stream(&mut self) -> bool {
        if self.stream.is_none() {
            return false;
        }
        self.handle.cancel();
        let end = self.drain_stream().unwrap_or(StreamEnd::Cancelled);
        self.finish_stream(end);
        true
    }

    fn finish_stream(&mut self, end: StreamEnd) {
        let Some(active) = self.stream.take() else {
            return;
        };
        self.handle.finish(&active.token);
        let idx = active.assistant_index;
        let mut persist: Vec<ChatMessage> = idx
            .checked_sub(1)
            .and_then(|i| self.messages.get(i))
            .cloned()
            .into_iter()
            .collect();

        match end {
            StreamEnd::Completed => {
                if let Some(m) = self.messages.get(idx) {
                    info!(target: "tui", "reply complete: {} chars", m.content().chars().count());
                    persist.push(m.clone());
                }
            }
            StreamEnd::Cancelled => {
                let empty = self.messages.get(idx).is_some_and(|m| m.content().is_empty());
                if empty {
                    self.messages.remove(idx);
                } else if let Some(m) = self.messages.get_mut(idx) {
                    m.stopped = true;
                    persist.push(m.clone());
                }
                info!(target: "tui", "reply stopped by user");
            }
            StreamEnd::Failed(detail) => {
                warn!(target: "tui", "reply failed: {}", detail);
                let notice = ChatMessage::notice(format!("{}\n{}", strings::ERROR_REPLY, detail));
                match self.messages.get_mut(idx) {
                    Some(m) if m.content().is_empty() => *m = notice,
                    Some(m) => {
                        persist.push(m.clone());
                        self.messages.insert(idx + 1, notice);
                    }
                    None => self.messages.push(notice),
                }
            }
        }

        if let Err(e) = self.store.append_messages(active.chat_id, &persist) {
            error!(target: "tui", "persist messages failed: {:#}", e);
            self.notice(format!("[error] could not save messages: {}", e));
        }
        if active.first_exchange {
            if let Some(user) = persist.first() {
                let title = title_from_message(user.content());
                if let Err(e) = self.store.rename_chat(active.chat_id, &title) {
                    warn!(target: "tui", "set chat title failed: {:#}", e);
                }
            }
        }
        self.reload_chats();
        self.chat_cache.clear();
        self.dirty = true;
    }

    pub(crate) fn set_model(&mut self, model: ModelId) {
        self.model = model;
        info!(target: "tui", "model set to {}", model);
        self.notice(format!("[info] model set to '{}'", model.info().name));
    }

    pub(crate) fn set_default_model(&mut self, model: ModelId) {
        let settings = crate::store::UserSettings {
            default_model: model.as_str().to_string(),
            updated_at: Utc::now(),
        };
        match self.store.save_settings(&settings) {
            Ok(()) => self.notice(format!("[info] default model set to '{}'", model)),
            Err(e) => {
                error!(target: "tui", "save settings failed: {:#}", e);
                self.notice(format!("[error] could not save settings: {}", e));
            }
        }
    }

    pub(crate) fn show_stats(&mut self) {
        match self.store.stats() {
            Ok(s) => self.notice(format!(
                "[stats] chats: {}  personas: {}  messages: {}",
                s.chats, s.personas, s.messages
            )),
            Err(e) => self.notice(format!("[error] could not read stats: {}", e)),
        }
    }

    pub(crate) fn show_images(&mut self) {
        let images = match self.store.list_images() {
            Ok(images) => images,
            Err(e) => {
                error!(target: "tui", "list images failed: {:#}", e);
                self.notice(format!("[error] could not read images: {}", e));
                return;
            }
        };
        if images.is_empty() {
            self.notice("[image] no images yet");
            return;
        }
        for img in images.iter().take(RECENT_IMAGES) {
            self.notice(format!(
                "[image] {}  \"{}\"  {}",
                img.created_at.format("%Y-%m-%d %H:%M"),
                img.prompt,
                img.image_url
            ));
        }
    }

    pub(crate) fn start_image(&mut self, prompt: String) {
        let Some(generator) = self.images.clone() else {
            self.notice(strings::IMAGES_UNAVAILABLE);
            return;
        };
        if self.image_job.is_some() {
            self.notice("[image] an image is already being generated");
            return;
        }
        if let Err(e) =
            self.rate_window
                .ensure_available(Utc::now(), self.image_limit, image_window())
        {
            self.notice(format!("[image] {}", e));
            return;
        }
        info!(target: "tui", "image: generating for {} chars", prompt.chars().count());
        let (tx, rx) = mpsc::channel();
        let p = prompt.clone();
        self.rt.spawn(async move {
            let res = generator.generate(&p).await;
            let _ = tx.send(res);
        });
        self.notice(format!("[image] generating \"{}\"...", prompt));
        self.image_job = Some(ImageJob { rx, prompt });
    }

    pub(crate) fn poll_image(&mut self) {
        let res = match self.image_job.as_ref().map(|j| j.rx.try_recv()) {
            None | Some(Err(TryRecvError::Empty)) => return,
            Some(Ok(res)) => res,
            Some(Err(TryRecvError::Disconnected)) => Err(ImageError::Provider(
                strings::IMAGE_ABORTED.to_string(),
            )),
        };
        let Some(job) = self.image_job.take() else {
            return;
        };
        match res {
            Ok(url) => {
                let now = Utc::now();
                self.rate_window.record(now, image_window());
                if let Err(e) = self.store.save_rate_window(&self.rate_window) {
                    warn!(target: "tui", "save rate window failed: {:#}", e);
                }
                if let Err(e) = self.store.add_image(&GeneratedImage::new(job.prompt, &url)) {
                    warn!(target: "tui", "save image failed: {:#}", e);
                }
                self.notice(format!("[image] {}", url));
            }
            Err(e) => {
                warn!(target: "tui", "image failed: {}", e);
                self.notice(format!("[image] {}", e));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{Arc, Mutex},
        time::{Duration as StdDuration, Instant},
    };

    use blue_core::{
        image::ImageGenerator,
        llm::{ChatDelta, ChatError, ChatOpts, ChatStream, ModelClient},
        SessionConfig, StreamingChatSession,
    };
    use futures::{future::BoxFuture, stream};

    use super::*;
    use crate::{
        app::Backends,
        store::{Store, DEFAULT_CHAT_TITLE},
    };

    enum Script {
        Reply(Vec<&'static str>),
        Hang(&'static str),
        Fail(ChatError),
    }

    struct ScriptedClient {
        script: Script,
        seen: Mutex<Vec<Vec<Message>>>,
    }

    impl ModelClient for ScriptedClient {
        fn stream_chat<'a>(&'a self, msgs: Vec<Message>, _opts: ChatOpts) -> ChatStream<'a> {
            self.seen.lock().unwrap().push(msgs);
            match &self.script {
                Script::Reply(parts) => {
                    let mut items: Vec<Result<ChatDelta, ChatError>> = parts
                        .iter()
                        .map(|p| Ok(ChatDelta::Text(p.to_string())))
                        .collect();
                    items.push(Ok(ChatDelta::Finish(Some("stop".into()))));
                    Box::pin(stream::iter(items))
                }
                Script::Hang(first) => Box::pin(
                    stream::iter(vec![Ok(ChatDelta::Text(first.to_string()))])
                        .chain(stream::pending()),
                ),
                Script::Fail(e) => Box::pin(stream::iter(vec![Err(e.clone())])),
            }
        }
    }

    struct FixedImage(Result<String, ImageError>);

    impl ImageGenerator for FixedImage {
        fn generate<'a>(&'a self, _prompt: &'a str) -> BoxFuture<'a, Result<String, ImageError>> {
            let res = self.0.clone();
            Box::pin(async move { res })
        }
    }

    fn backends(script: Script) -> (Backends, Arc<ScriptedClient>) {
        let client = Arc::new(ScriptedClient {
            script,
            seen: Mutex::new(Vec::new()),
        });
        let dyn_client: Arc<dyn ModelClient> = client.clone();
        let config = SessionConfig {
            pacing: StdDuration::from_millis(1),
            ..SessionConfig::default()
        };
        let b = Backends {
            chat: Some(Arc::new(StreamingChatSession::new(dyn_client, config))),
            images: None,
            image_limit: 10,
            default_model: None,
            notices: Vec::new(),
        };
        (b, client)
    }

    fn app_with(b: Backends) -> (App, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();
        (App::new(store, b).unwrap(), dir)
    }

    fn tick_until(app: &mut App, done: impl Fn(&App) -> bool) {
        let deadline = Instant::now() + StdDuration::from_secs(5);
        while !done(app) {
            assert!(Instant::now() < deadline, "timed out waiting for app");
            app.on_tick();
            std::thread::sleep(StdDuration::from_millis(5));
        }
    }

    fn send(app: &mut App, text: &str) {
        app.input.set(text);
        app.submit();
    }

    #[test]
    fn reply_is_streamed_persisted_and_titles_the_chat() {
        let (b, client) = backends(Script::Reply(vec!["Hi", " there", "!"]));
        let (mut app, _dir) = app_with(b);
        send(&mut app, "Hello");
        assert!(app.is_streaming());
        tick_until(&mut app, |a| !a.is_streaming());

        let n = app.messages.len();
        assert_eq!(app.messages[n - 2].content(), "Hello");
        assert_eq!(app.messages[n - 1].content(), "Hi there!");
        assert_eq!(
            app.messages[n - 1].model.as_deref(),
            Some(ModelId::DEFAULT.as_str())
        );

        let chat = app.chats[app.current_chat.unwrap()].clone();
        assert_eq!(chat.title, "Hello");
        let saved = app.store().load_messages(chat.id).unwrap();
        assert_eq!(saved.len(), 2);
        assert_eq!(saved[1].content(), "Hi there!");

        let seen = client.seen.lock().unwrap();
        assert_eq!(seen[0][0].role, Role::System);
        assert_eq!(seen[0].last().unwrap().content, "Hello");
    }

    #[test]
    fn escaped_slash_reaches_the_model() {
        let (b, client) = backends(Script::Reply(vec!["ok"]));
        let (mut app, _dir) = app_with(b);
        send(&mut app, "//etc/hosts looks wrong");
        tick_until(&mut app, |a| !a.is_streaming());

        let seen = client.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].last().unwrap().content, "/etc/hosts looks wrong");
        assert_eq!(app.chats[0].title, "/etc/hosts looks wrong");
    }

    #[test]
    fn second_message_carries_history_and_keeps_title() {
        let (b, client) = backends(Script::Reply(vec!["ok"]));
        let (mut app, _dir) = app_with(b);
        send(&mut app, "first question");
        tick_until(&mut app, |a| !a.is_streaming());
        send(&mut app, "second question");
        tick_until(&mut app, |a| !a.is_streaming());

        let seen = client.seen.lock().unwrap();
        let second = &seen[1];
        assert_eq!(second.len(), 4);
        assert_eq!(second[1].content, "first question");
        assert_eq!(second[2].content, "ok");
        assert_eq!(app.chats[0].title, "first question");
    }

    #[test]
    fn stop_keeps_partial_text_marked_stopped() {
        let (b, _) = backends(Script::Hang("partial "));
        let (mut app, _dir) = app_with(b);
        send(&mut app, "tell me a story");
        tick_until(&mut app, |a| {
            a.messages.last().is_some_and(|m| !m.content().is_empty())
        });
        assert!(app.stop_stream());
        assert!(!app.is_streaming());
        assert!(!app.stop_stream());

        let last = app.messages.last().unwrap();
        assert_eq!(last.content(), "partial ");
        assert!(last.stopped);
        let chat = app.current_chat_id().unwrap();
        let saved = app.store().load_messages(chat).unwrap();
        assert_eq!(saved.len(), 2);
        assert!(saved[1].stopped);
    }

    #[test]
    fn submitting_while_streaming_stops_the_previous_reply() {
        let (b, client) = backends(Script::Hang("partial "));
        let (mut app, _dir) = app_with(b);
        send(&mut app, "one");
        tick_until(&mut app, |a| {
            a.messages.last().is_some_and(|m| !m.content().is_empty())
        });
        send(&mut app, "two");
        assert!(app.is_streaming());
        assert!(app.messages.iter().any(|m| m.stopped));
        tick_until(&mut app, |_| client.seen.lock().unwrap().len() == 2);
        app.stop_stream();
    }

    #[test]
    fn provider_failure_shows_error_and_saves_only_the_question() {
        let (b, _) = backends(Script::Fail(ChatError::Auth("Invalid API Key".into())));
        let (mut app, _dir) = app_with(b);
        send(&mut app, "Hello");
        tick_until(&mut app, |a| !a.is_streaming());

        let last = app.messages.last().unwrap();
        assert!(last.transient);
        assert!(last.content().starts_with(strings::ERROR_REPLY));
        assert!(last
            .content()
            .ends_with("failed to generate response: Invalid API Key"));
        let saved = app
            .store()
            .load_messages(app.current_chat_id().unwrap())
            .unwrap();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].content(), "Hello");
    }

    #[test]
    fn missing_backend_sends_nothing() {
        let (mut b, _) = backends(Script::Reply(vec![]));
        b.chat = None;
        let (mut app, _dir) = app_with(b);
        send(&mut app, "Hello");
        assert!(!app.is_streaming());
        assert_eq!(app.messages.last().unwrap().content(), strings::CHAT_UNAVAILABLE);
        assert!(app.chats.is_empty());
    }

    #[test]
    fn slash_commands_do_not_reach_the_model() {
        let (b, client) = backends(Script::Reply(vec!["x"]));
        let (mut app, _dir) = app_with(b);
        send(&mut app, "/model gemma2-9b-it");
        assert_eq!(app.model, ModelId::Gemma2_9b);
        send(&mut app, "/bogus");
        assert!(app.messages.last().unwrap().content().contains("/bogus"));
        assert!(client.seen.lock().unwrap().is_empty());
    }

    #[test]
    fn new_chat_starts_with_default_title() {
        let (b, _) = backends(Script::Reply(vec![]));
        let (mut app, _dir) = app_with(b);
        send(&mut app, "/new");
        assert_eq!(app.chats.len(), 1);
        assert_eq!(app.chats[0].title, DEFAULT_CHAT_TITLE);
        assert!(app.messages.is_empty());
    }

    #[test]
    fn image_success_records_quota_and_history() {
        let (mut b, _) = backends(Script::Reply(vec![]));
        b.images = Some(Arc::new(FixedImage(Ok("https://img.example/1.png".into()))));
        let (mut app, _dir) = app_with(b);
        send(&mut app, "/image a red fox");
        tick_until(&mut app, |a| !a.is_generating_image());

        assert_eq!(app.rate_window.used, 1);
        let images = app.store().list_images().unwrap();
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].prompt, "a red fox");
        assert_eq!(
            app.messages.last().unwrap().content(),
            "[image] https://img.example/1.png"
        );

        send(&mut app, "/images");
        let listed = app.messages.last().unwrap().content().to_string();
        assert!(listed.contains("\"a red fox\""));
        assert!(listed.ends_with("https://img.example/1.png"));
    }

    #[test]
    fn image_refused_when_quota_is_spent() {
        let (mut b, _) = backends(Script::Reply(vec![]));
        b.images = Some(Arc::new(FixedImage(Ok("unused".into()))));
        b.image_limit = 0;
        let (mut app, _dir) = app_with(b);
        send(&mut app, "/image a red fox");
        assert!(!app.is_generating_image());
        assert!(app
            .messages
            .last()
            .unwrap()
            .content()
            .contains("Rate limit reached"));
    }

    #[test]
    fn image_error_is_reported() {
        let (mut b, _) = backends(Script::Reply(vec![]));
        b.images = Some(Arc::new(FixedImage(Err(ImageError::MissingUrl))));
        let (mut app, _dir) = app_with(b);
        send(&mut app, "/image a red fox");
        tick_until(&mut app, |a| !a.is_generating_image());
        assert_eq!(app.rate_window.used, 0);
        assert_eq!(
            app.messages.last().unwrap().content(),
            "[image] No image URL in response"
        );
    }
}
