use super::autosave::Autosaver;
use super::types::{
    ImageAttachment, Message, MessageRole, Session, SessionContent, SessionSettings,
    new_session_id, preview_of,
};
use crate::chat::{ChatProvider, TurnOutcome, drive_turn};
use crate::error::ChatError;
use crate::store::SessionStore;
use anyhow::{Context, Result};
use chrono::Utc;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

const TITLE_MAX_CHARS: usize = 48;

/// Explicitly lifetimed context for the one current session: created on
/// load, torn down on switch. Never a free-floating singleton.
pub struct ChatContext {
    pub session: Session,
    pub content: SessionContent,
    cancel: CancellationToken,
}

/// High-level session lifecycle: creation, duplication, deletion, switching,
/// and the autosave policy feeding the store. Owns the "current session"
/// pointer.
pub struct SessionManager {
    store: Arc<dyn SessionStore>,
    provider: Arc<dyn ChatProvider>,
    autosaver: Autosaver,
    active: Mutex<Option<ChatContext>>,
    /// Bumped by history truncation (regenerate/edit) and teardown; a turn
    /// finalizing against a stale epoch is discarded, so a late chunk can
    /// never resurrect truncated content.
    epoch: AtomicU64,
}

impl SessionManager {
    pub fn new(
        store: Arc<dyn SessionStore>,
        provider: Arc<dyn ChatProvider>,
        autosave_debounce: Duration,
    ) -> Self {
        Self {
            autosaver: Autosaver::new(Arc::clone(&store), autosave_debounce),
            store,
            provider,
            active: Mutex::new(None),
            epoch: AtomicU64::new(0),
        }
    }

    /// Startup path: repair orphans, then open the most recently updated
    /// session, creating a first session when the store is empty.
    pub async fn bootstrap(&self) -> Result<Session> {
        let recovered = self.store.recover_orphans().await?;
        if !recovered.is_empty() {
            tracing::info!(count = recovered.len(), "orphaned sessions repaired at startup");
        }

        let sessions = self.store.list_sessions().await?;
        match sessions.into_iter().max_by_key(|s| s.updated_at) {
            Some(most_recent) => self.switch_session(&most_recent.id).await,
            None => self.create_session(false).await,
        }
    }

    /// Create a session, durable (content then index) before any message is
    /// sent. `carry_over` seeds settings from the outgoing session through
    /// the explicit allow-list.
    pub async fn create_session(&self, carry_over: bool) -> Result<Session> {
        let settings = {
            let active = self.active.lock().await;
            match (carry_over, active.as_ref()) {
                (true, Some(ctx)) => SessionSettings::carry_over(&ctx.content.settings),
                _ => SessionSettings::default(),
            }
        };

        let mut content = SessionContent::new(settings.clone());
        if !settings.welcome_message.is_empty() {
            content
                .messages
                .push(Message::new(MessageRole::Model, settings.welcome_message.clone()));
        }
        let session = Session {
            id: new_session_id(),
            title: format!("Chat with {}", settings.ai_name),
            preview: content
                .last_message()
                .map(|m| preview_of(&m.text))
                .unwrap_or_default(),
            ai_name: settings.ai_name.clone(),
            ai_avatar_ref: settings.ai_avatar_ref.clone(),
            updated_at: Utc::now(),
        };

        // Content before index: an interruption leaves an orphan the
        // recovery scan can repair, never a dangling index entry.
        self.store.put_content(&session.id, &content).await?;
        self.store.put_index(&session).await?;

        self.install_context(session.clone(), content).await?;
        Ok(session)
    }

    /// Switch the current session: flush the outgoing autosave, cancel any
    /// in-flight turn, then load the incoming session.
    pub async fn switch_session(&self, id: &str) -> Result<Session> {
        let session = self
            .store
            .list_sessions()
            .await?
            .into_iter()
            .find(|s| s.id == id)
            .ok_or_else(|| ChatError::SessionNotFound(id.to_string()))?;

        let content = match self.store.get_content(id).await? {
            Some(content) => content,
            None => {
                // Dangling index entry (crash between delete steps); repair
                // with an empty payload so the session is usable again.
                tracing::warn!(id, "index entry had no content, repairing");
                let repaired = SessionContent::new(SessionSettings::default());
                self.store.put_content(id, &repaired).await?;
                repaired
            }
        };

        self.install_context(session.clone(), content).await?;
        Ok(session)
    }

    /// Tear down the outgoing context and install the new one. The load echo
    /// scheduled here is consumed by the one-cycle suppression, so freshly
    /// loaded data is not immediately re-saved.
    async fn install_context(&self, session: Session, content: SessionContent) -> Result<()> {
        {
            let mut active = self.active.lock().await;
            if let Some(outgoing) = active.take() {
                outgoing.cancel.cancel();
            }
            drop(active);
            self.autosaver.flush().await;
        }

        self.provider
            .initialize(&content.messages, &content.settings)
            .await
            .context("initialize chat provider")?;

        let mut active = self.active.lock().await;
        *active = Some(ChatContext {
            session: session.clone(),
            content: content.clone(),
            cancel: CancellationToken::new(),
        });
        drop(active);

        self.autosaver.suppress_next_cycle().await;
        self.autosaver.schedule(session, content).await;
        Ok(())
    }

    /// Current session and content, cloned for display.
    pub async fn current(&self) -> Option<(Session, SessionContent)> {
        let active = self.active.lock().await;
        active
            .as_ref()
            .map(|ctx| (ctx.session.clone(), ctx.content.clone()))
    }

    pub async fn list_sessions(&self) -> Result<Vec<Session>> {
        let mut sessions = self.store.list_sessions().await?;
        sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(sessions)
    }

    /// Send a user message and drive the model's streamed reply to a
    /// durable message. `on_update` fires on every received chunk.
    pub async fn send_message<F>(
        &self,
        text: &str,
        attachments: Vec<ImageAttachment>,
        on_update: F,
    ) -> Result<TurnOutcome>
    where
        F: FnMut(&Message) + Send,
    {
        if !self.provider.has_valid_api_key() {
            return Err(ChatError::MissingApiKey.into());
        }

        {
            let mut active = self.active.lock().await;
            let ctx = active
                .as_mut()
                .ok_or_else(|| ChatError::SessionNotFound("no active session".to_string()))?;
            let mut message = Message::new(MessageRole::User, text);
            message.images = attachments.clone();
            let first_user_message = !ctx
                .content
                .messages
                .iter()
                .any(|m| m.role == MessageRole::User);
            ctx.content.messages.push(message);
            if first_user_message {
                ctx.session.title = title_of(text);
            }
            Self::touch_index(ctx);
            self.autosaver
                .schedule(ctx.session.clone(), ctx.content.clone())
                .await;
        }

        self.run_turn(text.to_string(), attachments, on_update).await
    }

    /// Abort the in-flight response stream. The partial message is kept and
    /// marked not-thinking; this is a normal outcome, not an error.
    pub async fn stop_streaming(&self) {
        let active = self.active.lock().await;
        if let Some(ctx) = active.as_ref() {
            ctx.cancel.cancel();
        }
    }

    /// Regenerate the model reply `ai_message_id`: cancel any in-flight
    /// stream FIRST, then truncate history back to the preceding user
    /// message, then resend it.
    pub async fn regenerate<F>(&self, ai_message_id: &str, on_update: F) -> Result<TurnOutcome>
    where
        F: FnMut(&Message) + Send,
    {
        let (user_text, user_attachments) = {
            let mut active = self.active.lock().await;
            let ctx = active
                .as_mut()
                .ok_or_else(|| ChatError::SessionNotFound("no active session".to_string()))?;

            // Cancel before truncating; a late chunk from the old stream
            // must find a bumped epoch and be discarded.
            ctx.cancel.cancel();
            ctx.cancel = CancellationToken::new();
            self.epoch.fetch_add(1, Ordering::SeqCst);

            let ai_index = ctx
                .content
                .messages
                .iter()
                .position(|m| m.id == ai_message_id)
                .ok_or_else(|| ChatError::SessionNotFound(ai_message_id.to_string()))?;
            let user_index = ctx.content.messages[..ai_index]
                .iter()
                .rposition(|m| m.role == MessageRole::User)
                .ok_or_else(|| {
                    ChatError::Stream("no user message precedes the regenerated reply".to_string())
                })?;

            ctx.content.messages.truncate(ai_index);
            Self::touch_index(ctx);
            self.autosaver
                .schedule(ctx.session.clone(), ctx.content.clone())
                .await;

            let user = &ctx.content.messages[user_index];
            (user.text.clone(), user.images.clone())
        };

        self.run_turn(user_text, user_attachments, on_update).await
    }

    /// Replace a user message and replay from it: cancel, truncate through
    /// the edited message, resend the new text.
    pub async fn edit_message<F>(
        &self,
        user_message_id: &str,
        new_text: &str,
        on_update: F,
    ) -> Result<TurnOutcome>
    where
        F: FnMut(&Message) + Send,
    {
        {
            let mut active = self.active.lock().await;
            let ctx = active
                .as_mut()
                .ok_or_else(|| ChatError::SessionNotFound("no active session".to_string()))?;

            ctx.cancel.cancel();
            ctx.cancel = CancellationToken::new();
            self.epoch.fetch_add(1, Ordering::SeqCst);

            let user_index = ctx
                .content
                .messages
                .iter()
                .position(|m| m.id == user_message_id && m.role == MessageRole::User)
                .ok_or_else(|| ChatError::SessionNotFound(user_message_id.to_string()))?;
            ctx.content.messages.truncate(user_index);
        }

        self.send_message(new_text, Vec::new(), on_update).await
    }

    async fn run_turn<F>(
        &self,
        text: String,
        attachments: Vec<ImageAttachment>,
        on_update: F,
    ) -> Result<TurnOutcome>
    where
        F: FnMut(&Message) + Send,
    {
        if !self.provider.has_valid_api_key() {
            return Err(ChatError::MissingApiKey.into());
        }

        let (session_id, cancel, epoch) = {
            let active = self.active.lock().await;
            let ctx = active
                .as_ref()
                .ok_or_else(|| ChatError::SessionNotFound("no active session".to_string()))?;
            (
                ctx.session.id.clone(),
                ctx.cancel.clone(),
                self.epoch.load(Ordering::SeqCst),
            )
        };

        let stream = self.provider.send_message(&text, &attachments).await?;
        let draft = Message::new(MessageRole::Model, "");
        let outcome = drive_turn(stream, draft, cancel, on_update).await?;

        self.finalize_turn(&session_id, epoch, &outcome).await?;
        Ok(outcome)
    }

    /// Append a finished (or aborted, or parked) turn's message to its
    /// session. A stale epoch means the history was truncated while the
    /// turn was in flight, and the message is discarded.
    async fn finalize_turn(
        &self,
        session_id: &str,
        epoch: u64,
        outcome: &TurnOutcome,
    ) -> Result<()> {
        if self.epoch.load(Ordering::SeqCst) != epoch {
            tracing::debug!(session_id, "discarding turn finalized after truncation");
            return Ok(());
        }

        let still_active = {
            let mut active = self.active.lock().await;
            match active.as_mut() {
                Some(ctx) if ctx.session.id == session_id => {
                    ctx.content.messages.push(outcome.message.clone());
                    Self::touch_index(ctx);
                    Some((ctx.session.clone(), ctx.content.clone()))
                }
                _ => None,
            }
        };

        if let Some((session, content)) = still_active {
            self.autosaver.schedule(session, content).await;
            return Ok(());
        }

        // The user switched away mid-turn; persist the message into its own
        // session, never into the now-active one.
        let Some(mut content) = self.store.get_content(session_id).await? else {
            tracing::warn!(session_id, "turn outlived its session, dropping message");
            return Ok(());
        };
        content.messages.push(outcome.message.clone());
        self.store.put_content(session_id, &content).await?;
        if let Some(mut session) = self
            .store
            .list_sessions()
            .await?
            .into_iter()
            .find(|s| s.id == session_id)
        {
            session.preview = content
                .last_message()
                .map(|m| preview_of(&m.text))
                .unwrap_or_default();
            session.updated_at = Utc::now();
            self.store.put_index(&session).await?;
        }
        Ok(())
    }

    /// Duplicate a session. Content copies before the index entry so an
    /// interruption leaves an orphan, not a dangling index entry.
    pub async fn duplicate_session(&self, id: &str) -> Result<Session> {
        let content = self
            .store
            .get_content(id)
            .await?
            .ok_or_else(|| ChatError::SessionNotFound(id.to_string()))?;
        let source = self
            .store
            .list_sessions()
            .await?
            .into_iter()
            .find(|s| s.id == id)
            .ok_or_else(|| ChatError::SessionNotFound(id.to_string()))?;

        let duplicate = Session {
            id: new_session_id(),
            title: format!("{} (copy)", source.title),
            preview: source.preview.clone(),
            ai_name: source.ai_name.clone(),
            ai_avatar_ref: source.ai_avatar_ref.clone(),
            updated_at: Utc::now(),
        };
        self.store.put_content(&duplicate.id, &content).await?;
        self.store.put_index(&duplicate).await?;
        Ok(duplicate)
    }

    /// Delete a session; tears down the active context when it is the one
    /// being deleted.
    pub async fn delete_session(&self, id: &str) -> Result<bool> {
        {
            let mut active = self.active.lock().await;
            if active.as_ref().is_some_and(|ctx| ctx.session.id == id) {
                if let Some(ctx) = active.take() {
                    ctx.cancel.cancel();
                }
                self.epoch.fetch_add(1, Ordering::SeqCst);
                self.autosaver.cancel_pending().await;
            }
        }
        self.store.delete_session(id).await
    }

    /// Teardown: persist anything pending.
    pub async fn flush(&self) {
        self.autosaver.flush().await;
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    #[cfg(test)]
    pub(crate) fn autosaver(&self) -> &Autosaver {
        &self.autosaver
    }

    fn touch_index(ctx: &mut ChatContext) {
        ctx.session.preview = ctx
            .content
            .last_message()
            .map(|m| preview_of(&m.text))
            .unwrap_or_default();
        ctx.session.updated_at = Utc::now();
    }
}

fn title_of(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= TITLE_MAX_CHARS {
        return trimmed.to_string();
    }
    let truncated: String = trimmed.chars().take(TITLE_MAX_CHARS).collect();
    format!("{truncated}…")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::{ChatChunk, ChunkStream, TurnState};
    use crate::store::SqliteSessionStore;
    use sqlx::sqlite::SqlitePoolOptions;
    use std::collections::VecDeque;
    use std::future::Future;
    use std::pin::Pin;
    use tokio::sync::mpsc;
    use tokio_stream::wrappers::ReceiverStream;

    /// Scripted collaborator: hands out pre-built chunk streams in order.
    struct ScriptedProvider {
        has_key: bool,
        streams: std::sync::Mutex<VecDeque<ChunkStream>>,
        sent: std::sync::Mutex<Vec<String>>,
    }

    impl ScriptedProvider {
        fn new() -> Self {
            Self {
                has_key: true,
                streams: std::sync::Mutex::new(VecDeque::new()),
                sent: std::sync::Mutex::new(Vec::new()),
            }
        }

        fn push_reply(&self, parts: &[&str]) {
            let chunks: Vec<anyhow::Result<ChatChunk>> = parts
                .iter()
                .map(|part| Ok(ChatChunk::Text((*part).to_string())))
                .collect();
            self.streams
                .lock()
                .unwrap()
                .push_back(Box::pin(futures_util::stream::iter(chunks)));
        }

        fn push_channel_reply(&self) -> mpsc::Sender<anyhow::Result<ChatChunk>> {
            let (tx, rx) = mpsc::channel(8);
            self.streams
                .lock()
                .unwrap()
                .push_back(Box::pin(ReceiverStream::new(rx)));
            tx
        }

        fn sent_texts(&self) -> Vec<String> {
            self.sent.lock().unwrap().clone()
        }
    }

    impl ChatProvider for ScriptedProvider {
        fn has_valid_api_key(&self) -> bool {
            self.has_key
        }

        fn initialize<'a>(
            &'a self,
            _history: &'a [Message],
            _settings: &'a SessionSettings,
        ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
            Box::pin(async { Ok(()) })
        }

        fn send_message<'a>(
            &'a self,
            text: &'a str,
            _attachments: &'a [ImageAttachment],
        ) -> Pin<Box<dyn Future<Output = Result<ChunkStream>> + Send + 'a>> {
            Box::pin(async move {
                self.sent.lock().unwrap().push(text.to_string());
                self.streams
                    .lock()
                    .unwrap()
                    .pop_front()
                    .ok_or_else(|| anyhow::anyhow!("no scripted reply left"))
            })
        }
    }

    async fn manager_with(provider: Arc<ScriptedProvider>) -> (Arc<SessionManager>, Arc<dyn SessionStore>) {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let store: Arc<dyn SessionStore> =
            Arc::new(SqliteSessionStore::new(pool).await.unwrap());
        let manager = Arc::new(SessionManager::new(
            Arc::clone(&store),
            provider,
            Duration::from_millis(1000),
        ));
        (manager, store)
    }

    #[tokio::test]
    async fn create_session_is_durable_before_any_message() {
        let provider = Arc::new(ScriptedProvider::new());
        let (manager, store) = manager_with(provider).await;

        let session = manager.create_session(false).await.unwrap();

        let listed = store.list_sessions().await.unwrap();
        assert_eq!(listed.len(), 1);
        let content = store.get_content(&session.id).await.unwrap().unwrap();
        // Welcome message seeded by the default settings.
        assert_eq!(content.messages.len(), 1);
        assert_eq!(content.messages[0].role, MessageRole::Model);
    }

    #[tokio::test]
    async fn bootstrap_creates_first_session_then_reopens_most_recent() {
        let provider = Arc::new(ScriptedProvider::new());
        let (manager, _store) = manager_with(provider.clone()).await;

        let first = manager.bootstrap().await.unwrap();
        // Keep the two creation timestamps distinct at millisecond grain.
        tokio::time::sleep(Duration::from_millis(5)).await;
        let second = manager.create_session(false).await.unwrap();

        let reopened = manager.bootstrap().await.unwrap();
        assert_eq!(reopened.id, second.id);
        assert_ne!(first.id, second.id);
    }

    #[tokio::test]
    async fn carry_over_preserves_preferences_only() {
        let provider = Arc::new(ScriptedProvider::new());
        let (manager, store) = manager_with(provider).await;

        let first = manager.create_session(false).await.unwrap();
        {
            // Customize the active session's settings directly in the store
            // and reload, as a settings screen would.
            let mut content = store.get_content(&first.id).await.unwrap().unwrap();
            content.settings.model = "gemini-2.5-pro".into();
            content.settings.ai_name = "Custom Persona".into();
            store.put_content(&first.id, &content).await.unwrap();
        }
        manager.switch_session(&first.id).await.unwrap();

        let second = manager.create_session(true).await.unwrap();
        let content = store.get_content(&second.id).await.unwrap().unwrap();
        assert_eq!(content.settings.model, "gemini-2.5-pro");
        assert_eq!(content.settings.ai_name, SessionSettings::default().ai_name);
    }

    #[tokio::test]
    async fn send_message_persists_user_and_model_messages() {
        let provider = Arc::new(ScriptedProvider::new());
        provider.push_reply(&["Hel", "lo"]);
        let (manager, _store) = manager_with(provider.clone()).await;
        manager.create_session(false).await.unwrap();

        let outcome = manager.send_message("Hi", Vec::new(), |_| {}).await.unwrap();
        assert_eq!(outcome.state, TurnState::Done);
        assert_eq!(outcome.message.text, "Hello");

        let (session, content) = manager.current().await.unwrap();
        // welcome + user + model
        assert_eq!(content.messages.len(), 3);
        assert_eq!(content.messages[1].text, "Hi");
        assert_eq!(content.messages[2].text, "Hello");
        assert_eq!(session.preview, "Hello");
        assert_eq!(session.title, "Hi");
    }

    #[tokio::test]
    async fn send_message_without_api_key_is_rejected() {
        let mut provider = ScriptedProvider::new();
        provider.has_key = false;
        let provider = Arc::new(provider);
        let (manager, _store) = manager_with(provider).await;
        manager.create_session(false).await.unwrap();

        let error = manager
            .send_message("Hi", Vec::new(), |_| {})
            .await
            .unwrap_err();
        assert!(error.to_string().contains("no API credential"));
    }

    #[tokio::test]
    async fn abort_mid_stream_then_regenerate_truncates_history() {
        let provider = Arc::new(ScriptedProvider::new());
        let (manager, _store) = manager_with(provider.clone()).await;
        manager.create_session(false).await.unwrap();

        // Streamed reply "Hello!" in three chunks, aborted after two.
        let tx = provider.push_channel_reply();
        let (update_tx, mut update_rx) = mpsc::unbounded_channel();
        let driver = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move {
                manager
                    .send_message("Hi", Vec::new(), move |draft: &Message| {
                        let _ = update_tx.send(draft.text.clone());
                    })
                    .await
            })
        };

        tx.send(Ok(ChatChunk::Text("He".into()))).await.unwrap();
        tx.send(Ok(ChatChunk::Text("llo".into()))).await.unwrap();
        assert_eq!(update_rx.recv().await.unwrap(), "He");
        assert_eq!(update_rx.recv().await.unwrap(), "Hello");
        manager.stop_streaming().await;
        let _ = tx.send(Ok(ChatChunk::Text("!".into()))).await;

        let outcome = driver.await.unwrap().unwrap();
        assert_eq!(outcome.state, TurnState::Aborted);

        let (_, content) = manager.current().await.unwrap();
        let aborted = content.messages.last().unwrap();
        assert_eq!(aborted.text, "Hello");
        assert!(!aborted.is_thinking);
        let aborted_id = aborted.id.clone();

        // Regenerate on the aborted reply: history truncates to the user
        // message before it resends.
        provider.push_reply(&["Hello again"]);
        let outcome = manager.regenerate(&aborted_id, |_| {}).await.unwrap();
        assert_eq!(outcome.state, TurnState::Done);

        let (_, content) = manager.current().await.unwrap();
        let texts: Vec<&str> = content.messages.iter().map(|m| m.text.as_str()).collect();
        // welcome + "Hi" + regenerated reply; "Hello" is gone.
        assert_eq!(texts.len(), 3);
        assert_eq!(texts[1], "Hi");
        assert_eq!(texts[2], "Hello again");
        assert_eq!(provider.sent_texts(), vec!["Hi", "Hi"]);
    }

    #[tokio::test]
    async fn edit_message_truncates_and_resends_new_text() {
        let provider = Arc::new(ScriptedProvider::new());
        provider.push_reply(&["first reply"]);
        provider.push_reply(&["second reply"]);
        let (manager, _store) = manager_with(provider.clone()).await;
        manager.create_session(false).await.unwrap();

        manager.send_message("Hi", Vec::new(), |_| {}).await.unwrap();
        let (_, content) = manager.current().await.unwrap();
        let user_id = content.messages[1].id.clone();

        manager
            .edit_message(&user_id, "Hi there", |_| {})
            .await
            .unwrap();

        let (_, content) = manager.current().await.unwrap();
        let texts: Vec<&str> = content.messages.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts.len(), 3);
        assert_eq!(texts[1], "Hi there");
        assert_eq!(texts[2], "second reply");
    }

    #[tokio::test]
    async fn switching_sessions_never_bleeds_content_across() {
        let provider = Arc::new(ScriptedProvider::new());
        provider.push_reply(&["reply A"]);
        provider.push_reply(&["reply B"]);
        let (manager, store) = manager_with(provider.clone()).await;

        let a = manager.create_session(false).await.unwrap();
        manager
            .send_message("message for A", Vec::new(), |_| {})
            .await
            .unwrap();

        let b = manager.create_session(false).await.unwrap();
        manager
            .send_message("message for B", Vec::new(), |_| {})
            .await
            .unwrap();
        manager.flush().await;

        let content_a = store.get_content(&a.id).await.unwrap().unwrap();
        let content_b = store.get_content(&b.id).await.unwrap().unwrap();
        assert!(content_a.messages.iter().any(|m| m.text == "message for A"));
        assert!(content_a.messages.iter().all(|m| m.text != "message for B"));
        assert!(content_b.messages.iter().any(|m| m.text == "message for B"));
        assert!(content_b.messages.iter().all(|m| m.text != "message for A"));
    }

    #[tokio::test]
    async fn switch_flushes_pending_autosave_of_outgoing_session() {
        let provider = Arc::new(ScriptedProvider::new());
        provider.push_reply(&["reply"]);
        let (manager, store) = manager_with(provider.clone()).await;

        let a = manager.create_session(false).await.unwrap();
        manager
            .send_message("unsaved draft", Vec::new(), |_| {})
            .await
            .unwrap();
        assert!(manager.autosaver().has_pending().await);

        manager.create_session(false).await.unwrap();

        // The pending write landed before the switch completed.
        let content_a = store.get_content(&a.id).await.unwrap().unwrap();
        assert!(content_a.messages.iter().any(|m| m.text == "unsaved draft"));
    }

    #[tokio::test]
    async fn duplicate_session_copies_content_under_new_id() {
        let provider = Arc::new(ScriptedProvider::new());
        provider.push_reply(&["reply"]);
        let (manager, store) = manager_with(provider.clone()).await;
        let original = manager.create_session(false).await.unwrap();
        manager.send_message("Hi", Vec::new(), |_| {}).await.unwrap();
        manager.flush().await;

        let copy = manager.duplicate_session(&original.id).await.unwrap();
        assert_ne!(copy.id, original.id);
        assert!(copy.title.ends_with("(copy)"));

        let copied = store.get_content(&copy.id).await.unwrap().unwrap();
        let source = store.get_content(&original.id).await.unwrap().unwrap();
        assert_eq!(copied.messages.len(), source.messages.len());
    }

    #[tokio::test]
    async fn delete_active_session_tears_down_context() {
        let provider = Arc::new(ScriptedProvider::new());
        let (manager, store) = manager_with(provider).await;
        let session = manager.create_session(false).await.unwrap();

        assert!(manager.delete_session(&session.id).await.unwrap());
        assert!(manager.current().await.is_none());
        assert!(store.get_content(&session.id).await.unwrap().is_none());
        assert!(store.list_sessions().await.unwrap().is_empty());
    }
}
