use crate::session::types::{Session, SessionContent};
use crate::store::SessionStore;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Debounced autosave: rapid successive mutations collapse into one write
/// carrying the last content. Every scheduled save is cancelable, so a
/// session switch or app teardown can never write into the wrong session.
pub struct Autosaver {
    store: Arc<dyn SessionStore>,
    debounce: Duration,
    state: Mutex<AutosaveState>,
    /// Latest payload wins; the timer task reads this slot at fire time.
    latest: Arc<Mutex<Option<(Session, SessionContent)>>>,
    saves_completed: Arc<AtomicUsize>,
}

struct AutosaveState {
    pending: Option<PendingSave>,
    suppress_next: bool,
}

struct PendingSave {
    cancel: CancellationToken,
}

impl Autosaver {
    pub fn new(store: Arc<dyn SessionStore>, debounce: Duration) -> Self {
        Self {
            store,
            debounce,
            state: Mutex::new(AutosaveState {
                pending: None,
                suppress_next: false,
            }),
            latest: Arc::new(Mutex::new(None)),
            saves_completed: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Skip exactly one upcoming `schedule` call. Armed right after a
    /// session load, so the load echo does not re-save data that was just
    /// read from the store.
    pub async fn suppress_next_cycle(&self) {
        self.state.lock().await.suppress_next = true;
    }

    /// Record the latest payload and (re)start the debounce timer.
    pub async fn schedule(&self, session: Session, content: SessionContent) {
        let mut state = self.state.lock().await;
        if state.suppress_next {
            state.suppress_next = false;
            return;
        }
        if let Some(previous) = state.pending.take() {
            previous.cancel.cancel();
        }

        *self.latest.lock().await = Some((session, content));

        let cancel = CancellationToken::new();
        let timer_cancel = cancel.clone();
        let store = Arc::clone(&self.store);
        let latest = Arc::clone(&self.latest);
        let counter = Arc::clone(&self.saves_completed);
        let debounce = self.debounce;
        tokio::spawn(async move {
            tokio::select! {
                () = timer_cancel.cancelled() => {}
                () = tokio::time::sleep(debounce) => {
                    write_latest(&store, &latest, &counter).await;
                }
            }
        });
        state.pending = Some(PendingSave { cancel });
    }

    /// Cancel any pending timer and persist the latest payload immediately.
    pub async fn flush(&self) {
        let mut state = self.state.lock().await;
        if let Some(pending) = state.pending.take() {
            pending.cancel.cancel();
        }
        drop(state);
        write_latest(&self.store, &self.latest, &self.saves_completed).await;
    }

    /// Drop any pending save without writing. Teardown path.
    pub async fn cancel_pending(&self) {
        let mut state = self.state.lock().await;
        if let Some(pending) = state.pending.take() {
            pending.cancel.cancel();
        }
        *self.latest.lock().await = None;
    }

    pub async fn has_pending(&self) -> bool {
        self.state.lock().await.pending.is_some()
    }

    #[cfg(test)]
    pub(crate) fn saves_completed(&self) -> usize {
        self.saves_completed.load(Ordering::SeqCst)
    }
}

async fn write_latest(
    store: &Arc<dyn SessionStore>,
    latest: &Arc<Mutex<Option<(Session, SessionContent)>>>,
    counter: &Arc<AtomicUsize>,
) {
    let payload = latest.lock().await.take();
    let Some((session, content)) = payload else {
        return;
    };
    if let Err(error) = store.put_content(&session.id, &content).await {
        tracing::warn!(session_id = %session.id, %error, "autosave content write failed");
        return;
    }
    if let Err(error) = store.put_index(&session).await {
        tracing::warn!(session_id = %session.id, %error, "autosave index write failed");
        return;
    }
    counter.fetch_add(1, Ordering::SeqCst);
    tracing::debug!(session_id = %session.id, "autosaved session");
}
