//! Sync orchestrator: decides, from local last-modified time and the cloud
//! snapshot's timestamp, whether to push, pull, or do nothing, and drives
//! the full reconcile cycle end-to-end.
//!
//! Whole-snapshot, timestamp-only conflict resolution: no per-session
//! merge. Two devices editing inside the same window lose the older edit
//! silently; that is the accepted cost of a single-blob store.

use crate::cloud::{BlobStore, TokenManager};
use crate::error::SyncError;
use crate::snapshot::{self, Snapshot};
use crate::store::{ProgressFn, SessionStore};
use anyhow::{Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use std::sync::Arc;
use std::time::Duration;

/// What a reconcile cycle did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum SyncOutcome {
    Uploaded,
    Downloaded,
    Synced,
}

#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Fixed logical path of the snapshot blob.
    pub snapshot_path: String,
    /// Advisory lock marker path. Written best-effort around a transfer,
    /// never polled or enforced; staleness must not block sync.
    pub lock_path: String,
    /// Comparison tolerance absorbing clock-resolution noise. The 1 s
    /// default is a heuristic, so it stays configurable.
    pub tolerance: Duration,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            snapshot_path: "/driftvault/backup.json".to_string(),
            lock_path: "/driftvault/sync.lock".to_string(),
            tolerance: Duration::from_secs(1),
        }
    }
}

pub struct SyncOrchestrator {
    store: Arc<dyn SessionStore>,
    blob: Arc<dyn BlobStore>,
    options: SyncOptions,
    /// When present, the credential is re-persisted after a destructive
    /// restore clears the config collection.
    tokens: Option<Arc<TokenManager>>,
}

impl SyncOrchestrator {
    pub fn new(store: Arc<dyn SessionStore>, blob: Arc<dyn BlobStore>, options: SyncOptions) -> Self {
        Self {
            store,
            blob,
            options,
            tokens: None,
        }
    }

    pub fn with_token_manager(mut self, tokens: Arc<TokenManager>) -> Self {
        self.tokens = Some(tokens);
        self
    }

    /// One full reconcile cycle.
    ///
    /// A `Downloaded` result means the local store was destructively
    /// replaced: the caller must treat all in-memory state as stale and
    /// reload; nothing is patched in place.
    pub async fn sync(&self) -> Result<SyncOutcome> {
        let metadata = self
            .blob
            .get_metadata(&self.options.snapshot_path)
            .await
            .context("fetch cloud snapshot metadata")?;

        let Some(metadata) = metadata else {
            // First-ever sync: nothing in the cloud yet.
            self.push_local().await?;
            return Ok(SyncOutcome::Uploaded);
        };

        let local_last = self.local_last_update().await?;

        let Some(bytes) = self
            .blob
            .download(&self.options.snapshot_path)
            .await
            .context("download cloud snapshot")?
        else {
            // Metadata said the file exists but the download came back
            // empty (transient provider inconsistency). Upload rather than
            // error out.
            tracing::warn!("cloud metadata present but download empty, uploading local state");
            self.push_local().await?;
            return Ok(SyncOutcome::Uploaded);
        };

        let text = String::from_utf8_lossy(&bytes);
        let cloud_snapshot = snapshot::parse(&text).map_err(SyncError::CloudSnapshot)?;
        // Prefer the snapshot's own timestamp; older codec versions did not
        // write one, so fall back to the blob's modification time.
        let cloud_timestamp = cloud_snapshot.timestamp.unwrap_or(metadata.modified_at);

        let tolerance = chrono::Duration::from_std(self.options.tolerance)
            .unwrap_or_else(|_| chrono::Duration::seconds(1));

        if cloud_timestamp - local_last > tolerance {
            self.pull(&cloud_snapshot).await?;
            Ok(SyncOutcome::Downloaded)
        } else if local_last - cloud_timestamp > tolerance {
            self.push_local().await?;
            Ok(SyncOutcome::Uploaded)
        } else {
            tracing::debug!("local and cloud within tolerance, nothing to transfer");
            Ok(SyncOutcome::Synced)
        }
    }

    /// Background variant: failures are logged, never surfaced into the
    /// user's active conversation.
    pub async fn sync_quiet(&self) -> Option<SyncOutcome> {
        match self.sync().await {
            Ok(outcome) => Some(outcome),
            Err(error) => {
                tracing::warn!(%error, "background sync failed");
                None
            }
        }
    }

    /// Max `updated_at` over local sessions; epoch zero when there are none.
    async fn local_last_update(&self) -> Result<DateTime<Utc>> {
        let sessions = self.store.list_sessions().await?;
        Ok(sessions
            .iter()
            .map(|session| session.updated_at)
            .max()
            .unwrap_or_else(|| Utc.timestamp_millis_opt(0).unwrap()))
    }

    async fn push_local(&self) -> Result<()> {
        let local = self
            .store
            .export_snapshot()
            .await
            .map_err(|error| SyncError::Export(error.to_string()))?;
        let payload = snapshot::to_json(&local).into_bytes();

        self.write_lock_marker().await;
        let result = self
            .blob
            .upload(&self.options.snapshot_path, payload)
            .await
            .context("upload local snapshot");
        self.clear_lock_marker().await;
        result?;

        tracing::info!(
            sessions = local.sessions.len(),
            path = %self.options.snapshot_path,
            "uploaded local snapshot"
        );
        Ok(())
    }

    async fn pull(&self, cloud_snapshot: &Snapshot) -> Result<()> {
        self.write_lock_marker().await;
        let progress: ProgressFn = Box::new(|phase, batch| {
            tracing::debug!(?phase, batch, "restore progress");
        });
        let result = self
            .store
            .restore_snapshot(cloud_snapshot, Some(progress))
            .await
            .map_err(|error| SyncError::Restore(error.to_string()));
        self.clear_lock_marker().await;
        result?;

        // The restore cleared the config collection along with everything
        // else; put the live credential back so sync stays connected.
        if let Some(tokens) = &self.tokens {
            tokens.persist().await;
        }

        tracing::info!(
            sessions = cloud_snapshot.sessions.len(),
            "replaced local store from cloud snapshot"
        );
        Ok(())
    }

    async fn write_lock_marker(&self) {
        let marker = serde_json::json!({
            "owner": "driftvault",
            "startedAt": Utc::now().timestamp_millis(),
        });
        if let Err(error) = self
            .blob
            .upload(&self.options.lock_path, marker.to_string().into_bytes())
            .await
        {
            tracing::debug!(%error, "advisory lock marker write failed, continuing");
        }
    }

    async fn clear_lock_marker(&self) {
        if let Err(error) = self.blob.delete(&self.options.lock_path).await {
            tracing::debug!(%error, "advisory lock marker delete failed, continuing");
        }
    }
}
