use super::{CONTENT_BATCH_SIZE, INDEX_BATCH_SIZE, ProgressFn, RestorePhase, SessionStore};
use crate::error::StoreError;
use crate::session::types::{Session, SessionContent, flex_timestamp, preview_of};
use crate::snapshot::{self, Snapshot, SnapshotContentItem};
use anyhow::{Context, Result};
use arc_swap::ArcSwap;
use chrono::Utc;
use sqlx::Row;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use std::collections::HashSet;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

const SCHEMA_META_TABLE: &str = "
CREATE TABLE IF NOT EXISTS schema_meta (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
)";
const SCHEMA_VERSION_KEY: &str = "schema_version";
const SCHEMA_VERSION: u32 = 1;

/// Store-open is transient-failure-prone (another process mid-upgrade,
/// quota negotiation) but not reliably recoverable beyond a few attempts.
const OPEN_ATTEMPTS: u32 = 3;
const OPEN_RETRY_DELAY: Duration = Duration::from_millis(500);

/// SQLite-backed store for the three collections, using a sqlx async pool.
pub struct SqliteSessionStore {
    pool: ArcSwap<SqlitePool>,
    /// Present for file-backed stores; enables transparent reopen when the
    /// pooled handle is externally closed. In-memory stores cannot reopen.
    path: Option<PathBuf>,
}

async fn ensure_schema_version(pool: &SqlitePool) -> Result<()> {
    sqlx::query(SCHEMA_META_TABLE)
        .execute(pool)
        .await
        .context("create schema_meta table")?;

    let stored_version: Option<(String,)> =
        sqlx::query_as("SELECT value FROM schema_meta WHERE key = $1")
            .bind(SCHEMA_VERSION_KEY)
            .fetch_optional(pool)
            .await
            .context("load schema version")?;

    if let Some((value,)) = stored_version {
        let parsed = value
            .parse::<u32>()
            .with_context(|| format!("invalid schema version value: {value}"))?;
        // Migration is additive only: an older on-disk version gets new
        // collections created below; a newer one means a newer binary wrote
        // this store and we must not touch it.
        anyhow::ensure!(
            parsed <= SCHEMA_VERSION,
            StoreError::Migration(format!(
                "store schema version {parsed} is newer than supported {SCHEMA_VERSION}"
            ))
        );
        if parsed == SCHEMA_VERSION {
            return Ok(());
        }
    }

    sqlx::query(
        "INSERT INTO schema_meta (key, value) VALUES ($1, $2)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
    )
    .bind(SCHEMA_VERSION_KEY)
    .bind(SCHEMA_VERSION.to_string())
    .execute(pool)
    .await
    .context("persist schema version")?;

    Ok(())
}

async fn create_collections(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS sessions (
             id TEXT PRIMARY KEY,
             title TEXT NOT NULL,
             preview TEXT NOT NULL DEFAULT '',
             ai_name TEXT NOT NULL,
             ai_avatar_ref TEXT,
             updated_at INTEGER NOT NULL
         )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS session_content (
             id TEXT PRIMARY KEY,
             content TEXT NOT NULL
         )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS app_config (
             key TEXT PRIMARY KEY,
             value TEXT NOT NULL
         )",
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn open_pool(path: &Path) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await?;
    Ok(pool)
}

async fn open_pool_with_retry(path: &Path) -> Result<SqlitePool> {
    let mut last_error = None;
    for attempt in 1..=OPEN_ATTEMPTS {
        match open_pool(path).await {
            Ok(pool) => return Ok(pool),
            Err(error) => {
                tracing::warn!(attempt, %error, "store open failed, retrying");
                last_error = Some(error);
                if attempt < OPEN_ATTEMPTS {
                    tokio::time::sleep(OPEN_RETRY_DELAY).await;
                }
            }
        }
    }
    Err(StoreError::Open {
        attempts: OPEN_ATTEMPTS,
        message: last_error
            .map(|error| error.to_string())
            .unwrap_or_else(|| "unknown".to_string()),
    }
    .into())
}

impl SqliteSessionStore {
    /// Wrap an existing pool and run migrations. Used by tests and by
    /// callers that manage their own pool lifecycle.
    pub async fn new(pool: SqlitePool) -> Result<Self> {
        ensure_schema_version(&pool).await?;
        create_collections(&pool).await?;
        Ok(Self {
            pool: ArcSwap::from_pointee(pool),
            path: None,
        })
    }

    /// Open (or create) the store at `path`, retrying a bounded number of
    /// times with fixed backoff before surfacing as fatal.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("create store directory {}", parent.display()))?;
        }
        let pool = open_pool_with_retry(&path).await?;
        ensure_schema_version(&pool).await?;
        create_collections(&pool).await?;
        Ok(Self {
            pool: ArcSwap::from_pointee(pool),
            path: Some(path),
        })
    }

    /// Current pool, transparently reopened if the previous handle was
    /// closed out from under us. A closed in-memory store is unrecoverable.
    async fn acquire(&self) -> Result<SqlitePool> {
        let current = self.pool.load_full();
        if !current.is_closed() {
            return Ok((*current).clone());
        }
        let Some(path) = &self.path else {
            anyhow::bail!(StoreError::Open {
                attempts: 0,
                message: "in-memory store handle closed".to_string(),
            });
        };
        tracing::info!(path = %path.display(), "store handle invalidated, reopening");
        let fresh = open_pool_with_retry(path).await?;
        ensure_schema_version(&fresh).await?;
        create_collections(&fresh).await?;
        self.pool.store(Arc::new(fresh.clone()));
        Ok(fresh)
    }

    /// Access the underlying pool.
    pub fn pool(&self) -> SqlitePool {
        (*self.pool.load_full()).clone()
    }
}

fn decode_updated_at(row: &SqliteRow) -> Result<chrono::DateTime<Utc>> {
    // Column affinity is INTEGER, but rows written by older exports can
    // carry string timestamps. Coerce rather than reject.
    if let Ok(millis) = row.try_get::<i64, _>("updated_at") {
        return flex_timestamp::coerce(&serde_json::Value::from(millis))
            .map_err(anyhow::Error::msg);
    }
    let raw: String = row.try_get("updated_at")?;
    flex_timestamp::coerce(&serde_json::Value::from(raw)).map_err(anyhow::Error::msg)
}

fn map_session_row(row: &SqliteRow) -> Result<Session> {
    Ok(Session {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        preview: row.try_get("preview")?,
        ai_name: row.try_get("ai_name")?,
        ai_avatar_ref: row.try_get("ai_avatar_ref")?,
        updated_at: decode_updated_at(row)?,
    })
}

fn decode_content(id: &str, raw: &str) -> Result<SessionContent> {
    let mut content: SessionContent =
        serde_json::from_str(raw).map_err(|error| StoreError::CorruptRecord {
            id: id.to_string(),
            message: error.to_string(),
        })?;
    // In-flight markers must not survive a reload.
    content.sanitize();
    Ok(content)
}

fn encode_content(content: &SessionContent) -> Result<String> {
    let mut sanitized = content.clone();
    sanitized.sanitize();
    serde_json::to_string(&sanitized).context("serialize session content")
}

async fn upsert_sessions(pool: &SqlitePool, items: &[Session]) -> Result<()> {
    for session in items {
        sqlx::query(
            "INSERT INTO sessions (id, title, preview, ai_name, ai_avatar_ref, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6)
             ON CONFLICT(id) DO UPDATE SET
                 title = excluded.title,
                 preview = excluded.preview,
                 ai_name = excluded.ai_name,
                 ai_avatar_ref = excluded.ai_avatar_ref,
                 updated_at = excluded.updated_at",
        )
        .bind(&session.id)
        .bind(&session.title)
        .bind(&session.preview)
        .bind(&session.ai_name)
        .bind(&session.ai_avatar_ref)
        .bind(session.updated_at.timestamp_millis())
        .execute(pool)
        .await?;
    }
    Ok(())
}

async fn upsert_content(pool: &SqlitePool, id: &str, content: &SessionContent) -> Result<()> {
    let encoded = encode_content(content)?;
    sqlx::query(
        "INSERT INTO session_content (id, content) VALUES ($1, $2)
         ON CONFLICT(id) DO UPDATE SET content = excluded.content",
    )
    .bind(id)
    .bind(&encoded)
    .execute(pool)
    .await?;
    Ok(())
}

/// Batched insert with a cooperative yield between batches, so restoring
/// thousands of records never blocks the runtime for an unbounded stretch.
async fn load_sessions_batched(
    pool: &SqlitePool,
    items: &[Session],
    mut on_batch: impl FnMut(usize),
) -> Result<()> {
    for (index, batch) in items.chunks(INDEX_BATCH_SIZE).enumerate() {
        upsert_sessions(pool, batch).await?;
        on_batch(index);
        tokio::task::yield_now().await;
    }
    Ok(())
}

async fn load_content_batched(
    pool: &SqlitePool,
    items: &[SnapshotContentItem],
    mut on_batch: impl FnMut(usize),
) -> Result<()> {
    for (index, batch) in items.chunks(CONTENT_BATCH_SIZE).enumerate() {
        for item in batch {
            upsert_content(pool, &item.id, &item.content).await?;
        }
        on_batch(index);
        tokio::task::yield_now().await;
    }
    Ok(())
}

/// Reconstruct a plausible index entry for an orphaned content record.
fn index_entry_from_content(id: &str, content: &SessionContent) -> Session {
    let last = content.last_message();
    Session {
        id: id.to_string(),
        title: format!("Chat with {}", content.settings.ai_name),
        preview: last.map(|message| preview_of(&message.text)).unwrap_or_default(),
        ai_name: content.settings.ai_name.clone(),
        ai_avatar_ref: content.settings.ai_avatar_ref.clone(),
        updated_at: last.map_or_else(Utc::now, |message| message.timestamp),
    }
}

impl SessionStore for SqliteSessionStore {
    fn list_sessions(&self) -> Pin<Box<dyn Future<Output = Result<Vec<Session>>> + Send + '_>> {
        Box::pin(async move {
            let pool = self.acquire().await?;
            let rows = sqlx::query(
                "SELECT id, title, preview, ai_name, ai_avatar_ref, updated_at FROM sessions",
            )
            .fetch_all(&pool)
            .await
            .context("list sessions")?;
            rows.iter().map(map_session_row).collect()
        })
    }

    fn get_content<'a>(
        &'a self,
        id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<SessionContent>>> + Send + 'a>> {
        Box::pin(async move {
            let pool = self.acquire().await?;
            let row = sqlx::query("SELECT content FROM session_content WHERE id = $1")
                .bind(id)
                .fetch_optional(&pool)
                .await
                .context("query session content")?;
            match row {
                Some(row) => {
                    let raw: String = row.try_get("content")?;
                    Ok(Some(decode_content(id, &raw)?))
                }
                None => Ok(None),
            }
        })
    }

    fn put_index<'a>(
        &'a self,
        session: &'a Session,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            let pool = self.acquire().await?;
            upsert_sessions(&pool, std::slice::from_ref(session)).await
        })
    }

    fn put_content<'a>(
        &'a self,
        id: &'a str,
        content: &'a SessionContent,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            let pool = self.acquire().await?;
            upsert_content(&pool, id, content).await
        })
    }

    fn delete_session<'a>(
        &'a self,
        id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<bool>> + Send + 'a>> {
        Box::pin(async move {
            let pool = self.acquire().await?;
            // Index first: a crash between the two statements leaves an
            // orphan, which the recovery scan resurrects losslessly. The
            // reverse order would strand a dangling index entry.
            let index_result = sqlx::query("DELETE FROM sessions WHERE id = $1")
                .bind(id)
                .execute(&pool)
                .await?;
            let content_result = sqlx::query("DELETE FROM session_content WHERE id = $1")
                .bind(id)
                .execute(&pool)
                .await?;
            Ok(index_result.rows_affected() > 0 || content_result.rows_affected() > 0)
        })
    }

    fn bulk_load_sessions<'a>(
        &'a self,
        items: &'a [Session],
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            let pool = self.acquire().await?;
            load_sessions_batched(&pool, items, |_| {}).await
        })
    }

    fn bulk_load_content<'a>(
        &'a self,
        items: &'a [SnapshotContentItem],
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            let pool = self.acquire().await?;
            load_content_batched(&pool, items, |_| {}).await
        })
    }

    fn recover_orphans(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Session>>> + Send + '_>> {
        Box::pin(async move {
            let pool = self.acquire().await?;

            // Key-only scans keep this memory-bounded on large histories.
            let content_ids: Vec<(String,)> =
                sqlx::query_as("SELECT id FROM session_content")
                    .fetch_all(&pool)
                    .await
                    .context("scan content ids")?;
            let index_ids: Vec<(String,)> = sqlx::query_as("SELECT id FROM sessions")
                .fetch_all(&pool)
                .await
                .context("scan index ids")?;
            let indexed: HashSet<String> = index_ids.into_iter().map(|(id,)| id).collect();

            let mut recovered = Vec::new();
            for (id,) in content_ids {
                if indexed.contains(&id) {
                    continue;
                }
                let row = sqlx::query("SELECT content FROM session_content WHERE id = $1")
                    .bind(&id)
                    .fetch_optional(&pool)
                    .await?;
                let Some(row) = row else { continue };
                let raw: String = row.try_get("content")?;
                let content = match decode_content(&id, &raw) {
                    Ok(content) => content,
                    Err(error) => {
                        // One bad record must not abort the scan.
                        tracing::warn!(id = %id, %error, "skipping unreadable orphan record");
                        continue;
                    }
                };
                let entry = index_entry_from_content(&id, &content);
                upsert_sessions(&pool, std::slice::from_ref(&entry)).await?;
                recovered.push(entry);
            }

            if !recovered.is_empty() {
                tracing::info!(count = recovered.len(), "recovered orphaned sessions");
            }
            Ok(recovered)
        })
    }

    fn export_snapshot(&self) -> Pin<Box<dyn Future<Output = Result<Snapshot>> + Send + '_>> {
        Box::pin(async move {
            let pool = self.acquire().await?;
            let sessions = self.list_sessions().await?;

            let rows = sqlx::query("SELECT id, content FROM session_content")
                .fetch_all(&pool)
                .await
                .context("scan session content")?;
            let mut items = Vec::with_capacity(rows.len());
            for row in &rows {
                let id: String = row.try_get("id")?;
                let raw: String = row.try_get("content")?;
                let content = decode_content(&id, &raw)?;
                items.push(SnapshotContentItem { id, content });
            }

            Ok(Snapshot::new(sessions, items))
        })
    }

    fn restore_snapshot<'a>(
        &'a self,
        snapshot: &'a Snapshot,
        progress: Option<ProgressFn>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            // Validate the complete shape BEFORE clearing anything: a crash
            // mid-restore is the most dangerous failure mode here, and a
            // snapshot that can't fully load must never cost existing data.
            snapshot::validate(snapshot)?;

            let pool = self.acquire().await?;
            let report = |phase: RestorePhase, batch: usize| {
                if let Some(callback) = &progress {
                    callback(phase, batch);
                }
            };

            report(RestorePhase::Clearing, 0);
            sqlx::query("DELETE FROM sessions").execute(&pool).await?;
            sqlx::query("DELETE FROM session_content")
                .execute(&pool)
                .await?;
            sqlx::query("DELETE FROM app_config").execute(&pool).await?;

            load_sessions_batched(&pool, &snapshot.sessions, |batch| {
                report(RestorePhase::Sessions, batch);
            })
            .await?;
            load_content_batched(&pool, &snapshot.session_data_items, |batch| {
                report(RestorePhase::Content, batch);
            })
            .await?;

            Ok(())
        })
    }

    fn get_config<'a>(
        &'a self,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<String>>> + Send + 'a>> {
        Box::pin(async move {
            let pool = self.acquire().await?;
            let row = sqlx::query("SELECT value FROM app_config WHERE key = $1")
                .bind(key)
                .fetch_optional(&pool)
                .await
                .context("query config")?;
            row.map(|row| row.try_get::<String, _>("value").map_err(Into::into))
                .transpose()
        })
    }

    fn set_config<'a>(
        &'a self,
        key: &'a str,
        value: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            let pool = self.acquire().await?;
            if value.is_empty() {
                sqlx::query("DELETE FROM app_config WHERE key = $1")
                    .bind(key)
                    .execute(&pool)
                    .await?;
                return Ok(());
            }
            sqlx::query(
                "INSERT INTO app_config (key, value) VALUES ($1, $2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            )
            .bind(key)
            .bind(value)
            .execute(&pool)
            .await?;
            Ok(())
        })
    }
}
