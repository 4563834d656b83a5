//! Local persistent store: durable, transactional storage of the session
//! index, session content, and global config collections.

mod sqlite;

pub use sqlite::SqliteSessionStore;

use crate::session::types::{Session, SessionContent};
use crate::snapshot::{Snapshot, SnapshotContentItem};
use anyhow::Result;
use std::future::Future;
use std::pin::Pin;

/// Index records per bulk-load batch.
pub const INDEX_BATCH_SIZE: usize = 50;
/// Content records per bulk-load batch; content rows are much larger.
pub const CONTENT_BATCH_SIZE: usize = 5;

/// Coarse restore progress, advisory only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestorePhase {
    Clearing,
    Sessions,
    Content,
}

/// Progress callback: phase plus zero-based batch index within it.
pub type ProgressFn = Box<dyn Fn(RestorePhase, usize) + Send + Sync>;

/// Async store contract over the three collections.
///
/// Cross-collection atomicity is deliberately not part of this contract:
/// index and content are updated by separate calls, and the documented
/// intermediate states (orphan, dangling index) are repaired by
/// `recover_orphans`, not prevented.
pub trait SessionStore: Send + Sync {
    /// All index entries, `updated_at` coerced to a real timestamp. No
    /// ordering guarantee; callers sort.
    fn list_sessions(&self) -> Pin<Box<dyn Future<Output = Result<Vec<Session>>> + Send + '_>>;

    /// Point lookup; absence is `None`, not an error.
    fn get_content<'a>(
        &'a self,
        id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<SessionContent>>> + Send + 'a>>;

    fn put_index<'a>(
        &'a self,
        session: &'a Session,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

    fn put_content<'a>(
        &'a self,
        id: &'a str,
        content: &'a SessionContent,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

    /// Two-step delete: index row first, then content row. A crash between
    /// the two leaves an orphan for the recovery scan.
    fn delete_session<'a>(
        &'a self,
        id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<bool>> + Send + 'a>>;

    fn bulk_load_sessions<'a>(
        &'a self,
        items: &'a [Session],
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

    fn bulk_load_content<'a>(
        &'a self,
        items: &'a [SnapshotContentItem],
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

    /// Detect content records with no index entry and reconstruct a minimal
    /// index entry for each. Skips unreadable records and keeps going.
    fn recover_orphans(&self)
    -> Pin<Box<dyn Future<Output = Result<Vec<Session>>> + Send + '_>>;

    fn export_snapshot(&self) -> Pin<Box<dyn Future<Output = Result<Snapshot>> + Send + '_>>;

    /// Destructive replace: validates the full snapshot shape, then clears
    /// all three collections, then bulk-loads. Progress is advisory.
    fn restore_snapshot<'a>(
        &'a self,
        snapshot: &'a Snapshot,
        progress: Option<ProgressFn>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

    fn get_config<'a>(
        &'a self,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<String>>> + Send + 'a>>;

    /// Setting an empty value deletes the key rather than storing a
    /// tombstone.
    fn set_config<'a>(
        &'a self,
        key: &'a str,
        value: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;
}
