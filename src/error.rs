use thiserror::Error;

// ─── Top-level error hierarchy ───────────────────────────────────────────────

/// Structured error hierarchy for `driftvault`.
///
/// Each subsystem defines its own error variant. Library callers can match on
/// these to decide recovery strategy; internal code continues to use
/// `anyhow::Result` for ad-hoc context chains.
#[derive(Debug, Error)]
pub enum VaultError {
    // ── Local store ─────────────────────────────────────────────────────
    #[error("store: {0}")]
    Store(#[from] StoreError),

    // ── Snapshot codec ──────────────────────────────────────────────────
    #[error("snapshot: {0}")]
    Snapshot(#[from] SnapshotError),

    // ── Cloud blob store ────────────────────────────────────────────────
    #[error("cloud: {0}")]
    Cloud(#[from] CloudError),

    // ── Sync orchestration ──────────────────────────────────────────────
    #[error("sync: {0}")]
    Sync(#[from] SyncError),

    // ── Chat turn machinery ─────────────────────────────────────────────
    #[error("chat: {0}")]
    Chat(#[from] ChatError),

    // ── Config ──────────────────────────────────────────────────────────
    #[error("config: {0}")]
    Config(#[from] ConfigError),

    // ── Generic fallthrough (wraps anyhow for interop) ──────────────────
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

// ─── Store errors ────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum StoreError {
    /// Open still failing after the bounded retry loop.
    #[error("open failed after {attempts} attempts: {message}")]
    Open { attempts: u32, message: String },

    #[error("query failed: {0}")]
    Query(String),

    #[error("schema migration failed: {0}")]
    Migration(String),

    #[error("corrupt record for session {id}: {message}")]
    CorruptRecord { id: String, message: String },
}

// ─── Snapshot errors ─────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum SnapshotError {
    /// Input contains no JSON object at all.
    #[error("not a snapshot: {0}")]
    NotASnapshot(String),

    /// Input is JSON but does not have the snapshot shape.
    #[error("snapshot of wrong shape: {0}")]
    WrongShape(String),

    #[error("unsupported snapshot version {0}")]
    UnsupportedVersion(u32),
}

// ─── Cloud errors ────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum CloudError {
    /// Credential missing, expired beyond refresh, or refresh rejected.
    /// Requires explicit re-authentication; never retried.
    #[error("authentication required: {0}")]
    AuthRequired(String),

    /// Network-level failure; safe to retry later.
    #[error("transport: {0}")]
    Transport(String),

    /// Provider rejected the request for a non-auth reason.
    #[error("provider rejected {path}: {message}")]
    Rejected { path: String, message: String },
}

// ─── Sync errors ─────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("cloud snapshot unreadable: {0}")]
    CloudSnapshot(#[source] SnapshotError),

    #[error("local export failed: {0}")]
    Export(String),

    #[error("restore failed: {0}")]
    Restore(String),
}

// ─── Chat errors ─────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("no API credential configured")]
    MissingApiKey,

    #[error("provider stream failed: {0}")]
    Stream(String),

    #[error("session not found: {0}")]
    SessionNotFound(String),
}

// ─── Config errors ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load config: {0}")]
    Load(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

// ─── Convenience re-exports ─────────────────────────────────────────────────

/// Shorthand result type for the crate.
pub type Result<T> = std::result::Result<T, VaultError>;
