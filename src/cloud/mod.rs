//! Cloud blob store adapter: a path-addressed remote single-file store with
//! bearer-token auth, used as the sync target. Not a filesystem, not a
//! database: one opaque read/write blob per path.

mod client;
mod tokens;

pub use client::HttpBlobStore;
pub use tokens::{CloudTokens, TokenManager, TOKENS_CONFIG_KEY};

use crate::error::CloudError;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::pin::Pin;

/// Metadata for a remote blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobMetadata {
    pub modified_at: DateTime<Utc>,
}

/// Remote single-file store contract.
///
/// "Not found" is a normal outcome (`None`), never an error: callers branch
/// on presence, not on catch blocks.
pub trait BlobStore: Send + Sync {
    fn get_metadata<'a>(
        &'a self,
        path: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<BlobMetadata>, CloudError>> + Send + 'a>>;

    fn download<'a>(
        &'a self,
        path: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Vec<u8>>, CloudError>> + Send + 'a>>;

    fn upload<'a>(
        &'a self,
        path: &'a str,
        bytes: Vec<u8>,
    ) -> Pin<Box<dyn Future<Output = Result<(), CloudError>> + Send + 'a>>;

    fn delete<'a>(
        &'a self,
        path: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<(), CloudError>> + Send + 'a>>;
}
