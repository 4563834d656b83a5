use chrono::{DateTime, Utc};
use driftvault::cloud::{BlobMetadata, BlobStore};
use driftvault::error::CloudError;
use driftvault::session::types::{Message, MessageRole, Session, SessionContent, SessionSettings};
use driftvault::store::{SessionStore, SqliteSessionStore};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

pub(crate) async fn temp_store() -> (TempDir, Arc<dyn SessionStore>) {
    let tmp = TempDir::new().expect("tempdir");
    let store = SqliteSessionStore::open(tmp.path().join("vault.db"))
        .await
        .expect("open store");
    (tmp, Arc::new(store))
}

pub(crate) fn session_at(id: &str, updated_at: DateTime<Utc>) -> Session {
    Session {
        id: id.to_string(),
        title: format!("Chat {id}"),
        preview: String::new(),
        ai_name: "Nova".into(),
        ai_avatar_ref: None,
        updated_at,
    }
}

pub(crate) fn content_saying(text: &str) -> SessionContent {
    SessionContent {
        messages: vec![Message::new(MessageRole::User, text)],
        settings: SessionSettings::default(),
    }
}

pub(crate) async fn seed(store: &Arc<dyn SessionStore>, id: &str, text: &str) {
    let session = session_at(id, Utc::now());
    store
        .put_content(id, &content_saying(text))
        .await
        .expect("put content");
    store.put_index(&session).await.expect("put index");
}

/// Shared in-memory cloud blob, standing in for the remote store that two
/// devices reconcile against.
#[derive(Default)]
pub(crate) struct MemoryBlob {
    files: Mutex<HashMap<String, (Vec<u8>, DateTime<Utc>)>>,
}

impl BlobStore for MemoryBlob {
    fn get_metadata<'a>(
        &'a self,
        path: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<BlobMetadata>, CloudError>> + Send + 'a>> {
        Box::pin(async move {
            Ok(self
                .files
                .lock()
                .unwrap()
                .get(path)
                .map(|(_, modified_at)| BlobMetadata {
                    modified_at: *modified_at,
                }))
        })
    }

    fn download<'a>(
        &'a self,
        path: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Vec<u8>>, CloudError>> + Send + 'a>> {
        Box::pin(async move {
            Ok(self
                .files
                .lock()
                .unwrap()
                .get(path)
                .map(|(bytes, _)| bytes.clone()))
        })
    }

    fn upload<'a>(
        &'a self,
        path: &'a str,
        bytes: Vec<u8>,
    ) -> Pin<Box<dyn Future<Output = Result<(), CloudError>> + Send + 'a>> {
        Box::pin(async move {
            self.files
                .lock()
                .unwrap()
                .insert(path.to_string(), (bytes, Utc::now()));
            Ok(())
        })
    }

    fn delete<'a>(
        &'a self,
        path: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<(), CloudError>> + Send + 'a>> {
        Box::pin(async move {
            self.files.lock().unwrap().remove(path);
            Ok(())
        })
    }
}
