use super::support::{MemoryBlob, seed, session_at, temp_store};
use chrono::{Duration, Utc};
use driftvault::cloud::BlobStore;
use driftvault::store::SessionStore;
use driftvault::sync::{SyncOptions, SyncOrchestrator, SyncOutcome};
use std::sync::Arc;

fn orchestrator(store: &Arc<dyn SessionStore>, blob: &Arc<MemoryBlob>) -> SyncOrchestrator {
    SyncOrchestrator::new(
        Arc::clone(store),
        Arc::clone(blob) as Arc<dyn BlobStore>,
        SyncOptions::default(),
    )
}

async fn seed_backdated(store: &Arc<dyn SessionStore>, id: &str, seconds_ago: i64) {
    seed(store, id, "seeded").await;
    let mut session = store
        .list_sessions()
        .await
        .unwrap()
        .into_iter()
        .find(|s| s.id == id)
        .unwrap();
    session.updated_at = Utc::now() - Duration::seconds(seconds_ago);
    store.put_index(&session).await.unwrap();
}

#[tokio::test]
async fn two_devices_converge_through_the_shared_blob() {
    let blob = Arc::new(MemoryBlob::default());

    // Device A last edited two minutes ago; it bootstraps the cloud blob.
    let (_tmp_a, device_a) = temp_store().await;
    seed_backdated(&device_a, "a1", 120).await;
    seed_backdated(&device_a, "a2", 120).await;
    let sync_a = orchestrator(&device_a, &blob);
    assert_eq!(sync_a.sync().await.unwrap(), SyncOutcome::Uploaded);

    // Device B starts empty and pulls everything A uploaded.
    let (_tmp_b, device_b) = temp_store().await;
    let sync_b = orchestrator(&device_b, &blob);
    assert_eq!(sync_b.sync().await.unwrap(), SyncOutcome::Downloaded);
    assert_eq!(device_b.list_sessions().await.unwrap().len(), 2);

    // B keeps chatting; its newer state wins the next reconcile.
    let newer = session_at("b1", Utc::now() + Duration::seconds(5));
    device_b.put_index(&newer).await.unwrap();
    assert_eq!(sync_b.sync().await.unwrap(), SyncOutcome::Uploaded);

    // A pulls and sees B's session.
    assert_eq!(sync_a.sync().await.unwrap(), SyncOutcome::Downloaded);
    let ids: Vec<String> = device_a
        .list_sessions()
        .await
        .unwrap()
        .into_iter()
        .map(|s| s.id)
        .collect();
    assert!(ids.contains(&"b1".to_string()));
    assert!(ids.contains(&"a1".to_string()));
}

#[tokio::test]
async fn pull_replaces_local_sessions_exactly() {
    let blob = Arc::new(MemoryBlob::default());

    let (_tmp_a, device_a) = temp_store().await;
    seed(&device_a, "a1", "kept").await;
    seed(&device_a, "a2", "kept too").await;
    seed(&device_a, "a3", "also kept").await;
    orchestrator(&device_a, &blob).sync().await.unwrap();

    // Device B holds one decisively older session that loses the compare.
    let (_tmp_b, device_b) = temp_store().await;
    seed_backdated(&device_b, "stale", 60).await;

    let sync_b = orchestrator(&device_b, &blob);
    assert_eq!(sync_b.sync().await.unwrap(), SyncOutcome::Downloaded);

    // Local session count now matches the cloud snapshot's exactly.
    let sessions = device_b.list_sessions().await.unwrap();
    assert_eq!(sessions.len(), 3);
    assert!(sessions.iter().all(|s| s.id.starts_with('a')));
    assert!(device_b.get_content("stale").await.unwrap().is_none());
}
