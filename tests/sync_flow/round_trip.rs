use super::support::{seed, temp_store};
use driftvault::snapshot;

#[tokio::test]
async fn export_serialize_restore_export_is_lossless() {
    let (_tmp, source) = temp_store().await;
    seed(&source, "s1", "first message").await;
    seed(&source, "s2", "second message").await;

    let exported = source.export_snapshot().await.unwrap();
    let wire = snapshot::to_json(&exported);

    let (_tmp2, target) = temp_store().await;
    let parsed = snapshot::parse(&wire).unwrap();
    target.restore_snapshot(&parsed, None).await.unwrap();

    let round_tripped = target.export_snapshot().await.unwrap();
    // Equal modulo the outer timestamp, which is re-stamped on export.
    assert_eq!(round_tripped.version, exported.version);
    let mut expected_sessions = exported.sessions.clone();
    let mut actual_sessions = round_tripped.sessions.clone();
    expected_sessions.sort_by(|a, b| a.id.cmp(&b.id));
    actual_sessions.sort_by(|a, b| a.id.cmp(&b.id));
    assert_eq!(actual_sessions, expected_sessions);

    let mut expected_items = exported.session_data_items.clone();
    let mut actual_items = round_tripped.session_data_items.clone();
    expected_items.sort_by(|a, b| a.id.cmp(&b.id));
    actual_items.sort_by(|a, b| a.id.cmp(&b.id));
    assert_eq!(actual_items, expected_items);
}

#[tokio::test]
async fn restoring_twice_equals_restoring_once() {
    let (_tmp, source) = temp_store().await;
    seed(&source, "s1", "hello").await;
    let snapshot = source.export_snapshot().await.unwrap();

    let (_tmp2, target) = temp_store().await;
    target.restore_snapshot(&snapshot, None).await.unwrap();
    let once = target.export_snapshot().await.unwrap();

    target.restore_snapshot(&snapshot, None).await.unwrap();
    let twice = target.export_snapshot().await.unwrap();

    assert_eq!(once.sessions, twice.sessions);
    assert_eq!(once.session_data_items, twice.session_data_items);
}

#[tokio::test]
async fn older_export_without_timestamp_still_restores() {
    let (_tmp, target) = temp_store().await;

    // Document written by an older codec: legacy field name, no outer
    // timestamp, string message timestamps.
    let wire = r#"{
        "version": 1,
        "sessions": [{
            "id": "legacy-1",
            "title": "Old chat",
            "aiName": "Nova",
            "updatedAt": "1700000000000"
        }],
        "sessionData": [{
            "id": "legacy-1",
            "content": {
                "messages": [{
                    "id": "m1",
                    "role": "user",
                    "text": "hi",
                    "timestamp": "2023-11-14T22:13:20Z"
                }],
                "config": {}
            }
        }]
    }"#;

    let parsed = snapshot::parse(wire).unwrap();
    target.restore_snapshot(&parsed, None).await.unwrap();

    let sessions = target.list_sessions().await.unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].updated_at.timestamp_millis(), 1_700_000_000_000);

    let content = target.get_content("legacy-1").await.unwrap().unwrap();
    assert_eq!(
        content.messages[0].timestamp.timestamp_millis(),
        1_700_000_000_000
    );
}
