//! Portable snapshot format: the single JSON document used for manual
//! export/import and for the cloud sync blob.

use crate::error::SnapshotError;
use crate::session::types::{Session, SessionContent};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Current snapshot format version. Parsing accepts anything at or below
/// this; bumping it must keep older documents restorable.
pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    #[serde(default = "default_version")]
    pub version: u32,
    /// Wall-clock time of snapshot creation, the authority for cloud-vs-local
    /// comparison. Deliberately NOT the max of session timestamps, so an
    /// empty-but-intentional local state still compares meaningfully.
    /// Absent in documents written by older codec versions.
    #[serde(
        default,
        with = "optional_flex_timestamp",
        skip_serializing_if = "Option::is_none"
    )]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub sessions: Vec<Session>,
    // `sessionData` is the historical name from older exports.
    #[serde(default, alias = "sessionData")]
    pub session_data_items: Vec<SnapshotContentItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotContentItem {
    pub id: String,
    pub content: SessionContent,
}

fn default_version() -> u32 {
    SNAPSHOT_VERSION
}

impl Snapshot {
    /// Assemble a snapshot stamped with the current wall-clock time.
    pub fn new(sessions: Vec<Session>, session_data_items: Vec<SnapshotContentItem>) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            timestamp: Some(Utc::now()),
            sessions,
            session_data_items,
        }
    }
}

/// Serialize to the wire form uploaded to the cloud blob.
pub fn to_json(snapshot: &Snapshot) -> String {
    serde_json::to_string(snapshot).unwrap_or_else(|_| "{}".to_string())
}

/// Serialize for user-facing export files.
pub fn to_json_pretty(snapshot: &Snapshot) -> String {
    serde_json::to_string_pretty(snapshot).unwrap_or_else(|_| "{}".to_string())
}

/// Parse snapshot text, tolerating surrounding non-JSON noise (BOM, stray
/// wrapping, accidental prose) by slicing from the first `{` to the last `}`.
pub fn parse(text: &str) -> Result<Snapshot, SnapshotError> {
    let start = text
        .find('{')
        .ok_or_else(|| SnapshotError::NotASnapshot("no JSON object found in input".to_string()))?;
    let end = text
        .rfind('}')
        .filter(|&end| end > start)
        .ok_or_else(|| SnapshotError::NotASnapshot("no JSON object found in input".to_string()))?;
    let span = &text[start..=end];

    let value: serde_json::Value = serde_json::from_str(span)
        .map_err(|error| SnapshotError::NotASnapshot(error.to_string()))?;
    let snapshot: Snapshot = serde_json::from_value(value)
        .map_err(|error| SnapshotError::WrongShape(error.to_string()))?;

    if snapshot.version > SNAPSHOT_VERSION {
        return Err(SnapshotError::UnsupportedVersion(snapshot.version));
    }
    Ok(snapshot)
}

/// Full-shape validation, run by destructive restore BEFORE anything is
/// cleared. Typed parsing already guarantees field shapes; this catches the
/// record-level problems a partial restore would trip over.
pub fn validate(snapshot: &Snapshot) -> Result<(), SnapshotError> {
    if snapshot.version > SNAPSHOT_VERSION {
        return Err(SnapshotError::UnsupportedVersion(snapshot.version));
    }
    let mut seen = std::collections::HashSet::new();
    for session in &snapshot.sessions {
        if session.id.trim().is_empty() {
            return Err(SnapshotError::WrongShape(
                "session with empty id".to_string(),
            ));
        }
        if !seen.insert(session.id.as_str()) {
            return Err(SnapshotError::WrongShape(format!(
                "duplicate session id {:?}",
                session.id
            )));
        }
    }
    let mut seen_content = std::collections::HashSet::new();
    for item in &snapshot.session_data_items {
        if item.id.trim().is_empty() {
            return Err(SnapshotError::WrongShape(
                "content item with empty id".to_string(),
            ));
        }
        if !seen_content.insert(item.id.as_str()) {
            return Err(SnapshotError::WrongShape(format!(
                "duplicate content id {:?}",
                item.id
            )));
        }
    }
    Ok(())
}

mod optional_flex_timestamp {
    use super::{DateTime, Utc};
    use crate::session::types::flex_timestamp;
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<DateTime<Utc>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(timestamp) => flex_timestamp::serialize(timestamp, serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error> {
        let raw = Option::<serde_json::Value>::deserialize(deserializer)?;
        match raw {
            None | Some(serde_json::Value::Null) => Ok(None),
            Some(value) => flex_timestamp::coerce(&value)
                .map(Some)
                .map_err(D::Error::custom),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::types::{Message, MessageRole, SessionSettings};
    use chrono::TimeZone;

    fn sample() -> Snapshot {
        // Millisecond-grain timestamps: that is the wire resolution.
        let stamp = Utc.timestamp_millis_opt(1_700_000_000_000).unwrap();
        let session = Session {
            id: "1700000000000-abc".into(),
            title: "First chat".into(),
            preview: "hello".into(),
            ai_name: "Nova".into(),
            ai_avatar_ref: None,
            updated_at: stamp,
        };
        let mut content = SessionContent::new(SessionSettings::default());
        let mut message = Message::new(MessageRole::User, "hello");
        message.timestamp = stamp;
        content.messages.push(message);
        Snapshot::new(
            vec![session],
            vec![SnapshotContentItem {
                id: "1700000000000-abc".into(),
                content,
            }],
        )
    }

    #[test]
    fn round_trips_through_json() {
        let snapshot = sample();
        let parsed = parse(&to_json(&snapshot)).unwrap();
        assert_eq!(parsed.sessions, snapshot.sessions);
        assert_eq!(parsed.session_data_items, snapshot.session_data_items);
    }

    #[test]
    fn parses_with_surrounding_garbage() {
        let text = format!("\u{feff}Here is your backup:\n{}\nregards", to_json(&sample()));
        let parsed = parse(&text).unwrap();
        assert_eq!(parsed.sessions.len(), 1);
    }

    #[test]
    fn rejects_input_without_braces_as_not_a_snapshot() {
        let err = parse("this is prose, no json at all").unwrap_err();
        assert!(matches!(err, SnapshotError::NotASnapshot(_)));
    }

    #[test]
    fn rejects_invalid_json_as_not_a_snapshot() {
        let err = parse("{not json at all]}").unwrap_err();
        assert!(matches!(err, SnapshotError::NotASnapshot(_)));
    }

    #[test]
    fn rejects_wrong_shape_distinctly() {
        let err = parse(r#"{"sessions": "definitely not an array"}"#).unwrap_err();
        assert!(matches!(err, SnapshotError::WrongShape(_)));
    }

    #[test]
    fn accepts_legacy_session_data_field_name() {
        let text = r#"{
            "version": 1,
            "timestamp": 1700000000000,
            "sessions": [],
            "sessionData": []
        }"#;
        let parsed = parse(text).unwrap();
        assert!(parsed.session_data_items.is_empty());
    }

    #[test]
    fn tolerates_missing_timestamp_from_older_codec() {
        let parsed = parse(r#"{"version": 1, "sessions": [], "sessionDataItems": []}"#).unwrap();
        assert!(parsed.timestamp.is_none());
    }

    #[test]
    fn rejects_snapshot_from_newer_codec() {
        let err = parse(r#"{"version": 99, "sessions": [], "sessionDataItems": []}"#).unwrap_err();
        assert!(matches!(err, SnapshotError::UnsupportedVersion(99)));
    }

    #[test]
    fn validate_rejects_duplicate_session_ids() {
        let mut snapshot = sample();
        let duplicate = snapshot.sessions[0].clone();
        snapshot.sessions.push(duplicate);
        assert!(matches!(
            validate(&snapshot),
            Err(SnapshotError::WrongShape(_))
        ));
    }

    #[test]
    fn validate_rejects_empty_content_id() {
        let mut snapshot = sample();
        snapshot.session_data_items[0].id = "  ".into();
        assert!(matches!(
            validate(&snapshot),
            Err(SnapshotError::WrongShape(_))
        ));
    }

    #[test]
    fn validate_accepts_well_formed_snapshot() {
        assert!(validate(&sample()).is_ok());
    }
}
