use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Maximum characters kept in a session's `preview` field.
pub const PREVIEW_MAX_CHARS: usize = 120;

/// Who authored a message.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum MessageRole {
    User,
    Model,
}

/// Inline image attachment carried inside a message payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageAttachment {
    pub mime_type: String,
    /// Base64-encoded image bytes, stored inline in the content record.
    pub data: String,
}

impl ImageAttachment {
    pub fn from_bytes(mime_type: &str, bytes: &[u8]) -> Self {
        Self {
            mime_type: mime_type.to_string(),
            data: BASE64.encode(bytes),
        }
    }

    pub fn decode(&self) -> anyhow::Result<Vec<u8>> {
        Ok(BASE64.decode(&self.data)?)
    }
}

/// One chat message. `is_thinking` marks a response still in flight and is
/// never persisted as true across a reload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub role: MessageRole,
    pub text: String,
    #[serde(with = "flex_timestamp")]
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<ImageAttachment>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_thinking: bool,
}

impl Message {
    pub fn new(role: MessageRole, text: impl Into<String>) -> Self {
        Self {
            id: new_message_id(),
            role,
            text: text.into(),
            timestamp: Utc::now(),
            images: Vec::new(),
            is_thinking: false,
        }
    }
}

/// Session index entry. The heavy message payload lives in a separate
/// content record so listing never loads message bodies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub preview: String,
    pub ai_name: String,
    #[serde(default)]
    pub ai_avatar_ref: Option<String>,
    /// Sole ordering key for cloud sync; advanced on every content mutation.
    #[serde(with = "flex_timestamp")]
    pub updated_at: DateTime<Utc>,
}

/// Full per-session settings snapshot. Every field has an explicit default;
/// the struct is resolved once at session creation, never re-derived ad hoc.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionSettings {
    // Character identity: reset on carry-over.
    pub ai_name: String,
    pub ai_avatar_ref: Option<String>,
    pub persona_prompt: String,
    pub welcome_message: String,

    // Model preferences: persist on carry-over.
    pub model: String,
    pub temperature: f64,

    // Device / display preferences: persist on carry-over.
    pub theme: String,
    pub font_scale: f64,
    pub send_on_enter: bool,
    pub show_timestamps: bool,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            ai_name: "Assistant".to_string(),
            ai_avatar_ref: None,
            persona_prompt: String::new(),
            welcome_message: "Hello! How can I help you today?".to_string(),
            model: "gemini-2.0-flash".to_string(),
            temperature: 0.9,
            theme: "system".to_string(),
            font_scale: 1.0,
            send_on_enter: true,
            show_timestamps: false,
        }
    }
}

impl SessionSettings {
    /// Seed settings for a new session from the previous session's settings.
    ///
    /// Explicit allow-list: model and device/display preferences carry over,
    /// character-identity fields reset to defaults.
    pub fn carry_over(previous: &SessionSettings) -> Self {
        Self {
            model: previous.model.clone(),
            temperature: previous.temperature,
            theme: previous.theme.clone(),
            font_scale: previous.font_scale,
            send_on_enter: previous.send_on_enter,
            show_timestamps: previous.show_timestamps,
            ..Self::default()
        }
    }
}

/// The heavy payload for one session: ordered messages plus the settings
/// snapshot captured for that conversation. Wire name for the settings field
/// is `config`, kept for compatibility with previously exported data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionContent {
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(rename = "config", default)]
    pub settings: SessionSettings,
}

impl SessionContent {
    pub fn new(settings: SessionSettings) -> Self {
        Self {
            messages: Vec::new(),
            settings,
        }
    }

    /// Clear transient in-flight markers. Applied before every persist and
    /// after every load so `is_thinking` never survives a reload.
    pub fn sanitize(&mut self) {
        for message in &mut self.messages {
            message.is_thinking = false;
        }
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }
}

/// New session id: time-derived, opaque to every consumer.
pub fn new_session_id() -> String {
    format!("{}-{}", Utc::now().timestamp_millis(), Uuid::new_v4().simple())
}

pub fn new_message_id() -> String {
    Uuid::new_v4().to_string()
}

/// Truncate message text into an index-entry preview, char-boundary safe.
pub fn preview_of(text: &str) -> String {
    if text.chars().count() <= PREVIEW_MAX_CHARS {
        return text.to_string();
    }
    let truncated: String = text.chars().take(PREVIEW_MAX_CHARS).collect();
    format!("{truncated}…")
}

/// Timestamp (de)serialization tolerant of every historical wire shape.
///
/// Writes integer Unix milliseconds. Reads integer or float milliseconds,
/// numeric strings, and RFC 3339 strings; older exports carried all four.
pub mod flex_timestamp {
    use super::{DateTime, TimeZone, Utc};
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &DateTime<Utc>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(value.timestamp_millis())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<DateTime<Utc>, D::Error> {
        let raw = serde_json::Value::deserialize(deserializer)?;
        coerce(&raw).map_err(D::Error::custom)
    }

    /// Coerce any historical timestamp representation to a real timestamp.
    pub fn coerce(raw: &serde_json::Value) -> Result<DateTime<Utc>, String> {
        match raw {
            serde_json::Value::Number(number) => {
                if let Some(millis) = number.as_i64() {
                    from_millis(millis)
                } else if let Some(float) = number.as_f64() {
                    #[allow(clippy::cast_possible_truncation)]
                    from_millis(float as i64)
                } else {
                    Err(format!("timestamp out of range: {number}"))
                }
            }
            serde_json::Value::String(text) => {
                if let Ok(millis) = text.trim().parse::<i64>() {
                    return from_millis(millis);
                }
                DateTime::parse_from_rfc3339(text.trim())
                    .map(|parsed| parsed.with_timezone(&Utc))
                    .map_err(|error| format!("unparseable timestamp {text:?}: {error}"))
            }
            other => Err(format!("unexpected timestamp value: {other}")),
        }
    }

    fn from_millis(millis: i64) -> Result<DateTime<Utc>, String> {
        Utc.timestamp_millis_opt(millis)
            .single()
            .ok_or_else(|| format!("timestamp millis out of range: {millis}"))
    }
}
