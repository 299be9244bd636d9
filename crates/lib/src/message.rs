//! Chat message model and normalization of backend payloads.
//!
//! Backends disagree on field names (`role` vs `sender`, `text` vs `message`, `id` vs `_id`),
//! so inbound JSON is read as a permissive [`RawMessage`] and turned into a [`Message`] by
//! [`normalize`]. Everything downstream (reconciler, history grouper, CLI) only sees `Message`.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Prefix of ids given to optimistic (not yet confirmed) user messages.
pub const TEMP_ID_PREFIX: &str = "temp-";

/// Prefix of ids given to synthetic error notices appended after a failed send.
pub const ERROR_ID_PREFIX: &str = "err-";

static LOCAL_SEQ: AtomicU64 = AtomicU64::new(0);

/// Who produced a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Bot,
    /// Any other sender value found on an already-shaped message. [`normalize`] never produces it.
    #[serde(other)]
    Unknown,
}

/// Whether a message carries text or an image URL.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    #[default]
    Text,
    Image,
}

impl MessageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageKind::Text => "text",
            MessageKind::Image => "image",
        }
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A message as shown in the conversation. For [`MessageKind::Image`] the text is the image URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    #[serde(alias = "_id")]
    pub id: String,
    pub text: String,
    pub sender: Sender,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    /// Client-side copy of a user submission, shown until the server confirms it.
    pub fn optimistic(text: impl Into<String>, kind: MessageKind) -> Self {
        Self {
            id: temp_id(),
            text: text.into(),
            sender: Sender::User,
            kind,
            timestamp: Utc::now(),
        }
    }

    /// Synthetic bot message used to report a failed send inside the conversation.
    pub fn error_notice(text: impl Into<String>) -> Self {
        Self {
            id: error_id(),
            text: text.into(),
            sender: Sender::Bot,
            kind: MessageKind::Text,
            timestamp: Utc::now(),
        }
    }

    pub fn is_image(&self) -> bool {
        self.kind == MessageKind::Image
    }

    /// True for optimistic messages and error notices (ids the server never issued).
    pub fn is_local(&self) -> bool {
        is_temporary_id(&self.id) || self.id.starts_with(ERROR_ID_PREFIX)
    }
}

/// Inbound message as any of the supported backends may send it.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawMessage {
    #[serde(default)]
    pub role: Option<serde_json::Value>,
    #[serde(default)]
    pub sender: Option<serde_json::Value>,
    #[serde(default)]
    pub from: Option<serde_json::Value>,
    #[serde(default)]
    pub text: Option<serde_json::Value>,
    #[serde(default)]
    pub message: Option<serde_json::Value>,
    #[serde(default)]
    pub timestamp: Option<serde_json::Value>,
    #[serde(default)]
    pub id: Option<serde_json::Value>,
    /// Document id as emitted by Mongo-style backends.
    #[serde(default, rename = "_id")]
    pub doc_id: Option<serde_json::Value>,
}

/// Normalize a backend message.
///
/// Role comes from `role`, then `sender`, then `from` (only `"assistant"` counts there).
/// `assistant` and `bot` roles map to [`Sender::Bot`], everything else to [`Sender::User`].
/// A bot message whose trimmed text is an absolute http(s) URL becomes an image.
/// Missing timestamps default to now and missing ids are generated.
pub fn normalize(raw: RawMessage) -> Message {
    let role = raw
        .role
        .as_ref()
        .and_then(value_as_string)
        .or_else(|| raw.sender.as_ref().and_then(value_as_string))
        .unwrap_or_else(|| {
            let from_assistant = raw
                .from
                .as_ref()
                .and_then(|v| v.as_str())
                .is_some_and(|s| s == "assistant");
            let fallback = if from_assistant { "assistant" } else { "user" };
            fallback.to_string()
        });
    let sender = if is_bot_role(&role) {
        Sender::Bot
    } else {
        Sender::User
    };

    let text = raw
        .text
        .as_ref()
        .or(raw.message.as_ref())
        .and_then(value_as_string)
        .map(|s| s.trim().to_string())
        .unwrap_or_default();

    let kind = if sender == Sender::Bot && is_image_url(&text) {
        MessageKind::Image
    } else {
        MessageKind::Text
    };

    let timestamp = raw
        .timestamp
        .as_ref()
        .and_then(parse_timestamp)
        .unwrap_or_else(Utc::now);

    let id = raw
        .doc_id
        .as_ref()
        .or(raw.id.as_ref())
        .and_then(value_as_string)
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| format!("{}-{}", role, uuid::Uuid::new_v4()));

    Message {
        id,
        text,
        sender,
        kind,
        timestamp,
    }
}

fn is_bot_role(role: &str) -> bool {
    let r = role.trim();
    r.eq_ignore_ascii_case("assistant") || r.eq_ignore_ascii_case("bot")
}

/// Strings pass through; numbers and booleans are stringified; null, arrays and objects are absent.
fn value_as_string(v: &serde_json::Value) -> Option<String> {
    match v {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        serde_json::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Naive ISO-8601 layouts (no offset); read as UTC.
const NAIVE_TIMESTAMP_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// RFC 3339 strings, naive ISO-8601 date-times (taken as UTC), or Unix epoch milliseconds.
fn parse_timestamp(v: &serde_json::Value) -> Option<DateTime<Utc>> {
    let parsed = match v {
        serde_json::Value::String(s) => parse_timestamp_str(s.trim()),
        serde_json::Value::Number(n) => {
            n.as_i64().and_then(DateTime::<Utc>::from_timestamp_millis)
        }
        _ => None,
    };
    if parsed.is_none() {
        log::debug!("unparseable message timestamp {}, using current time", v);
    }
    parsed
}

fn parse_timestamp_str(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(t) = DateTime::parse_from_rfc3339(s) {
        return Some(t.with_timezone(&Utc));
    }
    NAIVE_TIMESTAMP_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .map(|t| t.and_utc())
}

/// True if `text` is a single absolute http:// or https:// URL with a host.
pub fn is_image_url(text: &str) -> bool {
    let t = text.trim();
    if t.is_empty() || t.chars().any(char::is_whitespace) {
        return false;
    }
    match reqwest::Url::parse(t) {
        Ok(url) => {
            matches!(url.scheme(), "http" | "https")
                && url.host_str().is_some_and(|h| !h.is_empty())
        }
        Err(_) => false,
    }
}

fn local_token() -> String {
    let seq = LOCAL_SEQ.fetch_add(1, Ordering::Relaxed);
    format!("{}-{}", Utc::now().timestamp_millis(), seq)
}

/// New id for an optimistic message (`temp-<millis>-<seq>`).
pub fn temp_id() -> String {
    format!("{}{}", TEMP_ID_PREFIX, local_token())
}

/// New id for a synthetic error notice (`err-<millis>-<seq>`).
pub fn error_id() -> String {
    format!("{}{}", ERROR_ID_PREFIX, local_token())
}

pub fn is_temporary_id(id: &str) -> bool {
    id.starts_with(TEMP_ID_PREFIX)
}

/// Shorten `text` to at most `max_chars` characters, appending `…` when cut.
pub fn preview(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars).collect();
    out.push('…');
    out
}
