//! Outbox record model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::convert::Infallible;
use std::str::FromStr;
use std::time::Duration;

/// Kind of message carried by an outbox record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    None,
    Unacceptable,
    Command,
    Event,
    Document,
    Quit,
    Callback,
}

impl Default for MessageType {
    fn default() -> Self {
        Self::Event
    }
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Unacceptable => "unacceptable",
            Self::Command => "command",
            Self::Event => "event",
            Self::Document => "document",
            Self::Quit => "quit",
            Self::Callback => "callback",
        }
    }
}

/// Unrecognised names map to `Unacceptable`.
impl FromStr for MessageType {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_lowercase().as_str() {
            "none" => Self::None,
            "command" => Self::Command,
            "event" => Self::Event,
            "document" => Self::Document,
            "quit" => Self::Quit,
            "callback" => Self::Callback,
            _ => Self::Unacceptable,
        })
    }
}

/// A scalar header value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HeaderValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
}

impl HeaderValue {
    /// JSON has no NaN or infinity, so only finite floats survive storage.
    pub fn is_storable(&self) -> bool {
        match self {
            Self::Float(f) => f.is_finite(),
            _ => true,
        }
    }
}

impl From<&str> for HeaderValue {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for HeaderValue {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<i64> for HeaderValue {
    fn from(v: i64) -> Self {
        Self::Integer(v)
    }
}

impl From<f64> for HeaderValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<bool> for HeaderValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

/// Message headers. Ordered so serialization is deterministic.
pub type Headers = BTreeMap<String, HeaderValue>;

/// How the body bytes should be interpreted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BodyEncoding {
    /// Valid UTF-8 text.
    #[default]
    Utf8,
    /// Opaque bytes.
    Raw,
}

impl BodyEncoding {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Utf8 => "utf8",
            Self::Raw => "raw",
        }
    }
}

/// Message payload: bytes plus an encoding tag.
///
/// A `Utf8` body always holds valid UTF-8.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageBody {
    bytes: Vec<u8>,
    encoding: BodyEncoding,
}

impl MessageBody {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            bytes: text.into().into_bytes(),
            encoding: BodyEncoding::Utf8,
        }
    }

    pub fn binary(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: bytes.into(),
            encoding: BodyEncoding::Raw,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn encoding(&self) -> BodyEncoding {
        self.encoding
    }

    /// The body as text, when it is tagged UTF-8.
    pub fn as_text(&self) -> Option<&str> {
        match self.encoding {
            BodyEncoding::Utf8 => std::str::from_utf8(&self.bytes).ok(),
            BodyEncoding::Raw => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// A message handed to the outbox by a producer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub topic: String,
    pub message_type: MessageType,
    #[serde(default)]
    pub headers: Headers,
    #[serde(default)]
    pub body: MessageBody,
    pub correlation_id: Option<String>,
    pub reply_to: Option<String>,
    pub partition_key: Option<String>,
    pub content_type: Option<String>,
}

impl Message {
    /// New message with a random v4 id.
    pub fn new(topic: impl Into<String>, message_type: MessageType, body: MessageBody) -> Self {
        Self::with_id(uuid::Uuid::new_v4().to_string(), topic, message_type, body)
    }

    pub fn with_id(
        id: impl Into<String>,
        topic: impl Into<String>,
        message_type: MessageType,
        body: MessageBody,
    ) -> Self {
        Self {
            id: id.into(),
            topic: topic.into(),
            message_type,
            headers: Headers::new(),
            body,
            correlation_id: None,
            reply_to: None,
            partition_key: None,
            content_type: None,
        }
    }

    /// First header whose value cannot be stored.
    pub(crate) fn unstorable_header(&self) -> Option<&str> {
        self.headers
            .iter()
            .find(|(_, value)| !value.is_storable())
            .map(|(key, _)| key.as_str())
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<HeaderValue>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    pub fn reply_to(mut self, topic: impl Into<String>) -> Self {
        self.reply_to = Some(topic.into());
        self
    }

    pub fn partition_key(mut self, key: impl Into<String>) -> Self {
        self.partition_key = Some(key.into());
        self
    }

    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }
}

/// One stored outbox record: the message plus its bookkeeping columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxMessage {
    pub message: Message,
    /// Set at insert, never changed afterwards.
    pub created_at: DateTime<Utc>,
    /// `None` until dispatched.
    pub delivered_at: Option<DateTime<Utc>>,
    /// Write partition in `[0, num_shards)`.
    pub shard: u32,
    /// Unix seconds after which the store may drop the record.
    pub expires_at: Option<i64>,
}

impl OutboxMessage {
    pub fn id(&self) -> &str {
        &self.message.id
    }

    pub fn topic(&self) -> &str {
        &self.message.topic
    }

    pub fn is_dispatched(&self) -> bool {
        self.delivered_at.is_some()
    }

    /// Ordering key for outstanding scans.
    pub(crate) fn created_key(&self) -> (DateTime<Utc>, &str) {
        (self.created_at, self.id())
    }
}

/// One page of query results.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page_number: u32,
    /// The page to request next, when more results remain.
    pub next_page: Option<u32>,
}

impl<T> Page<T> {
    pub fn has_more(&self) -> bool {
        self.next_page.is_some()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Current time truncated to millisecond precision, the resolution every
/// store keeps.
pub(crate) fn now_millis() -> DateTime<Utc> {
    truncate_millis(Utc::now())
}

pub(crate) fn truncate_millis(at: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(at.timestamp_millis()).unwrap_or(at)
}

/// `now - age`, saturating at the earliest representable instant.
pub(crate) fn cutoff(now: DateTime<Utc>, age: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(age)
        .ok()
        .and_then(|age| now.checked_sub_signed(age))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}
