//! Opaque pagination tokens.
//!
//! A token wraps the ordering key of the last row a read returned. Callers
//! only pass tokens back; stores decode them to resume a keyset scan.

use crate::{OutboxError, OutboxResult};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD as BASE64, Engine};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a paged read resumes: strictly after `(timestamp, id)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumeKey {
    #[serde(rename = "t")]
    pub timestamp_ms: i64,
    pub id: String,
}

impl ResumeKey {
    pub fn new(timestamp: DateTime<Utc>, id: impl Into<String>) -> Self {
        Self {
            timestamp_ms: timestamp.timestamp_millis(),
            id: id.into(),
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.timestamp_ms).unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}

/// Store-issued marker for resuming a paged read.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PageToken(String);

impl PageToken {
    pub fn from_key(key: &ResumeKey) -> OutboxResult<Self> {
        let json = serde_json::to_vec(key)?;
        Ok(Self(BASE64.encode(json)))
    }

    pub fn to_key(&self) -> OutboxResult<ResumeKey> {
        let bytes = BASE64
            .decode(self.0.as_bytes())
            .map_err(|e| OutboxError::InvalidToken(e.to_string()))?;
        serde_json::from_slice(&bytes).map_err(|e| OutboxError::InvalidToken(e.to_string()))
    }

    /// Wrap a token previously obtained from [`PageToken::as_str`].
    pub fn from_string(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PageToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_is_opaque_and_decodes() {
        let key = ResumeKey {
            timestamp_ms: 1_700_000_000_123,
            id: "msg/with:odd chars".to_string(),
        };
        let token = PageToken::from_key(&key).unwrap();
        assert!(!token.as_str().contains("msg"));
        assert_eq!(token.to_key().unwrap(), key);
    }

    #[test]
    fn test_garbage_token_rejected() {
        let err = PageToken::from_string("not base64 !!").to_key().unwrap_err();
        assert!(matches!(err, OutboxError::InvalidToken(_)));

        let not_json = PageToken::from_string(BASE64.encode(b"plain"));
        assert!(matches!(
            not_json.to_key().unwrap_err(),
            OutboxError::InvalidToken(_)
        ));
    }

    #[test]
    fn test_resume_key_timestamp() {
        let at = DateTime::from_timestamp_millis(42_000).unwrap();
        assert_eq!(ResumeKey::new(at, "a").timestamp(), at);
    }
}
