//! Request and request identifier types

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

/// Globally unique identifier for a Request
///
/// Generated as a random 128-bit UUID at send time. Replies carry the same
/// identifier back so the caller can be found again.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    /// Generate a fresh random identifier
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Wrap an existing identifier string
    pub fn from_string(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the identifier as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Language tag assigned by the router
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Chinese,
    English,
}

impl Language {
    /// Every supported language, in routing-table order
    pub const ALL: [Language; 2] = [Language::Chinese, Language::English];

    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Chinese => "chinese",
            Language::English => "english",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A user question on its way to a responder pool
///
/// Immutable once created by the router; discarded once its reply is matched
/// or the caller's wait expires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub message_id: RequestId,
    pub user_id: String,
    pub content: String,
    pub language: Language,
    pub timestamp: DateTime<Utc>,
}

impl Request {
    /// Create a request with a freshly generated identifier
    pub fn new(user_id: impl Into<String>, content: impl Into<String>, language: Language) -> Self {
        let message_id = RequestId::generate();
        debug!(%message_id, %language, "Request::new: called");
        Self {
            message_id,
            user_id: user_id.into(),
            content: content.into(),
            language,
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_ids_are_unique() {
        let a = RequestId::generate();
        let b = RequestId::generate();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 36);
    }

    #[test]
    fn test_request_wire_format() {
        let request = Request::new("user-1", "Hello", Language::English);
        let json = serde_json::to_value(&request).unwrap();

        assert_eq!(json["user_id"], "user-1");
        assert_eq!(json["language"], "english");
        assert_eq!(json["message_id"], request.message_id.as_str());
    }

    #[test]
    fn test_language_display() {
        assert_eq!(Language::Chinese.to_string(), "chinese");
        assert_eq!(Language::English.to_string(), "english");
    }
}
