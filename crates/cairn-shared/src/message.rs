use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::SharedError;
use crate::names::validate_entry_name;

/// A message as handed to a channel history for appending.
///
/// The store never interprets `content` or `signature`; both are opaque
/// bytes (ciphertext and its authenticity proof in practice).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    /// Unique identifier, also the file name the content is stored under.
    pub id: String,
    /// When the author created the message.
    pub timestamp: DateTime<Utc>,
    /// Opaque payload.
    pub content: Vec<u8>,
    /// Opaque authenticity proof (may be empty).
    pub signature: Vec<u8>,
}

impl Message {
    /// New message with a random UUID id, stamped now.
    pub fn new(content: Vec<u8>, signature: Vec<u8>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            content,
            signature,
        }
    }

    /// Message with an explicit id and timestamp and no signature.
    pub fn with_id(id: impl Into<String>, timestamp: DateTime<Utc>, content: Vec<u8>) -> Self {
        Self {
            id: id.into(),
            timestamp,
            content,
            signature: Vec::new(),
        }
    }

    pub fn with_signature(mut self, signature: Vec<u8>) -> Self {
        self.signature = signature;
        self
    }

    /// Check that the id can be used as an entry file name.
    pub fn validate(&self) -> Result<(), SharedError> {
        validate_entry_name(&self.id)
    }
}
