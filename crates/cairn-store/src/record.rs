//! The commit message every history entry carries.
//!
//! ```text
//! append <message-id>
//!
//! Message-Id: <message-id>
//! Timestamp: <RFC 3339, nanoseconds, UTC>
//! Previous-Top: <commit id | none>
//! Signature: <hex>
//! ```
//!
//! `Signature` is omitted when the message has no signature. The author and
//! committer are the fixed system identity at the message timestamp, so the
//! commit id depends only on the parent, the tree and the message itself.

use std::fmt::Write;

use chrono::{DateTime, SecondsFormat, Utc};
use git2::{Oid, Signature, Time};

use cairn_shared::constants::{SYSTEM_AUTHOR_EMAIL, SYSTEM_AUTHOR_NAME};
use cairn_shared::Message;

const KEY_MESSAGE_ID: &str = "Message-Id";
const KEY_TIMESTAMP: &str = "Timestamp";
const KEY_PREVIOUS_TOP: &str = "Previous-Top";
const KEY_SIGNATURE: &str = "Signature";
const NO_PREVIOUS_TOP: &str = "none";

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CommitRecord {
    pub message_id: String,
    pub timestamp: DateTime<Utc>,
    pub previous_top: Option<Oid>,
    pub signature: Vec<u8>,
}

impl CommitRecord {
    pub fn for_message(message: &Message, previous_top: Option<Oid>) -> Self {
        Self {
            message_id: message.id.clone(),
            timestamp: message.timestamp,
            previous_top,
            signature: message.signature.clone(),
        }
    }

    pub fn encode(&self) -> String {
        let mut out = format!("append {}\n\n", self.message_id);
        let _ = writeln!(out, "{KEY_MESSAGE_ID}: {}", self.message_id);
        let _ = writeln!(
            out,
            "{KEY_TIMESTAMP}: {}",
            self.timestamp.to_rfc3339_opts(SecondsFormat::Nanos, true)
        );
        match self.previous_top {
            Some(oid) => {
                let _ = writeln!(out, "{KEY_PREVIOUS_TOP}: {oid}");
            }
            None => {
                let _ = writeln!(out, "{KEY_PREVIOUS_TOP}: {NO_PREVIOUS_TOP}");
            }
        }
        if !self.signature.is_empty() {
            let _ = writeln!(out, "{KEY_SIGNATURE}: {}", hex::encode(&self.signature));
        }
        out
    }

    /// Parse a commit message. The error is a human-readable reason.
    pub fn decode(raw: &str) -> Result<Self, String> {
        let mut message_id = None;
        let mut timestamp = None;
        let mut previous_top = None;
        let mut signature = Vec::new();

        for line in raw.lines().skip(1) {
            let Some((key, value)) = line.split_once(": ") else {
                continue;
            };
            match key {
                KEY_MESSAGE_ID => message_id = Some(value.to_string()),
                KEY_TIMESTAMP => {
                    let parsed = DateTime::parse_from_rfc3339(value)
                        .map_err(|e| format!("bad timestamp {value:?}: {e}"))?;
                    timestamp = Some(parsed.with_timezone(&Utc));
                }
                KEY_PREVIOUS_TOP if value == NO_PREVIOUS_TOP => previous_top = Some(None),
                KEY_PREVIOUS_TOP => {
                    let oid = Oid::from_str(value)
                        .map_err(|e| format!("bad previous top {value:?}: {e}"))?;
                    previous_top = Some(Some(oid));
                }
                KEY_SIGNATURE => {
                    signature =
                        hex::decode(value).map_err(|e| format!("bad signature hex: {e}"))?;
                }
                _ => {}
            }
        }

        Ok(Self {
            message_id: message_id.ok_or("missing Message-Id")?,
            timestamp: timestamp.ok_or("missing Timestamp")?,
            previous_top: previous_top.ok_or("missing Previous-Top")?,
            signature,
        })
    }
}

/// The identity every entry is authored and committed under.
pub(crate) fn system_signature(timestamp: DateTime<Utc>) -> Result<Signature<'static>, git2::Error> {
    Signature::new(
        SYSTEM_AUTHOR_NAME,
        SYSTEM_AUTHOR_EMAIL,
        &Time::new(timestamp.timestamp(), 0),
    )
}
