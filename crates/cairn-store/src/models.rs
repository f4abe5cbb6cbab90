//! Values read back out of a channel history.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use git2::Oid;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

// ---------------------------------------------------------------------------
// CommitId
// ---------------------------------------------------------------------------

/// Content address of one commit in a channel history.
///
/// Displays and serializes as 40 lowercase hex characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CommitId(Oid);

impl CommitId {
    pub fn as_oid(&self) -> Oid {
        self.0
    }

    pub fn to_hex(&self) -> String {
        self.0.to_string()
    }

    pub fn short(&self) -> String {
        self.to_hex()[..8].to_string()
    }
}

impl From<Oid> for CommitId {
    fn from(oid: Oid) -> Self {
        Self(oid)
    }
}

impl From<CommitId> for Oid {
    fn from(id: CommitId) -> Self {
        id.0
    }
}

impl fmt::Display for CommitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for CommitId {
    type Err = git2::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Oid::from_str(s).map(Self)
    }
}

impl Serialize for CommitId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for CommitId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let hex = String::deserialize(deserializer)?;
        if hex.len() != 40 {
            return Err(serde::de::Error::custom(format!(
                "commit id must be 40 hex chars, got {}",
                hex.len()
            )));
        }
        hex.parse().map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// HistoryEntry
// ---------------------------------------------------------------------------

/// One appended message as recorded by its commit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HistoryEntry {
    /// The commit that appended this message.
    pub commit: CommitId,
    /// The previous top of tree, `None` for the first message.
    pub parent: Option<CommitId>,
    /// Id of the message, also its file name in the work tree.
    pub message_id: String,
    /// Author timestamp of the message.
    pub timestamp: DateTime<Utc>,
    /// Opaque signature bytes as appended.
    pub signature: Vec<u8>,
    /// Message payload as stored at this commit.
    pub content: Vec<u8>,
}

impl HistoryEntry {
    /// Key that orders entries when histories are merged.
    pub(crate) fn merge_key(&self) -> (DateTime<Utc>, &str) {
        (self.timestamp, self.message_id.as_str())
    }
}
