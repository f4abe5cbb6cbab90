use std::path::PathBuf;

use cairn_shared::SharedError;
use thiserror::Error;

use crate::models::CommitId;

/// Errors produced by the store layer.
#[derive(Error, Debug)]
pub enum StoreError {
    /// No versioned store exists at the given path.
    #[error("Not a valid history store: {0}")]
    NotARepository(PathBuf),

    /// `create` found an existing store at the path.
    #[error("History store already initialized at {0}")]
    AlreadyInitialized(PathBuf),

    #[error("Channel already exists: {0}")]
    ChannelExists(String),

    #[error("Channel does not exist: {0}")]
    ChannelNotFound(String),

    #[error("Invalid channel name: {0}")]
    InvalidChannelName(#[source] SharedError),

    #[error("Invalid message id: {0}")]
    InvalidMessageId(#[source] SharedError),

    /// A message with this id is already part of the history.
    #[error("Message already in history: {0}")]
    DuplicateMessage(String),

    #[error("Message not found: {0}")]
    MessageNotFound(String),

    /// A commit does not follow the channel history format.
    #[error("Malformed commit {commit}: {reason}")]
    MalformedCommit { commit: CommitId, reason: String },

    /// The requested operation cannot be carried out with this configuration.
    #[error("Not supported: {0}")]
    Unsupported(String),

    /// Failed to determine a platform data directory.
    #[error("Could not determine application data directory")]
    NoDataDir,

    #[error("Git error: {0}")]
    Git(#[from] git2::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A blocking store task panicked or was cancelled.
    #[error("Store task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl StoreError {
    pub(crate) fn malformed(commit: impl Into<CommitId>, reason: impl Into<String>) -> Self {
        Self::MalformedCommit {
            commit: commit.into(),
            reason: reason.into(),
        }
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;
