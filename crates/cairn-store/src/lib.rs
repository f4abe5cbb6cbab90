//! # cairn-store
//!
//! Replicated, append-only channel histories.
//!
//! Every channel lives in its own directory under a store root and is backed
//! by a git repository: one message file and one commit per appended
//! message, each commit pointing at exactly one parent. The newest commit is
//! the channel's *top of tree*, the value peers compare to detect
//! divergence. [`ChannelRepository`] owns one such history,
//! [`HistoryStore`] tracks all channels known to a node.
//!
//! Commits are authored by a fixed identity at the message's own timestamp,
//! so two peers that order the same messages the same way derive identical
//! commit ids. [`ChannelRepository::pull_changes`] relies on this to make
//! histories converge.

pub mod config;
pub mod history;
pub mod models;
pub mod repository;

mod error;
mod record;
mod sync;

pub use config::StoreConfig;
pub use error::{Result, StoreError};
pub use history::{ChannelHandle, HistoryStore};
pub use models::{CommitId, HistoryEntry};
pub use repository::{ChannelRepository, History};
