//! # cairn-shared
//!
//! Types shared by every Cairn crate: the [`Message`] appended to a channel
//! history, the anonymizing proxy settings peer sync is routed through, and
//! the naming rules for channels and message entries.

pub mod constants;
pub mod error;
pub mod message;
pub mod names;
pub mod proxy;

pub use error::SharedError;
pub use message::Message;
pub use proxy::ProxySettings;
