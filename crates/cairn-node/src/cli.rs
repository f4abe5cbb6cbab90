//! Command line definitions.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};

use crate::config::{parse_proxy_arg, ProxyArg};
use crate::output::OutputFormat;

/// Cairn node - replicated channel histories.
#[derive(Parser, Debug)]
#[command(name = "cairn-node")]
#[command(version, about)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Directory holding the channel histories (overrides CAIRN_DATA_DIR)
    #[arg(long, global = true, value_name = "DIR")]
    pub root: Option<PathBuf>,

    /// SOCKS proxy for peer fetches as HOST:PORT, or "off" (overrides CAIRN_PROXY)
    #[arg(long, global = true, value_name = "HOST:PORT", value_parser = parse_proxy_arg)]
    pub proxy: Option<ProxyArg>,

    /// Output format
    #[arg(long, short = 'f', global = true, default_value = "table")]
    pub format: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List channels
    Channels,
    /// Create an empty channel
    Create { name: String },
    /// Delete a channel and its history
    Remove { name: String },
    /// Append a message to a channel
    Append(AppendArgs),
    /// Show a channel's history
    Log {
        channel: String,
        /// Oldest entry first
        #[arg(long)]
        oldest_first: bool,
    },
    /// Show a channel's top of tree
    Head { channel: String },
    /// Merge a peer's copy of a channel
    Pull {
        channel: String,
        /// Git URL or path of the peer's channel directory
        peer: String,
        /// Ignore peer entries older than this RFC 3339 timestamp
        #[arg(long)]
        since: Option<DateTime<Utc>>,
    },
    /// Create a channel from a peer's copy
    Join { channel: String, peer: String },
}

#[derive(Args, Debug)]
pub struct AppendArgs {
    pub channel: String,

    /// Message id (default: random UUID)
    #[arg(long)]
    pub id: Option<String>,

    /// Read the content from a file
    #[arg(long, conflicts_with = "text", required_unless_present = "text")]
    pub file: Option<PathBuf>,

    /// Use TEXT as the content
    #[arg(long)]
    pub text: Option<String>,

    /// Hex-encoded signature stored alongside the message
    #[arg(long, value_parser = parse_hex)]
    pub signature: Option<HexBytes>,
}

/// Raw bytes given as one hex argument. clap reads a field spelled `Vec<_>`
/// as a list of values, so the alias keeps it a single value.
pub type HexBytes = Vec<u8>;

fn parse_hex(value: &str) -> Result<HexBytes, hex::FromHexError> {
    hex::decode(value)
}
