//! CLI output formatting (table, JSON).

use chrono::{DateTime, SecondsFormat, Utc};
use comfy_table::{Cell, Table};
use serde::Serialize;

use cairn_store::{CommitId, HistoryEntry};

/// Output format for CLI commands.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table format.
    #[default]
    Table,
    /// Machine-readable JSON format.
    Json,
}

/// Types that render as rows of a table.
pub trait TableRow {
    const HEADERS: &'static [&'static str];

    fn to_row(&self) -> Vec<String>;
}

/// Structured CLI response.
#[derive(Debug, Serialize)]
struct CliResponse<T: Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ChannelView {
    pub name: String,
    pub top: Option<CommitId>,
}

impl TableRow for ChannelView {
    const HEADERS: &'static [&'static str] = &["CHANNEL", "TOP"];

    fn to_row(&self) -> Vec<String> {
        vec![self.name.clone(), top_label(self.top.as_ref())]
    }
}

/// One history entry without its payload.
#[derive(Debug, Serialize)]
pub struct EntryView {
    pub commit: CommitId,
    pub message_id: String,
    pub timestamp: DateTime<Utc>,
    pub size: usize,
    pub signature: String,
}

impl From<&HistoryEntry> for EntryView {
    fn from(entry: &HistoryEntry) -> Self {
        Self {
            commit: entry.commit,
            message_id: entry.message_id.clone(),
            timestamp: entry.timestamp,
            size: entry.content.len(),
            signature: hex::encode(&entry.signature),
        }
    }
}

impl TableRow for EntryView {
    const HEADERS: &'static [&'static str] = &["COMMIT", "ID", "TIMESTAMP", "BYTES"];

    fn to_row(&self) -> Vec<String> {
        vec![
            self.commit.short(),
            self.message_id.clone(),
            self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
            self.size.to_string(),
        ]
    }
}

/// Outcome of a mutating command.
#[derive(Debug, Serialize)]
pub struct ChannelStatus {
    pub channel: String,
    pub action: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top: Option<CommitId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub integrated: Option<usize>,
}

impl ChannelStatus {
    pub fn new(channel: impl Into<String>, action: &'static str) -> Self {
        Self {
            channel: channel.into(),
            action,
            top: None,
            integrated: None,
        }
    }

    pub fn with_top(mut self, top: Option<CommitId>) -> Self {
        self.top = top;
        self
    }

    pub fn with_integrated(mut self, integrated: usize) -> Self {
        self.integrated = Some(integrated);
        self
    }

    fn summary(&self) -> String {
        let mut line = format!("{} {}", self.action, self.channel);
        if let Some(integrated) = self.integrated {
            line.push_str(&format!(": {integrated} new entries"));
        }
        if self.top.is_some() || self.integrated.is_some() {
            line.push_str(&format!(" (top {})", top_label(self.top.as_ref())));
        }
        line
    }
}

fn top_label(top: Option<&CommitId>) -> String {
    top.map_or_else(|| "(empty)".to_string(), CommitId::to_hex)
}

fn to_json<T: Serialize>(data: T) -> serde_json::Result<String> {
    serde_json::to_string_pretty(&CliResponse {
        success: true,
        data: Some(data),
        error: None,
    })
}

/// Helper to create a table with headers.
fn create_table(headers: &[&str]) -> Table {
    let mut table = Table::new();
    table.load_preset(comfy_table::presets::NOTHING);
    table.set_header(headers.iter().map(|h| Cell::new(*h)));
    table
}

/// Render `rows` as a table or a JSON array.
pub fn render_rows<T: Serialize + TableRow>(rows: &[T], format: OutputFormat) -> serde_json::Result<String> {
    match format {
        OutputFormat::Json => to_json(rows),
        OutputFormat::Table => {
            let mut table = create_table(T::HEADERS);
            for row in rows {
                table.add_row(row.to_row());
            }
            Ok(table.to_string())
        }
    }
}

pub fn render_status(status: &ChannelStatus, format: OutputFormat) -> serde_json::Result<String> {
    match format {
        OutputFormat::Json => to_json(status),
        OutputFormat::Table => Ok(status.summary()),
    }
}

/// Render a failed command for stderr.
pub fn render_error(err: &anyhow::Error, format: OutputFormat) -> String {
    let message = format!("{err:#}");
    match format {
        OutputFormat::Json => {
            let response = CliResponse::<()> {
                success: false,
                data: None,
                error: Some(message.clone()),
            };
            serde_json::to_string_pretty(&response).unwrap_or(message)
        }
        OutputFormat::Table => format!("Error: {message}"),
    }
}
