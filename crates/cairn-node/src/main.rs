//! # cairn-node
//!
//! Operator CLI for a node's channel histories.
//!
//! This binary provides:
//! - **Channel management**: create, list and remove channels
//! - **History access**: append messages, print the log and top of tree
//! - **Peer sync**: pull or join a channel from another node's copy,
//!   optionally through a SOCKS proxy

mod cli;
mod config;
mod output;

use std::process;

use anyhow::Context;
use clap::Parser;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use cairn_shared::Message;
use cairn_store::HistoryStore;

use crate::cli::{AppendArgs, Cli, Commands};
use crate::config::NodeConfig;
use crate::output::{render_error, render_rows, render_status, ChannelStatus, ChannelView, EntryView, OutputFormat};

#[tokio::main]
async fn main() {
    // Logs go to stderr so command output on stdout stays machine-readable.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,cairn_store=debug,cairn_node=debug")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let format = cli.format;

    if let Err(err) = run(cli).await {
        eprintln!("{}", render_error(&err, format));
        process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = NodeConfig::from_env();
    config.override_with(cli.root, cli.proxy);
    debug!(?config, "Loaded configuration");

    let mut store = HistoryStore::open(config.store_config()?)
        .await
        .context("failed to open history store")?;

    let rendered = execute(&mut store, cli.command, cli.format).await?;
    println!("{rendered}");
    Ok(())
}

async fn execute(store: &mut HistoryStore, command: Commands, format: OutputFormat) -> anyhow::Result<String> {
    let rendered = match command {
        Commands::Channels => {
            let mut rows = Vec::new();
            for name in store.channel_names() {
                let top = store.channel(&name)?.top_of_tree().await?;
                rows.push(ChannelView { name, top });
            }
            render_rows(&rows, format)?
        }

        Commands::Create { name } => {
            store.create_channel(&name).await?;
            render_status(&ChannelStatus::new(name, "created"), format)?
        }

        Commands::Remove { name } => {
            store.remove_channel(&name).await?;
            render_status(&ChannelStatus::new(name, "removed"), format)?
        }

        Commands::Append(args) => {
            let channel = store.channel(&args.channel)?;
            let message = build_message(&args).await?;
            let top = channel.append_message(&message).await?;
            render_status(&ChannelStatus::new(args.channel, "appended").with_top(Some(top)), format)?
        }

        Commands::Log { channel, oldest_first } => {
            let entries = store.channel(&channel)?.messages(oldest_first).await?;
            let rows: Vec<EntryView> = entries.iter().map(EntryView::from).collect();
            render_rows(&rows, format)?
        }

        Commands::Head { channel } => {
            let top = store.channel(&channel)?.top_of_tree().await?;
            render_rows(&[ChannelView { name: channel, top }], format)?
        }

        Commands::Pull { channel, peer, since } => {
            let integrated = store
                .pull_channel(&channel, &peer, since)
                .await
                .with_context(|| format!("failed to pull {channel} from {peer}"))?;
            let top = store.channel(&channel)?.top_of_tree().await?;
            let status = ChannelStatus::new(channel, "pulled")
                .with_top(top)
                .with_integrated(integrated);
            render_status(&status, format)?
        }

        Commands::Join { channel, peer } => {
            let repo = store
                .join_channel(&channel, &peer)
                .await
                .with_context(|| format!("failed to join {channel} from {peer}"))?;
            let top = repo.top_of_tree().await?;
            render_status(&ChannelStatus::new(channel, "joined").with_top(top), format)?
        }
    };

    Ok(rendered)
}

async fn build_message(args: &AppendArgs) -> anyhow::Result<Message> {
    let content = match (&args.file, &args.text) {
        (Some(path), _) => tokio::fs::read(path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?,
        (None, Some(text)) => text.as_bytes().to_vec(),
        (None, None) => anyhow::bail!("either --file or --text is required"),
    };

    let mut message = Message::new(content, args.signature.clone().unwrap_or_default());
    if let Some(id) = &args.id {
        message.id = id.clone();
    }
    Ok(message)
}
