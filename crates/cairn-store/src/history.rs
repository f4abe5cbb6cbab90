//! Registry of every channel history a node holds.
//!
//! The [`HistoryStore`] owns a root directory with one sub-directory per
//! channel. It is populated once at [`HistoryStore::open`] and then kept in
//! sync with the filesystem by its own create and remove operations.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tokio::fs;
use tracing::{debug, info, warn};

use cairn_shared::names::validate_entry_name;
use cairn_shared::ProxySettings;

use crate::config::StoreConfig;
use crate::error::{Result, StoreError};
use crate::repository::ChannelRepository;

/// Names a channel either directly or through one of its handles.
#[derive(Debug, Clone, Copy)]
pub enum ChannelHandle<'a> {
    Name(&'a str),
    Repository(&'a ChannelRepository),
}

impl<'a> ChannelHandle<'a> {
    pub fn name(&self) -> &'a str {
        match self {
            Self::Name(name) => name,
            Self::Repository(repo) => repo.name(),
        }
    }
}

impl<'a> From<&'a str> for ChannelHandle<'a> {
    fn from(name: &'a str) -> Self {
        Self::Name(name)
    }
}

impl<'a> From<&'a String> for ChannelHandle<'a> {
    fn from(name: &'a String) -> Self {
        Self::Name(name.as_str())
    }
}

impl<'a> From<&'a ChannelRepository> for ChannelHandle<'a> {
    fn from(repo: &'a ChannelRepository) -> Self {
        Self::Repository(repo)
    }
}

/// All channel histories under one root directory.
#[derive(Debug)]
pub struct HistoryStore {
    repos: HashMap<String, ChannelRepository>,
    proxy: Option<ProxySettings>,
    root: PathBuf,
}

impl HistoryStore {
    /// Open the store described by `config`, creating its root if needed.
    ///
    /// Every immediate sub-directory holding a channel history is opened and
    /// registered under its directory name. Sub-directories that are not
    /// histories are skipped.
    pub async fn open(config: StoreConfig) -> Result<Self> {
        let root = if config.root.is_absolute() {
            config.root
        } else {
            std::env::current_dir()?.join(config.root)
        };
        fs::create_dir_all(&root).await?;

        let mut repos = HashMap::new();
        let mut dir = fs::read_dir(&root).await?;
        while let Some(entry) = dir.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            match ChannelRepository::open(entry.path()).await {
                Ok(repo) => {
                    repos.insert(repo.name().to_string(), repo);
                }
                Err(StoreError::NotARepository(path)) => {
                    warn!(path = %path.display(), "Skipping directory without channel history");
                }
                Err(e) => return Err(e),
            }
        }

        info!(root = %root.display(), channels = repos.len(), "Opened history store");
        Ok(Self {
            repos,
            proxy: config.proxy,
            root,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Proxy settings applied to every peer fetch.
    pub fn proxy(&self) -> Option<&ProxySettings> {
        self.proxy.as_ref()
    }

    pub fn channel_exists(&self, name: &str) -> bool {
        self.repos.contains_key(name)
    }

    /// A handle to the named channel.
    pub fn channel(&self, name: &str) -> Result<ChannelRepository> {
        self.repos
            .get(name)
            .cloned()
            .ok_or_else(|| StoreError::ChannelNotFound(name.to_string()))
    }

    /// Names of all known channels, sorted.
    pub fn channel_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.repos.keys().cloned().collect();
        names.sort();
        names
    }

    /// Create an empty history for channel `name` and register it.
    pub async fn create_channel(&mut self, name: &str) -> Result<ChannelRepository> {
        if self.channel_exists(name) {
            return Err(StoreError::ChannelExists(name.to_string()));
        }
        validate_entry_name(name).map_err(StoreError::InvalidChannelName)?;

        let repo = ChannelRepository::create(self.root.join(name)).await?;
        self.repos.insert(name.to_string(), repo.clone());

        info!(channel = name, "Created channel");
        Ok(repo)
    }

    /// Delete a channel and its entire on-disk history.
    ///
    /// This cannot be undone. Fails with [`StoreError::ChannelNotFound`] if
    /// the channel is not registered.
    pub async fn remove_channel<'a>(&mut self, channel: impl Into<ChannelHandle<'a>>) -> Result<()> {
        let name = channel.into().name().to_string();
        let repo = self
            .repos
            .get(&name)
            .ok_or_else(|| StoreError::ChannelNotFound(name.clone()))?;

        fs::remove_dir_all(repo.basedir()).await?;
        self.repos.remove(&name);

        info!(channel = %name, "Removed channel");
        Ok(())
    }

    /// Pull `peer`'s copy of channel `name` through the configured proxy.
    ///
    /// Returns the number of newly integrated entries.
    pub async fn pull_channel(
        &self,
        name: &str,
        peer: &str,
        merge_time_from: Option<DateTime<Utc>>,
    ) -> Result<usize> {
        let repo = self.channel(name)?;
        repo.pull_changes(peer, merge_time_from, self.proxy()).await
    }

    /// Create channel `name` and fill it from `peer`.
    ///
    /// If the pull fails the freshly created channel is removed again.
    pub async fn join_channel(&mut self, name: &str, peer: &str) -> Result<ChannelRepository> {
        let repo = self.create_channel(name).await?;

        let pulled = repo.pull_changes(peer, None, self.proxy()).await;
        match pulled {
            Ok(integrated) => {
                debug!(channel = name, peer, integrated, "Joined channel");
                Ok(repo)
            }
            Err(e) => {
                warn!(channel = name, peer, error = %e, "Join failed, removing channel");
                if let Err(cleanup) = self.remove_channel(name).await {
                    warn!(channel = name, error = %cleanup, "Failed to remove channel after failed join");
                }
                Err(e)
            }
        }
    }
}
