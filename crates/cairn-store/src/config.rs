//! Store configuration.

use std::path::PathBuf;

use cairn_shared::constants::CHANNELS_DIR_NAME;
use cairn_shared::ProxySettings;
use directories::ProjectDirs;

use crate::error::{Result, StoreError};

/// Where a [`crate::HistoryStore`] keeps its channels and how it reaches peers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Directory holding one sub-directory per channel.
    pub root: PathBuf,
    /// Proxy that peer fetches are routed through, if any.
    pub proxy: Option<ProxySettings>,
}

impl StoreConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            proxy: None,
        }
    }

    pub fn with_proxy(mut self, proxy: ProxySettings) -> Self {
        self.proxy = Some(proxy);
        self
    }

    /// Configuration rooted at the per-user data directory, without proxy.
    pub fn from_default_dirs() -> Result<Self> {
        Ok(Self::new(Self::default_root()?))
    }

    /// The per-user channel directory:
    /// - Linux:   `~/.local/share/cairn/channels`
    /// - macOS:   `~/Library/Application Support/org.cairn.cairn/channels`
    /// - Windows: `{FOLDERID_RoamingAppData}\cairn\cairn\data\channels`
    pub fn default_root() -> Result<PathBuf> {
        let project_dirs = ProjectDirs::from("org", "cairn", "cairn").ok_or(StoreError::NoDataDir)?;
        Ok(project_dirs.data_dir().join(CHANNELS_DIR_NAME))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let config = StoreConfig::new("/tmp/cairn").with_proxy(ProxySettings::default());
        assert_eq!(config.root, PathBuf::from("/tmp/cairn"));
        assert_eq!(config.proxy, Some(ProxySettings::default()));
    }
}
