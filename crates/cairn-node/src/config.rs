//! Node configuration loaded from environment variables.
//!
//! Every setting has a default, so the node runs with zero configuration
//! against the per-user data directory. Command line flags override the
//! environment.

use std::path::PathBuf;

use cairn_shared::{ProxySettings, SharedError};
use cairn_store::StoreConfig;

/// Value that switches the proxy off in `CAIRN_PROXY` and `--proxy`.
const PROXY_OFF: &str = "off";

/// Node configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeConfig {
    /// Directory holding one sub-directory per channel.
    /// Env: `CAIRN_DATA_DIR`
    /// Default: the per-user data directory (`<data_dir>/cairn/channels`).
    pub root: Option<PathBuf>,

    /// SOCKS proxy for peer fetches, as `host:port`, or `off`.
    /// Env: `CAIRN_PROXY`
    /// Default: no proxy.
    pub proxy: Option<ProxySettings>,
}

impl NodeConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(dir) = lookup("CAIRN_DATA_DIR") {
            if !dir.is_empty() {
                config.root = Some(PathBuf::from(dir));
            }
        }

        if let Some(value) = lookup("CAIRN_PROXY") {
            match parse_proxy(&value) {
                Ok(proxy) => config.proxy = proxy,
                Err(e) => {
                    tracing::warn!(value = %value, error = %e, "Invalid CAIRN_PROXY, using default");
                }
            }
        }

        // RUST_LOG is read by tracing-subscriber's EnvFilter directly.

        config
    }

    /// Apply command line overrides on top of the environment.
    pub fn override_with(&mut self, root: Option<PathBuf>, proxy: Option<ProxyArg>) {
        if let Some(root) = root {
            self.root = Some(root);
        }
        if let Some(ProxyArg(proxy)) = proxy {
            self.proxy = proxy;
        }
    }

    /// Resolve into the store's configuration.
    pub fn store_config(&self) -> cairn_store::Result<StoreConfig> {
        let root = match &self.root {
            Some(root) => root.clone(),
            None => StoreConfig::default_root()?,
        };
        let config = StoreConfig::new(root);
        Ok(match &self.proxy {
            Some(proxy) => config.with_proxy(proxy.clone()),
            None => config,
        })
    }
}

/// `--proxy` as given on the command line: settings, or explicitly off.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyArg(pub Option<ProxySettings>);

/// clap value parser for `--proxy`.
pub fn parse_proxy_arg(value: &str) -> Result<ProxyArg, SharedError> {
    parse_proxy(value).map(ProxyArg)
}

/// Parse `host:port` or `off`.
pub fn parse_proxy(value: &str) -> Result<Option<ProxySettings>, SharedError> {
    if value.trim().eq_ignore_ascii_case(PROXY_OFF) {
        return Ok(None);
    }
    value.parse().map(Some)
}
