//! Anonymizing transport settings.
//!
//! Peer fetches are routed through a SOCKS proxy (normally a local Tor
//! daemon). The settings are fixed for the lifetime of a history store.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_PROXY_HOST, DEFAULT_PROXY_PORT, PROXY_URL_SCHEME};
use crate::error::SharedError;

/// SOCKS proxy endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProxySettings {
    pub host: String,
    pub port: u16,
}

impl ProxySettings {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Proxy URL in the form the versioned store's transport expects.
    pub fn to_url(&self) -> String {
        format!("{PROXY_URL_SCHEME}://{}:{}", self.host, self.port)
    }
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self::new(DEFAULT_PROXY_HOST, DEFAULT_PROXY_PORT)
    }
}

impl fmt::Display for ProxySettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Parses `host:port`. IPv6 hosts keep their brackets (`[::1]:9050`).
impl FromStr for ProxySettings {
    type Err = SharedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| SharedError::InvalidProxy(format!("expected host:port, got {s:?}")))?;

        if host.is_empty() {
            return Err(SharedError::InvalidProxy("empty host".to_string()));
        }

        let port = port
            .parse::<u16>()
            .map_err(|e| SharedError::InvalidProxy(format!("bad port {port:?}: {e}")))?;

        Ok(Self::new(host, port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_local_tor() {
        let proxy = ProxySettings::default();
        assert_eq!(proxy.to_url(), "socks5h://127.0.0.1:9050");
    }

    #[test]
    fn test_parse_host_port() {
        let proxy: ProxySettings = "tor.internal:9150".parse().unwrap();
        assert_eq!(proxy, ProxySettings::new("tor.internal", 9150));
        assert_eq!(proxy.to_string(), "tor.internal:9150");
    }

    #[test]
    fn test_parse_ipv6() {
        let proxy: ProxySettings = "[::1]:9050".parse().unwrap();
        assert_eq!(proxy.host, "[::1]");
        assert_eq!(proxy.port, 9050);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("localhost".parse::<ProxySettings>().is_err());
        assert!(":9050".parse::<ProxySettings>().is_err());
        assert!("localhost:notaport".parse::<ProxySettings>().is_err());
        assert!("localhost:70000".parse::<ProxySettings>().is_err());
    }
}
