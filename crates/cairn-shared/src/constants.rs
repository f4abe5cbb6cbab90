/// Application name
pub const APP_NAME: &str = "Cairn";

/// Identity that authors and commits every history entry
pub const SYSTEM_AUTHOR_NAME: &str = "cairn";
pub const SYSTEM_AUTHOR_EMAIL: &str = "cairn@localhost";

/// Sub-directory of the per-user data directory holding channel histories
pub const CHANNELS_DIR_NAME: &str = "channels";

/// Longest file name accepted for a channel directory or message entry
pub const MAX_ENTRY_NAME_LEN: usize = 255;

/// Default SOCKS endpoint of a local Tor daemon
pub const DEFAULT_PROXY_HOST: &str = "127.0.0.1";
pub const DEFAULT_PROXY_PORT: u16 = 9050;

/// Proxy URL scheme handed to the versioned store. `socks5h` resolves
/// hostnames on the proxy side, which onion addresses require.
pub const PROXY_URL_SCHEME: &str = "socks5h";
