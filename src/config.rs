//! Fixed resolver pools, timeouts and command-line value parsing.

use std::net::SocketAddr;
use std::time::Duration;

use crate::error::Error;

/// Largest DNS message accepted or advertised over UDP.
pub const MAX_UDP_MESSAGE_SIZE: usize = 65535;

/// Bound on a whole DoH lookup, provider race included.
pub const DOH_TIMEOUT: Duration = Duration::from_secs(10);

/// Per-exchange timeout for plain UDP upstreams.
pub const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(2);

/// Environment variable that turns on debug logging when set to `1`.
pub const DEBUG_ENV: &str = "IDNS_DEBUG";

pub const DEFAULT_LISTEN_ADDR: &str = ":5353";
pub const DEFAULT_UPSTREAMS: &str = "114.114.114.114:53,8.8.8.8:53";

/// UDP pool for policy-listed names when every DoH provider fails.
pub const POLICY_UPSTREAMS: [&str; 4] = [
    "8.8.8.8:53",
    "8.8.4.4:53",
    "1.1.1.1:53",
    "114.114.114.114:53",
];

/// DoH providers raced for policy-listed names: (name, endpoint).
pub const DOH_PROVIDERS: [(&str, &str); 3] = [
    ("quad9", "https://dns.quad9.net/dns-query"),
    ("cloudflare", "https://cloudflare-dns.com/dns-query"),
    ("google", "https://dns.google/dns-query"),
];

/// Whether the debug toggle is set in the process environment.
///
/// Read once at startup; components receive the result as a plain value.
pub fn debug_from_env() -> bool {
    std::env::var(DEBUG_ENV).is_ok_and(|v| v == "1")
}

/// Parse a listen address. A bare `:port` binds every IPv4 interface.
pub fn parse_listen_addr(addr: &str) -> Result<SocketAddr, Error> {
    let addr = addr.trim();
    let full = if addr.starts_with(':') {
        format!("0.0.0.0{addr}")
    } else {
        addr.to_string()
    };
    full.parse().map_err(|_| Error::ListenAddr(addr.to_string()))
}

/// Split a comma-separated `host:port` list, dropping empty entries.
pub fn parse_upstreams(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

pub fn policy_upstreams() -> Vec<String> {
    POLICY_UPSTREAMS.iter().map(|s| s.to_string()).collect()
}
