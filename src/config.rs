//! Immutable run-time configuration, built once at start-up and shared by
//! reference with every resolver worker.
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{DnsError, DnsResult};
use crate::forwarder::Forwarder;
use crate::server::DnsServer;

// cache TTL bounds, seconds
pub const CACHE_TTL_MIN: u32 = 60;
pub const CACHE_TTL_MAX: u32 = 3600;
pub const CACHE_TTL_DEFAULT: u32 = 600;

/// Lifetime of a cached NXDOMAIN reply, deliberately short.
pub const CACHE_TTL_ERROR: u32 = 30;

/// Per-worker cache pressure bound.
pub const CACHE_MAX_ENTRIES: usize = 4096;

// resolver worker count bounds
pub const RESOLVERS_CNT_MIN: usize = 1;
pub const RESOLVERS_CNT_MAX: usize = 10;
pub const RESOLVERS_CNT_DEFAULT: usize = 2;

/// Upper bound for one HTTPS transaction buffer.
pub const MAXBUF: usize = 10 * 1024;

/// Default listen address for client queries.
pub const DEFAULT_PROXY_ADDR: &str = "127.1.1.1";
pub const DEFAULT_PROXY_PORT: u16 = 53;

// how often an idle worker wakes up for maintenance
pub const UDP_POLL_INTERVAL: Duration = Duration::from_secs(1);

// hard per-request bound on the upstream link
pub const TLS_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
pub const TLS_IO_TIMEOUT: Duration = Duration::from_secs(5);

/// An open session idle longer than this gets probed.
pub const KEEPALIVE_IDLE: Duration = Duration::from_secs(25);

#[derive(Debug)]
pub struct Config {
    /// the upstream DoH server every worker talks to
    pub server: &'static DnsServer,
    pub proxy_addr: IpAddr,
    pub proxy_port: u16,
    pub proxy_addr_any: bool,
    pub resolvers: usize,
    /// positive cache TTL, seconds, already range checked
    pub cache_ttl: u32,
    pub certfile: Option<PathBuf>,
    /// allow AAAA queries upstream
    pub ipv6: bool,
    /// allow every query type, not just A
    pub allow_all_queries: bool,
    pub nofilter: bool,
    pub filter_file: Option<PathBuf>,
    pub forwarders: Vec<Forwarder>,
}

impl Config {
    /// Range and exclusivity checks; called once after argument parsing.
    pub fn validate(&self) -> DnsResult<()> {
        if !(CACHE_TTL_MIN..=CACHE_TTL_MAX).contains(&self.cache_ttl) {
            return Err(DnsError::Config(format!(
                "please provide a cache TTL between {} and {} seconds",
                CACHE_TTL_MIN, CACHE_TTL_MAX
            )));
        }
        if !(RESOLVERS_CNT_MIN..=RESOLVERS_CNT_MAX).contains(&self.resolvers) {
            return Err(DnsError::Config(format!(
                "the number of resolver workers should be between {} and {}",
                RESOLVERS_CNT_MIN, RESOLVERS_CNT_MAX
            )));
        }
        Ok(())
    }

    /// First forwarder entry covering `domain`, if any.
    pub fn forwarder_for(&self, domain: &str) -> Option<&Forwarder> {
        self.forwarders.iter().find(|f| f.matches(domain))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: crate::server::default_server(),
            proxy_addr: IpAddr::V4(Ipv4Addr::new(127, 1, 1, 1)),
            proxy_port: DEFAULT_PROXY_PORT,
            proxy_addr_any: false,
            resolvers: RESOLVERS_CNT_DEFAULT,
            cache_ttl: CACHE_TTL_DEFAULT,
            certfile: None,
            ipv6: false,
            allow_all_queries: false,
            nofilter: false,
            filter_file: None,
            forwarders: Vec::new(),
        }
    }
}
