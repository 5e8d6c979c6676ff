//! Manage command line arguments here.
use clap::{App, Arg};
use std::sync::Arc;

use dohlib::config::{Config, CACHE_TTL_DEFAULT, DEFAULT_PROXY_PORT, RESOLVERS_CNT_DEFAULT};
use dohlib::error::{DnsError, DnsResult};
use dohlib::forwarder::Forwarder;
use dohlib::server;

/// This structure holds the parsed command line: the immutable proxy
/// configuration plus the few switches consumed by `main` itself.
#[derive(Debug)]
pub struct CliOptions {
    pub config: Arc<Config>,
    pub debug: bool,
}

impl CliOptions {
    pub fn options() -> DnsResult<Self> {
        let matches = App::new("dohproxy")
            .version("0.1")
            .about("DNS over HTTPS proxy server")
            .arg(
                Arg::new("server")
                    .short('s')
                    .long("server")
                    .long_help("DoH server to connect to, by name or tag")
                    .takes_value(true),
            )
            .arg(
                Arg::new("zone")
                    .long("zone")
                    .long_help("Geographical zone tag used when picking a server")
                    .takes_value(true),
            )
            .arg(
                Arg::new("proxy-addr")
                    .long("proxy-addr")
                    .long_help("IP address the proxy listens on for DNS queries coming from the local clients")
                    .takes_value(true),
            )
            .arg(
                Arg::new("proxy-addr-any")
                    .long("proxy-addr-any")
                    .long_help("Listen on all available network interfaces")
                    .takes_value(false),
            )
            .arg(
                Arg::new("proxy-port")
                    .long("proxy-port")
                    .long_help("UDP port the proxy listens on")
                    .takes_value(true),
            )
            .arg(
                Arg::new("resolvers")
                    .long("resolvers")
                    .long_help("Number of resolver workers")
                    .takes_value(true),
            )
            .arg(
                Arg::new("cache-ttl")
                    .long("cache-ttl")
                    .long_help("DNS cache TTL in seconds")
                    .takes_value(true),
            )
            .arg(
                Arg::new("certfile")
                    .long("certfile")
                    .long_help("SSL certificate file in PEM format")
                    .takes_value(true),
            )
            .arg(
                Arg::new("ipv6")
                    .long("ipv6")
                    .long_help("Allow AAAA requests")
                    .takes_value(false),
            )
            .arg(
                Arg::new("allow-all-queries")
                    .long("allow-all-queries")
                    .long_help("Allow all DNS query types; by default only A queries are allowed")
                    .takes_value(false),
            )
            .arg(
                Arg::new("nofilter")
                    .long("nofilter")
                    .long_help("No DNS request filtering")
                    .takes_value(false),
            )
            .arg(
                Arg::new("filter-file")
                    .long("filter-file")
                    .long_help("Blocklist file, one domain per line")
                    .takes_value(true),
            )
            .arg(
                Arg::new("forwarder")
                    .long("forwarder")
                    .long_help("Conditional forwarding to a different DNS server, domain@address")
                    .takes_value(true)
                    .multiple_occurrences(true),
            )
            .arg(
                Arg::new("debug")
                    .long("debug")
                    .long_help("Print debug messages")
                    .takes_value(false),
            )
            .get_matches();

        if matches.is_present("proxy-addr") && matches.is_present("proxy-addr-any") {
            return Err(DnsError::config(
                "--proxy-addr and --proxy-addr-any are mutually exclusive",
            ));
        }

        let mut config = Config::default();

        config.server = server::select(matches.value_of("server"), matches.value_of("zone"))?;
        config.proxy_addr_any = matches.is_present("proxy-addr-any");
        if let Some(addr) = matches.value_of("proxy-addr") {
            config.proxy_addr = addr
                .parse()
                .map_err(|_| DnsError::Config(format!("invalid proxy address {}", addr)))?;
        }
        config.proxy_port = parse_number(&matches, "proxy-port", DEFAULT_PROXY_PORT)?;
        config.resolvers = parse_number(&matches, "resolvers", RESOLVERS_CNT_DEFAULT)?;
        config.cache_ttl = parse_number(&matches, "cache-ttl", CACHE_TTL_DEFAULT)?;
        config.certfile = matches.value_of("certfile").map(Into::into);
        config.ipv6 = matches.is_present("ipv6");
        config.allow_all_queries = matches.is_present("allow-all-queries");
        config.nofilter = matches.is_present("nofilter");
        config.filter_file = matches.value_of("filter-file").map(Into::into);
        if let Some(entries) = matches.values_of("forwarder") {
            for entry in entries {
                config.forwarders.push(entry.parse::<Forwarder>()?);
            }
        }

        config.validate()?;

        Ok(CliOptions {
            config: Arc::new(config),
            debug: matches.is_present("debug"),
        })
    }
}

fn parse_number<T: std::str::FromStr>(
    matches: &clap::ArgMatches,
    name: &str,
    default: T,
) -> DnsResult<T> {
    match matches.value_of(name) {
        Some(value) => value
            .parse()
            .map_err(|_| DnsError::Config(format!("invalid value for --{}: {}", name, value))),
        None => Ok(default),
    }
}
