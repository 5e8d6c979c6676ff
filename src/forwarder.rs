//! Conditional forwarding: queries under a configured domain bypass DoH and
//! go to a named plain-DNS server over UDP.
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::str::FromStr;
use std::time::Duration;

use log::debug;

use crate::error::{DnsError, DnsResult};
use crate::lint::MAX_DNS_PACKET_SIZE;

const FORWARD_TIMEOUT: Duration = Duration::from_secs(3);
const DEFAULT_DNS_PORT: u16 = 53;

/// One `domain@address` entry from the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Forwarder {
    pub domain: String,
    pub address: SocketAddr,
}

impl Forwarder {
    /// True when `domain` equals the entry or is a subdomain of it.
    pub fn matches(&self, domain: &str) -> bool {
        let domain = domain.to_ascii_lowercase();
        domain == self.domain || domain.ends_with(&format!(".{}", self.domain))
    }

    /// Relay the raw query and hand back the raw reply.
    pub fn forward(&self, query: &[u8]) -> DnsResult<Vec<u8>> {
        debug!("forwarding to {}", self.address);
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        socket.set_read_timeout(Some(FORWARD_TIMEOUT))?;
        socket.send_to(query, self.address)?;

        let mut buf = [0u8; MAX_DNS_PACKET_SIZE];
        let received = socket.recv(&mut buf)?;
        Ok(buf[..received].to_vec())
    }
}

/// ```
/// use dohlib::forwarder::Forwarder;
///
/// let fwd: Forwarder = "corp.lan@10.0.0.2".parse().unwrap();
/// assert_eq!(fwd.domain, "corp.lan");
/// assert_eq!(fwd.address.port(), 53);
/// assert!(fwd.matches("printer.corp.lan"));
/// assert!(!fwd.matches("corp.lan.evil.com"));
/// ```
impl FromStr for Forwarder {
    type Err = DnsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (domain, address) = s
            .split_once('@')
            .ok_or_else(|| DnsError::config("forwarder entries look like domain@address"))?;
        if domain.is_empty() || address.is_empty() {
            return Err(DnsError::config("forwarder entries look like domain@address"));
        }

        // a bare address gets the default DNS port
        let address = if address.contains(':') {
            address.to_string()
        } else {
            format!("{}:{}", address, DEFAULT_DNS_PORT)
        };
        let address = address
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| DnsError::Config(format!("cannot resolve forwarder address {}", address)))?;

        Ok(Forwarder {
            domain: domain.to_ascii_lowercase(),
            address,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_with_default_port() {
        let fwd: Forwarder = "home.lan@192.168.1.1".parse().unwrap();
        assert_eq!(fwd.domain, "home.lan");
        assert_eq!(fwd.address, "192.168.1.1:53".parse().unwrap());
    }

    #[test]
    fn parse_with_explicit_port() {
        let fwd: Forwarder = "home.lan@192.168.1.1:5353".parse().unwrap();
        assert_eq!(fwd.address.port(), 5353);
    }

    #[test]
    fn parse_rejects_bad_entries() {
        assert!("home.lan".parse::<Forwarder>().is_err());
        assert!("@192.168.1.1".parse::<Forwarder>().is_err());
        assert!("home.lan@".parse::<Forwarder>().is_err());
    }

    #[test]
    fn domain_matching() {
        let fwd: Forwarder = "corp.lan@10.0.0.2".parse().unwrap();
        assert!(fwd.matches("corp.lan"));
        assert!(fwd.matches("HOST.CORP.LAN"));
        assert!(!fwd.matches("othercorp.lan"));
        assert!(!fwd.matches("lan"));
    }
}
