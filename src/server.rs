//! Built-in catalog of upstream DoH servers and the SNI cloaking decoys.
use rand::Rng;

use crate::error::{DnsError, DnsResult};

/// One upstream DoH endpoint. `address` is where the TCP connection goes;
/// `host` is the HTTP Host header and, unless the entry opts out of SNI,
/// the TLS server name as well.
#[derive(Debug)]
pub struct DnsServer {
    pub name: &'static str,
    pub tags: &'static str,
    pub address: &'static str,
    pub host: &'static str,
    pub path: &'static str,
    /// present the real hostname in the ClientHello; when false a decoy
    /// from `sni_cloak` is sent instead
    pub sni: bool,
}

impl DnsServer {
    /// The HTTP/1.1 POST skeleton for one DNS-message body of `content_len`
    /// bytes. The raw DNS wire follows the blank line.
    pub fn http_request(&self, content_len: usize) -> String {
        format!(
            "POST {} HTTP/1.1\r\nHost: {}\r\nAccept: application/dns-message\r\nContent-Type: application/dns-message\r\nContent-Length: {}\r\n\r\n",
            self.path, self.host, content_len
        )
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.split(',').any(|t| t == tag)
    }
}

// the zone tags below follow the catalog convention: americas, europe, asiapac
static CATALOG: &[DnsServer] = &[
    DnsServer {
        name: "cloudflare",
        tags: "anycast,americas,europe,asiapac",
        address: "1.1.1.1:443",
        host: "cloudflare-dns.com",
        path: "/dns-query",
        sni: true,
    },
    DnsServer {
        name: "cloudflare-security",
        tags: "anycast,security,americas,europe,asiapac",
        address: "1.1.1.2:443",
        host: "security.cloudflare-dns.com",
        path: "/dns-query",
        sni: true,
    },
    DnsServer {
        name: "quad9",
        tags: "anycast,security,americas,europe",
        address: "9.9.9.9:443",
        host: "dns.quad9.net",
        path: "/dns-query",
        sni: true,
    },
    DnsServer {
        name: "adguard",
        tags: "adblocker,europe",
        address: "94.140.14.14:443",
        host: "dns.adguard.com",
        path: "/dns-query",
        sni: true,
    },
    DnsServer {
        name: "applied-privacy",
        tags: "europe",
        address: "146.255.56.98:443",
        host: "doh.applied-privacy.net",
        path: "/query",
        sni: false,
    },
];

pub fn catalog() -> &'static [DnsServer] {
    CATALOG
}

/// The server used when nothing is configured.
pub fn default_server() -> &'static DnsServer {
    &CATALOG[0]
}

/// Pick a server: an explicit selector matches a name first, then a tag; with
/// only a zone, the first server tagged for it wins; otherwise the catalog
/// default. An unmatched selector is a startup error.
pub fn select(selector: Option<&str>, zone: Option<&str>) -> DnsResult<&'static DnsServer> {
    if let Some(wanted) = selector {
        if let Some(srv) = CATALOG.iter().find(|s| s.name == wanted) {
            return Ok(srv);
        }
        if let Some(srv) = CATALOG.iter().find(|s| s.has_tag(wanted)) {
            return Ok(srv);
        }
        return Err(DnsError::Config(format!(
            "no server in the catalog matches {}",
            wanted
        )));
    }
    if let Some(zone) = zone {
        if let Some(srv) = CATALOG.iter().find(|s| s.has_tag(zone)) {
            return Ok(srv);
        }
    }
    Ok(default_server())
}

// plausible high-traffic names for the ClientHello of cloaked sessions
static DECOYS: &[&str] = &[
    "www.wikipedia.org",
    "www.bing.com",
    "www.github.com",
    "www.stackoverflow.com",
];

/// A decoy hostname for servers that opt out of true SNI.
pub fn sni_cloak() -> &'static str {
    let mut rng = rand::thread_rng();
    DECOYS[rng.gen_range(0..DECOYS.len())]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_skeleton() {
        let srv = default_server();
        let req = srv.http_request(33);
        assert!(req.starts_with("POST /dns-query HTTP/1.1\r\n"));
        assert!(req.contains("Host: cloudflare-dns.com\r\n"));
        assert!(req.contains("Content-Type: application/dns-message\r\n"));
        assert!(req.contains("Content-Length: 33\r\n"));
        assert!(req.ends_with("\r\n\r\n"));
    }

    #[test]
    fn select_by_name() {
        let srv = select(Some("quad9"), None).unwrap();
        assert_eq!(srv.name, "quad9");
    }

    #[test]
    fn select_by_tag() {
        let srv = select(Some("adblocker"), None).unwrap();
        assert_eq!(srv.name, "adguard");
    }

    #[test]
    fn select_by_zone() {
        let srv = select(None, Some("europe")).unwrap();
        assert!(srv.has_tag("europe"));
    }

    #[test]
    fn select_unknown_fails() {
        assert!(select(Some("no-such-server"), None).is_err());
    }

    #[test]
    fn cloak_returns_a_decoy() {
        let decoy = sni_cloak();
        assert!(DECOYS.contains(&decoy));
        // a decoy never leaks a real upstream hostname
        assert!(CATALOG.iter().all(|s| s.host != decoy));
    }

    #[test]
    fn catalog_has_a_cloaked_entry() {
        assert!(catalog().iter().any(|s| !s.sni));
    }
}
