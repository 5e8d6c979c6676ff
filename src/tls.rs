//! The persistent TLS session each resolver worker keeps to its DoH server:
//! one HTTP/1.1 POST per query, Content-Length framing, one-shot retry on
//! transport hiccups, forced teardown on anything the framing parser refuses.
use std::io;
use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};

use log::{debug, error, info, warn};
use openssl::ssl::{
    HandshakeError, ShutdownResult, SslConnector, SslMethod, SslStream, SslVerifyMode,
};
use openssl::x509::X509VerifyResult;

use crate::config::{MAXBUF, TLS_CONNECT_TIMEOUT, TLS_IO_TIMEOUT};
use crate::error::{DnsError, DnsResult, LintError};
use crate::lint::lint_rx;
use crate::server::{sni_cloak, DnsServer};

/// The probe sent through a freshly opened session: `www.example.com A IN`,
/// transaction id zero. A literal, well-known question gives the reconnect
/// path a deterministic validation payload.
pub const KEEPALIVE_QUERY: [u8; 33] = [
    0x00, 0x00, 0x01, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x03, 0x77, 0x77,
    0x77, 0x07, 0x65, 0x78, 0x61, 0x6d, 0x70, 0x6c, 0x65, 0x03, 0x63, 0x6f, 0x6d, 0x00, 0x00,
    0x01, 0x00, 0x01,
];

// conventional root bundle locations, tried when no --certfile is given
static CERT_BUNDLES: &[&str] = &[
    "/etc/ssl/certs/ca-certificates.crt", // Debian/Ubuntu
    "/etc/ssl/certs/ca-bundle.crt",       // Fedora/CentOS
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Closed,
    Open,
}

pub struct TlsSession {
    id: usize,
    server: &'static DnsServer,
    certfile: Option<PathBuf>,
    state: SessionState,
    stream: Option<SslStream<TcpStream>>,
}

impl TlsSession {
    pub fn new(id: usize, server: &'static DnsServer, certfile: Option<PathBuf>) -> Self {
        Self {
            id,
            server,
            certfile,
            state: SessionState::Closed,
            stream: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == SessionState::Open
    }

    fn connector(&self) -> DnsResult<SslConnector> {
        let mut builder = SslConnector::builder(SslMethod::tls())?;
        builder.set_verify(SslVerifyMode::PEER);
        match &self.certfile {
            Some(path) => builder.set_ca_file(path)?,
            None => match CERT_BUNDLES.iter().find(|p| Path::new(p).exists()) {
                Some(bundle) => builder.set_ca_file(bundle)?,
                None => builder.set_default_verify_paths()?,
            },
        }
        Ok(builder.build())
    }

    /// Connect, verify the peer and probe the tunnel with the keepalive
    /// query. On any failure the state stays `Closed` so the caller can try
    /// again with the next query.
    pub fn open(&mut self) -> DnsResult<()> {
        if self.is_open() {
            return Ok(());
        }

        let connector = self.connector()?;
        let addr = self
            .server
            .address
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| DnsError::Tls(format!("cannot resolve {}", self.server.address)))?;
        let tcp = TcpStream::connect_timeout(&addr, TLS_CONNECT_TIMEOUT)?;
        tcp.set_nodelay(true)?;
        tcp.set_read_timeout(Some(TLS_IO_TIMEOUT))?;
        tcp.set_write_timeout(Some(TLS_IO_TIMEOUT))?;

        // hostname checking stays off: the chain is verified against the
        // root store, and cloaked servers present a decoy name anyway
        let mut session = connector.configure()?;
        session.set_verify_hostname(false);
        let sni = if self.server.sni {
            self.server.host
        } else {
            sni_cloak()
        };

        debug!("({}) connecting to {} (SNI {})", self.id, self.server.address, sni);
        let stream = match session.connect(sni, tcp) {
            Ok(stream) => stream,
            Err(e) => {
                if let HandshakeError::Failure(mid) = &e {
                    let verify = mid.ssl().verify_result();
                    if verify != X509VerifyResult::OK {
                        error!(
                            "({}) cannot handle certificate verification (error {}): {}",
                            self.id,
                            verify.as_raw(),
                            verify.error_string()
                        );
                        return Err(DnsError::Tls(verify.error_string().to_string()));
                    }
                }
                error!("({}) TLS handshake failed: {}", self.id, e);
                return Err(DnsError::Tls(e.to_string()));
            }
        };

        let verify = stream.ssl().verify_result();
        if verify != X509VerifyResult::OK {
            error!(
                "({}) cannot handle certificate verification (error {}): {}",
                self.id,
                verify.as_raw(),
                verify.error_string()
            );
            return Err(DnsError::Tls(verify.error_string().to_string()));
        }

        self.stream = Some(stream);
        self.state = SessionState::Open;
        info!("({}) TLS connection opened", self.id);

        // confirm the tunnel actually carries DNS before using it
        self.keepalive()?;
        Ok(())
    }

    /// One DoH transaction: POST the query, read the Content-Length-bounded
    /// body, hand back exactly the DNS reply bytes. Any framing or transport
    /// failure tears the session down; the caller reopens on the next query.
    pub fn transact(&mut self, query: &[u8]) -> DnsResult<Vec<u8>> {
        let mut stream = match self.stream.take() {
            Some(stream) if self.is_open() => stream,
            _ => return Err(DnsError::Tls(String::from("session is not open"))),
        };

        match transact_on(&mut stream, self.server, query, self.id) {
            Ok(reply) => {
                self.stream = Some(stream);
                Ok(reply)
            }
            Err(e) => {
                shutdown_stream(&mut stream);
                self.state = SessionState::Closed;
                info!("({}) TLS connection closed", self.id);
                Err(e)
            }
        }
    }

    /// Probe the open session and discard the answer. The transaction must
    /// succeed; the lint verdict on the answer is informational only.
    pub fn keepalive(&mut self) -> DnsResult<()> {
        debug!("({}) send keepalive", self.id);
        let reply = self.transact(&KEEPALIVE_QUERY)?;
        match lint_rx(&reply) {
            Ok(_) | Err(DnsError::Lint(LintError::NxDomain)) => (),
            Err(e) => debug!("({}) keepalive reply refused: {}", self.id, e),
        }
        Ok(())
    }

    /// Graceful shutdown; a no-op when already closed.
    pub fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            shutdown_stream(&mut stream);
            info!("({}) TLS connection closed", self.id);
        }
        self.state = SessionState::Closed;
    }
}

// close_notify; when only our side went out, wait for the peer's
fn shutdown_stream(stream: &mut SslStream<TcpStream>) {
    if let Ok(ShutdownResult::Sent) = stream.shutdown() {
        let _ = stream.shutdown();
    }
}

/// Parsed frame of one HTTP reply: where the headers end and how many body
/// bytes follow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpReply {
    pub header_len: usize,
    pub content_len: usize,
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn find_ignore_case(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|w| w.eq_ignore_ascii_case(needle))
}

/// Validate the status line, locate the header terminator and decode the
/// `Content-Length` header. A length pushing the total past `MAXBUF` is
/// refused; a zero length is legal here and left to the caller.
pub fn parse_http_reply(buf: &[u8]) -> DnsResult<HttpReply> {
    if find(buf, b"200 OK").is_none() {
        return Err(DnsError::Http(String::from("200 OK not received")));
    }

    let header_len = match find(buf, b"\r\n\r\n") {
        Some(pos) => pos + 4,
        None => return Err(DnsError::Http(String::from("incomplete HTTP header"))),
    };

    let headers = &buf[..header_len];
    let tag = b"content-length:";
    let value_start = match find_ignore_case(headers, tag) {
        Some(pos) => pos + tag.len(),
        None => return Err(DnsError::Http(String::from("Content-Length missing"))),
    };

    let digits: String = headers[value_start..]
        .iter()
        .skip_while(|c| **c == b' ' || **c == b'\t')
        .take_while(|c| c.is_ascii_digit())
        .map(|c| *c as char)
        .collect();
    let content_len: usize = digits
        .parse()
        .map_err(|_| DnsError::Http(String::from("unparsable Content-Length")))?;

    if header_len + content_len >= MAXBUF {
        return Err(DnsError::Http(String::from("invalid length")));
    }

    Ok(HttpReply {
        header_len,
        content_len,
    })
}

// transport retry hint: these are worth exactly one more try
fn retryable(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted | io::ErrorKind::TimedOut
    )
}

// write the whole buffer; one retry on a short or hinted-retryable write
fn write_with_retry(w: &mut impl Write, buf: &[u8]) -> io::Result<()> {
    let written = match w.write(buf) {
        Ok(n) => n,
        Err(e) if retryable(&e) => 0,
        Err(e) => return Err(e),
    };
    if written == buf.len() {
        return Ok(());
    }
    let remaining = &buf[written..];
    if w.write(remaining)? == remaining.len() {
        Ok(())
    } else {
        Err(io::Error::new(io::ErrorKind::WriteZero, "short SSL write"))
    }
}

// one read; one retry on a hinted-retryable failure
fn read_with_retry(r: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    match r.read(buf) {
        Ok(n) => Ok(n),
        Err(e) if retryable(&e) => r.read(buf),
        Err(e) => Err(e),
    }
}

// The framing logic proper, generic over the byte stream so it can be
// exercised without a TLS peer. Errors returned from here tear the session
// down in `transact`; the empty Content-Length: 0 reply deliberately does
// not.
fn transact_on<S: Read + Write>(
    stream: &mut S,
    server: &DnsServer,
    query: &[u8],
    id: usize,
) -> DnsResult<Vec<u8>> {
    let head = server.http_request(query.len());
    if head.len() + query.len() >= MAXBUF {
        return Err(DnsError::Http(String::from("request larger than MAXBUF")));
    }
    let mut tx = Vec::with_capacity(head.len() + query.len());
    tx.extend_from_slice(head.as_bytes());
    tx.extend_from_slice(query);

    debug!("({}) *** SSL transaction ***", id);
    if let Err(e) = write_with_retry(stream, &tx) {
        warn!("({}) failed SSL write: {}", id, e);
        return Err(e.into());
    }

    let mut buf = vec![0u8; MAXBUF];
    let mut len = match read_with_retry(stream, &mut buf) {
        Ok(0) => {
            warn!("({}) SSL connection is probably closed", id);
            return Err(DnsError::Tls(String::from("connection closed by peer")));
        }
        Ok(n) => n,
        Err(e) => {
            warn!("({}) failed SSL read: {}", id, e);
            return Err(e.into());
        }
    };

    let reply = parse_http_reply(&buf[..len])?;
    if reply.content_len == 0 {
        // "Content-Length: 0" is an HTTP-level error; the session stays up
        warn!("({}) HTTP reply carries no data", id);
        return Ok(Vec::new());
    }

    let total = reply.header_len + reply.content_len;
    while len < total {
        match read_with_retry(stream, &mut buf[len..total]) {
            Ok(0) => {
                warn!("({}) SSL connection is probably closed", id);
                return Err(DnsError::Tls(String::from("connection closed by peer")));
            }
            Ok(n) => len += n,
            Err(e) => {
                warn!("({}) failed SSL read: {}", id, e);
                return Err(e.into());
            }
        }
    }

    debug!("({}) *** SSL transaction end ***", id);
    Ok(buf[total - reply.content_len..total].to_vec())
}
