//! The resolver worker: one UDP-facing socket, one TLS session, one cache.
//! Queries are handled strictly one at a time, in arrival order.
use std::io::Cursor;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use log::{debug, info, warn};
use rand::Rng;

use crate::cache::Cache;
use crate::config::{Config, KEEPALIVE_IDLE};
use crate::error::{DnsError, DnsResult, LintError};
use crate::filter::Filter;
use crate::lint::{
    lint_rx, parse_header, parse_question, DnsQuestion, MAX_DNS_PACKET_SIZE, QTYPE_A, QTYPE_AAAA,
};
use crate::stats::Stats;
use crate::tls::TlsSession;
use crate::wire::{rewrite_id, synth_header_reply, synth_reply, RCODE_FORMERR, RCODE_NXDOMAIN, RCODE_SERVFAIL};

/// What the type policy decided for a question.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryPolicy {
    Allow,
    Refuse,
}

/// Only A queries pass by default; AAAA needs `--ipv6` and anything else
/// `--allow-all-queries`. A refused query is answered locally with NXDOMAIN.
pub fn query_policy(qtype: u16, config: &Config) -> QueryPolicy {
    if config.allow_all_queries {
        return QueryPolicy::Allow;
    }
    match qtype {
        QTYPE_A => QueryPolicy::Allow,
        QTYPE_AAAA if config.ipv6 => QueryPolicy::Allow,
        _ => QueryPolicy::Refuse,
    }
}

pub struct Resolver {
    id: usize,
    socket: UdpSocket,
    session: TlsSession,
    cache: Cache,
    config: Arc<Config>,
    filter: Arc<Filter>,
    stats: Arc<Stats>,
    shutdown: Arc<AtomicBool>,
    last_activity: Instant,
}

impl Resolver {
    pub fn new(
        id: usize,
        socket: UdpSocket,
        config: Arc<Config>,
        filter: Arc<Filter>,
        stats: Arc<Stats>,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        let session = TlsSession::new(id, config.server, config.certfile.clone());
        Self {
            id,
            socket,
            session,
            cache: Cache::new(),
            config,
            filter,
            stats,
            shutdown,
            last_activity: Instant::now(),
        }
    }

    /// The worker loop. Never returns until shutdown is requested; transport
    /// trouble closes the session and the next query reopens it.
    pub fn run(&mut self) {
        info!("({}) resolver started", self.id);
        let mut buf = [0u8; MAX_DNS_PACKET_SIZE];

        while !self.shutdown.load(Ordering::Relaxed) {
            match self.socket.recv_from(&mut buf) {
                Ok((received, peer)) => {
                    self.stats.count_query();
                    if let Err(e) = self.handle_query(&buf[..received], peer) {
                        debug!("({}) query from {} dropped: {}", self.id, peer, e);
                    }
                    self.last_activity = Instant::now();
                }
                Err(e)
                    if e.kind() == std::io::ErrorKind::WouldBlock
                        || e.kind() == std::io::ErrorKind::TimedOut =>
                {
                    self.tick();
                }
                Err(e) => {
                    warn!("({}) receive error: {}", self.id, e);
                }
            }
        }

        self.session.close();
        info!("({}) resolver exiting", self.id);
    }

    // idle maintenance: drop stale cache entries, keep the tunnel warm
    fn tick(&mut self) {
        self.cache.purge(Instant::now());
        if self.session.is_open() && self.last_activity.elapsed() >= KEEPALIVE_IDLE {
            if let Err(e) = self.session.keepalive() {
                debug!("({}) keepalive failed: {}", self.id, e);
            }
            self.last_activity = Instant::now();
        }
    }

    fn handle_query(&mut self, pkt: &[u8], peer: SocketAddr) -> DnsResult<()> {
        let mut cursor = Cursor::new(pkt);

        // a datagram too short for a header is silently dropped
        let header = parse_header(&mut cursor)?;
        if header.is_response() {
            return Ok(());
        }

        if header.questions != 1 {
            self.socket
                .send_to(&synth_header_reply(header.id, RCODE_FORMERR), peer)?;
            return Ok(());
        }

        let question = match parse_question(&mut cursor) {
            Ok(question) => question,
            Err(e) => {
                debug!("({}) {}", self.id, e);
                self.socket
                    .send_to(&synth_header_reply(header.id, RCODE_FORMERR), peer)?;
                return Ok(());
            }
        };
        let domain = question.domain.to_ascii_lowercase();
        debug!("({}) query {} type {}", self.id, domain, question.qtype);

        // type policy: refused types never leave the proxy
        if query_policy(question.qtype, &self.config) == QueryPolicy::Refuse {
            self.send_synth(pkt, &question, RCODE_NXDOMAIN, peer)?;
            return Ok(());
        }

        // filter
        if !self.config.nofilter && self.filter.is_blocked(&domain) {
            debug!("({}) dropped {}", self.id, domain);
            self.stats.count_filter_drop();
            self.send_synth(pkt, &question, RCODE_NXDOMAIN, peer)?;
            return Ok(());
        }

        // conditional forwarding bypasses DoH entirely
        if let Some(forwarder) = self.config.forwarder_for(&domain) {
            match forwarder.forward(pkt) {
                Ok(reply) => {
                    self.socket.send_to(&reply, peer)?;
                }
                Err(e) => {
                    warn!("({}) forwarder {}: {}", self.id, forwarder.address, e);
                    self.send_synth(pkt, &question, RCODE_SERVFAIL, peer)?;
                }
            }
            return Ok(());
        }

        // cache
        let now = Instant::now();
        if let Some((bytes, _)) = self.cache.lookup(&domain, question.qtype, now) {
            let mut reply = bytes.to_vec();
            rewrite_id(&mut reply, header.id);
            self.stats.count_cache_hit();
            self.socket.send_to(&reply, peer)?;
            return Ok(());
        }

        // upstream over the TLS session
        if !self.session.is_open() {
            self.stats.count_tls_reconnect();
            if let Err(e) = self.session.open() {
                warn!("({}) cannot open TLS session: {}", self.id, e);
                self.send_synth(pkt, &question, RCODE_SERVFAIL, peer)?;
                return Ok(());
            }
        }

        // the upstream transaction carries a random id; the client's comes
        // back on the reply
        let mut upstream_query = pkt.to_vec();
        rewrite_id(&mut upstream_query, rand::thread_rng().gen::<u16>());

        let mut reply = match self.session.transact(&upstream_query) {
            Ok(reply) => reply,
            Err(e) => {
                warn!("({}) upstream transaction failed: {}", self.id, e);
                self.send_synth(pkt, &question, RCODE_SERVFAIL, peer)?;
                return Ok(());
            }
        };
        rewrite_id(&mut reply, header.id);

        match lint_rx(&reply) {
            Ok(rx) => {
                self.socket.send_to(&reply, peer)?;
                if rx.answers > 0 {
                    self.cache
                        .insert(&domain, question.qtype, reply, self.config.cache_ttl, now);
                }
            }
            Err(DnsError::Lint(LintError::NxDomain)) => {
                // relay verbatim, remember the negative result briefly
                self.socket.send_to(&reply, peer)?;
                self.cache
                    .insert_negative(&domain, question.qtype, reply, now);
            }
            Err(e) => {
                warn!("({}) RX {}", self.id, e);
                self.send_synth(pkt, &question, RCODE_SERVFAIL, peer)?;
            }
        }
        Ok(())
    }

    fn send_synth(
        &self,
        pkt: &[u8],
        question: &DnsQuestion,
        rcode: u8,
        peer: SocketAddr,
    ) -> DnsResult<()> {
        let reply = synth_reply(pkt, question, rcode);
        self.socket.send_to(&reply, peer)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lint::QTYPE_CNAME;
    use crate::wire::build_query;
    use std::time::Duration;

    #[test]
    fn only_a_by_default() {
        let config = Config::default();
        assert_eq!(query_policy(QTYPE_A, &config), QueryPolicy::Allow);
        assert_eq!(query_policy(QTYPE_AAAA, &config), QueryPolicy::Refuse);
        assert_eq!(query_policy(QTYPE_CNAME, &config), QueryPolicy::Refuse);
    }

    #[test]
    fn aaaa_needs_ipv6() {
        let mut config = Config::default();
        config.ipv6 = true;
        assert_eq!(query_policy(QTYPE_AAAA, &config), QueryPolicy::Allow);
        // everything else still refused
        assert_eq!(query_policy(QTYPE_CNAME, &config), QueryPolicy::Refuse);
    }

    #[test]
    fn allow_all_queries_opens_every_type() {
        let mut config = Config::default();
        config.allow_all_queries = true;
        assert_eq!(query_policy(QTYPE_AAAA, &config), QueryPolicy::Allow);
        assert_eq!(query_policy(QTYPE_CNAME, &config), QueryPolicy::Allow);
        assert_eq!(query_policy(255, &config), QueryPolicy::Allow);
    }

    // run a worker on an ephemeral loopback socket and return everything a
    // test client needs to talk to it
    fn spawn_worker(
        config: Config,
        filter: Filter,
    ) -> (
        SocketAddr,
        Arc<Stats>,
        Arc<AtomicBool>,
        std::thread::JoinHandle<()>,
        UdpSocket,
    ) {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        socket
            .set_read_timeout(Some(Duration::from_millis(50)))
            .unwrap();
        let addr = socket.local_addr().unwrap();

        let stats = Arc::new(Stats::new());
        let shutdown = Arc::new(AtomicBool::new(false));
        let mut resolver = Resolver::new(
            0,
            socket,
            Arc::new(config),
            Arc::new(filter),
            Arc::clone(&stats),
            Arc::clone(&shutdown),
        );
        let handle = std::thread::spawn(move || resolver.run());

        let client = UdpSocket::bind("127.0.0.1:0").unwrap();
        client
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        (addr, stats, shutdown, handle, client)
    }

    fn exchange(client: &UdpSocket, addr: SocketAddr, query: &[u8]) -> Vec<u8> {
        client.send_to(query, addr).unwrap();
        let mut buf = [0u8; MAX_DNS_PACKET_SIZE];
        let (received, _) = client.recv_from(&mut buf).unwrap();
        buf[..received].to_vec()
    }

    #[test]
    fn refused_type_is_answered_locally_with_nxdomain() {
        let (addr, _, shutdown, handle, client) = spawn_worker(Config::default(), Filter::new());

        let query = build_query(0x7777, "v6.example.com", QTYPE_AAAA).unwrap();
        let reply = exchange(&client, addr, &query);

        let mut cursor = Cursor::new(reply.as_slice());
        let header = parse_header(&mut cursor).unwrap();
        assert_eq!(header.id, 0x7777);
        assert!(header.is_response());
        assert_eq!(header.rcode(), RCODE_NXDOMAIN);
        let echoed = parse_question(&mut cursor).unwrap();
        assert_eq!(echoed.domain, "v6.example.com");

        shutdown.store(true, Ordering::Relaxed);
        handle.join().unwrap();
    }

    #[test]
    fn blocked_domain_is_answered_locally_with_nxdomain() {
        let mut filter = Filter::new();
        filter.add("ads.example.com");
        let (addr, stats, shutdown, handle, client) = spawn_worker(Config::default(), filter);

        let query = build_query(0x0102, "tracker.ads.example.com", QTYPE_A).unwrap();
        let reply = exchange(&client, addr, &query);

        let mut cursor = Cursor::new(reply.as_slice());
        let header = parse_header(&mut cursor).unwrap();
        assert_eq!(header.id, 0x0102);
        assert_eq!(header.rcode(), RCODE_NXDOMAIN);
        assert_eq!(stats.snapshot().filter_drops, 1);
        assert_eq!(stats.snapshot().queries, 1);

        shutdown.store(true, Ordering::Relaxed);
        handle.join().unwrap();
    }

    #[test]
    fn malformed_question_gets_formerr() {
        let (addr, _, shutdown, handle, client) = spawn_worker(Config::default(), Filter::new());

        let mut query = build_query(0x0a0b, "www.example.com", QTYPE_A).unwrap();
        query[13] = b'_'; // poison the first label
        let reply = exchange(&client, addr, &query);

        let mut cursor = Cursor::new(reply.as_slice());
        let header = parse_header(&mut cursor).unwrap();
        assert_eq!(header.id, 0x0a0b);
        assert!(header.is_response());
        assert_eq!(header.rcode(), RCODE_FORMERR);
        assert_eq!(header.questions, 0);

        shutdown.store(true, Ordering::Relaxed);
        handle.join().unwrap();
    }
}
