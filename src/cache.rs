//! Per-worker reply cache: (lowercase domain, qtype) → raw reply bytes with
//! an absolute expiry instant. Positive entries use the configured TTL,
//! NXDOMAIN entries a short fixed one.
use std::collections::HashMap;
use std::time::{Duration, Instant};

use log::debug;

use crate::config::{CACHE_MAX_ENTRIES, CACHE_TTL_ERROR, CACHE_TTL_MAX, CACHE_TTL_MIN};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    domain: String,
    qtype: u16,
}

impl CacheKey {
    fn new(domain: &str, qtype: u16) -> Self {
        Self {
            domain: domain.to_ascii_lowercase(),
            qtype,
        }
    }
}

#[derive(Debug)]
struct CacheEntry {
    reply: Vec<u8>,
    expires: Instant,
}

#[derive(Debug, Default)]
pub struct Cache {
    map: HashMap<CacheKey, CacheEntry>,
}

impl Cache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The cached reply and its remaining lifetime, or a miss. Matching is
    /// case-insensitive on the domain; an expired entry is a miss.
    pub fn lookup(&self, domain: &str, qtype: u16, now: Instant) -> Option<(&[u8], Duration)> {
        let key = CacheKey::new(domain, qtype);
        let entry = self.map.get(&key)?;
        if now >= entry.expires {
            return None;
        }
        Some((&entry.reply, entry.expires - now))
    }

    /// Store a positive reply; the TTL is clamped to the configured bounds.
    /// An existing entry for the same key is overwritten.
    pub fn insert(&mut self, domain: &str, qtype: u16, reply: Vec<u8>, ttl: u32, now: Instant) {
        let ttl = ttl.clamp(CACHE_TTL_MIN, CACHE_TTL_MAX);
        self.insert_with_ttl(domain, qtype, reply, ttl, now);
    }

    /// Store an NXDOMAIN reply under the short negative TTL.
    pub fn insert_negative(&mut self, domain: &str, qtype: u16, reply: Vec<u8>, now: Instant) {
        self.insert_with_ttl(domain, qtype, reply, CACHE_TTL_ERROR, now);
    }

    fn insert_with_ttl(&mut self, domain: &str, qtype: u16, reply: Vec<u8>, ttl: u32, now: Instant) {
        let key = CacheKey::new(domain, qtype);
        if self.map.len() >= CACHE_MAX_ENTRIES && !self.map.contains_key(&key) {
            self.purge(now);
            // still under pressure: drop one arbitrary entry
            if self.map.len() >= CACHE_MAX_ENTRIES {
                if let Some(victim) = self.map.keys().next().cloned() {
                    debug!("cache full, evicting {:?}", victim);
                    self.map.remove(&victim);
                }
            }
        }
        let expires = now + Duration::from_secs(u64::from(ttl));
        self.map.insert(key, CacheEntry { reply, expires });
    }

    /// Drop every expired entry; invoked opportunistically from the worker's
    /// maintenance tick.
    pub fn purge(&mut self, now: Instant) {
        self.map.retain(|_, entry| entry.expires > now);
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REPLY: &[u8] = &[0xde, 0xad, 0xbe, 0xef];

    #[test]
    fn hit_before_expiry_miss_after() {
        let mut cache = Cache::new();
        let now = Instant::now();
        cache.insert("example.com", 1, REPLY.to_vec(), 120, now);

        let (bytes, remaining) = cache.lookup("example.com", 1, now).unwrap();
        assert_eq!(bytes, REPLY);
        assert_eq!(remaining, Duration::from_secs(120));

        assert!(cache
            .lookup("example.com", 1, now + Duration::from_secs(120))
            .is_none());
    }

    #[test]
    fn domain_match_is_case_insensitive() {
        let mut cache = Cache::new();
        let now = Instant::now();
        cache.insert("Example.COM", 1, REPLY.to_vec(), 120, now);
        assert!(cache.lookup("example.com", 1, now).is_some());
        assert!(cache.lookup("EXAMPLE.com", 1, now).is_some());
    }

    #[test]
    fn qtype_is_part_of_the_key() {
        let mut cache = Cache::new();
        let now = Instant::now();
        cache.insert("example.com", 1, REPLY.to_vec(), 120, now);
        assert!(cache.lookup("example.com", 28, now).is_none());
    }

    #[test]
    fn ttl_is_clamped() {
        let mut cache = Cache::new();
        let now = Instant::now();

        cache.insert("example.com", 1, REPLY.to_vec(), 10_000, now);
        let (_, remaining) = cache.lookup("example.com", 1, now).unwrap();
        assert_eq!(remaining, Duration::from_secs(u64::from(CACHE_TTL_MAX)));

        cache.insert("example.org", 1, REPLY.to_vec(), 1, now);
        let (_, remaining) = cache.lookup("example.org", 1, now).unwrap();
        assert_eq!(remaining, Duration::from_secs(u64::from(CACHE_TTL_MIN)));
    }

    #[test]
    fn negative_entries_use_the_short_ttl() {
        let mut cache = Cache::new();
        let now = Instant::now();
        cache.insert_negative("gone.example.com", 1, REPLY.to_vec(), now);

        // alive within the negative window
        assert!(cache
            .lookup("gone.example.com", 1, now + Duration::from_secs(5))
            .is_some());
        // gone right at it
        assert!(cache
            .lookup(
                "gone.example.com",
                1,
                now + Duration::from_secs(u64::from(CACHE_TTL_ERROR))
            )
            .is_none());
    }

    #[test]
    fn overwrite_replaces_the_reply() {
        let mut cache = Cache::new();
        let now = Instant::now();
        cache.insert("example.com", 1, vec![1], 120, now);
        cache.insert("example.com", 1, vec![2], 120, now);
        let (bytes, _) = cache.lookup("example.com", 1, now).unwrap();
        assert_eq!(bytes, &[2]);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn purge_drops_expired_entries() {
        let mut cache = Cache::new();
        let now = Instant::now();
        cache.insert_negative("a.example.com", 1, REPLY.to_vec(), now);
        cache.insert("b.example.com", 1, REPLY.to_vec(), 600, now);

        cache.purge(now + Duration::from_secs(u64::from(CACHE_TTL_ERROR)));
        assert_eq!(cache.len(), 1);
        assert!(cache
            .lookup("b.example.com", 1, now + Duration::from_secs(60))
            .is_some());
    }

    #[test]
    fn eviction_under_pressure() {
        let mut cache = Cache::new();
        let now = Instant::now();
        for i in 0..CACHE_MAX_ENTRIES {
            cache.insert(&format!("host{}.example.com", i), 1, vec![0], 600, now);
        }
        assert_eq!(cache.len(), CACHE_MAX_ENTRIES);

        // nothing expired, so one arbitrary entry must make room
        cache.insert("one-more.example.com", 1, vec![0], 600, now);
        assert_eq!(cache.len(), CACHE_MAX_ENTRIES);
        assert!(cache.lookup("one-more.example.com", 1, now).is_some());
    }
}
