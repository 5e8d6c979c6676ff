//! Process-wide counters, shared across workers. Increments are relaxed:
//! the monitor tolerates imprecise totals.
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct Stats {
    queries: AtomicU64,
    cache_hits: AtomicU64,
    filter_drops: AtomicU64,
    tls_reconnects: AtomicU64,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count_query(&self) {
        self.queries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn count_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn count_filter_drop(&self) {
        self.filter_drops.fetch_add(1, Ordering::Relaxed);
    }

    pub fn count_tls_reconnect(&self) {
        self.tls_reconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            queries: self.queries.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            filter_drops: self.filter_drops.load(Ordering::Relaxed),
            tls_reconnects: self.tls_reconnects.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub queries: u64,
    pub cache_hits: u64,
    pub filter_drops: u64,
    pub tls_reconnects: u64,
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "queries {}, cache hits {}, filter drops {}, tls reconnects {}",
            self.queries, self.cache_hits, self.filter_drops, self.tls_reconnects
        )
    }
}
