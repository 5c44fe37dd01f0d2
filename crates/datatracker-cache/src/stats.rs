//! Session counters for cache effectiveness.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tracing::info;

/// Counters shared by the store, fetcher and coordinator for one session.
#[derive(Debug, Default)]
pub struct SessionStats {
    lookaside_requests: AtomicU64,
    lookaside_hits: AtomicU64,
    cache_requests: AtomicU64,
    cache_hits: AtomicU64,
    http_gets: AtomicU64,
    rotations: AtomicU64,
}

impl SessionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn lookaside_request(&self, hit: bool) {
        self.lookaside_requests.fetch_add(1, Ordering::Relaxed);
        if hit {
            self.lookaside_hits.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn cache_request(&self, hit: bool) {
        self.cache_requests.fetch_add(1, Ordering::Relaxed);
        if hit {
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn http_get(&self) {
        self.http_gets.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn rotation(&self) {
        self.rotations.fetch_add(1, Ordering::Relaxed);
    }

    /// Copy the current counter values.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            lookaside_requests: self.lookaside_requests.load(Ordering::Relaxed),
            lookaside_hits: self.lookaside_hits.load(Ordering::Relaxed),
            cache_requests: self.cache_requests.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            http_gets: self.http_gets.load(Ordering::Relaxed),
            rotations: self.rotations.load(Ordering::Relaxed),
        }
    }

    /// Counters plus derived rates, with the current lookaside size.
    pub fn summary(&self, lookaside_len: usize) -> SessionSummary {
        let counters = self.snapshot();
        SessionSummary {
            lookaside_hit_rate: counters.lookaside_hit_rate(),
            cache_hit_rate: counters.cache_hit_rate(),
            lookaside_len,
            counters,
        }
    }

    /// Log the session summary at info level.
    pub fn log_summary(&self, lookaside_len: usize) {
        let s = self.summary(lookaside_len);
        info!(
            lookaside_requests = s.counters.lookaside_requests,
            lookaside_hit_rate = format_args!("{:.3}", s.lookaside_hit_rate),
            lookaside_len = s.lookaside_len,
            cache_requests = s.counters.cache_requests,
            cache_hit_rate = format_args!("{:.3}", s.cache_hit_rate),
            http_gets = s.counters.http_gets,
            rotations = s.counters.rotations,
            "cache session summary"
        );
    }
}

/// What [`SessionStats::log_summary`] reports.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SessionSummary {
    pub counters: StatsSnapshot,
    pub lookaside_hit_rate: f64,
    pub cache_hit_rate: f64,
    pub lookaside_len: usize,
}

/// Point-in-time copy of [`SessionStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub lookaside_requests: u64,
    pub lookaside_hits: u64,
    pub cache_requests: u64,
    pub cache_hits: u64,
    pub http_gets: u64,
    pub rotations: u64,
}

impl StatsSnapshot {
    /// Fraction of lookaside reads served from memory.
    pub fn lookaside_hit_rate(&self) -> f64 {
        ratio(self.lookaside_hits, self.lookaside_requests)
    }

    /// Fraction of item lookups and collection queries answered without the
    /// network.
    pub fn cache_hit_rate(&self) -> f64 {
        ratio(self.cache_hits, self.cache_requests)
    }
}

fn ratio(hits: u64, requests: u64) -> f64 {
    if requests == 0 {
        0.0
    } else {
        hits as f64 / requests as f64
    }
}
