//! Time-limited cache for the most recent system summary.

use fleetscan_scan::SystemSummary;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

pub const DEFAULT_TTL: Duration = Duration::from_secs(120);

#[derive(Debug, Default)]
struct Entry {
    payload: Option<Arc<SystemSummary>>,
    expires_at: Option<Instant>,
    dirty: bool,
}
impl Entry {
    // Derived on every read, never stored.
    fn is_stale(&self, now: Instant) -> bool {
        self.payload.is_none() || self.dirty || self.expires_at.is_none_or(|expires_at| now > expires_at)
    }
}

/// Point-in-time view of the cache counters. Reading it never changes them.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// `hits / (hits + misses)`, or `0.0` before the first lookup.
    pub hit_rate: f64,
    pub has_data: bool,
    pub is_stale: bool,
    /// Time left until the payload expires; `None` without a payload.
    pub expires_in_ms: Option<u64>,
}

/// Holds the latest [`SystemSummary`] together with its expiry.
///
/// [`get`](Self::get) only ever hands out fresh payloads. An invalidated or
/// expired payload is kept around so a caller whose re-scan failed can still
/// fall back to it through [`peek`](Self::peek). Only [`clear`](Self::clear)
/// drops it.
#[derive(Debug)]
pub struct SummaryCache {
    entry: RwLock<Entry>,
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl Default for SummaryCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

impl SummaryCache {
    /// A zero `ttl` falls back to [`DEFAULT_TTL`].
    pub fn new(ttl: Duration) -> Self {
        Self {
            entry: RwLock::new(Entry::default()),
            ttl: if ttl.is_zero() { DEFAULT_TTL } else { ttl },
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// The cached summary if it is present, not invalidated and not expired.
    /// Counts as a hit or a miss.
    pub async fn get(&self) -> Option<Arc<SystemSummary>> {
        let entry = self.entry.read().await;
        if entry.is_stale(Instant::now()) {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }
        self.hits.fetch_add(1, Ordering::Relaxed);
        entry.payload.clone()
    }

    /// The cached summary regardless of freshness. Not counted.
    pub async fn peek(&self) -> Option<Arc<SystemSummary>> {
        self.entry.read().await.payload.clone()
    }

    /// Install a new summary, valid for one TTL from now.
    pub async fn set(&self, summary: impl Into<Arc<SystemSummary>>) -> Arc<SystemSummary> {
        let summary = summary.into();
        let mut entry = self.entry.write().await;
        *entry = Entry {
            payload: Some(Arc::clone(&summary)),
            expires_at: Some(Instant::now() + self.ttl),
            dirty: false,
        };
        summary
    }

    /// Mark the current summary as outdated without dropping it.
    pub async fn invalidate(&self) {
        self.entry.write().await.dirty = true;
        tracing::debug!("Summary cache invalidated");
    }

    /// Drop the current summary entirely.
    pub async fn clear(&self) {
        *self.entry.write().await = Entry::default();
        tracing::debug!("Summary cache cleared");
    }

    pub async fn is_stale(&self) -> bool {
        self.entry.read().await.is_stale(Instant::now())
    }

    pub async fn stats(&self) -> CacheStats {
        let now = Instant::now();
        let entry = self.entry.read().await;
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let lookups = hits + misses;
        CacheStats {
            hits,
            misses,
            hit_rate: if lookups == 0 { 0.0 } else { hits as f64 / lookups as f64 },
            has_data: entry.payload.is_some(),
            is_stale: entry.is_stale(now),
            expires_in_ms: entry
                .payload
                .as_ref()
                .and(entry.expires_at)
                .map(|expires_at| expires_at.saturating_duration_since(now).as_millis())
                .map(|millis| u64::try_from(millis).unwrap_or(u64::MAX)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::advance;

    fn summary(total_uploads: u64) -> SystemSummary {
        SystemSummary { total_uploads, ..SystemSummary::default() }
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_after_ttl() {
        let cache = SummaryCache::new(Duration::from_secs(1));
        cache.set(summary(1)).await;

        advance(Duration::from_millis(500)).await;
        assert!(cache.get().await.is_some());

        advance(Duration::from_millis(1000)).await;
        assert!(cache.get().await.is_none());
        let stats = cache.stats().await;
        assert_eq!((stats.hits, stats.misses), (1, 1));
        assert!(stats.is_stale);
        assert!(stats.has_data);
        assert_eq!(stats.expires_in_ms, Some(0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidate_keeps_the_payload() {
        let cache = SummaryCache::default();
        cache.set(summary(7)).await;
        cache.invalidate().await;

        assert!(cache.get().await.is_none());
        assert_eq!(cache.peek().await.unwrap().total_uploads, 7);
        assert!(cache.is_stale().await);

        // A fresh set makes it servable again.
        cache.set(summary(8)).await;
        assert_eq!(cache.get().await.unwrap().total_uploads, 8);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_drops_the_payload() {
        let cache = SummaryCache::default();
        cache.set(summary(1)).await;
        cache.clear().await;
        assert!(cache.peek().await.is_none());
        let stats = cache.stats().await;
        assert!(!stats.has_data);
        assert_eq!(stats.expires_in_ms, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_gets_only_move_the_counters() {
        let cache = SummaryCache::default();
        assert!(cache.get().await.is_none());
        cache.set(summary(3)).await;
        for _ in 0..3 {
            assert_eq!(cache.get().await.unwrap().total_uploads, 3);
        }
        cache.invalidate().await;
        assert!(cache.get().await.is_none());

        let stats = cache.stats().await;
        assert_eq!((stats.hits, stats.misses), (3, 2));
        assert!((stats.hit_rate - 0.6).abs() < f64::EPSILON);
        // Reading stats doesn't count as a lookup.
        assert_eq!(cache.stats().await.hits, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_ttl_uses_the_default() {
        let cache = SummaryCache::new(Duration::ZERO);
        assert_eq!(cache.ttl(), DEFAULT_TTL);
        cache.set(summary(1)).await;
        assert_eq!(cache.stats().await.expires_in_ms, Some(120_000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_cache_stats() {
        let stats = SummaryCache::default().stats().await;
        assert_eq!(stats.hit_rate, 0.0);
        assert!(stats.is_stale);
        assert!(!stats.has_data);
    }
}
