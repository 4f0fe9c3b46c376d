//! Live summary updates for long-lived observers.
//!
//! The loop only ever reads the [`SummaryCache`]; it never starts a scan. A
//! connection gets one [`StreamEvent::Connected`] and the current summary
//! straight away, then a summary update every `update` interval and a
//! heartbeat every `heartbeat` interval until either the observer goes away (the stream is dropped) or
//! the server shuts down (the token is cancelled).

use async_stream::stream;
use fleetscan_cache::{CacheStats, SummaryCache};
use fleetscan_scan::SystemSummary;
use futures::Stream;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(10);
const CONNECTED_MESSAGE: &str = "Connected to system summary stream";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Intervals {
    pub update: Duration,
    pub heartbeat: Duration,
}
impl Default for Intervals {
    fn default() -> Self {
        Self { update: DEFAULT_INTERVAL, heartbeat: DEFAULT_INTERVAL }
    }
}

/// Fleet totals carried by a live update. Per-upload rows are left out;
/// observers that need them fetch the full summary.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SummaryTotals {
    pub total_databases: u64,
    pub total_uploads: u64,
    pub completed_uploads: u64,
    pub failed_uploads: u64,
    pub in_progress_uploads: u64,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_activity: Option<OffsetDateTime>,
    pub total_nomenclature: u64,
    pub total_counterparties: u64,
}
impl From<&SystemSummary> for SummaryTotals {
    fn from(summary: &SystemSummary) -> Self {
        Self {
            total_databases: summary.total_databases,
            total_uploads: summary.total_uploads,
            completed_uploads: summary.completed_uploads,
            failed_uploads: summary.failed_uploads,
            in_progress_uploads: summary.in_progress_uploads,
            last_activity: summary.last_activity,
            total_nomenclature: summary.total_nomenclature,
            total_counterparties: summary.total_counterparties,
        }
    }
}

/// JSON payload of one `data:` message.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    Connected {
        message: &'static str,
    },
    SummaryUpdate {
        #[serde(with = "time::serde::rfc3339")]
        timestamp: OffsetDateTime,
        /// `false` when the cache held no fresh summary; totals are then zero.
        from_cache: bool,
        summary: SummaryTotals,
        cache_stats: CacheStats,
    },
}

/// One unit of output on the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Event(StreamEvent),
    /// Keep-alive comment; carries no data.
    Heartbeat,
}

/// Build one update from whatever the cache currently holds.
///
/// Counts as a regular cache lookup.
pub async fn summary_update(cache: &SummaryCache) -> StreamEvent {
    let cached = cache.get().await;
    StreamEvent::SummaryUpdate {
        timestamp: OffsetDateTime::now_utc(),
        from_cache: cached.is_some(),
        summary: cached.as_deref().map(SummaryTotals::from).unwrap_or_default(),
        cache_stats: cache.stats().await,
    }
}

/// The frame sequence for one observer.
pub fn updates(
    cache: Arc<SummaryCache>,
    intervals: Intervals,
    shutdown: CancellationToken,
) -> impl Stream<Item = Frame> {
    stream! {
        yield Frame::Event(StreamEvent::Connected { message: CONNECTED_MESSAGE });
        yield Frame::Event(summary_update(&cache).await);

        let start = Instant::now();
        let mut update = interval_at(start + intervals.update, intervals.update);
        let mut heartbeat = interval_at(start + intervals.heartbeat, intervals.heartbeat);
        // A slow observer gets fewer frames, not a burst of stale ones.
        update.set_missed_tick_behavior(MissedTickBehavior::Delay);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            // `yield` can't appear inside the select! body.
            let frame = tokio::select! {
                biased;
                () = shutdown.cancelled() => None,
                _ = update.tick() => Some(Frame::Event(summary_update(&cache).await)),
                _ = heartbeat.tick() => Some(Frame::Heartbeat),
            };
            match frame {
                Some(frame) => yield frame,
                None => {
                    tracing::debug!("Server shutting down; closing summary stream");
                    break;
                }
            }
        }
    }
}
