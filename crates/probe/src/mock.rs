//! Scripted record counter for testing.

use crate::counter::{Counts, RecordCounter};
use crate::error::{ErrorKind, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::{Instant, sleep, sleep_until};

const STALL: Duration = Duration::from_secs(3600);

/// What [`MockRecordCounter`] does when asked to count one path.
#[derive(Debug, Clone)]
pub enum MockOutcome {
    Counts(Counts),
    Fail(ErrorKind),
    /// Panic inside `count`, as a buggy counter would.
    Panic,
    /// Never finish on its own; only the deadline ends the call.
    Hang,
    /// Ignore the deadline, succeeding an hour later.
    Stall(Counts),
}

/// [`RecordCounter`] answering from a script instead of opening files.
///
/// Every call sleeps for the configured latency (bounded by the deadline)
/// while registered as in flight, so tests can observe how many counts were
/// running at once. Unscripted paths report [`ErrorKind::FileNotFound`].
///
/// # Examples
///
/// ```
/// use fleetscan_probe::{Counts, MockOutcome, MockRecordCounter, RecordCounter};
/// use std::path::Path;
/// use tokio::time::{Duration, Instant};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let counter = MockRecordCounter::default()
///     .with_outcome("/data/a.db", MockOutcome::Counts(Counts { nomenclature: 3, ..Counts::default() }));
/// let deadline = Instant::now() + Duration::from_secs(1);
/// assert_eq!(counter.count(Path::new("/data/a.db"), deadline).await.unwrap().nomenclature, 3);
/// assert!(counter.count(Path::new("/data/b.db"), deadline).await.is_err());
/// # }
/// ```
#[derive(Debug, Default)]
pub struct MockRecordCounter {
    outcomes: HashMap<PathBuf, MockOutcome>,
    latency: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    calls: AtomicUsize,
}

impl MockRecordCounter {
    pub fn with_outcome(mut self, path: impl Into<PathBuf>, outcome: MockOutcome) -> Self {
        self.outcomes.insert(path.into(), outcome);
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Highest number of simultaneously running `count` calls seen so far.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Number of `count` calls made so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

/// Decrements the in-flight gauge even when the call panics or is dropped.
struct InFlight<'a>(&'a AtomicUsize);
impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl RecordCounter for MockRecordCounter {
    async fn count(&self, path: &Path, deadline: Instant) -> Result<Counts> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now_running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = InFlight(&self.in_flight);
        self.max_in_flight.fetch_max(now_running, Ordering::SeqCst);

        let outcome = self.outcomes.get(path).cloned();
        if let Some(MockOutcome::Hang) = outcome {
            sleep_until(deadline).await;
            exn::bail!(ErrorKind::Timeout);
        }
        if let Some(MockOutcome::Stall(counts)) = outcome {
            sleep(STALL).await;
            return Ok(counts);
        }
        if tokio::time::timeout_at(deadline, sleep(self.latency)).await.is_err() {
            exn::bail!(ErrorKind::Timeout);
        }
        match outcome {
            Some(MockOutcome::Counts(counts)) => Ok(counts),
            Some(MockOutcome::Fail(kind)) => Err(exn::Exn::from(kind)),
            Some(MockOutcome::Panic) => panic!("scripted panic while counting {}", path.display()),
            Some(MockOutcome::Hang | MockOutcome::Stall(_)) | None => {
                Err(exn::Exn::from(ErrorKind::FileNotFound(path.to_path_buf())))
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_hang_ends_at_the_deadline() {
        let counter = MockRecordCounter::default().with_outcome("/slow.db", MockOutcome::Hang);
        let start = Instant::now();
        let err = counter.count(Path::new("/slow.db"), start + Duration::from_secs(2)).await.unwrap_err();
        assert_eq!(&*err, &ErrorKind::Timeout);
        assert_eq!(start.elapsed(), Duration::from_secs(2));
        assert_eq!(counter.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stall_overruns_the_deadline() {
        let counter = MockRecordCounter::default().with_outcome("/stuck.db", MockOutcome::Stall(Counts::default()));
        let start = Instant::now();
        let counts = counter.count(Path::new("/stuck.db"), start + Duration::from_secs(1)).await.unwrap();
        assert_eq!(counts, Counts::default());
        assert_eq!(start.elapsed(), STALL);
    }

    #[tokio::test(start_paused = true)]
    async fn test_in_flight_gauge() {
        let counter = MockRecordCounter::default().with_latency(Duration::from_millis(100));
        let deadline = Instant::now() + Duration::from_secs(1);
        let (a, b) = tokio::join!(
            counter.count(Path::new("/a.db"), deadline),
            counter.count(Path::new("/b.db"), deadline),
        );
        assert!(a.is_err() && b.is_err());
        assert_eq!(counter.max_in_flight(), 2);
        assert_eq!(counter.in_flight.load(Ordering::SeqCst), 0);
    }
}
