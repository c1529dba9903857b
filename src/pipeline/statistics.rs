use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use crate::{fetcher::FetchErrorKind, worker::ScrapeOutcome};

/// Job-wide fetch counters. Clones share the same counters, so every chunk
/// of a job can report into one set.
#[derive(Debug, Clone)]
pub struct Statistics {
    pub num_successes: Arc<AtomicUsize>,
    pub num_timeouts: Arc<AtomicUsize>,
    pub num_network_errors: Arc<AtomicUsize>,
    pub num_blocked: Arc<AtomicUsize>,
    pub num_unparsable: Arc<AtomicUsize>,
    pub num_retries: Arc<AtomicUsize>,
}

impl Default for Statistics {
    fn default() -> Self {
        Self {
            num_successes: Arc::new(AtomicUsize::new(0)),
            num_timeouts: Arc::new(AtomicUsize::new(0)),
            num_network_errors: Arc::new(AtomicUsize::new(0)),
            num_blocked: Arc::new(AtomicUsize::new(0)),
            num_unparsable: Arc::new(AtomicUsize::new(0)),
            num_retries: Arc::new(AtomicUsize::new(0)),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatisticsSnapshot {
    pub successes: usize,
    pub timeouts: usize,
    pub network_errors: usize,
    pub blocked: usize,
    pub unparsable: usize,
    pub retries: usize,
}

impl StatisticsSnapshot {
    pub fn failures(&self) -> usize {
        self.timeouts + self.network_errors + self.blocked + self.unparsable
    }
}

impl Statistics {
    pub fn record(&self, outcome: &ScrapeOutcome) {
        let counter = match outcome {
            ScrapeOutcome::Success(_) => &self.num_successes,
            ScrapeOutcome::Failure { reason, .. } => match reason {
                FetchErrorKind::Timeout => &self.num_timeouts,
                FetchErrorKind::NetworkError => &self.num_network_errors,
                FetchErrorKind::Blocked => &self.num_blocked,
                FetchErrorKind::UnparsablePage => &self.num_unparsable,
            },
        };
        counter.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_retry(&self) {
        self.num_retries.fetch_add(1, Ordering::SeqCst);
    }

    pub fn snapshot(&self) -> StatisticsSnapshot {
        StatisticsSnapshot {
            successes: self.num_successes.load(Ordering::Relaxed),
            timeouts: self.num_timeouts.load(Ordering::Relaxed),
            network_errors: self.num_network_errors.load(Ordering::Relaxed),
            blocked: self.num_blocked.load(Ordering::Relaxed),
            unparsable: self.num_unparsable.load(Ordering::Relaxed),
            retries: self.num_retries.load(Ordering::Relaxed),
        }
    }

    pub fn write_to_log(&self, running_time: Duration) {
        let snapshot = self.snapshot();
        tracing::info!(
            num_successes = snapshot.successes,
            num_timeouts = snapshot.timeouts,
            num_network_errors = snapshot.network_errors,
            num_blocked = snapshot.blocked,
            num_unparsable = snapshot.unparsable,
            num_retries = snapshot.retries,
            running_time = ?running_time,
            "statistics"
        );
    }
}
