//! Throughput accounting and progress display

use indicatif::{ProgressBar, ProgressStyle};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Running count of committed documents
#[derive(Debug)]
pub struct Throughput {
    committed: AtomicU64,
    started: Mutex<Instant>,
}

impl Default for Throughput {
    fn default() -> Self {
        Self::new()
    }
}

impl Throughput {
    pub fn new() -> Self {
        Self {
            committed: AtomicU64::new(0),
            started: Mutex::new(Instant::now()),
        }
    }

    /// Restart the clock; rates are measured from the last call
    pub fn restart(&self) {
        *self.started.lock().unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    /// Record a successful commit of `documents`
    pub fn add(&self, documents: u64) {
        self.committed.fetch_add(documents, Ordering::Relaxed);
    }

    pub fn total(&self) -> u64 {
        self.committed.load(Ordering::Relaxed)
    }

    pub fn elapsed(&self) -> Duration {
        self.started
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .elapsed()
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            documents: self.total(),
            elapsed: self.elapsed(),
        }
    }
}

/// Point-in-time view of a run's progress
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressSnapshot {
    pub documents: u64,
    pub elapsed: Duration,
}

impl ProgressSnapshot {
    /// Committed documents per second since the run started
    pub fn rate(&self) -> u64 {
        let secs = self.elapsed.as_secs_f64();
        if secs <= 0.0 {
            return 0;
        }
        (self.documents as f64 / secs) as u64
    }
}

impl fmt::Display for ProgressSnapshot {
    /// `  documents |   rate req/s | mm:ss`
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secs = self.elapsed.as_secs();
        write!(
            f,
            "{:10} | {:6} req/s | {:02}:{:02}",
            self.documents,
            self.rate(),
            secs / 60,
            secs % 60
        )
    }
}

/// Drive a terminal spinner from `throughput` until `stop` fires
pub fn spawn_spinner(throughput: Arc<Throughput>, stop: CancellationToken) -> JoinHandle<()> {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );

    tokio::spawn(async move {
        let mut tick = tokio::time::interval(Duration::from_millis(200));
        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                _ = tick.tick() => {
                    spinner.set_message(throughput.snapshot().to_string());
                    spinner.tick();
                },
            }
        }
        spinner.finish_with_message(throughput.snapshot().to_string());
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_format() {
        let snapshot = ProgressSnapshot {
            documents: 120_000,
            elapsed: Duration::from_secs(75),
        };
        assert_eq!(snapshot.rate(), 1600);
        assert_eq!(snapshot.to_string(), "    120000 |   1600 req/s | 01:15");
    }

    #[test]
    fn test_rate_at_zero_elapsed() {
        let snapshot = ProgressSnapshot {
            documents: 10,
            elapsed: Duration::ZERO,
        };
        assert_eq!(snapshot.rate(), 0);
    }

    #[test]
    fn test_throughput_accumulates() {
        let throughput = Throughput::new();
        throughput.add(2);
        throughput.add(1);
        assert_eq!(throughput.total(), 3);
        assert_eq!(throughput.snapshot().documents, 3);
    }

    #[test]
    fn test_restart_resets_clock() {
        let throughput = Throughput::new();
        std::thread::sleep(Duration::from_millis(200));
        assert!(throughput.elapsed() >= Duration::from_millis(200));

        throughput.restart();
        assert!(throughput.elapsed() < Duration::from_millis(200));
    }
}
