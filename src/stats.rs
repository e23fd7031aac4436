// src/stats.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

/// Counters for a single run of either engine.
///
/// All increments are atomic so the fetch engine's tasks can share one
/// instance behind an `Arc`. Nothing here is global: each run owns its stats.
#[derive(Debug)]
pub struct RunStats {
    total: AtomicU64,
    captured: AtomicU64,
    success: AtomicU64,
    failed: AtomicU64,
    skipped: AtomicU64,
    duplicate: AtomicU64,
    ignored_errors: AtomicU64,
    processed: AtomicU64,
    started: Instant,
    started_at: DateTime<Utc>,
    finished: OnceLock<(Instant, DateTime<Utc>)>,
}

impl Default for RunStats {
    fn default() -> Self {
        Self::new()
    }
}

impl RunStats {
    pub fn new() -> Self {
        Self {
            total: AtomicU64::new(0),
            captured: AtomicU64::new(0),
            success: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
            duplicate: AtomicU64::new(0),
            ignored_errors: AtomicU64::new(0),
            processed: AtomicU64::new(0),
            started: Instant::now(),
            started_at: Utc::now(),
            finished: OnceLock::new(),
        }
    }

    /// Stats for a fetch run with a known number of assets.
    pub fn with_total(total: u64) -> Self {
        let stats = Self::new();
        stats.total.store(total, Ordering::SeqCst);
        stats
    }

    pub fn set_total(&self, total: u64) {
        self.total.store(total, Ordering::SeqCst);
    }

    /// Records a success; returns how many outcomes have been processed so far.
    pub fn record_success(&self) -> u64 {
        self.success.fetch_add(1, Ordering::SeqCst);
        self.bump_processed()
    }

    pub fn record_failed(&self) -> u64 {
        self.failed.fetch_add(1, Ordering::SeqCst);
        self.bump_processed()
    }

    pub fn record_skipped(&self) -> u64 {
        self.skipped.fetch_add(1, Ordering::SeqCst);
        self.bump_processed()
    }

    /// Capture-mode counterpart of `record_skipped`.
    pub fn record_duplicate(&self) -> u64 {
        self.duplicate.fetch_add(1, Ordering::SeqCst);
        self.bump_processed()
    }

    pub fn record_captured(&self) -> u64 {
        self.captured.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Counts an error that was swallowed so it stays visible.
    pub fn record_ignored_error(&self) -> u64 {
        self.ignored_errors.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn bump_processed(&self) -> u64 {
        self.processed.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Stamps the end time. Later calls keep the first stamp.
    pub fn finish(&self) {
        let _ = self.finished.set((Instant::now(), Utc::now()));
    }

    pub fn is_finished(&self) -> bool {
        self.finished.get().is_some()
    }

    pub fn total(&self) -> u64 {
        self.total.load(Ordering::SeqCst)
    }

    pub fn captured(&self) -> u64 {
        self.captured.load(Ordering::SeqCst)
    }

    pub fn success(&self) -> u64 {
        self.success.load(Ordering::SeqCst)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::SeqCst)
    }

    pub fn skipped(&self) -> u64 {
        self.skipped.load(Ordering::SeqCst)
    }

    pub fn duplicate(&self) -> u64 {
        self.duplicate.load(Ordering::SeqCst)
    }

    pub fn ignored_errors(&self) -> u64 {
        self.ignored_errors.load(Ordering::SeqCst)
    }

    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::SeqCst)
    }

    /// Time since start, frozen once the run is finished.
    pub fn elapsed(&self) -> Duration {
        match self.finished.get() {
            Some((end, _)) => end.duration_since(self.started),
            None => self.started.elapsed(),
        }
    }

    /// Processed outcomes per second.
    pub fn throughput(&self) -> f64 {
        let secs = self.elapsed().as_secs_f64();
        if secs > 0.0 {
            self.processed() as f64 / secs
        } else {
            0.0
        }
    }

    pub fn percent_complete(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            return 0.0;
        }
        (self.processed() as f64 / total as f64 * 100.0).min(100.0)
    }

    /// Saved files as a percentage of captured responses.
    pub fn efficiency(&self) -> f64 {
        efficiency_percent(self.success(), self.captured())
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary {
            total: self.total(),
            captured: self.captured(),
            success: self.success(),
            failed: self.failed(),
            skipped: self.skipped(),
            duplicate: self.duplicate(),
            ignored_errors: self.ignored_errors(),
            started_at: self.started_at,
            finished_at: self.finished.get().map(|(_, at)| *at),
            elapsed_secs: self.elapsed().as_secs_f64(),
            throughput: self.throughput(),
        }
    }
}

/// Point-in-time copy of `RunStats`, handed back to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub total: u64,
    pub captured: u64,
    pub success: u64,
    pub failed: u64,
    pub skipped: u64,
    pub duplicate: u64,
    pub ignored_errors: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub elapsed_secs: f64,
    pub throughput: f64,
}

impl RunSummary {
    pub fn processed(&self) -> u64 {
        self.success + self.failed + self.skipped + self.duplicate
    }

    pub fn efficiency(&self) -> f64 {
        efficiency_percent(self.success, self.captured)
    }
}

fn efficiency_percent(success: u64, captured: u64) -> f64 {
    if captured == 0 {
        0.0
    } else {
        success as f64 / captured as f64 * 100.0
    }
}
