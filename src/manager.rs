// src/manager.rs

use crate::config::HarvestConfig;
use crate::downloader::{build_client, AssetDownloader, DownloadError};
use crate::limiter::ConcurrencyLimiter;
use crate::models::{AssetOutcome, AssetReference, DownloadOutcome};
use crate::naming::{fetch_filename, sanitize_folder_name};
use crate::stats::{RunStats, RunSummary};
use reqwest::Client;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Failures that abort a whole fetch run. Per-asset failures never do.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("cannot create output directory {}: {source}", .path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot build http client: {0}")]
    Client(#[from] reqwest::Error),
}

/// What a fetch run hands back to its caller.
#[derive(Debug, Clone, Serialize)]
pub struct FetchReport {
    pub directory: PathBuf,
    pub stats: RunSummary,
    /// One entry per submitted URL, in submission order.
    pub outcomes: Vec<AssetOutcome>,
    /// Most requests that were in flight at once.
    pub peak_in_flight: usize,
}

/// The bounded fetch engine: downloads a URL list under a concurrency ceiling.
pub struct FetchEngine {
    downloader: AssetDownloader,
    concurrency: usize,
    progress_every: u64,
    run_timeout: Option<Duration>,
}

/// Everything one spawned fetch task needs, shared across the run.
#[derive(Clone)]
struct RunContext {
    downloader: AssetDownloader,
    limiter: ConcurrencyLimiter,
    stats: Arc<RunStats>,
    /// One lock per destination; held for the whole attempt on that path.
    path_locks: Arc<Mutex<HashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>>>,
    directory: PathBuf,
    cancel: CancellationToken,
    progress_every: u64,
}

impl FetchEngine {
    pub fn new(config: &HarvestConfig) -> Result<Self, FetchError> {
        let client = build_client(config)?;
        Ok(Self {
            downloader: AssetDownloader::new(client, config.retry.clone()),
            concurrency: config.effective_concurrency(),
            progress_every: config.progress_every.max(1),
            run_timeout: config.run_timeout(),
        })
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// The shared client, also usable for page fetches before a run.
    pub fn client(&self) -> &Client {
        self.downloader.client()
    }

    /// Downloads every URL into `output_dir/<sanitized run_identifier>/`.
    ///
    /// If the config sets a run timeout, assets unfinished when it fires are
    /// reported as `Failed { reason: "cancelled" }`.
    pub async fn download_all(
        &self,
        urls: &[String],
        output_dir: &Path,
        run_identifier: &str,
    ) -> Result<FetchReport, FetchError> {
        let cancel = CancellationToken::new();
        let timer = self.run_timeout.map(|limit| {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(limit).await;
                warn!(?limit, "run timeout reached, abandoning unfinished downloads");
                cancel.cancel();
            })
        });

        let result = self
            .download_all_until(urls, output_dir, run_identifier, cancel)
            .await;

        if let Some(timer) = timer {
            timer.abort();
        }
        result
    }

    /// Like [`download_all`](Self::download_all) but stops when `cancel` fires.
    pub async fn download_all_until(
        &self,
        urls: &[String],
        output_dir: &Path,
        run_identifier: &str,
        cancel: CancellationToken,
    ) -> Result<FetchReport, FetchError> {
        if run_identifier.trim().is_empty() {
            return Err(FetchError::InvalidInput(
                "run identifier must not be blank".to_string(),
            ));
        }

        let directory = output_dir.join(sanitize_folder_name(run_identifier));
        tokio::fs::create_dir_all(&directory)
            .await
            .map_err(|source| FetchError::CreateDir {
                path: directory.clone(),
                source,
            })?;

        let assets = AssetReference::from_urls(urls.iter().cloned());
        let total = assets.len() as u64;
        let ctx = RunContext {
            downloader: self.downloader.clone(),
            limiter: ConcurrencyLimiter::new(self.concurrency),
            stats: Arc::new(RunStats::with_total(total)),
            path_locks: Arc::new(Mutex::new(HashMap::new())),
            directory: directory.clone(),
            cancel,
            progress_every: self.progress_every,
        };

        info!(
            total,
            concurrency = self.concurrency,
            directory = %directory.display(),
            "starting fetch run"
        );

        let mut tasks = Vec::with_capacity(assets.len());
        for asset in assets {
            let task_ctx = ctx.clone();
            let task_asset = asset.clone();
            let handle = tokio::spawn(async move {
                let outcome = fetch_one(&task_ctx, &task_asset).await;
                task_ctx.record(&outcome);
                outcome
            });
            tasks.push((asset, handle));
        }

        let mut outcomes = Vec::with_capacity(tasks.len());
        for (asset, handle) in tasks {
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    let outcome = DownloadOutcome::failed(format!("task aborted: {e}"));
                    ctx.record(&outcome);
                    outcome
                }
            };
            outcomes.push(AssetOutcome { asset, outcome });
        }

        ctx.stats.finish();
        let stats = ctx.stats.summary();
        info!(
            success = stats.success,
            failed = stats.failed,
            skipped = stats.skipped,
            elapsed_secs = stats.elapsed_secs,
            throughput = stats.throughput,
            "fetch run finished"
        );

        Ok(FetchReport {
            directory,
            stats,
            outcomes,
            peak_in_flight: ctx.limiter.peak(),
        })
    }
}

impl RunContext {
    /// The lock serializing every task of this run that targets `path`.
    fn path_lock(&self, path: &Path) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = match self.path_locks.lock() {
            Ok(locks) => locks,
            Err(poisoned) => poisoned.into_inner(),
        };
        locks.entry(path.to_path_buf()).or_default().clone()
    }

    fn record(&self, outcome: &DownloadOutcome) {
        let done = match outcome {
            DownloadOutcome::Success { .. } => self.stats.record_success(),
            DownloadOutcome::Skipped { .. } => self.stats.record_skipped(),
            DownloadOutcome::Failed { .. } => self.stats.record_failed(),
        };
        let total = self.stats.total();
        if done % self.progress_every == 0 || done == total {
            info!(
                processed = done,
                total,
                success = self.stats.success(),
                failed = self.stats.failed(),
                skipped = self.stats.skipped(),
                throughput = self.stats.throughput(),
                "progress"
            );
        }
    }
}

async fn fetch_one(ctx: &RunContext, asset: &AssetReference) -> DownloadOutcome {
    if ctx.cancel.is_cancelled() {
        return DownloadOutcome::failed(DownloadError::Cancelled.to_string());
    }

    let path = ctx.directory.join(fetch_filename(&asset.url, asset.index));

    // Tasks sharing a destination take turns; a later one only skips if an
    // earlier attempt actually left the file behind.
    let path_lock = ctx.path_lock(&path);
    let _path_guard = tokio::select! {
        biased;
        _ = ctx.cancel.cancelled() => {
            return DownloadOutcome::failed(DownloadError::Cancelled.to_string());
        }
        guard = path_lock.lock_owned() => guard,
    };

    if tokio::fs::try_exists(&path).await.unwrap_or(false) {
        debug!(url = %asset.url, path = %path.display(), "already present, skipping");
        return DownloadOutcome::Skipped { path };
    }

    let slot = tokio::select! {
        biased;
        _ = ctx.cancel.cancelled() => None,
        slot = ctx.limiter.acquire() => slot.ok(),
    };
    let Some(slot) = slot else {
        return DownloadOutcome::failed(DownloadError::Cancelled.to_string());
    };

    let result = ctx.downloader.fetch(&asset.url, &path, &ctx.cancel).await;
    drop(slot);

    match result {
        Ok(bytes) => {
            debug!(url = %asset.url, bytes, "saved {}", path.display());
            DownloadOutcome::Success { path, bytes }
        }
        Err(DownloadError::AlreadyExists) => DownloadOutcome::Skipped { path },
        Err(e) => {
            warn!(url = %asset.url, index = asset.index, error = %e, "download failed");
            DownloadOutcome::failed(e.to_string())
        }
    }
}
