// src/capture.rs

use crate::integrity;
use crate::models::CapturedAsset;
use crate::naming::{
    capture_filename, capture_folder_name, sanitize_filename, with_collision_suffix,
};
use crate::session::{BrowsingSession, ResponseEvent};
use crate::stats::{RunStats, RunSummary};
use futures_util::StreamExt;
use indexmap::IndexMap;
use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Give up on a name after this many `-N` suffixes.
pub const MAX_COLLISION_ATTEMPTS: usize = 1000;

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("cannot create output directory {}: {source}", .path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// What happened to a single response handed to [`CaptureStore::ingest`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Not an image; the body was never read.
    Ignored,
    /// Buffered under `filename`; `replaced` if an earlier buffer was overwritten.
    Captured { filename: String, replaced: bool },
    /// An image whose body could not be read. Counted in `ignored_errors`.
    Dropped { reason: String },
}

struct CaptureState {
    assets: IndexMap<String, CapturedAsset>,
    stats: RunStats,
}

impl Default for CaptureState {
    fn default() -> Self {
        Self {
            assets: IndexMap::new(),
            stats: RunStats::new(),
        }
    }
}

/// Buffers image responses from a live session and writes them out in one batch.
///
/// Clones share the same buffer, so one clone can sit in the observer task
/// while another flushes.
#[derive(Clone, Default)]
pub struct CaptureStore {
    inner: Arc<Mutex<CaptureState>>,
}

/// Resource type `image`, or a content type under `image/`.
pub fn is_image_response(event: &ResponseEvent) -> bool {
    let by_type = event
        .resource_type
        .as_deref()
        .is_some_and(|t| t.eq_ignore_ascii_case("image"));
    let by_header = event.content_type().is_some_and(|ct| {
        ct.trim_start()
            .get(..6)
            .is_some_and(|prefix| prefix.eq_ignore_ascii_case("image/"))
    });
    by_type || by_header
}

impl CaptureStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts ingesting every response of `session` on a background task.
    ///
    /// Events are processed one at a time in delivery order. The task ends
    /// when the session's stream does.
    pub fn observe<S>(&self, session: &S) -> JoinHandle<()>
    where
        S: BrowsingSession + ?Sized,
    {
        let mut events = session.responses();
        let store = self.clone();
        tokio::spawn(async move {
            while let Some(event) = events.next().await {
                store.ingest(event).await;
            }
            debug!("response stream closed");
        })
    }

    /// Classifies one response and buffers it if it is an image.
    ///
    /// Never fails: unreadable bodies are logged and counted, not propagated.
    pub async fn ingest(&self, event: ResponseEvent) -> IngestOutcome {
        if !is_image_response(&event) {
            return IngestOutcome::Ignored;
        }

        let url = event.url.clone();
        let content_type = event.content_type().map(str::to_string);

        let data = match event.into_body().await {
            Ok(data) => data,
            Err(e) => {
                warn!(url = %url, error = %e, "could not read image body, dropping response");
                self.inner.lock().await.stats.record_ignored_error();
                return IngestOutcome::Dropped {
                    reason: e.to_string(),
                };
            }
        };

        let filename = capture_filename(&url, content_type.as_deref());
        let asset = CapturedAsset::new(filename.clone(), data, url, content_type);
        let bytes = asset.len();

        let mut state = self.inner.lock().await;
        let replaced = state.assets.insert(filename.clone(), asset).is_some();
        let captured = state.stats.record_captured();
        debug!(filename = %filename, bytes, replaced, captured, "captured image");

        IngestOutcome::Captured { filename, replaced }
    }

    /// Writes every buffered asset to `output_dir/<folder for source_url>/`.
    ///
    /// The buffer is drained. Only failing to create the directory is an
    /// error; every per-file problem is counted in the returned summary.
    pub async fn flush(
        &self,
        source_url: &str,
        output_dir: &Path,
    ) -> Result<RunSummary, CaptureError> {
        let directory = output_dir.join(capture_folder_name(source_url));
        tokio::fs::create_dir_all(&directory)
            .await
            .map_err(|source| CaptureError::CreateDir {
                path: directory.clone(),
                source,
            })?;

        let mut state = self.inner.lock().await;
        if state.assets.is_empty() {
            warn!(source_url, "no images captured, nothing to flush");
            return Ok(state.stats.summary());
        }

        let captured = state.stats.captured();
        state.stats.set_total(captured);
        let assets = std::mem::take(&mut state.assets);
        info!(
            buffered = assets.len(),
            captured,
            directory = %directory.display(),
            "flushing captured images"
        );

        let mut claimed = HashSet::new();
        for asset in assets.into_values() {
            let base = sanitize_filename(&asset.filename);
            let Some(name) = claim_name(&base, &mut claimed) else {
                warn!(filename = %base, "no free name after {} attempts", MAX_COLLISION_ATTEMPTS);
                state.stats.record_failed();
                continue;
            };

            let path = directory.join(&name);
            match write_new(&path, &asset.data).await {
                Ok(()) => {
                    debug!(bytes = asset.len(), "saved {}", path.display());
                    state.stats.record_success();
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    let identical = integrity::same_content(&path, &asset.data)
                        .await
                        .unwrap_or(false);
                    debug!(identical, "{} already on disk, not overwriting", path.display());
                    state.stats.record_duplicate();
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "could not save captured image");
                    state.stats.record_failed();
                }
            }
        }

        state.stats.finish();
        let summary = state.stats.summary();
        info!(
            success = summary.success,
            failed = summary.failed,
            duplicate = summary.duplicate,
            ignored_errors = summary.ignored_errors,
            efficiency = summary.efficiency(),
            "flush finished"
        );
        Ok(summary)
    }

    /// Drops every buffered asset and starts fresh stats.
    pub async fn clear(&self) {
        let mut state = self.inner.lock().await;
        state.assets.clear();
        state.stats = RunStats::new();
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.assets.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.assets.is_empty()
    }

    pub async fn stats(&self) -> RunSummary {
        self.inner.lock().await.stats.summary()
    }

    /// Buffer keys in insertion order.
    pub async fn filenames(&self) -> Vec<String> {
        self.inner.lock().await.assets.keys().cloned().collect()
    }

    pub async fn get(&self, filename: &str) -> Option<CapturedAsset> {
        self.inner.lock().await.assets.get(filename).cloned()
    }
}

fn claim_name(base: &str, claimed: &mut HashSet<String>) -> Option<String> {
    if claimed.insert(base.to_string()) {
        return Some(base.to_string());
    }
    (1..=MAX_COLLISION_ATTEMPTS)
        .map(|n| with_collision_suffix(base, n))
        .find(|candidate| claimed.insert(candidate.clone()))
}

/// Writes `data` to a file that must not exist yet; removes it again on error.
async fn write_new(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await?;
    let written: std::io::Result<()> = async {
        file.write_all(data).await?;
        file.flush().await
    }
    .await;
    if written.is_err() {
        drop(file);
        let _ = tokio::fs::remove_file(path).await;
    }
    written
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn classification() {
        let png = ResponseEvent::with_body("https://x.test/a", Bytes::new())
            .header("content-type", "Image/PNG");
        let typed = ResponseEvent::with_body("https://x.test/b", Bytes::new()).resource_type("Image");
        let html = ResponseEvent::with_body("https://x.test/c", Bytes::new())
            .header("content-type", "text/html");
        let bare = ResponseEvent::with_body("https://x.test/d", Bytes::new());
        assert!(is_image_response(&png));
        assert!(is_image_response(&typed));
        assert!(!is_image_response(&html));
        assert!(!is_image_response(&bare));
    }

    #[test]
    fn claim_name_suffixes_and_gives_up() {
        let mut claimed = HashSet::new();
        assert_eq!(claim_name("a.jpg", &mut claimed).as_deref(), Some("a.jpg"));
        assert_eq!(claim_name("a.jpg", &mut claimed).as_deref(), Some("a-1.jpg"));
        assert_eq!(claim_name("a.jpg", &mut claimed).as_deref(), Some("a-2.jpg"));

        let mut full: HashSet<String> = (1..=MAX_COLLISION_ATTEMPTS)
            .map(|n| with_collision_suffix("b.jpg", n))
            .collect();
        full.insert("b.jpg".to_string());
        assert_eq!(claim_name("b.jpg", &mut full), None);
    }
}
