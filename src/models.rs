// src/models.rs

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A discovered asset URL together with its position in discovery order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetReference {
    pub index: usize,
    pub url: String,
}

impl AssetReference {
    pub fn new(index: usize, url: impl Into<String>) -> Self {
        Self {
            index,
            url: url.into(),
        }
    }

    /// Numbers a list of URLs in the order given.
    pub fn from_urls<I, S>(urls: I) -> Vec<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        urls.into_iter()
            .enumerate()
            .map(|(index, url)| Self::new(index, url))
            .collect()
    }
}

/// Terminal result of one fetch attempt. Exactly one per `AssetReference`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DownloadOutcome {
    Success { path: PathBuf, bytes: u64 },
    /// The destination already existed (on disk or claimed earlier in the run).
    Skipped { path: PathBuf },
    Failed { reason: String },
}

impl DownloadOutcome {
    pub fn failed(reason: impl Into<String>) -> Self {
        DownloadOutcome::Failed {
            reason: reason.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, DownloadOutcome::Success { .. })
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, DownloadOutcome::Skipped { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, DownloadOutcome::Failed { .. })
    }
}

/// Pairing of an asset with the outcome the fetch engine recorded for it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetOutcome {
    pub asset: AssetReference,
    #[serde(flatten)]
    pub outcome: DownloadOutcome,
}

/// An intercepted image body held in memory until the capture store flushes.
#[derive(Debug, Clone)]
pub struct CapturedAsset {
    /// Buffer key; sanitized again when materialized on disk.
    pub filename: String,
    pub data: Bytes,
    pub source_url: String,
    pub content_type: Option<String>,
    pub captured_at: DateTime<Utc>,
}

impl CapturedAsset {
    pub fn new(
        filename: String,
        data: Bytes,
        source_url: String,
        content_type: Option<String>,
    ) -> Self {
        Self {
            filename,
            data,
            source_url,
            content_type,
            captured_at: Utc::now(),
        }
    }

    /// Byte length of the buffer itself, never a header value.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
