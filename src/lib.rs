pub mod capture;
pub mod cli;
pub mod config;
pub mod discover;
pub mod downloader;
pub mod integrity;
pub mod limiter;
pub mod logging;
pub mod manager;
pub mod models;
pub mod naming;
pub mod session;
pub mod stats;

/// Convenient type alias exposing common structs.
pub mod prelude {
    pub use crate::capture::{CaptureError, CaptureStore, IngestOutcome};
    pub use crate::config::{HarvestConfig, RetryConfig};
    pub use crate::discover::discover_image_urls;
    pub use crate::manager::{FetchEngine, FetchError, FetchReport};
    pub use crate::models::{AssetOutcome, AssetReference, CapturedAsset, DownloadOutcome};
    pub use crate::session::{BodyError, BrowsingSession, ChannelSession, ResponseEvent, SessionFeed};
    pub use crate::stats::{RunStats, RunSummary};
}
