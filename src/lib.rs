pub mod episode;
pub mod error;
pub mod feed;
pub mod http;
pub mod progress;
pub mod sync;

// Re-export main types for convenience
pub use episode::{
    Completeness, DEFAULT_TOLERANCE, TransferOutcome, TransferPolicy, classify_episode,
    episode_filename, transfer_episode,
};
pub use error::{FeedError, SyncError, TransferError};
pub use feed::{Catalog, Episode, fetch_catalog, parse_catalog};
pub use http::{HttpClient, HttpResponse, ReqwestClient};
pub use progress::{
    CancelToken, NoopReporter, ProgressEvent, ProgressReporter, SharedProgressReporter,
    format_bytes, format_speed,
};
pub use sync::{
    EpisodeOutcome, EpisodeReport, PodcastSource, SourceReport, SyncOptions, SyncSession,
    select_episodes, sync_source, sync_sources,
};
