use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Events emitted during synchronization for progress reporting
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    /// Feed is being fetched from URL
    FetchingFeed { url: String },

    /// A feed has been fetched and the episode selection resolved
    CatalogLoaded {
        source_name: String,
        feed_title: String,
        /// Episodes carried by the feed (after dropping unusable entries)
        total_episodes: usize,
        /// Episodes left after filtering, ordering, and limiting
        selected: usize,
        /// Feed entries dropped for lacking a usable media URL
        dropped_entries: usize,
    },

    /// A transfer is starting for one episode
    EpisodeStarting {
        episode_title: String,
        /// Index of this episode in the resolved download order
        episode_index: usize,
        /// Total number of selected episodes for this source
        total_selected: usize,
        /// Byte length reported by the feed, if any
        declared_size: Option<u64>,
        /// True when a damaged local file was removed first
        redownload: bool,
    },

    /// Transfer progress update, emitted once per received chunk
    TransferProgress {
        episode_title: String,
        bytes_transferred: u64,
        total_bytes: Option<u64>,
        /// Time since the current attempt started; speed is
        /// `bytes_transferred / elapsed`
        elapsed: Duration,
    },

    /// A failed attempt will be retried after a backoff delay
    RetryScheduled {
        episode_title: String,
        attempt: u32,
        max_retries: u32,
        delay: Duration,
        error: String,
    },

    /// An episode's local file is already complete
    EpisodeSkipped { episode_title: String },

    /// An episode finished downloading
    EpisodeCompleted {
        episode_title: String,
        bytes_transferred: u64,
        elapsed: Duration,
        redownload: bool,
    },

    /// An episode failed after all retries were exhausted
    EpisodeFailed { episode_title: String, error: String },

    /// A whole source failed (feed unreachable or output dir unusable)
    SourceFailed { source_name: String, error: String },

    /// Sync session completed
    SessionCompleted {
        downloaded: usize,
        redownloaded: usize,
        skipped: usize,
        failed: usize,
    },
}

/// Trait for reporting progress events during synchronization.
///
/// Implementations can use this to display progress bars, log messages,
/// or collect statistics. The reporter decides its own verbosity; the
/// engine emits everything.
pub trait ProgressReporter: Send + Sync {
    /// Report a progress event
    fn report(&self, event: ProgressEvent);
}

/// A shared reference to a progress reporter
pub type SharedProgressReporter = Arc<dyn ProgressReporter>;

/// A no-op progress reporter that silently ignores all events.
/// Useful for tests or quiet mode.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopReporter;

impl ProgressReporter for NoopReporter {
    fn report(&self, _event: ProgressEvent) {
        // Intentionally empty
    }
}

impl NoopReporter {
    /// Create a new NoopReporter wrapped in an Arc
    pub fn shared() -> SharedProgressReporter {
        Arc::new(Self)
    }
}

/// Cooperative cancellation flag shared between a sync session and its
/// caller.
///
/// Checked at chunk boundaries inside a transfer and at episode boundaries
/// inside the orchestrator; a request takes effect at the next checkpoint,
/// never preemptively.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation of the session holding this token
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Return a human-friendly string for a byte count (GB, MB, KB, or B)
pub fn format_bytes(num_bytes: u64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = 1024.0 * 1024.0;
    const GB: f64 = 1024.0 * 1024.0 * 1024.0;

    let n = num_bytes as f64;
    if n >= GB {
        format!("{:.2} GB", n / GB)
    } else if n >= MB {
        format!("{:.2} MB", n / MB)
    } else if n >= KB {
        format!("{:.2} KB", n / KB)
    } else {
        format!("{num_bytes} B")
    }
}

/// Return a human-friendly transfer speed for bytes-per-second
pub fn format_speed(bytes_per_sec: f64) -> String {
    if bytes_per_sec >= 1024.0 * 1024.0 {
        format!("{:.2} MB/s", bytes_per_sec / (1024.0 * 1024.0))
    } else if bytes_per_sec >= 1024.0 {
        format!("{:.2} KB/s", bytes_per_sec / 1024.0)
    } else {
        format!("{bytes_per_sec:.0} B/s")
    }
}
