// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::cmp::Ordering;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::episode::{
    Completeness, DEFAULT_TOLERANCE, TransferOutcome, TransferPolicy, classify_episode,
    episode_filename, transfer_episode,
};
use crate::error::SyncError;
use crate::feed::{Episode, fetch_catalog};
use crate::http::HttpClient;
use crate::progress::{CancelToken, ProgressEvent, SharedProgressReporter};

/// One configured feed: where it lives and where its episodes go.
///
/// Created from persisted configuration by the front end; read-only here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PodcastSource {
    pub name: String,
    pub feed_url: String,
    pub output_dir: PathBuf,
}

/// Options for a sync session
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Download oldest episodes first instead of newest first
    pub oldest_first: bool,
    /// Maximum number of episodes to process per source (None = all)
    pub max_episodes: Option<usize>,
    /// Case-insensitive title substring filter
    pub search_term: Option<String>,
    /// Byte margin below which a local size deficit still counts as complete
    pub tolerance: u64,
    /// Retry/backoff configuration for transfers
    pub transfer: TransferPolicy,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            oldest_first: false,
            max_episodes: None,
            search_term: None,
            tolerance: DEFAULT_TOLERANCE,
            transfer: TransferPolicy::default(),
        }
    }
}

/// What happened to one episode during a sync run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EpisodeOutcome {
    /// Local file was already complete
    Skipped,
    /// Episode was absent locally and has been downloaded
    Downloaded,
    /// Local file was damaged, deleted, and downloaded again
    Redownloaded,
    /// All transfer attempts failed; sync continued with the next episode
    Failed { error: String },
}

/// Per-episode result within a source
#[derive(Debug, Clone)]
pub struct EpisodeReport {
    pub title: String,
    pub outcome: EpisodeOutcome,
}

/// Result of syncing one source
#[derive(Debug, Clone)]
pub struct SourceReport {
    pub name: String,
    /// Episode outcomes in processing order
    pub outcomes: Vec<EpisodeReport>,
    /// Source-level failure (feed unreachable, output dir unusable)
    pub error: Option<String>,
    /// True when cancellation stopped this source partway
    pub cancelled: bool,
}

/// Result of one orchestration run over one or more sources
#[derive(Debug, Clone, Default)]
pub struct SyncSession {
    pub sources: Vec<SourceReport>,
    /// True when the run was stopped by its cancel token
    pub cancelled: bool,
}

impl SyncSession {
    pub fn downloaded(&self) -> usize {
        self.count(|o| matches!(o, EpisodeOutcome::Downloaded))
    }

    pub fn redownloaded(&self) -> usize {
        self.count(|o| matches!(o, EpisodeOutcome::Redownloaded))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, EpisodeOutcome::Skipped))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, EpisodeOutcome::Failed { .. }))
    }

    /// Titles and last error of every failed episode, across sources
    pub fn failed_episodes(&self) -> Vec<(&str, &str)> {
        self.sources
            .iter()
            .flat_map(|s| s.outcomes.iter())
            .filter_map(|r| match &r.outcome {
                EpisodeOutcome::Failed { error } => Some((r.title.as_str(), error.as_str())),
                _ => None,
            })
            .collect()
    }

    /// Sources that failed as a whole, with the reason
    pub fn source_failures(&self) -> Vec<(&str, &str)> {
        self.sources
            .iter()
            .filter_map(|s| s.error.as_deref().map(|e| (s.name.as_str(), e)))
            .collect()
    }

    fn count(&self, pred: impl Fn(&EpisodeOutcome) -> bool) -> usize {
        self.sources
            .iter()
            .flat_map(|s| s.outcomes.iter())
            .filter(|r| pred(&r.outcome))
            .count()
    }
}

/// Apply search filter, publish-date ordering, and count limit.
///
/// Episodes without a publish date sort last regardless of direction; ties
/// keep feed order.
pub fn select_episodes(episodes: Vec<Episode>, options: &SyncOptions) -> Vec<Episode> {
    let mut selected: Vec<Episode> = match &options.search_term {
        Some(term) => {
            let needle = term.to_lowercase();
            episodes
                .into_iter()
                .filter(|e| e.title.to_lowercase().contains(&needle))
                .collect()
        }
        None => episodes,
    };

    selected.sort_by(|a, b| match (a.published_at, b.published_at) {
        (Some(a), Some(b)) => {
            if options.oldest_first {
                a.cmp(&b)
            } else {
                b.cmp(&a)
            }
        }
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    });

    if let Some(limit) = options.max_episodes {
        selected.truncate(limit);
    }

    selected
}

/// Synchronize one or more podcast sources.
///
/// Sources are processed in order, episodes within a source strictly
/// sequentially. A source whose feed is unreachable is recorded and the
/// batch moves on; cancellation stops the whole batch at the next
/// checkpoint. Never returns an error: every failure is part of the
/// session report.
pub async fn sync_sources<C: HttpClient>(
    client: &C,
    sources: &[PodcastSource],
    options: &SyncOptions,
    reporter: &SharedProgressReporter,
    cancel: &CancelToken,
) -> SyncSession {
    let mut session = SyncSession::default();

    for source in sources {
        if cancel.is_cancelled() {
            session.cancelled = true;
            break;
        }

        let report = sync_source(client, source, options, reporter, cancel).await;
        let cancelled = report.cancelled;
        session.sources.push(report);

        if cancelled {
            session.cancelled = true;
            break;
        }
    }

    reporter.report(ProgressEvent::SessionCompleted {
        downloaded: session.downloaded(),
        redownloaded: session.redownloaded(),
        skipped: session.skipped(),
        failed: session.failed(),
    });

    session
}

/// Synchronize a single source
pub async fn sync_source<C: HttpClient>(
    client: &C,
    source: &PodcastSource,
    options: &SyncOptions,
    reporter: &SharedProgressReporter,
    cancel: &CancelToken,
) -> SourceReport {
    let mut report = SourceReport {
        name: source.name.clone(),
        outcomes: Vec::new(),
        error: None,
        cancelled: false,
    };

    reporter.report(ProgressEvent::FetchingFeed {
        url: source.feed_url.clone(),
    });

    let catalog = match fetch_catalog(client, &source.feed_url).await {
        Ok(catalog) => catalog,
        Err(e) => {
            return fail_source(report, reporter, SyncError::Feed(e));
        }
    };

    if let Err(e) = tokio::fs::create_dir_all(&source.output_dir).await {
        let error = SyncError::OutputDirUnavailable {
            path: source.output_dir.clone(),
            source: e,
        };
        return fail_source(report, reporter, error);
    }

    let total_episodes = catalog.episodes.len();
    let selected = select_episodes(catalog.episodes, options);
    let total_selected = selected.len();

    reporter.report(ProgressEvent::CatalogLoaded {
        source_name: source.name.clone(),
        feed_title: catalog.title,
        total_episodes,
        selected: total_selected,
        dropped_entries: catalog.dropped_entries,
    });

    for (episode_index, episode) in selected.iter().enumerate() {
        if cancel.is_cancelled() {
            report.cancelled = true;
            break;
        }

        let dest = source.output_dir.join(episode_filename(episode));
        let verdict = classify_episode(client, episode, &dest, options.tolerance).await;

        let redownload = match verdict {
            Completeness::Complete => {
                reporter.report(ProgressEvent::EpisodeSkipped {
                    episode_title: episode.title.clone(),
                });
                report.outcomes.push(EpisodeReport {
                    title: episode.title.clone(),
                    outcome: EpisodeOutcome::Skipped,
                });
                continue;
            }
            Completeness::Missing => false,
            Completeness::Damaged { .. } => {
                // Stale file goes away right before its replacement starts
                if let Err(e) = tokio::fs::remove_file(&dest).await {
                    let error = format!(
                        "Cannot remove damaged file {}: {}",
                        dest.display(),
                        e
                    );
                    reporter.report(ProgressEvent::EpisodeFailed {
                        episode_title: episode.title.clone(),
                        error: error.clone(),
                    });
                    report.outcomes.push(EpisodeReport {
                        title: episode.title.clone(),
                        outcome: EpisodeOutcome::Failed { error },
                    });
                    continue;
                }
                true
            }
        };

        reporter.report(ProgressEvent::EpisodeStarting {
            episode_title: episode.title.clone(),
            episode_index,
            total_selected,
            declared_size: episode.declared_size,
            redownload,
        });

        match transfer_episode(client, episode, &dest, &options.transfer, reporter, cancel).await
        {
            TransferOutcome::Success {
                bytes_transferred,
                elapsed,
            } => {
                reporter.report(ProgressEvent::EpisodeCompleted {
                    episode_title: episode.title.clone(),
                    bytes_transferred,
                    elapsed,
                    redownload,
                });
                report.outcomes.push(EpisodeReport {
                    title: episode.title.clone(),
                    outcome: if redownload {
                        EpisodeOutcome::Redownloaded
                    } else {
                        EpisodeOutcome::Downloaded
                    },
                });
            }
            TransferOutcome::Failed(error) => {
                let error = error.to_string();
                reporter.report(ProgressEvent::EpisodeFailed {
                    episode_title: episode.title.clone(),
                    error: error.clone(),
                });
                report.outcomes.push(EpisodeReport {
                    title: episode.title.clone(),
                    outcome: EpisodeOutcome::Failed { error },
                });
                // An undersized leftover would be trusted next run whenever
                // no remote size is obtainable; remove it
                let _ = tokio::fs::remove_file(&dest).await;
            }
            TransferOutcome::Cancelled => {
                let _ = tokio::fs::remove_file(&dest).await;
                report.cancelled = true;
                break;
            }
        }
    }

    report
}

fn fail_source(
    mut report: SourceReport,
    reporter: &SharedProgressReporter,
    error: SyncError,
) -> SourceReport {
    let error = error.to_string();
    reporter.report(ProgressEvent::SourceFailed {
        source_name: report.name.clone(),
        error: error.clone(),
    });
    report.error = Some(error);
    report
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::HashMap;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use bytes::Bytes;
    use chrono::DateTime;
    use tempfile::tempdir;
    use url::Url;

    use crate::http::{ByteStream, HttpResponse};
    use crate::progress::{NoopReporter, ProgressReporter};

    struct MockHttpClient {
        /// Feed XML by URL; anything else is served as audio
        feeds: HashMap<String, String>,
        audio: Vec<u8>,
        chunk_size: usize,
    }

    impl MockHttpClient {
        fn new(feeds: HashMap<String, String>, audio: &[u8]) -> Self {
            Self {
                feeds,
                audio: audio.to_vec(),
                chunk_size: 4,
            }
        }

        fn single_feed(url: &str, xml: String, audio: &[u8]) -> Self {
            Self::new(HashMap::from([(url.to_string(), xml)]), audio)
        }
    }

    #[async_trait]
    impl HttpClient for MockHttpClient {
        async fn get_bytes(&self, url: &str) -> Result<Bytes, reqwest::Error> {
            match self.feeds.get(url) {
                Some(xml) => Ok(Bytes::from(xml.clone())),
                None => Ok(Bytes::from(self.audio.clone())),
            }
        }

        async fn get_stream(&self, _url: &str) -> Result<HttpResponse, reqwest::Error> {
            let len = self.audio.len() as u64;
            let chunks: Vec<Vec<u8>> = self
                .audio
                .chunks(self.chunk_size)
                .map(|c| c.to_vec())
                .collect();
            let body: ByteStream = Box::pin(futures::stream::iter(
                chunks.into_iter().map(|c| Ok(Bytes::from(c))),
            ));

            Ok(HttpResponse {
                status: 200,
                content_length: Some(len),
                body,
            })
        }

        async fn content_length(&self, _url: &str) -> Result<Option<u64>, reqwest::Error> {
            Ok(None)
        }
    }

    fn feed_xml(items: &str) -> String {
        format!(
            r#"<?xml version="1.0"?>
<rss version="2.0">
  <channel>
    <title>Test Podcast</title>
    <description>A test podcast</description>
    {items}
  </channel>
</rss>"#
        )
    }

    fn make_episode(title: &str, published_at: Option<&str>) -> Episode {
        Episode {
            title: title.to_string(),
            media_url: Url::parse("https://example.com/ep.mp3").unwrap(),
            declared_size: None,
            published_at: published_at.map(|s| DateTime::parse_from_rfc3339(s).unwrap()),
        }
    }

    fn source(feed_url: &str, output_dir: &std::path::Path) -> PodcastSource {
        PodcastSource {
            name: "test".to_string(),
            feed_url: feed_url.to_string(),
            output_dir: output_dir.to_path_buf(),
        }
    }

    #[test]
    fn select_orders_oldest_first_with_undated_last() {
        let episodes = vec![
            make_episode("a", Some("2023-01-01T00:00:00+00:00")),
            make_episode("b", Some("2023-03-01T00:00:00+00:00")),
            make_episode("c", None),
            make_episode("d", Some("2023-02-01T00:00:00+00:00")),
        ];
        let options = SyncOptions {
            oldest_first: true,
            ..Default::default()
        };

        let titles: Vec<_> = select_episodes(episodes, &options)
            .into_iter()
            .map(|e| e.title)
            .collect();
        assert_eq!(titles, vec!["a", "d", "b", "c"]);
    }

    #[test]
    fn select_orders_newest_first_with_undated_last() {
        let episodes = vec![
            make_episode("a", Some("2023-01-01T00:00:00+00:00")),
            make_episode("b", Some("2023-03-01T00:00:00+00:00")),
            make_episode("c", None),
            make_episode("d", Some("2023-02-01T00:00:00+00:00")),
        ];
        let options = SyncOptions::default();

        let titles: Vec<_> = select_episodes(episodes, &options)
            .into_iter()
            .map(|e| e.title)
            .collect();
        assert_eq!(titles, vec!["b", "d", "a", "c"]);
    }

    #[test]
    fn select_filters_by_title_substring_case_insensitively() {
        let episodes = vec![
            make_episode("Rust in Production", None),
            make_episode("Cooking hour", None),
            make_episode("More RUST talk", None),
        ];
        let options = SyncOptions {
            search_term: Some("rust".to_string()),
            ..Default::default()
        };

        let titles: Vec<_> = select_episodes(episodes, &options)
            .into_iter()
            .map(|e| e.title)
            .collect();
        assert_eq!(titles, vec!["Rust in Production", "More RUST talk"]);
    }

    #[test]
    fn select_truncates_after_ordering() {
        let episodes = vec![
            make_episode("old", Some("2023-01-01T00:00:00+00:00")),
            make_episode("new", Some("2023-06-01T00:00:00+00:00")),
        ];
        let options = SyncOptions {
            max_episodes: Some(1),
            ..Default::default()
        };

        let titles: Vec<_> = select_episodes(episodes, &options)
            .into_iter()
            .map(|e| e.title)
            .collect();
        assert_eq!(titles, vec!["new"]);
    }

    #[tokio::test]
    async fn end_to_end_skips_present_downloads_absent_ignores_dropped() {
        let dir = tempdir().unwrap();
        let audio = b"fake audio data!";
        let xml = feed_xml(&format!(
            r#"<item><title>No Media</title></item>
    <item><title>Present</title><enclosure url="https://example.com/present.mp3" length="{len}" type="audio/mpeg"/></item>
    <item><title>Absent</title><enclosure url="https://example.com/absent.mp3" length="{len}" type="audio/mpeg"/></item>"#,
            len = audio.len()
        ));
        let client = MockHttpClient::single_feed("https://example.com/feed.xml", xml, audio);

        // "Present" is already fully on disk
        std::fs::write(dir.path().join("Present.mp3"), audio).unwrap();

        let sources = [source("https://example.com/feed.xml", dir.path())];
        let session = sync_sources(
            &client,
            &sources,
            &SyncOptions::default(),
            &NoopReporter::shared(),
            &CancelToken::new(),
        )
        .await;

        assert_eq!(session.skipped(), 1);
        assert_eq!(session.downloaded(), 1);
        assert_eq!(session.redownloaded(), 0);
        assert_eq!(session.failed(), 0);
        assert!(session.failed_episodes().is_empty());

        let titles: Vec<_> = session.sources[0]
            .outcomes
            .iter()
            .map(|r| r.title.as_str())
            .collect();
        assert!(!titles.contains(&"No Media"));
        assert_eq!(
            std::fs::read(dir.path().join("Absent.mp3")).unwrap(),
            audio
        );
    }

    #[tokio::test]
    async fn second_run_is_idempotent() {
        let dir = tempdir().unwrap();
        let audio = b"fake audio data!";
        let xml = feed_xml(&format!(
            r#"<item><title>One</title><enclosure url="https://example.com/one.mp3" length="{len}" type="audio/mpeg"/></item>
    <item><title>Two</title><enclosure url="https://example.com/two.mp3" length="{len}" type="audio/mpeg"/></item>"#,
            len = audio.len()
        ));
        let client = MockHttpClient::single_feed("https://example.com/feed.xml", xml, audio);
        let sources = [source("https://example.com/feed.xml", dir.path())];

        let first = sync_sources(
            &client,
            &sources,
            &SyncOptions::default(),
            &NoopReporter::shared(),
            &CancelToken::new(),
        )
        .await;
        assert_eq!(first.downloaded(), 2);

        let second = sync_sources(
            &client,
            &sources,
            &SyncOptions::default(),
            &NoopReporter::shared(),
            &CancelToken::new(),
        )
        .await;
        assert_eq!(second.downloaded(), 0);
        assert_eq!(second.redownloaded(), 0);
        assert_eq!(second.skipped(), 2);
    }

    #[tokio::test]
    async fn damaged_file_is_replaced_and_counted_as_redownloaded() {
        let dir = tempdir().unwrap();
        let audio = b"complete audio payload";
        let xml = feed_xml(&format!(
            r#"<item><title>Show</title><enclosure url="https://example.com/show.mp3" length="{len}" type="audio/mpeg"/></item>"#,
            len = audio.len()
        ));
        let client = MockHttpClient::single_feed("https://example.com/feed.xml", xml, audio);

        // Truncated leftovers from some interrupted run
        std::fs::write(dir.path().join("Show.mp3"), b"com").unwrap();

        let options = SyncOptions {
            tolerance: 0,
            ..Default::default()
        };
        let sources = [source("https://example.com/feed.xml", dir.path())];
        let session = sync_sources(
            &client,
            &sources,
            &options,
            &NoopReporter::shared(),
            &CancelToken::new(),
        )
        .await;

        assert_eq!(session.redownloaded(), 1);
        assert_eq!(session.downloaded(), 0);
        assert_eq!(
            std::fs::read(dir.path().join("Show.mp3")).unwrap(),
            audio
        );
    }

    #[tokio::test]
    async fn unreachable_feed_fails_source_but_not_batch() {
        let good_dir = tempdir().unwrap();
        let bad_dir = tempdir().unwrap();
        let audio = b"fake audio data!";
        let xml = feed_xml(&format!(
            r#"<item><title>One</title><enclosure url="https://example.com/one.mp3" length="{len}" type="audio/mpeg"/></item>"#,
            len = audio.len()
        ));
        let client = MockHttpClient::new(
            HashMap::from([
                ("https://example.com/good.xml".to_string(), xml),
                (
                    "https://example.com/bad.xml".to_string(),
                    "this is not a feed".to_string(),
                ),
            ]),
            audio,
        );

        let sources = [
            PodcastSource {
                name: "bad".to_string(),
                feed_url: "https://example.com/bad.xml".to_string(),
                output_dir: bad_dir.path().to_path_buf(),
            },
            PodcastSource {
                name: "good".to_string(),
                feed_url: "https://example.com/good.xml".to_string(),
                output_dir: good_dir.path().to_path_buf(),
            },
        ];

        let session = sync_sources(
            &client,
            &sources,
            &SyncOptions::default(),
            &NoopReporter::shared(),
            &CancelToken::new(),
        )
        .await;

        assert_eq!(session.sources.len(), 2);
        assert!(session.sources[0].error.is_some());
        assert!(session.sources[1].error.is_none());
        assert_eq!(session.downloaded(), 1);

        let failures = session.source_failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].0, "bad");
    }

    /// Cancels the session once a given number of transfer chunks arrived
    struct CancelAfterChunks {
        cancel: CancelToken,
        after: u64,
        seen: Mutex<u64>,
    }

    impl ProgressReporter for CancelAfterChunks {
        fn report(&self, event: ProgressEvent) {
            if let ProgressEvent::TransferProgress { .. } = event {
                let mut seen = self.seen.lock().unwrap();
                *seen += 1;
                if *seen >= self.after {
                    self.cancel.cancel();
                }
            }
        }
    }

    #[tokio::test]
    async fn cancellation_mid_transfer_halts_the_session() {
        let dir = tempdir().unwrap();
        let audio = b"0123456789abcdef";
        let xml = feed_xml(&format!(
            r#"<item><title>First</title><enclosure url="https://example.com/first.mp3" length="{len}" type="audio/mpeg"/></item>
    <item><title>Second</title><enclosure url="https://example.com/second.mp3" length="{len}" type="audio/mpeg"/></item>"#,
            len = audio.len()
        ));
        let client = MockHttpClient::single_feed("https://example.com/feed.xml", xml, audio);

        let cancel = CancelToken::new();
        let reporter: SharedProgressReporter = std::sync::Arc::new(CancelAfterChunks {
            cancel: cancel.clone(),
            after: 2,
            seen: Mutex::new(0),
        });

        let sources = [source("https://example.com/feed.xml", dir.path())];
        let session = sync_sources(
            &client,
            &sources,
            &SyncOptions::default(),
            &reporter,
            &cancel,
        )
        .await;

        assert!(session.cancelled);
        assert!(session.sources[0].cancelled);
        // The interrupted episode is not recorded as an outcome and the
        // second episode was never reached
        assert!(session.sources[0].outcomes.is_empty());
        assert!(!dir.path().join("First.mp3").exists());
        assert!(!dir.path().join("Second.mp3").exists());
    }

    #[tokio::test]
    async fn podcast_source_round_trips_through_json() {
        let src = PodcastSource {
            name: "My Show".to_string(),
            feed_url: "https://example.com/feed.xml".to_string(),
            output_dir: PathBuf::from("/podcasts/my-show"),
        };

        let json = serde_json::to_string(&src).unwrap();
        let back: PodcastSource = serde_json::from_str(&json).unwrap();
        assert_eq!(back.name, src.name);
        assert_eq!(back.feed_url, src.feed_url);
        assert_eq!(back.output_dir, src.output_dir);
    }
}
