use std::path::Path;

use crate::feed::Episode;
use crate::http::HttpClient;

/// Default byte margin below which a local size deficit is still complete.
///
/// Feeds routinely misreport enclosure sizes by container overhead or
/// metadata differences; the margin absorbs that without a network round
/// trip per file.
pub const DEFAULT_TOLERANCE: u64 = 5 * 1024 * 1024;

/// Verdict on the local artifact for one episode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completeness {
    /// No local file exists at the expected path
    Missing,
    /// The local file is present and close enough to the remote size
    /// (or no remote size is obtainable, in which case it is trusted)
    Complete,
    /// The local file is smaller than the remote size by more than the
    /// tolerance and should be replaced
    Damaged { local_size: u64, remote_size: u64 },
}

/// Classify one episode's local file as missing, complete, or damaged.
///
/// The remote size comes from the feed's declared length when positive,
/// falling back to a HEAD probe against the media URL. With no usable size
/// from either, an existing file is assumed complete.
///
/// Inspection only: this never deletes or writes. Removing a damaged file
/// is the orchestrator's job, done immediately before the replacement
/// transfer starts.
pub async fn classify_episode<C: HttpClient>(
    client: &C,
    episode: &Episode,
    local_path: &Path,
    tolerance: u64,
) -> Completeness {
    let local_size = match tokio::fs::metadata(local_path).await {
        Ok(meta) if meta.is_file() => meta.len(),
        _ => return Completeness::Missing,
    };

    let remote_size = match episode.declared_size.filter(|&len| len > 0) {
        Some(len) => Some(len),
        None => client
            .content_length(episode.media_url.as_str())
            .await
            .ok()
            .flatten()
            .filter(|&len| len > 0),
    };

    let Some(remote_size) = remote_size else {
        // Cannot prove damage, so trust the existing file
        return Completeness::Complete;
    };

    if remote_size.saturating_sub(local_size) > tolerance {
        Completeness::Damaged {
            local_size,
            remote_size,
        }
    } else {
        Completeness::Complete
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{ByteStream, HttpResponse};
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::path::PathBuf;
    use tempfile::tempdir;
    use url::Url;

    struct MockHttpClient {
        probed_length: Option<u64>,
    }

    #[async_trait]
    impl HttpClient for MockHttpClient {
        async fn get_bytes(&self, _url: &str) -> Result<Bytes, reqwest::Error> {
            Ok(Bytes::new())
        }

        async fn get_stream(&self, _url: &str) -> Result<HttpResponse, reqwest::Error> {
            let body: ByteStream = Box::pin(futures::stream::empty());
            Ok(HttpResponse {
                status: 200,
                content_length: None,
                body,
            })
        }

        async fn content_length(&self, _url: &str) -> Result<Option<u64>, reqwest::Error> {
            Ok(self.probed_length)
        }
    }

    fn make_episode(declared_size: Option<u64>) -> Episode {
        Episode {
            title: "Test Episode".to_string(),
            media_url: Url::parse("https://example.com/episode.mp3").unwrap(),
            declared_size,
            published_at: None,
        }
    }

    fn write_file(dir: &Path, size: usize) -> PathBuf {
        let path = dir.join("episode.mp3");
        std::fs::write(&path, vec![0u8; size]).unwrap();
        path
    }

    #[tokio::test]
    async fn missing_file_is_missing() {
        let dir = tempdir().unwrap();
        let client = MockHttpClient {
            probed_length: Some(1000),
        };
        let episode = make_episode(Some(1000));

        let verdict =
            classify_episode(&client, &episode, &dir.path().join("nope.mp3"), 0).await;
        assert_eq!(verdict, Completeness::Missing);
    }

    #[tokio::test]
    async fn deficit_within_tolerance_is_complete() {
        let dir = tempdir().unwrap();
        let client = MockHttpClient { probed_length: None };
        let episode = make_episode(Some(10_000_000));
        let path = write_file(dir.path(), 10_000_000 - 4_999_999);

        let verdict = classify_episode(&client, &episode, &path, 5_000_000).await;
        assert_eq!(verdict, Completeness::Complete);
    }

    #[tokio::test]
    async fn deficit_exactly_at_tolerance_is_complete() {
        let dir = tempdir().unwrap();
        let client = MockHttpClient { probed_length: None };
        let episode = make_episode(Some(10_000_000));
        let path = write_file(dir.path(), 10_000_000 - 5_000_000);

        let verdict = classify_episode(&client, &episode, &path, 5_000_000).await;
        assert_eq!(verdict, Completeness::Complete);
    }

    #[tokio::test]
    async fn deficit_past_tolerance_is_damaged() {
        let dir = tempdir().unwrap();
        let client = MockHttpClient { probed_length: None };
        let episode = make_episode(Some(10_000_000));
        let path = write_file(dir.path(), 10_000_000 - 5_000_001);

        let verdict = classify_episode(&client, &episode, &path, 5_000_000).await;
        assert_eq!(
            verdict,
            Completeness::Damaged {
                local_size: 4_999_999,
                remote_size: 10_000_000,
            }
        );
    }

    #[tokio::test]
    async fn unknown_size_trusts_existing_file() {
        let dir = tempdir().unwrap();
        let client = MockHttpClient { probed_length: None };
        let episode = make_episode(None);
        // A single byte on disk, and still trusted
        let path = write_file(dir.path(), 1);

        let verdict = classify_episode(&client, &episode, &path, 0).await;
        assert_eq!(verdict, Completeness::Complete);
    }

    #[tokio::test]
    async fn head_probe_fills_in_missing_declared_size() {
        let dir = tempdir().unwrap();
        let client = MockHttpClient {
            probed_length: Some(10_000),
        };
        let episode = make_episode(None);
        let path = write_file(dir.path(), 100);

        let verdict = classify_episode(&client, &episode, &path, 1_000).await;
        assert_eq!(
            verdict,
            Completeness::Damaged {
                local_size: 100,
                remote_size: 10_000,
            }
        );
    }

    #[tokio::test]
    async fn zero_declared_size_falls_back_to_probe() {
        let dir = tempdir().unwrap();
        let client = MockHttpClient {
            probed_length: Some(10_000),
        };
        let episode = make_episode(Some(0));
        let path = write_file(dir.path(), 9_999);

        let verdict = classify_episode(&client, &episode, &path, 1_000).await;
        assert_eq!(verdict, Completeness::Complete);
    }
}
