use std::path::Path;
use std::time::{Duration, Instant};

use futures::StreamExt;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

use crate::error::TransferError;
use crate::feed::Episode;
use crate::http::HttpClient;
use crate::progress::{CancelToken, ProgressEvent, SharedProgressReporter};

/// Retry configuration for one transfer
#[derive(Debug, Clone)]
pub struct TransferPolicy {
    /// Total number of attempts before giving up
    pub max_retries: u32,
    /// Delay before the second attempt; doubles for each further attempt
    pub initial_backoff: Duration,
}

impl Default for TransferPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_secs(2),
        }
    }
}

/// Final result of a transfer, after any retries
#[derive(Debug)]
pub enum TransferOutcome {
    Success {
        bytes_transferred: u64,
        elapsed: Duration,
    },
    /// The cancel token was set mid-stream. The partially written file is
    /// left at the destination; the caller decides its fate.
    Cancelled,
    /// All attempts failed; carries the last attempt's error
    Failed(TransferError),
}

enum AttemptEnd {
    Completed {
        bytes_transferred: u64,
        elapsed: Duration,
    },
    Cancelled,
}

/// Stream one episode's media to `dest`, retrying transient failures.
///
/// Every attempt restarts from byte zero and truncates whatever a previous
/// attempt left behind. Between failed attempts the task sleeps
/// `initial_backoff * 2^(attempt-1)`; nothing is slept after the last one.
/// The cancel token is checked at every chunk boundary.
pub async fn transfer_episode<C: HttpClient>(
    client: &C,
    episode: &Episode,
    dest: &Path,
    policy: &TransferPolicy,
    reporter: &SharedProgressReporter,
    cancel: &CancelToken,
) -> TransferOutcome {
    let max_retries = policy.max_retries.max(1);
    let mut attempt = 1;

    loop {
        match run_attempt(client, episode, dest, reporter, cancel).await {
            Ok(AttemptEnd::Completed {
                bytes_transferred,
                elapsed,
            }) => {
                return TransferOutcome::Success {
                    bytes_transferred,
                    elapsed,
                };
            }
            Ok(AttemptEnd::Cancelled) => return TransferOutcome::Cancelled,
            Err(error) => {
                if attempt >= max_retries {
                    return TransferOutcome::Failed(error);
                }

                let delay = policy.initial_backoff * 2u32.pow(attempt - 1);
                reporter.report(ProgressEvent::RetryScheduled {
                    episode_title: episode.title.clone(),
                    attempt,
                    max_retries,
                    delay,
                    error: error.to_string(),
                });
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

async fn run_attempt<C: HttpClient>(
    client: &C,
    episode: &Episode,
    dest: &Path,
    reporter: &SharedProgressReporter,
    cancel: &CancelToken,
) -> Result<AttemptEnd, TransferError> {
    let url = episode.media_url.as_str();
    let started = Instant::now();

    let response = client
        .get_stream(url)
        .await
        .map_err(|e| TransferError::HttpFailed {
            url: url.to_string(),
            source: e,
        })?;

    if response.status >= 400 {
        return Err(TransferError::HttpStatus {
            url: url.to_string(),
            status: response.status,
        });
    }

    // Truncates leftovers from a failed previous attempt
    let mut file = File::create(dest)
        .await
        .map_err(|e| TransferError::FileCreateFailed {
            path: dest.to_path_buf(),
            source: e,
        })?;

    let mut bytes_transferred: u64 = 0;
    let mut stream = response.body;

    while let Some(chunk_result) = stream.next().await {
        if cancel.is_cancelled() {
            return Ok(AttemptEnd::Cancelled);
        }

        let chunk = chunk_result.map_err(|e| TransferError::StreamFailed {
            url: url.to_string(),
            source: e,
        })?;

        file.write_all(&chunk)
            .await
            .map_err(|e| TransferError::FileWriteFailed {
                path: dest.to_path_buf(),
                source: e,
            })?;

        bytes_transferred += chunk.len() as u64;

        reporter.report(ProgressEvent::TransferProgress {
            episode_title: episode.title.clone(),
            bytes_transferred,
            total_bytes: response.content_length,
            elapsed: started.elapsed(),
        });
    }

    file.flush()
        .await
        .map_err(|e| TransferError::FileWriteFailed {
            path: dest.to_path_buf(),
            source: e,
        })?;

    Ok(AttemptEnd::Completed {
        bytes_transferred,
        elapsed: started.elapsed(),
    })
}
