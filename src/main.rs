use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use console::Emoji;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

use podsync::{
    CancelToken, NoopReporter, PodcastSource, ProgressEvent, ProgressReporter, ReqwestClient,
    SharedProgressReporter, SyncOptions, TransferPolicy, format_bytes, format_speed, sync_sources,
};

// Emoji with fallback for terminals without Unicode support
static MICROPHONE: Emoji<'_, '_> = Emoji("🎙️  ", "");
static SEARCH: Emoji<'_, '_> = Emoji("🔍 ", "[~] ");
static HEADPHONES: Emoji<'_, '_> = Emoji("🎧 ", "[i] ");
static DOWNLOAD: Emoji<'_, '_> = Emoji("📥 ", "[v] ");
static SUCCESS: Emoji<'_, '_> = Emoji("✅ ", "[+] ");
static FAILURE: Emoji<'_, '_> = Emoji("❌ ", "[!] ");
static PARTY: Emoji<'_, '_> = Emoji("🎉 ", "[*] ");
static SKIP: Emoji<'_, '_> = Emoji("⏭  ", "[=] ");
static RETRY: Emoji<'_, '_> = Emoji("🔁 ", "[r] ");
static STOP: Emoji<'_, '_> = Emoji("🛑 ", "[x] ");
static CROSS: Emoji<'_, '_> = Emoji("✗ ", "x ");

/// Synchronize podcast episodes from RSS feeds
#[derive(Parser, Debug)]
#[command(name = "podsync")]
#[command(about = "Synchronize podcast episodes from RSS feeds")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Quiet mode - suppress progress output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Size tolerance in MB below which a smaller local file still counts as complete
    #[arg(long, global = true, default_value_t = 5)]
    tolerance_mb: u64,

    /// Maximum transfer attempts per episode
    #[arg(long, global = true, default_value_t = 3)]
    max_retries: u32,

    /// Base backoff delay in seconds between failed attempts
    #[arg(long, global = true, default_value_t = 2)]
    backoff_secs: u64,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Download episodes from a single feed
    Download {
        /// RSS feed URL
        feed_url: String,

        /// Output directory for downloaded episodes
        output_dir: PathBuf,

        /// Maximum number of episodes to download
        #[arg(short, long)]
        limit: Option<usize>,

        /// Only episodes whose title contains this text (case-insensitive)
        #[arg(short, long)]
        search: Option<String>,

        /// Start with the oldest episodes instead of the newest
        #[arg(long)]
        oldest_first: bool,
    },

    /// Update every podcast listed in a sources file
    Update {
        /// JSON file with the configured podcast sources
        sources_file: PathBuf,

        /// Start with the oldest episodes instead of the newest
        #[arg(long)]
        oldest_first: bool,
    },
}

/// Progress reporter using indicatif for terminal output.
///
/// Episodes download one at a time, so a single transfer bar below the
/// spinner is enough.
struct IndicatifReporter {
    multi: MultiProgress,
    main_bar: ProgressBar,
    episode_bar: Mutex<Option<ProgressBar>>,
    bytes_total: AtomicU64,
}

impl IndicatifReporter {
    fn new() -> Self {
        let multi = MultiProgress::new();

        let main_style = ProgressStyle::default_bar()
            .template("{spinner:.green} {wide_msg}")
            .unwrap();

        let main_bar = multi.add(ProgressBar::new_spinner());
        main_bar.set_style(main_style);
        main_bar.enable_steady_tick(Duration::from_millis(100));

        Self {
            multi,
            main_bar,
            episode_bar: Mutex::new(None),
            bytes_total: AtomicU64::new(0),
        }
    }

    fn start_episode_bar(&self, length: Option<u64>, message: String) {
        let style = ProgressStyle::default_bar()
            .template(&format!(
                "  {DOWNLOAD}[{{bar:30.cyan/blue}}] {{bytes}}/{{total_bytes}} {{wide_msg}}"
            ))
            .unwrap()
            .progress_chars("█▓░");

        let bar = self.multi.add(ProgressBar::new(length.unwrap_or(0)));
        bar.set_style(style);
        bar.set_message(message);

        let mut slot = self.episode_bar.lock().unwrap();
        if let Some(old) = slot.take() {
            old.finish_and_clear();
        }
        *slot = Some(bar);
    }

    fn finish_episode_bar(&self) {
        if let Some(bar) = self.episode_bar.lock().unwrap().take() {
            bar.finish_and_clear();
        }
    }
}

impl ProgressReporter for IndicatifReporter {
    fn report(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::FetchingFeed { url } => {
                self.main_bar
                    .set_message(format!("{SEARCH}Fetching feed: {}", url.cyan()));
            }

            ProgressEvent::CatalogLoaded {
                source_name,
                feed_title,
                total_episodes,
                selected,
                dropped_entries,
            } => {
                let mut message = format!(
                    "{HEADPHONES}{} ({}) • {} episodes, {} selected",
                    feed_title.bold().green(),
                    source_name,
                    total_episodes.to_string().cyan(),
                    selected.to_string().yellow()
                );
                if dropped_entries > 0 {
                    message.push_str(&format!(", {dropped_entries} without media"));
                }
                self.main_bar.set_message(message);
            }

            ProgressEvent::EpisodeStarting {
                episode_title,
                episode_index,
                total_selected,
                declared_size,
                redownload,
            } => {
                let marker = if redownload { " (redownload)" } else { "" };
                self.start_episode_bar(
                    declared_size,
                    format!(
                        "[{}/{}] {}{}",
                        (episode_index + 1).to_string().cyan(),
                        total_selected.to_string().cyan(),
                        truncate_title(&episode_title, 40),
                        marker.yellow()
                    ),
                );
            }

            ProgressEvent::TransferProgress {
                bytes_transferred,
                total_bytes,
                ..
            } => {
                if let Some(bar) = self.episode_bar.lock().unwrap().as_ref() {
                    if let Some(total) = total_bytes {
                        bar.set_length(total);
                    }
                    bar.set_position(bytes_transferred);
                }
            }

            ProgressEvent::RetryScheduled {
                episode_title,
                attempt,
                max_retries,
                delay,
                error,
            } => {
                self.main_bar.println(format!(
                    "{RETRY}{} attempt {}/{} failed ({}), retrying in {}s",
                    truncate_title(&episode_title, 30).yellow(),
                    attempt,
                    max_retries,
                    error.dimmed(),
                    delay.as_secs()
                ));
            }

            ProgressEvent::EpisodeSkipped { episode_title } => {
                self.main_bar.set_message(format!(
                    "{SKIP}{} already complete",
                    truncate_title(&episode_title, 40)
                ));
            }

            ProgressEvent::EpisodeCompleted {
                episode_title,
                bytes_transferred,
                elapsed,
                ..
            } => {
                self.finish_episode_bar();
                self.bytes_total
                    .fetch_add(bytes_transferred, Ordering::Relaxed);
                let speed = bytes_transferred as f64 / elapsed.as_secs_f64().max(0.001);
                self.main_bar.println(format!(
                    "{SUCCESS}{} ({}, {})",
                    truncate_title(&episode_title, 40).green(),
                    format_bytes(bytes_transferred),
                    format_speed(speed)
                ));
            }

            ProgressEvent::EpisodeFailed {
                episode_title,
                error,
            } => {
                self.finish_episode_bar();
                self.main_bar.println(format!(
                    "{FAILURE}{} - {}",
                    truncate_title(&episode_title, 30).red(),
                    error.red()
                ));
            }

            ProgressEvent::SourceFailed { source_name, error } => {
                self.main_bar
                    .println(format!("{FAILURE}{} - {}", source_name.red(), error.red()));
            }

            ProgressEvent::SessionCompleted {
                downloaded,
                redownloaded,
                skipped,
                failed,
            } => {
                self.finish_episode_bar();
                self.main_bar.finish_and_clear();
                println!(
                    "\n{PARTY}{} {} downloaded, {} redownloaded, {} skipped, {} failed ({})",
                    "Sync complete:".bold().green(),
                    downloaded.to_string().green().bold(),
                    redownloaded.to_string().green(),
                    skipped.to_string().yellow(),
                    if failed > 0 {
                        failed.to_string().red().bold()
                    } else {
                        failed.to_string().green()
                    },
                    format_bytes(self.bytes_total.load(Ordering::Relaxed))
                );
            }
        }
    }
}

fn truncate_title(title: &str, max_len: usize) -> String {
    if title.chars().count() <= max_len {
        title.to_string()
    } else {
        let prefix: String = title.chars().take(max_len.saturating_sub(3)).collect();
        format!("{prefix}...")
    }
}

fn load_sources(path: &PathBuf) -> Result<Vec<PodcastSource>> {
    let data = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read sources file {}", path.display()))?;
    let sources: Vec<PodcastSource> = serde_json::from_str(&data)
        .with_context(|| format!("Failed to parse sources file {}", path.display()))?;
    Ok(sources)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let transfer = TransferPolicy {
        max_retries: cli.max_retries,
        initial_backoff: Duration::from_secs(cli.backoff_secs),
    };
    let tolerance = cli.tolerance_mb * 1024 * 1024;

    let (sources, options) = match cli.command {
        Command::Download {
            feed_url,
            output_dir,
            limit,
            search,
            oldest_first,
        } => {
            let source = PodcastSource {
                name: feed_url.clone(),
                feed_url,
                output_dir,
            };
            let options = SyncOptions {
                oldest_first,
                max_episodes: limit,
                search_term: search,
                tolerance,
                transfer,
            };
            (vec![source], options)
        }

        Command::Update {
            sources_file,
            oldest_first,
        } => {
            let sources = load_sources(&sources_file)?;
            let options = SyncOptions {
                oldest_first,
                max_episodes: None,
                search_term: None,
                tolerance,
                transfer,
            };
            (sources, options)
        }
    };

    if !cli.quiet {
        println!(
            "\n{}{} {}\n",
            MICROPHONE,
            "podsync".bold().magenta(),
            "- Podcast Synchronizer".dimmed()
        );
    }

    let client = ReqwestClient::new();

    let reporter: SharedProgressReporter = if cli.quiet {
        NoopReporter::shared()
    } else {
        std::sync::Arc::new(IndicatifReporter::new())
    };

    // Ctrl-C requests a cooperative stop; the session finishes the current
    // chunk and shuts down cleanly
    let cancel = CancelToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        });
    }

    let session = sync_sources(&client, &sources, &options, &reporter, &cancel).await;

    if !cli.quiet {
        if session.cancelled {
            println!("{STOP}{}", "Sync cancelled by user.".yellow());
        }

        let source_failures = session.source_failures();
        if !source_failures.is_empty() {
            println!("\n{}", "Failed sources:".red().bold());
            for (name, error) in source_failures {
                println!("  {}{} - {}", CROSS, name.yellow(), error.dimmed());
            }
        }

        let failed_episodes = session.failed_episodes();
        if !failed_episodes.is_empty() {
            println!("\n{}", "Failed episodes:".red().bold());
            for (title, error) in failed_episodes {
                println!("  {}{} - {}", CROSS, title.yellow(), error.dimmed());
            }
        }
    }

    if session.failed() > 0 && session.downloaded() + session.redownloaded() == 0 {
        std::process::exit(1);
    }

    Ok(())
}
