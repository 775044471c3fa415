// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use chrono::{DateTime, FixedOffset};
use url::Url;

use crate::error::FeedError;

/// A parsed feed: its episodes in feed order, plus a count of entries that
/// were dropped for lacking a usable media URL.
#[derive(Debug, Clone)]
pub struct Catalog {
    pub title: String,
    pub episodes: Vec<Episode>,
    pub dropped_entries: usize,
}

/// One downloadable media item described by a feed entry.
///
/// Immutable once parsed. `declared_size` is `None` when the feed omits the
/// enclosure length or reports it as zero or malformed; `published_at` is
/// `None` when the publish date is absent or unparseable.
#[derive(Debug, Clone)]
pub struct Episode {
    pub title: String,
    pub media_url: Url,
    pub declared_size: Option<u64>,
    pub published_at: Option<DateTime<FixedOffset>>,
}

/// Parse RSS feed XML bytes into a Catalog.
///
/// Entries without a retrievable media URL are dropped and counted, never
/// fatal; only a feed that fails to parse at all is an error.
pub fn parse_catalog(xml_bytes: &[u8]) -> Result<Catalog, FeedError> {
    let channel = rss::Channel::read_from(xml_bytes)?;

    let mut episodes = Vec::new();
    let mut dropped_entries = 0;

    for item in channel.items() {
        match parse_episode(item) {
            Some(episode) => episodes.push(episode),
            None => dropped_entries += 1,
        }
    }

    Ok(Catalog {
        title: channel.title().to_string(),
        episodes,
        dropped_entries,
    })
}

fn parse_episode(item: &rss::Item) -> Option<Episode> {
    let enclosure = item.enclosure()?;
    let media_url = Url::parse(enclosure.url()).ok()?;

    let title = item
        .title()
        .map(String::from)
        .unwrap_or_else(|| "Untitled Episode".to_string());

    let declared_size = enclosure
        .length()
        .parse::<u64>()
        .ok()
        .filter(|&len| len > 0);

    let published_at = item.pub_date().and_then(|date_str| {
        DateTime::parse_from_rfc2822(date_str)
            .or_else(|_| parse_relaxed_date(date_str))
            .ok()
    });

    Some(Episode {
        title,
        media_url,
        declared_size,
        published_at,
    })
}

/// Try to parse dates that don't strictly conform to RFC 2822
fn parse_relaxed_date(date_str: &str) -> Result<DateTime<FixedOffset>, chrono::ParseError> {
    let formats = [
        "%a, %d %b %Y %H:%M:%S %z",
        "%Y-%m-%dT%H:%M:%S%:z",
        "%Y-%m-%d %H:%M:%S %z",
    ];

    for format in formats {
        if let Ok(dt) = DateTime::parse_from_str(date_str, format) {
            return Ok(dt);
        }
    }

    Err(chrono::DateTime::parse_from_rfc2822("invalid").unwrap_err())
}
