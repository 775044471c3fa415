// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::error::FeedError;
use crate::http::HttpClient;

use super::parse::{Catalog, parse_catalog};

/// Fetch and parse a podcast feed from a URL.
///
/// Always re-fetches; the caller decides how often a feed is refreshed.
pub async fn fetch_catalog<C: HttpClient>(client: &C, url: &str) -> Result<Catalog, FeedError> {
    let bytes = client
        .get_bytes(url)
        .await
        .map_err(|e| FeedError::FetchFailed {
            url: url.to_string(),
            source: e,
        })?;
    parse_catalog(&bytes)
}
