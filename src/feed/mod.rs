mod fetch;
mod parse;

pub use fetch::fetch_catalog;
pub use parse::{Catalog, Episode, parse_catalog};
