//! Feed retrieval layer.
//!
//! This module defines the [`FeedFetcher`] trait and the [`RawItem`] type the
//! dispatcher consumes.  Concrete fetchers live in sub-modules (currently only
//! [`rss`]).
//!
//! ## For contributors: adding a new fetcher
//!
//! 1. Create a new file in this directory (e.g. `atom.rs`).
//! 2. Define a struct and implement [`FeedFetcher`] for it, converting the
//!    native items into [`RawItem`] values.
//! 3. Add `mod atom;` below and re-export your struct in the `pub use` block.
//! 4. Construct it in `main.rs` in place of (or next to) `RssFetcher`.
//!
//! Normalization into [`crate::entry::Entry`] happens in the dispatcher, so a
//! fetcher never needs to know about feed kinds, filters or the cache.

mod raw_item;
mod rss;

pub use raw_item::{Enclosure, RawItem};
pub use rss::RssFetcher;

use anyhow::Result;

/// Trait that every feed fetcher must implement.
///
/// The dispatcher calls [`fetch()`](FeedFetcher::fetch) once per feed per run
/// with the URL produced by the feed kind.  The call blocks; any timeout is
/// the fetcher's own business.
pub trait FeedFetcher {
    /// Fetch and parse the feed at `url`.
    ///
    /// Items are returned in the feed's natural order.  Errors abort only the
    /// feed being processed.
    fn fetch(&self, url: &str) -> Result<Vec<RawItem>>;
}
