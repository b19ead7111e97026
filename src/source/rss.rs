//! RSS feed fetcher.
//!
//! Fetches an RSS 2.0 document over HTTP with a blocking [`reqwest`] client
//! and flattens every `<item>` into a [`RawItem`].  Torznab-style extension
//! elements (`<torznab:attr name=".." value=".."/>`) are kept as name/value
//! attributes so feed kinds can recover the payload size and categories that
//! plain RSS has no slot for.

use std::time::Duration;

use anyhow::{Context, Result};

use super::{Enclosure, FeedFetcher, RawItem};

/// An RSS fetcher backed by a shared HTTP client.
pub struct RssFetcher {
    client: reqwest::blocking::Client,
}

impl RssFetcher {
    /// Create a fetcher whose requests give up after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("building HTTP client")?;
        Ok(Self { client })
    }

    /// Parse an already-fetched [`rss::Channel`] into [`RawItem`]s.
    ///
    /// This is a pure function (no I/O) so that tests can exercise the
    /// parsing logic without hitting the network.
    pub fn parse_channel(channel: &rss::Channel) -> Vec<RawItem> {
        channel
            .items()
            .iter()
            .map(|item| {
                let enclosures = item
                    .enclosure()
                    .map(|e| Enclosure {
                        mime_type: e.mime_type().to_string(),
                        url: e.url().to_string(),
                        length: e.length().to_string(),
                    })
                    .into_iter()
                    .collect();

                // namespace -> element -> [extension]; only name/value pairs matter.
                let attributes = item
                    .extensions()
                    .values()
                    .flat_map(|elements| elements.values())
                    .flatten()
                    .filter_map(|ext| {
                        let attrs = ext.attrs();
                        match (attrs.get("name"), attrs.get("value")) {
                            (Some(n), Some(v)) => Some((n.clone(), v.clone())),
                            _ => None,
                        }
                    })
                    .collect();

                RawItem {
                    title: item.title().unwrap_or_default().to_string(),
                    link: item.link().unwrap_or_default().to_string(),
                    published: item.pub_date().map(String::from),
                    categories: item
                        .categories()
                        .iter()
                        .map(|c| c.name().to_string())
                        .collect(),
                    description: item.description().map(String::from),
                    enclosures,
                    attributes,
                }
            })
            .collect()
    }
}

impl FeedFetcher for RssFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<RawItem>> {
        let body = self
            .client
            .get(url)
            .send()
            .and_then(|r| r.error_for_status())
            .with_context(|| format!("requesting {url}"))?
            .bytes()?;
        let channel = rss::Channel::read_from(body.as_ref())
            .with_context(|| format!("parsing RSS from {url}"))?;
        Ok(Self::parse_channel(&channel))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
