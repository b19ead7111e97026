//! The normalized entry the pipeline works on.
//!
//! Every [`RawItem`] is turned into an [`Entry`] by [`Entry::from_raw`], using
//! the owning feed's [`FeedKind`] to interpret dates and links.  `Entry` is
//! also the record persisted in the dedup cache, so its serialized field
//! names are part of the cache file format and must not change.

use std::fmt;

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::feed::FeedKind;
use crate::source::RawItem;

/// Separator used by trackers inside the `category` extension attribute.
const ATTR_CATEGORY_SEPARATOR: &str = ", ";

/// A single feed entry, normalized from a [`RawItem`].
///
/// Identity for de-duplication is [`title`](Entry::title), compared exactly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Entry {
    /// Configured name of the feed this came from.
    pub feed_name: String,

    /// Headline; doubles as the dedup identity.
    pub title: String,

    pub published: DateTime<Utc>,

    #[serde(default)]
    pub categories: Vec<String>,

    #[serde(default)]
    pub description: String,

    /// Link to the details page, after any feed-kind rewrite.
    #[serde(default)]
    pub url: String,

    /// URL of the downloadable payload, empty when the item had none.
    #[serde(default, rename = "TorrentUrl")]
    pub payload_url: String,

    /// Payload size in bytes; 0 when unknown.
    #[serde(default, rename = "TorrentBytes")]
    pub payload_bytes: u64,

    /// Payload size as the tracker displays it (e.g. "1.37 GB").
    #[serde(default, rename = "TorrentSize")]
    pub payload_size_label: String,

    #[serde(default, rename = "TorrentCategories")]
    pub payload_categories: Vec<String>,

    /// Download instead of notify.  Decided per run from feed and rule
    /// configuration, never persisted.
    #[serde(skip)]
    pub auto_download: bool,
}

impl Entry {
    /// Normalize a raw item fetched for `feed_name`.
    ///
    /// # Errors
    ///
    /// Fails when the published date does not parse with the feed kind's
    /// format or the payload enclosure length is not a byte count.  Either
    /// aborts the whole feed for this run.
    pub fn from_raw(feed_name: &str, kind: &FeedKind, raw: &RawItem) -> Result<Self> {
        let published = kind.parse_publish_date(raw.published.as_deref())?;

        let (payload_url, payload_bytes) = match raw.payload_enclosure() {
            Some(enclosure) => {
                let length = enclosure.length.trim();
                let bytes = if length.is_empty() {
                    0
                } else {
                    length
                        .parse::<u64>()
                        .map_err(|_| Error::PayloadSize(enclosure.length.clone()))?
                };
                (enclosure.url.clone(), bytes)
            }
            None => (String::new(), 0),
        };

        let payload_categories = raw
            .attribute("category")
            .map(|v| {
                v.split(ATTR_CATEGORY_SEPARATOR)
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            feed_name: feed_name.to_string(),
            title: raw.title.clone(),
            published,
            categories: raw.categories.clone(),
            description: raw.description.clone().unwrap_or_default(),
            url: kind.rewrite_url(&raw.link),
            payload_url,
            payload_bytes,
            payload_size_label: raw.attribute("size").unwrap_or_default().to_string(),
            payload_categories,
            auto_download: false,
        })
    }

    /// All categories the entry is tagged with, feed-level first.
    pub fn all_categories(&self) -> impl Iterator<Item = &str> {
        self.categories
            .iter()
            .chain(self.payload_categories.iter())
            .map(String::as_str)
    }
}

impl fmt::Display for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Title: {}", self.title)?;
        writeln!(
            f,
            "\tPublished: {}",
            self.published.with_timezone(&Local).format("%Y-%m-%d %H:%M %Z")
        )?;
        writeln!(f, "\tCategories: {}", self.categories.join(", "))?;
        writeln!(f, "\tUrl: {}", self.url)?;
        writeln!(f, "\tTorrent: {} [{}]", self.payload_url, self.payload_bytes)?;
        writeln!(
            f,
            "\tTorrent Categories: {}",
            self.payload_categories.join(", ")
        )?;
        writeln!(f, "\tTorrent Size: {}", self.payload_size_label)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::feed::RssParams;
    use crate::source::Enclosure;
    use chrono::TimeZone;

    /// Shorthand constructor for tests across the crate.
    pub fn make_entry(title: &str, categories: &[&str]) -> Entry {
        Entry {
            feed_name: "test".to_string(),
            title: title.to_string(),
            published: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            categories: categories.iter().map(|c| c.to_string()).collect(),
            description: String::new(),
            url: String::new(),
            payload_url: format!("https://example.com/{title}.torrent"),
            payload_bytes: 0,
            payload_size_label: String::new(),
            payload_categories: Vec::new(),
            auto_download: false,
        }
    }

    fn rss_kind() -> FeedKind {
        FeedKind::Rss(RssParams {
            url: "https://example.com/feed.xml".into(),
        })
    }

    fn raw_item() -> RawItem {
        RawItem {
            title: "Show.S01E01".into(),
            link: "https://example.com/show".into(),
            published: Some("Mon, 01 Jan 2024 00:00:00 +0000".into()),
            categories: vec!["x264".into()],
            description: Some("pilot".into()),
            enclosures: vec![Enclosure {
                mime_type: "application/x-bittorrent".into(),
                url: "https://example.com/1.torrent".into(),
                length: "2048".into(),
            }],
            attributes: vec![
                ("size".into(), "2 KB".into()),
                ("category".into(), "TV, HD".into()),
            ],
        }
    }

    #[test]
    fn from_raw_normalizes_all_fields() {
        let entry = Entry::from_raw("Shows", &rss_kind(), &raw_item()).unwrap();

        assert_eq!(entry.feed_name, "Shows");
        assert_eq!(entry.title, "Show.S01E01");
        assert_eq!(entry.published, Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        assert_eq!(entry.description, "pilot");
        assert_eq!(entry.payload_url, "https://example.com/1.torrent");
        assert_eq!(entry.payload_bytes, 2048);
        assert_eq!(entry.payload_size_label, "2 KB");
        assert_eq!(entry.payload_categories, vec!["TV", "HD"]);
        assert!(!entry.auto_download);
    }

    #[test]
    fn from_raw_rejects_bad_payload_length() {
        let mut raw = raw_item();
        raw.enclosures[0].length = "lots".into();

        let err = Entry::from_raw("Shows", &rss_kind(), &raw).unwrap_err();
        assert!(matches!(err, Error::PayloadSize(ref s) if s == "lots"));
    }

    #[test]
    fn from_raw_rejects_bad_date() {
        let mut raw = raw_item();
        raw.published = Some("yesterday".into());

        let err = Entry::from_raw("Shows", &rss_kind(), &raw).unwrap_err();
        assert!(matches!(err, Error::PublishDate { .. }));
    }

    #[test]
    fn from_raw_without_payload_has_zero_bytes() {
        let mut raw = raw_item();
        raw.enclosures.clear();

        let entry = Entry::from_raw("Shows", &rss_kind(), &raw).unwrap();
        assert!(entry.payload_url.is_empty());
        assert_eq!(entry.payload_bytes, 0);
    }

    #[test]
    fn serializes_with_cache_field_names() {
        let entry = make_entry("Foo", &["x264"]);
        let json = serde_json::to_value(&entry).unwrap();

        for key in [
            "FeedName",
            "Title",
            "Published",
            "Categories",
            "Description",
            "Url",
            "TorrentUrl",
            "TorrentBytes",
            "TorrentSize",
            "TorrentCategories",
        ] {
            assert!(json.get(key).is_some(), "missing {key}");
        }
        assert!(json.get("AutoDownload").is_none());
    }

    #[test]
    fn display_lists_payload_details() {
        let mut entry = make_entry("Foo", &["x264"]);
        entry.payload_bytes = 42;
        let text = entry.to_string();
        assert!(text.starts_with("Title: Foo\n"));
        assert!(text.contains("\tTorrent: https://example.com/Foo.torrent [42]"));
    }
}
