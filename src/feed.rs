//! Feed kinds and resolved feeds.
//!
//! The set of supported feed types is closed: [`FeedKind`] is an enum with
//! one variant per type, each carrying its own parameter struct.  A fresh
//! value is deserialized for every feed on every run, so nothing is shared
//! or reset between feeds.
//!
//! ## For contributors: adding a feed type
//!
//! 1. Add a parameter struct deriving `Deserialize` with PascalCase keys.
//! 2. Add a variant to [`FeedKind`] with `#[serde(rename = "<FeedType>")]`
//!    and list the name in [`FeedKind::TYPES`].
//! 3. Fill in the match arms of `generate_url`, `publish_format`,
//!    `parse_publish_date`, `rewrite_url` and `download_filename`.

use chrono::{DateTime, NaiveDateTime, Utc};
use reqwest::Url;
use serde::Deserialize;

use crate::entry::Entry;
use crate::error::{Error, Result};
use crate::filter::{CompiledRule, FilterSet};
use crate::source::RawItem;

/// Published-date layout used by RFM trackers (UTC, no zone suffix).
const RFM_PUBLISH_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Layout label reported for plain RSS feeds.
const RSS_PUBLISH_FORMAT: &str = "RFC 2822";

const RFM_DETAILS_PREFIX: &str = "https://racingfor.me/details/";
const RFM_MOBILE_DETAILS_PREFIX: &str = "https://www.racingfor.me//details/";

const PAYLOAD_EXTENSION: &str = ".torrent";

// ---------------------------------------------------------------------------
// Feed kinds
// ---------------------------------------------------------------------------

/// Every feed type this build understands, tagged by the `FeedType` key.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "FeedType")]
pub enum FeedKind {
    #[serde(rename = "RFM")]
    Rfm(RfmParams),
    #[serde(rename = "RSS")]
    Rss(RssParams),
}

/// Search parameters of an RFM tracker feed.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct RfmParams {
    pub base_url: String,
    #[serde(deserialize_with = "crate::config::string_list")]
    pub terms: Vec<String>,
    pub category: i64,
    pub results: i64,
    pub uploader: String,
    pub search_description: bool,
    pub start_date: String,
    pub end_date: String,
}

/// Logical RFM search fields, each bound to its query-string key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RfmField {
    Terms,
    Category,
    Results,
    Uploader,
    SearchDescription,
    StartDate,
    EndDate,
}

impl RfmField {
    pub const fn param(self) -> &'static str {
        match self {
            Self::Terms => "s",
            Self::Category => "c",
            Self::Results => "l",
            Self::Uploader => "p",
            Self::SearchDescription => "d",
            Self::StartDate => "sd",
            Self::EndDate => "ed",
        }
    }
}

/// A plain RSS feed at a fixed URL.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct RssParams {
    pub url: String,
}

impl FeedKind {
    /// Values accepted for `FeedType`.
    pub const TYPES: &'static [&'static str] = &["RFM", "RSS"];

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Rfm(_) => "RFM",
            Self::Rss(_) => "RSS",
        }
    }

    /// Check required parameters for the feed called `feed`.
    pub fn validate(&self, feed: &str) -> Result<()> {
        let (value, field) = match self {
            Self::Rfm(p) => (&p.base_url, "BaseUrl"),
            Self::Rss(p) => (&p.url, "Url"),
        };
        if value.trim().is_empty() {
            return Err(Error::MissingField {
                feed: feed.to_string(),
                field,
            });
        }
        Ok(())
    }

    /// URL to hand to the fetcher.
    pub fn generate_url(&self) -> Result<String> {
        match self {
            Self::Rfm(p) => p.generate_url(),
            Self::Rss(p) => Url::parse(&p.url)
                .map(String::from)
                .map_err(|e| Error::InvalidUrl {
                    url: p.url.clone(),
                    reason: e.to_string(),
                }),
        }
    }

    pub fn publish_format(&self) -> &'static str {
        match self {
            Self::Rfm(_) => RFM_PUBLISH_FORMAT,
            Self::Rss(_) => RSS_PUBLISH_FORMAT,
        }
    }

    /// Parse an item's published date.  A missing date is a parse failure.
    pub fn parse_publish_date(&self, value: Option<&str>) -> Result<DateTime<Utc>> {
        let value = value.map(str::trim).unwrap_or_default();
        let parsed = match self {
            Self::Rfm(_) => NaiveDateTime::parse_from_str(value, RFM_PUBLISH_FORMAT)
                .ok()
                .map(|naive| naive.and_utc()),
            Self::Rss(_) => DateTime::parse_from_rfc2822(value)
                .or_else(|_| DateTime::parse_from_rfc3339(value))
                .ok()
                .map(|dt| dt.with_timezone(&Utc)),
        };
        parsed.ok_or_else(|| Error::PublishDate {
            value: value.to_string(),
            format: self.publish_format(),
        })
    }

    /// Rewrite an item link into the form operators should click.
    ///
    /// RFM detail pages only render on mobile under the `www` host with the
    /// slug removed.
    pub fn rewrite_url(&self, url: &str) -> String {
        match self {
            Self::Rfm(_) => url
                .strip_prefix(RFM_DETAILS_PREFIX)
                .and_then(|rest| rest.split_once('/'))
                .filter(|(id, _)| !id.is_empty() && id.bytes().all(|b| b.is_ascii_digit()))
                .map(|(id, _)| format!("{RFM_MOBILE_DETAILS_PREFIX}{id}"))
                .unwrap_or_else(|| url.to_string()),
            Self::Rss(_) => url.to_string(),
        }
    }

    /// File name the payload of `entry` is stored under.
    pub fn download_filename(&self, entry: &Entry) -> String {
        match self {
            Self::Rfm(_) => title_filename(&entry.title),
            Self::Rss(_) => Url::parse(&entry.payload_url)
                .ok()
                .and_then(|u| {
                    u.path_segments()
                        .and_then(|mut s| s.next_back())
                        .filter(|seg| seg.ends_with(PAYLOAD_EXTENSION) && seg.len() > PAYLOAD_EXTENSION.len())
                        .map(sanitize)
                })
                .unwrap_or_else(|| title_filename(&entry.title)),
        }
    }
}

impl RfmParams {
    fn generate_url(&self) -> Result<String> {
        let mut url = Url::parse(&self.base_url).map_err(|e| Error::InvalidUrl {
            url: self.base_url.clone(),
            reason: e.to_string(),
        })?;
        {
            let mut query = url.query_pairs_mut();
            if !self.terms.is_empty() {
                query.append_pair(RfmField::Terms.param(), &self.terms.join(" "));
            }
            query.append_pair(RfmField::Category.param(), &self.category.to_string());
            query.append_pair(RfmField::Results.param(), &self.results.to_string());
            if !self.uploader.is_empty() {
                query.append_pair(RfmField::Uploader.param(), &self.uploader);
            }
            if !self.start_date.is_empty() {
                query.append_pair(RfmField::StartDate.param(), &self.start_date);
            }
            if !self.end_date.is_empty() {
                query.append_pair(RfmField::EndDate.param(), &self.end_date);
            }
            if self.search_description {
                query.append_pair(RfmField::SearchDescription.param(), "1");
            }
        }
        Ok(url.into())
    }
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '.' | '-' | '_' | ' ') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn title_filename(title: &str) -> String {
    format!("{}{PAYLOAD_EXTENSION}", sanitize(title.trim()))
}

// ---------------------------------------------------------------------------
// Resolved feeds
// ---------------------------------------------------------------------------

/// A feed ready to process: kind resolved, filters compiled.
#[derive(Debug, Clone)]
pub struct Feed {
    pub name: String,
    /// Download every match instead of notifying, unless a rule says otherwise.
    pub auto_download: bool,
    pub kind: FeedKind,
    pub filters: FilterSet,
}

impl Feed {
    pub fn generate_url(&self) -> Result<String> {
        self.kind.generate_url()
    }

    pub fn normalize(&self, raw: &RawItem) -> Result<Entry> {
        Entry::from_raw(&self.name, &self.kind, raw)
    }

    /// First filter rule matching `entry`.
    pub fn match_entry(&self, entry: &Entry) -> Option<&CompiledRule> {
        self.filters.matches(entry)
    }

    /// Whether a match through `rule` should be downloaded.
    pub fn wants_download(&self, rule: &CompiledRule) -> bool {
        rule.auto_download.unwrap_or(self.auto_download)
    }

    /// True when any match of this feed may end up as a download.
    pub fn may_download(&self) -> bool {
        self.filters
            .rules()
            .iter()
            .any(|r| self.wants_download(r))
    }

    pub fn download_filename(&self, entry: &Entry) -> String {
        self.kind.download_filename(entry)
    }

    /// Copy of this feed matching only through the named rules.
    pub fn with_filters(&self, names: &[String]) -> Result<Feed> {
        Ok(Feed {
            filters: self.filters.select(names)?,
            ..self.clone()
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::tests::make_entry;
    use chrono::TimeZone;
    use std::collections::HashMap;

    fn rfm() -> RfmParams {
        RfmParams {
            base_url: "https://racingfor.me/rss.php".into(),
            terms: vec!["formula".into(), "1".into()],
            category: 7,
            results: 50,
            ..Default::default()
        }
    }

    fn query(url: &str) -> HashMap<String, String> {
        Url::parse(url).unwrap().query_pairs().into_owned().collect()
    }

    #[test]
    fn rfm_url_uses_param_mapping() {
        let mut params = rfm();
        params.uploader = "someone".into();
        params.search_description = true;
        params.start_date = "2024-01-01".into();

        let url = FeedKind::Rfm(params).generate_url().unwrap();
        assert!(url.starts_with("https://racingfor.me/rss.php?"));

        let q = query(&url);
        assert_eq!(q["s"], "formula 1");
        assert_eq!(q["c"], "7");
        assert_eq!(q["l"], "50");
        assert_eq!(q["p"], "someone");
        assert_eq!(q["d"], "1");
        assert_eq!(q["sd"], "2024-01-01");
        assert!(!q.contains_key("ed"));
    }

    #[test]
    fn rfm_url_omits_empty_optionals() {
        let mut params = rfm();
        params.terms.clear();
        let q = query(&FeedKind::Rfm(params).generate_url().unwrap());
        assert_eq!(q.len(), 2);
        assert!(!q.contains_key("s"));
    }

    #[test]
    fn bad_base_url_is_an_error() {
        let mut params = rfm();
        params.base_url = "not a url".into();
        assert!(matches!(
            FeedKind::Rfm(params).generate_url(),
            Err(Error::InvalidUrl { .. })
        ));
    }

    #[test]
    fn validate_requires_location() {
        let kind = FeedKind::Rss(RssParams::default());
        assert!(matches!(
            kind.validate("News"),
            Err(Error::MissingField { field: "Url", .. })
        ));
        assert!(FeedKind::Rfm(rfm()).validate("Racing").is_ok());
    }

    #[test]
    fn rfm_publish_date_is_naive_utc() {
        let kind = FeedKind::Rfm(rfm());
        let parsed = kind.parse_publish_date(Some("2021-05-01 10:30:00")).unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2021, 5, 1, 10, 30, 0).unwrap());

        assert!(kind.parse_publish_date(Some("Sat, 01 May 2021 10:30:00 +0000")).is_err());
        assert!(kind.parse_publish_date(None).is_err());
    }

    #[test]
    fn rss_publish_date_accepts_rfc2822_and_rfc3339() {
        let kind = FeedKind::Rss(RssParams {
            url: "https://example.com/feed".into(),
        });
        let expected = Utc.with_ymd_and_hms(2021, 5, 1, 10, 30, 0).unwrap();
        assert_eq!(
            kind.parse_publish_date(Some("Sat, 01 May 2021 12:30:00 +0200")).unwrap(),
            expected
        );
        assert_eq!(
            kind.parse_publish_date(Some("2021-05-01T10:30:00Z")).unwrap(),
            expected
        );
        assert!(kind.parse_publish_date(Some("2021-05-01 10:30:00")).is_err());
    }

    #[test]
    fn rfm_rewrites_detail_links() {
        let kind = FeedKind::Rfm(rfm());
        assert_eq!(
            kind.rewrite_url("https://racingfor.me/details/12345/Some-Race"),
            "https://www.racingfor.me//details/12345"
        );
        assert_eq!(
            kind.rewrite_url("https://racingfor.me/browse"),
            "https://racingfor.me/browse"
        );
        assert_eq!(
            kind.rewrite_url("https://racingfor.me/details/abc/x"),
            "https://racingfor.me/details/abc/x"
        );
    }

    #[test]
    fn download_filename_per_kind() {
        let mut entry = make_entry("F1: Race/Highlights", &[]);
        entry.payload_url = "https://example.com/get/race.torrent?key=1".into();

        assert_eq!(
            FeedKind::Rfm(rfm()).download_filename(&entry),
            "F1_ Race_Highlights.torrent"
        );
        let rss = FeedKind::Rss(RssParams {
            url: "https://example.com/feed".into(),
        });
        assert_eq!(rss.download_filename(&entry), "race.torrent");

        entry.payload_url = "https://example.com/download?id=7".into();
        assert_eq!(rss.download_filename(&entry), "F1_ Race_Highlights.torrent");
    }

    #[test]
    fn feed_kind_deserializes_by_tag() {
        let kind: FeedKind = serde_yaml::from_str(
            "FeedType: RFM\nBaseUrl: https://racingfor.me/rss.php\nCategory: 7\nOrder: 3\n",
        )
        .unwrap();
        match kind {
            FeedKind::Rfm(p) => {
                assert_eq!(p.category, 7);
                assert_eq!(p.results, 0);
            }
            other => panic!("unexpected kind {other:?}"),
        }
    }
}
