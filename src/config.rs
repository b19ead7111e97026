//! YAML configuration.
//!
//! Keys are PascalCase.  `Feeds` and each feed's `Filters` are YAML maps
//! whose declaration order is significant (unordered feeds run in that
//! order, filters are tried in that order), so both are read into ordered
//! vectors rather than hash maps.
//!
//! Feed bodies are kept as raw YAML until [`FeedDecl::resolve`] is called, so
//! a single broken feed is reported when it is processed instead of failing
//! the whole file.

use std::fmt;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use serde::de::{self, DeserializeOwned, MapAccess, Visitor};
use serde::{Deserialize, Deserializer};
use serde_yaml::Value;
use tracing::debug;

use crate::error::{Error, Result};
use crate::feed::{Feed, FeedKind};
use crate::filter::{FilterRule, FilterSet};

pub const DEFAULT_CACHE_FILE: &str = "rss-dispatch.json";
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

/// Top-level configuration file.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Config {
    #[serde(default = "default_cache_file")]
    pub cache_file: PathBuf,

    /// Directory downloaded payloads are written to.
    pub download_dir: Option<PathBuf>,

    /// Volume to check free space on; falls back to `DownloadDir`.
    pub disk_path: Option<PathBuf>,

    /// Space to keep free on top of every payload, e.g. `2GB`.
    #[serde(default)]
    pub disk_buffer: String,

    #[serde(default = "default_http_timeout")]
    pub http_timeout_secs: u64,

    pub pushover: Option<PushoverConfig>,

    #[serde(default, deserialize_with = "feed_decls")]
    pub feeds: Vec<FeedDecl>,
}

/// Pushover credentials and routing.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PushoverConfig {
    pub app_token: String,
    #[serde(default)]
    pub users: Vec<String>,
    /// Restrict delivery to these device names; empty means all devices.
    #[serde(default)]
    pub devices: Vec<String>,
}

fn default_cache_file() -> PathBuf {
    PathBuf::from(DEFAULT_CACHE_FILE)
}

fn default_http_timeout() -> u64 {
    DEFAULT_HTTP_TIMEOUT_SECS
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Unable to open {}: {e}", path.display())))?;
        Self::from_yaml(&text)
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(text)?;
        debug!(feeds = config.feeds.len(), "configuration loaded");
        Ok(config)
    }

    /// Path whose volume gates downloads.
    pub fn disk_path(&self) -> Option<&Path> {
        self.disk_path.as_deref().or(self.download_dir.as_deref())
    }

    pub fn feed(&self, name: &str) -> Option<&FeedDecl> {
        self.feeds.iter().find(|f| f.name == name)
    }

    /// Feeds in processing order: ascending `Order`, then feeds without an
    /// `Order` in declaration order.  Ties keep declaration order.
    pub fn ordered_feeds(&self) -> Vec<&FeedDecl> {
        let mut feeds: Vec<&FeedDecl> = self.feeds.iter().collect();
        feeds.sort_by_key(|f| (f.order.is_none(), f.order));
        feeds
    }
}

// ---------------------------------------------------------------------------
// Feed declarations
// ---------------------------------------------------------------------------

/// A feed as declared in the file, not yet resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedDecl {
    pub name: String,
    pub order: Option<i64>,
    pub body: Value,
}

/// Feed keys shared by all feed kinds.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct FeedSettings {
    #[serde(default)]
    auto_download: bool,
    #[serde(default, deserialize_with = "ordered_map")]
    filters: Vec<(String, FilterBody)>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct FilterBody {
    #[serde(default, deserialize_with = "string_list")]
    categories: Vec<String>,
    #[serde(default, deserialize_with = "string_list")]
    search: Vec<String>,
    auto_download: Option<bool>,
}

impl FeedDecl {
    pub fn new(name: impl Into<String>, body: Value) -> Self {
        let order = body.get("Order").and_then(Value::as_i64);
        Self {
            name: name.into(),
            order,
            body,
        }
    }

    /// Build a [`Feed`]: pick the kind, read its parameters and compile its
    /// filters.
    ///
    /// # Errors
    ///
    /// Missing or unknown `FeedType`, missing required parameters, or keys of
    /// the wrong type.  These concern this feed only.
    pub fn resolve(&self) -> Result<Feed> {
        let feed_type = self
            .body
            .get("FeedType")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::MissingField {
                feed: self.name.clone(),
                field: "FeedType",
            })?;
        if !FeedKind::TYPES.contains(&feed_type) {
            return Err(Error::UnknownFeedType(feed_type.to_string()));
        }

        let kind: FeedKind = serde_yaml::from_value(self.body.clone())
            .map_err(|e| Error::Config(format!("feed {}: {e}", self.name)))?;
        kind.validate(&self.name)?;

        let settings: FeedSettings = serde_yaml::from_value(self.body.clone())
            .map_err(|e| Error::Config(format!("feed {}: {e}", self.name)))?;

        let rules: Vec<FilterRule> = settings
            .filters
            .into_iter()
            .map(|(name, body)| FilterRule {
                name,
                categories: body.categories,
                search: body.search,
                auto_download: body.auto_download,
            })
            .collect();

        Ok(Feed {
            name: self.name.clone(),
            auto_download: settings.auto_download,
            kind,
            filters: FilterSet::compile(&rules),
        })
    }
}

fn feed_decls<'de, D>(deserializer: D) -> std::result::Result<Vec<FeedDecl>, D::Error>
where
    D: Deserializer<'de>,
{
    let pairs: Vec<(String, Value)> = ordered_map(deserializer)?;
    Ok(pairs
        .into_iter()
        .map(|(name, body)| FeedDecl::new(name, body))
        .collect())
}

/// A list of YAML scalars read as strings, so `[formula, 1]` and `[7]` work
/// like their quoted forms.  A null is an empty list.
pub(crate) fn string_list<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let values = Option::<Vec<Value>>::deserialize(deserializer)?.unwrap_or_default();
    values
        .into_iter()
        .map(|value| match value {
            Value::String(s) => Ok(s),
            Value::Number(n) => Ok(n.to_string()),
            Value::Bool(b) => Ok(b.to_string()),
            other => Err(de::Error::custom(format!(
                "expected a string or number, found {other:?}"
            ))),
        })
        .collect()
}

/// Deserialize a map into `(key, value)` pairs, keeping document order.
fn ordered_map<'de, D, T>(deserializer: D) -> std::result::Result<Vec<(String, T)>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    struct OrderedMap<T>(PhantomData<T>);

    impl<'de, T: DeserializeOwned> Visitor<'de> for OrderedMap<T> {
        type Value = Vec<(String, T)>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a map")
        }

        fn visit_unit<E>(self) -> std::result::Result<Self::Value, E> {
            Ok(Vec::new())
        }

        fn visit_map<A>(self, mut map: A) -> std::result::Result<Self::Value, A::Error>
        where
            A: MapAccess<'de>,
        {
            let mut pairs = Vec::with_capacity(map.size_hint().unwrap_or(0));
            while let Some((key, value)) = map.next_entry::<String, T>()? {
                pairs.push((key, value));
            }
            Ok(pairs)
        }
    }

    deserializer.deserialize_map(OrderedMap(PhantomData))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
