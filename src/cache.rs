//! Persistent dedup + error-holddown cache.
//!
//! The cache is one JSON file with two sections:
//!
//! * `Entries`: every entry dispatched successfully, oldest first.  An entry
//!   whose title is listed here is never dispatched again.
//! * `Errors`: entry title → unix time until which repeat failure alerts for
//!   that entry are suppressed.
//!
//! The file is read once per run and written after each feed.  A missing file
//! yields an empty cache: that is the normal first-run state, not an error.
//! A file that does not parse is renamed to `<name>.bak` before starting
//! empty, so the next save cannot destroy it.

use std::collections::{BTreeMap, HashSet};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, error, warn};

use crate::entry::Entry;
use crate::error::Result;

/// How long a failed entry stays quiet after an alert.
pub const ERROR_HOLD_DOWN_SECS: i64 = 4 * 60 * 60;

fn hold_down() -> Duration {
    Duration::seconds(ERROR_HOLD_DOWN_SECS)
}

/// `cache.json` → `cache.json.bak`.
fn backup_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".bak");
    PathBuf::from(name)
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CacheFile {
    #[serde(default)]
    entries: Vec<Entry>,
    #[serde(default)]
    errors: BTreeMap<String, i64>,
}

/// In-memory view of the cache file.
#[derive(Debug)]
pub struct DedupCache {
    path: PathBuf,
    file: CacheFile,
    /// Titles in `file.entries`, for constant-time lookups.
    seen: HashSet<String>,
}

impl DedupCache {
    /// Load the cache at `path`, or start an empty one.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let file = match std::fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice::<CacheFile>(&bytes) {
                Ok(file) => file,
                Err(e) => {
                    let backup = backup_path(&path);
                    error!(
                        path = %path.display(),
                        backup = %backup.display(),
                        error = %e,
                        "cache file unparsable, moving it aside and starting fresh"
                    );
                    if let Err(e) = std::fs::rename(&path, &backup) {
                        error!(path = %path.display(), error = %e, "unable to back up cache file");
                    }
                    CacheFile::default()
                }
            },
            Err(e) => {
                warn!(path = %path.display(), error = %e, "creating new cache file");
                CacheFile::default()
            }
        };

        let seen = file.entries.iter().map(|e| e.title.clone()).collect();
        debug!(
            entries = file.entries.len(),
            errors = file.errors.len(),
            "cache loaded"
        );
        Self { path, file, seen }
    }

    /// Write the whole cache atomically: a temp file in the same directory is
    /// renamed over the old one.
    pub fn save(&self) -> Result<()> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let mut tmp = NamedTempFile::new_in(dir)?;
        serde_json::to_writer_pretty(&mut tmp, &self.file)?;
        tmp.write_all(b"\n")?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| e.error)?;
        debug!(path = %self.path.display(), "cache saved");
        Ok(())
    }

    /// True if an entry titled `identity` was already dispatched.
    pub fn contains(&self, identity: &str) -> bool {
        self.seen.contains(identity)
    }

    /// Append `entry` to the dispatched list.  Recording a title twice is a
    /// no-op.
    pub fn record(&mut self, entry: Entry) {
        if self.seen.insert(entry.title.clone()) {
            self.file.entries.push(entry);
        }
    }

    pub fn entries(&self) -> &[Entry] {
        &self.file.entries
    }

    /// True if a failure of `identity` should be alerted now.
    pub fn check_new_error(&self, identity: &str) -> bool {
        self.check_new_error_at(identity, Utc::now())
    }

    pub fn check_new_error_at(&self, identity: &str, now: DateTime<Utc>) -> bool {
        match self.file.errors.get(identity) {
            Some(&expiry) => now.timestamp() >= expiry,
            None => true,
        }
    }

    /// Start (or restart) the holddown window for `identity`.
    #[cfg(test)]
    pub fn add_error(&mut self, identity: &str) {
        self.add_error_at(identity, Utc::now());
    }

    pub fn add_error_at(&mut self, identity: &str, now: DateTime<Utc>) {
        let expiry = (now + hold_down()).timestamp();
        self.file.errors.insert(identity.to_string(), expiry);
    }

    /// Holddown expiry for `identity`, if one was ever set.
    pub fn error_expiry(&self, identity: &str) -> Option<i64> {
        self.file.errors.get(identity).copied()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
