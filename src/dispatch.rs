//! The match → dedup → dispatch pipeline.
//!
//! ## Per-entry flow
//!
//! ```text
//! RawItem ─normalize─► Entry ─filter─► match? ──no──► drop
//!                                        │yes
//!                                  in cache? ──yes──► drop
//!                                        │no
//!                      auto-download? ──yes──► disk gate ─► download ─┐
//!                                        │no                          │
//!                                     notify ─────────────────────────┤
//!                                                                     ▼
//!                        ok: record in cache   /   err: alert once per holddown
//! ```
//!
//! Feeds run one after another in the order they are given.  A feed that
//! fails (bad config, fetch error, unparsable item) is reported and skipped;
//! the remaining feeds still run.  The cache is saved after every feed, and a
//! failed save ends the run.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use crate::cache::DedupCache;
use crate::config::FeedDecl;
use crate::disk::DiskGate;
use crate::download::{is_usable_dir, store_payload, Downloader};
use crate::entry::Entry;
use crate::error::{Error, Result};
use crate::feed::Feed;
use crate::notify::{Notice, Notifier};
use crate::source::FeedFetcher;

/// What to do with new matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode<'a> {
    /// Download or notify.
    Dispatch,
    /// Record as seen without dispatching, optionally through a subset of
    /// each feed's filters (empty means all).
    Skip { filters: &'a [String] },
}

/// How one successful dispatch ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Downloaded(PathBuf),
    Notified,
}

/// Counters for one feed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedReport {
    pub feed: String,
    pub fetched: usize,
    pub matched: usize,
    /// Matches already in the cache.
    pub seen: usize,
    pub downloaded: usize,
    pub notified: usize,
    /// Recorded without dispatch in skip mode.
    pub skipped: usize,
    pub failed: usize,
    /// Failures whose alert was held down.
    pub suppressed: usize,
}

impl fmt::Display for FeedReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} fetched, {} matched, {} seen, {} downloaded, {} notified, {} skipped, {} failed ({} suppressed)",
            self.feed,
            self.fetched,
            self.matched,
            self.seen,
            self.downloaded,
            self.notified,
            self.skipped,
            self.failed,
            self.suppressed
        )
    }
}

/// Result of a whole run.
#[derive(Debug, Default)]
pub struct RunReport {
    pub feeds: Vec<FeedReport>,
    /// Feeds that were aborted, with the reason.
    pub feed_errors: Vec<(String, Error)>,
}

impl RunReport {
    pub fn is_clean(&self) -> bool {
        self.feed_errors.is_empty()
    }
}

/// Drives feeds through the pipeline against one cache.
pub struct Dispatcher<'a> {
    fetcher: &'a dyn FeedFetcher,
    notifier: &'a dyn Notifier,
    downloader: &'a dyn Downloader,
    download_dir: Option<PathBuf>,
    disk: Option<DiskGate>,
    clock: Box<dyn Fn() -> DateTime<Utc> + 'a>,
}

impl<'a> Dispatcher<'a> {
    pub fn new(
        fetcher: &'a dyn FeedFetcher,
        notifier: &'a dyn Notifier,
        downloader: &'a dyn Downloader,
    ) -> Self {
        Self {
            fetcher,
            notifier,
            downloader,
            download_dir: None,
            disk: None,
            clock: Box::new(Utc::now),
        }
    }

    /// Directory payloads are written to.  Required for auto-download feeds.
    pub fn with_download_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.download_dir = Some(dir.into());
        self
    }

    /// Gate used for admission and for the disk line in notifications.
    /// Without one, downloads are admitted against the download directory
    /// with no buffer.
    pub fn with_disk_gate(mut self, gate: DiskGate) -> Self {
        self.disk = Some(gate);
        self
    }

    #[cfg(test)]
    pub fn with_clock(mut self, clock: impl Fn() -> DateTime<Utc> + 'a) -> Self {
        self.clock = Box::new(clock);
        self
    }

    /// Process `feeds` in the given order.
    ///
    /// # Errors
    ///
    /// Only a failed cache save.  Feed failures are collected in the report.
    pub fn run(
        &self,
        feeds: &[&FeedDecl],
        cache: &mut DedupCache,
        mode: Mode<'_>,
    ) -> Result<RunReport> {
        let mut report = RunReport::default();
        for decl in feeds {
            info!(feed = %decl.name, "Processing");
            let result = decl
                .resolve()
                .and_then(|feed| self.process(&feed, cache, mode));
            match result {
                Ok(feed_report) => {
                    info!("{feed_report}");
                    report.feeds.push(feed_report);
                }
                Err(e) => {
                    error!(feed = %decl.name, error = %e, "feed aborted");
                    report.feed_errors.push((decl.name.clone(), e));
                }
            }
            cache.save()?;
        }
        Ok(report)
    }

    /// Run one resolved feed through the pipeline.
    pub fn process(&self, feed: &Feed, cache: &mut DedupCache, mode: Mode<'_>) -> Result<FeedReport> {
        let selected;
        let feed = match mode {
            Mode::Skip { filters } if !filters.is_empty() => {
                selected = feed.with_filters(filters)?;
                &selected
            }
            _ => feed,
        };

        let dir_ok = self.download_dir.as_deref().is_some_and(is_usable_dir);
        if mode == Mode::Dispatch && feed.may_download() && !dir_ok {
            return Err(Error::Config(format!(
                "feed {} downloads but DownloadDir is missing or not a directory",
                feed.name
            )));
        }

        if feed.filters.is_empty() {
            warn!(feed = %feed.name, "no filters configured, nothing can match");
        }

        let url = feed.generate_url()?;
        debug!(feed = %feed.name, %url, "fetching");
        let items = self.fetcher.fetch(&url).map_err(|e| Error::Fetch {
            url: url.clone(),
            reason: format!("{e:#}"),
        })?;

        // Normalize everything first: one bad item aborts the feed before
        // anything is dispatched.
        let entries = items
            .iter()
            .map(|raw| feed.normalize(raw))
            .collect::<Result<Vec<_>>>()?;

        let mut report = FeedReport {
            feed: feed.name.clone(),
            fetched: entries.len(),
            ..Default::default()
        };

        for mut entry in entries {
            let Some(rule) = feed.match_entry(&entry) else {
                debug!(title = %entry.title, "no filter matched");
                continue;
            };
            report.matched += 1;

            if cache.contains(&entry.title) {
                debug!(title = %entry.title, "already in cache");
                report.seen += 1;
                continue;
            }
            entry.auto_download = feed.wants_download(rule);
            debug!(title = %entry.title, rule = %rule.name, auto_download = entry.auto_download, "new match");

            if let Mode::Skip { .. } = mode {
                info!(title = %entry.title, "Skipping entry");
                cache.record(entry);
                report.skipped += 1;
                continue;
            }

            match self.dispatch(feed, &entry) {
                Ok(Outcome::Downloaded(path)) => {
                    info!(title = %entry.title, path = %path.display(), "downloaded");
                    report.downloaded += 1;
                    cache.record(entry);
                }
                Ok(Outcome::Notified) => {
                    info!(title = %entry.title, "notified");
                    report.notified += 1;
                    cache.record(entry);
                }
                Err(e) => {
                    report.failed += 1;
                    if !self.report_failure(&entry, &e, cache) {
                        report.suppressed += 1;
                    }
                }
            }
        }

        Ok(report)
    }

    /// Download or notify; exactly one of the two.
    fn dispatch(&self, feed: &Feed, entry: &Entry) -> Result<Outcome> {
        if !entry.auto_download {
            let disk = self.disk_summary(entry.payload_bytes);
            self.notifier
                .notify(entry, &Notice::NewEntry { disk: disk.as_deref() })
                .map_err(|e| Error::Notify(format!("{e:#}")))?;
            return Ok(Outcome::Notified);
        }

        let dir = self.download_dir.as_deref().ok_or_else(|| {
            Error::Config(format!("feed {} downloads but no DownloadDir is configured", feed.name))
        })?;

        let status = match &self.disk {
            Some(gate) => gate.usage()?,
            None => DiskGate::new(dir, 0).usage()?,
        };
        if !status.admit(entry.payload_bytes) {
            return Err(Error::InsufficientSpace {
                needed: entry.payload_bytes,
                avail: status.avail,
            });
        }

        if entry.payload_url.is_empty() {
            return Err(Error::Download(format!("{} has no payload link", entry.title)));
        }
        let bytes = self
            .downloader
            .download(&entry.payload_url)
            .map_err(|e| Error::Download(format!("{e:#}")))?;
        let path = store_payload(dir, &feed.download_filename(entry), &bytes)
            .map_err(|e| Error::Download(format!("{e:#}")))?;
        Ok(Outcome::Downloaded(path))
    }

    /// Alert about a failed dispatch unless it is held down.  Returns whether
    /// an alert was attempted.
    fn report_failure(&self, entry: &Entry, err: &Error, cache: &mut DedupCache) -> bool {
        let now = (self.clock)();
        if !cache.check_new_error_at(&entry.title, now) {
            debug!(title = %entry.title, error = %err, "failure alert held down");
            return false;
        }

        warn!(title = %entry.title, error = %err, "dispatch failed");
        let text = err.to_string();
        let disk = self.disk_summary(entry.payload_bytes);
        let notice = Notice::Failure {
            error: &text,
            disk: disk.as_deref(),
        };
        if let Err(e) = self.notifier.notify(entry, &notice) {
            error!(title = %entry.title, error = %e, "unable to send failure notification");
        }
        cache.add_error_at(&entry.title, now);
        true
    }

    /// HTML disk line for notifications, when a gate is configured and
    /// readable.
    fn disk_summary(&self, pending: u64) -> Option<String> {
        let gate = self.disk.as_ref()?;
        match gate.usage() {
            Ok(status) => Some(status.summary(pending)),
            Err(e) => {
                warn!(error = %e, "unable to read disk usage");
                None
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
