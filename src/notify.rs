//! Outbound notifications.
//!
//! The dispatcher only sees the [`Notifier`] trait.  Message wording lives in
//! [`compose`] so every transport says the same thing; transports just
//! deliver a [`Message`].

use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use tracing::{error, info};

use crate::config::PushoverConfig;
use crate::entry::Entry;

const PUSHOVER_API: &str = "https://api.pushover.net/1/messages.json";
const PUSHOVER_SOUND: &str = "cosmic";
const PUSHOVER_PRIORITY_NORMAL: &str = "0";

/// What happened to an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notice<'a> {
    /// A new match is available.  `disk` is an optional HTML status snippet.
    NewEntry { disk: Option<&'a str> },
    /// Dispatching the entry failed with `error`.
    Failure {
        error: &'a str,
        disk: Option<&'a str>,
    },
}

/// A rendered notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub title: String,
    /// HTML body.
    pub body: String,
    /// Supplementary link (the payload).
    pub url: String,
    pub url_title: String,
}

/// Trait that every notification transport implements.
pub trait Notifier {
    /// Deliver `notice` about `entry`.  Any error counts as a failed dispatch.
    fn notify(&self, entry: &Entry, notice: &Notice<'_>) -> Result<()>;
}

/// Escape text for the HTML message body.
fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

/// Render the message for `notice`.  Only failures carry error text.
///
/// The body is HTML: entry fields and error text are escaped, the disk
/// snippet is inserted as is.
pub fn compose(entry: &Entry, notice: &Notice<'_>) -> Message {
    let feed = html_escape(&entry.feed_name);
    let (title, headline, error, disk) = match notice {
        Notice::NewEntry { disk } => (
            entry.title.clone(),
            format!("There is a new {feed} Torrent available!"),
            None,
            *disk,
        ),
        Notice::Failure { error, disk } => (
            format!("ERROR: {}", entry.title),
            format!("Unable to process new {feed} Torrent!"),
            Some(*error),
            *disk,
        ),
    };

    let mut body = format!(
        "{headline}\n\nTorrent Name: {}\n\nTorrent Size: {}\n",
        html_escape(&entry.title),
        html_escape(&entry.payload_size_label)
    );
    if let Some(error) = error {
        body.push_str(&format!("\nError: {}\n", html_escape(error)));
    }
    if let Some(disk) = disk {
        body.push_str(&format!("\n{disk}\n"));
    }
    body.push_str(&format!(
        "\n<a href=\"{}\">More Info</a>",
        html_escape(&entry.url)
    ));

    Message {
        title,
        body,
        url: entry.payload_url.clone(),
        url_title: entry.title.clone(),
    }
}

// ---------------------------------------------------------------------------
// Pushover
// ---------------------------------------------------------------------------

/// Sends through the Pushover messages API, once per configured user.
pub struct PushoverNotifier {
    client: reqwest::blocking::Client,
    config: PushoverConfig,
}

impl PushoverNotifier {
    pub fn new(config: PushoverConfig, timeout: Duration) -> Result<Self> {
        if config.app_token.is_empty() {
            bail!("Missing `Pushover.AppToken` in config");
        }
        if config.users.is_empty() {
            bail!("Missing `Pushover.Users` in config");
        }
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .context("building HTTP client")?;
        Ok(Self { client, config })
    }

    fn send(&self, user: &str, message: &Message) -> Result<()> {
        let timestamp = Utc::now().timestamp().to_string();
        let devices = self.config.devices.join(",");
        let mut form = vec![
            ("token", self.config.app_token.as_str()),
            ("user", user),
            ("title", message.title.as_str()),
            ("message", message.body.as_str()),
            ("html", "1"),
            ("priority", PUSHOVER_PRIORITY_NORMAL),
            ("sound", PUSHOVER_SOUND),
            ("timestamp", timestamp.as_str()),
        ];
        if !message.url.is_empty() {
            form.push(("url", message.url.as_str()));
            form.push(("url_title", message.url_title.as_str()));
        }
        if !devices.is_empty() {
            form.push(("device", devices.as_str()));
        }

        self.client
            .post(PUSHOVER_API)
            .form(&form)
            .send()
            .and_then(|r| r.error_for_status())
            .context("posting to Pushover")?;
        Ok(())
    }
}

impl Notifier for PushoverNotifier {
    /// Fails only when no user could be reached, so a partial delivery is
    /// not repeated on the next run.
    fn notify(&self, entry: &Entry, notice: &Notice<'_>) -> Result<()> {
        let message = compose(entry, notice);
        let mut failures = 0;
        for user in &self.config.users {
            if let Err(e) = self.send(user, &message) {
                error!(%user, error = %e, "unable to send message");
                failures += 1;
            }
        }
        if failures == self.config.users.len() {
            bail!("Pushover delivery failed for every user");
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Log-only
// ---------------------------------------------------------------------------

/// Writes notifications to the log.  Used when no transport is configured.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, entry: &Entry, notice: &Notice<'_>) -> Result<()> {
        let message = compose(entry, notice);
        match notice {
            Notice::NewEntry { .. } => info!(title = %message.title, url = %entry.url, "new entry"),
            Notice::Failure { error, .. } => {
                error!(title = %message.title, %error, "dispatch failed")
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::tests::make_entry;

    fn entry() -> Entry {
        let mut entry = make_entry("Show.S01E01", &["x264"]);
        entry.feed_name = "Shows".into();
        entry.payload_size_label = "1.2 GB".into();
        entry.url = "https://example.com/details/1".into();
        entry
    }

    #[test]
    fn new_entry_message_has_no_error_text() {
        let msg = compose(&entry(), &Notice::NewEntry { disk: Some("<font>ok</font>") });

        assert_eq!(msg.title, "Show.S01E01");
        assert!(msg.body.starts_with("There is a new Shows Torrent available!"));
        assert!(msg.body.contains("Torrent Size: 1.2 GB"));
        assert!(msg.body.contains("<font>ok</font>"));
        assert!(msg.body.ends_with(r#"<a href="https://example.com/details/1">More Info</a>"#));
        assert!(!msg.body.contains("Error"));
        assert_eq!(msg.url, "https://example.com/Show.S01E01.torrent");
    }

    #[test]
    fn failure_message_includes_error() {
        let msg = compose(
            &entry(),
            &Notice::Failure {
                error: "Insufficient disk space",
                disk: None,
            },
        );
        assert_eq!(msg.title, "ERROR: Show.S01E01");
        assert!(msg.body.contains("Error: Insufficient disk space"));
    }

    #[test]
    fn body_escapes_entry_text() {
        let mut entry = entry();
        entry.title = "Tom & Jerry <1080p>".into();
        entry.url = r#"https://example.com/d?id=1&q="x""#.into();

        let msg = compose(
            &entry,
            &Notice::Failure {
                error: "status <503>",
                disk: Some("<font>ok</font>"),
            },
        );

        assert!(msg.body.contains("Torrent Name: Tom &amp; Jerry &lt;1080p&gt;"));
        assert!(msg.body.contains("Error: status &lt;503&gt;"));
        assert!(msg.body.contains("<font>ok</font>"), "disk snippet is already HTML");
        assert!(msg
            .body
            .ends_with(r#"<a href="https://example.com/d?id=1&amp;q=&quot;x&quot;">More Info</a>"#));
        assert_eq!(msg.title, "ERROR: Tom & Jerry <1080p>", "title is plain text");
    }

    #[test]
    fn pushover_requires_credentials() {
        let timeout = Duration::from_secs(1);
        assert!(PushoverNotifier::new(PushoverConfig::default(), timeout).is_err());

        let no_users = PushoverConfig {
            app_token: "app".into(),
            ..Default::default()
        };
        assert!(PushoverNotifier::new(no_users, timeout).is_err());

        let ok = PushoverConfig {
            app_token: "app".into(),
            users: vec!["u".into()],
            devices: vec![],
        };
        assert!(PushoverNotifier::new(ok, timeout).is_ok());
    }

    #[test]
    fn log_notifier_always_succeeds() {
        assert!(LogNotifier
            .notify(&entry(), &Notice::NewEntry { disk: None })
            .is_ok());
    }
}
