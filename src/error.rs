//! Error types for the dispatch pipeline.

use thiserror::Error;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while resolving feeds, normalizing entries or dispatching them.
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// `FeedType` names a kind that is not in the registry.
    #[error("Unknown feed type: {0}")]
    UnknownFeedType(String),

    /// A required configuration key is absent.
    #[error("Missing `{field}` for feed {feed}")]
    MissingField { feed: String, field: &'static str },

    /// A feed URL could not be built.
    #[error("Invalid URL `{url}`: {reason}")]
    InvalidUrl { url: String, reason: String },

    /// The fetch collaborator failed.
    #[error("Unable to load {url}: {reason}")]
    Fetch { url: String, reason: String },

    /// An item carried a published date the feed kind cannot parse.
    #[error("Unable to parse Published time `{value}` with format `{format}`")]
    PublishDate { value: String, format: &'static str },

    /// An enclosure length is not a byte count.
    #[error("Unable to parse payload bytes `{0}`")]
    PayloadSize(String),

    /// A human size string such as `500MB` is malformed.
    #[error("Unparsable bytes string: {0}")]
    InvalidSize(String),

    /// `statvfs` failed.
    #[error("Unable to statfs {path}: {source}")]
    Disk {
        path: String,
        #[source]
        source: nix::errno::Errno,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML (de)serialization error.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Not enough room left on the download volume.
    #[error("Insufficient disk space: need {needed} bytes, {avail} available")]
    InsufficientSpace { needed: u64, avail: u64 },

    /// The download collaborator failed or the payload could not be stored.
    #[error("Download failed: {0}")]
    Download(String),

    /// The notification collaborator failed.
    #[error("Notification failed: {0}")]
    Notify(String),
}
