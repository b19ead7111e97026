//! Disk-space admission for downloads.
//!
//! Free and available space come from `statvfs`.  "Used" is *not* taken from
//! the filesystem counters: the download directory is often a subtree of a
//! larger volume, so it is computed by walking the directory and summing
//! file sizes (skipping `lost+found`).
//!
//! A configurable safety buffer is subtracted from the available space before
//! any admission decision.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use nix::sys::statvfs::statvfs;
use tracing::debug;

use crate::error::{Error, Result};

pub const KB: u64 = 1024;
pub const MB: u64 = 1024 * KB;
pub const GB: u64 = 1024 * MB;
pub const TB: u64 = 1024 * GB;

/// Headroom on top of a pending payload for the status to show green.
pub const COMFORT_MARGIN: u64 = 5 * MB;

const RECOVERY_DIR: &str = "lost+found";

const SIZE_UNITS: [(&str, u64); 4] = [("TB", TB), ("GB", GB), ("MB", MB), ("KB", KB)];

/// Convert `500MB`, `2GB`, ... into bytes.
///
/// An empty string is zero and bare digits are bytes.  Any other form,
/// including a plain `B` suffix, is rejected.
pub fn parse_size(value: &str) -> Result<u64> {
    let value = value.trim();
    if value.is_empty() {
        return Ok(0);
    }

    let (digits, scale) = SIZE_UNITS
        .iter()
        .find_map(|(suffix, scale)| value.strip_suffix(suffix).map(|d| (d, *scale)))
        .unwrap_or((value, 1));

    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(Error::InvalidSize(value.to_string()));
    }
    digits
        .parse::<u64>()
        .ok()
        .and_then(|n| n.checked_mul(scale))
        .ok_or_else(|| Error::InvalidSize(value.to_string()))
}

/// Space snapshot for one path, in bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiskStatus {
    pub total: u64,
    /// Sum of file sizes under the path.
    pub used: u64,
    pub free: u64,
    /// Available to unprivileged users, minus the safety buffer.
    pub avail: u64,
}

impl DiskStatus {
    /// True iff a payload of `bytes` fits.  Equality fits.
    pub fn admit(&self, bytes: u64) -> bool {
        self.avail >= bytes
    }

    /// Whether there is clear room for `pending` bytes plus [`COMFORT_MARGIN`].
    pub fn is_comfortable(&self, pending: u64) -> bool {
        self.avail > pending.saturating_add(COMFORT_MARGIN)
    }

    /// Plain `12.34GB Free, 56.78GB Used`.
    pub fn describe(&self) -> String {
        format!(
            "{:.2}GB Free, {:.2}GB Used",
            self.avail as f64 / GB as f64,
            self.used as f64 / GB as f64
        )
    }

    /// [`describe`](Self::describe) wrapped in an HTML font tag: green when
    /// `pending` fits comfortably, red otherwise.
    pub fn summary(&self, pending: u64) -> String {
        let color = if self.is_comfortable(pending) {
            "#00ff00"
        } else {
            "#ff0000"
        };
        format!(r#"<font color="{color}">{}</font>"#, self.describe())
    }
}

/// Free-space gate for one directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskGate {
    path: PathBuf,
    buffer: u64,
}

impl DiskGate {
    pub fn new(path: impl Into<PathBuf>, buffer: u64) -> Self {
        Self {
            path: path.into(),
            buffer,
        }
    }

    /// Build a gate from a size string such as `2GB`.
    pub fn with_buffer(path: impl Into<PathBuf>, buffer: &str) -> Result<Self> {
        Ok(Self::new(path, parse_size(buffer)?))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn buffer(&self) -> u64 {
        self.buffer
    }

    /// Take a fresh snapshot.  Never cached: space changes as payloads land.
    pub fn usage(&self) -> Result<DiskStatus> {
        let stat = statvfs(self.path.as_path()).map_err(|source| Error::Disk {
            path: self.path.display().to_string(),
            source,
        })?;
        let unit = stat.fragment_size() as u64;

        let status = DiskStatus {
            total: stat.blocks() as u64 * unit,
            used: directory_size(&self.path)?,
            free: stat.blocks_free() as u64 * unit,
            avail: (stat.blocks_available() as u64 * unit).saturating_sub(self.buffer),
        };
        debug!(path = %self.path.display(), ?status, "disk usage");
        Ok(status)
    }
}

/// Recursively sum file sizes under `path`, not following symlinks and
/// skipping `lost+found`.
pub fn directory_size(path: &Path) -> io::Result<u64> {
    let mut size = 0;
    for dirent in fs::read_dir(path)? {
        let dirent = dirent?;
        if dirent.file_name() == RECOVERY_DIR {
            continue;
        }
        let file_type = dirent.file_type()?;
        if file_type.is_dir() {
            size += directory_size(&dirent.path())?;
        } else {
            size += dirent.metadata()?.len();
        }
    }
    Ok(size)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_size_units() {
        assert_eq!(parse_size("2GB").unwrap(), 2 * 1024 * 1024 * 1024);
        assert_eq!(parse_size("500MB").unwrap(), 500 * 1024 * 1024);
        assert_eq!(parse_size("3KB").unwrap(), 3 * 1024);
        assert_eq!(parse_size("1TB").unwrap(), 1024_u64.pow(4));
        assert_eq!(parse_size("").unwrap(), 0);
        assert_eq!(parse_size("  ").unwrap(), 0);
        assert_eq!(parse_size("4096").unwrap(), 4096);
    }

    #[test]
    fn parse_size_rejects_byte_suffix_and_junk() {
        for bad in ["B", "10B", "GB", "1.5GB", "-1MB", "ten MB", "2gb"] {
            assert!(
                matches!(parse_size(bad), Err(Error::InvalidSize(_))),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn parse_size_rejects_overflow() {
        assert!(parse_size("99999999999TB").is_err());
    }

    #[test]
    fn admit_boundary_is_inclusive() {
        let status = DiskStatus {
            avail: 1000,
            ..Default::default()
        };
        assert!(status.admit(999));
        assert!(status.admit(1000));
        assert!(!status.admit(1001));
        assert!(status.admit(0));
    }

    #[test]
    fn summary_colors_by_margin() {
        let status = DiskStatus {
            avail: 10 * GB,
            used: GB / 2,
            ..Default::default()
        };
        let green = status.summary(GB);
        assert_eq!(
            green,
            r##"<font color="#00ff00">10.00GB Free, 0.50GB Used</font>"##
        );

        let tight = 10 * GB - COMFORT_MARGIN;
        assert!(status.summary(tight).contains("#ff0000"));
        assert!(status.summary(tight - 1).contains("#00ff00"));
    }

    #[test]
    fn directory_size_skips_lost_and_found() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.bin"), vec![0u8; 100]).unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub").join("b.bin"), vec![0u8; 50]).unwrap();
        fs::create_dir(dir.path().join(RECOVERY_DIR)).unwrap();
        fs::write(dir.path().join(RECOVERY_DIR).join("junk"), vec![0u8; 1000]).unwrap();

        assert_eq!(directory_size(dir.path()).unwrap(), 150);
    }

    #[test]
    fn usage_applies_buffer() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.bin"), vec![0u8; 10]).unwrap();

        let raw = DiskGate::new(dir.path(), 0).usage().unwrap();
        assert_eq!(raw.used, 10);
        assert!(raw.total >= raw.free);

        let huge = DiskGate::new(dir.path(), u64::MAX).usage().unwrap();
        assert_eq!(huge.avail, 0);
        assert!(!huge.admit(1));
    }

    #[test]
    fn usage_of_missing_path_fails() {
        let dir = tempfile::tempdir().unwrap();
        let gate = DiskGate::new(dir.path().join("missing"), 0);
        assert!(matches!(gate.usage(), Err(Error::Disk { .. })));
    }

    #[test]
    fn with_buffer_parses_size() {
        let gate = DiskGate::with_buffer("/tmp", "1MB").unwrap();
        assert_eq!(gate.buffer(), MB);
        assert!(DiskGate::with_buffer("/tmp", "1B").is_err());
    }
}
