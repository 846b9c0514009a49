//! Per-source forwarding checkpoints
//!
//! One small properties-style file per source records the sequence number of
//! the last packet forwarded downstream:
//!
//! ```text
//! #mooring forwarding checkpoint
//! #2026-10-17T09:30:00Z
//! lastSequenceNumber=119
//! ```
//!
//! The file lives at `<directory>/<prefix>.<sourceID>.last` and is replaced
//! atomically (temp file + rename).

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::config::CheckpointConfig;
use crate::{MooringError, Result};

/// Key holding the checkpoint value
pub const LAST_SEQUENCE_KEY: &str = "lastSequenceNumber";

/// Default file name prefix
pub const DEFAULT_PREFIX: &str = "logPostpublish";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointStore {
    directory: PathBuf,
    prefix: String,
}

impl CheckpointStore {
    pub fn new(directory: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self { directory: directory.into(), prefix: prefix.into() }
    }

    pub fn from_config(config: &CheckpointConfig) -> Self {
        Self::new(&config.directory, &config.prefix)
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn path(&self, source_id: i64) -> PathBuf {
        self.directory.join(format!("{}.{}.last", self.prefix, source_id))
    }

    /// Read the checkpoint, distinguishing I/O failures from absence.
    pub fn try_load(&self, source_id: i64) -> Result<Option<i64>> {
        let path = self.path(source_id);
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(MooringError::Checkpoint { path, source: e }),
        };

        match parse_properties(&text, LAST_SEQUENCE_KEY) {
            Some(value) => value.parse::<i64>().map(Some).map_err(|e| {
                MooringError::Checkpoint {
                    path,
                    source: std::io::Error::new(
                        std::io::ErrorKind::InvalidData,
                        format!("{} is not a number: {}", LAST_SEQUENCE_KEY, e),
                    ),
                }
            }),
            None => Err(MooringError::Checkpoint {
                path,
                source: std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!("missing {}", LAST_SEQUENCE_KEY),
                ),
            }),
        }
    }

    /// Read the checkpoint; unreadable files are logged and treated as absent.
    pub fn load(&self, source_id: i64) -> Option<i64> {
        match self.try_load(source_id) {
            Ok(value) => {
                debug!("Checkpoint for device {}: {:?}", source_id, value);
                value
            }
            Err(e) => {
                warn!("Ignoring checkpoint for device {}: {}", source_id, e);
                None
            }
        }
    }

    pub fn store(&self, source_id: i64, last_sequence: i64) -> Result<()> {
        let path = self.path(source_id);
        let checkpoint_error = |source| MooringError::Checkpoint { path: path.clone(), source };

        fs::create_dir_all(&self.directory).map_err(checkpoint_error)?;
        let temp = path.with_extension("last.tmp");
        let mut file = fs::File::create(&temp).map_err(checkpoint_error)?;
        write!(
            file,
            "#mooring forwarding checkpoint\n#{}\n{}={}\n",
            chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
            LAST_SEQUENCE_KEY,
            last_sequence
        )
        .map_err(checkpoint_error)?;
        file.sync_all().map_err(checkpoint_error)?;
        drop(file);
        fs::rename(&temp, &path).map_err(checkpoint_error)?;

        debug!(
            "Stored checkpoint {} for device {} in {}",
            last_sequence,
            source_id,
            path.display()
        );
        Ok(())
    }
}

/// Value of `key` in Java-properties style text (`#`/`!` comments,
/// `=` or `:` separators).
fn parse_properties<'a>(text: &'a str, key: &str) -> Option<&'a str> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#') && !line.starts_with('!'))
        .filter_map(|line| line.split_once(['=', ':']))
        .find(|(k, _)| k.trim() == key)
        .map(|(_, v)| v.trim())
}
