//! Tool configuration
//!
//! Settings come from an optional YAML file, then environment overrides:
//!
//! ```yaml
//! transport:
//!   timeout_secs: 120
//! retrieval:
//!   max_bytes: 1024
//!   timeout_millis: 20000
//! lease:
//!   duration_secs: 900
//!   retry_interval_millis: 2000
//! checkpoint:
//!   directory: /var/lib/mooring/publish
//!   prefix: logPostpublish
//! log_directory: /var/lib/mooring/logs
//! sampler:
//!   interval_secs: 60
//! devices:
//!   1553: ctd
//! parsers:
//!   - source_type: ctd
//!     fields: [temp, cond, pressure]
//!     delimiter: ","
//!     header_sentinel: "*END*"
//! ```
//!
//! `MOORING_CHECKPOINT_DIR` replaces `checkpoint.directory` and
//! `MOORING_LOG_DIR` replaces `log_directory`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::checkpoint::DEFAULT_PREFIX;
use crate::client::{DEFAULT_MAX_BYTES, DEFAULT_TIMEOUT_MILLIS};
use crate::{MooringError, Result};

pub const CHECKPOINT_DIR_ENV: &str = "MOORING_CHECKPOINT_DIR";
pub const LOG_DIR_ENV: &str = "MOORING_LOG_DIR";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MooringConfig {
    pub transport: TransportConfig,
    pub retrieval: RetrievalConfig,
    pub lease: LeaseConfig,
    pub checkpoint: CheckpointConfig,
    /// Directory of local packet logs
    pub log_directory: PathBuf,
    pub sampler: SamplerConfig,
    /// Source type of each device, by source ID
    pub devices: BTreeMap<i64, String>,
    /// Payload parsers for packet display
    pub parsers: Vec<ParserConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub max_bytes: i32,
    pub timeout_millis: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LeaseConfig {
    pub duration_secs: u64,
    pub retry_interval_millis: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointConfig {
    pub directory: PathBuf,
    pub prefix: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplerConfig {
    pub interval_secs: u64,
}

/// Delimited-text parser for one source type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParserConfig {
    pub source_type: String,
    #[serde(default)]
    pub fields: Vec<String>,
    #[serde(default = "default_delimiter")]
    pub delimiter: char,
    /// Text separating an instrument header from the sample
    #[serde(default)]
    pub header_sentinel: Option<String>,
}

fn default_delimiter() -> char {
    ','
}

impl Default for MooringConfig {
    fn default() -> Self {
        Self {
            transport: TransportConfig::default(),
            retrieval: RetrievalConfig::default(),
            lease: LeaseConfig::default(),
            checkpoint: CheckpointConfig::default(),
            log_directory: PathBuf::from("."),
            sampler: SamplerConfig::default(),
            devices: BTreeMap::new(),
            parsers: Vec::new(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self { timeout_secs: 120 }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self { max_bytes: DEFAULT_MAX_BYTES, timeout_millis: DEFAULT_TIMEOUT_MILLIS }
    }
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self { duration_secs: 900, retry_interval_millis: 2000 }
    }
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self { directory: PathBuf::from("."), prefix: DEFAULT_PREFIX.to_string() }
    }
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self { interval_secs: 60 }
    }
}

impl TransportConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl LeaseConfig {
    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.duration_secs)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_millis)
    }
}

impl SamplerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl MooringConfig {
    /// Source type configured for `source_id`.
    pub fn source_type(&self, source_id: i64) -> Option<&str> {
        self.devices.get(&source_id).map(String::as_str)
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        serde_yaml_ng::from_str(yaml)
            .map_err(|e| MooringError::Config { reason: format!("invalid YAML: {}", e) })
    }

    /// Load `path` if given (defaults otherwise) and apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let yaml = std::fs::read_to_string(path)
                    .map_err(|e| MooringError::file_error(path, e))?;
                debug!("Loaded configuration from {}", path.display());
                Self::from_yaml_str(&yaml)?
            }
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from `lookup`, typically the process environment.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(dir) = lookup(CHECKPOINT_DIR_ENV).filter(|v| !v.is_empty()) {
            self.checkpoint.directory = PathBuf::from(dir);
        }
        if let Some(dir) = lookup(LOG_DIR_ENV).filter(|v| !v.is_empty()) {
            self.log_directory = PathBuf::from(dir);
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.transport.timeout_secs == 0 {
            return Err(MooringError::Config {
                reason: "transport.timeout_secs must be > 0".into(),
            });
        }
        if self.retrieval.max_bytes <= 0 {
            return Err(MooringError::Config { reason: "retrieval.max_bytes must be > 0".into() });
        }
        if self.checkpoint.prefix.is_empty() {
            return Err(MooringError::Config {
                reason: "checkpoint.prefix must not be empty".into(),
            });
        }
        if let Some(parser) = self.parsers.iter().find(|p| p.source_type.is_empty()) {
            return Err(MooringError::Config {
                reason: format!("parser with fields {:?} has no source_type", parser.fields),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_deployed_tools() {
        let config = MooringConfig::default();
        assert_eq!(config.transport.timeout(), Duration::from_secs(120));
        assert_eq!(config.retrieval.max_bytes, 1024);
        assert_eq!(config.lease.duration(), Duration::from_secs(900));
        assert_eq!(config.lease.retry_interval(), Duration::from_secs(2));
        assert_eq!(config.checkpoint.prefix, "logPostpublish");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_yaml_keeps_defaults() {
        let config = MooringConfig::from_yaml_str(
            "retrieval:\n  max_bytes: 4096\ncheckpoint:\n  directory: /data/publish\n",
        )
        .unwrap();
        assert_eq!(config.retrieval.max_bytes, 4096);
        assert_eq!(config.retrieval.timeout_millis, 20_000);
        assert_eq!(config.checkpoint.directory, PathBuf::from("/data/publish"));
        assert_eq!(config.checkpoint.prefix, "logPostpublish");
    }

    #[test]
    fn environment_overrides_directories() {
        let mut config = MooringConfig::default();
        config.apply_overrides(|key| match key {
            CHECKPOINT_DIR_ENV => Some("/var/publish".to_string()),
            LOG_DIR_ENV => Some(String::new()),
            _ => None,
        });
        assert_eq!(config.checkpoint.directory, PathBuf::from("/var/publish"));
        assert_eq!(config.log_directory, PathBuf::from("."));
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(MooringConfig::from_yaml_str("transport: [").is_err());
        let config = MooringConfig::from_yaml_str("retrieval:\n  max_bytes: 0\n").unwrap();
        assert!(matches!(config.validate(), Err(MooringError::Config { .. })));
    }

    #[test]
    fn devices_and_parsers_from_yaml() {
        let config = MooringConfig::from_yaml_str(
            "devices:\n  1553: ctd\nparsers:\n  - source_type: ctd\n    fields: [temp, cond]\n",
        )
        .unwrap();
        assert_eq!(config.source_type(1553), Some("ctd"));
        assert_eq!(config.source_type(7), None);
        assert_eq!(config.parsers[0].fields, vec!["temp", "cond"]);
        assert_eq!(config.parsers[0].delimiter, ',');
        assert_eq!(config.parsers[0].header_sentinel, None);
        assert!(config.validate().is_ok());

        let unnamed =
            MooringConfig::from_yaml_str("parsers:\n  - source_type: \"\"\n").unwrap();
        assert!(unnamed.validate().is_err());
    }

    #[test]
    fn load_reads_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mooring.yaml");
        std::fs::write(&path, "lease:\n  duration_secs: 60\n").unwrap();
        let config = MooringConfig::load(Some(&path)).unwrap();
        assert_eq!(config.lease.duration_secs, 60);
        assert!(MooringConfig::load(Some(&dir.path().join("missing.yaml"))).is_err());
    }
}
