/*!
 * Configuration types for dstore-migrate
 */

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{MigrateError, Result};

/// Default number of objects transferred at the same time
pub const DEFAULT_CONCURRENCY: usize = 10;

/// Main configuration for a migration run
///
/// A run never mutates its config. Every transfer task receives its own clone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationConfig {
    /// Source region (None = provider default chain)
    #[serde(default)]
    pub region: Option<String>,

    /// Custom S3 endpoint for S3-compatible sources
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Force path-style addressing (MinIO, LocalStack)
    #[serde(default)]
    pub force_path_style: bool,

    /// Containers to migrate (empty = discover all)
    #[serde(default)]
    pub buckets: Vec<String>,

    /// Only migrate keys under this prefix
    #[serde(default)]
    pub prefix: String,

    /// Maximum concurrent transfers (0 = unbounded)
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Remove each source object after it has been migrated
    #[serde(default)]
    pub delete_source: bool,

    /// Destination allocation identifier (required)
    #[serde(default)]
    pub allocation: String,

    /// Root directory of the local content store
    #[serde(default = "default_store_root")]
    pub store_root: PathBuf,

    /// Request encrypted uploads
    #[serde(default)]
    pub encrypt: bool,

    /// Commit a metadata transaction after each upload
    #[serde(default)]
    pub commit: bool,

    /// Who pays for reads of the migrated content ("owner" or "3rd_party")
    #[serde(default)]
    pub who_pays: Option<String>,

    /// Log level for diagnostic output
    #[serde(default)]
    pub log_level: LogLevel,

    /// Log file path (None = stdout)
    #[serde(default)]
    pub log_file: Option<PathBuf>,

    /// Enable verbose logging (shorthand for log_level = debug)
    #[serde(default)]
    pub verbose: bool,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            region: None,
            endpoint: None,
            force_path_style: false,
            buckets: Vec::new(),
            prefix: String::new(),
            concurrency: default_concurrency(),
            delete_source: false,
            allocation: String::new(),
            store_root: default_store_root(),
            encrypt: false,
            commit: false,
            who_pays: None,
            log_level: LogLevel::Info,
            log_file: None,
            verbose: false,
        }
    }
}

fn default_concurrency() -> usize {
    DEFAULT_CONCURRENCY
}

fn default_store_root() -> PathBuf {
    PathBuf::from(".")
}

impl MigrationConfig {
    /// Create a configuration targeting the given allocation
    pub fn new(allocation: impl Into<String>) -> Self {
        Self {
            allocation: allocation.into(),
            ..Default::default()
        }
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: MigrationConfig = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Check everything that must hold before a run starts
    pub fn validate(&self) -> Result<()> {
        if self.allocation.trim().is_empty() {
            return Err(MigrateError::Config(
                "allocation id is required".to_string(),
            ));
        }
        self.payer()?;
        Ok(())
    }

    /// Parsed payer designation, if one was supplied
    pub fn payer(&self) -> Result<Option<WhoPays>> {
        match self.who_pays.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(value) => value.parse().map(Some),
        }
    }

    /// Key prefix as an option (empty = no filter)
    pub fn prefix_filter(&self) -> Option<&str> {
        if self.prefix.is_empty() {
            None
        } else {
            Some(&self.prefix)
        }
    }
}

/// Party charged for reads of uploaded content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WhoPays {
    /// The allocation owner pays
    #[serde(rename = "owner")]
    Owner,

    /// The reading party pays
    #[serde(rename = "3rd_party")]
    ThirdParty,
}

impl FromStr for WhoPays {
    type Err = MigrateError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "owner" => Ok(WhoPays::Owner),
            "3rd_party" => Ok(WhoPays::ThirdParty),
            other => Err(MigrateError::Config(format!(
                "invalid who-pays value '{}' (expected 'owner' or '3rd_party')",
                other
            ))),
        }
    }
}

impl fmt::Display for WhoPays {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WhoPays::Owner => write!(f, "owner"),
            WhoPays::ThirdParty => write!(f, "3rd_party"),
        }
    }
}

/// Log level for diagnostic output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Only errors
    Error,

    /// Warnings and errors
    Warn,

    /// Info, warnings, and errors
    #[default]
    Info,

    /// Debug and above
    Debug,

    /// All messages including traces
    Trace,
}

impl LogLevel {
    /// Convert to tracing::Level
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = MigrationConfig::default();
        assert_eq!(config.concurrency, DEFAULT_CONCURRENCY);
        assert!(config.buckets.is_empty());
        assert!(!config.delete_source);
        assert!(!config.commit);
        assert!(!config.encrypt);
        assert_eq!(config.prefix_filter(), None);
    }

    #[test]
    fn test_missing_allocation_is_config_error() {
        let config = MigrationConfig::default();
        let err = config.validate().unwrap_err();
        assert!(matches!(err, MigrateError::Config(_)));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_who_pays_parsing() {
        assert_eq!("owner".parse::<WhoPays>().unwrap(), WhoPays::Owner);
        assert_eq!("OWNER".parse::<WhoPays>().unwrap(), WhoPays::Owner);
        assert_eq!("3rd_party".parse::<WhoPays>().unwrap(), WhoPays::ThirdParty);
        assert!("everyone".parse::<WhoPays>().is_err());
    }

    #[test]
    fn test_invalid_payer_fails_validation() {
        let mut config = MigrationConfig::new("alloc-1");
        config.who_pays = Some("nobody".to_string());
        assert!(matches!(config.validate(), Err(MigrateError::Config(_))));

        config.who_pays = Some("3rd_party".to_string());
        assert!(config.validate().is_ok());
        assert_eq!(config.payer().unwrap(), Some(WhoPays::ThirdParty));
    }

    #[test]
    fn test_empty_payer_is_none() {
        let mut config = MigrationConfig::new("alloc-1");
        config.who_pays = Some("  ".to_string());
        assert_eq!(config.payer().unwrap(), None);
    }

    #[test]
    fn test_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
region = "eu-west-1"
buckets = ["b1", "b2"]
prefix = "logs/"
concurrency = 4
allocation = "abc123"
commit = true
who_pays = "owner"
log_level = "debug"
"#
        )
        .unwrap();

        let config = MigrationConfig::from_file(file.path()).unwrap();
        assert_eq!(config.region.as_deref(), Some("eu-west-1"));
        assert_eq!(config.buckets, vec!["b1", "b2"]);
        assert_eq!(config.prefix_filter(), Some("logs/"));
        assert_eq!(config.concurrency, 4);
        assert!(config.commit);
        assert!(!config.delete_source);
        assert_eq!(config.log_level, LogLevel::Debug);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_serialization_roundtrip_keeps_defaults() {
        let config = MigrationConfig::new("abc");
        let toml = toml::to_string(&config).unwrap();
        let deserialized: MigrationConfig = toml::from_str(&toml).unwrap();
        assert_eq!(config, deserialized);
    }

    #[test]
    fn test_log_level_conversion() {
        assert_eq!(LogLevel::Error.to_tracing_level(), tracing::Level::ERROR);
        assert_eq!(LogLevel::Trace.to_tracing_level(), tracing::Level::TRACE);
    }
}
