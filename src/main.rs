/*!
 * dstore-migrate CLI
 */

use anyhow::Context;
use clap::{Parser, ValueEnum};
use dstore_migrate::{
    config::{LogLevel, MigrationConfig},
    error::{MigrateError, EXIT_FATAL, EXIT_SUCCESS},
    logging,
};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "dstore-migrate")]
#[command(version, about = "Stream objects from S3 into a content store allocation", long_about = None)]
struct Cli {
    /// Destination allocation id
    #[arg(short = 'a', long, value_name = "ID")]
    allocation: Option<String>,

    /// Source region (default: AWS provider chain)
    #[arg(long, value_name = "REGION")]
    region: Option<String>,

    /// Bucket to migrate; repeat for several (default: all buckets)
    #[arg(short = 'b', long = "bucket", value_name = "NAME")]
    buckets: Vec<String>,

    /// Only migrate keys starting with this prefix
    #[arg(long, value_name = "PREFIX")]
    prefix: Option<String>,

    /// Maximum simultaneous transfers, 0 for no limit [default: 10]
    #[arg(short = 'c', long, value_name = "N")]
    concurrency: Option<usize>,

    /// Delete each source object once it is migrated
    #[arg(long)]
    delete_source: bool,

    /// Request encrypted uploads
    #[arg(long)]
    encrypt: bool,

    /// Commit a metadata transaction after every upload
    #[arg(long)]
    commit: bool,

    /// Who pays for reads of migrated content: owner or 3rd_party
    #[arg(long, value_name = "PAYER")]
    who_pays: Option<String>,

    /// Root directory of the local content store
    #[arg(long, value_name = "DIR")]
    store_root: Option<PathBuf>,

    /// Custom endpoint for S3-compatible sources
    #[arg(long, value_name = "URL")]
    endpoint: Option<String>,

    /// Use path-style bucket addressing
    #[arg(long)]
    force_path_style: bool,

    /// Load settings from a TOML file; flags override it
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level
    #[arg(long, value_enum)]
    log_level: Option<LogLevelArg>,

    /// Write JSON logs to this file instead of stdout
    #[arg(long, value_name = "FILE")]
    log_file: Option<PathBuf>,

    /// Enable verbose logging (equivalent to --log-level=debug)
    #[arg(short = 'v', long)]
    verbose: bool,
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
enum LogLevelArg {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevelArg> for LogLevel {
    fn from(arg: LogLevelArg) -> Self {
        match arg {
            LogLevelArg::Error => LogLevel::Error,
            LogLevelArg::Warn => LogLevel::Warn,
            LogLevelArg::Info => LogLevel::Info,
            LogLevelArg::Debug => LogLevel::Debug,
            LogLevelArg::Trace => LogLevel::Trace,
        }
    }
}

impl Cli {
    /// Apply command-line flags on top of a base configuration
    fn apply(self, mut config: MigrationConfig) -> MigrationConfig {
        if let Some(allocation) = self.allocation {
            config.allocation = allocation;
        }
        if self.region.is_some() {
            config.region = self.region;
        }
        if !self.buckets.is_empty() {
            config.buckets = self.buckets;
        }
        if let Some(prefix) = self.prefix {
            config.prefix = prefix;
        }
        if let Some(concurrency) = self.concurrency {
            config.concurrency = concurrency;
        }
        if let Some(store_root) = self.store_root {
            config.store_root = store_root;
        }
        if self.endpoint.is_some() {
            config.endpoint = self.endpoint;
        }
        if self.who_pays.is_some() {
            config.who_pays = self.who_pays;
        }
        if let Some(level) = self.log_level {
            config.log_level = level.into();
        }
        if self.log_file.is_some() {
            config.log_file = self.log_file;
        }

        config.delete_source |= self.delete_source;
        config.encrypt |= self.encrypt;
        config.commit |= self.commit;
        config.force_path_style |= self.force_path_style;
        config.verbose |= self.verbose;
        config
    }
}

fn main() {
    let code = match run() {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            exit_code(&e)
        }
    };
    std::process::exit(code);
}

/// Exit status for an error that ended the run
///
/// Anything that is not a `MigrateError` (runtime startup, config file
/// context) is fatal.
fn exit_code(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<MigrateError>() {
        Some(e) if e.is_fatal() => e.exit_code(),
        _ => EXIT_FATAL,
    }
}

fn run() -> anyhow::Result<()> {
    let mut cli = Cli::parse();

    let base_config = match cli.config.take() {
        Some(path) => MigrationConfig::from_file(&path)
            .with_context(|| format!("loading config file {}", path.display()))?,
        None => MigrationConfig::default(),
    };
    let config = cli.apply(base_config);

    if let Err(e) = logging::init_logging(&config) {
        eprintln!("Warning: Failed to initialize logging: {}", e);
    }

    config.validate()?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("starting async runtime")?;

    runtime.block_on(migrate(config))
}

#[cfg(feature = "s3-native")]
async fn migrate(config: MigrationConfig) -> anyhow::Result<()> {
    use dstore_migrate::{LocalStore, Migrator};
    use std::sync::Arc;

    let source = dstore_migrate::S3Source::new(&config).await;
    let store = LocalStore::new(config.store_root.clone());

    let report = Migrator::new(Arc::new(source), Arc::new(store), config)
        .run()
        .await?;

    println!("{}", report);
    Ok(())
}

#[cfg(not(feature = "s3-native"))]
async fn migrate(_config: MigrationConfig) -> anyhow::Result<()> {
    Err(MigrateError::Config(
        "built without the s3-native feature, no source available".to_string(),
    )
    .into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_file_values() {
        let cli = Cli::parse_from([
            "dstore-migrate",
            "--allocation",
            "a1",
            "--bucket",
            "photos",
            "--bucket",
            "docs",
            "--concurrency",
            "0",
            "--commit",
        ]);

        let mut base = MigrationConfig::new("from-file");
        base.prefix = "2024/".to_string();
        base.delete_source = true;

        let config = cli.apply(base);
        assert_eq!(config.allocation, "a1");
        assert_eq!(config.buckets, vec!["photos", "docs"]);
        assert_eq!(config.concurrency, 0);
        assert_eq!(config.prefix, "2024/");
        assert!(config.commit);
        assert!(config.delete_source);
    }

    #[test]
    fn test_missing_allocation_is_fatal() {
        let cli = Cli::parse_from(["dstore-migrate", "--bucket", "b1"]);
        let err = cli.apply(MigrationConfig::default()).validate().unwrap_err();
        assert!(matches!(err, MigrateError::Config(_)));
        assert_eq!(err.exit_code(), EXIT_FATAL);
    }

    #[test]
    fn test_exit_code_follows_error_category() {
        let fatal = anyhow::Error::from(MigrateError::Listing {
            container: "b1".to_string(),
            message: "denied".to_string(),
        });
        assert_eq!(exit_code(&fatal), EXIT_FATAL);

        let wrapped = anyhow::Error::from(MigrateError::Config("bad toml".to_string()))
            .context("loading config file app.toml");
        assert_eq!(exit_code(&wrapped), EXIT_FATAL);

        let other = anyhow::anyhow!("runtime unavailable");
        assert_eq!(exit_code(&other), EXIT_FATAL);
    }

    #[test]
    fn test_default_concurrency_kept() {
        let cli = Cli::parse_from(["dstore-migrate", "-a", "a1"]);
        let config = cli.apply(MigrationConfig::default());
        assert_eq!(config.concurrency, dstore_migrate::config::DEFAULT_CONCURRENCY);
    }
}
