/*!
 * dstore-migrate - streaming object store migration
 *
 * Moves objects from an S3-compatible source into a content store allocation:
 * - Streams every object without staging it on local disk
 * - Resumes earlier runs by comparing destination sizes
 * - Bounds the number of simultaneous transfers
 * - Optionally commits metadata and removes migrated source objects
 */

pub mod config;
pub mod destination;
pub mod error;
pub mod logging;
pub mod migrate;
pub mod source;

// Re-export commonly used types
pub use config::{MigrationConfig, WhoPays};
pub use destination::{ContentStore, LocalStore, MemoryStore};
pub use error::{MigrateError, Result};
pub use migrate::{MigrationReport, Migrator};
pub use source::{MemorySource, ObjectSource};

#[cfg(feature = "s3-native")]
pub use source::S3Source;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
