//! Database abstraction layer
//!
//! One provider per backend, each behind its own cargo feature. Providers
//! hold a single connection that lives for one connect or upload operation.

pub mod traits;

#[cfg(feature = "mysql")]
pub mod mysql;

#[cfg(feature = "mssql")]
pub mod mssql;

#[cfg(feature = "oracle")]
pub mod oracle;

// Re-export the main trait
pub use traits::{DatabaseError, DatabaseProvider};

use crate::config::UploaderConfig;
use crate::descriptor::{BackendKind, ConnectionDescriptor};
use crate::Result;

/// Open a provider for the backend named in `descriptor`
///
/// # Errors
///
/// * `Error::UnsupportedBackend` when the backend's feature is not compiled in
/// * `Error::Database(DatabaseError::Connection)` when the server cannot be reached
pub async fn connect(
    descriptor: &ConnectionDescriptor,
    config: &UploaderConfig,
) -> Result<Box<dyn DatabaseProvider>> {
    match descriptor.backend {
        #[cfg(feature = "mysql")]
        BackendKind::Mysql => Ok(Box::new(
            self::mysql::MysqlProvider::connect(descriptor, config).await?,
        )),

        #[cfg(feature = "mssql")]
        BackendKind::Mssql => Ok(Box::new(
            self::mssql::MssqlProvider::connect(descriptor, config).await?,
        )),

        #[cfg(feature = "oracle")]
        BackendKind::Oracle => Ok(Box::new(
            self::oracle::OracleProvider::connect(descriptor, config).await?,
        )),

        #[allow(unreachable_patterns)]
        backend => {
            Err(crate::Error::UnsupportedBackend(format!(
                "{} support is not compiled in",
                backend.label()
            )))
        }
    }
}
