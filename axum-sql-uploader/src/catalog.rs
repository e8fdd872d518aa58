//! Catalog enumeration
//!
//! Every backend answers "which databases can I pick?" differently: MySQL
//! lists databases, SQL Server lists databases including its own system
//! ones, and Oracle has a single database whose schemas stand in for
//! databases. This module turns each backend's discovery rows into one
//! uniform list.

use crate::database::traits::{CatalogRow, DatabaseProvider};
use crate::descriptor::BackendKind;
use crate::dialect::MSSQL_LAST_SYSTEM_DATABASE_ID;
use crate::Result;
use std::collections::BTreeSet;
use tracing::debug;

/// A selectable database (or schema) name
pub type CatalogEntry = String;

/// Apply the backend's catalog policy to raw discovery rows
///
/// * MySQL: every row, in server order
/// * SQL Server: only rows whose `database_id` is above the system range
/// * Oracle: distinct names, sorted ascending
pub fn resolve_catalog(backend: BackendKind, rows: Vec<CatalogRow>) -> Vec<CatalogEntry> {
    match backend {
        BackendKind::Mysql => rows.into_iter().map(|row| row.name).collect(),
        BackendKind::Mssql => rows
            .into_iter()
            .filter(|row| {
                row.database_id
                    .is_some_and(|identifier| identifier > MSSQL_LAST_SYSTEM_DATABASE_ID)
            })
            .map(|row| row.name)
            .collect(),
        BackendKind::Oracle => rows
            .into_iter()
            .map(|row| row.name)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect(),
    }
}

/// List the databases visible to the provider's session
pub async fn list_databases(provider: &mut dyn DatabaseProvider) -> Result<Vec<CatalogEntry>> {
    let backend = provider.backend();
    let rows = provider.discover_catalog().await?;
    let discovered = rows.len();
    let entries = resolve_catalog(backend, rows);

    debug!(
        backend = %backend,
        discovered,
        listed = entries.len(),
        "Enumerated catalog"
    );

    Ok(entries)
}
