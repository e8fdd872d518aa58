//! Connection descriptor builder
//!
//! Turns user-supplied connection parameters into a fully resolved,
//! backend-specific connection target. Nothing in here touches the network,
//! so every rule can be checked without a live database.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Administrative database used by SQL Server when only the catalog is needed
pub const SQL_SERVER_ADMIN_DATABASE: &str = "master";

/// Pinned client protocol used for SQL Server connections
pub const SQL_SERVER_DRIVER: &str = "tds73";

/// Service name used for Oracle when the caller does not supply one
pub const DEFAULT_ORACLE_SERVICE: &str = "orcl";

/// Supported relational database families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// MySQL and MariaDB
    Mysql,
    /// Microsoft SQL Server
    Mssql,
    /// Oracle Database
    Oracle,
}

impl BackendKind {
    /// Every backend, in the order presented to users
    pub const ALL: [BackendKind; 3] = [BackendKind::Mysql, BackendKind::Mssql, BackendKind::Oracle];

    /// Port used when the caller leaves it blank
    pub fn default_port(self) -> u16 {
        match self {
            BackendKind::Mysql => 3306,
            BackendKind::Mssql => 1433,
            BackendKind::Oracle => 1521,
        }
    }

    /// Wire identifier (`mysql`, `mssql`, `oracle`)
    pub fn as_str(self) -> &'static str {
        match self {
            BackendKind::Mysql => "mysql",
            BackendKind::Mssql => "mssql",
            BackendKind::Oracle => "oracle",
        }
    }

    /// Human readable product name
    pub fn label(self) -> &'static str {
        match self {
            BackendKind::Mysql => "MySQL",
            BackendKind::Mssql => "SQL Server",
            BackendKind::Oracle => "Oracle",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "mysql" => Ok(BackendKind::Mysql),
            "mssql" => Ok(BackendKind::Mssql),
            "oracle" => Ok(BackendKind::Oracle),
            _ => Err(Error::UnsupportedBackend(value.to_string())),
        }
    }
}

/// Connection parameters supplied by the caller for a single operation
///
/// The password only lives as long as the operation that received it and is
/// redacted from `Debug` output.
#[derive(Clone)]
pub struct ConnectionParams {
    pub backend: BackendKind,
    pub host: String,
    pub port: Option<u16>,
    pub username: String,
    pub password: String,
    pub database: Option<String>,
    /// Oracle service name override
    pub service_name: Option<String>,
}

impl fmt::Debug for ConnectionParams {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("ConnectionParams")
            .field("backend", &self.backend)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("database", &self.database)
            .field("service_name", &self.service_name)
            .finish()
    }
}

/// Where a connection lands once it is open
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectTarget {
    /// The server itself, no default database
    Server,
    /// A named database
    Database(String),
    /// An Oracle service; schemas are chosen after connecting
    Service(String),
}

/// Fully resolved, backend-specific connection target
///
/// Derived from [`ConnectionParams`] on every operation and never cached.
#[derive(Clone)]
pub struct ConnectionDescriptor {
    pub backend: BackendKind,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub(crate) password: String,
    pub target: ConnectTarget,
    /// Oracle schema to work in after connecting
    pub schema: Option<String>,
    /// Client protocol pinned for driver-mediated backends
    pub driver: Option<&'static str>,
}

impl fmt::Debug for ConnectionDescriptor {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("ConnectionDescriptor")
            .field("target", &self.connection_target())
            .field("schema", &self.schema)
            .finish()
    }
}

impl ConnectionDescriptor {
    /// Database name the connection opens into, if any
    pub fn database(&self) -> Option<&str> {
        match &self.target {
            ConnectTarget::Database(name) => Some(name),
            _ => None,
        }
    }

    /// Render the connection target as a URL without the password
    ///
    /// Safe to log.
    pub fn connection_target(&self) -> String {
        let authority = format!(
            "{}://{}@{}:{}",
            self.backend, self.username, self.host, self.port
        );

        match (&self.target, self.driver) {
            (ConnectTarget::Server, _) => authority,
            (ConnectTarget::Database(name), Some(driver)) => {
                format!("{}/{}?driver={}", authority, name, driver)
            }
            (ConnectTarget::Database(name), None) => format!("{}/{}", authority, name),
            (ConnectTarget::Service(service), _) => {
                format!("{}/?service_name={}", authority, service)
            }
        }
    }

    /// Oracle EZConnect string (`//host:port/service`)
    pub fn easy_connect_string(&self) -> Option<String> {
        match &self.target {
            ConnectTarget::Service(service) => {
                Some(format!("//{}:{}/{}", self.host, self.port, service))
            }
            _ => None,
        }
    }
}

fn non_empty(value: &str) -> bool {
    !value.trim().is_empty()
}

fn required_database(params: &ConnectionParams) -> Result<String> {
    params
        .database
        .as_deref()
        .filter(|name| non_empty(name))
        .map(str::to_string)
        .ok_or_else(|| Error::Config("a database must be selected".to_string()))
}

/// Build the connection descriptor for one operation
///
/// When `for_catalog` is true the descriptor points at whatever the backend
/// needs to enumerate databases; otherwise it points at `params.database`.
///
/// # Errors
///
/// * `Error::Config` when host, username or password is empty, or when a
///   database is required but missing
pub fn build(params: &ConnectionParams, for_catalog: bool) -> Result<ConnectionDescriptor> {
    let mut missing = Vec::new();
    if !non_empty(&params.host) {
        missing.push("host");
    }
    if !non_empty(&params.username) {
        missing.push("username");
    }
    if params.password.is_empty() {
        missing.push("password");
    }
    if !missing.is_empty() {
        return Err(Error::Config(format!("missing {}", missing.join(", "))));
    }

    let backend = params.backend;
    let port = params.port.unwrap_or_else(|| backend.default_port());

    let (target, schema, driver) = match backend {
        BackendKind::Mysql => {
            let target = if for_catalog {
                ConnectTarget::Server
            } else {
                ConnectTarget::Database(required_database(params)?)
            };
            (target, None, None)
        }
        BackendKind::Mssql => {
            let target = if for_catalog {
                ConnectTarget::Database(SQL_SERVER_ADMIN_DATABASE.to_string())
            } else {
                ConnectTarget::Database(required_database(params)?)
            };
            (target, None, Some(SQL_SERVER_DRIVER))
        }
        BackendKind::Oracle => {
            let service = params
                .service_name
                .as_deref()
                .filter(|name| non_empty(name))
                .unwrap_or(DEFAULT_ORACLE_SERVICE)
                .to_string();
            let schema = if for_catalog {
                None
            } else {
                params
                    .database
                    .as_deref()
                    .filter(|name| non_empty(name))
                    .map(str::to_string)
            };
            (ConnectTarget::Service(service), schema, None)
        }
    };

    Ok(ConnectionDescriptor {
        backend,
        host: params.host.trim().to_string(),
        port,
        username: params.username.trim().to_string(),
        password: params.password.clone(),
        target,
        schema,
        driver,
    })
}
