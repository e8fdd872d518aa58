//! Connect and upload flows
//!
//! Each flow validates its input, opens a fresh connection, does its work and
//! closes the connection again on every exit path. Failures never escape:
//! they come back as an error status carrying the cause.

use crate::catalog::{list_databases, CatalogEntry};
use crate::config::UploaderConfig;
use crate::database::{self, DatabaseError, DatabaseProvider};
use crate::dataset::{decode_upload, TabularDataset};
use crate::descriptor::{self, BackendKind, ConnectionDescriptor, ConnectionParams};
use crate::inference::infer;
use crate::ingest::{ingest, IngestionTarget};
use crate::schema::{ConnectRequest, ConnectResponse, StatusKind, UploadRequest, UploadResponse};
use crate::{Error, Result};
use async_trait::async_trait;
use std::borrow::Cow;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Opens provider connections for the orchestrator
#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(
        &self,
        descriptor: &ConnectionDescriptor,
        config: &UploaderConfig,
    ) -> Result<Box<dyn DatabaseProvider>>;
}

/// Connector backed by the compiled-in database drivers
#[derive(Debug, Clone, Copy, Default)]
pub struct DriverConnector;

#[async_trait]
impl Connector for DriverConnector {
    async fn open(
        &self,
        descriptor: &ConnectionDescriptor,
        config: &UploaderConfig,
    ) -> Result<Box<dyn DatabaseProvider>> {
        database::connect(descriptor, config).await
    }
}

/// States of the connect flow
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectStage {
    Idle,
    Validating,
    Connecting,
    Enumerating,
    Connected,
    Failed,
}

/// States of the upload flow
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadStage {
    Idle,
    Validating,
    Parsing,
    Inferring,
    Ingesting,
    Done,
    Failed,
}

/// Current stage of one flow invocation, logged on every transition
struct Progress<S> {
    flow: &'static str,
    stage: S,
}

impl<S: Copy + std::fmt::Debug> Progress<S> {
    fn new(flow: &'static str, stage: S) -> Self {
        Self { flow, stage }
    }

    fn enter(&mut self, stage: S) {
        debug!(flow = self.flow, from = ?self.stage, to = ?stage, "Stage transition");
        self.stage = stage;
    }
}

/// File contents as delivered by the caller
enum FileBytes<'a> {
    /// Base64, optionally inside a data URL
    Encoded(&'a str),
    Raw(&'a [u8]),
}

impl<'a> FileBytes<'a> {
    fn decode(&self) -> Result<Cow<'a, [u8]>> {
        match *self {
            FileBytes::Encoded(contents) => Ok(Cow::Owned(decode_upload(contents)?)),
            FileBytes::Raw(bytes) => Ok(Cow::Borrowed(bytes)),
        }
    }
}

/// Runs the connect and upload flows
///
/// Holds no per-user state: every call carries its own credentials and opens
/// its own connection.
#[derive(Clone)]
pub struct Orchestrator {
    config: UploaderConfig,
    connector: Arc<dyn Connector>,
}

impl Orchestrator {
    /// Orchestrator using the compiled-in database drivers
    pub fn new(config: UploaderConfig) -> Self {
        Self::with_connector(config, Arc::new(DriverConnector))
    }

    /// Orchestrator opening connections through `connector`
    pub fn with_connector(config: UploaderConfig, connector: Arc<dyn Connector>) -> Self {
        Self { config, connector }
    }

    pub fn config(&self) -> &UploaderConfig {
        &self.config
    }

    /// Connect flow: validate, connect, enumerate the catalog
    ///
    /// # Returns
    ///
    /// The selectable databases and a success status, or an empty list and
    /// an error status describing what went wrong
    pub async fn connect(&self, request: ConnectRequest) -> ConnectResponse {
        let mut progress = Progress::new("connect", ConnectStage::Idle);

        match self.run_connect(&request, &mut progress).await {
            Ok(databases) => {
                progress.enter(ConnectStage::Connected);
                ConnectResponse {
                    databases,
                    status_text: "Connected successfully!".to_string(),
                    status_kind: StatusKind::Success,
                }
            }
            Err(error) => {
                warn!(
                    stage = ?progress.stage,
                    kind = error.kind(),
                    "Connect failed: {}",
                    error
                );
                progress.enter(ConnectStage::Failed);
                ConnectResponse {
                    databases: Vec::new(),
                    status_text: connect_failure_text(&error),
                    status_kind: StatusKind::Error,
                }
            }
        }
    }

    /// Upload flow: validate, parse, infer, then replace the target table
    ///
    /// Destructive: a table named after the file is dropped and recreated.
    pub async fn upload(&self, request: UploadRequest) -> UploadResponse {
        let params = ConnectionParamsInput {
            backend: &request.backend,
            host: &request.host,
            port: request.port,
            username: &request.username,
            password: &request.password,
            database: request.database.as_deref(),
            service_name: request.service_name.as_deref(),
        };

        self.upload_with(
            params,
            &request.file_name,
            FileBytes::Encoded(&request.file_contents),
        )
        .await
    }

    /// Upload flow for callers that already hold the raw file bytes
    pub async fn upload_bytes(
        &self,
        params: ConnectionParams,
        file_name: &str,
        bytes: &[u8],
    ) -> UploadResponse {
        let backend = params.backend.as_str();
        let input = ConnectionParamsInput {
            backend,
            host: &params.host,
            port: params.port,
            username: &params.username,
            password: &params.password,
            database: params.database.as_deref(),
            service_name: params.service_name.as_deref(),
        };

        self.upload_with(input, file_name, FileBytes::Raw(bytes)).await
    }

    async fn upload_with(
        &self,
        params: ConnectionParamsInput<'_>,
        file_name: &str,
        file: FileBytes<'_>,
    ) -> UploadResponse {
        let mut progress = Progress::new("upload", UploadStage::Idle);

        match self.run_upload(params, file_name, file, &mut progress).await {
            Ok(target) => {
                progress.enter(UploadStage::Done);
                UploadResponse {
                    status_text: format!(
                        "Uploaded {} to table {} successfully!",
                        file_name, target.table
                    ),
                    status_kind: StatusKind::Success,
                }
            }
            Err(error) => {
                warn!(
                    stage = ?progress.stage,
                    kind = error.kind(),
                    "Upload of {} failed: {}",
                    file_name,
                    error
                );
                progress.enter(UploadStage::Failed);
                UploadResponse {
                    status_text: format!("Upload failed: {}", error),
                    status_kind: StatusKind::Error,
                }
            }
        }
    }

    async fn run_connect(
        &self,
        request: &ConnectRequest,
        progress: &mut Progress<ConnectStage>,
    ) -> Result<Vec<CatalogEntry>> {
        progress.enter(ConnectStage::Validating);
        let params = self.resolve_params(ConnectionParamsInput {
            backend: &request.backend,
            host: &request.host,
            port: request.port,
            username: &request.username,
            password: &request.password,
            database: None,
            service_name: request.service_name.as_deref(),
        })?;
        let descriptor = descriptor::build(&params, true)?;

        progress.enter(ConnectStage::Connecting);
        let mut provider = self.open(&descriptor).await?;

        progress.enter(ConnectStage::Enumerating);
        let listed = bounded(
            self.config.query_timeout,
            "catalog query",
            list_databases(provider.as_mut()),
        )
        .await;
        release(provider).await;

        let databases = listed?;
        info!(
            "Listed {} databases on {}",
            databases.len(),
            descriptor.connection_target()
        );
        Ok(databases)
    }

    async fn run_upload(
        &self,
        params: ConnectionParamsInput<'_>,
        file_name: &str,
        file: FileBytes<'_>,
        progress: &mut Progress<UploadStage>,
    ) -> Result<IngestionTarget> {
        progress.enter(UploadStage::Validating);
        let params = self.resolve_params(params)?;
        let database = params
            .database
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .ok_or_else(|| Error::Config("a database must be selected".to_string()))?
            .to_string();
        let descriptor = descriptor::build(&params, false)?;
        let target = IngestionTarget::from_file_name(database, file_name)?;

        progress.enter(UploadStage::Parsing);
        let bytes = file.decode()?;
        if bytes.len() > self.config.max_upload_bytes {
            return Err(Error::Parse(format!(
                "file is {} bytes, above the {} byte limit",
                bytes.len(),
                self.config.max_upload_bytes
            )));
        }
        let dataset = TabularDataset::parse(&bytes)?;
        debug!(
            rows = dataset.row_count(),
            columns = dataset.columns.len(),
            "Parsed {}",
            file_name
        );

        progress.enter(UploadStage::Inferring);
        let schema = infer(&dataset);
        debug!(columns = ?schema.types().collect::<Vec<_>>(), "Inferred schema");

        progress.enter(UploadStage::Ingesting);
        let mut provider = self.open(&descriptor).await?;
        // Providers enforce ingest_timeout themselves
        let written = ingest(provider.as_mut(), &target, &dataset, &schema).await;
        release(provider).await;

        written?;
        Ok(target)
    }

    fn resolve_params(&self, input: ConnectionParamsInput<'_>) -> Result<ConnectionParams> {
        let backend: BackendKind = input.backend.parse()?;
        let service_name = input
            .service_name
            .filter(|name| !name.trim().is_empty())
            .unwrap_or(&self.config.oracle_service_name)
            .to_string();

        Ok(ConnectionParams {
            backend,
            host: input.host.trim().to_string(),
            port: input.port,
            username: input.username.trim().to_string(),
            password: input.password.to_string(),
            database: input.database.map(str::to_string),
            service_name: Some(service_name),
        })
    }

    async fn open(&self, descriptor: &ConnectionDescriptor) -> Result<Box<dyn DatabaseProvider>> {
        let limit = self.config.connect_timeout;

        match timeout(limit, self.connector.open(descriptor, &self.config)).await {
            Ok(opened) => opened,
            Err(_) => Err(DatabaseError::Connection(format!(
                "timed out after {}s connecting to {}",
                limit.as_secs_f32(),
                descriptor.connection_target()
            ))
            .into()),
        }
    }
}

/// Borrowed connection fields, before the backend name is resolved
struct ConnectionParamsInput<'a> {
    backend: &'a str,
    host: &'a str,
    port: Option<u16>,
    username: &'a str,
    password: &'a str,
    database: Option<&'a str>,
    service_name: Option<&'a str>,
}

/// Run `operation`, reporting expiry as a query error
async fn bounded<T>(
    limit: Duration,
    what: &str,
    operation: impl std::future::Future<Output = Result<T>>,
) -> Result<T> {
    match timeout(limit, operation).await {
        Ok(result) => result,
        Err(_) => Err(DatabaseError::Query(format!(
            "{} timed out after {}s",
            what,
            limit.as_secs_f32()
        ))
        .into()),
    }
}

async fn release(provider: Box<dyn DatabaseProvider>) {
    let backend = provider.backend();
    if let Err(error) = provider.close().await {
        warn!(backend = %backend, "Failed to close connection: {}", error);
    }
}

fn connect_failure_text(error: &Error) -> String {
    match error {
        Error::Config(message) => format!("Missing connection details: {}", message),
        Error::UnsupportedBackend(name) => format!("Invalid DB type: {}", name),
        other => format!("Connection failed: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::traits::CatalogRow;
    use crate::inference::{ColumnType, InferredSchema};
    use crate::ingest::CellValue;
    use base64::{engine::general_purpose, Engine as _};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Table as stored by the in-memory server: column layout and row count
    type StoredTable = (Vec<(String, ColumnType)>, usize);

    #[derive(Default)]
    struct InMemoryServer {
        catalog: Vec<CatalogRow>,
        tables: Mutex<HashMap<(String, String), StoredTable>>,
        opened: AtomicUsize,
        closed: AtomicUsize,
        refuse_connections: bool,
        reject_rows: bool,
        hang_on_connect: bool,
    }

    impl InMemoryServer {
        fn table(&self, database: &str, table: &str) -> Option<StoredTable> {
            self.tables
                .lock()
                .unwrap()
                .get(&(database.to_string(), table.to_string()))
                .cloned()
        }
    }

    struct InMemoryConnector(Arc<InMemoryServer>);

    #[async_trait]
    impl Connector for InMemoryConnector {
        async fn open(
            &self,
            descriptor: &ConnectionDescriptor,
            _config: &UploaderConfig,
        ) -> Result<Box<dyn DatabaseProvider>> {
            if self.0.hang_on_connect {
                tokio::time::sleep(Duration::from_secs(30)).await;
            }
            if self.0.refuse_connections {
                return Err(DatabaseError::Connection("connection refused".to_string()).into());
            }
            self.0.opened.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(InMemoryProvider {
                backend: descriptor.backend,
                server: Arc::clone(&self.0),
            }))
        }
    }

    struct InMemoryProvider {
        backend: BackendKind,
        server: Arc<InMemoryServer>,
    }

    #[async_trait]
    impl DatabaseProvider for InMemoryProvider {
        fn backend(&self) -> BackendKind {
            self.backend
        }

        async fn discover_catalog(&mut self) -> std::result::Result<Vec<CatalogRow>, DatabaseError> {
            Ok(self.server.catalog.clone())
        }

        async fn replace_table(
            &mut self,
            target: &IngestionTarget,
            schema: &InferredSchema,
            rows: &[Vec<CellValue>],
        ) -> std::result::Result<u64, DatabaseError> {
            if self.server.reject_rows {
                return Err(DatabaseError::Data("row 1 rejected".to_string()));
            }
            let columns = schema
                .columns
                .iter()
                .map(|column| (column.name.clone(), column.column_type))
                .collect();
            self.server.tables.lock().unwrap().insert(
                (target.database.clone(), target.table.clone()),
                (columns, rows.len()),
            );
            Ok(rows.len() as u64)
        }

        async fn close(self: Box<Self>) -> std::result::Result<(), DatabaseError> {
            self.server.closed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn orchestrator(server: &Arc<InMemoryServer>) -> Orchestrator {
        Orchestrator::with_connector(
            UploaderConfig::default(),
            Arc::new(InMemoryConnector(Arc::clone(server))),
        )
    }

    fn connect_request(backend: &str) -> ConnectRequest {
        ConnectRequest {
            backend: backend.to_string(),
            host: "db.local".to_string(),
            port: None,
            username: "loader".to_string(),
            password: "secret".to_string(),
            service_name: None,
        }
    }

    fn upload_request(file_name: &str, csv: &str) -> UploadRequest {
        UploadRequest {
            backend: "mysql".to_string(),
            host: "db.local".to_string(),
            port: Some(3307),
            username: "loader".to_string(),
            password: "secret".to_string(),
            database: Some("sales".to_string()),
            service_name: None,
            file_name: file_name.to_string(),
            file_contents: general_purpose::STANDARD.encode(csv),
        }
    }

    fn with_id(name: &str, database_id: i64) -> CatalogRow {
        CatalogRow {
            name: name.to_string(),
            database_id: Some(database_id),
        }
    }

    #[tokio::test]
    async fn test_connect_lists_user_databases_only() {
        let server = Arc::new(InMemoryServer {
            catalog: vec![
                with_id("master", 1),
                with_id("tempdb", 2),
                with_id("model", 3),
                with_id("msdb", 4),
                with_id("reporting", 7),
            ],
            ..Default::default()
        });

        let response = orchestrator(&server).connect(connect_request("mssql")).await;

        assert_eq!(response.status_kind, StatusKind::Success);
        assert_eq!(response.status_text, "Connected successfully!");
        assert_eq!(response.databases, ["reporting"]);
        assert_eq!(server.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_connect_missing_details_never_connects() {
        let server = Arc::new(InMemoryServer::default());
        let mut request = connect_request("mysql");
        request.password = String::new();

        let response = orchestrator(&server).connect(request).await;

        assert_eq!(response.status_kind, StatusKind::Error);
        assert!(response.status_text.starts_with("Missing connection details"));
        assert!(response.databases.is_empty());
        assert_eq!(server.opened.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_connect_unknown_backend() {
        let server = Arc::new(InMemoryServer::default());
        let response = orchestrator(&server).connect(connect_request("sqlite")).await;

        assert_eq!(response.status_kind, StatusKind::Error);
        assert_eq!(response.status_text, "Invalid DB type: sqlite");
    }

    #[tokio::test]
    async fn test_connect_failure_reports_cause() {
        let server = Arc::new(InMemoryServer {
            refuse_connections: true,
            ..Default::default()
        });
        let response = orchestrator(&server).connect(connect_request("oracle")).await;

        assert_eq!(response.status_kind, StatusKind::Error);
        assert!(response.status_text.starts_with("Connection failed:"));
        assert!(response.status_text.contains("connection refused"));
        assert!(response.databases.is_empty());
    }

    #[tokio::test]
    async fn test_connect_timeout_is_a_connection_error() {
        let server = Arc::new(InMemoryServer {
            hang_on_connect: true,
            ..Default::default()
        });
        let config = UploaderConfig {
            connect_timeout: Duration::from_millis(20),
            ..UploaderConfig::default()
        };
        let orchestrator =
            Orchestrator::with_connector(config, Arc::new(InMemoryConnector(Arc::clone(&server))));

        let response = orchestrator.connect(connect_request("mysql")).await;

        assert_eq!(response.status_kind, StatusKind::Error);
        assert!(response.status_text.contains("Connection error: timed out"));
    }

    #[tokio::test]
    async fn test_upload_replaces_existing_table() {
        let server = Arc::new(InMemoryServer::default());
        let orchestrator = orchestrator(&server);

        let first = orchestrator
            .upload(upload_request("orders.csv", "id,amount\n1,10.5\n2,3\n"))
            .await;
        assert_eq!(first.status_kind, StatusKind::Success);
        assert_eq!(
            first.status_text,
            "Uploaded orders.csv to table orders successfully!"
        );

        let second = orchestrator
            .upload(upload_request(
                "orders.csv",
                "id,customer,shipped\n1,ann,true\n2,bob,false\n3,cy,true\n",
            ))
            .await;
        assert_eq!(second.status_kind, StatusKind::Success);

        let (columns, rows) = server.table("sales", "orders").unwrap();
        assert_eq!(
            columns,
            [
                ("id".to_string(), ColumnType::Integer),
                ("customer".to_string(), ColumnType::Text),
                ("shipped".to_string(), ColumnType::Boolean),
            ]
        );
        assert_eq!(rows, 3);
        assert_eq!(
            server.opened.load(Ordering::SeqCst),
            server.closed.load(Ordering::SeqCst)
        );
    }

    #[tokio::test]
    async fn test_upload_malformed_csv_is_an_error() {
        let server = Arc::new(InMemoryServer::default());
        let response = orchestrator(&server)
            .upload(upload_request("orders.csv", "id,amount\n1,2,3\n"))
            .await;

        assert_eq!(response.status_kind, StatusKind::Error);
        assert!(response.status_text.starts_with("Upload failed: Parse error"));
        assert_eq!(server.opened.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_upload_closes_connection_on_failure() {
        let server = Arc::new(InMemoryServer {
            reject_rows: true,
            ..Default::default()
        });
        let response = orchestrator(&server)
            .upload(upload_request("orders.csv", "id\n1\n"))
            .await;

        assert_eq!(response.status_kind, StatusKind::Error);
        assert!(response.status_text.contains("row 1 rejected"));
        assert_eq!(server.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_upload_requires_database() {
        let server = Arc::new(InMemoryServer::default());
        let mut request = upload_request("orders.csv", "id\n1\n");
        request.database = None;

        let response = orchestrator(&server).upload(request).await;

        assert_eq!(response.status_kind, StatusKind::Error);
        assert_eq!(server.opened.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_upload_bytes_accepts_raw_file() {
        let server = Arc::new(InMemoryServer::default());
        let params = ConnectionParams {
            backend: BackendKind::Oracle,
            host: "db.local".to_string(),
            port: None,
            username: "loader".to_string(),
            password: "secret".to_string(),
            database: Some("HR".to_string()),
            service_name: None,
        };

        let response = orchestrator(&server)
            .upload_bytes(params, "2024 staff.csv", b"name,joined\nann,2024-01-02\n")
            .await;

        assert_eq!(response.status_kind, StatusKind::Success);
        let (columns, rows) = server.table("HR", "t_2024_staff").unwrap();
        assert_eq!(columns[1].1, ColumnType::Timestamp);
        assert_eq!(rows, 1);
    }

    #[tokio::test]
    async fn test_upload_rejects_oversized_file() {
        let server = Arc::new(InMemoryServer::default());
        let config = UploaderConfig {
            max_upload_bytes: 4,
            ..UploaderConfig::default()
        };
        let orchestrator =
            Orchestrator::with_connector(config, Arc::new(InMemoryConnector(Arc::clone(&server))));

        let response = orchestrator
            .upload(upload_request("orders.csv", "id\n1\n2\n"))
            .await;

        assert_eq!(response.status_kind, StatusKind::Error);
        assert!(response.status_text.contains("byte limit"));
    }
}
