use axum::{http::StatusCode, routing::get, Router};
use axum_sql_uploader::UploaderLayer;
use tower_http::cors::CorsLayer;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod config;

use config::ServerConfig;

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn,tiberius=warn")),
        )
        .with(fmt::layer())
        .init();

    let config = ServerConfig::from_env().expect("Invalid server configuration");
    let address = config.socket_address();

    // Create the Axum application router
    let app = Router::new()
        .route("/", get(root_handler))
        .route("/api/health", get(health_handler))
        .merge(
            UploaderLayer::new("/uploader")
                .with_config(config.uploader)
                .into_router(),
        )
        .layer(CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind(address)
        .await
        .unwrap_or_else(|error| panic!("Failed to bind to {}: {}", address, error));

    info!("Server running at http://{}", address);
    info!("Health check at http://{}/api/health", address);
    info!("Uploader API available at http://{}/uploader/api", address);

    axum::serve(listener, app).await.expect("Server error");
}

async fn root_handler() -> &'static str {
    "Welcome to axum-sql-uploader server"
}

async fn health_handler() -> (StatusCode, &'static str) {
    (StatusCode::OK, "Server is healthy")
}
