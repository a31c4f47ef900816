use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::{routing::get, Json, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gateway_metrics::{telemetry, AppConfig, InstrumentationLayer};

pub struct AppState {
    pub metrics: PrometheusHandle,
}

#[derive(Debug, Serialize)]
struct UserResponse {
    id: String,
}

#[derive(Debug, Serialize)]
struct OrderResponse {
    user_id: String,
    order_id: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gateway_metrics=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = AppConfig::load()?;

    tracing::info!("Starting gateway-metrics v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Environment: {}", config.environment);

    let metrics = telemetry::init_metrics()?;
    let instrumentation = InstrumentationLayer::new(&config.instrumentation)?;
    let state = Arc::new(AppState { metrics });

    // Build router
    let app = Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(render_metrics))
        .route("/users/:id", get(get_user))
        .route("/users/:id/orders/:order_id", get(get_order))
        .layer(instrumentation.clone())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Flushing pending metrics");
    instrumentation.shutdown().await;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        return;
    }
    tracing::info!("Shutdown signal received");
}

async fn health_check() -> &'static str {
    "OK"
}

async fn render_metrics(State(state): State<Arc<AppState>>) -> String {
    state.metrics.render()
}

async fn get_user(Path(id): Path<String>) -> Json<UserResponse> {
    Json(UserResponse { id })
}

async fn get_order(Path((user_id, order_id)): Path<(String, String)>) -> Json<OrderResponse> {
    Json(OrderResponse { user_id, order_id })
}
