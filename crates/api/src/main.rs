use anyhow::Result;

mod dispatcher;
mod registry;
mod streaming;
mod ws;
use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use ctxstream_common::{
    BatchAck, BroadcastAck, BroadcastRequest, ClientId, DataItem, DataPayload, DispatchAck, Error as CommonError,
    ErrorResponse, HealthResponse, HealthStatus, MetricsSnapshot, StreamMetrics,
};
use ctxstream_config::{AppConfig, ConfigLoader};
use ctxstream_runtime::{GenerationWorker, LlamaServerGenerator, TemplateEngine};
use dispatcher::{DispatchOutcome, Dispatcher};
use registry::ConnectionRegistry;
use serde_json::json;
use std::{net::SocketAddr, path::PathBuf, sync::Arc, time::{Duration, SystemTime}};
use tokio::signal;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const CONFIG_ENV: &str = "CTXSTREAM_CONFIG";
const BACKEND_HEALTH_TIMEOUT: Duration = Duration::from_secs(2);

/// Output length bounds applied to inbound requests
#[derive(Debug, Clone, Copy)]
pub(crate) struct RequestLimits {
    pub default_max_length: usize,
    pub max_length_limit: usize,
}

impl From<&AppConfig> for RequestLimits {
    fn from(config: &AppConfig) -> Self {
        Self {
            default_max_length: config.generation.default_max_length,
            max_length_limit: config.generation.max_length_limit,
        }
    }
}

#[derive(Clone)]
pub(crate) struct AppState {
    pub registry: ConnectionRegistry,
    pub dispatcher: Dispatcher,
    pub metrics: StreamMetrics,
    pub limits: RequestLimits,
    /// Backend checked by `/health`; none when generation is not server-backed
    pub backend: Option<Arc<LlamaServerGenerator>>,
    pub start_time: SystemTime,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn reject(state: &AppState, error: CommonError) -> ApiError {
    state.metrics.record_rejection();
    let status = StatusCode::from_u16(error.status_code()).unwrap_or(StatusCode::BAD_REQUEST);
    (status, Json(ErrorResponse::from(&error)))
}

fn bad_json(state: &AppState, rejection: JsonRejection) -> ApiError {
    reject(state, CommonError::BadRequest(rejection.body_text()))
}

fn acknowledge(outcome: DispatchOutcome, client_id: &ClientId) -> DispatchAck {
    match outcome {
        DispatchOutcome::Accepted { stream_id } => DispatchAck::accepted(stream_id.to_string()),
        DispatchOutcome::Skipped => DispatchAck::skipped(client_id),
    }
}

async fn process_data(
    State(state): State<AppState>,
    payload: std::result::Result<Json<DataItem>, JsonRejection>,
) -> std::result::Result<(StatusCode, Json<DispatchAck>), ApiError> {
    let Json(item) = payload.map_err(|e| bad_json(&state, e))?;
    info!(client_id = %item.client_id, "Received item to process");

    let request = item
        .into_request(state.limits.default_max_length, state.limits.max_length_limit)
        .map_err(|e| reject(&state, e))?;
    let client_id = request.client_id.clone();

    let outcome = state.dispatcher.dispatch(request);
    Ok((StatusCode::ACCEPTED, Json(acknowledge(outcome, &client_id))))
}

async fn process_batch(
    State(state): State<AppState>,
    payload: std::result::Result<Json<DataPayload>, JsonRejection>,
) -> std::result::Result<(StatusCode, Json<BatchAck>), ApiError> {
    let Json(payload) = payload.map_err(|e| bad_json(&state, e))?;
    info!(items = payload.items.len(), "Received batch to process");

    // Validate everything first so a bad item never leaves a half-dispatched batch
    let requests = payload
        .items
        .into_iter()
        .enumerate()
        .map(|(index, item)| {
            item.into_request(state.limits.default_max_length, state.limits.max_length_limit)
                .map_err(|e| CommonError::BadRequest(format!("item {}: {}", index, e)))
        })
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| reject(&state, e))?;

    let mut ack = BatchAck::default();
    for request in requests {
        match state.dispatcher.dispatch(request) {
            DispatchOutcome::Accepted { stream_id } => {
                ack.accepted += 1;
                ack.stream_ids.push(stream_id.to_string());
            }
            DispatchOutcome::Skipped => ack.skipped += 1,
        }
    }

    Ok((StatusCode::ACCEPTED, Json(ack)))
}

async fn broadcast(
    State(state): State<AppState>,
    payload: std::result::Result<Json<BroadcastRequest>, JsonRejection>,
) -> std::result::Result<Json<BroadcastAck>, ApiError> {
    let Json(request) = payload.map_err(|e| bad_json(&state, e))?;
    let ack = state.registry.broadcast(&request.message).await;
    info!(delivered = ack.delivered, dropped = ack.dropped, "Broadcast sent");
    Ok(Json(ack))
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let uptime = state.start_time.elapsed().unwrap_or_default().as_secs();

    let status = match &state.backend {
        Some(backend) => match tokio::time::timeout(BACKEND_HEALTH_TIMEOUT, backend.health()).await {
            Ok(true) => HealthStatus::Healthy,
            Ok(false) | Err(_) => {
                warn!("Generation backend failed its health check");
                HealthStatus::Degraded
            }
        },
        None => HealthStatus::Healthy,
    };

    Json(HealthResponse {
        status,
        connected_clients: state.registry.connected_clients(),
        active_streams: state.registry.active_streams(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: uptime,
    })
}

async fn version() -> Json<serde_json::Value> {
    Json(json!({
        "version": env!("CARGO_PKG_VERSION"),
        "api": "ctxstream streaming API",
        "transport": "WebSocket"
    }))
}

async fn get_metrics(State(state): State<AppState>) -> Json<MetricsSnapshot> {
    Json(state.metrics.snapshot())
}

pub(crate) fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/context-llm-api/process-data", post(process_data))
        .route("/context-llm-api/process-batch", post(process_batch))
        .route("/context-llm-api/broadcast", post(broadcast))
        .route("/ws/{client_id}", get(ws::ws_handler))
        .route("/healthz", get(health_check))
        .route("/health", get(health_check))
        .route("/version", get(version))
        .route("/metrics", get(get_metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn shutdown_signal(registry: ConnectionRegistry) {
    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl+C signal"),
        () = terminate => info!("Received SIGTERM signal"),
    }

    info!("Shutdown signal received, terminating gracefully...");
    registry.shutdown();
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive(tracing::Level::INFO.into()))
        .init();

    info!("Starting ctxstream server");

    // Load configuration
    let config_path = std::env::var_os(CONFIG_ENV).map(PathBuf::from);
    let config = ConfigLoader::load(config_path.as_ref())?;
    config.validate()?;

    let generator = Arc::new(LlamaServerGenerator::new(
        &config.generation,
        TemplateEngine::stop_sequences(&config.template),
        tokio::runtime::Handle::current(),
    )?);
    if generator.health().await {
        info!("Generation backend ready at {}", config.generation.backend_url);
    } else {
        warn!("Generation backend at {} is not reachable yet", config.generation.backend_url);
    }

    let registry = ConnectionRegistry::new();
    let metrics = StreamMetrics::new();
    let worker = GenerationWorker::new(
        generator.clone(),
        config.template.clone(),
        config.generation.system_prompt.clone(),
    );
    let dispatcher = Dispatcher::new(
        registry.clone(),
        worker,
        metrics.clone(),
        config.generation.channel_capacity,
    );

    let state = AppState {
        registry: registry.clone(),
        dispatcher,
        metrics,
        limits: RequestLimits::from(&config),
        backend: Some(generator),
        start_time: SystemTime::now(),
    };

    let app = build_router(state);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(registry))
        .await?;

    info!("Server stopped");
    Ok(())
}
