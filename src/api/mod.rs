use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};

use crate::error::{Result, TrackerError};
use crate::metrics::{EnhancedSummary, MetricsAggregator, PlainSummary};
use crate::store::JobStore;
use crate::tracker::{JobEvent, JobRecord, Reconciler};

#[derive(Clone)]
pub struct ApiState {
    pub reconciler: Arc<Reconciler>,
    pub aggregator: Arc<MetricsAggregator>,
    pub store: Arc<dyn JobStore>,
    pub store_timeout: Duration,
}

#[derive(Serialize)]
struct EventResponse {
    success: bool,
    job: Option<JobRecord>,
    error: Option<String>,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, error: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
        }),
    )
}

/// All routes, without CORS. Exposed so tests can drive it directly.
pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/metrics-on-demand", get(metrics_on_demand_handler))
        .route("/metrics-spot", get(metrics_spot_handler))
        .route("/events", post(submit_event_handler))
        .route("/api/jobs", get(list_jobs_handler))
        .route("/api/jobs/{job_id}", get(get_job_handler))
        .with_state(state)
}

/// Serve the API until `shutdown` is cancelled.
pub async fn run_api(addr: SocketAddr, state: ApiState, shutdown: CancellationToken) -> Result<()> {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = router(state).layer(cors);

    tracing::info!(addr = %addr, "Starting metrics API server");

    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        tracing::error!(addr = %addr, error = %e, "Failed to bind metrics API server");
        e
    })?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Metrics API server failed");
            TrackerError::Io(e)
        })?;

    tracing::info!("Metrics API server stopped");
    Ok(())
}

async fn scan_records(state: &ApiState) -> std::result::Result<Vec<JobRecord>, ApiError> {
    match tokio::time::timeout(state.store_timeout, state.store.scan()).await {
        Ok(Ok(records)) => Ok(records),
        Ok(Err(e)) => {
            tracing::error!(error = %e, "Job store scan failed");
            Err(api_error(StatusCode::SERVICE_UNAVAILABLE, e.to_string()))
        }
        Err(_) => {
            tracing::error!("Job store scan timed out");
            Err(api_error(StatusCode::SERVICE_UNAVAILABLE, "job store scan timed out"))
        }
    }
}

async fn metrics_on_demand_handler(
    State(state): State<ApiState>,
) -> std::result::Result<Json<PlainSummary>, ApiError> {
    let records = scan_records(&state).await?;
    let region = state.aggregator.region().to_string();
    Ok(Json(
        state.aggregator.compute_plain_metrics(&records, &region).await,
    ))
}

async fn metrics_spot_handler(
    State(state): State<ApiState>,
) -> std::result::Result<Json<EnhancedSummary>, ApiError> {
    let records = scan_records(&state).await?;
    Ok(Json(state.aggregator.compute_enhanced_metrics(&records).await))
}

async fn submit_event_handler(
    State(state): State<ApiState>,
    Json(payload): Json<Value>,
) -> impl IntoResponse {
    let event = match JobEvent::from_value(&payload) {
        Ok(event) => event,
        Err(e) => {
            tracing::warn!(error = %e, "Rejecting malformed event");
            return (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(EventResponse {
                    success: false,
                    job: None,
                    error: Some(e.to_string()),
                }),
            );
        }
    };

    match state.reconciler.reconcile(&event).await {
        Ok(record) => (
            StatusCode::OK,
            Json(EventResponse {
                success: true,
                job: Some(record),
                error: None,
            }),
        ),
        Err(e) => {
            tracing::error!(job_id = %event.job_id, error = %e, "Failed to reconcile event");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(EventResponse {
                    success: false,
                    job: None,
                    error: Some(e.to_string()),
                }),
            )
        }
    }
}

async fn list_jobs_handler(
    State(state): State<ApiState>,
) -> std::result::Result<Json<Vec<JobRecord>>, ApiError> {
    Ok(Json(scan_records(&state).await?))
}

async fn get_job_handler(
    State(state): State<ApiState>,
    Path(job_id): Path<String>,
) -> std::result::Result<Json<JobRecord>, ApiError> {
    match tokio::time::timeout(state.store_timeout, state.store.get(&job_id)).await {
        Ok(Ok(Some(record))) => Ok(Json(record)),
        Ok(Ok(None)) => Err(api_error(
            StatusCode::NOT_FOUND,
            format!("job {} not found", job_id),
        )),
        Ok(Err(e)) => {
            tracing::error!(job_id = %job_id, error = %e, "Job store read failed");
            Err(api_error(StatusCode::SERVICE_UNAVAILABLE, e.to_string()))
        }
        Err(_) => Err(api_error(
            StatusCode::SERVICE_UNAVAILABLE,
            "job store read timed out",
        )),
    }
}
