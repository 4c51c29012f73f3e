use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};

use crate::error::SnowcastError;
use crate::scheduler::{Admission, JobResult, JobStatus, RunStatus};
use crate::worker::catalog::{list_artifacts, ArtifactEntry};

#[derive(Clone)]
pub struct ApiState {
    pub admission: Admission,
    pub data_dir: Arc<PathBuf>,
}

#[derive(Deserialize)]
pub struct RunModelRequest {
    #[serde(default)]
    pub lake: String,
    #[serde(default)]
    pub date: String,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct RunModelResponse {
    pub success: bool,
    pub run_id: String,
    pub status: JobStatus,
    pub queue_position: usize,
    pub active_runs: usize,
    pub max_runs: usize,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct ErrorResponse {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub success: Option<bool>,
    pub error: String,
}

/// Terminal outcome as clients see it.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ResultBody {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub folder_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub data_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<String>,
}

impl From<JobResult> for ResultBody {
    fn from(result: JobResult) -> Self {
        match result {
            JobResult::Completed(location) => ResultBody {
                success: true,
                folder_name: Some(location.folder_name),
                data_path: Some(location.data_path),
                error: None,
            },
            JobResult::Failed { message } => ResultBody {
                success: false,
                folder_name: None,
                data_path: None,
                error: Some(message),
            },
        }
    }
}

/// Poll answer; the pending fields and `result` never appear together.
#[derive(Serialize, Deserialize, Debug)]
pub struct ModelStatusResponse {
    pub run_id: String,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub queue_position: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub active_runs: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub max_runs: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub result: Option<ResultBody>,
}

impl From<RunStatus> for ModelStatusResponse {
    fn from(status: RunStatus) -> Self {
        match status {
            RunStatus::Pending {
                id,
                status,
                queue_position,
                active_runs,
                max_runs,
            } => ModelStatusResponse {
                run_id: id,
                status,
                queue_position: Some(queue_position),
                active_runs: Some(active_runs),
                max_runs: Some(max_runs),
                result: None,
            },
            RunStatus::Finished { id, status, result } => ModelStatusResponse {
                run_id: id,
                status,
                queue_position: None,
                active_runs: None,
                max_runs: None,
                result: Some(result.into()),
            },
        }
    }
}

#[derive(Serialize)]
struct AvailableDataResponse {
    folders: Vec<ArtifactEntry>,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    active_runs: usize,
    queue_size: usize,
}

pub fn router(state: ApiState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/run_model", post(run_model_handler))
        .route("/model_status/:run_id", get(model_status_handler))
        .route("/get_available_data", get(available_data_handler))
        .route("/health", get(health_handler))
        .layer(cors)
        .with_state(state)
}

/// Serve the API on `addr` until `shutdown` is cancelled.
pub async fn run_api(
    addr: SocketAddr,
    state: ApiState,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(addr = %addr, "Starting HTTP API");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}

async fn run_model_handler(
    State(state): State<ApiState>,
    Json(payload): Json<RunModelRequest>,
) -> Response {
    // The missing-data list is read from disk on every submission
    let admission = state.admission.clone();
    let submitted =
        tokio::task::spawn_blocking(move || admission.submit(&payload.lake, &payload.date))
            .await
            .unwrap_or_else(|e| Err(SnowcastError::Internal(e.to_string())));

    match submitted {
        Ok(receipt) => Json(RunModelResponse {
            success: true,
            run_id: receipt.id,
            status: receipt.status,
            queue_position: receipt.queue_position,
            active_runs: receipt.active_runs,
            max_runs: receipt.max_runs,
        })
        .into_response(),
        Err(e) => {
            let code = match e {
                SnowcastError::Validation(_) | SnowcastError::Rejected(_) => {
                    StatusCode::BAD_REQUEST
                }
                _ => {
                    tracing::error!(error = %e, "Submission failed");
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            };
            (
                code,
                Json(ErrorResponse {
                    success: Some(false),
                    error: e.public_message(),
                }),
            )
                .into_response()
        }
    }
}

async fn model_status_handler(
    State(state): State<ApiState>,
    Path(run_id): Path<String>,
) -> Response {
    match state.admission.status(&run_id) {
        Ok(status) => Json(ModelStatusResponse::from(status)).into_response(),
        Err(e) => (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                success: None,
                error: e.public_message(),
            }),
        )
            .into_response(),
    }
}

async fn available_data_handler(State(state): State<ApiState>) -> Response {
    let dir = state.data_dir.clone();
    let listed = tokio::task::spawn_blocking(move || list_artifacts(&dir)).await;
    match listed {
        Ok(Ok(folders)) => Json(AvailableDataResponse { folders }).into_response(),
        Ok(Err(e)) => {
            tracing::error!(error = %e, "Failed to list output folders");
            internal_error()
        }
        Err(e) => {
            tracing::error!(error = %e, "Output folder listing aborted");
            internal_error()
        }
    }
}

async fn health_handler(State(state): State<ApiState>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        active_runs: state.admission.store().active_runs(),
        queue_size: state.admission.queue().size(),
    })
}

fn internal_error() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse {
            success: None,
            error: "Internal server error".to_string(),
        }),
    )
        .into_response()
}
