//! HTTP surface: `GET /health`, `POST /analyze`, `POST /validate`.
//!
//! Handlers are thin. `/analyze` pulls the `image` part out of a multipart
//! body and hands it to the shared [`Analyzer`]; `/validate` runs the rule
//! engine on a JSON record. Every failure becomes a JSON body with an `error`
//! summary and, in most cases, a `details` string (see [`ApiError`]).

use crate::analyze::Analyzer;
use crate::error::AnalysisError;
use crate::pipeline::validate::validate;
use crate::record::{PrescriptionRecord, ValidationResult};
use axum::body::Bytes;
use axum::extract::multipart::MultipartError;
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

/// Name of the multipart field carrying the prescription image.
pub const IMAGE_FIELD: &str = "image";

/// Headroom on top of `max_upload_bytes` for multipart boundaries and headers.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub analyzer: Arc<Analyzer>,
}

impl AppState {
    pub fn new(analyzer: Analyzer) -> Self {
        Self {
            analyzer: Arc::new(analyzer),
        }
    }
}

/// Build the application router.
pub fn router(state: AppState) -> Router {
    let body_limit = state
        .analyzer
        .config()
        .max_upload_bytes
        .saturating_add(MULTIPART_OVERHEAD);

    Router::new()
        .route("/health", get(health))
        .route("/analyze", post(analyze))
        .route("/validate", post(validate_record))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind `addr` and serve until Ctrl-C.
pub async fn serve(addr: SocketAddr, analyzer: Analyzer) -> std::io::Result<()> {
    let model = analyzer.model().to_string();
    let app = router(AppState::new(analyzer));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, model = %model, "Prescription analysis server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {e}");
            }
            info!("Shutting down");
        })
        .await
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct Health {
    status: &'static str,
    timestamp: String,
    model: String,
}

async fn health(State(state): State<AppState>) -> Json<Health> {
    Json(Health {
        status: "healthy",
        timestamp: Utc::now().to_rfc3339(),
        model: state.analyzer.model().to_string(),
    })
}

async fn analyze(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<PrescriptionRecord>, ApiError> {
    let mut image: Option<Bytes> = None;

    while let Some(field) = multipart.next_field().await? {
        if field.name() == Some(IMAGE_FIELD) {
            image = Some(field.bytes().await?);
            break;
        }
    }

    let image = image.ok_or(ApiError::MissingImage)?;
    let record = state.analyzer.analyze(&image).await?;
    Ok(Json(record))
}

async fn validate_record(body: Bytes) -> Result<Json<ValidationResult>, ApiError> {
    let record: PrescriptionRecord =
        serde_json::from_slice(&body).map_err(|e| ApiError::Validation(e.to_string()))?;
    let result = validate(&record);
    if !result.is_valid {
        warn!("Record failed validation: {:?}", result.errors);
    }
    Ok(Json(result))
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// JSON error body.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_response: Option<String>,
}

/// Request failures with their HTTP mapping.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("No image file provided")]
    MissingImage,
    #[error("Invalid multipart request: {0}")]
    Multipart(#[from] MultipartError),
    #[error(transparent)]
    Analysis(#[from] AnalysisError),
    #[error("Validation failed: {0}")]
    Validation(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::MissingImage => (
                StatusCode::BAD_REQUEST,
                ErrorBody {
                    error: "No image file provided",
                    details: None,
                    raw_response: None,
                },
            ),
            ApiError::Multipart(e) => (
                e.status(),
                ErrorBody {
                    error: "Invalid multipart request",
                    details: Some(e.body_text()),
                    raw_response: None,
                },
            ),
            ApiError::Analysis(e) if e.is_input_error() => (
                StatusCode::BAD_REQUEST,
                ErrorBody {
                    error: "Invalid image file",
                    details: Some(e.to_string()),
                    raw_response: None,
                },
            ),
            ApiError::Analysis(AnalysisError::Malformed(e)) => {
                error!("Failed to parse model response: {}", e.detail());
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorBody {
                        error: "Failed to parse response",
                        details: Some(e.detail().to_string()),
                        raw_response: Some(e.raw().to_string()),
                    },
                )
            }
            ApiError::Analysis(e) => {
                error!("Analysis failed: {e}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorBody {
                        error: "Failed to analyze prescription",
                        details: Some(e.to_string()),
                        raw_response: None,
                    },
                )
            }
            ApiError::Validation(detail) => {
                error!("Validation error: {detail}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorBody {
                        error: "Validation failed",
                        details: Some(detail),
                        raw_response: None,
                    },
                )
            }
        };

        (status, Json(body)).into_response()
    }
}
