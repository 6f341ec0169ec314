//! HTTP server for the conversion service
//!
//! Thin adapter over [`ConversionService`]: multipart submission, status
//! polling, cancellation and registry counts.

use crate::registry::{TaskId, TaskState};
use crate::service::{
    CancelError, ConversionService, ServiceStats, SkippedFile, SubmittedTask, UploadedFile,
};
use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

/// Largest accepted request body.
const MAX_UPLOAD_BYTES: usize = 1 << 30;

/// Errors that can occur when running the server
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Invalid bind address '{0}'")]
    InvalidAddress(String),

    #[error("Failed to bind to address: {0}")]
    BindError(#[from] std::io::Error),
}

type AppState = Arc<ConversionService>;

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
enum ApiBody {
    Ok {
        tasks: Vec<SubmittedTask>,
        skipped: Vec<SkippedFile>,
    },
    Running,
    Done {
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        file: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        info: Option<String>,
    },
    Cancelled,
    Error {
        message: String,
    },
}

fn error_response(code: StatusCode, message: impl Into<String>) -> Response {
    (
        code,
        Json(ApiBody::Error {
            message: message.into(),
        }),
    )
        .into_response()
}

/// Handler for POST /convert
async fn convert(State(service): State<AppState>, mut multipart: Multipart) -> Response {
    let mut files = Vec::new();
    let mut target_format = None;
    let mut quality_text = None;

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => return error_response(StatusCode::BAD_REQUEST, e.body_text()),
        };
        let name = field.name().unwrap_or_default().to_string();
        let read = match name.as_str() {
            "files" => {
                let filename = field.file_name().unwrap_or_default().to_string();
                let content_type = field.content_type().map(str::to_string);
                field.bytes().await.map(|data| {
                    // Browsers send an empty part when no file was chosen
                    if !filename.is_empty() {
                        files.push(UploadedFile {
                            filename,
                            content_type,
                            data: data.to_vec(),
                        });
                    }
                })
            }
            "target_format" => field.text().await.map(|text| target_format = Some(text)),
            "quality_level" => field.text().await.map(|text| quality_text = Some(text)),
            _ => Ok(()),
        };
        if let Err(e) = read {
            return error_response(StatusCode::BAD_REQUEST, e.body_text());
        }
    }

    let quality = match quality_text.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(text) => match text.parse::<i64>() {
            Ok(level) => Some(level),
            Err(_) => {
                return error_response(
                    StatusCode::BAD_REQUEST,
                    format!("Quality level must be an integer, got '{}'", text),
                )
            }
        },
    };

    match service
        .submit_batch(files, target_format.as_deref(), quality)
        .await
    {
        Ok(receipt) => Json(ApiBody::Ok {
            tasks: receipt.tasks,
            skipped: receipt.skipped,
        })
        .into_response(),
        Err(e) => error_response(StatusCode::BAD_REQUEST, e.to_string()),
    }
}

/// Handler for GET /task_status/:id
async fn task_status(State(service): State<AppState>, Path(id): Path<String>) -> Response {
    let Ok(id) = id.parse::<TaskId>() else {
        return error_response(StatusCode::NOT_FOUND, "task not found");
    };
    match service.status(&id) {
        Ok(snapshot) => {
            let body = match snapshot.state {
                TaskState::Running => ApiBody::Running,
                TaskState::Succeeded { .. } => ApiBody::Done {
                    success: true,
                    file: Some(snapshot.output_filename),
                    info: None,
                },
                TaskState::Failed { message } => ApiBody::Done {
                    success: false,
                    file: None,
                    info: Some(message),
                },
            };
            Json(body).into_response()
        }
        Err(e) => error_response(StatusCode::NOT_FOUND, e.to_string()),
    }
}

/// Handler for DELETE /task_status/:id
async fn cancel_task(State(service): State<AppState>, Path(id): Path<String>) -> Response {
    let Ok(id) = id.parse::<TaskId>() else {
        return error_response(StatusCode::NOT_FOUND, "task not found");
    };
    match service.cancel(&id) {
        Ok(()) => Json(ApiBody::Cancelled).into_response(),
        Err(e @ CancelError::NotFound(_)) => error_response(StatusCode::NOT_FOUND, e.to_string()),
        Err(e @ CancelError::AlreadyFinished) => {
            error_response(StatusCode::CONFLICT, e.to_string())
        }
    }
}

/// Handler for GET /metrics
async fn get_metrics(State(service): State<AppState>) -> Json<ServiceStats> {
    Json(service.stats())
}

/// Creates the axum Router with all endpoints
pub fn create_router(service: Arc<ConversionService>) -> Router {
    Router::new()
        .route("/convert", post(convert))
        .route("/task_status/:id", get(task_status).delete(cancel_task))
        .route("/metrics", get(get_metrics))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .with_state(service)
}

/// Runs the HTTP server on the configured bind address
///
/// # Returns
/// * `Ok(())` if server shuts down gracefully
/// * `Err(ServerError)` if the address is invalid or binding fails
pub async fn run_server(service: Arc<ConversionService>) -> Result<(), ServerError> {
    let bind_addr = service.config.server.bind_addr.clone();
    let addr: SocketAddr = bind_addr
        .parse()
        .map_err(|_| ServerError::InvalidAddress(bind_addr.clone()))?;

    let app = create_router(service);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "conversion service listening");
    axum::serve(listener, app).await?;

    Ok(())
}
