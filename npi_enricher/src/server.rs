use std::net::SocketAddr;

use anyhow::Context;
use axum::extract::{DefaultBodyLimit, Multipart, Path as AxumPath, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::error::Error;
use crate::service::EnrichmentService;

const MAX_UPLOAD_BYTES: usize = 64 * 1024 * 1024;

#[derive(Clone)]
struct AppState {
    service: EnrichmentService,
}

pub async fn run(service: EnrichmentService, host: &str, port: u16) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("{host}:{port}")
        .parse()
        .context("parse host:port")?;

    tracing::info!("Listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router(service)).await?;
    Ok(())
}

pub fn router(service: EnrichmentService) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/upload", post(upload_file))
        .route("/status/:task_id", get(check_status))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(AppState { service })
}

#[derive(Debug, Serialize)]
struct UploadResponse {
    task_id: Uuid,
    message: &'static str,
}

async fn upload_file(State(st): State<AppState>, mut multipart: Multipart) -> Response {
    let mut upload: Option<(String, Vec<u8>)> = None;

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => return error_response(StatusCode::BAD_REQUEST, e.to_string()),
        };
        if field.name() != Some("file") {
            continue;
        }
        let file_name = field.file_name().unwrap_or("upload").to_string();
        match field.bytes().await {
            Ok(bytes) => upload = Some((file_name, bytes.to_vec())),
            Err(e) => {
                return error_response(
                    StatusCode::BAD_REQUEST,
                    format!("Failed to read file: {e}"),
                );
            }
        }
    }

    let Some((file_name, content)) = upload else {
        return error_response(
            StatusCode::BAD_REQUEST,
            "No file provided in 'file' field".to_string(),
        );
    };

    match st.service.submit(&file_name, content).await {
        Ok(task_id) => Json(UploadResponse {
            task_id,
            message: "File uploaded. Processing started.",
        })
        .into_response(),
        Err(err) => {
            let status = status_for(&err);
            if status.is_server_error() {
                tracing::error!(file = %file_name, error = %err, "Upload failed");
            }
            error_response(status, err.to_string())
        }
    }
}

async fn check_status(
    State(st): State<AppState>,
    AxumPath(task_id): AxumPath<String>,
) -> Response {
    match st.service.tasks().get_status(&task_id).await {
        Ok(view) => Json(view).into_response(),
        Err(Error::NotFound(_)) => {
            error_response(StatusCode::NOT_FOUND, "Task not found".to_string())
        }
        Err(err) => {
            tracing::error!(task_id = %task_id, error = %err, "Status lookup failed");
            error_response(status_for(&err), err.to_string())
        }
    }
}

fn status_for(err: &Error) -> StatusCode {
    match err {
        Error::InputValidation(_) => StatusCode::BAD_REQUEST,
        Error::NotFound(_) => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(status: StatusCode, message: String) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}
