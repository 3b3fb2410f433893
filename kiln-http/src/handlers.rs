use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{rejection::JsonRejection, Path, State},
    http::{header, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use futures_util::stream::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::BroadcastStream;
use tracing::{error, info, warn};

use kiln_files::{FileEntry, OperationResult};
use kiln_runner::{PythonRunner, RunError, RunOutput};
use kiln_types::FileOperation;

use crate::{ApiError, AppState};

const NDJSON: &str = "application/x-ndjson";

/// Unwrap a JSON body, answering malformed ones with a JSON 400.
fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    match payload {
        Ok(Json(body)) => Ok(body),
        Err(rejection) => {
            warn!(error = %rejection, "rejected request body");
            Err(ApiError::bad_request(rejection.body_text()))
        }
    }
}

/// Run filesystem work on the blocking pool.
async fn blocking<T, F>(work: F) -> Result<T, ApiError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work).await.map_err(|e| {
        error!(error = %e, "blocking task failed");
        ApiError::internal("Internal server error")
    })
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct HealthResponse {
    status: &'static str,
    backend_status: &'static str,
    workspace_exists: bool,
    generated_dir_exists: bool,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ChatRequest {
    #[serde(default)]
    prompt: Option<String>,
    #[serde(default)]
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SaveRequest {
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RunRequest {
    #[serde(default)]
    path: Option<String>,
}

pub(crate) async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let backend_status = match state.inference.list_models().await {
        Ok(_) => "ok",
        Err(e) => {
            warn!(error = %e, "backend health probe failed");
            "error"
        }
    };
    Json(HealthResponse {
        status: "ok",
        backend_status,
        workspace_exists: state.workspace.root().exists(),
        generated_dir_exists: state.workspace.generated_root().exists(),
    })
}

/// Never fails: an unreachable backend or an empty listing yields the default model.
pub(crate) async fn list_models(State(state): State<AppState>) -> Json<Vec<String>> {
    match state.inference.list_models().await {
        Ok(models) if !models.is_empty() => {
            info!(?models, "found models");
            Json(models)
        }
        Ok(_) => {
            warn!("no models found, returning default model");
            Json(vec![state.default_model.clone()])
        }
        Err(e) => {
            warn!(error = %e, "failed to list models, returning default model");
            Json(vec![state.default_model.clone()])
        }
    }
}

pub(crate) async fn chat(
    State(state): State<AppState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let req = json_body(payload)?;
    let prompt = req
        .prompt
        .filter(|p| !p.trim().is_empty())
        .ok_or_else(|| ApiError::bad_request("Missing prompt"))?;
    let model = req
        .model
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| state.default_model.clone());

    let lines = state
        .pipeline
        .generate(prompt, model)
        .map(|event| Ok::<_, Infallible>(event.to_ndjson_line()));

    Ok(([(header::CONTENT_TYPE, NDJSON)], Body::from_stream(lines)).into_response())
}

pub(crate) async fn code_events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let notices = BroadcastStream::new(state.notifier.subscribe()).filter_map(|msg| async move {
        match msg {
            Ok(notice) => Event::default()
                .event("code_generation")
                .json_data(&notice)
                .ok(),
            Err(e) => {
                warn!(error = %e, "UI subscriber lagged");
                None
            }
        }
    });
    Sse::new(notices.map(Ok)).keep_alive(KeepAlive::default())
}

pub(crate) async fn list_files(State(state): State<AppState>) -> Result<Json<Vec<FileEntry>>, ApiError> {
    let workspace = Arc::clone(&state.workspace);
    Ok(Json(blocking(move || workspace.list_files()).await?))
}

pub(crate) async fn read_file(
    State(state): State<AppState>,
    Path(path): Path<String>,
) -> Result<String, ApiError> {
    let workspace = Arc::clone(&state.workspace);
    let requested = path.clone();
    blocking(move || workspace.read_file(&requested))
        .await?
        .map_err(|e| {
            warn!(path = %path, error = %e, "file read refused");
            ApiError::from(e)
        })
}

pub(crate) async fn save_file(
    State(state): State<AppState>,
    payload: Result<Json<SaveRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<OperationResult>), ApiError> {
    let req = json_body(payload)?;
    let path = req.path.unwrap_or_default().replace('\\', "/");
    let Some(content) = req.content.filter(|_| !path.is_empty()) else {
        error!("missing file path or content");
        return Err(ApiError::bad_request("Missing file path or content"));
    };

    let tracker = Arc::clone(&state.tracker);
    blocking(move || {
        let result = tracker.store(&path, &content);
        let status = match &result {
            Ok(_) => StatusCode::OK,
            Err(e) if e.is_access_denied() => StatusCode::FORBIDDEN,
            Err(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(OperationResult::from_store(&path, &result)))
    })
    .await
}

pub(crate) async fn file_status(State(state): State<AppState>) -> Json<Vec<FileOperation>> {
    Json(state.tracker.list_operations())
}

pub(crate) async fn run_file(
    State(state): State<AppState>,
    payload: Result<Json<RunRequest>, JsonRejection>,
) -> Result<Json<RunOutput>, ApiError> {
    let path = json_body(payload)?
        .path
        .filter(|p| !p.is_empty())
        .ok_or_else(|| ApiError::bad_request("Missing file path"))?;
    if !PythonRunner::is_runnable(std::path::Path::new(&path)) {
        return Err(RunError::NotPython.into());
    }

    let workspace = Arc::clone(&state.workspace);
    let requested = path.clone();
    let script = blocking(move || -> Result<std::path::PathBuf, ApiError> {
        let script = workspace.resolve_in_root(&requested)?;
        if script.is_file() {
            Ok(script)
        } else {
            Err(ApiError::not_found("File not found"))
        }
    })
    .await??;

    let output = state.runner.run(&script).await.map_err(|e| {
        error!(path = %path, error = %e, "run failed");
        ApiError::from(e)
    })?;
    Ok(Json(output))
}
