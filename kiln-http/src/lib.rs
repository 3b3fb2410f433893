//! HTTP boundary: JSON API under `/api`, ND-JSON generation stream, SSE code
//! notices, and the optional static UI.

use std::path::Path;
use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{services::ServeDir, trace::TraceLayer};

use kiln_core::{BroadcastNotifier, GenerationPipeline};
use kiln_files::{FileTracker, Workspace};
use kiln_infer::InferenceClient;
use kiln_runner::PythonRunner;

pub mod error;
mod handlers;

pub use error::ApiError;

const NOTICE_CAPACITY: usize = 64;

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<GenerationPipeline>,
    pub inference: Arc<dyn InferenceClient>,
    pub tracker: Arc<FileTracker>,
    pub workspace: Arc<Workspace>,
    pub runner: Arc<PythonRunner>,
    pub notifier: Arc<BroadcastNotifier>,
    pub default_model: String,
}

impl AppState {
    /// Wire the pipeline with a tracker rooted at the workspace's generated-code directory.
    pub fn new(
        inference: Arc<dyn InferenceClient>,
        workspace: Workspace,
        runner: PythonRunner,
        default_model: impl Into<String>,
    ) -> Self {
        let tracker = Arc::new(FileTracker::new(workspace.generated_root()));
        let notifier = Arc::new(BroadcastNotifier::new(NOTICE_CAPACITY));
        let pipeline = Arc::new(GenerationPipeline::new(
            Arc::clone(&inference),
            Arc::clone(&tracker),
            notifier.clone(),
        ));
        Self {
            pipeline,
            inference,
            tracker,
            workspace: Arc::new(workspace),
            runner: Arc::new(runner),
            notifier,
            default_model: default_model.into(),
        }
    }
}

pub fn router(state: AppState, static_dir: Option<&Path>) -> Router {
    let api = Router::new()
        .route("/health", get(handlers::health))
        .route("/models", get(handlers::list_models))
        .route("/chat", post(handlers::chat))
        .route("/events", get(handlers::code_events))
        .route("/files", get(handlers::list_files))
        .route("/files/*path", get(handlers::read_file))
        .route("/save", post(handlers::save_file))
        .route("/file-status", get(handlers::file_status))
        .route("/run", post(handlers::run_file));

    let mut app = Router::new().nest("/api", api);
    if let Some(dir) = static_dir {
        app = app.fallback_service(ServeDir::new(dir));
    }
    app.with_state(state).layer(TraceLayer::new_for_http())
}
