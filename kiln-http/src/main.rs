use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use kiln_config::{init_tracing, KilnConfig};
use kiln_files::Workspace;
use kiln_http::{router, AppState};
use kiln_infer::{InferenceClient, NullInferenceClient, OllamaClient};
use kiln_runner::PythonRunner;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = KilnConfig::load()?;
    init_tracing(cfg.log_json);

    let generated_dir = cfg.generated_dir();
    std::fs::create_dir_all(&generated_dir)
        .with_context(|| format!("creating {}", generated_dir.display()))?;

    let inference: Arc<dyn InferenceClient> = if cfg.llm_stub {
        info!("LLM stub enabled; completions will be empty");
        Arc::new(NullInferenceClient)
    } else {
        Arc::new(OllamaClient::new(cfg.backend_url.clone()).with_probe_timeout(cfg.probe_timeout()))
    };

    let workspace = Workspace::new(&cfg.workspace_dir, &generated_dir);
    let runner = PythonRunner::new(cfg.python.clone(), cfg.run_timeout());
    let state = AppState::new(inference, workspace, runner, cfg.default_model.clone());
    let app = router(state, cfg.static_dir.as_deref());

    let addr: SocketAddr = cfg
        .bind_addr
        .parse()
        .with_context(|| format!("invalid bind address {}", cfg.bind_addr))?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, backend = %cfg.backend_url, "kiln HTTP server listening");
    axum::serve(listener, app).await?;

    Ok(())
}
