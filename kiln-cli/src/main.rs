use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::bail;
use clap::{Parser, Subcommand};
use futures_util::StreamExt;

use kiln_config::{init_tracing, KilnConfig};
use kiln_core::{extract, GenerationPipeline, NullNotifier};
use kiln_files::{FileTracker, Workspace};
use kiln_infer::{InferenceClient, NullInferenceClient, OllamaClient};
use kiln_runner::PythonRunner;
use kiln_types::ProgressEvent;

#[derive(Parser)]
#[command(name = "kiln")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate files from a prompt and print progress as ND-JSON.
    Generate {
        #[arg(long)]
        prompt: String,
        #[arg(long)]
        model: Option<String>,
    },
    /// List backend models.
    Models,
    /// Show the blocks a model answer would produce, without writing anything.
    Extract {
        /// Read from this file instead of stdin.
        file: Option<PathBuf>,
    },
    /// Run a workspace Python file.
    Run { path: String },
}

fn inference(cfg: &KilnConfig) -> Arc<dyn InferenceClient> {
    if cfg.llm_stub {
        Arc::new(NullInferenceClient)
    } else {
        Arc::new(OllamaClient::new(cfg.backend_url.clone()).with_probe_timeout(cfg.probe_timeout()))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = KilnConfig::load()?;
    init_tracing(cfg.log_json);

    match cli.command {
        Command::Generate { prompt, model } => {
            let tracker = Arc::new(FileTracker::new(cfg.generated_dir()));
            let pipeline = Arc::new(GenerationPipeline::new(
                inference(&cfg),
                tracker,
                Arc::new(NullNotifier),
            ));
            let model = model.unwrap_or_else(|| cfg.default_model.clone());

            let mut events = pipeline.generate(prompt, model);
            let mut failed = None;
            while let Some(event) = events.next().await {
                print!("{}", event.to_ndjson_line());
                if let ProgressEvent::Error { message } = event {
                    failed = Some(message);
                }
            }
            if let Some(message) = failed {
                bail!(message);
            }
        }
        Command::Models => match inference(&cfg).list_models().await {
            Ok(models) if !models.is_empty() => {
                for m in models {
                    println!("{m}");
                }
            }
            Ok(_) => println!("{} (default; backend reported no models)", cfg.default_model),
            Err(e) => println!("{} (default; backend unavailable: {e})", cfg.default_model),
        },
        Command::Extract { file } => {
            let text = match file {
                Some(path) => std::fs::read_to_string(path)?,
                None => {
                    let mut buf = String::new();
                    std::io::stdin().read_to_string(&mut buf)?;
                    buf
                }
            };
            let blocks = extract(&text);
            if blocks.is_empty() {
                println!("no fenced blocks found");
            }
            for block in blocks.iter() {
                println!("{} ({} lines)", block.filename, block.content.lines().count());
            }
        }
        Command::Run { path } => {
            let workspace = Workspace::new(&cfg.workspace_dir, cfg.generated_dir());
            let script = workspace.resolve_in_root(&path)?;
            let runner = PythonRunner::new(cfg.python.clone(), cfg.run_timeout());
            let out = runner.run(&script).await?;
            print!("{}", out.output);
            eprint!("{}", out.error);
        }
    }

    Ok(())
}
