//! Script execution boundary.
//!
//! Runs a workspace Python file as a child process with captured output and a
//! wall-clock ceiling. There is no sandboxing beyond the timeout.

use std::io;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::process::Command;
use tracing::{info, warn};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum RunError {
    #[error("Only Python files can be executed")]
    NotPython,
    #[error("Execution timed out after {}s", .0.as_secs())]
    Timeout(Duration),
    #[error("failed to start interpreter: {0}")]
    Spawn(#[from] io::Error),
}

/// Captured output of a finished run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunOutput {
    pub output: String,
    pub error: String,
    pub exit_code: Option<i32>,
}

#[derive(Clone, Debug)]
pub struct PythonRunner {
    interpreter: String,
    timeout: Duration,
}

impl Default for PythonRunner {
    fn default() -> Self {
        Self::new("python", DEFAULT_TIMEOUT)
    }
}

impl PythonRunner {
    pub fn new(interpreter: impl Into<String>, timeout: Duration) -> Self {
        Self {
            interpreter: interpreter.into(),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn is_runnable(path: &Path) -> bool {
        path.extension().and_then(|e| e.to_str()) == Some("py")
    }

    /// Execute `script`; the child is killed if it outlives the timeout.
    pub async fn run(&self, script: &Path) -> Result<RunOutput, RunError> {
        if !Self::is_runnable(script) {
            return Err(RunError::NotPython);
        }

        let mut cmd = Command::new(&self.interpreter);
        cmd.arg(script)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(self.timeout, cmd.output()).await {
            Ok(res) => res?,
            Err(_) => {
                warn!(script = %script.display(), timeout_secs = self.timeout.as_secs(), "execution timed out");
                return Err(RunError::Timeout(self.timeout));
            }
        };

        info!(script = %script.display(), status = ?output.status.code(), "file executed");
        Ok(RunOutput {
            output: String::from_utf8_lossy(&output.stdout).into_owned(),
            error: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code(),
        })
    }
}
