use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of filesystem operation recorded by the file tracker.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Create,
}

/// Lifecycle of a tracked operation. `Pending` moves exactly once to a terminal state.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationStatus {
    Pending,
    Success,
    Failed,
}

impl OperationStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, OperationStatus::Pending)
    }
}

/// One record per attempted write.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FileOperation {
    #[serde(rename = "type")]
    pub kind: OperationKind,
    pub path: String,
    pub status: OperationStatus,
    pub timestamp: DateTime<Utc>,
    pub error: Option<String>,
}

impl FileOperation {
    pub fn pending(kind: OperationKind, path: impl Into<String>) -> Self {
        Self {
            kind,
            path: path.into(),
            status: OperationStatus::Pending,
            timestamp: Utc::now(),
            error: None,
        }
    }

    /// Move a pending record to `Success`. Terminal records are left untouched.
    pub fn succeed(&mut self) {
        if !self.status.is_terminal() {
            self.status = OperationStatus::Success;
        }
    }

    /// Move a pending record to `Failed` with a message. Terminal records are left untouched.
    pub fn fail(&mut self, message: impl Into<String>) {
        if !self.status.is_terminal() {
            self.status = OperationStatus::Failed;
            self.error = Some(message.into());
        }
    }
}

/// Event emitted by a generation run, relayed to the client as one ND-JSON line.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ProgressEvent {
    Progress { message: String, filename: String },
    Complete { message: String },
    Error { message: String },
}

impl ProgressEvent {
    pub fn file_generated(filename: impl Into<String>) -> Self {
        let filename = filename.into();
        ProgressEvent::Progress {
            message: format!("Generated file: {filename}"),
            filename,
        }
    }

    pub fn complete() -> Self {
        ProgressEvent::Complete {
            message: "Code generation complete".into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        ProgressEvent::Error {
            message: message.into(),
        }
    }

    /// `complete` and `error` end a run.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ProgressEvent::Progress { .. })
    }

    pub fn to_ndjson_line(&self) -> String {
        let mut line = serde_json::to_string(self).unwrap_or_else(|e| {
            serde_json::json!({ "type": "error", "message": e.to_string() }).to_string()
        });
        line.push('\n');
        line
    }
}

/// Out-of-band UI notification carrying a generated file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeNotice {
    pub filename: String,
    pub code: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operation_transitions_once() {
        let mut op = FileOperation::pending(OperationKind::Create, "a.py");
        assert_eq!(op.status, OperationStatus::Pending);
        op.fail("disk full");
        op.succeed();
        assert_eq!(op.status, OperationStatus::Failed);
        assert_eq!(op.error.as_deref(), Some("disk full"));
    }

    #[test]
    fn operation_serializes_with_type_field() {
        let mut op = FileOperation::pending(OperationKind::Create, "pkg/mod.py");
        op.succeed();
        let v = serde_json::to_value(&op).unwrap();
        assert_eq!(v["type"], "create");
        assert_eq!(v["path"], "pkg/mod.py");
        assert_eq!(v["status"], "success");
        assert!(v["error"].is_null());
        assert!(v["timestamp"].is_string());
    }

    #[test]
    fn progress_event_wire_shape() {
        let line = ProgressEvent::file_generated("a.py").to_ndjson_line();
        assert!(line.ends_with('\n'));
        let v: serde_json::Value = serde_json::from_str(line.trim_end()).unwrap();
        assert_eq!(v["type"], "progress");
        assert_eq!(v["filename"], "a.py");
        assert_eq!(v["message"], "Generated file: a.py");

        let v = serde_json::to_value(ProgressEvent::error("boom")).unwrap();
        assert_eq!(v, serde_json::json!({ "type": "error", "message": "boom" }));
        assert!(ProgressEvent::complete().is_terminal());
    }
}
