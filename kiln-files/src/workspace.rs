use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::paths::{absolute_root, resolve_within};

/// Extensions shown by the file browser.
pub const LISTED_EXTENSIONS: &[&str] = &["py", "js", "html", "css", "json", "txt", "md"];

/// Requests with this prefix are served from the generated-code root.
const GENERATED_PREFIX: &str = "generated/";

#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("Access denied")]
    AccessDenied,
    #[error("File not found")]
    NotFound,
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileEntry {
    pub path: String,
    pub full_path: String,
    pub name: String,
}

/// Read-only view over the workspace and generated-code roots.
#[derive(Clone, Debug)]
pub struct Workspace {
    root: PathBuf,
    generated_root: PathBuf,
}

impl Workspace {
    pub fn new(root: impl AsRef<Path>, generated_root: impl AsRef<Path>) -> Self {
        Self {
            root: absolute_root(root.as_ref()),
            generated_root: absolute_root(generated_root.as_ref()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn generated_root(&self) -> &Path {
        &self.generated_root
    }

    /// Every listed-extension file under the workspace root, sorted by relative path.
    pub fn list_files(&self) -> Vec<FileEntry> {
        let mut files: Vec<FileEntry> = WalkDir::new(&self.root)
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(e) => Some(e),
                Err(e) => {
                    warn!(error = %e, "skipping unreadable workspace entry");
                    None
                }
            })
            .filter(|e| e.file_type().is_file())
            .filter(|e| has_listed_extension(e.path()))
            .filter_map(|e| {
                let rel = e.path().strip_prefix(&self.root).ok()?;
                let path = rel
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                Some(FileEntry {
                    path,
                    full_path: e.path().display().to_string(),
                    name: e.file_name().to_string_lossy().into_owned(),
                })
            })
            .collect();
        files.sort_by(|a, b| a.path.cmp(&b.path));
        debug!(count = files.len(), "listed workspace files");
        files
    }

    /// Map a browser path to a location on disk.
    ///
    /// A `generated/` prefix is stripped and the rest is joined under the
    /// generated root; anything else is joined under the workspace root. The
    /// result must stay inside whichever root it was joined to.
    pub fn resolve(&self, requested: &str) -> Result<PathBuf, WorkspaceError> {
        let requested = requested.replace('\\', "/");
        let (root, rest) = match requested.strip_prefix(GENERATED_PREFIX) {
            Some(rest) => (&self.generated_root, rest),
            None => (&self.root, requested.as_str()),
        };
        resolve_within(root, rest).ok_or(WorkspaceError::AccessDenied)
    }

    /// Resolve a path that must live under the workspace root proper.
    pub fn resolve_in_root(&self, requested: &str) -> Result<PathBuf, WorkspaceError> {
        let requested = requested.replace('\\', "/");
        resolve_within(&self.root, &requested).ok_or(WorkspaceError::AccessDenied)
    }

    pub fn read_file(&self, requested: &str) -> Result<String, WorkspaceError> {
        let full_path = self.resolve(requested)?;
        if !full_path.is_file() {
            return Err(WorkspaceError::NotFound);
        }
        Ok(std::fs::read_to_string(full_path)?)
    }
}

fn has_listed_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| LISTED_EXTENSIONS.contains(&ext))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn seeded() -> (tempfile::TempDir, Workspace) {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("generated_code/pkg")).unwrap();
        fs::write(root.join("main.py"), "print(1)").unwrap();
        fs::write(root.join("notes.md"), "# notes").unwrap();
        fs::write(root.join("image.png"), [0u8, 1, 2]).unwrap();
        fs::write(root.join("generated_code/pkg/mod.py"), "x = 1").unwrap();
        let ws = Workspace::new(root, root.join("generated_code"));
        (dir, ws)
    }

    #[test]
    fn lists_allowed_extensions_only() {
        let (_dir, ws) = seeded();
        let paths: Vec<String> = ws.list_files().into_iter().map(|f| f.path).collect();
        assert_eq!(paths, vec!["generated_code/pkg/mod.py", "main.py", "notes.md"]);
    }

    #[test]
    fn entry_serializes_camel_case() {
        let (_dir, ws) = seeded();
        let entry = ws.list_files().into_iter().find(|f| f.name == "main.py").unwrap();
        let v = serde_json::to_value(&entry).unwrap();
        assert!(v["fullPath"].as_str().unwrap().ends_with("main.py"));
        assert_eq!(v["path"], "main.py");
    }

    #[test]
    fn generated_prefix_reads_from_generated_root() {
        let (_dir, ws) = seeded();
        assert_eq!(ws.read_file("generated/pkg/mod.py").unwrap(), "x = 1");
        assert_eq!(ws.read_file("generated\\pkg\\mod.py").unwrap(), "x = 1");
        assert_eq!(ws.read_file("main.py").unwrap(), "print(1)");
    }

    #[test]
    fn generated_prefix_cannot_escape_generated_root() {
        let (_dir, ws) = seeded();
        assert!(matches!(
            ws.read_file("generated/../main.py"),
            Err(WorkspaceError::AccessDenied)
        ));
        assert!(matches!(
            ws.read_file("generated//etc/passwd"),
            Err(WorkspaceError::AccessDenied)
        ));
    }

    #[test]
    fn missing_and_escaping_paths() {
        let (_dir, ws) = seeded();
        assert!(matches!(ws.read_file("nope.py"), Err(WorkspaceError::NotFound)));
        assert!(matches!(
            ws.read_file("../../etc/passwd"),
            Err(WorkspaceError::AccessDenied)
        ));
        assert!(matches!(
            ws.resolve_in_root("/etc/passwd"),
            Err(WorkspaceError::AccessDenied)
        ));
    }
}
