//! Lexical path containment.
//!
//! Candidate paths usually do not exist yet, so they cannot be canonicalized.
//! Instead `.` and `..` are folded lexically and the result is compared to the
//! root component by component.

use std::path::{Component, Path, PathBuf};

/// Fold `.` and `..` without touching the filesystem. `..` at the root stays at the root.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                let at_root = matches!(
                    out.components().next_back(),
                    None | Some(Component::RootDir) | Some(Component::Prefix(_))
                );
                if !at_root {
                    out.pop();
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Absolute, normalized form of a configured root.
pub fn absolute_root(root: &Path) -> PathBuf {
    let abs = std::path::absolute(root).unwrap_or_else(|_| root.to_path_buf());
    normalize(&abs)
}

/// Join `relative` onto `root` and return the result only if it stays inside `root`.
///
/// `root` must already be absolute and normalized (see [`absolute_root`]).
/// An absolute `relative` replaces the root, as `Path::join` does, and is then
/// rejected unless it happens to point inside the root.
pub fn resolve_within(root: &Path, relative: &str) -> Option<PathBuf> {
    let candidate = normalize(&root.join(relative));
    if candidate.starts_with(root) {
        Some(candidate)
    } else {
        None
    }
}
