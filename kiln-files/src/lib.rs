//! Filesystem side of kiln: path containment, the tracked writer used for
//! generated code, and the read-only workspace browser.

pub mod paths;
pub mod storage;
pub mod tracker;
pub mod workspace;

pub use storage::{LocalStorage, Storage};
pub use tracker::{FileTracker, OperationResult, ResultStatus, StoreError, StoredFile};
pub use workspace::{FileEntry, Workspace, WorkspaceError, LISTED_EXTENSIONS};
