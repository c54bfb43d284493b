//! Workspace resolution.
//!
//! A workspace is addressed by a loose id string at the edges and resolved to
//! an explicit [`Workspace`] handle once per request. Everything downstream
//! (validation, execution, output path allocation) receives the handle.

use std::fs;
use std::path::{Component, Path, PathBuf};

use tracing::debug;

use crate::error::{EngineError, Result};

/// Resolved workspace directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    id: String,
    root: PathBuf,
}

impl Workspace {
    pub fn new(id: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            root: root.into(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Join a workspace-relative path onto the root.
    ///
    /// Absolute paths and `..` components are rejected so a value can never
    /// address anything outside the workspace.
    pub fn resolve(&self, relative: &str) -> Result<PathBuf> {
        let rel = Path::new(relative);
        if relative.is_empty() {
            return Err(EngineError::Workspace("empty path".to_string()));
        }
        for component in rel.components() {
            match component {
                Component::Normal(_) | Component::CurDir => {}
                _ => {
                    return Err(EngineError::Workspace(format!(
                        "path '{}' must be relative to the workspace and must not contain '..'",
                        relative
                    )));
                }
            }
        }
        Ok(self.root.join(rel))
    }

    /// True when `relative` names an existing file or directory in the workspace.
    ///
    /// Paths that fail [`Workspace::resolve`] never exist.
    pub fn file_exists(&self, relative: &str) -> bool {
        self.resolve(relative).map(|p| p.exists()).unwrap_or(false)
    }
}

/// File store collaborator: turns workspace ids into directories.
pub trait WorkspaceStore: Send + Sync {
    fn resolve_directory(&self, workspace_id: &str) -> Result<Workspace>;

    fn file_exists(&self, workspace_id: &str, relative_path: &str) -> Result<bool> {
        Ok(self
            .resolve_directory(workspace_id)?
            .file_exists(relative_path))
    }
}

/// Workspaces as subdirectories of a local data directory.
#[derive(Debug, Clone)]
pub struct LocalWorkspaceStore {
    data_dir: PathBuf,
}

impl LocalWorkspaceStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }
}

impl WorkspaceStore for LocalWorkspaceStore {
    fn resolve_directory(&self, workspace_id: &str) -> Result<Workspace> {
        if workspace_id.is_empty()
            || workspace_id == "."
            || workspace_id.contains("..")
            || workspace_id.contains('/')
            || workspace_id.contains('\\')
        {
            return Err(EngineError::Workspace(format!(
                "invalid workspace id '{}'",
                workspace_id
            )));
        }

        let root = self.data_dir.join(workspace_id);
        if !root.is_dir() {
            debug!(workspace = workspace_id, root = %root.display(), "workspace:create");
            fs::create_dir_all(&root).map_err(|e| {
                EngineError::io(
                    format!("Failed to create workspace at {}", root.display()),
                    e,
                )
            })?;
        }
        Ok(Workspace::new(workspace_id, root))
    }
}
