//! Temporary test-harness files.

use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::trace;

use crate::error::{EngineError, Result};

/// A harness program written to its own temporary directory.
///
/// The directory (and the program in it) is removed when this value is
/// dropped, so every exit path of a test run cleans up.
#[derive(Debug)]
pub struct PreparedHarness {
    dir: TempDir,
    path: PathBuf,
}

impl PreparedHarness {
    pub fn write(program: &str, id: &str) -> Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix("scriptbox-harness-")
            .tempdir()
            .map_err(|e| EngineError::io("Failed to create harness directory", e))?;
        // pytest imports the file as a module, so the name must be an identifier.
        let path = dir.path().join(format!("scriptbox_harness_{}.py", id));
        fs::write(&path, program).map_err(|e| {
            EngineError::io(format!("Failed to write harness {}", path.display()), e)
        })?;
        trace!(path = %path.display(), "harness:written");
        Ok(Self { dir, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn dir(&self) -> &Path {
        self.dir.path()
    }
}
