use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{Context, Result, anyhow};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

/// Filter directive for the log file; falls back to `RUST_LOG`, then `info`.
const FILTER_ENV: &str = "SCRIPTBOX_LOG";
/// Explicit log file location, bypassing the XDG lookup.
const FILE_ENV: &str = "SCRIPTBOX_LOG_FILE";

const LOG_DIR: &str = "scriptbox";
const LOG_FILE: &str = "scriptbox.log";

static GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Route tracing output to the log file. Later calls are no-ops.
pub fn init() -> Result<()> {
    if GUARD.get().is_some() {
        return Ok(());
    }

    let log_path = log_path(|key| std::env::var(key).ok())?;
    let (directory, file_name) = split_path(&log_path)?;
    fs::create_dir_all(&directory)
        .with_context(|| format!("Failed to create log directory at {}", directory.display()))?;

    let (writer, guard) = tracing_appender::non_blocking(rolling::never(&directory, file_name));

    tracing_subscriber::registry()
        .with(filter())
        .with(
            fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(false),
        )
        .try_init()
        .context("Failed to initialize tracing subscriber")?;

    let _ = GUARD.set(guard);
    Ok(())
}

fn filter() -> EnvFilter {
    EnvFilter::try_from_env(FILTER_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// `$SCRIPTBOX_LOG_FILE`, else `$XDG_STATE_HOME/scriptbox/scriptbox.log`,
/// else `~/.local/state/scriptbox/scriptbox.log`, else the working directory.
fn log_path(env: impl Fn(&str) -> Option<String>) -> Result<PathBuf> {
    let set = |key: &str| env(key).filter(|value| !value.is_empty());

    if let Some(file) = set(FILE_ENV) {
        return Ok(PathBuf::from(file));
    }
    if let Some(state_home) = set("XDG_STATE_HOME") {
        return Ok(PathBuf::from(state_home).join(LOG_DIR).join(LOG_FILE));
    }
    if let Some(home_dir) = home::home_dir() {
        return Ok(home_dir.join(".local/state").join(LOG_DIR).join(LOG_FILE));
    }
    Ok(std::env::current_dir()?.join(LOG_FILE))
}

fn split_path(path: &Path) -> Result<(PathBuf, &str)> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| anyhow!("Invalid log file name: {}", path.display()))?;
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    Ok((dir, file_name))
}
