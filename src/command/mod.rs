pub mod exec;
pub mod introspect;
pub mod serve;

use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use serde_json::{Map as JsonMap, Value as JsonValue};
use tracing::debug;

use scriptbox::config::Config;
use scriptbox::engine::Engine;
use scriptbox::runner::PythonRunner;
use scriptbox::workspace::LocalWorkspaceStore;

/// Build an engine from the merged configuration.
pub fn build_engine(config: &Config) -> Result<Engine> {
    let runner = Arc::new(PythonRunner::new(config.resolve_python()?));
    debug!(python = %runner.interpreter().display(), "command:engine ready");
    let store = Arc::new(LocalWorkspaceStore::new(config.data_dir()));
    Ok(Engine::new(runner, store, config.engine_settings())?)
}

/// Parse `--inputs`; absent means no inputs.
pub fn parse_inputs(raw: Option<&str>) -> Result<JsonMap<String, JsonValue>> {
    let Some(raw) = raw else {
        return Ok(JsonMap::new());
    };
    let value: JsonValue = serde_json::from_str(raw).context("Failed to parse --inputs as JSON")?;
    match value {
        JsonValue::Object(map) => Ok(map),
        other => Err(anyhow!("--inputs must be a JSON object, got {}", other)),
    }
}
