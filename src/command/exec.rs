use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use scriptbox::catalog::{InMemoryCatalog, UnitCatalog, load_unit_file};
use scriptbox::config::Config;
use scriptbox::endpoint::{ServerContext, UnitServer, generate_token};

use super::{build_engine, parse_inputs};

pub fn run(
    unit_path: &Path,
    workspace_id: &str,
    inputs: Option<&str>,
    units_dir: Option<&Path>,
) -> Result<()> {
    let config = Config::load()?;
    let unit = load_unit_file(unit_path)?;
    let inputs = parse_inputs(inputs)?;

    let mut engine = build_engine(&config)?;
    let mut server = None;
    if let Some(dir) = units_dir {
        let mut catalog = InMemoryCatalog::load_dir(dir)
            .with_context(|| format!("Failed to load units from {}", dir.display()))?;
        if catalog.get_by_name(&unit.name).is_none() {
            catalog.insert(unit.clone())?;
        }
        let listener = UnitServer::bind(config.server.bind())?;
        let token = match &config.server.token {
            Some(token) => token.clone(),
            None => generate_token()?,
        };
        engine = engine.with_callback(listener.callback(&token));
        server = Some((listener, Arc::new(catalog), token));
    }

    let engine = Arc::new(engine);
    if let Some((listener, catalog, token)) = server {
        info!(units = catalog.len(), url = %listener.url(), "exec:endpoint started");
        listener.spawn(Arc::new(ServerContext {
            engine: Arc::clone(&engine),
            catalog,
            token,
        }));
    }

    let workspace = engine.store().resolve_directory(workspace_id)?;
    let result = engine.execute(&unit, &workspace, &inputs)?;
    info!(unit = %unit.name, outputs = result.len(), "exec:done");
    println!("{}", serde_json::to_string_pretty(&result.to_json())?);
    Ok(())
}
