use std::path::Path;
use std::sync::Arc;
use std::sync::mpsc;

use anyhow::{Context, Result};
use console::style;
use tracing::info;

use scriptbox::catalog::InMemoryCatalog;
use scriptbox::config::Config;
use scriptbox::endpoint::{ServerContext, UnitServer, generate_token};

use super::build_engine;

pub fn run(units_dir: &Path, bind: Option<&str>) -> Result<()> {
    let config = Config::load()?;
    let catalog = InMemoryCatalog::load_dir(units_dir)
        .with_context(|| format!("Failed to load units from {}", units_dir.display()))?;

    let server = UnitServer::bind(bind.unwrap_or(config.server.bind()))?;
    let token = match &config.server.token {
        Some(token) => token.clone(),
        None => generate_token()?,
    };
    let engine = build_engine(&config)?.with_callback(server.callback(&token));

    let url = server.url();
    let units = catalog.len();
    server.spawn(Arc::new(ServerContext {
        engine: Arc::new(engine),
        catalog: Arc::new(catalog),
        token: token.clone(),
    }));
    info!(%url, units, "serve:started");

    println!(
        "{} Serving {} unit(s) on {}",
        style("✔").green(),
        units,
        style(&url).bold()
    );
    println!("  token: {}", style(&token).dim());

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .context("Failed to install Ctrl-C handler")?;
    let _ = rx.recv();

    info!("serve:stopped");
    Ok(())
}
