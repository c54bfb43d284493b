mod cli;
mod command;
mod logger;

use anyhow::Result;
use tracing::{error, info};

fn main() -> Result<()> {
    logger::init()?;
    info!(args = ?std::env::args().collect::<Vec<_>>(), "scriptbox start");

    match cli::run() {
        Ok(result) => {
            info!("scriptbox finished successfully");
            Ok(result)
        }
        Err(err) => {
            error!(error = ?err, "scriptbox failed");
            Err(err)
        }
    }
}
