use crate::command;
use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(name = "scriptbox")]
#[command(about = "Run, introspect and test Python code units in isolated workspaces")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a unit once and print its result as JSON
    Exec {
        /// Path to the unit definition (YAML)
        unit: PathBuf,

        /// Workspace the unit runs in
        #[arg(short, long, default_value = "default")]
        workspace: String,

        /// Input values as a JSON object
        #[arg(short, long)]
        inputs: Option<String>,

        /// Directory of unit definitions callable via execute_unit
        #[arg(long)]
        units: Option<PathBuf>,
    },

    /// Derive inputs and outputs from a typed-function fragment
    Introspect {
        /// Path to the Python fragment
        fragment: PathBuf,

        /// Print the raw schemas as JSON
        #[arg(long)]
        json: bool,

        /// Write the fragment and derived declarations into this unit file
        #[arg(long, value_name = "UNIT")]
        update: Option<PathBuf>,
    },

    /// Run a unit's tests with pytest
    Test {
        /// Path to the unit definition (YAML)
        unit: PathBuf,
    },

    /// Serve the unit endpoint until interrupted
    Serve {
        /// Directory of unit definitions to serve
        #[arg(long)]
        units: PathBuf,

        /// Address to bind (overrides config)
        #[arg(long)]
        bind: Option<String>,
    },
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Exec {
            unit,
            workspace,
            inputs,
            units,
        } => command::exec::run(&unit, &workspace, inputs.as_deref(), units.as_deref()),
        Commands::Introspect {
            fragment,
            json,
            update,
        } => command::introspect::run(&fragment, json, update.as_deref()),
        Commands::Test { unit } => command::test::run(&unit),
        Commands::Serve { units, bind } => command::serve::run(&units, bind.as_deref()),
    }
}
