//! vista-graph CLI entry point

use std::path::Path;
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use vista_graph::cli::{Cli, Commands};
use vista_graph::commands::{run_build, run_decode, run_reset_edges, run_validate, CommandContext};
use vista_graph::config::{EngineConfig, DEFAULT_CONFIG_FILE};

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(&cli) {
        Ok(output) => {
            print!("{}", output);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            e.exit_code()
        }
    }
}

fn run(cli: &Cli) -> vista_graph::Result<String> {
    let config_path = cli
        .config
        .as_deref()
        .unwrap_or_else(|| Path::new(DEFAULT_CONFIG_FILE));
    let config = EngineConfig::load_from(config_path)?;
    init_tracing(&config, cli.verbose);

    let ctx = CommandContext::new(config, cli.verbose, cli.progress);
    match &cli.command {
        Commands::Build(args) => run_build(args, &ctx),
        Commands::Decode(args) => run_decode(args, &ctx),
        Commands::ResetEdges(args) => run_reset_edges(args, &ctx),
        Commands::Validate(args) => run_validate(args, &ctx),
    }
}

/// Logs go to stderr; stdout carries the JSON output.
/// `RUST_LOG` wins over the configured level.
fn init_tracing(config: &EngineConfig, verbose: bool) {
    let level = if verbose {
        "debug"
    } else {
        config.logging.level.as_str()
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("vista_graph={}", level)));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
