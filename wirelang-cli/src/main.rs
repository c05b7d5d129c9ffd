//! Wirelang CLI - Command line interface
//!
//! Runs a source file through the full pipeline. Flags can also come from a
//! JSON config file, which takes precedence over the command line.

use clap::Parser;
use std::path::PathBuf;
use std::process;
use tracing::error;
use tracing_subscriber::EnvFilter;

use wirelang_api::{run, RunConfig, WirelangError};

#[derive(Parser)]
#[command(
    name = "wirelang",
    about = "Wirelang - node graph scripting language",
    version = "0.1.0"
)]
struct Cli {
    /// Source file to run
    #[arg(value_name = "FILE")]
    file: PathBuf,

    /// JSON config file (fields of RunConfig); overrides the flags below
    #[arg(long, value_name = "CONFIG")]
    config: Option<PathBuf>,

    /// Print the compiled instruction listing before running
    #[arg(long)]
    dump_code: bool,

    /// Print the program back from the parsed graph instead of running it
    #[arg(long)]
    serialize: bool,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config = match build_config(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    };

    let source = match std::fs::read_to_string(&cli.file) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error: cannot read '{}': {}", cli.file.display(), e);
            process::exit(1);
        }
    };

    match run(&source, &config) {
        Ok(output) => {
            if let Some(listing) = &output.listing {
                println!("{}", listing);
            }
            println!("{}", output.text);
        }
        Err(e) => {
            report_error(&e);
            process::exit(1);
        }
    }
}

/// Merge the config file (when given) with the command line flags.
fn build_config(cli: &Cli) -> Result<RunConfig, String> {
    let Some(path) = &cli.config else {
        return Ok(RunConfig {
            dump_code: cli.dump_code,
            serialize_only: cli.serialize,
        });
    };

    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("cannot read '{}': {}", path.display(), e))?;
    serde_json::from_str(&content).map_err(|e| format!("invalid '{}': {}", path.display(), e))
}

fn report_error(e: &WirelangError) {
    error!(phase = e.phase(), "execution failed");
    eprintln!("Error ({}): {}", e.phase(), e);
}
