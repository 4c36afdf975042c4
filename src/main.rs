//! Retrace CLI

use std::path::{Path, PathBuf};
use std::process;

use anyhow::Context;
use tracing::{info, Level};

use retrace::Config;

fn main() {
    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        eprintln!("Retrace v{}", env!("CARGO_PKG_VERSION"));
        eprintln!();
        eprintln!("Usage: retrace <command> [options]");
        eprintln!();
        eprintln!("Commands:");
        eprintln!("  check <config.toml>    Validate a configuration file");
        process::exit(1);
    }

    retrace::logging::init(Level::INFO);

    let command = &args[1];

    match command.as_str() {
        "check" => {
            if args.len() < 3 {
                eprintln!("Usage: retrace check <config.toml>");
                process::exit(1);
            }

            if let Err(e) = check(&PathBuf::from(&args[2])) {
                eprintln!("Error: {e:#}");
                process::exit(1);
            }
        }
        _ => {
            eprintln!("Unknown command: {command}");
            eprintln!("Run 'retrace' for usage information.");
            process::exit(1);
        }
    }
}

fn check(path: &Path) -> anyhow::Result<()> {
    let config = Config::from_file(path)
        .with_context(|| format!("loading {}", path.display()))?;

    info!("Configuration OK: {}", path.display());
    println!("speed = {}", config.recorder.speed);
    Ok(())
}
