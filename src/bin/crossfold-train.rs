//! Train a fold ensemble from a TOML config and record it as a tracking run.

use std::path::PathBuf;

use crossfold::config::load_train_config;
use crossfold::logging;
use crossfold::pipeline::run_training;

fn main() {
    if let Err(err) = run() {
        eprintln!("{err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), String> {
    let options = parse_args(std::env::args().skip(1).collect())?;
    if let Err(err) = logging::init("crossfold-train") {
        eprintln!("Logging disabled: {err}");
    }
    let config = load_train_config(&options.config).map_err(|err| err.to_string())?;
    let summary = run_training(&config).map_err(|err| err.to_string())?;
    println!("run_id: {}", summary.run_id);
    println!("models: {}", summary.n_models);
    println!("run dir: {}", summary.run_dir.display());
    Ok(())
}

#[derive(Debug, Clone)]
struct CliOptions {
    config: PathBuf,
}

fn parse_args(args: Vec<String>) -> Result<CliOptions, String> {
    let mut config: Option<PathBuf> = None;

    let mut idx = 0usize;
    while idx < args.len() {
        match args[idx].as_str() {
            "-h" | "--help" => return Err(help_text()),
            "--config" => {
                idx += 1;
                let value = args.get(idx).ok_or_else(|| "--config requires a value".to_string())?;
                config = Some(PathBuf::from(value));
            }
            unknown => return Err(format!("Unknown argument: {unknown}\n\n{}", help_text())),
        }
        idx += 1;
    }

    let config = config.ok_or_else(help_text)?;
    Ok(CliOptions { config })
}

fn help_text() -> String {
    [
        "crossfold-train",
        "",
        "Trains one boosted-stump model per left-out fold and logs them to a tracking run.",
        "",
        "Usage:",
        "  crossfold-train --config <train.toml>",
        "",
        "Options:",
        "  --config <file>  Training config (required).",
        "",
        "Environment:",
        "  CROSSFOLD_HOME   Base directory for logs and the default tracking store.",
        "  RUST_LOG         Log filter (default: info).",
    ]
    .join("\n")
}
