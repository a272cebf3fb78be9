//! Score input samples with the fold ensemble of a training run.

use std::path::PathBuf;

use crossfold::config::load_predict_config;
use crossfold::cv::Scoring;
use crossfold::logging;
use crossfold::pipeline::run_prediction;

fn main() {
    if let Err(err) = run() {
        eprintln!("{err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), String> {
    let options = parse_args(std::env::args().skip(1).collect())?;
    if let Err(err) = logging::init("crossfold-predict") {
        eprintln!("Logging disabled: {err}");
    }
    let mut config = load_predict_config(&options.config).map_err(|err| err.to_string())?;
    if let Some(format) = options.output_format.as_deref() {
        config
            .set_output_format(format)
            .map_err(|err| err.to_string())?;
    }
    let outcomes =
        run_prediction(&config, options.run_id.as_deref()).map_err(|err| err.to_string())?;
    for outcome in outcomes {
        let note = match outcome.scoring {
            Scoring::CrossFold => "",
            Scoring::Holdout => "  (holdout model: training records scored optimistically)",
        };
        println!(
            "{:<24} {:>8} rows  {}{note}",
            outcome.sample,
            outcome.rows,
            outcome.output.display()
        );
    }
    Ok(())
}

#[derive(Debug, Clone)]
struct CliOptions {
    config: PathBuf,
    run_id: Option<String>,
    output_format: Option<String>,
}

fn parse_args(args: Vec<String>) -> Result<CliOptions, String> {
    let mut config: Option<PathBuf> = None;
    let mut run_id: Option<String> = None;
    let mut output_format: Option<String> = None;

    let mut idx = 0usize;
    while idx < args.len() {
        match args[idx].as_str() {
            "-h" | "--help" => return Err(help_text()),
            "--config" => {
                idx += 1;
                let value = args.get(idx).ok_or_else(|| "--config requires a value".to_string())?;
                config = Some(PathBuf::from(value));
            }
            "--run-id" => {
                idx += 1;
                let value = args.get(idx).ok_or_else(|| "--run-id requires a value".to_string())?;
                run_id = Some(value.clone());
            }
            "--output-format" => {
                idx += 1;
                let value = args
                    .get(idx)
                    .ok_or_else(|| "--output-format requires a value".to_string())?;
                output_format = Some(value.clone());
            }
            unknown => return Err(format!("Unknown argument: {unknown}\n\n{}", help_text())),
        }
        idx += 1;
    }

    let config = config.ok_or_else(help_text)?;
    Ok(CliOptions {
        config,
        run_id,
        output_format,
    })
}

fn help_text() -> String {
    [
        "crossfold-predict",
        "",
        "Scores every input sample with the model that excluded its fold during training.",
        "",
        "Usage:",
        "  crossfold-predict --config <predict.toml> [--run-id <id>] [--output-format <fmt>]",
        "",
        "Options:",
        "  --config <file>  Prediction config (required).",
        "  --run-id <id>    Training run to load models from (overrides run_id in the config).",
        "  --output-format <fmt>  csv, jsonl or columnar (overrides output_format).",
    ]
    .join("\n")
}
