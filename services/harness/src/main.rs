use std::{path::PathBuf, time::Duration};

use harness::{
    ConsoleSink, ExperimentKind, ExperimentOptions, run_experiment, verify_invariant_machinery,
};
use store::StorageSpec;

#[derive(Debug, Clone)]
struct DriverConfig {
    experiment: ExperimentKind,
    options: ExperimentOptions,
}

fn main() {
    let config = match parse_args(std::env::args().skip(1)) {
        Ok(config) => config,
        Err(message) => {
            eprintln!("{message}");
            std::process::exit(2);
        }
    };

    if let Err(err) = verify_invariant_machinery() {
        eprintln!("Fatal configuration error: {err:?}");
        std::process::exit(2);
    }

    let mut sink = ConsoleSink;
    if let Err(err) = run_experiment(config.experiment, &mut sink, &config.options) {
        eprintln!("Experiment failed: {err:?}");
        std::process::exit(1);
    }
}

fn parse_args<I>(args: I) -> Result<DriverConfig, String>
where
    I: Iterator<Item = String>,
{
    let mut experiment = ExperimentKind::AnalyzerSweep;
    let mut options = ExperimentOptions::default();
    let mut file_backed = false;
    let mut path = PathBuf::from("harness-index");

    let mut args = args.peekable();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--experiment" => {
                let value = args
                    .next()
                    .ok_or_else(|| "Missing value for --experiment".to_string())?;
                experiment = ExperimentKind::from_arg(&value).ok_or_else(|| {
                    format!(
                        "Invalid experiment '{value}'. Valid values: analyzer-sweep, index-sizes, segment-sizes, commit-speed, field-modes, search-demo, consistency, all."
                    )
                })?;
            }
            "--storage" => {
                let value = args
                    .next()
                    .ok_or_else(|| "Missing value for --storage".to_string())?;
                file_backed = match value.as_str() {
                    "memory" => false,
                    "file" => true,
                    _ => {
                        return Err(format!(
                            "Invalid storage '{value}'. Valid values: memory, file."
                        ));
                    }
                };
            }
            "--path" => {
                let value = args
                    .next()
                    .ok_or_else(|| "Missing value for --path".to_string())?;
                path = PathBuf::from(value);
            }
            "--documents" => {
                options.documents = parse_positive_usize_arg(args.next(), "--documents")?;
            }
            "--max-documents" => {
                options.max_documents = parse_positive_usize_arg(args.next(), "--max-documents")?;
            }
            "--min-iterations" => {
                options.stable.min_iterations =
                    parse_positive_usize_arg(args.next(), "--min-iterations")?;
            }
            "--budget-secs" => {
                let secs = parse_non_negative_u64_arg(args.next(), "--budget-secs")?;
                options.stable.min_wall_clock = Duration::from_secs(secs);
            }
            "--much-faster-ratio" => {
                options.much_faster_ratio =
                    parse_positive_f64_arg(args.next(), "--much-faster-ratio")?;
            }
            "--seed" => {
                options.word_seed = parse_non_negative_u64_arg(args.next(), "--seed")?;
            }
            "--help" | "-h" => return Err(usage_text().to_string()),
            _ => {
                return Err(format!("Unknown argument '{arg}'.\n\n{}", usage_text()));
            }
        }
    }

    if file_backed {
        options.storage = StorageSpec::file_backed(&path);
    }

    Ok(DriverConfig {
        experiment,
        options,
    })
}

fn parse_positive_usize_arg(value: Option<String>, flag: &str) -> Result<usize, String> {
    let raw = value.ok_or_else(|| format!("Missing value for {flag}"))?;
    let parsed = raw
        .parse::<usize>()
        .map_err(|_| format!("Invalid value '{raw}' for {flag}"))?;
    if parsed == 0 {
        return Err(format!("{flag} must be > 0"));
    }
    Ok(parsed)
}

fn parse_non_negative_u64_arg(value: Option<String>, flag: &str) -> Result<u64, String> {
    let raw = value.ok_or_else(|| format!("Missing value for {flag}"))?;
    raw.parse::<u64>()
        .map_err(|_| format!("Invalid value '{raw}' for {flag}"))
}

fn parse_positive_f64_arg(value: Option<String>, flag: &str) -> Result<f64, String> {
    let raw = value.ok_or_else(|| format!("Missing value for {flag}"))?;
    let parsed = raw
        .parse::<f64>()
        .map_err(|_| format!("Invalid value '{raw}' for {flag}"))?;
    if parsed <= 0.0 {
        return Err(format!("{flag} must be > 0"));
    }
    Ok(parsed)
}

fn usage_text() -> &'static str {
    "Usage: cargo run -p harness -- [--experiment analyzer-sweep|index-sizes|segment-sizes|commit-speed|field-modes|search-demo|consistency|all] [--storage memory|file] [--path DIR] [--documents N] [--max-documents N] [--min-iterations N] [--budget-secs N] [--much-faster-ratio X] [--seed N]"
}
