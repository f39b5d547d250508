use std::path::Path;
use std::process::ExitCode;

use serde_json::Value;

use simpool::config::BatchOptions;
use simpool::demo::QueueModel;
use simpool::error::{ConfigError, Error};
use simpool::job::{SimConfig, SimResult, simulate};
use simpool::{simulate_many, worker};

fn main() -> ExitCode {
    // Stdout is reserved for results and, in workers, for the protocol.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    if worker::is_worker_process() {
        return worker::serve::<QueueModel>();
    }

    let Some(path) = std::env::args().nth(1) else {
        eprintln!("Usage: simpool <config.json>");
        eprintln!("  A JSON object runs one job; a JSON array runs a batch.");
        return ExitCode::from(2);
    };

    match run(Path::new(&path)) {
        Ok(results) => {
            let failed = results.iter().filter(|r| r.is_failure()).count();
            match serde_json::to_string_pretty(&results) {
                Ok(json) => println!("{json}"),
                Err(e) => {
                    eprintln!("Error: failed to encode results: {e}");
                    return ExitCode::FAILURE;
                }
            }
            if failed > 0 {
                tracing::warn!(failed, total = results.len(), "Some jobs failed");
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            }
        }
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(path: &Path) -> Result<Vec<SimResult>, Error> {
    let text = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
    let document: Value = serde_json::from_str(&text)
        .map_err(|e| ConfigError::ParseError(format!("{}: {e}", path.display())))?;

    match document {
        Value::Array(items) => {
            let configs = items
                .into_iter()
                .map(SimConfig::try_from)
                .collect::<Result<Vec<_>, _>>()?;
            let options = BatchOptions::from_env();
            let runtime = tokio::runtime::Runtime::new().map_err(ConfigError::Io)?;
            runtime.block_on(simulate_many::<QueueModel>(configs, &options))
        }
        single => {
            let config = SimConfig::try_from(single)?;
            Ok(vec![simulate::<QueueModel>(config, false, None)?])
        }
    }
}
