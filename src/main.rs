use std::fs;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use plannetic::core::{
    CancellationToken, EngineConfig, MonteCarloConfig, Scenario, StressCatalog,
    generate_projections_with, run_monte_carlo_with, run_stress_tests_stochastic,
    run_stress_tests_with, summarize_stress_results,
};

#[derive(Parser, Debug)]
#[command(
    name = "plannetic",
    about = "Cash-flow projection, stress testing and Monte Carlo analysis for retirement plans"
)]
struct Cli {
    #[arg(long, global = true, help = "JSON engine configuration file")]
    config: Option<PathBuf>,
    #[arg(long, global = true, help = "Planned retirement drawdown rate, percent of pension pot")]
    drawdown_rate: Option<f64>,
    #[arg(long, global = true, help = "Upper bound on Monte Carlo paths")]
    max_paths: Option<usize>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the JSON HTTP API.
    Serve {
        #[arg(long, default_value_t = 8080)]
        port: u16,
    },
    /// Run a deterministic projection.
    Project {
        #[arg(long)]
        scenario: PathBuf,
    },
    /// Run stress tests against the built-in or a custom catalog.
    Stress {
        #[arg(long)]
        scenario: PathBuf,
        #[arg(long, value_delimiter = ',')]
        ids: Vec<String>,
        #[arg(long)]
        catalog: Option<PathBuf>,
        #[arg(long)]
        stochastic: bool,
        #[arg(long)]
        paths: Option<usize>,
    },
    /// Run a Monte Carlo simulation.
    MonteCarlo {
        #[arg(long)]
        scenario: PathBuf,
        #[arg(long)]
        paths: Option<usize>,
        #[arg(long)]
        seed: Option<u64>,
        #[arg(long)]
        regime_switching: bool,
        #[arg(long)]
        threads: Option<usize>,
    },
    /// Print the stress scenario catalog.
    Catalog {
        #[arg(long)]
        catalog: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(msg) => {
            error!("{msg}");
            std::process::exit(2);
        }
    };

    let outcome = match cli.command {
        Command::Serve { port } => plannetic::api::run_http_server(port, config)
            .await
            .map_err(|e| format!("server error: {e}")),
        command => tokio::task::spawn_blocking(move || run_command(command, &config))
            .await
            .map_err(|e| format!("worker failed: {e}"))
            .and_then(|result| result),
    };

    if let Err(msg) = outcome {
        error!("{msg}");
        std::process::exit(1);
    }
}

fn load_config(cli: &Cli) -> Result<EngineConfig, String> {
    let mut config = match &cli.config {
        Some(path) => {
            let raw = read_file(path)?;
            EngineConfig::from_json(&raw)
                .map_err(|e| format!("--config {}: {e}", path.display()))?
        }
        None => EngineConfig::default(),
    };

    if let Some(rate) = cli.drawdown_rate {
        if !(0.0..=100.0).contains(&rate) {
            return Err("--drawdown-rate must be within [0, 100]".to_string());
        }
        config.planned_drawdown_rate = rate;
    }
    if let Some(max) = cli.max_paths {
        if max < config.monte_carlo.min_paths {
            return Err(format!(
                "--max-paths must be >= {}",
                config.monte_carlo.min_paths
            ));
        }
        config.monte_carlo.max_paths = max;
    }

    info!(
        drawdown_rate = config.planned_drawdown_rate,
        max_paths = config.monte_carlo.max_paths,
        "engine configuration loaded"
    );
    Ok(config)
}

fn run_command(command: Command, config: &EngineConfig) -> Result<(), String> {
    match command {
        Command::Serve { .. } => Err("serve must run on the async runtime".to_string()),
        Command::Project { scenario } => {
            let scenario = load_scenario(&scenario)?;
            let result = generate_projections_with(&scenario, config).map_err(|e| e.to_string())?;
            print_json(&result)
        }
        Command::Stress {
            scenario,
            ids,
            catalog,
            stochastic,
            paths,
        } => {
            let scenario = load_scenario(&scenario)?;
            let catalog = load_catalog(catalog.as_deref())?;
            let id_refs: Vec<&str> = ids.iter().map(String::as_str).collect();
            let results = if stochastic {
                let mut mc = MonteCarloConfig::from_limits(&config.monte_carlo);
                if let Some(paths) = paths {
                    mc.paths = paths;
                }
                run_stress_tests_stochastic(
                    &scenario,
                    Some(id_refs.as_slice()),
                    &catalog,
                    &mc,
                    config,
                    &CancellationToken::new(),
                )
            } else {
                run_stress_tests_with(&scenario, Some(id_refs.as_slice()), &catalog, config)
            }
            .map_err(|e| e.to_string())?;

            let summary = summarize_stress_results(&results);
            print_json(&StressReport { results, summary })
        }
        Command::MonteCarlo {
            scenario,
            paths,
            seed,
            regime_switching,
            threads,
        } => {
            let scenario = load_scenario(&scenario)?;
            let mut mc = MonteCarloConfig::from_limits(&config.monte_carlo);
            if let Some(paths) = paths {
                mc.paths = paths;
            }
            if let Some(seed) = seed {
                mc.seed = seed;
            }
            if let Some(threads) = threads {
                mc.max_concurrency = threads;
            }
            mc.regime_switching = regime_switching;

            let result = run_monte_carlo_with(&scenario, &mc, config, &CancellationToken::new())
                .map_err(|e| e.to_string())?;
            print_json(&result)
        }
        Command::Catalog { catalog } => print_json(&load_catalog(catalog.as_deref())?),
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StressReport {
    results: Vec<plannetic::core::StressTestResult>,
    summary: plannetic::core::StressTestSummary,
}

fn read_file(path: &Path) -> Result<String, String> {
    fs::read_to_string(path).map_err(|e| format!("failed to read {}: {e}", path.display()))
}

fn load_scenario(path: &Path) -> Result<Scenario, String> {
    let raw = read_file(path)?;
    serde_json::from_str(&raw).map_err(|e| format!("--scenario {}: {e}", path.display()))
}

fn load_catalog(path: Option<&Path>) -> Result<StressCatalog, String> {
    match path {
        Some(path) => StressCatalog::from_json(&read_file(path)?)
            .map_err(|e| format!("--catalog {}: {e}", path.display())),
        None => Ok(StressCatalog::builtin()),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<(), String> {
    let json = serde_json::to_string_pretty(value).map_err(|e| e.to_string())?;
    println!("{json}");
    Ok(())
}
