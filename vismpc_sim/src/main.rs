//! VisMPC Simulator CLI
//!
//! Run closed-loop planning scenarios against the synthetic tracker.

use clap::Parser;
use std::path::{Path, PathBuf};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use vismpc_core::PlannerConfig;
use vismpc_sim::scenarios::ScenarioId;
use vismpc_sim::{ScenarioResult, ScenarioRunner};

/// Visual MPC simulation CLI
#[derive(Parser, Debug)]
#[command(name = "vismpc-sim")]
#[command(about = "Run closed-loop visual MPC scenarios", long_about = None)]
struct Args {
    /// Master seed for determinism (0 = random from time)
    #[arg(short, long, default_value = "42")]
    seed: u64,

    /// Scenario to run (reach, multi_task, propagation, broken_renderer, all)
    #[arg(short = 'S', long, default_value = "all")]
    scenario: String,

    /// Number of consecutive seeds to test (for CI mode)
    #[arg(long, default_value = "1")]
    seeds: usize,

    /// Control steps per episode (defaults to the scenario's own)
    #[arg(long)]
    steps: Option<usize>,

    /// Planner configuration as JSON; missing fields keep their defaults
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Write per-step diagnostics as JSON under this directory
    #[arg(long)]
    diagnostics_dir: Option<PathBuf>,

    /// Stream diagnostics to a Rerun viewer
    #[arg(long)]
    rerun: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// JSON output for CI parsing
    #[arg(long)]
    json: bool,

    /// Export the episode to a JSON file
    #[arg(long)]
    export: Option<PathBuf>,
}

fn load_config(path: &Path) -> Result<PlannerConfig, String> {
    let text = std::fs::read_to_string(path).map_err(|e| format!("{}: {}", path.display(), e))?;
    PlannerConfig::from_json(&text).map_err(|e| format!("{}: {}", path.display(), e))
}

fn main() {
    let args = Args::parse();

    // Initialize logging; RUST_LOG wins over --verbose
    let default_level = if args.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if !args.json {
        info!("VisMPC Simulator v{}", env!("CARGO_PKG_VERSION"));
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    }

    // Parse scenarios
    let scenarios: Vec<ScenarioId> = if args.scenario == "all" {
        ScenarioId::all()
    } else {
        match args.scenario.parse() {
            Ok(id) => vec![id],
            Err(e) => {
                eprintln!("Error: {}", e);
                let names: Vec<&str> = ScenarioId::all().iter().map(|s| s.name()).collect();
                eprintln!("Available scenarios: {}, all", names.join(", "));
                std::process::exit(1);
            }
        }
    };

    if args.export.is_some() && (scenarios.len() > 1 || args.seeds > 1) {
        eprintln!("Error: --export only supports a single scenario and seed, not 'all'");
        std::process::exit(1);
    }

    let config = match args.config.as_deref().map(load_config).transpose() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: invalid planner config {}", e);
            std::process::exit(1);
        }
    };

    // Determine base seed
    let base_seed = if args.seed == 0 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(42)
    } else {
        args.seed
    };

    // Track results
    let mut all_results: Vec<ScenarioResult> = Vec::new();
    let mut failed_count = 0;

    for seed_offset in 0..args.seeds {
        let seed = base_seed.wrapping_add(seed_offset as u64);

        let mut runner = ScenarioRunner::new(seed);
        if let Some(steps) = args.steps {
            runner = runner.with_steps(steps);
        }
        if let Some(config) = &config {
            runner = runner.with_config(config.clone());
        }
        if let Some(path) = &args.export {
            runner = runner.with_export(path);
        }
        if let Some(dir) = &args.diagnostics_dir {
            runner = runner.with_diagnostics_dir(dir);
        } else if args.rerun {
            runner = runner.with_rerun();
        }

        for scenario in &scenarios {
            let result = runner.run(*scenario);

            if !args.json {
                if result.passed {
                    info!(
                        "✓ {} (seed={}) PASSED in {} steps, final distance {:.2}px",
                        scenario.name(),
                        seed,
                        result.steps_executed,
                        result.final_distance.unwrap_or(f64::NAN)
                    );
                } else {
                    error!(
                        "✗ {} (seed={}) FAILED: {}",
                        scenario.name(),
                        seed,
                        result.failure_reason.as_deref().unwrap_or("unknown")
                    );
                }
            }

            if !result.passed {
                failed_count += 1;
            }

            all_results.push(result);
        }
    }

    // Summary
    let total = all_results.len();
    let passed = total - failed_count;

    if args.json {
        // JSON output for CI parsing
        let summary = serde_json::json!({
            "total": total,
            "passed": passed,
            "failed": failed_count,
            "results": all_results,
        });
        match serde_json::to_string_pretty(&summary) {
            Ok(text) => println!("{}", text),
            Err(e) => error!("Failed to serialize summary: {}", e),
        }
    } else {
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

        if failed_count == 0 {
            info!("All {} scenario runs passed", total);
        } else {
            error!("{}/{} scenario runs failed", failed_count, total);

            // List failed seeds
            for result in &all_results {
                if !result.passed {
                    error!(
                        "  - {} seed={}: {}",
                        result.scenario,
                        result.seed,
                        result.failure_reason.as_deref().unwrap_or("unknown")
                    );
                }
            }
        }
    }

    // Exit with proper code for CI
    if failed_count > 0 {
        std::process::exit(1);
    }
}
