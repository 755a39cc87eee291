//! HBP Engine - command-line driver for the allocation pipeline.
//!
//! Reads an analysis request as JSON, runs it against the configured
//! tables and prints the report as JSON on stdout. Logs go to stderr.

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use hbp_common::config::{config_dir, Config};
use hbp_common::config_loader::check_modular_files;
use hbp_common::logging::init_logging_with_exclusions;
use hbp_engine::{AnalysisRequest, EngineConfig, MacroPortfolioEngine, MacroError, Objective};

/// Macro-driven portfolio allocation.
#[derive(Parser, Debug)]
#[command(name = "hbp-engine")]
#[command(version)]
#[command(about = "Score the macro scenario, rank assets and optimize portfolio weights.", long_about = None)]
struct Cli {
    /// Configuration directory (defaults to $HBP_CONFIG_DIR or ~/.hbp)
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run one analysis request
    Analyze {
        /// Request file, `-` for stdin
        #[arg(short, long)]
        input: PathBuf,

        /// Override the configured objective
        #[arg(long, value_enum)]
        objective: Option<ObjectiveArg>,

        /// Target annual return, implies --objective target-return
        #[arg(long)]
        target: Option<f64>,

        /// Pretty-print the report
        #[arg(long)]
        pretty: bool,
    },
    /// Run several independent requests in parallel
    Batch {
        /// Request files
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        #[arg(long)]
        pretty: bool,
    },
    /// Print the effective engine configuration
    ShowConfig {
        #[arg(long)]
        pretty: bool,
    },
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum ObjectiveArg {
    MaxSharpe,
    MinVariance,
    TargetReturn,
}

impl From<ObjectiveArg> for Objective {
    fn from(arg: ObjectiveArg) -> Self {
        match arg {
            ObjectiveArg::MaxSharpe => Objective::MaxSharpe,
            ObjectiveArg::MinVariance => Objective::MinVariance,
            ObjectiveArg::TargetReturn => Objective::TargetReturn,
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "Run failed");
            eprintln!("Error: {e:#}");
            ExitCode::from(exit_code(&e))
        }
    }
}

/// sysexits-style code for the error at the root of `err`.
fn exit_code(err: &anyhow::Error) -> u8 {
    if let Some(common) = err.downcast_ref::<hbp_common::Error>() {
        return u8::try_from(common.exit_code()).unwrap_or(1);
    }
    match err.downcast_ref::<MacroError>() {
        Some(MacroError::InvalidConstraints(_)) => 78,
        Some(_) => 65,
        None => 1,
    }
}

fn run(cli: Cli) -> Result<()> {
    let dir = cli.config_dir.unwrap_or_else(config_dir);
    let config = load_config(&dir)?;

    init_logging_with_exclusions(
        &config.observability.log_level,
        &config.observability.log_format,
        &config.observability.excluded_targets,
    );
    tracing::info!(config_dir = %dir.display(), "HBP Engine v{}", env!("CARGO_PKG_VERSION"));
    for (file, present) in check_modular_files(Some(dir.clone())) {
        tracing::debug!(file = %file, present, "Config file");
    }

    let engine_config = EngineConfig::from_config(&config)?;

    match cli.command {
        Commands::Analyze {
            input,
            objective,
            target,
            pretty,
        } => {
            let mut request = read_request(&input)?;
            apply_overrides(&mut request, &engine_config, objective, target)?;
            let engine = MacroPortfolioEngine::new(engine_config)?;
            let report = engine.analyze(&request)?;
            for warning in &report.warnings {
                tracing::warn!(warning = %warning, "Partial result");
            }
            print_json(&report, pretty)
        }
        Commands::Batch { inputs, pretty } => {
            let requests = inputs
                .iter()
                .map(|path| read_request(path))
                .collect::<Result<Vec<_>>>()?;
            let engine = MacroPortfolioEngine::new(engine_config)?;
            let results = engine.analyze_batch(&requests);

            let mut failed = 0;
            let output: Vec<serde_json::Value> = inputs
                .iter()
                .zip(results)
                .map(|(path, result)| match result {
                    Ok(report) => serde_json::json!({ "input": path, "report": report }),
                    Err(e) => {
                        failed += 1;
                        tracing::error!(input = %path.display(), error = %e, "Request failed");
                        serde_json::json!({ "input": path, "error": e.to_string() })
                    }
                })
                .collect();
            print_json(&output, pretty)?;
            if failed > 0 {
                bail!("{failed} of {} requests failed", inputs.len());
            }
            Ok(())
        }
        Commands::ShowConfig { pretty } => print_json(&engine_config, pretty),
    }
}

/// Merged configuration with `HBP_*` overrides; failures keep their
/// `hbp_common::Error` so the exit code reflects them.
fn load_config(dir: &Path) -> Result<Config> {
    Ok(Config::load_with_env(dir)?)
}

fn read_request(path: &Path) -> Result<AnalysisRequest> {
    let content = if path.as_os_str() == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("Failed to read request from stdin")?;
        buf
    } else {
        fs::read_to_string(path)
            .with_context(|| format!("Failed to read request from {}", path.display()))?
    };
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse request from {}", path.display()))
}

fn apply_overrides(
    request: &mut AnalysisRequest,
    config: &EngineConfig,
    objective: Option<ObjectiveArg>,
    target: Option<f64>,
) -> Result<()> {
    if let Some(objective) = objective {
        request.objective = Some(objective.into());
    }
    if let Some(target) = target {
        if !target.is_finite() {
            bail!("--target must be a finite number");
        }
        match request.objective {
            None => request.objective = Some(Objective::TargetReturn),
            Some(Objective::TargetReturn) => {}
            Some(other) => bail!("--target only applies to target-return, got {other}"),
        }
        request
            .constraints
            .get_or_insert_with(|| config.optimizer.constraints.clone())
            .target_return = Some(target);
    }
    Ok(())
}

fn print_json<T: serde::Serialize>(value: &T, pretty: bool) -> Result<()> {
    let json = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    println!("{json}");
    Ok(())
}
