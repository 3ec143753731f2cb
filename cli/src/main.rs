//! Assay CLI - binary entry point for the manifest pipeline.
//!
//! `validate`, `compile`, and `run` wire [`assay_manifest`] (parse, validate,
//! compile) and [`assay_engine`] (conductor, scheduler, instruments) to a
//! manifest file on disk. Plans and reports go to stdout as JSON; tracing
//! goes to stderr, filtered by `RUST_LOG` or the `[logging]` config section.
//!
//! Exit code 1 means the manifest was invalid or the run failed.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use assay_config::AssayConfig;
use assay_engine::{
    Conductor, ConductorError, ConductorOptions, InstrumentRegistry, SchedulerOptions, parse_file,
};
use assay_manifest::{compile, validate, validate_typed};

#[derive(Parser)]
#[command(name = "assay", about = "Validate, compile, and run measurement manifests", version)]
struct Cli {
    /// Config file (defaults to $ASSAY_CONFIG, then ~/.assay/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Check a manifest and print every problem found
    Validate {
        /// Manifest file (YAML or JSON)
        file: PathBuf,
    },
    /// Print the execution plan a manifest compiles to
    Compile { file: PathBuf },
    /// Run a manifest with the built-in instruments and print the report
    Run { file: PathBuf },
}

fn init_tracing(config: &AssayConfig) {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.logging.filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    // stdout carries plan and report JSON.
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();
}

fn load_config(path: Option<&Path>) -> Result<AssayConfig> {
    let config = match path {
        Some(path) => AssayConfig::load_from(path),
        None => AssayConfig::load(),
    };
    config.context("loading configuration")
}

fn conductor_options(config: &AssayConfig) -> ConductorOptions {
    ConductorOptions {
        max_concurrent_executions: config.conductor.max_concurrent_executions,
        scheduler: SchedulerOptions {
            backoff: config.retry.backoff(),
            dependency_mode: config.conductor.dependency_mode,
        },
        preflight: config.preflight.retry_policy(),
    }
}

fn print_json(value: &impl Serialize) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("serializing output")?;
    println!("{json}");
    Ok(())
}

fn print_errors<'a>(errors: impl IntoIterator<Item = &'a String>) {
    for error in errors {
        eprintln!("error: {error}");
    }
}

fn validate_cmd(file: &Path) -> Result<ExitCode> {
    let manifest = match parse_file(file) {
        Ok(manifest) => manifest,
        Err(ConductorError::Parse(err)) => {
            eprintln!("error: {err}");
            return Ok(ExitCode::FAILURE);
        }
        Err(err) => return Err(err).with_context(|| format!("validating {}", file.display())),
    };
    let result = validate(&manifest);
    if result.is_valid() {
        println!("{}: valid", file.display());
        return Ok(ExitCode::SUCCESS);
    }
    print_errors(result.errors());
    Ok(ExitCode::FAILURE)
}

fn compile_cmd(file: &Path) -> Result<ExitCode> {
    let manifest = parse_file(file).with_context(|| format!("compiling {}", file.display()))?;
    if let Err(result) = validate_typed(&manifest) {
        print_errors(result.errors());
        return Ok(ExitCode::FAILURE);
    }
    let plan = compile(&manifest).with_context(|| format!("compiling {}", file.display()))?;
    print_json(&plan)?;
    Ok(ExitCode::SUCCESS)
}

async fn run_cmd(file: &Path, config: &AssayConfig) -> Result<ExitCode> {
    let manifest = parse_file(file).with_context(|| format!("running {}", file.display()))?;
    let conductor = Conductor::new(
        Arc::new(InstrumentRegistry::with_builtins()),
        conductor_options(config),
    );

    match conductor.run_manifest(&manifest).await {
        Ok(report) => {
            print_json(&report)?;
            Ok(if report.is_success() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Err(ConductorError::Invalid { errors }) => {
            print_errors(errors.errors());
            Ok(ExitCode::FAILURE)
        }
        Err(ConductorError::Execution { source, phases, .. }) => {
            eprintln!("error: {source}");
            print_json(&phases)?;
            Ok(ExitCode::FAILURE)
        }
        Err(err) => Err(err).with_context(|| format!("running {}", file.display())),
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref());
    init_tracing(config.as_ref().unwrap_or(&AssayConfig::default()));
    let config = config?;

    match &cli.command {
        Command::Validate { file } => validate_cmd(file),
        Command::Compile { file } => compile_cmd(file),
        Command::Run { file } => run_cmd(file, &config).await,
    }
}
