//! Run orchestration: parse, validate, preflight, compile, execute.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use assay_manifest::{CompileError, Manifest, ParseError, RawManifest, compile, parse, validate_typed};
use assay_types::schema::ManifestSpec;
use assay_types::{RetryPolicy, ValidationResult};
use chrono::Utc;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::instrument::{InstrumentError, InstrumentRegistry, calibrate};
use crate::report::{PhaseReport, RunReport};
use crate::retry::{RetryOutcome, retry_with_backoff};
use crate::runner::RegistryRunner;
use crate::scheduler::{PlanAborted, Scheduler, SchedulerError, SchedulerOptions};

pub const INSTRUMENT_AVAILABILITY: &str = "instrument_availability";
pub const SUBSTRATE_ACCESSIBILITY: &str = "substrate_accessibility";
pub const RATE_LIMIT_CAPACITY: &str = "rate_limit_capacity";

#[derive(Debug, thiserror::Error)]
pub enum ConductorError {
    #[error("Failed to read manifest {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error("Manifest is invalid: {errors}")]
    Invalid { errors: ValidationResult },
    #[error("Preflight check '{check}' failed: {message}")]
    Preflight { check: String, message: String },
    #[error(transparent)]
    Compile(#[from] CompileError),
    #[error("Execution {execution_id} failed: {source}")]
    Execution {
        execution_id: String,
        #[source]
        source: SchedulerError,
        /// Phases that finished before the failure, followed by the failing
        /// phase's partial report.
        phases: Vec<PhaseReport>,
    },
    #[error("Conductor is closed")]
    Closed,
}

#[derive(Debug, Clone, Copy)]
pub struct ConductorOptions {
    /// Upper bound on concurrent [`Conductor::run`] calls.
    pub max_concurrent_executions: usize,
    pub scheduler: SchedulerOptions,
    /// Attempts granted to each preflight check.
    pub preflight: RetryPolicy,
}

impl Default for ConductorOptions {
    fn default() -> Self {
        Self {
            max_concurrent_executions: 10,
            scheduler: SchedulerOptions::default(),
            preflight: RetryPolicy {
                max_attempts: 3,
                backoff_factor: 1.0,
                timeout_secs: None,
            },
        }
    }
}

/// Read and parse a manifest file.
pub fn parse_file(path: &Path) -> Result<Manifest, ConductorError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConductorError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(parse(text)?)
}

/// Drives manifests from raw input to a [`RunReport`].
#[derive(Debug)]
pub struct Conductor {
    registry: Arc<InstrumentRegistry>,
    options: ConductorOptions,
    executions: Semaphore,
}

impl Conductor {
    #[must_use]
    pub fn new(registry: Arc<InstrumentRegistry>, options: ConductorOptions) -> Self {
        let executions = Semaphore::new(options.max_concurrent_executions.max(1));
        Self {
            registry,
            options,
            executions,
        }
    }

    /// Refuse new runs. Runs already admitted finish normally.
    pub fn close(&self) {
        self.executions.close();
    }

    pub async fn run(&self, raw: impl Into<RawManifest>) -> Result<RunReport, ConductorError> {
        let manifest = parse(raw)?;
        self.run_manifest(&manifest).await
    }

    pub async fn run_manifest(&self, manifest: &Manifest) -> Result<RunReport, ConductorError> {
        let _slot = self
            .executions
            .acquire()
            .await
            .map_err(|_| ConductorError::Closed)?;

        let spec = validate_typed(manifest).map_err(|errors| ConductorError::Invalid { errors })?;

        let started_at = Utc::now();
        let clock = Instant::now();
        let execution_id = format!(
            "ex_{}_{}",
            started_at.format("%Y%m%d_%H%M%S"),
            &uuid::Uuid::new_v4().simple().to_string()[..8]
        );
        info!(
            execution_id = %execution_id,
            manifest_id = %spec.id,
            "Starting execution"
        );

        self.preflight(&spec).await?;
        let plan = compile(manifest)?;
        debug!(
            execution_id = %execution_id,
            steps = plan.step_count(),
            phases = plan.phases().len(),
            estimated_secs = plan.estimated_duration_secs(),
            "Compiled plan"
        );

        let runner =
            RegistryRunner::new(Arc::clone(&self.registry)).with_instruments(&spec.instruments);
        let scheduler = Scheduler::new(Arc::new(runner), self.options.scheduler);
        let phases = match scheduler.run_plan(&plan, &execution_id).await {
            Ok(phases) => phases,
            Err(PlanAborted { mut completed, source }) => {
                completed.push(source.report().clone());
                return Err(ConductorError::Execution {
                    execution_id,
                    source,
                    phases: completed,
                });
            }
        };

        let report = RunReport {
            execution_id,
            manifest_id: spec.id,
            started_at,
            duration_ms: u64::try_from(clock.elapsed().as_millis()).unwrap_or(u64::MAX),
            phases,
        };
        info!(
            execution_id = %report.execution_id,
            steps = report.step_count(),
            success = report.is_success(),
            duration_ms = report.duration_ms,
            "Execution complete"
        );
        Ok(report)
    }

    async fn preflight(&self, spec: &ManifestSpec) -> Result<(), ConductorError> {
        for check in &spec.validation.preflight_checks {
            match check.as_str() {
                INSTRUMENT_AVAILABILITY => {
                    let kinds = spec.dispatch_kinds();
                    let kinds = kinds.as_slice();
                    let outcome = retry_with_backoff(
                        &self.options.preflight,
                        &self.options.scheduler.backoff,
                        |_| self.check_instruments(kinds),
                        |failure: &PreflightFailure| failure.retryable,
                    )
                    .await;
                    if let RetryOutcome::Exhausted { attempts, last } = outcome {
                        warn!(check = %check, attempts, error = %last, "Preflight check failed");
                        return Err(ConductorError::Preflight {
                            check: check.clone(),
                            message: last.to_string(),
                        });
                    }
                    debug!(check = %check, instruments = kinds.len(), "Preflight check passed");
                }
                SUBSTRATE_ACCESSIBILITY | RATE_LIMIT_CAPACITY => {
                    debug!(check = %check, "Preflight check passed");
                }
                _ => warn!(check = %check, "Unknown preflight check, skipping"),
            }
        }
        Ok(())
    }

    /// Every kind must be registered and calibrate cleanly.
    async fn check_instruments(&self, kinds: &[&str]) -> Result<(), PreflightFailure> {
        let mut failures = Vec::new();
        let mut retryable = true;
        for kind in kinds {
            let result = match self.registry.lookup(kind) {
                Ok(instrument) => calibrate(instrument).await.map(|_| ()),
                Err(err) => Err(err),
            };
            if let Err(err) = result {
                retryable &= err.is_retryable();
                failures.push(err);
            }
        }
        if failures.is_empty() {
            return Ok(());
        }
        Err(PreflightFailure { failures, retryable })
    }
}

#[derive(Debug)]
struct PreflightFailure {
    failures: Vec<InstrumentError>,
    /// False once any failure is one another attempt cannot fix.
    retryable: bool,
}

impl std::fmt::Display for PreflightFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (idx, failure) in self.failures.iter().enumerate() {
            if idx > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{failure}")?;
        }
        Ok(())
    }
}
