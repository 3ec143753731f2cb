//! Phase scheduler.
//!
//! Within a phase, steps run in dependency rounds: every pending step with no
//! unresolved dependency is launched, the round is awaited as a whole, and the
//! names of finished steps (succeeded or failed) are struck from the remaining
//! dependency lists before the next round is picked. A semaphore sized to the
//! plan's concurrency limit gates every launch, so a wide round never exceeds
//! the worker limit. Phases run strictly one after another.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use assay_types::{Backoff, DependencyMode, ExecutionPlan, ExecutionStep, StepId};
use futures_util::StreamExt;
use futures_util::stream::FuturesUnordered;
use serde_json::Value;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use crate::instrument::{InstrumentError, StepContext};
use crate::report::{PhaseReport, StepOutcome};
use crate::retry::{RetryOutcome, retry_with_backoff};
use crate::runner::StepRunner;

#[derive(Debug, Clone, Copy, Default)]
pub struct SchedulerOptions {
    /// Wall-clock schedule between step retry attempts.
    pub backoff: Backoff,
    pub dependency_mode: DependencyMode,
}

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("Step {step_id} aborted phase '{phase}': {message}")]
    StepExecution {
        phase: String,
        step_id: StepId,
        message: String,
        /// Rounds and outcomes recorded before the abort, the failing step included.
        report: PhaseReport,
    },
    #[error("Unreachable steps in phase '{phase}': {}", .steps.join(", "))]
    UnreachableSteps {
        phase: String,
        steps: Vec<String>,
        report: PhaseReport,
    },
}

impl SchedulerError {
    /// What the phase recorded before it failed.
    #[must_use]
    pub fn report(&self) -> &PhaseReport {
        match self {
            Self::StepExecution { report, .. } | Self::UnreachableSteps { report, .. } => report,
        }
    }
}

/// A plan run that stopped at a failing phase.
#[derive(Debug, thiserror::Error)]
#[error("{source}")]
pub struct PlanAborted {
    /// Reports of the phases that finished before the failure.
    pub completed: Vec<PhaseReport>,
    pub source: SchedulerError,
}

pub struct Scheduler {
    runner: Arc<dyn StepRunner>,
    options: SchedulerOptions,
}

impl Scheduler {
    #[must_use]
    pub fn new(runner: Arc<dyn StepRunner>, options: SchedulerOptions) -> Self {
        Self { runner, options }
    }

    /// Run every phase of `plan` in order.
    pub async fn run_plan(
        &self,
        plan: &ExecutionPlan,
        execution_id: &str,
    ) -> Result<Vec<PhaseReport>, PlanAborted> {
        let mut completed: Vec<PhaseReport> = Vec::with_capacity(plan.phases().len());
        for phase in plan.phases() {
            if completed.iter().any(|report| report.phase == *phase) {
                debug!(phase = %phase, "Phase already executed, skipping repeat");
                continue;
            }
            match self.run_phase(plan, phase, execution_id).await {
                Ok(report) => completed.push(report),
                Err(source) => return Err(PlanAborted { completed, source }),
            }
        }
        Ok(completed)
    }

    /// Run the steps of one phase.
    pub async fn run_phase(
        &self,
        plan: &ExecutionPlan,
        phase: &str,
        execution_id: &str,
    ) -> Result<PhaseReport, SchedulerError> {
        let steps: Vec<&ExecutionStep> = plan.steps_in_phase(phase).collect();
        let workers = Semaphore::new(plan.concurrency_limit() as usize);
        let mut report = PhaseReport::new(phase);

        // Unresolved dependency names, by position in `steps`.
        let mut waiting_on: Vec<Vec<&str>> = steps
            .iter()
            .map(|step| step.dependencies().iter().map(String::as_str).collect())
            .collect();
        let mut pending: Vec<usize> = (0..steps.len()).collect();

        info!(
            phase,
            steps = steps.len(),
            concurrency_limit = plan.concurrency_limit(),
            "Starting phase"
        );

        loop {
            let (ready, blocked): (Vec<usize>, Vec<usize>) = pending
                .iter()
                .copied()
                .partition(|&idx| waiting_on[idx].is_empty());
            if ready.is_empty() {
                break;
            }
            pending = blocked;
            report
                .rounds
                .push(ready.iter().map(|&idx| steps[idx].name().to_owned()).collect());
            debug!(
                phase,
                round = report.rounds.len(),
                launched = ready.len(),
                "Launching round"
            );

            let mut in_flight: FuturesUnordered<_> = ready
                .iter()
                .map(|&idx| {
                    let step = steps[idx];
                    let workers = &workers;
                    async move { (idx, self.run_step(step, execution_id, workers).await) }
                })
                .collect();

            let mut finished: Vec<(usize, StepOutcome)> = Vec::with_capacity(ready.len());
            let mut fatal = None;
            while let Some((idx, outcome)) = in_flight.next().await {
                let aborts = !outcome.success && steps[idx].break_on_failure();
                if aborts {
                    fatal = Some((idx, outcome.error.clone().unwrap_or_default()));
                }
                finished.push((idx, outcome));
                if aborts {
                    break;
                }
            }
            // Siblings still running when a phase-fatal failure lands are cancelled.
            drop(in_flight);
            finished.sort_by_key(|(idx, _)| *idx);

            if let Some((idx, message)) = fatal {
                let step_id = steps[idx].step_id().clone();
                report.outcomes.extend(finished.into_iter().map(|(_, outcome)| outcome));
                error!(phase, step_id = %step_id, error = %message, "Step failure aborted phase");
                return Err(SchedulerError::StepExecution {
                    phase: phase.to_owned(),
                    step_id,
                    message,
                    report,
                });
            }

            for (idx, outcome) in finished {
                let name = steps[idx].name();
                for deps in &mut waiting_on {
                    deps.retain(|dep| *dep != name);
                }
                report.outcomes.push(outcome);
            }
        }

        if !pending.is_empty() {
            let stuck: Vec<String> = pending
                .iter()
                .map(|&idx| steps[idx].name().to_owned())
                .collect();
            match self.options.dependency_mode {
                DependencyMode::Strict => {
                    error!(phase, steps = ?stuck, "Unreachable steps");
                    return Err(SchedulerError::UnreachableSteps {
                        phase: phase.to_owned(),
                        steps: stuck,
                        report,
                    });
                }
                DependencyMode::Lenient => {
                    warn!(phase, steps = ?stuck, "Unreachable steps left pending");
                    report.unreachable = stuck;
                }
            }
        }

        info!(
            phase,
            rounds = report.rounds.len(),
            succeeded = report.outcomes.len() - report.failures(),
            failed = report.failures(),
            "Phase complete"
        );
        Ok(report)
    }

    /// One step: wait for a worker, then attempt it under its retry policy,
    /// all attempts bounded by the step's overall timeout.
    async fn run_step(&self, step: &ExecutionStep, execution_id: &str, workers: &Semaphore) -> StepOutcome {
        let started = Instant::now();
        let Ok(_permit) = workers.acquire().await else {
            return outcome(step, started, 0, Err("worker pool closed".to_owned()));
        };

        let attempt_counter = AtomicU32::new(0);
        let retried = retry_with_backoff(
            step.retry_policy(),
            &self.options.backoff,
            |attempt| {
                attempt_counter.store(attempt, Ordering::Relaxed);
                let ctx = StepContext {
                    execution_id: execution_id.to_owned(),
                    phase: step.phase().to_owned(),
                    attempt,
                };
                async move { self.runner.run(step, &ctx).await }
            },
            InstrumentError::is_retryable,
        );

        let finished = match step.timeout_secs() {
            Some(secs) => tokio::time::timeout(Duration::from_secs(secs), retried)
                .await
                .map_err(|_| format!("step timed out after {secs}s")),
            None => Ok(retried.await),
        };

        let result = match finished {
            Ok(RetryOutcome::Success { value, attempts }) => (attempts, Ok(value)),
            Ok(RetryOutcome::Exhausted { attempts, last }) => (attempts, Err(last.to_string())),
            Err(message) => (attempt_counter.load(Ordering::Relaxed), Err(message)),
        };
        outcome(step, started, result.0, result.1)
    }
}

fn outcome(step: &ExecutionStep, started: Instant, attempts: u32, result: Result<Value, String>) -> StepOutcome {
    let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
    match result {
        Ok(output) => {
            debug!(step_id = %step.step_id(), attempts, duration_ms, "Step succeeded");
            StepOutcome {
                step_id: step.step_id().clone(),
                name: step.name().to_owned(),
                success: true,
                output: Some(output),
                error: None,
                attempts,
                duration_ms,
            }
        }
        Err(message) => {
            error!(step_id = %step.step_id(), attempts, error = %message, "Step failed");
            StepOutcome {
                step_id: step.step_id().clone(),
                name: step.name().to_owned(),
                success: false,
                output: None,
                error: Some(message),
                attempts,
                duration_ms,
            }
        }
    }
}
