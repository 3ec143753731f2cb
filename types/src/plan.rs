//! Execution plan data model: phased steps with intra-phase dependencies.
//!
//! Pure domain types with no IO and no async. A plan is produced once per
//! manifest compilation and is never mutated afterwards: fields are private and
//! steps can only be shaped while they are being built.

use std::fmt;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::RetryPolicy;

// ── Identifiers ──────────────────────────────────────────────

/// Stable step identifier, `{phase}_{name}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct StepId(String);

impl StepId {
    #[must_use]
    pub fn new(phase: &str, name: &str) -> Self {
        Self(format!("{phase}_{name}"))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ── Step ─────────────────────────────────────────────────────

/// One instrument bound to one phase.
///
/// `name` is the phase-local handle other steps use in their dependency lists.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionStep {
    step_id: StepId,
    name: String,
    phase: String,
    instrument_id: String,
    instrument_type: String,
    parameters: Map<String, Value>,
    retry_policy: RetryPolicy,
    #[serde(rename = "timeout")]
    timeout_secs: Option<u64>,
    dependencies: Vec<String>,
    break_on_failure: bool,
}

impl ExecutionStep {
    #[must_use]
    pub fn new(
        phase: impl Into<String>,
        name: impl Into<String>,
        instrument_id: impl Into<String>,
        instrument_type: impl Into<String>,
    ) -> Self {
        let phase = phase.into();
        let name = name.into();
        Self {
            step_id: StepId::new(&phase, &name),
            name,
            phase,
            instrument_id: instrument_id.into(),
            instrument_type: instrument_type.into(),
            parameters: Map::new(),
            retry_policy: RetryPolicy::default(),
            timeout_secs: None,
            dependencies: Vec::new(),
            break_on_failure: false,
        }
    }

    pub fn with_parameters(mut self, parameters: Map<String, Value>) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    pub fn with_timeout(mut self, timeout_secs: Option<u64>) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    pub fn with_dependencies<I, S>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = dependencies.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_break_on_failure(mut self, break_on_failure: bool) -> Self {
        self.break_on_failure = break_on_failure;
        self
    }

    #[must_use]
    pub fn step_id(&self) -> &StepId {
        &self.step_id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn phase(&self) -> &str {
        &self.phase
    }

    #[must_use]
    pub fn instrument_id(&self) -> &str {
        &self.instrument_id
    }

    #[must_use]
    pub fn instrument_type(&self) -> &str {
        &self.instrument_type
    }

    #[must_use]
    pub fn parameters(&self) -> &Map<String, Value> {
        &self.parameters
    }

    #[must_use]
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    /// Overall budget for the step, covering every attempt.
    #[must_use]
    pub fn timeout_secs(&self) -> Option<u64> {
        self.timeout_secs
    }

    #[must_use]
    pub fn dependencies(&self) -> &[String] {
        &self.dependencies
    }

    #[must_use]
    pub fn break_on_failure(&self) -> bool {
        self.break_on_failure
    }
}

// ── Plan ─────────────────────────────────────────────────────

/// Traceability data copied from the source manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanMetadata {
    pub manifest_id: String,
    pub manifest_version: String,
    pub protocol_type: String,
    pub instrument_count: usize,
}

/// Compiled, ready-to-run representation of a manifest.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionPlan {
    phases: Vec<String>,
    steps: Vec<ExecutionStep>,
    concurrency_limit: u32,
    #[serde(rename = "estimated_duration")]
    estimated_duration_secs: u64,
    retry_policy: Option<RetryPolicy>,
    metadata: PlanMetadata,
}

impl ExecutionPlan {
    #[must_use]
    pub fn new(
        phases: Vec<String>,
        steps: Vec<ExecutionStep>,
        concurrency_limit: u32,
        estimated_duration_secs: u64,
        retry_policy: Option<RetryPolicy>,
        metadata: PlanMetadata,
    ) -> Self {
        Self {
            phases,
            steps,
            concurrency_limit: concurrency_limit.max(1),
            estimated_duration_secs,
            retry_policy,
            metadata,
        }
    }

    #[must_use]
    pub fn phases(&self) -> &[String] {
        &self.phases
    }

    #[must_use]
    pub fn steps(&self) -> &[ExecutionStep] {
        &self.steps
    }

    /// Steps owned by `phase`, in compiled order.
    pub fn steps_in_phase<'a>(&'a self, phase: &'a str) -> impl Iterator<Item = &'a ExecutionStep> {
        self.steps.iter().filter(move |step| step.phase == phase)
    }

    #[must_use]
    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    #[must_use]
    pub fn concurrency_limit(&self) -> u32 {
        self.concurrency_limit
    }

    #[must_use]
    pub fn estimated_duration_secs(&self) -> u64 {
        self.estimated_duration_secs
    }

    /// Plan-level default, present only when the manifest declared one.
    #[must_use]
    pub fn retry_policy(&self) -> Option<&RetryPolicy> {
        self.retry_policy.as_ref()
    }

    #[must_use]
    pub fn metadata(&self) -> &PlanMetadata {
        &self.metadata
    }
}
