//! Execution plan compiler.
//!
//! Turns a manifest into phases and steps. Input is assumed to have passed
//! validation; anything malformed that slips through falls back to defaults
//! instead of failing, except for input that is not a mapping at all.

use std::collections::HashMap;
use std::sync::LazyLock;

use assay_types::schema::{DEFAULT_PHASES, DEFAULT_STEP_KIND};
use assay_types::{ExecutionPlan, ExecutionStep, PlanMetadata, RetryPolicy};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

use crate::{Manifest, WRAPPER_KEY, value_kind};

/// Estimated wall-clock seconds for one step. A fixed planning constant.
pub const BASE_STEP_SECONDS: u64 = 30;

#[derive(Debug, Error)]
pub enum CompileError {
    #[error("cannot compile {found}: expected a parsed manifest or a mapping")]
    UnsupportedManifestType { found: &'static str },
}

/// What [`compile`] accepts.
#[derive(Debug, Clone, Copy)]
pub enum CompileInput<'a> {
    Manifest(&'a Manifest),
    Value(&'a Value),
}

impl<'a> From<&'a Manifest> for CompileInput<'a> {
    fn from(manifest: &'a Manifest) -> Self {
        Self::Manifest(manifest)
    }
}

impl<'a> From<&'a Value> for CompileInput<'a> {
    fn from(value: &'a Value) -> Self {
        Self::Value(value)
    }
}

impl<'a> CompileInput<'a> {
    fn body(self) -> Result<&'a Map<String, Value>, CompileError> {
        let value = match self {
            Self::Manifest(manifest) => return Ok(manifest.body()),
            Self::Value(value) => value,
        };
        let Value::Object(document) = value else {
            return Err(CompileError::UnsupportedManifestType {
                found: value_kind(value),
            });
        };
        match document.get(WRAPPER_KEY) {
            Some(Value::Object(inner)) => Ok(inner),
            Some(other) => Err(CompileError::UnsupportedManifestType {
                found: value_kind(other),
            }),
            None => Ok(document),
        }
    }
}

/// Compile a manifest into an [`ExecutionPlan`].
pub fn compile<'a>(input: impl Into<CompileInput<'a>>) -> Result<ExecutionPlan, CompileError> {
    let body = input.into().body()?;
    let execution = section(body, "execution");

    let phases = phase_names(body);
    let retry_policy = retry_policy(execution);
    let defaults = StepDefaults {
        retry_policy: retry_policy.unwrap_or_default(),
        timeout_secs: execution.get("timeout").and_then(Value::as_u64),
    };

    let raw_phases = protocol_phases(body);
    let steps = if raw_phases.iter().any(declares_steps) {
        detailed_steps(raw_phases, &defaults)
    } else {
        distributed_steps(instruments(body), &phases, &defaults)
    };

    let concurrency_limit = section(execution, "concurrency")
        .get("max_workers")
        .and_then(Value::as_u64)
        .map_or(1, |workers| u32::try_from(workers).unwrap_or(u32::MAX))
        .max(1);
    let estimated = estimate_duration(&steps, concurrency_limit);

    let metadata = PlanMetadata {
        manifest_id: string_or(body, "id", "unknown"),
        manifest_version: string_or(body, "version", "1.0.0"),
        protocol_type: string_or(section(body, "protocol"), "type", "sequential"),
        instrument_count: instruments(body).len(),
    };

    debug!(
        manifest_id = %metadata.manifest_id,
        phases = phases.len(),
        steps = steps.len(),
        concurrency_limit,
        estimated_secs = estimated,
        "compiled execution plan"
    );

    Ok(ExecutionPlan::new(
        phases,
        steps,
        concurrency_limit,
        estimated,
        retry_policy,
        metadata,
    ))
}

struct StepDefaults {
    retry_policy: RetryPolicy,
    timeout_secs: Option<u64>,
}

impl StepDefaults {
    fn apply(&self, step: ExecutionStep) -> ExecutionStep {
        step.with_retry_policy(self.retry_policy)
            .with_timeout(self.timeout_secs)
    }
}

static EMPTY: LazyLock<Map<String, Value>> = LazyLock::new(Map::new);

fn section<'a>(map: &'a Map<String, Value>, key: &str) -> &'a Map<String, Value> {
    map.get(key).and_then(Value::as_object).unwrap_or(&*EMPTY)
}

fn string_or(map: &Map<String, Value>, key: &str, default: &str) -> String {
    map.get(key)
        .and_then(Value::as_str)
        .unwrap_or(default)
        .to_owned()
}

fn instruments(body: &Map<String, Value>) -> &[Value] {
    body.get("instruments")
        .and_then(Value::as_array)
        .map_or(&[][..], Vec::as_slice)
}

fn protocol_phases(body: &Map<String, Value>) -> &[Value] {
    section(body, "protocol")
        .get("phases")
        .and_then(Value::as_array)
        .map_or(&[][..], Vec::as_slice)
}

/// Declared phase names, or the default trio when none can be read.
fn phase_names(body: &Map<String, Value>) -> Vec<String> {
    let names: Vec<String> = protocol_phases(body)
        .iter()
        .filter_map(|phase| match phase {
            Value::String(name) => Some(name.clone()),
            Value::Object(phase) => phase.get("name").and_then(Value::as_str).map(str::to_owned),
            _ => None,
        })
        .collect();
    if names.is_empty() {
        DEFAULT_PHASES.iter().map(|name| (*name).to_owned()).collect()
    } else {
        names
    }
}

/// The manifest's retry policy with defaults filled in; `None` when the
/// manifest declares none.
fn retry_policy(execution: &Map<String, Value>) -> Option<RetryPolicy> {
    let declared = execution.get("retry_policy").and_then(Value::as_object)?;
    if declared.is_empty() {
        return None;
    }
    let defaults = RetryPolicy::default();
    Some(RetryPolicy {
        max_attempts: declared
            .get("max_attempts")
            .and_then(Value::as_u64)
            .map_or(defaults.max_attempts, |n| u32::try_from(n).unwrap_or(u32::MAX)),
        backoff_factor: declared
            .get("backoff_factor")
            .and_then(Value::as_f64)
            .unwrap_or(defaults.backoff_factor),
        timeout_secs: declared.get("timeout").and_then(Value::as_u64),
    })
}

/// A structured phase carrying at least one step selects detailed mode.
fn declares_steps(phase: &Value) -> bool {
    phase
        .get("steps")
        .and_then(Value::as_array)
        .is_some_and(|steps| !steps.is_empty())
}

/// One step per declared step of every structured phase, in declared order.
fn detailed_steps(phases: &[Value], defaults: &StepDefaults) -> Vec<ExecutionStep> {
    let mut steps = Vec::new();
    for phase in phases.iter().filter_map(Value::as_object) {
        let phase_name = phase.get("name").and_then(Value::as_str).unwrap_or("unknown");
        let declared = phase.get("steps").and_then(Value::as_array).map_or(&[][..], Vec::as_slice);
        for (idx, step) in declared.iter().enumerate() {
            let step = step.as_object().unwrap_or(&*EMPTY);
            let name = step
                .get("name")
                .and_then(Value::as_str)
                .map_or_else(|| idx.to_string(), str::to_owned);
            let instrument_id = step
                .get("instrument")
                .and_then(Value::as_str)
                .map_or_else(|| format!("step_{idx}"), str::to_owned);
            let kind = step.get("type").and_then(Value::as_str).unwrap_or(DEFAULT_STEP_KIND);
            let dependencies: Vec<String> = step
                .get("depends_on")
                .and_then(Value::as_array)
                .map(|deps| deps.iter().filter_map(Value::as_str).map(str::to_owned).collect())
                .unwrap_or_default();

            steps.push(
                defaults
                    .apply(ExecutionStep::new(phase_name, name, instrument_id, kind))
                    .with_parameters(section(step, "parameters").clone())
                    .with_dependencies(dependencies)
                    .with_break_on_failure(
                        step.get("break_on_failure")
                            .and_then(Value::as_bool)
                            .unwrap_or(false),
                    ),
            );
        }
    }
    steps
}

/// One step per instrument, spread across phases by list position.
fn distributed_steps(
    instruments: &[Value],
    phases: &[String],
    defaults: &StepDefaults,
) -> Vec<ExecutionStep> {
    let total = instruments.len();
    instruments
        .iter()
        .enumerate()
        .map(|(idx, instrument)| {
            let phase = &phases[phase_slot(idx, total, phases.len())];
            let instrument = instrument.as_object().unwrap_or(&*EMPTY);
            let id = instrument.get("id").and_then(Value::as_str);
            let name = id.map_or_else(|| format!("inst_{idx}"), str::to_owned);
            let instrument_id = id.map_or_else(|| format!("instrument_{idx}"), str::to_owned);
            let kind = instrument.get("type").and_then(Value::as_str).unwrap_or("unknown");

            defaults
                .apply(ExecutionStep::new(phase.as_str(), name, instrument_id, kind))
                .with_parameters(section(instrument, "parameters").clone())
        })
        .collect()
}

/// Phase index for instrument `idx` of `total`.
///
/// With three or more phases the first 20% go to the first phase, up to 80% to
/// the second, and the rest to the last. Fewer phases take turns.
fn phase_slot(idx: usize, total: usize, phase_count: usize) -> usize {
    if phase_count >= 3 {
        if idx * 5 < total {
            0
        } else if idx * 5 < total * 4 {
            1
        } else {
            phase_count - 1
        }
    } else {
        idx % phase_count
    }
}

/// Phases run back to back; within a phase, steps fill the worker limit.
fn estimate_duration(steps: &[ExecutionStep], concurrency_limit: u32) -> u64 {
    let mut per_phase: HashMap<&str, u64> = HashMap::new();
    for step in steps {
        *per_phase.entry(step.phase()).or_default() += 1;
    }
    let limit = u64::from(concurrency_limit.max(1));
    per_phase
        .values()
        .map(|count| count.div_ceil(limit) * BASE_STEP_SECONDS)
        .sum()
}
