use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use assay_types::StepId;

/// What happened to one step.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepOutcome {
    pub step_id: StepId,
    pub name: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub attempts: u32,
    pub duration_ms: u64,
}

/// Execution record of one phase.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct PhaseReport {
    pub phase: String,
    /// Step names launched in each round, in round order.
    pub rounds: Vec<Vec<String>>,
    pub outcomes: Vec<StepOutcome>,
    /// Steps left pending because their dependencies never resolved. Only
    /// populated in lenient mode; strict mode fails the phase instead.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub unreachable: Vec<String>,
}

impl PhaseReport {
    #[must_use]
    pub fn new(phase: impl Into<String>) -> Self {
        Self {
            phase: phase.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn outcome(&self, name: &str) -> Option<&StepOutcome> {
        self.outcomes.iter().find(|outcome| outcome.name == name)
    }

    #[must_use]
    pub fn failures(&self) -> usize {
        self.outcomes.iter().filter(|outcome| !outcome.success).count()
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failures() == 0 && self.unreachable.is_empty()
    }
}

/// Execution record of a whole manifest run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub execution_id: String,
    pub manifest_id: String,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub phases: Vec<PhaseReport>,
}

impl RunReport {
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.phases.iter().all(PhaseReport::is_success)
    }

    #[must_use]
    pub fn step_count(&self) -> usize {
        self.phases.iter().map(|phase| phase.outcomes.len()).sum()
    }

    #[must_use]
    pub fn phase(&self, name: &str) -> Option<&PhaseReport> {
        self.phases.iter().find(|phase| phase.phase == name)
    }
}
