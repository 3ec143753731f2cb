//! Typed view of a manifest that passed validation.
//!
//! The validator checks the raw document against its JSON Schema and the
//! cross-field rules and only then deserializes it into these types, so every bound listed here already holds
//! for a value obtained from it. Unknown fields are ignored.

use std::ops::RangeInclusive;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{NonEmptyString, ProtocolType, RetryPolicy};

/// Accepted values for `execution.concurrency.max_workers`.
pub const MAX_WORKERS_RANGE: RangeInclusive<u32> = 1..=100;

/// Phase names used when a manifest declares none.
pub const DEFAULT_PHASES: [&str; 3] = ["initialization", "execution", "analysis"];

/// Kind of a structured step that names neither an instrument nor a `type`.
pub const DEFAULT_STEP_KIND: &str = "generic";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestSpec {
    pub version: String,
    pub id: String,
    pub name: String,
    pub metadata: MetadataSpec,
    pub protocol: ProtocolSpec,
    pub substrate: SubstrateSpec,
    pub instruments: Vec<InstrumentSpec>,
    #[serde(default)]
    pub execution: ExecutionSpec,
    #[serde(default)]
    pub analysis: AnalysisSpec,
    #[serde(default)]
    pub reporting: ReportingSpec,
    #[serde(default)]
    pub validation: ValidationSpec,
}

impl ManifestSpec {
    /// Distinct instrument types, in first-seen order.
    #[must_use]
    pub fn instrument_kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = Vec::new();
        for instrument in &self.instruments {
            if !kinds.contains(&instrument.kind.as_str()) {
                kinds.push(instrument.kind.as_str());
            }
        }
        kinds
    }

    /// Every kind a run dispatches on: the declared instrument types, then
    /// the `type` of structured steps that reference no instrument.
    #[must_use]
    pub fn dispatch_kinds(&self) -> Vec<&str> {
        let mut kinds = self.instrument_kinds();
        let unbound = self
            .protocol
            .phases
            .iter()
            .flat_map(PhaseSpec::steps)
            .filter(|step| step.instrument.is_none())
            .map(|step| step.kind.as_deref().unwrap_or(DEFAULT_STEP_KIND));
        for kind in unbound {
            if !kinds.contains(&kind) {
                kinds.push(kind);
            }
        }
        kinds
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataSpec {
    pub author: String,
    #[serde(default)]
    pub created: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolSpec {
    #[serde(rename = "type")]
    pub kind: ProtocolType,
    pub phases: Vec<PhaseSpec>,
}

/// A phase is either a bare name or a named object with explicit steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PhaseSpec {
    Named(String),
    Structured {
        name: String,
        #[serde(default)]
        steps: Vec<StepSpec>,
    },
}

impl PhaseSpec {
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Named(name) | Self::Structured { name, .. } => name,
        }
    }

    #[must_use]
    pub fn steps(&self) -> &[StepSpec] {
        match self {
            Self::Named(_) => &[],
            Self::Structured { steps, .. } => steps,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepSpec {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub instrument: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub parameters: Map<String, Value>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub break_on_failure: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubstrateSpec {
    pub source: SourceSpec,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceSpec {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub generator: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub parameters: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentSpec {
    #[serde(rename = "type")]
    pub kind: NonEmptyString,
    pub id: String,
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub parameters: Map<String, Value>,
}

fn default_provider() -> String {
    "internal".to_owned()
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ExecutionSpec {
    #[serde(default)]
    pub concurrency: ConcurrencySpec,
    #[serde(default)]
    pub retry_policy: RetryPolicy,
    /// Overall per-step budget in seconds.
    #[serde(default, rename = "timeout")]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConcurrencySpec {
    #[serde(default = "default_max_workers")]
    pub max_workers: u32,
}

impl Default for ConcurrencySpec {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
        }
    }
}

fn default_max_workers() -> u32 {
    1
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AnalysisSpec {
    #[serde(default)]
    pub statistical: Vec<StatisticalTestSpec>,
    #[serde(default)]
    pub visualizations: Vec<Map<String, Value>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatisticalTestSpec {
    pub test: String,
    #[serde(default)]
    pub groups: Vec<String>,
    #[serde(default)]
    pub parameters: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ReportingSpec {
    #[serde(default)]
    pub artifacts: Vec<ArtifactSpec>,
    #[serde(default)]
    pub destinations: Vec<Map<String, Value>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactSpec {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default = "default_artifact_format")]
    pub format: String,
    #[serde(default)]
    pub parameters: Map<String, Value>,
}

fn default_artifact_format() -> String {
    "markdown".to_owned()
}

/// Checks the conductor runs before compiling a plan.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ValidationSpec {
    #[serde(default)]
    pub preflight_checks: Vec<String>,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{ManifestSpec, PhaseSpec};
    use crate::ProtocolType;

    #[test]
    fn deserializes_minimal_manifest_with_defaults() {
        let spec: ManifestSpec = serde_json::from_value(json!({
            "version": "1.0",
            "id": "demo",
            "name": "Demo",
            "metadata": {"author": "lab"},
            "protocol": {"type": "dag", "phases": ["init", {"name": "exec", "steps": [{"name": "a"}]}]},
            "substrate": {"source": {"type": "synthetic"}},
            "instruments": [{"type": "echo", "id": "e1"}, {"type": "echo", "id": "e2"}]
        }))
        .unwrap();

        assert_eq!(spec.protocol.kind, ProtocolType::Dag);
        assert_eq!(spec.execution.concurrency.max_workers, 1);
        assert_eq!(spec.instruments[0].provider, "internal");
        assert_eq!(spec.instrument_kinds(), vec!["echo"]);
        assert!(matches!(&spec.protocol.phases[0], PhaseSpec::Named(name) if name == "init"));
        assert_eq!(spec.protocol.phases[1].name(), "exec");
        assert_eq!(spec.protocol.phases[1].steps().len(), 1);
        assert!(spec.validation.preflight_checks.is_empty());
    }

    #[test]
    fn dispatch_kinds_add_unbound_step_types() {
        let spec: ManifestSpec = serde_json::from_value(json!({
            "version": "1.0",
            "id": "demo",
            "name": "Demo",
            "metadata": {"author": "lab"},
            "protocol": {"type": "sequential", "phases": [
                {"name": "initialization", "steps": [
                    {"name": "setup", "type": "diagnostic", "instrument": "sensor_1"},
                    {"name": "tare", "type": "echo"},
                    {"name": "idle"}
                ]}
            ]},
            "substrate": {"source": {"type": "synthetic"}},
            "instruments": [{"type": "basic", "id": "sensor_1"}, {"type": "echo", "id": "sensor_2"}]
        }))
        .unwrap();

        assert_eq!(spec.instrument_kinds(), vec!["basic", "echo"]);
        assert_eq!(spec.dispatch_kinds(), vec!["basic", "echo", "generic"]);
    }
}
