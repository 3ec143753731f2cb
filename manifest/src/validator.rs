//! Manifest validator.
//!
//! Structure, types, and value ranges are expressed as a JSON Schema
//! ([`manifest_schema`]) and checked with `jsonschema`; every violation is
//! collected and prefixed with its dotted field path
//! (`execution.concurrency.max_workers: ...`). Checks that relate one field
//! to another (unique ids and names, step references) run in Rust once the
//! structure is sound. Unknown fields are ignored.

use std::collections::{BTreeSet, HashSet};
use std::fmt::Display;

use assay_types::schema::{MAX_WORKERS_RANGE, ManifestSpec};
use assay_types::{BACKOFF_FACTOR_RANGE, MAX_ATTEMPTS_RANGE, ProtocolType, ValidationResult};
use serde_json::{Map, Value, json};
use tracing::debug;

use crate::Manifest;

/// Validate a parsed manifest.
#[must_use]
pub fn validate(manifest: &Manifest) -> ValidationResult {
    match validate_typed(manifest) {
        Ok(_) => ValidationResult::valid(),
        Err(result) => result,
    }
}

/// Validate a parsed manifest and, when it is valid, return its typed view.
pub fn validate_typed(manifest: &Manifest) -> Result<ManifestSpec, ValidationResult> {
    let mut document = Value::Object(manifest.body().clone());
    strip_nulls(&mut document);

    let mut errors = schema_errors(&document);
    if errors.is_empty()
        && let Value::Object(body) = &document
    {
        errors = cross_field(body);
    }
    if !errors.is_empty() {
        debug!(
            manifest_id = manifest.id().unwrap_or("?"),
            errors = errors.len(),
            "manifest failed validation"
        );
        return Err(ValidationResult::from_errors(errors));
    }

    serde_json::from_value(document)
        .map_err(|err| ValidationResult::from_errors(vec![format!("manifest: {err}")]))
}

/// JSON Schema for a manifest body.
#[must_use]
pub fn manifest_schema() -> Value {
    let protocol_types = ProtocolType::ALL.map(ProtocolType::as_str);
    let string_list = json!({"type": "array", "items": {"type": "string"}});
    let object_list = json!({"type": "array", "items": {"type": "object"}});
    let positive = json!({"type": "integer", "minimum": 1});

    json!({
        "type": "object",
        "required": ["version", "id", "name", "metadata", "protocol", "substrate", "instruments"],
        "properties": {
            "version": {"type": "string", "pattern": r"^[0-9]+\.[0-9]+(\.[0-9]+)?$"},
            "id": {"type": "string"},
            "name": {"type": "string"},
            "metadata": {
                "type": "object",
                "required": ["author"],
                "properties": {
                    "author": {"type": "string"},
                    "created": {"type": "string"},
                    "description": {"type": "string"},
                    "tags": string_list
                }
            },
            "protocol": {
                "type": "object",
                "required": ["type", "phases"],
                "properties": {
                    "type": {"type": "string", "enum": protocol_types},
                    "phases": {
                        "type": "array",
                        "minItems": 1,
                        "items": {
                            "type": ["string", "object"],
                            "required": ["name"],
                            "properties": {
                                "name": {"type": "string"},
                                "steps": {
                                    "type": "array",
                                    "items": {
                                        "type": "object",
                                        "properties": {
                                            "name": {"type": "string"},
                                            "instrument": {"type": "string"},
                                            "type": {"type": "string"},
                                            "parameters": {"type": "object"},
                                            "depends_on": string_list,
                                            "break_on_failure": {"type": "boolean"}
                                        }
                                    }
                                }
                            }
                        }
                    }
                }
            },
            "substrate": {
                "type": "object",
                "required": ["source"],
                "properties": {
                    "source": {
                        "type": "object",
                        "required": ["type"],
                        "properties": {
                            "type": {"type": "string"},
                            "generator": {"type": "string"},
                            "path": {"type": "string"},
                            "url": {"type": "string"},
                            "parameters": {"type": "object"}
                        }
                    }
                }
            },
            "instruments": {
                "type": "array",
                "items": {
                    "type": "object",
                    "required": ["type", "id"],
                    "properties": {
                        "type": {"type": "string", "pattern": r"\S"},
                        "id": {"type": "string"},
                        "provider": {"type": "string"},
                        "parameters": {"type": "object"}
                    }
                }
            },
            "execution": {
                "type": "object",
                "properties": {
                    "concurrency": {
                        "type": "object",
                        "properties": {
                            "max_workers": {
                                "type": "integer",
                                "minimum": MAX_WORKERS_RANGE.start(),
                                "maximum": MAX_WORKERS_RANGE.end()
                            }
                        }
                    },
                    "retry_policy": {
                        "type": "object",
                        "properties": {
                            "max_attempts": {
                                "type": "integer",
                                "minimum": MAX_ATTEMPTS_RANGE.start(),
                                "maximum": MAX_ATTEMPTS_RANGE.end()
                            },
                            "backoff_factor": {
                                "type": "number",
                                "minimum": BACKOFF_FACTOR_RANGE.start(),
                                "maximum": BACKOFF_FACTOR_RANGE.end()
                            },
                            "timeout": positive
                        }
                    },
                    "timeout": positive
                }
            },
            "analysis": {
                "type": "object",
                "properties": {
                    "statistical": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "required": ["test"],
                            "properties": {
                                "test": {"type": "string"},
                                "groups": string_list,
                                "parameters": {"type": "object"}
                            }
                        }
                    },
                    "visualizations": object_list
                }
            },
            "reporting": {
                "type": "object",
                "properties": {
                    "artifacts": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "required": ["type"],
                            "properties": {
                                "type": {"type": "string"},
                                "format": {"type": "string"},
                                "parameters": {"type": "object"}
                            }
                        }
                    },
                    "destinations": object_list
                }
            },
            "validation": {
                "type": "object",
                "properties": {
                    "preflight_checks": string_list
                }
            }
        }
    })
}

/// Every schema violation, prefixed with the offending field's dotted path.
fn schema_errors(document: &Value) -> Vec<String> {
    let validator = match jsonschema::validator_for(&manifest_schema()) {
        Ok(validator) => validator,
        Err(err) => return vec![format!("manifest: invalid schema: {err}")],
    };
    validator
        .iter_errors(document)
        .map(|err| format!("{}: {err}", dotted(&err.instance_path().to_string())))
        .collect()
}

/// `/protocol/phases/0/name` → `protocol.phases[0].name`.
fn dotted(pointer: &str) -> String {
    let mut path = String::new();
    for segment in pointer.split('/').skip(1) {
        let segment = segment.replace("~1", "/").replace("~0", "~");
        if !segment.is_empty() && segment.bytes().all(|b| b.is_ascii_digit()) {
            path.push('[');
            path.push_str(&segment);
            path.push(']');
        } else {
            if !path.is_empty() {
                path.push('.');
            }
            path.push_str(&segment);
        }
    }
    if path.is_empty() {
        "manifest".to_owned()
    } else {
        path
    }
}

/// Optional fields given as `null` are treated as absent.
fn strip_nulls(value: &mut Value) {
    match value {
        Value::Object(map) => {
            map.retain(|_, v| !v.is_null());
            map.values_mut().for_each(strip_nulls);
        }
        Value::Array(items) => items.iter_mut().for_each(strip_nulls),
        _ => {}
    }
}

/// Phase-local step name: the declared name, else the step's index.
fn step_name(step: &Map<String, Value>, idx: usize) -> String {
    step.get("name")
        .and_then(Value::as_str)
        .map_or_else(|| idx.to_string(), str::to_owned)
}

fn duplicates<'v>(names: impl IntoIterator<Item = &'v str>) -> Option<String> {
    let mut seen = HashSet::new();
    let repeated: BTreeSet<&str> = names.into_iter().filter(|name| !seen.insert(*name)).collect();
    if repeated.is_empty() {
        None
    } else {
        Some(repeated.into_iter().collect::<Vec<_>>().join(", "))
    }
}

// ── Cross-field checks ───────────────────────────────────

#[derive(Default)]
struct CrossField {
    errors: Vec<String>,
}

fn cross_field(body: &Map<String, Value>) -> Vec<String> {
    let mut checks = CrossField::default();

    let instruments = body
        .get("instruments")
        .and_then(Value::as_array)
        .map_or(&[][..], Vec::as_slice);
    if instruments.is_empty() {
        checks.error("instruments", "at least one instrument must be defined");
    }
    let ids: Vec<&str> = instruments
        .iter()
        .filter_map(|instrument| instrument.get("id").and_then(Value::as_str))
        .collect();
    if let Some(listed) = duplicates(ids.iter().copied()) {
        checks.error("instruments", format_args!("duplicate instrument ids: {listed}"));
    }

    let phases = body
        .get("protocol")
        .and_then(|protocol| protocol.get("phases"))
        .and_then(Value::as_array)
        .map_or(&[][..], Vec::as_slice);
    checks.phase_names(phases);
    for (idx, phase) in phases.iter().enumerate() {
        if let Some(phase) = phase.as_object() {
            checks.step_graph(phase, &format!("protocol.phases[{idx}]"), &ids);
        }
    }
    checks.errors
}

impl CrossField {
    fn error(&mut self, path: &str, message: impl Display) {
        self.errors.push(format!("{path}: {message}"));
    }

    fn phase_names(&mut self, phases: &[Value]) {
        let names = phases.iter().filter_map(|phase| match phase {
            Value::String(name) => Some(name.as_str()),
            Value::Object(phase) => phase.get("name").and_then(Value::as_str),
            _ => None,
        });
        if let Some(listed) = duplicates(names) {
            self.error("protocol.phases", format_args!("duplicate phase names: {listed}"));
        }
    }

    /// Step names unique within the phase; dependencies name a sibling step;
    /// instrument references name a declared instrument.
    fn step_graph(&mut self, phase: &Map<String, Value>, path: &str, instrument_ids: &[&str]) {
        let steps: Vec<&Map<String, Value>> = phase
            .get("steps")
            .and_then(Value::as_array)
            .map(|steps| steps.iter().filter_map(Value::as_object).collect())
            .unwrap_or_default();
        let names: Vec<String> = steps
            .iter()
            .enumerate()
            .map(|(idx, step)| step_name(step, idx))
            .collect();

        if let Some(listed) = duplicates(names.iter().map(String::as_str)) {
            self.error(
                &format!("{path}.steps"),
                format_args!("duplicate step names: {listed}"),
            );
        }

        let phase_name = phase.get("name").and_then(Value::as_str).unwrap_or_default();
        for (idx, step) in steps.iter().enumerate() {
            let step_path = format!("{path}.steps[{idx}]");
            if let Some(instrument) = step.get("instrument").and_then(Value::as_str)
                && !instrument_ids.contains(&instrument)
            {
                self.error(
                    &format!("{step_path}.instrument"),
                    format_args!("unknown instrument '{instrument}'"),
                );
            }

            let Some(depends_on) = step.get("depends_on").and_then(Value::as_array) else {
                continue;
            };
            let dep_path = format!("{step_path}.depends_on");
            for dependency in depends_on.iter().filter_map(Value::as_str) {
                if dependency == names[idx] {
                    self.error(&dep_path, format_args!("step '{dependency}' depends on itself"));
                } else if !names.iter().any(|name| name == dependency) {
                    self.error(
                        &dep_path,
                        format_args!("unknown step '{dependency}' in phase '{phase_name}'"),
                    );
                }
            }
        }
    }
}
