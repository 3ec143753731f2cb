//! Parse → validate → compile over textual manifests.

use assay_manifest::{compile, parse, validate, validate_typed};
use assay_types::ProtocolType;
use serde_json::json;

use crate::common::{DEMO, dag_manifest, step};

#[test]
fn demo_compiles_to_one_initialization_step() {
    let manifest = parse(DEMO).unwrap();
    assert!(validate(&manifest).is_valid());

    let plan = compile(&manifest).unwrap();
    assert_eq!(plan.phases(), ["initialization", "execution", "analysis"]);
    assert_eq!(plan.step_count(), 1);
    assert_eq!(plan.steps()[0].step_id().as_str(), "initialization_sensor");
    assert_eq!(plan.concurrency_limit(), 1);
    assert_eq!(plan.estimated_duration_secs(), 30);
    assert!(plan.retry_policy().is_none());
    assert_eq!(plan.metadata().protocol_type, "sequential");
}

#[test]
fn json_and_yaml_text_compile_identically() {
    let as_json = json!({
        "version": "1.0",
        "id": "demo",
        "name": "Demo",
        "metadata": {"author": "lab"},
        "protocol": {"type": "sequential", "phases": ["initialization", "execution", "analysis"]},
        "substrate": {"source": {"type": "synthetic"}},
        "instruments": [{"type": "echo", "id": "sensor"}]
    })
    .to_string();

    let from_yaml = compile(&parse(DEMO).unwrap()).unwrap();
    let from_json = compile(&parse(as_json).unwrap()).unwrap();
    assert_eq!(from_yaml, from_json);
}

#[test]
fn wrapped_manifest_matches_bare_manifest() {
    let wrapped: String = DEMO
        .lines()
        .map(|line| format!("  {line}\n"))
        .collect();
    let wrapped = format!("manifest:\n{wrapped}");

    let inner = parse(wrapped).unwrap();
    let bare = parse(DEMO).unwrap();
    assert!(inner.is_wrapped());
    assert!(!bare.is_wrapped());
    assert_eq!(inner, bare);
    assert_eq!(compile(&inner).unwrap(), compile(&bare).unwrap());
}

#[test]
fn dag_steps_keep_dependencies_and_typed_view() {
    let text = dag_manifest(3, &[step("load", &[]), step("fit", &["load"]), step("plot", &["fit"])]);
    let manifest = parse(text).unwrap();
    let spec = validate_typed(&manifest).unwrap();
    assert_eq!(spec.protocol.kind, ProtocolType::Dag);
    assert_eq!(spec.protocol.phases[0].steps().len(), 3);

    let plan = compile(&manifest).unwrap();
    assert_eq!(plan.phases(), ["execution"]);
    let ids: Vec<&str> = plan.steps().iter().map(|s| s.step_id().as_str()).collect();
    assert_eq!(ids, ["execution_load", "execution_fit", "execution_plot"]);
    assert_eq!(plan.steps()[2].dependencies(), ["fit"]);
    assert_eq!(plan.concurrency_limit(), 3);
    // ceil(3 / 3) rounds of 30s
    assert_eq!(plan.estimated_duration_secs(), 30);
}

#[test]
fn unknown_dependency_is_a_validation_error() {
    let text = dag_manifest(1, &[step("fit", &["ghost"])]);
    let result = validate(&parse(text).unwrap());
    assert!(!result.is_valid());
    assert!(
        result.errors().iter().any(|e| e.contains("unknown step 'ghost'")),
        "{result}"
    );
}

#[test]
fn out_of_range_workers_are_reported_with_path() {
    let text = format!("{DEMO}execution:\n  concurrency:\n    max_workers: 0\n");
    let result = validate(&parse(text).unwrap());
    assert_eq!(result.errors().len(), 1, "{result}");
    assert!(result.errors()[0].starts_with("execution.concurrency.max_workers:"));
}

#[test]
fn declared_retry_policy_reaches_plan_and_steps() {
    let text = format!(
        "{DEMO}execution:\n  timeout: 45\n  retry_policy:\n    max_attempts: 4\n    backoff_factor: 2.0\n"
    );
    let manifest = parse(text).unwrap();
    assert!(validate(&manifest).is_valid());

    let plan = compile(&manifest).unwrap();
    let policy = plan.retry_policy().unwrap();
    assert_eq!(policy.max_attempts, 4);
    assert_eq!(plan.steps()[0].retry_policy().max_attempts, 4);
    assert_eq!(plan.steps()[0].timeout_secs(), Some(45));
}
