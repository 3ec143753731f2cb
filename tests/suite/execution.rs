//! End-to-end runs through the conductor with the built-in echo instrument.

use std::time::Duration;

use assay_engine::{ConductorError, DependencyMode, SchedulerError};
use serde_json::json;

use crate::common::{DEMO, conductor, dag_manifest, slow_step, step};

/// Steps carry a step kind in `type` and reach their instrument by id.
const INSTRUMENT_REFERENCES: &str = "
manifest:
  version: '1.0.0'
  id: references
  name: References
  metadata:
    author: lab
  protocol:
    type: sequential
    phases:
      - name: initialization
        steps:
          - name: setup
            type: diagnostic
            instrument: sensor_1
            parameters:
              action: init
      - name: execution
        steps:
          - name: measure
            type: measurement
            instrument: sensor_2
            parameters:
              mode: active
  substrate:
    source:
      type: synthetic
  instruments:
    - type: echo
      id: sensor_1
      parameters:
        gain: 2
    - type: echo
      id: sensor_2
  validation:
    preflight_checks: [instrument_availability]
";

#[tokio::test]
async fn demo_run_reports_every_phase() {
    let report = conductor(DependencyMode::Strict).run(DEMO).await.unwrap();
    assert!(report.is_success());
    let phases: Vec<&str> = report.phases.iter().map(|p| p.phase.as_str()).collect();
    assert_eq!(phases, ["initialization", "execution", "analysis"]);
    assert_eq!(report.phases[0].rounds, [["sensor"]]);
    assert!(report.phases[1].rounds.is_empty());
}

#[tokio::test]
async fn chain_runs_in_dependency_order() {
    let text = dag_manifest(4, &[step("plot", &["fit"]), step("fit", &["load"]), step("load", &[])]);
    let report = conductor(DependencyMode::Strict).run(text).await.unwrap();

    let phase = report.phase("execution").unwrap();
    assert_eq!(phase.rounds, [["load"], ["fit"], ["plot"]]);
    assert_eq!(phase.outcomes.len(), 3);
    assert!(phase.is_success());
}

#[tokio::test]
async fn diamond_joins_after_both_branches() {
    let text = dag_manifest(
        2,
        &[
            step("root", &[]),
            step("left", &["root"]),
            step("right", &["root"]),
            step("join", &["left", "right"]),
        ],
    );
    let report = conductor(DependencyMode::Strict).run(text).await.unwrap();
    let phase = report.phase("execution").unwrap();
    assert_eq!(phase.rounds, vec![vec!["root"], vec!["left", "right"], vec!["join"]]);
}

#[tokio::test(start_paused = true)]
async fn wide_round_is_throttled_by_max_workers() {
    let steps: Vec<String> = (0..6).map(|i| slow_step(&format!("s{i}"), 100)).collect();
    let text = dag_manifest(2, &steps);

    let started = tokio::time::Instant::now();
    let report = conductor(DependencyMode::Strict).run(text).await.unwrap();
    let phase = report.phase("execution").unwrap();

    assert_eq!(phase.rounds.len(), 1);
    assert_eq!(phase.rounds[0].len(), 6);
    // Six 100ms steps, two at a time.
    assert!(started.elapsed() >= Duration::from_millis(300));
}

#[tokio::test]
async fn cycle_fails_in_strict_mode() {
    let text = dag_manifest(1, &[step("a", &["b"]), step("b", &["a"]), step("c", &[])]);
    let err = conductor(DependencyMode::Strict).run(text).await.unwrap_err();

    let ConductorError::Execution { source, phases, .. } = err else {
        panic!("expected execution failure, got {err}");
    };
    assert!(matches!(
        &source,
        SchedulerError::UnreachableSteps { steps, .. } if *steps == ["a", "b"]
    ));
    assert_eq!(phases.len(), 1);
    assert!(phases[0].outcome("c").unwrap().success);
}

#[tokio::test]
async fn cycle_is_left_pending_in_lenient_mode() {
    let text = dag_manifest(1, &[step("a", &["b"]), step("b", &["a"]), step("c", &[])]);
    let report = conductor(DependencyMode::Lenient).run(text).await.unwrap();

    let phase = report.phase("execution").unwrap();
    assert_eq!(phase.unreachable, ["a", "b"]);
    assert_eq!(phase.outcomes.len(), 1);
    assert!(!report.is_success());
}

#[tokio::test]
async fn break_on_failure_stops_the_run() {
    let fatal = "        - name: fatal\n          type: echo\n          break_on_failure: true\n          parameters:\n            response_delay_ms: -1\n".to_owned();
    let text = dag_manifest(1, &[fatal, step("after", &["fatal"])]);
    let err = conductor(DependencyMode::Strict).run(text).await.unwrap_err();

    let ConductorError::Execution { source, phases, .. } = err else {
        panic!("expected execution failure, got {err}");
    };
    let SchedulerError::StepExecution { step_id, message, .. } = &source else {
        panic!("expected step failure, got {source}");
    };
    assert_eq!(step_id.as_str(), "execution_fatal");
    assert!(message.starts_with("Bad instrument parameters"));
    assert!(phases[0].outcome("after").is_none());
}

#[tokio::test]
async fn failed_step_still_releases_dependents() {
    let broken = "        - name: broken\n          type: missing\n".to_owned();
    let text = dag_manifest(1, &[broken, step("after", &["broken"])]);
    let report = conductor(DependencyMode::Strict).run(text).await.unwrap();

    let phase = report.phase("execution").unwrap();
    let broken = phase.outcome("broken").unwrap();
    assert!(!broken.success);
    assert_eq!(broken.error.as_deref(), Some("Unknown instrument type: missing"));
    assert!(phase.outcome("after").unwrap().success);
    assert_eq!(phase.rounds.len(), 2);
}

#[tokio::test]
async fn steps_dispatch_through_referenced_instruments() {
    let report = conductor(DependencyMode::Strict)
        .run(INSTRUMENT_REFERENCES)
        .await
        .unwrap();
    assert!(report.is_success());

    let setup = report.phase("initialization").unwrap().outcome("setup").unwrap();
    assert_eq!(setup.step_id.as_str(), "initialization_setup");
    let output = setup.output.as_ref().unwrap();
    assert_eq!(output["echo"], json!({"gain": 2, "action": "init"}));

    let measure = report.phase("execution").unwrap().outcome("measure").unwrap();
    assert_eq!(measure.output.as_ref().unwrap()["echo"], json!({"mode": "active"}));
}

#[tokio::test]
async fn preflight_covers_types_of_unbound_steps() {
    let scan = "        - name: scan\n          type: spectrometer\n".to_owned();
    let text = format!(
        "{}validation:\n  preflight_checks: [instrument_availability]\n",
        dag_manifest(1, &[scan])
    );
    let err = conductor(DependencyMode::Strict).run(text).await.unwrap_err();

    let ConductorError::Preflight { check, message } = err else {
        panic!("expected preflight failure, got {err}");
    };
    assert_eq!(check, "instrument_availability");
    assert_eq!(message, "Unknown instrument type: spectrometer");
}

#[tokio::test]
async fn concurrent_runs_get_distinct_ids() {
    let conductor = conductor(DependencyMode::Strict);
    let (first, second) = tokio::join!(conductor.run(DEMO), conductor.run(DEMO));
    let (first, second) = (first.unwrap(), second.unwrap());
    assert_ne!(first.execution_id, second.execution_id);
}
