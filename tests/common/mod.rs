//! Shared manifest fixtures for integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use assay_engine::{
    Backoff, Conductor, ConductorOptions, DependencyMode, InstrumentRegistry, SchedulerOptions,
};

/// One echo instrument across the default three phases.
pub const DEMO: &str = "
version: '1.0'
id: demo
name: Demo
metadata:
  author: lab
protocol:
  type: sequential
  phases: [initialization, execution, analysis]
substrate:
  source:
    type: synthetic
instruments:
  - type: echo
    id: sensor
";

/// A single structured `execution` phase holding `steps` (see [`step`]).
pub fn dag_manifest(max_workers: u32, steps: &[String]) -> String {
    format!(
        "
version: '1.0'
id: dag
name: DAG
metadata:
  author: lab
protocol:
  type: dag
  phases:
    - name: execution
      steps:
{}
substrate:
  source:
    type: synthetic
instruments:
  - type: echo
    id: sensor
execution:
  concurrency:
    max_workers: {max_workers}
",
        steps.concat()
    )
}

/// An echo step for [`dag_manifest`].
pub fn step(name: &str, depends_on: &[&str]) -> String {
    format!(
        "        - name: {name}\n          type: echo\n          depends_on: [{}]\n",
        depends_on.join(", ")
    )
}

/// An echo step that waits `delay_ms` before answering.
pub fn slow_step(name: &str, delay_ms: u64) -> String {
    format!(
        "        - name: {name}\n          type: echo\n          parameters:\n            response_delay_ms: {delay_ms}\n"
    )
}

/// Conductor over the built-in instruments with no retry delays.
pub fn conductor(dependency_mode: DependencyMode) -> Conductor {
    Conductor::new(
        Arc::new(InstrumentRegistry::with_builtins()),
        ConductorOptions {
            scheduler: SchedulerOptions {
                backoff: Backoff::immediate(),
                dependency_mode,
            },
            ..ConductorOptions::default()
        },
    )
}
