//! Execution engine for assay: instruments, step scheduling, and orchestration.
//!
//! The [`Conductor`] takes a manifest from raw input to a [`RunReport`]. It
//! delegates per-phase work to the [`Scheduler`], which drives individual
//! steps through a [`StepRunner`]. The default runner dispatches to
//! instruments registered in an [`InstrumentRegistry`].

mod conductor;
mod instrument;
mod report;
mod retry;
mod runner;
mod scheduler;

pub use conductor::{
    Conductor, ConductorError, ConductorOptions, INSTRUMENT_AVAILABILITY, RATE_LIMIT_CAPACITY,
    SUBSTRATE_ACCESSIBILITY, parse_file,
};
pub use instrument::{
    EchoInstrument, Instrument, InstrumentError, InstrumentFut, InstrumentRegistry, StepContext,
    calibrate,
};
pub use report::{PhaseReport, RunReport, StepOutcome};
pub use retry::{AttemptError, RetryOutcome, retry_with_backoff};
pub use runner::{RegistryRunner, StepRunner};
pub use scheduler::{PlanAborted, Scheduler, SchedulerError, SchedulerOptions};

// Re-exported so callers can build a conductor without naming the lower crates.
pub use assay_manifest::{Manifest, RawManifest};
pub use assay_types::{Backoff, DependencyMode, ExecutionPlan, RetryPolicy};
