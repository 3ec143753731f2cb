//! The "run one step" capability the scheduler drives.

use std::collections::HashMap;
use std::sync::Arc;

use assay_types::ExecutionStep;
use assay_types::schema::InstrumentSpec;
use serde_json::{Map, Value};

use crate::instrument::{InstrumentError, InstrumentFut, InstrumentRegistry, StepContext};

/// Executes a single attempt of a compiled step.
pub trait StepRunner: Send + Sync {
    fn run<'a>(&'a self, step: &'a ExecutionStep, ctx: &'a StepContext) -> InstrumentFut<'a, Value>;
}

/// A declared instrument as the runner sees it.
#[derive(Debug, Clone)]
struct Binding {
    kind: String,
    parameters: Map<String, Value>,
}

/// Runs steps through the registered instrument they resolve to.
///
/// A step whose instrument id names a bound instrument dispatches on that
/// instrument's type, with the step's parameters laid over the instrument's.
/// Any other step dispatches on its own type.
#[derive(Debug, Clone)]
pub struct RegistryRunner {
    registry: Arc<InstrumentRegistry>,
    instruments: HashMap<String, Binding>,
}

impl RegistryRunner {
    #[must_use]
    pub fn new(registry: Arc<InstrumentRegistry>) -> Self {
        Self {
            registry,
            instruments: HashMap::new(),
        }
    }

    /// Bind a manifest's declared instruments by id.
    #[must_use]
    pub fn with_instruments(mut self, instruments: &[InstrumentSpec]) -> Self {
        self.instruments.extend(instruments.iter().map(|instrument| {
            let binding = Binding {
                kind: instrument.kind.as_str().to_owned(),
                parameters: instrument.parameters.clone(),
            };
            (instrument.id.clone(), binding)
        }));
        self
    }

    /// Registry kind and raw parameters for `step`.
    fn resolve<'a>(&'a self, step: &'a ExecutionStep) -> (&'a str, Map<String, Value>) {
        match self.instruments.get(step.instrument_id()) {
            Some(binding) => {
                let mut parameters = binding.parameters.clone();
                parameters.extend(step.parameters().clone());
                (binding.kind.as_str(), parameters)
            }
            None => (step.instrument_type(), step.parameters().clone()),
        }
    }
}

impl StepRunner for RegistryRunner {
    fn run<'a>(&'a self, step: &'a ExecutionStep, ctx: &'a StepContext) -> InstrumentFut<'a, Value> {
        Box::pin(async move {
            let (kind, raw) = self.resolve(step);
            let instrument = self.registry.lookup(kind)?;
            let parameters = instrument.parse_parameters(&raw)?;
            instrument.validate_execution_parameters(&parameters)?;
            instrument.execute(parameters, ctx).await
        })
    }
}

impl<F> StepRunner for F
where
    F: Fn(&ExecutionStep, &StepContext) -> Result<Value, InstrumentError> + Send + Sync,
{
    fn run<'a>(&'a self, step: &'a ExecutionStep, ctx: &'a StepContext) -> InstrumentFut<'a, Value> {
        let result = self(step, ctx);
        Box::pin(async move { result })
    }
}
