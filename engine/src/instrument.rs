//! Instrument capability and registry.
//!
//! An instrument is the unit of work a step binds to. Implementations are
//! selected by their type string through an [`InstrumentRegistry`] built once
//! at startup and handed to whatever runs plans.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde::Serialize;
use serde_json::{Map, Value, json};

/// Instrument future type alias.
pub type InstrumentFut<'a, T> = Pin<Box<dyn Future<Output = Result<T, InstrumentError>> + Send + 'a>>;

/// Per-attempt information handed to an instrument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepContext {
    pub execution_id: String,
    pub phase: String,
    /// 1-based attempt number.
    pub attempt: u32,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum InstrumentError {
    #[error("Bad instrument parameters: {message}")]
    BadParameters { message: String },
    #[error("Unknown instrument type: {kind}")]
    UnknownInstrument { kind: String },
    #[error("Duplicate instrument registered: {kind}")]
    DuplicateInstrument { kind: String },
    #[error("Calibration failed: {kind}: {message}")]
    CalibrationFailed { kind: String, message: String },
    #[error("Instrument execution failed: {kind}: {message}")]
    ExecutionFailed { kind: String, message: String },
}

impl InstrumentError {
    /// Whether another attempt could succeed. Configuration mistakes never do.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ExecutionFailed { .. } | Self::CalibrationFailed { .. }
        )
    }
}

/// Lifecycle of a measurement instrument.
///
/// Only [`kind`](Instrument::kind) and [`execute`](Instrument::execute) are
/// required; every other stage defaults to a pass-through.
pub trait Instrument: Send + Sync {
    fn kind(&self) -> &'static str;

    /// Normalize raw step parameters before validation.
    fn parse_parameters(&self, raw: &Map<String, Value>) -> Result<Map<String, Value>, InstrumentError> {
        Ok(raw.clone())
    }

    fn initialize(&self) -> InstrumentFut<'_, ()> {
        Box::pin(async { Ok(()) })
    }

    fn collect_calibration_data(&self) -> InstrumentFut<'_, Value> {
        Box::pin(async { Ok(Value::Null) })
    }

    fn perform_calibration(&self, data: Value) -> InstrumentFut<'_, Value> {
        Box::pin(async move { Ok(data) })
    }

    fn validate_calibration(&self, _calibration: &Value) -> Result<(), InstrumentError> {
        Ok(())
    }

    fn validate_execution_parameters(&self, _parameters: &Map<String, Value>) -> Result<(), InstrumentError> {
        Ok(())
    }

    fn execute<'a>(
        &'a self,
        parameters: Map<String, Value>,
        ctx: &'a StepContext,
    ) -> InstrumentFut<'a, Value>;
}

/// Run the setup half of the lifecycle: initialize, then calibrate.
pub async fn calibrate(instrument: &dyn Instrument) -> Result<Value, InstrumentError> {
    instrument.initialize().await?;
    let data = instrument.collect_calibration_data().await?;
    let calibration = instrument.perform_calibration(data).await?;
    instrument.validate_calibration(&calibration)?;
    tracing::debug!(kind = instrument.kind(), "instrument calibrated");
    Ok(calibration)
}

/// Instruments keyed by type string.
#[derive(Default)]
pub struct InstrumentRegistry {
    instruments: HashMap<String, Box<dyn Instrument>>,
}

impl InstrumentRegistry {
    /// A registry holding the built-in instruments.
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut registry = Self::default();
        registry
            .instruments
            .insert(EchoInstrument.kind().to_owned(), Box::new(EchoInstrument));
        registry
    }

    pub fn register(&mut self, instrument: Box<dyn Instrument>) -> Result<(), InstrumentError> {
        let kind = instrument.kind().to_owned();
        if self.instruments.contains_key(&kind) {
            return Err(InstrumentError::DuplicateInstrument { kind });
        }
        self.instruments.insert(kind, instrument);
        Ok(())
    }

    pub fn lookup(&self, kind: &str) -> Result<&dyn Instrument, InstrumentError> {
        self.instruments
            .get(kind)
            .map(std::convert::AsRef::as_ref)
            .ok_or_else(|| InstrumentError::UnknownInstrument {
                kind: kind.to_owned(),
            })
    }

    #[must_use]
    pub fn contains(&self, kind: &str) -> bool {
        self.instruments.contains_key(kind)
    }

    /// Registered type strings, sorted.
    #[must_use]
    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.instruments.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }
}

impl std::fmt::Debug for InstrumentRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstrumentRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}

// ── Built-ins ────────────────────────────────────────────────

/// Echoes its parameters back, optionally after `response_delay_ms`.
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoInstrument;

impl EchoInstrument {
    fn delay(parameters: &Map<String, Value>) -> Result<Duration, InstrumentError> {
        match parameters.get("response_delay_ms") {
            None | Some(Value::Null) => Ok(Duration::ZERO),
            Some(value) => value
                .as_u64()
                .map(Duration::from_millis)
                .ok_or_else(|| InstrumentError::BadParameters {
                    message: format!("response_delay_ms must be a non-negative integer, got {value}"),
                }),
        }
    }
}

impl Instrument for EchoInstrument {
    fn kind(&self) -> &'static str {
        "echo"
    }

    fn validate_execution_parameters(&self, parameters: &Map<String, Value>) -> Result<(), InstrumentError> {
        Self::delay(parameters).map(|_| ())
    }

    fn execute<'a>(
        &'a self,
        parameters: Map<String, Value>,
        ctx: &'a StepContext,
    ) -> InstrumentFut<'a, Value> {
        Box::pin(async move {
            let delay = Self::delay(&parameters)?;
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            Ok(json!({
                "echo": parameters,
                "execution_id": ctx.execution_id,
                "attempt": ctx.attempt,
            }))
        })
    }
}
