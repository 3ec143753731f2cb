//! Manifest pipeline: parse, validate, compile.
//!
//! Each stage consumes the previous stage's output and can be used on its own:
//!
//! ```text
//! text/mapping --parse--> Manifest --validate--> ValidationResult
//!                            |
//!                            +-----compile-----> ExecutionPlan
//! ```

mod compiler;
mod parser;
mod validator;

pub use compiler::{BASE_STEP_SECONDS, CompileError, CompileInput, compile};
pub use parser::{Manifest, ParseError, REQUIRED_FIELDS, RawManifest, WRAPPER_KEY, parse};
pub use validator::{manifest_schema, validate, validate_typed};

use serde_json::Value;

/// JSON kind name used in diagnostics.
#[must_use]
pub fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
