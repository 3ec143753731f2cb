//! Manifest parser: YAML text or an in-memory mapping in, [`Manifest`] out.
//!
//! Only structural presence checks happen here. Field types and bounds are the
//! validator's job, and loading text from disk is the caller's.

use std::ops::Index;

use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

use crate::value_kind;

/// Distinguished outer key. `{manifest: {...}}` and `{...}` are equivalent.
pub const WRAPPER_KEY: &str = "manifest";

/// Fields whose absence is a parse error rather than a validation error.
pub const REQUIRED_FIELDS: [&str; 3] = ["version", "id", "name"];

static NULL: Value = Value::Null;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("manifest must be YAML text or a mapping, got {found}")]
    Format { found: &'static str },
    #[error("manifest text is empty")]
    Empty,
    #[error("invalid YAML: {0}")]
    Syntax(#[from] serde_yaml::Error),
    #[error("manifest must be a mapping, got {found}")]
    Shape { found: &'static str },
    #[error("missing required fields: {}", .fields.join(", "))]
    MissingFields { fields: Vec<&'static str> },
}

/// Unparsed manifest input.
#[derive(Debug, Clone, PartialEq)]
pub enum RawManifest {
    Text(String),
    Mapping(Map<String, Value>),
}

impl From<String> for RawManifest {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for RawManifest {
    fn from(text: &str) -> Self {
        Self::Text(text.to_owned())
    }
}

impl From<Map<String, Value>> for RawManifest {
    fn from(mapping: Map<String, Value>) -> Self {
        Self::Mapping(mapping)
    }
}

impl TryFrom<Value> for RawManifest {
    type Error = ParseError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::String(text) => Ok(Self::Text(text)),
            Value::Object(mapping) => Ok(Self::Mapping(mapping)),
            other => Err(ParseError::Format {
                found: value_kind(&other),
            }),
        }
    }
}

/// A parsed manifest.
///
/// Keeps the document as given (for pass-through lookups) alongside the
/// normalized body with any wrapper removed. Equality compares bodies only, so
/// a wrapped and an unwrapped manifest with the same content are equal.
#[derive(Debug, Clone)]
pub struct Manifest {
    document: Map<String, Value>,
    body: Map<String, Value>,
}

impl PartialEq for Manifest {
    fn eq(&self, other: &Self) -> bool {
        self.body == other.body
    }
}

impl Manifest {
    /// The normalized manifest mapping.
    #[must_use]
    pub fn body(&self) -> &Map<String, Value> {
        &self.body
    }

    /// Whether the input used the `manifest:` wrapper.
    #[must_use]
    pub fn is_wrapped(&self) -> bool {
        self.document.contains_key(WRAPPER_KEY)
    }

    #[must_use]
    pub fn version(&self) -> Option<&str> {
        self.body.get("version").and_then(Value::as_str)
    }

    #[must_use]
    pub fn id(&self) -> Option<&str> {
        self.body.get("id").and_then(Value::as_str)
    }

    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.body.get("name").and_then(Value::as_str)
    }

    #[must_use]
    pub fn metadata(&self) -> &Value {
        self.section("metadata")
    }

    #[must_use]
    pub fn protocol(&self) -> &Value {
        self.section("protocol")
    }

    #[must_use]
    pub fn substrate(&self) -> &Value {
        self.section("substrate")
    }

    #[must_use]
    pub fn execution(&self) -> &Value {
        self.section("execution")
    }

    #[must_use]
    pub fn analysis(&self) -> &Value {
        self.section("analysis")
    }

    #[must_use]
    pub fn reporting(&self) -> &Value {
        self.section("reporting")
    }

    #[must_use]
    pub fn instruments(&self) -> &[Value] {
        self.body
            .get("instruments")
            .and_then(Value::as_array)
            .map_or(&[][..], Vec::as_slice)
    }

    /// A body section, `Null` when absent.
    #[must_use]
    pub fn section(&self, key: &str) -> &Value {
        self.body.get(key).unwrap_or(&NULL)
    }

    // Pass-through access over the document as given.

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.document.get(key)
    }

    #[must_use]
    pub fn get_or<'a>(&'a self, key: &str, default: &'a Value) -> &'a Value {
        self.document.get(key).unwrap_or(default)
    }

    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.document.contains_key(key)
    }
}

impl Index<&str> for Manifest {
    type Output = Value;

    /// Missing keys index to `Null`, matching `serde_json::Value`.
    fn index(&self, key: &str) -> &Value {
        self.document.get(key).unwrap_or(&NULL)
    }
}

/// Parse raw input into a [`Manifest`].
pub fn parse(raw: impl Into<RawManifest>) -> Result<Manifest, ParseError> {
    let document = match raw.into() {
        RawManifest::Text(text) => parse_yaml(&text)?,
        RawManifest::Mapping(mapping) => mapping,
    };

    let body = match document.get(WRAPPER_KEY) {
        Some(Value::Object(inner)) => inner.clone(),
        Some(other) => {
            return Err(ParseError::Shape {
                found: value_kind(other),
            });
        }
        None => document.clone(),
    };

    let missing: Vec<&'static str> = REQUIRED_FIELDS
        .into_iter()
        .filter(|field| !body.contains_key(*field))
        .collect();
    if !missing.is_empty() {
        return Err(ParseError::MissingFields { fields: missing });
    }

    let manifest = Manifest { document, body };
    debug!(
        manifest_id = manifest.id().unwrap_or("?"),
        wrapped = manifest.is_wrapped(),
        "parsed manifest"
    );
    Ok(manifest)
}

fn parse_yaml(text: &str) -> Result<Map<String, Value>, ParseError> {
    if text.trim().is_empty() {
        return Err(ParseError::Empty);
    }
    match serde_yaml::from_str::<Value>(text)? {
        Value::Object(mapping) => Ok(mapping),
        other => Err(ParseError::Shape {
            found: value_kind(&other),
        }),
    }
}
