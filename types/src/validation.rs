use std::fmt;

use serde::Serialize;

/// Outcome of validating a manifest.
///
/// Built only from the collected error list, so a result is either valid with
/// no errors or invalid with at least one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationResult {
    errors: Vec<String>,
}

impl ValidationResult {
    #[must_use]
    pub fn valid() -> Self {
        Self { errors: Vec::new() }
    }

    #[must_use]
    pub fn from_errors(errors: Vec<String>) -> Self {
        Self { errors }
    }

    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    #[must_use]
    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    #[must_use]
    pub fn into_errors(self) -> Vec<String> {
        self.errors
    }
}

impl fmt::Display for ValidationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            return f.write_str("valid");
        }
        f.write_str(&self.errors.join("; "))
    }
}

impl Serialize for ValidationResult {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        #[derive(Serialize)]
        struct Wire<'a> {
            is_valid: bool,
            errors: &'a [String],
        }

        Wire {
            is_valid: self.is_valid(),
            errors: &self.errors,
        }
        .serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::ValidationResult;

    #[test]
    fn validity_follows_errors() {
        assert!(ValidationResult::valid().is_valid());
        assert!(ValidationResult::from_errors(vec![]).is_valid());
        let invalid = ValidationResult::from_errors(vec!["id: field required".to_owned()]);
        assert!(!invalid.is_valid());
        assert_eq!(invalid.to_string(), "id: field required");
    }

    #[test]
    fn serializes_flag_and_errors() {
        let result = ValidationResult::from_errors(vec!["a".to_owned(), "b".to_owned()]);
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["is_valid"], false);
        assert_eq!(value["errors"][1], "b");
    }
}
