//! Field-level validation error collection
//!
//! Request handlers run every rule first, then fail once with all field
//! messages. The API layer renders the result as a 422 body of the form
//! `{"message": ..., "errors": {"field": ["..."]}}`.

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Field name → list of messages, ordered by field name
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ValidationErrors {
    fields: BTreeMap<String, Vec<String>>,
}

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Errors for a single field
    pub fn single(field: &str, message: impl Into<String>) -> Self {
        let mut errors = Self::new();
        errors.add(field, message);
        errors
    }

    pub fn add(&mut self, field: &str, message: impl Into<String>) {
        self.fields
            .entry(field.to_string())
            .or_default()
            .push(message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn has(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    pub fn get(&self, field: &str) -> Option<&[String]> {
        self.fields.get(field).map(|v| v.as_slice())
    }

    /// First message overall, used as the top-level `message` of a 422 body
    pub fn first_message(&self) -> Option<&str> {
        self.fields
            .values()
            .next()
            .and_then(|msgs| msgs.first())
            .map(|m| m.as_str())
    }

    /// `Ok(())` when no rule failed
    pub fn into_result(self) -> Result<(), ValidationErrors> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }

    // ------------------------------------------------------------------
    // Rules
    // ------------------------------------------------------------------

    /// Field must be present and not blank
    pub fn required(&mut self, field: &str, value: Option<&str>) {
        if value.map(|v| v.trim().is_empty()).unwrap_or(true) {
            self.add(field, format!("The {} field is required.", humanize(field)));
        }
    }

    /// Field, when present, may not exceed `max` characters
    pub fn max_len(&mut self, field: &str, value: Option<&str>, max: usize) {
        if let Some(v) = value {
            if v.chars().count() > max {
                self.add(
                    field,
                    format!(
                        "The {} may not be greater than {} characters.",
                        humanize(field),
                        max
                    ),
                );
            }
        }
    }

    /// Field, when present, must have at least `min` characters
    pub fn min_len(&mut self, field: &str, value: Option<&str>, min: usize) {
        if let Some(v) = value {
            if v.chars().count() < min {
                self.add(
                    field,
                    format!("The {} must be at least {} characters.", humanize(field), min),
                );
            }
        }
    }

    /// Field, when present, must look like an email address
    pub fn email(&mut self, field: &str, value: Option<&str>) {
        if let Some(v) = value {
            if !v.trim().is_empty() && !is_email(v) {
                self.add(
                    field,
                    format!("The {} must be a valid email address.", humanize(field)),
                );
            }
        }
    }

    /// Field, when present, must be an http(s) URL
    pub fn url(&mut self, field: &str, value: Option<&str>) {
        if let Some(v) = value {
            if !v.trim().is_empty() && !(v.starts_with("http://") || v.starts_with("https://")) {
                self.add(field, format!("The {} format is invalid.", humanize(field)));
            }
        }
    }

    /// Field, when present, must be one of `allowed`
    pub fn one_of(&mut self, field: &str, value: Option<&str>, allowed: &[&str]) {
        if let Some(v) = value {
            if !allowed.contains(&v) {
                self.add(
                    field,
                    format!("The selected {} is invalid.", humanize(field)),
                );
            }
        }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fields: Vec<&str> = self.fields.keys().map(|k| k.as_str()).collect();
        write!(f, "invalid fields: {}", fields.join(", "))
    }
}

fn humanize(field: &str) -> String {
    field.replace('_', " ")
}

/// Minimal shape check: one `@`, non-empty local part, dotted domain
pub fn is_email(value: &str) -> bool {
    let value = value.trim();
    match value.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !value.contains(char::is_whitespace)
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_required_rejects_missing_and_blank() {
        let mut errors = ValidationErrors::new();
        errors.required("title", None);
        errors.required("slug", Some("   "));
        errors.required("name", Some("ok"));

        assert!(errors.has("title"));
        assert!(errors.has("slug"));
        assert!(!errors.has("name"));
        assert_eq!(
            errors.get("title").unwrap()[0],
            "The title field is required."
        );
    }

    #[test]
    fn test_max_len_counts_chars() {
        let mut errors = ValidationErrors::new();
        errors.max_len("label", Some("ééé"), 3);
        assert!(errors.is_empty());
        errors.max_len("label", Some("éééé"), 3);
        assert!(errors.has("label"));
    }

    #[test]
    fn test_email_shape() {
        assert!(is_email("ana@example.com"));
        assert!(!is_email("ana@example"));
        assert!(!is_email("@example.com"));
        assert!(!is_email("ana@@example.com"));
        assert!(!is_email("a na@example.com"));
    }

    #[test]
    fn test_into_result_and_serialization() {
        assert!(ValidationErrors::new().into_result().is_ok());

        let errors = ValidationErrors::single("email", "taken");
        let json = serde_json::to_value(&errors).unwrap();
        assert_eq!(json["email"][0], "taken");
        assert_eq!(errors.first_message(), Some("taken"));
    }
}
