//! Error types for the metrics system

use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum MetricsError {
    /// Invalid metric name (empty, bad characters)
    #[error("Invalid metric name '{name}': {reason}")]
    InvalidName { name: String, reason: String },

    /// Invalid label name or value
    #[error("Invalid label '{label}': {reason}")]
    InvalidLabel { label: String, reason: String },

    /// Value cannot be recorded (NaN, infinite)
    #[error("Invalid value '{value}': {reason}")]
    InvalidValue { value: String, reason: String },

    #[error("Failed to register metric '{name}': {reason}")]
    RegistrationFailed { name: String, reason: String },

    #[error("Failed to export metrics: {reason}")]
    ExportFailed { reason: String },
}

impl MetricsError {
    pub fn invalid_name<N: Into<String>, R: Into<String>>(name: N, reason: R) -> Self {
        Self::InvalidName {
            name: name.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_label<L: Into<String>, R: Into<String>>(label: L, reason: R) -> Self {
        Self::InvalidLabel {
            label: label.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_value<R: Into<String>>(value: f64, reason: R) -> Self {
        Self::InvalidValue {
            value: value.to_string(),
            reason: reason.into(),
        }
    }

    pub fn registration_failed<N: Into<String>, R: Into<String>>(name: N, reason: R) -> Self {
        Self::RegistrationFailed {
            name: name.into(),
            reason: reason.into(),
        }
    }

    pub fn export_failed<R: Into<String>>(reason: R) -> Self {
        Self::ExportFailed {
            reason: reason.into(),
        }
    }
}

/// Validation of metric names, labels and values (Prometheus naming rules)
pub mod validation {
    use super::MetricsError;
    use std::collections::HashSet;

    const RESERVED_LABELS: &[&str] = &["__name__", "__value__"];
    const MAX_LABEL_VALUE_LENGTH: usize = 256;

    fn valid_identifier(name: &str, allow_colon: bool) -> Result<(), String> {
        let mut chars = name.chars();
        match chars.next() {
            None => return Err("cannot be empty".to_string()),
            Some(first) if !first.is_ascii_alphabetic() && first != '_' => {
                return Err("must start with a letter or underscore".to_string())
            }
            Some(_) => {}
        }
        for (i, ch) in name.chars().enumerate() {
            if !(ch.is_ascii_alphanumeric() || ch == '_' || (allow_colon && ch == ':')) {
                return Err(format!("invalid character '{}' at position {}", ch, i));
            }
        }
        Ok(())
    }

    pub fn validate_metric_name(name: &str) -> Result<(), MetricsError> {
        valid_identifier(name, true).map_err(|reason| MetricsError::invalid_name(name, reason))
    }

    pub fn validate_labels(labels: &[(&str, &str)]) -> Result<(), MetricsError> {
        let mut seen = HashSet::new();
        for (key, value) in labels {
            valid_identifier(key, false).map_err(|reason| MetricsError::invalid_label(*key, reason))?;
            if RESERVED_LABELS.contains(key) {
                return Err(MetricsError::invalid_label(*key, "reserved label name"));
            }
            if !seen.insert(*key) {
                return Err(MetricsError::invalid_label(*key, "duplicate label name"));
            }
            if value.len() > MAX_LABEL_VALUE_LENGTH {
                return Err(MetricsError::invalid_label(
                    *key,
                    format!("value longer than {} characters", MAX_LABEL_VALUE_LENGTH),
                ));
            }
        }
        Ok(())
    }

    pub fn validate_numeric_value(value: f64) -> Result<(), MetricsError> {
        if !value.is_finite() {
            return Err(MetricsError::invalid_value(value, "value must be finite"));
        }
        Ok(())
    }

}
