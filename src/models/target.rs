// src/models/target.rs

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::AppError;

static APP_MODEL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9_]+\.[a-z0-9_]+$").unwrap());

/// Identifies the host-application entity a comment thread hangs off,
/// as an `"app_label.model"` pair (e.g. `"blog.article"`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentTarget {
    pub app_label: String,
    pub model: String,
}

impl ContentTarget {
    /// Parses and validates an `"app_label.model"` identifier.
    pub fn parse(raw: &str) -> Result<Self, AppError> {
        if !APP_MODEL_RE.is_match(raw) {
            return Err(AppError::BadRequest(format!(
                "Invalid content type '{}', expected 'app_label.model'",
                raw
            )));
        }
        let (app_label, model) = raw.split_once('.').unwrap();
        Ok(Self {
            app_label: app_label.to_string(),
            model: model.to_string(),
        })
    }

    pub fn app_model(&self) -> String {
        format!("{}.{}", self.app_label, self.model)
    }
}

impl fmt::Display for ContentTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.app_label, self.model)
    }
}

/// Validator-compatible wrapper so request DTOs can use
/// `#[validate(custom(...))]` on their content type field.
pub fn validate_app_model(raw: &str) -> Result<(), validator::ValidationError> {
    if APP_MODEL_RE.is_match(raw) {
        Ok(())
    } else {
        Err(validator::ValidationError::new("invalid_app_model"))
    }
}
