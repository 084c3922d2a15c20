use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;

/// One rejected field of a configuration update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
#[error("{field}: {message}")]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum UpdateError {
    #[error("request body is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("request body must be a JSON object")]
    NotAnObject,

    #[error("{}", summarize(.0))]
    Invalid(Vec<FieldError>),
}

impl UpdateError {
    /// Per-field detail for the response body.
    pub fn field_errors(&self) -> Vec<FieldError> {
        match self {
            UpdateError::Invalid(errors) => errors.clone(),
            UpdateError::Json(_) | UpdateError::NotAnObject => {
                vec![FieldError::new("body", self.to_string())]
            }
        }
    }
}

fn summarize(errors: &[FieldError]) -> String {
    match errors {
        [only] => only.to_string(),
        _ => format!("{} invalid fields", errors.len()),
    }
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read settings file {path}: {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse settings file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid setting `{field}`: {message}")]
    Invalid { field: &'static str, message: String },
}
