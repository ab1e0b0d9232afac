//! Error types for the montante crate.
//!
//! This module defines [`MontanteError`], the error type returned by every
//! fallible operation in the crate.
//!
//! # Error Handling
//!
//! Failures fall in four families:
//! - **Schema composition**: the request names an engine or method that cannot
//!   be composed into a schema. The request is malformed and cannot even be
//!   validated.
//! - **Type mapping**: a dataset column has a dtype outside the supported set.
//! - **Foreign runtime**: the statistical engine rejected the operation
//!   (column mismatch, non-convergence, coercion failure at its boundary).
//! - **Infrastructure**: I/O, polars, JSON and base64 failures.
//!
//! Payload validation failures are *not* errors: they are returned as
//! [`ValidationError`](crate::ValidationError) values so callers can render
//! field-level feedback.
//!
//! # Example
//!
//! ```
//! use montante::{MontanteError, SchemaComposer};
//!
//! let composer = SchemaComposer::with_default_engines();
//! let err = composer.compose_training_schema("xgboost", Some("gbtree")).unwrap_err();
//! assert!(matches!(err, MontanteError::UnknownEngine(_)));
//! assert!(err.is_schema_composition());
//! ```

use std::time::Duration;

use thiserror::Error;

/// The main error type for montante operations.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new variants
/// in future versions without breaking downstream code.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum MontanteError {
    /// The requested training engine is not registered.
    #[error("Unknown engine '{0}'")]
    UnknownEngine(String),

    /// The engine needs a method sub-selector and none was given.
    #[error("Engine '{engine}' requires a method")]
    MethodRequired {
        /// The engine that was requested.
        engine: String,
    },

    /// The method is not part of the engine's registered method set.
    #[error("Unknown method '{method}' for engine '{engine}'")]
    UnknownMethod {
        /// The engine that was requested.
        engine: String,
        /// The method that is not registered for it.
        method: String,
    },

    /// The column has a temporal dtype (date, datetime, duration, time).
    ///
    /// Temporal values are never coerced to text or numbers.
    #[error("Column '{column}' has unsupported type {dtype}: date/time values are not implemented")]
    UnsupportedType {
        /// Column name.
        column: String,
        /// The host dtype, rendered.
        dtype: String,
    },

    /// The column dtype is not one the bridge knows how to classify.
    #[error("Column '{column}' has unrecognized type {dtype}")]
    UnrecognizedType {
        /// Column name.
        column: String,
        /// The host dtype, rendered.
        dtype: String,
    },

    /// Prediction data lacks columns the model was trained on.
    #[error("Missing prediction columns: {}", .0.join(", "))]
    MissingColumns(Vec<String>),

    /// Prediction data has columns the model was not trained on.
    #[error("Unexpected prediction columns: {}", .0.join(", "))]
    UnexpectedColumns(Vec<String>),

    /// The foreign statistical runtime rejected the operation.
    ///
    /// Never retried automatically: the usual root cause is caller data.
    #[error("Foreign runtime error: {0}")]
    ForeignRuntime(String),

    /// A runtime call did not complete within its deadline.
    ///
    /// The deadline covers waiting for the runtime guard as well as the call
    /// itself. The runtime stays usable afterwards.
    #[error("Training exceeded its deadline of {0:?}")]
    TrainingTimeout(Duration),

    /// The operation was cancelled through a
    /// [`CancellationToken`](crate::CancellationToken).
    #[error("Operation cancelled")]
    Cancelled,

    /// Failed to initialize the foreign runtime.
    #[error("Runtime initialization failed: {0}")]
    RuntimeInit(String),

    /// Invalid data handed to the bridge.
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// No stored model exists under the given identifier.
    #[error("Model not found: {path}")]
    ModelNotFound {
        /// The path that was looked up.
        path: String,
    },

    /// I/O error during file operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Error raised by polars while reading or reshaping a dataset.
    #[error("Polars error: {0}")]
    Polars(#[from] polars::prelude::PolarsError),

    /// JSON (de)serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A stored model payload is not valid base64.
    #[error("Base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),
}

impl MontanteError {
    /// Stable machine-readable code for this error.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            MontanteError::UnknownEngine(_) => "UNKNOWN_ENGINE",
            MontanteError::MethodRequired { .. } => "METHOD_REQUIRED",
            MontanteError::UnknownMethod { .. } => "UNKNOWN_METHOD",
            MontanteError::UnsupportedType { .. } => "UNSUPPORTED_TYPE",
            MontanteError::UnrecognizedType { .. } => "UNRECOGNIZED_TYPE",
            MontanteError::MissingColumns(_) => "MISSING_COLUMNS",
            MontanteError::UnexpectedColumns(_) => "UNEXPECTED_COLUMNS",
            MontanteError::ForeignRuntime(_) => "FOREIGN_RUNTIME",
            MontanteError::TrainingTimeout(_) => "TRAINING_TIMEOUT",
            MontanteError::Cancelled => "CANCELLED",
            MontanteError::RuntimeInit(_) => "RUNTIME_INIT",
            MontanteError::InvalidData(_) => "INVALID_DATA",
            MontanteError::InvalidConfig(_) => "INVALID_CONFIG",
            MontanteError::ModelNotFound { .. } => "MODEL_NOT_FOUND",
            MontanteError::Io(_) => "IO_ERROR",
            MontanteError::Polars(_) => "POLARS_ERROR",
            MontanteError::Json(_) => "JSON_ERROR",
            MontanteError::Base64(_) => "BASE64_ERROR",
        }
    }

    /// `true` for the errors raised while composing a training schema.
    ///
    /// These mean the request was not well-formed enough to validate.
    #[must_use]
    pub fn is_schema_composition(&self) -> bool {
        matches!(
            self,
            MontanteError::UnknownEngine(_)
                | MontanteError::MethodRequired { .. }
                | MontanteError::UnknownMethod { .. }
        )
    }

    pub(crate) fn foreign(message: impl Into<String>) -> Self {
        MontanteError::ForeignRuntime(message.into())
    }
}

/// Result alias used across the crate.
pub type Result<T, E = MontanteError> = std::result::Result<T, E>;

#[cfg(feature = "rpy2")]
impl From<pyo3::PyErr> for MontanteError {
    fn from(err: pyo3::PyErr) -> Self {
        MontanteError::ForeignRuntime(err.to_string())
    }
}
