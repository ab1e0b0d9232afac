//! montante: schema-validated model training and prediction.
//!
//! A training request is a JSON payload naming an engine, a target column,
//! predictor columns and engine parameters. Before anything reaches the
//! statistical runtime the payload is validated against a JSON Schema
//! composed for that engine and method. Trained models can be stored, loaded
//! and asked for predictions, which come back as `(code, label)` pairs.
//!
//! # Quick Start
//!
//! ```
//! use montante::Montante;
//! use polars::prelude::*;
//! use serde_json::json;
//!
//! let dataset = df! {
//!     "petal width" => (0..40).map(|i| i as f64 / 10.0).collect::<Vec<_>>(),
//!     "class" => (0..40).map(|i| if i < 20 { "narrow" } else { "wide" }).collect::<Vec<_>>(),
//! }
//! .unwrap();
//!
//! let montante = Montante::builder().build().unwrap();
//! let payload = json!({
//!     "engine": "caret",
//!     "target": "class",
//!     "predictors": ["petal width"],
//!     "engine-parameters": {
//!         "method": "C5.0",
//!         "training-control": {"method": "cv", "number": 4, "repeats": 1}
//!     }
//! });
//!
//! let model = montante.train(&dataset, &payload).unwrap().into_result().unwrap();
//! let pairs = montante
//!     .predict(&model, &json!({"petal width": [0.1, 3.5]}))
//!     .unwrap();
//! assert_eq!(pairs[0].label, "narrow");
//! assert_eq!(pairs[1].label, "wide");
//! ```
//!
//! # Architecture
//!
//! ```text
//! payload ──► SchemaComposer ──► validate ──► TrainingDispatcher
//!                                                  │
//!                         DataFrame ──► ForeignDataBridge ──► RuntimeHandle
//!                                                                  │
//!                                   ModelStore ◄── TrainedModel ◄──┘
//! ```
//!
//! The runtime is [`runtime::NativeRuntime`] by default, a small in-process
//! decision-tree learner. Enabling the `rpy2` feature adds
//! [`runtime::rpy2::Rpy2Runtime`], which drives R and caret through an
//! embedded Python with rpy2.
//!
//! # Error Handling
//!
//! Fallible operations return [`Result<T, MontanteError>`]. Payloads that
//! fail validation are not errors: training returns
//! [`TrainingOutcome::Rejected`] with every [`ValidationError`] found.
//!
//! # Modules
//!
//! - [`bridge`] - DataFrame to runtime conversion, type mapping, formulas
//! - [`dispatch`] - training and prediction dispatchers
//! - [`engine`] - engine registry and per-engine parameter schemas
//! - [`runtime`] - the statistical runtime seam and its implementations

pub mod bridge;
mod cancellation;
mod config;
pub mod dispatch;
pub mod engine;
mod error;
mod montante;
pub mod runtime;
mod schema;
mod source;
mod store;
mod types;
mod validator;

// Re-export public API
//
// Configuration
pub use config::{
    ENV_MODEL_DIR, ENV_SEED, ENV_STRICT_COLUMNS, ENV_TRAINING_TIMEOUT_SECS, MontanteConfig,
    MontanteConfigBuilder,
};
// Cancellation and timeouts
pub use cancellation::{CancellationToken, Deadline};
// Error types
pub use error::{MontanteError, Result};
// Entry point
pub use montante::{Montante, MontanteBuilder};
// Schemas and validation
pub use schema::{Schema, SchemaComposer};
pub use validator::{PathSegment, ValidationError, validate};
// Dispatchers
pub use dispatch::{PredictionDispatcher, TrainingDispatcher, TrainingOutcome, TrainingPayload, TrainingState};
// Runtime
pub use runtime::{RuntimeHandle, TrainedModel};
// Data sources and storage
pub use source::{CsvSource, DataSource};
pub use store::ModelStore;
// Value types
pub use types::{ColumnSpec, ModelSummary, PredictionPair, PrimitiveType, TuningResult};
