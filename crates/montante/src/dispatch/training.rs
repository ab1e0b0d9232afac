//! Training requests: compose, validate, convert, train.
//!
//! A request moves `Pending → Validated → Trained`, or stops at `Rejected`
//! when the payload does not validate. Rejection is a value
//! ([`TrainingOutcome::Rejected`]), never an error. Errors are reserved for
//! requests that cannot be validated at all (unknown engine or method) and
//! for failures inside the runtime.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use polars::prelude::DataFrame;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::bridge::{
    ForeignDataBridge, build_formula, sanitize_column_name, sanitize_column_names,
    to_foreign_dataframe,
};
use crate::cancellation::{CancellationToken, Deadline};
use crate::config::MontanteConfig;
use crate::engine::EngineRegistry;
use crate::error::{MontanteError, Result};
use crate::runtime::{RuntimeHandle, TrainedModel};
use crate::schema::{ENGINE_PARAMETERS, Schema, SchemaComposer};
use crate::source::DataSource;
use crate::validator::{PathSegment, ValidationError, sort_errors};

/// A training request, once it has passed validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingPayload {
    /// Engine id; the configured default engine when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub engine: Option<String>,
    /// Response column.
    pub target: String,
    /// Predictor columns, in formula order.
    pub predictors: Vec<String>,
    /// Engine-specific parameters.
    #[serde(rename = "engine-parameters")]
    pub engine_parameters: Value,
}

/// Where a training request is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainingState {
    /// Received, not yet validated.
    Pending,
    /// Passed schema and dataset validation.
    Validated,
    /// A model was produced.
    Trained,
    /// Validation failed.
    Rejected,
}

impl fmt::Display for TrainingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TrainingState::Pending => "pending",
            TrainingState::Validated => "validated",
            TrainingState::Trained => "trained",
            TrainingState::Rejected => "rejected",
        };
        f.write_str(name)
    }
}

/// Result of a training request: a model or the reasons it was refused.
#[derive(Debug, Clone)]
pub enum TrainingOutcome {
    /// Training succeeded.
    Trained(TrainedModel),
    /// The payload did not validate. Never empty.
    Rejected(Vec<ValidationError>),
}

impl TrainingOutcome {
    /// The final state this outcome represents.
    #[must_use]
    pub fn state(&self) -> TrainingState {
        match self {
            TrainingOutcome::Trained(_) => TrainingState::Trained,
            TrainingOutcome::Rejected(_) => TrainingState::Rejected,
        }
    }

    /// The model, when trained.
    #[must_use]
    pub fn model(&self) -> Option<&TrainedModel> {
        match self {
            TrainingOutcome::Trained(model) => Some(model),
            TrainingOutcome::Rejected(_) => None,
        }
    }

    /// The validation errors, when rejected.
    #[must_use]
    pub fn errors(&self) -> &[ValidationError] {
        match self {
            TrainingOutcome::Trained(_) => &[],
            TrainingOutcome::Rejected(errors) => errors,
        }
    }

    /// The model, or the validation errors as `Err`.
    pub fn into_result(self) -> std::result::Result<TrainedModel, Vec<ValidationError>> {
        match self {
            TrainingOutcome::Trained(model) => Ok(model),
            TrainingOutcome::Rejected(errors) => Err(errors),
        }
    }
}

/// Routes validated training payloads to their engine.
#[derive(Debug, Clone)]
pub struct TrainingDispatcher {
    composer: SchemaComposer,
    bridge: ForeignDataBridge,
    config: MontanteConfig,
}

impl TrainingDispatcher {
    /// A dispatcher over `registry`, training through `runtime`.
    #[must_use]
    pub fn new(registry: Arc<EngineRegistry>, runtime: RuntimeHandle, config: MontanteConfig) -> Self {
        Self {
            composer: SchemaComposer::new(registry),
            bridge: ForeignDataBridge::new(runtime),
            config,
        }
    }

    /// The schema composer in use.
    #[must_use]
    pub fn composer(&self) -> &SchemaComposer {
        &self.composer
    }

    /// Composes the schema `payload` must satisfy.
    ///
    /// Returns `Ok(Err(errors))` when the payload is too malformed to pick a
    /// schema (not an object, no `engine-parameters`, non-string `engine`);
    /// the errors come from the base schema.
    ///
    /// # Errors
    ///
    /// Schema composition errors, see
    /// [`SchemaComposer::compose_training_schema`].
    pub fn schema_for(
        &self,
        payload: &Value,
    ) -> Result<std::result::Result<Schema, Vec<ValidationError>>> {
        let base_errors = || self.composer.base_training_schema().validate(payload);

        let Some(object) = payload.as_object() else {
            return Ok(Err(base_errors()));
        };
        let engine = match object.get("engine") {
            None => self.config.default_engine.as_str(),
            Some(Value::String(engine)) => engine.as_str(),
            Some(_) => return Ok(Err(base_errors())),
        };
        let Some(parameters) = object.get(ENGINE_PARAMETERS) else {
            return Ok(Err(base_errors()));
        };

        let method = match parameters.get("method") {
            None => None,
            Some(Value::String(method)) => Some(method.as_str()),
            Some(other) => {
                return Err(MontanteError::UnknownMethod {
                    engine: engine.to_string(),
                    method: other.to_string(),
                });
            }
        };

        self.composer
            .compose_training_schema(engine, method)
            .map(Ok)
    }

    /// Validates `payload` without training.
    ///
    /// # Errors
    ///
    /// Schema composition errors.
    pub fn validate_payload(&self, payload: &Value) -> Result<Vec<ValidationError>> {
        Ok(match self.schema_for(payload)? {
            Ok(schema) => schema.validate(payload),
            Err(errors) => errors,
        })
    }

    /// Trains on `dataset`, bounded by the configured training timeout.
    ///
    /// # Errors
    ///
    /// - [`UnknownEngine`](MontanteError::UnknownEngine),
    ///   [`MethodRequired`](MontanteError::MethodRequired) or
    ///   [`UnknownMethod`](MontanteError::UnknownMethod) when no schema can
    ///   be composed
    /// - type mapping errors for unsupported dataset columns
    /// - [`ForeignRuntime`](MontanteError::ForeignRuntime) when the runtime
    ///   cannot fit the data
    /// - [`TrainingTimeout`](MontanteError::TrainingTimeout) when the
    ///   timeout passes
    pub fn train(&self, dataset: &DataFrame, payload: &Value) -> Result<TrainingOutcome> {
        self.train_with_deadline(dataset, payload, &self.deadline())
    }

    /// Like [`train`](Self::train), also stopping when `token` is cancelled.
    pub fn train_with_token(
        &self,
        dataset: &DataFrame,
        payload: &Value,
        token: CancellationToken,
    ) -> Result<TrainingOutcome> {
        self.train_with_deadline(dataset, payload, &self.deadline().with_token(token))
    }

    /// Like [`train`](Self::train), reading the dataset from `source`.
    pub fn train_source<D: DataSource + ?Sized>(
        &self,
        source: &D,
        payload: &Value,
    ) -> Result<TrainingOutcome> {
        self.train(&source.to_dataframe()?, payload)
    }

    /// Like [`train`](Self::train), with an explicit deadline.
    pub fn train_with_deadline(
        &self,
        dataset: &DataFrame,
        payload: &Value,
        deadline: &Deadline,
    ) -> Result<TrainingOutcome> {
        let mut state = TrainingState::Pending;
        debug!("Training request {}", state);

        let schema = match self.schema_for(payload)? {
            Ok(schema) => schema,
            Err(errors) => return Ok(reject(errors)),
        };
        let errors = schema.validate(payload);
        if !errors.is_empty() {
            return Ok(reject(errors));
        }

        let mut request = TrainingPayload::deserialize(payload)?;
        let engine_id = request
            .engine
            .get_or_insert_with(|| self.config.default_engine.clone())
            .clone();
        request.target = sanitize_column_name(&request.target);
        for predictor in &mut request.predictors {
            *predictor = sanitize_column_name(predictor);
        }

        let dataset = sanitize_column_names(dataset)?;
        let errors = check_against_dataset(&request, &dataset);
        if !errors.is_empty() {
            return Ok(reject(errors));
        }

        state = TrainingState::Validated;
        debug!("Training request {}", state);

        let engine = self.composer.registry().resolve(&engine_id)?;
        let mut used: Vec<&str> = request.predictors.iter().map(String::as_str).collect();
        used.push(&request.target);
        let frame = to_foreign_dataframe(&dataset.select(used)?)?;
        let formula = build_formula(&request.target, &request.predictors)?;
        let control = engine.training_control(&request.engine_parameters)?;

        let model = engine.train(&self.bridge, &formula, &frame, &control, deadline)?;
        state = TrainingState::Trained;
        info!(
            "Training request {}: {} {} on {} rows ({})",
            state,
            engine_id,
            control.method,
            frame.nrow(),
            formula
        );
        Ok(TrainingOutcome::Trained(model))
    }

    fn deadline(&self) -> Deadline {
        Deadline::from_budget(self.config.training_timeout)
    }
}

fn reject(errors: Vec<ValidationError>) -> TrainingOutcome {
    warn!(
        "Training request {} with {} error(s): {}",
        TrainingState::Rejected,
        errors.len(),
        errors
            .iter()
            .map(|e| e.message.as_str())
            .collect::<Vec<_>>()
            .join("; ")
    );
    TrainingOutcome::Rejected(errors)
}

/// Checks that the payload's columns exist in the dataset and form a usable
/// formula. Names are compared after sanitizing.
fn check_against_dataset(request: &TrainingPayload, dataset: &DataFrame) -> Vec<ValidationError> {
    let columns: HashSet<&str> = dataset
        .get_columns()
        .iter()
        .map(|c| c.name().as_str())
        .collect();
    let key = |k: &str| PathSegment::from(k);
    let mut errors = Vec::new();

    if !columns.contains(request.target.as_str()) {
        errors.push(ValidationError::new(
            vec![key("properties"), key("target")],
            vec![key("target")],
            format!("'{}' is not a column of the dataset", request.target),
        ));
    }

    if request.predictors.is_empty() {
        errors.push(ValidationError::new(
            vec![key("properties"), key("predictors"), key("minItems")],
            vec![key("predictors")],
            "[] is too short",
        ));
    }

    let mut seen = HashSet::new();
    let mut repeated = false;
    for (i, predictor) in request.predictors.iter().enumerate() {
        let at = vec![key("predictors"), PathSegment::Index(i)];
        let items = vec![key("properties"), key("predictors"), key("items")];
        if !columns.contains(predictor.as_str()) {
            errors.push(ValidationError::new(
                items,
                at,
                format!("'{predictor}' is not a column of the dataset"),
            ));
        } else if *predictor == request.target {
            errors.push(ValidationError::new(
                items,
                at,
                format!("'{predictor}' is the target column"),
            ));
        }
        repeated |= !seen.insert(predictor.as_str());
    }
    if repeated {
        let listed: Vec<String> = request.predictors.iter().map(|p| format!("'{p}'")).collect();
        errors.push(ValidationError::new(
            vec![key("properties"), key("predictors"), key("uniqueItems")],
            vec![key("predictors")],
            format!("[{}] has non-unique elements", listed.join(", ")),
        ));
    }

    sort_errors(&mut errors);
    errors
}
