//! Prediction requests: `{column: [values...]}` in, `(code, label)` pairs out.
//!
//! The request is turned into a dataset typed by the model's column
//! signature, converted through the bridge and scored by the model's engine.
//! Column mismatches are rejected before any type conversion with the
//! runtime's own [`ForeignRuntime`](MontanteError::ForeignRuntime) error;
//! the strict mode raises the typed
//! [`MissingColumns`](MontanteError::MissingColumns) /
//! [`UnexpectedColumns`](MontanteError::UnexpectedColumns) instead.

use std::collections::HashSet;
use std::sync::Arc;

use polars::prelude::*;
use serde_json::{Map, Value};
use tracing::debug;

use crate::bridge::{ForeignDataBridge, sanitize_column_name, to_foreign_dataframe};
use crate::engine::EngineRegistry;
use crate::error::{MontanteError, Result};
use crate::runtime::{RuntimeHandle, TrainedModel, check_newdata};
use crate::schema::SchemaComposer;
use crate::types::{ColumnSpec, PredictionPair, PrimitiveType};
use crate::validator::ValidationError;

/// Scores new rows against trained models.
#[derive(Debug, Clone)]
pub struct PredictionDispatcher {
    registry: Arc<EngineRegistry>,
    bridge: ForeignDataBridge,
    strict: bool,
}

impl PredictionDispatcher {
    /// A dispatcher over `registry`, predicting through `runtime`.
    #[must_use]
    pub fn new(registry: Arc<EngineRegistry>, runtime: RuntimeHandle) -> Self {
        Self {
            registry,
            bridge: ForeignDataBridge::new(runtime),
            strict: false,
        }
    }

    /// Enables the typed column pre-check.
    #[must_use]
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Predicts one label per request row, in order.
    ///
    /// `request` maps column names to equally long arrays of scalars.
    ///
    /// # Errors
    ///
    /// - [`InvalidData`](MontanteError::InvalidData) when the request is not
    ///   an object of equally long scalar arrays
    /// - [`MissingColumns`](MontanteError::MissingColumns) or
    ///   [`UnexpectedColumns`](MontanteError::UnexpectedColumns) in strict
    ///   mode
    /// - [`ForeignRuntime`](MontanteError::ForeignRuntime) when the runtime
    ///   rejects the columns
    pub fn predict(&self, model: &TrainedModel, request: &Value) -> Result<Vec<PredictionPair>> {
        let dataset = request_to_dataframe(request, model.required_columns())?;
        self.predict_dataset(model, &dataset)
    }

    /// Predicts one label per dataset row, in order.
    pub fn predict_dataset(
        &self,
        model: &TrainedModel,
        dataset: &DataFrame,
    ) -> Result<Vec<PredictionPair>> {
        let names: Vec<&str> = dataset
            .get_columns()
            .iter()
            .map(|c| c.name().as_str())
            .collect();
        if self.strict {
            check_columns(model, &names)?;
        } else {
            let sanitized: Vec<String> = names.iter().map(|n| sanitize_column_name(n)).collect();
            check_newdata(model.required_columns(), &sanitized)?;
        }

        let frame = to_foreign_dataframe(dataset)?;
        let engine = self.registry.resolve(model.engine())?;
        let pairs = engine.predict(&self.bridge, model, &frame)?;
        debug!("Predicted {} rows with {} {}", pairs.len(), model.engine(), model.method());
        Ok(pairs)
    }

    /// Validates a full prediction request (`{"model_uuid": ..., "data":
    /// {...}}`) against the model's prediction schema.
    #[must_use]
    pub fn validate_request(&self, model: &TrainedModel, request: &Value) -> Vec<ValidationError> {
        SchemaComposer::new(self.registry.clone())
            .prediction_schema_for(model)
            .validate(request)
    }
}

/// Compares request column names (sanitized) with the model's predictors.
///
/// # Errors
///
/// [`MissingColumns`](MontanteError::MissingColumns) when a predictor is
/// absent, otherwise [`UnexpectedColumns`](MontanteError::UnexpectedColumns)
/// when a column is not a predictor.
pub fn check_columns<S: AsRef<str>>(model: &TrainedModel, names: &[S]) -> Result<()> {
    let given: Vec<String> = names
        .iter()
        .map(|n| sanitize_column_name(n.as_ref()))
        .collect();
    let given_set: HashSet<&str> = given.iter().map(String::as_str).collect();
    let expected: HashSet<&str> = model
        .required_columns()
        .iter()
        .map(|c| c.name.as_str())
        .collect();

    let missing: Vec<String> = model
        .required_columns()
        .iter()
        .filter(|c| !given_set.contains(c.name.as_str()))
        .map(|c| c.name.clone())
        .collect();
    if !missing.is_empty() {
        return Err(MontanteError::MissingColumns(missing));
    }

    let unexpected: Vec<String> = given
        .iter()
        .filter(|n| !expected.contains(n.as_str()))
        .cloned()
        .collect();
    if !unexpected.is_empty() {
        return Err(MontanteError::UnexpectedColumns(unexpected));
    }
    Ok(())
}

/// Builds a dataset from `{column: [values...]}`.
///
/// Whole numbers sent for a float predictor become floats. Anything else
/// keeps its inferred type, so a mistyped column reaches the runtime as such.
///
/// # Errors
///
/// [`MontanteError::InvalidData`] for non-object requests, non-array
/// columns, nested or mixed values, and unequal lengths.
pub fn request_to_dataframe(request: &Value, signature: &[ColumnSpec]) -> Result<DataFrame> {
    let Value::Object(columns) = request else {
        return Err(MontanteError::InvalidData(
            "prediction data must be an object of columns".to_string(),
        ));
    };

    check_lengths(columns)?;
    let built = columns
        .iter()
        .map(|(name, values)| {
            let kind = signature
                .iter()
                .find(|c| c.name == sanitize_column_name(name))
                .map(|c| c.kind);
            request_column(name, values, kind)
        })
        .collect::<Result<Vec<_>>>()?;

    if built.is_empty() {
        return Ok(DataFrame::empty());
    }
    Ok(DataFrame::new(built)?)
}

fn check_lengths(columns: &Map<String, Value>) -> Result<()> {
    let mut height = None;
    for (name, values) in columns {
        let Value::Array(values) = values else {
            return Err(MontanteError::InvalidData(format!(
                "column '{name}' must be an array of values"
            )));
        };
        match height {
            None => height = Some(values.len()),
            Some(h) if h != values.len() => {
                return Err(MontanteError::InvalidData(format!(
                    "column '{name}' has {} values, expected {h}",
                    values.len()
                )));
            }
            Some(_) => {}
        }
    }
    Ok(())
}

/// What a JSON column holds, ignoring nulls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JsonColumnKind {
    Empty,
    Integers,
    Numbers,
    Strings,
    Booleans,
}

fn json_column_kind(name: &str, values: &[Value]) -> Result<JsonColumnKind> {
    let mut kind = JsonColumnKind::Empty;
    for value in values {
        let this = match value {
            Value::Null => continue,
            Value::Number(n) if n.is_i64() => JsonColumnKind::Integers,
            Value::Number(_) => JsonColumnKind::Numbers,
            Value::String(_) => JsonColumnKind::Strings,
            Value::Bool(_) => JsonColumnKind::Booleans,
            Value::Array(_) | Value::Object(_) => {
                return Err(MontanteError::InvalidData(format!(
                    "column '{name}' holds nested values"
                )));
            }
        };
        kind = match (kind, this) {
            (JsonColumnKind::Empty, k) => k,
            (a, b) if a == b => a,
            (JsonColumnKind::Integers, JsonColumnKind::Numbers)
            | (JsonColumnKind::Numbers, JsonColumnKind::Integers) => JsonColumnKind::Numbers,
            _ => {
                return Err(MontanteError::InvalidData(format!(
                    "column '{name}' mixes value types"
                )));
            }
        };
    }
    Ok(kind)
}

fn request_column(name: &str, values: &Value, expected: Option<PrimitiveType>) -> Result<Column> {
    let values = values.as_array().map(Vec::as_slice).unwrap_or_default();
    let name: PlSmallStr = name.into();

    let kind = match (json_column_kind(name.as_str(), values)?, expected) {
        (JsonColumnKind::Empty, Some(PrimitiveType::Integer)) => JsonColumnKind::Integers,
        (JsonColumnKind::Empty, Some(PrimitiveType::Categorical)) => JsonColumnKind::Strings,
        (JsonColumnKind::Empty, _) => JsonColumnKind::Numbers,
        (JsonColumnKind::Integers, Some(PrimitiveType::Float)) => JsonColumnKind::Numbers,
        (kind, _) => kind,
    };

    let column = match kind {
        JsonColumnKind::Integers => {
            Column::new(name, values.iter().map(Value::as_i64).collect::<Vec<_>>())
        }
        JsonColumnKind::Numbers | JsonColumnKind::Empty => {
            Column::new(name, values.iter().map(Value::as_f64).collect::<Vec<_>>())
        }
        JsonColumnKind::Strings => {
            Column::new(name, values.iter().map(Value::as_str).collect::<Vec<_>>())
        }
        JsonColumnKind::Booleans => {
            Column::new(name, values.iter().map(Value::as_bool).collect::<Vec<_>>())
        }
    };
    Ok(column)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::{FactorVector, ForeignColumn, ForeignDataFrame, ForeignVector, build_formula};
    use crate::cancellation::Deadline;
    use crate::runtime::{Resampling, ResamplingMethod, TrainControl};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn signature() -> Vec<ColumnSpec> {
        vec![
            ColumnSpec::new("width", PrimitiveType::Float),
            ColumnSpec::new("count", PrimitiveType::Integer),
            ColumnSpec::new("color", PrimitiveType::Categorical),
        ]
    }

    fn trained() -> (RuntimeHandle, TrainedModel) {
        let runtime = RuntimeHandle::native(1);
        let n = 30;
        let frame = ForeignDataFrame::new(vec![
            ForeignColumn {
                name: "width".into(),
                vector: ForeignVector::Double((0..n).map(|i| Some(f64::from(i))).collect()),
            },
            ForeignColumn {
                name: "label".into(),
                vector: ForeignVector::Factor(FactorVector::from_labels(
                    (0..n).map(|i| Some(if i < 15 { "low" } else { "high" })),
                )),
            },
        ])
        .unwrap();
        let control = TrainControl {
            engine: "caret".into(),
            method: "C5.0".into(),
            metric: None,
            preprocess: vec![],
            resampling: Resampling {
                method: ResamplingMethod::None,
                number: 1,
                repeats: 1,
            },
        };
        let formula = build_formula("label", &["width"]).unwrap();
        let model = runtime
            .train(&formula, &frame, &control, &Deadline::none())
            .unwrap();
        (runtime, model)
    }

    fn dispatcher(runtime: RuntimeHandle) -> PredictionDispatcher {
        PredictionDispatcher::new(Arc::new(EngineRegistry::with_default_engines()), runtime)
    }

    #[test]
    fn test_request_typed_by_signature() {
        let request = json!({"width": [1, 2], "count": [3, 4], "color": ["red", null]});
        let df = request_to_dataframe(&request, &signature()).unwrap();
        assert_eq!(df.column("width").unwrap().dtype(), &DataType::Float64);
        assert_eq!(df.column("count").unwrap().dtype(), &DataType::Int64);
        assert_eq!(df.column("color").unwrap().dtype(), &DataType::String);
        assert_eq!(df.column("color").unwrap().null_count(), 1);
    }

    #[test]
    fn test_request_keeps_mistyped_values() {
        let request = json!({"width": ["a", "b"]});
        let df = request_to_dataframe(&request, &signature()).unwrap();
        assert_eq!(df.column("width").unwrap().dtype(), &DataType::String);
    }

    #[test]
    fn test_request_shape_errors() {
        for request in [
            json!([1, 2]),
            json!({"width": 1.0}),
            json!({"width": [1.0], "count": [1, 2]}),
            json!({"width": [1.0, "a"]}),
            json!({"width": [[1.0]]}),
        ] {
            assert!(matches!(
                request_to_dataframe(&request, &signature()),
                Err(MontanteError::InvalidData(_))
            ));
        }
    }

    #[test]
    fn test_predicts_one_pair_per_row() {
        let (runtime, model) = trained();
        let pairs = dispatcher(runtime)
            .predict(&model, &json!({"width": [0, 2, 29]}))
            .unwrap();
        let labels: Vec<&str> = pairs.iter().map(|p| p.label.as_str()).collect();
        assert_eq!(labels, ["low", "low", "high"]);
        assert_eq!(pairs[2].code, 1);
    }

    #[test]
    fn test_column_mismatches_surface_from_runtime() {
        let (runtime, model) = trained();
        let d = dispatcher(runtime);
        for request in [
            json!({}),
            json!({"height": [1.0]}),
            json!({"width": [1.0], "extra": [1.0]}),
            json!({"width": ["a"]}),
        ] {
            assert!(matches!(
                d.predict(&model, &request),
                Err(MontanteError::ForeignRuntime(_))
            ));
        }
    }

    #[test]
    fn test_extra_column_rejected_before_type_conversion() {
        let (runtime, model) = trained();
        let d = dispatcher(runtime);
        for request in [
            json!({"width": [1.0, 2.0], "flag": [true, false]}),
            json!({"width": [1.0, 2.0], "when (utc)": [true, null]}),
        ] {
            match d.predict(&model, &request) {
                Err(MontanteError::ForeignRuntime(message)) => {
                    assert!(message.starts_with("variables not used by the model"));
                }
                other => panic!("expected a runtime error, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_strict_mode_types_mismatches() {
        let (runtime, model) = trained();
        let d = dispatcher(runtime).strict(true);
        assert!(matches!(
            d.predict(&model, &json!({"height": [1.0]})),
            Err(MontanteError::MissingColumns(cols)) if cols == ["width"]
        ));
        assert!(matches!(
            d.predict(&model, &json!({"width": [1.0], "extra": [2.0]})),
            Err(MontanteError::UnexpectedColumns(cols)) if cols == ["extra"]
        ));
    }

    #[test]
    fn test_validate_request() {
        let (runtime, model) = trained();
        let d = dispatcher(runtime);
        assert!(d.validate_request(&model, &json!({"data": {"width": [1.5]}})).is_empty());
        let errors = d.validate_request(&model, &json!({"data": {"width": ["x"]}}));
        assert_eq!(errors[0].message, "'x' is not of type 'number'");
    }
}
