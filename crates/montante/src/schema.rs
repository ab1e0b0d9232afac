//! JSON Schema composition for training and prediction requests.
//!
//! Training schemas are the fixed base envelope with `engine-parameters`
//! replaced by the sub-schema of the requested engine and method. Prediction
//! schemas are derived from a column signature: every predictor becomes a
//! required array of values of its JSON type.
//!
//! Schemas are rebuilt per request and never persisted. Composition is
//! deterministic: the same inputs give byte-identical JSON.
//!
//! # Example
//!
//! ```
//! use montante::SchemaComposer;
//! use serde_json::json;
//!
//! let composer = SchemaComposer::with_default_engines();
//! let schema = composer.compose_training_schema("caret", Some("C5.0")).unwrap();
//!
//! let errors = schema.validate(&json!({"target": "y", "predictors": ["x"]}));
//! assert_eq!(errors[0].message, "'engine-parameters' is a required property");
//! ```

use std::fmt;
use std::sync::Arc;

use polars::prelude::DataType;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::debug;

use crate::bridge::classify;
use crate::engine::EngineRegistry;
use crate::error::{MontanteError, Result};
use crate::runtime::TrainedModel;
use crate::types::ColumnSpec;
use crate::validator::{ValidationError, validate};

/// Payload key holding the engine-specific parameters.
pub const ENGINE_PARAMETERS: &str = "engine-parameters";

/// A composed JSON Schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Schema(Value);

impl Schema {
    /// The schema document.
    #[must_use]
    pub fn as_value(&self) -> &Value {
        &self.0
    }

    /// Consumes the schema, returning the document.
    #[must_use]
    pub fn into_value(self) -> Value {
        self.0
    }

    /// Validates `instance` against this schema.
    #[must_use]
    pub fn validate(&self, instance: &Value) -> Vec<ValidationError> {
        validate(&self.0, instance)
    }
}

impl fmt::Display for Schema {
    /// Compact JSON; `{:#}` pretty-prints.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered = if f.alternate() {
            serde_json::to_string_pretty(&self.0)
        } else {
            serde_json::to_string(&self.0)
        };
        f.write_str(&rendered.map_err(|_| fmt::Error)?)
    }
}

/// Builds training and prediction schemas.
#[derive(Debug, Clone)]
pub struct SchemaComposer {
    registry: Arc<EngineRegistry>,
}

impl SchemaComposer {
    /// A composer over `registry`.
    #[must_use]
    pub fn new(registry: Arc<EngineRegistry>) -> Self {
        Self { registry }
    }

    /// A composer over [`EngineRegistry::with_default_engines`].
    #[must_use]
    pub fn with_default_engines() -> Self {
        Self::new(Arc::new(EngineRegistry::with_default_engines()))
    }

    /// The engines this composer knows.
    #[must_use]
    pub fn registry(&self) -> &EngineRegistry {
        &self.registry
    }

    /// The envelope shared by every training request, with an empty
    /// `engine-parameters` placeholder.
    #[must_use]
    pub fn base_training_schema(&self) -> Schema {
        Schema(json!({
            "type": "object",
            "required": ["target", "predictors", ENGINE_PARAMETERS],
            "properties": {
                "engine": {"type": "string"},
                "target": {"type": "string"},
                "predictors": {"type": "array", "items": {"type": "string"}},
                ENGINE_PARAMETERS: {}
            }
        }))
    }

    /// The training schema for `engine` and `method`.
    ///
    /// # Errors
    ///
    /// - [`MontanteError::UnknownEngine`] if the engine is not registered
    /// - [`MontanteError::MethodRequired`] if the engine needs a method and
    ///   `method` is `None`
    /// - [`MontanteError::UnknownMethod`] if the method is not registered for
    ///   the engine
    pub fn compose_training_schema(&self, engine: &str, method: Option<&str>) -> Result<Schema> {
        let backend = self.registry.resolve(engine)?;

        match method {
            None if backend.requires_method() => {
                return Err(MontanteError::MethodRequired {
                    engine: engine.to_string(),
                });
            }
            Some(m) if !backend.supports(m) => {
                return Err(MontanteError::UnknownMethod {
                    engine: engine.to_string(),
                    method: m.to_string(),
                });
            }
            _ => {}
        }

        let mut schema = self.base_training_schema().into_value();
        if let Some(slot) = schema
            .get_mut("properties")
            .and_then(|p| p.get_mut(ENGINE_PARAMETERS))
        {
            *slot = backend.parameters_schema(method);
        }
        debug!("Composed training schema for {}/{}", engine, method.unwrap_or("-"));
        Ok(Schema(schema))
    }

    /// The prediction schema for an ordered list of host columns.
    ///
    /// # Errors
    ///
    /// [`MontanteError::UnsupportedType`] for temporal columns and
    /// [`MontanteError::UnrecognizedType`] for other unsupported dtypes.
    pub fn compose_prediction_schema<S: AsRef<str>>(
        &self,
        columns: &[(S, DataType)],
    ) -> Result<Schema> {
        let signature = columns
            .iter()
            .map(|(name, dtype)| {
                let name = name.as_ref();
                Ok(ColumnSpec::new(name, classify(name, dtype)?))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(self.prediction_schema_for_signature(&signature))
    }

    /// The prediction schema for a column signature.
    #[must_use]
    pub fn prediction_schema_for_signature(&self, signature: &[ColumnSpec]) -> Schema {
        let mut properties = Map::new();
        for column in signature {
            properties.insert(
                column.name.clone(),
                json!({"type": "array", "items": {"type": column.kind.json_type()}}),
            );
        }
        let required: Vec<&str> = signature.iter().map(|c| c.name.as_str()).collect();

        Schema(json!({
            "type": "object",
            "required": ["data"],
            "properties": {
                "model_uuid": {"type": "string"},
                "data": {
                    "type": "object",
                    "required": required,
                    "properties": properties
                }
            }
        }))
    }

    /// The prediction schema for a trained model's predictors.
    #[must_use]
    pub fn prediction_schema_for(&self, model: &TrainedModel) -> Schema {
        self.prediction_schema_for_signature(model.required_columns())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PrimitiveType;
    use crate::validator::PathSegment;
    use pretty_assertions::assert_eq;

    fn iris_payload() -> Value {
        json!({
            "engine": "caret",
            "target": "target",
            "predictors": ["sepal_length_cm", "sepal_width_cm", "petal_length_cm", "petal_width_cm"],
            "engine-parameters": {
                "method": "C5.0",
                "preprocess": [],
                "metric": "Accuracy",
                "training-control": {"method": "boot", "number": 5, "repeats": 1}
            }
        })
    }

    fn keys(path: &[&str]) -> Vec<PathSegment> {
        path.iter().map(|s| PathSegment::from(*s)).collect()
    }

    fn c50_schema() -> Schema {
        SchemaComposer::with_default_engines()
            .compose_training_schema("caret", Some("C5.0"))
            .unwrap()
    }

    #[test]
    fn test_composition_is_deterministic() {
        let a = c50_schema().to_string();
        let b = c50_schema().to_string();
        assert_eq!(a, b);
        assert!(a.starts_with(r#"{"type":"object","required":["target","predictors","engine-parameters"]"#));
    }

    #[test]
    fn test_valid_payload() {
        assert!(c50_schema().validate(&iris_payload()).is_empty());
    }

    #[test]
    fn test_missing_engine_parameters() {
        let mut payload = iris_payload();
        payload.as_object_mut().unwrap().remove("engine-parameters");
        let errors = c50_schema().validate(&payload);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].schema_path, keys(&["required"]));
        assert_eq!(errors[0].message, "'engine-parameters' is a required property");
    }

    #[test]
    fn test_unregistered_method_in_payload() {
        let mut payload = iris_payload();
        payload["engine-parameters"]["method"] = json!("UNEXISTENT");
        let errors = c50_schema().validate(&payload);
        assert_eq!(
            errors[0].schema_path,
            keys(&["properties", "engine-parameters", "properties", "method", "enum"])
        );
    }

    #[test]
    fn test_unregistered_training_method_in_payload() {
        let mut payload = iris_payload();
        payload["engine-parameters"]["training-control"]["method"] = json!("UNEXISTENT");
        let errors = c50_schema().validate(&payload);
        assert_eq!(
            errors[0].schema_path,
            keys(&[
                "properties",
                "engine-parameters",
                "properties",
                "training-control",
                "properties",
                "method",
                "enum"
            ])
        );
    }

    #[test]
    fn test_composition_errors() {
        let composer = SchemaComposer::with_default_engines();
        assert!(matches!(
            composer.compose_training_schema("caret", Some("UNEXISTENT")),
            Err(MontanteError::UnknownMethod { .. })
        ));
        assert!(matches!(
            composer.compose_training_schema("caret", None),
            Err(MontanteError::MethodRequired { .. })
        ));
        assert!(matches!(
            composer.compose_training_schema("weka", Some("C5.0")),
            Err(MontanteError::UnknownEngine(_))
        ));
    }

    #[test]
    fn test_base_schema_placeholder() {
        let base = SchemaComposer::with_default_engines().base_training_schema();
        assert_eq!(base.as_value()["properties"]["engine-parameters"], json!({}));
    }

    #[test]
    fn test_prediction_schema_from_columns() {
        let composer = SchemaComposer::with_default_engines();
        let schema = composer
            .compose_prediction_schema(&[
                ("count", DataType::Int64),
                ("width", DataType::Float64),
                ("color", DataType::String),
            ])
            .unwrap();
        let data = &schema.as_value()["properties"]["data"];
        assert_eq!(data["required"], json!(["count", "width", "color"]));
        assert_eq!(data["properties"]["count"]["items"]["type"], "integer");
        assert_eq!(data["properties"]["width"]["items"]["type"], "number");
        assert_eq!(data["properties"]["color"]["items"]["type"], "string");

        let request = json!({"data": {"count": [1], "width": [0.5], "color": ["red"]}});
        assert!(schema.validate(&request).is_empty());
        let request = json!({"data": {"count": [1.5], "width": [0.5]}});
        assert_eq!(schema.validate(&request).len(), 2);
    }

    #[test]
    fn test_prediction_schema_rejects_temporal() {
        let composer = SchemaComposer::with_default_engines();
        let result = composer.compose_prediction_schema(&[("when", DataType::Date)]);
        assert!(matches!(result, Err(MontanteError::UnsupportedType { .. })));
    }

    #[test]
    fn test_prediction_schema_from_signature() {
        let composer = SchemaComposer::with_default_engines();
        let schema = composer.prediction_schema_for_signature(&[ColumnSpec::new(
            "x",
            PrimitiveType::Float,
        )]);
        assert_eq!(schema.as_value()["required"], json!(["data"]));
        assert_eq!(
            schema.as_value()["properties"]["model_uuid"],
            json!({"type": "string"})
        );
    }
}
