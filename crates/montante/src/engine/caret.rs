//! The `caret` engine: parameter sub-schema and `trainControl` parsing.

use serde::Deserialize;
use serde_json::{Value, json};

use super::Engine;
use crate::error::Result;
use crate::runtime::{Metric, Resampling, ResamplingMethod, TrainControl};

/// Engine id as written in payloads.
pub const CARET_ENGINE: &str = "caret";

/// Methods the caret engine accepts.
pub const CARET_METHODS: [&str; 1] = ["C5.0"];

/// caret, as exposed to payloads.
#[derive(Debug, Clone, Copy, Default)]
pub struct CaretEngine;

/// `engine-parameters` of a caret payload.
#[derive(Debug, Clone, PartialEq, Deserialize)]
struct CaretParameters {
    method: String,
    #[serde(default)]
    preprocess: Vec<String>,
    #[serde(default)]
    metric: Option<Metric>,
    #[serde(rename = "training-control")]
    training_control: CaretTrainingControl,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
struct CaretTrainingControl {
    method: ResamplingMethod,
    number: i64,
    repeats: i64,
}

impl Engine for CaretEngine {
    fn id(&self) -> &'static str {
        CARET_ENGINE
    }

    fn methods(&self) -> &[&'static str] {
        &CARET_METHODS
    }

    fn parameters_schema(&self, _method: Option<&str>) -> Value {
        let metrics: Vec<&str> = Metric::ALL.iter().map(Metric::as_str).collect();
        let resampling: Vec<&str> = ResamplingMethod::ALL
            .iter()
            .map(ResamplingMethod::as_str)
            .collect();

        json!({
            "type": "object",
            "required": ["method", "training-control"],
            "properties": {
                "method": {"type": "string", "enum": self.methods()},
                "preprocess": {"type": "array", "items": {"type": "string"}},
                "metric": {"type": "string", "enum": metrics},
                "training-control": {
                    "type": "object",
                    "required": ["method", "number", "repeats"],
                    "properties": {
                        "method": {"type": "string", "enum": resampling},
                        "number": {"type": "integer"},
                        "repeats": {"type": "integer"}
                    }
                }
            }
        })
    }

    fn training_control(&self, parameters: &Value) -> Result<TrainControl> {
        let params = CaretParameters::deserialize(parameters)?;
        Ok(TrainControl {
            engine: CARET_ENGINE.to_string(),
            method: params.method,
            metric: params.metric,
            preprocess: params.preprocess,
            resampling: Resampling {
                method: params.training_control.method,
                number: params.training_control.number,
                repeats: params.training_control.repeats,
            },
        })
    }
}
