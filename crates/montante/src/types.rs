//! Shared value types: column classes, column signatures, prediction pairs
//! and model summaries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The three column classes that can cross into the foreign runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrimitiveType {
    /// Whole numbers; become foreign integer vectors.
    Integer,
    /// Floating point numbers; become foreign double vectors.
    Float,
    /// Text or categorical values; become foreign factors.
    Categorical,
}

impl PrimitiveType {
    /// The JSON-Schema primitive type accepted for values of this class.
    ///
    /// ```
    /// use montante::PrimitiveType;
    ///
    /// assert_eq!(PrimitiveType::Integer.json_type(), "integer");
    /// assert_eq!(PrimitiveType::Float.json_type(), "number");
    /// assert_eq!(PrimitiveType::Categorical.json_type(), "string");
    /// ```
    #[must_use]
    pub fn json_type(&self) -> &'static str {
        match self {
            PrimitiveType::Integer => "integer",
            PrimitiveType::Float => "number",
            PrimitiveType::Categorical => "string",
        }
    }
}

impl std::fmt::Display for PrimitiveType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PrimitiveType::Integer => "integer",
            PrimitiveType::Float => "float",
            PrimitiveType::Categorical => "categorical",
        };
        f.write_str(name)
    }
}

/// A named, classified column. A model's column signature is a list of these.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    /// Sanitized column name.
    pub name: String,
    /// Column class.
    pub kind: PrimitiveType,
}

impl ColumnSpec {
    /// Creates a column spec.
    pub fn new(name: impl Into<String>, kind: PrimitiveType) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

/// One decoded prediction.
///
/// `code` is the foreign runtime's level code exactly as it emitted it, which
/// is **1-based**. `label` is the level at that code, already looked up at
/// `levels[code - 1]`. Use [`level_index`](Self::level_index) for the 0-based
/// position in the model's level table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PredictionPair {
    /// 1-based level code as produced by the foreign runtime.
    pub code: u32,
    /// The predicted class label.
    pub label: String,
}

impl PredictionPair {
    /// 0-based position of the label in the model's level table.
    ///
    /// ```
    /// use montante::PredictionPair;
    ///
    /// let pair = PredictionPair { code: 1, label: "setosa".into() };
    /// assert_eq!(pair.level_index(), 0);
    /// ```
    #[must_use]
    pub fn level_index(&self) -> usize {
        (self.code as usize).saturating_sub(1)
    }
}

/// Resampled performance of one tuning candidate.
///
/// Undefined scores are `NaN` in memory and `null` in JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TuningResult {
    /// Number of boosting trials of the candidate.
    pub trials: u32,
    /// Mean resampled accuracy (`NaN` without resampling).
    #[serde(with = "nan_as_null")]
    pub accuracy: f64,
    /// Mean resampled Cohen's kappa (`NaN` when undefined on every resample).
    #[serde(with = "nan_as_null")]
    pub kappa: f64,
}

mod nan_as_null {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if value.is_finite() {
            serializer.serialize_f64(*value)
        } else {
            serializer.serialize_none()
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(f64::NAN))
    }
}

/// Descriptive summary of a trained model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSummary {
    /// Engine id, e.g. `caret`.
    pub engine: String,
    /// Engine method, e.g. `C5.0`.
    pub method: String,
    /// Runtime that owns the model (`native` or `rpy2`).
    pub runtime: String,
    /// Target column.
    pub target: String,
    /// Predictor column signature, in formula order.
    pub predictors: Vec<ColumnSpec>,
    /// Class levels of the target.
    pub levels: Vec<String>,
    /// Metric used to pick the final candidate.
    pub metric: String,
    /// Resampling strategy used.
    pub resampling: String,
    /// Tuning table (empty when the runtime does not report one).
    pub tuning: Vec<TuningResult>,
    /// Trials of the selected candidate, when known.
    pub selected_trials: Option<u32>,
    /// Rows seen at training time.
    pub training_rows: usize,
    /// When training finished.
    pub trained_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primitive_type_serde_is_lowercase() {
        let json = serde_json::to_string(&PrimitiveType::Categorical).unwrap();
        assert_eq!(json, "\"categorical\"");
    }

    #[test]
    fn test_undefined_tuning_scores_survive_json() {
        let result = TuningResult {
            trials: 1,
            accuracy: f64::NAN,
            kappa: 0.5,
        };
        let json = serde_json::to_string(&result).unwrap();
        assert_eq!(json, r#"{"trials":1,"accuracy":null,"kappa":0.5}"#);
        let back: TuningResult = serde_json::from_str(&json).unwrap();
        assert!(back.accuracy.is_nan());
        assert_eq!(back.kappa, 0.5);
    }

    #[test]
    fn test_level_index_is_zero_based() {
        let pair = PredictionPair {
            code: 3,
            label: "virginica".into(),
        };
        assert_eq!(pair.level_index(), 2);
    }
}
