//! Marshalling between host datasets and the foreign runtime.
//!
//! A polars [`DataFrame`] crosses into the runtime as a [`ForeignDataFrame`]:
//! names are sanitized, then each column is classified and converted by
//! [`to_foreign_vector`]. Predictions come back as a factor vector and are
//! decoded by [`extract_prediction_pairs`].
//!
//! # Index convention
//!
//! Foreign factors are 1-based. [`extract_prediction_pairs`] looks labels up
//! at `levels[code - 1]` and returns the raw code unchanged in
//! [`PredictionPair::code`]; [`PredictionPair::level_index`] gives the
//! 0-based position.
//!
//! ```
//! use montante::bridge::{extract_prediction_pairs, FactorVector, ForeignVector};
//!
//! let levels = vec!["setosa".to_string(), "versicolor".to_string(), "virginica".to_string()];
//! let vector = ForeignVector::Factor(FactorVector::new(vec![Some(1), Some(1), Some(2)], levels));
//! let pairs = extract_prediction_pairs(&vector).unwrap();
//!
//! assert_eq!(pairs[2].code, 2);
//! assert_eq!(pairs[2].label, "versicolor");
//! assert_eq!(pairs[2].level_index(), 1);
//! ```

mod formula;
mod names;
mod types;
mod vector;

use polars::prelude::DataFrame;
use tracing::debug;

use crate::cancellation::Deadline;
use crate::error::{MontanteError, Result};
use crate::runtime::{RuntimeHandle, TrainControl, TrainedModel};
use crate::types::PredictionPair;

pub use formula::{Formula, build_formula};
pub use names::{column_info, names_missing, sanitize_column_name, sanitize_column_names};
pub use types::{DtypeClass, classify, dtype_class, to_foreign_vector};
pub use vector::{ColumnSummary, FactorVector, ForeignColumn, ForeignDataFrame, ForeignVector};

/// Converts a dataset into a foreign data frame, column by column in order.
///
/// Column names are sanitized first.
///
/// # Errors
///
/// - [`MontanteError::UnsupportedType`] for temporal columns
/// - [`MontanteError::UnrecognizedType`] for other unsupported columns
/// - [`MontanteError::InvalidData`] for name collisions after sanitizing or
///   integers outside the foreign range
pub fn to_foreign_dataframe(df: &DataFrame) -> Result<ForeignDataFrame> {
    let df = sanitize_column_names(df)?;
    let columns = df
        .get_columns()
        .iter()
        .map(|column| {
            Ok(ForeignColumn {
                name: column.name().to_string(),
                vector: to_foreign_vector(column)?,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    ForeignDataFrame::new(columns)
}

/// Decodes a foreign prediction vector into `(code, label)` pairs, one per
/// observation, in order.
///
/// # Errors
///
/// [`MontanteError::ForeignRuntime`] when the vector is not a factor, holds
/// an NA, or holds a code outside `1..=levels.len()`.
pub fn extract_prediction_pairs(vector: &ForeignVector) -> Result<Vec<PredictionPair>> {
    let ForeignVector::Factor(factor) = vector else {
        return Err(MontanteError::foreign(format!(
            "expected a factor prediction, got a {} vector",
            vector.class_name()
        )));
    };

    factor
        .codes()
        .iter()
        .enumerate()
        .map(|(row, code)| {
            let code = code.ok_or_else(|| {
                MontanteError::foreign(format!("prediction for row {row} is NA"))
            })?;
            let label = (code as usize)
                .checked_sub(1)
                .and_then(|idx| factor.levels().get(idx))
                .ok_or_else(|| {
                    MontanteError::foreign(format!(
                        "prediction code {code} for row {row} is outside 1..={}",
                        factor.levels().len()
                    ))
                })?;
            Ok(PredictionPair {
                code,
                label: label.clone(),
            })
        })
        .collect()
}

/// Train/predict entry point into the guarded runtime.
#[derive(Debug, Clone)]
pub struct ForeignDataBridge {
    runtime: RuntimeHandle,
}

impl ForeignDataBridge {
    /// Wraps a runtime handle.
    #[must_use]
    pub fn new(runtime: RuntimeHandle) -> Self {
        Self { runtime }
    }

    /// The guarded runtime.
    #[must_use]
    pub fn runtime(&self) -> &RuntimeHandle {
        &self.runtime
    }

    /// Fits a model. Runtime errors propagate unchanged.
    pub fn train(
        &self,
        formula: &Formula,
        data: &ForeignDataFrame,
        control: &TrainControl,
        deadline: &Deadline,
    ) -> Result<TrainedModel> {
        debug!("Training {} on {} rows", formula, data.nrow());
        self.runtime.train(formula, data, control, deadline)
    }

    /// Predicts raw class labels. Column mismatches surface as
    /// [`MontanteError::ForeignRuntime`].
    pub fn predict(&self, model: &TrainedModel, data: &ForeignDataFrame) -> Result<ForeignVector> {
        self.runtime.predict(model, data)
    }

    /// Predicts and decodes in one step.
    pub fn predict_pairs(
        &self,
        model: &TrainedModel,
        data: &ForeignDataFrame,
    ) -> Result<Vec<PredictionPair>> {
        extract_prediction_pairs(&self.predict(model, data)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polars::prelude::*;
    use pretty_assertions::assert_eq;

    fn iris_levels() -> Vec<String> {
        ["setosa", "versicolor", "virginica"]
            .map(String::from)
            .to_vec()
    }

    #[test]
    fn test_extract_pairs_offsets_label_only() {
        let vector = ForeignVector::Factor(FactorVector::new(
            vec![Some(1), Some(1), Some(2)],
            iris_levels(),
        ));
        let pairs = extract_prediction_pairs(&vector).unwrap();
        let expected = vec![
            PredictionPair { code: 1, label: "setosa".into() },
            PredictionPair { code: 1, label: "setosa".into() },
            PredictionPair { code: 2, label: "versicolor".into() },
        ];
        assert_eq!(pairs, expected);
    }

    #[test]
    fn test_extract_pairs_every_level() {
        let vector = ForeignVector::Factor(FactorVector::new(
            vec![Some(3), Some(2), Some(1)],
            iris_levels(),
        ));
        let labels: Vec<String> = extract_prediction_pairs(&vector)
            .unwrap()
            .into_iter()
            .map(|p| p.label)
            .collect();
        assert_eq!(labels, ["virginica", "versicolor", "setosa"]);
    }

    #[test]
    fn test_extract_pairs_rejects_bad_codes() {
        for codes in [vec![Some(0)], vec![Some(4)], vec![None]] {
            let vector = ForeignVector::Factor(FactorVector::new(codes, iris_levels()));
            assert!(matches!(
                extract_prediction_pairs(&vector),
                Err(MontanteError::ForeignRuntime(_))
            ));
        }
        let numeric = ForeignVector::Double(vec![Some(1.0)]);
        assert!(extract_prediction_pairs(&numeric).is_err());
    }

    #[test]
    fn test_to_foreign_dataframe_keeps_order_and_sanitizes() {
        let df = df! {
            "sepal length (cm)" => &[5.1f64, 4.9],
            "count" => &[1i64, 2],
            "species" => &["setosa", "setosa"],
        }
        .unwrap();
        let frame = to_foreign_dataframe(&df).unwrap();

        assert_eq!(frame.names(), ["sepal_length_cm", "count", "species"]);
        assert_eq!(frame.nrow(), 2);
        assert!(matches!(frame.column("count"), Some(ForeignVector::Integer(_))));
        assert!(matches!(frame.column("species"), Some(ForeignVector::Factor(_))));
    }

    #[test]
    fn test_to_foreign_dataframe_rejects_temporal() {
        let day = Column::new("day".into(), &[1i32, 2])
            .cast(&DataType::Date)
            .unwrap();
        let df = DataFrame::new(vec![Column::new("x".into(), &[1.0f64, 2.0]), day]).unwrap();
        assert!(matches!(
            to_foreign_dataframe(&df),
            Err(MontanteError::UnsupportedType { .. })
        ));
    }
}
