//! Numeric predictor preprocessing (`center`, `scale`, `range`).

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::bridge::{ForeignColumn, ForeignDataFrame, ForeignVector};
use crate::error::{MontanteError, Result};

/// Methods the preprocessor understands.
pub const PREPROCESS_METHODS: [&str; 3] = ["center", "scale", "range"];

/// Shift and divisor for one numeric column: `x' = (x - shift) / divisor`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnTransform {
    /// Column name.
    pub column: String,
    /// Subtracted first.
    pub shift: f64,
    /// Then divided by.
    pub divisor: f64,
}

/// Preprocessing fitted on training predictors and replayed on new data.
///
/// `range` maps values onto `[0, 1]` and takes precedence over
/// `center`/`scale`. Factor columns pass through unchanged; numeric columns
/// come out as double vectors.
///
/// ```
/// use montante::bridge::{ForeignColumn, ForeignDataFrame, ForeignVector};
/// use montante::runtime::Preprocessor;
///
/// let frame = ForeignDataFrame::new(vec![ForeignColumn {
///     name: "x".into(),
///     vector: ForeignVector::Double(vec![Some(1.0), Some(2.0), Some(3.0)]),
/// }]).unwrap();
/// let pre = Preprocessor::fit(&frame, &["center", "scale"]).unwrap();
/// let out = pre.apply(&frame).unwrap();
/// assert_eq!(out.column("x"), Some(&ForeignVector::Double(vec![Some(-1.0), Some(0.0), Some(1.0)])));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Preprocessor {
    methods: Vec<String>,
    transforms: Vec<ColumnTransform>,
}

impl Preprocessor {
    /// Fits `methods` on every numeric column of `data`.
    ///
    /// # Errors
    ///
    /// [`MontanteError::ForeignRuntime`] for an unknown method.
    pub fn fit<S: AsRef<str>>(data: &ForeignDataFrame, methods: &[S]) -> Result<Self> {
        let methods: Vec<String> = methods.iter().map(|m| m.as_ref().to_string()).collect();
        if let Some(unknown) = methods
            .iter()
            .find(|m| !PREPROCESS_METHODS.contains(&m.as_str()))
        {
            return Err(MontanteError::foreign(format!(
                "'{unknown}' is not a valid preprocessing method; use one of {}",
                PREPROCESS_METHODS.join(", ")
            )));
        }
        if methods.is_empty() {
            return Ok(Self::default());
        }

        let has = |name: &str| methods.iter().any(|m| m == name);
        let mut transforms = Vec::new();
        for column in data.columns() {
            let Some(values) = column.vector.as_f64() else {
                continue;
            };
            let values: Vec<f64> = values.into_iter().flatten().collect();
            if values.is_empty() {
                continue;
            }

            let transform = if has("range") {
                let min = values.iter().copied().fold(f64::INFINITY, f64::min);
                let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                let span = max - min;
                if span == 0.0 {
                    warn!("Column '{}' is constant; range scaling skipped", column.name);
                }
                ColumnTransform {
                    column: column.name.clone(),
                    shift: min,
                    divisor: if span == 0.0 { 1.0 } else { span },
                }
            } else {
                let mean = values.iter().sum::<f64>() / values.len() as f64;
                let mut divisor = 1.0;
                if has("scale") {
                    let sd = sample_sd(&values, mean);
                    if sd > 0.0 && sd.is_finite() {
                        divisor = sd;
                    } else {
                        warn!("Column '{}' has zero variance; scaling skipped", column.name);
                    }
                }
                ColumnTransform {
                    column: column.name.clone(),
                    shift: if has("center") { mean } else { 0.0 },
                    divisor,
                }
            };
            transforms.push(transform);
        }

        Ok(Self {
            methods,
            transforms,
        })
    }

    /// The fitted methods.
    #[must_use]
    pub fn methods(&self) -> &[String] {
        &self.methods
    }

    /// Per-column transforms.
    #[must_use]
    pub fn transforms(&self) -> &[ColumnTransform] {
        &self.transforms
    }

    /// `true` when applying changes nothing.
    #[must_use]
    pub fn is_identity(&self) -> bool {
        self.transforms.is_empty()
    }

    /// Applies the fitted transforms to the matching columns of `data`.
    ///
    /// # Errors
    ///
    /// [`MontanteError::ForeignRuntime`] when a fitted column is missing or
    /// is not numeric.
    pub fn apply(&self, data: &ForeignDataFrame) -> Result<ForeignDataFrame> {
        if self.is_identity() {
            return Ok(data.clone());
        }
        let mut columns = data.columns().to_vec();
        for transform in &self.transforms {
            let column = columns
                .iter_mut()
                .find(|c| c.name == transform.column)
                .ok_or_else(|| {
                    MontanteError::foreign(format!(
                        "preprocessing expects column '{}'",
                        transform.column
                    ))
                })?;
            let values = column.vector.as_f64().ok_or_else(|| {
                MontanteError::foreign(format!(
                    "preprocessing expects column '{}' to be numeric",
                    transform.column
                ))
            })?;
            *column = ForeignColumn {
                name: column.name.clone(),
                vector: ForeignVector::Double(
                    values
                        .into_iter()
                        .map(|v| v.map(|x| (x - transform.shift) / transform.divisor))
                        .collect(),
                ),
            };
        }
        ForeignDataFrame::new(columns)
    }
}

fn sample_sd(values: &[f64], mean: f64) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let ss: f64 = values.iter().map(|v| (v - mean).powi(2)).sum();
    (ss / (values.len() - 1) as f64).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::FactorVector;

    fn frame() -> ForeignDataFrame {
        ForeignDataFrame::new(vec![
            ForeignColumn {
                name: "n".into(),
                vector: ForeignVector::Integer(vec![Some(2), Some(4), Some(6)]),
            },
            ForeignColumn {
                name: "k".into(),
                vector: ForeignVector::Factor(FactorVector::from_labels(["a", "b", "a"].map(Some))),
            },
        ])
        .unwrap()
    }

    fn doubles(frame: &ForeignDataFrame, name: &str) -> Vec<f64> {
        frame
            .column(name)
            .and_then(ForeignVector::as_f64)
            .unwrap()
            .into_iter()
            .flatten()
            .collect()
    }

    #[test]
    fn test_center_scale() {
        let pre = Preprocessor::fit(&frame(), &["center", "scale"]).unwrap();
        let out = pre.apply(&frame()).unwrap();
        assert_eq!(doubles(&out, "n"), [-1.0, 0.0, 1.0]);
        // factors untouched
        assert_eq!(out.column("k"), frame().column("k"));
    }

    #[test]
    fn test_center_only() {
        let pre = Preprocessor::fit(&frame(), &["center"]).unwrap();
        assert_eq!(doubles(&pre.apply(&frame()).unwrap(), "n"), [-2.0, 0.0, 2.0]);
    }

    #[test]
    fn test_range() {
        let pre = Preprocessor::fit(&frame(), &["range"]).unwrap();
        assert_eq!(doubles(&pre.apply(&frame()).unwrap(), "n"), [0.0, 0.5, 1.0]);
    }

    #[test]
    fn test_constant_column_not_divided_by_zero() {
        let data = ForeignDataFrame::new(vec![ForeignColumn {
            name: "c".into(),
            vector: ForeignVector::Double(vec![Some(3.0); 4]),
        }])
        .unwrap();
        let pre = Preprocessor::fit(&data, &["center", "scale"]).unwrap();
        assert_eq!(doubles(&pre.apply(&data).unwrap(), "c"), [0.0; 4]);
    }

    #[test]
    fn test_unknown_method_rejected() {
        assert!(matches!(
            Preprocessor::fit(&frame(), &["pca"]),
            Err(MontanteError::ForeignRuntime(_))
        ));
    }

    #[test]
    fn test_empty_methods_is_identity() {
        let empty: [&str; 0] = [];
        let pre = Preprocessor::fit(&frame(), &empty).unwrap();
        assert!(pre.is_identity());
        assert_eq!(pre.apply(&frame()).unwrap(), frame());
    }
}
