//! The foreign runtime's object model: typed vectors, factors and data frames.
//!
//! These mirror what a statistical runtime such as R holds in memory:
//! 32-bit integer vectors, double vectors and factors (1-based codes into a
//! level table). Missing values are `None`.

use std::collections::{BTreeSet, HashSet};

use polars::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{MontanteError, Result};
use crate::types::{ColumnSpec, PrimitiveType};

/// A categorical vector: 1-based codes plus a shared level table.
///
/// Code `k` stands for `levels[k - 1]`. The constructor does not check codes,
/// since vectors built by a runtime are taken as the runtime produced them.
/// Use [`is_consistent`](Self::is_consistent) to check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FactorVector {
    codes: Vec<Option<u32>>,
    levels: Vec<String>,
}

impl FactorVector {
    /// Wraps raw codes and levels.
    pub fn new(codes: Vec<Option<u32>>, levels: Vec<String>) -> Self {
        Self { codes, levels }
    }

    /// Builds a factor from labels. Levels are the sorted distinct labels.
    ///
    /// ```
    /// use montante::bridge::FactorVector;
    ///
    /// let f = FactorVector::from_labels(["b", "a", "b"].map(Some));
    /// assert_eq!(f.levels(), ["a", "b"]);
    /// assert_eq!(f.codes(), [Some(2), Some(1), Some(2)]);
    /// ```
    pub fn from_labels<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = Option<S>>,
        S: AsRef<str>,
    {
        let labels: Vec<Option<String>> = labels
            .into_iter()
            .map(|l| l.map(|s| s.as_ref().to_string()))
            .collect();
        let levels: Vec<String> = labels
            .iter()
            .flatten()
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let codes = labels
            .iter()
            .map(|label| {
                label.as_ref().and_then(|l| {
                    levels
                        .binary_search(l)
                        .ok()
                        .map(|pos| pos as u32 + 1)
                })
            })
            .collect();
        Self { codes, levels }
    }

    /// Codes, 1-based.
    #[must_use]
    pub fn codes(&self) -> &[Option<u32>] {
        &self.codes
    }

    /// Level table.
    #[must_use]
    pub fn levels(&self) -> &[String] {
        &self.levels
    }

    /// Number of observations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.codes.len()
    }

    /// `true` when there are no observations.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    /// Label of observation `i`, `None` for NA or an invalid code.
    #[must_use]
    pub fn label_at(&self, i: usize) -> Option<&str> {
        let code = self.codes.get(i).copied().flatten()?;
        let idx = (code as usize).checked_sub(1)?;
        self.levels.get(idx).map(String::as_str)
    }

    /// `true` when every non-NA code points into the level table.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.codes
            .iter()
            .flatten()
            .all(|&c| c >= 1 && (c as usize) <= self.levels.len())
    }

    /// Labels per observation.
    #[must_use]
    pub fn labels(&self) -> Vec<Option<&str>> {
        (0..self.len()).map(|i| self.label_at(i)).collect()
    }
}

/// A foreign runtime vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ForeignVector {
    /// 32-bit integer vector.
    Integer(Vec<Option<i32>>),
    /// Double vector.
    Double(Vec<Option<f64>>),
    /// Factor vector.
    Factor(FactorVector),
}

impl ForeignVector {
    /// Number of observations.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            ForeignVector::Integer(v) => v.len(),
            ForeignVector::Double(v) => v.len(),
            ForeignVector::Factor(f) => f.len(),
        }
    }

    /// `true` when there are no observations.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The column class this vector carries.
    #[must_use]
    pub fn kind(&self) -> PrimitiveType {
        match self {
            ForeignVector::Integer(_) => PrimitiveType::Integer,
            ForeignVector::Double(_) => PrimitiveType::Float,
            ForeignVector::Factor(_) => PrimitiveType::Categorical,
        }
    }

    /// The runtime's class name for this vector (`integer`, `numeric`, `factor`).
    #[must_use]
    pub fn class_name(&self) -> &'static str {
        match self {
            ForeignVector::Integer(_) => "integer",
            ForeignVector::Double(_) => "numeric",
            ForeignVector::Factor(_) => "factor",
        }
    }

    /// The host dtype a vector of this kind converts back to.
    #[must_use]
    pub fn host_dtype(&self) -> DataType {
        match self {
            ForeignVector::Integer(_) => DataType::Int32,
            ForeignVector::Double(_) => DataType::Float64,
            ForeignVector::Factor(_) => DataType::String,
        }
    }

    /// Number of missing observations (NaN counts as missing).
    #[must_use]
    pub fn na_count(&self) -> usize {
        match self {
            ForeignVector::Integer(v) => v.iter().filter(|x| x.is_none()).count(),
            ForeignVector::Double(v) => v
                .iter()
                .filter(|x| x.is_none_or(f64::is_nan))
                .count(),
            ForeignVector::Factor(f) => f.codes().iter().filter(|x| x.is_none()).count(),
        }
    }

    /// Number of `Inf` and `-Inf` observations.
    #[must_use]
    pub fn infinite_count(&self) -> usize {
        match self {
            ForeignVector::Double(v) => v.iter().flatten().filter(|x| x.is_infinite()).count(),
            ForeignVector::Integer(_) | ForeignVector::Factor(_) => 0,
        }
    }

    /// Numeric view of the vector; `None` for factors.
    #[must_use]
    pub fn as_f64(&self) -> Option<Vec<Option<f64>>> {
        match self {
            ForeignVector::Integer(v) => Some(v.iter().map(|x| x.map(f64::from)).collect()),
            ForeignVector::Double(v) => Some(v.clone()),
            ForeignVector::Factor(_) => None,
        }
    }

    /// Converts the vector back into a host column.
    #[must_use]
    pub fn to_host_column(&self, name: &str) -> Column {
        match self {
            ForeignVector::Integer(v) => Column::new(name.into(), v.clone()),
            ForeignVector::Double(v) => Column::new(name.into(), v.clone()),
            ForeignVector::Factor(f) => Column::new(name.into(), f.labels()),
        }
    }
}

/// A named vector inside a [`ForeignDataFrame`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForeignColumn {
    /// Sanitized name.
    pub name: String,
    /// Values.
    pub vector: ForeignVector,
}

/// An ordered collection of equal-length named vectors.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ForeignDataFrame {
    columns: Vec<ForeignColumn>,
    nrow: usize,
}

impl ForeignDataFrame {
    /// Builds a frame from columns.
    ///
    /// # Errors
    ///
    /// Returns [`MontanteError::InvalidData`] for duplicate names or unequal
    /// column lengths.
    pub fn new(columns: Vec<ForeignColumn>) -> Result<Self> {
        let nrow = columns.first().map_or(0, |c| c.vector.len());
        let mut seen = HashSet::with_capacity(columns.len());
        for column in &columns {
            if !seen.insert(column.name.as_str()) {
                return Err(MontanteError::InvalidData(format!(
                    "duplicate column '{}'",
                    column.name
                )));
            }
            if column.vector.len() != nrow {
                return Err(MontanteError::InvalidData(format!(
                    "column '{}' has {} rows, expected {nrow}",
                    column.name,
                    column.vector.len()
                )));
            }
        }
        Ok(Self { columns, nrow })
    }

    /// Number of rows.
    #[must_use]
    pub fn nrow(&self) -> usize {
        self.nrow
    }

    /// Number of columns.
    #[must_use]
    pub fn ncol(&self) -> usize {
        self.columns.len()
    }

    /// Columns in order.
    #[must_use]
    pub fn columns(&self) -> &[ForeignColumn] {
        &self.columns
    }

    /// Column names in order.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Looks up a column by name.
    #[must_use]
    pub fn column(&self, name: &str) -> Option<&ForeignVector> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .map(|c| &c.vector)
    }

    /// Column signature of the frame.
    #[must_use]
    pub fn signature(&self) -> Vec<ColumnSpec> {
        self.columns
            .iter()
            .map(|c| ColumnSpec::new(c.name.clone(), c.vector.kind()))
            .collect()
    }

    /// A new frame with the given columns, in the given order.
    ///
    /// # Errors
    ///
    /// Fails with "undefined columns selected" when a name is absent.
    pub fn select<S: AsRef<str>>(&self, names: &[S]) -> Result<Self> {
        let mut columns = Vec::with_capacity(names.len());
        for name in names {
            let name = name.as_ref();
            let vector = self.column(name).ok_or_else(|| {
                MontanteError::foreign(format!("undefined columns selected: '{name}'"))
            })?;
            columns.push(ForeignColumn {
                name: name.to_string(),
                vector: vector.clone(),
            });
        }
        Self::new(columns)
    }

    /// Per-column descriptive summary.
    #[must_use]
    pub fn summary(&self) -> Vec<(String, ColumnSummary)> {
        self.columns
            .iter()
            .map(|c| (c.name.clone(), ColumnSummary::of(&c.vector)))
            .collect()
    }
}

/// Descriptive statistics of one column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ColumnSummary {
    /// Six-number summary of a numeric column (type-7 quantiles).
    Numeric {
        /// Minimum.
        min: f64,
        /// First quartile.
        first_quartile: f64,
        /// Median.
        median: f64,
        /// Arithmetic mean.
        mean: f64,
        /// Third quartile.
        third_quartile: f64,
        /// Maximum.
        max: f64,
        /// Missing values excluded from the statistics.
        missing: usize,
    },
    /// Level counts of a factor, in level order.
    Factor {
        /// `(level, count)` pairs.
        counts: Vec<(String, usize)>,
        /// Missing values.
        missing: usize,
    },
}

impl ColumnSummary {
    /// Summarizes a vector. An all-missing numeric vector reports `NaN`s.
    #[must_use]
    pub fn of(vector: &ForeignVector) -> Self {
        match vector {
            ForeignVector::Factor(f) => {
                let mut counts: Vec<(String, usize)> =
                    f.levels().iter().map(|l| (l.clone(), 0)).collect();
                let mut missing = 0;
                for code in f.codes() {
                    match code.and_then(|c| (c as usize).checked_sub(1)) {
                        Some(idx) if idx < counts.len() => counts[idx].1 += 1,
                        _ => missing += 1,
                    }
                }
                ColumnSummary::Factor { counts, missing }
            }
            numeric => {
                let values = numeric.as_f64().unwrap_or_default();
                let mut present: Vec<f64> = values
                    .iter()
                    .flatten()
                    .copied()
                    .filter(|v| !v.is_nan())
                    .collect();
                let missing = values.len() - present.len();
                present.sort_by(f64::total_cmp);
                let mean = if present.is_empty() {
                    f64::NAN
                } else {
                    present.iter().sum::<f64>() / present.len() as f64
                };
                ColumnSummary::Numeric {
                    min: quantile(&present, 0.0),
                    first_quartile: quantile(&present, 0.25),
                    median: quantile(&present, 0.5),
                    mean,
                    third_quartile: quantile(&present, 0.75),
                    max: quantile(&present, 1.0),
                    missing,
                }
            }
        }
    }
}

/// Type-7 quantile of sorted values (linear interpolation between order
/// statistics).
pub(crate) fn quantile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return f64::NAN;
    }
    let h = (sorted.len() - 1) as f64 * p;
    let lo = h.floor() as usize;
    let hi = (lo + 1).min(sorted.len() - 1);
    sorted[lo] + (h - lo as f64) * (sorted[hi] - sorted[lo])
}
