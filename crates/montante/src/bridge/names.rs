//! Dataset column naming helpers.
//!
//! Formula syntax treats spaces and parentheses as operators, so names are
//! sanitized before a dataset crosses into the foreign runtime.

use std::collections::HashSet;

use polars::prelude::*;

use crate::error::{MontanteError, Result};

/// Sanitizes a single column name: spaces become `_`, parentheses are dropped.
///
/// ```
/// use montante::bridge::sanitize_column_name;
///
/// assert_eq!(sanitize_column_name("sepal length (cm)"), "sepal_length_cm");
/// assert_eq!(sanitize_column_name("already_fine"), "already_fine");
/// ```
#[must_use]
pub fn sanitize_column_name(name: &str) -> String {
    name.replace(' ', "_").replace(['(', ')'], "")
}

/// Returns a copy of `df` with every column name sanitized.
///
/// # Errors
///
/// Returns [`MontanteError::InvalidData`] when two columns end up with the
/// same sanitized name, or when a name sanitizes to the empty string.
pub fn sanitize_column_names(df: &DataFrame) -> Result<DataFrame> {
    let mut seen = HashSet::with_capacity(df.width());
    let mut columns = Vec::with_capacity(df.width());

    for column in df.get_columns() {
        let original = column.name().as_str();
        let sanitized = sanitize_column_name(original);
        if sanitized.is_empty() {
            return Err(MontanteError::InvalidData(format!(
                "column name '{original}' is empty once sanitized"
            )));
        }
        if !seen.insert(sanitized.clone()) {
            return Err(MontanteError::InvalidData(format!(
                "column '{original}' collides with another column as '{sanitized}'"
            )));
        }
        columns.push(column.clone().with_name(sanitized.into()));
    }

    Ok(DataFrame::new(columns)?)
}

/// Column names paired with their dtypes, in dataset order.
#[must_use]
pub fn column_info(df: &DataFrame) -> Vec<(String, DataType)> {
    df.get_columns()
        .iter()
        .map(|c| (c.name().to_string(), c.dtype().clone()))
        .collect()
}

/// The entries of `names` that are not columns of `df`, in input order.
///
/// Empty when every name is present.
#[must_use]
pub fn names_missing<S: AsRef<str>>(df: &DataFrame, names: &[S]) -> Vec<String> {
    let present: HashSet<&str> = df.get_columns().iter().map(|c| c.name().as_str()).collect();
    names
        .iter()
        .map(AsRef::as_ref)
        .filter(|name| !present.contains(name))
        .map(str::to_string)
        .collect()
}
