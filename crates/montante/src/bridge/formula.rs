//! Symbolic model formulas (`target ~ p1 + p2`).

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{MontanteError, Result};

/// Characters the formula grammar reads as operators or separators.
static FORMULA_OPERATORS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\s()~+*/:^|%,\-]").expect("Invalid regex: formula operators"));

/// A model formula: one response and an ordered, non-empty predictor list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Formula {
    target: String,
    predictors: Vec<String>,
}

impl Formula {
    /// Response column.
    #[must_use]
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Predictor columns, in the order given.
    #[must_use]
    pub fn predictors(&self) -> &[String] {
        &self.predictors
    }
}

impl fmt::Display for Formula {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ~ {}", self.target, self.predictors.join(" + "))
    }
}

/// Builds `target ~ predictor1 + predictor2 + ...`.
///
/// # Errors
///
/// Returns [`MontanteError::InvalidData`] when `predictors` is empty, names
/// are empty or contain operator characters (sanitize first), a predictor
/// repeats, or the target is also a predictor.
///
/// # Example
///
/// ```
/// use montante::bridge::build_formula;
///
/// let formula = build_formula("target", &["sepal_length_cm", "petal_width_cm"]).unwrap();
/// assert_eq!(formula.to_string(), "target ~ sepal_length_cm + petal_width_cm");
/// ```
pub fn build_formula<S: AsRef<str>>(target: &str, predictors: &[S]) -> Result<Formula> {
    if predictors.is_empty() {
        return Err(MontanteError::InvalidData(
            "a formula needs at least one predictor".to_string(),
        ));
    }

    check_term(target)?;
    let mut terms: Vec<String> = Vec::with_capacity(predictors.len());
    for predictor in predictors {
        let predictor = predictor.as_ref();
        check_term(predictor)?;
        if predictor == target {
            return Err(MontanteError::InvalidData(format!(
                "'{predictor}' is both the target and a predictor"
            )));
        }
        if terms.iter().any(|t| t == predictor) {
            return Err(MontanteError::InvalidData(format!(
                "predictor '{predictor}' is listed more than once"
            )));
        }
        terms.push(predictor.to_string());
    }

    Ok(Formula {
        target: target.to_string(),
        predictors: terms,
    })
}

fn check_term(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(MontanteError::InvalidData(
            "formula terms must not be empty".to_string(),
        ));
    }
    if FORMULA_OPERATORS.is_match(name) {
        return Err(MontanteError::InvalidData(format!(
            "'{name}' contains formula operator characters; sanitize column names first"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_formula_preserves_order() {
        let formula = build_formula("y", &["b", "a", "c"]).unwrap();
        assert_eq!(formula.to_string(), "y ~ b + a + c");
        assert_eq!(formula.predictors(), ["b", "a", "c"]);
        assert_eq!(formula.target(), "y");
    }

    #[test]
    fn test_formula_requires_predictors() {
        let empty: [&str; 0] = [];
        assert!(matches!(
            build_formula("y", &empty),
            Err(MontanteError::InvalidData(_))
        ));
    }

    #[test]
    fn test_formula_rejects_unsanitized_names() {
        assert!(build_formula("y", &["sepal length (cm)"]).is_err());
        assert!(build_formula("y", &["a-b"]).is_err());
        assert!(build_formula("y ~ x", &["a"]).is_err());
    }

    #[test]
    fn test_formula_rejects_target_as_predictor() {
        assert!(build_formula("y", &["x", "y"]).is_err());
        assert!(build_formula("y", &["x", "x"]).is_err());
    }
}
