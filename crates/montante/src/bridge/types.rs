//! Mapping between host (polars) dtypes and foreign vector types.
//!
//! | Host dtype | Class | Foreign vector |
//! |------------|-------|----------------|
//! | `Int8`..`Int64`, `UInt8`..`UInt64` | integer | 32-bit integer vector |
//! | `Float32`, `Float64` | float | double vector |
//! | `String`, `Categorical`, `Enum` | categorical | factor |
//! | `Date`, `Datetime`, `Duration`, `Time` | - | [`UnsupportedType`](MontanteError::UnsupportedType) |
//! | anything else | - | [`UnrecognizedType`](MontanteError::UnrecognizedType) |
//!
//! Integers are never widened to doubles here: whether a column is integer
//! or float decides model semantics downstream.

use polars::prelude::*;

use crate::bridge::vector::{FactorVector, ForeignVector};
use crate::error::{MontanteError, Result};
use crate::types::PrimitiveType;

/// Outcome of looking at a dtype.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DtypeClass {
    /// One of the supported classes.
    Primitive(PrimitiveType),
    /// Date/time values, deliberately not implemented.
    Temporal,
    /// Anything else.
    Unrecognized,
}

/// Classifies a dtype without failing.
#[must_use]
pub fn dtype_class(dtype: &DataType) -> DtypeClass {
    match dtype {
        DataType::Int8
        | DataType::Int16
        | DataType::Int32
        | DataType::Int64
        | DataType::UInt8
        | DataType::UInt16
        | DataType::UInt32
        | DataType::UInt64 => DtypeClass::Primitive(PrimitiveType::Integer),
        DataType::Float32 | DataType::Float64 => DtypeClass::Primitive(PrimitiveType::Float),
        DataType::String | DataType::Categorical(_, _) | DataType::Enum(_, _) => {
            DtypeClass::Primitive(PrimitiveType::Categorical)
        }
        DataType::Date | DataType::Datetime(_, _) | DataType::Duration(_) | DataType::Time => {
            DtypeClass::Temporal
        }
        _ => DtypeClass::Unrecognized,
    }
}

/// Classifies the dtype of column `name`.
///
/// # Errors
///
/// - [`MontanteError::UnsupportedType`] for temporal dtypes
/// - [`MontanteError::UnrecognizedType`] for any other unsupported dtype
///
/// # Example
///
/// ```
/// use montante::bridge::classify;
/// use montante::PrimitiveType;
/// use polars::prelude::DataType;
///
/// assert_eq!(classify("n", &DataType::Int64).unwrap(), PrimitiveType::Integer);
/// assert!(classify("when", &DataType::Date).is_err());
/// ```
pub fn classify(name: &str, dtype: &DataType) -> Result<PrimitiveType> {
    match dtype_class(dtype) {
        DtypeClass::Primitive(kind) => Ok(kind),
        DtypeClass::Temporal => Err(MontanteError::UnsupportedType {
            column: name.to_string(),
            dtype: dtype.to_string(),
        }),
        DtypeClass::Unrecognized => Err(MontanteError::UnrecognizedType {
            column: name.to_string(),
            dtype: dtype.to_string(),
        }),
    }
}

/// Converts a host column into the matching foreign vector.
///
/// # Errors
///
/// Classification errors from [`classify`], and
/// [`MontanteError::InvalidData`] for integers that do not fit the foreign
/// 32-bit integer (whose minimum value is reserved for NA).
pub fn to_foreign_vector(column: &Column) -> Result<ForeignVector> {
    let name = column.name().as_str();
    let kind = classify(name, column.dtype())?;
    let series = column.as_materialized_series();

    match kind {
        PrimitiveType::Integer => {
            let values = if series.dtype() == &DataType::UInt64 {
                series
                    .u64()?
                    .into_iter()
                    .map(|v| v.map(|v| foreign_int(name, i128::from(v))).transpose())
                    .collect::<Result<Vec<_>>>()?
            } else {
                let widened = series.cast(&DataType::Int64)?;
                widened
                    .i64()?
                    .into_iter()
                    .map(|v| v.map(|v| foreign_int(name, i128::from(v))).transpose())
                    .collect::<Result<Vec<_>>>()?
            };
            Ok(ForeignVector::Integer(values))
        }
        PrimitiveType::Float => {
            let widened = series.cast(&DataType::Float64)?;
            Ok(ForeignVector::Double(widened.f64()?.into_iter().collect()))
        }
        PrimitiveType::Categorical => {
            let text = series.cast(&DataType::String)?;
            Ok(ForeignVector::Factor(FactorVector::from_labels(
                text.str()?.into_iter(),
            )))
        }
    }
}

fn foreign_int(column: &str, value: i128) -> Result<i32> {
    match i32::try_from(value) {
        Ok(v) if v != i32::MIN => Ok(v),
        _ => Err(MontanteError::InvalidData(format!(
            "column '{column}' holds {value}, outside the foreign integer range"
        ))),
    }
}
