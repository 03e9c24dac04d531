use crate::common::error::{PlatterError, Result};
use crate::common::relation::ColumnType;
use rust_decimal::Decimal;
use std::cmp::Ordering;
use std::fmt;
use std::fmt::Formatter;

/// A single value.
///
/// Note that `Datum` must always derive [`Eq`] to enforce
/// equality with `row::Row`.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub enum Datum {
    Boolean(bool),
    /// A 32-bit signed integer.
    Int32(i32),
    /// A 64-bit signed integer.
    Int64(i64),
    /// A sequence of Unicode codepoints encoded as UTF-8.
    String(String),
    /// An exact decimal number.
    Decimal(Decimal),
    /// An unknown value.
    Null,
}

impl Datum {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Compare two datums of the same type. Neither side may
    /// be null; null ordering is a property of the sort key,
    /// not of the value.
    pub fn try_cmp(&self, other: &Datum) -> Result<Ordering> {
        match (self, other) {
            (Self::Boolean(l), Self::Boolean(r)) => Ok(l.cmp(r)),
            (Self::Int32(l), Self::Int32(r)) => Ok(l.cmp(r)),
            (Self::Int64(l), Self::Int64(r)) => Ok(l.cmp(r)),
            (Self::String(l), Self::String(r)) => Ok(l.cmp(r)),
            (Self::Decimal(l), Self::Decimal(r)) => Ok(l.cmp(r)),
            _ => Err(PlatterError::Internal(format!(
                "mismatched types for comparison: {} vs {}",
                self, other
            ))),
        }
    }
}

impl fmt::Display for Datum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Boolean(e) => {
                if *e {
                    write!(f, "TRUE")
                } else {
                    write!(f, "FALSE")
                }
            }
            Self::Int32(e) => write!(f, "{}", e),
            Self::Int64(e) => write!(f, "{}", e),
            Self::String(e) => write!(f, "{}", e),
            Self::Decimal(e) => write!(f, "{}", e),
            Self::Null => write!(f, "NULL"),
        }
    }
}

/// The type of a [`Datum`].
///
/// There is a direct correspondence between `Datum`
/// variants and `ScalarType` variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarType {
    /// The type of [`Datum::Boolean`]
    Boolean,
    /// The type of [`Datum::Int32`].
    Int32,
    /// The type of [`Datum::Int64`].
    Int64,
    /// The type of [`Datum::String`].
    String,
    /// The type of [`Datum::Decimal`].
    Decimal,
    /// A catalog object identifier.
    Oid,
    /// Stands in for a type the catalog could not name yet.
    /// Bootstrap-time self-referential columns are annotated
    /// with this and patched once the relation commits.
    Placeholder,
}

impl ScalarType {
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            ScalarType::Int32 | ScalarType::Int64 | ScalarType::Decimal
        )
    }

    /// Derive a `ColumnType` from `ScalarType`
    pub fn nullable(&self, b: bool) -> ColumnType {
        ColumnType {
            scalar_type: *self,
            nullable: b,
        }
    }
}

impl fmt::Display for ScalarType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Boolean => write!(f, "Boolean"),
            Self::Int32 => write!(f, "Int32"),
            Self::Int64 => write!(f, "Int64"),
            Self::String => write!(f, "String"),
            Self::Decimal => write!(f, "Decimal"),
            Self::Oid => write!(f, "Oid"),
            Self::Placeholder => write!(f, "Placeholder"),
        }
    }
}
