use crate::common::error::{CatalogError, PlatterError, Result};
use crate::common::scalar::ScalarType;
use std::collections::HashSet;

/// Stable identifier of a relation in the catalog.
pub type RelId = u32;

pub const INVALID_REL_ID: RelId = 0;

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ColumnType {
    pub scalar_type: ScalarType,
    pub nullable: bool,
}

impl ColumnType {
    pub fn new(scalar_type: ScalarType, nullable: bool) -> Self {
        Self {
            scalar_type,
            nullable,
        }
    }
}

pub type ColumnName = String;

/// A description of the shape of a relation's tuples.
///
/// It bundles the type of each column, in order, with the
/// name of each column. Column names are unique within one
/// layout; the check goes through a hash set so that wide
/// relations stay cheap to validate.
///
/// To simplify the design, we assume that a column is never
/// deleted from a relation, so that a column's index in the
/// vector uniquely identifies a valid column.
#[derive(Debug, Clone, PartialEq)]
pub struct TupleLayout {
    column_types: Vec<ColumnType>,
    column_names: Vec<ColumnName>,
}

impl Default for TupleLayout {
    fn default() -> Self {
        Self::empty()
    }
}

impl TupleLayout {
    pub fn new(column_types: Vec<ColumnType>, column_names: Vec<String>) -> Result<Self> {
        if column_types.len() != column_names.len() {
            return Err(PlatterError::Internal(format!(
                "layout has {} types but {} names",
                column_types.len(),
                column_names.len()
            )));
        }
        let mut seen = HashSet::with_capacity(column_names.len());
        for name in &column_names {
            if !seen.insert(name.as_str()) {
                return Err(PlatterError::Catalog(CatalogError::DuplicateColumn(
                    name.clone(),
                )));
            }
        }
        Ok(Self {
            column_types,
            column_names,
        })
    }

    /// Creates an empty layout.
    pub fn empty() -> Self {
        Self {
            column_types: vec![],
            column_names: vec![],
        }
    }

    pub fn column_count(&self) -> usize {
        self.column_types.len()
    }

    pub fn column_types(&self) -> &Vec<ColumnType> {
        &self.column_types
    }

    /// Returns an immutable reference to a specified column
    /// type selected using an offset within the internal
    /// vector.
    pub fn column_type(&self, i: usize) -> &ColumnType {
        &self.column_types[i]
    }

    pub fn column_names(&self) -> &Vec<ColumnName> {
        &self.column_names
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.column_names.iter().position(|n| n == name)
    }
}
