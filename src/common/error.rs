use crate::common::relation::RelId;
use std::fmt::Formatter;
use std::{fmt, result};

/// Result type for operations that could result in
/// [PlatterError]
pub type Result<T> = result::Result<T, PlatterError>;

#[derive(Debug)]
pub enum PlatterError {
    /// Error returned as a consequence of a bug in Platter.
    /// This error should not happen in normal usage.
    /// Platter has internal invariants that we are unable to
    /// ask the compiler to check for us. This error is
    /// raised when one of those invariants is not verified
    /// during execution.
    Internal(String),
    /// The worker cannot continue. Corrupted on-disk state,
    /// state machine assertion failures and unrecoverable
    /// resource exhaustion end up here; the dispatch loop is
    /// expected to exit the worker instead of retrying.
    Fatal(String),
    Catalog(CatalogError),
    /// A transaction used more than 65535 commands.
    TooManyCommands,
    Sort(String),
    Storage(String),
    Io(std::io::Error),
}

impl PlatterError {
    /// True if the worker must exit rather than abort the
    /// current statement.
    pub fn is_fatal(&self) -> bool {
        matches!(self, PlatterError::Fatal(_))
    }
}

#[derive(Debug)]
pub enum CatalogError {
    RelationNotFound(String),
    RelationIdNotFound(RelId),
    /// No column with this name
    ColumnNotFound {
        rel: String,
        name: String,
    },
    DuplicateColumn(String),
    /// A descriptor handle outlived an invalidation; the
    /// caller should re-open the relation.
    StaleDescriptor(RelId),
    TempNameInUse(String),
}

/// Create a "relation not found" Platter::CatalogError
pub fn relation_not_found(name: &str) -> PlatterError {
    PlatterError::Catalog(CatalogError::RelationNotFound(name.to_string()))
}

pub fn relation_id_not_found(id: RelId) -> PlatterError {
    PlatterError::Catalog(CatalogError::RelationIdNotFound(id))
}

impl fmt::Display for CatalogError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::RelationNotFound(name) => {
                write!(f, "relation not found in catalog: {}", name)
            }
            Self::RelationIdNotFound(id) => {
                write!(f, "relation id not found in catalog: {}", id)
            }
            Self::ColumnNotFound { rel, name } => {
                write!(f, "no column named '{}' in relation '{}'", name, rel)
            }
            Self::DuplicateColumn(name) => {
                write!(f, "duplicate column name '{}'", name)
            }
            Self::StaleDescriptor(id) => {
                write!(f, "descriptor for relation {} is stale", id)
            }
            Self::TempNameInUse(name) => {
                write!(f, "a temp relation named '{}' already exists", name)
            }
        }
    }
}

impl fmt::Display for PlatterError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            PlatterError::Internal(desc) => {
                write!(
                    f,
                    "Internal error: {}. This was likely caused by a bug",
                    desc
                )
            }
            PlatterError::Fatal(desc) => {
                write!(f, "Fatal error: {}", desc)
            }
            PlatterError::Catalog(e) => {
                write!(f, "Catalog error: {}", e)
            }
            PlatterError::TooManyCommands => {
                write!(f, "you may only have 65535 commands per transaction")
            }
            PlatterError::Sort(desc) => {
                write!(f, "Sort error: {}", desc)
            }
            PlatterError::Storage(desc) => {
                write!(f, "Storage error: {}", desc)
            }
            PlatterError::Io(e) => {
                write!(f, "Io error: {}", e)
            }
        }
    }
}

impl std::error::Error for PlatterError {}

impl From<std::io::Error> for PlatterError {
    fn from(e: std::io::Error) -> Self {
        PlatterError::Io(e)
    }
}

impl From<CatalogError> for PlatterError {
    fn from(e: CatalogError) -> Self {
        PlatterError::Catalog(e)
    }
}
