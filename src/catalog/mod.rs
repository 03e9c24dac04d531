pub mod bootstrap;
pub mod initfile;
pub mod memory;
pub mod relcache;
pub mod temprel;

pub use memory::MemCatalog;

use crate::common::error::Result;
use crate::common::relation::RelId;
use crate::common::scalar::ScalarType;
use crate::inval::RowPointer;

/// Well-known ids of the catalog relations themselves. The
/// descriptors for these are nailed into every worker's
/// cache before the first catalog lookup can happen.
pub const REL_CATALOG_ID: RelId = 1;
pub const COLUMN_CATALOG_ID: RelId = 2;
pub const AM_CATALOG_ID: RelId = 3;
pub const RULE_CATALOG_ID: RelId = 4;
pub const LOG_RELATION_ID: RelId = 5;
pub const TIME_RELATION_ID: RelId = 6;
pub const REL_ID_INDEX_ID: RelId = 7;
pub const REL_NAME_INDEX_ID: RelId = 8;
pub const COLUMN_NUM_INDEX_ID: RelId = 9;

pub const BTREE_AM_ID: u32 = 11;

/// First id handed to user relations.
pub const FIRST_USER_REL_ID: RelId = 100;

/// Catalog type ids as stored in the column catalog.
/// Id zero is the bootstrap placeholder: a self-referential
/// column whose type relation is not committed yet.
pub const PLACEHOLDER_TYPE_ID: u32 = 0;

pub fn type_id_of(t: ScalarType) -> u32 {
    match t {
        ScalarType::Placeholder => PLACEHOLDER_TYPE_ID,
        ScalarType::Boolean => 1,
        ScalarType::Int32 => 2,
        ScalarType::Int64 => 3,
        ScalarType::String => 4,
        ScalarType::Decimal => 5,
        ScalarType::Oid => 6,
    }
}

pub fn scalar_type_of(type_id: u32) -> Option<ScalarType> {
    match type_id {
        PLACEHOLDER_TYPE_ID => Some(ScalarType::Placeholder),
        1 => Some(ScalarType::Boolean),
        2 => Some(ScalarType::Int32),
        3 => Some(ScalarType::Int64),
        4 => Some(ScalarType::String),
        5 => Some(ScalarType::Decimal),
        6 => Some(ScalarType::Oid),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelKind {
    Heap,
    Index,
}

impl RelKind {
    pub fn as_u8(self) -> u8 {
        match self {
            RelKind::Heap => b'r',
            RelKind::Index => b'i',
        }
    }

    pub fn from_u8(raw: u8) -> Option<RelKind> {
        match raw {
            b'r' => Some(RelKind::Heap),
            b'i' => Some(RelKind::Index),
            _ => None,
        }
    }
}

/// One row of the relation catalog.
#[derive(Debug, Clone, PartialEq)]
pub struct RelationForm {
    pub id: RelId,
    pub name: String,
    pub kind: RelKind,
    pub owner: u32,
    pub is_shared: bool,
    pub column_count: u16,
    pub storage_manager: u32,
    pub has_rules: bool,
    pub has_indexes: bool,
    /// Access method; zero for plain heaps.
    pub am_id: u32,
}

/// One row of the per-column catalog, ordered by
/// `column_number` (1-based).
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnForm {
    pub rel_id: RelId,
    pub name: String,
    pub column_number: u16,
    pub type_id: u32,
    pub len: i32,
    pub align: u8,
    pub by_value: bool,
    pub is_dropped: bool,
    pub type_mod: i32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AccessMethodForm {
    pub id: u32,
    pub name: String,
    pub strategy_count: u16,
    pub support_count: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleEvent {
    Select,
    Update,
    Insert,
    Delete,
}

/// One rewrite rule. The qual and action trees are opaque to
/// the core; it only carries them.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleForm {
    pub rule_id: u32,
    pub rel_id: RelId,
    pub event: RuleEvent,
    pub attribute_number: i16,
    pub is_instead: bool,
    pub qual_tree: String,
    pub action_tree: String,
}

/// How catalog lookups reach the catalog tables.
///
/// During bootstrap the catalog indexes do not exist yet, so
/// every lookup falls back to a sequential scan. Outside
/// bootstrap the indexed path is always taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogAccessPolicy {
    Bootstrap,
    Indexed,
}

/// Read (and minimal write) surface of the catalog tables the
/// core consumes. The heap storage behind it is an external
/// collaborator.
pub trait CatalogStore: Send + Sync {
    /// Indexed lookup of a relation row by id.
    fn relation_by_id(&self, id: RelId) -> Result<Option<RelationForm>>;

    /// Indexed lookup of a relation row by name.
    fn relation_by_name(&self, name: &str) -> Result<Option<RelationForm>>;

    /// Sequential scan of the relation catalog; the
    /// bootstrap path.
    fn scan_relations(&self) -> Result<Vec<RelationForm>>;

    /// Indexed lookup of one column by (rel, column number).
    fn column(&self, rel: RelId, column_number: u16) -> Result<Option<ColumnForm>>;

    /// Sequential scan of the column catalog for one
    /// relation; the bootstrap path. Rows come back in
    /// `column_number` order.
    fn scan_columns(&self, rel: RelId) -> Result<Vec<ColumnForm>>;

    fn access_method(&self, id: u32) -> Result<Option<AccessMethodForm>>;

    fn rules_of(&self, rel: RelId) -> Result<Vec<RuleForm>>;

    /// Strategy and support procedure vectors for an index
    /// relation.
    fn index_support(&self, rel: RelId, am: u32) -> Result<Option<(Vec<u32>, Vec<u32>)>>;

    fn allocate_rel_id(&self) -> Result<RelId>;

    /// Insert a relation row plus its column rows. Returns
    /// the location of the new relation row, for
    /// invalidation.
    fn create_relation(&self, form: RelationForm, columns: Vec<ColumnForm>)
        -> Result<RowPointer>;

    fn drop_relation(&self, id: RelId) -> Result<RowPointer>;

    fn rename_relation(&self, id: RelId, new_name: &str) -> Result<RowPointer>;

    fn add_column(&self, rel: RelId, column: ColumnForm) -> Result<RowPointer>;
}
