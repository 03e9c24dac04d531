//! Compile-time schema of the bootstrap ("nailed") relations.
//!
//! The descriptors for the catalog tables, and for the catalog indexes used
//! to open every other descriptor, must exist before any catalog lookup can
//! succeed. They are pre-materialized from these constants and marked
//! nailed so no invalidation can evict them.

use crate::catalog::{
    AccessMethodForm, ColumnForm, RelKind, RelationForm, AM_CATALOG_ID, BTREE_AM_ID,
    COLUMN_CATALOG_ID, COLUMN_NUM_INDEX_ID, LOG_RELATION_ID, REL_CATALOG_ID, REL_ID_INDEX_ID,
    REL_NAME_INDEX_ID, RULE_CATALOG_ID, TIME_RELATION_ID,
};
use crate::common::relation::RelId;
use crate::common::scalar::ScalarType;
use lazy_static::lazy_static;

pub const REL_CATALOG_NAME: &str = "sys_table";
pub const COLUMN_CATALOG_NAME: &str = "sys_column";
pub const AM_CATALOG_NAME: &str = "sys_am";
pub const RULE_CATALOG_NAME: &str = "sys_rule";
pub const LOG_RELATION_NAME: &str = "sys_log";
pub const TIME_RELATION_NAME: &str = "sys_time";

pub const SYSTEM_OWNER: u32 = 6;

#[derive(Debug, Clone)]
pub struct NailedRelation {
    pub form: RelationForm,
    pub columns: Vec<ColumnForm>,
    pub am: Option<AccessMethodForm>,
    pub strategy: Vec<u32>,
    pub support: Vec<u32>,
}

fn col(rel_id: RelId, number: u16, name: &str, t: ScalarType) -> ColumnForm {
    let (len, by_value) = match t {
        ScalarType::Boolean => (1, true),
        ScalarType::Int32 | ScalarType::Oid => (4, true),
        ScalarType::Int64 => (8, true),
        _ => (-1, false),
    };
    ColumnForm {
        rel_id,
        name: name.to_string(),
        column_number: number,
        type_id: crate::catalog::type_id_of(t),
        len,
        align: if by_value { b'i' } else { b'x' },
        by_value,
        is_dropped: false,
        type_mod: -1,
    }
}

fn heap_form(id: RelId, name: &str, column_count: u16, is_shared: bool) -> RelationForm {
    RelationForm {
        id,
        name: name.to_string(),
        kind: RelKind::Heap,
        owner: SYSTEM_OWNER,
        is_shared,
        column_count,
        storage_manager: 0,
        has_rules: false,
        has_indexes: true,
        am_id: 0,
    }
}

fn index_form(id: RelId, name: &str, column_count: u16) -> RelationForm {
    RelationForm {
        id,
        name: name.to_string(),
        kind: RelKind::Index,
        owner: SYSTEM_OWNER,
        is_shared: false,
        column_count,
        storage_manager: 0,
        has_rules: false,
        has_indexes: false,
        am_id: BTREE_AM_ID,
    }
}

pub fn btree_am() -> AccessMethodForm {
    AccessMethodForm {
        id: BTREE_AM_ID,
        name: "btree".to_string(),
        strategy_count: 5,
        support_count: 1,
    }
}

/// Deterministic procedure ids for an index's strategy and
/// support vectors; one entry per (column, slot).
pub fn strategy_vector(am: &AccessMethodForm, natts: u16) -> Vec<u32> {
    (0..natts as u32 * am.strategy_count as u32)
        .map(|i| am.id * 1000 + i + 1)
        .collect()
}

pub fn support_vector(am: &AccessMethodForm, natts: u16) -> Vec<u32> {
    (0..natts as u32 * am.support_count as u32)
        .map(|i| am.id * 2000 + i + 1)
        .collect()
}

fn nailed_heap(id: RelId, name: &str, columns: Vec<ColumnForm>, is_shared: bool) -> NailedRelation {
    NailedRelation {
        form: heap_form(id, name, columns.len() as u16, is_shared),
        columns,
        am: None,
        strategy: Vec::new(),
        support: Vec::new(),
    }
}

fn nailed_index(id: RelId, name: &str, columns: Vec<ColumnForm>) -> NailedRelation {
    let am = btree_am();
    let natts = columns.len() as u16;
    let strategy = strategy_vector(&am, natts);
    let support = support_vector(&am, natts);
    NailedRelation {
        form: index_form(id, name, natts),
        columns,
        am: Some(am),
        strategy,
        support,
    }
}

lazy_static! {
    /// Every relation nailed into the descriptor cache: the
    /// catalog heaps first, then the catalog indexes read
    /// back from the init file on later starts.
    pub static ref NAILED_RELATIONS: Vec<NailedRelation> = vec![
        nailed_heap(
            REL_CATALOG_ID,
            REL_CATALOG_NAME,
            vec![
                col(REL_CATALOG_ID, 1, "id", ScalarType::Oid),
                col(REL_CATALOG_ID, 2, "name", ScalarType::String),
                col(REL_CATALOG_ID, 3, "kind", ScalarType::String),
                col(REL_CATALOG_ID, 4, "owner", ScalarType::Oid),
                col(REL_CATALOG_ID, 5, "is_shared", ScalarType::Boolean),
                col(REL_CATALOG_ID, 6, "column_count", ScalarType::Int32),
                col(REL_CATALOG_ID, 7, "storage_manager", ScalarType::Oid),
                col(REL_CATALOG_ID, 8, "has_rules", ScalarType::Boolean),
                col(REL_CATALOG_ID, 9, "has_indexes", ScalarType::Boolean),
                col(REL_CATALOG_ID, 10, "am", ScalarType::Oid),
            ],
            false,
        ),
        nailed_heap(
            COLUMN_CATALOG_ID,
            COLUMN_CATALOG_NAME,
            vec![
                col(COLUMN_CATALOG_ID, 1, "rel_id", ScalarType::Oid),
                col(COLUMN_CATALOG_ID, 2, "name", ScalarType::String),
                col(COLUMN_CATALOG_ID, 3, "column_number", ScalarType::Int32),
                col(COLUMN_CATALOG_ID, 4, "type_id", ScalarType::Oid),
                col(COLUMN_CATALOG_ID, 5, "len", ScalarType::Int32),
                col(COLUMN_CATALOG_ID, 6, "align", ScalarType::Int32),
                col(COLUMN_CATALOG_ID, 7, "by_value", ScalarType::Boolean),
                col(COLUMN_CATALOG_ID, 8, "is_dropped", ScalarType::Boolean),
                col(COLUMN_CATALOG_ID, 9, "type_mod", ScalarType::Int32),
            ],
            false,
        ),
        nailed_heap(
            AM_CATALOG_ID,
            AM_CATALOG_NAME,
            vec![
                col(AM_CATALOG_ID, 1, "id", ScalarType::Oid),
                col(AM_CATALOG_ID, 2, "name", ScalarType::String),
                col(AM_CATALOG_ID, 3, "strategy_count", ScalarType::Int32),
                col(AM_CATALOG_ID, 4, "support_count", ScalarType::Int32),
            ],
            false,
        ),
        nailed_heap(
            RULE_CATALOG_ID,
            RULE_CATALOG_NAME,
            vec![
                col(RULE_CATALOG_ID, 1, "rule_id", ScalarType::Oid),
                col(RULE_CATALOG_ID, 2, "rel_id", ScalarType::Oid),
                col(RULE_CATALOG_ID, 3, "event_type", ScalarType::Int32),
                col(RULE_CATALOG_ID, 4, "attribute_number", ScalarType::Int32),
                col(RULE_CATALOG_ID, 5, "is_instead", ScalarType::Boolean),
                col(RULE_CATALOG_ID, 6, "qual_tree", ScalarType::String),
                col(RULE_CATALOG_ID, 7, "action_tree", ScalarType::String),
            ],
            false,
        ),
        // the outcome log and commit-time relations are not
        // heaps; their forms exist to keep the descriptor
        // cache happy
        nailed_heap(
            LOG_RELATION_ID,
            LOG_RELATION_NAME,
            vec![col(LOG_RELATION_ID, 1, "outcome", ScalarType::Oid)],
            true,
        ),
        nailed_heap(
            TIME_RELATION_ID,
            TIME_RELATION_NAME,
            vec![col(TIME_RELATION_ID, 1, "commit_time", ScalarType::Oid)],
            true,
        ),
        nailed_index(
            REL_ID_INDEX_ID,
            "sys_table_id_index",
            vec![col(REL_ID_INDEX_ID, 1, "id", ScalarType::Oid)],
        ),
        nailed_index(
            REL_NAME_INDEX_ID,
            "sys_table_name_index",
            vec![col(REL_NAME_INDEX_ID, 1, "name", ScalarType::String)],
        ),
        nailed_index(
            COLUMN_NUM_INDEX_ID,
            "sys_column_num_index",
            vec![
                col(COLUMN_NUM_INDEX_ID, 1, "rel_id", ScalarType::Oid),
                col(COLUMN_NUM_INDEX_ID, 2, "column_number", ScalarType::Int32),
            ],
        ),
    ];

    /// The subset of [`NAILED_RELATIONS`] serialized into the
    /// persistent init file: the catalog indexes, which are
    /// the expensive ones to rebuild.
    pub static ref NAILED_INDEX_IDS: Vec<RelId> =
        vec![REL_ID_INDEX_ID, REL_NAME_INDEX_ID, COLUMN_NUM_INDEX_ID];
}

pub fn nailed_count() -> usize {
    NAILED_RELATIONS.len()
}
