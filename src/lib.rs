mod catalog;
mod common;
mod inval;
mod log_mgr;
mod sort;
mod storage;
mod txn_mgr;

#[cfg(test)]
mod test_util;

pub use common::error::{CatalogError, PlatterError, Result};
pub use common::relation::{ColumnType, RelId, TupleLayout};
pub use common::row::Row;
pub use common::scalar::{Datum, ScalarType};

pub use catalog::relcache::{DescHandle, RelDesc};
pub use catalog::{
    AccessMethodForm, CatalogAccessPolicy, CatalogStore, ColumnForm, MemCatalog, RelKind,
    RelationForm, RuleEvent, RuleForm,
};
pub use inval::{InvalidationMessage, RowPointer, SharedInvalQueue};
pub use log_mgr::{TransactionLog, Xid, XidStatus, DISABLED_XID};
pub use sort::{SortConfig, SortKey, SortedStream, Sorter, TapeStream};
pub use storage::{BufferPool, MemBufferPool};
pub use txn_mgr::{BlockPhase, Cid, Portal, Process, TransPhase, TransactionState, Worker};
