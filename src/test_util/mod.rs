use crate::catalog::MemCatalog;
use crate::common::error::Result;
use crate::common::relation::{ColumnType, RelId};
use crate::common::scalar::ScalarType;
use crate::storage::MemBufferPool;
use crate::txn_mgr::{Process, Worker};
use lazy_static::lazy_static;
use std::sync::Arc;

lazy_static! {
    pub static ref TEST_TABLE_NAME: &'static str = "test";
}

pub fn init_logging() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// A process, its shared catalog store, and the database
/// directory, wired the way a real deployment would be.
pub struct TestCluster {
    pub process: Process,
    pub store: Arc<MemCatalog>,
    _dir: tempfile::TempDir,
}

pub fn cluster() -> TestCluster {
    init_logging();
    let dir = tempfile::tempdir().expect("scratch dir");
    let store = Arc::new(MemCatalog::new());
    let process = Process::new(dir.path(), store.clone()).expect("process init");
    TestCluster {
        process,
        store,
        _dir: dir,
    }
}

impl TestCluster {
    /// A worker plus a handle onto its buffer pool so tests
    /// can watch flush/reset/unlink traffic.
    pub fn worker(&self) -> (Worker, Arc<MemBufferPool>) {
        let pool = Arc::new(MemBufferPool::new());
        let worker = self.process.start_worker(pool.clone()).expect("worker init");
        (worker, pool)
    }
}

pub fn int_column() -> Vec<(String, ColumnType)> {
    vec![("a".to_string(), ColumnType::new(ScalarType::Int32, false))]
}

pub fn text_column() -> Vec<(String, ColumnType)> {
    vec![("a".to_string(), ColumnType::new(ScalarType::String, true))]
}

/// Seed the standard permanent `test` table through a normal
/// auto-commit statement.
pub fn seed_test_table(worker: &mut Worker) -> Result<RelId> {
    worker.begin_statement()?;
    let id = worker.create_relation(*TEST_TABLE_NAME, &int_column(), false)?;
    worker.end_statement()?;
    Ok(id)
}
