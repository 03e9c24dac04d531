//! Top-level transaction system support.
//!
//! The dispatch loop brackets every statement with [`Worker::begin_statement`]
//! and [`Worker::end_statement`]; both are sensitive to the transaction
//! block state and decide between opening a transaction, ticking the
//! command counter, committing, or staying quiet inside an aborted block.
//! BEGIN/END/ABORT statements only move the block phase and leave the real
//! commit or abort work to the next end-statement.
//!
//! Internal failures and user aborts take different exits: an internal
//! failure inside a block parks the worker in the abort phase until END
//! arrives, while a user ABORT moves straight to end-abort so the
//! following end-statement can return to default.

mod locks;
mod portal;

pub use locks::LockTable;
pub use portal::Portal;

use crate::catalog::memory::user_relation;
use crate::catalog::relcache::{DescHandle, RelCache, RelDesc};
use crate::catalog::temprel::TempRelRegistry;
use crate::catalog::{
    CatalogAccessPolicy, CatalogStore, ColumnForm, RelKind, AM_CATALOG_ID,
    COLUMN_CATALOG_ID, REL_CATALOG_ID, RULE_CATALOG_ID,
};
use crate::common::error::{relation_not_found, CatalogError, PlatterError, Result};
use crate::common::relation::{ColumnType, RelId};
use crate::inval::{InvalidationMessage, LocalInvalidList, QueueReader, RowPointer,
    SharedInvalQueue};
use crate::log_mgr::{TransactionLog, Xid, DISABLED_XID};
use crate::storage::BufferPool;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, error, info, warn};

/// 16-bit command counter; ticks once per statement inside a
/// transaction.
pub type Cid = u16;

pub const FIRST_CID: Cid = 0;

/// Phase of the in-flight transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransPhase {
    /// No transaction open.
    Default,
    /// Start routine running.
    Start,
    /// Normal operation.
    InProgress,
    /// Commit routine running.
    Commit,
    /// Abort cleanup running.
    Abort,
    /// Transaction facility suspended (bootstrap-time
    /// initialization).
    Disabled,
}

/// Phase of the user-visible BEGIN...END block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockPhase {
    /// No block open; each statement auto-commits.
    Default,
    /// BEGIN seen, no statement executed inside it yet.
    Begin,
    /// Block open and healthy.
    InProgress,
    /// END seen; the next end-statement commits.
    End,
    /// A statement inside the block failed; everything until
    /// END is ignored.
    Abort,
    /// END seen after a failure; the next end-statement
    /// returns to default.
    EndAbort,
}

/// Exactly one per worker; created at worker start and never
/// destroyed.
#[derive(Debug)]
pub struct TransactionState {
    xid: Xid,
    cid: Cid,
    start_time: u64,
    phase: TransPhase,
    block: BlockPhase,
}

impl TransactionState {
    fn new() -> TransactionState {
        TransactionState {
            xid: 0,
            cid: FIRST_CID,
            start_time: 0,
            phase: TransPhase::Default,
            block: BlockPhase::Default,
        }
    }
}

/// Process-scoped state shared by every worker: the durable
/// transaction log, the invalidation queue, and the catalog
/// store. Outlives all workers.
pub struct Process {
    log: Arc<TransactionLog>,
    queue: Arc<SharedInvalQueue>,
    store: Arc<dyn CatalogStore>,
    database_dir: PathBuf,
}

impl Process {
    pub fn new(database_dir: impl AsRef<Path>, store: Arc<dyn CatalogStore>) -> Result<Process> {
        let database_dir = database_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&database_dir)?;
        Ok(Process {
            log: Arc::new(TransactionLog::open(&database_dir)?),
            queue: Arc::new(SharedInvalQueue::new()),
            store,
            database_dir,
        })
    }

    /// Worker initialization: build the descriptor cache
    /// (nailed set plus the persistent init file) and join
    /// the invalidation queue.
    pub fn start_worker(&self, pool: Arc<dyn BufferPool>) -> Result<Worker> {
        let relcache = RelCache::initialize(&self.database_dir)?;
        let reader = self.queue.register();
        Ok(Worker {
            state: TransactionState::new(),
            relcache,
            temprel: TempRelRegistry::new(),
            local_inval: LocalInvalidList::new(),
            portal: Portal::new(),
            locks: LockTable::default(),
            pool,
            log: self.log.clone(),
            queue: self.queue.clone(),
            reader: Some(reader),
            store: self.store.clone(),
            pending_notifications: Vec::new(),
            delivered_notifications: Vec::new(),
            flush_enabled: true,
            saved_phase: None,
            bootstrap: false,
        })
    }

    pub fn log(&self) -> &TransactionLog {
        &self.log
    }
}

/// One worker session: the transaction state machine and
/// everything it drives. Single-threaded; the shared
/// invalidation queue is its only contact with other
/// workers.
pub struct Worker {
    state: TransactionState,
    relcache: RelCache,
    temprel: TempRelRegistry,
    local_inval: LocalInvalidList,
    portal: Portal,
    locks: LockTable,
    pool: Arc<dyn BufferPool>,
    log: Arc<TransactionLog>,
    queue: Arc<SharedInvalQueue>,
    reader: Option<QueueReader>,
    store: Arc<dyn CatalogStore>,
    pending_notifications: Vec<String>,
    delivered_notifications: Vec<String>,
    flush_enabled: bool,
    saved_phase: Option<TransPhase>,
    bootstrap: bool,
}

/// Route one invalidation to the caches it names.
fn apply_message(cache: &mut RelCache, msg: &InvalidationMessage) {
    match msg {
        InvalidationMessage::CatalogTuple {
            cache_id,
            hash_index,
            ..
        } => match *cache_id {
            REL_CATALOG_ID | COLUMN_CATALOG_ID | RULE_CATALOG_ID => {
                cache.invalidate(*hash_index)
            }
            AM_CATALOG_ID => cache.invalidate_indexes_of_am(*hash_index),
            other => {
                error!(cache_id = other, "invalidation names an unknown catalog");
            }
        },
        InvalidationMessage::Relation { rel_id, object_id } => {
            cache.invalidate(*rel_id);
            if *object_id != 0 && object_id != rel_id {
                cache.invalidate(*object_id);
            }
        }
    }
}

impl Worker {
    // ------------------------------------------------------
    // state accessors
    // ------------------------------------------------------

    pub fn trans_phase(&self) -> TransPhase {
        self.state.phase
    }

    pub fn block_phase(&self) -> BlockPhase {
        self.state.block
    }

    /// True while a query could legitimately be executing.
    pub fn is_transaction_state(&self) -> bool {
        matches!(
            self.state.phase,
            TransPhase::Start | TransPhase::InProgress | TransPhase::Commit | TransPhase::Abort
        )
    }

    pub fn is_aborted_block(&self) -> bool {
        self.state.block == BlockPhase::Abort
    }

    pub fn is_transaction_block(&self) -> bool {
        matches!(
            self.state.block,
            BlockPhase::InProgress | BlockPhase::EndAbort
        )
    }

    pub fn xact_in_progress(&self) -> bool {
        self.state.phase == TransPhase::InProgress
    }

    pub fn current_xid(&self) -> Xid {
        if self.state.phase == TransPhase::Disabled {
            DISABLED_XID
        } else {
            self.state.xid
        }
    }

    pub fn current_cid(&self) -> Cid {
        self.state.cid
    }

    pub fn transaction_start_time(&self) -> u64 {
        self.state.start_time
    }

    /// Suspend (or resume) the transaction facility while
    /// bootstrap code initializes the structures the facility
    /// itself depends on.
    pub fn override_transaction_system(&mut self, disable: bool) {
        if disable {
            if self.state.phase == TransPhase::Disabled {
                return;
            }
            self.saved_phase = Some(self.state.phase);
            self.state.phase = TransPhase::Disabled;
        } else {
            if self.state.phase != TransPhase::Disabled {
                return;
            }
            self.state.phase = self.saved_phase.take().unwrap_or(TransPhase::Default);
        }
    }

    /// With flushing disabled the buffer pool is assumed to
    /// live in stable memory and commit skips both flushes.
    pub fn set_flush_enabled(&mut self, enabled: bool) {
        self.flush_enabled = enabled;
    }

    pub fn set_bootstrap_mode(&mut self, bootstrap: bool) {
        self.bootstrap = bootstrap;
    }

    fn policy(&self) -> CatalogAccessPolicy {
        if self.bootstrap {
            CatalogAccessPolicy::Bootstrap
        } else {
            CatalogAccessPolicy::Indexed
        }
    }

    pub fn portal(&mut self) -> &mut Portal {
        &mut self.portal
    }

    // ------------------------------------------------------
    // statement boundaries
    // ------------------------------------------------------

    /// Idempotent statement-start hook for the dispatch
    /// loop.
    pub fn begin_statement(&mut self) -> Result<()> {
        match self.state.block {
            BlockPhase::Default => self.start_transaction(),

            // should already have advanced at the previous
            // end-statement
            BlockPhase::Begin => {
                warn!("begin-statement: unexpected Begin block phase");
                self.state.block = BlockPhase::InProgress;
                Ok(())
            }

            BlockPhase::InProgress => Ok(()),

            // the previous end-statement missed the commit;
            // catch up and open a fresh transaction
            BlockPhase::End => {
                warn!("begin-statement: unexpected End block phase");
                self.state.block = BlockPhase::Default;
                self.commit_transaction()?;
                self.start_transaction()
            }

            // a command inside the block failed; stay quiet
            // until END shows up
            BlockPhase::Abort => Ok(()),

            BlockPhase::EndAbort => {
                warn!("begin-statement: unexpected EndAbort block phase");
                Ok(())
            }
        }
    }

    /// Statement-end hook: commit, advance the block, or
    /// tick the command counter depending on where we are.
    pub fn end_statement(&mut self) -> Result<()> {
        match self.state.block {
            BlockPhase::Default => self.commit_transaction(),

            BlockPhase::Begin => {
                self.state.block = BlockPhase::InProgress;
                Ok(())
            }

            BlockPhase::InProgress => self.command_counter_increment(),

            BlockPhase::End => {
                self.state.block = BlockPhase::Default;
                self.commit_transaction()
            }

            BlockPhase::Abort => Ok(()),

            BlockPhase::EndAbort => {
                self.state.block = BlockPhase::Default;
                Ok(())
            }
        }
    }

    /// Internal failure path. Inside a block this parks the
    /// worker in the abort phase until END; outside it runs a
    /// full abort and returns to default.
    pub fn abort_current(&mut self) -> Result<()> {
        match self.state.block {
            BlockPhase::Default => self.abort_transaction(),

            BlockPhase::Begin => {
                self.state.block = BlockPhase::Abort;
                self.abort_transaction()
            }

            BlockPhase::InProgress => {
                self.state.block = BlockPhase::Abort;
                self.abort_transaction()
            }

            BlockPhase::End => {
                self.state.block = BlockPhase::Default;
                self.abort_transaction()
            }

            BlockPhase::Abort => Ok(()),

            BlockPhase::EndAbort => {
                self.state.block = BlockPhase::Default;
                Ok(())
            }
        }
    }

    // ------------------------------------------------------
    // user-visible block statements
    // ------------------------------------------------------

    pub fn user_begin_block(&mut self) {
        if self.state.phase == TransPhase::Disabled {
            return;
        }
        if self.state.block != BlockPhase::Default {
            warn!("BEGIN and already in a transaction block");
        }
        self.state.block = BlockPhase::Begin;
    }

    pub fn user_end_block(&mut self) {
        if self.state.phase == TransPhase::Disabled {
            return;
        }
        match self.state.block {
            BlockPhase::InProgress => self.state.block = BlockPhase::End,
            BlockPhase::Abort => self.state.block = BlockPhase::EndAbort,
            _ => {
                warn!("END and not inside a transaction block");
                self.state.block = BlockPhase::EndAbort;
            }
        }
    }

    /// User-issued ABORT. Unlike an internal failure this
    /// swallows further statements cleanly: the block goes to
    /// end-abort, not abort.
    pub fn user_abort_block(&mut self) -> Result<()> {
        if self.state.phase == TransPhase::Disabled {
            return Ok(());
        }
        if self.state.block == BlockPhase::InProgress {
            self.state.block = BlockPhase::Abort;
            self.abort_transaction()?;
            self.state.block = BlockPhase::EndAbort;
            return Ok(());
        }
        warn!("ABORT and not inside a transaction block");
        self.abort_transaction()?;
        self.state.block = BlockPhase::EndAbort;
        Ok(())
    }

    // ------------------------------------------------------
    // start / commit / abort
    // ------------------------------------------------------

    fn start_transaction(&mut self) -> Result<()> {
        // a null statement from the dispatcher while already
        // in progress is tolerated
        if matches!(
            self.state.phase,
            TransPhase::Disabled | TransPhase::InProgress
        ) {
            return Ok(());
        }
        self.state.phase = TransPhase::Start;

        self.state.xid = self.log.next_xid();
        self.state.cid = FIRST_CID;
        self.state.start_time = now_secs()?;

        // apply whatever other workers committed while we
        // were idle
        self.absorb_shared_invalidations()?;
        self.portal.at_start();

        self.state.phase = TransPhase::InProgress;
        debug!(xid = self.state.xid, "transaction started");
        Ok(())
    }

    fn commit_transaction(&mut self) -> Result<()> {
        if self.state.phase == TransPhase::Disabled {
            return Ok(());
        }
        if self.state.phase != TransPhase::InProgress {
            warn!("commit-transaction and not in in-progress state");
        }
        self.state.phase = TransPhase::Commit;

        // temp relations dropped in this transaction lose
        // their files now
        self.reap_dropped_temprels()?;
        self.portal.close_cursors();
        self.record_transaction_commit()?;
        self.relcache.purge_local(true, self.pool.as_ref())?;

        // only now do other workers get to hear about our
        // catalog changes
        let relcache = &mut self.relcache;
        let queue = self.queue.clone();
        self.local_inval
            .flush_commit(&queue, |m| apply_message(relcache, m));

        self.locks.release_all();
        self.portal.at_end();

        self.state.phase = TransPhase::Default;
        debug!(xid = self.state.xid, "transaction committed");
        self.deliver_notifications();
        Ok(())
    }

    fn abort_transaction(&mut self) -> Result<()> {
        if self.state.phase == TransPhase::Disabled {
            return Ok(());
        }
        if self.state.phase != TransPhase::InProgress {
            warn!("abort-transaction and not in in-progress state");
        }
        self.state.phase = TransPhase::Abort;

        self.portal.close_cursors();
        self.log.record_abort(self.state.xid)?;
        // dirty pages are discarded, never written
        self.pool.reset()?;

        self.relcache.purge_local(false, self.pool.as_ref())?;
        self.temprel.at_xact_end(false);

        // the rolled-back changes were never visible
        // elsewhere: apply locally, broadcast nothing
        let relcache = &mut self.relcache;
        self.local_inval
            .flush_abort(|m| apply_message(relcache, m));

        self.locks.release_all();
        self.portal.at_end();

        self.state.phase = TransPhase::Default;
        debug!(xid = self.state.xid, "transaction aborted");
        // notifications that arrived from other workers
        // during the dead transaction are not rolled back
        self.deliver_notifications();
        Ok(())
    }

    /// Data-before-log: every page the transaction dirtied
    /// reaches stable storage before its commit record does.
    fn record_transaction_commit(&mut self) -> Result<()> {
        let xid = self.state.xid;
        let log = self.log.clone();
        if self.flush_enabled {
            self.pool.sync_ordered(&mut || log.record_commit(xid))
        } else {
            log.record_commit(xid)
        }
    }

    /// Tick the command counter and make the effects of the
    /// finished command visible to the next one.
    fn command_counter_increment(&mut self) -> Result<()> {
        let next = self.state.cid.wrapping_add(1);
        if next == FIRST_CID {
            return Err(PlatterError::TooManyCommands);
        }
        self.state.cid = next;

        let relcache = &mut self.relcache;
        self.local_inval
            .make_visible(|m| apply_message(relcache, m));
        self.absorb_shared_invalidations()
    }

    /// Drain the shared queue and apply everything other
    /// workers have committed since we last looked.
    fn absorb_shared_invalidations(&mut self) -> Result<()> {
        let messages = match &self.reader {
            Some(reader) => self.queue.drain(reader)?,
            None => Vec::new(),
        };
        for msg in &messages {
            apply_message(&mut self.relcache, msg);
        }
        Ok(())
    }

    fn reap_dropped_temprels(&mut self) -> Result<()> {
        for (rel_id, _) in self.temprel.deleted_this_xact() {
            self.pool.unlink_relation(rel_id)?;
            match self.store.drop_relation(rel_id) {
                Ok(_) => {}
                Err(PlatterError::Catalog(CatalogError::RelationIdNotFound(_))) => {}
                Err(e) => return Err(e),
            }
        }
        self.temprel.at_xact_end(true);
        Ok(())
    }

    fn deliver_notifications(&mut self) {
        for payload in self.pending_notifications.drain(..) {
            info!(payload = payload.as_str(), "delivering notification");
            self.delivered_notifications.push(payload);
        }
    }

    // ------------------------------------------------------
    // executor-facing surface
    // ------------------------------------------------------

    /// Open a relation by its user-visible name. Temp
    /// relations mask permanent ones here and nowhere else.
    pub fn open_relation(&mut self, name: &str) -> Result<DescHandle> {
        let physical = self
            .temprel
            .resolve(name)
            .map(|e| e.physical_name.clone());
        let target = physical.as_deref().unwrap_or(name);
        let policy = self.policy();
        let handle = self.relcache.open_by_name(
            target,
            self.store.as_ref(),
            policy,
            self.pool.as_ref(),
            &mut self.locks,
        )?;
        if physical.is_some() {
            // reached through the registry: keep the rebuilt
            // descriptor flagged as session-local
            self.relcache.set_temp(handle.rel_id());
        }
        Ok(handle)
    }

    pub fn open_relation_by_id(&mut self, id: RelId) -> Result<DescHandle> {
        let policy = self.policy();
        self.relcache.open_by_id(
            id,
            self.store.as_ref(),
            policy,
            self.pool.as_ref(),
            &mut self.locks,
        )
    }

    pub fn desc(&self, handle: &DescHandle) -> Result<&RelDesc> {
        self.relcache.get(handle)
    }

    pub fn close_relation(&mut self, handle: DescHandle) -> Result<()> {
        self.relcache.close(handle, &mut self.locks)
    }

    /// Process-wide cache reset; nailed descriptors survive.
    pub fn reset_descriptor_cache(&mut self, only_zero_refs: bool) {
        self.relcache.invalidate_all(only_zero_refs);
    }

    pub fn cached_descriptor_count(&self) -> usize {
        self.relcache.cached_count()
    }

    /// Producer side of the invalidation protocol: a catalog
    /// row was modified, so queue messages for the row and
    /// the descriptor built from it.
    pub fn register_catalog_change(
        &mut self,
        catalog_rel: RelId,
        affected: RelId,
        item: RowPointer,
    ) {
        self.local_inval.add(InvalidationMessage::CatalogTuple {
            cache_id: catalog_rel,
            hash_index: affected,
            item,
        });
        self.local_inval.add(InvalidationMessage::Relation {
            rel_id: affected,
            object_id: 0,
        });
    }

    pub fn queue_notification(&mut self, payload: impl Into<String>) {
        self.pending_notifications.push(payload.into());
    }

    pub fn delivered_notifications(&self) -> &[String] {
        &self.delivered_notifications
    }

    // ------------------------------------------------------
    // DDL helpers used by the (external) executor
    // ------------------------------------------------------

    /// Create a relation. A temp relation gets catalog rows
    /// under a unique physical name plus a registry entry
    /// mapping the logical name onto it.
    pub fn create_relation(
        &mut self,
        name: &str,
        columns: &[(String, ColumnType)],
        temp: bool,
    ) -> Result<RelId> {
        if !temp && self.temprel.is_temp_name(name) {
            return Err(PlatterError::Catalog(CatalogError::TempNameInUse(
                name.to_string(),
            )));
        }

        let id = self.store.allocate_rel_id()?;
        let physical = if temp {
            format!("ptmp_{}", id)
        } else {
            name.to_string()
        };
        let (form, cols) = user_relation(id, &physical, RelKind::Heap, columns);
        let item = self.store.create_relation(form, cols)?;

        if temp {
            self.temprel.create(name, &physical, id, RelKind::Heap);
        }

        // materialize the descriptor now and remember that it
        // is ours until commit
        let policy = self.policy();
        let handle = self.relcache.open_by_name(
            &physical,
            self.store.as_ref(),
            policy,
            self.pool.as_ref(),
            &mut self.locks,
        )?;
        self.relcache.mark_local(id, temp);
        self.relcache.close(handle, &mut self.locks)?;

        self.register_catalog_change(REL_CATALOG_ID, id, item);
        Ok(id)
    }

    /// Drop a relation by user-visible name. Dropping a temp
    /// relation only marks its registry entry; the catalog
    /// rows and the file go away at commit, so an abort can
    /// resurrect it.
    pub fn drop_relation(&mut self, name: &str) -> Result<()> {
        if let Some(id) = self.temprel.resolve(name).map(|e| e.rel_id) {
            self.temprel.drop_by_id(id);
            self.relcache.forget(id);
            self.register_catalog_change(REL_CATALOG_ID, id, RowPointer {
                block: 0,
                offset: 0,
            });
            return Ok(());
        }

        let form = self
            .store
            .relation_by_name(name)?
            .ok_or_else(|| relation_not_found(name))?;
        let item = self.store.drop_relation(form.id)?;
        self.relcache.forget(form.id);
        self.pool.unlink_relation(form.id)?;
        self.register_catalog_change(REL_CATALOG_ID, form.id, item);
        Ok(())
    }

    /// Rename a relation. A temp relation rename never
    /// touches the physical relation, just the mapping; a
    /// permanent rename is rejected when the target name is
    /// held by a live temp entry.
    pub fn rename_relation(&mut self, old: &str, new: &str) -> Result<()> {
        if self.temprel.rename(old, new)? {
            return Ok(());
        }

        let form = self
            .store
            .relation_by_name(old)?
            .ok_or_else(|| relation_not_found(old))?;
        let item = self.store.rename_relation(form.id, new)?;
        self.relcache.invalidate(form.id);
        self.register_catalog_change(REL_CATALOG_ID, form.id, item);
        Ok(())
    }

    pub fn alter_add_column(
        &mut self,
        name: &str,
        col_name: &str,
        ty: ColumnType,
    ) -> Result<()> {
        let physical = self
            .temprel
            .resolve(name)
            .map(|e| e.physical_name.clone());
        let target = physical.as_deref().unwrap_or(name);
        let form = self
            .store
            .relation_by_name(target)?
            .ok_or_else(|| relation_not_found(name))?;

        let column = ColumnForm {
            rel_id: form.id,
            name: col_name.to_string(),
            column_number: form.column_count + 1,
            type_id: crate::catalog::type_id_of(ty.scalar_type),
            len: -1,
            align: b'i',
            by_value: false,
            is_dropped: false,
            type_mod: -1,
        };
        let item = self.store.add_column(form.id, column)?;
        self.register_catalog_change(COLUMN_CATALOG_ID, form.id, item);
        Ok(())
    }

    // ------------------------------------------------------
    // shutdown
    // ------------------------------------------------------

    /// Worker shutdown: remove the underlying relations of
    /// every live temp entry (newest first, so indexes go
    /// before their tables), then leave the invalidation
    /// queue.
    pub fn shutdown(mut self) -> Result<()> {
        if !self.temprel.is_empty() {
            self.abort_out_of_any_transaction()?;
            self.begin_statement()?;
            let entries = self.temprel.drain_for_shutdown();
            for entry in entries {
                self.pool.unlink_relation(entry.rel_id)?;
                match self.store.drop_relation(entry.rel_id) {
                    Ok(_) => {}
                    Err(PlatterError::Catalog(CatalogError::RelationIdNotFound(_))) => {}
                    Err(e) => return Err(e),
                }
                self.relcache.forget(entry.rel_id);
                // make each drop visible before the next
                self.command_counter_increment()?;
            }
            self.end_statement()?;
        }
        if let Some(reader) = self.reader.take() {
            self.queue.unregister(reader);
        }
        Ok(())
    }

    fn abort_out_of_any_transaction(&mut self) -> Result<()> {
        if self.is_transaction_state() {
            self.abort_transaction()?;
        }
        self.state.block = BlockPhase::Default;
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn force_cid(&mut self, cid: Cid) {
        self.state.cid = cid;
    }
}

fn now_secs() -> Result<u64> {
    Ok(SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| PlatterError::Internal(format!("clock error: {}", e)))?
        .as_secs())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::bootstrap::nailed_count;
    use crate::common::scalar::ScalarType;
    use crate::log_mgr::XidStatus;
    use crate::test_util::{cluster, int_column, seed_test_table, text_column, TEST_TABLE_NAME};

    #[test]
    fn auto_commit_statement_cycle() -> Result<()> {
        let cluster = cluster();
        let (mut worker, pool) = cluster.worker();

        worker.begin_statement()?;
        assert_eq!(worker.trans_phase(), TransPhase::InProgress);
        assert_eq!(worker.current_cid(), FIRST_CID);
        let xid = worker.current_xid();

        worker.end_statement()?;
        assert_eq!(worker.trans_phase(), TransPhase::Default);
        assert_eq!(cluster.process.log().status(xid), XidStatus::Committed);
        // data pages flush before the log record and again
        // after it
        assert_eq!(pool.flush_count(), 2);
        Ok(())
    }

    #[test]
    fn begin_statement_is_idempotent_in_a_block() -> Result<()> {
        let cluster = cluster();
        let (mut worker, _) = cluster.worker();

        worker.begin_statement()?;
        worker.user_begin_block();
        worker.end_statement()?;
        assert_eq!(worker.block_phase(), BlockPhase::InProgress);
        let xid = worker.current_xid();

        // an empty statement pair is a no-op apart from the
        // command counter
        worker.begin_statement()?;
        worker.end_statement()?;
        assert_eq!(worker.current_xid(), xid);
        assert_eq!(worker.current_cid(), 1);
        assert_eq!(worker.block_phase(), BlockPhase::InProgress);

        worker.user_end_block();
        assert_eq!(worker.block_phase(), BlockPhase::End);
        worker.end_statement()?;
        assert_eq!(worker.block_phase(), BlockPhase::Default);
        assert_eq!(cluster.process.log().status(xid), XidStatus::Committed);
        Ok(())
    }

    #[test]
    fn unexpected_phases_are_forced_sane() -> Result<()> {
        let cluster = cluster();
        let (mut worker, _) = cluster.worker();

        worker.begin_statement()?;
        worker.user_begin_block();
        // the end-statement that should advance Begin never
        // ran; the next begin-statement recovers
        worker.begin_statement()?;
        assert_eq!(worker.block_phase(), BlockPhase::InProgress);

        // two ENDs in a row
        worker.user_end_block();
        worker.user_end_block();
        assert_eq!(worker.block_phase(), BlockPhase::EndAbort);
        worker.end_statement()?;
        assert_eq!(worker.block_phase(), BlockPhase::Default);
        Ok(())
    }

    #[test]
    fn command_id_overflow_fails_the_transaction() -> Result<()> {
        let cluster = cluster();
        let (mut worker, _) = cluster.worker();

        worker.begin_statement()?;
        worker.user_begin_block();
        worker.end_statement()?;

        worker.force_cid(Cid::MAX);
        worker.begin_statement()?;
        let err = worker.end_statement().unwrap_err();
        assert!(matches!(err, PlatterError::TooManyCommands));

        // the dispatcher reacts the way it would to any
        // statement error
        worker.abort_current()?;
        assert_eq!(worker.block_phase(), BlockPhase::Abort);
        worker.user_end_block();
        worker.end_statement()?;
        assert_eq!(worker.block_phase(), BlockPhase::Default);
        Ok(())
    }

    /// BEGIN; ok-stmt; failing-stmt; skipped-stmt; END.
    #[test]
    fn nested_abort_inside_a_block() -> Result<()> {
        let cluster = cluster();
        let (mut worker, pool) = cluster.worker();

        // BEGIN
        worker.begin_statement()?;
        worker.user_begin_block();
        worker.end_statement()?;

        // first statement succeeds
        worker.begin_statement()?;
        let t1 = worker.create_relation("t1", &int_column(), false)?;
        worker.end_statement()?;

        // second statement blows up in the executor
        worker.begin_statement()?;
        worker.abort_current()?;
        assert_eq!(worker.block_phase(), BlockPhase::Abort);
        let xid = worker.current_xid();

        // third statement is silently skipped by the
        // dispatcher
        worker.begin_statement()?;
        assert!(worker.is_aborted_block());
        worker.end_statement()?;

        // END
        worker.user_end_block();
        assert_eq!(worker.block_phase(), BlockPhase::EndAbort);
        worker.end_statement()?;
        assert_eq!(worker.block_phase(), BlockPhase::Default);

        // the first statement's work is gone with the rest:
        // file unlinked, descriptor purged
        assert_eq!(cluster.process.log().status(xid), XidStatus::Aborted);
        assert!(pool.is_unlinked(t1));
        assert_eq!(worker.cached_descriptor_count(), nailed_count());
        Ok(())
    }

    /// A temp relation masks a permanent one for its own
    /// session only.
    #[test]
    fn temp_relation_masks_permanent_per_session() -> Result<()> {
        let cluster = cluster();
        let (mut w1, _) = cluster.worker();
        let (mut w2, _) = cluster.worker();

        seed_test_table(&mut w1)?;

        // session 1: BEGIN; CREATE TEMP test(a text); ...
        w1.begin_statement()?;
        w1.user_begin_block();
        w1.end_statement()?;

        w1.begin_statement()?;
        w1.create_relation(*TEST_TABLE_NAME, &text_column(), true)?;
        w1.end_statement()?;

        let handle = w1.open_relation(*TEST_TABLE_NAME)?;
        assert_eq!(
            w1.desc(&handle)?.layout.column_type(0).scalar_type,
            ScalarType::String
        );
        w1.close_relation(handle)?;

        w1.user_end_block();
        w1.end_statement()?;

        // still masked after commit: the registry is
        // session-lifetime
        w1.begin_statement()?;
        let handle = w1.open_relation(*TEST_TABLE_NAME)?;
        assert!(w1.desc(&handle)?.is_temp);
        w1.close_relation(handle)?;
        w1.end_statement()?;

        // session 2 sees the permanent table
        w2.begin_statement()?;
        let handle = w2.open_relation(*TEST_TABLE_NAME)?;
        assert_eq!(
            w2.desc(&handle)?.layout.column_type(0).scalar_type,
            ScalarType::Int32
        );
        w2.close_relation(handle)?;
        w2.end_statement()?;
        Ok(())
    }

    /// Worker A commits an ALTER; worker B rebuilds its
    /// cached descriptor and sees the new column.
    #[test]
    fn cross_worker_invalidation_rebuilds_descriptor() -> Result<()> {
        let cluster = cluster();
        let (mut wa, _) = cluster.worker();
        let (mut wb, _) = cluster.worker();

        seed_test_table(&mut wa)?;

        // B warms its cache
        wb.begin_statement()?;
        let stale = wb.open_relation(*TEST_TABLE_NAME)?;
        assert_eq!(wb.desc(&stale)?.layout.column_count(), 1);
        wb.close_relation(stale)?;
        wb.end_statement()?;

        // A alters and commits
        wa.begin_statement()?;
        wa.alter_add_column(
            *TEST_TABLE_NAME,
            "c",
            ColumnType::new(ScalarType::Int32, true),
        )?;
        wa.end_statement()?;

        // B's next statement absorbs the invalidation
        wb.begin_statement()?;
        let err = wb.desc(&stale).unwrap_err();
        assert!(matches!(
            err,
            PlatterError::Catalog(CatalogError::StaleDescriptor(_))
        ));
        let fresh = wb.open_relation(*TEST_TABLE_NAME)?;
        let layout = &wb.desc(&fresh)?.layout;
        assert_eq!(layout.column_count(), 2);
        assert_eq!(layout.column_names()[1], "c");
        wb.close_relation(fresh)?;
        wb.end_statement()?;
        Ok(())
    }

    /// Worker A aborts an ALTER; worker B's cache is never
    /// touched.
    #[test]
    fn aborted_changes_are_not_broadcast() -> Result<()> {
        let cluster = cluster();
        let (mut wa, _) = cluster.worker();
        let (mut wb, _) = cluster.worker();

        seed_test_table(&mut wa)?;

        wb.begin_statement()?;
        let cached = wb.open_relation(*TEST_TABLE_NAME)?;
        wb.close_relation(cached)?;
        wb.end_statement()?;

        wa.begin_statement()?;
        wa.user_begin_block();
        wa.end_statement()?;
        wa.begin_statement()?;
        wa.alter_add_column(
            *TEST_TABLE_NAME,
            "c",
            ColumnType::new(ScalarType::Int32, true),
        )?;
        wa.user_abort_block()?;
        assert_eq!(wa.block_phase(), BlockPhase::EndAbort);
        wa.end_statement()?;
        assert_eq!(wa.block_phase(), BlockPhase::Default);

        // B's descriptor survived and still answers
        wb.begin_statement()?;
        assert_eq!(wb.desc(&cached)?.layout.column_count(), 1);
        wb.end_statement()?;
        Ok(())
    }

    /// Effects of command N are visible to command N+1 in the
    /// same transaction.
    #[test]
    fn command_counter_publishes_to_later_commands() -> Result<()> {
        let cluster = cluster();
        let (mut worker, _) = cluster.worker();
        seed_test_table(&mut worker)?;

        worker.begin_statement()?;
        worker.user_begin_block();
        worker.end_statement()?;

        worker.begin_statement()?;
        let before = worker.open_relation(*TEST_TABLE_NAME)?;
        assert_eq!(worker.desc(&before)?.layout.column_count(), 1);
        worker.close_relation(before)?;
        worker.alter_add_column(
            *TEST_TABLE_NAME,
            "c",
            ColumnType::new(ScalarType::Int64, true),
        )?;
        // still the old layout until the command boundary
        worker.end_statement()?;

        worker.begin_statement()?;
        let after = worker.open_relation(*TEST_TABLE_NAME)?;
        assert_eq!(worker.desc(&after)?.layout.column_count(), 2);
        worker.close_relation(after)?;
        worker.end_statement()?;

        worker.user_end_block();
        worker.end_statement()?;
        Ok(())
    }

    #[test]
    fn nailed_descriptors_survive_full_reset() -> Result<()> {
        let cluster = cluster();
        let (mut worker, _) = cluster.worker();
        seed_test_table(&mut worker)?;

        worker.begin_statement()?;
        let handle = worker.open_relation(*TEST_TABLE_NAME)?;
        worker.close_relation(handle)?;
        assert_eq!(worker.cached_descriptor_count(), nailed_count() + 1);

        worker.reset_descriptor_cache(false);
        assert_eq!(worker.cached_descriptor_count(), nailed_count());

        // catalog relations still answer without a rebuild
        let sys = worker.open_relation("sys_table")?;
        assert!(worker.desc(&sys)?.nailed);
        worker.close_relation(sys)?;
        worker.end_statement()?;
        Ok(())
    }

    #[test]
    fn abort_resets_the_buffer_pool_without_flushing() -> Result<()> {
        let cluster = cluster();
        let (mut worker, pool) = cluster.worker();

        worker.begin_statement()?;
        pool.dirty(4);
        worker.abort_current()?;
        assert_eq!(pool.flush_count(), 0);
        assert!(pool.reset_count() >= 1);
        assert_eq!(pool.dirty_pages(), 0);
        Ok(())
    }

    #[test]
    fn notifications_deliver_after_commit_and_abort() -> Result<()> {
        let cluster = cluster();
        let (mut worker, _) = cluster.worker();

        worker.begin_statement()?;
        worker.queue_notification("tick");
        worker.end_statement()?;
        assert_eq!(worker.delivered_notifications(), ["tick"]);

        worker.begin_statement()?;
        worker.queue_notification("tock");
        worker.abort_current()?;
        assert_eq!(worker.delivered_notifications(), ["tick", "tock"]);
        Ok(())
    }

    #[test]
    fn dropped_temp_relation_comes_back_on_abort() -> Result<()> {
        let cluster = cluster();
        let (mut worker, pool) = cluster.worker();

        worker.begin_statement()?;
        let id = worker.create_relation("scratch", &int_column(), true)?;
        worker.end_statement()?;

        // drop, then roll it back
        worker.begin_statement()?;
        worker.user_begin_block();
        worker.end_statement()?;
        worker.begin_statement()?;
        worker.drop_relation("scratch")?;
        worker.user_abort_block()?;
        worker.end_statement()?;

        worker.begin_statement()?;
        let handle = worker.open_relation("scratch")?;
        assert_eq!(handle.rel_id(), id);
        worker.close_relation(handle)?;
        worker.end_statement()?;

        // drop for real this time
        worker.begin_statement()?;
        worker.drop_relation("scratch")?;
        worker.end_statement()?;
        assert!(pool.is_unlinked(id));
        assert!(worker.open_relation("scratch").is_err());
        Ok(())
    }

    #[test]
    fn shutdown_removes_temp_relations_in_reverse_order() -> Result<()> {
        let cluster = cluster();
        let (mut worker, pool) = cluster.worker();

        worker.begin_statement()?;
        let t = worker.create_relation("keep", &int_column(), true)?;
        worker.end_statement()?;

        worker.shutdown()?;
        assert!(pool.is_unlinked(t));
        assert!(cluster.store.relation_by_id(t)?.is_none());
        Ok(())
    }

    #[test]
    fn workers_share_the_persistent_init_image() -> Result<()> {
        let cluster = cluster();
        let (w1, _) = cluster.worker();
        let (w2, _) = cluster.worker();
        assert_eq!(w1.cached_descriptor_count(), nailed_count());
        assert_eq!(w2.cached_descriptor_count(), nailed_count());
        Ok(())
    }

    #[test]
    fn cursors_close_at_transaction_end() -> Result<()> {
        let cluster = cluster();
        let (mut worker, _) = cluster.worker();

        worker.begin_statement()?;
        worker.portal().open_cursor("c1");
        worker.portal().open_cursor("c2");
        assert_eq!(worker.portal().cursor_count(), 2);
        worker.end_statement()?;
        assert_eq!(worker.portal().cursor_count(), 0);
        assert!(!worker.portal().is_active());
        Ok(())
    }

    #[test]
    fn override_suspends_the_transaction_system() -> Result<()> {
        let cluster = cluster();
        let (mut worker, _) = cluster.worker();

        worker.override_transaction_system(true);
        assert_eq!(worker.current_xid(), DISABLED_XID);
        // everything is a no-op while disabled
        worker.begin_statement()?;
        assert_eq!(worker.trans_phase(), TransPhase::Disabled);
        worker.end_statement()?;

        worker.override_transaction_system(false);
        assert_eq!(worker.trans_phase(), TransPhase::Default);
        worker.begin_statement()?;
        assert_eq!(worker.trans_phase(), TransPhase::InProgress);
        worker.end_statement()?;
        Ok(())
    }
}
