use crate::common::error::{PlatterError, Result};
use crate::common::relation::RelId;
use std::collections::HashSet;
use std::sync::Mutex;

/// The storage facade the transaction manager drives at
/// commit and abort boundaries. Page formats and eviction
/// live behind it; the core only needs ordering.
///
/// `flush_all` is a suspension point (disk wait).
pub trait BufferPool {
    /// Write every dirty page to stable storage.
    fn flush_all(&self) -> Result<()>;

    /// Discard dirty pages without writing them. Used on
    /// abort: the pages' contents were never committed.
    fn reset(&self) -> Result<()>;

    /// Number of pages still pinned. Commit checks this
    /// around each flush and resets the pool when the count
    /// is non-zero, so a leaked pin cannot survive into the
    /// next transaction.
    fn check_leak(&self) -> usize;

    /// Make the relation's backing file available for reads.
    /// Descriptor-cache open calls this.
    fn open_relation(&self, rel: RelId) -> Result<()>;

    /// Remove the relation's backing file. Called when an
    /// aborted transaction created the relation, and at
    /// worker shutdown for temp relations.
    fn unlink_relation(&self, rel: RelId) -> Result<()>;

    /// Run `write_log` with the data-before-log ordering
    /// guarantee: all pages dirty before the call are stable
    /// before the log record is, and the log record is stable
    /// when this returns. The default implementation brackets
    /// the log write with two full flushes; a pool with an
    /// ordered write primitive may override it with something
    /// cheaper.
    fn sync_ordered(&self, write_log: &mut dyn FnMut() -> Result<()>) -> Result<()> {
        let leak = self.check_leak();
        self.flush_all()?;
        if leak > 0 {
            self.reset()?;
        }
        write_log()?;
        let leak = self.check_leak();
        self.flush_all()?;
        if leak > 0 {
            self.reset()?;
        }
        Ok(())
    }
}

/// An in-memory pool used by tests. It only tracks the
/// counters the transaction manager observes.
#[derive(Debug, Default)]
pub struct MemBufferPool {
    inner: Mutex<MemPoolInner>,
}

#[derive(Debug, Default)]
struct MemPoolInner {
    dirty_pages: usize,
    leaked_pins: usize,
    flushes: usize,
    resets: usize,
    open: HashSet<RelId>,
    unlinked: HashSet<RelId>,
    fail_flush: bool,
}

impl MemBufferPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dirty(&self, pages: usize) {
        self.inner.lock().unwrap().dirty_pages += pages;
    }

    /// Simulate a page pin that was never released.
    pub fn leak_pin(&self) {
        self.inner.lock().unwrap().leaked_pins += 1;
    }

    pub fn fail_next_flush(&self) {
        self.inner.lock().unwrap().fail_flush = true;
    }

    pub fn flush_count(&self) -> usize {
        self.inner.lock().unwrap().flushes
    }

    pub fn reset_count(&self) -> usize {
        self.inner.lock().unwrap().resets
    }

    pub fn dirty_pages(&self) -> usize {
        self.inner.lock().unwrap().dirty_pages
    }

    pub fn is_open(&self, rel: RelId) -> bool {
        self.inner.lock().unwrap().open.contains(&rel)
    }

    pub fn is_unlinked(&self, rel: RelId) -> bool {
        self.inner.lock().unwrap().unlinked.contains(&rel)
    }
}

impl BufferPool for MemBufferPool {
    fn flush_all(&self) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.fail_flush {
            inner.fail_flush = false;
            return Err(PlatterError::Storage(
                "buffer pool flush failed".to_string(),
            ));
        }
        inner.dirty_pages = 0;
        inner.flushes += 1;
        Ok(())
    }

    fn reset(&self) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.dirty_pages = 0;
        inner.leaked_pins = 0;
        inner.resets += 1;
        Ok(())
    }

    fn check_leak(&self) -> usize {
        self.inner.lock().unwrap().leaked_pins
    }

    fn open_relation(&self, rel: RelId) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.unlinked.contains(&rel) {
            return Err(PlatterError::Storage(format!(
                "relation {} has been unlinked",
                rel
            )));
        }
        inner.open.insert(rel);
        Ok(())
    }

    fn unlink_relation(&self, rel: RelId) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.open.remove(&rel);
        inner.unlinked.insert(rel);
        Ok(())
    }
}
