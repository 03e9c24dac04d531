use crate::common::error::Result;
use crate::inval::{InvalidationMessage, MSG_WIRE_SIZE};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use tracing::warn;

/// Process-wide invalidation ring shared by every worker.
///
/// Messages are stored as fixed-size wire records with a
/// monotonic sequence number. A committing worker publishes
/// its whole batch under one lock acquisition, which gives
/// the required visibility property: once any consumer has
/// observed one message of a transaction, the rest of that
/// transaction's messages are already in the ring ahead of
/// its read position.
///
/// Records are dropped once every registered reader has
/// consumed them.
#[derive(Debug, Default)]
pub struct SharedInvalQueue {
    inner: Mutex<QueueInner>,
}

#[derive(Debug, Default)]
struct QueueInner {
    records: VecDeque<[u8; MSG_WIRE_SIZE]>,
    /// Sequence number of `records[0]`.
    base_seq: u64,
    /// Read position per registered reader.
    readers: HashMap<u64, u64>,
    next_reader: u64,
}

/// Handle identifying one worker's read position.
#[derive(Debug)]
pub struct QueueReader {
    id: u64,
}

impl SharedInvalQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a consumer. A fresh reader starts at the
    /// current tail: it only sees messages published after
    /// registration, matching a worker that starts with cold
    /// caches.
    pub fn register(&self) -> QueueReader {
        let mut inner = self.inner.lock().unwrap();
        let id = inner.next_reader;
        inner.next_reader += 1;
        let tail = inner.base_seq + inner.records.len() as u64;
        inner.readers.insert(id, tail);
        QueueReader { id }
    }

    pub fn unregister(&self, reader: QueueReader) {
        let mut inner = self.inner.lock().unwrap();
        inner.readers.remove(&reader.id);
        inner.collect_garbage();
    }

    /// Append a transaction's messages as one atomic batch.
    pub fn publish(&self, messages: &[InvalidationMessage]) {
        if messages.is_empty() {
            return;
        }
        let mut inner = self.inner.lock().unwrap();
        for msg in messages {
            inner.records.push_back(msg.encode());
        }
    }

    /// Return every message this reader has not yet seen, in
    /// publication order, and advance its position past them.
    /// Bounded wait when empty is the caller's concern; an
    /// empty result just means "caught up".
    pub fn drain(&self, reader: &QueueReader) -> Result<Vec<InvalidationMessage>> {
        let mut inner = self.inner.lock().unwrap();
        let tail = inner.base_seq + inner.records.len() as u64;
        let pos = match inner.readers.get(&reader.id) {
            Some(pos) => *pos,
            None => {
                warn!("drain on an unregistered invalidation reader");
                return Ok(Vec::new());
            }
        };

        let start = (pos - inner.base_seq) as usize;
        let mut out = Vec::with_capacity(inner.records.len() - start);
        for record in inner.records.iter().skip(start) {
            out.push(InvalidationMessage::decode(record)?);
        }
        inner.readers.insert(reader.id, tail);
        inner.collect_garbage();
        Ok(out)
    }

    #[cfg(test)]
    pub(crate) fn depth(&self) -> usize {
        self.inner.lock().unwrap().records.len()
    }
}

impl QueueInner {
    /// Drop records every registered reader has consumed.
    fn collect_garbage(&mut self) {
        let min_pos = self
            .readers
            .values()
            .copied()
            .min()
            .unwrap_or(self.base_seq + self.records.len() as u64);
        while self.base_seq < min_pos && !self.records.is_empty() {
            self.records.pop_front();
            self.base_seq += 1;
        }
    }
}
