use crate::inval::{InvalidationMessage, SharedInvalQueue};

/// Per-worker list of invalidations produced by the running
/// transaction. Append-only; order is preserved but carries
/// no meaning, and duplicates are harmless.
///
/// The `applied` watermark tracks how much of the list has
/// already been applied to this worker's own caches at
/// command boundaries, so that commit can still broadcast
/// the whole list.
#[derive(Debug, Default)]
pub struct LocalInvalidList {
    messages: Vec<InvalidationMessage>,
    applied: usize,
}

impl LocalInvalidList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, msg: InvalidationMessage) {
        self.messages.push(msg);
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Apply the not-yet-applied suffix to this worker's own
    /// caches. Called when the command counter ticks so that
    /// later commands in the same transaction see the
    /// catalog changes of earlier ones.
    pub fn make_visible(&mut self, mut apply: impl FnMut(&InvalidationMessage)) {
        for msg in &self.messages[self.applied..] {
            apply(msg);
        }
        self.applied = self.messages.len();
    }

    /// Commit: broadcast everything onto the shared queue
    /// (as one atomic batch), finish local application, and
    /// reset for the next transaction.
    pub fn flush_commit(
        &mut self,
        queue: &SharedInvalQueue,
        mut apply: impl FnMut(&InvalidationMessage),
    ) {
        for msg in &self.messages[self.applied..] {
            apply(msg);
        }
        queue.publish(&self.messages);
        self.messages.clear();
        self.applied = 0;
    }

    /// Abort: the changes were rolled back, so apply every
    /// message locally and broadcast nothing.
    pub fn flush_abort(&mut self, mut apply: impl FnMut(&InvalidationMessage)) {
        for msg in &self.messages {
            apply(msg);
        }
        self.messages.clear();
        self.applied = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inval::RowPointer;

    fn rel_msg(rel_id: u32) -> InvalidationMessage {
        InvalidationMessage::Relation {
            rel_id,
            object_id: 0,
        }
    }

    #[test]
    fn visibility_watermark_does_not_reapply() {
        let mut list = LocalInvalidList::new();
        list.add(rel_msg(1));
        list.add(rel_msg(2));

        let mut seen = Vec::new();
        list.make_visible(|m| seen.push(*m));
        assert_eq!(seen.len(), 2);

        list.add(rel_msg(3));
        list.make_visible(|m| seen.push(*m));
        assert_eq!(seen.len(), 3);
        assert_eq!(seen[2], rel_msg(3));
    }

    #[test]
    fn abort_applies_locally_without_broadcast() {
        let queue = SharedInvalQueue::new();
        let reader = queue.register();

        let mut list = LocalInvalidList::new();
        list.add(InvalidationMessage::CatalogTuple {
            cache_id: 1,
            hash_index: 9,
            item: RowPointer { block: 0, offset: 1 },
        });
        let mut applied = 0;
        list.flush_abort(|_| applied += 1);
        assert_eq!(applied, 1);
        assert!(list.is_empty());
        assert!(queue.drain(&reader).unwrap().is_empty());
    }
}
