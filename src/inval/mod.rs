//! Cache invalidation dispatch.
//!
//! Invalidation is two-level. A transaction accumulates messages in its
//! worker's [`LocalInvalidList`]; at commit the list is broadcast onto the
//! process-wide [`SharedInvalQueue`], at abort it is applied to the local
//! caches only and never broadcast, because other workers never saw the
//! rolled back changes. That asymmetry is the reason local and global stay
//! distinct structures.

mod local;
mod queue;

pub use local::LocalInvalidList;
pub use queue::{QueueReader, SharedInvalQueue};

use crate::common::error::{PlatterError, Result};
use crate::common::relation::RelId;
use bytes::{Buf, BufMut};

/// Location of a tuple inside a catalog table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowPointer {
    pub block: u32,
    pub offset: u16,
}

/// A single invalidation. Messages are value types; the
/// local list owns them until flushed, and the queue hands
/// each consumer its own copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidationMessage {
    /// A specific cached catalog row must be discarded.
    CatalogTuple {
        cache_id: u32,
        hash_index: u32,
        item: RowPointer,
    },
    /// A cached relation descriptor (and optionally the
    /// dependent index descriptors named by `object_id`)
    /// must be rebuilt.
    Relation { rel_id: RelId, object_id: RelId },
}

/// Queue records are fixed size so consumers deserialize
/// without allocating.
pub const MSG_WIRE_SIZE: usize = 16;

const KIND_CATALOG_TUPLE: u8 = b'c';
const KIND_RELATION: u8 = b'r';

impl InvalidationMessage {
    pub fn encode(&self) -> [u8; MSG_WIRE_SIZE] {
        let mut raw = [0u8; MSG_WIRE_SIZE];
        let mut buf = &mut raw[..];
        match self {
            InvalidationMessage::CatalogTuple {
                cache_id,
                hash_index,
                item,
            } => {
                buf.put_u8(KIND_CATALOG_TUPLE);
                buf.put_u32_le(*cache_id);
                buf.put_u32_le(*hash_index);
                buf.put_u32_le(item.block);
                buf.put_u16_le(item.offset);
            }
            InvalidationMessage::Relation { rel_id, object_id } => {
                buf.put_u8(KIND_RELATION);
                buf.put_u32_le(*rel_id);
                buf.put_u32_le(*object_id);
            }
        }
        raw
    }

    pub fn decode(raw: &[u8; MSG_WIRE_SIZE]) -> Result<InvalidationMessage> {
        let mut buf = &raw[..];
        let kind = buf.get_u8();
        match kind {
            KIND_CATALOG_TUPLE => Ok(InvalidationMessage::CatalogTuple {
                cache_id: buf.get_u32_le(),
                hash_index: buf.get_u32_le(),
                item: RowPointer {
                    block: buf.get_u32_le(),
                    offset: buf.get_u16_le(),
                },
            }),
            KIND_RELATION => Ok(InvalidationMessage::Relation {
                rel_id: buf.get_u32_le(),
                object_id: buf.get_u32_le(),
            }),
            other => Err(PlatterError::Fatal(format!(
                "unknown invalidation message kind `{}`",
                other as char
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_round_trip() -> Result<()> {
        let messages = [
            InvalidationMessage::CatalogTuple {
                cache_id: 1,
                hash_index: 42,
                item: RowPointer {
                    block: 7,
                    offset: 3,
                },
            },
            InvalidationMessage::Relation {
                rel_id: 42,
                object_id: 0,
            },
        ];
        for msg in messages {
            assert_eq!(InvalidationMessage::decode(&msg.encode())?, msg);
        }
        Ok(())
    }

    #[test]
    fn garbage_kind_is_fatal() {
        let raw = [0xffu8; MSG_WIRE_SIZE];
        assert!(InvalidationMessage::decode(&raw).unwrap_err().is_fatal());
    }
}
