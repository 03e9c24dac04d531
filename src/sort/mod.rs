//! External polyphase merge sort with replacement-selection run
//! generation (Knuth, Vol. III, Alg. 5.4.2D). Used by operators that need
//! ordered output beyond the statement's memory budget; input that fits in
//! memory never touches a tape file.

mod lselect;
mod psort;

use crate::common::error::{PlatterError, Result};
use crate::common::row::Row;
use std::cmp::Ordering;
use std::path::PathBuf;

pub use psort::TapeStream;

/// See Fig. 70, p. 273: more than 7 tapes stops paying.
pub const MAX_TAPES: usize = 7;
pub const MIN_TAPES: usize = 3;

/// One block of sort memory; run generation stops filling
/// the heap once free memory falls below this.
pub const SORT_BLOCK_SIZE: usize = 8192;

/// Default memory budget when the caller does not supply one.
pub const DEFAULT_SORT_MEM: usize = 1 << 18;

/// One ordering key. Keys are applied in order; `commute`
/// reverses the direction of the comparison. A null value
/// aborts the comparison immediately with the null-bearing
/// tuple treated as smaller, unless `nulls_last` flips that.
#[derive(Debug, Clone)]
pub struct SortKey {
    pub column: usize,
    pub commute: bool,
    pub nulls_last: bool,
}

impl SortKey {
    pub fn asc(column: usize) -> SortKey {
        SortKey {
            column,
            commute: false,
            nulls_last: false,
        }
    }

    pub fn desc(column: usize) -> SortKey {
        SortKey {
            column,
            commute: true,
            nulls_last: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SortConfig {
    pub keys: Vec<SortKey>,
    /// Bytes of heap the run-generation phase may hold.
    pub memory_budget: usize,
    /// Tape files to use, between [`MIN_TAPES`] and
    /// [`MAX_TAPES`].
    pub tapes: usize,
    /// Scratch directory for tape files.
    pub scratch_dir: PathBuf,
}

impl SortConfig {
    pub fn new(keys: Vec<SortKey>, scratch_dir: impl Into<PathBuf>) -> SortConfig {
        SortConfig {
            keys,
            memory_budget: DEFAULT_SORT_MEM,
            tapes: MAX_TAPES,
            scratch_dir: scratch_dir.into(),
        }
    }
}

pub(crate) fn compare_rows(a: &Row, b: &Row, keys: &[SortKey]) -> Result<Ordering> {
    for key in keys {
        let av = a.value(key.column)?;
        let bv = b.value(key.column)?;
        match (av.is_null(), bv.is_null()) {
            (true, true) => return Ok(Ordering::Equal),
            (true, false) => {
                return Ok(if key.nulls_last {
                    Ordering::Greater
                } else {
                    Ordering::Less
                })
            }
            (false, true) => {
                return Ok(if key.nulls_last {
                    Ordering::Less
                } else {
                    Ordering::Greater
                })
            }
            (false, false) => {}
        }
        let mut ord = av.try_cmp(bv)?;
        if key.commute {
            ord = ord.reverse();
        }
        if ord != Ordering::Equal {
            return Ok(ord);
        }
    }
    Ok(Ordering::Equal)
}

/// Heap order: ties broken by source tape number so merges
/// are deterministic.
pub(crate) fn row_precedes(
    a: &Row,
    a_tape: usize,
    b: &Row,
    b_tape: usize,
    keys: &[SortKey],
) -> Result<bool> {
    Ok(match compare_rows(a, b, keys)? {
        Ordering::Less => true,
        Ordering::Greater => false,
        Ordering::Equal => a_tape < b_tape,
    })
}

/// Polyphase merge sorter entry point. Consumes itself:
/// a sorter runs one sort.
#[derive(Debug)]
pub struct Sorter {
    cfg: SortConfig,
}

impl Sorter {
    pub fn new(cfg: SortConfig) -> Result<Sorter> {
        if cfg.keys.is_empty() {
            return Err(PlatterError::Sort("no sort keys supplied".to_string()));
        }
        if cfg.tapes < MIN_TAPES || cfg.tapes > MAX_TAPES {
            return Err(PlatterError::Fatal(format!(
                "cannot sort with {} tapes (need {}..={})",
                cfg.tapes, MIN_TAPES, MAX_TAPES
            )));
        }
        if cfg.memory_budget <= SORT_BLOCK_SIZE {
            return Err(PlatterError::Sort(format!(
                "memory budget of {} bytes does not cover one block",
                cfg.memory_budget
            )));
        }
        Ok(Sorter { cfg })
    }

    /// Sort the input stream. The output iterator owns any
    /// tape files; they are unlinked when it is dropped.
    pub fn sort<I>(self, input: I) -> Result<SortedStream>
    where
        I: IntoIterator<Item = Row>,
    {
        psort::run_sort(self.cfg, input.into_iter())
    }
}

/// Ordered output of a sort: either the drained in-memory
/// heap, or a reader over the final tape.
pub enum SortedStream {
    Mem(std::vec::IntoIter<Row>),
    Tape(TapeStream),
}

impl Iterator for SortedStream {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            SortedStream::Mem(rows) => rows.next().map(Ok),
            SortedStream::Tape(stream) => stream.next(),
        }
    }
}
