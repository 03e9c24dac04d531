//! Durable per-transaction outcome log.
//!
//! One bit per transaction id (1 = committed), ordered by id, plus a
//! parallel file of commit wall-clock times. Fresh transaction ids are
//! drawn here as well so that the ordering of commit records and the
//! ordering of ids come from the same place.

use crate::common::error::{PlatterError, Result};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Mutex;

/// 32-bit transaction id. Monotonic within a worker's life
/// but wraps globally; wrap handling is out of scope.
pub type Xid = u32;

/// Marks a worker that is not inside a transaction.
pub const DISABLED_XID: Xid = Xid::MAX;

pub const FIRST_XID: Xid = 1;

const STATUS_FILE: &str = "xid_status.log";
const TIME_FILE: &str = "xid_time.log";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XidStatus {
    Committed,
    Aborted,
}

pub struct TransactionLog {
    inner: Mutex<LogInner>,
}

struct LogInner {
    /// Outcome bits indexed by xid.
    bits: Vec<u8>,
    next_xid: Xid,
    status_file: File,
    time_file: File,
}

impl TransactionLog {
    /// Open (or create) the log files in the database
    /// directory and recover the next usable xid from the
    /// status bitmap length.
    pub fn open(database_dir: &Path) -> Result<TransactionLog> {
        let mut status_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(database_dir.join(STATUS_FILE))?;
        let time_file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(database_dir.join(TIME_FILE))?;

        let mut bits = Vec::new();
        status_file.read_to_end(&mut bits)?;
        let next_xid = (bits.len() as Xid)
            .saturating_mul(8)
            .max(FIRST_XID);

        Ok(TransactionLog {
            inner: Mutex::new(LogInner {
                bits,
                next_xid,
                status_file,
                time_file,
            }),
        })
    }

    /// Generate a fresh transaction id. Never returns
    /// [`DISABLED_XID`].
    pub fn next_xid(&self) -> Xid {
        let mut inner = self.inner.lock().unwrap();
        let xid = inner.next_xid;
        inner.next_xid = match inner.next_xid.wrapping_add(1) {
            DISABLED_XID | 0 => FIRST_XID,
            next => next,
        };
        xid
    }

    /// Record the transaction as committed and append its
    /// commit time. The write reaches stable storage before
    /// this returns (suspension point: disk wait).
    pub fn record_commit(&self, xid: Xid) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.set_bit(xid, true)?;
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map_err(|e| PlatterError::Internal(format!("clock error: {}", e)))?
            .as_secs();
        inner.time_file.write_u32::<LittleEndian>(xid)?;
        inner.time_file.write_u64::<LittleEndian>(now)?;
        inner.time_file.flush()?;
        inner.time_file.sync_data()?;
        Ok(())
    }

    /// Record the transaction as aborted. No time entry is
    /// written; only commits have a meaningful time.
    pub fn record_abort(&self, xid: Xid) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.set_bit(xid, false)
    }

    pub fn status(&self, xid: Xid) -> XidStatus {
        let inner = self.inner.lock().unwrap();
        let byte = (xid / 8) as usize;
        let mask = 1u8 << (xid % 8);
        if byte < inner.bits.len() && inner.bits[byte] & mask != 0 {
            XidStatus::Committed
        } else {
            XidStatus::Aborted
        }
    }

    /// Commit time of a committed transaction, seconds since
    /// the epoch. Scans the time file's in-order records.
    pub fn commit_time(&self, xid: Xid) -> Result<Option<u64>> {
        let inner = self.inner.lock().unwrap();
        // the time file is append-only, so read through a
        // fresh cursor without disturbing the writer offset
        let mut time_file = inner.time_file.try_clone()?;
        drop(inner);
        time_file.seek(SeekFrom::Start(0))?;
        loop {
            let entry_xid = match time_file.read_u32::<LittleEndian>() {
                Ok(v) => v,
                Err(ref e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
                Err(e) => return Err(e.into()),
            };
            let secs = time_file.read_u64::<LittleEndian>()?;
            if entry_xid == xid {
                return Ok(Some(secs));
            }
        }
    }
}

impl LogInner {
    fn set_bit(&mut self, xid: Xid, committed: bool) -> Result<()> {
        let byte = (xid / 8) as usize;
        if byte >= self.bits.len() {
            self.bits.resize(byte + 1, 0);
        }
        let mask = 1u8 << (xid % 8);
        if committed {
            self.bits[byte] |= mask;
        } else {
            self.bits[byte] &= !mask;
        }
        self.status_file.seek(SeekFrom::Start(byte as u64))?;
        self.status_file.write_all(&self.bits[byte..byte + 1])?;
        self.status_file.flush()?;
        self.status_file.sync_data()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_bits_round_trip() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let log = TransactionLog::open(dir.path())?;
        let a = log.next_xid();
        let b = log.next_xid();
        assert!(b > a);

        log.record_commit(a)?;
        log.record_abort(b)?;
        assert_eq!(log.status(a), XidStatus::Committed);
        assert_eq!(log.status(b), XidStatus::Aborted);
        assert!(log.commit_time(a)?.is_some());
        assert!(log.commit_time(b)?.is_none());

        // a fresh open over the same directory sees the bits
        // and never re-issues a used xid
        let reopened = TransactionLog::open(dir.path())?;
        assert_eq!(reopened.status(a), XidStatus::Committed);
        assert!(reopened.next_xid() > b);
        Ok(())
    }
}
