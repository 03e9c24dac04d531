use crate::common::error::{PlatterError, Result};
use crate::common::scalar::Datum;
use bytes::{Buf, BufMut, BytesMut};
use rust_decimal::Decimal;
use std::str::FromStr;

/// A `Row` represents a tuple in memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    values: Vec<Datum>,
}

const TAG_NULL: u8 = 0;
const TAG_BOOLEAN: u8 = 1;
const TAG_INT32: u8 = 2;
const TAG_INT64: u8 = 3;
const TAG_STRING: u8 = 4;
const TAG_DECIMAL: u8 = 5;

impl Row {
    pub fn new(values: Vec<Datum>) -> Self {
        Self { values }
    }

    pub fn value(&self, index: usize) -> Result<&Datum> {
        self.values.get(index).ok_or_else(|| {
            PlatterError::Internal(format!(
                "column index out of range, column index = {:}, column len = {:}",
                index,
                self.values.len()
            ))
        })
    }

    pub fn values(&self) -> &[Datum] {
        &self.values
    }

    pub fn column_count(&self) -> usize {
        self.values.len()
    }

    /// Number of bytes [`Row::encode`] will produce. The
    /// sorter charges this against its memory budget.
    pub fn encoded_len(&self) -> usize {
        let mut len = 2;
        for v in &self.values {
            len += 1;
            len += match v {
                Datum::Null => 0,
                Datum::Boolean(_) => 1,
                Datum::Int32(_) => 4,
                Datum::Int64(_) => 8,
                Datum::String(s) => 4 + s.len(),
                Datum::Decimal(d) => 4 + d.to_string().len(),
            };
        }
        len
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u16_le(self.values.len() as u16);
        for v in &self.values {
            match v {
                Datum::Null => buf.put_u8(TAG_NULL),
                Datum::Boolean(b) => {
                    buf.put_u8(TAG_BOOLEAN);
                    buf.put_u8(*b as u8);
                }
                Datum::Int32(i) => {
                    buf.put_u8(TAG_INT32);
                    buf.put_i32_le(*i);
                }
                Datum::Int64(i) => {
                    buf.put_u8(TAG_INT64);
                    buf.put_i64_le(*i);
                }
                Datum::String(s) => {
                    buf.put_u8(TAG_STRING);
                    buf.put_u32_le(s.len() as u32);
                    buf.put_slice(s.as_bytes());
                }
                Datum::Decimal(d) => {
                    let s = d.to_string();
                    buf.put_u8(TAG_DECIMAL);
                    buf.put_u32_le(s.len() as u32);
                    buf.put_slice(s.as_bytes());
                }
            }
        }
    }

    pub fn decode(buf: &mut impl Buf) -> Result<Row> {
        if buf.remaining() < 2 {
            return Err(truncated());
        }
        let count = buf.get_u16_le() as usize;
        let mut values = Vec::with_capacity(count);
        for _ in 0..count {
            if buf.remaining() < 1 {
                return Err(truncated());
            }
            let tag = buf.get_u8();
            let value = match tag {
                TAG_NULL => Datum::Null,
                TAG_BOOLEAN => {
                    if buf.remaining() < 1 {
                        return Err(truncated());
                    }
                    Datum::Boolean(buf.get_u8() != 0)
                }
                TAG_INT32 => {
                    if buf.remaining() < 4 {
                        return Err(truncated());
                    }
                    Datum::Int32(buf.get_i32_le())
                }
                TAG_INT64 => {
                    if buf.remaining() < 8 {
                        return Err(truncated());
                    }
                    Datum::Int64(buf.get_i64_le())
                }
                TAG_STRING | TAG_DECIMAL => {
                    if buf.remaining() < 4 {
                        return Err(truncated());
                    }
                    let len = buf.get_u32_le() as usize;
                    if buf.remaining() < len {
                        return Err(truncated());
                    }
                    let mut raw = vec![0u8; len];
                    buf.copy_to_slice(&mut raw);
                    let s = String::from_utf8(raw).map_err(|_| {
                        PlatterError::Fatal("tuple record is not valid utf8".to_string())
                    })?;
                    if tag == TAG_STRING {
                        Datum::String(s)
                    } else {
                        Datum::Decimal(Decimal::from_str(&s).map_err(|e| {
                            PlatterError::Fatal(format!("bad decimal in tuple record: {}", e))
                        })?)
                    }
                }
                other => {
                    return Err(PlatterError::Fatal(format!(
                        "unknown datum tag {} in tuple record",
                        other
                    )))
                }
            };
            values.push(value);
        }
        Ok(Row { values })
    }
}

fn truncated() -> PlatterError {
    PlatterError::Fatal("truncated tuple record".to_string())
}
