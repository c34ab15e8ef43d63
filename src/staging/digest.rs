use crate::staging::operation::{Operation, OperationType, StagedKey};
use crate::staging::StagingError;
use crate::store::{Row, RowKey};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::convert::TryFrom;

/// Collapsed write set of one committed transaction. This is the payload of a redo record.
///
/// Byte representation:
///
/// ```text
/// +-----+---------------+-----------------------------------...-+
/// | Vrs | Count (4 B)   | Entry 0 | Entry 1 | ...                |
/// +-----+---------------+-----------------------------------...-+
///
/// Entry:
/// +------------+-------+----------+-----+----+------------+----+------------+
/// | TLen (4 B) | Table | KLen (4) | Key | Op | OldPresent | .. | NewPresent | ..
/// +------------+-------+----------+-----+----+------------+----+------------+
///
/// Row (follows a present flag of 1):
/// +---------------+------------------------------------------+
/// | Columns (4 B) | per column: Null flag, [Len (4 B), UTF-8] |
/// +---------------+------------------------------------------+
/// ```
///
/// * `Vrs` - version of the serialized payload
/// * `Count` - number of entries, one per staged key
/// * `Op` - 1 insert, 2 update, 3 delete
/// * Integers are big-endian. A null column is the single byte 0, a present column is 1 then the value.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TransactionDigest {
    pub entries: Vec<(StagedKey, Operation)>,
}

const TRANSACTION_DIGEST_FORMAT_VERSION: u8 = 1;

impl TransactionDigest {
    pub fn new(entries: Vec<(StagedKey, Operation)>) -> Self {
        TransactionDigest { entries }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        buf.put_u8(TRANSACTION_DIGEST_FORMAT_VERSION);
        buf.put_u32(self.entries.len() as u32);

        for (key, op) in &self.entries {
            put_str(&mut buf, &key.table);
            put_str(&mut buf, key.key.as_str());
            buf.put_u8(op.op_type.into());
            put_optional_row(&mut buf, op.old_value.as_ref());
            put_optional_row(&mut buf, op.new_value.as_ref());
        }

        buf.freeze()
    }

    pub fn decode(mut bytes: &[u8]) -> Result<Self, StagingError> {
        let version = get_u8(&mut bytes)?;
        if version != TRANSACTION_DIGEST_FORMAT_VERSION {
            return Err(StagingError::CorruptDigest(format!("unknown version {}", version)));
        }

        let count = get_u32(&mut bytes)? as usize;
        let mut entries = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            let table = get_str(&mut bytes)?;
            let key = RowKey::new(get_str(&mut bytes)?);
            let op_type = OperationType::try_from(get_u8(&mut bytes)?)
                .map_err(|b| StagingError::CorruptDigest(format!("unknown operation type {}", b)))?;
            let old_value = get_optional_row(&mut bytes)?;
            let new_value = get_optional_row(&mut bytes)?;

            entries.push((
                StagedKey::new(table, key),
                Operation {
                    op_type,
                    old_value,
                    new_value,
                },
            ));
        }

        if bytes.has_remaining() {
            return Err(StagingError::CorruptDigest(format!(
                "{} trailing bytes",
                bytes.remaining()
            )));
        }

        Ok(TransactionDigest { entries })
    }
}

fn put_str(buf: &mut BytesMut, s: &str) {
    buf.put_u32(s.len() as u32);
    buf.put_slice(s.as_bytes());
}

fn put_optional_row(buf: &mut BytesMut, row: Option<&Row>) {
    match row {
        None => buf.put_u8(0),
        Some(row) => {
            buf.put_u8(1);
            buf.put_u32(row.len() as u32);
            for value in row.values() {
                match value {
                    None => buf.put_u8(0),
                    Some(v) => {
                        buf.put_u8(1);
                        put_str(buf, v);
                    }
                }
            }
        }
    }
}

fn need(bytes: &[u8], n: usize) -> Result<(), StagingError> {
    if bytes.len() < n {
        return Err(StagingError::CorruptDigest("truncated".into()));
    }
    Ok(())
}

fn get_u8(bytes: &mut &[u8]) -> Result<u8, StagingError> {
    need(*bytes, 1)?;
    Ok(bytes.get_u8())
}

fn get_u32(bytes: &mut &[u8]) -> Result<u32, StagingError> {
    need(*bytes, 4)?;
    Ok(bytes.get_u32())
}

fn get_str(bytes: &mut &[u8]) -> Result<String, StagingError> {
    let len = get_u32(bytes)? as usize;
    need(*bytes, len)?;
    let s = std::str::from_utf8(&(*bytes)[..len])
        .map_err(|e| StagingError::CorruptDigest(e.to_string()))?
        .to_string();
    bytes.advance(len);
    Ok(s)
}

fn get_optional_row(bytes: &mut &[u8]) -> Result<Option<Row>, StagingError> {
    match get_u8(bytes)? {
        0 => Ok(None),
        1 => {
            let columns = get_u32(bytes)? as usize;
            let mut values = Vec::with_capacity(columns.min(1024));
            for _ in 0..columns {
                let value = match get_u8(bytes)? {
                    0 => None,
                    1 => Some(get_str(bytes)?),
                    flag => return Err(StagingError::CorruptDigest(format!("bad null flag {}", flag))),
                };
                values.push(value);
            }
            Ok(Some(Row::new(values)))
        }
        flag => Err(StagingError::CorruptDigest(format!("bad row flag {}", flag))),
    }
}
