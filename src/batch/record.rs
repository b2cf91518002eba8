//! Wire format for batch records.
//!
//! A batch buffer is a sequence of records, each starting with a one-byte
//! tag. Column-family-qualified tags carry the column family id right after
//! the tag; the unqualified forms target the default column family. Keys,
//! values, blobs, and transaction ids are length-prefixed byte strings.
//!
//! Decoding is stateless: `decode_record_at` reads exactly one record at a
//! byte offset and returns slices aliasing the buffer.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{Error, Result};
use crate::{errcorruption, errinput};

// Record tags targeting the default column family.
const VALUE: u8 = 0x01;
const DELETION: u8 = 0x02;
const SINGLE_DELETION: u8 = 0x03;
const RANGE_DELETION: u8 = 0x04;
const MERGE: u8 = 0x05;
const LOG_DATA: u8 = 0x06;
const NOOP: u8 = 0x07;

// Column-family-qualified variants.
const CF_VALUE: u8 = 0x11;
const CF_DELETION: u8 = 0x12;
const CF_SINGLE_DELETION: u8 = 0x13;
const CF_RANGE_DELETION: u8 = 0x14;
const CF_MERGE: u8 = 0x15;

// Transaction markers.
const BEGIN_PREPARE_XID: u8 = 0x21;
const BEGIN_PERSISTED_PREPARE_XID: u8 = 0x22;
const BEGIN_UNPREPARE_XID: u8 = 0x23;
const END_PREPARE_XID: u8 = 0x24;
const COMMIT_XID: u8 = 0x25;
const ROLLBACK_XID: u8 = 0x26;

/// The default column family id.
pub const DEFAULT_COLUMN_FAMILY: u32 = 0;

/// The kind of a decoded record. Several tags map onto one kind: each
/// column-family-qualified tag shares a kind with its unqualified form, and
/// all transaction markers decode as `XidMarker`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Put,
    Delete,
    SingleDelete,
    DeleteRange,
    Merge,
    LogData,
    XidMarker,
}

/// A record decoded at a byte offset. All slices alias the batch buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Record<'a> {
    pub kind: RecordKind,
    pub column_family: u32,
    /// Key for mutations; the range start for `DeleteRange`.
    pub key: &'a [u8],
    /// Value for `Put` and `Merge`; the range end for `DeleteRange`.
    pub value: &'a [u8],
    /// Opaque payload of `LogData` records.
    pub blob: &'a [u8],
    /// Transaction id carried by `XidMarker` records.
    pub xid: &'a [u8],
    /// Absolute buffer offset where the key slice starts.
    pub key_offset: usize,
    /// Total encoded length of the record.
    pub encoded_len: usize,
}

fn write_tag(buf: &mut Vec<u8>, plain: u8, qualified: u8, column_family: u32) {
    if column_family == DEFAULT_COLUMN_FAMILY {
        buf.write_u8(plain).unwrap();
    } else {
        buf.write_u8(qualified).unwrap();
        buf.write_u32::<BigEndian>(column_family).unwrap();
    }
}

fn write_slice(buf: &mut Vec<u8>, data: &[u8]) {
    buf.write_u32::<BigEndian>(data.len() as u32).unwrap();
    buf.extend_from_slice(data);
}

pub fn append_put(buf: &mut Vec<u8>, column_family: u32, key: &[u8], value: &[u8]) {
    write_tag(buf, VALUE, CF_VALUE, column_family);
    write_slice(buf, key);
    write_slice(buf, value);
}

pub fn append_delete(buf: &mut Vec<u8>, column_family: u32, key: &[u8]) {
    write_tag(buf, DELETION, CF_DELETION, column_family);
    write_slice(buf, key);
}

pub fn append_single_delete(buf: &mut Vec<u8>, column_family: u32, key: &[u8]) {
    write_tag(buf, SINGLE_DELETION, CF_SINGLE_DELETION, column_family);
    write_slice(buf, key);
}

pub fn append_delete_range(buf: &mut Vec<u8>, column_family: u32, begin: &[u8], end: &[u8]) {
    write_tag(buf, RANGE_DELETION, CF_RANGE_DELETION, column_family);
    write_slice(buf, begin);
    write_slice(buf, end);
}

pub fn append_merge(buf: &mut Vec<u8>, column_family: u32, key: &[u8], operand: &[u8]) {
    write_tag(buf, MERGE, CF_MERGE, column_family);
    write_slice(buf, key);
    write_slice(buf, operand);
}

pub fn append_log_data(buf: &mut Vec<u8>, blob: &[u8]) {
    buf.write_u8(LOG_DATA).unwrap();
    write_slice(buf, blob);
}

pub fn append_noop(buf: &mut Vec<u8>) {
    buf.write_u8(NOOP).unwrap();
}

pub fn append_begin_prepare(buf: &mut Vec<u8>) {
    buf.write_u8(BEGIN_PREPARE_XID).unwrap();
}

pub fn append_end_prepare(buf: &mut Vec<u8>, xid: &[u8]) {
    buf.write_u8(END_PREPARE_XID).unwrap();
    write_slice(buf, xid);
}

pub fn append_commit(buf: &mut Vec<u8>, xid: &[u8]) {
    buf.write_u8(COMMIT_XID).unwrap();
    write_slice(buf, xid);
}

pub fn append_rollback(buf: &mut Vec<u8>, xid: &[u8]) {
    buf.write_u8(ROLLBACK_XID).unwrap();
    write_slice(buf, xid);
}

fn read_u32_at(buf: &[u8], pos: usize) -> Result<u32> {
    (&buf[pos..])
        .read_u32::<BigEndian>()
        .map_err(|_| Error::Corruption(format!("truncated record at offset {pos}")))
}

fn read_slice_at(buf: &[u8], pos: usize) -> Result<(&[u8], usize)> {
    let len = read_u32_at(buf, pos)? as usize;
    let start = pos + 4;
    if start + len > buf.len() {
        return errcorruption!("truncated record at offset {pos}");
    }
    Ok((&buf[start..start + len], start + len))
}

/// Decodes the record starting at `offset`.
///
/// `offset == buf.len()` means the end of the batch was reached and returns
/// `Error::NotFound`; an offset beyond the buffer is an invalid argument; an
/// unknown tag is a corruption carrying the tag byte.
pub fn decode_record_at(buf: &[u8], offset: usize) -> Result<Record<'_>> {
    if offset == buf.len() {
        return Err(Error::NotFound);
    }
    if offset > buf.len() {
        return errinput!("record offset {offset} exceeds batch size {}", buf.len());
    }

    let tag = buf[offset];
    let mut pos = offset + 1;

    let mut column_family = DEFAULT_COLUMN_FAMILY;
    if matches!(
        tag,
        CF_VALUE | CF_DELETION | CF_SINGLE_DELETION | CF_RANGE_DELETION | CF_MERGE
    ) {
        column_family = read_u32_at(buf, pos)?;
        pos += 4;
    }

    let mut record = Record {
        kind: RecordKind::XidMarker,
        column_family,
        key: &[],
        value: &[],
        blob: &[],
        xid: &[],
        key_offset: 0,
        encoded_len: 0,
    };

    match tag {
        VALUE | CF_VALUE | MERGE | CF_MERGE => {
            record.kind = if tag == VALUE || tag == CF_VALUE {
                RecordKind::Put
            } else {
                RecordKind::Merge
            };
            record.key_offset = pos + 4;
            let (key, next) = read_slice_at(buf, pos)?;
            let (value, next) = read_slice_at(buf, next)?;
            record.key = key;
            record.value = value;
            pos = next;
        }
        DELETION | CF_DELETION | SINGLE_DELETION | CF_SINGLE_DELETION => {
            record.kind = if tag == DELETION || tag == CF_DELETION {
                RecordKind::Delete
            } else {
                RecordKind::SingleDelete
            };
            record.key_offset = pos + 4;
            let (key, next) = read_slice_at(buf, pos)?;
            record.key = key;
            pos = next;
        }
        RANGE_DELETION | CF_RANGE_DELETION => {
            record.kind = RecordKind::DeleteRange;
            record.key_offset = pos + 4;
            let (begin, next) = read_slice_at(buf, pos)?;
            let (end, next) = read_slice_at(buf, next)?;
            record.key = begin;
            record.value = end;
            pos = next;
        }
        LOG_DATA => {
            record.kind = RecordKind::LogData;
            let (blob, next) = read_slice_at(buf, pos)?;
            record.blob = blob;
            pos = next;
        }
        NOOP | BEGIN_PREPARE_XID | BEGIN_PERSISTED_PREPARE_XID | BEGIN_UNPREPARE_XID => {
            record.kind = RecordKind::XidMarker;
        }
        END_PREPARE_XID | COMMIT_XID | ROLLBACK_XID => {
            record.kind = RecordKind::XidMarker;
            let (xid, next) = read_slice_at(buf, pos)?;
            record.xid = xid;
            pos = next;
        }
        unknown => {
            return errcorruption!("unknown record tag {unknown:#04x} at offset {offset}");
        }
    }

    record.encoded_len = pos - offset;
    Ok(record)
}
