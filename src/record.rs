//! Self-contained persisted record layouts for bindings and reports
//!
//! Each record is a fixed header followed by a variable tail; every internal
//! reference in the header is an offset into the tail, never an absolute
//! position. A record is therefore relocatable by plain byte copy: reading
//! it back from any address (or any row of the storage file) yields the same
//! decoded value. Encoders fail when the destination row cannot hold the
//! record; decoders fail on any truncated or inconsistent input.

use crate::device::{Binding, Report, ReportAttribute};
use crate::uri::{Scheme, Uri};
use crate::value::Value;

/// Error produced when encoding or decoding a persisted record
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RecordError {
    #[error("record does not fit the destination row")]
    Oversize,
    #[error("persisted record is malformed")]
    Malformed,
}

/// Fixed part of a persisted binding record, before the tail:
/// id, rid, scheme, port, timestamp, host/path tail offsets, tail length
const BINDING_HEADER: usize = 1 + 1 + 1 + 2 + 8 + 2 + 2 + 2;

/// Value kind discriminants in persisted threshold values
const KIND_BOOL: u8 = 0;
const KIND_INT: u8 = 1;
const KIND_UINT: u8 = 2;
const KIND_TIME: u8 = 3;
const KIND_STRING: u8 = 4;

/// Incremental little-endian writer over a fixed destination row
struct RowWriter<'a> {
    row: &'a mut [u8],
    len: usize,
}

impl<'a> RowWriter<'a> {
    fn new(row: &'a mut [u8]) -> RowWriter<'a> {
        RowWriter { row, len: 0 }
    }

    fn put(&mut self, bytes: &[u8]) -> Result<(), RecordError> {
        let end = self.len + bytes.len();
        if end > self.row.len() {
            return Err(RecordError::Oversize);
        }
        self.row[self.len..end].copy_from_slice(bytes);
        self.len = end;
        Ok(())
    }

    fn put_u8(&mut self, value: u8) -> Result<(), RecordError> {
        self.put(&[value])
    }

    fn put_u16(&mut self, value: u16) -> Result<(), RecordError> {
        self.put(&value.to_le_bytes())
    }

    fn put_u64(&mut self, value: u64) -> Result<(), RecordError> {
        self.put(&value.to_le_bytes())
    }
}

/// Incremental little-endian reader over a persisted row
struct RowReader<'a> {
    row: &'a [u8],
    pos: usize,
}

impl<'a> RowReader<'a> {
    fn new(row: &'a [u8]) -> RowReader<'a> {
        RowReader { row, pos: 0 }
    }

    fn take(&mut self, count: usize) -> Result<&'a [u8], RecordError> {
        let end = self.pos + count;
        let bytes = self.row.get(self.pos..end).ok_or(RecordError::Malformed)?;
        self.pos = end;
        Ok(bytes)
    }

    fn u8(&mut self) -> Result<u8, RecordError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, RecordError> {
        let bytes = self.take(2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    fn u64(&mut self) -> Result<u64, RecordError> {
        let bytes = self.take(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(bytes);
        Ok(u64::from_le_bytes(raw))
    }
}

/// Encodes a binding into a storage row, returning the encoded length.
///
/// Tail layout is the host and path as NUL-terminated strings; the header
/// references both by tail offset so `tail_len` always equals
/// `host.len() + path.len() + 2`.
pub fn encode_binding(binding: &Binding, row: &mut [u8]) -> Result<usize, RecordError> {
    let host = binding.uri.host.as_bytes();
    let path = binding.uri.path.as_bytes();
    let tail_len = host.len() + path.len() + 2;
    if tail_len > u16::MAX as usize {
        return Err(RecordError::Oversize);
    }

    let mut writer = RowWriter::new(row);
    writer.put_u8(binding.id)?;
    writer.put_u8(binding.rid)?;
    writer.put_u8(scheme_code(binding.uri.scheme))?;
    writer.put_u16(binding.uri.port)?;
    writer.put_u64(binding.timestamp)?;
    writer.put_u16(0)?; // host offset in tail
    writer.put_u16(host.len() as u16 + 1)?; // path offset in tail
    writer.put_u16(tail_len as u16)?;
    writer.put(host)?;
    writer.put_u8(0)?;
    writer.put(path)?;
    writer.put_u8(0)?;
    Ok(writer.len)
}

/// Decodes a binding from a storage row
pub fn decode_binding(row: &[u8]) -> Result<Binding, RecordError> {
    let mut reader = RowReader::new(row);
    let id = reader.u8()?;
    let rid = reader.u8()?;
    let scheme = scheme_from_code(reader.u8()?)?;
    let port = reader.u16()?;
    let timestamp = reader.u64()?;
    let host_off = reader.u16()? as usize;
    let path_off = reader.u16()? as usize;
    let tail_len = reader.u16()? as usize;

    let tail = row
        .get(BINDING_HEADER..BINDING_HEADER + tail_len)
        .ok_or(RecordError::Malformed)?;
    let host = tail_str(tail, host_off)?;
    let path = tail_str(tail, path_off)?;
    if host.len() + path.len() + 2 != tail_len {
        return Err(RecordError::Malformed);
    }

    Ok(Binding {
        id,
        rid,
        timestamp,
        uri: Uri::new(scheme, host, port, path),
    })
}

/// Encodes a report configuration into a storage row, returning the
/// encoded length
pub fn encode_report(report: &Report, row: &mut [u8]) -> Result<usize, RecordError> {
    if report.attributes.len() > u8::MAX as usize {
        return Err(RecordError::Oversize);
    }

    let mut writer = RowWriter::new(row);
    writer.put_u8(report.id)?;
    writer.put_u8(report.attributes.len() as u8)?;
    writer.put_u16(report.min_interval)?;
    writer.put_u16(report.max_interval)?;
    for attribute in &report.attributes {
        writer.put_u16(attribute.aid)?;
        let mut mask = 0u8;
        for (bit, value) in threshold_slots(attribute).into_iter().enumerate() {
            if value.is_some() {
                mask |= 1 << bit;
            }
        }
        writer.put_u8(mask)?;
        for value in threshold_slots(attribute).into_iter().flatten() {
            encode_value(value, &mut writer)?;
        }
    }
    Ok(writer.len)
}

/// Decodes a report configuration from a storage row
pub fn decode_report(row: &[u8]) -> Result<Report, RecordError> {
    let mut reader = RowReader::new(row);
    let id = reader.u8()?;
    let count = reader.u8()? as usize;
    let min_interval = reader.u16()?;
    let max_interval = reader.u16()?;

    let mut attributes = Vec::with_capacity(count);
    for _ in 0..count {
        let aid = reader.u16()?;
        let mask = reader.u8()?;
        if mask & !0b111 != 0 {
            return Err(RecordError::Malformed);
        }
        let mut attribute = ReportAttribute {
            aid,
            ..Default::default()
        };
        if mask & 0b001 != 0 {
            attribute.reportable_change = Some(decode_value(&mut reader)?);
        }
        if mask & 0b010 != 0 {
            attribute.low_threshold = Some(decode_value(&mut reader)?);
        }
        if mask & 0b100 != 0 {
            attribute.high_threshold = Some(decode_value(&mut reader)?);
        }
        attributes.push(attribute);
    }

    Ok(Report {
        id,
        min_interval,
        max_interval,
        attributes,
    })
}

/// Threshold values in their persisted order
fn threshold_slots(attribute: &ReportAttribute) -> [Option<&Value>; 3] {
    [
        attribute.reportable_change.as_ref(),
        attribute.low_threshold.as_ref(),
        attribute.high_threshold.as_ref(),
    ]
}

fn encode_value(value: &Value, writer: &mut RowWriter<'_>) -> Result<(), RecordError> {
    match value {
        Value::Bool(value) => {
            writer.put_u8(KIND_BOOL)?;
            writer.put_u8(*value as u8)
        }
        Value::Int(value) => {
            writer.put_u8(KIND_INT)?;
            writer.put(&value.to_le_bytes())
        }
        Value::Uint(value) => {
            writer.put_u8(KIND_UINT)?;
            writer.put_u64(*value)
        }
        Value::Time(value) => {
            writer.put_u8(KIND_TIME)?;
            writer.put_u64(*value)
        }
        Value::String(value) => {
            if value.len() >= u16::MAX as usize {
                return Err(RecordError::Oversize);
            }
            writer.put_u8(KIND_STRING)?;
            writer.put_u16(value.len() as u16)?;
            writer.put(value.as_bytes())?;
            writer.put_u8(0)
        }
    }
}

fn decode_value(reader: &mut RowReader<'_>) -> Result<Value, RecordError> {
    match reader.u8()? {
        KIND_BOOL => match reader.u8()? {
            0 => Ok(Value::Bool(false)),
            1 => Ok(Value::Bool(true)),
            _ => Err(RecordError::Malformed),
        },
        KIND_INT => {
            let bytes = reader.take(8)?;
            let mut raw = [0u8; 8];
            raw.copy_from_slice(bytes);
            Ok(Value::Int(i64::from_le_bytes(raw)))
        }
        KIND_UINT => Ok(Value::Uint(reader.u64()?)),
        KIND_TIME => Ok(Value::Time(reader.u64()?)),
        KIND_STRING => {
            let len = reader.u16()? as usize;
            let bytes = reader.take(len)?;
            let text = std::str::from_utf8(bytes).map_err(|_| RecordError::Malformed)?;
            if reader.u8()? != 0 {
                return Err(RecordError::Malformed);
            }
            Ok(Value::String(text.to_string()))
        }
        _ => Err(RecordError::Malformed),
    }
}

fn scheme_code(scheme: Scheme) -> u8 {
    match scheme {
        Scheme::None => 0,
        Scheme::Coap => 1,
        Scheme::Coaps => 2,
    }
}

fn scheme_from_code(code: u8) -> Result<Scheme, RecordError> {
    match code {
        0 => Ok(Scheme::None),
        1 => Ok(Scheme::Coap),
        2 => Ok(Scheme::Coaps),
        _ => Err(RecordError::Malformed),
    }
}

/// Reads a NUL-terminated string at an offset inside a record tail
fn tail_str(tail: &[u8], offset: usize) -> Result<&str, RecordError> {
    let bytes = tail.get(offset..).ok_or(RecordError::Malformed)?;
    let end = bytes
        .iter()
        .position(|byte| *byte == 0)
        .ok_or(RecordError::Malformed)?;
    std::str::from_utf8(&bytes[..end]).map_err(|_| RecordError::Malformed)
}
