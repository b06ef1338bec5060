use crate::reference::{FileReference, ObjectReference, Value};
use crate::{DebugError, Result};

// Outbound opcodes.
pub const OP_ADD_WATCH: u8 = 1;
pub const OP_REMOVE_WATCH: u8 = 2;
pub const OP_QUERY_ENGINES: u8 = 3;
pub const OP_QUERY_ROOT_CONTEXTS: u8 = 4;
pub const OP_QUERY_OBJECT: u8 = 5;
pub const OP_QUERY_OBJECT_RECURSIVE: u8 = 6;
pub const OP_QUERY_EXPRESSION: u8 = 7;
pub const OP_SET_BINDING: u8 = 8;
pub const OP_RESET_BINDING: u8 = 9;
pub const OP_SET_METHOD_BODY: u8 = 10;

// Watch kinds carried by `OP_ADD_WATCH`.
pub const WATCH_PROPERTY: u8 = 1;
pub const WATCH_CONTEXT_OBJECT: u8 = 2;
pub const WATCH_EXPRESSION: u8 = 3;
pub const WATCH_OBJECT: u8 = 4;
pub const WATCH_FILE: u8 = 5;

// Inbound message kinds.
pub const MSG_RESULT: u8 = 1;
pub const MSG_VALUE_CHANGED: u8 = 2;
pub const MSG_NEW_OBJECTS: u8 = 3;
pub const MSG_STATUS: u8 = 4;

// Result kinds carried by `MSG_RESULT`.
pub const RESULT_ENGINES: u8 = 1;
pub const RESULT_ROOT_CONTEXT: u8 = 2;
pub const RESULT_OBJECT: u8 = 3;
pub const RESULT_EXPRESSION: u8 = 4;
pub const RESULT_WATCH: u8 = 5;
pub const RESULT_SET_BINDING: u8 = 6;
pub const RESULT_RESET_BINDING: u8 = 7;
pub const RESULT_SET_METHOD_BODY: u8 = 8;

// Value tags.
pub const VALUE_INVALID: u8 = 0;
pub const VALUE_BOOL: u8 = 1;
pub const VALUE_INT: u8 = 2;
pub const VALUE_DOUBLE: u8 = 3;
pub const VALUE_STRING: u8 = 4;
pub const VALUE_LIST: u8 = 5;
pub const VALUE_OBJECT: u8 = 6;

/// Maximum nesting of list values accepted from the wire.
pub const MAX_VALUE_DEPTH: usize = 64;

pub struct DebugWriter {
    buf: Vec<u8>,
}

impl DebugWriter {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.buf
    }

    pub fn write_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn write_bool(&mut self, v: bool) {
        self.buf.push(if v { 1 } else { 0 });
    }

    pub fn write_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn write_i32(&mut self, v: i32) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn write_i64(&mut self, v: i64) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn write_f64(&mut self, v: f64) {
        self.buf.extend_from_slice(&v.to_bits().to_be_bytes());
    }

    pub fn write_string(&mut self, s: &str) {
        self.write_u32(s.len() as u32);
        self.buf.extend_from_slice(s.as_bytes());
    }

    pub fn write_file(&mut self, file: &FileReference) {
        self.write_string(&file.url);
        self.write_i32(file.line);
        self.write_i32(file.column);
    }

    pub fn write_value(&mut self, v: &Value) {
        match v {
            Value::Invalid => self.write_u8(VALUE_INVALID),
            Value::Bool(v) => {
                self.write_u8(VALUE_BOOL);
                self.write_bool(*v);
            }
            Value::Int(v) => {
                self.write_u8(VALUE_INT);
                self.write_i64(*v);
            }
            Value::Double(v) => {
                self.write_u8(VALUE_DOUBLE);
                self.write_f64(*v);
            }
            Value::String(v) => {
                self.write_u8(VALUE_STRING);
                self.write_string(v);
            }
            Value::List(items) => {
                self.write_u8(VALUE_LIST);
                self.write_u32(items.len() as u32);
                for item in items {
                    self.write_value(item);
                }
            }
            Value::Object(obj) => {
                self.write_u8(VALUE_OBJECT);
                self.write_i32(obj.debug_id);
                self.write_string(&obj.class_name);
            }
        }
    }
}

impl Default for DebugWriter {
    fn default() -> Self {
        Self::new()
    }
}

pub struct DebugReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> DebugReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn require(&self, n: usize) -> Result<()> {
        let end = self.pos.checked_add(n).ok_or_else(|| underflow(n, self.pos, self.buf.len()))?;
        if end > self.buf.len() {
            return Err(underflow(n, self.pos, self.buf.len()));
        }
        Ok(())
    }

    fn take<const N: usize>(&mut self) -> Result<[u8; N]> {
        self.require(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(&self.buf[self.pos..self.pos + N]);
        self.pos += N;
        Ok(out)
    }

    pub fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }

    pub fn at_end(&self) -> bool {
        self.remaining() == 0
    }

    /// Fails if any bytes are left after a complete message.
    pub fn finish(&self) -> Result<()> {
        if self.at_end() {
            Ok(())
        } else {
            Err(DebugError::Protocol(format!(
                "{} trailing bytes after message",
                self.remaining()
            )))
        }
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take::<1>()?[0])
    }

    pub fn read_bool(&mut self) -> Result<bool> {
        match self.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(DebugError::Protocol(format!("invalid bool byte {other}"))),
        }
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        Ok(u32::from_be_bytes(self.take()?))
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        Ok(i32::from_be_bytes(self.take()?))
    }

    pub fn read_i64(&mut self) -> Result<i64> {
        Ok(i64::from_be_bytes(self.take()?))
    }

    pub fn read_f64(&mut self) -> Result<f64> {
        Ok(f64::from_bits(u64::from_be_bytes(self.take()?)))
    }

    pub fn read_string(&mut self) -> Result<String> {
        let len = self.read_u32()? as usize;
        self.require(len)?;
        let bytes = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| DebugError::Protocol(format!("invalid utf-8 string: {e}")))
    }

    /// Reads an element count, rejecting counts that cannot fit in the
    /// remaining bytes given each element takes at least `min_element_len`.
    pub fn read_count(&mut self, min_element_len: usize) -> Result<usize> {
        let count = self.read_u32()? as usize;
        let needed = count.saturating_mul(min_element_len.max(1));
        if needed > self.remaining() {
            return Err(DebugError::Protocol(format!(
                "element count {count} exceeds remaining {} bytes",
                self.remaining()
            )));
        }
        Ok(count)
    }

    pub fn read_file(&mut self) -> Result<FileReference> {
        Ok(FileReference {
            url: self.read_string()?,
            line: self.read_i32()?,
            column: self.read_i32()?,
        })
    }

    pub fn read_value(&mut self) -> Result<Value> {
        self.read_value_at(0)
    }

    fn read_value_at(&mut self, depth: usize) -> Result<Value> {
        let tag = self.read_u8()?;
        let v = match tag {
            VALUE_INVALID => Value::Invalid,
            VALUE_BOOL => Value::Bool(self.read_bool()?),
            VALUE_INT => Value::Int(self.read_i64()?),
            VALUE_DOUBLE => Value::Double(self.read_f64()?),
            VALUE_STRING => Value::String(self.read_string()?),
            VALUE_LIST => {
                if depth >= MAX_VALUE_DEPTH {
                    return Err(DebugError::Protocol(format!(
                        "value nesting exceeds {MAX_VALUE_DEPTH} levels"
                    )));
                }
                let count = self.read_count(1)?;
                let mut items = Vec::with_capacity(count);
                for _ in 0..count {
                    items.push(self.read_value_at(depth + 1)?);
                }
                Value::List(items)
            }
            VALUE_OBJECT => {
                let debug_id = self.read_i32()?;
                let class_name = self.read_string()?;
                Value::Object(ObjectReference {
                    class_name,
                    ..ObjectReference::new(debug_id)
                })
            }
            other => {
                return Err(DebugError::Protocol(format!("unknown value tag {other}")));
            }
        };
        Ok(v)
    }
}

fn underflow(n: usize, pos: usize, len: usize) -> DebugError {
    DebugError::Protocol(format!(
        "buffer underflow: need {n} bytes at {pos}, have {len}"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_list_value_survives_the_wire() {
        let value = Value::List(vec![
            Value::Int(-3),
            Value::String("x".to_string()),
            Value::List(vec![Value::Bool(true), Value::Double(0.5)]),
        ]);
        let mut w = DebugWriter::new();
        w.write_value(&value);
        let bytes = w.into_vec();

        let mut r = DebugReader::new(&bytes);
        assert_eq!(r.read_value().unwrap(), value);
        assert!(r.at_end());
    }

    #[test]
    fn object_value_keeps_id_and_class() {
        let mut w = DebugWriter::new();
        w.write_u8(VALUE_OBJECT);
        w.write_i32(12);
        w.write_string("Rectangle");
        let bytes = w.into_vec();

        let value = DebugReader::new(&bytes).read_value().unwrap();
        let obj = value.as_object().unwrap();
        assert_eq!(obj.debug_id(), 12);
        assert_eq!(obj.class_name(), "Rectangle");
    }

    #[test]
    fn truncated_string_is_a_protocol_error() {
        let mut bytes = 10u32.to_be_bytes().to_vec();
        bytes.extend_from_slice(b"abc");

        let err = DebugReader::new(&bytes).read_string().unwrap_err();
        assert!(matches!(err, DebugError::Protocol(msg) if msg.contains("underflow")));
    }

    #[test]
    fn oversized_count_is_rejected_before_allocating() {
        let bytes = u32::MAX.to_be_bytes();
        let err = DebugReader::new(&bytes).read_count(4).unwrap_err();
        assert!(matches!(err, DebugError::Protocol(_)));
    }

    #[test]
    fn deeply_nested_lists_are_rejected() {
        let mut bytes = Vec::new();
        for _ in 0..=MAX_VALUE_DEPTH {
            bytes.push(VALUE_LIST);
            bytes.extend_from_slice(&1u32.to_be_bytes());
        }
        bytes.push(VALUE_INVALID);

        let err = DebugReader::new(&bytes).read_value().unwrap_err();
        assert!(matches!(err, DebugError::Protocol(msg) if msg.contains("nesting")));
    }

    #[test]
    fn unknown_value_tag_is_rejected() {
        let err = DebugReader::new(&[42]).read_value().unwrap_err();
        assert!(matches!(err, DebugError::Protocol(msg) if msg.contains("42")));
    }

    #[test]
    fn finish_reports_trailing_bytes() {
        let r = DebugReader::new(&[1, 2]);
        assert!(r.finish().is_err());
    }
}
