//! Tagged binary encoding of property values.
//!
//! Every value is written as a one-byte [`ValueType`] tag followed by its
//! payload. Integers and floats are little-endian, strings and arrays carry a
//! `u32` element count, characters are written as `u32` scalar values and
//! nested lists/object arrays tag every element.

use std::convert::TryInto;

use crate::error::{GraphError, Result};
use crate::model::{NodeId, PropertyConverter, Value, ValueType};
use crate::node::NodeRef;
use crate::storage::interner::StringInterner;

/// Resolves node ids found in records to their live handles.
pub trait NodeResolver {
    fn resolve(&self, id: NodeId) -> Result<NodeRef>;

    /// Resolves a node held as a property value. `None` means the node was
    /// removed and the value reads as null.
    fn resolve_value(&self, id: NodeId) -> Result<Option<NodeRef>> {
        self.resolve(id).map(Some)
    }
}

/// Collaborators needed to turn bytes back into values.
pub struct DecodeContext<'a> {
    pub interner: &'a StringInterner,
    pub resolver: &'a dyn NodeResolver,
}

/// Appends the tagged encoding of `value`. Custom values are passed through
/// `converter` first; anything still unsupported fails.
pub fn encode_value(
    buf: &mut Vec<u8>,
    value: &Value,
    converter: Option<&PropertyConverter>,
) -> Result<()> {
    match value {
        Value::Custom(custom) => {
            let unsupported = || GraphError::UnsupportedValue {
                type_name: custom.type_name().to_owned(),
                converter_registered: converter.is_some(),
            };
            let convert = converter.ok_or_else(unsupported)?;
            let converted = convert(custom);
            if matches!(converted, Value::Custom(_)) {
                return Err(unsupported());
            }
            encode_value(buf, &converted, converter)
        }
        Value::Null => {
            buf.push(ValueType::Unknown.id());
            Ok(())
        }
        Value::Bool(v) => {
            buf.push(ValueType::Boolean.id());
            buf.push(u8::from(*v));
            Ok(())
        }
        Value::String(s) => {
            buf.push(ValueType::String.id());
            write_string(buf, s)
        }
        Value::Byte(v) => {
            buf.push(ValueType::Byte.id());
            buf.extend_from_slice(&v.to_le_bytes());
            Ok(())
        }
        Value::Short(v) => {
            buf.push(ValueType::Short.id());
            buf.extend_from_slice(&v.to_le_bytes());
            Ok(())
        }
        Value::Int(v) => {
            buf.push(ValueType::Integer.id());
            buf.extend_from_slice(&v.to_le_bytes());
            Ok(())
        }
        Value::Long(v) => {
            buf.push(ValueType::Long.id());
            buf.extend_from_slice(&v.to_le_bytes());
            Ok(())
        }
        Value::Float(v) => {
            buf.push(ValueType::Float.id());
            buf.extend_from_slice(&v.to_le_bytes());
            Ok(())
        }
        Value::Double(v) => {
            buf.push(ValueType::Double.id());
            buf.extend_from_slice(&v.to_le_bytes());
            Ok(())
        }
        Value::Char(c) => {
            buf.push(ValueType::Character.id());
            buf.extend_from_slice(&u32::from(*c).to_le_bytes());
            Ok(())
        }
        Value::Node(node) => {
            buf.push(ValueType::NodeRef.id());
            buf.extend_from_slice(&node.id().to_le_bytes());
            Ok(())
        }
        Value::List(items) => {
            buf.push(ValueType::List.id());
            write_len(buf, items.len())?;
            for item in items {
                encode_value(buf, item, converter)?;
            }
            Ok(())
        }
        Value::ObjectArray(items) => {
            buf.push(ValueType::ArrayObject.id());
            write_len(buf, items.len())?;
            for item in items {
                encode_value(buf, item, converter)?;
            }
            Ok(())
        }
        Value::ByteArray(items) => {
            buf.push(ValueType::ArrayByte.id());
            write_len(buf, items.len())?;
            buf.extend(items.iter().map(|v| *v as u8));
            Ok(())
        }
        Value::ShortArray(items) => {
            buf.push(ValueType::ArrayShort.id());
            write_len(buf, items.len())?;
            for v in items {
                buf.extend_from_slice(&v.to_le_bytes());
            }
            Ok(())
        }
        Value::IntArray(items) => {
            buf.push(ValueType::ArrayInt.id());
            write_len(buf, items.len())?;
            for v in items {
                buf.extend_from_slice(&v.to_le_bytes());
            }
            Ok(())
        }
        Value::LongArray(items) => {
            buf.push(ValueType::ArrayLong.id());
            write_len(buf, items.len())?;
            for v in items {
                buf.extend_from_slice(&v.to_le_bytes());
            }
            Ok(())
        }
        Value::FloatArray(items) => {
            buf.push(ValueType::ArrayFloat.id());
            write_len(buf, items.len())?;
            for v in items {
                buf.extend_from_slice(&v.to_le_bytes());
            }
            Ok(())
        }
        Value::DoubleArray(items) => {
            buf.push(ValueType::ArrayDouble.id());
            write_len(buf, items.len())?;
            for v in items {
                buf.extend_from_slice(&v.to_le_bytes());
            }
            Ok(())
        }
        Value::CharArray(items) => {
            buf.push(ValueType::ArrayChar.id());
            write_len(buf, items.len())?;
            for c in items {
                buf.extend_from_slice(&u32::from(*c).to_le_bytes());
            }
            Ok(())
        }
        Value::BoolArray(items) => {
            buf.push(ValueType::ArrayBool.id());
            write_len(buf, items.len())?;
            buf.extend(items.iter().map(|b| u8::from(*b)));
            Ok(())
        }
    }
}

/// Reads one tagged value.
pub fn decode_value(cursor: &mut Cursor<'_>, ctx: &DecodeContext<'_>) -> Result<Value> {
    let tag = cursor.read_u8()?;
    let value_type = ValueType::lookup(tag)
        .ok_or_else(|| GraphError::corruption(format!("unknown value type tag: {tag}")))?;
    let value = match value_type {
        ValueType::Unknown => Value::Null,
        ValueType::Boolean => Value::Bool(cursor.read_bool()?),
        ValueType::String => Value::String(ctx.interner.intern(cursor.read_str()?)),
        ValueType::Byte => Value::Byte(cursor.read_i8()?),
        ValueType::Short => Value::Short(cursor.read_i16()?),
        ValueType::Integer => Value::Int(cursor.read_i32()?),
        ValueType::Long => Value::Long(cursor.read_i64()?),
        ValueType::Float => Value::Float(cursor.read_f32()?),
        ValueType::Double => Value::Double(cursor.read_f64()?),
        ValueType::Character => Value::Char(cursor.read_char()?),
        ValueType::NodeRef => match ctx.resolver.resolve_value(cursor.read_i64()?)? {
            Some(node) => Value::Node(node),
            None => Value::Null,
        },
        ValueType::List => Value::List(read_values(cursor, ctx)?),
        ValueType::ArrayObject => Value::ObjectArray(read_values(cursor, ctx)?),
        ValueType::ArrayByte => Value::ByteArray(cursor.read_array(Cursor::read_i8)?),
        ValueType::ArrayShort => Value::ShortArray(cursor.read_array(Cursor::read_i16)?),
        ValueType::ArrayInt => Value::IntArray(cursor.read_array(Cursor::read_i32)?),
        ValueType::ArrayLong => Value::LongArray(cursor.read_array(Cursor::read_i64)?),
        ValueType::ArrayFloat => Value::FloatArray(cursor.read_array(Cursor::read_f32)?),
        ValueType::ArrayDouble => Value::DoubleArray(cursor.read_array(Cursor::read_f64)?),
        ValueType::ArrayChar => Value::CharArray(cursor.read_array(Cursor::read_char)?),
        ValueType::ArrayBool => Value::BoolArray(cursor.read_array(Cursor::read_bool)?),
    };
    Ok(value)
}

fn read_values(cursor: &mut Cursor<'_>, ctx: &DecodeContext<'_>) -> Result<Vec<Value>> {
    let len = cursor.read_len()?;
    let mut items = Vec::with_capacity(len.min(cursor.remaining()));
    for _ in 0..len {
        items.push(decode_value(cursor, ctx)?);
    }
    Ok(items)
}

/// Standalone encoding of `value`, used as the key of index entries.
pub fn value_bytes(value: &Value, converter: Option<&PropertyConverter>) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    encode_value(&mut buf, value, converter)?;
    Ok(buf)
}

/// Decodes a buffer holding exactly one value.
pub fn value_from_bytes(bytes: &[u8], ctx: &DecodeContext<'_>) -> Result<Value> {
    let mut cursor = Cursor::new(bytes);
    let value = decode_value(&mut cursor, ctx)?;
    cursor.ensure_consumed()?;
    Ok(value)
}

pub(crate) fn write_len(buf: &mut Vec<u8>, len: usize) -> Result<()> {
    let len: u32 = len
        .try_into()
        .map_err(|_| GraphError::invalid("collection length exceeds u32::MAX"))?;
    buf.extend_from_slice(&len.to_le_bytes());
    Ok(())
}

pub(crate) fn write_count(buf: &mut Vec<u8>, count: usize) -> Result<()> {
    let count: i32 = count
        .try_into()
        .map_err(|_| GraphError::invalid("count exceeds i32::MAX"))?;
    buf.extend_from_slice(&count.to_le_bytes());
    Ok(())
}

fn write_string(buf: &mut Vec<u8>, value: &str) -> Result<()> {
    write_len(buf, value.len())?;
    buf.extend_from_slice(value.as_bytes());
    Ok(())
}

/// Bounds-checked little-endian reader over a record.
pub struct Cursor<'a> {
    data: &'a [u8],
    index: usize,
}

impl<'a> Cursor<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, index: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.index
    }

    fn read_exact(&mut self, len: usize) -> Result<&'a [u8]> {
        if len > self.remaining() {
            return Err(GraphError::corruption("unexpected end of payload"));
        }
        let start = self.index;
        self.index += len;
        Ok(&self.data[start..start + len])
    }

    fn read_bytes<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_exact(N)?);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_exact(1)?[0])
    }

    pub fn read_bool(&mut self) -> Result<bool> {
        match self.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(GraphError::corruption(format!(
                "invalid boolean encoding: {other}"
            ))),
        }
    }

    pub fn read_i8(&mut self) -> Result<i8> {
        Ok(i8::from_le_bytes(self.read_bytes()?))
    }

    pub fn read_i16(&mut self) -> Result<i16> {
        Ok(i16::from_le_bytes(self.read_bytes()?))
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        Ok(i32::from_le_bytes(self.read_bytes()?))
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.read_bytes()?))
    }

    pub fn read_i64(&mut self) -> Result<i64> {
        Ok(i64::from_le_bytes(self.read_bytes()?))
    }

    pub fn read_f32(&mut self) -> Result<f32> {
        Ok(f32::from_le_bytes(self.read_bytes()?))
    }

    pub fn read_f64(&mut self) -> Result<f64> {
        Ok(f64::from_le_bytes(self.read_bytes()?))
    }

    pub fn read_char(&mut self) -> Result<char> {
        let raw = self.read_u32()?;
        char::from_u32(raw)
            .ok_or_else(|| GraphError::corruption(format!("invalid character scalar: {raw:#x}")))
    }

    /// Reads an `i32` element count, rejecting negative values.
    pub fn read_count(&mut self) -> Result<usize> {
        let count = self.read_i32()?;
        usize::try_from(count)
            .map_err(|_| GraphError::corruption(format!("negative count: {count}")))
    }

    fn read_len(&mut self) -> Result<usize> {
        Ok(self.read_u32()? as usize)
    }

    pub fn read_str(&mut self) -> Result<&'a str> {
        let len = self.read_len()?;
        let bytes = self.read_exact(len)?;
        std::str::from_utf8(bytes).map_err(|_| GraphError::corruption("invalid UTF-8 string"))
    }

    fn read_array<T>(&mut self, read: impl Fn(&mut Self) -> Result<T>) -> Result<Vec<T>> {
        let len = self.read_len()?;
        let mut items = Vec::with_capacity(len.min(self.remaining()));
        for _ in 0..len {
            items.push(read(self)?);
        }
        Ok(items)
    }

    pub fn ensure_consumed(&self) -> Result<()> {
        if self.index != self.data.len() {
            return Err(GraphError::corruption(
                "unexpected trailing bytes in payload",
            ));
        }
        Ok(())
    }
}
