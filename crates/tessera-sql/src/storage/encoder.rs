//! Row image encoding for the write-ahead log.
//!
//! # Format
//!
//! - Number of columns (4 bytes, little-endian)
//! - For each column, a type tag (1 byte) followed by:
//!   - `Null`: nothing
//!   - `Integer`: 8 bytes
//!   - `Decimal`: 16-byte mantissa + 1-byte scale
//!   - `Text`: 4-byte length + UTF-8 bytes

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::executor::{Decimal, Value};

use super::error::{StorageError, StorageResult};

/// Type tags for binary encoding.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TypeTag {
    Null = 0,
    Integer = 1,
    Decimal = 2,
    Text = 3,
}

impl TypeTag {
    fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(TypeTag::Null),
            1 => Some(TypeTag::Integer),
            2 => Some(TypeTag::Decimal),
            3 => Some(TypeTag::Text),
            _ => None,
        }
    }
}

/// Encodes and decodes row images.
#[derive(Debug, Clone, Copy, Default)]
pub struct RowCodec;

impl RowCodec {
    /// Encodes a row's values.
    pub fn encode(values: &[Value]) -> Bytes {
        let mut buf = BytesMut::with_capacity(4 + values.len() * 9);
        buf.put_u32_le(values.len() as u32);
        for value in values {
            match value {
                Value::Null => buf.put_u8(TypeTag::Null as u8),
                Value::Integer(i) => {
                    buf.put_u8(TypeTag::Integer as u8);
                    buf.put_i64_le(*i);
                }
                Value::Decimal(d) => {
                    buf.put_u8(TypeTag::Decimal as u8);
                    buf.put_i128_le(d.mantissa());
                    buf.put_u8(d.scale());
                }
                Value::Text(s) => {
                    buf.put_u8(TypeTag::Text as u8);
                    buf.put_u32_le(s.len() as u32);
                    buf.put_slice(s.as_bytes());
                }
            }
        }
        buf.freeze()
    }

    /// Decodes a row image written by [`RowCodec::encode`].
    pub fn decode(mut data: &[u8]) -> StorageResult<Vec<Value>> {
        let count = read_u32(&mut data)? as usize;
        let mut values = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            need(data, 1)?;
            let tag = data.get_u8();
            let tag = TypeTag::from_u8(tag)
                .ok_or_else(|| StorageError::Encoding(format!("unknown type tag {}", tag)))?;
            let value = match tag {
                TypeTag::Null => Value::Null,
                TypeTag::Integer => {
                    need(data, 8)?;
                    Value::Integer(data.get_i64_le())
                }
                TypeTag::Decimal => {
                    need(data, 17)?;
                    let mantissa = data.get_i128_le();
                    let scale = data.get_u8();
                    Decimal::new(mantissa, scale).map(Value::Decimal).ok_or_else(|| {
                        StorageError::Encoding(format!("decimal scale {} too large", scale))
                    })?
                }
                TypeTag::Text => {
                    let len = read_u32(&mut data)? as usize;
                    need(data, len)?;
                    let text = std::str::from_utf8(&data[..len])
                        .map_err(|e| StorageError::Encoding(e.to_string()))?
                        .to_string();
                    data.advance(len);
                    Value::Text(text)
                }
            };
            values.push(value);
        }
        if !data.is_empty() {
            return Err(StorageError::Encoding(format!(
                "{} trailing bytes after row",
                data.len()
            )));
        }
        Ok(values)
    }
}

fn need(data: &[u8], len: usize) -> StorageResult<()> {
    if data.len() < len {
        return Err(StorageError::Encoding(format!(
            "row image truncated: need {} bytes, have {}",
            len,
            data.len()
        )));
    }
    Ok(())
}

fn read_u32(data: &mut &[u8]) -> StorageResult<u32> {
    need(data, 4)?;
    Ok(data.get_u32_le())
}
