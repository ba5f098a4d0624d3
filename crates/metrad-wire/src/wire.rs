use std::collections::BTreeMap;

use byteorder::{ByteOrder, LittleEndian};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WireError {
    #[error("insufficient data: need {need} bytes but only {have} remain")]
    InsufficientData { need: usize, have: usize },
    #[error("invalid tag for {what}: {value}")]
    InvalidTag { what: &'static str, value: u8 },
    #[error("invalid UTF-8 string")]
    InvalidUtf8,
    #[error("length overflow: {size} bytes")]
    LengthOverflow { size: usize },
}

/// Serialize a value into the little-endian wire form.
pub trait WireEncode {
    fn encode(&self, buf: &mut Vec<u8>);
}

/// Deserialize a value from the wire form, advancing `offset`.
pub trait WireDecode: Sized {
    fn decode(buf: &[u8], offset: &mut usize) -> Result<Self, WireError>;
}

pub(crate) fn take<'a>(buf: &'a [u8], offset: &mut usize, n: usize) -> Result<&'a [u8], WireError> {
    if buf.len() - *offset < n {
        return Err(WireError::InsufficientData {
            need: n,
            have: buf.len() - *offset,
        });
    }
    let slice = &buf[*offset..*offset + n];
    *offset += n;
    Ok(slice)
}

macro_rules! impl_wire_for_int {
    ($ty:ty, $size:expr, $read:ident, $write:ident) => {
        impl WireEncode for $ty {
            fn encode(&self, buf: &mut Vec<u8>) {
                let mut tmp = [0u8; $size];
                LittleEndian::$write(&mut tmp, *self);
                buf.extend_from_slice(&tmp);
            }
        }

        impl WireDecode for $ty {
            fn decode(buf: &[u8], offset: &mut usize) -> Result<Self, WireError> {
                let bytes = take(buf, offset, $size)?;
                Ok(LittleEndian::$read(bytes))
            }
        }
    };
}

impl_wire_for_int!(u16, 2, read_u16, write_u16);
impl_wire_for_int!(u32, 4, read_u32, write_u32);
impl_wire_for_int!(u64, 8, read_u64, write_u64);
impl_wire_for_int!(i64, 8, read_i64, write_i64);

impl WireEncode for u8 {
    fn encode(&self, buf: &mut Vec<u8>) {
        buf.push(*self);
    }
}

impl WireDecode for u8 {
    fn decode(buf: &[u8], offset: &mut usize) -> Result<Self, WireError> {
        Ok(take(buf, offset, 1)?[0])
    }
}

impl WireEncode for f64 {
    fn encode(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.to_le_bytes());
    }
}

impl WireDecode for f64 {
    fn decode(buf: &[u8], offset: &mut usize) -> Result<Self, WireError> {
        let bytes = take(buf, offset, 8)?;
        Ok(f64::from_le_bytes(bytes.try_into().unwrap()))
    }
}

impl WireEncode for bool {
    fn encode(&self, buf: &mut Vec<u8>) {
        buf.push(u8::from(*self));
    }
}

impl WireDecode for bool {
    fn decode(buf: &[u8], offset: &mut usize) -> Result<Self, WireError> {
        Ok(u8::decode(buf, offset)? != 0)
    }
}

impl WireEncode for String {
    fn encode(&self, buf: &mut Vec<u8>) {
        (self.len() as u32).encode(buf);
        buf.extend_from_slice(self.as_bytes());
    }
}

impl WireDecode for String {
    fn decode(buf: &[u8], offset: &mut usize) -> Result<Self, WireError> {
        let len = u32::decode(buf, offset)? as usize;
        let bytes = take(buf, offset, len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| WireError::InvalidUtf8)
    }
}

impl WireEncode for bytes::Bytes {
    fn encode(&self, buf: &mut Vec<u8>) {
        (self.len() as u32).encode(buf);
        buf.extend_from_slice(self);
    }
}

impl WireDecode for bytes::Bytes {
    fn decode(buf: &[u8], offset: &mut usize) -> Result<Self, WireError> {
        let len = u32::decode(buf, offset)? as usize;
        let bytes = take(buf, offset, len)?;
        Ok(bytes::Bytes::copy_from_slice(bytes))
    }
}

// Vec<u8> encodes byte-identically to Bytes: u32 count + raw bytes, because
// each u8 element is a single byte.
impl<T: WireEncode> WireEncode for Vec<T> {
    fn encode(&self, buf: &mut Vec<u8>) {
        (self.len() as u32).encode(buf);
        for item in self {
            item.encode(buf);
        }
    }
}

impl<T: WireDecode> WireDecode for Vec<T> {
    fn decode(buf: &[u8], offset: &mut usize) -> Result<Self, WireError> {
        let len = u32::decode(buf, offset)? as usize;
        let mut result = Vec::new();
        for _ in 0..len {
            result.push(T::decode(buf, offset)?);
        }
        Ok(result)
    }
}

impl<T: WireEncode> WireEncode for Option<T> {
    fn encode(&self, buf: &mut Vec<u8>) {
        match self {
            None => 0u8.encode(buf),
            Some(val) => {
                1u8.encode(buf);
                val.encode(buf);
            }
        }
    }
}

impl<T: WireDecode> WireDecode for Option<T> {
    fn decode(buf: &[u8], offset: &mut usize) -> Result<Self, WireError> {
        match u8::decode(buf, offset)? {
            0 => Ok(None),
            _ => Ok(Some(T::decode(buf, offset)?)),
        }
    }
}

impl<V: WireEncode> WireEncode for BTreeMap<String, V> {
    fn encode(&self, buf: &mut Vec<u8>) {
        (self.len() as u32).encode(buf);
        for (k, v) in self {
            k.encode(buf);
            v.encode(buf);
        }
    }
}

impl<V: WireDecode> WireDecode for BTreeMap<String, V> {
    fn decode(buf: &[u8], offset: &mut usize) -> Result<Self, WireError> {
        let len = u32::decode(buf, offset)? as usize;
        let mut result = BTreeMap::new();
        for _ in 0..len {
            let k = String::decode(buf, offset)?;
            let v = V::decode(buf, offset)?;
            result.insert(k, v);
        }
        Ok(result)
    }
}
