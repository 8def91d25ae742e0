//! Length-prefixed codecs for strings and byte vectors.
//!
//! Wire shape is `[i32 length][bytes]`. A length of `-1` denotes an
//! absent value, so each codec also implements `Codec<Option<_>>`;
//! length `0` is an empty string or slice.

use crate::codec::Codec;
use crate::error::{Error, Result};
use crate::mem;

const LEN_PREFIX: usize = 4;
const NULL_LEN: i32 = -1;

/// UTF-8 string codec.
#[derive(Clone, Copy, Default, Debug)]
pub struct StringCodec;

/// Raw byte-vector codec. Same framing as [`StringCodec`].
#[derive(Clone, Copy, Default, Debug)]
pub struct BytesCodec;

unsafe fn encode_bytes(addr: u64, bytes: &[u8]) -> Result<usize> {
    let len = i32::try_from(bytes.len())
        .map_err(|_| Error::Codec(format!("value of {} bytes exceeds i32 length", bytes.len())))?;
    mem::store(addr, len);
    mem::copy_from_slice(bytes, addr + LEN_PREFIX as u64);
    Ok(LEN_PREFIX + bytes.len())
}

unsafe fn decode_bytes(addr: u64, total_len: usize) -> Result<Option<Vec<u8>>> {
    let len = mem::load::<i32>(addr);
    if len == NULL_LEN {
        return Ok(None);
    }
    if len < 0 || LEN_PREFIX + len as usize > total_len {
        return Err(Error::Codec(format!(
            "corrupt length prefix {len} in a {total_len}-byte value"
        )));
    }
    let mut out = vec![0u8; len as usize];
    mem::copy_to_slice(addr + LEN_PREFIX as u64, &mut out);
    Ok(Some(out))
}

impl Codec<String> for StringCodec {
    fn size_of(&self, value: &String) -> Result<usize> {
        Ok(LEN_PREFIX + value.len())
    }

    unsafe fn encode(&self, addr: u64, value: &String) -> Result<usize> {
        encode_bytes(addr, value.as_bytes())
    }

    unsafe fn decode(&self, addr: u64, len: usize) -> Result<String> {
        match decode_bytes(addr, len)? {
            Some(bytes) => String::from_utf8(bytes)
                .map_err(|e| Error::Codec(format!("invalid utf-8 in stored string: {e}"))),
            None => Err(Error::Codec(
                "null string decoded through the non-nullable codec".into(),
            )),
        }
    }
}

impl Codec<Option<String>> for StringCodec {
    fn size_of(&self, value: &Option<String>) -> Result<usize> {
        Ok(match value {
            Some(s) => LEN_PREFIX + s.len(),
            None => LEN_PREFIX,
        })
    }

    unsafe fn encode(&self, addr: u64, value: &Option<String>) -> Result<usize> {
        match value {
            Some(s) => encode_bytes(addr, s.as_bytes()),
            None => {
                mem::store(addr, NULL_LEN);
                Ok(LEN_PREFIX)
            }
        }
    }

    unsafe fn decode(&self, addr: u64, len: usize) -> Result<Option<String>> {
        match decode_bytes(addr, len)? {
            Some(bytes) => String::from_utf8(bytes)
                .map(Some)
                .map_err(|e| Error::Codec(format!("invalid utf-8 in stored string: {e}"))),
            None => Ok(None),
        }
    }
}

impl Codec<Vec<u8>> for BytesCodec {
    fn size_of(&self, value: &Vec<u8>) -> Result<usize> {
        Ok(LEN_PREFIX + value.len())
    }

    unsafe fn encode(&self, addr: u64, value: &Vec<u8>) -> Result<usize> {
        encode_bytes(addr, value)
    }

    unsafe fn decode(&self, addr: u64, len: usize) -> Result<Vec<u8>> {
        decode_bytes(addr, len)?.ok_or_else(|| {
            Error::Codec("null bytes decoded through the non-nullable codec".into())
        })
    }
}

impl Codec<Option<Vec<u8>>> for BytesCodec {
    fn size_of(&self, value: &Option<Vec<u8>>) -> Result<usize> {
        Ok(match value {
            Some(b) => LEN_PREFIX + b.len(),
            None => LEN_PREFIX,
        })
    }

    unsafe fn encode(&self, addr: u64, value: &Option<Vec<u8>>) -> Result<usize> {
        match value {
            Some(b) => encode_bytes(addr, b),
            None => {
                mem::store(addr, NULL_LEN);
                Ok(LEN_PREFIX)
            }
        }
    }

    unsafe fn decode(&self, addr: u64, len: usize) -> Result<Option<Vec<u8>>> {
        decode_bytes(addr, len)
    }
}
