//! Object codec: adapts a serde-based serializer to the codec contract.
//!
//! The wire format is bincode's and is opaque to the store; the store
//! only consults `size_of` and `encode` explicitly, so no extra framing
//! is added here.

use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::codec::Codec;
use crate::error::{Error, Result};

/// Codec for any `Serialize + DeserializeOwned` type.
pub struct SerdeCodec<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> SerdeCodec<T> {
    pub fn new() -> Self {
        SerdeCodec {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for SerdeCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Codec<T> for SerdeCodec<T>
where
    T: Serialize + DeserializeOwned + Send + Sync,
{
    fn size_of(&self, value: &T) -> Result<usize> {
        bincode::serialized_size(value)
            .map(|n| n as usize)
            .map_err(|e| Error::Codec(format!("cannot size value: {e}")))
    }

    unsafe fn encode(&self, addr: u64, value: &T) -> Result<usize> {
        let size = self.size_of(value)?;
        let buf = std::slice::from_raw_parts_mut(addr as *mut u8, size);
        bincode::serialize_into(&mut buf[..], value)
            .map_err(|e| Error::Codec(format!("encode failed: {e}")))?;
        Ok(size)
    }

    unsafe fn decode(&self, addr: u64, len: usize) -> Result<T> {
        let buf = std::slice::from_raw_parts(addr as *const u8, len);
        bincode::deserialize(buf).map_err(|e| Error::Codec(format!("decode failed: {e}")))
    }
}
