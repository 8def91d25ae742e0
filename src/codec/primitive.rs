//! Fixed-width codecs for integers, floats, and bool.
//!
//! Zero serialization: values are stored and loaded at their native
//! width, native byte order, no framing.

use crate::codec::Codec;
use crate::error::Result;
use crate::mem;

macro_rules! fixed_codec {
    ($(#[$doc:meta])* $name:ident, $ty:ty) => {
        $(#[$doc])*
        #[derive(Clone, Copy, Default, Debug)]
        pub struct $name;

        impl Codec<$ty> for $name {
            fn size_of(&self, _value: &$ty) -> Result<usize> {
                Ok(std::mem::size_of::<$ty>())
            }

            unsafe fn encode(&self, addr: u64, value: &$ty) -> Result<usize> {
                mem::store(addr, *value);
                Ok(std::mem::size_of::<$ty>())
            }

            unsafe fn decode(&self, addr: u64, len: usize) -> Result<$ty> {
                debug_assert_eq!(len, std::mem::size_of::<$ty>());
                Ok(mem::load(addr))
            }

            fn fixed_size(&self) -> Option<usize> {
                Some(std::mem::size_of::<$ty>())
            }
        }
    };
}

fixed_codec!(
    /// 1-byte signed integer codec.
    I8Codec, i8
);
fixed_codec!(
    /// 2-byte signed integer codec.
    I16Codec, i16
);
fixed_codec!(
    /// 4-byte signed integer codec.
    I32Codec, i32
);
fixed_codec!(
    /// 8-byte signed integer codec.
    I64Codec, i64
);
fixed_codec!(
    /// 4-byte float codec.
    F32Codec, f32
);
fixed_codec!(
    /// 8-byte float codec.
    F64Codec, f64
);

/// Single-byte boolean codec; any nonzero byte decodes as `true`.
#[derive(Clone, Copy, Default, Debug)]
pub struct BoolCodec;

impl Codec<bool> for BoolCodec {
    fn size_of(&self, _value: &bool) -> Result<usize> {
        Ok(1)
    }

    unsafe fn encode(&self, addr: u64, value: &bool) -> Result<usize> {
        mem::store::<u8>(addr, u8::from(*value));
        Ok(1)
    }

    unsafe fn decode(&self, addr: u64, len: usize) -> Result<bool> {
        debug_assert_eq!(len, 1);
        Ok(mem::load::<u8>(addr) != 0)
    }

    fn fixed_size(&self) -> Option<usize> {
        Some(1)
    }
}
