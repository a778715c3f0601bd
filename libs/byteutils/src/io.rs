//! Little endian readers
//!
//! All readers work on any [`Read`], most notably on `&[u8]` which advances as it is consumed
use std::io::{self, Read};

macro_rules! le_reader {
    ($(#[$doc:meta] $name:ident => $ty:ty),* $(,)?) => {
        $(
            #[$doc]
            #[inline]
            pub fn $name<R: Read + ?Sized>(r: &mut R) -> Result<$ty, io::Error> {
                let mut buf = [0u8; std::mem::size_of::<$ty>()];
                r.read_exact(&mut buf)?;
                Ok(<$ty>::from_le_bytes(buf))
            }
        )*
    };
}

le_reader! {
    /// Single byte `u8` reader
    rdu8 => u8,
    /// Little endian `u16` reader
    rdu16le => u16,
    /// Little endian `i16` reader
    rdi16le => i16,
    /// Little endian `u32` reader
    rdu32le => u32,
    /// Little endian `i32` reader
    rdi32le => i32,
    /// Little endian `u64` reader
    rdu64le => u64,
    /// Little endian `f64` reader
    rdf64le => f64,
}

/// Reads exactly `N` bytes into an array
#[inline]
pub fn rdarray<const N: usize, R: Read + ?Sized>(r: &mut R) -> Result<[u8; N], io::Error> {
    let mut buf = [0u8; N];
    r.read_exact(&mut buf)?;
    Ok(buf)
}

/// Returns the `u32` found at `offset` in `buf`, if the buffer is long enough
#[inline]
pub fn u32_at(buf: &[u8], offset: usize) -> Option<u32> {
    let bytes = buf.get(offset..offset.checked_add(4)?)?;
    Some(u32::from_le_bytes(bytes.try_into().ok()?))
}

/// Returns the `u16` found at `offset` in `buf`, if the buffer is long enough
#[inline]
pub fn u16_at(buf: &[u8], offset: usize) -> Option<u16> {
    let bytes = buf.get(offset..offset.checked_add(2)?)?;
    Some(u16::from_le_bytes(bytes.try_into().ok()?))
}
