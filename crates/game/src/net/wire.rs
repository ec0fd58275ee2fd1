//! Little-endian wire encoding.
//!
//! Every multi-byte integer on the wire is little-endian. `Encode` writes
//! into a byte vector and can't fail; `Decode` reads from a shrinking byte
//! slice and fails cleanly on truncated or invalid input.

use byteorder::{LittleEndian, ReadBytesExt};
use glam::Vec3;
use thiserror::Error;

use crate::entity::EntityId;
use crate::tilemap::{ChunkPosition, TileExtent, TilePosition};

#[derive(Debug, Error, PartialEq)]
pub enum WireError {
    #[error("unexpected end of input")]
    UnexpectedEnd,
    #[error("invalid value for {0}")]
    InvalidValue(&'static str),
    #[error("unknown message type {0}")]
    UnknownMessageType(u8),
    #[error("message of {size} bytes exceeds the maximum wire size")]
    OversizeMessage { size: usize },
    #[error("batch size field is corrupt: {0}")]
    BadBatchSize(u16),
    #[error("batch failed to decompress")]
    BadCompression,
}

pub trait Encode {
    fn encode(&self, buf: &mut Vec<u8>);
}

pub trait Decode: Sized {
    fn decode(r: &mut &[u8]) -> Result<Self, WireError>;
}

macro_rules! impl_int_wire {
    ($($ty:ty => $read:ident),* $(,)?) => {
        $(
            impl Encode for $ty {
                fn encode(&self, buf: &mut Vec<u8>) {
                    buf.extend_from_slice(&self.to_le_bytes());
                }
            }

            impl Decode for $ty {
                fn decode(r: &mut &[u8]) -> Result<Self, WireError> {
                    r.$read::<LittleEndian>().map_err(|_| WireError::UnexpectedEnd)
                }
            }
        )*
    };
}

impl_int_wire! {
    u16 => read_u16,
    u32 => read_u32,
    u64 => read_u64,
    i16 => read_i16,
    i32 => read_i32,
    i64 => read_i64,
    f32 => read_f32,
}

impl Encode for u8 {
    fn encode(&self, buf: &mut Vec<u8>) {
        buf.push(*self);
    }
}

impl Decode for u8 {
    fn decode(r: &mut &[u8]) -> Result<Self, WireError> {
        r.read_u8().map_err(|_| WireError::UnexpectedEnd)
    }
}

impl Encode for i8 {
    fn encode(&self, buf: &mut Vec<u8>) {
        buf.push(*self as u8);
    }
}

impl Decode for i8 {
    fn decode(r: &mut &[u8]) -> Result<Self, WireError> {
        r.read_i8().map_err(|_| WireError::UnexpectedEnd)
    }
}

impl Encode for bool {
    fn encode(&self, buf: &mut Vec<u8>) {
        buf.push(u8::from(*self));
    }
}

impl Decode for bool {
    fn decode(r: &mut &[u8]) -> Result<Self, WireError> {
        match u8::decode(r)? {
            0 => Ok(false),
            1 => Ok(true),
            _ => Err(WireError::InvalidValue("bool")),
        }
    }
}

impl Encode for Vec3 {
    fn encode(&self, buf: &mut Vec<u8>) {
        self.x.encode(buf);
        self.y.encode(buf);
        self.z.encode(buf);
    }
}

impl Decode for Vec3 {
    fn decode(r: &mut &[u8]) -> Result<Self, WireError> {
        Ok(Vec3::new(f32::decode(r)?, f32::decode(r)?, f32::decode(r)?))
    }
}

/// Sequences are length-prefixed with a u16.
impl<T: Encode> Encode for Vec<T> {
    fn encode(&self, buf: &mut Vec<u8>) {
        debug_assert!(self.len() <= u16::MAX as usize);
        (self.len() as u16).encode(buf);
        for item in self {
            item.encode(buf);
        }
    }
}

impl<T: Decode> Decode for Vec<T> {
    fn decode(r: &mut &[u8]) -> Result<Self, WireError> {
        let len = u16::decode(r)? as usize;
        let mut items = Vec::with_capacity(len.min(1024));
        for _ in 0..len {
            items.push(T::decode(r)?);
        }
        Ok(items)
    }
}

impl Encode for String {
    fn encode(&self, buf: &mut Vec<u8>) {
        debug_assert!(self.len() <= u16::MAX as usize);
        (self.len() as u16).encode(buf);
        buf.extend_from_slice(self.as_bytes());
    }
}

impl Decode for String {
    fn decode(r: &mut &[u8]) -> Result<Self, WireError> {
        let len = u16::decode(r)? as usize;
        if r.len() < len {
            return Err(WireError::UnexpectedEnd);
        }
        let (bytes, rest) = r.split_at(len);
        *r = rest;
        String::from_utf8(bytes.to_vec()).map_err(|_| WireError::InvalidValue("string"))
    }
}

impl Encode for EntityId {
    fn encode(&self, buf: &mut Vec<u8>) {
        self.to_bits().encode(buf);
    }
}

impl Decode for EntityId {
    fn decode(r: &mut &[u8]) -> Result<Self, WireError> {
        Ok(EntityId::from_bits(u32::decode(r)?))
    }
}

impl Encode for TilePosition {
    fn encode(&self, buf: &mut Vec<u8>) {
        self.x.encode(buf);
        self.y.encode(buf);
        self.z.encode(buf);
    }
}

impl Decode for TilePosition {
    fn decode(r: &mut &[u8]) -> Result<Self, WireError> {
        Ok(TilePosition::new(
            i32::decode(r)?,
            i32::decode(r)?,
            i32::decode(r)?,
        ))
    }
}

impl Encode for ChunkPosition {
    fn encode(&self, buf: &mut Vec<u8>) {
        self.x.encode(buf);
        self.y.encode(buf);
        self.z.encode(buf);
    }
}

impl Decode for ChunkPosition {
    fn decode(r: &mut &[u8]) -> Result<Self, WireError> {
        Ok(ChunkPosition::new(
            i32::decode(r)?,
            i32::decode(r)?,
            i32::decode(r)?,
        ))
    }
}

impl Encode for TileExtent {
    fn encode(&self, buf: &mut Vec<u8>) {
        self.x.encode(buf);
        self.y.encode(buf);
        self.z.encode(buf);
        self.x_length.encode(buf);
        self.y_length.encode(buf);
        self.z_length.encode(buf);
    }
}

impl Decode for TileExtent {
    fn decode(r: &mut &[u8]) -> Result<Self, WireError> {
        Ok(TileExtent::new(
            i32::decode(r)?,
            i32::decode(r)?,
            i32::decode(r)?,
            i32::decode(r)?,
            i32::decode(r)?,
            i32::decode(r)?,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip<T: Encode + Decode + PartialEq + std::fmt::Debug>(value: T) {
        let mut buf = Vec::new();
        value.encode(&mut buf);
        let mut slice = buf.as_slice();
        assert_eq!(T::decode(&mut slice).unwrap(), value);
        assert!(slice.is_empty());
    }

    #[test]
    fn primitives_round_trip() {
        round_trip(0xABu8);
        round_trip(-7i8);
        round_trip(0xBEEFu16);
        round_trip(-123456i32);
        round_trip(3.5f32);
        round_trip(true);
        round_trip(String::from("wall_stone"));
        round_trip(vec![1u32, 2, 3]);
    }

    #[test]
    fn integers_are_little_endian() {
        let mut buf = Vec::new();
        0x0102_0304u32.encode(&mut buf);
        assert_eq!(buf, [0x04, 0x03, 0x02, 0x01]);
    }

    #[test]
    fn truncated_input_errors() {
        let mut slice = &[0x01u8, 0x02][..];
        assert_eq!(u32::decode(&mut slice), Err(WireError::UnexpectedEnd));
    }
}
