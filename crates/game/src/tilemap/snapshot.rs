//! Tile map snapshots: the on-disk persistence format and the per-chunk
//! wire form used for streaming.
//!
//! Disk layout (all integers little-endian):
//!   u16  format version
//!   6x i32  chunk extent (origin x, y, z; length x, y, z)
//!   u32  chunk count
//!   per chunk:
//!     3x i32  chunk position
//!     u16  non-empty layer count
//!     CHUNK_TILE_COUNT tile records (row-major):
//!       u16  layer count
//!       per layer: u8 kind | i32 sprite id | u8 wall type
//!
//! Loading never partially populates: any failure leaves the caller with no
//! map. Saving goes through a temp file and rename so a crash can't corrupt
//! the previous snapshot.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use thiserror::Error;

use crate::config::{CHUNK_TILE_COUNT, CHUNK_WIDTH};
use crate::net::wire::{Decode, Encode, WireError};
use crate::sprite::{SpriteData, NULL_SPRITE_ID};

use super::chunk::Chunk;
use super::extent::{ChunkExtent, ChunkPosition, TilePosition};
use super::tile::{TileLayer, TileLayerKind, WallType};
use super::{MapError, TileMap};

pub const MAP_FORMAT_VERSION: u16 = 0;

#[derive(Debug, Error)]
pub enum MapPersistenceError {
    #[error("map io failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("unsupported map format version {0}")]
    UnsupportedVersion(u16),
    #[error("map data is truncated")]
    Truncated,
    #[error("map data is malformed: {0}")]
    Malformed(&'static str),
    #[error("map references a sprite that isn't in the sprite table: {0}")]
    UnknownSprite(i32),
}

impl From<WireError> for MapPersistenceError {
    fn from(error: WireError) -> Self {
        match error {
            WireError::UnexpectedEnd => Self::Truncated,
            _ => Self::Malformed("bad field encoding"),
        }
    }
}

/// One tile layer as stored on disk and on the wire.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LayerSnapshot {
    pub kind: TileLayerKind,
    pub sprite_id: i32,
    pub wall_type: WallType,
}

impl Encode for LayerSnapshot {
    fn encode(&self, buf: &mut Vec<u8>) {
        (self.kind as u8).encode(buf);
        self.sprite_id.encode(buf);
        (self.wall_type as u8).encode(buf);
    }
}

impl Decode for LayerSnapshot {
    fn decode(r: &mut &[u8]) -> Result<Self, WireError> {
        let kind = TileLayerKind::from_u8(u8::decode(r)?)
            .ok_or(WireError::InvalidValue("tile layer kind"))?;
        let sprite_id = i32::decode(r)?;
        let wall_type =
            WallType::from_u8(u8::decode(r)?).ok_or(WireError::InvalidValue("wall type"))?;
        Ok(LayerSnapshot {
            kind,
            sprite_id,
            wall_type,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TileSnapshot {
    pub layers: Vec<LayerSnapshot>,
}

impl Encode for TileSnapshot {
    fn encode(&self, buf: &mut Vec<u8>) {
        self.layers.encode(buf);
    }
}

impl Decode for TileSnapshot {
    fn decode(r: &mut &[u8]) -> Result<Self, WireError> {
        Ok(TileSnapshot {
            layers: Vec::<LayerSnapshot>::decode(r)?,
        })
    }
}

/// A whole chunk, as streamed in `ChunkUpdate` messages. Tiles are in
/// row-major order and always CHUNK_TILE_COUNT long.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkSnapshot {
    pub position: ChunkPosition,
    pub tile_layer_count: u16,
    pub tiles: Vec<TileSnapshot>,
}

impl ChunkSnapshot {
    pub fn from_chunk(position: ChunkPosition, chunk: &Chunk) -> Self {
        let tiles = chunk
            .tiles_row_major()
            .map(|tile| TileSnapshot {
                layers: tile
                    .layers
                    .iter()
                    .map(|layer| LayerSnapshot {
                        kind: layer.kind,
                        sprite_id: layer.sprite_id,
                        wall_type: layer.wall_type,
                    })
                    .collect(),
            })
            .collect();
        Self {
            position,
            tile_layer_count: chunk.tile_layer_count,
            tiles,
        }
    }
}

impl Encode for ChunkSnapshot {
    fn encode(&self, buf: &mut Vec<u8>) {
        self.position.encode(buf);
        self.tile_layer_count.encode(buf);
        debug_assert_eq!(self.tiles.len(), CHUNK_TILE_COUNT);
        for tile in &self.tiles {
            tile.encode(buf);
        }
    }
}

impl Decode for ChunkSnapshot {
    fn decode(r: &mut &[u8]) -> Result<Self, WireError> {
        let position = ChunkPosition::decode(r)?;
        let tile_layer_count = u16::decode(r)?;
        let mut tiles = Vec::with_capacity(CHUNK_TILE_COUNT);
        for _ in 0..CHUNK_TILE_COUNT {
            tiles.push(TileSnapshot::decode(r)?);
        }
        Ok(ChunkSnapshot {
            position,
            tile_layer_count,
            tiles,
        })
    }
}

impl TileMap {
    pub fn chunk_snapshot(&self, position: ChunkPosition) -> Option<ChunkSnapshot> {
        self.chunk(position)
            .map(|chunk| ChunkSnapshot::from_chunk(position, chunk))
    }

    /// Replaces the chunk at the snapshot's position with the snapshot's
    /// contents. An all-empty snapshot removes the chunk.
    pub fn apply_chunk_snapshot(&mut self, snapshot: &ChunkSnapshot) -> Result<(), MapError> {
        if !self.chunk_extent.contains(snapshot.position) {
            let origin = snapshot.position.origin_tile();
            return Err(MapError::OutOfBounds(origin.x, origin.y, origin.z));
        }

        let (chunk, layer_count) =
            build_chunk(&self.sprite_data, snapshot.position, &snapshot.tiles)?;

        if layer_count == 0 {
            self.chunks.remove(&snapshot.position);
        } else {
            self.chunks.insert(snapshot.position, chunk);
        }
        Ok(())
    }
}

/// Builds a chunk from tile records, computing collision bounds as layers
/// are placed. Returns the chunk and its non-empty layer count.
fn build_chunk(
    sprite_data: &SpriteData,
    position: ChunkPosition,
    tiles: &[TileSnapshot],
) -> Result<(Chunk, u16), MapError> {
    let mut chunk = Chunk::default();
    let mut layer_count = 0u16;
    let origin = position.origin_tile();

    for (tile_index, tile_snapshot) in tiles.iter().enumerate() {
        let offset_x = (tile_index % CHUNK_WIDTH) as u8;
        let offset_y = (tile_index / CHUNK_WIDTH) as u8;
        let tile_position = TilePosition::new(
            origin.x + offset_x as i32,
            origin.y + offset_y as i32,
            origin.z,
        );

        let tile = chunk.tile_mut(offset_x, offset_y);
        for record in &tile_snapshot.layers {
            if record.sprite_id == NULL_SPRITE_ID {
                tile.layers.push(TileLayer::empty());
                continue;
            }

            let sprite = sprite_data
                .get(record.sprite_id)
                .ok_or(MapError::UnknownSprite(record.sprite_id))?;
            let world_bounds = (sprite.collision_enabled
                && record.kind != TileLayerKind::Floor)
                .then(|| {
                    sprite
                        .model_bounds
                        .model_to_world_origin(tile_position.world_origin())
                });

            tile.layers.push(TileLayer {
                kind: record.kind,
                sprite_id: record.sprite_id,
                wall_type: record.wall_type,
                world_bounds,
            });
            layer_count += 1;
        }
    }

    chunk.tile_layer_count = layer_count;
    Ok((chunk, layer_count))
}

/// Serializes the whole map. Chunks are written in (z, y, x) order so the
/// same map always produces the same bytes.
pub fn serialize_map(map: &TileMap) -> Vec<u8> {
    let mut buf = Vec::new();
    MAP_FORMAT_VERSION.encode(&mut buf);

    let extent = map.chunk_extent();
    extent.x.encode(&mut buf);
    extent.y.encode(&mut buf);
    extent.z.encode(&mut buf);
    extent.x_length.encode(&mut buf);
    extent.y_length.encode(&mut buf);
    extent.z_length.encode(&mut buf);

    let chunks = map.chunks_ordered();
    (chunks.len() as u32).encode(&mut buf);
    for (position, chunk) in chunks {
        ChunkSnapshot::from_chunk(position, chunk).encode(&mut buf);
    }
    buf
}

pub fn deserialize_map(
    bytes: &[u8],
    sprite_data: Arc<SpriteData>,
    track_dirty: bool,
) -> Result<TileMap, MapPersistenceError> {
    let mut r = bytes;

    let version = u16::decode(&mut r)?;
    if version != MAP_FORMAT_VERSION {
        return Err(MapPersistenceError::UnsupportedVersion(version));
    }

    let extent = ChunkExtent::new(
        i32::decode(&mut r)?,
        i32::decode(&mut r)?,
        i32::decode(&mut r)?,
        i32::decode(&mut r)?,
        i32::decode(&mut r)?,
        i32::decode(&mut r)?,
    );

    let mut map = TileMap::new(extent, sprite_data, track_dirty);

    let chunk_count = u32::decode(&mut r)?;
    for _ in 0..chunk_count {
        let snapshot = ChunkSnapshot::decode(&mut r)?;
        if !extent.contains(snapshot.position) {
            return Err(MapPersistenceError::Malformed("chunk outside map extent"));
        }
        if map.chunks.contains_key(&snapshot.position) {
            return Err(MapPersistenceError::Malformed("duplicate chunk position"));
        }

        let (chunk, layer_count) =
            build_chunk(map.sprite_data(), snapshot.position, &snapshot.tiles).map_err(
                |error| match error {
                    MapError::UnknownSprite(id) => MapPersistenceError::UnknownSprite(id),
                    _ => MapPersistenceError::Malformed("bad chunk contents"),
                },
            )?;
        if layer_count != snapshot.tile_layer_count {
            return Err(MapPersistenceError::Malformed("chunk layer count mismatch"));
        }

        map.chunks.insert(snapshot.position, chunk);
    }

    if !r.is_empty() {
        return Err(MapPersistenceError::Malformed("trailing bytes"));
    }
    Ok(map)
}

/// Saves the map atomically: serialize to `<path>.tmp`, then rename over
/// the destination.
pub fn save(map: &TileMap, path: &Path) -> Result<(), MapPersistenceError> {
    let bytes = serialize_map(map);
    let temp_path = path.with_extension("tmp");
    fs::write(&temp_path, &bytes)?;
    fs::rename(&temp_path, path)?;
    Ok(())
}

pub fn load(
    path: &Path,
    sprite_data: Arc<SpriteData>,
    track_dirty: bool,
) -> Result<TileMap, MapPersistenceError> {
    let bytes = fs::read(path)?;
    deserialize_map(&bytes, sprite_data, track_dirty)
}
