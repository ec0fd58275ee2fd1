use glam::Vec3;

use crate::bounding_box::BoundingBox;
use crate::config::{CHUNK_WIDTH, TILE_WORLD_HEIGHT, TILE_WORLD_WIDTH};

fn div_floor(value: i32, divisor: i32) -> i32 {
    value.div_euclid(divisor)
}

/// A tile's position in the map, in tile units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TilePosition {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl TilePosition {
    pub fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// The position of the chunk that contains this tile.
    pub fn chunk_position(&self) -> ChunkPosition {
        ChunkPosition {
            x: div_floor(self.x, CHUNK_WIDTH as i32),
            y: div_floor(self.y, CHUNK_WIDTH as i32),
            z: self.z,
        }
    }

    /// This tile's offset within its containing chunk, in [0, CHUNK_WIDTH).
    pub fn chunk_offset(&self) -> (u8, u8) {
        (
            self.x.rem_euclid(CHUNK_WIDTH as i32) as u8,
            self.y.rem_euclid(CHUNK_WIDTH as i32) as u8,
        )
    }

    /// The world-space origin of this tile (min corner).
    pub fn world_origin(&self) -> Vec3 {
        Vec3::new(
            self.x as f32 * TILE_WORLD_WIDTH,
            self.y as f32 * TILE_WORLD_WIDTH,
            self.z as f32 * TILE_WORLD_HEIGHT,
        )
    }
}

/// A chunk's position in the map, in chunk units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct ChunkPosition {
    // Field order matters for Ord: chunks sort by z, then y, then x, which
    // gives persistence a stable on-disk ordering.
    pub z: i32,
    pub y: i32,
    pub x: i32,
}

impl ChunkPosition {
    pub fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// The position of this chunk's origin tile.
    pub fn origin_tile(&self) -> TilePosition {
        TilePosition {
            x: self.x * CHUNK_WIDTH as i32,
            y: self.y * CHUNK_WIDTH as i32,
            z: self.z,
        }
    }
}

/// An extent of map chunks: an origin and lengths along each axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChunkExtent {
    pub x: i32,
    pub y: i32,
    pub z: i32,
    pub x_length: i32,
    pub y_length: i32,
    pub z_length: i32,
}

impl ChunkExtent {
    pub fn new(x: i32, y: i32, z: i32, x_length: i32, y_length: i32, z_length: i32) -> Self {
        Self {
            x,
            y,
            z,
            x_length,
            y_length,
            z_length,
        }
    }

    /// Builds an extent from map lengths, centered around (0, 0) in x/y and
    /// starting at 0 in z.
    pub fn from_map_lengths(x_length: u16, y_length: u16, z_length: u16) -> Self {
        Self {
            x: -(x_length as i32 / 2),
            y: -(y_length as i32 / 2),
            z: 0,
            x_length: x_length as i32,
            y_length: y_length as i32,
            z_length: z_length as i32,
        }
    }

    pub fn contains(&self, position: ChunkPosition) -> bool {
        position.x >= self.x
            && position.x < self.x + self.x_length
            && position.y >= self.y
            && position.y < self.y + self.y_length
            && position.z >= self.z
            && position.z < self.z + self.z_length
    }

    pub fn chunk_count(&self) -> usize {
        (self.x_length * self.y_length * self.z_length) as usize
    }

    pub fn iter(&self) -> impl Iterator<Item = ChunkPosition> + '_ {
        let extent = *self;
        (extent.z..extent.z + extent.z_length).flat_map(move |z| {
            (extent.y..extent.y + extent.y_length).flat_map(move |y| {
                (extent.x..extent.x + extent.x_length).map(move |x| ChunkPosition { x, y, z })
            })
        })
    }
}

/// An extent of map tiles: an origin and lengths along each axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TileExtent {
    pub x: i32,
    pub y: i32,
    pub z: i32,
    pub x_length: i32,
    pub y_length: i32,
    pub z_length: i32,
}

impl TileExtent {
    pub fn new(x: i32, y: i32, z: i32, x_length: i32, y_length: i32, z_length: i32) -> Self {
        Self {
            x,
            y,
            z,
            x_length,
            y_length,
            z_length,
        }
    }

    pub fn contains(&self, position: TilePosition) -> bool {
        position.x >= self.x
            && position.x < self.x + self.x_length
            && position.y >= self.y
            && position.y < self.y + self.y_length
            && position.z >= self.z
            && position.z < self.z + self.z_length
    }

    /// The smallest tile extent containing the given world-space box. A box
    /// that ends exactly on a tile edge doesn't include the next tile.
    pub fn from_bounding_box(bounds: &BoundingBox) -> Self {
        let min_x = (bounds.min.x / TILE_WORLD_WIDTH).floor() as i32;
        let min_y = (bounds.min.y / TILE_WORLD_WIDTH).floor() as i32;
        let min_z = (bounds.min.z / TILE_WORLD_HEIGHT).floor() as i32;
        let max_x = (bounds.max.x / TILE_WORLD_WIDTH).ceil() as i32;
        let max_y = (bounds.max.y / TILE_WORLD_WIDTH).ceil() as i32;
        let max_z = (bounds.max.z / TILE_WORLD_HEIGHT).ceil() as i32;
        Self {
            x: min_x,
            y: min_y,
            z: min_z,
            x_length: (max_x - min_x).max(1),
            y_length: (max_y - min_y).max(1),
            z_length: (max_z - min_z).max(1),
        }
    }

    pub fn intersection(&self, other: &TileExtent) -> TileExtent {
        let x = self.x.max(other.x);
        let y = self.y.max(other.y);
        let z = self.z.max(other.z);
        let x_end = (self.x + self.x_length).min(other.x + other.x_length);
        let y_end = (self.y + self.y_length).min(other.y + other.y_length);
        let z_end = (self.z + self.z_length).min(other.z + other.z_length);
        TileExtent {
            x,
            y,
            z,
            x_length: (x_end - x).max(0),
            y_length: (y_end - y).max(0),
            z_length: (z_end - z).max(0),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.x_length <= 0 || self.y_length <= 0 || self.z_length <= 0
    }

    pub fn iter(&self) -> impl Iterator<Item = TilePosition> + '_ {
        let extent = *self;
        (extent.z..extent.z + extent.z_length).flat_map(move |z| {
            (extent.y..extent.y + extent.y_length).flat_map(move |y| {
                (extent.x..extent.x + extent.x_length).map(move |x| TilePosition { x, y, z })
            })
        })
    }
}

impl From<TileExtent> for ChunkExtent {
    /// The smallest chunk extent covering the tile extent.
    fn from(tile_extent: TileExtent) -> Self {
        let width = CHUNK_WIDTH as i32;
        let x = div_floor(tile_extent.x, width);
        let y = div_floor(tile_extent.y, width);
        let x_end = div_floor(tile_extent.x + tile_extent.x_length + width - 1, width);
        let y_end = div_floor(tile_extent.y + tile_extent.y_length + width - 1, width);
        ChunkExtent {
            x,
            y,
            z: tile_extent.z,
            x_length: x_end - x,
            y_length: y_end - y,
            z_length: tile_extent.z_length,
        }
    }
}

impl From<ChunkExtent> for TileExtent {
    fn from(chunk_extent: ChunkExtent) -> Self {
        TileExtent {
            x: chunk_extent.x * CHUNK_WIDTH as i32,
            y: chunk_extent.y * CHUNK_WIDTH as i32,
            z: chunk_extent.z,
            x_length: chunk_extent.x_length * CHUNK_WIDTH as i32,
            y_length: chunk_extent.y_length * CHUNK_WIDTH as i32,
            z_length: chunk_extent.z_length,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tile_to_chunk_mapping() {
        assert_eq!(
            TilePosition::new(0, 0, 0).chunk_position(),
            ChunkPosition::new(0, 0, 0)
        );
        assert_eq!(
            TilePosition::new(15, 15, 0).chunk_position(),
            ChunkPosition::new(0, 0, 0)
        );
        assert_eq!(
            TilePosition::new(16, 31, 0).chunk_position(),
            ChunkPosition::new(1, 1, 0)
        );
        assert_eq!(
            TilePosition::new(-1, -16, 0).chunk_position(),
            ChunkPosition::new(-1, -1, 0)
        );
        assert_eq!(TilePosition::new(-1, -16, 0).chunk_offset(), (15, 0));
    }

    #[test]
    fn centered_chunk_extent() {
        let extent = ChunkExtent::from_map_lengths(4, 4, 1);
        assert_eq!(extent.x, -2);
        assert_eq!(extent.y, -2);
        assert!(extent.contains(ChunkPosition::new(-2, -2, 0)));
        assert!(extent.contains(ChunkPosition::new(1, 1, 0)));
        assert!(!extent.contains(ChunkPosition::new(2, 0, 0)));
        assert!(!extent.contains(ChunkPosition::new(0, 0, 1)));
    }

    #[test]
    fn bounding_box_to_tile_extent_excludes_exact_edges() {
        let bounds = BoundingBox::new(
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(TILE_WORLD_WIDTH, TILE_WORLD_WIDTH, 1.0),
        );
        let extent = TileExtent::from_bounding_box(&bounds);
        assert_eq!((extent.x, extent.y), (0, 0));
        assert_eq!((extent.x_length, extent.y_length), (1, 1));
    }
}
