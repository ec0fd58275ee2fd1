//! The world's tile map: chunked, layered tile state.
//!
//! Tiles are organized into CHUNK_WIDTH x CHUNK_WIDTH chunks which are
//! created lazily and deleted when their last layer is cleared. The map's
//! extent is fixed at construction; it does not grow at runtime.

mod chunk;
mod extent;
pub mod snapshot;
mod tile;

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;

pub use chunk::{morton, Chunk};
pub use extent::{ChunkExtent, ChunkPosition, TileExtent, TilePosition};
pub use tile::{Tile, TileLayer, TileLayerKind, WallType};

use crate::bounding_box::BoundingBox;
use crate::sprite::{SpriteData, NULL_SPRITE_ID};

/// Maximum number of wall layers a single tile can hold (a west piece and a
/// north piece, or a wall plus a gap fill).
pub const MAX_WALL_LAYERS_PER_TILE: usize = 2;

static EMPTY_TILE: Tile = Tile { layers: Vec::new() };

#[derive(Debug, Error, PartialEq)]
pub enum MapError {
    #[error("tile ({0}, {1}, {2}) is outside the map extent")]
    OutOfBounds(i32, i32, i32),
    #[error("sprite id {0} is not in the sprite table")]
    UnknownSprite(i32),
    #[error("floor sprites can only be set at layer index 0")]
    FloorNotAtBase,
    #[error("layer index 0 is reserved for floor sprites")]
    NonFloorAtBase,
    #[error("tile already has {MAX_WALL_LAYERS_PER_TILE} wall layers")]
    TooManyWalls,
}

pub struct TileMap {
    sprite_data: Arc<SpriteData>,

    chunk_extent: ChunkExtent,
    tile_extent: TileExtent,

    chunks: HashMap<ChunkPosition, Chunk>,

    /// If true, tile updates are recorded in `dirty_tiles`. The server
    /// tracks dirty state for streaming; the client doesn't.
    track_dirty: bool,

    /// The lowest changed layer index for each changed tile, since the last
    /// `take_dirty_tiles`.
    dirty_tiles: HashMap<TilePosition, usize>,
}

impl TileMap {
    pub fn new(chunk_extent: ChunkExtent, sprite_data: Arc<SpriteData>, track_dirty: bool) -> Self {
        Self {
            sprite_data,
            chunk_extent,
            tile_extent: TileExtent::from(chunk_extent),
            chunks: HashMap::new(),
            track_dirty,
            dirty_tiles: HashMap::new(),
        }
    }

    pub fn chunk_extent(&self) -> ChunkExtent {
        self.chunk_extent
    }

    pub fn tile_extent(&self) -> TileExtent {
        self.tile_extent
    }

    pub fn chunk(&self, position: ChunkPosition) -> Option<&Chunk> {
        self.chunks.get(&position)
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Iterates live chunks in a stable (z, y, x) order.
    pub fn chunks_ordered(&self) -> Vec<(ChunkPosition, &Chunk)> {
        let mut chunks: Vec<_> = self.chunks.iter().map(|(pos, chunk)| (*pos, chunk)).collect();
        chunks.sort_by_key(|(pos, _)| *pos);
        chunks
    }

    /// Returns the tile at the given position. Tiles in chunks that haven't
    /// been created yet read as empty.
    pub fn tile(&self, position: TilePosition) -> Result<&Tile, MapError> {
        if !self.tile_extent.contains(position) {
            return Err(MapError::OutOfBounds(position.x, position.y, position.z));
        }

        match self.chunks.get(&position.chunk_position()) {
            Some(chunk) => {
                let (offset_x, offset_y) = position.chunk_offset();
                Ok(chunk.tile(offset_x, offset_y))
            }
            None => Ok(&EMPTY_TILE),
        }
    }

    /// Sets the layer at the given index to the given sprite, inserting or
    /// replacing. If the tile's layer vector is shorter than `layer_index`,
    /// it's extended with empty layers. `NULL_SPRITE_ID` writes an empty
    /// layer.
    pub fn set_layer(
        &mut self,
        position: TilePosition,
        layer_index: usize,
        sprite_id: i32,
    ) -> Result<(), MapError> {
        if !self.tile_extent.contains(position) {
            return Err(MapError::OutOfBounds(position.x, position.y, position.z));
        }

        let new_layer = if sprite_id == NULL_SPRITE_ID {
            TileLayer::empty()
        } else {
            let sprite = self
                .sprite_data
                .get(sprite_id)
                .ok_or(MapError::UnknownSprite(sprite_id))?;

            match (sprite.layer_kind, layer_index) {
                (TileLayerKind::Floor, index) if index != 0 => {
                    return Err(MapError::FloorNotAtBase);
                }
                (kind, 0) if kind != TileLayerKind::Floor => {
                    return Err(MapError::NonFloorAtBase);
                }
                _ => {}
            }

            // Floors never contribute collision.
            let world_bounds = (sprite.collision_enabled
                && sprite.layer_kind != TileLayerKind::Floor)
                .then(|| sprite.model_bounds.model_to_world_origin(position.world_origin()));

            TileLayer {
                kind: sprite.layer_kind,
                sprite_id,
                wall_type: sprite.wall_type,
                world_bounds,
            }
        };

        let chunk_position = position.chunk_position();
        let (offset_x, offset_y) = position.chunk_offset();

        // Creating a chunk for an empty write would churn the map for
        // nothing.
        if new_layer.is_empty() && !self.chunks.contains_key(&chunk_position) {
            return Ok(());
        }

        // Constraint checks happen against the existing tile, before any
        // chunk gets created for this edit.
        if new_layer.kind == TileLayerKind::Wall && !new_layer.is_empty() {
            let tile = self.tile(position)?;
            let replacing_wall = tile
                .layers
                .get(layer_index)
                .is_some_and(|layer| !layer.is_empty() && layer.kind == TileLayerKind::Wall);
            if !replacing_wall && tile.wall_count() >= MAX_WALL_LAYERS_PER_TILE {
                return Err(MapError::TooManyWalls);
            }
        }

        let chunk = self.chunks.entry(chunk_position).or_default();
        let tile = chunk.tile_mut(offset_x, offset_y);

        if tile.layers.len() <= layer_index {
            tile.layers.resize(layer_index + 1, TileLayer::empty());
        }

        let was_empty = tile.layers[layer_index].is_empty();
        let is_empty = new_layer.is_empty();
        tile.layers[layer_index] = new_layer;

        match (was_empty, is_empty) {
            (true, false) => chunk.tile_layer_count += 1,
            (false, true) => chunk.tile_layer_count -= 1,
            _ => {}
        }

        self.mark_dirty(position, layer_index);
        self.remove_chunk_if_empty(chunk_position);
        Ok(())
    }

    /// Clears all layers between `start_index` and `end_index` (inclusive
    /// on both ends). If `end_index` reaches the end of the tile's layer
    /// vector, the layers are truncated away; otherwise they're replaced
    /// with empty layers.
    ///
    /// Returns true if any non-empty layer was cleared.
    pub fn clear_layers(
        &mut self,
        position: TilePosition,
        start_index: usize,
        end_index: usize,
    ) -> Result<bool, MapError> {
        if !self.tile_extent.contains(position) {
            return Err(MapError::OutOfBounds(position.x, position.y, position.z));
        }
        debug_assert!(start_index <= end_index);

        let chunk_position = position.chunk_position();
        let Some(chunk) = self.chunks.get_mut(&chunk_position) else {
            return Ok(false);
        };

        let (offset_x, offset_y) = position.chunk_offset();
        let tile = chunk.tile_mut(offset_x, offset_y);
        if start_index >= tile.layers.len() {
            return Ok(false);
        }

        let end_index = end_index.min(tile.layers.len() - 1);
        let mut cleared_count = 0u16;
        for layer in &tile.layers[start_index..=end_index] {
            if !layer.is_empty() {
                cleared_count += 1;
            }
        }

        if end_index == tile.layers.len() - 1 {
            tile.layers.truncate(start_index);
        } else {
            for layer in &mut tile.layers[start_index..=end_index] {
                *layer = TileLayer::empty();
            }
        }

        chunk.tile_layer_count -= cleared_count;
        if cleared_count > 0 {
            self.mark_dirty(position, start_index);
        }
        self.remove_chunk_if_empty(chunk_position);
        Ok(cleared_count > 0)
    }

    /// Clears every layer in the given tile.
    pub fn clear_tile(&mut self, position: TilePosition) -> Result<bool, MapError> {
        self.clear_layers(position, 0, usize::MAX - 1)
    }

    /// Clears layers between the given indices in every tile of the extent.
    pub fn clear_extent_layers(
        &mut self,
        extent: TileExtent,
        start_index: usize,
        end_index: usize,
    ) -> Result<bool, MapError> {
        let mut any_cleared = false;
        for position in extent.intersection(&self.tile_extent).iter().collect::<Vec<_>>() {
            any_cleared |= self.clear_layers(position, start_index, end_index)?;
        }
        Ok(any_cleared)
    }

    /// Clears every layer in every tile of the extent.
    pub fn clear_extent(&mut self, extent: TileExtent) -> Result<bool, MapError> {
        self.clear_extent_layers(extent, 0, usize::MAX - 1)
    }

    /// Clears all tile map state, leaving an empty map.
    pub fn clear(&mut self) {
        self.chunks.clear();
        self.dirty_tiles.clear();
    }

    /// Takes the set of tiles changed since the last call, mapped to the
    /// lowest changed layer index of each.
    pub fn take_dirty_tiles(&mut self) -> HashMap<TilePosition, usize> {
        std::mem::take(&mut self.dirty_tiles)
    }

    /// Pushes the world-space collision boxes of every tile layer within
    /// the extent into `out`.
    pub fn collect_collision_boxes(&self, extent: TileExtent, out: &mut Vec<BoundingBox>) {
        for position in extent.intersection(&self.tile_extent).iter() {
            if let Ok(tile) = self.tile(position) {
                out.extend(tile.collision_boxes().copied());
            }
        }
    }

    pub fn sprite_data(&self) -> &Arc<SpriteData> {
        &self.sprite_data
    }

    fn mark_dirty(&mut self, position: TilePosition, layer_index: usize) {
        if self.track_dirty {
            self.dirty_tiles
                .entry(position)
                .and_modify(|lowest| *lowest = (*lowest).min(layer_index))
                .or_insert(layer_index);
        }
    }

    fn remove_chunk_if_empty(&mut self, position: ChunkPosition) {
        if let Some(chunk) = self.chunks.get(&position) {
            if chunk.tile_layer_count == 0 {
                self.chunks.remove(&position);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sprite::Sprite;
    use glam::Vec3;

    fn test_sprite_data() -> Arc<SpriteData> {
        let bounds = BoundingBox::new(Vec3::ZERO, Vec3::new(32.0, 32.0, 32.0));
        Arc::new(SpriteData::new(vec![
            Sprite {
                numeric_id: 1,
                layer_kind: TileLayerKind::Floor,
                wall_type: WallType::None,
                collision_enabled: false,
                model_bounds: BoundingBox::default(),
            },
            Sprite {
                numeric_id: 2,
                layer_kind: TileLayerKind::Wall,
                wall_type: WallType::West,
                collision_enabled: true,
                model_bounds: bounds,
            },
            Sprite {
                numeric_id: 3,
                layer_kind: TileLayerKind::Object,
                wall_type: WallType::None,
                collision_enabled: false,
                model_bounds: bounds,
            },
        ]))
    }

    fn test_map() -> TileMap {
        TileMap::new(ChunkExtent::from_map_lengths(4, 4, 1), test_sprite_data(), true)
    }

    #[test]
    fn chunks_created_lazily_and_deleted_when_empty() {
        let mut map = test_map();
        assert_eq!(map.chunk_count(), 0);

        let pos = TilePosition::new(3, 4, 0);
        map.set_layer(pos, 0, 1).unwrap();
        assert_eq!(map.chunk_count(), 1);
        assert_eq!(map.tile(pos).unwrap().layer_count(), 1);

        map.clear_tile(pos).unwrap();
        assert_eq!(map.chunk_count(), 0);
        assert!(map.tile(pos).unwrap().is_empty());
    }

    #[test]
    fn set_layer_extends_with_empty_layers() {
        let mut map = test_map();
        let pos = TilePosition::new(0, 0, 0);
        map.set_layer(pos, 3, 3).unwrap();

        let tile = map.tile(pos).unwrap();
        assert_eq!(tile.layers.len(), 4);
        assert!(tile.layers[0].is_empty());
        assert!(tile.layers[2].is_empty());
        assert_eq!(tile.layers[3].sprite_id, 3);
        assert_eq!(tile.layer_count(), 1);
    }

    #[test]
    fn collision_bounds_follow_tile_origin() {
        let mut map = test_map();
        let pos = TilePosition::new(1, 1, 0);
        map.set_layer(pos, 1, 2).unwrap();

        let tile = map.tile(pos).unwrap();
        let bounds = tile.layers[1].world_bounds.unwrap();
        assert_eq!(bounds.min, Vec3::new(32.0, 32.0, 0.0));
        assert_eq!(bounds.max, Vec3::new(64.0, 64.0, 32.0));
    }

    #[test]
    fn floors_never_collide() {
        let mut map = test_map();
        let pos = TilePosition::new(0, 0, 0);
        map.set_layer(pos, 0, 1).unwrap();
        assert!(map.tile(pos).unwrap().layers[0].world_bounds.is_none());
    }

    #[test]
    fn out_of_bounds_rejected() {
        let mut map = test_map();
        let outside = TilePosition::new(1000, 0, 0);
        assert_eq!(
            map.set_layer(outside, 0, 1),
            Err(MapError::OutOfBounds(1000, 0, 0))
        );
        assert!(map.tile(outside).is_err());
    }

    #[test]
    fn unknown_sprite_rejected() {
        let mut map = test_map();
        assert_eq!(
            map.set_layer(TilePosition::new(0, 0, 0), 0, 99),
            Err(MapError::UnknownSprite(99))
        );
    }

    #[test]
    fn clear_layers_truncates_at_end_and_blanks_in_middle() {
        let mut map = test_map();
        let pos = TilePosition::new(0, 0, 0);
        map.set_layer(pos, 0, 1).unwrap();
        map.set_layer(pos, 1, 3).unwrap();
        map.set_layer(pos, 2, 3).unwrap();

        // Middle clear replaces with an empty layer.
        map.clear_layers(pos, 1, 1).unwrap();
        assert_eq!(map.tile(pos).unwrap().layers.len(), 3);
        assert!(map.tile(pos).unwrap().layers[1].is_empty());

        // Clearing through the end truncates.
        map.clear_layers(pos, 1, 5).unwrap();
        assert_eq!(map.tile(pos).unwrap().layers.len(), 1);
    }

    #[test]
    fn dirty_tiles_record_lowest_changed_layer() {
        let mut map = test_map();
        let pos = TilePosition::new(2, 2, 0);
        map.set_layer(pos, 2, 3).unwrap();
        map.set_layer(pos, 0, 1).unwrap();

        let dirty = map.take_dirty_tiles();
        assert_eq!(dirty.get(&pos), Some(&0));
        assert!(map.take_dirty_tiles().is_empty());
    }

    #[test]
    fn wall_layer_cap_enforced() {
        let mut map = test_map();
        let pos = TilePosition::new(0, 0, 0);
        map.set_layer(pos, 1, 2).unwrap();
        map.set_layer(pos, 2, 2).unwrap();
        assert_eq!(map.set_layer(pos, 3, 2), Err(MapError::TooManyWalls));
    }
}
