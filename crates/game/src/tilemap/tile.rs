use serde::{Deserialize, Serialize};

use crate::bounding_box::BoundingBox;
use crate::sprite::NULL_SPRITE_ID;

/// The kinds of layers that a tile supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum TileLayerKind {
    Floor = 0,
    /// Rugs, flowers, puddles, etc.
    FloorCovering = 1,
    Wall = 2,
    Object = 3,
}

impl TileLayerKind {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Floor),
            1 => Some(Self::FloorCovering),
            2 => Some(Self::Wall),
            3 => Some(Self::Object),
            _ => None,
        }
    }
}

/// The pieces of the modular wall system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum WallType {
    West = 0,
    North = 1,
    /// A column that fills the corner on the tile southeast of a N/W pair.
    NorthWestGapFill = 2,
    /// A 3/4 north wall placed on the same tile as a west wall.
    NorthEastGapFill = 3,
    None = 4,
}

impl WallType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::West),
            1 => Some(Self::North),
            2 => Some(Self::NorthWestGapFill),
            3 => Some(Self::NorthEastGapFill),
            4 => Some(Self::None),
            _ => None,
        }
    }

    pub fn none() -> Self {
        Self::None
    }
}

/// A sprite placed on one of a tile's layers.
#[derive(Debug, Clone, PartialEq)]
pub struct TileLayer {
    pub kind: TileLayerKind,

    /// The sprite in this slot, or `NULL_SPRITE_ID` for an empty layer.
    pub sprite_id: i32,

    /// Only meaningful for Wall layers.
    pub wall_type: WallType,

    /// If the sprite has collision enabled, its model bounds moved to the
    /// tile's world position. Tiles don't move, so this is calculated once
    /// at insertion.
    pub world_bounds: Option<BoundingBox>,
}

impl TileLayer {
    pub fn empty() -> Self {
        Self {
            kind: TileLayerKind::Floor,
            sprite_id: NULL_SPRITE_ID,
            wall_type: WallType::None,
            world_bounds: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.sprite_id == NULL_SPRITE_ID
    }
}

impl Default for TileLayer {
    fn default() -> Self {
        Self::empty()
    }
}

/// A single tile: an ordered stack of sprite layers, bottom to top.
///
/// Layer index 0 is the floor slot. Tiles contain no logic; anything on a
/// tile that needs behavior must have a system act upon it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Tile {
    pub layers: Vec<TileLayer>,
}

impl Tile {
    /// The number of non-empty layers in this tile.
    pub fn layer_count(&self) -> usize {
        self.layers.iter().filter(|layer| !layer.is_empty()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.iter().all(TileLayer::is_empty)
    }

    pub fn wall_count(&self) -> usize {
        self.layers
            .iter()
            .filter(|layer| !layer.is_empty() && layer.kind == TileLayerKind::Wall)
            .count()
    }

    /// World-space collision boxes contributed by this tile's layers.
    pub fn collision_boxes(&self) -> impl Iterator<Item = &BoundingBox> {
        self.layers
            .iter()
            .filter_map(|layer| layer.world_bounds.as_ref())
    }
}
