use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::bounding_box::BoundingBox;
use crate::tilemap::{TileLayerKind, WallType};

/// The ID used to indicate "no sprite in this slot".
pub const NULL_SPRITE_ID: i32 = -1;

/// Static data for a single sprite. Rendering-related fields (sheet, texture
/// extent) live with the UI layer; the core only cares about identity,
/// collision, and which tile layer kind the sprite's set belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sprite {
    /// This sprite's unique numeric ID.
    pub numeric_id: i32,

    /// The tile layer kind that this sprite's set belongs to.
    pub layer_kind: TileLayerKind,

    /// For Wall sprites, which piece of the modular wall system this is.
    #[serde(default = "WallType::none")]
    pub wall_type: WallType,

    /// Whether this sprite's model bounds contribute collision when placed
    /// in the world. Floors never collide, regardless of this flag.
    pub collision_enabled: bool,

    /// Model-space bounds, relative to the sprite's placement origin.
    pub model_bounds: BoundingBox,
}

/// The sprite table, keyed by numeric ID.
///
/// Constructed explicitly by the embedding application (typically from a
/// deserialized asset table) and passed by reference to everything that
/// needs sprite lookups.
#[derive(Debug, Default)]
pub struct SpriteData {
    sprites: HashMap<i32, Sprite>,
}

impl SpriteData {
    pub fn new(sprites: Vec<Sprite>) -> Self {
        Self {
            sprites: sprites
                .into_iter()
                .map(|sprite| (sprite.numeric_id, sprite))
                .collect(),
        }
    }

    pub fn get(&self, numeric_id: i32) -> Option<&Sprite> {
        self.sprites.get(&numeric_id)
    }

    pub fn contains(&self, numeric_id: i32) -> bool {
        self.sprites.contains_key(&numeric_id)
    }

    pub fn len(&self) -> usize {
        self.sprites.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sprites.is_empty()
    }
}
