//! The core component set, plus the standard replicated-type registry.
//!
//! Project-specific components can be appended to the registry after the
//! core set; their type indices must stay stable across both ends of a
//! connection.

use glam::Vec3;

use crate::bounding_box::BoundingBox;
use crate::entity::{replicated_type, ComponentRegistry, ReplicatedTypeInfo};
use crate::input::Input;
use crate::net::wire::{Decode, Encode, WireError};

/// World-space position.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Position(pub Vec3);

impl Encode for Position {
    fn encode(&self, buf: &mut Vec<u8>) {
        self.0.encode(buf);
    }
}

impl Decode for Position {
    fn decode(r: &mut &[u8]) -> Result<Self, WireError> {
        Ok(Position(Vec3::decode(r)?))
    }
}

/// Snapshot of `Position` at the start of the tick. The renderer lerps
/// between this and `Position` using the tick progress fraction.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PreviousPosition(pub Vec3);

/// Derived movement state.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Movement {
    pub velocity: Vec3,
    pub is_falling: bool,
}

impl Encode for Movement {
    fn encode(&self, buf: &mut Vec<u8>) {
        self.velocity.encode(buf);
        self.is_falling.encode(buf);
    }
}

impl Decode for Movement {
    fn decode(r: &mut &[u8]) -> Result<Self, WireError> {
        Ok(Movement {
            velocity: Vec3::decode(r)?,
            is_falling: bool::decode(r)?,
        })
    }
}

/// Multipliers applied by the movement table. Replicated so that clients
/// predict with the same numbers the server simulates with.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MovementModifiers {
    pub speed_modifier: f32,
}

impl Default for MovementModifiers {
    fn default() -> Self {
        Self { speed_modifier: 1.0 }
    }
}

impl Encode for MovementModifiers {
    fn encode(&self, buf: &mut Vec<u8>) {
        self.speed_modifier.encode(buf);
    }
}

impl Decode for MovementModifiers {
    fn decode(r: &mut &[u8]) -> Result<Self, WireError> {
        Ok(MovementModifiers {
            speed_modifier: f32::decode(r)?,
        })
    }
}

/// The direction an entity is facing. Sprite-based rendering locks facing
/// to 8 directions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(i8)]
pub enum Direction {
    SouthWest = -4,
    #[default]
    South = -3,
    SouthEast = -2,
    West = -1,
    /// No inputs, or inputs canceling each other out.
    None = 0,
    East = 1,
    NorthWest = 2,
    North = 3,
    NorthEast = 4,
}

impl Direction {
    pub fn from_i8(value: i8) -> Option<Self> {
        match value {
            -4 => Some(Self::SouthWest),
            -3 => Some(Self::South),
            -2 => Some(Self::SouthEast),
            -1 => Some(Self::West),
            0 => Some(Self::None),
            1 => Some(Self::East),
            2 => Some(Self::NorthWest),
            3 => Some(Self::North),
            4 => Some(Self::NorthEast),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rotation {
    pub direction: Direction,
}

impl Encode for Rotation {
    fn encode(&self, buf: &mut Vec<u8>) {
        (self.direction as i8).encode(buf);
    }
}

impl Decode for Rotation {
    fn decode(r: &mut &[u8]) -> Result<Self, WireError> {
        Direction::from_i8(i8::decode(r)?)
            .map(|direction| Rotation { direction })
            .ok_or(WireError::InvalidValue("rotation"))
    }
}

/// An entity's current sprite-set selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AnimationState {
    /// The type of sprite set the entity uses. Opaque to the core beyond
    /// equality; 0 means none.
    pub sprite_set_type: u8,
    pub sprite_set_id: u16,
    pub sprite_index: u8,
}

impl Encode for AnimationState {
    fn encode(&self, buf: &mut Vec<u8>) {
        self.sprite_set_type.encode(buf);
        self.sprite_set_id.encode(buf);
        self.sprite_index.encode(buf);
    }
}

impl Decode for AnimationState {
    fn decode(r: &mut &[u8]) -> Result<Self, WireError> {
        Ok(AnimationState {
            sprite_set_type: u8::decode(r)?,
            sprite_set_id: u16::decode(r)?,
            sprite_index: u8::decode(r)?,
        })
    }
}

/// The collision model used for entities that don't carry their own
/// bounds: half a tile's footprint, one tile tall.
pub const DEFAULT_MODEL_BOUNDS: BoundingBox = BoundingBox {
    min: Vec3::ZERO,
    max: Vec3::new(16.0, 16.0, 32.0),
};

/// Collision bounds. `world_bounds` always equals `model_bounds` moved to
/// the entity's `Position`; the movement system keeps them in sync.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Collision {
    pub model_bounds: BoundingBox,
    pub world_bounds: BoundingBox,
}

impl Collision {
    pub fn new(model_bounds: BoundingBox, position: Vec3) -> Self {
        Self {
            model_bounds,
            world_bounds: model_bounds.model_to_world_centered(position),
        }
    }
}

/// Stable type indices for the core replicated component set.
pub mod type_index {
    pub const POSITION: u8 = 0;
    pub const ROTATION: u8 = 1;
    pub const ANIMATION_STATE: u8 = 2;
    pub const INPUT: u8 = 3;
    pub const MOVEMENT: u8 = 4;
    pub const MOVEMENT_MODIFIERS: u8 = 5;
}

/// The core replicated types, in index order. Projects append their own
/// types after these.
pub fn core_replicated_types() -> Vec<ReplicatedTypeInfo> {
    vec![
        replicated_type::<Position>(type_index::POSITION, "position"),
        replicated_type::<Rotation>(type_index::ROTATION, "rotation"),
        replicated_type::<AnimationState>(type_index::ANIMATION_STATE, "animation_state"),
        replicated_type::<Input>(type_index::INPUT, "input"),
        replicated_type::<Movement>(type_index::MOVEMENT, "movement"),
        replicated_type::<MovementModifiers>(
            type_index::MOVEMENT_MODIFIERS,
            "movement_modifiers",
        ),
    ]
}

/// The registry the server simulation uses: core types, with the movement
/// trigger set (position, input, modifiers) observed for the movement-sync
/// path and rotation/animation state observed for component sync.
pub fn server_registry() -> ComponentRegistry {
    ComponentRegistry::new(
        core_replicated_types(),
        vec![
            type_index::POSITION,
            type_index::ROTATION,
            type_index::ANIMATION_STATE,
            type_index::INPUT,
            type_index::MOVEMENT_MODIFIERS,
        ],
    )
}

/// The registry the client uses: same types, nothing observed.
pub fn client_registry() -> ComponentRegistry {
    ComponentRegistry::new(core_replicated_types(), Vec::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rotation_wire_round_trip() {
        let mut buf = Vec::new();
        Rotation { direction: Direction::NorthEast }.encode(&mut buf);
        let mut slice = buf.as_slice();
        let decoded = Rotation::decode(&mut slice).unwrap();
        assert_eq!(decoded.direction, Direction::NorthEast);
    }

    #[test]
    fn rotation_rejects_out_of_range() {
        let mut slice = &[0x7Fu8][..];
        assert!(Rotation::decode(&mut slice).is_err());
    }

    #[test]
    fn collision_bounds_follow_position() {
        let model = BoundingBox::new(Vec3::ZERO, Vec3::new(16.0, 16.0, 32.0));
        let collision = Collision::new(model, Vec3::new(100.0, 100.0, 0.0));
        assert_eq!(collision.world_bounds.min, Vec3::new(92.0, 92.0, 0.0));
        assert_eq!(collision.world_bounds.max, Vec3::new(108.0, 108.0, 32.0));
    }
}
