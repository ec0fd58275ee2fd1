//! The typed messages that cross the wire.
//!
//! Every message is framed as `u8 type | u16 size | payload` (see
//! `batch.rs`). Payload layouts are little-endian and fixed; changing any
//! field order or width is a protocol break.

use glam::Vec3;

use crate::components::{AnimationState, Movement, MovementModifiers};
use crate::entity::EntityId;
use crate::input::Input;
use crate::tilemap::snapshot::ChunkSnapshot;
use crate::tilemap::{ChunkPosition, TileExtent, TilePosition};

use super::wire::{Decode, Encode, WireError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    Heartbeat = 0,
    ConnectionResponse = 1,
    InputChangeRequest = 2,
    MovementUpdate = 3,
    ComponentUpdate = 4,
    ComponentUpdateRequest = 5,
    EntityInit = 6,
    EntityDelete = 7,
    ChunkUpdateRequest = 8,
    ChunkUpdate = 9,
    TileUpdateRequest = 10,
    TileUpdate = 11,
    ExplicitConfirmation = 12,
    SpriteChangeRequest = 13,
    SpriteChange = 14,
    InitScriptRequest = 15,
    InitScriptResponse = 16,
}

impl MessageType {
    pub fn from_u8(value: u8) -> Result<Self, WireError> {
        match value {
            0 => Ok(Self::Heartbeat),
            1 => Ok(Self::ConnectionResponse),
            2 => Ok(Self::InputChangeRequest),
            3 => Ok(Self::MovementUpdate),
            4 => Ok(Self::ComponentUpdate),
            5 => Ok(Self::ComponentUpdateRequest),
            6 => Ok(Self::EntityInit),
            7 => Ok(Self::EntityDelete),
            8 => Ok(Self::ChunkUpdateRequest),
            9 => Ok(Self::ChunkUpdate),
            10 => Ok(Self::TileUpdateRequest),
            11 => Ok(Self::TileUpdate),
            12 => Ok(Self::ExplicitConfirmation),
            13 => Ok(Self::SpriteChangeRequest),
            14 => Ok(Self::SpriteChange),
            15 => Ok(Self::InitScriptRequest),
            16 => Ok(Self::InitScriptResponse),
            other => Err(WireError::UnknownMessageType(other)),
        }
    }
}

/// A typed wire message.
pub trait Message: Encode + Decode {
    const MESSAGE_TYPE: MessageType;
}

macro_rules! message {
    ($(#[$meta:meta])* $name:ident, $msg_type:ident, { $($field:ident: $ty:ty),* $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq)]
        pub struct $name {
            $(pub $field: $ty,)*
        }

        impl Encode for $name {
            fn encode(&self, buf: &mut Vec<u8>) {
                $(self.$field.encode(buf);)*
            }
        }

        impl Decode for $name {
            fn decode(r: &mut &[u8]) -> Result<Self, WireError> {
                Ok(Self {
                    $($field: <$ty>::decode(r)?,)*
                })
            }
        }

        impl Message for $name {
            const MESSAGE_TYPE: MessageType = MessageType::$msg_type;
        }
    };
}

message!(Heartbeat, Heartbeat, { tick: u32 });

message!(ConnectionResponse, ConnectionResponse, {
    entity: EntityId,
    tick: u32,
    spawn_position: Vec3,
    map_tile_extent: TileExtent,
});

message!(
    /// Client -> server: "my input bits changed on this tick".
    InputChangeRequest, InputChangeRequest, {
    tick: u32,
    entity: EntityId,
    input: Input,
});

/// Movement state for one entity within a `MovementUpdate`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MovementState {
    pub entity: EntityId,
    pub input: Input,
    pub position: Vec3,
    pub movement: Movement,
    pub modifiers: MovementModifiers,
}

impl Encode for MovementState {
    fn encode(&self, buf: &mut Vec<u8>) {
        self.entity.encode(buf);
        self.input.encode(buf);
        self.position.encode(buf);
        self.movement.encode(buf);
        self.modifiers.encode(buf);
    }
}

impl Decode for MovementState {
    fn decode(r: &mut &[u8]) -> Result<Self, WireError> {
        Ok(MovementState {
            entity: EntityId::decode(r)?,
            input: Input::decode(r)?,
            position: Vec3::decode(r)?,
            movement: Movement::decode(r)?,
            modifiers: MovementModifiers::decode(r)?,
        })
    }
}

message!(MovementUpdate, MovementUpdate, {
    tick: u32,
    movement_states: Vec<MovementState>,
});

/// The serialized, type-tagged form of a single component.
#[derive(Debug, Clone, PartialEq)]
pub struct SerializedComponent {
    pub type_index: u8,
    pub data: Vec<u8>,
}

impl Encode for SerializedComponent {
    fn encode(&self, buf: &mut Vec<u8>) {
        self.type_index.encode(buf);
        self.data.encode(buf);
    }
}

impl Decode for SerializedComponent {
    fn decode(r: &mut &[u8]) -> Result<Self, WireError> {
        Ok(SerializedComponent {
            type_index: u8::decode(r)?,
            data: Vec::<u8>::decode(r)?,
        })
    }
}

message!(ComponentUpdate, ComponentUpdate, {
    tick: u32,
    entity: EntityId,
    components: Vec<SerializedComponent>,
});

message!(
    /// Client -> server: request to update (or create, when `entity` is
    /// all ones) an entity's components. Subject to server-side
    /// validation.
    ComponentUpdateRequest, ComponentUpdateRequest, {
    entity: EntityId,
    components: Vec<SerializedComponent>,
});

message!(EntityInit, EntityInit, {
    entity: EntityId,
    components: Vec<SerializedComponent>,
});

message!(EntityDelete, EntityDelete, { entity: EntityId });

message!(ChunkUpdateRequest, ChunkUpdateRequest, {
    chunks: Vec<ChunkPosition>,
});

message!(ChunkUpdate, ChunkUpdate, {
    snapshots: Vec<ChunkSnapshot>,
});

message!(TileUpdateRequest, TileUpdateRequest, {
    position: TilePosition,
    layer_index: u8,
    sprite_id: i32,
});

message!(TileUpdate, TileUpdate, {
    position: TilePosition,
    layer_index: u8,
    sprite_id: i32,
});

message!(
    /// "I processed this tick and have nothing to send you."
    ExplicitConfirmation, ExplicitConfirmation, { tick: u32 });

message!(SpriteChangeRequest, SpriteChangeRequest, {
    entity: EntityId,
    animation_state: AnimationState,
});

message!(SpriteChange, SpriteChange, {
    tick: u32,
    entity: EntityId,
    animation_state: AnimationState,
});

message!(InitScriptRequest, InitScriptRequest, { entity: EntityId });

message!(
    /// Scripts are opaque text to the core; they're interpreted by the
    /// embedding project's scripting layer.
    InitScriptResponse, InitScriptResponse, {
    entity: EntityId,
    script: String,
});

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::InputFlags;

    fn round_trip<T: Message + PartialEq + std::fmt::Debug>(message: T) {
        let mut buf = Vec::new();
        message.encode(&mut buf);
        let mut slice = buf.as_slice();
        assert_eq!(T::decode(&mut slice).unwrap(), message);
        assert!(slice.is_empty());
    }

    #[test]
    fn movement_update_round_trip() {
        round_trip(MovementUpdate {
            tick: 1234,
            movement_states: vec![MovementState {
                entity: EntityId::from_bits(7),
                input: Input::new(InputFlags::EAST | InputFlags::NORTH),
                position: Vec3::new(32.0, 32.0, 0.0),
                movement: Movement {
                    velocity: Vec3::new(48.0, 0.0, 0.0),
                    is_falling: false,
                },
                modifiers: MovementModifiers::default(),
            }],
        });
    }

    #[test]
    fn component_update_round_trip() {
        round_trip(ComponentUpdate {
            tick: 9,
            entity: EntityId::from_bits(42),
            components: vec![SerializedComponent {
                type_index: 2,
                data: vec![1, 0, 3, 0, 0],
            }],
        });
    }

    #[test]
    fn connection_response_round_trip() {
        round_trip(ConnectionResponse {
            entity: EntityId::from_bits(1),
            tick: 100,
            spawn_position: Vec3::new(32.0, 32.0, 0.0),
            map_tile_extent: TileExtent::new(-32, -32, 0, 64, 64, 1),
        });
    }

    #[test]
    fn unknown_message_type_errors() {
        assert_eq!(
            MessageType::from_u8(200),
            Err(WireError::UnknownMessageType(200))
        );
    }
}
