pub mod bounding_box;
pub mod components;
pub mod config;
pub mod entity;
pub mod input;
pub mod movement;
pub mod net;
pub mod sprite;
pub mod tick;
pub mod tilemap;

pub use bounding_box::BoundingBox;
pub use components::{
    client_registry, core_replicated_types, server_registry, type_index, AnimationState,
    Collision, Direction, Movement, MovementModifiers, Position, PreviousPosition, Rotation,
    DEFAULT_MODEL_BOUNDS,
};
pub use entity::{
    replicated_type, ComponentRegistry, EntityId, EntityIdPool, EntityLocator, EntityStore,
    ReplicatedComponentList, ReplicatedTypeInfo, StoreError,
};
pub use input::{Input, InputFlags, InputHistory};
pub use net::{NetworkId, WireError};
pub use sprite::{Sprite, SpriteData, NULL_SPRITE_ID};
pub use tick::TickTimer;
pub use tilemap::{
    ChunkExtent, ChunkPosition, MapError, Tile, TileExtent, TileLayer, TileLayerKind, TileMap,
    TilePosition, WallType,
};
