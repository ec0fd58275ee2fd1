use std::sync::Arc;

use tessel::{EntityId, EntityLocator, EntityStore, SpriteData, TileMap};

/// The client's mirror of the server world, plus the locally-predicted
/// player entity.
pub struct World {
    pub entity_store: EntityStore,
    pub tile_map: TileMap,
    pub entity_locator: EntityLocator,
    pub sprite_data: Arc<SpriteData>,

    /// Our own entity, assigned by the connection response.
    pub player_entity: Option<EntityId>,
}

impl World {
    pub fn new(tile_map: TileMap, sprite_data: Arc<SpriteData>) -> Self {
        Self {
            entity_store: EntityStore::new(tessel::client_registry()),
            tile_map,
            entity_locator: EntityLocator::new(),
            sprite_data,
            player_entity: None,
        }
    }

    pub fn is_player(&self, entity: EntityId) -> bool {
        self.player_entity == Some(entity)
    }
}
