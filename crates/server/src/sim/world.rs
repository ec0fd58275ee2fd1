use std::collections::HashMap;
use std::sync::Arc;

use tessel::bounding_box::BoundingBox;
use tessel::net::NetworkId;
use tessel::{EntityId, EntityLocator, EntityStore, SpriteData, TileMap};

/// The collision model used for client entities.
pub const PLAYER_MODEL_BOUNDS: BoundingBox = tessel::components::DEFAULT_MODEL_BOUNDS;

/// Server-side bookkeeping for a client's entity.
#[derive(Debug, Clone, Default)]
pub struct ClientSimData {
    pub net_id: NetworkId,

    /// The entities currently inside this client's area of interest,
    /// sorted ascending. Doesn't include the client's own entity.
    pub entities_in_aoi: Vec<EntityId>,
}

pub struct World {
    pub entity_store: EntityStore,
    pub tile_map: TileMap,
    pub entity_locator: EntityLocator,
    pub sprite_data: Arc<SpriteData>,

    /// Maps network ids to their client entities.
    pub net_id_map: HashMap<NetworkId, EntityId>,

    /// Init scripts attached to non-client entities, served on request.
    /// Opaque text as far as the core is concerned.
    pub init_scripts: HashMap<EntityId, String>,
}

impl World {
    pub fn new(tile_map: TileMap, sprite_data: Arc<SpriteData>) -> Self {
        Self {
            entity_store: EntityStore::new(tessel::server_registry()),
            tile_map,
            entity_locator: EntityLocator::new(),
            sprite_data,
            net_id_map: HashMap::new(),
            init_scripts: HashMap::new(),
        }
    }

    pub fn client_entity(&self, net_id: NetworkId) -> Option<EntityId> {
        self.net_id_map.get(&net_id).copied()
    }

    /// Client entities in a stable order, with their net ids.
    pub fn clients(&self) -> Vec<(EntityId, NetworkId)> {
        self.entity_store
            .entities_with::<ClientSimData>()
            .into_iter()
            .filter_map(|entity| {
                self.entity_store
                    .get::<ClientSimData>(entity)
                    .map(|data| (entity, data.net_id))
            })
            .collect()
    }
}
