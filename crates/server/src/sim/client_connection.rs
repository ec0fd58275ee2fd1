//! Client entity lifetime: spawning on connect, teardown on disconnect.

use glam::Vec3;

use tessel::components::{
    AnimationState, Collision, Movement, MovementModifiers, Position, PreviousPosition, Rotation,
};
use tessel::input::Input;
use tessel::net::messages::{ConnectionResponse, EntityDelete};
use tessel::net::NetworkId;
use tessel::EntityId;

use crate::network::{ClientConnectionEvent, InboundQueues, Network};

use super::spawn::SpawnPointGenerator;
use super::world::{ClientSimData, World, PLAYER_MODEL_BOUNDS};

pub fn update(
    world: &mut World,
    network: &Network,
    queues: &InboundQueues,
    spawn: &mut SpawnPointGenerator,
    current_tick: u32,
) {
    while let Ok(event) = queues.connection_events.try_recv() {
        match event {
            ClientConnectionEvent::Connected(net_id) => {
                handle_connect(world, network, spawn, net_id, current_tick);
            }
            ClientConnectionEvent::Disconnected(net_id) => {
                handle_disconnect(world, network, net_id, current_tick);
            }
        }
    }
}

fn handle_connect(
    world: &mut World,
    network: &Network,
    spawn: &mut SpawnPointGenerator,
    net_id: NetworkId,
    current_tick: u32,
) {
    let spawn_position = spawn.next_spawn_point();
    let entity = world.entity_store.create();

    let store = &mut world.entity_store;
    let _ = store.insert(entity, Position(spawn_position));
    let _ = store.insert(entity, PreviousPosition(spawn_position));
    let _ = store.insert(entity, Input::default());
    let _ = store.insert(entity, Movement::default());
    let _ = store.insert(entity, MovementModifiers::default());
    let _ = store.insert(entity, Rotation::default());
    let _ = store.insert(entity, AnimationState::default());

    let collision = Collision::new(PLAYER_MODEL_BOUNDS, spawn_position);
    let _ = store.insert(entity, collision);
    let _ = store.insert(
        entity,
        ClientSimData {
            net_id,
            entities_in_aoi: Vec::new(),
        },
    );

    world
        .entity_locator
        .set_entity_location(entity, collision.world_bounds);
    world.net_id_map.insert(net_id, entity);

    log::info!("constructed entity {entity} for client {net_id}");

    network.send(
        net_id,
        &ConnectionResponse {
            entity,
            tick: current_tick,
            spawn_position,
            map_tile_extent: world.tile_map.tile_extent(),
        },
        current_tick,
    );
}

fn handle_disconnect(world: &mut World, network: &Network, net_id: NetworkId, current_tick: u32) {
    let Some(entity) = world.net_id_map.remove(&net_id) else {
        // Disconnected before phase 1 ever saw the connect; nothing to do.
        return;
    };

    world.entity_locator.remove_entity(entity);
    world.init_scripts.remove(&entity);
    if let Err(error) = world.entity_store.destroy(entity) {
        log::error!("fatal: client entity missing at disconnect: {error}");
    }
    log::info!("removed entity {entity} for disconnected client {net_id}");

    notify_entity_removed(world, network, entity, current_tick);
}

/// Tells every client that had `entity` in its AOI that it's gone, and
/// drops it from their lists.
pub fn notify_entity_removed(
    world: &mut World,
    network: &Network,
    entity: EntityId,
    current_tick: u32,
) {
    for (client_entity, net_id) in world.clients() {
        let Some(data) = world.entity_store.get_mut::<ClientSimData>(client_entity) else {
            continue;
        };
        if let Ok(index) = data.entities_in_aoi.binary_search(&entity) {
            data.entities_in_aoi.remove(index);
            network.send(net_id, &EntityDelete { entity }, current_tick);
        }
    }
}

/// Spawn position sanity check used when a strategy is configured from
/// CLI arguments.
pub fn spawn_in_map(world: &World, point: Vec3) -> bool {
    let extent = world.tile_map.tile_extent();
    let min_x = extent.x as f32 * tessel::config::TILE_WORLD_WIDTH;
    let min_y = extent.y as f32 * tessel::config::TILE_WORLD_WIDTH;
    let max_x = (extent.x + extent.x_length) as f32 * tessel::config::TILE_WORLD_WIDTH;
    let max_y = (extent.y + extent.y_length) as f32 * tessel::config::TILE_WORLD_WIDTH;
    point.x >= min_x && point.x <= max_x && point.y >= min_y && point.y <= max_y
}
