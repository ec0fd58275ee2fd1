//! Non-client entity lifetime and edits, driven by component update
//! requests from build mode or scripts.
//!
//! The request protocol:
//! - `entity == EntityId::from_bits(u32::MAX)`: create a new entity from
//!   the request's components.
//! - components empty: destroy the entity.
//! - otherwise: replace the named components on the entity.
//!
//! Clients may not edit other clients' entities; a request targeting one
//! degrades to a no-op on the offender's connection.

use tessel::components::{
    Collision, Movement, MovementModifiers, Position, PreviousPosition, Rotation,
};
use tessel::input::Input;
use tessel::net::messages::ComponentUpdateRequest;
use tessel::net::NetworkId;
use tessel::{EntityId, StoreError};

use crate::network::{InboundQueues, Network};

use super::client_connection::notify_entity_removed;
use super::world::{ClientSimData, World, PLAYER_MODEL_BOUNDS};

/// The sentinel entity id that means "create a new entity".
pub const CREATE_ENTITY: EntityId = EntityId::from_bits(u32::MAX);

pub fn update(world: &mut World, network: &Network, queues: &InboundQueues, current_tick: u32) {
    while let Ok((net_id, request)) = queues.component_requests.try_recv() {
        if request.entity == CREATE_ENTITY {
            create_entity(world, net_id, &request);
        } else if request.components.is_empty() {
            destroy_entity(world, network, net_id, request.entity, current_tick);
        } else {
            apply_components(world, net_id, &request);
        }
    }
}

fn create_entity(world: &mut World, net_id: NetworkId, request: &ComponentUpdateRequest) {
    let entity = world.entity_store.create();
    let store = &mut world.entity_store;

    let _ = store.insert(entity, Position::default());
    let _ = store.insert(entity, PreviousPosition::default());
    let _ = store.insert(entity, Input::default());
    let _ = store.insert(entity, Movement::default());
    let _ = store.insert(entity, MovementModifiers::default());
    let _ = store.insert(entity, Rotation::default());

    apply_serialized(world, entity, request);

    let position = world
        .entity_store
        .get::<Position>(entity)
        .copied()
        .unwrap_or_default();
    let collision = Collision::new(PLAYER_MODEL_BOUNDS, position.0);
    let _ = world.entity_store.insert(entity, collision);
    world
        .entity_locator
        .set_entity_location(entity, collision.world_bounds);

    log::info!("client {net_id} created entity {entity}");
}

fn destroy_entity(
    world: &mut World,
    network: &Network,
    net_id: NetworkId,
    entity: EntityId,
    current_tick: u32,
) {
    if !world.entity_store.is_alive(entity) {
        return;
    }
    if world.entity_store.contains::<ClientSimData>(entity) {
        log::warn!("client {net_id} tried to destroy a client entity {entity}");
        return;
    }

    world.entity_locator.remove_entity(entity);
    world.init_scripts.remove(&entity);
    let _ = world.entity_store.destroy(entity);
    notify_entity_removed(world, network, entity, current_tick);
    log::info!("client {net_id} destroyed entity {entity}");
}

fn apply_components(world: &mut World, net_id: NetworkId, request: &ComponentUpdateRequest) {
    let entity = request.entity;
    if !world.entity_store.is_alive(entity) {
        return;
    }

    // Clients can edit NCEs and themselves, never another client.
    if world.entity_store.contains::<ClientSimData>(entity)
        && world.client_entity(net_id) != Some(entity)
    {
        log::warn!("client {net_id} tried to edit client entity {entity}");
        return;
    }

    apply_serialized(world, entity, request);

    // A component edit may have moved the entity; keep collision bounds
    // and the locator in sync with the new position.
    if let (Some(position), Some(collision)) = (
        world.entity_store.get::<Position>(entity).copied(),
        world.entity_store.get::<Collision>(entity).copied(),
    ) {
        let updated = Collision::new(collision.model_bounds, position.0);
        let _ = world.entity_store.insert(entity, updated);
        world
            .entity_locator
            .set_entity_location(entity, updated.world_bounds);
    }
}

fn apply_serialized(world: &mut World, entity: EntityId, request: &ComponentUpdateRequest) {
    for component in &request.components {
        match world.entity_store.apply_serialized_component(entity, component) {
            Ok(()) => {}
            Err(StoreError::BadComponentData { type_name, source }) => {
                // Discard just this component; the rest of the request
                // still applies.
                log::warn!("discarding bad {type_name} component for {entity}: {source}");
            }
            Err(error) => {
                log::warn!("component request for {entity} rejected: {error}");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_sentinel_is_all_ones() {
        assert_eq!(CREATE_ENTITY.to_bits(), u32::MAX);
    }
}
