//! Applies entity lifecycle and component state from the server.

use tessel::components::{Collision, Position, PreviousPosition, DEFAULT_MODEL_BOUNDS};
use tessel::input::InputHistory;
use tessel::{EntityId, StoreError};

use crate::network::InboundQueues;

use super::world::World;

pub fn update(world: &mut World, queues: &InboundQueues) {
    while let Ok(init) = queues.entity_inits.try_recv() {
        apply_entity_init(world, init.entity, &init.components);
    }

    while let Ok(delete) = queues.entity_deletes.try_recv() {
        let entity = delete.entity;
        if world.is_player(entity) {
            log::error!("fatal: server deleted our own player entity {entity}");
            continue;
        }
        if world.entity_store.is_alive(entity) {
            world.entity_locator.remove_entity(entity);
            let _ = world.entity_store.destroy(entity);
        }
    }

    while let Ok(update) = queues.component_updates.try_recv() {
        if !world.entity_store.is_alive(update.entity) {
            continue;
        }
        for component in &update.components {
            apply_component(world, update.entity, component);
        }
        refresh_collision(world, update.entity);
    }

    while let Ok(change) = queues.sprite_changes.try_recv() {
        if world.entity_store.is_alive(change.entity) {
            let _ = world
                .entity_store
                .replace(change.entity, change.animation_state);
        }
    }
}

fn apply_entity_init(
    world: &mut World,
    entity: EntityId,
    components: &[tessel::net::messages::SerializedComponent],
) {
    if world.entity_store.is_alive(entity) {
        // Re-entering our AOI; treat the init as a full refresh.
        for component in components {
            apply_component(world, entity, component);
        }
        refresh_collision(world, entity);
        return;
    }

    if world.entity_store.create_with_id(entity).is_err() {
        return;
    }
    for component in components {
        apply_component(world, entity, component);
    }

    let position = world
        .entity_store
        .get::<Position>(entity)
        .copied()
        .unwrap_or_default();
    let _ = world
        .entity_store
        .insert(entity, PreviousPosition(position.0));
    let collision = Collision::new(DEFAULT_MODEL_BOUNDS, position.0);
    let _ = world.entity_store.insert(entity, collision);
    world
        .entity_locator
        .set_entity_location(entity, collision.world_bounds);
}

fn apply_component(
    world: &mut World,
    entity: EntityId,
    component: &tessel::net::messages::SerializedComponent,
) {
    match world
        .entity_store
        .apply_serialized_component(entity, component)
    {
        Ok(()) => {}
        Err(StoreError::BadComponentData { type_name, source }) => {
            // One bad component doesn't invalidate the rest of the
            // message.
            log::warn!("discarding bad {type_name} component for {entity}: {source}");
        }
        Err(error) => {
            log::warn!("component update for {entity} rejected: {error}");
        }
    }
}

fn refresh_collision(world: &mut World, entity: EntityId) {
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

/// Attaches the player-only pieces to our assigned entity after a
/// connection response.
pub fn attach_player_components(world: &mut World, entity: EntityId, position: glam::Vec3) {
    use tessel::components::{AnimationState, Movement, MovementModifiers, Rotation};
    use tessel::input::Input;

    let store = &mut world.entity_store;
    let _ = store.create_with_id(entity);
    let _ = store.insert(entity, Position(position));
    let _ = store.insert(entity, PreviousPosition(position));
    let _ = store.insert(entity, Input::default());
    let _ = store.insert(entity, Movement::default());
    let _ = store.insert(entity, MovementModifiers::default());
    let _ = store.insert(entity, Rotation::default());
    let _ = store.insert(entity, AnimationState::default());
    let _ = store.insert(entity, InputHistory::default());

    let collision = Collision::new(DEFAULT_MODEL_BOUNDS, position);
    let _ = store.insert(entity, collision);
    world
        .entity_locator
        .set_entity_location(entity, collision.world_bounds);
    world.player_entity = Some(entity);
}
