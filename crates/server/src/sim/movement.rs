//! Moves every entity that has inputs, resolving collisions against the
//! tile map and nearby entities.

use tessel::components::{Collision, Movement, Position, PreviousPosition, Rotation};
use tessel::config::SIM_TICK_TIMESTEP_S;
use tessel::input::Input;
use tessel::movement::{move_entity, MoveState};

use super::world::World;

pub fn update(world: &mut World) {
    let movers = world.entity_store.entities_with::<Input>();

    for entity in movers {
        let store = &world.entity_store;
        let (Some(input), Some(position), Some(movement), Some(rotation), Some(collision)) = (
            store.get::<Input>(entity).copied(),
            store.get::<Position>(entity).copied(),
            store.get::<Movement>(entity).copied(),
            store.get::<Rotation>(entity).copied(),
            store.get::<Collision>(entity).copied(),
        ) else {
            continue;
        };

        let _ = world
            .entity_store
            .insert(entity, PreviousPosition(position.0));

        let mut state = MoveState {
            position,
            movement,
            rotation,
            collision,
        };
        let moved = move_entity(
            entity,
            input.flags,
            &mut state,
            &world.entity_store,
            &world.tile_map,
            &world.entity_locator,
            SIM_TICK_TIMESTEP_S as f32,
        );

        // Write back through get_mut: movement results replicate through
        // the movement-sync path, not through component observers.
        let store = &mut world.entity_store;
        if let Some(slot) = store.get_mut::<Position>(entity) {
            *slot = state.position;
        }
        if let Some(slot) = store.get_mut::<Movement>(entity) {
            *slot = state.movement;
        }
        if let Some(slot) = store.get_mut::<Rotation>(entity) {
            *slot = state.rotation;
        }
        if let Some(slot) = store.get_mut::<Collision>(entity) {
            *slot = state.collision;
        }

        if moved {
            world
                .entity_locator
                .set_entity_location(entity, state.collision.world_bounds);
        }
    }
}
