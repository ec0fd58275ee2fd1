//! Player prediction and reconciliation.
//!
//! Every tick the player moves immediately under its own input. When an
//! authoritative update arrives for some past tick, we rewind to the
//! server's state and replay the remembered inputs from that tick forward.

use tessel::components::{Collision, Movement, Position, PreviousPosition, Rotation};
use tessel::config::SIM_TICK_TIMESTEP_S;
use tessel::input::InputHistory;
use tessel::movement::{move_entity, MoveState};
use tessel::net::messages::MovementUpdate;
use tessel::EntityId;

use super::world::World;

pub fn update(world: &mut World, updates: Vec<MovementUpdate>, current_tick: u32) {
    let Some(player) = world.player_entity else {
        return;
    };

    if let Some(position) = world.entity_store.get::<Position>(player).copied() {
        let _ = world
            .entity_store
            .insert(player, PreviousPosition(position.0));
    }

    let current_tick_was_authoritative =
        process_player_updates(world, player, updates, current_tick);

    // This tick's own movement, under the input recorded this tick. If an
    // update for this exact tick just landed, its state already includes
    // this tick's movement.
    if !current_tick_was_authoritative {
        move_player_entity(world, player, 0);
    }
}

/// Applies queued authoritative updates, then replays remembered inputs
/// for the ticks between the update and now. Returns true if one of the
/// applied updates was for the current tick itself.
fn process_player_updates(
    world: &mut World,
    player: EntityId,
    updates: Vec<MovementUpdate>,
    current_tick: u32,
) -> bool {
    let mut current_tick_was_authoritative = false;
    for update in updates {
        let Some(state) = update
            .movement_states
            .iter()
            .find(|state| state.entity == player)
            .copied()
        else {
            continue;
        };

        if update.tick > current_tick {
            log::error!(
                "received player update from the future: message tick {} > current {}",
                update.tick,
                current_tick
            );
            continue;
        }
        let tick_diff = (current_tick - update.tick) as usize;

        let history_capacity = world
            .entity_store
            .get::<InputHistory>(player)
            .map(InputHistory::capacity)
            .unwrap_or(0);
        let can_replay = tick_diff < history_capacity;
        if !can_replay {
            // Too far back to replay; accept the authoritative state as-is
            // and let prediction restart from it.
            log::error!(
                "player update {tick_diff} ticks old exceeds input history \
                 ({history_capacity}); accepting server state without replay"
            );
        }

        let store = &mut world.entity_store;
        if can_replay {
            // The server may have seen different input for that tick than
            // we remember (e.g. it zeroed a late input); replay with its
            // view.
            if let Some(history) = store.get_mut::<InputHistory>(player) {
                history.set(tick_diff, state.input.flags);
            }
        }

        let _ = store.insert(player, Position(state.position));
        let _ = store.insert(player, state.movement);
        let _ = store.insert(player, state.modifiers);
        if let Some(collision) = store.get::<Collision>(player).copied() {
            let _ = store.insert(
                player,
                Collision::new(collision.model_bounds, state.position),
            );
        }

        if can_replay {
            // Replay the ticks after the update, oldest first. The current
            // tick isn't replayed here; update() runs it afterward.
            for ticks_back in (1..tick_diff.max(1)).rev() {
                move_player_entity(world, player, ticks_back);
            }
        }
        if tick_diff == 0 {
            current_tick_was_authoritative = true;
        }
    }
    current_tick_was_authoritative
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tessel::components::MovementModifiers;
    use tessel::input::{Input, InputFlags};
    use tessel::net::messages::MovementState;
    use tessel::tilemap::ChunkExtent;
    use tessel::{EntityId, SpriteData, TileMap};

    fn world_with_player() -> (World, EntityId) {
        let sprite_data = Arc::new(SpriteData::default());
        let tile_map = TileMap::new(
            ChunkExtent::from_map_lengths(16, 16, 1),
            Arc::clone(&sprite_data),
            false,
        );
        let mut world = World::new(tile_map, sprite_data);
        let player = EntityId::from_bits(1);
        crate::sim::component_update::attach_player_components(
            &mut world,
            player,
            glam::Vec3::new(32.0, 32.0, 0.0),
        );
        (world, player)
    }

    fn authoritative_update(tick: u32, player: EntityId, position: glam::Vec3) -> MovementUpdate {
        MovementUpdate {
            tick,
            movement_states: vec![MovementState {
                entity: player,
                input: Input::new(InputFlags::EAST),
                position,
                movement: Movement::default(),
                modifiers: MovementModifiers::default(),
            }],
        }
    }

    #[test]
    fn replaying_the_same_update_twice_lands_on_the_same_position() {
        let (mut world, player) = world_with_player();

        // A few ticks of eastward input in the history.
        for _ in 0..5 {
            if let Some(history) = world.entity_store.get_mut::<InputHistory>(player) {
                history.push(InputFlags::EAST);
            }
        }

        let update = authoritative_update(10, player, glam::Vec3::new(40.0, 32.0, 0.0));
        process_player_updates(&mut world, player, vec![update.clone()], 14);
        let first = world.entity_store.get::<Position>(player).unwrap().0;

        process_player_updates(&mut world, player, vec![update], 14);
        let second = world.entity_store.get::<Position>(player).unwrap().0;

        assert_eq!(first, second);
    }

    #[test]
    fn updates_from_the_future_are_rejected() {
        let (mut world, player) = world_with_player();
        let start = world.entity_store.get::<Position>(player).unwrap().0;

        let update = authoritative_update(20, player, glam::Vec3::new(99.0, 99.0, 0.0));
        process_player_updates(&mut world, player, vec![update], 10);

        assert_eq!(world.entity_store.get::<Position>(player).unwrap().0, start);
    }

    #[test]
    fn too_old_updates_are_accepted_without_replay() {
        let (mut world, player) = world_with_player();
        let capacity = world
            .entity_store
            .get::<InputHistory>(player)
            .unwrap()
            .capacity() as u32;

        let server_position = glam::Vec3::new(64.0, 64.0, 0.0);
        let update = authoritative_update(0, player, server_position);
        process_player_updates(&mut world, player, vec![update], capacity + 5);

        // Authoritative state adopted as-is.
        assert_eq!(
            world.entity_store.get::<Position>(player).unwrap().0,
            server_position
        );
    }
}

/// Runs the shared movement step for the player using the input recorded
/// `ticks_back` ticks ago.
fn move_player_entity(world: &mut World, player: EntityId, ticks_back: usize) {
    let store = &world.entity_store;
    let (Some(history), Some(position), Some(movement), Some(rotation), Some(collision)) = (
        store.get::<InputHistory>(player),
        store.get::<Position>(player).copied(),
        store.get::<Movement>(player).copied(),
        store.get::<Rotation>(player).copied(),
        store.get::<Collision>(player).copied(),
    ) else {
        return;
    };
    let Some(input) = history.get(ticks_back) else {
        return;
    };

    let mut state = MoveState {
        position,
        movement,
        rotation,
        collision,
    };
    let moved = move_entity(
        player,
        input,
        &mut state,
        &world.entity_store,
        &world.tile_map,
        &world.entity_locator,
        SIM_TICK_TIMESTEP_S as f32,
    );

    let store = &mut world.entity_store;
    if let Some(slot) = store.get_mut::<Position>(player) {
        *slot = state.position;
    }
    if let Some(slot) = store.get_mut::<Movement>(player) {
        *slot = state.movement;
    }
    if let Some(slot) = store.get_mut::<Rotation>(player) {
        *slot = state.rotation;
    }
    if let Some(slot) = store.get_mut::<Collision>(player) {
        *slot = state.collision;
    }
    if moved {
        world
            .entity_locator
            .set_entity_location(player, state.collision.world_bounds);
    }
}
