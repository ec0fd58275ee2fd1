//! Replicates non-player entities at a fixed offset into the past.
//!
//! NPCs are never predicted: we only apply ticks the server has confirmed,
//! `past_tick_offset` ticks behind our own tick. A confirmed tick without
//! an update means "no movement changes happened"; NPCs still advance under
//! their last known inputs. When data hasn't arrived yet, NPCs stall until
//! it does.

use std::collections::VecDeque;

use tessel::components::{Collision, Movement, Position, PreviousPosition, Rotation};
use tessel::config::SIM_TICK_TIMESTEP_S;
use tessel::input::Input;
use tessel::movement::{move_entity, MoveState};
use tessel::net::messages::MovementUpdate;
use tessel::EntityId;

use crate::network::NpcUpdateEvent;

use super::world::World;

struct NpcTickRecord {
    tick: u32,
    /// None means the tick was confirmed with no movement changes.
    update: Option<MovementUpdate>,
}

pub struct NpcMovementSystem {
    /// Confirmed per-tick records, oldest first, contiguous in tick.
    tick_records: VecDeque<NpcTickRecord>,
    last_received_tick: u32,
    last_processed_tick: u32,
    /// How far into the past we replicate. Adjusted alongside tick-skew
    /// corrections so the replication point doesn't jump.
    past_tick_offset: i64,
    started: bool,
}

impl NpcMovementSystem {
    pub fn new(past_tick_offset: u32) -> Self {
        Self {
            tick_records: VecDeque::new(),
            last_received_tick: 0,
            last_processed_tick: 0,
            past_tick_offset: past_tick_offset as i64,
            started: false,
        }
    }

    /// Keeps the replication point continuous across a tick-skew
    /// correction: when our tick jumps by `adjustment`, the offset moves
    /// with it.
    pub fn apply_tick_adjustment(&mut self, adjustment: i8) {
        self.past_tick_offset = (self.past_tick_offset + adjustment as i64).max(1);
    }

    /// The newest server tick whose NPC state has been applied locally.
    pub fn last_processed_tick(&self) -> u32 {
        self.last_processed_tick
    }

    pub fn update(
        &mut self,
        world: &mut World,
        events: impl Iterator<Item = NpcUpdateEvent>,
        current_tick: u32,
    ) {
        for event in events {
            match event {
                NpcUpdateEvent::Update(update) => self.handle_update(update),
                NpcUpdateEvent::Confirmation(tick) => self.handle_confirmation(tick),
            }
        }

        let target_tick = current_tick as i64 - self.past_tick_offset;
        if target_tick < 0 {
            return;
        }
        let target_tick = target_tick as u32;

        // Apply every confirmed tick up to the target. If data hasn't
        // arrived, NPCs visibly stall until it does.
        while let Some(front) = self.tick_records.front() {
            if front.tick > target_tick {
                break;
            }
            let record = match self.tick_records.pop_front() {
                Some(record) => record,
                None => break,
            };

            move_all_npcs(world);
            if let Some(update) = &record.update {
                apply_update_message(world, update);
            }
            self.last_processed_tick = record.tick;
        }
    }

    fn handle_update(&mut self, update: MovementUpdate) {
        let tick = update.tick;
        if self.started && tick <= self.last_received_tick {
            log::warn!(
                "dropped stale npc update for tick {tick} (last received {})",
                self.last_received_tick
            );
            return;
        }

        // An update for tick T implicitly confirms (lastReceived, T-1] as
        // change-free.
        self.fill_gap_to(tick);
        self.tick_records.push_back(NpcTickRecord {
            tick,
            update: Some(update),
        });
        self.last_received_tick = tick;
        self.started = true;
    }

    fn handle_confirmation(&mut self, tick: u32) {
        if self.started && tick <= self.last_received_tick {
            return;
        }
        self.fill_gap_to(tick);
        self.tick_records.push_back(NpcTickRecord { tick, update: None });
        self.last_received_tick = tick;
        self.started = true;
    }

    fn fill_gap_to(&mut self, tick: u32) {
        if !self.started {
            return;
        }
        for gap_tick in (self.last_received_tick + 1)..tick {
            self.tick_records.push_back(NpcTickRecord {
                tick: gap_tick,
                update: None,
            });
        }
    }
}

/// Advances every known NPC one tick under its current input.
fn move_all_npcs(world: &mut World) {
    let npcs: Vec<EntityId> = world
        .entity_store
        .entities_with::<Input>()
        .into_iter()
        .filter(|&entity| !world.is_player(entity))
        .collect();

    for entity in npcs {
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

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tessel::components::MovementModifiers;
    use tessel::input::InputFlags;
    use tessel::net::messages::MovementState;
    use tessel::tilemap::ChunkExtent;
    use tessel::{SpriteData, TileMap};

    fn test_world() -> World {
        let sprite_data = Arc::new(SpriteData::default());
        let tile_map = TileMap::new(
            ChunkExtent::from_map_lengths(16, 16, 1),
            Arc::clone(&sprite_data),
            false,
        );
        World::new(tile_map, sprite_data)
    }

    fn spawn_npc(world: &mut World, position: glam::Vec3) -> EntityId {
        let entity = EntityId::from_bits(42);
        world.entity_store.create_with_id(entity).unwrap();
        let store = &mut world.entity_store;
        let _ = store.insert(entity, Position(position));
        let _ = store.insert(entity, PreviousPosition(position));
        let _ = store.insert(entity, Input::default());
        let _ = store.insert(entity, Movement::default());
        let _ = store.insert(entity, MovementModifiers::default());
        let _ = store.insert(entity, Rotation::default());
        let _ = store.insert(
            entity,
            Collision::new(tessel::components::DEFAULT_MODEL_BOUNDS, position),
        );
        entity
    }

    fn update_for(tick: u32, entity: EntityId, input: InputFlags, position: glam::Vec3) -> MovementUpdate {
        MovementUpdate {
            tick,
            movement_states: vec![MovementState {
                entity,
                input: Input::new(input),
                position,
                movement: Movement::default(),
                modifiers: MovementModifiers::default(),
            }],
        }
    }

    #[test]
    fn npcs_stall_until_their_tick_is_confirmed() {
        let mut world = test_world();
        let start = glam::Vec3::new(64.0, 64.0, 0.0);
        let npc = spawn_npc(&mut world, start);

        let mut system = NpcMovementSystem::new(5);

        // An update for tick 10 sets the NPC running east, but our tick
        // is too close behind: nothing is applied yet.
        let events = vec![NpcUpdateEvent::Update(update_for(
            10,
            npc,
            InputFlags::EAST,
            start,
        ))];
        system.update(&mut world, events.into_iter(), 10);
        assert_eq!(world.entity_store.get::<Position>(npc).unwrap().0, start);

        // Once our tick reaches 15, tick 10 is exactly offset ticks back
        // and gets applied.
        system.update(&mut world, std::iter::empty(), 15);
        let position = world.entity_store.get::<Position>(npc).unwrap().0;
        assert_eq!(position, start);
        assert_eq!(
            world.entity_store.get::<Input>(npc).unwrap().flags,
            InputFlags::EAST
        );

        // Confirmations for later ticks let the NPC advance under its
        // held input, one tick per confirmed tick.
        system.update(
            &mut world,
            vec![NpcUpdateEvent::Confirmation(13)].into_iter(),
            18,
        );
        let position = world.entity_store.get::<Position>(npc).unwrap().0;
        let expected =
            start.x + 3.0 * tessel::config::BASE_MOVEMENT_SPEED * SIM_TICK_TIMESTEP_S as f32;
        assert!((position.x - expected).abs() < 1e-3);
    }

    #[test]
    fn updates_fill_gaps_with_no_change_ticks() {
        let mut world = test_world();
        let start = glam::Vec3::new(64.0, 64.0, 0.0);
        let npc = spawn_npc(&mut world, start);

        let mut system = NpcMovementSystem::new(2);

        // First update at tick 4, second at tick 8: ticks 5..=7 are
        // implicitly confirmed as change-free.
        let events = vec![
            NpcUpdateEvent::Update(update_for(4, npc, InputFlags::EAST, start)),
            NpcUpdateEvent::Update(update_for(
                8,
                npc,
                InputFlags::empty(),
                glam::Vec3::new(70.4, 64.0, 0.0),
            )),
        ];
        system.update(&mut world, events.into_iter(), 10);

        // All of ticks 4..=8 were applied: the authoritative position from
        // tick 8 wins, and the input is cleared.
        let position = world.entity_store.get::<Position>(npc).unwrap().0;
        assert!((position.x - 70.4).abs() < 1e-3);
        assert!(world.entity_store.get::<Input>(npc).unwrap().flags.is_empty());
    }

    #[test]
    fn stale_updates_are_dropped() {
        let mut world = test_world();
        let npc = spawn_npc(&mut world, glam::Vec3::new(64.0, 64.0, 0.0));

        let mut system = NpcMovementSystem::new(2);
        let events = vec![
            NpcUpdateEvent::Confirmation(10),
            NpcUpdateEvent::Update(update_for(
                9,
                npc,
                InputFlags::EAST,
                glam::Vec3::new(0.0, 0.0, 0.0),
            )),
        ];
        system.update(&mut world, events.into_iter(), 5);

        // The stale update for tick 9 never lands.
        assert!(world.entity_store.get::<Input>(npc).unwrap().flags.is_empty());
    }
}

/// Overwrites NPC state with the authoritative values from an update.
fn apply_update_message(world: &mut World, update: &MovementUpdate) {
    for state in &update.movement_states {
        let entity = state.entity;
        if world.is_player(entity) {
            continue;
        }
        if !world.entity_store.is_alive(entity) {
            // The init for this entity may still be queued; it'll carry
            // current state when it lands.
            continue;
        }

        let store = &mut world.entity_store;
        let _ = store.insert(entity, state.input);
        let _ = store.insert(entity, Position(state.position));
        let _ = store.insert(entity, state.movement);
        let _ = store.insert(entity, state.modifiers);
        if let Some(collision) = store.get::<Collision>(entity).copied() {
            let updated = Collision::new(collision.model_bounds, state.position);
            let _ = store.insert(entity, updated);
            world
                .entity_locator
                .set_entity_location(entity, updated.world_bounds);
        }
    }
}
