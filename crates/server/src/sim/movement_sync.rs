//! Sends movement state to clients when it changes.
//!
//! Watches the replace-path observers for inputs, movement modifiers, and
//! positions (teleports). Between input changes, clients simulate remote
//! entities forward themselves, so nothing needs to be sent.

use tessel::components::{Movement, MovementModifiers, Position};
use tessel::input::Input;
use tessel::net::messages::{MovementState, MovementUpdate};
use tessel::type_index;
use tessel::EntityId;

use crate::network::Network;

use super::world::{ClientSimData, World};

pub fn update(world: &mut World, network: &Network, current_tick: u32) {
    let mut updated: Vec<EntityId> = Vec::new();
    for index in [
        type_index::INPUT,
        type_index::MOVEMENT_MODIFIERS,
        type_index::POSITION,
    ] {
        updated.extend(world.entity_store.drain_observed(index));
    }
    updated.sort_unstable();
    updated.dedup();
    updated.retain(|&entity| {
        world.entity_store.is_alive(entity) && world.entity_store.contains::<Movement>(entity)
    });

    if updated.is_empty() {
        return;
    }

    for (client_entity, net_id) in world.clients() {
        let Some(data) = world.entity_store.get::<ClientSimData>(client_entity) else {
            continue;
        };

        // Relevant entities: updated ones in this client's AOI, plus the
        // client's own entity (it's not in its own AOI list, but it needs
        // its authoritative state for reconciliation).
        let mut entities_to_send: Vec<EntityId> = intersect_sorted(&updated, &data.entities_in_aoi);
        if updated.binary_search(&client_entity).is_ok() {
            entities_to_send.push(client_entity);
            entities_to_send.sort_unstable();
        }

        if entities_to_send.is_empty() {
            continue;
        }

        let movement_states = entities_to_send
            .iter()
            .filter_map(|&entity| {
                let store = &world.entity_store;
                Some(MovementState {
                    entity,
                    input: store.get::<Input>(entity).copied()?,
                    position: store.get::<Position>(entity).copied()?.0,
                    movement: store.get::<Movement>(entity).copied()?,
                    modifiers: store.get::<MovementModifiers>(entity).copied()?,
                })
            })
            .collect();

        network.send(
            net_id,
            &MovementUpdate {
                tick: current_tick,
                movement_states,
            },
            current_tick,
        );
    }
}

fn intersect_sorted(a: &[EntityId], b: &[EntityId]) -> Vec<EntityId> {
    let mut result = Vec::new();
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        match a[i].cmp(&b[j]) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                result.push(a[i]);
                i += 1;
                j += 1;
            }
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sorted_intersection() {
        let a: Vec<EntityId> = [1u32, 3, 5, 7].iter().map(|&b| EntityId::from_bits(b)).collect();
        let b: Vec<EntityId> = [2u32, 3, 7, 9].iter().map(|&b| EntityId::from_bits(b)).collect();
        let result = intersect_sorted(&a, &b);
        assert_eq!(
            result,
            vec![EntityId::from_bits(3), EntityId::from_bits(7)]
        );
    }
}
