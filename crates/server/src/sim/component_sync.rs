//! Broadcasts observed component replacements to interested clients.
//!
//! One `ComponentUpdate` per updated entity per tick, holding every
//! observed component of that entity that changed. Sent to every client
//! whose AOI contains the entity, and to the entity's own client when it
//! is one.

use std::collections::BTreeMap;

use tessel::net::messages::{ComponentUpdate, SerializedComponent};
use tessel::type_index;
use tessel::EntityId;

use crate::network::Network;

use super::world::{ClientSimData, World};

/// The component types this system watches. Movement-trigger types are
/// handled by movement sync instead.
const OBSERVED_SYNC_TYPES: [u8; 2] = [type_index::ROTATION, type_index::ANIMATION_STATE];

pub fn update(world: &mut World, network: &Network, current_tick: u32) {
    let mut updates: BTreeMap<EntityId, Vec<u8>> = BTreeMap::new();
    for type_index in OBSERVED_SYNC_TYPES {
        for entity in world.entity_store.drain_observed(type_index) {
            if world.entity_store.is_alive(entity) {
                updates.entry(entity).or_default().push(type_index);
            }
        }
    }

    for (entity, type_indices) in updates {
        let components: Vec<SerializedComponent> = type_indices
            .iter()
            .filter_map(|&type_index| {
                world.entity_store.serialize_component(entity, type_index)
            })
            .collect();
        if components.is_empty() {
            continue;
        }

        let update = ComponentUpdate {
            tick: current_tick,
            entity,
            components,
        };

        // One serialization, shared across every interested client.
        let recipients: Vec<_> = world
            .clients()
            .into_iter()
            .filter_map(|(client_entity, net_id)| {
                let data = world.entity_store.get::<ClientSimData>(client_entity)?;
                let interested = client_entity == entity
                    || data.entities_in_aoi.binary_search(&entity).is_ok();
                interested.then_some(net_id)
            })
            .collect();
        network.send_to_many(&recipients, &update, current_tick);
    }
}
