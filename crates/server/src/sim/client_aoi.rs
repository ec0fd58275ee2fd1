//! Maintains each client's area-of-interest list.
//!
//! Entities that entered a client's AOI get an `EntityInit` carrying the
//! entity's currently-attached replicated components; entities that left
//! get an `EntityDelete`. The lists are kept sorted so the sync systems
//! can intersect them cheaply.

use tessel::components::Position;
use tessel::config::AOI_RADIUS;
use tessel::net::messages::{EntityDelete, EntityInit};

use crate::network::Network;

use super::world::{ClientSimData, World};

pub fn update(world: &mut World, network: &Network, current_tick: u32) {
    for (client_entity, net_id) in world.clients() {
        let Some(position) = world.entity_store.get::<Position>(client_entity) else {
            log::error!("fatal: client entity {client_entity} has no position");
            continue;
        };

        let mut current_aoi = world
            .entity_locator
            .get_entities_in_radius(position.0, AOI_RADIUS);
        current_aoi.retain(|&entity| entity != client_entity);

        let Some(data) = world.entity_store.get::<ClientSimData>(client_entity) else {
            continue;
        };
        let previous_aoi = &data.entities_in_aoi;

        // Both lists are sorted; single-pass diff.
        let mut entered = Vec::new();
        let mut left = Vec::new();
        let (mut i, mut j) = (0, 0);
        while i < previous_aoi.len() || j < current_aoi.len() {
            match (previous_aoi.get(i), current_aoi.get(j)) {
                (Some(&old), Some(&new)) if old == new => {
                    i += 1;
                    j += 1;
                }
                (Some(&old), Some(&new)) if old < new => {
                    left.push(old);
                    i += 1;
                }
                (Some(_), Some(&new)) => {
                    entered.push(new);
                    j += 1;
                }
                (Some(&old), None) => {
                    left.push(old);
                    i += 1;
                }
                (None, Some(&new)) => {
                    entered.push(new);
                    j += 1;
                }
                (None, None) => unreachable!(),
            }
        }

        for entity in left {
            network.send(net_id, &EntityDelete { entity }, current_tick);
        }
        for &entity in &entered {
            let components = world.entity_store.serialize_entity(entity);
            network.send(
                net_id,
                &EntityInit { entity, components },
                current_tick,
            );
        }

        if let Some(data) = world.entity_store.get_mut::<ClientSimData>(client_entity) {
            data.entities_in_aoi = current_aoi;
        }
    }
}
