//! Applies requested animation-state changes.

use crate::network::InboundQueues;

use super::world::{ClientSimData, World};

pub fn update(world: &mut World, queues: &InboundQueues) {
    while let Ok((net_id, request)) = queues.sprite_changes.try_recv() {
        let entity = request.entity;
        if !world.entity_store.is_alive(entity) {
            continue;
        }
        if world.entity_store.contains::<ClientSimData>(entity)
            && world.client_entity(net_id) != Some(entity)
        {
            log::warn!("client {net_id} tried to change sprites on client entity {entity}");
            continue;
        }

        // Replace (not mutate) so the animation-state observer picks it up
        // and component sync broadcasts it.
        let _ = world.entity_store.replace(entity, request.animation_state);
    }
}
