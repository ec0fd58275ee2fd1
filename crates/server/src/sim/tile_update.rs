//! Applies client tile edit requests to the authoritative map.
//!
//! Validation is the map's own: out-of-extent coordinates, unknown
//! sprites, and layer-kind violations all reject the edit and degrade to a
//! no-op for the requester. Accepted edits mark the tile dirty, which the
//! chunk-streaming phase picks up later in the same tick.

use crate::network::InboundQueues;

use super::world::World;

pub fn update(world: &mut World, queues: &InboundQueues) {
    while let Ok((net_id, request)) = queues.tile_updates.try_recv() {
        match world.tile_map.set_layer(
            request.position,
            request.layer_index as usize,
            request.sprite_id,
        ) {
            Ok(()) => {}
            Err(error) => {
                log::debug!(
                    "rejected tile update from client {net_id} at ({}, {}, {}): {error}",
                    request.position.x,
                    request.position.y,
                    request.position.z
                );
            }
        }
    }
}
