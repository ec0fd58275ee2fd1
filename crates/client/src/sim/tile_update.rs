//! Applies streamed tile edits to the local map mirror.
//!
//! A null-sprite update means "clear from this layer to the top of the
//! tile"; a real sprite sets that layer (auto-extending with empty layers,
//! which is how empty middle layers are reconstructed).

use tessel::NULL_SPRITE_ID;

use crate::network::InboundQueues;

use super::world::World;

pub fn update(world: &mut World, queues: &InboundQueues) {
    while let Ok(tile_update) = queues.tile_updates.try_recv() {
        let position = tile_update.position;
        let layer_index = tile_update.layer_index as usize;

        let result = if tile_update.sprite_id == NULL_SPRITE_ID {
            world
                .tile_map
                .clear_layers(position, layer_index, usize::MAX - 1)
                .map(|_| ())
        } else {
            world
                .tile_map
                .set_layer(position, layer_index, tile_update.sprite_id)
        };

        if let Err(error) = result {
            log::warn!(
                "couldn't apply tile update at ({}, {}, {}): {error}",
                position.x,
                position.y,
                position.z
            );
        }
    }
}
