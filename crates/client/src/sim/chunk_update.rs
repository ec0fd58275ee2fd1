//! Requests the chunks around the player and applies streamed snapshots.

use std::collections::HashSet;

use tessel::components::Position;
use tessel::config::{AOI_RADIUS, CHUNK_WIDTH, TILE_WORLD_WIDTH};
use tessel::net::messages::ChunkUpdateRequest;
use tessel::tilemap::ChunkPosition;

use crate::network::{InboundQueues, Network};

use super::world::World;

#[derive(Default)]
pub struct ChunkUpdateSystem {
    requested: HashSet<ChunkPosition>,
}

impl ChunkUpdateSystem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, world: &mut World, network: &Network, queues: &InboundQueues) {
        while let Ok(update) = queues.chunk_updates.try_recv() {
            for snapshot in &update.snapshots {
                if let Err(error) = world.tile_map.apply_chunk_snapshot(snapshot) {
                    log::warn!(
                        "couldn't apply chunk snapshot at ({}, {}, {}): {error}",
                        snapshot.position.x,
                        snapshot.position.y,
                        snapshot.position.z
                    );
                }
            }
        }

        self.request_nearby_chunks(world, network);
    }

    /// Asks the server for any in-range chunk we haven't requested yet.
    fn request_nearby_chunks(&mut self, world: &World, network: &Network) {
        let Some(player) = world.player_entity else {
            return;
        };
        let Some(position) = world.entity_store.get::<Position>(player) else {
            return;
        };

        let chunk_world_width = CHUNK_WIDTH as f32 * TILE_WORLD_WIDTH;
        let min_x = ((position.0.x - AOI_RADIUS) / chunk_world_width).floor() as i32;
        let min_y = ((position.0.y - AOI_RADIUS) / chunk_world_width).floor() as i32;
        let max_x = ((position.0.x + AOI_RADIUS) / chunk_world_width).floor() as i32;
        let max_y = ((position.0.y + AOI_RADIUS) / chunk_world_width).floor() as i32;

        let extent = world.tile_map.chunk_extent();
        let mut wanted = Vec::new();
        for y in min_y..=max_y {
            for x in min_x..=max_x {
                for z in extent.z..extent.z + extent.z_length {
                    let chunk = ChunkPosition::new(x, y, z);
                    if extent.contains(chunk) && self.requested.insert(chunk) {
                        wanted.push(chunk);
                    }
                }
            }
        }

        if !wanted.is_empty() {
            let _ = network.send(&ChunkUpdateRequest { chunks: wanted });
        }
    }
}
