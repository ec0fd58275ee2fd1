//! Streams chunk snapshots on request and pushes tile edits to clients
//! that can see them.
//!
//! Dirty-tile streaming sends, per changed tile, a clearing update at the
//! lowest changed layer followed by one update per non-empty layer above
//! it. The client applies a null-sprite update as "clear from this layer
//! up", and set-updates auto-extend with empty layers, so index gaps
//! reconstruct empty middle layers correctly.

use tessel::components::Position;
use tessel::config::{AOI_RADIUS, CHUNK_TILE_COUNT, CHUNK_WIDTH, TILE_WORLD_WIDTH};
use tessel::net::messages::{ChunkUpdate, TileUpdate};
use tessel::net::NetworkId;
use tessel::tilemap::snapshot::{ChunkSnapshot, TileSnapshot};
use tessel::tilemap::{ChunkPosition, TilePosition};
use tessel::NULL_SPRITE_ID;

use crate::network::{InboundQueues, Network};

use super::world::World;

/// Upper bound on chunks served per request message.
const MAX_CHUNKS_PER_REQUEST: usize = 64;

pub fn update(world: &mut World, network: &Network, queues: &InboundQueues, current_tick: u32) {
    serve_chunk_requests(world, network, queues);
    stream_dirty_tiles(world, network, current_tick);
}

fn serve_chunk_requests(world: &mut World, network: &Network, queues: &InboundQueues) {
    while let Ok((net_id, request)) = queues.chunk_requests.try_recv() {
        for &position in request.chunks.iter().take(MAX_CHUNKS_PER_REQUEST) {
            if !world.tile_map.chunk_extent().contains(position) {
                log::debug!(
                    "client {net_id} requested chunk outside the map: ({}, {}, {})",
                    position.x,
                    position.y,
                    position.z
                );
                continue;
            }
            let snapshot = world
                .tile_map
                .chunk_snapshot(position)
                .unwrap_or_else(|| empty_snapshot(position));

            // One snapshot per message keeps every update comfortably
            // under the batch size cap.
            network.send(
                net_id,
                &ChunkUpdate {
                    snapshots: vec![snapshot],
                },
                0,
            );
        }
    }
}

fn empty_snapshot(position: ChunkPosition) -> ChunkSnapshot {
    ChunkSnapshot {
        position,
        tile_layer_count: 0,
        tiles: vec![TileSnapshot::default(); CHUNK_TILE_COUNT],
    }
}

fn stream_dirty_tiles(world: &mut World, network: &Network, current_tick: u32) {
    let dirty_tiles = world.tile_map.take_dirty_tiles();
    if dirty_tiles.is_empty() {
        return;
    }

    // Deterministic send order.
    let mut dirty: Vec<(TilePosition, usize)> = dirty_tiles.into_iter().collect();
    dirty.sort_unstable_by_key(|(position, _)| (position.z, position.y, position.x));

    let clients = world.clients();

    for (position, lowest_layer) in dirty {
        let chunk_position = position.chunk_position();

        let recipients: Vec<NetworkId> = clients
            .iter()
            .filter_map(|&(client_entity, net_id)| {
                let client_position = world.entity_store.get::<Position>(client_entity)?;
                chunk_in_aoi(chunk_position, client_position.0).then_some(net_id)
            })
            .collect();
        if recipients.is_empty() {
            continue;
        }

        let mut updates = vec![TileUpdate {
            position,
            layer_index: lowest_layer as u8,
            sprite_id: NULL_SPRITE_ID,
        }];
        if let Ok(tile) = world.tile_map.tile(position) {
            for (layer_index, layer) in tile.layers.iter().enumerate().skip(lowest_layer) {
                if !layer.is_empty() {
                    updates.push(TileUpdate {
                        position,
                        layer_index: layer_index as u8,
                        sprite_id: layer.sprite_id,
                    });
                }
            }
        }

        for tile_update in &updates {
            network.send_to_many(&recipients, tile_update, current_tick);
        }
    }
}

/// Whether a chunk's world-space footprint intersects the AOI circle
/// around a client position.
fn chunk_in_aoi(chunk: ChunkPosition, client_position: glam::Vec3) -> bool {
    let chunk_world_width = CHUNK_WIDTH as f32 * TILE_WORLD_WIDTH;
    let min_x = chunk.x as f32 * chunk_world_width;
    let min_y = chunk.y as f32 * chunk_world_width;
    let max_x = min_x + chunk_world_width;
    let max_y = min_y + chunk_world_width;

    let closest_x = client_position.x.clamp(min_x, max_x);
    let closest_y = client_position.y.clamp(min_y, max_y);
    let dx = client_position.x - closest_x;
    let dy = client_position.y - closest_y;
    dx * dx + dy * dy <= AOI_RADIUS * AOI_RADIUS
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    #[test]
    fn chunk_aoi_test_uses_nearest_corner() {
        // Client standing at the origin: chunk (0, 0) definitely in AOI.
        assert!(chunk_in_aoi(
            ChunkPosition::new(0, 0, 0),
            Vec3::new(0.0, 0.0, 0.0)
        ));
        // A chunk far away is not.
        assert!(!chunk_in_aoi(
            ChunkPosition::new(10, 10, 0),
            Vec3::new(0.0, 0.0, 0.0)
        ));
    }
}
