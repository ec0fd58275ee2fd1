//! Compile-time tunables shared between the server and client.
//!
//! Runtime-configurable values (port, max clients, spawn strategy) live in
//! the server and client config structs; everything here must match between
//! both ends of a connection.

/// The time between simulation ticks, in seconds.
pub const SIM_TICK_TIMESTEP_S: f64 = 1.0 / 30.0;

/// How far past the timestep a single loop iteration can run before we log
/// a warning about the simulation falling behind.
pub const SIM_DELAYED_TIME_S: f64 = 0.001;

/// The time between server network ticks, in seconds. The network tick
/// drains send queues and recalculates client tick adjustments.
pub const SERVER_NETWORK_TICK_TIMESTEP_S: f64 = SIM_TICK_TIMESTEP_S;

/// The width of a chunk, in tiles.
pub const CHUNK_WIDTH: usize = 16;

/// The number of tiles in a chunk.
pub const CHUNK_TILE_COUNT: usize = CHUNK_WIDTH * CHUNK_WIDTH;

/// The width of a tile, in world units.
pub const TILE_WORLD_WIDTH: f32 = 32.0;

/// The height of a tile (one Z level), in world units.
pub const TILE_WORLD_HEIGHT: f32 = 32.0;

/// The radius around a client entity within which other entities are
/// replicated to it, in world units.
pub const AOI_RADIUS: f32 = 256.0;

/// Message batches whose payload exceeds this size, in bytes, are sent
/// compressed.
pub const BATCH_COMPRESSION_THRESHOLD: usize = 256;

/// How long we'll go without receiving data from a peer before considering
/// it timed out, in seconds.
pub const CLIENT_TIMEOUT_S: f64 = 1.5;

/// How long the receive thread sleeps when no sockets had activity, in
/// milliseconds.
pub const INACTIVE_DELAY_TIME_MS: u64 = 1;

/// Base movement speed of an entity with no modifiers, in world units per
/// second.
pub const BASE_MOVEMENT_SPEED: f32 = 48.0;

/// Fall speed applied while an entity has no ground under it, in world
/// units per second.
pub const FALL_SPEED: f32 = 140.0;

/// The number of past ticks of input that the client remembers for replay.
/// Must cover the worst-case round trip plus server batching delay,
/// expressed in ticks.
pub const INPUT_HISTORY_LENGTH: usize = 32;

/// How many ticks behind its own tick the client replicates NPCs at.
pub const DEFAULT_PAST_TICK_OFFSET: u32 = 10;
