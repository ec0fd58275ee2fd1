use std::path::PathBuf;

use glam::Vec3;

/// Where newly connected client entities are placed.
#[derive(Debug, Clone)]
pub enum SpawnStrategy {
    /// Every client spawns at the same point.
    Fixed { point: Vec3 },
    /// Clients spawn at a random point inside a rectangle.
    Random { min: Vec3, max: Vec3, seed: u64 },
    /// Clients fill a grid of spawn slots; when a group fills up, the
    /// anchor advances by the group offset.
    Grouped {
        anchor: Vec3,
        columns: u32,
        rows: u32,
        padding_x: f32,
        padding_y: f32,
        group_offset_x: f32,
        group_offset_y: f32,
    },
}

impl Default for SpawnStrategy {
    fn default() -> Self {
        Self::Fixed {
            point: Vec3::new(32.0, 32.0, 0.0),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub max_clients: usize,

    /// Path the tile map is loaded from at startup and saved to
    /// periodically. `None` starts with an empty map and disables saving.
    pub map_path: Option<PathBuf>,
    pub map_save_period_s: f64,

    pub spawn_strategy: SpawnStrategy,

    /// Size of the map created when no map file exists yet, in chunks.
    pub default_map_chunks: (u16, u16, u16),
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".into(),
            port: 41499,
            max_clients: 100,
            map_path: Some(PathBuf::from("TileMap.bin")),
            map_save_period_s: 60.0 * 15.0,
            spawn_strategy: SpawnStrategy::default(),
            default_map_chunks: (16, 16, 1),
        }
    }
}
