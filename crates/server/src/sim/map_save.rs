//! Periodic tile map persistence.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use tessel::tilemap::snapshot;

use super::world::World;

pub struct MapSaveSystem {
    map_path: Option<PathBuf>,
    save_period: Duration,
    last_save: Instant,
}

impl MapSaveSystem {
    pub fn new(map_path: Option<PathBuf>, save_period_s: f64) -> Self {
        Self {
            map_path,
            save_period: Duration::from_secs_f64(save_period_s),
            last_save: Instant::now(),
        }
    }

    pub fn update(&mut self, world: &World) {
        let Some(path) = &self.map_path else {
            return;
        };
        if self.last_save.elapsed() < self.save_period {
            return;
        }

        // A failed save logs and retries next period; the previous
        // snapshot on disk stays intact thanks to the temp-and-rename.
        match snapshot::save(&world.tile_map, path) {
            Ok(()) => log::info!("saved tile map to {}", path.display()),
            Err(error) => log::error!("failed to save tile map: {error}"),
        }
        self.last_save = Instant::now();
    }

    /// Saves immediately, regardless of the period. Used at shutdown.
    pub fn save_now(&mut self, world: &World) {
        if let Some(path) = &self.map_path {
            if let Err(error) = snapshot::save(&world.tile_map, path) {
                log::error!("failed to save tile map: {error}");
            }
        }
        self.last_save = Instant::now();
    }
}
