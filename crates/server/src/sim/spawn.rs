//! Spawn-point selection for newly connected clients.

use glam::Vec3;

use crate::config::SpawnStrategy;

pub struct SpawnPointGenerator {
    strategy: SpawnStrategy,
    /// xorshift state for the Random strategy.
    rng_state: u64,
    /// Slots handed out in the current group, for the Grouped strategy.
    group_slot: u32,
    group_index: u32,
}

impl SpawnPointGenerator {
    pub fn new(strategy: SpawnStrategy) -> Self {
        let rng_state = match &strategy {
            SpawnStrategy::Random { seed, .. } => (*seed).max(1),
            _ => 1,
        };
        Self {
            strategy,
            rng_state,
            group_slot: 0,
            group_index: 0,
        }
    }

    pub fn next_spawn_point(&mut self) -> Vec3 {
        match self.strategy {
            SpawnStrategy::Fixed { point } => point,
            SpawnStrategy::Random { min, max, .. } => {
                let x = min.x + self.next_f32() * (max.x - min.x);
                let y = min.y + self.next_f32() * (max.y - min.y);
                Vec3::new(x, y, 0.0)
            }
            SpawnStrategy::Grouped {
                anchor,
                columns,
                rows,
                padding_x,
                padding_y,
                group_offset_x,
                group_offset_y,
            } => {
                let column = self.group_slot % columns;
                let row = self.group_slot / columns;
                let point = Vec3::new(
                    anchor.x
                        + self.group_index as f32 * group_offset_x
                        + column as f32 * padding_x,
                    anchor.y
                        + self.group_index as f32 * group_offset_y
                        + row as f32 * padding_y,
                    anchor.z,
                );

                self.group_slot += 1;
                if self.group_slot == columns * rows {
                    self.group_slot = 0;
                    self.group_index += 1;
                }
                point
            }
        }
    }

    fn next_f32(&mut self) -> f32 {
        // xorshift64*, plenty for spawn scatter.
        let mut x = self.rng_state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.rng_state = x;
        let bits = (x.wrapping_mul(0x2545_F491_4F6C_DD1D) >> 40) as u32;
        bits as f32 / (1u32 << 24) as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_always_returns_the_point() {
        let mut spawn = SpawnPointGenerator::new(SpawnStrategy::Fixed {
            point: Vec3::new(32.0, 32.0, 0.0),
        });
        assert_eq!(spawn.next_spawn_point(), Vec3::new(32.0, 32.0, 0.0));
        assert_eq!(spawn.next_spawn_point(), Vec3::new(32.0, 32.0, 0.0));
    }

    #[test]
    fn random_stays_in_the_rectangle() {
        let mut spawn = SpawnPointGenerator::new(SpawnStrategy::Random {
            min: Vec3::new(10.0, 20.0, 0.0),
            max: Vec3::new(30.0, 40.0, 0.0),
            seed: 7,
        });
        for _ in 0..100 {
            let point = spawn.next_spawn_point();
            assert!((10.0..=30.0).contains(&point.x));
            assert!((20.0..=40.0).contains(&point.y));
        }
    }

    #[test]
    fn grouped_fills_grid_then_advances_anchor() {
        let mut spawn = SpawnPointGenerator::new(SpawnStrategy::Grouped {
            anchor: Vec3::ZERO,
            columns: 2,
            rows: 1,
            padding_x: 32.0,
            padding_y: 32.0,
            group_offset_x: 0.0,
            group_offset_y: 400.0,
        });

        assert_eq!(spawn.next_spawn_point(), Vec3::new(0.0, 0.0, 0.0));
        assert_eq!(spawn.next_spawn_point(), Vec3::new(32.0, 0.0, 0.0));
        // Group full: anchor advances.
        assert_eq!(spawn.next_spawn_point(), Vec3::new(0.0, 400.0, 0.0));
    }
}
