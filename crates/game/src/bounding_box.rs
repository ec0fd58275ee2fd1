use glam::Vec3;
use serde::{Deserialize, Serialize};

/// An axis-aligned box in world space.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min: Vec3,
    pub max: Vec3,
}

impl BoundingBox {
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    pub fn x_length(&self) -> f32 {
        self.max.x - self.min.x
    }

    pub fn y_length(&self) -> f32 {
        self.max.y - self.min.y
    }

    pub fn z_length(&self) -> f32 {
        self.max.z - self.min.z
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    pub fn is_empty(&self) -> bool {
        self.min.x >= self.max.x || self.min.y >= self.max.y || self.min.z >= self.max.z
    }

    /// Strict intersection. Boxes that only share an edge don't count.
    pub fn intersects(&self, other: &BoundingBox) -> bool {
        self.min.x < other.max.x
            && self.max.x > other.min.x
            && self.min.y < other.max.y
            && self.max.y > other.min.y
            && self.min.z < other.max.z
            && self.max.z > other.min.z
    }

    pub fn translated(&self, offset: Vec3) -> BoundingBox {
        BoundingBox {
            min: self.min + offset,
            max: self.max + offset,
        }
    }

    pub fn min_position(&self) -> Vec3 {
        self.min
    }

    /// Moves these model-space bounds to a world position. The box is
    /// centered on the position in x/y; its bottom sits at the position's z.
    pub fn model_to_world_centered(&self, position: Vec3) -> BoundingBox {
        let half_x = self.x_length() * 0.5;
        let half_y = self.y_length() * 0.5;
        BoundingBox {
            min: Vec3::new(position.x - half_x, position.y - half_y, position.z),
            max: Vec3::new(
                position.x + half_x,
                position.y + half_y,
                position.z + self.z_length(),
            ),
        }
    }

    /// Moves these model-space bounds so that their min corner sits at the
    /// given world point. Used for tile layers, which don't move.
    pub fn model_to_world_origin(&self, origin: Vec3) -> BoundingBox {
        BoundingBox {
            min: origin + self.min,
            max: origin + self.max,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intersection_excludes_touching_edges() {
        let a = BoundingBox::new(Vec3::ZERO, Vec3::splat(1.0));
        let b = BoundingBox::new(Vec3::new(1.0, 0.0, 0.0), Vec3::new(2.0, 1.0, 1.0));
        assert!(!a.intersects(&b));

        let c = BoundingBox::new(Vec3::new(0.5, 0.5, 0.5), Vec3::splat(2.0));
        assert!(a.intersects(&c));
        assert!(c.intersects(&a));
    }

    #[test]
    fn model_to_world_centers_on_position() {
        let model = BoundingBox::new(Vec3::ZERO, Vec3::new(4.0, 4.0, 2.0));
        let world = model.model_to_world_centered(Vec3::new(10.0, 10.0, 1.0));
        assert_eq!(world.min, Vec3::new(8.0, 8.0, 1.0));
        assert_eq!(world.max, Vec3::new(12.0, 12.0, 3.0));
    }
}
