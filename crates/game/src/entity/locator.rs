//! A uniform-grid spatial index over entity collision bounds.
//!
//! Backs the AOI queries and the movement broad phase. Cells partition the
//! x/y plane; an entity occupies every cell its bounds overlap.

use std::collections::HashMap;

use glam::Vec3;

use crate::bounding_box::BoundingBox;

use super::EntityId;

/// Grid cell width in world units.
const CELL_WORLD_WIDTH: f32 = 128.0;

type CellPosition = (i32, i32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CellExtent {
    min_x: i32,
    min_y: i32,
    max_x: i32,
    max_y: i32,
}

#[derive(Debug, Default)]
pub struct EntityLocator {
    cells: HashMap<CellPosition, Vec<EntityId>>,
    tracked: HashMap<EntityId, (CellExtent, BoundingBox)>,
}

impl EntityLocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the entity's current bounds, moving it between cells as
    /// needed.
    pub fn set_entity_location(&mut self, entity: EntityId, bounds: BoundingBox) {
        let extent = cell_extent(&bounds);

        if let Some((old_extent, old_bounds)) = self.tracked.get_mut(&entity) {
            if *old_extent == extent {
                *old_bounds = bounds;
                return;
            }
            let old_extent = *old_extent;
            self.remove_from_cells(entity, old_extent);
        }

        for cell in cells_of(extent) {
            self.cells.entry(cell).or_default().push(entity);
        }
        self.tracked.insert(entity, (extent, bounds));
    }

    pub fn remove_entity(&mut self, entity: EntityId) {
        if let Some((extent, _)) = self.tracked.remove(&entity) {
            self.remove_from_cells(entity, extent);
        }
    }

    /// Entities whose bounds intersect a circle in the x/y plane, sorted
    /// ascending.
    pub fn get_entities_in_radius(&self, center: Vec3, radius: f32) -> Vec<EntityId> {
        let search = BoundingBox::new(
            Vec3::new(center.x - radius, center.y - radius, f32::MIN),
            Vec3::new(center.x + radius, center.y + radius, f32::MAX),
        );

        let mut result = self.gather(&search, |bounds| {
            // Closest point on the box to the circle center, in x/y.
            let closest_x = center.x.clamp(bounds.min.x, bounds.max.x);
            let closest_y = center.y.clamp(bounds.min.y, bounds.max.y);
            let dx = center.x - closest_x;
            let dy = center.y - closest_y;
            (dx * dx + dy * dy) <= radius * radius
        });
        result.sort_unstable();
        result.dedup();
        result
    }

    /// Entities whose bounds intersect the given box, sorted ascending.
    pub fn get_entities_intersecting(&self, bounds: &BoundingBox) -> Vec<EntityId> {
        let mut result = self.gather(bounds, |tracked| tracked.intersects(bounds));
        result.sort_unstable();
        result.dedup();
        result
    }

    fn gather(
        &self,
        search: &BoundingBox,
        mut fine_filter: impl FnMut(&BoundingBox) -> bool,
    ) -> Vec<EntityId> {
        let extent = cell_extent(search);
        let mut result = Vec::new();
        for cell in cells_of(extent) {
            let Some(entities) = self.cells.get(&cell) else {
                continue;
            };
            for &entity in entities {
                if let Some((_, bounds)) = self.tracked.get(&entity) {
                    if fine_filter(bounds) {
                        result.push(entity);
                    }
                }
            }
        }
        result
    }

    fn remove_from_cells(&mut self, entity: EntityId, extent: CellExtent) {
        for cell in cells_of(extent) {
            if let Some(entities) = self.cells.get_mut(&cell) {
                entities.retain(|&id| id != entity);
                if entities.is_empty() {
                    self.cells.remove(&cell);
                }
            }
        }
    }
}

fn cell_extent(bounds: &BoundingBox) -> CellExtent {
    CellExtent {
        min_x: (bounds.min.x / CELL_WORLD_WIDTH).floor() as i32,
        min_y: (bounds.min.y / CELL_WORLD_WIDTH).floor() as i32,
        max_x: (bounds.max.x / CELL_WORLD_WIDTH).floor() as i32,
        max_y: (bounds.max.y / CELL_WORLD_WIDTH).floor() as i32,
    }
}

fn cells_of(extent: CellExtent) -> impl Iterator<Item = CellPosition> {
    (extent.min_y..=extent.max_y)
        .flat_map(move |y| (extent.min_x..=extent.max_x).map(move |x| (x, y)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityIdPool;

    fn box_at(x: f32, y: f32) -> BoundingBox {
        BoundingBox::new(
            Vec3::new(x - 8.0, y - 8.0, 0.0),
            Vec3::new(x + 8.0, y + 8.0, 16.0),
        )
    }

    #[test]
    fn radius_query_finds_nearby_entities() {
        let mut pool = EntityIdPool::new();
        let mut locator = EntityLocator::new();

        let near = pool.reserve();
        let far = pool.reserve();
        locator.set_entity_location(near, box_at(50.0, 50.0));
        locator.set_entity_location(far, box_at(1000.0, 1000.0));

        let found = locator.get_entities_in_radius(Vec3::new(40.0, 40.0, 0.0), 64.0);
        assert_eq!(found, vec![near]);
    }

    #[test]
    fn moving_an_entity_updates_its_cells() {
        let mut pool = EntityIdPool::new();
        let mut locator = EntityLocator::new();

        let entity = pool.reserve();
        locator.set_entity_location(entity, box_at(0.0, 0.0));
        locator.set_entity_location(entity, box_at(1000.0, 0.0));

        assert!(locator
            .get_entities_in_radius(Vec3::ZERO, 64.0)
            .is_empty());
        assert_eq!(
            locator.get_entities_in_radius(Vec3::new(1000.0, 0.0, 0.0), 64.0),
            vec![entity]
        );
    }

    #[test]
    fn entities_spanning_cells_are_not_duplicated() {
        let mut pool = EntityIdPool::new();
        let mut locator = EntityLocator::new();

        let entity = pool.reserve();
        // Bounds straddle a cell boundary.
        locator.set_entity_location(
            entity,
            BoundingBox::new(Vec3::new(120.0, 120.0, 0.0), Vec3::new(140.0, 140.0, 16.0)),
        );

        let found = locator.get_entities_in_radius(Vec3::new(128.0, 128.0, 0.0), 64.0);
        assert_eq!(found, vec![entity]);
    }

    #[test]
    fn removal_clears_tracking() {
        let mut pool = EntityIdPool::new();
        let mut locator = EntityLocator::new();

        let entity = pool.reserve();
        locator.set_entity_location(entity, box_at(0.0, 0.0));
        locator.remove_entity(entity);
        assert!(locator.get_entities_in_radius(Vec3::ZERO, 64.0).is_empty());
    }
}
