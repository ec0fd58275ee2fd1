//! Movement math shared by the server simulation and the client predictor.
//!
//! Everything here is deterministic: the same inputs against the same world
//! state produce the same results on both ends, which is what makes client
//! prediction and replay possible.

use glam::Vec3;

use crate::bounding_box::BoundingBox;
use crate::components::{Collision, Direction, Movement, MovementModifiers, Position, Rotation};
use crate::config::{BASE_MOVEMENT_SPEED, FALL_SPEED, TILE_WORLD_WIDTH};
use crate::entity::{EntityId, EntityLocator, EntityStore};
use crate::input::InputFlags;
use crate::tilemap::{TileExtent, TileMap};

/// The movable state of one entity, copied out of the store for the
/// duration of a move and written back by the caller.
#[derive(Debug, Clone, Copy)]
pub struct MoveState {
    pub position: Position,
    pub movement: Movement,
    pub rotation: Rotation,
    pub collision: Collision,
}

/// Velocity from input bits. Opposing bits cancel; diagonals are
/// normalized so diagonal movement isn't faster.
pub fn calc_velocity(
    input: InputFlags,
    movement: &Movement,
    modifiers: &MovementModifiers,
) -> Vec3 {
    let mut direction = Vec3::ZERO;
    if input.contains(InputFlags::NORTH) {
        direction.y -= 1.0;
    }
    if input.contains(InputFlags::SOUTH) {
        direction.y += 1.0;
    }
    if input.contains(InputFlags::EAST) {
        direction.x += 1.0;
    }
    if input.contains(InputFlags::WEST) {
        direction.x -= 1.0;
    }

    if direction != Vec3::ZERO {
        direction = direction.normalize();
    }

    let mut velocity = direction * BASE_MOVEMENT_SPEED * modifiers.speed_modifier;
    velocity.z = if movement.is_falling { -FALL_SPEED } else { 0.0 };
    velocity
}

pub fn calc_position(position: Vec3, velocity: Vec3, delta_seconds: f32) -> Vec3 {
    position + velocity * delta_seconds
}

/// Facing from input bits. No input (or fully canceled input) keeps the
/// previous facing.
pub fn calc_rotation(current: Rotation, input: InputFlags) -> Rotation {
    let north = input.contains(InputFlags::NORTH);
    let south = input.contains(InputFlags::SOUTH);
    let east = input.contains(InputFlags::EAST);
    let west = input.contains(InputFlags::WEST);

    let y = i32::from(south) - i32::from(north);
    let x = i32::from(east) - i32::from(west);

    let direction = match (x, y) {
        (0, -1) => Direction::North,
        (0, 1) => Direction::South,
        (1, 0) => Direction::East,
        (-1, 0) => Direction::West,
        (1, -1) => Direction::NorthEast,
        (-1, -1) => Direction::NorthWest,
        (1, 1) => Direction::SouthEast,
        (-1, 1) => Direction::SouthWest,
        _ => return current,
    };
    Rotation { direction }
}

/// Resolves a desired move against a set of obstacle boxes, one axis at a
/// time: X, then Y, then Z. A move that would intersect along an axis is
/// snapped to the obstacle's boundary on that axis.
pub fn resolve_collisions(
    current: BoundingBox,
    desired: BoundingBox,
    obstacles: &[BoundingBox],
) -> BoundingBox {
    let mut resolved = current;

    // X
    let mut dx = desired.min.x - resolved.min.x;
    if dx != 0.0 {
        for obstacle in obstacles {
            if !overlaps_yz(&resolved, obstacle) {
                continue;
            }
            if dx > 0.0 && obstacle.min.x >= resolved.max.x {
                dx = dx.min(obstacle.min.x - resolved.max.x);
            } else if dx < 0.0 && obstacle.max.x <= resolved.min.x {
                dx = dx.max(obstacle.max.x - resolved.min.x);
            }
        }
        resolved = resolved.translated(Vec3::new(dx, 0.0, 0.0));
    }

    // Y
    let mut dy = desired.min.y - resolved.min.y;
    if dy != 0.0 {
        for obstacle in obstacles {
            if !overlaps_xz(&resolved, obstacle) {
                continue;
            }
            if dy > 0.0 && obstacle.min.y >= resolved.max.y {
                dy = dy.min(obstacle.min.y - resolved.max.y);
            } else if dy < 0.0 && obstacle.max.y <= resolved.min.y {
                dy = dy.max(obstacle.max.y - resolved.min.y);
            }
        }
        resolved = resolved.translated(Vec3::new(0.0, dy, 0.0));
    }

    // Z
    let mut dz = desired.min.z - resolved.min.z;
    if dz != 0.0 {
        for obstacle in obstacles {
            if !overlaps_xy(&resolved, obstacle) {
                continue;
            }
            if dz > 0.0 && obstacle.min.z >= resolved.max.z {
                dz = dz.min(obstacle.min.z - resolved.max.z);
            } else if dz < 0.0 && obstacle.max.z <= resolved.min.z {
                dz = dz.max(obstacle.max.z - resolved.min.z);
            }
        }
        // The ground plane sits at z = 0.
        dz = dz.max(-resolved.min.z);
        resolved = resolved.translated(Vec3::new(0.0, 0.0, dz));
    }

    resolved
}

fn overlaps_yz(a: &BoundingBox, b: &BoundingBox) -> bool {
    a.min.y < b.max.y && a.max.y > b.min.y && a.min.z < b.max.z && a.max.z > b.min.z
}

fn overlaps_xz(a: &BoundingBox, b: &BoundingBox) -> bool {
    a.min.x < b.max.x && a.max.x > b.min.x && a.min.z < b.max.z && a.max.z > b.min.z
}

fn overlaps_xy(a: &BoundingBox, b: &BoundingBox) -> bool {
    a.min.x < b.max.x && a.max.x > b.min.x && a.min.y < b.max.y && a.max.y > b.min.y
}

/// Collects the obstacle boxes relevant to a move: collision-enabled tile
/// layers in the swept extent, plus nearby entities' bounds.
pub fn gather_obstacles(
    entity: EntityId,
    swept_bounds: &BoundingBox,
    store: &EntityStore,
    tile_map: &TileMap,
    locator: &EntityLocator,
    out: &mut Vec<BoundingBox>,
) {
    tile_map.collect_collision_boxes(TileExtent::from_bounding_box(swept_bounds), out);

    for other in locator.get_entities_intersecting(swept_bounds) {
        if other == entity {
            continue;
        }
        if let Some(collision) = store.get::<Collision>(other) {
            out.push(collision.world_bounds);
        }
    }
}

/// Moves one entity for a tick: velocity from inputs, desired position,
/// collision resolution, rotation, falling state. The caller owns writing
/// the state back to the store and re-registering the entity with the
/// locator.
///
/// Returns true if the position changed.
pub fn move_entity(
    entity: EntityId,
    input: InputFlags,
    state: &mut MoveState,
    store: &EntityStore,
    tile_map: &TileMap,
    locator: &EntityLocator,
    delta_seconds: f32,
) -> bool {
    let modifiers = store
        .get::<MovementModifiers>(entity)
        .copied()
        .unwrap_or_default();

    let velocity = calc_velocity(input, &state.movement, &modifiers);
    state.movement.velocity = velocity;
    state.rotation = calc_rotation(state.rotation, input);

    if velocity == Vec3::ZERO {
        return false;
    }

    let desired_position = clamp_to_map(
        calc_position(state.position.0, velocity, delta_seconds),
        tile_map,
    );
    if desired_position == state.position.0 {
        return false;
    }

    let desired_bounds = state
        .collision
        .model_bounds
        .model_to_world_centered(desired_position);

    let swept = BoundingBox::new(
        state.collision.world_bounds.min.min(desired_bounds.min),
        state.collision.world_bounds.max.max(desired_bounds.max),
    );
    let mut obstacles = Vec::new();
    gather_obstacles(entity, &swept, store, tile_map, locator, &mut obstacles);

    let resolved = resolve_collisions(state.collision.world_bounds, desired_bounds, &obstacles);

    // desired_bounds was built from the desired position, so the min-corner
    // diff is exactly the allowed movement.
    let moved_by = resolved.min_position() - state.collision.world_bounds.min_position();
    if moved_by == Vec3::ZERO {
        return false;
    }

    state.position.0 += moved_by;
    state.collision.world_bounds = resolved;
    state.movement.is_falling =
        resolved.min.z > 0.0 && !is_supported(&resolved, &obstacles);
    true
}

fn is_supported(bounds: &BoundingBox, obstacles: &[BoundingBox]) -> bool {
    const SUPPORT_EPSILON: f32 = 0.01;
    obstacles.iter().any(|obstacle| {
        overlaps_xy(bounds, obstacle) && (bounds.min.z - obstacle.max.z).abs() <= SUPPORT_EPSILON
    })
}

fn clamp_to_map(position: Vec3, tile_map: &TileMap) -> Vec3 {
    let extent = tile_map.tile_extent();
    let min_x = extent.x as f32 * TILE_WORLD_WIDTH;
    let min_y = extent.y as f32 * TILE_WORLD_WIDTH;
    let max_x = (extent.x + extent.x_length) as f32 * TILE_WORLD_WIDTH;
    let max_y = (extent.y + extent.y_length) as f32 * TILE_WORLD_WIDTH;
    Vec3::new(
        position.x.clamp(min_x, max_x),
        position.y.clamp(min_y, max_y),
        position.z.max(0.0),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opposing_inputs_cancel() {
        let velocity = calc_velocity(
            InputFlags::NORTH | InputFlags::SOUTH,
            &Movement::default(),
            &MovementModifiers::default(),
        );
        assert_eq!(velocity, Vec3::ZERO);
    }

    #[test]
    fn diagonal_speed_matches_cardinal_speed() {
        let east = calc_velocity(
            InputFlags::EAST,
            &Movement::default(),
            &MovementModifiers::default(),
        );
        let diagonal = calc_velocity(
            InputFlags::EAST | InputFlags::SOUTH,
            &Movement::default(),
            &MovementModifiers::default(),
        );
        assert!((east.length() - diagonal.length()).abs() < 1e-4);
    }

    #[test]
    fn rotation_follows_inputs_and_keeps_facing_when_idle() {
        let rotation = Rotation::default();
        let facing = calc_rotation(rotation, InputFlags::EAST | InputFlags::NORTH);
        assert_eq!(facing.direction, Direction::NorthEast);

        let kept = calc_rotation(facing, InputFlags::empty());
        assert_eq!(kept.direction, Direction::NorthEast);

        let canceled = calc_rotation(facing, InputFlags::EAST | InputFlags::WEST);
        assert_eq!(canceled.direction, Direction::NorthEast);
    }

    #[test]
    fn collision_snaps_to_obstacle_boundary() {
        let current = BoundingBox::new(Vec3::new(0.0, 0.0, 0.0), Vec3::new(10.0, 10.0, 10.0));
        let desired = current.translated(Vec3::new(20.0, 0.0, 0.0));
        let wall = BoundingBox::new(Vec3::new(15.0, -50.0, 0.0), Vec3::new(20.0, 50.0, 32.0));

        let resolved = resolve_collisions(current, desired, &[wall]);
        assert_eq!(resolved.max.x, 15.0);
        assert_eq!(resolved.min.y, 0.0);
    }

    #[test]
    fn sliding_along_a_wall_keeps_the_free_axis() {
        let current = BoundingBox::new(Vec3::new(0.0, 0.0, 0.0), Vec3::new(10.0, 10.0, 10.0));
        let desired = current.translated(Vec3::new(20.0, 5.0, 0.0));
        let wall = BoundingBox::new(Vec3::new(12.0, -50.0, 0.0), Vec3::new(20.0, 50.0, 32.0));

        let resolved = resolve_collisions(current, desired, &[wall]);
        assert_eq!(resolved.max.x, 12.0);
        assert_eq!(resolved.min.y, 5.0);
    }

    #[test]
    fn ground_plane_stops_falls() {
        let current = BoundingBox::new(Vec3::new(0.0, 0.0, 5.0), Vec3::new(10.0, 10.0, 15.0));
        let desired = current.translated(Vec3::new(0.0, 0.0, -20.0));

        let resolved = resolve_collisions(current, desired, &[]);
        assert_eq!(resolved.min.z, 0.0);
    }
}
