use std::sync::Arc;

use glam::Vec3;

use tessel::bounding_box::BoundingBox;
use tessel::tilemap::snapshot::{self, MapPersistenceError};
use tessel::tilemap::{ChunkExtent, TileLayerKind, TileMap, TilePosition, WallType};
use tessel::{Sprite, SpriteData};

fn sprite_data() -> Arc<SpriteData> {
    let bounds = BoundingBox::new(Vec3::ZERO, Vec3::new(32.0, 32.0, 32.0));
    Arc::new(SpriteData::new(vec![
        Sprite {
            numeric_id: 10,
            layer_kind: TileLayerKind::Floor,
            wall_type: WallType::None,
            collision_enabled: false,
            model_bounds: BoundingBox::default(),
        },
        Sprite {
            numeric_id: 20,
            layer_kind: TileLayerKind::Wall,
            wall_type: WallType::North,
            collision_enabled: true,
            model_bounds: bounds,
        },
        Sprite {
            numeric_id: 30,
            layer_kind: TileLayerKind::Object,
            wall_type: WallType::None,
            collision_enabled: false,
            model_bounds: bounds,
        },
    ]))
}

fn build_map() -> TileMap {
    let mut map = TileMap::new(ChunkExtent::from_map_lengths(4, 4, 1), sprite_data(), true);
    map.set_layer(TilePosition::new(3, 4, 0), 0, 10).unwrap();
    map.set_layer(TilePosition::new(3, 4, 0), 1, 20).unwrap();
    map.set_layer(TilePosition::new(-5, -7, 0), 0, 10).unwrap();
    map.set_layer(TilePosition::new(17, 2, 0), 2, 30).unwrap();
    map
}

#[test]
fn save_then_load_round_trips_bit_for_bit() {
    let map = build_map();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("TileMap.bin");

    snapshot::save(&map, &path).unwrap();
    let loaded = snapshot::load(&path, sprite_data(), true).unwrap();

    assert_eq!(loaded.chunk_count(), map.chunk_count());
    assert_eq!(snapshot::serialize_map(&loaded), snapshot::serialize_map(&map));
}

#[test]
fn reloaded_wall_layer_matches_original() {
    let mut map = TileMap::new(ChunkExtent::from_map_lengths(4, 4, 1), sprite_data(), true);
    let pos = TilePosition::new(3, 4, 0);
    map.set_layer(pos, 1, 20).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("TileMap.bin");
    snapshot::save(&map, &path).unwrap();

    let loaded = snapshot::load(&path, sprite_data(), false).unwrap();
    let tile = loaded.tile(pos).unwrap();
    assert_eq!(tile.layer_count(), 1);
    assert_eq!(tile.layers[1].sprite_id, 20);
    assert_eq!(tile.layers[1].wall_type, WallType::North);
    assert_eq!(tile.layers[1], map.tile(pos).unwrap().layers[1]);
}

#[test]
fn unknown_version_refuses_to_load() {
    let map = build_map();
    let mut bytes = snapshot::serialize_map(&map);
    bytes[0] = 0xFF;
    bytes[1] = 0xFF;

    let result = snapshot::deserialize_map(&bytes, sprite_data(), false);
    assert!(matches!(
        result,
        Err(MapPersistenceError::UnsupportedVersion(0xFFFF))
    ));
}

#[test]
fn truncated_input_refuses_to_load() {
    let map = build_map();
    let bytes = snapshot::serialize_map(&map);

    let truncated = &bytes[..bytes.len() - 7];
    let result = snapshot::deserialize_map(truncated, sprite_data(), false);
    assert!(matches!(result, Err(MapPersistenceError::Truncated)));
}

#[test]
fn missing_sprite_refuses_to_load() {
    let map = build_map();
    let bytes = snapshot::serialize_map(&map);

    // A sprite table without the wall sprite.
    let partial_sprites = Arc::new(SpriteData::new(vec![Sprite {
        numeric_id: 10,
        layer_kind: TileLayerKind::Floor,
        wall_type: WallType::None,
        collision_enabled: false,
        model_bounds: BoundingBox::default(),
    }]));

    let result = snapshot::deserialize_map(&bytes, partial_sprites, false);
    assert!(matches!(
        result,
        Err(MapPersistenceError::UnknownSprite(_))
    ));
}

#[test]
fn save_replaces_previous_snapshot_atomically() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("TileMap.bin");

    let map = build_map();
    snapshot::save(&map, &path).unwrap();

    let mut changed = build_map();
    changed.clear_tile(TilePosition::new(17, 2, 0)).unwrap();
    snapshot::save(&changed, &path).unwrap();

    let loaded = snapshot::load(&path, sprite_data(), false).unwrap();
    assert_eq!(loaded.chunk_count(), 2);
    assert!(!dir.path().join("TileMap.tmp").exists());
}
