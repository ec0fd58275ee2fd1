use std::path::PathBuf;
use std::sync::atomic::AtomicU32;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use glam::Vec3;

use tessel::config::SIM_TICK_TIMESTEP_S;
use tessel::tilemap::snapshot;
use tessel::{ChunkExtent, SpriteData, TickTimer, TileMap};

use tessel_server::config::{ServerConfig, SpawnStrategy};
use tessel_server::network::Network;
use tessel_server::sim::{Simulation, World};

#[derive(Parser)]
#[command(name = "tessel-server")]
#[command(about = "Authoritative world server")]
struct Args {
    #[arg(short, long, default_value = "0.0.0.0")]
    bind: String,

    #[arg(short, long, default_value_t = 41499)]
    port: u16,

    #[arg(short, long, default_value_t = 100)]
    max_clients: usize,

    #[arg(long, default_value = "TileMap.bin")]
    map: PathBuf,

    #[arg(long, help = "Start with an empty in-memory map and never save")]
    ephemeral_map: bool,

    #[arg(long, default_value_t = 900.0, help = "Seconds between map saves")]
    map_save_period: f64,

    #[arg(long, value_parser = ["fixed", "random", "grouped"], default_value = "fixed")]
    spawn: String,

    #[arg(long, default_value_t = 0, help = "Exit after this many ticks (0 = run forever)")]
    run_ticks: u32,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let spawn_strategy = match args.spawn.as_str() {
        "random" => SpawnStrategy::Random {
            min: Vec3::new(32.0, 32.0, 0.0),
            max: Vec3::new(224.0, 224.0, 0.0),
            seed: 0x5EED,
        },
        "grouped" => SpawnStrategy::Grouped {
            anchor: Vec3::new(32.0, 32.0, 0.0),
            columns: 5,
            rows: 2,
            padding_x: 32.0,
            padding_y: 32.0,
            group_offset_x: 0.0,
            group_offset_y: 400.0,
        },
        _ => SpawnStrategy::default(),
    };

    let config = ServerConfig {
        bind_address: args.bind,
        port: args.port,
        max_clients: args.max_clients,
        map_path: (!args.ephemeral_map).then(|| args.map.clone()),
        map_save_period_s: args.map_save_period,
        spawn_strategy,
        ..Default::default()
    };

    // Sprites come from the project's asset table; the engine itself only
    // needs ids, collision flags, and bounds. An empty table is a valid
    // (spriteless) world.
    let sprite_data = Arc::new(SpriteData::default());

    let tile_map = match &config.map_path {
        Some(path) if path.exists() => snapshot::load(path, Arc::clone(&sprite_data), true)
            .with_context(|| format!("failed to load tile map from {}", path.display()))?,
        _ => {
            let (x, y, z) = config.default_map_chunks;
            TileMap::new(
                ChunkExtent::from_map_lengths(x, y, z),
                Arc::clone(&sprite_data),
                true,
            )
        }
    };

    let current_tick = Arc::new(AtomicU32::new(0));
    let (network, queues) =
        Network::new(&config, Arc::clone(&current_tick)).context("failed to bind listener")?;
    log::info!("server listening on {}", network.local_addr());

    let world = World::new(tile_map, sprite_data);
    let mut simulation = Simulation::new(world, queues, current_tick, &config);

    let mut timer = TickTimer::from_seconds(SIM_TICK_TIMESTEP_S);
    loop {
        timer.update();
        while timer.consume_tick() {
            simulation.tick(&network);
        }

        if args.run_ticks != 0 && simulation.current_tick() >= args.run_ticks {
            break;
        }
        std::thread::sleep(timer.time_until_next_tick());
    }

    log::info!("shutting down, saving map");
    simulation.save_map_now();
    Ok(())
}
