//! The authoritative simulation: a fixed pipeline of systems run once per
//! tick, in a strict order.

pub mod client_aoi;
pub mod client_connection;
pub mod chunk_streaming;
pub mod component_sync;
pub mod input;
pub mod map_save;
pub mod movement;
pub mod movement_sync;
pub mod nce_lifetime;
pub mod script_data;
pub mod spawn;
pub mod sprite_update;
pub mod tile_update;
pub mod world;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crate::config::ServerConfig;
use crate::network::{InboundQueues, Network};

pub use input::InputSystem;
pub use map_save::MapSaveSystem;
pub use spawn::SpawnPointGenerator;
pub use world::{ClientSimData, World, PLAYER_MODEL_BOUNDS};

pub struct Simulation {
    world: World,
    queues: InboundQueues,
    current_tick: Arc<AtomicU32>,

    spawn: SpawnPointGenerator,
    input_system: InputSystem,
    map_save_system: MapSaveSystem,
}

impl Simulation {
    pub fn new(
        world: World,
        queues: InboundQueues,
        current_tick: Arc<AtomicU32>,
        config: &ServerConfig,
    ) -> Self {
        Self {
            world,
            queues,
            current_tick,
            spawn: SpawnPointGenerator::new(config.spawn_strategy.clone()),
            input_system: InputSystem::new(),
            map_save_system: MapSaveSystem::new(
                config.map_path.clone(),
                config.map_save_period_s,
            ),
        }
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn world_mut(&mut self) -> &mut World {
        &mut self.world
    }

    pub fn current_tick(&self) -> u32 {
        self.current_tick.load(Ordering::Acquire)
    }

    /// Runs one simulation tick. Phase order is load-bearing: inputs must
    /// land before movement, movement before AOI, AOI before the sync
    /// systems, and everything before the send-thread signal.
    pub fn tick(&mut self, network: &Network) {
        let current_tick = self.current_tick.load(Ordering::Acquire);

        client_connection::update(
            &mut self.world,
            network,
            &self.queues,
            &mut self.spawn,
            current_tick,
        );
        nce_lifetime::update(&mut self.world, network, &self.queues, current_tick);
        script_data::update(&mut self.world, network, &self.queues);
        tile_update::update(&mut self.world, &self.queues);
        sprite_update::update(&mut self.world, &self.queues);
        self.input_system
            .update(&mut self.world, &self.queues, current_tick);
        movement::update(&mut self.world);
        client_aoi::update(&mut self.world, network, current_tick);
        movement_sync::update(&mut self.world, network, current_tick);
        component_sync::update(&mut self.world, network, current_tick);
        chunk_streaming::update(&mut self.world, network, &self.queues, current_tick);
        self.map_save_system.update(&self.world);

        network.begin_send_client_updates();
        self.current_tick.fetch_add(1, Ordering::AcqRel);
    }

    /// Saves the map immediately. Called at shutdown.
    pub fn save_map_now(&mut self) {
        let Self {
            world,
            map_save_system,
            ..
        } = self;
        map_save_system.save_now(world);
    }
}
