//! The client-side simulation loop.

pub mod chunk_update;
pub mod component_update;
pub mod npc_movement;
pub mod player_input;
pub mod player_movement;
pub mod tile_update;
pub mod world;

use std::sync::Arc;

use tessel::net::messages::{
    ComponentUpdateRequest, InitScriptRequest, InitScriptResponse, MovementUpdate,
    SpriteChangeRequest, TileUpdateRequest,
};
use tessel::tilemap::ChunkExtent;
use tessel::{EntityId, SpriteData, TileMap};

use crate::config::ClientConfig;
use crate::network::{ClientNetError, InboundQueues, Network, NpcUpdateEvent};

pub use chunk_update::ChunkUpdateSystem;
pub use npc_movement::NpcMovementSystem;
pub use player_input::{InputSource, PlayerInputSystem};
pub use world::World;

pub struct Simulation {
    world: World,
    network: Network,
    queues: InboundQueues,

    current_tick: u32,
    connected: bool,
    initial_tick_offset: u32,

    player_input: PlayerInputSystem,
    npc_movement: NpcMovementSystem,
    chunk_system: ChunkUpdateSystem,
}

impl Simulation {
    /// Connects to the server and builds an empty local world. The real
    /// map extent and our entity arrive with the connection response.
    pub fn connect(
        config: &ClientConfig,
        sprite_data: Arc<SpriteData>,
    ) -> Result<Self, ClientNetError> {
        let (network, queues) = Network::connect(&config.server_addr)?;

        let tile_map = TileMap::new(ChunkExtent::default(), Arc::clone(&sprite_data), false);
        let world = World::new(tile_map, sprite_data);

        Ok(Self {
            world,
            network,
            queues,
            current_tick: 0,
            connected: false,
            initial_tick_offset: config.initial_tick_offset,
            player_input: PlayerInputSystem::new(),
            npc_movement: NpcMovementSystem::new(config.past_tick_offset),
            chunk_system: ChunkUpdateSystem::new(),
        })
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn world_mut(&mut self) -> &mut World {
        &mut self.world
    }

    pub fn current_tick(&self) -> u32 {
        self.current_tick
    }

    pub fn is_connected(&self) -> bool {
        self.connected && self.network.is_connected()
    }

    /// Runs one client tick: apply tick corrections, adopt our entity if
    /// the connection response just arrived, send input, predict, then
    /// apply everything the server told us.
    pub fn tick(&mut self, input_source: &mut dyn InputSource) {
        self.apply_tick_adjustments();
        self.process_connection_responses();
        if !self.connected {
            return;
        }

        self.player_input.update(
            &mut self.world,
            &self.network,
            input_source,
            self.current_tick,
        );

        let player_updates: Vec<MovementUpdate> =
            self.queues.player_movement_updates.try_iter().collect();
        player_movement::update(&mut self.world, player_updates, self.current_tick);

        let npc_events: Vec<NpcUpdateEvent> = self.queues.npc_update_events.try_iter().collect();
        self.npc_movement
            .update(&mut self.world, npc_events.into_iter(), self.current_tick);

        component_update::update(&mut self.world, &self.queues);
        tile_update::update(&mut self.world, &self.queues);
        self.chunk_system
            .update(&mut self.world, &self.network, &self.queues);

        self.current_tick = self.current_tick.wrapping_add(1);
    }

    fn apply_tick_adjustments(&mut self) {
        while let Ok(adjustment) = self.queues.adjustments.try_recv() {
            let adjusted = self.current_tick as i64 + adjustment.adjustment as i64;
            log::info!(
                "applying tick adjustment {} (iteration {}): {} -> {}",
                adjustment.adjustment,
                adjustment.iteration,
                self.current_tick,
                adjusted.max(0)
            );
            self.current_tick = adjusted.max(0) as u32;
            self.npc_movement.apply_tick_adjustment(adjustment.adjustment);
            self.network.ack_adjustment(adjustment.iteration);
        }
    }

    fn process_connection_responses(&mut self) {
        while let Ok(response) = self.queues.connection_responses.try_recv() {
            log::info!(
                "connected: entity {}, server tick {}, spawn ({}, {}, {})",
                response.entity,
                response.tick,
                response.spawn_position.x,
                response.spawn_position.y,
                response.spawn_position.z
            );

            // Rebuild the map mirror at the server's extent.
            self.world.tile_map = TileMap::new(
                ChunkExtent::from(response.map_tile_extent),
                Arc::clone(&self.world.sprite_data),
                false,
            );

            component_update::attach_player_components(
                &mut self.world,
                response.entity,
                response.spawn_position,
            );

            // Run ahead of the server so our inputs arrive before their
            // tick comes up; the adjustment controller refines this.
            self.current_tick = response.tick + self.initial_tick_offset;
            self.connected = true;
        }
    }

    //----------------------------------------------------------------------
    // Outbound requests from the UI / scripting layers
    //----------------------------------------------------------------------

    pub fn send_tile_update_request(&self, request: &TileUpdateRequest) {
        let _ = self.network.send(request);
    }

    pub fn send_component_update_request(&self, request: &ComponentUpdateRequest) {
        let _ = self.network.send(request);
    }

    pub fn send_sprite_change_request(&self, request: &SpriteChangeRequest) {
        let _ = self.network.send(request);
    }

    pub fn request_init_script(&self, entity: EntityId) {
        let _ = self.network.send(&InitScriptRequest { entity });
    }

    pub fn drain_init_script_responses(&self) -> Vec<InitScriptResponse> {
        self.queues.init_script_responses.try_iter().collect()
    }
}
