//! In-process server/client round trips over loopback TCP.

use std::collections::VecDeque;
use std::sync::atomic::AtomicU32;
use std::sync::Arc;
use std::time::{Duration, Instant};

use glam::Vec3;

use tessel::components::Position;
use tessel::config::SIM_TICK_TIMESTEP_S;
use tessel::input::InputFlags;
use tessel::{ChunkExtent, SpriteData, TickTimer, TileMap};

use tessel_client::sim::InputSource;
use tessel_client::{ClientConfig, Simulation as ClientSimulation};
use tessel_server::config::{ServerConfig, SpawnStrategy};
use tessel_server::network::Network;
use tessel_server::sim::Simulation as ServerSimulation;
use tessel_server::sim::World as ServerWorld;

const SPAWN: Vec3 = Vec3::new(32.0, 32.0, 0.0);

struct ScriptedInput {
    script: VecDeque<InputFlags>,
}

impl ScriptedInput {
    fn idle() -> Self {
        Self {
            script: VecDeque::new(),
        }
    }

    fn hold(&mut self, input: InputFlags, ticks: usize) {
        self.script.extend(std::iter::repeat_n(input, ticks));
    }
}

impl InputSource for ScriptedInput {
    fn sample(&mut self) -> InputFlags {
        self.script.pop_front().unwrap_or(InputFlags::empty())
    }
}

struct Harness {
    network: Network,
    server_sim: ServerSimulation,
    server_timer: TickTimer,
}

impl Harness {
    fn start() -> Self {
        let config = ServerConfig {
            bind_address: "127.0.0.1".into(),
            port: 0,
            max_clients: 8,
            map_path: None,
            spawn_strategy: SpawnStrategy::Fixed { point: SPAWN },
            ..Default::default()
        };

        let sprite_data = Arc::new(SpriteData::default());
        let tile_map = TileMap::new(
            ChunkExtent::from_map_lengths(16, 16, 1),
            Arc::clone(&sprite_data),
            true,
        );

        let current_tick = Arc::new(AtomicU32::new(0));
        let (network, queues) = Network::new(&config, Arc::clone(&current_tick)).unwrap();
        let world = ServerWorld::new(tile_map, sprite_data);
        let server_sim = ServerSimulation::new(world, queues, current_tick, &config);

        Self {
            network,
            server_sim,
            server_timer: TickTimer::from_seconds(SIM_TICK_TIMESTEP_S),
        }
    }

    fn connect_client(&self) -> ClientSimulation {
        let config = ClientConfig {
            server_addr: self.network.local_addr().to_string(),
            ..Default::default()
        };
        ClientSimulation::connect(&config, Arc::new(SpriteData::default())).unwrap()
    }

    /// Drives the server sim and the given clients side by side for a
    /// wall-clock duration.
    fn run_for(
        &mut self,
        clients: &mut [(&mut ClientSimulation, &mut ScriptedInput)],
        duration: Duration,
    ) {
        let mut client_timers: Vec<TickTimer> = clients
            .iter()
            .map(|_| TickTimer::from_seconds(SIM_TICK_TIMESTEP_S))
            .collect();

        let start = Instant::now();
        while start.elapsed() < duration {
            self.server_timer.update();
            while self.server_timer.consume_tick() {
                self.server_sim.tick(&self.network);
            }

            for ((client, input), timer) in clients.iter_mut().zip(client_timers.iter_mut()) {
                timer.update();
                while timer.consume_tick() {
                    client.tick(&mut **input);
                }
            }

            std::thread::sleep(Duration::from_millis(1));
        }
    }

    fn server_player_position(&self) -> Option<Vec3> {
        let world = self.server_sim.world();
        let (entity, _) = *world.clients().first()?;
        world
            .entity_store
            .get::<Position>(entity)
            .map(|position| position.0)
    }
}

fn client_player_position(client: &ClientSimulation) -> Option<Vec3> {
    let world = client.world();
    let player = world.player_entity?;
    world
        .entity_store
        .get::<Position>(player)
        .map(|position| position.0)
}

#[test]
fn idle_client_stays_at_the_spawn_point() {
    let mut harness = Harness::start();
    let mut client = harness.connect_client();
    let mut input = ScriptedInput::idle();

    harness.run_for(
        &mut [(&mut client, &mut input)],
        Duration::from_millis(700),
    );

    assert!(client.is_connected(), "client never finished connecting");
    assert_eq!(harness.server_player_position(), Some(SPAWN));
    assert_eq!(client_player_position(&client), Some(SPAWN));
}

#[test]
fn held_input_moves_the_entity_and_prediction_converges() {
    let mut harness = Harness::start();
    let mut client = harness.connect_client();
    let mut input = ScriptedInput::idle();

    // Let the connection settle.
    harness.run_for(
        &mut [(&mut client, &mut input)],
        Duration::from_millis(500),
    );
    assert!(client.is_connected());

    // Hold east for 10 ticks, then release and let everything settle.
    input.hold(InputFlags::EAST, 10);
    harness.run_for(
        &mut [(&mut client, &mut input)],
        Duration::from_millis(1200),
    );

    let server_position = harness.server_player_position().unwrap();
    let client_position = client_player_position(&client).unwrap();

    // 10 ticks of eastward movement at base speed.
    let expected_x = SPAWN.x + 10.0 * tessel::config::BASE_MOVEMENT_SPEED
        * SIM_TICK_TIMESTEP_S as f32;
    assert!(
        (server_position.x - expected_x).abs() < 4.0,
        "server x {} not near expected {expected_x}",
        server_position.x
    );
    assert_eq!(server_position.y, SPAWN.y);

    // After reconciliation both sides agree.
    assert!(
        (client_position - server_position).length() < 0.5,
        "client {client_position:?} diverged from server {server_position:?}"
    );
}

#[test]
fn clients_learn_about_each_other_through_aoi() {
    let mut harness = Harness::start();
    let mut client_a = harness.connect_client();
    let mut client_b = harness.connect_client();
    let mut input_a = ScriptedInput::idle();
    let mut input_b = ScriptedInput::idle();

    harness.run_for(
        &mut [
            (&mut client_a, &mut input_a),
            (&mut client_b, &mut input_b),
        ],
        Duration::from_millis(900),
    );

    assert!(client_a.is_connected() && client_b.is_connected());

    // Both spawned at the same point, well inside each other's AOI: each
    // should have received an init for the other's entity.
    let a_player = client_a.world().player_entity.unwrap();
    let b_player = client_b.world().player_entity.unwrap();
    assert_ne!(a_player, b_player);

    assert!(
        client_a.world().entity_store.is_alive(b_player),
        "client A never saw client B's entity"
    );
    assert!(
        client_b.world().entity_store.is_alive(a_player),
        "client B never saw client A's entity"
    );
}

#[test]
fn disconnecting_a_client_removes_its_entity() {
    let mut harness = Harness::start();
    let mut client_a = harness.connect_client();
    let mut client_b = harness.connect_client();
    let mut input_a = ScriptedInput::idle();
    let mut input_b = ScriptedInput::idle();

    harness.run_for(
        &mut [
            (&mut client_a, &mut input_a),
            (&mut client_b, &mut input_b),
        ],
        Duration::from_millis(900),
    );
    let b_player = client_b.world().player_entity.unwrap();
    assert!(client_a.world().entity_store.is_alive(b_player));

    drop(client_b);
    harness.run_for(
        &mut [(&mut client_a, &mut input_a)],
        Duration::from_millis(700),
    );

    assert_eq!(harness.server_sim.world().clients().len(), 1);
    assert!(
        !client_a.world().entity_store.is_alive(b_player),
        "client A still sees the disconnected client's entity"
    );
}
