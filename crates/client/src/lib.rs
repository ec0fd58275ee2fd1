pub mod config;
pub mod network;
pub mod sim;

pub use config::ClientConfig;
pub use network::{ClientNetError, Network, NpcUpdateEvent, TickAdjustment};
pub use sim::{ChunkUpdateSystem, InputSource, NpcMovementSystem, Simulation, World};
