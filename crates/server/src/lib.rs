pub mod config;
pub mod network;
pub mod sim;

pub use config::{ServerConfig, SpawnStrategy};
pub use network::Network;
pub use sim::{Simulation, World};
