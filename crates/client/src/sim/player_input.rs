//! Samples local input and tells the server when it changes.

use tessel::input::{Input, InputFlags, InputHistory};
use tessel::net::messages::{Heartbeat, InputChangeRequest};

use crate::network::Network;

use super::world::World;

/// Supplies the player's current input bits. The windowing/UI layer
/// implements this; tests drive it with scripted values.
pub trait InputSource {
    fn sample(&mut self) -> InputFlags;
}

pub struct PlayerInputSystem {
    previous_input: InputFlags,
}

impl Default for PlayerInputSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl PlayerInputSystem {
    pub fn new() -> Self {
        Self {
            previous_input: InputFlags::empty(),
        }
    }

    /// Samples input for this tick, records it in the player's history,
    /// and sends either an input change or a heartbeat. The server needs
    /// something tick-stamped from us every tick to keep its tick-diff
    /// history fresh.
    pub fn update(
        &mut self,
        world: &mut World,
        network: &Network,
        input_source: &mut dyn InputSource,
        current_tick: u32,
    ) {
        let Some(player) = world.player_entity else {
            return;
        };

        let input = input_source.sample();
        let changed = input != self.previous_input;
        self.previous_input = input;

        let _ = world.entity_store.replace(player, Input::new(input));
        if let Some(history) = world.entity_store.get_mut::<InputHistory>(player) {
            history.push(input);
        }

        if changed {
            let _ = network.send(&InputChangeRequest {
                tick: current_tick,
                entity: player,
                input: Input::new(input),
            });
        } else {
            let _ = network.send(&Heartbeat { tick: current_tick });
        }
    }
}
