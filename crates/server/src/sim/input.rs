//! Applies client input messages at the tick they were intended for.
//!
//! Clients run ahead of the server, so inputs normally arrive early and
//! wait in the pending buffer until their tick comes up. An input that
//! arrives after its tick has passed is dropped, and the entity's input
//! is zeroed instead of left stale, so the entity doesn't keep running on
//! an input the client has already released.

use std::collections::BTreeMap;

use tessel::input::Input;
use tessel::net::messages::InputChangeRequest;
use tessel::net::NetworkId;

use crate::network::InboundQueues;

use super::world::World;

#[derive(Default)]
pub struct InputSystem {
    pending: BTreeMap<u32, Vec<(NetworkId, InputChangeRequest)>>,
}

impl InputSystem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, world: &mut World, queues: &InboundQueues, current_tick: u32) {
        while let Ok((net_id, request)) = queues.inputs.try_recv() {
            self.pending
                .entry(request.tick)
                .or_default()
                .push((net_id, request));
        }

        // Everything with tick <= current is either due now or late.
        let mut due: Vec<u32> = self
            .pending
            .range(..=current_tick)
            .map(|(&tick, _)| tick)
            .collect();
        due.sort_unstable();

        for tick in due {
            let Some(requests) = self.pending.remove(&tick) else {
                continue;
            };
            for (net_id, request) in requests {
                let Some(entity) = world.client_entity(net_id) else {
                    continue;
                };
                // The id in the payload isn't trusted; clients only ever
                // drive their own entity.
                if request.entity != entity {
                    log::warn!(
                        "client {net_id} sent input for entity {} instead of its own",
                        request.entity
                    );
                    continue;
                }

                if tick < current_tick {
                    log::warn!(
                        "dropped late input from client {net_id} (message tick {tick}, \
                         current {current_tick}); zeroing entity input"
                    );
                    let _ = world.entity_store.replace(entity, Input::default());
                } else {
                    let _ = world.entity_store.replace(entity, request.input);
                }
            }
        }
    }
}
