//! Serves entity init scripts to clients that ask for them.

use tessel::net::messages::InitScriptResponse;

use crate::network::{InboundQueues, Network};

use super::world::World;

pub fn update(world: &mut World, network: &Network, queues: &InboundQueues) {
    while let Ok((net_id, request)) = queues.init_script_requests.try_recv() {
        if !world.entity_store.is_alive(request.entity) {
            continue;
        }
        let script = world
            .init_scripts
            .get(&request.entity)
            .cloned()
            .unwrap_or_default();
        network.send(
            net_id,
            &InitScriptResponse {
                entity: request.entity,
                script,
            },
            0,
        );
    }
}
