//! Decodes received messages and routes them into the simulation's typed
//! queues.
//!
//! Each queue is single-producer (the receive thread) single-consumer (the
//! simulation thread). Messages that can't legitimately come from a client
//! are protocol errors and get the sender disconnected.

use std::sync::mpsc::{channel, Receiver, Sender};

use tessel::net::messages::{
    ChunkUpdateRequest, ComponentUpdateRequest, Heartbeat, InitScriptRequest,
    InputChangeRequest, SpriteChangeRequest, TileUpdateRequest,
};
use tessel::net::{Decode, MessageType, NetworkId, WireError};

/// Connect/disconnect notifications, observed by the simulation at the
/// start of its next tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientConnectionEvent {
    Connected(NetworkId),
    Disconnected(NetworkId),
}

pub struct QueueSenders {
    pub connection_events: Sender<ClientConnectionEvent>,
    pub inputs: Sender<(NetworkId, InputChangeRequest)>,
    pub tile_updates: Sender<(NetworkId, TileUpdateRequest)>,
    pub chunk_requests: Sender<(NetworkId, ChunkUpdateRequest)>,
    pub component_requests: Sender<(NetworkId, ComponentUpdateRequest)>,
    pub sprite_changes: Sender<(NetworkId, SpriteChangeRequest)>,
    pub init_script_requests: Sender<(NetworkId, InitScriptRequest)>,
}

/// The simulation-side ends of the queues.
pub struct InboundQueues {
    pub connection_events: Receiver<ClientConnectionEvent>,
    pub inputs: Receiver<(NetworkId, InputChangeRequest)>,
    pub tile_updates: Receiver<(NetworkId, TileUpdateRequest)>,
    pub chunk_requests: Receiver<(NetworkId, ChunkUpdateRequest)>,
    pub component_requests: Receiver<(NetworkId, ComponentUpdateRequest)>,
    pub sprite_changes: Receiver<(NetworkId, SpriteChangeRequest)>,
    pub init_script_requests: Receiver<(NetworkId, InitScriptRequest)>,
}

pub fn inbound_channels() -> (QueueSenders, InboundQueues) {
    let (connection_tx, connection_rx) = channel();
    let (input_tx, input_rx) = channel();
    let (tile_tx, tile_rx) = channel();
    let (chunk_tx, chunk_rx) = channel();
    let (component_tx, component_rx) = channel();
    let (sprite_tx, sprite_rx) = channel();
    let (script_tx, script_rx) = channel();

    (
        QueueSenders {
            connection_events: connection_tx,
            inputs: input_tx,
            tile_updates: tile_tx,
            chunk_requests: chunk_tx,
            component_requests: component_tx,
            sprite_changes: sprite_tx,
            init_script_requests: script_tx,
        },
        InboundQueues {
            connection_events: connection_rx,
            inputs: input_rx,
            tile_updates: tile_rx,
            chunk_requests: chunk_rx,
            component_requests: component_rx,
            sprite_changes: sprite_rx,
            init_script_requests: script_rx,
        },
    )
}

pub struct MessageProcessor {
    senders: QueueSenders,
}

impl MessageProcessor {
    pub fn new(senders: QueueSenders) -> Self {
        Self { senders }
    }

    pub fn senders(&self) -> &QueueSenders {
        &self.senders
    }

    /// Decodes one message and dispatches it. Returns the message's tick
    /// number if it carried one, so the caller can record a tick diff.
    ///
    /// The sender's network id is stamped into the dispatch tuple; ids
    /// inside message payloads are never trusted to identify the sender.
    pub fn process_received_message(
        &self,
        net_id: NetworkId,
        message_type: MessageType,
        mut payload: &[u8],
    ) -> Result<Option<u32>, WireError> {
        let r = &mut payload;
        match message_type {
            MessageType::Heartbeat => {
                let heartbeat = Heartbeat::decode(r)?;
                Ok(Some(heartbeat.tick))
            }
            MessageType::InputChangeRequest => {
                let request = InputChangeRequest::decode(r)?;
                let tick = request.tick;
                let _ = self.senders.inputs.send((net_id, request));
                Ok(Some(tick))
            }
            MessageType::TileUpdateRequest => {
                let request = TileUpdateRequest::decode(r)?;
                let _ = self.senders.tile_updates.send((net_id, request));
                Ok(None)
            }
            MessageType::ChunkUpdateRequest => {
                let request = ChunkUpdateRequest::decode(r)?;
                let _ = self.senders.chunk_requests.send((net_id, request));
                Ok(None)
            }
            MessageType::ComponentUpdateRequest => {
                let request = ComponentUpdateRequest::decode(r)?;
                let _ = self.senders.component_requests.send((net_id, request));
                Ok(None)
            }
            MessageType::SpriteChangeRequest => {
                let request = SpriteChangeRequest::decode(r)?;
                let _ = self.senders.sprite_changes.send((net_id, request));
                Ok(None)
            }
            MessageType::InitScriptRequest => {
                let request = InitScriptRequest::decode(r)?;
                let _ = self.senders.init_script_requests.send((net_id, request));
                Ok(None)
            }
            // Server-to-client types have no business arriving here.
            other => Err(WireError::UnknownMessageType(other as u8)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessel::input::{Input, InputFlags};
    use tessel::net::Encode;
    use tessel::EntityId;

    fn encoded<T: Encode>(value: &T) -> Vec<u8> {
        let mut buf = Vec::new();
        value.encode(&mut buf);
        buf
    }

    #[test]
    fn input_requests_are_queued_with_sender_id() {
        let (senders, queues) = inbound_channels();
        let processor = MessageProcessor::new(senders);

        let request = InputChangeRequest {
            tick: 77,
            entity: EntityId::from_bits(5),
            input: Input::new(InputFlags::EAST),
        };
        let tick = processor
            .process_received_message(3, MessageType::InputChangeRequest, &encoded(&request))
            .unwrap();

        assert_eq!(tick, Some(77));
        let (net_id, queued) = queues.inputs.try_recv().unwrap();
        assert_eq!(net_id, 3);
        assert_eq!(queued, request);
    }

    #[test]
    fn heartbeats_carry_a_tick_but_queue_nothing() {
        let (senders, queues) = inbound_channels();
        let processor = MessageProcessor::new(senders);

        let tick = processor
            .process_received_message(
                1,
                MessageType::Heartbeat,
                &encoded(&Heartbeat { tick: 12 }),
            )
            .unwrap();
        assert_eq!(tick, Some(12));
        assert!(queues.inputs.try_recv().is_err());
    }

    #[test]
    fn server_only_types_are_protocol_errors() {
        let (senders, _queues) = inbound_channels();
        let processor = MessageProcessor::new(senders);

        let result = processor.process_received_message(1, MessageType::MovementUpdate, &[]);
        assert!(result.is_err());
    }
}
