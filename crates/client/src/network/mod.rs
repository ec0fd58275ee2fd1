//! The client's network layer: one connection to the server, a receive
//! thread that splits batches into typed queues, and the send path that
//! frames outgoing messages with the current adjustment-iteration ack.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use thiserror::Error;

use tessel::net::batch::{
    build_client_frame, frame_message, read_batch_payload, MessageIter, ServerHeader,
    SERVER_HEADER_SIZE,
};
use tessel::net::messages::{
    ChunkUpdate, ComponentUpdate, ConnectionResponse, EntityDelete, EntityInit,
    ExplicitConfirmation, InitScriptResponse, MovementUpdate, SpriteChange, TileUpdate,
};
use tessel::net::{Decode, Message, MessageType, Peer, PeerError, ReceiveStatus, WireError};

#[derive(Debug, Error)]
pub enum ClientNetError {
    #[error("failed to connect: {0}")]
    Connect(#[from] std::io::Error),
    #[error("server disconnected")]
    Disconnected,
}

/// A server-issued tick adjustment, delivered to the simulation exactly
/// once per iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickAdjustment {
    pub adjustment: i8,
    pub iteration: u8,
}

/// Events consumed by the NPC replication system, in receive order.
#[derive(Debug, Clone)]
pub enum NpcUpdateEvent {
    Update(MovementUpdate),
    /// Every tick up to and including this one is confirmed: any movement
    /// changes for those ticks have already been delivered.
    Confirmation(u32),
}

pub struct InboundQueues {
    pub adjustments: Receiver<TickAdjustment>,
    pub connection_responses: Receiver<ConnectionResponse>,
    pub player_movement_updates: Receiver<MovementUpdate>,
    pub npc_update_events: Receiver<NpcUpdateEvent>,
    pub component_updates: Receiver<ComponentUpdate>,
    pub entity_inits: Receiver<EntityInit>,
    pub entity_deletes: Receiver<EntityDelete>,
    pub chunk_updates: Receiver<ChunkUpdate>,
    pub tile_updates: Receiver<TileUpdate>,
    pub sprite_changes: Receiver<SpriteChange>,
    pub init_script_responses: Receiver<InitScriptResponse>,
}

struct QueueSenders {
    adjustments: Sender<TickAdjustment>,
    connection_responses: Sender<ConnectionResponse>,
    player_movement_updates: Sender<MovementUpdate>,
    npc_update_events: Sender<NpcUpdateEvent>,
    component_updates: Sender<ComponentUpdate>,
    entity_inits: Sender<EntityInit>,
    entity_deletes: Sender<EntityDelete>,
    chunk_updates: Sender<ChunkUpdate>,
    tile_updates: Sender<TileUpdate>,
    sprite_changes: Sender<SpriteChange>,
    init_script_responses: Sender<InitScriptResponse>,
}

pub struct Network {
    peer: Arc<Peer>,
    /// The latest adjustment iteration the simulation has applied; echoed
    /// in every outgoing client header.
    acked_adjustment_iteration: Arc<AtomicU8>,
    exit_requested: Arc<AtomicBool>,
    receive_thread: Option<JoinHandle<()>>,
}

impl Network {
    /// Connects to the server and starts the receive thread.
    pub fn connect(server_addr: &str) -> Result<(Self, InboundQueues), ClientNetError> {
        let peer = Arc::new(Peer::initiate(server_addr)?);

        let (senders, queues) = make_queues();
        let acked_adjustment_iteration = Arc::new(AtomicU8::new(0));
        let exit_requested = Arc::new(AtomicBool::new(false));

        let receive_thread = {
            let peer = Arc::clone(&peer);
            let exit_requested = Arc::clone(&exit_requested);
            std::thread::Builder::new()
                .name("client-receive".into())
                .spawn(move || receive_loop(&peer, &senders, &exit_requested))
                .map_err(ClientNetError::Connect)?
        };

        Ok((
            Self {
                peer,
                acked_adjustment_iteration,
                exit_requested,
                receive_thread: Some(receive_thread),
            },
            queues,
        ))
    }

    pub fn is_connected(&self) -> bool {
        self.peer.is_connected()
    }

    /// Frames and sends one message, carrying the current adjustment ack.
    pub fn send<T: Message>(&self, message: &T) -> Result<(), ClientNetError> {
        let framed = frame_message(message).map_err(|error| {
            log::error!("fatal: failed to frame outgoing message: {error}");
            ClientNetError::Disconnected
        })?;
        let wire_bytes = build_client_frame(
            self.acked_adjustment_iteration.load(Ordering::Acquire),
            &framed,
        );
        self.peer.send(&wire_bytes).map_err(|PeerError::Disconnected| {
            ClientNetError::Disconnected
        })
    }

    /// Records that the simulation has applied an adjustment iteration.
    pub fn ack_adjustment(&self, iteration: u8) {
        self.acked_adjustment_iteration
            .store(iteration, Ordering::Release);
    }
}

impl Drop for Network {
    fn drop(&mut self) {
        self.exit_requested.store(true, Ordering::Release);
        self.peer.disconnect();
        if let Some(handle) = self.receive_thread.take() {
            let _ = handle.join();
        }
    }
}

fn make_queues() -> (QueueSenders, InboundQueues) {
    let (adjustment_tx, adjustment_rx) = channel();
    let (connection_tx, connection_rx) = channel();
    let (player_tx, player_rx) = channel();
    let (npc_tx, npc_rx) = channel();
    let (component_tx, component_rx) = channel();
    let (init_tx, init_rx) = channel();
    let (delete_tx, delete_rx) = channel();
    let (chunk_tx, chunk_rx) = channel();
    let (tile_tx, tile_rx) = channel();
    let (sprite_tx, sprite_rx) = channel();
    let (script_tx, script_rx) = channel();

    (
        QueueSenders {
            adjustments: adjustment_tx,
            connection_responses: connection_tx,
            player_movement_updates: player_tx,
            npc_update_events: npc_tx,
            component_updates: component_tx,
            entity_inits: init_tx,
            entity_deletes: delete_tx,
            chunk_updates: chunk_tx,
            tile_updates: tile_tx,
            sprite_changes: sprite_tx,
            init_script_responses: script_tx,
        },
        InboundQueues {
            adjustments: adjustment_rx,
            connection_responses: connection_rx,
            player_movement_updates: player_rx,
            npc_update_events: npc_rx,
            component_updates: component_rx,
            entity_inits: init_rx,
            entity_deletes: delete_rx,
            chunk_updates: chunk_rx,
            tile_updates: tile_rx,
            sprite_changes: sprite_rx,
            init_script_responses: script_rx,
        },
    )
}

fn receive_loop(peer: &Arc<Peer>, senders: &QueueSenders, exit_requested: &Arc<AtomicBool>) {
    // The iteration we've already forwarded; duplicate headers for the
    // same iteration are ignored. Both sides start at 0.
    let mut last_adjustment_iteration = 0u8;

    while !exit_requested.load(Ordering::Acquire) {
        let mut header_bytes = [0u8; SERVER_HEADER_SIZE];
        match wait_for_bytes(peer, &mut header_bytes, exit_requested) {
            Ok(()) => {}
            Err(WaitError::Exit) => break,
            Err(WaitError::Disconnected) => {
                log::info!("server connection closed");
                break;
            }
        }

        let mut slice = &header_bytes[..];
        let header = match ServerHeader::decode(&mut slice) {
            Ok(header) => header,
            Err(error) => {
                log::error!("bad server header: {error}");
                peer.disconnect();
                break;
            }
        };

        if header.adjustment_iteration != last_adjustment_iteration {
            if header.tick_adjustment != 0 {
                let _ = senders.adjustments.send(TickAdjustment {
                    adjustment: header.tick_adjustment,
                    iteration: header.adjustment_iteration,
                });
            }
            last_adjustment_iteration = header.adjustment_iteration;
        }

        let mut body = vec![0u8; header.batch_size as usize];
        match wait_for_bytes(peer, &mut body, exit_requested) {
            Ok(()) => {}
            Err(_) => break,
        }

        let payload = match read_batch_payload(&header, &body) {
            Ok(payload) => payload,
            Err(error) => {
                log::error!("bad batch from server: {error}");
                peer.disconnect();
                break;
            }
        };

        if let Err(error) = dispatch_batch(&payload, senders) {
            log::error!("bad message in batch: {error}");
            peer.disconnect();
            break;
        }
    }
}

fn dispatch_batch(payload: &[u8], senders: &QueueSenders) -> Result<(), WireError> {
    // The highest tick any message in this batch referenced; implicitly
    // confirms NPC data for every tick up to it.
    let mut confirmed_tick: Option<u32> = None;

    for item in MessageIter::new(payload) {
        let (message_type, mut message_payload) = item?;
        let r = &mut message_payload;
        match message_type {
            MessageType::ConnectionResponse => {
                let response = ConnectionResponse::decode(r)?;
                let _ = senders.connection_responses.send(response);
            }
            MessageType::MovementUpdate => {
                let update = MovementUpdate::decode(r)?;
                confirmed_tick = confirmed_tick.max(Some(update.tick));
                let _ = senders.player_movement_updates.send(update.clone());
                let _ = senders
                    .npc_update_events
                    .send(NpcUpdateEvent::Update(update));
            }
            MessageType::ComponentUpdate => {
                let update = ComponentUpdate::decode(r)?;
                confirmed_tick = confirmed_tick.max(Some(update.tick));
                let _ = senders.component_updates.send(update);
            }
            MessageType::EntityInit => {
                let init = EntityInit::decode(r)?;
                let _ = senders.entity_inits.send(init);
            }
            MessageType::EntityDelete => {
                let delete = EntityDelete::decode(r)?;
                let _ = senders.entity_deletes.send(delete);
            }
            MessageType::ChunkUpdate => {
                let update = ChunkUpdate::decode(r)?;
                let _ = senders.chunk_updates.send(update);
            }
            MessageType::TileUpdate => {
                let update = TileUpdate::decode(r)?;
                let _ = senders.tile_updates.send(update);
            }
            MessageType::ExplicitConfirmation => {
                let confirmation = ExplicitConfirmation::decode(r)?;
                confirmed_tick = confirmed_tick.max(Some(confirmation.tick));
            }
            MessageType::SpriteChange => {
                let change = SpriteChange::decode(r)?;
                confirmed_tick = confirmed_tick.max(Some(change.tick));
                let _ = senders.sprite_changes.send(change);
            }
            MessageType::InitScriptResponse => {
                let response = InitScriptResponse::decode(r)?;
                let _ = senders.init_script_responses.send(response);
            }
            MessageType::Heartbeat => {
                let heartbeat = tessel::net::messages::Heartbeat::decode(r)?;
                confirmed_tick = confirmed_tick.max(Some(heartbeat.tick));
            }
            other => {
                return Err(WireError::UnknownMessageType(other as u8));
            }
        }
    }

    if let Some(tick) = confirmed_tick {
        let _ = senders
            .npc_update_events
            .send(NpcUpdateEvent::Confirmation(tick));
    }
    Ok(())
}

enum WaitError {
    Exit,
    Disconnected,
}

fn wait_for_bytes(
    peer: &Arc<Peer>,
    buf: &mut [u8],
    exit_requested: &Arc<AtomicBool>,
) -> Result<(), WaitError> {
    let mut received = 0;
    while received < buf.len() {
        if exit_requested.load(Ordering::Acquire) {
            return Err(WaitError::Exit);
        }
        match peer.receive_some(&mut buf[received..]) {
            ReceiveStatus::Received(n) => received += n,
            ReceiveStatus::NoWaitingData => std::thread::sleep(Duration::from_millis(1)),
            ReceiveStatus::Disconnected => return Err(WaitError::Disconnected),
        }
    }
    Ok(())
}
