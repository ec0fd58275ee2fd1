//! The network runtime's two worker threads.
//!
//! The accept/receive thread accepts pending connections, sweeps for
//! disconnects, and drains every waiting message into the typed queues.
//! The send thread parks on a condvar until the simulation signals end of
//! tick, then flushes every client's batch under a read lock.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Condvar, Mutex, RwLock};
use std::thread::JoinHandle;

use tessel::config::INACTIVE_DELAY_TIME_MS;
use tessel::net::{Acceptor, BufferPool, NetworkId, SocketSet};

use super::client::{Client, ClientReceiveResult, MAX_MESSAGE_SIZE};
use super::message_processor::{ClientConnectionEvent, MessageProcessor};

pub type ClientMap = HashMap<NetworkId, Arc<Client>>;

struct NetworkIdPool {
    next: NetworkId,
    free: Vec<NetworkId>,
}

impl NetworkIdPool {
    fn new() -> Self {
        Self {
            next: 1,
            free: Vec::new(),
        }
    }

    fn reserve(&mut self) -> NetworkId {
        if let Some(id) = self.free.pop() {
            id
        } else {
            let id = self.next;
            self.next += 1;
            id
        }
    }

    fn release(&mut self, id: NetworkId) {
        self.free.push(id);
    }
}

#[derive(Default)]
pub struct SendSignal {
    /// The tick whose outputs should be flushed, set by the simulation at
    /// end of tick. Carried through the signal so the send thread never
    /// races the tick counter.
    requested_tick: Mutex<Option<u32>>,
    condvar: Condvar,
}

impl SendSignal {
    pub fn notify(&self, tick: Option<u32>) {
        let mut requested = self
            .requested_tick
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *requested = tick;
        drop(requested);
        self.condvar.notify_one();
    }
}

pub struct ClientHandler {
    exit_requested: Arc<AtomicBool>,
    send_signal: Arc<SendSignal>,
    receive_thread: Option<JoinHandle<()>>,
    send_thread: Option<JoinHandle<()>>,
}

impl ClientHandler {
    pub fn spawn(
        acceptor: Acceptor,
        client_set: Arc<SocketSet>,
        client_map: Arc<RwLock<ClientMap>>,
        processor: MessageProcessor,
        current_tick: Arc<AtomicU32>,
        max_clients: usize,
    ) -> Self {
        let exit_requested = Arc::new(AtomicBool::new(false));
        let send_signal = Arc::new(SendSignal::default());

        let receive_thread = {
            let exit_requested = Arc::clone(&exit_requested);
            let client_map = Arc::clone(&client_map);
            let current_tick = Arc::clone(&current_tick);
            std::thread::Builder::new()
                .name("server-receive".into())
                .spawn(move || {
                    service_clients(
                        &acceptor,
                        &client_set,
                        &client_map,
                        &processor,
                        &current_tick,
                        &exit_requested,
                        max_clients,
                    );
                })
                .expect("failed to spawn receive thread")
        };

        let send_thread = {
            let exit_requested = Arc::clone(&exit_requested);
            let send_signal = Arc::clone(&send_signal);
            let client_map = Arc::clone(&client_map);
            std::thread::Builder::new()
                .name("server-send".into())
                .spawn(move || {
                    send_client_updates(&send_signal, &client_map, &exit_requested);
                })
                .expect("failed to spawn send thread")
        };

        Self {
            exit_requested,
            send_signal,
            receive_thread: Some(receive_thread),
            send_thread: Some(send_thread),
        }
    }

    /// Wakes the send thread to flush every client's pending batch for
    /// the given completed tick.
    pub fn begin_send_client_updates(&self, completed_tick: u32) {
        self.send_signal.notify(Some(completed_tick));
    }
}

impl Drop for ClientHandler {
    fn drop(&mut self) {
        self.exit_requested.store(true, Ordering::Release);
        self.send_signal.notify(None);
        if let Some(handle) = self.receive_thread.take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.send_thread.take() {
            let _ = handle.join();
        }
    }
}

fn service_clients(
    acceptor: &Acceptor,
    client_set: &Arc<SocketSet>,
    client_map: &Arc<RwLock<ClientMap>>,
    processor: &MessageProcessor,
    current_tick: &Arc<AtomicU32>,
    exit_requested: &Arc<AtomicBool>,
    max_clients: usize,
) {
    let mut id_pool = NetworkIdPool::new();
    let mut scratch: Vec<u8> = Vec::new();
    let mut buffer_pool = BufferPool::new(MAX_MESSAGE_SIZE);

    while !exit_requested.load(Ordering::Acquire) {
        accept_new_clients(acceptor, client_map, processor, &mut id_pool, max_clients);
        erase_disconnected_clients(client_set, client_map, processor, &mut id_pool);

        // Snapshot the clients so we don't hold the lock while receiving.
        let clients: Vec<Arc<Client>> = {
            let map = client_map.read().unwrap_or_else(|poisoned| poisoned.into_inner());
            map.values().cloned().collect()
        };

        let mut num_received = 0;
        if !clients.is_empty() {
            client_set.check_sockets(0);
            for client in &clients {
                num_received +=
                    receive_client_messages(client, processor, current_tick, &mut scratch, &mut buffer_pool);
            }
        }

        if num_received == 0 {
            std::thread::sleep(std::time::Duration::from_millis(INACTIVE_DELAY_TIME_MS));
        }
    }
}

fn accept_new_clients(
    acceptor: &Acceptor,
    client_map: &Arc<RwLock<ClientMap>>,
    processor: &MessageProcessor,
    id_pool: &mut NetworkIdPool,
    max_clients: usize,
) {
    let client_count = {
        let map = client_map.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        map.len()
    };
    if client_count >= max_clients {
        while acceptor.reject() {
            log::info!("rejected connection attempt: already at maximum connected clients");
        }
        return;
    }

    loop {
        match acceptor.accept() {
            Ok(Some(peer)) => {
                let net_id = id_pool.reserve();
                log::info!("new client connected, assigning net id {net_id}");

                let client = Arc::new(Client::new(net_id, peer));
                {
                    let mut map = client_map
                        .write()
                        .unwrap_or_else(|poisoned| poisoned.into_inner());
                    map.insert(net_id, client);
                }

                let _ = processor
                    .senders()
                    .connection_events
                    .send(ClientConnectionEvent::Connected(net_id));
            }
            Ok(None) => break,
            Err(error) => {
                log::error!("accept failed: {error}");
                break;
            }
        }
    }
}

fn erase_disconnected_clients(
    client_set: &Arc<SocketSet>,
    client_map: &Arc<RwLock<ClientMap>>,
    processor: &MessageProcessor,
    id_pool: &mut NetworkIdPool,
) {
    let disconnected: Vec<(NetworkId, Arc<Client>)> = {
        let map = client_map.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        map.iter()
            .filter(|(_, client)| !client.is_connected())
            .map(|(&net_id, client)| (net_id, Arc::clone(client)))
            .collect()
    };

    for (net_id, client) in disconnected {
        {
            let mut map = client_map
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            map.remove(&net_id);
        }
        client.peer().disconnect();
        client_set.remove(client.peer());
        id_pool.release(net_id);

        log::info!("erased disconnected client with net id {net_id}");
        let _ = processor
            .senders()
            .connection_events
            .send(ClientConnectionEvent::Disconnected(net_id));
    }
}

fn receive_client_messages(
    client: &Arc<Client>,
    processor: &MessageProcessor,
    current_tick: &Arc<AtomicU32>,
    scratch: &mut Vec<u8>,
    buffer_pool: &mut BufferPool,
) -> usize {
    let mut num_received = 0;
    loop {
        match client.receive_message(scratch, buffer_pool) {
            ClientReceiveResult::Message(message_type, size) => {
                num_received += 1;
                match processor.process_received_message(
                    client.net_id(),
                    message_type,
                    &scratch[..size],
                ) {
                    Ok(Some(message_tick)) => {
                        let tick_diff =
                            message_tick as i64 - current_tick.load(Ordering::Acquire) as i64;
                        client.record_tick_diff(tick_diff);
                    }
                    Ok(None) => {}
                    Err(error) => {
                        log::warn!(
                            "protocol error from client {}: {error}; disconnecting",
                            client.net_id()
                        );
                        client.peer().disconnect();
                        break;
                    }
                }
            }
            ClientReceiveResult::ProtocolError(error) => {
                log::warn!(
                    "protocol error from client {}: {error}; disconnecting",
                    client.net_id()
                );
                break;
            }
            ClientReceiveResult::NoWaitingData | ClientReceiveResult::Disconnected => break,
        }
    }
    num_received
}

fn send_client_updates(
    send_signal: &Arc<SendSignal>,
    client_map: &Arc<RwLock<ClientMap>>,
    exit_requested: &Arc<AtomicBool>,
) {
    while !exit_requested.load(Ordering::Acquire) {
        let tick = {
            let mut requested = send_signal
                .requested_tick
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            loop {
                if exit_requested.load(Ordering::Acquire) {
                    return;
                }
                if let Some(tick) = requested.take() {
                    break tick;
                }
                requested = send_signal
                    .condvar
                    .wait(requested)
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
            }
        };

        let map = client_map.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        for client in map.values() {
            if client.send_waiting_messages(tick).is_err() {
                // The peer is marked disconnected; the receive thread's
                // next sweep erases it.
            }
        }
    }
}
