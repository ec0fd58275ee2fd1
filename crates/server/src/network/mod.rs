//! The server's network runtime: client map, worker threads, and the send
//! interface the simulation uses.

pub mod client;
pub mod client_handler;
pub mod message_processor;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, RwLock};

use tessel::net::{frame_message, Acceptor, Message, NetworkId, SocketSet};

use crate::config::ServerConfig;

pub use client::Client;
pub use client_handler::{ClientHandler, ClientMap};
pub use message_processor::{
    inbound_channels, ClientConnectionEvent, InboundQueues, MessageProcessor,
};

pub struct Network {
    client_map: Arc<RwLock<ClientMap>>,
    current_tick: Arc<AtomicU32>,
    handler: ClientHandler,
    local_addr: SocketAddr,
}

impl Network {
    /// Binds the listener and starts the receive and send threads.
    /// Returns the network plus the simulation-side message queues.
    pub fn new(
        config: &ServerConfig,
        current_tick: Arc<AtomicU32>,
    ) -> std::io::Result<(Self, InboundQueues)> {
        let client_set = Arc::new(SocketSet::new());
        let acceptor = Acceptor::bind(
            format!("{}:{}", config.bind_address, config.port),
            Arc::clone(&client_set),
        )?;
        let local_addr = acceptor.local_addr()?;

        let client_map: Arc<RwLock<ClientMap>> = Arc::new(RwLock::new(ClientMap::new()));
        let (senders, queues) = inbound_channels();
        let processor = MessageProcessor::new(senders);

        let handler = ClientHandler::spawn(
            acceptor,
            client_set,
            Arc::clone(&client_map),
            processor,
            Arc::clone(&current_tick),
            config.max_clients,
        );

        Ok((
            Self {
                client_map,
                current_tick,
                handler,
                local_addr,
            },
            queues,
        ))
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn current_tick(&self) -> u32 {
        self.current_tick.load(Ordering::Acquire)
    }

    /// Serializes, frames, and queues a message for one client. The
    /// message goes out with the next batch flush. `message_tick` should
    /// be the tick the message belongs to, or 0 for unticked messages.
    pub fn send<T: Message>(&self, net_id: NetworkId, message: &T, message_tick: u32) {
        self.send_to_many(std::slice::from_ref(&net_id), message, message_tick);
    }

    /// Like `send`, but serializes once and queues the same refcounted
    /// frame for every recipient.
    pub fn send_to_many<T: Message>(
        &self,
        net_ids: &[NetworkId],
        message: &T,
        message_tick: u32,
    ) {
        let framed = match frame_message(message) {
            Ok(framed) => framed,
            Err(error) => {
                // An oversize message built by the server is a programming
                // error, not peer misbehavior.
                log::error!("fatal: failed to frame outgoing message: {error}");
                debug_assert!(false, "oversize server message");
                return;
            }
        };

        let map = self
            .client_map
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        for net_id in net_ids {
            if let Some(client) = map.get(net_id) {
                client.queue_message(framed.clone(), message_tick);
            }
        }
    }

    /// Forcibly disconnects a client. The receive thread erases it on its
    /// next sweep, and the simulation observes the disconnect event after
    /// that.
    pub fn disconnect_client(&self, net_id: NetworkId) {
        let map = self
            .client_map
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(client) = map.get(&net_id) {
            client.peer().disconnect();
        }
    }

    /// Signals the send thread to flush every client's pending batch for
    /// the tick that just completed.
    pub fn begin_send_client_updates(&self) {
        self.handler
            .begin_send_client_updates(self.current_tick());
    }

    pub fn client_count(&self) -> usize {
        self.client_map
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}
