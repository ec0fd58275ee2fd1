pub mod batch;
pub mod messages;
pub mod peer;
pub mod wire;

pub use batch::{
    build_client_frame, build_server_batch, frame_message, read_batch_payload, BatchBuilder,
    ClientHeader, MessageIter, ServerHeader, CLIENT_HEADER_SIZE, MAX_BATCH_SIZE,
    MAX_SMALL_MESSAGE_SIZE, MAX_WIRE_SIZE, MESSAGE_HEADER_SIZE, SERVER_HEADER_SIZE,
};
pub use messages::{Message, MessageType};
pub use peer::{Acceptor, BufferPool, Peer, PeerError, ReceiveStatus, SocketSet};
pub use wire::{Decode, Encode, WireError};

/// Identifies one client connection on the server. Reused after the client
/// disconnects.
pub type NetworkId = u32;
