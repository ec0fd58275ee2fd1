//! A single networked client: send-side batching and the tick-adjustment
//! controller.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU8, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use bytes::Bytes;

use tessel::config::{BATCH_COMPRESSION_THRESHOLD, CLIENT_TIMEOUT_S, SIM_TICK_TIMESTEP_S};
use tessel::net::batch::{
    build_server_batch, frame_message, BatchBuilder, ClientHeader, MAX_BATCH_SIZE,
    MAX_SMALL_MESSAGE_SIZE, MESSAGE_HEADER_SIZE,
};
use tessel::net::messages::ExplicitConfirmation;
use tessel::net::{BufferPool, MessageType, NetworkId, Peer, PeerError, ReceiveStatus, WireError};

const fn ceil_to_usize(value: f64) -> usize {
    let truncated = value as usize;
    if value > truncated as f64 {
        truncated + 1
    } else {
        truncated
    }
}

/// How much time worth of tick diffs we remember.
pub const TICKDIFF_HISTORY_S: f64 = 0.5;
pub const TICKDIFF_HISTORY_LENGTH: usize =
    ceil_to_usize(TICKDIFF_HISTORY_S / SIM_TICK_TIMESTEP_S);

/// Diffs within this range (inclusive) don't trigger an adjustment.
pub const TICKDIFF_ACCEPTABLE_BOUND_LOWER: i64 = 1;
pub const TICKDIFF_ACCEPTABLE_BOUND_UPPER: i64 = 3;

/// Where we adjust clients to when they drift out of the bounds.
pub const TICKDIFF_TARGET: i64 = 2;

/// A single diff outside this range (inclusive) gets the client
/// disconnected.
pub const TICKDIFF_MAX_BOUND_LOWER: i64 = i8::MIN as i64;
pub const TICKDIFF_MAX_BOUND_UPPER: i64 =
    ceil_to_usize(CLIENT_TIMEOUT_S / SIM_TICK_TIMESTEP_S) as i64;

/// The fewest fresh diffs we'll base an adjustment on. Prevents thrashing
/// on bursts.
pub const MIN_FRESH_DIFFS: usize = 3;

/// Largest message the receive path will compose; anything bigger is a
/// protocol error.
pub const MAX_MESSAGE_SIZE: usize = MAX_BATCH_SIZE - MESSAGE_HEADER_SIZE;

struct TickDiffState {
    /// Ring of the most recent diffs, oldest first. Starts filled with the
    /// target so early adjustments aren't skewed by missing data.
    history: VecDeque<i8>,
    num_fresh_diffs: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdjustmentData {
    pub adjustment: i8,
    pub iteration: u8,
}

struct QueuedMessage {
    bytes: Bytes,
}

enum ReceivePhase {
    /// Waiting for the next client header byte.
    Idle,
    /// Composing a message too large to arrive in one packet.
    Composing {
        message_type: MessageType,
        message_size: usize,
        buffer: Vec<u8>,
        composed: usize,
    },
}

/// The result of one receive attempt against a client.
pub enum ClientReceiveResult {
    /// A whole message was read into the scratch buffer.
    Message(MessageType, usize),
    NoWaitingData,
    Disconnected,
    /// The peer sent bytes we can't parse; it has been disconnected.
    ProtocolError(WireError),
}

pub struct Client {
    net_id: NetworkId,
    peer: Arc<Peer>,

    send_queue: Mutex<VecDeque<QueuedMessage>>,
    latest_sent_sim_tick: AtomicU32,

    receive_phase: Mutex<ReceivePhase>,
    last_receive_time: Mutex<Instant>,

    tick_diffs: Mutex<TickDiffState>,
    /// Iteration of the latest adjustment we've issued.
    adjustment_iteration: AtomicU8,
    /// Latest iteration the client has echoed back.
    acked_adjustment_iteration: AtomicU8,
}

impl Client {
    pub fn new(net_id: NetworkId, peer: Arc<Peer>) -> Self {
        Self {
            net_id,
            peer,
            send_queue: Mutex::new(VecDeque::new()),
            latest_sent_sim_tick: AtomicU32::new(0),
            receive_phase: Mutex::new(ReceivePhase::Idle),
            last_receive_time: Mutex::new(Instant::now()),
            tick_diffs: Mutex::new(TickDiffState {
                history: VecDeque::from(vec![TICKDIFF_TARGET as i8; TICKDIFF_HISTORY_LENGTH]),
                num_fresh_diffs: 0,
            }),
            adjustment_iteration: AtomicU8::new(0),
            acked_adjustment_iteration: AtomicU8::new(0),
        }
    }

    pub fn net_id(&self) -> NetworkId {
        self.net_id
    }

    pub fn peer(&self) -> &Arc<Peer> {
        &self.peer
    }

    /// Checks the timeout, then returns whether the client is connected.
    pub fn is_connected(&self) -> bool {
        let last_receive = *lock(&self.last_receive_time);
        if last_receive.elapsed().as_secs_f64() > CLIENT_TIMEOUT_S {
            self.peer.disconnect();
        }
        self.peer.is_connected()
    }

    //----------------------------------------------------------------------
    // Sending
    //----------------------------------------------------------------------

    /// Queues a framed message for the next batch. `tick` should be 0 for
    /// messages not tied to a tick.
    pub fn queue_message(&self, bytes: Bytes, tick: u32) {
        if tick != 0 {
            self.latest_sent_sim_tick.fetch_max(tick, Ordering::AcqRel);
        }
        lock(&self.send_queue).push_back(QueuedMessage { bytes });
    }

    /// Flushes the send queue as one or more batches. When a tick finished
    /// with nothing queued, sends an explicit confirmation so the client
    /// can still advance its authoritative tick.
    pub fn send_waiting_messages(&self, current_tick: u32) -> Result<(), PeerError> {
        let mut queued: Vec<QueuedMessage> = {
            let mut queue = lock(&self.send_queue);
            queue.drain(..).collect()
        };

        if queued.is_empty() && self.latest_sent_sim_tick.load(Ordering::Acquire) < current_tick
        {
            let confirmation = ExplicitConfirmation { tick: current_tick };
            match frame_message(&confirmation) {
                Ok(bytes) => {
                    self.latest_sent_sim_tick.store(current_tick, Ordering::Release);
                    queued.push(QueuedMessage { bytes });
                }
                Err(error) => {
                    log::error!("failed to frame explicit confirmation: {error}");
                }
            }
        }

        if queued.is_empty() {
            return Ok(());
        }

        let adjustment = self.get_tick_adjustment();
        let mut builder = BatchBuilder::new();
        for message in &queued {
            if builder.try_push(&message.bytes) {
                continue;
            }
            // This message would push the batch over max size; flush and
            // start a new one.
            self.send_batch(&adjustment, builder.take_payload())?;
            if !builder.try_push(&message.bytes) {
                // A single message can never legitimately exceed a batch;
                // frame_message enforces that on the send side.
                log::error!(
                    "dropping oversize queued message ({} bytes) for client {}",
                    message.bytes.len(),
                    self.net_id
                );
            }
        }
        if !builder.is_empty() {
            self.send_batch(&adjustment, builder.take_payload())?;
        }
        Ok(())
    }

    fn send_batch(&self, adjustment: &AdjustmentData, payload: Vec<u8>) -> Result<(), PeerError> {
        match build_server_batch(
            adjustment.adjustment,
            adjustment.iteration,
            &payload,
            BATCH_COMPRESSION_THRESHOLD,
        ) {
            Ok(wire_bytes) => self.peer.send(&wire_bytes),
            Err(error) => {
                log::error!("failed to build batch for client {}: {error}", self.net_id);
                Ok(())
            }
        }
    }

    //----------------------------------------------------------------------
    // Receiving
    //----------------------------------------------------------------------

    /// Tries to receive one message from this client. Expects the owner to
    /// have run a readiness sweep beforehand. Successful reads land in
    /// `scratch`.
    pub fn receive_message(
        &self,
        scratch: &mut Vec<u8>,
        pool: &mut BufferPool,
    ) -> ClientReceiveResult {
        let mut phase = lock(&self.receive_phase);
        match &mut *phase {
            ReceivePhase::Idle => {
                // Client header: 1 byte of acked adjustment iteration.
                let mut header_byte = [0u8; 1];
                match self.peer.receive_some(&mut header_byte) {
                    ReceiveStatus::NoWaitingData => return ClientReceiveResult::NoWaitingData,
                    ReceiveStatus::Disconnected => return ClientReceiveResult::Disconnected,
                    ReceiveStatus::Received(_) => {}
                }
                self.touch();

                let header = ClientHeader {
                    adjustment_iteration: header_byte[0],
                };
                self.record_acked_iteration(header.adjustment_iteration);

                // Message header: type + size. Partial data loops locally.
                let mut message_header = [0u8; MESSAGE_HEADER_SIZE];
                if self.peer.receive_bytes_wait(&mut message_header).is_err() {
                    return ClientReceiveResult::Disconnected;
                }

                let message_type = match MessageType::from_u8(message_header[0]) {
                    Ok(message_type) => message_type,
                    Err(error) => {
                        self.peer.disconnect();
                        return ClientReceiveResult::ProtocolError(error);
                    }
                };
                let message_size =
                    u16::from_le_bytes([message_header[1], message_header[2]]) as usize;
                if message_size > MAX_MESSAGE_SIZE {
                    self.peer.disconnect();
                    return ClientReceiveResult::ProtocolError(WireError::OversizeMessage {
                        size: message_size,
                    });
                }

                if message_size <= MAX_SMALL_MESSAGE_SIZE {
                    // Small message: all of it is imminent, wait it in.
                    scratch.resize(message_size, 0);
                    if self.peer.receive_bytes_wait(scratch).is_err() {
                        return ClientReceiveResult::Disconnected;
                    }
                    ClientReceiveResult::Message(message_type, message_size)
                } else {
                    // Large message: compose across reads without blocking
                    // the receive loop.
                    let mut buffer = pool.acquire();
                    buffer.resize(MAX_MESSAGE_SIZE, 0);
                    *phase = ReceivePhase::Composing {
                        message_type,
                        message_size,
                        buffer,
                        composed: 0,
                    };
                    drop(phase);
                    self.continue_composing(scratch, pool)
                }
            }
            ReceivePhase::Composing { .. } => {
                drop(phase);
                self.continue_composing(scratch, pool)
            }
        }
    }

    fn continue_composing(
        &self,
        scratch: &mut Vec<u8>,
        pool: &mut BufferPool,
    ) -> ClientReceiveResult {
        let mut phase = lock(&self.receive_phase);
        let ReceivePhase::Composing {
            message_type,
            message_size,
            buffer,
            composed,
        } = &mut *phase
        else {
            return ClientReceiveResult::NoWaitingData;
        };

        while *composed < *message_size {
            match self.peer.receive_some(&mut buffer[*composed..*message_size]) {
                ReceiveStatus::Received(n) => {
                    *composed += n;
                    self.touch();
                }
                ReceiveStatus::NoWaitingData => return ClientReceiveResult::NoWaitingData,
                ReceiveStatus::Disconnected => return ClientReceiveResult::Disconnected,
            }
        }

        let message_type = *message_type;
        let message_size = *message_size;
        scratch.resize(message_size, 0);
        scratch.copy_from_slice(&buffer[..message_size]);

        let mut buffer = std::mem::take(buffer);
        buffer.resize(MAX_MESSAGE_SIZE, 0);
        pool.release(buffer);
        *phase = ReceivePhase::Idle;

        ClientReceiveResult::Message(message_type, message_size)
    }

    fn touch(&self) {
        *lock(&self.last_receive_time) = Instant::now();
    }

    //----------------------------------------------------------------------
    // Tick synchronization
    //----------------------------------------------------------------------

    /// Records a tick diff from a received message. Diffs outside the max
    /// bounds forcibly disconnect the client.
    pub fn record_tick_diff(&self, tick_diff: i64) {
        if !(TICKDIFF_MAX_BOUND_LOWER..=TICKDIFF_MAX_BOUND_UPPER).contains(&tick_diff) {
            log::warn!(
                "client {} tick diff {} outside max bounds [{}, {}], disconnecting",
                self.net_id,
                tick_diff,
                TICKDIFF_MAX_BOUND_LOWER,
                TICKDIFF_MAX_BOUND_UPPER
            );
            self.peer.disconnect();
            return;
        }

        let mut state = lock(&self.tick_diffs);
        if state.history.len() == TICKDIFF_HISTORY_LENGTH {
            state.history.pop_front();
        }
        state.history.push_back(tick_diff as i8);
        state.num_fresh_diffs = (state.num_fresh_diffs + 1).min(TICKDIFF_HISTORY_LENGTH);
    }

    fn record_acked_iteration(&self, iteration: u8) {
        self.acked_adjustment_iteration.store(iteration, Ordering::Release);
    }

    /// Calculates the adjustment to embed in the next outgoing header.
    /// Issues a new iteration only when enough fresh diffs have arrived,
    /// the previous adjustment has been acked, and the truncated mean has
    /// drifted out of the acceptable bounds.
    pub fn get_tick_adjustment(&self) -> AdjustmentData {
        let current_iteration = self.adjustment_iteration.load(Ordering::Acquire);

        // Don't stack a second adjustment on an un-acked one; the diffs in
        // the history would still reflect the old clock.
        if self.acked_adjustment_iteration.load(Ordering::Acquire) != current_iteration {
            return AdjustmentData {
                adjustment: 0,
                iteration: current_iteration,
            };
        }

        let mut state = lock(&self.tick_diffs);
        if state.num_fresh_diffs < MIN_FRESH_DIFFS {
            return AdjustmentData {
                adjustment: 0,
                iteration: current_iteration,
            };
        }

        let mean = truncated_mean(state.history.iter().map(|&diff| diff as i64));
        if (TICKDIFF_ACCEPTABLE_BOUND_LOWER..=TICKDIFF_ACCEPTABLE_BOUND_UPPER).contains(&mean) {
            return AdjustmentData {
                adjustment: 0,
                iteration: current_iteration,
            };
        }

        let adjustment = (TICKDIFF_TARGET - mean).clamp(i8::MIN as i64, i8::MAX as i64) as i8;
        let iteration = current_iteration.wrapping_add(1);
        self.adjustment_iteration.store(iteration, Ordering::Release);
        state.num_fresh_diffs = 0;

        log::info!(
            "sending tick adjustment {} (iteration {}) to client {}",
            adjustment,
            iteration,
            self.net_id
        );
        AdjustmentData {
            adjustment,
            iteration,
        }
    }
}

/// Mean with the single highest and lowest samples dropped.
fn truncated_mean(diffs: impl Iterator<Item = i64>) -> i64 {
    let mut samples: Vec<i64> = diffs.collect();
    samples.sort_unstable();
    if samples.len() > 2 {
        samples.pop();
        samples.remove(0);
    }
    if samples.is_empty() {
        return TICKDIFF_TARGET;
    }
    let sum: i64 = samples.iter().sum();
    // Round half away from zero, like the source of the diffs does.
    let len = samples.len() as i64;
    (sum + (len / 2) * sum.signum()) / len
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tessel::net::{Acceptor, SocketSet};

    fn connected_client() -> (Client, Arc<Peer>) {
        let set = Arc::new(SocketSet::new());
        let acceptor = Acceptor::bind("127.0.0.1:0", Arc::clone(&set)).unwrap();
        let addr = acceptor.local_addr().unwrap();
        let remote = Arc::new(Peer::initiate(addr).unwrap());
        let accepted = loop {
            if let Some(peer) = acceptor.accept().unwrap() {
                break peer;
            }
            std::thread::sleep(std::time::Duration::from_millis(1));
        };
        (Client::new(1, accepted), remote)
    }

    #[test]
    fn diff_outside_max_bounds_disconnects() {
        let (client, _remote) = connected_client();
        client.record_tick_diff(TICKDIFF_MAX_BOUND_UPPER + 1);
        assert!(!client.peer().is_connected());
    }

    #[test]
    fn no_adjustment_without_fresh_diffs() {
        let (client, _remote) = connected_client();
        let data = client.get_tick_adjustment();
        assert_eq!(data.adjustment, 0);
        assert_eq!(data.iteration, 0);
    }

    #[test]
    fn acceptable_diffs_produce_no_adjustment() {
        let (client, _remote) = connected_client();
        for _ in 0..MIN_FRESH_DIFFS {
            client.record_tick_diff(TICKDIFF_TARGET);
        }
        assert_eq!(client.get_tick_adjustment().adjustment, 0);
    }

    #[test]
    fn drifted_diffs_produce_an_adjustment() {
        let (client, _remote) = connected_client();
        // The whole history must drift; the truncated mean sees the
        // initial target-filled entries too.
        for _ in 0..TICKDIFF_HISTORY_LENGTH {
            client.record_tick_diff(8);
        }
        let data = client.get_tick_adjustment();
        assert_eq!(data.adjustment, (TICKDIFF_TARGET - 8) as i8);
        assert_eq!(data.iteration, 1);

        // No second adjustment until the client acks this iteration.
        for _ in 0..TICKDIFF_HISTORY_LENGTH {
            client.record_tick_diff(8);
        }
        assert_eq!(client.get_tick_adjustment().adjustment, 0);

        client.record_acked_iteration(1);
        for _ in 0..TICKDIFF_HISTORY_LENGTH {
            client.record_tick_diff(8);
        }
        let data = client.get_tick_adjustment();
        assert_eq!(data.iteration, 2);
    }

    #[test]
    fn truncated_mean_drops_extremes() {
        let samples = vec![2i64, 2, 2, 2, -100, 100];
        assert_eq!(truncated_mean(samples.into_iter()), 2);
    }

    #[test]
    fn explicit_confirmation_sent_for_quiet_ticks() {
        let (client, remote) = connected_client();
        client.send_waiting_messages(5).unwrap();

        // Header first.
        let mut header = [0u8; 4];
        remote.receive_bytes_wait(&mut header).unwrap();
        let mut slice = &header[..];
        let parsed = tessel::net::ServerHeader::decode(&mut slice).unwrap();
        assert!(!parsed.is_compressed);

        let mut body = vec![0u8; parsed.batch_size as usize];
        remote.receive_bytes_wait(&mut body).unwrap();

        let mut messages = tessel::net::MessageIter::new(&body);
        let (message_type, payload) = messages.next().unwrap().unwrap();
        assert_eq!(message_type, MessageType::ExplicitConfirmation);
        let mut payload = payload;
        use tessel::net::Decode;
        let confirmation = ExplicitConfirmation::decode(&mut payload).unwrap();
        assert_eq!(confirmation.tick, 5);

        // A second flush for the same tick sends nothing.
        client.send_waiting_messages(5).unwrap();
        assert!(messages.next().is_none());
    }
}
