//! Message framing and batching.
//!
//! Server -> client traffic is a sequence of batches:
//!   `ServerHeader | MessageHeader | payload | MessageHeader | payload ...`
//! where the whole payload section may be zlib-compressed. Client ->
//! server traffic is one frame per message:
//!   `ClientHeader | MessageHeader | payload`
//!
//! Header byte layouts are normative; see the constants below.

use std::io::Read;

use bytes::Bytes;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;

use super::messages::{Message, MessageType};
use super::wire::{Decode, Encode, WireError};

/// Max size of a batch payload in bytes. The batch-size field is 16 bits
/// with the high bit reserved for the compression flag.
pub const MAX_BATCH_SIZE: usize = 32767;

/// The largest number of bytes sent in a single wire write. Kept under
/// typical MTU to avoid IP fragmentation.
pub const MAX_WIRE_SIZE: usize = 1450;

/// Server header: `i8 tickAdjustment | u8 adjustmentIteration | u16 batchSize`.
pub const SERVER_HEADER_SIZE: usize = 4;

/// Client header: `u8 adjustmentIteration`.
pub const CLIENT_HEADER_SIZE: usize = 1;

/// Message header: `u8 messageType | u16 messageSize`.
pub const MESSAGE_HEADER_SIZE: usize = 3;

/// Received messages larger than this can't arrive in one wire packet and
/// must be composed across multiple reads.
pub const MAX_SMALL_MESSAGE_SIZE: usize =
    MAX_WIRE_SIZE - CLIENT_HEADER_SIZE - MESSAGE_HEADER_SIZE;

/// High bit of the batch-size field: set when the payload is compressed.
const COMPRESSED_FLAG: u16 = 0x8000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerHeader {
    /// Signed tick delta the client should apply to its tick counter.
    pub tick_adjustment: i8,
    /// Bumped on each new adjustment so the client applies it exactly once.
    pub adjustment_iteration: u8,
    /// Payload length in bytes.
    pub batch_size: u16,
    pub is_compressed: bool,
}

impl ServerHeader {
    pub fn encode(&self, buf: &mut Vec<u8>) {
        debug_assert!(self.batch_size as usize <= MAX_BATCH_SIZE);
        self.tick_adjustment.encode(buf);
        self.adjustment_iteration.encode(buf);
        let size_field = if self.is_compressed {
            self.batch_size | COMPRESSED_FLAG
        } else {
            self.batch_size
        };
        size_field.encode(buf);
    }

    pub fn decode(r: &mut &[u8]) -> Result<Self, WireError> {
        let tick_adjustment = i8::decode(r)?;
        let adjustment_iteration = u8::decode(r)?;
        let size_field = u16::decode(r)?;
        Ok(ServerHeader {
            tick_adjustment,
            adjustment_iteration,
            batch_size: size_field & !COMPRESSED_FLAG,
            is_compressed: size_field & COMPRESSED_FLAG != 0,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientHeader {
    /// The latest adjustment iteration the client has applied, echoed back
    /// so the server can ignore stale tick diffs.
    pub adjustment_iteration: u8,
}

impl ClientHeader {
    pub fn encode(&self, buf: &mut Vec<u8>) {
        self.adjustment_iteration.encode(buf);
    }

    pub fn decode(r: &mut &[u8]) -> Result<Self, WireError> {
        Ok(ClientHeader {
            adjustment_iteration: u8::decode(r)?,
        })
    }
}

/// Serializes and frames a message: `u8 type | u16 size | payload`.
///
/// Returns a refcounted buffer so one framed message can sit in many
/// clients' send queues without copies. A message whose payload can't fit
/// in a batch at all is a programming error on the sender, surfaced as
/// `OversizeMessage`.
pub fn frame_message<T: Message>(message: &T) -> Result<Bytes, WireError> {
    let mut framed = Vec::with_capacity(MESSAGE_HEADER_SIZE + 64);
    (T::MESSAGE_TYPE as u8).encode(&mut framed);
    0u16.encode(&mut framed);
    message.encode(&mut framed);

    let payload_size = framed.len() - MESSAGE_HEADER_SIZE;
    if payload_size > MAX_BATCH_SIZE - MESSAGE_HEADER_SIZE {
        return Err(WireError::OversizeMessage { size: payload_size });
    }
    framed[1..3].copy_from_slice(&(payload_size as u16).to_le_bytes());
    Ok(Bytes::from(framed))
}

/// Accumulates framed messages into a batch payload.
#[derive(Debug, Default)]
pub struct BatchBuilder {
    payload: Vec<u8>,
}

impl BatchBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Appends a framed message. Returns false if it would push this batch
    /// over the max size; the caller should flush and retry in a new batch.
    pub fn try_push(&mut self, framed: &[u8]) -> bool {
        if self.payload.len() + framed.len() > MAX_BATCH_SIZE {
            return false;
        }
        self.payload.extend_from_slice(framed);
        true
    }

    pub fn take_payload(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.payload)
    }
}

/// Builds the full on-wire bytes of a server batch: header plus payload,
/// compressing the payload when it exceeds the threshold.
pub fn build_server_batch(
    tick_adjustment: i8,
    adjustment_iteration: u8,
    payload: &[u8],
    compression_threshold: usize,
) -> Result<Vec<u8>, WireError> {
    if payload.len() > MAX_BATCH_SIZE {
        return Err(WireError::OversizeMessage {
            size: payload.len(),
        });
    }

    let (body, is_compressed) = if payload.len() > compression_threshold {
        (compress(payload)?, true)
    } else {
        (payload.to_vec(), false)
    };
    if body.len() > MAX_BATCH_SIZE {
        return Err(WireError::OversizeMessage { size: body.len() });
    }

    let mut out = Vec::with_capacity(SERVER_HEADER_SIZE + body.len());
    ServerHeader {
        tick_adjustment,
        adjustment_iteration,
        batch_size: body.len() as u16,
        is_compressed,
    }
    .encode(&mut out);
    out.extend_from_slice(&body);
    Ok(out)
}

/// Recovers a batch payload from its body bytes, decompressing if the
/// header says to.
pub fn read_batch_payload(header: &ServerHeader, body: &[u8]) -> Result<Vec<u8>, WireError> {
    if body.len() != header.batch_size as usize {
        return Err(WireError::BadBatchSize(header.batch_size));
    }
    if header.is_compressed {
        decompress(body)
    } else {
        Ok(body.to_vec())
    }
}

/// Builds the on-wire bytes of one client frame.
pub fn build_client_frame(adjustment_iteration: u8, framed_message: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(CLIENT_HEADER_SIZE + framed_message.len());
    ClientHeader {
        adjustment_iteration,
    }
    .encode(&mut out);
    out.extend_from_slice(framed_message);
    out
}

/// Iterates the framed messages inside a batch payload.
pub struct MessageIter<'a> {
    remaining: &'a [u8],
}

impl<'a> MessageIter<'a> {
    pub fn new(payload: &'a [u8]) -> Self {
        Self { remaining: payload }
    }
}

impl<'a> Iterator for MessageIter<'a> {
    type Item = Result<(MessageType, &'a [u8]), WireError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining.is_empty() {
            return None;
        }

        let r = &mut self.remaining;
        let result = (|| {
            let message_type = MessageType::from_u8(u8::decode(r)?)?;
            let size = u16::decode(r)? as usize;
            if r.len() < size {
                return Err(WireError::UnexpectedEnd);
            }
            let (payload, rest) = r.split_at(size);
            *r = rest;
            Ok((message_type, payload))
        })();

        if result.is_err() {
            // Stop after a malformed header; the rest of the batch can't
            // be trusted.
            self.remaining = &[];
        }
        Some(result)
    }
}

fn compress(payload: &[u8]) -> Result<Vec<u8>, WireError> {
    use std::io::Write;
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::fast());
    encoder
        .write_all(payload)
        .and_then(|()| encoder.finish())
        .map_err(|_| WireError::BadCompression)
}

fn decompress(body: &[u8]) -> Result<Vec<u8>, WireError> {
    let mut decoder = ZlibDecoder::new(body).take((MAX_BATCH_SIZE + 1) as u64);
    let mut payload = Vec::new();
    decoder
        .read_to_end(&mut payload)
        .map_err(|_| WireError::BadCompression)?;
    if payload.len() > MAX_BATCH_SIZE {
        return Err(WireError::BadCompression);
    }
    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::messages::{ExplicitConfirmation, Heartbeat};

    #[test]
    fn server_header_bit_layout() {
        let mut buf = Vec::new();
        ServerHeader {
            tick_adjustment: -2,
            adjustment_iteration: 3,
            batch_size: 0x1234,
            is_compressed: true,
        }
        .encode(&mut buf);

        assert_eq!(buf.len(), SERVER_HEADER_SIZE);
        assert_eq!(buf[0] as i8, -2);
        assert_eq!(buf[1], 3);
        // Little-endian size with the high bit set.
        assert_eq!(u16::from_le_bytes([buf[2], buf[3]]), 0x1234 | 0x8000);

        let mut slice = buf.as_slice();
        let decoded = ServerHeader::decode(&mut slice).unwrap();
        assert_eq!(decoded.batch_size, 0x1234);
        assert!(decoded.is_compressed);
    }

    #[test]
    fn batch_round_trip_uncompressed() {
        let mut builder = BatchBuilder::new();
        assert!(builder.try_push(&frame_message(&Heartbeat { tick: 7 }).unwrap()));
        assert!(builder.try_push(&frame_message(&ExplicitConfirmation { tick: 8 }).unwrap()));

        let payload = builder.take_payload();
        let wire = build_server_batch(0, 0, &payload, MAX_BATCH_SIZE).unwrap();

        let mut slice = wire.as_slice();
        let header = ServerHeader::decode(&mut slice).unwrap();
        assert!(!header.is_compressed);
        let recovered = read_batch_payload(&header, slice).unwrap();

        let messages: Vec<_> = MessageIter::new(&recovered)
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].0, MessageType::Heartbeat);
        assert_eq!(messages[1].0, MessageType::ExplicitConfirmation);

        let mut payload0 = messages[0].1;
        assert_eq!(Heartbeat::decode(&mut payload0).unwrap().tick, 7);
    }

    #[test]
    fn batch_round_trip_compressed() {
        let mut builder = BatchBuilder::new();
        for tick in 0..200u32 {
            assert!(builder.try_push(&frame_message(&Heartbeat { tick }).unwrap()));
        }
        let payload = builder.take_payload();
        let wire = build_server_batch(1, 2, &payload, 64).unwrap();

        let mut slice = wire.as_slice();
        let header = ServerHeader::decode(&mut slice).unwrap();
        assert!(header.is_compressed);
        assert_eq!(header.tick_adjustment, 1);
        assert_eq!(header.adjustment_iteration, 2);

        let recovered = read_batch_payload(&header, slice).unwrap();
        assert_eq!(recovered, payload);
    }

    #[test]
    fn full_batch_rejects_further_messages() {
        let mut builder = BatchBuilder::new();
        let frame = vec![0u8; 1000];
        while builder.try_push(&frame) {}
        assert!(builder.len() <= MAX_BATCH_SIZE);
        assert!(builder.len() + frame.len() > MAX_BATCH_SIZE);
    }

    #[test]
    fn oversize_message_is_a_codec_error() {
        let oversize = InitScriptOversize(vec![0u8; 40_000]);
        assert!(matches!(
            frame_message(&oversize),
            Err(WireError::OversizeMessage { .. })
        ));
    }

    // A fake message used to drive the oversize path.
    struct InitScriptOversize(Vec<u8>);

    impl Encode for InitScriptOversize {
        fn encode(&self, buf: &mut Vec<u8>) {
            buf.extend_from_slice(&self.0);
        }
    }

    impl Decode for InitScriptOversize {
        fn decode(_: &mut &[u8]) -> Result<Self, WireError> {
            unimplemented!()
        }
    }

    impl Message for InitScriptOversize {
        const MESSAGE_TYPE: MessageType = MessageType::InitScriptResponse;
    }
}
