//! Buffer-streaming core of the audio/MIDI network transport.
//!
//! This crate turns one processing cycle's worth of audio and MIDI into a
//! deterministic sequence of MTU-bounded packets, and turns received packets
//! back into per-port buffers. It implements the streaming side of the wire
//! model defined in [`audiospan_proto`].
//!
//! ## Scope
//!
//! - [`geometry`]: how a period is cut into sub-periods that fit the MTU.
//! - [`audio`]: port storage and the dense / sparse packing policies.
//! - [`stream`]: the three sample-stream variants (float, 16-bit PCM,
//!   compressed blocks) behind one dispatching enum.
//! - [`midi`]: the per-cycle MIDI staging buffer and its packet split.
//! - [`gate`]: sub-cycle sequencing and loss detection.
//! - [`sync`]: the end-of-cycle payload (transport state, active ports).
//! - [`link`]: a thin bounded-datagram wrapper over a UDP socket.
//!
//! ## Threading
//!
//! The core is single-threaded cooperative within each cycle: one
//! audio-thread invocation produces one cycle's send packets and consumes
//! one cycle's return packets. No locks are taken on the hot path; staging
//! buffers have a single owner, and port buffers are filled and drained by
//! the driver between render calls.
//!
//! Session negotiation, socket setup and the host audio graph live above
//! this crate.

pub mod audio;
pub mod codec;
pub mod gate;
pub mod geometry;
pub mod link;
pub mod midi;
pub mod stream;
pub mod sync;

pub use audiospan_proto as proto;

use proto::{DecodeError, header::PacketHeader, session::SessionParams};

/// The only sample format exchanged with the driver.
pub type Sample = f32;

pub const SILENCE: Sample = 0.;

/// Bytes one sample occupies in a float audio payload.
pub const SAMPLE_WIRE_SIZE: usize = size_of::<Sample>();

/// Errors of the streaming core.
///
/// Sequence gaps are deliberately *not* here: they are recoverable events
/// reported next to the successfully processed packet, see
/// [`gate::SequenceGap`].
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Session-parameters packet from an incompatible peer. Fatal to the
    /// session.
    #[error("protocol mismatch: {0}")]
    ProtocolMismatch(DecodeError),
    /// Data packet whose header cannot be trusted. The packet is dropped.
    #[error("malformed header: {0}")]
    MalformedHeader(DecodeError),
    /// Declared payload does not fit the negotiated budget.
    #[error("payload of {size} bytes exceeds the {budget}-byte budget")]
    PayloadTooLarge { size: usize, budget: usize },
    /// Sparse payload names a port this session does not have.
    #[error("active port index {port} outside of 0..{nports}")]
    PortIndexOutOfRange { port: u32, nports: u32 },
    /// The per-cycle MIDI reservation overflowed; excess events were dropped.
    #[error("midi cycle overflow, {lost} event(s) dropped")]
    MidiOverflow { lost: u32 },
    /// The compressed codec rejected an encode or decode.
    #[error("codec failure: {0}")]
    EncoderFailure(#[from] codec::CodecError),
}

/// Validates a decoded data-packet header against the session it claims to
/// belong to. Packets failing this check are dropped, not processed.
pub fn admit_header(header: &PacketHeader, session: &SessionParams) -> Result<(), Error> {
    if header.slave_id != session.slave_id {
        return Err(Error::MalformedHeader(DecodeError::BadField("slaveID")));
    }
    let budget = geometry::payload_budget(session.mtu);
    if header.payload_size as usize > budget {
        return Err(Error::PayloadTooLarge {
            size: header.payload_size as usize,
            budget,
        });
    }
    Ok(())
}

/// One owned, MTU-sized staging buffer.
///
/// Every outgoing packet is assembled in place: the header in the first
/// [`HEADER_WIRE_SIZE`](proto::header::HEADER_WIRE_SIZE) bytes, the payload
/// behind it. The split views are length-checked; there is no offset
/// arithmetic anywhere else.
pub struct PacketBuffer {
    bytes: Box<[u8]>,
}

impl PacketBuffer {
    /// Allocates a staging buffer for the given MTU.
    ///
    /// The MTU must leave room behind the header; sessions are validated
    /// before buffers are built, see
    /// [`SessionParams::validate`](proto::session::SessionParams::validate).
    pub fn new(mtu: u32) -> Self {
        assert!(mtu as usize > proto::header::HEADER_WIRE_SIZE);
        Self {
            bytes: vec![0; mtu as usize].into_boxed_slice(),
        }
    }

    #[inline(always)]
    pub fn mtu(&self) -> usize {
        self.bytes.len()
    }

    /// Header and payload areas, for filling.
    #[inline(always)]
    pub fn split_mut(&mut self) -> (&mut [u8; proto::header::HEADER_WIRE_SIZE], &mut [u8]) {
        // the buffer always holds at least a header, enforced in `new`
        self.bytes.split_first_chunk_mut().unwrap()
    }

    #[inline(always)]
    pub fn payload_mut(&mut self) -> &mut [u8] {
        self.split_mut().1
    }

    /// The assembled packet: header plus `payload_len` payload bytes.
    #[inline(always)]
    pub fn packet(&self, payload_len: usize) -> &[u8] {
        &self.bytes[..proto::header::HEADER_WIRE_SIZE + payload_len]
    }
}
