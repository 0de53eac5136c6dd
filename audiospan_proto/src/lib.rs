#![no_std]
//! Wire model of a low-latency audio/MIDI network transport.
//!
//! This crate defines everything that crosses the link between the two peers
//! of a distributed audio graph: a **master** (the authoritative process) and
//! a **slave** (a joining worker). Once per processing cycle the master ships
//! its output audio and MIDI to the slave; the slave processes and returns
//! audio and MIDI, optionally carrying transport (playhead) state.
//!
//! ## Scope
//!
//! - The negotiated [`session::SessionParams`] record and its packet form.
//! - The fixed [`header::PacketHeader`] prefix of every data packet.
//! - The [`transport::TransportData`] record carried by sync packets.
//! - The MIDI framing headers of [`midi`].
//! - The byte-order utilities of [`wire`].
//!
//! Every integer header field is big-endian on the wire. Audio sample
//! payloads are **not** modeled here: they travel little-endian and are
//! assembled by the streaming layer, which only borrows [`wire`] for its
//! per-field conversions.
//!
//! ## Packet discrimination
//!
//! All packets open with a 7-byte ASCII tag. [`peek_kind`] classifies a
//! datagram from those bytes alone, so foreign traffic is rejected before
//! any field decoding happens.

extern crate alloc;

pub mod header;
pub mod midi;
pub mod session;
pub mod transport;
pub mod wire;

use core::fmt;

/// Protocol version spoken by both peers. A mismatch refuses the connection.
pub const PROTOCOL_VERSION: u8 = 4;

/// Length of the ASCII tag opening every packet.
pub const TAG_LEN: usize = 7;

pub(crate) const PARAMS_TAG: [u8; TAG_LEN] = *b"params\0";
pub(crate) const HEADER_TAG: [u8; TAG_LEN] = *b"headr\0\0";

/// Coarse classification of an incoming datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    /// A session-parameters packet (negotiation traffic).
    SessionParams,
    /// A data packet carrying audio, MIDI or sync payload behind a header.
    Data,
    /// Anything else. Not part of this protocol, to be dropped.
    Invalid,
}

/// Inspects the first [`TAG_LEN`] bytes of a datagram.
///
/// This is the only classification needed before committing to a full
/// decode, and is cheap enough to run on every received packet.
#[inline(always)]
pub fn peek_kind(buf: &[u8]) -> PacketKind {
    match buf.first_chunk::<TAG_LEN>() {
        Some(&PARAMS_TAG) => PacketKind::SessionParams,
        Some(&HEADER_TAG) => PacketKind::Data,
        _ => PacketKind::Invalid,
    }
}

/// Error returned when decoding any on-wire structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    /// The buffer is shorter than the fixed layout requires.
    Truncated,
    /// The leading tag bytes are not the expected packet tag.
    BadTag,
    /// The peer speaks a different protocol version.
    Version { expected: u8, got: u8 },
    /// A discriminant field holds a value outside its legal range.
    BadField(&'static str),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Truncated => write!(f, "packet shorter than its fixed layout"),
            Self::BadTag => write!(f, "packet tag mismatch"),
            Self::Version { expected, got } => {
                write!(f, "protocol version {got}, expected {expected}")
            }
            Self::BadField(name) => write!(f, "illegal value in field `{name}`"),
        }
    }
}

impl core::error::Error for DecodeError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peek_discriminates_tags() {
        let mut params = [0u8; 64];
        params[..TAG_LEN].copy_from_slice(&PARAMS_TAG);
        assert_eq!(peek_kind(&params), PacketKind::SessionParams);

        let mut data = [0u8; 64];
        data[..TAG_LEN].copy_from_slice(&HEADER_TAG);
        assert_eq!(peek_kind(&data), PacketKind::Data);

        assert_eq!(peek_kind(b"headers"), PacketKind::Invalid);
        assert_eq!(peek_kind(b"param"), PacketKind::Invalid);
        assert_eq!(peek_kind(&[]), PacketKind::Invalid);
    }
}
