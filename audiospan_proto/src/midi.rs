//! Framing headers of the per-cycle MIDI stream.
//!
//! A cycle's MIDI is serialized as one linear stream: for each port, a
//! [`MidiPortHeader`] followed by that port's events, each introduced by a
//! [`MidiEventHeader`] and its raw bytes. Only these framing fields are
//! byte-swapped; the event bytes themselves travel verbatim.

use crate::{
    DecodeError,
    wire::{FieldReader, FieldWriter},
};
use serde::{Deserialize, Serialize};

/// Size of a per-port MIDI header on the wire.
pub const MIDI_PORT_HEADER_WIRE_SIZE: usize = 12;

/// Size of a per-event MIDI header on the wire.
pub const MIDI_EVENT_HEADER_WIRE_SIZE: usize = 8;

/// Per-port framing record of the MIDI stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MidiPortHeader {
    /// Events serialized for this port.
    pub event_count: u32,
    /// Bytes of event data (headers included) following this record.
    pub data_bytes: u32,
    /// Events dropped on the sending side because the cycle buffer was full.
    pub lost_events: u32,
}

impl MidiPortHeader {
    pub fn encode(&self, out: &mut [u8; MIDI_PORT_HEADER_WIRE_SIZE]) {
        let mut w = FieldWriter::new(out);
        w.put_u32(self.event_count);
        w.put_u32(self.data_bytes);
        w.put_u32(self.lost_events);
    }

    pub fn decode(buf: &[u8]) -> Result<Self, DecodeError> {
        let Some(buf) = buf.first_chunk::<MIDI_PORT_HEADER_WIRE_SIZE>() else {
            return Err(DecodeError::Truncated);
        };

        let mut r = FieldReader::new(buf);
        Ok(Self {
            event_count: r.u32(),
            data_bytes: r.u32(),
            lost_events: r.u32(),
        })
    }
}

/// Per-event framing record: when in the period, and how many bytes follow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MidiEventHeader {
    /// Timestamp of the event, in samples from the start of the period.
    pub time: u32,
    /// Raw event bytes following this record.
    pub size: u32,
}

impl MidiEventHeader {
    pub fn encode(&self, out: &mut [u8; MIDI_EVENT_HEADER_WIRE_SIZE]) {
        let mut w = FieldWriter::new(out);
        w.put_u32(self.time);
        w.put_u32(self.size);
    }

    pub fn decode(buf: &[u8]) -> Result<Self, DecodeError> {
        let Some(buf) = buf.first_chunk::<MIDI_EVENT_HEADER_WIRE_SIZE>() else {
            return Err(DecodeError::Truncated);
        };

        let mut r = FieldReader::new(buf);
        Ok(Self {
            time: r.u32(),
            size: r.u32(),
        })
    }
}
