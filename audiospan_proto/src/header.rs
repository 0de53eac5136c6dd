//! The fixed header prefixing every data packet.

use crate::{
    DecodeError, HEADER_TAG, TAG_LEN,
    wire::{FieldReader, FieldWriter},
};
use serde::{Deserialize, Serialize};

/// Size of the packet header on the wire. Padded to a 64-byte boundary so
/// the payload behind it starts cache-aligned on both peers.
pub const HEADER_WIRE_SIZE: usize = 64;

/// Kind of payload a data packet carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataKind {
    Audio,
    Midi,
    /// End-of-cycle packet: transport state and, in sparse packing, the
    /// active-port list.
    Sync,
}

impl DataKind {
    #[inline(always)]
    const fn to_wire(self) -> u8 {
        match self {
            Self::Audio => b'a',
            Self::Midi => b'm',
            Self::Sync => b's',
        }
    }

    #[inline(always)]
    const fn from_wire(v: u8) -> Option<Self> {
        match v {
            b'a' => Some(Self::Audio),
            b'm' => Some(Self::Midi),
            b's' => Some(Self::Sync),
            _ => None,
        }
    }
}

/// Direction a data packet travels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    /// Master to slave.
    Send,
    /// Slave to master.
    Return,
}

impl Direction {
    #[inline(always)]
    const fn to_wire(self) -> u8 {
        match self {
            Self::Send => b's',
            Self::Return => b'r',
        }
    }

    #[inline(always)]
    const fn from_wire(v: u8) -> Option<Self> {
        match v {
            b's' => Some(Self::Send),
            b'r' => Some(Self::Return),
            _ => None,
        }
    }
}

/// Fixed prefix of every data packet.
///
/// `cycle` is monotonic per direction; `sub_cycle` counts the packet's
/// position inside the cycle, `0..num_packets`. The receiver's sequence
/// gate checks both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PacketHeader {
    pub kind: DataKind,
    pub direction: Direction,
    /// Must match the session's slave id, or the packet is dropped.
    pub slave_id: u32,
    /// Number of data packets this cycle splits into.
    pub num_packets: u32,
    /// Payload bytes behind this header.
    pub payload_size: u32,
    /// Ports covered by this packet's payload.
    pub active_ports: u32,
    pub cycle: u32,
    pub sub_cycle: u32,
    /// Set on the final data packet of a cycle.
    pub is_last: bool,
}

impl PacketHeader {
    /// Serializes the header into its canonical big-endian wire form.
    pub fn encode(&self, out: &mut [u8; HEADER_WIRE_SIZE]) {
        let mut w = FieldWriter::new(out);
        w.put_bytes(&HEADER_TAG);
        w.put_u8(self.kind.to_wire());
        w.put_u8(self.direction.to_wire());
        w.put_u32(self.slave_id);
        w.put_u32(self.num_packets);
        w.put_u32(self.payload_size);
        w.put_u32(self.active_ports);
        w.put_u32(self.cycle);
        w.put_u32(self.sub_cycle);
        w.put_u32(self.is_last as u32);
        w.pad(HEADER_WIRE_SIZE - w.position());
    }

    /// Parses a data-packet header.
    pub fn decode(buf: &[u8]) -> Result<Self, DecodeError> {
        let Some(buf) = buf.first_chunk::<HEADER_WIRE_SIZE>() else {
            return Err(DecodeError::Truncated);
        };

        let mut r = FieldReader::new(buf);

        if r.bytes::<TAG_LEN>() != HEADER_TAG {
            return Err(DecodeError::BadTag);
        }

        let kind = DataKind::from_wire(r.u8()).ok_or(DecodeError::BadField("dataType"))?;
        let direction = Direction::from_wire(r.u8()).ok_or(DecodeError::BadField("direction"))?;

        Ok(Self {
            kind,
            direction,
            slave_id: r.u32(),
            num_packets: r.u32(),
            payload_size: r.u32(),
            active_ports: r.u32(),
            cycle: r.u32(),
            sub_cycle: r.u32(),
            is_last: r.u32() != 0,
        })
    }
}
