//! Transport (playhead) state carried by sync packets.

use crate::{
    DecodeError,
    wire::{FieldReader, FieldWriter},
};
use serde::{Deserialize, Serialize};

/// Size of the transport record on the wire.
pub const TRANSPORT_WIRE_SIZE: usize = 5 * 4 + 8;

/// Requested change of timebase-master ownership.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimebaseMode {
    NoChange,
    /// Give up the timebase-master role.
    Release,
    /// Take the timebase-master role unconditionally.
    Timebase,
    /// Take the role only if nobody else holds it.
    Conditional,
}

impl TimebaseMode {
    #[inline(always)]
    const fn to_wire(self) -> i32 {
        match self {
            Self::NoChange => 0,
            Self::Release => 1,
            Self::Timebase => 2,
            Self::Conditional => 3,
        }
    }

    #[inline(always)]
    const fn from_wire(v: i32) -> Option<Self> {
        match v {
            0 => Some(Self::NoChange),
            1 => Some(Self::Release),
            2 => Some(Self::Timebase),
            3 => Some(Self::Conditional),
            _ => None,
        }
    }
}

/// Rolling state of the shared transport.
///
/// `NetStarting` is the network round-trip start state: the master holds its
/// local transport until the slave acknowledges the start, so both graphs
/// roll from the same cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransportState {
    Stopped,
    Rolling,
    Looping,
    Starting,
    NetStarting,
}

impl TransportState {
    #[inline(always)]
    const fn to_wire(self) -> u32 {
        match self {
            Self::Stopped => 0,
            Self::Rolling => 1,
            Self::Looping => 2,
            Self::Starting => 3,
            Self::NetStarting => 4,
        }
    }

    #[inline(always)]
    const fn from_wire(v: u32) -> Option<Self> {
        match v {
            0 => Some(Self::Stopped),
            1 => Some(Self::Rolling),
            2 => Some(Self::Looping),
            3 => Some(Self::Starting),
            4 => Some(Self::NetStarting),
            _ => None,
        }
    }
}

/// Playhead position snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PositionInfo {
    /// Frame the playhead sits on.
    pub frame: u32,
    pub sample_rate: u32,
    pub beats_per_minute: f64,
}

/// The transport record of one sync packet.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TransportData {
    /// Whether the sender's transport state changed this cycle.
    pub state_changed: bool,
    pub timebase: TimebaseMode,
    pub state: TransportState,
    pub position: PositionInfo,
}

impl TransportData {
    /// Serializes the record into its wire form.
    pub fn encode(&self, out: &mut [u8; TRANSPORT_WIRE_SIZE]) {
        let mut w = FieldWriter::new(out);
        w.put_u32(self.state_changed as u32);
        w.put_i32(self.timebase.to_wire());
        w.put_u32(self.state.to_wire());
        w.put_u32(self.position.frame);
        w.put_u32(self.position.sample_rate);
        w.put_f64(self.position.beats_per_minute);
        debug_assert_eq!(w.position(), TRANSPORT_WIRE_SIZE);
    }

    /// Parses a transport record from the front of a sync payload.
    pub fn decode(buf: &[u8]) -> Result<Self, DecodeError> {
        let Some(buf) = buf.first_chunk::<TRANSPORT_WIRE_SIZE>() else {
            return Err(DecodeError::Truncated);
        };

        let mut r = FieldReader::new(buf);
        let state_changed = r.u32() != 0;
        let timebase =
            TimebaseMode::from_wire(r.i32()).ok_or(DecodeError::BadField("timebaseMaster"))?;
        let state =
            TransportState::from_wire(r.u32()).ok_or(DecodeError::BadField("transportState"))?;

        Ok(Self {
            state_changed,
            timebase,
            state,
            position: PositionInfo {
                frame: r.u32(),
                sample_rate: r.u32(),
                beats_per_minute: r.f64(),
            },
        })
    }
}
