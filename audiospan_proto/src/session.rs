//! Session parameters, negotiated once per connection.
//!
//! The record is immutable after negotiation and parameterizes every
//! downstream component on both peers: packet sizing, channel counts, cycle
//! geometry, sample encoding, and latency compensation.

use crate::{
    DecodeError, PARAMS_TAG, PROTOCOL_VERSION, TAG_LEN,
    header::HEADER_WIRE_SIZE,
    wire::{FieldReader, FieldWriter},
};
use alloc::string::String;
use core::fmt;
use serde::{Deserialize, Serialize};

/// Fixed width of the slave-name field, terminating NUL included.
pub const SLAVE_NAME_FIELD: usize = 32;

/// Fixed width of each hostname field, terminating NUL included.
pub const HOST_FIELD: usize = 256;

/// Size of a session-parameters packet on the wire.
pub const SESSION_PARAMS_WIRE_SIZE: usize =
    TAG_LEN + 1 + 4 + SLAVE_NAME_FIELD + 2 * HOST_FIELD + 13 * 4;

/// Representation of audio samples on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SampleEncoding {
    /// Raw 32-bit IEEE floats.
    Float,
    /// 16-bit linear PCM with gain compensation.
    Int16,
    /// CELT-family compressed blocks, one fixed-size block per port per cycle.
    Celt,
}

impl SampleEncoding {
    #[inline(always)]
    pub(crate) const fn to_wire(self) -> u32 {
        match self {
            Self::Float => 0,
            Self::Int16 => 1,
            Self::Celt => 2,
        }
    }

    #[inline(always)]
    pub(crate) const fn from_wire(v: u32) -> Option<Self> {
        match v {
            0 => Some(Self::Float),
            1 => Some(Self::Int16),
            2 => Some(Self::Celt),
            _ => None,
        }
    }
}

/// Phase of the session handshake a parameters packet belongs to.
///
/// The handshake itself lives above this crate; the discriminator is carried
/// here because it is a field of the parameters packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncPhase {
    Invalid,
    SlaveAvailable,
    SlaveSetup,
    StartMaster,
    StartSlave,
    KillMaster,
}

impl SyncPhase {
    #[inline(always)]
    pub(crate) const fn to_wire(self) -> u32 {
        match self {
            Self::Invalid => 0,
            Self::SlaveAvailable => 1,
            Self::SlaveSetup => 2,
            Self::StartMaster => 3,
            Self::StartSlave => 4,
            Self::KillMaster => 5,
        }
    }

    /// Unknown discriminants map to [`SyncPhase::Invalid`] rather than
    /// failing the decode, so a newer peer degrades instead of stalling.
    #[inline(always)]
    pub(crate) const fn from_wire(v: u32) -> Self {
        match v {
            1 => Self::SlaveAvailable,
            2 => Self::SlaveSetup,
            3 => Self::StartMaster,
            4 => Self::StartSlave,
            5 => Self::KillMaster,
            _ => Self::Invalid,
        }
    }
}

/// The negotiated session record.
///
/// Channel counts are signed on the wire and kept signed here; negative
/// values are rejected by [`validate`](Self::validate), not by the codec.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionParams {
    /// Handshake phase this packet belongs to.
    pub phase: SyncPhase,
    /// Name the slave registers under, at most [`SLAVE_NAME_FIELD`]` - 1` bytes.
    pub slave_name: String,
    pub master_host: String,
    pub slave_host: String,
    /// Maximum datagram payload accepted by the transport, in bytes.
    pub mtu: u32,
    /// Identifier the master assigned to the slave.
    pub slave_id: u32,
    /// Whether transport (playhead) state rides along on sync packets.
    pub transport_sync: bool,
    pub send_audio_channels: i32,
    pub return_audio_channels: i32,
    pub send_midi_channels: i32,
    pub return_midi_channels: i32,
    pub sample_rate: u32,
    /// Samples per port per cycle. A positive power of two.
    pub period_size: u32,
    pub sample_encoding: SampleEncoding,
    /// Compressed bitrate in KB/s. Meaningful only for [`SampleEncoding::Celt`].
    pub kbps: u32,
    /// Whether the slave runs in synchronous mode.
    pub slave_sync_mode: bool,
    /// Network latency compensation, in cycles.
    pub network_latency: u32,
}

impl SessionParams {
    /// Serializes the record into its fixed wire form.
    ///
    /// The version byte is always [`PROTOCOL_VERSION`]; there is no way to
    /// emit a packet for another protocol revision.
    pub fn encode(&self, out: &mut [u8; SESSION_PARAMS_WIRE_SIZE]) {
        let mut w = FieldWriter::new(out);
        w.put_bytes(&PARAMS_TAG);
        w.put_u8(PROTOCOL_VERSION);
        w.put_u32(self.phase.to_wire());
        w.put_text(SLAVE_NAME_FIELD, &self.slave_name);
        w.put_text(HOST_FIELD, &self.master_host);
        w.put_text(HOST_FIELD, &self.slave_host);
        w.put_u32(self.mtu);
        w.put_u32(self.slave_id);
        w.put_u32(self.transport_sync as u32);
        w.put_i32(self.send_audio_channels);
        w.put_i32(self.return_audio_channels);
        w.put_i32(self.send_midi_channels);
        w.put_i32(self.return_midi_channels);
        w.put_u32(self.sample_rate);
        w.put_u32(self.period_size);
        w.put_u32(self.sample_encoding.to_wire());
        w.put_u32(self.kbps);
        w.put_u32(self.slave_sync_mode as u32);
        w.put_u32(self.network_latency);
        debug_assert_eq!(w.position(), SESSION_PARAMS_WIRE_SIZE);
    }

    /// Parses a session-parameters packet.
    ///
    /// Tag and protocol-version mismatches are fatal to the session and
    /// surface as [`DecodeError::BadTag`] / [`DecodeError::Version`].
    pub fn decode(buf: &[u8]) -> Result<Self, DecodeError> {
        let Some(buf) = buf.first_chunk::<SESSION_PARAMS_WIRE_SIZE>() else {
            return Err(DecodeError::Truncated);
        };

        let mut r = FieldReader::new(buf);

        if r.bytes::<TAG_LEN>() != PARAMS_TAG {
            return Err(DecodeError::BadTag);
        }

        let version = r.u8();
        if version != PROTOCOL_VERSION {
            return Err(DecodeError::Version {
                expected: PROTOCOL_VERSION,
                got: version,
            });
        }

        let phase = SyncPhase::from_wire(r.u32());
        let slave_name = r.text(SLAVE_NAME_FIELD);
        let master_host = r.text(HOST_FIELD);
        let slave_host = r.text(HOST_FIELD);
        let mtu = r.u32();
        let slave_id = r.u32();
        let transport_sync = r.u32() != 0;
        let send_audio_channels = r.i32();
        let return_audio_channels = r.i32();
        let send_midi_channels = r.i32();
        let return_midi_channels = r.i32();
        let sample_rate = r.u32();
        let period_size = r.u32();
        let sample_encoding = SampleEncoding::from_wire(r.u32())
            .ok_or(DecodeError::BadField("sampleEncoder"))?;
        let kbps = r.u32();
        let slave_sync_mode = r.u32() != 0;
        let network_latency = r.u32();
        debug_assert_eq!(r.position(), SESSION_PARAMS_WIRE_SIZE);

        Ok(Self {
            phase,
            slave_name,
            master_host,
            slave_host,
            mtu,
            slave_id,
            transport_sync,
            send_audio_channels,
            return_audio_channels,
            send_midi_channels,
            return_midi_channels,
            sample_rate,
            period_size,
            sample_encoding,
            kbps,
            slave_sync_mode,
            network_latency,
        })
    }

    /// Checks the record for values no cycle geometry can be built from.
    pub fn validate(&self) -> Result<(), SessionParamsError> {
        if self.mtu as usize <= HEADER_WIRE_SIZE {
            return Err(SessionParamsError::MtuTooSmall(self.mtu));
        }
        if self.period_size == 0 || !self.period_size.is_power_of_two() {
            return Err(SessionParamsError::BadPeriodSize(self.period_size));
        }
        if self.sample_rate == 0 {
            return Err(SessionParamsError::BadSampleRate);
        }
        let channels = [
            self.send_audio_channels,
            self.return_audio_channels,
            self.send_midi_channels,
            self.return_midi_channels,
        ];
        if let Some(&n) = channels.iter().find(|&&n| n < 0) {
            return Err(SessionParamsError::NegativeChannelCount(n));
        }
        Ok(())
    }
}

/// Error returned when validating a decoded [`SessionParams`] record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionParamsError {
    /// The MTU leaves no room for a payload behind the packet header.
    MtuTooSmall(u32),
    /// The period size is zero or not a power of two.
    BadPeriodSize(u32),
    BadSampleRate,
    NegativeChannelCount(i32),
}

impl fmt::Display for SessionParamsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MtuTooSmall(mtu) => write!(
                f,
                "mtu of {mtu} bytes leaves no payload room behind the {HEADER_WIRE_SIZE}-byte header"
            ),
            Self::BadPeriodSize(p) => write!(f, "period size {p} is not a positive power of two"),
            Self::BadSampleRate => write!(f, "sample rate must be positive"),
            Self::NegativeChannelCount(n) => write!(f, "negative channel count {n}"),
        }
    }
}

impl core::error::Error for SessionParamsError {}
