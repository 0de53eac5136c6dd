//! The per-cycle MIDI staging buffer and its packet split.
//!
//! MIDI is bursty and tiny next to audio, so a cycle's events from all ports
//! are gathered into one linear, self-describing stream first and that
//! stream is cut into packets. Output is compact: ports with few or no
//! events shrink the transmitted bytes. Unlike audio there is no way to
//! interpolate a missing chunk, so a cycle with a sequence gap is discarded
//! whole.

use crate::{
    Error, SAMPLE_WIRE_SIZE,
    gate::{SequenceGap, SubCycleGate},
    proto::{
        DecodeError,
        header::PacketHeader,
        midi::{
            MIDI_EVENT_HEADER_WIRE_SIZE, MIDI_PORT_HEADER_WIRE_SIZE, MidiEventHeader,
            MidiPortHeader,
        },
    },
};

/// One MIDI event, timestamped within the period.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MidiEvent {
    /// Samples from the start of the period.
    pub time: u32,
    /// Raw event bytes, passed through verbatim.
    pub data: Vec<u8>,
}

struct MidiPort {
    events: Vec<MidiEvent>,
    data_bytes: usize,
    lost: u32,
}

impl MidiPort {
    const fn new() -> Self {
        Self {
            events: Vec::new(),
            data_bytes: 0,
            lost: 0,
        }
    }
}

/// Gathers, splits and reassembles one cycle of MIDI for one direction.
pub struct MidiCycleBuffer {
    ports: Box<[MidiPort]>,
    /// Reservation for one cycle's serialized stream.
    max_bytes: usize,
    /// Per-packet payload budget.
    budget: usize,
    /// Projected serialized size of the current cycle, port headers included.
    used: usize,
    staging: Box<[u8]>,
    cycle_size: usize,
    gate: SubCycleGate,
    cycle_intact: bool,
}

impl MidiCycleBuffer {
    /// Builds a buffer for `nports` MIDI ports of a `period`-sample cycle.
    ///
    /// The reservation mirrors an audio port's volume: `period` samples'
    /// worth of bytes per port, which comfortably bounds a cycle of events.
    pub fn new(nports: u32, period: u32, budget: usize) -> Self {
        let max_bytes = (nports as usize * period as usize * SAMPLE_WIRE_SIZE)
            .max(nports as usize * MIDI_PORT_HEADER_WIRE_SIZE);
        Self {
            ports: (0..nports).map(|_| MidiPort::new()).collect(),
            max_bytes,
            budget,
            used: nports as usize * MIDI_PORT_HEADER_WIRE_SIZE,
            staging: vec![0; max_bytes].into_boxed_slice(),
            cycle_size: 0,
            gate: SubCycleGate::new(),
            cycle_intact: true,
        }
    }

    #[inline(always)]
    pub fn nports(&self) -> u32 {
        self.ports.len() as u32
    }

    /// Reservation for one cycle's serialized MIDI.
    #[inline(always)]
    pub const fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    /// Bytes the current cycle actually uses.
    #[inline(always)]
    pub const fn cycle_size(&self) -> usize {
        self.cycle_size
    }

    /// Events currently held for `port`.
    pub fn events(&self, port: usize) -> &[MidiEvent] {
        self.ports.get(port).map_or(&[], |p| &p.events)
    }

    /// Events dropped for `port`, locally on overflow or as reported by the
    /// sending peer.
    pub fn lost_events(&self, port: usize) -> u32 {
        self.ports.get(port).map_or(0, |p| p.lost)
    }

    /// Drops the cycle's events and loss counters; the driver calls this at
    /// the cycle boundary after consuming them.
    pub fn clear(&mut self) {
        for port in &mut self.ports {
            port.events.clear();
            port.data_bytes = 0;
            port.lost = 0;
        }
        self.used = self.ports.len() * MIDI_PORT_HEADER_WIRE_SIZE;
        self.cycle_size = 0;
    }

    /// Queues one event for sending.
    ///
    /// Events beyond the cycle reservation are dropped and counted; the peer
    /// learns the count from the port header.
    pub fn push_event(&mut self, port: usize, time: u32, data: &[u8]) -> Result<(), Error> {
        let Some(slot) = self.ports.get_mut(port) else {
            return Err(Error::PortIndexOutOfRange {
                port: port as u32,
                nports: self.ports.len() as u32,
            });
        };

        let cost = MIDI_EVENT_HEADER_WIRE_SIZE + data.len();
        if self.used + cost > self.max_bytes {
            slot.lost += 1;
            log::warn!(
                "midi cycle buffer full, dropping event on port {port} ({} lost)",
                slot.lost
            );
            return Err(Error::MidiOverflow { lost: slot.lost });
        }

        self.used += cost;
        slot.data_bytes += cost;
        slot.events.push(MidiEvent {
            time,
            data: data.to_vec(),
        });
        Ok(())
    }

    /// Serializes the queued events into the linear cycle stream and returns
    /// its size in bytes.
    pub fn render_from_local(&mut self) -> usize {
        let mut pos = 0;

        for port in &self.ports {
            let header = MidiPortHeader {
                event_count: port.events.len() as u32,
                data_bytes: port.data_bytes as u32,
                lost_events: port.lost,
            };
            // infallible: `used` accounting keeps the stream inside `staging`
            header.encode(
                (&mut self.staging[pos..pos + MIDI_PORT_HEADER_WIRE_SIZE])
                    .try_into()
                    .unwrap(),
            );
            pos += MIDI_PORT_HEADER_WIRE_SIZE;

            for event in &port.events {
                MidiEventHeader {
                    time: event.time,
                    size: event.data.len() as u32,
                }
                .encode(
                    (&mut self.staging[pos..pos + MIDI_EVENT_HEADER_WIRE_SIZE])
                        .try_into()
                        .unwrap(),
                );
                pos += MIDI_EVENT_HEADER_WIRE_SIZE;
                self.staging[pos..pos + event.data.len()].copy_from_slice(&event.data);
                pos += event.data.len();
            }
        }

        self.cycle_size = pos;
        pos
    }

    /// Packets the rendered cycle stream needs at the payload budget.
    pub fn num_packets(&self) -> u32 {
        (self.cycle_size.div_ceil(self.budget).max(1)) as u32
    }

    /// Copies one packet's chunk of the rendered stream into `out`.
    pub fn render_to_network(&self, sub_cycle: u32, out: &mut [u8]) -> usize {
        let start = (sub_cycle as usize * self.budget).min(self.cycle_size);
        let len = self.budget.min(self.cycle_size - start);
        out[..len].copy_from_slice(&self.staging[start..start + len]);
        len
    }

    /// Accepts one received chunk; on the cycle's last packet the stream is
    /// scattered back into per-port events.
    ///
    /// A sequence gap discards the whole cycle (no events are delivered) but
    /// is reported rather than treated as an error.
    pub fn render_from_network(
        &mut self,
        header: &PacketHeader,
        payload: &[u8],
    ) -> Result<Option<SequenceGap>, Error> {
        let gap = self.gate.observe(header.sub_cycle);
        if let Some(gap) = gap {
            log::warn!(
                "midi packet(s) missing in cycle {}: expected sub-cycle {}, got {}",
                header.cycle,
                gap.expected,
                gap.observed
            );
            self.cycle_intact = false;
        }

        let offset = header.sub_cycle as usize * self.budget;
        if offset + payload.len() > self.max_bytes {
            return Err(Error::PayloadTooLarge {
                size: offset + payload.len(),
                budget: self.max_bytes,
            });
        }
        self.staging[offset..offset + payload.len()].copy_from_slice(payload);

        if header.is_last || header.sub_cycle + 1 == header.num_packets {
            let intact = self.cycle_intact;
            self.cycle_size = offset + payload.len();
            self.gate.end_cycle();
            self.cycle_intact = true;

            if intact {
                self.scatter_to_local()?;
            } else {
                log::warn!("discarding incomplete midi cycle {}", header.cycle);
                for port in &mut self.ports {
                    port.events.clear();
                    port.lost = 0;
                }
            }
        }
        Ok(gap)
    }

    /// Parses the reassembled stream back into per-port events.
    fn scatter_to_local(&mut self) -> Result<(), Error> {
        let stream = &self.staging[..self.cycle_size];
        let mut pos = 0;

        for port in self.ports.iter_mut() {
            port.events.clear();
            port.lost = 0;

            let header =
                MidiPortHeader::decode(&stream[pos..]).map_err(Error::MalformedHeader)?;
            pos += MIDI_PORT_HEADER_WIRE_SIZE;
            port.lost = header.lost_events;

            for _ in 0..header.event_count {
                let event =
                    MidiEventHeader::decode(&stream[pos..]).map_err(Error::MalformedHeader)?;
                pos += MIDI_EVENT_HEADER_WIRE_SIZE;

                let size = event.size as usize;
                if pos + size > stream.len() {
                    return Err(Error::MalformedHeader(DecodeError::Truncated));
                }
                port.events.push(MidiEvent {
                    time: event.time,
                    data: stream[pos..pos + size].to_vec(),
                });
                pos += size;
            }
        }
        Ok(())
    }
}
