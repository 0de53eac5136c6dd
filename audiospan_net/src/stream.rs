//! The three sample-stream variants behind one dispatching enum.
//!
//! Each variant cuts one cycle of port audio into `num_packets()` payloads
//! on the way out and reassembles received payloads into port buffers on the
//! way in, under the shared sub-cycle sequencing rules of [`crate::gate`].
//!
//! Samples always travel little-endian; on big-endian hosts the per-sample
//! conversions below become the required swaps, on little-endian hosts they
//! compile down to plain copies.

use crate::{
    Error, SAMPLE_WIRE_SIZE, SILENCE, Sample,
    audio::{PortGroup, PortPacking, SPARSE_PORT_TAG_BYTES},
    codec::{BlockCodec, CodecError},
    gate::SequenceGap,
    geometry,
    proto::{
        DecodeError,
        header::PacketHeader,
        session::{SampleEncoding, SessionParams},
    },
};

/// Bytes one sample occupies in a 16-bit PCM payload.
const INT16_WIRE_SIZE: usize = size_of::<i16>();

#[inline(always)]
fn write_samples_le(out: &mut [u8], samples: &[Sample]) {
    for (chunk, &sample) in out.chunks_exact_mut(SAMPLE_WIRE_SIZE).zip(samples) {
        chunk.copy_from_slice(&sample.to_le_bytes());
    }
}

#[inline(always)]
fn read_samples_le(dst: &mut [Sample], payload: &[u8]) {
    for (sample, chunk) in dst.iter_mut().zip(payload.chunks_exact(SAMPLE_WIRE_SIZE)) {
        // infallible: chunks_exact yields 4-byte windows
        *sample = Sample::from_le_bytes(chunk.try_into().unwrap());
    }
}

#[inline(always)]
fn write_samples_i16_le(out: &mut [u8], samples: &[Sample]) {
    for (chunk, &sample) in out.chunks_exact_mut(INT16_WIRE_SIZE).zip(samples) {
        let v = (sample.clamp(-1., 1.) * f32::from(i16::MAX)) as i16;
        chunk.copy_from_slice(&v.to_le_bytes());
    }
}

#[inline(always)]
fn read_samples_i16_le(dst: &mut [Sample], payload: &[u8]) {
    for (sample, chunk) in dst.iter_mut().zip(payload.chunks_exact(INT16_WIRE_SIZE)) {
        let v = i16::from_le_bytes(chunk.try_into().unwrap());
        *sample = f32::from(v) / f32::from(i16::MAX);
    }
}

// ------

/// Raw float stream, dense or sparse packing.
///
/// The sparse sub-period is derived from the attached-port count at the
/// moment of the call; drivers must not attach or detach ports in the middle
/// of a cycle.
pub struct FloatStream {
    group: PortGroup,
    packing: PortPacking,
    budget: usize,
    sample_rate: u32,
    dense_sub_period: u32,
}

impl FloatStream {
    pub fn new(
        packing: PortPacking,
        nports: u32,
        period: u32,
        sample_rate: u32,
        budget: usize,
    ) -> Self {
        Self {
            group: PortGroup::new(nports, period),
            packing,
            budget,
            sample_rate,
            dense_sub_period: geometry::dense_sub_period(period, nports, budget),
        }
    }

    #[inline(always)]
    pub fn ports(&self) -> &PortGroup {
        &self.group
    }

    #[inline(always)]
    pub fn ports_mut(&mut self) -> &mut PortGroup {
        &mut self.group
    }

    /// Samples per port per packet under the current packing.
    pub fn sub_period(&self) -> u32 {
        let period = self.group.period() as u32;
        match self.packing {
            PortPacking::Dense => self.dense_sub_period,
            PortPacking::Sparse => {
                geometry::sparse_sub_period(period, self.group.attached_count(), self.budget)
            }
        }
    }

    pub fn num_packets(&self) -> u32 {
        geometry::packets_per_cycle(self.group.period() as u32, self.sub_period())
    }

    /// Bytes one cycle reserves across all ports.
    pub fn cycle_bytes(&self) -> usize {
        self.group.period() * self.group.nports() as usize * SAMPLE_WIRE_SIZE
    }

    /// Duration one packet covers, in seconds.
    pub fn cycle_duration(&self) -> f32 {
        self.sub_period() as f32 / self.sample_rate as f32
    }

    /// Writes one sub-cycle's payload. Returns the payload size and the
    /// number of ports it covers.
    pub fn render_to_network(&self, sub_cycle: u32, out: &mut [u8]) -> (usize, u32) {
        let s = self.sub_period() as usize;
        let offset = sub_cycle as usize * s;
        debug_assert!(offset + s <= self.group.period());

        let mut pos = 0;
        let mut ports = 0u32;

        for port in 0..self.group.nports() as usize {
            match self.packing {
                PortPacking::Dense => {
                    write_samples_le(&mut out[pos..], &self.group.raw(port)[offset..offset + s]);
                    pos += s * SAMPLE_WIRE_SIZE;
                    ports += 1;
                }
                PortPacking::Sparse => {
                    let Some(buf) = self.group.buffer(port) else {
                        continue;
                    };
                    out[pos..pos + SPARSE_PORT_TAG_BYTES]
                        .copy_from_slice(&(port as u32).to_le_bytes());
                    pos += SPARSE_PORT_TAG_BYTES;
                    write_samples_le(&mut out[pos..], &buf[offset..offset + s]);
                    pos += s * SAMPLE_WIRE_SIZE;
                    ports += 1;
                }
            }
        }
        (pos, ports)
    }

    /// Scatters one received sub-cycle back into the port buffers.
    ///
    /// The payload is processed even when it reveals a sequence gap; the gap
    /// is reported alongside so the caller can silence ports at the cycle
    /// boundary if it wants to.
    pub fn render_from_network(
        &mut self,
        header: &PacketHeader,
        payload: &[u8],
    ) -> Result<Option<SequenceGap>, Error> {
        let period = self.group.period();
        let gap = self.group.gate.observe(header.sub_cycle);
        if let Some(gap) = gap {
            log::warn!(
                "audio packet(s) missing in cycle {}: expected sub-cycle {}, got {}",
                header.cycle,
                gap.expected,
                gap.observed
            );
        }

        match self.packing {
            PortPacking::Dense => {
                let s = self.dense_sub_period as usize;
                let offset = checked_offset(header.sub_cycle, s, period)?;
                let slice_bytes = s * SAMPLE_WIRE_SIZE;
                expect_payload(payload, self.group.nports() as usize * slice_bytes)?;

                for port in 0..self.group.nports() as usize {
                    let src = &payload[port * slice_bytes..(port + 1) * slice_bytes];
                    read_samples_le(&mut self.group.raw_mut(port)[offset..offset + s], src);
                }
            }
            PortPacking::Sparse => {
                if header.sub_cycle == 0 {
                    // silence is transmitted by omission
                    self.group.silence_attached();
                }

                let s = geometry::sparse_sub_period(period as u32, header.active_ports, self.budget)
                    as usize;
                let offset = checked_offset(header.sub_cycle, s, period)?;
                let slice_bytes = SPARSE_PORT_TAG_BYTES + s * SAMPLE_WIRE_SIZE;
                expect_payload(payload, header.active_ports as usize * slice_bytes)?;

                let nports = self.group.nports();
                for entry in payload[..header.active_ports as usize * slice_bytes]
                    .chunks_exact(slice_bytes)
                {
                    let (tag, samples) = entry.split_at(SPARSE_PORT_TAG_BYTES);
                    // infallible: split_at yields exactly 4 bytes
                    let port = u32::from_le_bytes(tag.try_into().unwrap());

                    if port >= nports {
                        log::error!("{}", Error::PortIndexOutOfRange { port, nports });
                        continue;
                    }
                    // locally unbound ports are skipped, their slices ignored
                    if let Some(buf) = self.group.buffer_mut(port as usize) {
                        read_samples_le(&mut buf[offset..offset + s], samples);
                    }
                }
            }
        }

        if header.is_last || header.sub_cycle + 1 == header.num_packets {
            self.group.gate.end_cycle();
        }
        Ok(gap)
    }
}

// ------

/// 16-bit linear PCM stream with gain compensation, dense packing.
///
/// Halving the sample width changes the geometry: the sub-period is derived
/// by byte budget rather than the power-of-two rule, so the final sub-cycle
/// may carry a shorter tail.
pub struct Int16Stream {
    group: PortGroup,
    sample_rate: u32,
    sub_period: u32,
    last_sub_period: u32,
    num_packets: u32,
}

impl Int16Stream {
    pub fn new(nports: u32, period: u32, sample_rate: u32, budget: usize) -> Self {
        let (sub, last, packets) = if nports == 0 {
            (period, period, 1)
        } else {
            let max_s = (budget / (nports as usize * INT16_WIRE_SIZE))
                .clamp(1, period as usize) as u32;
            let packets = period.div_ceil(max_s);
            let sub = period.div_ceil(packets);
            (sub, period - (packets - 1) * sub, packets)
        };

        Self {
            group: PortGroup::new(nports, period),
            sample_rate,
            sub_period: sub,
            last_sub_period: last,
            num_packets: packets,
        }
    }

    #[inline(always)]
    pub fn ports(&self) -> &PortGroup {
        &self.group
    }

    #[inline(always)]
    pub fn ports_mut(&mut self) -> &mut PortGroup {
        &mut self.group
    }

    #[inline(always)]
    pub const fn sub_period(&self) -> u32 {
        self.sub_period
    }

    #[inline(always)]
    pub const fn last_sub_period(&self) -> u32 {
        self.last_sub_period
    }

    #[inline(always)]
    pub const fn num_packets(&self) -> u32 {
        self.num_packets
    }

    pub fn cycle_bytes(&self) -> usize {
        self.group.period() * self.group.nports() as usize * INT16_WIRE_SIZE
    }

    pub fn cycle_duration(&self) -> f32 {
        self.sub_period as f32 / self.sample_rate as f32
    }

    #[inline(always)]
    fn slice_len(&self, sub_cycle: u32) -> usize {
        if sub_cycle + 1 == self.num_packets {
            self.last_sub_period as usize
        } else {
            self.sub_period as usize
        }
    }

    pub fn render_to_network(&self, sub_cycle: u32, out: &mut [u8]) -> (usize, u32) {
        let n = self.slice_len(sub_cycle);
        let offset = sub_cycle as usize * self.sub_period as usize;
        debug_assert!(offset + n <= self.group.period());

        let mut pos = 0;
        for port in 0..self.group.nports() as usize {
            write_samples_i16_le(&mut out[pos..], &self.group.raw(port)[offset..offset + n]);
            pos += n * INT16_WIRE_SIZE;
        }
        (pos, self.group.nports())
    }

    pub fn render_from_network(
        &mut self,
        header: &PacketHeader,
        payload: &[u8],
    ) -> Result<Option<SequenceGap>, Error> {
        let gap = self.group.gate.observe(header.sub_cycle);
        if let Some(gap) = gap {
            log::warn!(
                "audio packet(s) missing in cycle {}: expected sub-cycle {}, got {}",
                header.cycle,
                gap.expected,
                gap.observed
            );
        }

        let n = self.slice_len(header.sub_cycle);
        let offset = header.sub_cycle as usize * self.sub_period as usize;
        if offset + n > self.group.period() {
            return Err(Error::MalformedHeader(DecodeError::BadField("subCycle")));
        }
        let slice_bytes = n * INT16_WIRE_SIZE;
        expect_payload(payload, self.group.nports() as usize * slice_bytes)?;

        for port in 0..self.group.nports() as usize {
            let src = &payload[port * slice_bytes..(port + 1) * slice_bytes];
            read_samples_i16_le(&mut self.group.raw_mut(port)[offset..offset + n], src);
        }

        if header.is_last || header.sub_cycle + 1 == header.num_packets {
            self.group.gate.end_cycle();
        }
        Ok(gap)
    }
}

// ------

/// Compressed stream: one fixed-size block per port per cycle, sliced across
/// the cycle's packets, dense packing.
///
/// The whole block is needed before anything can be decoded, so loss of any
/// sub-cycle silences the cycle instead of corrupting it.
pub struct CeltStream {
    group: PortGroup,
    codecs: Box<[Box<dyn BlockCodec>]>,
    tx_blocks: Box<[Box<[u8]>]>,
    rx_blocks: Box<[Box<[u8]>]>,
    block_bytes: usize,
    sub_bytes: usize,
    last_sub_bytes: usize,
    num_packets: u32,
    sample_rate: u32,
    cycle_intact: bool,
}

impl CeltStream {
    pub fn new(
        nports: u32,
        period: u32,
        sample_rate: u32,
        kbps: u32,
        budget: usize,
        mut make_codec: impl FnMut() -> Result<Box<dyn BlockCodec>, CodecError>,
    ) -> Result<Self, Error> {
        let block_bytes = kbps as usize * 1024 / 8;
        if block_bytes == 0 {
            return Err(CodecError::Config("zero compressed bitrate".into()).into());
        }

        let per_port_budget = budget / nports.max(1) as usize;
        if per_port_budget == 0 {
            return Err(CodecError::Config(format!(
                "{nports} ports leave no payload budget per port"
            ))
            .into());
        }

        let mut packets = block_bytes.div_ceil(per_port_budget);
        // the residual final slice must fit the per-port budget too
        while block_bytes - (packets - 1) * (block_bytes / packets) > per_port_budget {
            packets += 1;
        }
        let sub_bytes = block_bytes / packets;
        let last_sub_bytes = block_bytes - (packets - 1) * sub_bytes;

        let codecs = (0..nports)
            .map(|_| make_codec())
            .collect::<Result<Box<[_]>, _>>()?;

        Ok(Self {
            group: PortGroup::new(nports, period),
            codecs,
            tx_blocks: (0..nports)
                .map(|_| vec![0; block_bytes].into_boxed_slice())
                .collect(),
            rx_blocks: (0..nports)
                .map(|_| vec![0; block_bytes].into_boxed_slice())
                .collect(),
            block_bytes,
            sub_bytes,
            last_sub_bytes,
            num_packets: packets as u32,
            sample_rate,
            cycle_intact: true,
        })
    }

    /// Builds the stream with one CELT-family codec pair per port.
    #[cfg(feature = "opus")]
    pub fn with_opus(
        nports: u32,
        period: u32,
        sample_rate: u32,
        kbps: u32,
        budget: usize,
    ) -> Result<Self, Error> {
        let block_bytes = kbps as usize * 1024 / 8;
        Self::new(nports, period, sample_rate, kbps, budget, || {
            Ok(Box::new(crate::codec::OpusBlockCodec::new(
                sample_rate,
                period,
                block_bytes,
            )?))
        })
    }

    #[inline(always)]
    pub fn ports(&self) -> &PortGroup {
        &self.group
    }

    #[inline(always)]
    pub fn ports_mut(&mut self) -> &mut PortGroup {
        &mut self.group
    }

    /// Compressed bytes per port per cycle.
    #[inline(always)]
    pub const fn block_bytes(&self) -> usize {
        self.block_bytes
    }

    #[inline(always)]
    pub const fn sub_period_bytes(&self) -> usize {
        self.sub_bytes
    }

    #[inline(always)]
    pub const fn last_sub_period_bytes(&self) -> usize {
        self.last_sub_bytes
    }

    #[inline(always)]
    pub const fn num_packets(&self) -> u32 {
        self.num_packets
    }

    pub fn cycle_bytes(&self) -> usize {
        self.group.nports() as usize * self.block_bytes
    }

    pub fn cycle_duration(&self) -> f32 {
        (self.group.period() as f32 / self.num_packets as f32) / self.sample_rate as f32
    }

    #[inline(always)]
    fn slice(&self, sub_cycle: u32) -> (usize, usize) {
        let len = if sub_cycle + 1 == self.num_packets {
            self.last_sub_bytes
        } else {
            self.sub_bytes
        };
        (sub_cycle as usize * self.sub_bytes, len)
    }

    pub fn render_to_network(&mut self, sub_cycle: u32, out: &mut [u8]) -> (usize, u32) {
        if sub_cycle == 0 {
            for port in 0..self.group.nports() as usize {
                let block = &mut self.tx_blocks[port];
                if let Err(e) = self.codecs[port].encode_block(self.group.raw(port), block) {
                    log::warn!("encode failed on port {port}: {e}");
                    block.fill(0);
                }
            }
        }

        let (offset, len) = self.slice(sub_cycle);
        let mut pos = 0;
        for block in &self.tx_blocks {
            out[pos..pos + len].copy_from_slice(&block[offset..offset + len]);
            pos += len;
        }
        (pos, self.group.nports())
    }

    pub fn render_from_network(
        &mut self,
        header: &PacketHeader,
        payload: &[u8],
    ) -> Result<Option<SequenceGap>, Error> {
        let gap = self.group.gate.observe(header.sub_cycle);
        if let Some(gap) = gap {
            log::warn!(
                "audio packet(s) missing in cycle {}: expected sub-cycle {}, got {}",
                header.cycle,
                gap.expected,
                gap.observed
            );
            self.cycle_intact = false;
        }

        if header.sub_cycle >= self.num_packets {
            return Err(Error::MalformedHeader(DecodeError::BadField("subCycle")));
        }
        let (offset, len) = self.slice(header.sub_cycle);
        expect_payload(payload, self.group.nports() as usize * len)?;

        for (port, block) in self.rx_blocks.iter_mut().enumerate() {
            block[offset..offset + len].copy_from_slice(&payload[port * len..(port + 1) * len]);
        }

        if header.is_last || header.sub_cycle + 1 == header.num_packets {
            self.finish_cycle();
        }
        Ok(gap)
    }

    /// Decodes the reassembled blocks into the attached ports, or silences
    /// them if the cycle was incomplete or the codec refused.
    fn finish_cycle(&mut self) {
        for port in 0..self.group.nports() as usize {
            let Some(buf) = self.group.buffer_mut(port) else {
                continue;
            };

            let decoded = self.cycle_intact
                && match self.codecs[port].decode_block(&self.rx_blocks[port], buf) {
                    Ok(()) => true,
                    Err(e) => {
                        log::warn!("decode failed on port {port}: {e}");
                        false
                    }
                };

            if !decoded {
                buf.fill(SILENCE);
            }
        }

        self.group.gate.end_cycle();
        self.cycle_intact = true;
    }
}

// ------

#[inline(always)]
fn checked_offset(sub_cycle: u32, sub_period: usize, period: usize) -> Result<usize, Error> {
    let offset = sub_cycle as usize * sub_period;
    if offset + sub_period > period {
        return Err(Error::MalformedHeader(DecodeError::BadField("subCycle")));
    }
    Ok(offset)
}

#[inline(always)]
fn expect_payload(payload: &[u8], needed: usize) -> Result<(), Error> {
    if payload.len() < needed {
        return Err(Error::MalformedHeader(DecodeError::Truncated));
    }
    Ok(())
}

// ------

/// One cycle's audio stream, dispatched by the session's sample encoding.
pub enum AudioStream {
    Float(FloatStream),
    Int16(Int16Stream),
    Celt(CeltStream),
}

impl AudioStream {
    /// Builds the stream variant a session negotiated for one direction.
    ///
    /// `channels` is the direction's channel count; sparse packing only
    /// applies to the float encoding, the other variants are dense by
    /// construction.
    pub fn for_session(
        params: &SessionParams,
        channels: u32,
        packing: PortPacking,
    ) -> Result<Self, Error> {
        let budget = geometry::payload_budget(params.mtu);

        match params.sample_encoding {
            SampleEncoding::Float => Ok(Self::Float(FloatStream::new(
                packing,
                channels,
                params.period_size,
                params.sample_rate,
                budget,
            ))),
            SampleEncoding::Int16 => Ok(Self::Int16(Int16Stream::new(
                channels,
                params.period_size,
                params.sample_rate,
                budget,
            ))),
            #[cfg(feature = "opus")]
            SampleEncoding::Celt => Ok(Self::Celt(CeltStream::with_opus(
                channels,
                params.period_size,
                params.sample_rate,
                params.kbps,
                budget,
            )?)),
            #[cfg(not(feature = "opus"))]
            SampleEncoding::Celt => Err(Error::EncoderFailure(CodecError::Unsupported)),
        }
    }

    pub fn ports(&self) -> &PortGroup {
        match self {
            Self::Float(s) => s.ports(),
            Self::Int16(s) => s.ports(),
            Self::Celt(s) => s.ports(),
        }
    }

    pub fn ports_mut(&mut self) -> &mut PortGroup {
        match self {
            Self::Float(s) => s.ports_mut(),
            Self::Int16(s) => s.ports_mut(),
            Self::Celt(s) => s.ports_mut(),
        }
    }

    pub fn num_packets(&self) -> u32 {
        match self {
            Self::Float(s) => s.num_packets(),
            Self::Int16(s) => s.num_packets(),
            Self::Celt(s) => s.num_packets(),
        }
    }

    pub fn cycle_bytes(&self) -> usize {
        match self {
            Self::Float(s) => s.cycle_bytes(),
            Self::Int16(s) => s.cycle_bytes(),
            Self::Celt(s) => s.cycle_bytes(),
        }
    }

    pub fn cycle_duration(&self) -> f32 {
        match self {
            Self::Float(s) => s.cycle_duration(),
            Self::Int16(s) => s.cycle_duration(),
            Self::Celt(s) => s.cycle_duration(),
        }
    }

    pub fn render_to_network(&mut self, sub_cycle: u32, out: &mut [u8]) -> (usize, u32) {
        match self {
            Self::Float(s) => s.render_to_network(sub_cycle, out),
            Self::Int16(s) => s.render_to_network(sub_cycle, out),
            Self::Celt(s) => s.render_to_network(sub_cycle, out),
        }
    }

    pub fn render_from_network(
        &mut self,
        header: &PacketHeader,
        payload: &[u8],
    ) -> Result<Option<SequenceGap>, Error> {
        match self {
            Self::Float(s) => s.render_from_network(header, payload),
            Self::Int16(s) => s.render_from_network(header, payload),
            Self::Celt(s) => s.render_from_network(header, payload),
        }
    }

    /// Advertises the attached-port set. Only meaningful for sparse float
    /// streams; the dense variants advertise their full set harmlessly.
    pub fn active_ports_to_network(&self, out: &mut [u8]) -> (usize, u32) {
        self.ports().active_ports_to_network(out)
    }

    pub fn active_ports_from_network(&mut self, buf: &[u8], count: u32) -> Result<(), Error> {
        self.ports_mut().active_ports_from_network(buf, count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::testing::{BrokenCodec, LossyByteCodec};
    use crate::proto::header::{DataKind, Direction};

    const MTU: u32 = 1500;
    const BUDGET: usize = geometry::payload_budget(MTU);

    fn header(sub_cycle: u32, num_packets: u32, payload: usize, ports: u32) -> PacketHeader {
        PacketHeader {
            kind: DataKind::Audio,
            direction: Direction::Send,
            slave_id: 0,
            num_packets,
            payload_size: payload as u32,
            active_ports: ports,
            cycle: 0,
            sub_cycle,
            is_last: sub_cycle + 1 == num_packets,
        }
    }

    fn ramp(len: usize, base: f32) -> Vec<f32> {
        (0..len).map(|i| base + i as f32 / 10_000.).collect()
    }

    /// Runs one full cycle from `tx` into `rx` and returns the payload sizes.
    fn run_cycle(tx: &mut AudioStream, rx: &mut AudioStream) -> Vec<usize> {
        let mut sizes = Vec::new();
        let mut out = vec![0u8; BUDGET];
        let k = tx.num_packets();

        for sub in 0..k {
            let (len, ports) = tx.render_to_network(sub, &mut out);
            sizes.push(len);
            let h = header(sub, k, len, ports);
            assert_eq!(rx.render_from_network(&h, &out[..len]).unwrap(), None);
        }
        sizes
    }

    #[test]
    fn one_port_one_packet() {
        let tx = FloatStream::new(PortPacking::Dense, 1, 64, 48_000, BUDGET);
        assert_eq!(tx.sub_period(), 64);
        assert_eq!(tx.num_packets(), 1);

        let mut out = [0u8; BUDGET];
        let (len, ports) = tx.render_to_network(0, &mut out);
        assert_eq!((len, ports), (256, 1));
    }

    #[test]
    fn dense_float_cycle_reconstructs_exactly() {
        let mut tx = AudioStream::Float(FloatStream::new(PortPacking::Dense, 16, 1024, 48_000, BUDGET));
        let mut rx = AudioStream::Float(FloatStream::new(PortPacking::Dense, 16, 1024, 48_000, BUDGET));

        assert_eq!(tx.num_packets(), 64);
        for port in 0..16 {
            tx.ports_mut()
                .attach(port)
                .unwrap()
                .copy_from_slice(&ramp(1024, port as f32));
            rx.ports_mut().attach(port).unwrap();
        }

        let sizes = run_cycle(&mut tx, &mut rx);
        // every payload fits the budget and the cycle adds up exactly
        assert!(sizes.iter().all(|&s| s <= BUDGET));
        assert_eq!(sizes.iter().sum::<usize>(), tx.cycle_bytes());

        for port in 0..16 {
            assert_eq!(rx.ports().buffer(port).unwrap(), &ramp(1024, port as f32)[..]);
        }

        // the gate reset at the cycle boundary: a second cycle starts clean
        let sizes = run_cycle(&mut tx, &mut rx);
        assert_eq!(sizes.len(), 64);
    }

    #[test]
    fn sparse_float_sends_only_attached_ports() {
        let mut tx = FloatStream::new(PortPacking::Sparse, 16, 1024, 48_000, BUDGET);
        tx.ports_mut().attach(3).unwrap().copy_from_slice(&ramp(1024, 1.));
        tx.ports_mut().attach(11).unwrap().copy_from_slice(&ramp(1024, 2.));

        // 2 * (s * 4 + 4) <= 1436 caps the power-of-two sub-period at 128
        assert_eq!(tx.sub_period(), 128);
        assert_eq!(tx.num_packets(), 8);

        let mut out = [0u8; BUDGET];
        let (len, ports) = tx.render_to_network(0, &mut out);
        assert_eq!(ports, 2);
        assert_eq!(len, 2 * (128 * SAMPLE_WIRE_SIZE + SPARSE_PORT_TAG_BYTES));
        // each slice opens with its 32-bit little-endian port index
        assert_eq!(out[..4], 3u32.to_le_bytes());
    }

    #[test]
    fn sparse_float_cycle_scatters_and_silences_by_omission() {
        let mut tx = AudioStream::Float(FloatStream::new(PortPacking::Sparse, 16, 256, 48_000, BUDGET));
        let mut rx = AudioStream::Float(FloatStream::new(PortPacking::Sparse, 16, 256, 48_000, BUDGET));

        tx.ports_mut().attach(3).unwrap().copy_from_slice(&ramp(256, 1.));
        tx.ports_mut().attach(11).unwrap().copy_from_slice(&ramp(256, 2.));

        // the receiver has a third port bound that the sender omits
        rx.ports_mut().attach(3).unwrap();
        rx.ports_mut().attach(5).unwrap().fill(9.);
        rx.ports_mut().attach(11).unwrap();

        run_cycle(&mut tx, &mut rx);

        assert_eq!(rx.ports().buffer(3).unwrap(), &ramp(256, 1.)[..]);
        assert_eq!(rx.ports().buffer(11).unwrap(), &ramp(256, 2.)[..]);
        assert_eq!(rx.ports().buffer(5).unwrap(), &[SILENCE; 256][..]);
    }

    #[test]
    fn sparse_with_no_attached_ports_is_one_empty_packet() {
        let tx = FloatStream::new(PortPacking::Sparse, 8, 512, 48_000, BUDGET);
        assert_eq!(tx.num_packets(), 1);

        let mut out = [0u8; BUDGET];
        assert_eq!(tx.render_to_network(0, &mut out), (0, 0));
    }

    #[test]
    fn int16_round_trips_with_saturation() {
        let mut tx = AudioStream::Int16(Int16Stream::new(2, 64, 48_000, BUDGET));
        let mut rx = AudioStream::Int16(Int16Stream::new(2, 64, 48_000, BUDGET));

        let mut samples = ramp(64, 0.);
        samples[0] = 2.0; // clips
        samples[1] = -2.0;
        tx.ports_mut().attach(0).unwrap().copy_from_slice(&samples);
        tx.ports_mut().attach(1).unwrap();
        rx.ports_mut().attach(0).unwrap();
        rx.ports_mut().attach(1).unwrap();

        run_cycle(&mut tx, &mut rx);

        let got = rx.ports().buffer(0).unwrap();
        assert_eq!(got[0], 1.0);
        assert_eq!(got[1], -1.0);
        for (a, b) in got.iter().zip(&samples).skip(2) {
            assert!((a - b).abs() < 1.0 / 16_000., "{a} vs {b}");
        }
    }

    #[test]
    fn int16_tail_carries_the_remainder() {
        // 6 ports of 16-bit samples: 1436 / 12 caps the sub-period at 119,
        // so 256 samples split 3 ways with a shorter tail
        let s = Int16Stream::new(6, 256, 48_000, BUDGET);
        assert_eq!(s.num_packets(), 3);
        assert_eq!(s.sub_period(), 86);
        assert_eq!(s.last_sub_period(), 84);
        assert_eq!(2 * s.sub_period() + s.last_sub_period(), 256);

        let mut tx = AudioStream::Int16(Int16Stream::new(6, 256, 48_000, BUDGET));
        let mut rx = AudioStream::Int16(Int16Stream::new(6, 256, 48_000, BUDGET));
        for port in 0..6 {
            tx.ports_mut().attach(port).unwrap().copy_from_slice(&ramp(256, 0.1));
            rx.ports_mut().attach(port).unwrap();
        }

        let sizes = run_cycle(&mut tx, &mut rx);
        assert_eq!(sizes, [6 * 86 * 2, 6 * 86 * 2, 6 * 84 * 2]);
        assert!(sizes.iter().all(|&l| l <= BUDGET));
    }

    #[test]
    fn celt_slices_one_block_across_the_cycle() {
        // 64 KB/s reserves 8192 bytes per port per period; one port splits
        // it into ceil(8192 / 1436) = 6 slices with a residual tail
        let mut tx = CeltStream::new(1, 512, 48_000, 64, BUDGET, || Ok(Box::new(LossyByteCodec)))
            .unwrap();
        assert_eq!(tx.block_bytes(), 8192);
        assert_eq!(tx.num_packets(), 6);
        assert_eq!(tx.sub_period_bytes(), 1365);
        assert_eq!(tx.last_sub_period_bytes(), 1367);

        let mut rx = CeltStream::new(1, 512, 48_000, 64, BUDGET, || Ok(Box::new(LossyByteCodec)))
            .unwrap();

        let samples: Vec<f32> = (0..512).map(|i| ((i % 100) as f32 - 50.) / 100.).collect();
        tx.ports_mut().attach(0).unwrap().copy_from_slice(&samples);
        rx.ports_mut().attach(0).unwrap();

        let mut tx = AudioStream::Celt(tx);
        let mut rx = AudioStream::Celt(rx);
        let sizes = run_cycle(&mut tx, &mut rx);
        assert_eq!(sizes, [1365, 1365, 1365, 1365, 1365, 1367]);
        assert_eq!(sizes.iter().sum::<usize>(), 8192);

        for (got, want) in rx.ports().buffer(0).unwrap().iter().zip(&samples) {
            assert!((got - want).abs() < 1.0 / 64., "{got} vs {want}");
        }
    }

    #[test]
    fn celt_payloads_respect_the_budget_with_more_ports() {
        let s = CeltStream::new(2, 512, 48_000, 64, BUDGET, || Ok(Box::new(LossyByteCodec)))
            .unwrap();
        // the per-port budget halves, so the cycle needs twice the packets
        assert_eq!(s.num_packets(), 12);

        let mut tx = AudioStream::Celt(s);
        let mut out = vec![0u8; BUDGET];
        for sub in 0..tx.num_packets() {
            let (len, _) = tx.render_to_network(sub, &mut out);
            assert!(len <= BUDGET, "sub-cycle {sub}: {len} > {BUDGET}");
        }
    }

    #[test]
    fn celt_loss_silences_the_cycle() {
        let mut tx = CeltStream::new(1, 512, 48_000, 64, BUDGET, || Ok(Box::new(LossyByteCodec)))
            .unwrap();
        let mut rx = CeltStream::new(1, 512, 48_000, 64, BUDGET, || Ok(Box::new(LossyByteCodec)))
            .unwrap();
        tx.ports_mut().attach(0).unwrap().fill(0.5);
        rx.ports_mut().attach(0).unwrap().fill(9.);

        let k = tx.num_packets();
        let mut out = vec![0u8; BUDGET];
        let mut saw_gap = false;

        for sub in 0..k {
            let (len, ports) = tx.render_to_network(sub, &mut out);
            if sub == 2 {
                continue; // lost in transit
            }
            let h = header(sub, k, len, ports);
            saw_gap |= rx.render_from_network(&h, &out[..len]).unwrap().is_some();
        }

        assert!(saw_gap);
        assert_eq!(rx.ports().buffer(0).unwrap(), &[SILENCE; 512][..]);

        // next cycle decodes again
        let mut tx = AudioStream::Celt(tx);
        let mut rx = AudioStream::Celt(rx);
        run_cycle(&mut tx, &mut rx);
        assert!(rx.ports().buffer(0).unwrap()[0] != SILENCE);
    }

    #[test]
    fn broken_codec_yields_silence_not_errors() {
        let mut tx = CeltStream::new(1, 64, 48_000, 8, BUDGET, || Ok(Box::new(BrokenCodec)))
            .unwrap();
        let mut rx = CeltStream::new(1, 64, 48_000, 8, BUDGET, || Ok(Box::new(BrokenCodec)))
            .unwrap();
        tx.ports_mut().attach(0).unwrap().fill(0.5);
        rx.ports_mut().attach(0).unwrap().fill(9.);

        let mut tx = AudioStream::Celt(tx);
        let mut rx = AudioStream::Celt(rx);
        run_cycle(&mut tx, &mut rx);
        assert_eq!(rx.ports().buffer(0).unwrap(), &[SILENCE; 64][..]);
    }

    #[test]
    fn variant_selection_follows_the_session() {
        let mut params = SessionParams {
            phase: crate::proto::session::SyncPhase::StartMaster,
            slave_name: "s".into(),
            master_host: "m".into(),
            slave_host: "h".into(),
            mtu: MTU,
            slave_id: 0,
            transport_sync: false,
            send_audio_channels: 2,
            return_audio_channels: 2,
            send_midi_channels: 0,
            return_midi_channels: 0,
            sample_rate: 48_000,
            period_size: 128,
            sample_encoding: SampleEncoding::Float,
            kbps: 0,
            slave_sync_mode: false,
            network_latency: 0,
        };

        let s = AudioStream::for_session(&params, 2, PortPacking::Sparse).unwrap();
        assert!(matches!(s, AudioStream::Float(_)));

        params.sample_encoding = SampleEncoding::Int16;
        let s = AudioStream::for_session(&params, 2, PortPacking::Dense).unwrap();
        assert!(matches!(s, AudioStream::Int16(_)));
        assert_eq!(s.cycle_bytes(), 2 * 128 * 2);
    }
}
