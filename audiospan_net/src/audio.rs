//! Port storage and the active-port side channel.
//!
//! A [`PortGroup`] owns one period-sized buffer per port. The driver attaches
//! the ports it has bound, fills or drains their buffers every cycle, and the
//! stream variants in [`crate::stream`] gather from and scatter into this
//! storage. "Remotely active" is tracked as a separate mask: a port slot
//! always means *locally bound*, never a sentinel.

use crate::{
    Error, SILENCE, Sample,
    gate::SubCycleGate,
    proto::{DecodeError, wire},
};
use arrayvec::ArrayVec;

/// Upper bound on ports advertised in one active-port list.
pub const MAX_ACTIVE_PORTS: usize = 512;

/// Bytes of the 32-bit index tag prefixing each port slice in sparse audio
/// payloads. The sync-side list uses 16-bit entries instead; the asymmetry
/// is part of the wire format.
pub const SPARSE_PORT_TAG_BYTES: usize = 4;

/// How port slices are packed into an audio payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortPacking {
    /// Every port is serialized every sub-cycle, port-major, untagged.
    Dense,
    /// Only attached ports are serialized, each slice prefixed by its port
    /// index; the active set is advertised once per cycle on the sync side.
    Sparse,
}

struct PortSlot {
    samples: Box<[Sample]>,
    attached: bool,
}

/// Per-direction port storage shared by all stream variants.
pub struct PortGroup {
    period: usize,
    slots: Box<[PortSlot]>,
    remote_active: Box<[bool]>,
    pub(crate) gate: SubCycleGate,
}

impl PortGroup {
    pub fn new(nports: u32, period: u32) -> Self {
        let period = period as usize;
        Self {
            period,
            slots: (0..nports)
                .map(|_| PortSlot {
                    samples: vec![SILENCE; period].into_boxed_slice(),
                    attached: false,
                })
                .collect(),
            remote_active: vec![false; nports as usize].into_boxed_slice(),
            gate: SubCycleGate::new(),
        }
    }

    #[inline(always)]
    pub fn nports(&self) -> u32 {
        self.slots.len() as u32
    }

    #[inline(always)]
    pub const fn period(&self) -> usize {
        self.period
    }

    /// Marks `port` as locally bound and returns its buffer for the driver
    /// to fill. `None` if the port does not exist.
    pub fn attach(&mut self, port: usize) -> Option<&mut [Sample]> {
        let slot = self.slots.get_mut(port)?;
        slot.attached = true;
        Some(&mut slot.samples)
    }

    pub fn detach(&mut self, port: usize) {
        if let Some(slot) = self.slots.get_mut(port) {
            slot.attached = false;
        }
    }

    #[inline(always)]
    pub fn is_attached(&self, port: usize) -> bool {
        self.slots.get(port).is_some_and(|s| s.attached)
    }

    /// Buffer of an attached port.
    pub fn buffer(&self, port: usize) -> Option<&[Sample]> {
        self.slots
            .get(port)
            .filter(|s| s.attached)
            .map(|s| &*s.samples)
    }

    /// Mutable buffer of an attached port.
    pub fn buffer_mut(&mut self, port: usize) -> Option<&mut [Sample]> {
        self.slots
            .get_mut(port)
            .filter(|s| s.attached)
            .map(|s| &mut *s.samples)
    }

    /// Ports currently attached. This is the `A` of the sparse geometry.
    pub fn attached_count(&self) -> u32 {
        self.slots.iter().filter(|s| s.attached).count() as u32
    }

    /// Writes silence into every attached port, so omitted ports stay
    /// silent when a sparse cycle scatters over them.
    pub fn silence_attached(&mut self) {
        for slot in self.slots.iter_mut().filter(|s| s.attached) {
            slot.samples.fill(SILENCE);
        }
    }

    /// Whether the peer advertised `port` in its last active-port list.
    #[inline(always)]
    pub fn is_remote_active(&self, port: usize) -> bool {
        self.remote_active.get(port).copied().unwrap_or(false)
    }

    /// The ordered attached-port index set.
    ///
    /// At most [`MAX_ACTIVE_PORTS`] ports can be advertised per cycle; a
    /// session with more attached ports than that is a configuration error.
    pub fn active_port_indices(&self) -> ArrayVec<u16, MAX_ACTIVE_PORTS> {
        let mut indices = ArrayVec::new();
        for (idx, slot) in self.slots.iter().enumerate() {
            if slot.attached {
                assert!(indices.len() < MAX_ACTIVE_PORTS, "active-port list overflow");
                indices.push(idx as u16);
            }
        }
        indices
    }

    /// Serializes the attached-port index list into `out` as 16-bit wire
    /// integers. Returns the bytes written and the entry count; the count
    /// travels in the sync header, the list has no terminator of its own.
    pub fn active_ports_to_network(&self, out: &mut [u8]) -> (usize, u32) {
        let indices = self.active_port_indices();
        debug_assert!(out.len() >= indices.len() * 2);
        for (chunk, &idx) in out.chunks_exact_mut(2).zip(&indices) {
            chunk.copy_from_slice(&wire::to_wire_u16(idx));
        }
        (indices.len() * 2, indices.len() as u32)
    }

    /// Rebuilds the remote-active mask from a received index list.
    ///
    /// Indices outside the session's port range are logged and skipped; the
    /// rest of the list is still applied.
    pub fn active_ports_from_network(&mut self, buf: &[u8], count: u32) -> Result<(), Error> {
        let needed = count as usize * 2;
        if buf.len() < needed {
            return Err(Error::MalformedHeader(DecodeError::Truncated));
        }

        self.remote_active.fill(false);

        for chunk in buf[..needed].chunks_exact(2) {
            let port = u32::from(wire::from_wire_u16([chunk[0], chunk[1]]));
            match self.remote_active.get_mut(port as usize) {
                Some(active) => *active = true,
                None => log::error!(
                    "{}",
                    Error::PortIndexOutOfRange {
                        port,
                        nports: self.nports(),
                    }
                ),
            }
        }
        Ok(())
    }

    // Raw slot access for dense rendering, which covers unattached ports too.

    #[inline(always)]
    pub(crate) fn raw(&self, port: usize) -> &[Sample] {
        &self.slots[port].samples
    }

    #[inline(always)]
    pub(crate) fn raw_mut(&mut self, port: usize) -> &mut [Sample] {
        &mut self.slots[port].samples
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attach_detach_drives_the_active_count() {
        let mut group = PortGroup::new(16, 128);
        assert_eq!(group.attached_count(), 0);
        assert!(group.buffer(3).is_none());

        group.attach(3).unwrap().fill(0.5);
        group.attach(11).unwrap();
        assert_eq!(group.attached_count(), 2);
        assert_eq!(group.buffer(3).unwrap()[0], 0.5);

        group.detach(3);
        assert_eq!(group.attached_count(), 1);
        assert!(group.buffer(3).is_none());

        assert!(group.attach(16).is_none());
    }

    #[test]
    fn active_port_list_round_trips() {
        let mut tx = PortGroup::new(16, 128);
        tx.attach(3).unwrap();
        tx.attach(11).unwrap();

        let mut buf = [0u8; 64];
        let (len, count) = tx.active_ports_to_network(&mut buf);
        assert_eq!((len, count), (4, 2));
        // 16-bit big-endian entries
        assert_eq!(&buf[..4], &[0, 3, 0, 11]);

        let mut rx = PortGroup::new(16, 128);
        rx.active_ports_from_network(&buf[..len], count).unwrap();
        let active: Vec<usize> = (0..16).filter(|&p| rx.is_remote_active(p)).collect();
        assert_eq!(active, [3, 11]);
    }

    #[test]
    fn replayed_list_clears_stale_entries() {
        let mut rx = PortGroup::new(8, 64);
        rx.active_ports_from_network(&[0, 1, 0, 2], 2).unwrap();
        assert!(rx.is_remote_active(1) && rx.is_remote_active(2));

        rx.active_ports_from_network(&[0, 5], 1).unwrap();
        assert!(!rx.is_remote_active(1) && !rx.is_remote_active(2));
        assert!(rx.is_remote_active(5));
    }

    #[test]
    fn out_of_range_entries_are_skipped() {
        let mut rx = PortGroup::new(4, 64);
        // entries 2 and 200; the second is outside 0..4
        rx.active_ports_from_network(&[0, 2, 0, 200], 2).unwrap();
        assert!(rx.is_remote_active(2));
        assert_eq!((0..4).filter(|&p| rx.is_remote_active(p)).count(), 1);
    }

    #[test]
    fn truncated_list_is_rejected() {
        let mut rx = PortGroup::new(4, 64);
        assert!(matches!(
            rx.active_ports_from_network(&[0, 2, 0], 2),
            Err(Error::MalformedHeader(DecodeError::Truncated))
        ));
    }

    #[test]
    fn silence_covers_only_attached_ports() {
        let mut group = PortGroup::new(2, 4);
        group.attach(0).unwrap().fill(1.0);
        group.raw_mut(1).fill(1.0);
        group.detach(1);

        group.silence_attached();
        assert_eq!(group.raw(0), &[0.0; 4]);
        assert_eq!(group.raw(1), &[1.0; 4]);
    }
}
