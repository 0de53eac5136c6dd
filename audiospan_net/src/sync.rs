//! The end-of-cycle sync payload.
//!
//! After the last audio and MIDI packet of a cycle, a sync packet carries
//! the transport (playhead) record and, when the sender packs sparsely, the
//! active-port index list the peer needs before the next cycle's audio can
//! be interpreted.

use crate::{Error, audio::PortGroup};
use audiospan_proto::transport::{TRANSPORT_WIRE_SIZE, TransportData};

/// Writes a sync payload into `out`.
///
/// Returns the payload size and the advertised active-port count; the count
/// travels in the packet header's `active_ports` field, the list itself has
/// no terminator.
pub fn write_sync(
    transport: &TransportData,
    ports: Option<&PortGroup>,
    out: &mut [u8],
) -> (usize, u32) {
    let (head, rest) = out.split_at_mut(TRANSPORT_WIRE_SIZE);
    // infallible: split_at_mut just proved the slice is long enough
    transport.encode(head.try_into().unwrap());

    match ports {
        Some(group) => {
            let (list_len, count) = group.active_ports_to_network(rest);
            (TRANSPORT_WIRE_SIZE + list_len, count)
        }
        None => (TRANSPORT_WIRE_SIZE, 0),
    }
}

/// Parses a sync payload.
///
/// When `ports` is given, the trailing active-port list (of `active_count`
/// entries, from the packet header) rebuilds the remote-active mask.
pub fn read_sync(
    payload: &[u8],
    active_count: u32,
    ports: Option<&mut PortGroup>,
) -> Result<TransportData, Error> {
    let transport = TransportData::decode(payload).map_err(Error::MalformedHeader)?;

    if let Some(group) = ports {
        group.active_ports_from_network(&payload[TRANSPORT_WIRE_SIZE..], active_count)?;
    }
    Ok(transport)
}
