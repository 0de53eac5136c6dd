//! End-to-end exercise of one master-to-slave cycle: audio, MIDI and sync
//! packets assembled into staging buffers, crossed over a loopback link,
//! classified, admitted and scattered on the far side.

use audiospan_net::{
    PacketBuffer, admit_header,
    audio::PortPacking,
    geometry,
    midi::MidiCycleBuffer,
    proto::{
        self, PacketKind,
        header::{DataKind, Direction, PacketHeader},
        session::{SampleEncoding, SessionParams, SyncPhase},
        transport::{PositionInfo, TimebaseMode, TransportData, TransportState},
    },
    stream::AudioStream,
    sync,
};

fn session() -> SessionParams {
    SessionParams {
        phase: SyncPhase::StartMaster,
        slave_name: "worker".into(),
        master_host: "studio".into(),
        slave_host: "rack".into(),
        mtu: 1500,
        slave_id: 4,
        transport_sync: true,
        send_audio_channels: 4,
        return_audio_channels: 0,
        send_midi_channels: 1,
        return_midi_channels: 0,
        sample_rate: 48_000,
        period_size: 256,
        sample_encoding: SampleEncoding::Float,
        kbps: 0,
        slave_sync_mode: true,
        network_latency: 0,
    }
}

fn data_header(session: &SessionParams, kind: DataKind) -> PacketHeader {
    PacketHeader {
        kind,
        direction: Direction::Send,
        slave_id: session.slave_id,
        num_packets: 1,
        payload_size: 0,
        active_ports: 0,
        cycle: 9,
        sub_cycle: 0,
        is_last: false,
    }
}

#[test]
fn one_cycle_crosses_the_link() {
    let params = session();
    params.validate().unwrap();
    let budget = geometry::payload_budget(params.mtu);

    // master-side state
    let mut master_audio =
        AudioStream::for_session(&params, params.send_audio_channels as u32, PortPacking::Sparse)
            .unwrap();
    let mut master_midi = MidiCycleBuffer::new(params.send_midi_channels as u32, params.period_size, budget);
    let transport = TransportData {
        state_changed: true,
        timebase: TimebaseMode::NoChange,
        state: TransportState::Rolling,
        position: PositionInfo {
            frame: 2304,
            sample_rate: params.sample_rate,
            beats_per_minute: 98.0,
        },
    };

    // slave-side state
    let mut slave_audio =
        AudioStream::for_session(&params, params.send_audio_channels as u32, PortPacking::Sparse)
            .unwrap();
    let mut slave_midi = MidiCycleBuffer::new(params.send_midi_channels as u32, params.period_size, budget);

    // the driver binds two of the four ports and fills them
    let wave: Vec<f32> = (0..256).map(|i| (i as f32 / 256.).sin()).collect();
    master_audio.ports_mut().attach(1).unwrap().copy_from_slice(&wave);
    master_audio.ports_mut().attach(2).unwrap().fill(0.25);
    master_midi.push_event(0, 17, &[0x90, 64, 90]).unwrap();
    master_midi.render_from_local();

    slave_audio.ports_mut().attach(1).unwrap();
    slave_audio.ports_mut().attach(2).unwrap();

    let tx = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
    let rx = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
    let rx_addr = rx.local_addr().unwrap();
    let link = audiospan_net::link::Link::new(tx, params.mtu);

    let mut staging = PacketBuffer::new(params.mtu);
    let mut received = vec![0u8; params.mtu as usize];
    let mut transport_seen = None;

    // ship the full cycle: K audio packets, one midi packet, one sync packet
    let audio_packets = master_audio.num_packets();
    for sub in 0..audio_packets {
        let (payload_len, ports) = {
            let (_, payload) = staging.split_mut();
            master_audio.render_to_network(sub, payload)
        };
        let mut header = data_header(&params, DataKind::Audio);
        header.num_packets = audio_packets;
        header.sub_cycle = sub;
        header.payload_size = payload_len as u32;
        header.active_ports = ports;
        header.encode(staging.split_mut().0);
        link.send_to(staging.packet(payload_len), rx_addr).unwrap();
    }

    {
        let payload_len = {
            let (_, payload) = staging.split_mut();
            master_midi.render_to_network(0, payload)
        };
        let mut header = data_header(&params, DataKind::Midi);
        header.num_packets = master_midi.num_packets();
        header.payload_size = payload_len as u32;
        header.encode(staging.split_mut().0);
        link.send_to(staging.packet(payload_len), rx_addr).unwrap();
    }

    {
        let (payload_len, ports) = {
            let (_, payload) = staging.split_mut();
            sync::write_sync(&transport, Some(master_audio.ports()), payload)
        };
        let mut header = data_header(&params, DataKind::Sync);
        header.payload_size = payload_len as u32;
        header.active_ports = ports;
        header.is_last = true;
        header.encode(staging.split_mut().0);
        link.send_to(staging.packet(payload_len), rx_addr).unwrap();
    }

    // receive and dispatch everything that was sent
    for _ in 0..audio_packets + 2 {
        let (len, _) = rx.recv_from(&mut received).unwrap();
        let packet = &received[..len];
        assert_eq!(proto::peek_kind(packet), PacketKind::Data);

        let header = PacketHeader::decode(packet).unwrap();
        admit_header(&header, &params).unwrap();

        let payload = &packet[proto::header::HEADER_WIRE_SIZE..]
            [..header.payload_size as usize];
        match header.kind {
            DataKind::Audio => {
                assert_eq!(slave_audio.render_from_network(&header, payload).unwrap(), None);
            }
            DataKind::Midi => {
                assert_eq!(slave_midi.render_from_network(&header, payload).unwrap(), None);
            }
            DataKind::Sync => {
                let t =
                    sync::read_sync(payload, header.active_ports, Some(slave_audio.ports_mut()))
                        .unwrap();
                transport_seen = Some(t);
            }
        }
    }

    // audio landed on the bound ports, silence everywhere else
    assert_eq!(slave_audio.ports().buffer(1).unwrap(), &wave[..]);
    assert_eq!(slave_audio.ports().buffer(2).unwrap(), &[0.25f32; 256][..]);
    assert!(slave_audio.ports().buffer(0).is_none());

    // midi arrived intact
    assert_eq!(slave_midi.events(0).len(), 1);
    assert_eq!(slave_midi.events(0)[0].time, 17);
    assert_eq!(slave_midi.events(0)[0].data, [0x90, 64, 90]);

    // the sync payload delivered transport state and the active-port set
    assert_eq!(transport_seen, Some(transport));
    assert!(slave_audio.ports().is_remote_active(1));
    assert!(slave_audio.ports().is_remote_active(2));
    assert!(!slave_audio.ports().is_remote_active(0));
}
