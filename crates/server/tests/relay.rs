use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::thread;
use std::time::Duration;

use friendlink::{
    receive_packet, send_packet, unpack_status, InitialMessage, Location, Packet, PacketType,
    PropertyStream, PropertyTag, Socket, Status,
};
use friendlink_server::{RelayServer, ServerConfig, ServerEvent};

static PORT_COUNTER: AtomicU16 = AtomicU16::new(43000);

fn next_ports() -> (u16, u16) {
    let base = PORT_COUNTER.fetch_add(10, Ordering::SeqCst);
    (base, base + 1)
}

fn start_server(max_clients: u8) -> (RelayServer, Receiver<ServerEvent>, u16) {
    let (tcp_port, udp_port) = next_ports();
    let config = ServerConfig {
        name: "test".to_string(),
        max_clients,
        tcp_port,
        udp_port,
    };
    let (tx, rx) = mpsc::channel();
    let server = RelayServer::start(&config, tx).unwrap();
    (server, rx, tcp_port)
}

fn connect(tcp_port: u16) -> Socket {
    let socket = Socket::connect_tcp("127.0.0.1", tcp_port).unwrap();
    socket
        .set_read_timeout(Some(Duration::from_secs(2)))
        .unwrap();
    socket
}

/// Reads packets until one of the wanted type arrives.
fn recv_type(socket: &mut Socket, wanted: PacketType) -> Packet {
    loop {
        let packet = receive_packet(socket).unwrap();
        if packet.packet_type() == wanted {
            return packet;
        }
        assert_ne!(
            packet.packet_type(),
            PacketType::SocketDisconnect,
            "peer closed while waiting for {wanted:?}"
        );
    }
}

#[test]
fn handshake_assigns_slots_in_join_order() {
    let (_server, _events, tcp_port) = start_server(2);

    let mut first = connect(tcp_port);
    let greeting = recv_type(&mut first, PacketType::InitialMessage);
    assert_eq!(
        InitialMessage::from_packet(&greeting).unwrap(),
        InitialMessage::new(2, 0)
    );

    let mut second = connect(tcp_port);
    let greeting = recv_type(&mut second, PacketType::InitialMessage);
    assert_eq!(
        InitialMessage::from_packet(&greeting).unwrap(),
        InitialMessage::new(2, 1)
    );

    // The newcomer gets the active table replayed...
    let replay = recv_type(&mut second, PacketType::Status);
    assert_eq!(replay.client(), 0);
    assert_eq!(unpack_status(&replay).unwrap(), Status::New);

    // ...and the first client hears about the join, then the prompt for
    // a data snapshot.
    let joined = recv_type(&mut first, PacketType::Status);
    assert_eq!(joined.client(), 1);
    assert_eq!(unpack_status(&joined).unwrap(), Status::New);
    let request = recv_type(&mut first, PacketType::DataRequest);
    assert_eq!(request.client(), 1);
}

#[test]
fn full_server_rejects_with_zero_initial_message() {
    let (_server, _events, tcp_port) = start_server(1);

    let mut first = connect(tcp_port);
    let greeting = recv_type(&mut first, PacketType::InitialMessage);
    assert!(InitialMessage::from_packet(&greeting).unwrap().accepted());

    let mut second = connect(tcp_port);
    let rejection = recv_type(&mut second, PacketType::InitialMessage);
    assert_eq!(
        InitialMessage::from_packet(&rejection).unwrap(),
        InitialMessage::rejection()
    );

    // The server drops the socket right after the rejection.
    let next = receive_packet(&mut second).unwrap();
    assert_eq!(next.packet_type(), PacketType::SocketDisconnect);
}

#[test]
fn reliable_properties_relay_to_the_other_client() {
    let (_server, _events, tcp_port) = start_server(2);

    let mut sender = connect(tcp_port);
    recv_type(&mut sender, PacketType::InitialMessage);
    let mut receiver = connect(tcp_port);
    recv_type(&mut receiver, PacketType::InitialMessage);
    recv_type(&mut receiver, PacketType::Status);

    let mut stream = PropertyStream::new();
    stream.push(&friendlink::pack_string(PropertyTag::Name, "Amber"));
    stream.push(&Location::new(Some(1), Some(2), [1.0, 2.0, 3.0]).to_property());
    let packet = Packet::new(PacketType::Properties, 0, stream.as_bytes().to_vec());
    send_packet(&mut sender, &packet).unwrap();

    let relayed = recv_type(&mut receiver, PacketType::Properties);
    assert_eq!(relayed.client(), 0);
    assert_eq!(relayed.data(), stream.as_bytes());

    let parsed = PropertyStream::from_bytes(relayed.into_data());
    let properties: Vec<_> = parsed.iter().map(|p| p.unwrap()).collect();
    assert_eq!(friendlink::unpack_string(&properties[0]), "Amber");
    let location = Location::from_property(&properties[1]).unwrap();
    assert_eq!(location.position(), [1.0, 2.0, 3.0]);
    assert_eq!(location.world_space_id(), 1);
    assert_eq!(location.cell_id(), 2);
}

#[test]
fn clean_close_propagates_a_disconnected_status() {
    let (_server, _events, tcp_port) = start_server(2);

    let mut leaver = connect(tcp_port);
    recv_type(&mut leaver, PacketType::InitialMessage);
    let mut stayer = connect(tcp_port);
    recv_type(&mut stayer, PacketType::InitialMessage);
    recv_type(&mut stayer, PacketType::Status); // replay of slot 0

    drop(leaver);

    let status = recv_type(&mut stayer, PacketType::Status);
    assert_eq!(status.client(), 0);
    assert_eq!(unpack_status(&status).unwrap(), Status::Disconnected);
}

#[test]
fn udp_properties_fan_out_to_other_sessions() {
    let (_server, _events, tcp_port) = start_server(2);
    let udp_port = tcp_port + 1;

    // Slot 0 will send; slot 1 owns the local UDP receive port that the
    // server inferred from its address.
    let mut sender = connect(tcp_port);
    recv_type(&mut sender, PacketType::InitialMessage);
    let mut udp_receiver = Socket::bind_udp(tcp_port).unwrap();
    udp_receiver
        .set_read_timeout(Some(Duration::from_secs(2)))
        .unwrap();
    let mut stayer = connect(tcp_port);
    recv_type(&mut stayer, PacketType::InitialMessage);

    // Let the session's UDP send gate age past the anti-congestion
    // window before the datagram goes in.
    thread::sleep(Duration::from_millis(60));

    let mut stream = PropertyStream::new();
    stream.push(&Location::new(None, Some(9), [4.0, 5.0, 6.0]).to_property());
    let packet = Packet::new(PacketType::Properties, 0, stream.as_bytes().to_vec());
    let mut udp_sender = Socket::connect_udp("127.0.0.1", udp_port).unwrap();
    thread::sleep(Duration::from_millis(40)); // open this socket's gate too
    send_packet(&mut udp_sender, &packet).unwrap();

    let relayed = recv_type(&mut udp_receiver, PacketType::Properties);
    assert_eq!(relayed.client(), 0);
    assert_eq!(relayed.data(), stream.as_bytes());
}
