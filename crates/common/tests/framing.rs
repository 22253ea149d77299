use std::sync::atomic::{AtomicU16, Ordering};
use std::thread;
use std::time::Duration;

use friendlink::{
    receive_packet, send_packet, Listener, Packet, PacketType, Socket, ANTI_CONGESTION,
};

static PORT_COUNTER: AtomicU16 = AtomicU16::new(42000);

fn next_port() -> u16 {
    PORT_COUNTER.fetch_add(10, Ordering::SeqCst)
}

fn tcp_pair(port: u16) -> (Socket, Socket) {
    let listener = Listener::bind(port).unwrap();
    let client = Socket::connect_tcp("127.0.0.1", port).unwrap();
    let accepted = loop {
        if let Some((socket, _)) = listener.accept().unwrap() {
            break socket;
        }
        thread::sleep(Duration::from_millis(1));
    };
    (client, accepted)
}

#[test]
fn tcp_round_trips_a_framed_packet() {
    let (mut client, mut server) = tcp_pair(next_port());

    let packet = Packet::new(PacketType::Properties, 3, vec![1, 2, 3, 4, 5]);
    send_packet(&mut client, &packet).unwrap();

    let received = receive_packet(&mut server).unwrap();
    assert_eq!(received, packet);
    assert_eq!(received.data(), &[1, 2, 3, 4, 5]);
}

#[test]
fn receiver_resynchronises_past_garbage() {
    let (mut client, mut server) = tcp_pair(next_port());

    // Noise before the sentinel, including a stray first sentinel byte.
    client.send(&[0xDE, 0xAD, 0x64, 0xBE, 0xEF]).unwrap();
    let packet = Packet::new(PacketType::Status, 1, vec![0]);
    send_packet(&mut client, &packet).unwrap();

    let received = receive_packet(&mut server).unwrap();
    assert_eq!(received, packet);
}

#[test]
fn back_to_back_packets_parse_individually() {
    let (mut client, mut server) = tcp_pair(next_port());

    let first = Packet::new(PacketType::Properties, 0, vec![9; 40]);
    let second = Packet::new(PacketType::DataRequest, 1, vec![b'0']);
    let mut wire = first.to_bytes();
    wire.extend_from_slice(&second.to_bytes());
    client.send(&wire).unwrap();

    assert_eq!(receive_packet(&mut server).unwrap(), first);
    assert_eq!(receive_packet(&mut server).unwrap(), second);
}

#[test]
fn peer_close_yields_synthetic_disconnect() {
    let (client, mut server) = tcp_pair(next_port());
    drop(client);

    let received = receive_packet(&mut server).unwrap();
    assert_eq!(received.packet_type(), PacketType::SocketDisconnect);
    assert!(received.data().is_empty());
}

#[test]
fn close_mid_header_yields_disconnect_not_error() {
    let (mut client, mut server) = tcp_pair(next_port());

    // Sentinel plus half a header, then gone.
    client.send(&[0x64, 0x37, 0x00, 0x00]).unwrap();
    drop(client);

    let received = receive_packet(&mut server).unwrap();
    assert_eq!(received.packet_type(), PacketType::SocketDisconnect);
}

#[test]
fn udp_rate_gate_drops_rapid_sends() {
    let port = next_port();
    let mut receiver = Socket::bind_udp(port).unwrap();
    receiver
        .set_read_timeout(Some(Duration::from_millis(200)))
        .unwrap();
    let mut sender = Socket::connect_udp("127.0.0.1", port).unwrap();

    // Let the construction timestamp age out so the first send passes.
    thread::sleep(ANTI_CONGESTION + Duration::from_millis(10));

    for i in 0..10u8 {
        let packet = Packet::new(PacketType::Properties, 0, vec![i]);
        send_packet(&mut sender, &packet).unwrap();
        thread::sleep(Duration::from_millis(5));
    }

    let mut delivered = 0;
    while let Ok(packet) = receive_packet(&mut receiver) {
        assert_eq!(packet.packet_type(), PacketType::Properties);
        delivered += 1;
    }
    // Ten sends over ~50 ms against a 35 ms gate: at most two datagrams.
    assert!(delivered >= 1, "expected at least the first datagram");
    assert!(delivered <= 2, "gate leaked {delivered} datagrams");
}

#[test]
fn udp_sends_spaced_past_the_gate_all_deliver() {
    let port = next_port();
    let mut receiver = Socket::bind_udp(port).unwrap();
    receiver
        .set_read_timeout(Some(Duration::from_millis(200)))
        .unwrap();
    let mut sender = Socket::connect_udp("127.0.0.1", port).unwrap();

    thread::sleep(ANTI_CONGESTION + Duration::from_millis(10));

    for i in 0..2u8 {
        let packet = Packet::new(PacketType::Properties, 0, vec![i]);
        send_packet(&mut sender, &packet).unwrap();
        thread::sleep(Duration::from_millis(40));
    }

    let first = receive_packet(&mut receiver).unwrap();
    let second = receive_packet(&mut receiver).unwrap();
    assert_eq!(first.data(), &[0]);
    assert_eq!(second.data(), &[1]);
}
