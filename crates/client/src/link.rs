//! The client's link to the relay server.
//!
//! One TCP socket carries the reliable channel, one UDP socket bound to
//! the local TCP port number receives unreliable traffic, and one
//! connected UDP socket sends it. Three background loops move the data;
//! all inbound packets funnel into a [`ReceiveHandler`].

use std::io;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use friendlink::{
    receive_packet, request_data, FixedQueue, InitialMessage, Packet, PacketType, PropertyStream,
    Socket,
};

const UDP_WAKE_INTERVAL: Duration = Duration::from_millis(250);

/// Callbacks for everything the link receives. The packet callback runs
/// on both the TCP and the UDP receive threads.
pub trait ReceiveHandler: Send + Sync + 'static {
    fn initial_message(&self, message: InitialMessage);
    fn packet(&self, packet: Packet);
    fn disconnection(&self);
    fn error(&self, message: &str);
}

struct LinkShared {
    connected: AtomicBool,
    slot: AtomicU8,
    /// Reliable writers come from several client threads, hence the
    /// mutex on top of the queue.
    reliable_out: Mutex<FixedQueue>,
    unreliable_out: FixedQueue,
    tcp_ctl: Socket,
}

impl LinkShared {
    fn disconnect(&self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            self.tcp_ctl.shutdown_both();
        }
    }
}

/// Cheap cloneable sending half of a [`ServerLink`]. Outbound packets
/// carry the slot learned during the handshake.
#[derive(Clone)]
pub struct LinkSender {
    shared: Arc<LinkShared>,
}

impl LinkSender {
    pub fn slot(&self) -> u8 {
        self.shared.slot.load(Ordering::SeqCst)
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    pub fn send_reliable(&self, properties: &PropertyStream) {
        let packet = Packet::new(
            PacketType::Properties,
            self.slot(),
            properties.as_bytes().to_vec(),
        );
        self.send_reliable_packet(&packet);
    }

    pub fn send_reliable_packet(&self, packet: &Packet) {
        let queue = self.shared.reliable_out.lock().unwrap();
        queue.push(packet.to_bytes());
    }

    pub fn send_unreliable(&self, properties: &PropertyStream) {
        let packet = Packet::new(
            PacketType::Properties,
            self.slot(),
            properties.as_bytes().to_vec(),
        );
        self.shared.unreliable_out.push(packet.to_bytes());
    }

    /// Asks every peer for a full snapshot.
    pub fn send_data_request(&self) {
        self.send_reliable_packet(&request_data(self.slot()));
    }
}

pub struct ServerLink {
    shared: Arc<LinkShared>,
    handler: Arc<dyn ReceiveHandler>,
    /// Held until the loops start, then moved onto the receive thread.
    tcp: Option<Socket>,
    udp_recv: Option<Socket>,
    udp_send: Option<Socket>,
    threads: Vec<JoinHandle<()>>,
}

impl ServerLink {
    /// Connects TCP to `host:tcp_port`, binds the local UDP receiver to
    /// `tcp_port` and connects the UDP sender to `host:udp_port`.
    pub fn connect(
        host: &str,
        tcp_port: u16,
        udp_port: u16,
        handler: Arc<dyn ReceiveHandler>,
    ) -> io::Result<Self> {
        let tcp = Socket::connect_tcp(host, tcp_port)?;
        let udp_recv = Socket::bind_udp(tcp_port)?;
        udp_recv.set_read_timeout(Some(UDP_WAKE_INTERVAL))?;
        let udp_send = Socket::connect_udp(host, udp_port)?;

        let shared = Arc::new(LinkShared {
            connected: AtomicBool::new(true),
            slot: AtomicU8::new(0),
            reliable_out: Mutex::new(FixedQueue::new()),
            unreliable_out: FixedQueue::new(),
            tcp_ctl: tcp.try_clone()?,
        });

        Ok(Self {
            shared,
            handler,
            tcp: Some(tcp),
            udp_recv: Some(udp_recv),
            udp_send: Some(udp_send),
            threads: Vec::new(),
        })
    }

    pub fn sender(&self) -> LinkSender {
        LinkSender {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn slot(&self) -> u8 {
        self.shared.slot.load(Ordering::SeqCst)
    }

    pub fn is_active(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    pub fn disconnect(&self) {
        self.shared.disconnect();
    }

    /// Blocks on the TCP socket until the server's first word arrives.
    /// A slot at or past `max_clients` means the table was full.
    pub fn receive_initial_message(&mut self) -> io::Result<InitialMessage> {
        let tcp = self
            .tcp
            .as_mut()
            .expect("initial message already received");
        while self.shared.connected.load(Ordering::SeqCst) {
            let packet = receive_packet(tcp)?;
            match packet.packet_type() {
                PacketType::InitialMessage => {
                    let message = InitialMessage::from_packet(&packet)
                        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
                    self.handler.initial_message(message);
                    self.shared
                        .slot
                        .store(message.assigned_slot, Ordering::SeqCst);
                    if !message.accepted() {
                        self.handler.error("Server is full.");
                        log::warn!("server is full");
                        self.shared.disconnect();
                    }
                    return Ok(message);
                }
                PacketType::SocketDisconnect => {
                    self.shared.disconnect();
                    return Ok(InitialMessage::rejection());
                }
                _ => {}
            }
        }
        Ok(InitialMessage::rejection())
    }

    /// Starts the send, TCP-receive and UDP-receive loops.
    pub fn start_data_transfer(&mut self) -> io::Result<()> {
        let tcp = self.tcp.take().expect("data transfer already started");
        let tcp_send = tcp.try_clone()?;
        let udp_recv = self.udp_recv.take().expect("udp receiver gone");
        let udp_send = self.udp_send.take().expect("udp sender gone");

        let shared = Arc::clone(&self.shared);
        let handler = Arc::clone(&self.handler);
        self.threads.push(
            thread::Builder::new()
                .name("link-send".into())
                .spawn(move || send_loop(shared, handler, tcp_send, udp_send))?,
        );

        let shared = Arc::clone(&self.shared);
        let handler = Arc::clone(&self.handler);
        self.threads.push(
            thread::Builder::new()
                .name("link-recv-tcp".into())
                .spawn(move || tcp_receive_loop(shared, handler, tcp))?,
        );

        let shared = Arc::clone(&self.shared);
        let handler = Arc::clone(&self.handler);
        self.threads.push(
            thread::Builder::new()
                .name("link-recv-udp".into())
                .spawn(move || udp_receive_loop(shared, handler, udp_recv))?,
        );
        Ok(())
    }
}

impl Drop for ServerLink {
    fn drop(&mut self) {
        self.shared.disconnect();
        for handle in self.threads.drain(..) {
            let _ = handle.join();
        }
    }
}

/// Pops one packet from each queue per turn; sleeps a tick only when
/// both were empty.
fn send_loop(
    shared: Arc<LinkShared>,
    handler: Arc<dyn ReceiveHandler>,
    mut tcp: Socket,
    mut udp: Socket,
) {
    while shared.connected.load(Ordering::SeqCst) {
        let reliable = shared.reliable_out.lock().unwrap().pop();
        let unreliable = shared.unreliable_out.pop();
        let idle = reliable.is_none() && unreliable.is_none();

        let result: io::Result<()> = (|| {
            if let Some(bytes) = reliable {
                tcp.send(&bytes)?;
            }
            if let Some(bytes) = unreliable {
                udp.send(&bytes)?;
            }
            Ok(())
        })();
        if let Err(e) = result {
            log::error!("link send failed: {e}");
            handler.error(&e.to_string());
            shared.disconnect();
            break;
        }
        if idle {
            thread::sleep(Duration::from_millis(1));
        }
    }
    tcp.shutdown_send();
}

fn tcp_receive_loop(shared: Arc<LinkShared>, handler: Arc<dyn ReceiveHandler>, mut tcp: Socket) {
    while shared.connected.load(Ordering::SeqCst) {
        match receive_packet(&mut tcp) {
            Ok(packet) => {
                if packet.packet_type() == PacketType::SocketDisconnect {
                    break;
                }
                handler.packet(packet);
            }
            Err(e) => {
                log::error!("tcp receive failed: {e}");
                handler.error(&e.to_string());
                break;
            }
        }
    }
    shared.disconnect();
    handler.disconnection();
}

/// Identical to the TCP loop except that timeouts while the socket is
/// being torn down pass silently.
fn udp_receive_loop(shared: Arc<LinkShared>, handler: Arc<dyn ReceiveHandler>, mut udp: Socket) {
    while shared.connected.load(Ordering::SeqCst) {
        match receive_packet(&mut udp) {
            Ok(packet) => {
                if packet.packet_type() == PacketType::SocketDisconnect {
                    break;
                }
                handler.packet(packet);
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock || e.kind() == io::ErrorKind::TimedOut => {
            }
            Err(e) => {
                log::error!("udp receive failed: {e}");
                handler.error(&e.to_string());
                break;
            }
        }
    }
    shared.disconnect();
}
