//! The relay server: a TCP accept loop that seats sessions and a single
//! UDP socket that fans client datagrams out to everyone else.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use friendlink::{receive_packet, send_packet, InitialMessage, Listener, PacketType, Socket};

use crate::config::ServerConfig;
use crate::events::ServerEvent;
use crate::registry::{PlaceOutcome, Registry};

const POLL_INTERVAL: Duration = Duration::from_millis(1);
const UDP_WAKE_INTERVAL: Duration = Duration::from_millis(250);

pub struct RelayServer {
    registry: Arc<Registry>,
    running: Arc<AtomicBool>,
    local_addr: SocketAddr,
    threads: Vec<JoinHandle<()>>,
}

impl RelayServer {
    pub fn start(config: &ServerConfig, events: Sender<ServerEvent>) -> io::Result<Self> {
        let listener = Listener::bind(config.tcp_port)?;
        let local_addr = listener.local_addr()?;
        let udp = Socket::bind_udp(config.udp_port)?;
        udp.set_read_timeout(Some(UDP_WAKE_INTERVAL))?;

        log::info!(
            "{} listening on tcp {} / udp {} ({} slots)",
            config.name,
            config.tcp_port,
            config.udp_port,
            config.max_clients
        );

        let registry = Arc::new(Registry::new(config.max_clients, events.clone()));
        let running = Arc::new(AtomicBool::new(true));

        let mut threads = Vec::new();
        {
            let registry = Arc::clone(&registry);
            let running = Arc::clone(&running);
            let events = events.clone();
            let client_udp_port = config.tcp_port;
            threads.push(thread::Builder::new().name("tcp-accept".into()).spawn(
                move || accept_loop(listener, registry, running, events, client_udp_port),
            )?);
        }
        {
            let registry = Arc::clone(&registry);
            let running = Arc::clone(&running);
            threads.push(
                thread::Builder::new()
                    .name("udp-recv".into())
                    .spawn(move || udp_loop(udp, registry, running, events))?,
            );
        }

        Ok(Self {
            registry,
            running,
            local_addr,
            threads,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn running(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    pub fn active_clients(&self) -> usize {
        self.registry.active_count()
    }

    pub fn shutdown(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if self.threads.is_empty() {
            return;
        }
        self.registry.shutdown();
        for handle in self.threads.drain(..) {
            let _ = handle.join();
        }
        log::info!("relay server stopped");
    }
}

impl Drop for RelayServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Accepts TCP connections and pairs each with a UDP socket aimed at the
/// peer's address on the configured client UDP port.
fn accept_loop(
    listener: Listener,
    registry: Arc<Registry>,
    running: Arc<AtomicBool>,
    events: Sender<ServerEvent>,
    client_udp_port: u16,
) {
    while running.load(Ordering::SeqCst) {
        let (tcp, addr) = match listener.accept() {
            Ok(Some(accepted)) => accepted,
            Ok(None) => {
                thread::sleep(POLL_INTERVAL);
                continue;
            }
            Err(e) => {
                log::error!("accept failed: {e}");
                let _ = events.send(ServerEvent::Error(format!("accept: {e}")));
                continue;
            }
        };

        if let Err(e) = seat_client(&registry, tcp, addr, client_udp_port, &events) {
            log::error!("client {addr} setup failed: {e}");
            let _ = events.send(ServerEvent::Error(format!("setup {addr}: {e}")));
        }
    }
}

fn seat_client(
    registry: &Arc<Registry>,
    tcp: Socket,
    addr: SocketAddr,
    client_udp_port: u16,
    events: &Sender<ServerEvent>,
) -> io::Result<()> {
    let udp_peer = SocketAddr::new(addr.ip(), client_udp_port);
    let udp = Socket::connect_udp_addr(udp_peer)?;

    match registry.place(tcp, udp)? {
        PlaceOutcome::Seated(session) => {
            log::info!("connected: {addr} in slot {}", session.slot());
            let _ = events.send(ServerEvent::ClientJoined {
                slot: session.slot(),
                addr,
            });
        }
        PlaceOutcome::Full(mut tcp) => {
            log::warn!("rejecting {addr}: server full");
            send_packet(&mut tcp, &InitialMessage::rejection().to_packet())?;
        }
    }
    Ok(())
}

/// One datagram socket serves every client; `Properties` packets fan out
/// to all other sessions' unreliable queues and everything else is
/// ignored.
fn udp_loop(
    mut udp: Socket,
    registry: Arc<Registry>,
    running: Arc<AtomicBool>,
    events: Sender<ServerEvent>,
) {
    while running.load(Ordering::SeqCst) {
        match receive_packet(&mut udp) {
            Ok(packet) => {
                if packet.packet_type() == PacketType::Properties {
                    registry.send_to_all(&packet);
                }
            }
            Err(e)
                if e.kind() == io::ErrorKind::WouldBlock
                    || e.kind() == io::ErrorKind::TimedOut =>
            {
                continue;
            }
            Err(e) => {
                log::error!("udp receive failed: {e}");
                let _ = events.send(ServerEvent::Error(format!("udp recv: {e}")));
            }
        }
    }
}
