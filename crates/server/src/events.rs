use std::net::SocketAddr;

use friendlink::Packet;

/// Hooks the relay raises for the dashboard (and the headless log).
#[derive(Debug, Clone)]
pub enum ServerEvent {
    ClientJoined { slot: u8, addr: SocketAddr },
    ClientLeft { slot: u8 },
    /// A packet accepted into the broadcast fan-out, in arrival order.
    Relayed(Packet),
    Error(String),
}
