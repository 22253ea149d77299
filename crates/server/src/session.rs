//! Per-client send and receive pipelines.
//!
//! A session owns one TCP socket and one UDP socket, both connected to
//! its client, and two arrays of fixed queues indexed by *source* slot,
//! drained only by this session's send loop, so a slow backlog from one
//! source never stalls the others. Unreliable columns are fed by the
//! registry's single UDP thread and stay pure SPSC. Reliable columns
//! take pushes from more than one thread for the same source (a
//! source's receive loop, plus teardown and join-protocol broadcasts
//! from whichever thread observed the event), so their producer side is
//! serialised by a mutex, like the client's reliable queue.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use friendlink::{
    pack_status, receive_packet, request_data, send_packet, FixedQueue, InitialMessage, Packet,
    PacketType, Socket, Status,
};

use crate::events::ServerEvent;
use crate::registry::Registry;

pub struct Session {
    slot: u8,
    connected: AtomicBool,
    /// Source-indexed columns; the extra trailing column belongs to the
    /// server-origin id (`max_clients`). Reliable pushes for one source
    /// can come from several threads, hence the mutex per column.
    reliable: Vec<Mutex<FixedQueue>>,
    unreliable: Vec<FixedQueue>,
    registry: Weak<Registry>,
    events: Sender<ServerEvent>,
    /// Shares the TCP socket so `disconnect` can unblock a receive in
    /// progress.
    tcp_ctl: Socket,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Session {
    /// Runs the join protocol on the fresh TCP socket, then starts the
    /// send and receive loops.
    pub fn spawn(
        registry: &Arc<Registry>,
        slot: u8,
        max_clients: u8,
        mut tcp: Socket,
        udp: Socket,
        events: Sender<ServerEvent>,
    ) -> io::Result<Arc<Session>> {
        send_packet(&mut tcp, &InitialMessage::new(max_clients, slot).to_packet())?;
        registry.send_reliable_to_all(&pack_status(slot, Status::New));
        registry.replay_active_to(&mut tcp)?;
        registry.send_reliable_to_all(&request_data(slot));

        let columns = max_clients as usize + 1;
        let session = Arc::new(Session {
            slot,
            connected: AtomicBool::new(true),
            reliable: (0..columns).map(|_| Mutex::new(FixedQueue::new())).collect(),
            unreliable: (0..columns).map(|_| FixedQueue::new()).collect(),
            registry: Arc::downgrade(registry),
            events,
            tcp_ctl: tcp.try_clone()?,
            handles: Mutex::new(Vec::new()),
        });

        let tcp_recv = tcp.try_clone()?;
        let recv_session = Arc::clone(&session);
        let recv = thread::Builder::new()
            .name(format!("session-{slot}-recv"))
            .spawn(move || recv_session.receive_loop(tcp_recv))?;
        let send_session = Arc::clone(&session);
        let send = thread::Builder::new()
            .name(format!("session-{slot}-send"))
            .spawn(move || send_session.send_loop(tcp, udp))?;
        session.handles.lock().unwrap().extend([recv, send]);
        Ok(session)
    }

    pub fn slot(&self) -> u8 {
        self.slot
    }

    pub fn active(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Enqueues onto this session's reliable column for the packet's
    /// source. Packets this session itself originated are skipped.
    pub fn queue_reliable(&self, packet: &Packet) {
        if let Some(source) = self.source_column(packet, self.reliable.len()) {
            self.reliable[source].lock().unwrap().push(packet.to_bytes());
        }
    }

    /// Single producer: only the registry's UDP thread calls this.
    pub fn queue_unreliable(&self, packet: &Packet) {
        if let Some(source) = self.source_column(packet, self.unreliable.len()) {
            self.unreliable[source].push(packet.to_bytes());
        }
    }

    fn source_column(&self, packet: &Packet, columns: usize) -> Option<usize> {
        let source = packet.client() as usize;
        if !self.active() || packet.client() == self.slot || source >= columns {
            return None;
        }
        Some(source)
    }

    /// Flags the session as gone and tells every peer. Safe to call more
    /// than once; only the first call broadcasts.
    pub fn disconnect(&self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            if let Some(registry) = self.registry.upgrade() {
                registry.send_reliable_to_all(&pack_status(self.slot, Status::Disconnected));
            }
            let _ = self.events.send(ServerEvent::ClientLeft { slot: self.slot });
            self.tcp_ctl.shutdown_both();
        }
    }

    /// Awaits both loops. Never called from the loops themselves.
    pub fn join(&self) {
        let handles: Vec<_> = self.handles.lock().unwrap().drain(..).collect();
        for handle in handles {
            let _ = handle.join();
        }
    }

    /// Walks both queue arrays in slot order, sending at most one
    /// reliable and one unreliable packet per source per turn.
    fn send_loop(&self, mut tcp: Socket, mut udp: Socket) {
        while self.active() {
            let mut something_sent = false;
            let result: io::Result<()> = (|| {
                for source in 0..self.reliable.len() {
                    if let Some(bytes) = self.reliable[source].lock().unwrap().pop() {
                        tcp.send(&bytes)?;
                        something_sent = true;
                    }
                    if let Some(bytes) = self.unreliable[source].pop() {
                        udp.send(&bytes)?;
                        something_sent = true;
                    }
                }
                Ok(())
            })();
            if let Err(e) = result {
                log::error!("session {}: send failed: {e}", self.slot);
                let _ = self
                    .events
                    .send(ServerEvent::Error(format!("send to {}: {e}", self.slot)));
                self.disconnect();
                break;
            }
            if something_sent {
                thread::sleep(Duration::from_millis(1));
            }
        }
        tcp.shutdown_send();
    }

    /// Reads the TCP socket only; UDP arrives on the registry's shared
    /// datagram socket.
    fn receive_loop(&self, mut tcp: Socket) {
        while self.active() {
            match receive_packet(&mut tcp) {
                Ok(packet) => match packet.packet_type() {
                    PacketType::Properties | PacketType::DataRequest => {
                        if let Some(registry) = self.registry.upgrade() {
                            registry.send_reliable_to_all(&packet);
                        }
                    }
                    PacketType::SocketDisconnect => {
                        log::info!("session {}: peer closed", self.slot);
                        self.disconnect();
                        return;
                    }
                    _ => {}
                },
                Err(e) => {
                    log::error!("session {}: receive failed: {e}", self.slot);
                    let _ = self
                        .events
                        .send(ServerEvent::Error(format!("recv from {}: {e}", self.slot)));
                    self.disconnect();
                    return;
                }
            }
        }
    }
}
