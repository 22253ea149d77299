//! Slot table and broadcast fan-out.
//!
//! The slot index doubles as the client identifier in every packet; the
//! server itself signs packets with `max_clients`. Broadcasts partition
//! each destination session's queue arrays by source slot, which keeps
//! every queue at exactly one producer and one consumer.

use std::io;
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex};

use friendlink::{pack_status, send_packet, Packet, Socket, Status};

use crate::events::ServerEvent;
use crate::session::Session;

/// Result of seating a freshly accepted connection.
pub enum PlaceOutcome {
    Seated(Arc<Session>),
    /// Every slot is taken; the TCP socket comes back for the rejection
    /// message.
    Full(Socket),
}

pub struct Registry {
    max_clients: u8,
    slots: Mutex<Vec<Option<Arc<Session>>>>,
    events: Sender<ServerEvent>,
}

impl Registry {
    pub fn new(max_clients: u8, events: Sender<ServerEvent>) -> Self {
        Self {
            max_clients,
            slots: Mutex::new((0..max_clients).map(|_| None).collect()),
            events,
        }
    }

    pub fn max_clients(&self) -> u8 {
        self.max_clients
    }

    /// The packet's own `client` byte names the source; every *other*
    /// active session gets it on the reliable channel.
    pub fn send_reliable_to_all(&self, packet: &Packet) {
        for session in self.snapshot() {
            session.queue_reliable(packet);
        }
        let _ = self.events.send(ServerEvent::Relayed(packet.clone()));
    }

    /// Unreliable fan-out, additionally gated on the source session
    /// still being active.
    pub fn send_to_all(&self, packet: &Packet) {
        if !self.slot_active(packet.client()) {
            return;
        }
        for session in self.snapshot() {
            session.queue_unreliable(packet);
        }
        let _ = self.events.send(ServerEvent::Relayed(packet.clone()));
    }

    /// Replays `Status::New` for every active slot down a newcomer's TCP
    /// socket so it can populate its peer table.
    pub fn replay_active_to(&self, socket: &mut Socket) -> io::Result<()> {
        let active: Vec<u8> = self.snapshot().iter().map(|s| s.slot()).collect();
        for slot in active {
            send_packet(socket, &pack_status(slot, Status::New))?;
        }
        Ok(())
    }

    /// Seats a newcomer in the first free slot. Hands the TCP socket
    /// back when the table is full so the caller can send the rejection.
    pub fn place(self: &Arc<Self>, tcp: Socket, udp: Socket) -> io::Result<PlaceOutcome> {
        let slot = {
            let slots = self.slots.lock().unwrap();
            slots
                .iter()
                .position(|s| s.as_ref().is_none_or(|session| !session.active()))
        };
        let Some(slot) = slot else {
            return Ok(PlaceOutcome::Full(tcp));
        };

        // Evict the previous occupant and wait for both of its loops to
        // stop before anything is broadcast under the reused slot id; a
        // lagging relay from the old receive thread must not feed the
        // same source columns as the newcomer's join protocol.
        let previous = self.slots.lock().unwrap()[slot].take();
        if let Some(old) = previous {
            old.disconnect();
            old.join();
        }

        // The join protocol inside `spawn` broadcasts through this
        // registry, so the table lock must not be held across it. Only
        // the accept thread seats sessions, so the slot cannot be taken
        // out from under us.
        let session = Session::spawn(
            self,
            slot as u8,
            self.max_clients,
            tcp,
            udp,
            self.events.clone(),
        )?;
        self.slots.lock().unwrap()[slot] = Some(Arc::clone(&session));
        Ok(PlaceOutcome::Seated(session))
    }

    pub fn slot_active(&self, slot: u8) -> bool {
        let slots = self.slots.lock().unwrap();
        slots
            .get(slot as usize)
            .and_then(|s| s.as_ref())
            .is_some_and(|session| session.active())
    }

    pub fn active_count(&self) -> usize {
        self.snapshot().len()
    }

    /// Disconnects and joins every session. Called once at teardown.
    pub fn shutdown(&self) {
        let sessions: Vec<Arc<Session>> = {
            let mut slots = self.slots.lock().unwrap();
            slots.iter_mut().filter_map(Option::take).collect()
        };
        for session in &sessions {
            session.disconnect();
        }
        for session in &sessions {
            session.join();
        }
    }

    fn snapshot(&self) -> Vec<Arc<Session>> {
        let slots = self.slots.lock().unwrap();
        slots
            .iter()
            .flatten()
            .filter(|session| session.active())
            .map(Arc::clone)
            .collect()
    }
}
