//! The host-facing session: link lifecycle, remote player table and the
//! local data producer.
//!
//! This replaces the plugin's process-wide connection handle with an
//! owned object: the host constructs it on connect, drives load
//! transitions through `pre_load_game`/`post_load_game`, and drops it to
//! disconnect.

use std::io;
use std::sync::{Arc, Mutex, OnceLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use thiserror::Error;

use friendlink::{unpack_status, InitialMessage, Packet, PacketType, PropertyStream, PropertyTag, Status};

use crate::driver::{ProxyRef, WorldDriver};
use crate::link::{LinkSender, ReceiveHandler, ServerLink};
use crate::player::{Avatar, LocalPlayer, RemotePlayer};

/// The host engine dislikes being sampled too often; the producer loop
/// paces itself to this interval.
const PLAYER_DATA_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("server is full")]
    ServerFull,

    #[error(transparent)]
    Io(#[from] io::Error),
}

#[derive(Default)]
struct ReceiverState {
    max_players: u8,
    my_slot: u8,
    players: Vec<Option<Avatar>>,
}

/// Routes inbound packets. Both receive threads call in here, so the
/// whole dispatch sits under one mutex.
struct SessionReceiver {
    driver: Arc<dyn WorldDriver>,
    sender: OnceLock<LinkSender>,
    state: Mutex<ReceiverState>,
}

impl SessionReceiver {
    fn new(driver: Arc<dyn WorldDriver>) -> Self {
        Self {
            driver,
            sender: OnceLock::new(),
            state: Mutex::new(ReceiverState::default()),
        }
    }

    /// The full snapshot sent back whenever a peer asks for data.
    fn send_requested_update(&self) {
        let Some(sender) = self.sender.get() else {
            return;
        };
        let local = LocalPlayer::new(Arc::clone(&self.driver));
        let snapshot = local.properties(&[
            PropertyTag::Name,
            PropertyTag::WorldSpaceName,
            PropertyTag::CellName,
            PropertyTag::Location,
        ]);
        sender.send_reliable(&snapshot);
    }
}

impl ReceiveHandler for SessionReceiver {
    fn initial_message(&self, message: InitialMessage) {
        let mut state = self.state.lock().unwrap();
        state.max_players = message.max_clients;
        state.my_slot = message.assigned_slot;
        state.players = (0..message.max_clients).map(|_| None).collect();
    }

    fn packet(&self, packet: Packet) {
        let mut state = self.state.lock().unwrap();
        match packet.packet_type() {
            PacketType::Properties => {
                if packet.client() == state.my_slot {
                    return;
                }
                let slot = packet.client() as usize;
                let Some(entry) = state.players.get_mut(slot) else {
                    log::warn!("properties for out-of-range slot {slot}");
                    return;
                };
                let player = entry.get_or_insert_with(|| {
                    Avatar::Remote(RemotePlayer::new(Arc::clone(&self.driver)))
                });
                player.apply_stream(&PropertyStream::from_bytes(packet.into_data()));
            }
            PacketType::DataRequest => self.send_requested_update(),
            PacketType::Status => match unpack_status(&packet) {
                Ok(Status::Disconnected) => {
                    let slot = packet.client() as usize;
                    if let Some(entry) = state.players.get_mut(slot) {
                        entry.take();
                    }
                }
                Ok(_) => {}
                Err(e) => log::warn!("dropping malformed status packet: {e}"),
            },
            _ => {}
        }
    }

    fn disconnection(&self) {
        log::info!("server link closed");
        self.driver.disconnected();
    }

    fn error(&self, message: &str) {
        log::error!("{message}");
    }
}

pub struct HostSession {
    link: ServerLink,
    receiver: Arc<SessionReceiver>,
    driver: Arc<dyn WorldDriver>,
    producer: Option<JoinHandle<()>>,
}

impl HostSession {
    /// Connects and runs the blocking handshake. Fails with
    /// [`SessionError::ServerFull`] when the slot table had no room.
    pub fn connect(
        host: &str,
        tcp_port: u16,
        udp_port: u16,
        driver: Arc<dyn WorldDriver>,
    ) -> Result<Self, SessionError> {
        let receiver = Arc::new(SessionReceiver::new(Arc::clone(&driver)));
        let mut link = ServerLink::connect(
            host,
            tcp_port,
            udp_port,
            Arc::clone(&receiver) as Arc<dyn ReceiveHandler>,
        )?;
        let message = link.receive_initial_message()?;
        if !message.accepted() {
            return Err(SessionError::ServerFull);
        }
        receiver
            .sender
            .set(link.sender())
            .unwrap_or_else(|_| unreachable!("sender set once"));

        Ok(Self {
            link,
            receiver,
            driver,
            producer: None,
        })
    }

    pub fn my_slot(&self) -> u8 {
        self.receiver.state.lock().unwrap().my_slot
    }

    pub fn max_players(&self) -> u8 {
        self.receiver.state.lock().unwrap().max_players
    }

    pub fn is_active(&self) -> bool {
        self.link.is_active()
    }

    /// Starts the link loops and the local data producer.
    pub fn start_data_transfer(&mut self) -> io::Result<()> {
        let sender = self.link.sender();
        let driver = Arc::clone(&self.driver);
        self.producer = Some(
            thread::Builder::new()
                .name("player-data".into())
                .spawn(move || producer_loop(sender, driver))?,
        );
        self.link.start_data_transfer()
    }

    /// Whether a host object is one of the remote avatars.
    pub fn is_player_object(&self, proxy: ProxyRef) -> bool {
        let state = self.receiver.state.lock().unwrap();
        state
            .players
            .iter()
            .flatten()
            .any(|player| player.matches(proxy))
    }

    /// Relays the host's animation-finished signal to the matching
    /// translator.
    pub fn mark_translation_complete(&self, proxy: ProxyRef) {
        let state = self.receiver.state.lock().unwrap();
        for player in state.players.iter().flatten() {
            if player.matches(proxy) {
                player.mark_translation_complete();
            }
        }
    }

    /// Drains in-flight motion before the host tears its world down.
    pub fn pre_load_game(&self) {
        let state = self.receiver.state.lock().unwrap();
        for player in state.players.iter().flatten() {
            player.stop_translating();
        }
    }

    /// Resumes motion once the host world is back.
    pub fn post_load_game(&self) {
        let state = self.receiver.state.lock().unwrap();
        for player in state.players.iter().flatten() {
            player.start_translating();
        }
    }

    pub fn disconnect(&self) {
        self.link.disconnect();
    }
}

impl Drop for HostSession {
    fn drop(&mut self) {
        self.link.disconnect();
        if let Some(producer) = self.producer.take() {
            let _ = producer.join();
        }
    }
}

/// Two reliable introductions and a prompt for everyone else's data,
/// then a steady unreliable position feed.
fn producer_loop(sender: LinkSender, driver: Arc<dyn WorldDriver>) {
    let local = LocalPlayer::new(driver);

    let introduction = local.properties(&[PropertyTag::Name, PropertyTag::Location]);
    sender.send_reliable(&introduction);
    sender.send_reliable(&introduction);
    sender.send_data_request();

    while sender.is_connected() {
        let update = local.properties(&[
            PropertyTag::WorldSpaceName,
            PropertyTag::CellName,
            PropertyTag::Location,
        ]);
        sender.send_unreliable(&update);
        thread::sleep(PLAYER_DATA_INTERVAL);
    }
}
