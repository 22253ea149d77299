//! The framed unit of exchange between client and server.
//!
//! Wire layout: `magic u16 || data_size u32 || type u8 || client u8 ||
//! payload`, all multi-byte fields big-endian. `client` is the owning
//! slot, or `max_clients` when the server itself originated the packet.

use crate::codec;
use crate::error::ProtocolError;

/// Framing sentinel used to resynchronise on TCP.
pub const MAGIC: u16 = 25655;
/// Bytes between the sentinel and the payload: size + type + client.
pub const HEADER_SIZE: usize = 8;
pub(crate) const HEADER_REST: usize = HEADER_SIZE - 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketType {
    Undefined = 0,
    InitialMessage = 1,
    Properties = 2,
    Status = 3,
    SocketDisconnect = 4,
    DataRequest = 5,
}

impl PacketType {
    /// Out-of-range bytes map to `Undefined`, which every dispatcher
    /// ignores.
    pub fn from_byte(b: u8) -> Self {
        match b {
            1 => PacketType::InitialMessage,
            2 => PacketType::Properties,
            3 => PacketType::Status,
            4 => PacketType::SocketDisconnect,
            5 => PacketType::DataRequest,
            _ => PacketType::Undefined,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    packet_type: PacketType,
    client: u8,
    data: Vec<u8>,
}

impl Packet {
    pub fn new(packet_type: PacketType, client: u8, data: Vec<u8>) -> Self {
        Self {
            packet_type,
            client,
            data,
        }
    }

    /// The synthetic packet a receive path yields when the peer closed.
    pub fn disconnect() -> Self {
        Self::new(PacketType::SocketDisconnect, 0, Vec::new())
    }

    pub fn packet_type(&self) -> PacketType {
        self.packet_type
    }

    pub fn client(&self) -> u8 {
        self.client
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    pub fn data_size(&self) -> u32 {
        self.data.len() as u32
    }

    pub fn packed_size(&self) -> usize {
        HEADER_SIZE + self.data.len()
    }

    /// Serialises sentinel, header and payload as one buffer.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.packed_size());
        out.extend_from_slice(&codec::pack_u16(MAGIC));
        out.extend_from_slice(&codec::pack_u32(self.data_size()));
        out.push(self.packet_type as u8);
        out.push(self.client);
        out.extend_from_slice(&self.data);
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProtocolError> {
        if bytes.len() < HEADER_SIZE {
            return Err(ProtocolError::ShortBuffer {
                needed: HEADER_SIZE,
                had: bytes.len(),
            });
        }
        if codec::unpack_u16(bytes)? != MAGIC {
            return Err(ProtocolError::BadMagic);
        }
        let data_size = codec::unpack_u32(&bytes[2..6])? as usize;
        let data = bytes
            .get(HEADER_SIZE..HEADER_SIZE + data_size)
            .ok_or(ProtocolError::ShortBuffer {
                needed: HEADER_SIZE + data_size,
                had: bytes.len(),
            })?
            .to_vec();
        Ok(Self {
            packet_type: PacketType::from_byte(bytes[6]),
            client: bytes[7],
            data,
        })
    }
}

/// Connection status of a slot, carried as a one-byte payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Status {
    New = 0,
    Active = 1,
    Disconnected = 2,
}

pub fn pack_status(client: u8, status: Status) -> Packet {
    Packet::new(PacketType::Status, client, vec![status as u8])
}

pub fn unpack_status(packet: &Packet) -> Result<Status, ProtocolError> {
    if packet.packet_type() != PacketType::Status {
        return Err(ProtocolError::WrongPacketType {
            expected: PacketType::Status,
            got: packet.packet_type(),
        });
    }
    match packet.data().first() {
        Some(0) => Ok(Status::New),
        Some(1) => Ok(Status::Active),
        Some(2) => Ok(Status::Disconnected),
        Some(&other) => Err(ProtocolError::BadStatus(other)),
        None => Err(ProtocolError::ShortBuffer { needed: 1, had: 0 }),
    }
}

/// Asks every peer to send a full snapshot back to `client`.
pub fn request_data(client: u8) -> Packet {
    Packet::new(PacketType::DataRequest, client, vec![b'0'])
}

/// The server's first word on a fresh TCP connection: how many slots the
/// table has and which one the newcomer owns. `{0, 0}` means rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InitialMessage {
    pub max_clients: u8,
    pub assigned_slot: u8,
}

impl InitialMessage {
    pub fn new(max_clients: u8, assigned_slot: u8) -> Self {
        Self {
            max_clients,
            assigned_slot,
        }
    }

    pub fn rejection() -> Self {
        Self::new(0, 0)
    }

    pub fn accepted(&self) -> bool {
        self.assigned_slot < self.max_clients
    }

    pub fn to_packet(&self) -> Packet {
        Packet::new(
            PacketType::InitialMessage,
            self.max_clients,
            vec![self.max_clients, self.assigned_slot],
        )
    }

    pub fn from_packet(packet: &Packet) -> Result<Self, ProtocolError> {
        if packet.packet_type() != PacketType::InitialMessage {
            return Err(ProtocolError::WrongPacketType {
                expected: PacketType::InitialMessage,
                got: packet.packet_type(),
            });
        }
        if packet.data().len() != 2 {
            return Err(ProtocolError::BadInitialMessage(packet.data().len()));
        }
        Ok(Self {
            max_clients: packet.data()[0],
            assigned_slot: packet.data()[1],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_layout() {
        let packet = Packet::new(PacketType::Properties, 3, vec![0xAA, 0xBB]);
        let bytes = packet.to_bytes();
        assert_eq!(bytes.len(), HEADER_SIZE + 2);
        assert_eq!(&bytes[0..2], &[0x64, 0x37]); // 25655 big-endian
        assert_eq!(&bytes[2..6], &[0, 0, 0, 2]);
        assert_eq!(bytes[6], PacketType::Properties as u8);
        assert_eq!(bytes[7], 3);
        assert_eq!(&bytes[8..], &[0xAA, 0xBB]);
    }

    #[test]
    fn round_trip_retains_payload() {
        let packet = Packet::new(PacketType::Properties, 5, vec![1, 2, 3, 4]);
        let decoded = Packet::from_bytes(&packet.to_bytes()).unwrap();
        assert_eq!(decoded, packet);
        assert_eq!(decoded.data(), &[1, 2, 3, 4]);
    }

    #[test]
    fn bad_magic_rejected() {
        let mut bytes = Packet::new(PacketType::Status, 0, vec![1]).to_bytes();
        bytes[0] = 0;
        assert_eq!(Packet::from_bytes(&bytes), Err(ProtocolError::BadMagic));
    }

    #[test]
    fn unknown_type_byte_becomes_undefined() {
        assert_eq!(PacketType::from_byte(200), PacketType::Undefined);
        assert_eq!(PacketType::from_byte(5), PacketType::DataRequest);
    }

    #[test]
    fn status_round_trip_and_range_check() {
        let packet = pack_status(2, Status::Disconnected);
        assert_eq!(packet.client(), 2);
        assert_eq!(unpack_status(&packet).unwrap(), Status::Disconnected);

        let bad = Packet::new(PacketType::Status, 0, vec![7]);
        assert_eq!(unpack_status(&bad), Err(ProtocolError::BadStatus(7)));

        let wrong = Packet::new(PacketType::Properties, 0, vec![0]);
        assert!(matches!(
            unpack_status(&wrong),
            Err(ProtocolError::WrongPacketType { .. })
        ));
    }

    #[test]
    fn initial_message_accept_and_reject() {
        let accepted = InitialMessage::new(6, 2);
        assert!(accepted.accepted());
        let round = InitialMessage::from_packet(&accepted.to_packet()).unwrap();
        assert_eq!(round, accepted);

        let rejection = InitialMessage::rejection();
        assert!(!rejection.accepted());

        let short = Packet::new(PacketType::InitialMessage, 0, vec![1]);
        assert_eq!(
            InitialMessage::from_packet(&short),
            Err(ProtocolError::BadInitialMessage(1))
        );
    }
}
