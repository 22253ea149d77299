pub mod buffer;
pub mod codec;
pub mod error;
pub mod location;
pub mod packet;
pub mod property;
pub mod queue;
pub mod socket;

pub use error::ProtocolError;
pub use location::{
    distance_between, in_same_area, in_same_cell, in_same_world_space, time_subtract, LoadedState,
    Location, LOCATION_SIZE,
};
pub use packet::{
    pack_status, request_data, unpack_status, InitialMessage, Packet, PacketType, Status,
    HEADER_SIZE, MAGIC,
};
pub use property::{
    pack_string, unpack_string, Property, PropertySet, PropertyStream, PropertyTag,
};
pub use queue::FixedQueue;
pub use socket::{
    receive_packet, send_packet, Listener, Socket, ANTI_CONGESTION, DEFAULT_CLIENT_PORT,
    DEFAULT_SERVER_PORT,
};
