use thiserror::Error;

/// Errors raised while decoding wire data. A protocol error drops the
/// offending packet or stream; the link itself stays up.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("framing sentinel did not match")]
    BadMagic,

    #[error("unknown property tag {0}")]
    UnknownPropertyTag(u8),

    #[error("property stream truncated mid-property")]
    Truncated,

    #[error("buffer too short: needed {needed} bytes, had {had}")]
    ShortBuffer { needed: usize, had: usize },

    #[error("expected packet type {expected:?}, got {got:?}")]
    WrongPacketType {
        expected: crate::packet::PacketType,
        got: crate::packet::PacketType,
    },

    #[error("status byte {0} out of range")]
    BadStatus(u8),

    #[error("initial message payload was {0} bytes, expected 2")]
    BadInitialMessage(usize),

    #[error("location payload was {0} bytes, expected 25")]
    BadLocationSize(usize),

    #[error("location flags {0:#04x} have reserved bits set")]
    BadLocationFlags(u8),

    #[error("loaded state payload was {0} bytes, expected 32")]
    BadLoadedStateSize(usize),

    #[error("receive staging buffer overflowed")]
    StagingOverflow,
}
