//! Over-the-air framing: the fixed beacon record and the echo byte pipe.

pub mod beacon;
pub mod echo;

pub use beacon::{build_beacon, BeaconPacket, RadioState};
pub use echo::{compose_echo, EchoFrame};

/// Errors raised while building or parsing frames
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolError {
    /// Beacon text does not fit the fixed field with its terminator
    PayloadTooLong { len: usize },
    /// Echo would exceed the transport's maximum frame length
    FrameTooLarge { len: usize },
    /// Buffer is not exactly one beacon long
    WrongLength { len: usize },
}
