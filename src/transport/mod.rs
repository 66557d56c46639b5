//! Transport layer: wire frames, timing, sockets.

pub mod frame;
pub mod socket;
pub mod timing;

pub use frame::{Chunk, Datagram, HandshakePacket, PayloadHeader, Reader, Writer, HANDSHAKE_ID};
pub use socket::{SendQueue, StrandSocket};
pub use timing::{PingEstimator, TimestampClock};
