//! RCON remote console protocol.

pub mod codec;
pub mod packet;

pub use codec::RconCodec;
pub use packet::{packet_type, RconPacket, AUTH_FAILED_ID};
