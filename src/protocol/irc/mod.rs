//! IRC wire protocol.

pub mod codec;
pub mod message;

pub use codec::IrcLineCodec;
pub use message::IrcMessage;
