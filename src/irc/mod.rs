//! IRC side of the relay.

pub mod client;

pub use client::IrcClient;
