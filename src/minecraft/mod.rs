//! Minecraft server side of the relay: RCON commands plus UDP log events.

pub mod classify;
pub mod client;
pub mod colors;

pub use client::MinecraftClient;

/// Which server output feeds a relay rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RelayStream {
    /// Log events rewritten by the classifier chain.
    #[default]
    Events,
    /// Every decoded log event, unfiltered and without text.
    Raw,
    /// Command replies and the connected notification only.
    Rcon,
}

impl RelayStream {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "events" => Some(RelayStream::Events),
            "raw" => Some(RelayStream::Raw),
            "rcon" => Some(RelayStream::Rcon),
            _ => None,
        }
    }
}
