//! Wire protocols: IRC lines, RCON frames and UDP log datagrams.

pub mod irc;
pub mod rcon;
pub mod udplog;
