//! Error types and reconnect backoff shared by every client.

pub mod error;
pub mod reconnect;
