//! Relay bus: message model, filters and routing between endpoints.

pub mod bus;
pub mod filter;
pub mod formatter;
pub mod message;

pub use bus::{RelayBus, RelayCallback};
pub use filter::{FilterOutcome, FilterRegistry, RelayFilter};
pub use message::{EndpointKind, RelayExtra, RelayMessage, RelaySource, RelayTarget};
