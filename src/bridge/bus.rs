//! Publish/subscribe registry connecting relay endpoints.

use std::sync::Arc;

use tracing::{debug, trace, warn};

use crate::bridge::filter::FilterOutcome;
use crate::bridge::message::{EndpointKind, RelayExtra, RelayMessage, RelaySource, RelayTarget};

/// Callback invoked for every message delivered to a binding.
pub type RelayCallback = Arc<dyn Fn(&RelayMessage) + Send + Sync>;

struct RelayBinding {
    kind: EndpointKind,
    name: String,
    callback: RelayCallback,
}

/// Registry of `(kind, name) -> callback` bindings.
///
/// Only `bind`/`unbind` mutate it; `call` is read-only.
#[derive(Default)]
pub struct RelayBus {
    bindings: Vec<RelayBinding>,
}

impl RelayBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a binding. Returns false (and changes nothing) if the
    /// endpoint identity is already bound.
    pub fn bind(&mut self, kind: EndpointKind, name: &str, callback: RelayCallback) -> bool {
        if self.is_bound(kind, name) {
            warn!(kind = %kind, name, "Relay binding already registered");
            return false;
        }
        debug!(kind = %kind, name, "Relay binding registered");
        self.bindings.push(RelayBinding {
            kind,
            name: name.to_string(),
            callback,
        });
        true
    }

    /// Remove the binding registered with this exact callback.
    pub fn unbind(&mut self, kind: EndpointKind, name: &str, callback: &RelayCallback) -> bool {
        let before = self.bindings.len();
        self.bindings.retain(|binding| {
            !(binding.kind == kind && binding.name == name && Arc::ptr_eq(&binding.callback, callback))
        });
        let removed = self.bindings.len() != before;
        if removed {
            debug!(kind = %kind, name, "Relay binding removed");
        }
        removed
    }

    pub fn is_bound(&self, kind: EndpointKind, name: &str) -> bool {
        self.bindings
            .iter()
            .any(|binding| binding.kind == kind && binding.name == name)
    }

    /// Run the target's filter chain and deliver the result.
    ///
    /// Returns how many bindings received the message.
    pub fn call(
        &self,
        text: Option<String>,
        target: &RelayTarget,
        source: RelaySource,
        extra: RelayExtra,
    ) -> usize {
        let message = RelayMessage::new(text, source, target.clone(), extra);
        let Some(message) = run_filters(message) else {
            return 0;
        };

        let mut delivered = 0;
        for binding in &self.bindings {
            if binding.kind == target.kind && binding.name == target.name {
                (binding.callback)(&message);
                delivered += 1;
            }
        }

        if delivered == 0 {
            trace!(kind = %target.kind, name = %target.name, "No binding for relay target");
        }
        delivered
    }
}

/// Evaluate the filter chain in order. `None` means the message is not delivered.
fn run_filters(message: RelayMessage) -> Option<RelayMessage> {
    let filters = message.target.filters.clone();
    if filters.is_empty() {
        return Some(message);
    }

    let mut matched = false;
    let mut current = message;
    for filter in filters.iter() {
        match filter.classify(&current) {
            Ok(FilterOutcome::NoMatch) => {}
            Ok(FilterOutcome::Match(rewritten)) => {
                matched = true;
                if let Some(rewritten) = rewritten {
                    current = rewritten;
                }
            }
            Ok(FilterOutcome::Block) => {
                debug!(
                    filter = filter.name(),
                    target = %current.target.name,
                    channel = %current.target.channel,
                    "FILTERED relay message"
                );
                return None;
            }
            Err(e) => {
                warn!(filter = filter.name(), "Relay filter failed, blocking delivery: {}", e);
                return None;
            }
        }
    }

    if matched {
        Some(current)
    } else {
        trace!(target = %current.target.name, "No filter matched, dropping relay message");
        None
    }
}
