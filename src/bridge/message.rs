//! Values passed through the relay bus.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::bridge::filter::RelayFilter;
use crate::common::error::ConfigError;
use crate::config::types::RelayRuleConfig;
use crate::protocol::irc::IrcMessage;
use crate::protocol::udplog::LogEvent;

/// Channel used for Minecraft targets that name none.
pub const DEFAULT_MINECRAFT_CHANNEL: &str = "rcon";

/// Protocol family of a relay endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndpointKind {
    Irc,
    Minecraft,
}

impl EndpointKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EndpointKind::Irc => "irc",
            EndpointKind::Minecraft => "minecraft",
        }
    }
}

impl fmt::Display for EndpointKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EndpointKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "irc" => Ok(EndpointKind::Irc),
            "minecraft" | "mc" => Ok(EndpointKind::Minecraft),
            other => Err(format!("unknown endpoint type '{}'", other)),
        }
    }
}

/// Where a message should go, and the filters gating it.
#[derive(Debug, Clone)]
pub struct RelayTarget {
    pub kind: EndpointKind,
    /// Configured client name.
    pub name: String,
    /// Channel on the target side (IRC channel, or an RCON output mode).
    pub channel: String,
    /// Text prepended to rendered lines.
    pub prefix: String,
    pub filters: Arc<[RelayFilter]>,
}

impl RelayTarget {
    pub fn new(kind: EndpointKind, name: impl Into<String>, channel: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            channel: channel.into(),
            prefix: String::new(),
            filters: Arc::from(Vec::new()),
        }
    }

    /// Build a target from a configured relay rule.
    ///
    /// The rule's own prefix wins over `default_prefix`. IRC targets must
    /// name a channel.
    pub fn from_rule(
        rule: &RelayRuleConfig,
        default_prefix: &str,
        filters: Vec<RelayFilter>,
    ) -> Result<Self, ConfigError> {
        let kind: EndpointKind = rule
            .kind
            .parse()
            .map_err(|message| ConfigError::InvalidValue {
                field: "type".to_string(),
                message,
            })?;
        let channel = match (kind, rule.channel.as_deref()) {
            (_, Some(channel)) if !channel.is_empty() => channel.to_string(),
            (EndpointKind::Minecraft, _) => DEFAULT_MINECRAFT_CHANNEL.to_string(),
            (EndpointKind::Irc, _) => {
                return Err(ConfigError::InvalidValue {
                    field: "channel".to_string(),
                    message: format!("required for irc target '{}'", rule.name),
                })
            }
        };
        let prefix = rule
            .prefix
            .clone()
            .unwrap_or_else(|| default_prefix.to_string());

        Ok(Self::new(kind, rule.name.clone(), channel)
            .with_prefix(prefix)
            .with_filters(filters))
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn with_filters(mut self, filters: Vec<RelayFilter>) -> Self {
        self.filters = Arc::from(filters);
        self
    }

    /// Same destination with the filter chain removed.
    pub fn unfiltered(&self) -> Self {
        Self {
            filters: Arc::from(Vec::new()),
            ..self.clone()
        }
    }

    /// Whether this target addresses the given endpoint channel.
    pub fn addresses(&self, kind: EndpointKind, name: &str, channel: &str) -> bool {
        self.kind == kind && self.name == name && self.channel.eq_ignore_ascii_case(channel)
    }
}

/// Provenance of a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelaySource {
    pub kind: EndpointKind,
    pub name: String,
    pub channel: String,
}

impl RelaySource {
    pub fn new(kind: EndpointKind, name: impl Into<String>, channel: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            channel: channel.into(),
        }
    }
}

/// Protocol payload carried alongside the rendered text.
#[derive(Debug, Clone)]
pub enum RelayExtra {
    /// No payload.
    #[cfg(test)]
    None,
    /// The IRC line the message was rendered from.
    Irc(Arc<IrcMessage>),
    /// A decoded server log event.
    Log(Arc<LogEvent>),
    /// Reply to a player-list query.
    PlayerList,
    /// RCON login completed.
    Connected,
}

/// Immutable message handed to filters and bindings.
#[derive(Debug, Clone)]
pub struct RelayMessage {
    /// Rendered text. `None` for event-only messages.
    pub text: Option<String>,
    pub source: RelaySource,
    pub target: RelayTarget,
    pub extra: RelayExtra,
}

impl RelayMessage {
    pub fn new(
        text: Option<String>,
        source: RelaySource,
        target: RelayTarget,
        extra: RelayExtra,
    ) -> Self {
        Self {
            text,
            source,
            target,
            extra,
        }
    }

    /// A copy of this message with different text.
    pub fn with_text(&self, text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..self.clone()
        }
    }

    pub fn log_event(&self) -> Option<&LogEvent> {
        match &self.extra {
            RelayExtra::Log(event) => Some(event),
            _ => None,
        }
    }

    pub fn irc_line(&self) -> Option<&IrcMessage> {
        match &self.extra {
            RelayExtra::Irc(line) => Some(line),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_kind_parse() {
        assert_eq!("IRC".parse::<EndpointKind>(), Ok(EndpointKind::Irc));
        assert_eq!("mc".parse::<EndpointKind>(), Ok(EndpointKind::Minecraft));
        assert!("xmpp".parse::<EndpointKind>().is_err());
        assert_eq!(EndpointKind::Minecraft.to_string(), "minecraft");
    }

    #[test]
    fn test_target_addresses_channel_case_insensitively() {
        let target = RelayTarget::new(EndpointKind::Irc, "net", "#Lobby");
        assert!(target.addresses(EndpointKind::Irc, "net", "#lobby"));
        assert!(!target.addresses(EndpointKind::Irc, "other", "#lobby"));
        assert!(!target.addresses(EndpointKind::Minecraft, "net", "#lobby"));
    }

    fn rule(kind: &str, channel: Option<&str>, prefix: Option<&str>) -> RelayRuleConfig {
        RelayRuleConfig {
            kind: kind.to_string(),
            name: "x".to_string(),
            channel: channel.map(str::to_string),
            prefix: prefix.map(str::to_string),
            filters: None,
            format: None,
            action_format: None,
            stream: None,
        }
    }

    #[test]
    fn test_target_from_rule_defaults() {
        let target = RelayTarget::from_rule(&rule("minecraft", None, None), "[net]", vec![]).unwrap();
        assert_eq!(target.kind, EndpointKind::Minecraft);
        assert_eq!(target.channel, DEFAULT_MINECRAFT_CHANNEL);
        assert_eq!(target.prefix, "[net]");

        let target =
            RelayTarget::from_rule(&rule("irc", Some("#a"), Some("[MC]")), "[mc1]", vec![]).unwrap();
        assert_eq!(target.channel, "#a");
        assert_eq!(target.prefix, "[MC]");
    }

    #[test]
    fn test_target_from_rule_rejects_bad_rules() {
        assert!(RelayTarget::from_rule(&rule("irc", None, None), "", vec![]).is_err());
        assert!(RelayTarget::from_rule(&rule("telnet", Some("#a"), None), "", vec![]).is_err());
    }

    #[test]
    fn test_with_text_leaves_original_untouched() {
        let original = RelayMessage::new(
            None,
            RelaySource::new(EndpointKind::Minecraft, "mc1", "udp"),
            RelayTarget::new(EndpointKind::Irc, "net", "#a"),
            RelayExtra::None,
        );
        let rewritten = original.with_text("hello");
        assert_eq!(original.text, None);
        assert_eq!(rewritten.text.as_deref(), Some("hello"));
        assert_eq!(rewritten.source, original.source);
    }
}
