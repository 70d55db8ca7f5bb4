//! Configuration validation.
//!
//! Validates configuration values and reports every problem at once.

use std::collections::HashSet;

use crate::bridge::{EndpointKind, FilterRegistry};
use crate::common::error::ConfigError;
use crate::config::types::{Config, RelayRuleConfig};
use crate::minecraft::RelayStream;

/// Validate a configuration and return detailed errors.
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let mut errors = Vec::new();

    let registry = match FilterRegistry::from_config(&config.filters) {
        Ok(registry) => Some(registry),
        Err(e) => {
            errors.push(e.to_string());
            None
        }
    };

    for (name, filter) in &config.filters {
        if filter.patterns.is_empty() {
            errors.push(format!("filters.{}.patterns is empty", name));
        }
        for (i, pattern) in filter.patterns.iter().enumerate() {
            if fancy_regex::Regex::new(pattern).is_err() {
                errors.push(format!(
                    "filters.{}.patterns[{}] is not a valid regex: '{}'",
                    name, i, pattern
                ));
            }
        }
    }

    let irc_names: HashSet<&str> = config.irc.iter().map(|c| c.name.as_str()).collect();
    let mc_names: HashSet<&str> = config.minecraft.iter().map(|c| c.name.as_str()).collect();

    if irc_names.len() != config.irc.len() {
        errors.push("irc client names must be unique".to_string());
    }
    if mc_names.len() != config.minecraft.len() {
        errors.push("minecraft client names must be unique".to_string());
    }

    let check_rule = |errors: &mut Vec<String>, field: &str, rule: &RelayRuleConfig| {
        match rule.kind.parse::<EndpointKind>() {
            Ok(EndpointKind::Irc) => {
                if !irc_names.contains(rule.name.as_str()) {
                    errors.push(format!("{}.name '{}' is not a configured irc client", field, rule.name));
                }
                if rule.channel.as_deref().map_or(true, str::is_empty) {
                    errors.push(format!("{}.channel is required for irc targets", field));
                }
            }
            Ok(EndpointKind::Minecraft) => {
                if !mc_names.contains(rule.name.as_str()) {
                    errors.push(format!(
                        "{}.name '{}' is not a configured minecraft client",
                        field, rule.name
                    ));
                }
            }
            Err(e) => errors.push(format!("{}.type: {}", field, e)),
        }

        if let (Some(registry), Some(filters)) = (registry.as_ref(), rule.filters.as_ref()) {
            for filter in filters {
                if !registry.contains(filter) {
                    errors.push(format!("{}.filters: unknown filter '{}'", field, filter));
                }
            }
        }
    };

    for (i, irc) in config.irc.iter().enumerate() {
        let field = format!("irc[{}]", i);
        if irc.name.is_empty() {
            errors.push(format!("{}.name is required", field));
        }
        if irc.host.is_empty() {
            errors.push(format!("{}.host is required", field));
        }
        if irc.port == 0 {
            errors.push(format!("{}.port must be non-zero", field));
        }
        if irc.nick.is_empty() || irc.nick.contains(' ') {
            errors.push(format!("{}.nick must be a single non-empty word", field));
        }
        if irc.timing.ping_interval == 0 {
            errors.push(format!("{}.timing.ping_interval must be non-zero", field));
        }
        if irc.timing.reconnect_max < irc.timing.reconnect_base {
            errors.push(format!("{}.timing.reconnect_max must be >= reconnect_base", field));
        }
        for (j, channel) in irc.channels.iter().enumerate() {
            if channel.name.is_empty() || channel.name.contains(' ') {
                errors.push(format!("{}.channels[{}].name is invalid", field, j));
            }
            for (k, rule) in channel.relays.iter().enumerate() {
                check_rule(&mut errors, &format!("{}.channels[{}].relays[{}]", field, j, k), rule);
            }
        }
    }

    for (i, mc) in config.minecraft.iter().enumerate() {
        let field = format!("minecraft[{}]", i);
        if mc.name.is_empty() {
            errors.push(format!("{}.name is required", field));
        }
        if mc.rcon.host.is_empty() {
            errors.push(format!("{}.rcon.host is required", field));
        }
        if mc.rcon.port == 0 {
            errors.push(format!("{}.rcon.port must be non-zero", field));
        }
        if mc.rcon.password.is_empty() {
            errors.push(format!("{}.rcon.password is required", field));
        }
        if mc.udp.host.is_empty() {
            errors.push(format!("{}.udp.host is required", field));
        }
        for (k, rule) in mc.relays.iter().enumerate() {
            let rule_field = format!("{}.relays[{}]", field, k);
            check_rule(&mut errors, &rule_field, rule);
            if let Some(stream) = rule.stream.as_deref() {
                if RelayStream::parse(stream).is_none() {
                    errors.push(format!(
                        "{}.stream '{}' is invalid (use: events, raw, rcon)",
                        rule_field, stream
                    ));
                }
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::ValidationError {
            message: errors.join("\n"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::*;

    fn rule(kind: &str, name: &str, channel: Option<&str>) -> RelayRuleConfig {
        RelayRuleConfig {
            kind: kind.to_string(),
            name: name.to_string(),
            channel: channel.map(str::to_string),
            prefix: None,
            filters: None,
            format: None,
            action_format: None,
            stream: None,
        }
    }

    fn make_valid_config() -> Config {
        Config {
            irc: vec![IrcClientConfig {
                name: "net".to_string(),
                host: "irc.example.net".to_string(),
                port: 6667,
                password: None,
                nick: "Bot".to_string(),
                user: None,
                gecos: None,
                performs: vec![],
                channels: vec![IrcChannelConfig {
                    name: "#a".to_string(),
                    relays: vec![rule("minecraft", "mc1", None)],
                }],
                timing: IrcTimingConfig::default(),
            }],
            minecraft: vec![MinecraftClientConfig {
                name: "mc1".to_string(),
                rcon: RconConfig {
                    host: "127.0.0.1".to_string(),
                    port: 25575,
                    password: "secret".to_string(),
                },
                udp: UdpConfig::default(),
                rich_text: true,
                relays: vec![rule("irc", "net", Some("#a"))],
                timing: MinecraftTimingConfig::default(),
            }],
            ..Default::default()
        }
    }

    #[test]
    fn test_valid_config() {
        assert!(validate_config(&make_valid_config()).is_ok());
    }

    #[test]
    fn test_empty_config_is_valid() {
        assert!(validate_config(&Config::default()).is_ok());
    }

    #[test]
    fn test_collects_all_errors() {
        let mut config = make_valid_config();
        config.irc[0].host = String::new();
        config.irc[0].nick = String::new();
        config.minecraft[0].rcon.password = String::new();

        let err = validate_config(&config).unwrap_err();
        let ConfigError::ValidationError { message } = err else {
            panic!("expected validation error");
        };
        assert!(message.contains("irc[0].host is required"));
        assert!(message.contains("irc[0].nick"));
        assert!(message.contains("minecraft[0].rcon.password is required"));
    }

    #[test]
    fn test_unknown_relay_target() {
        let mut config = make_valid_config();
        config.irc[0].channels[0].relays = vec![rule("minecraft", "mc9", None)];
        config.minecraft[0].relays = vec![rule("xmpp", "x", None)];

        let err = validate_config(&config).unwrap_err().to_string();
        assert!(err.contains("'mc9' is not a configured minecraft client"));
        assert!(err.contains("minecraft[0].relays[0].type"));
    }

    #[test]
    fn test_irc_target_needs_channel() {
        let mut config = make_valid_config();
        config.minecraft[0].relays = vec![rule("irc", "net", None)];
        let err = validate_config(&config).unwrap_err().to_string();
        assert!(err.contains("channel is required"));
    }

    #[test]
    fn test_unknown_filter_and_stream() {
        let mut config = make_valid_config();
        let mut bad = rule("irc", "net", Some("#a"));
        bad.filters = Some(vec!["joinpart".to_string(), "nosuch".to_string()]);
        bad.stream = Some("sideways".to_string());
        config.minecraft[0].relays = vec![bad];

        let err = validate_config(&config).unwrap_err().to_string();
        assert!(err.contains("unknown filter 'nosuch'"));
        assert!(!err.contains("unknown filter 'joinpart'"));
        assert!(err.contains("stream 'sideways' is invalid"));
    }

    #[test]
    fn test_invalid_filter_regex() {
        let mut config = make_valid_config();
        config.filters.insert(
            "broken".to_string(),
            FilterConfig {
                patterns: vec!["[unclosed".to_string()],
                action: None,
            },
        );
        let err = validate_config(&config).unwrap_err().to_string();
        assert!(err.contains("filters.broken.patterns[0] is not a valid regex"));
    }

    #[test]
    fn test_duplicate_names() {
        let mut config = make_valid_config();
        let dup = config.irc[0].clone();
        config.irc.push(dup);
        let err = validate_config(&config).unwrap_err().to_string();
        assert!(err.contains("irc client names must be unique"));
    }
}
