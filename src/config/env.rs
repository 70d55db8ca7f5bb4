//! Environment variable overrides for configuration.
//!
//! Supports overriding config values with environment variables:
//! - `IRCRAFT_CONFIG` - Config file path
//! - `IRCRAFT_LOG` - Log filter directive
//! - `IRCRAFT_IRC_<NAME>_PASSWORD` - Server password of IRC client `<name>`
//! - `IRCRAFT_MC_<NAME>_PASSWORD` - RCON password of Minecraft client `<name>`
//!
//! `<NAME>` is the client name upper-cased, with anything that is not a
//! letter or digit replaced by `_`.

use std::env;

use crate::config::types::Config;

/// Environment variable prefix for all config overrides.
const ENV_PREFIX: &str = "IRCRAFT";

/// Environment-safe form of a client name.
fn env_key(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}

/// Apply environment variable overrides to a config.
pub fn apply_env_overrides(config: Config) -> Config {
    apply_overrides(config, |key| env::var(key).ok())
}

fn apply_overrides(mut config: Config, lookup: impl Fn(&str) -> Option<String>) -> Config {
    if let Some(level) = lookup(&format!("{}_LOG", ENV_PREFIX)) {
        config.logging.level = Some(level);
    }

    for irc in &mut config.irc {
        let key = format!("{}_IRC_{}_PASSWORD", ENV_PREFIX, env_key(&irc.name));
        if let Some(password) = lookup(&key) {
            irc.password = Some(password);
        }
    }

    for mc in &mut config.minecraft {
        let key = format!("{}_MC_{}_PASSWORD", ENV_PREFIX, env_key(&mc.name));
        if let Some(password) = lookup(&key) {
            mc.rcon.password = password;
        }
    }

    config
}

/// Get the config file path from environment or use default.
///
/// Checks `IRCRAFT_CONFIG` environment variable, otherwise returns "ircraft.conf".
pub fn get_config_path() -> String {
    env::var(format!("{}_CONFIG", ENV_PREFIX)).unwrap_or_else(|_| "ircraft.conf".to_string())
}
