//! Configuration file parsing (HOCON format).

use std::path::Path;

use crate::common::error::ConfigError;
use crate::config::types::Config;
use hocon::HoconLoader;

/// Load configuration from a HOCON file.
pub fn load_config(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let path = path.as_ref();

    HoconLoader::new()
        .load_file(path)
        .map_err(|e| ConfigError::IoError {
            path: path.display().to_string(),
            source: std::io::Error::new(std::io::ErrorKind::Other, e.to_string()),
        })?
        .resolve()
        .map_err(|e| ConfigError::ParseError {
            message: e.to_string(),
        })
}

/// Load configuration from a HOCON string.
#[cfg(test)]
pub fn load_config_str(content: &str) -> Result<Config, ConfigError> {
    HoconLoader::new()
        .load_str(content)
        .map_err(|e| ConfigError::ParseError {
            message: e.to_string(),
        })?
        .resolve()
        .map_err(|e| ConfigError::ParseError {
            message: e.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config() {
        let config = load_config_str(
            r##"
            irc = [
              {
                name = net
                host = irc.example.net
                nick = Bot
                channels = [
                  {
                    name = "#a"
                    relays = [ { type = minecraft, name = mc1, prefix = "[IRC]" } ]
                  }
                ]
              }
            ]
            minecraft = [
              {
                name = mc1
                rcon { password = secret }
                relays = [ { type = irc, name = net, channel = "#a", filters = [joinpart, chat] } ]
              }
            ]
            "##,
        )
        .unwrap();

        assert_eq!(config.irc.len(), 1);
        let irc = &config.irc[0];
        assert_eq!(irc.port, 6667);
        assert_eq!(irc.timing.ping_interval, 120);
        assert_eq!(irc.channels[0].relays[0].kind, "minecraft");
        assert_eq!(irc.channels[0].relays[0].prefix.as_deref(), Some("[IRC]"));

        let mc = &config.minecraft[0];
        assert_eq!(mc.rcon.host, "127.0.0.1");
        assert_eq!(mc.rcon.port, 25575);
        assert_eq!(mc.udp.port, 25585);
        assert!(mc.rich_text);
        assert_eq!(
            mc.relays[0].filters.as_deref(),
            Some(&["joinpart".to_string(), "chat".to_string()][..])
        );
    }

    #[test]
    fn test_invalid_config_is_parse_error() {
        let err = load_config_str("irc = [ { name = net } ]").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }
}
