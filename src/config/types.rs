//! Configuration type definitions.

use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Named pattern filters usable from relay rules.
    #[serde(default)]
    pub filters: HashMap<String, FilterConfig>,
    #[serde(default)]
    pub irc: Vec<IrcClientConfig>,
    #[serde(default)]
    pub minecraft: Vec<MinecraftClientConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive, e.g. "info" or "ircraft=debug".
    pub level: Option<String>,
}

/// A regex filter definition.
#[derive(Debug, Clone, Deserialize)]
pub struct FilterConfig {
    #[serde(default)]
    pub patterns: Vec<String>,
    /// "block" (default) or "match".
    pub action: Option<String>,
}

/// One relay destination attached to a channel or a Minecraft server.
#[derive(Debug, Clone, Deserialize)]
pub struct RelayRuleConfig {
    /// Target kind: "irc" or "minecraft".
    #[serde(rename = "type")]
    pub kind: String,
    /// Target client name.
    pub name: String,
    /// Target channel. Required for IRC targets; defaults to "rcon" for Minecraft.
    pub channel: Option<String>,
    pub prefix: Option<String>,
    /// Ordered filter names.
    pub filters: Option<Vec<String>>,
    /// Format for plain messages (IRC sources only).
    pub format: Option<String>,
    /// Format for CTCP ACTION messages (IRC sources only).
    pub action_format: Option<String>,
    /// Which server stream feeds this rule: "events", "raw" or "rcon"
    /// (Minecraft sources only).
    pub stream: Option<String>,
}

/// IRC connection definition.
#[derive(Debug, Clone, Deserialize)]
pub struct IrcClientConfig {
    pub name: String,
    pub host: String,
    #[serde(default = "default_irc_port")]
    pub port: u16,
    pub password: Option<String>,
    pub nick: String,
    /// Ident; defaults to the nick.
    pub user: Option<String>,
    /// Real name; defaults to the nick.
    pub gecos: Option<String>,
    /// Raw lines sent once registration completes.
    #[serde(default)]
    pub performs: Vec<String>,
    #[serde(default)]
    pub channels: Vec<IrcChannelConfig>,
    #[serde(default)]
    pub timing: IrcTimingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IrcChannelConfig {
    pub name: String,
    #[serde(default)]
    pub relays: Vec<RelayRuleConfig>,
}

/// IRC timer settings, in seconds.
#[derive(Debug, Clone, Deserialize)]
pub struct IrcTimingConfig {
    #[serde(default = "default_ping_interval")]
    pub ping_interval: u64,
    #[serde(default = "default_short_delay")]
    pub cap_timeout: u64,
    #[serde(default = "default_short_delay")]
    pub perform_delay: u64,
    #[serde(default = "default_nick_retry")]
    pub nick_retry: u64,
    #[serde(default = "default_irc_reconnect_base")]
    pub reconnect_base: u64,
    #[serde(default = "default_irc_reconnect_max")]
    pub reconnect_max: u64,
}

impl Default for IrcTimingConfig {
    fn default() -> Self {
        Self {
            ping_interval: default_ping_interval(),
            cap_timeout: default_short_delay(),
            perform_delay: default_short_delay(),
            nick_retry: default_nick_retry(),
            reconnect_base: default_irc_reconnect_base(),
            reconnect_max: default_irc_reconnect_max(),
        }
    }
}

/// Minecraft server definition.
#[derive(Debug, Clone, Deserialize)]
pub struct MinecraftClientConfig {
    pub name: String,
    pub rcon: RconConfig,
    #[serde(default)]
    pub udp: UdpConfig,
    /// Render links as clickable components in broadcasts.
    #[serde(default = "default_true")]
    pub rich_text: bool,
    #[serde(default)]
    pub relays: Vec<RelayRuleConfig>,
    #[serde(default)]
    pub timing: MinecraftTimingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RconConfig {
    #[serde(default = "default_rcon_host")]
    pub host: String,
    #[serde(default = "default_rcon_port")]
    pub port: u16,
    pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UdpConfig {
    #[serde(default = "default_udp_host")]
    pub host: String,
    #[serde(default = "default_udp_port")]
    pub port: u16,
}

impl Default for UdpConfig {
    fn default() -> Self {
        Self {
            host: default_udp_host(),
            port: default_udp_port(),
        }
    }
}

/// Minecraft timer settings, in seconds.
#[derive(Debug, Clone, Deserialize)]
pub struct MinecraftTimingConfig {
    #[serde(default = "default_mc_reconnect")]
    pub reconnect: u64,
    #[serde(default = "default_mc_reconnect")]
    pub login_timeout: u64,
    #[serde(default = "default_call_expiry")]
    pub call_expiry: u64,
}

impl Default for MinecraftTimingConfig {
    fn default() -> Self {
        Self {
            reconnect: default_mc_reconnect(),
            login_timeout: default_mc_reconnect(),
            call_expiry: default_call_expiry(),
        }
    }
}

/// Convert a seconds setting into a duration.
pub fn secs(value: u64) -> Duration {
    Duration::from_secs(value)
}

fn default_irc_port() -> u16 {
    6667
}

fn default_ping_interval() -> u64 {
    120
}

fn default_short_delay() -> u64 {
    3
}

fn default_nick_retry() -> u64 {
    60
}

fn default_irc_reconnect_base() -> u64 {
    10
}

fn default_irc_reconnect_max() -> u64 {
    300
}

fn default_true() -> bool {
    true
}

fn default_rcon_host() -> String {
    "127.0.0.1".to_string()
}

fn default_rcon_port() -> u16 {
    25575
}

fn default_udp_host() -> String {
    "0.0.0.0".to_string()
}

fn default_udp_port() -> u16 {
    25585
}

fn default_mc_reconnect() -> u64 {
    10
}

fn default_call_expiry() -> u64 {
    30
}
