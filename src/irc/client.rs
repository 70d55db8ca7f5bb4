//! IRC connection state machine.
//!
//! One client per configured network. It registers (with CAP negotiation),
//! keeps the link alive, recovers its preferred nick, keeps configured
//! channels joined and relays channel traffic through the bus.

use std::collections::HashSet;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};
use tracing::{debug, info, info_span, trace, warn, Span};

use crate::bridge::formatter::{split_message, FormatContext, MessageFormatter};
use crate::bridge::{
    EndpointKind, FilterRegistry, RelayCallback, RelayExtra, RelayMessage, RelaySource,
    RelayTarget,
};
use crate::common::error::{ConfigError, ConnectionResult};
use crate::common::reconnect::{ReconnectConfig, ReconnectState};
use crate::config::types::{secs, IrcClientConfig};
use crate::protocol::irc::{IrcLineCodec, IrcMessage};
use crate::reactor::{Context, Endpoint, Readable, SocketToken, TimerHandle, TimerKind};

/// Capabilities requested when the server offers them.
pub const KNOWN_CAPS: [&str; 5] = [
    "account-notify",
    "away-notify",
    "extended-join",
    "multi-prefix",
    "userhost-in-names",
];

/// Longest PRIVMSG text sent in one line, in bytes.
pub const MAX_MESSAGE_BYTES: usize = 400;

const CTCP_DELIMITER: char = '\x01';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrcState {
    Disconnected,
    Connecting,
    Registering,
    Active,
    Disconnecting,
}

/// How one channel's messages are rendered for one relay target.
struct RelayRule {
    target: RelayTarget,
    message: MessageFormatter,
    action: MessageFormatter,
}

struct ChannelState {
    name: String,
    joined: bool,
    rules: Vec<RelayRule>,
}

#[derive(Default)]
struct Timers {
    keepalive: Option<TimerHandle>,
    cap_end: Option<TimerHandle>,
    perform: Option<TimerHandle>,
    nick_recovery: Option<TimerHandle>,
    reconnect: Option<TimerHandle>,
}

pub struct IrcClient {
    config: IrcClientConfig,
    span: Span,
    state: IrcState,
    channels: Vec<ChannelState>,

    socket: Option<SocketToken>,
    codec: IrcLineCodec,
    buffer: BytesMut,

    nick: String,
    nick_suffix: i64,
    server_name: Option<String>,

    caps_offered: Vec<String>,
    caps_pending: HashSet<String>,
    caps_enabled: HashSet<String>,
    cap_ended: bool,
    perform_done: bool,
    /// Set by every read, cleared by the keepalive tick.
    seen_traffic: bool,
    ping_outstanding: bool,

    timers: Timers,
    reconnect: ReconnectState,
    relay: Option<RelayCallback>,
    stopped: bool,
}

impl IrcClient {
    pub fn new(config: IrcClientConfig, filters: &FilterRegistry) -> Result<Self, ConfigError> {
        let default_prefix = format!("[{}]", config.name);
        let mut channels = Vec::with_capacity(config.channels.len());

        for channel in &config.channels {
            let mut rules = Vec::new();
            for rule in &channel.relays {
                let chain = match &rule.filters {
                    Some(names) => filters.resolve(names)?,
                    None => Vec::new(),
                };
                let target = RelayTarget::from_rule(rule, &default_prefix, chain)?;
                if target.addresses(EndpointKind::Irc, &config.name, &channel.name) {
                    warn!(
                        client = %config.name,
                        channel = %channel.name,
                        "Skipping relay rule that points back at its own channel"
                    );
                    continue;
                }
                rules.push(RelayRule {
                    target,
                    message: rule
                        .format
                        .as_deref()
                        .map(MessageFormatter::new)
                        .unwrap_or_else(MessageFormatter::message_default),
                    action: rule
                        .action_format
                        .as_deref()
                        .map(MessageFormatter::new)
                        .unwrap_or_else(MessageFormatter::action_default),
                });
            }
            channels.push(ChannelState {
                name: channel.name.clone(),
                joined: false,
                rules,
            });
        }

        let reconnect = ReconnectState::new(ReconnectConfig::linear(
            secs(config.timing.reconnect_base),
            secs(config.timing.reconnect_max),
        ));

        Ok(Self {
            span: info_span!("irc", client = %config.name),
            nick: config.nick.clone(),
            config,
            state: IrcState::Disconnected,
            channels,
            socket: None,
            codec: IrcLineCodec::new(),
            buffer: BytesMut::new(),
            nick_suffix: -1,
            server_name: None,
            caps_offered: Vec::new(),
            caps_pending: HashSet::new(),
            caps_enabled: HashSet::new(),
            cap_ended: false,
            perform_done: false,
            seen_traffic: false,
            ping_outstanding: false,
            timers: Timers::default(),
            reconnect,
            relay: None,
            stopped: false,
        })
    }

    #[cfg(test)]
    pub fn state(&self) -> IrcState {
        self.state
    }

    #[cfg(test)]
    pub fn nick(&self) -> &str {
        &self.nick
    }

    #[cfg(test)]
    pub fn is_joined(&self, channel: &str) -> bool {
        self.channel(channel).is_some_and(|c| c.joined)
    }

    fn channel(&self, name: &str) -> Option<&ChannelState> {
        self.channels
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    fn channel_mut(&mut self, name: &str) -> Option<&mut ChannelState> {
        self.channels
            .iter_mut()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    fn is_self(&self, name: Option<&str>) -> bool {
        name.is_some_and(|n| n.eq_ignore_ascii_case(&self.nick))
    }

    fn connect(&mut self, cx: &mut Context<'_>) {
        self.reset_connection();
        self.state = IrcState::Connecting;
        info!("Connecting to {}:{}...", self.config.host, self.config.port);
        self.socket = Some(cx.open_tcp(&self.config.host, self.config.port));
    }

    fn reset_connection(&mut self) {
        self.buffer.clear();
        self.codec = IrcLineCodec::new();
        self.nick = self.config.nick.clone();
        self.nick_suffix = -1;
        self.server_name = None;
        self.caps_offered.clear();
        self.caps_pending.clear();
        self.caps_enabled.clear();
        self.cap_ended = false;
        self.perform_done = false;
        self.seen_traffic = false;
        self.ping_outstanding = false;
        for channel in &mut self.channels {
            channel.joined = false;
        }
    }

    fn send_line(&mut self, cx: &mut Context<'_>, line: impl Into<String>) {
        let Some(token) = self.socket else {
            return;
        };
        let line = line.into();
        debug!(">> {}", line);
        let mut buf = BytesMut::new();
        if let Err(e) = self.codec.encode(line, &mut buf) {
            warn!("Failed to encode line: {}", e);
            return;
        }
        if let Err(e) = cx.send(token, buf.freeze()) {
            warn!("Failed to send line: {}", e);
        }
    }

    fn arm_keepalive(&mut self, cx: &mut Context<'_>) {
        cx.cancel_timer(&mut self.timers.keepalive);
        let interval = secs(self.config.timing.ping_interval);
        self.timers.keepalive = Some(cx.schedule(interval, TimerKind::Keepalive));
    }

    fn arm_nick_recovery(&mut self, cx: &mut Context<'_>) {
        if self.timers.nick_recovery.is_none() {
            let delay = secs(self.config.timing.nick_retry);
            self.timers.nick_recovery = Some(cx.schedule(delay, TimerKind::NickRecovery));
        }
    }

    /// Tear the connection down. With `quit`, a QUIT line goes out first.
    fn drop_connection(&mut self, cx: &mut Context<'_>, quit: Option<&str>) {
        if let Some(reason) = quit {
            if matches!(self.state, IrcState::Registering | IrcState::Active) {
                self.state = IrcState::Disconnecting;
                let line = if reason.is_empty() {
                    "QUIT :Disconnecting".to_string()
                } else {
                    format!("QUIT :Disconnecting: {}", reason)
                };
                self.send_line(cx, line);
            }
        }

        cx.cancel_timer(&mut self.timers.keepalive);
        cx.cancel_timer(&mut self.timers.cap_end);
        cx.cancel_timer(&mut self.timers.perform);
        cx.cancel_timer(&mut self.timers.nick_recovery);
        cx.cancel_timer(&mut self.timers.reconnect);

        if let Some(token) = self.socket.take() {
            cx.close(token);
        }
        self.reset_connection();
        self.state = IrcState::Disconnected;
    }

    fn schedule_reconnect(&mut self, cx: &mut Context<'_>) {
        self.state = IrcState::Disconnected;
        if self.stopped {
            return;
        }
        let delay = self.reconnect.next_delay();
        info!(
            attempt = self.reconnect.attempts(),
            "Reconnecting in {} seconds...",
            delay.as_secs()
        );
        cx.cancel_timer(&mut self.timers.reconnect);
        self.timers.reconnect = Some(cx.schedule(delay, TimerKind::Reconnect));
    }

    /// Non-graceful disconnect followed by a reconnect with backoff.
    fn fail_connection(&mut self, cx: &mut Context<'_>) {
        self.drop_connection(cx, None);
        self.schedule_reconnect(cx);
    }

    fn handle_line(&mut self, cx: &mut Context<'_>, line: &str) {
        trace!("<< {}", line);
        let message: IrcMessage = match line.parse() {
            Ok(message) => message,
            Err(e) => {
                debug!("Dropping unparseable line: {}", e);
                return;
            }
        };

        match message.command.as_str() {
            "PING" => {
                let token = message.trailing().unwrap_or_default().to_string();
                self.send_line(cx, format!("PONG :{}", token));
            }
            "CAP" => self.handle_cap(cx, &message),
            "001" => {
                if let Some(nick) = message.param(0) {
                    self.nick = nick.to_string();
                }
                self.state = IrcState::Active;
                info!("Registered as {}", self.nick);
            }
            "004" => {
                self.server_name = message.param(1).map(str::to_string);
            }
            "376" | "422" => {
                if !self.perform_done && self.timers.perform.is_none() {
                    let delay = secs(self.config.timing.perform_delay);
                    self.timers.perform = Some(cx.schedule(delay, TimerKind::Perform));
                }
            }
            "433" => self.handle_nick_in_use(cx, &message),
            "NICK" => self.handle_nick(cx, &message),
            "JOIN" => {
                if self.is_self(message.source_name()) {
                    if let Some(channel) = message.param(0).and_then(|name| self.channel_mut(name)) {
                        channel.joined = true;
                        info!(channel = %channel.name, "Joined channel");
                    }
                }
            }
            "PART" => {
                if self.is_self(message.source_name()) {
                    if let Some(name) = message.param(0) {
                        self.rejoin(cx, name, "Parted");
                    }
                }
            }
            "KICK" => {
                if self.is_self(message.param(1)) {
                    if let Some(name) = message.param(0) {
                        self.rejoin(cx, name, "Kicked from");
                    }
                }
            }
            "PRIVMSG" => self.handle_privmsg(cx, &message),
            "ERROR" => {
                warn!(
                    "Server closed link: {}",
                    message.trailing().unwrap_or_default()
                );
                self.fail_connection(cx);
            }
            _ => {}
        }
    }

    fn rejoin(&mut self, cx: &mut Context<'_>, name: &str, what: &str) {
        let Some(channel) = self.channel_mut(name) else {
            return;
        };
        channel.joined = false;
        let name = channel.name.clone();
        warn!(channel = %name, "{} channel, rejoining", what);
        self.send_line(cx, format!("JOIN {}", name));
    }

    fn handle_cap(&mut self, cx: &mut Context<'_>, message: &IrcMessage) {
        let subcommand = message.param(1).unwrap_or_default().to_ascii_uppercase();
        match subcommand.as_str() {
            "LS" => {
                let continued = message.params.len() > 3 && message.param(2) == Some("*");
                let listing = message.trailing().unwrap_or_default();
                self.caps_offered.extend(
                    listing
                        .split_whitespace()
                        .map(|cap| cap.split('=').next().unwrap_or(cap).to_string()),
                );
                if continued || self.cap_ended {
                    return;
                }

                let wanted: Vec<String> = KNOWN_CAPS
                    .iter()
                    .filter(|cap| self.caps_offered.iter().any(|offered| offered == **cap))
                    .map(|cap| cap.to_string())
                    .collect();
                if wanted.is_empty() {
                    self.end_cap(cx);
                    return;
                }
                self.caps_pending = wanted.iter().cloned().collect();
                self.send_line(cx, format!("CAP REQ :{}", wanted.join(" ")));
            }
            "ACK" | "NAK" => {
                let acked = subcommand == "ACK";
                for cap in message.trailing().unwrap_or_default().split_whitespace() {
                    let cap = cap.trim_start_matches('-');
                    self.caps_pending.remove(cap);
                    if acked {
                        debug!(cap, "Capability enabled");
                        self.caps_enabled.insert(cap.to_string());
                    } else {
                        debug!(cap, "Capability refused");
                    }
                }
                if self.caps_pending.is_empty() {
                    self.end_cap(cx);
                }
            }
            _ => {}
        }
    }

    fn end_cap(&mut self, cx: &mut Context<'_>) {
        cx.cancel_timer(&mut self.timers.cap_end);
        if self.cap_ended {
            return;
        }
        self.cap_ended = true;
        self.caps_pending.clear();
        self.send_line(cx, "CAP END");
    }

    fn handle_nick_in_use(&mut self, cx: &mut Context<'_>, message: &IrcMessage) {
        if self.state == IrcState::Active {
            // A reclaim attempt failed; keep the current nick.
            debug!(
                "Preferred nick {} still in use",
                message.param(1).unwrap_or(&self.config.nick)
            );
            self.arm_nick_recovery(cx);
            return;
        }

        self.nick_suffix += 1;
        self.nick = format!("{}{}", self.config.nick, self.nick_suffix);
        info!("Nick in use, trying {}", self.nick);
        let line = format!("NICK {}", self.nick);
        self.send_line(cx, line);
        self.arm_nick_recovery(cx);
    }

    fn handle_nick(&mut self, cx: &mut Context<'_>, message: &IrcMessage) {
        if !self.is_self(message.source_name()) {
            return;
        }
        let Some(new_nick) = message.param(0) else {
            return;
        };
        info!("Nick changed from {} to {}", self.nick, new_nick);
        self.nick = new_nick.to_string();
        if self.nick.eq_ignore_ascii_case(&self.config.nick) {
            self.nick_suffix = -1;
            cx.cancel_timer(&mut self.timers.nick_recovery);
        }
    }

    fn handle_privmsg(&mut self, cx: &mut Context<'_>, message: &IrcMessage) {
        let (Some(target), Some(text), Some(sender)) =
            (message.param(0), message.param(1), message.source_name())
        else {
            return;
        };
        if self.is_self(Some(sender)) {
            return;
        }
        let Some(channel) = self.channel(target) else {
            return;
        };

        let (body, is_action) = match text.strip_prefix(CTCP_DELIMITER) {
            Some(ctcp) => {
                let ctcp = ctcp.strip_suffix(CTCP_DELIMITER).unwrap_or(ctcp);
                match ctcp.strip_prefix("ACTION ") {
                    Some(action) => (action, true),
                    None => {
                        debug!(sender, "Ignoring CTCP {}", ctcp);
                        return;
                    }
                }
            }
            None => (text, false),
        };

        let source = RelaySource::new(EndpointKind::Irc, self.config.name.clone(), channel.name.clone());
        let line = Arc::new(message.clone());
        for rule in &channel.rules {
            let formatter = if is_action { &rule.action } else { &rule.message };
            let ctx = FormatContext::new(sender, body)
                .with_channel(channel.name.clone())
                .with_prefix(rule.target.prefix.clone());
            let delivered = cx.bus().call(
                Some(formatter.format(&ctx)),
                &rule.target,
                source.clone(),
                RelayExtra::Irc(line.clone()),
            );
            trace!(
                target = %rule.target.name,
                delivered,
                "Relayed channel message"
            );
        }
    }

    fn run_perform(&mut self, cx: &mut Context<'_>) {
        if self.perform_done || self.state != IrcState::Active {
            return;
        }
        for line in self.config.performs.clone() {
            self.send_line(cx, line);
        }
        self.perform_done = true;
        self.reconnect.reset();

        let pending: Vec<String> = self
            .channels
            .iter()
            .filter(|c| !c.joined)
            .map(|c| c.name.clone())
            .collect();
        for name in pending {
            self.send_line(cx, format!("JOIN {}", name));
        }
    }

    fn keepalive_tick(&mut self, cx: &mut Context<'_>) {
        if self.socket.is_none() {
            return;
        }
        if self.seen_traffic {
            self.seen_traffic = false;
            self.arm_keepalive(cx);
            return;
        }
        if self.ping_outstanding {
            warn!(
                "No reply to PING in {} seconds, reconnecting",
                self.config.timing.ping_interval
            );
            self.fail_connection(cx);
            return;
        }
        let server = self
            .server_name
            .clone()
            .unwrap_or_else(|| self.config.host.clone());
        self.send_line(cx, format!("PING {}", server));
        self.ping_outstanding = true;
        self.arm_keepalive(cx);
    }

    fn nick_recovery_tick(&mut self, cx: &mut Context<'_>) {
        if self.socket.is_none() || self.nick.eq_ignore_ascii_case(&self.config.nick) {
            return;
        }
        if self.state == IrcState::Active {
            let line = format!("NICK {}", self.config.nick);
            self.send_line(cx, line);
        }
        self.arm_nick_recovery(cx);
    }
}

impl Endpoint for IrcClient {
    fn kind(&self) -> EndpointKind {
        EndpointKind::Irc
    }

    fn name(&self) -> &str {
        &self.config.name
    }

    fn span(&self) -> &Span {
        &self.span
    }

    fn start(&mut self, cx: &mut Context<'_>) -> Result<()> {
        self.stopped = false;
        self.relay = cx.bind_relay(EndpointKind::Irc, &self.config.name);
        if self.relay.is_none() {
            warn!("Another client is already bound under this name");
        }
        self.connect(cx);
        Ok(())
    }

    fn on_open(
        &mut self,
        cx: &mut Context<'_>,
        token: SocketToken,
        result: ConnectionResult<SocketAddr>,
    ) -> Result<()> {
        if self.socket != Some(token) {
            return Ok(());
        }
        match result {
            Ok(addr) => {
                info!(%addr, "Connected, registering");
                self.state = IrcState::Registering;
                self.arm_keepalive(cx);
                self.timers.cap_end =
                    Some(cx.schedule(secs(self.config.timing.cap_timeout), TimerKind::CapEnd));

                self.send_line(cx, "CAP LS 302");
                if let Some(password) = self.config.password.clone() {
                    self.send_line(cx, format!("PASS :{}", password));
                }
                let nick = self.nick.clone();
                self.send_line(cx, format!("NICK {}", nick));
                let user = self.config.user.clone().unwrap_or_else(|| nick.clone());
                let gecos = self.config.gecos.clone().unwrap_or(nick);
                self.send_line(cx, format!("USER {} 0 * :{}", user, gecos));
            }
            Err(e) => {
                warn!("Connection failed: {}", e);
                self.socket = None;
                self.schedule_reconnect(cx);
            }
        }
        Ok(())
    }

    fn on_readable(&mut self, cx: &mut Context<'_>, token: SocketToken, data: Readable) -> Result<()> {
        if self.socket != Some(token) {
            return Ok(());
        }
        match data {
            Readable::Stream(bytes) => {
                self.seen_traffic = true;
                self.ping_outstanding = false;
                self.buffer.extend_from_slice(&bytes);
                loop {
                    match self.codec.decode(&mut self.buffer) {
                        Ok(Some(line)) => {
                            self.handle_line(cx, &line);
                            // The line may have torn the connection down.
                            if self.socket != Some(token) {
                                break;
                            }
                        }
                        Ok(None) => break,
                        Err(e) => {
                            warn!("Dropping undecodable input: {}", e);
                            self.buffer.clear();
                            break;
                        }
                    }
                }
            }
            Readable::Closed => {
                warn!("Connection closed by server");
                self.fail_connection(cx);
            }
            Readable::Datagram { .. } => {}
        }
        Ok(())
    }

    fn on_error(&mut self, cx: &mut Context<'_>, token: SocketToken, error: io::Error) -> Result<()> {
        if self.socket == Some(token) {
            warn!("Socket error: {}", error);
            self.fail_connection(cx);
        }
        Ok(())
    }

    fn on_timer(&mut self, cx: &mut Context<'_>, kind: TimerKind) -> Result<()> {
        match kind {
            TimerKind::Reconnect => {
                self.timers.reconnect = None;
                if !self.stopped && self.state == IrcState::Disconnected {
                    self.connect(cx);
                }
            }
            TimerKind::Keepalive => {
                self.timers.keepalive = None;
                self.keepalive_tick(cx);
            }
            TimerKind::CapEnd => {
                self.timers.cap_end = None;
                if !self.cap_ended && self.socket.is_some() {
                    debug!("Capability negotiation timed out");
                    self.end_cap(cx);
                }
            }
            TimerKind::Perform => {
                self.timers.perform = None;
                self.run_perform(cx);
            }
            TimerKind::NickRecovery => {
                self.timers.nick_recovery = None;
                self.nick_recovery_tick(cx);
            }
            TimerKind::LoginTimeout | TimerKind::ExpireCalls => {}
        }
        Ok(())
    }

    fn on_relay(&mut self, cx: &mut Context<'_>, message: RelayMessage) -> Result<()> {
        if self.state != IrcState::Active || !self.perform_done {
            debug!(channel = %message.target.channel, "Not registered yet, dropping relay");
            return Ok(());
        }
        let Some(channel) = self.channel(&message.target.channel) else {
            debug!(channel = %message.target.channel, "Relay for unconfigured channel dropped");
            return Ok(());
        };
        let Some(text) = message.text.as_deref() else {
            return Ok(());
        };

        let channel = channel.name.clone();
        for line in text.lines().filter(|line| !line.trim().is_empty()) {
            for chunk in split_message(line, MAX_MESSAGE_BYTES) {
                self.send_line(cx, format!("PRIVMSG {} :{}", channel, chunk));
            }
        }
        Ok(())
    }

    fn on_disconnect(&mut self, cx: &mut Context<'_>, reason: &str) -> Result<()> {
        self.stopped = true;
        if let Some(callback) = self.relay.take() {
            cx.unbind_relay(EndpointKind::Irc, &self.config.name, &callback);
        }
        if self.socket.is_some() {
            info!("Disconnecting: {}", reason);
        }
        self.drop_connection(cx, Some(reason));
        Ok(())
    }
}
