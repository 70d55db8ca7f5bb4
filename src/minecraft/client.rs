//! Minecraft server client: an RCON session for commands and a UDP listener
//! for log events, sharing one name on the relay bus.

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use anyhow::Result;
use bytes::BytesMut;
use fancy_regex::Regex;
use tokio::time::Instant;
use tokio_util::codec::{Decoder, Encoder};
use tracing::{debug, error, info, info_span, trace, warn, Span};

use crate::bridge::formatter::prefixed;
use crate::bridge::{
    EndpointKind, FilterRegistry, RelayCallback, RelayExtra, RelayFilter, RelayMessage,
    RelaySource, RelayTarget,
};
use crate::common::error::{ConfigError, ConnectionResult};
use crate::common::reconnect::{ReconnectConfig, ReconnectState};
use crate::config::types::{secs, MinecraftClientConfig};
use crate::minecraft::classify::LogClassifier;
use crate::minecraft::colors::{irc_to_minecraft, strip_irc, tellraw_components, translate_for};
use crate::minecraft::RelayStream;
use crate::protocol::rcon::{packet_type, RconCodec, RconPacket, AUTH_FAILED_ID};
use crate::protocol::udplog::{decode_datagram, LogEvent};
use crate::reactor::{Context, Endpoint, Readable, SocketToken, TimerHandle, TimerKind};

/// Shorthand typed in a bridged channel to ask for the player list.
pub const PLAYERS_QUERY: &str = "?players";

/// Target channel that sends plain `say` broadcasts instead of `tellraw`.
pub const SAY_CHANNEL: &str = "say";

const RCON_CHANNEL: &str = "rcon";
const UDP_CHANNEL: &str = "udp";

static PLAYER_LIST: LazyLock<Option<Regex>> = LazyLock::new(|| {
    match Regex::new(r"^(There are \d+(?:/| of a max of )\d+ players online:)(.*)$") {
        Ok(regex) => Some(regex),
        Err(e) => {
            warn!("Invalid player list pattern: {}", e);
            None
        }
    }
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MinecraftState {
    Disconnected,
    Connecting,
    Authenticating,
    Connected,
    /// Login was rejected. The client stays down until restarted.
    Failed,
}

/// What to do with the reply to an issued command.
#[derive(Debug, Clone)]
enum CallAction {
    PlayerList { reply_to: RelaySource },
}

#[derive(Debug, Clone)]
struct PendingCall {
    action: CallAction,
    issued_at: Instant,
    command: String,
}

struct RelayRule {
    stream: RelayStream,
    target: RelayTarget,
}

#[derive(Default)]
struct Timers {
    login: Option<TimerHandle>,
    expiry: Option<TimerHandle>,
    reconnect: Option<TimerHandle>,
}

/// Whether a call issued at `issued_at` has outlived `window` at `now`.
fn is_expired(issued_at: Instant, window: Duration, now: Instant) -> bool {
    issued_at + window <= now
}

/// Split a `list` reply into a header line and an optional player line.
fn player_list_lines(body: &str) -> Vec<String> {
    let body = body.trim();
    if let Some(regex) = PLAYER_LIST.as_ref() {
        match regex.captures(body) {
            Ok(Some(caps)) => {
                let header = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
                let players = caps.get(2).map(|m| m.as_str().trim()).unwrap_or_default();
                let mut lines = vec![header.to_string()];
                if !players.is_empty() {
                    lines.push(players.to_string());
                }
                return lines;
            }
            Ok(None) => {}
            Err(e) => debug!("Player list pattern failed: {}", e),
        }
    }
    body.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

pub struct MinecraftClient {
    config: MinecraftClientConfig,
    span: Span,
    state: MinecraftState,
    rules: Vec<RelayRule>,

    rcon: Option<SocketToken>,
    udp: Option<SocketToken>,
    codec: RconCodec,
    buffer: BytesMut,

    next_id: i32,
    pending: HashMap<i32, PendingCall>,

    timers: Timers,
    reconnect: ReconnectState,
    relay: Option<RelayCallback>,
    stopped: bool,
}

impl MinecraftClient {
    pub fn new(config: MinecraftClientConfig, filters: &FilterRegistry) -> Result<Self, ConfigError> {
        let default_prefix = format!("[{}]", config.name);
        let mut rules = Vec::with_capacity(config.relays.len());

        for rule in &config.relays {
            let stream = match rule.stream.as_deref() {
                None => RelayStream::default(),
                Some(value) => RelayStream::parse(value).ok_or_else(|| ConfigError::InvalidValue {
                    field: "stream".to_string(),
                    message: format!("'{}' is not one of: events, raw, rcon", value),
                })?,
            };
            let chain = match (&rule.filters, stream) {
                (Some(names), _) => filters.resolve(names)?,
                (None, RelayStream::Events) => {
                    LogClassifier::ALL.iter().copied().map(RelayFilter::Log).collect()
                }
                (None, _) => Vec::new(),
            };
            let target = RelayTarget::from_rule(rule, &default_prefix, chain)?;
            if target.kind == EndpointKind::Minecraft && target.name == config.name {
                warn!(
                    client = %config.name,
                    "Skipping relay rule that points back at this server"
                );
                continue;
            }
            rules.push(RelayRule { stream, target });
        }

        let reconnect = ReconnectState::new(ReconnectConfig::fixed(secs(config.timing.reconnect)));

        Ok(Self {
            span: info_span!("minecraft", client = %config.name),
            config,
            state: MinecraftState::Disconnected,
            rules,
            rcon: None,
            udp: None,
            codec: RconCodec::new(),
            buffer: BytesMut::new(),
            next_id: 0,
            pending: HashMap::new(),
            timers: Timers::default(),
            reconnect,
            relay: None,
            stopped: false,
        })
    }

    #[cfg(test)]
    pub fn state(&self) -> MinecraftState {
        self.state
    }

    #[cfg(test)]
    pub fn pending_calls(&self) -> usize {
        self.pending.len()
    }

    fn source(&self, channel: &str) -> RelaySource {
        RelaySource::new(EndpointKind::Minecraft, self.config.name.clone(), channel)
    }

    /// Request ids count up from 1 and wrap, skipping 0 and the failure id.
    fn next_request_id(&mut self) -> i32 {
        loop {
            self.next_id = self.next_id.wrapping_add(1);
            if self.next_id != 0 && self.next_id != AUTH_FAILED_ID {
                return self.next_id;
            }
        }
    }

    fn connect(&mut self, cx: &mut Context<'_>) {
        self.reset_connection();
        self.state = MinecraftState::Connecting;
        info!(
            "Connecting to RCON at {}:{}...",
            self.config.rcon.host, self.config.rcon.port
        );
        self.rcon = Some(cx.open_tcp(&self.config.rcon.host, self.config.rcon.port));
        if self.udp.is_none() {
            self.udp = Some(cx.bind_udp(&self.config.udp.host, self.config.udp.port));
        }
    }

    fn reset_connection(&mut self) {
        self.buffer.clear();
        self.codec.reset();
        self.pending.clear();
    }

    fn send_packet(&mut self, cx: &mut Context<'_>, packet: RconPacket) {
        let Some(token) = self.rcon else {
            return;
        };
        if packet.kind == packet_type::AUTH {
            debug!(id = packet.id, ">> <login>");
        } else {
            debug!(id = packet.id, ">> {}", packet.body);
        }
        let mut buf = BytesMut::new();
        if let Err(e) = self.codec.encode(packet, &mut buf) {
            warn!("Failed to encode packet: {}", e);
            return;
        }
        if let Err(e) = cx.send(token, buf.freeze()) {
            warn!("Failed to send packet: {}", e);
        }
    }

    /// Issue a command. With an action, the reply is routed back to it.
    fn command(&mut self, cx: &mut Context<'_>, command: String, action: Option<CallAction>) {
        let id = self.next_request_id();
        self.send_packet(cx, RconPacket::command(id, &command));
        if let Some(action) = action {
            self.pending.insert(
                id,
                PendingCall {
                    action,
                    issued_at: Instant::now(),
                    command,
                },
            );
        }
    }

    /// Close both channels and cancel every timer.
    fn drop_connection(&mut self, cx: &mut Context<'_>) {
        cx.cancel_timer(&mut self.timers.login);
        cx.cancel_timer(&mut self.timers.expiry);
        cx.cancel_timer(&mut self.timers.reconnect);
        if let Some(token) = self.rcon.take() {
            cx.close(token);
        }
        if let Some(token) = self.udp.take() {
            cx.close(token);
        }
        self.reset_connection();
        if self.state != MinecraftState::Failed {
            self.state = MinecraftState::Disconnected;
        }
    }

    fn schedule_reconnect(&mut self, cx: &mut Context<'_>) {
        if self.stopped || self.state == MinecraftState::Failed {
            return;
        }
        self.state = MinecraftState::Disconnected;
        let delay = self.reconnect.next_delay();
        info!(
            attempt = self.reconnect.attempts(),
            "Reconnecting in {} seconds...",
            delay.as_secs()
        );
        cx.cancel_timer(&mut self.timers.reconnect);
        self.timers.reconnect = Some(cx.schedule(delay, TimerKind::Reconnect));
    }

    fn fail_connection(&mut self, cx: &mut Context<'_>) {
        self.drop_connection(cx);
        self.schedule_reconnect(cx);
    }

    fn handle_packet(&mut self, cx: &mut Context<'_>, packet: RconPacket) {
        trace!(id = packet.id, kind = packet.kind, "<< {}", packet.body);
        match self.state {
            MinecraftState::Authenticating => {
                if packet.is_auth_failure() {
                    error!("RCON login rejected, check the password. Not retrying");
                    self.state = MinecraftState::Failed;
                    self.drop_connection(cx);
                } else if packet.kind == packet_type::AUTH_RESPONSE {
                    self.logged_in(cx);
                } else {
                    debug!(id = packet.id, kind = packet.kind, "Ignoring packet during login");
                }
            }
            MinecraftState::Connected => {
                if packet.kind != packet_type::RESPONSE_VALUE {
                    debug!(id = packet.id, kind = packet.kind, "Ignoring unexpected packet");
                    return;
                }
                match self.pending.remove(&packet.id) {
                    Some(call) => self.run_call(cx, call, &packet.body),
                    None => trace!(id = packet.id, "Reply without a pending call"),
                }
            }
            _ => {}
        }
    }

    fn logged_in(&mut self, cx: &mut Context<'_>) {
        info!("RCON login accepted");
        self.state = MinecraftState::Connected;
        cx.cancel_timer(&mut self.timers.login);
        self.reconnect.reset();
        self.arm_expiry(cx);

        let source = self.source(RCON_CHANNEL);
        for rule in &self.rules {
            cx.bus().call(
                None,
                &rule.target.unfiltered(),
                source.clone(),
                RelayExtra::Connected,
            );
        }
    }

    fn arm_expiry(&mut self, cx: &mut Context<'_>) {
        cx.cancel_timer(&mut self.timers.expiry);
        let window = secs(self.config.timing.call_expiry);
        self.timers.expiry = Some(cx.schedule(window, TimerKind::ExpireCalls));
    }

    /// Drop pending calls whose window has passed at `now`. Returns how many.
    fn expire_calls(&mut self, now: Instant) -> usize {
        let window = secs(self.config.timing.call_expiry);
        let before = self.pending.len();
        self.pending.retain(|id, call| {
            let expired = is_expired(call.issued_at, window, now);
            if expired {
                info!(id, command = %call.command, "Dropping unanswered command");
            }
            !expired
        });
        before - self.pending.len()
    }

    fn run_call(&mut self, cx: &mut Context<'_>, call: PendingCall, body: &str) {
        match call.action {
            CallAction::PlayerList { reply_to } => {
                let lines = player_list_lines(body);
                let source = self.source(RCON_CHANNEL);
                // The asking channel's rules, plus every rule on the rcon stream.
                for rule in &self.rules {
                    let asked = rule
                        .target
                        .addresses(reply_to.kind, &reply_to.name, &reply_to.channel);
                    if !asked && rule.stream != RelayStream::Rcon {
                        continue;
                    }
                    let target = rule.target.unfiltered();
                    for line in &lines {
                        let text = prefixed(&target.prefix, &translate_for(target.kind, line));
                        cx.bus()
                            .call(Some(text), &target, source.clone(), RelayExtra::PlayerList);
                    }
                }
            }
        }
    }

    fn handle_datagram(&mut self, cx: &mut Context<'_>, data: &[u8], from: SocketAddr) {
        let event = match decode_datagram(data) {
            Ok(event) => Arc::new(event),
            Err(e) => {
                debug!(%from, "Dropping undecodable log datagram: {}", e);
                return;
            }
        };
        self.publish_event(cx, event);
    }

    fn publish_event(&self, cx: &mut Context<'_>, event: Arc<LogEvent>) {
        trace!(logger = %event.logger, "<< {}", event.message);
        let source = self.source(UDP_CHANNEL);
        for rule in &self.rules {
            let target = match rule.stream {
                RelayStream::Raw => rule.target.unfiltered(),
                RelayStream::Events => rule.target.clone(),
                RelayStream::Rcon => continue,
            };
            cx.bus()
                .call(None, &target, source.clone(), RelayExtra::Log(event.clone()));
        }
    }

    fn is_players_query(message: &RelayMessage, text: &str) -> bool {
        if message.source.kind != EndpointKind::Irc {
            return false;
        }
        let raw = message
            .irc_line()
            .and_then(|line| line.trailing())
            .unwrap_or(text);
        strip_irc(raw).trim_start().starts_with(PLAYERS_QUERY)
    }

    fn broadcast(&mut self, cx: &mut Context<'_>, channel: &str, text: &str) {
        let text = irc_to_minecraft(text);
        for line in text.lines().filter(|line| !line.trim().is_empty()) {
            let command = if channel.eq_ignore_ascii_case(SAY_CHANNEL) {
                format!("say {}", line)
            } else {
                format!(
                    "tellraw @a {}",
                    tellraw_components(line, self.config.rich_text)
                )
            };
            self.command(cx, command, None);
        }
    }
}

impl Endpoint for MinecraftClient {
    fn kind(&self) -> EndpointKind {
        EndpointKind::Minecraft
    }

    fn name(&self) -> &str {
        &self.config.name
    }

    fn span(&self) -> &Span {
        &self.span
    }

    fn start(&mut self, cx: &mut Context<'_>) -> Result<()> {
        self.stopped = false;
        self.relay = cx.bind_relay(EndpointKind::Minecraft, &self.config.name);
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
        if self.udp == Some(token) {
            match result {
                Ok(addr) => info!(%addr, "Listening for log events"),
                Err(e) => {
                    // Retried with the next connect cycle.
                    warn!("Failed to bind log listener: {}", e);
                    self.udp = None;
                }
            }
            return Ok(());
        }
        if self.rcon != Some(token) {
            return Ok(());
        }
        match result {
            Ok(addr) => {
                info!(%addr, "Connected, logging in");
                self.state = MinecraftState::Authenticating;
                let delay = secs(self.config.timing.login_timeout);
                self.timers.login = Some(cx.schedule(delay, TimerKind::LoginTimeout));
                let id = self.next_request_id();
                let password = self.config.rcon.password.clone();
                self.send_packet(cx, RconPacket::auth(id, &password));
            }
            Err(e) => {
                warn!("RCON connection failed: {}", e);
                self.rcon = None;
                self.schedule_reconnect(cx);
            }
        }
        Ok(())
    }

    fn on_readable(&mut self, cx: &mut Context<'_>, token: SocketToken, data: Readable) -> Result<()> {
        if self.udp == Some(token) {
            if let Readable::Datagram { data, from } = data {
                self.handle_datagram(cx, &data, from);
            }
            return Ok(());
        }
        if self.rcon != Some(token) {
            return Ok(());
        }
        match data {
            Readable::Stream(bytes) => {
                self.buffer.extend_from_slice(&bytes);
                loop {
                    match self.codec.decode(&mut self.buffer) {
                        Ok(Some(packet)) => {
                            self.handle_packet(cx, packet);
                            if self.rcon != Some(token) {
                                break;
                            }
                        }
                        Ok(None) => break,
                        // The bad frame is already consumed.
                        Err(e) => warn!("Dropping malformed RCON frame: {}", e),
                    }
                }
            }
            Readable::Closed => {
                warn!("RCON connection closed by server");
                self.fail_connection(cx);
            }
            Readable::Datagram { .. } => {}
        }
        Ok(())
    }

    fn on_error(&mut self, cx: &mut Context<'_>, token: SocketToken, error: io::Error) -> Result<()> {
        if self.rcon == Some(token) {
            warn!("RCON socket error: {}", error);
            self.fail_connection(cx);
        } else if self.udp == Some(token) {
            warn!("Log listener error: {}", error);
            cx.close(token);
            self.udp = None;
        }
        Ok(())
    }

    fn on_timer(&mut self, cx: &mut Context<'_>, kind: TimerKind) -> Result<()> {
        match kind {
            TimerKind::Reconnect => {
                self.timers.reconnect = None;
                if !self.stopped && self.state == MinecraftState::Disconnected {
                    self.connect(cx);
                }
            }
            TimerKind::LoginTimeout => {
                self.timers.login = None;
                if self.state == MinecraftState::Authenticating {
                    warn!(
                        "No login response in {} seconds",
                        self.config.timing.login_timeout
                    );
                    self.fail_connection(cx);
                }
            }
            TimerKind::ExpireCalls => {
                self.timers.expiry = None;
                let dropped = self.expire_calls(Instant::now());
                if dropped > 0 {
                    debug!(dropped, "Expired pending calls");
                }
                if self.state == MinecraftState::Connected {
                    self.arm_expiry(cx);
                }
            }
            TimerKind::Keepalive
            | TimerKind::CapEnd
            | TimerKind::Perform
            | TimerKind::NickRecovery => {}
        }
        Ok(())
    }

    fn on_relay(&mut self, cx: &mut Context<'_>, message: RelayMessage) -> Result<()> {
        if self.state != MinecraftState::Connected {
            debug!("Not logged in yet, dropping relay");
            return Ok(());
        }
        let Some(text) = message.text.as_deref() else {
            return Ok(());
        };

        if Self::is_players_query(&message, text) {
            let action = CallAction::PlayerList {
                reply_to: message.source.clone(),
            };
            self.command(cx, "list".to_string(), Some(action));
            return Ok(());
        }
        self.broadcast(cx, &message.target.channel, text);
        Ok(())
    }

    fn on_disconnect(&mut self, cx: &mut Context<'_>, reason: &str) -> Result<()> {
        self.stopped = true;
        if let Some(callback) = self.relay.take() {
            cx.unbind_relay(EndpointKind::Minecraft, &self.config.name, &callback);
        }
        if self.rcon.is_some() {
            info!("Disconnecting: {}", reason);
        }
        self.drop_connection(cx);
        Ok(())
    }
}
