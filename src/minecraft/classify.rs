//! Built-in classifiers for server log events.
//!
//! Each classifier owns a set of logger names and a pattern set. It only
//! looks at raw events (messages with no text yet) from its own loggers and,
//! on a hit, rewrites the event into a prefixed line rendered for the target.

use std::sync::LazyLock;

use fancy_regex::{Captures, Regex};
use tracing::warn;

use crate::bridge::formatter::prefixed;
use crate::bridge::{FilterOutcome, RelayMessage};
use crate::common::error::FilterError;
use crate::minecraft::colors::translate_for;
use crate::protocol::udplog::LogEvent;

pub const SERVER_LOGGER: &str = "net.minecraft.server.MinecraftServer";
pub const WATCHDOG_LOGGER: &str = "net.minecraft.server.dedicated.ServerHangWatchdog";
/// Logger the authentication layer reports rejected logins under.
pub const AUTH_LOGGER: &str = "mg";
pub const MAP_RENDER_LOGGERS: [&str; 2] = ["crontab.overviewer", "crontab.overviewerpoi"];

const DEATH_PATTERNS: &[&str] = &[
    r"^.+? fell off (a ladder|some vines|some weeping vines|some twisting vines|scaffolding)$",
    r"^.+? fell (out of the water|from a high place|while climbing)$",
    r"^.+? was doomed to fall( by .+?)?$",
    r"^.+? fell too far and was finished by .+?$",
    r"^.+? was struck by lightning( whilst fighting .+?)?$",
    r"^.+? went up in flames$",
    r"^.+? walked into fire whilst fighting .+?$",
    r"^.+? burned to death$",
    r"^.+? was burnt to a crisp whilst fighting .+?$",
    r"^.+? tried to swim in lava( to escape .+?)?$",
    r"^.+? discovered (the )?floor was lava$",
    r"^.+? walked into danger zone due to .+?$",
    r"^.+? suffocated in a wall( whilst fighting .+?)?$",
    r"^.+? was squished too much$",
    r"^.+? drowned( whilst trying to escape .+?)?$",
    r"^.+? starved to death( whilst fighting .+?)?$",
    r"^.+? was pricked to death$",
    r"^.+? walked into a cactus whilst trying to escape .+?$",
    r"^.+? died( because of .+?)?$",
    r"^.+? blew up$",
    r"^.+? was blown up by .+?$",
    r"^.+? was killed by magic$",
    r"^.+? was killed by .+?$",
    r"^.+? was killed trying to hurt .+?$",
    r"^.+? withered away( whilst fighting .+?)?$",
    r"^.+? was squashed by a falling (anvil|block)$",
    r"^.+? was (slain|shot|fireballed|pummeled|impaled|stung|skewered) by .+?$",
    r"^.+? hit the ground too hard( whilst trying to escape .+?)?$",
    r"^.+? fell out of the world$",
    r"^.+? didn't want to live in the same world as .+?$",
    r"^.+? was roasted in dragon ?breath$",
    r"^.+? experienced kinetic energy( whilst trying to escape .+?)?$",
    r"^.+? froze to death$",
    r"^.+? was obliterated by a sonically-charged shriek$",
];

const CHAT_SHAPED: &str = r"^([\[<][^ ]+?[\]>]|\*) ";
const CHAT_MESSAGE: &str = r"(?s)^([\[<])([^ ]+?)([\]>]) (.*)$";
const CHAT_ACTION: &str = r"(?s)^\* ([^ ]+) (.*)$";
const ACHIEVEMENT: &str =
    r"^([^\s]+?) has (lost|just earned) the achievement \[.*?\]$";
const ADVANCEMENT: &str =
    r"^([^\s]+?) has (made the advancement|completed the challenge|reached the goal) \[.*?\]$";
const JOIN_PART: &str = r"^([^\s]+) (\(formerly known as .+?\) )?(?:joined|left) the game$";
const WHITELIST_REJECTED: &str = r"(?s)^com.mojang.authlib.GameProfile.*?id=([-a-f0-9]+?),.*?name=([^,]+?),.+?\(/([0-9.]+?):([0-9]+?)\) lost connection: You are not white-listed on this server!.*$";
const WATCHDOG_TICK: &str =
    r"^A single server tick took ([0-9.]+) seconds \(should be max ([0-9.]+)\)$";
const WATCHDOG_CRASH: &str = r"^Considering it to be crashed, server will forcibly shutdown\.?$";

/// Sender name the server uses for console commands; never echoed back.
const RCON_SENDER: &str = "Rcon";

/// Compile a list of static patterns, skipping (and logging) invalid ones.
fn compile_all(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .filter_map(|pattern| match Regex::new(pattern) {
            Ok(regex) => Some(regex),
            Err(e) => {
                warn!("Invalid classifier pattern '{}': {}", pattern, e);
                None
            }
        })
        .collect()
}

fn compile_one(pattern: &str) -> Option<Regex> {
    compile_all(&[pattern]).into_iter().next()
}

static DEATHS: LazyLock<Vec<Regex>> = LazyLock::new(|| compile_all(DEATH_PATTERNS));
static CHAT_SHAPE: LazyLock<Option<Regex>> = LazyLock::new(|| compile_one(CHAT_SHAPED));
static CHAT: LazyLock<Option<Regex>> = LazyLock::new(|| compile_one(CHAT_MESSAGE));
static ACTION: LazyLock<Option<Regex>> = LazyLock::new(|| compile_one(CHAT_ACTION));
static MILESTONES: LazyLock<Vec<Regex>> =
    LazyLock::new(|| compile_all(&[ACHIEVEMENT, ADVANCEMENT]));
static JOINS: LazyLock<Option<Regex>> = LazyLock::new(|| compile_one(JOIN_PART));
static WHITELIST: LazyLock<Option<Regex>> = LazyLock::new(|| compile_one(WHITELIST_REJECTED));
static WATCHDOG: LazyLock<Vec<Regex>> =
    LazyLock::new(|| compile_all(&[WATCHDOG_TICK, WATCHDOG_CRASH]));

fn regex_error(regex: &Regex, e: fancy_regex::Error) -> FilterError {
    FilterError::Regex {
        pattern: regex.as_str().to_string(),
        message: e.to_string(),
    }
}

fn is_match(regex: &Regex, text: &str) -> Result<bool, FilterError> {
    regex.is_match(text).map_err(|e| regex_error(regex, e))
}

fn captures<'t>(regex: &Regex, text: &'t str) -> Result<Option<Captures<'t>>, FilterError> {
    regex.captures(text).map_err(|e| regex_error(regex, e))
}

fn group<'t>(caps: &Captures<'t>, index: usize) -> &'t str {
    caps.get(index).map(|m| m.as_str()).unwrap_or("")
}

fn any_match(regexes: &[Regex], text: &str) -> Result<bool, FilterError> {
    for regex in regexes {
        if is_match(regex, text)? {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Built-in log classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogClassifier {
    Death,
    JoinPart,
    Chat,
    Watchdog,
    MapRender,
}

impl LogClassifier {
    /// Default chain for classified event relays.
    pub const ALL: [LogClassifier; 5] = [
        LogClassifier::Death,
        LogClassifier::JoinPart,
        LogClassifier::Chat,
        LogClassifier::Watchdog,
        LogClassifier::MapRender,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            LogClassifier::Death => "death",
            LogClassifier::JoinPart => "joinpart",
            LogClassifier::Chat => "chat",
            LogClassifier::Watchdog => "watchdog",
            LogClassifier::MapRender => "maprender",
        }
    }

    pub fn owns(&self, logger: &str) -> bool {
        match self {
            LogClassifier::Death | LogClassifier::Chat => logger == SERVER_LOGGER,
            LogClassifier::JoinPart => logger == SERVER_LOGGER || logger == AUTH_LOGGER,
            LogClassifier::Watchdog => logger == WATCHDOG_LOGGER,
            LogClassifier::MapRender => MAP_RENDER_LOGGERS.contains(&logger),
        }
    }

    /// The line this classifier renders for `event`, still in `§` format.
    pub fn describe(&self, event: &LogEvent) -> Result<Option<String>, FilterError> {
        if !self.owns(&event.logger) {
            return Ok(None);
        }
        let message = event.message.trim_end();

        match self {
            LogClassifier::Death => {
                if let Some(shape) = CHAT_SHAPE.as_ref() {
                    if is_match(shape, message)? {
                        return Ok(None);
                    }
                }
                Ok(any_match(&DEATHS, message)?.then(|| message.to_string()))
            }
            LogClassifier::JoinPart => {
                if event.logger == AUTH_LOGGER {
                    let Some(regex) = WHITELIST.as_ref() else {
                        return Ok(None);
                    };
                    return Ok(captures(regex, message)?.map(|caps| {
                        format!(
                            "*** Connection from {} rejected (not whitelisted: {})",
                            group(&caps, 3),
                            group(&caps, 2)
                        )
                    }));
                }
                match JOINS.as_ref() {
                    Some(regex) => Ok(is_match(regex, message)?.then(|| message.to_string())),
                    None => Ok(None),
                }
            }
            LogClassifier::Chat => {
                if let Some(regex) = CHAT.as_ref() {
                    if let Some(caps) = captures(regex, message)? {
                        if group(&caps, 2) == RCON_SENDER {
                            return Ok(None);
                        }
                        return Ok(Some(format!(
                            "{}{}{} {}",
                            group(&caps, 1),
                            group(&caps, 2),
                            group(&caps, 3),
                            group(&caps, 4)
                        )));
                    }
                }
                if let Some(regex) = ACTION.as_ref() {
                    if let Some(caps) = captures(regex, message)? {
                        if group(&caps, 1) == RCON_SENDER {
                            return Ok(None);
                        }
                        return Ok(Some(format!("* {} {}", group(&caps, 1), group(&caps, 2))));
                    }
                }
                Ok(any_match(&MILESTONES, message)?.then(|| message.to_string()))
            }
            LogClassifier::Watchdog => Ok(any_match(&WATCHDOG, message)?
                .then(|| format!("*** Server watchdog: {}", message))),
            LogClassifier::MapRender => {
                Ok((!message.is_empty()).then(|| message.to_string()))
            }
        }
    }

    /// Filter entry point: rewrite raw log events this classifier recognises.
    pub fn classify(&self, message: &RelayMessage) -> Result<FilterOutcome, FilterError> {
        // Already rendered by an earlier classifier in the chain.
        if message.text.is_some() {
            return Ok(FilterOutcome::NoMatch);
        }
        let Some(event) = message.log_event() else {
            return Ok(FilterOutcome::NoMatch);
        };

        match self.describe(event)? {
            Some(line) => {
                let line = translate_for(message.target.kind, &line);
                let text = prefixed(&message.target.prefix, &line);
                Ok(FilterOutcome::Match(Some(message.with_text(text))))
            }
            None => Ok(FilterOutcome::NoMatch),
        }
    }
}
