//! IRC line grammar.
//!
//! `[:source] COMMAND [param ...] [:trailing param]`, where the source splits
//! into `nick!ident@host`. IRCv3 message tags (`@tag=value ...`) are skipped.

use std::fmt;
use std::str::FromStr;

use crate::common::error::ProtocolError;

/// Origin of an IRC line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IrcSource {
    /// Raw source token without the leading ':'.
    pub full: String,
    /// Nickname or server name.
    pub name: String,
    pub ident: Option<String>,
    pub host: Option<String>,
}

impl IrcSource {
    pub fn parse(token: &str) -> Self {
        let (rest, host) = match token.split_once('@') {
            Some((rest, host)) => (rest, Some(host.to_string())),
            None => (token, None),
        };
        let (name, ident) = match rest.split_once('!') {
            Some((name, ident)) => (name, Some(ident.to_string())),
            None => (rest, None),
        };
        Self {
            full: token.to_string(),
            name: name.to_string(),
            ident,
            host,
        }
    }
}

/// A parsed IRC line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IrcMessage {
    pub source: Option<IrcSource>,
    /// Upper-cased command or numeric.
    pub command: String,
    pub params: Vec<String>,
}

impl IrcMessage {
    pub fn param(&self, index: usize) -> Option<&str> {
        self.params.get(index).map(String::as_str)
    }

    /// Last parameter, which carries free text for most commands.
    pub fn trailing(&self) -> Option<&str> {
        self.params.last().map(String::as_str)
    }

    pub fn source_name(&self) -> Option<&str> {
        self.source.as_ref().map(|source| source.name.as_str())
    }
}

impl FromStr for IrcMessage {
    type Err = ProtocolError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut rest = line.trim_end_matches(['\r', '\n']).trim_start_matches(' ');

        if rest.starts_with('@') {
            rest = match rest.split_once(' ') {
                Some((_, after)) => after.trim_start_matches(' '),
                None => "",
            };
        }

        let mut source = None;
        if let Some(stripped) = rest.strip_prefix(':') {
            let (token, after) = stripped.split_once(' ').unwrap_or((stripped, ""));
            if token.is_empty() {
                return Err(ProtocolError::InvalidLine {
                    message: "empty source prefix".to_string(),
                });
            }
            source = Some(IrcSource::parse(token));
            rest = after.trim_start_matches(' ');
        }

        let (command, mut rest) = rest.split_once(' ').unwrap_or((rest, ""));
        if command.is_empty() {
            return Err(ProtocolError::InvalidLine {
                message: format!("missing command in '{}'", line),
            });
        }

        let mut params = Vec::new();
        loop {
            rest = rest.trim_start_matches(' ');
            if rest.is_empty() {
                break;
            }
            if let Some(trailing) = rest.strip_prefix(':') {
                params.push(trailing.to_string());
                break;
            }
            match rest.split_once(' ') {
                Some((param, after)) => {
                    params.push(param.to_string());
                    rest = after;
                }
                None => {
                    params.push(rest.to_string());
                    break;
                }
            }
        }

        Ok(Self {
            source,
            command: command.to_uppercase(),
            params,
        })
    }
}

impl fmt::Display for IrcMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(source) = &self.source {
            write!(f, ":{} ", source.full)?;
        }
        f.write_str(&self.command)?;
        if let Some((last, middle)) = self.params.split_last() {
            for param in middle {
                write!(f, " {}", param)?;
            }
            if last.is_empty() || last.contains(' ') || last.starts_with(':') {
                write!(f, " :{}", last)?;
            } else {
                write!(f, " {}", last)?;
            }
        }
        Ok(())
    }
}
