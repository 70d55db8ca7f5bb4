//! Message formatting for relayed chat lines.
//!
//! Handles placeholder substitution in message format strings.
//! Supports placeholders: %time, %prefix, %user, %message, %channel

use chrono::Local;

/// Default format for channel messages.
pub const DEFAULT_MESSAGE_FORMAT: &str = "%prefix <%user> %message";

/// Default format for CTCP ACTION (`/me`) messages.
pub const DEFAULT_ACTION_FORMAT: &str = "%prefix * %user %message";

/// Message formatter that substitutes placeholders in format strings.
#[derive(Debug, Clone)]
pub struct MessageFormatter {
    format: String,
}

impl MessageFormatter {
    pub fn new(format: impl Into<String>) -> Self {
        Self {
            format: format.into(),
        }
    }

    pub fn message_default() -> Self {
        Self::new(DEFAULT_MESSAGE_FORMAT)
    }

    pub fn action_default() -> Self {
        Self::new(DEFAULT_ACTION_FORMAT)
    }

    /// Format a message with the given context.
    ///
    /// Leading whitespace left by an empty `%prefix` is trimmed.
    pub fn format(&self, ctx: &FormatContext) -> String {
        let time = get_time();
        let placeholders: [(&str, &str); 5] = [
            ("%time", time.as_str()),
            ("%prefix", ctx.prefix.as_str()),
            ("%user", ctx.user.as_str()),
            ("%message", ctx.message.as_str()),
            ("%channel", ctx.channel.as_str()),
        ];

        // Single pass, so substituted text is never expanded again.
        let mut out = String::with_capacity(self.format.len() + ctx.message.len());
        let mut rest = self.format.as_str();
        while let Some(pos) = rest.find('%') {
            out.push_str(&rest[..pos]);
            rest = &rest[pos..];
            match placeholders.iter().find(|(name, _)| rest.starts_with(name)) {
                Some((name, value)) => {
                    out.push_str(value);
                    rest = &rest[name.len()..];
                }
                None => {
                    out.push('%');
                    rest = &rest[1..];
                }
            }
        }
        out.push_str(rest);
        out.trim_start().to_string()
    }
}

/// Context for message formatting.
#[derive(Debug, Clone, Default)]
pub struct FormatContext {
    pub user: String,
    pub message: String,
    pub channel: String,
    pub prefix: String,
}

impl FormatContext {
    pub fn new(user: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            message: message.into(),
            ..Default::default()
        }
    }

    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = channel.into();
        self
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }
}

/// Get the current time as HH:MM:SS string.
fn get_time() -> String {
    Local::now().format("%H:%M:%S").to_string()
}

/// Join a prefix and a line with a single space, tolerating an empty prefix.
pub fn prefixed(prefix: &str, line: &str) -> String {
    if prefix.is_empty() {
        line.to_string()
    } else {
        format!("{} {}", prefix, line)
    }
}

/// Find the last UTF-8 char boundary at or before `byte_index` in `s`.
fn floor_char_boundary(s: &str, byte_index: usize) -> usize {
    if byte_index >= s.len() {
        return s.len();
    }
    let mut i = byte_index;
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

/// Split a message into chunks that fit within the max length (in bytes).
///
/// Tries to split on word boundaries when possible. Never splits in the
/// middle of a multi-byte UTF-8 character.
pub fn split_message(message: &str, max_len: usize) -> Vec<String> {
    if message.len() <= max_len {
        return vec![message.to_string()];
    }

    let mut chunks = Vec::new();
    let mut remaining = message;

    while !remaining.is_empty() {
        remaining = remaining.trim_start();
        if remaining.is_empty() {
            break;
        }

        if remaining.len() <= max_len {
            chunks.push(remaining.to_string());
            break;
        }

        let split_at = floor_char_boundary(remaining, max_len);

        // Always make progress, even if the first char is wider than max_len.
        if split_at == 0 {
            let first_char_end = remaining
                .char_indices()
                .nth(1)
                .map(|(i, _)| i)
                .unwrap_or(remaining.len());
            chunks.push(remaining[..first_char_end].to_string());
            remaining = &remaining[first_char_end..];
            continue;
        }

        let chunk = &remaining[..split_at];
        match chunk.rfind(' ') {
            Some(space_idx) if space_idx > 0 => {
                chunks.push(remaining[..space_idx].to_string());
                remaining = &remaining[space_idx + 1..];
            }
            _ => {
                chunks.push(chunk.to_string());
                remaining = &remaining[split_at..];
            }
        }
    }

    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_message_format() {
        let formatter = MessageFormatter::message_default();
        let ctx = FormatContext::new("nick", "hello").with_prefix("[IRC]");
        assert_eq!(formatter.format(&ctx), "[IRC] <nick> hello");
    }

    #[test]
    fn test_default_action_format() {
        let formatter = MessageFormatter::action_default();
        let ctx = FormatContext::new("nick", "waves").with_prefix("[IRC]");
        assert_eq!(formatter.format(&ctx), "[IRC] * nick waves");
    }

    #[test]
    fn test_empty_prefix_is_trimmed() {
        let formatter = MessageFormatter::message_default();
        let ctx = FormatContext::new("nick", "hello");
        assert_eq!(formatter.format(&ctx), "<nick> hello");
    }

    #[test]
    fn test_format_with_channel_and_time() {
        let formatter = MessageFormatter::new("[%time] %channel %user: %message");
        let ctx = FormatContext::new("nick", "Test").with_channel("#a");
        let result = formatter.format(&ctx);
        assert!(result.ends_with("#a nick: Test"));
        assert!(result.starts_with('['));
    }

    #[test]
    fn test_message_placeholders_not_expanded_twice() {
        let formatter = MessageFormatter::message_default();
        let ctx = FormatContext::new("nick", "say %user please");
        assert_eq!(formatter.format(&ctx), "<nick> say %user please");
    }

    #[test]
    fn test_prefixed() {
        assert_eq!(prefixed("[mc1]", "Alice joined the game"), "[mc1] Alice joined the game");
        assert_eq!(prefixed("", "Alice"), "Alice");
    }

    #[test]
    fn test_split_message_short() {
        assert_eq!(split_message("Hello world", 50), vec!["Hello world"]);
    }

    #[test]
    fn test_split_message_on_space() {
        let chunks = split_message("Hello beautiful world", 15);
        assert_eq!(chunks, vec!["Hello", "beautiful world"]);
    }

    #[test]
    fn test_split_message_no_space() {
        let chunks = split_message("HelloBeautifulWorld", 10);
        assert_eq!(chunks, vec!["HelloBeaut", "ifulWorld"]);
    }

    #[test]
    fn test_split_message_multibyte_utf8() {
        // "café" is 5 bytes; a limit of 4 lands inside 'é'.
        let chunks = split_message("café rest", 4);
        assert_eq!(chunks, vec!["caf", "é", "rest"]);
    }
}
