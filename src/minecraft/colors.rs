//! Translation between Minecraft `§` formatting codes and IRC control codes,
//! plus the JSON text components used by `tellraw`.

use serde_json::{json, Value};

use crate::bridge::EndpointKind;

pub const SECTION: char = '§';

const IRC_BOLD: char = '\x02';
const IRC_COLOR: char = '\x03';
const IRC_RESET: char = '\x0F';
const IRC_MONOSPACE: char = '\x11';
const IRC_REVERSE: char = '\x16';
const IRC_ITALIC: char = '\x1D';
const IRC_STRIKETHROUGH: char = '\x1E';
const IRC_UNDERLINE: char = '\x1F';

/// Minecraft color digit -> IRC color number, by index 0-f.
const MC_TO_IRC_COLOR: [&str; 16] = [
    "01", "02", "03", "10", "05", "06", "07", "15", "14", "12", "09", "11", "04", "13", "08", "00",
];

/// IRC color number -> Minecraft color digit.
const IRC_TO_MC_COLOR: [char; 16] = [
    'f', '0', '1', '2', 'c', '4', '5', '6', 'e', 'a', '3', 'b', '9', 'd', '8', '7',
];

/// IRC equivalent of one Minecraft code, or `None` if it has no counterpart.
fn irc_for_code(code: char) -> Option<String> {
    let code = code.to_ascii_lowercase();
    if let Some(digit) = code.to_digit(16) {
        return Some(format!("{}{}", IRC_COLOR, MC_TO_IRC_COLOR[digit as usize]));
    }
    match code {
        'l' => Some(IRC_BOLD.to_string()),
        'n' => Some(IRC_UNDERLINE.to_string()),
        'o' => Some(IRC_ITALIC.to_string()),
        'm' => Some(IRC_STRIKETHROUGH.to_string()),
        'r' => Some(IRC_RESET.to_string()),
        // 'k' (obfuscated) has no IRC counterpart.
        _ => None,
    }
}

fn is_minecraft_code(code: char) -> bool {
    matches!(code.to_ascii_lowercase(), '0'..='9' | 'a'..='f' | 'k'..='o' | 'r')
}

/// Replace `§` codes with IRC control codes.
pub fn minecraft_to_irc(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if c != SECTION {
            out.push(c);
            continue;
        }
        match chars.peek().copied() {
            Some(code) if is_minecraft_code(code) => {
                chars.next();
                if let Some(irc) = irc_for_code(code) {
                    out.push_str(&irc);
                }
            }
            _ => out.push(c),
        }
    }
    out
}

/// Read up to two ASCII digits.
fn take_color_number(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> Option<usize> {
    let mut value: Option<usize> = None;
    for _ in 0..2 {
        match chars.peek().and_then(|c| c.to_digit(10)) {
            Some(digit) => {
                chars.next();
                value = Some(value.unwrap_or(0) * 10 + digit as usize);
            }
            None => break,
        }
    }
    value
}

/// Consume an IRC color sequence after `\x03`. Returns the foreground color.
fn take_irc_color(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> Option<usize> {
    let foreground = take_color_number(chars)?;
    if chars.peek() == Some(&',') {
        let mut lookahead = chars.clone();
        lookahead.next();
        if lookahead.peek().is_some_and(|c| c.is_ascii_digit()) {
            chars.next();
            take_color_number(chars);
        }
    }
    Some(foreground)
}

/// Replace IRC control codes with `§` codes. Background colors are dropped.
pub fn irc_to_minecraft(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            IRC_COLOR => match take_irc_color(&mut chars) {
                Some(color) if color < IRC_TO_MC_COLOR.len() => {
                    out.push(SECTION);
                    out.push(IRC_TO_MC_COLOR[color]);
                }
                Some(_) => {}
                None => {
                    out.push(SECTION);
                    out.push('r');
                }
            },
            IRC_BOLD => out.push_str("§l"),
            IRC_ITALIC => out.push_str("§o"),
            IRC_UNDERLINE => out.push_str("§n"),
            IRC_STRIKETHROUGH => out.push_str("§m"),
            IRC_RESET => out.push_str("§r"),
            IRC_REVERSE | IRC_MONOSPACE => {}
            _ => out.push(c),
        }
    }
    out
}

/// Remove every IRC formatting control code.
pub fn strip_irc(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            IRC_COLOR => {
                take_irc_color(&mut chars);
            }
            IRC_BOLD | IRC_ITALIC | IRC_UNDERLINE | IRC_STRIKETHROUGH | IRC_RESET
            | IRC_REVERSE | IRC_MONOSPACE => {}
            _ => out.push(c),
        }
    }
    out
}

/// Render Minecraft-formatted text for a target of the given kind.
pub fn translate_for(kind: EndpointKind, text: &str) -> String {
    match kind {
        EndpointKind::Irc => minecraft_to_irc(text),
        EndpointKind::Minecraft => text.to_string(),
    }
}

/// Byte offset of the next `http://` or `https://` in `text`.
fn find_url(text: &str) -> Option<usize> {
    match (text.find("http://"), text.find("https://")) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

/// `tellraw` component list for `text`.
///
/// With `rich` set, URL-like substrings become underlined clickable
/// components; everything else stays a plain string component.
pub fn tellraw_components(text: &str, rich: bool) -> Value {
    if !rich {
        return json!([text]);
    }

    let mut components = Vec::new();
    let mut rest = text;
    while let Some(start) = find_url(rest) {
        if start > 0 {
            components.push(Value::String(rest[..start].to_string()));
        }
        let tail = &rest[start..];
        let end = tail.find(char::is_whitespace).unwrap_or(tail.len());
        let url = &tail[..end];
        components.push(json!({
            "text": url,
            "color": "aqua",
            "underlined": true,
            "clickEvent": { "action": "open_url", "value": url },
        }));
        rest = &tail[end..];
    }
    if !rest.is_empty() || components.is_empty() {
        components.push(Value::String(rest.to_string()));
    }
    Value::Array(components)
}
