use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::geometry::Point;

pub const DEFAULT_SWIPE_DURATION_MS: u64 = 300;
pub const DEFAULT_SCROLL_DURATION_MS: u64 = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ScrollDirection {
    #[serde(alias = "up", alias = "Up")]
    Up,
    #[serde(alias = "down", alias = "Down")]
    Down,
    #[serde(alias = "left", alias = "Left")]
    Left,
    #[serde(alias = "right", alias = "Right")]
    Right,
}

impl ScrollDirection {
    pub fn parse(token: &str) -> Option<Self> {
        match token.to_ascii_lowercase().as_str() {
            "up" => Some(ScrollDirection::Up),
            "down" => Some(ScrollDirection::Down),
            "left" => Some(ScrollDirection::Left),
            "right" => Some(ScrollDirection::Right),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ScrollDirection::Up => "UP",
            ScrollDirection::Down => "DOWN",
            ScrollDirection::Left => "LEFT",
            ScrollDirection::Right => "RIGHT",
        }
    }
}

/// One automation step. Commands are plain values: executing one never mutates it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    Tap {
        x: i32,
        y: i32,
    },
    Swipe {
        x1: i32,
        y1: i32,
        x2: i32,
        y2: i32,
        #[serde(default = "default_swipe_duration")]
        duration_ms: u64,
    },
    Scroll {
        direction: ScrollDirection,
        #[serde(default = "default_scroll_duration")]
        duration_ms: u64,
    },
    InputText {
        text: String,
    },
    Wait {
        duration_ms: u64,
    },
    Back,
    Home,
    RecentApps,
}

fn default_swipe_duration() -> u64 {
    DEFAULT_SWIPE_DURATION_MS
}

fn default_scroll_duration() -> u64 {
    DEFAULT_SCROLL_DURATION_MS
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    Tap,
    Swipe,
    Scroll,
    InputText,
    Wait,
    Back,
    Home,
    RecentApps,
}

impl Command {
    pub fn kind(&self) -> CommandKind {
        match self {
            Command::Tap { .. } => CommandKind::Tap,
            Command::Swipe { .. } => CommandKind::Swipe,
            Command::Scroll { .. } => CommandKind::Scroll,
            Command::InputText { .. } => CommandKind::InputText,
            Command::Wait { .. } => CommandKind::Wait,
            Command::Back => CommandKind::Back,
            Command::Home => CommandKind::Home,
            Command::RecentApps => CommandKind::RecentApps,
        }
    }

    /// Back/Home/Recents. Their failure does not abort a plan under the default policy.
    pub fn is_navigation(&self) -> bool {
        matches!(self, Command::Back | Command::Home | Command::RecentApps)
    }

    /// Points the command touches, in screen coordinates.
    pub fn points(&self) -> Vec<Point> {
        match self {
            Command::Tap { x, y } => vec![Point::new(*x, *y)],
            Command::Swipe { x1, y1, x2, y2, .. } => {
                vec![Point::new(*x1, *y1), Point::new(*x2, *y2)]
            }
            _ => Vec::new(),
        }
    }

    /// Parses one line of the command text protocol.
    ///
    /// Returns `None` for blank lines, `#` comments, unknown keywords and
    /// lines with missing or malformed arguments.
    pub fn parse(line: &str) -> Option<Command> {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            return None;
        }

        let mut tokens = trimmed.split_whitespace();
        let keyword = tokens.next()?.to_ascii_lowercase();
        let args: Vec<&str> = tokens.collect();

        match keyword.as_str() {
            "tap" => {
                if args.len() < 2 {
                    return None;
                }
                Some(Command::Tap {
                    x: args[0].parse().ok()?,
                    y: args[1].parse().ok()?,
                })
            }
            "swipe" => {
                if args.len() < 4 {
                    return None;
                }
                let duration_ms = match args.get(4) {
                    Some(raw) => raw.parse().ok()?,
                    None => DEFAULT_SWIPE_DURATION_MS,
                };
                Some(Command::Swipe {
                    x1: args[0].parse().ok()?,
                    y1: args[1].parse().ok()?,
                    x2: args[2].parse().ok()?,
                    y2: args[3].parse().ok()?,
                    duration_ms,
                })
            }
            "scroll" => {
                let direction = ScrollDirection::parse(args.first()?)?;
                let duration_ms = match args.get(1) {
                    Some(raw) => raw.parse().ok()?,
                    None => DEFAULT_SCROLL_DURATION_MS,
                };
                Some(Command::Scroll { direction, duration_ms })
            }
            "input" | "type" => {
                // keep the user's inner spacing: take everything after the keyword
                let raw = trimmed[trimmed.find(char::is_whitespace)?..].trim();
                if raw.is_empty() {
                    return None;
                }
                let text = unquote(raw).unwrap_or_else(|| raw.to_string());
                Some(Command::InputText { text })
            }
            "wait" => Some(Command::Wait {
                duration_ms: args.first()?.parse().ok()?,
            }),
            "back" => Some(Command::Back),
            "home" => Some(Command::Home),
            "recents" | "recent" | "recent_apps" => Some(Command::RecentApps),
            _ => None,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Tap { x, y } => write!(f, "tap {} {}", x, y),
            Command::Swipe { x1, y1, x2, y2, duration_ms } => {
                write!(f, "swipe {} {} {} {} {}", x1, y1, x2, y2, duration_ms)
            }
            Command::Scroll { direction, duration_ms } => {
                write!(f, "scroll {} {}", direction.as_str(), duration_ms)
            }
            Command::InputText { text } if needs_quoting(text) => write!(f, "input {}", quote(text)),
            Command::InputText { text } => write!(f, "input {}", text),
            Command::Wait { duration_ms } => write!(f, "wait {}", duration_ms),
            Command::Back => f.write_str("back"),
            Command::Home => f.write_str("home"),
            Command::RecentApps => f.write_str("recents"),
        }
    }
}

// 文本无法原样放进一行时使用带转义的引号形式
fn needs_quoting(text: &str) -> bool {
    text.is_empty()
        || text.starts_with('"')
        || text.trim() != text
        || text.contains(|c: char| c == '\n' || c == '\r' || c == '\t')
}

fn quote(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('"');
    for c in text.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

/// Inverse of `quote`. `None` when `raw` is not a well-formed quoted string.
fn unquote(raw: &str) -> Option<String> {
    let inner = raw.strip_prefix('"')?.strip_suffix('"')?;
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next()? {
                '"' => out.push('"'),
                '\\' => out.push('\\'),
                'n' => out.push('\n'),
                'r' => out.push('\r'),
                't' => out.push('\t'),
                _ => return None,
            },
            '"' => return None,
            c => out.push(c),
        }
    }
    Some(out)
}

/// Result of parsing a multi-line command script.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandScript {
    pub commands: Vec<Command>,
    /// 1-based line numbers that held something other than a blank or comment but did not parse.
    pub skipped_lines: Vec<usize>,
}

impl CommandScript {
    pub fn parse(text: &str) -> Self {
        let mut script = CommandScript::default();
        for (idx, line) in text.lines().enumerate() {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            match Command::parse(trimmed) {
                Some(cmd) => script.commands.push(cmd),
                None => {
                    tracing::debug!(line = idx + 1, content = trimmed, "skipping malformed command line");
                    script.skipped_lines.push(idx + 1);
                }
            }
        }
        script
    }

    pub fn format(commands: &[Command]) -> String {
        commands
            .iter()
            .map(|c| c.to_string())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

pub fn parse_script(text: &str) -> Vec<Command> {
    CommandScript::parse(text).commands
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_duration_is_omitted() {
        assert_eq!(
            Command::parse("swipe 100 200 300 400"),
            Some(Command::Swipe { x1: 100, y1: 200, x2: 300, y2: 400, duration_ms: 300 })
        );
        assert_eq!(
            Command::parse("scroll down"),
            Some(Command::Scroll { direction: ScrollDirection::Down, duration_ms: 500 })
        );
        assert_eq!(
            Command::parse("SCROLL Left 120"),
            Some(Command::Scroll { direction: ScrollDirection::Left, duration_ms: 120 })
        );
    }

    #[test]
    fn keywords_are_case_insensitive() {
        assert_eq!(Command::parse("TAP 1 2"), Some(Command::Tap { x: 1, y: 2 }));
        assert_eq!(Command::parse("  Back "), Some(Command::Back));
        assert_eq!(Command::parse("HOME"), Some(Command::Home));
        assert_eq!(Command::parse("Recents"), Some(Command::RecentApps));
        assert_eq!(Command::parse("recent_apps"), Some(Command::RecentApps));
    }

    #[test]
    fn short_or_malformed_lines_return_none() {
        for line in [
            "tap",
            "tap 10",
            "tap ten 20",
            "swipe 1 2 3",
            "swipe 1 2 3 4 fast",
            "scroll",
            "scroll sideways",
            "scroll up soon",
            "input",
            "input    ",
            "wait",
            "wait -5",
            "fly 1 2",
            "",
            "# tap 1 2",
        ] {
            assert_eq!(Command::parse(line), None, "line {:?}", line);
        }
    }

    #[test]
    fn input_keeps_inner_spacing() {
        assert_eq!(
            Command::parse("input  hello   world "),
            Some(Command::InputText { text: "hello   world".into() })
        );
    }

    #[test]
    fn format_then_parse_is_identity() {
        let commands = vec![
            Command::Tap { x: 0, y: 2399 },
            Command::Tap { x: -4, y: 7 },
            Command::Swipe { x1: 1, y1: 2, x2: 3, y2: 4, duration_ms: 300 },
            Command::Swipe { x1: 540, y1: 1800, x2: 540, y2: 600, duration_ms: 1200 },
            Command::Scroll { direction: ScrollDirection::Up, duration_ms: 500 },
            Command::Scroll { direction: ScrollDirection::Right, duration_ms: 80 },
            Command::InputText { text: "hello world".into() },
            Command::Wait { duration_ms: 1500 },
            Command::Back,
            Command::Home,
            Command::RecentApps,
        ];
        for cmd in &commands {
            assert_eq!(Command::parse(&cmd.to_string()).as_ref(), Some(cmd));
        }
        assert_eq!(parse_script(&CommandScript::format(&commands)), commands);
    }

    #[test]
    fn input_text_survives_formatting() {
        let texts = [
            " leading",
            "trailing ",
            "",
            "two\nlines",
            "a\ntap 1 2",
            "tab\there",
            "\"quoted\"",
            "back\\slash",
            "say \"hi\" now",
        ];
        for text in texts {
            let cmd = Command::InputText { text: text.to_string() };
            let line = cmd.to_string();
            assert!(!line.contains('\n'), "line {:?}", line);
            assert_eq!(Command::parse(&line), Some(cmd.clone()), "text {:?}", text);
            assert_eq!(parse_script(&CommandScript::format(&[cmd.clone()])), vec![cmd]);
        }
    }

    #[test]
    fn malformed_quotes_are_taken_literally() {
        assert_eq!(
            Command::parse("input \"unterminated"),
            Some(Command::InputText { text: "\"unterminated".into() })
        );
        assert_eq!(
            Command::parse("input \"bad \\q\""),
            Some(Command::InputText { text: "\"bad \\q\"".into() })
        );
        assert_eq!(Command::parse("input \"\""), Some(Command::InputText { text: String::new() }));
    }

    #[test]
    fn scroll_direction_json_is_case_insensitive() {
        for raw in ["\"DOWN\"", "\"down\"", "\"Down\""] {
            let dir: ScrollDirection = serde_json::from_str(raw).unwrap();
            assert_eq!(dir, ScrollDirection::Down);
        }
        let cmd: Command = serde_json::from_str(r#"{"type":"scroll","direction":"left"}"#).unwrap();
        assert_eq!(cmd, Command::Scroll { direction: ScrollDirection::Left, duration_ms: 500 });
        assert_eq!(serde_json::to_string(&ScrollDirection::Up).unwrap(), "\"UP\"");
    }

    #[test]
    fn script_skips_bad_lines_and_comments() {
        let script = CommandScript::parse(
            "# open settings\n\ntap 10 20\ntap oops\nswipe 1 2 3 4\n  # indented comment\nwait 100\nbogus\nback\n",
        );
        assert_eq!(
            script.commands,
            vec![
                Command::Tap { x: 10, y: 20 },
                Command::Swipe { x1: 1, y1: 2, x2: 3, y2: 4, duration_ms: 300 },
                Command::Wait { duration_ms: 100 },
                Command::Back,
            ]
        );
        assert_eq!(script.skipped_lines, vec![4, 8]);
    }

    #[test]
    fn json_form_is_tagged_and_fills_defaults() {
        let cmd: Command = serde_json::from_str(r#"{"type":"swipe","x1":1,"y1":2,"x2":3,"y2":4}"#).unwrap();
        assert_eq!(cmd, Command::Swipe { x1: 1, y1: 2, x2: 3, y2: 4, duration_ms: 300 });

        let cmd: Command = serde_json::from_str(r#"{"type":"scroll","direction":"DOWN"}"#).unwrap();
        assert_eq!(cmd, Command::Scroll { direction: ScrollDirection::Down, duration_ms: 500 });

        let json = serde_json::to_value(Command::RecentApps).unwrap();
        assert_eq!(json, serde_json::json!({"type": "recent_apps"}));
    }

    #[test]
    fn navigation_commands_are_flagged() {
        assert!(Command::Back.is_navigation());
        assert!(Command::Home.is_navigation());
        assert!(Command::RecentApps.is_navigation());
        assert!(!Command::Tap { x: 1, y: 1 }.is_navigation());
        assert!(!Command::Wait { duration_ms: 1 }.is_navigation());
    }
}
