//! Data-driven line grammar.
//!
//! Each rule pairs an event kind with a regex matched against the text after
//! the fixed-width timestamp. Rules are tried in order; the first match wins.
//! Recognised capture names: `world`, `instance`, `name`, `user`, `avatar`.

use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use warden_types::EventKind;

use crate::error::WatcherError;

/// Width of the `YYYY.MM.DD HH:MM:SS` prefix on every log line.
pub const TIMESTAMP_WIDTH: usize = 19;

const TIMESTAMP_FORMAT: &str = "%Y.%m.%d %H:%M:%S";

/// One grammar entry as written in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrammarRule {
    pub kind: EventKind,
    pub pattern: String,
}

impl GrammarRule {
    pub fn new(kind: EventKind, pattern: &str) -> Self {
        Self {
            kind,
            pattern: pattern.to_string(),
        }
    }
}

/// The built-in grammar for the platform client's output log.
pub fn default_rules() -> Vec<GrammarRule> {
    vec![
        GrammarRule::new(
            EventKind::LocationChanged,
            r"\[Behaviour\] Joining (?P<world>wrld_[A-Za-z0-9-]+):(?P<instance>\S+)",
        ),
        GrammarRule::new(
            EventKind::WorldEntered,
            r"\[Behaviour\] Entering Room: (?P<name>.+)$",
        ),
        GrammarRule::new(
            EventKind::MemberJoined,
            r"\[Behaviour\] OnPlayerJoined (?P<name>.+?)(?: \((?P<user>usr_[A-Za-z0-9-]+)\))?$",
        ),
        GrammarRule::new(
            EventKind::MemberLeft,
            r"\[Behaviour\] OnPlayerLeft (?P<name>.+?)(?: \((?P<user>usr_[A-Za-z0-9-]+)\))?$",
        ),
        GrammarRule::new(
            EventKind::AvatarChanged,
            r"\[Behaviour\] Switching (?P<name>.+) to avatar (?P<avatar>.+)$",
        ),
    ]
}

/// A recognised log line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogEntry {
    Location { world: String, instance: String },
    WorldName { name: String },
    PlayerJoined { name: String, user_id: Option<String> },
    PlayerLeft { name: String, user_id: Option<String> },
    AvatarChanged { name: String, avatar: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedLine {
    pub timestamp: DateTime<Utc>,
    pub entry: LogEntry,
}

struct CompiledRule {
    kind: EventKind,
    regex: Regex,
}

/// Compiled grammar table.
pub struct Grammar {
    rules: Vec<CompiledRule>,
}

impl std::fmt::Debug for Grammar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Grammar")
            .field("rules", &self.rules.len())
            .finish()
    }
}

impl Grammar {
    pub fn compile(rules: &[GrammarRule]) -> Result<Self, WatcherError> {
        let compiled = rules
            .iter()
            .map(|rule| {
                if !matches!(
                    rule.kind,
                    EventKind::LocationChanged
                        | EventKind::WorldEntered
                        | EventKind::MemberJoined
                        | EventKind::MemberLeft
                        | EventKind::AvatarChanged
                ) {
                    return Err(WatcherError::UnsupportedKind(rule.kind));
                }
                let regex = Regex::new(&rule.pattern).map_err(|source| {
                    WatcherError::InvalidPattern {
                        kind: rule.kind,
                        source,
                    }
                })?;
                Ok(CompiledRule {
                    kind: rule.kind,
                    regex,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { rules: compiled })
    }

    /// Parses one line. Unrecognised lines, and lines without a valid
    /// timestamp, yield `None`.
    pub fn parse(&self, line: &str) -> Option<ParsedLine> {
        let timestamp = parse_timestamp(line.get(..TIMESTAMP_WIDTH)?)?;
        let rest = line.get(TIMESTAMP_WIDTH..)?.trim_end();

        self.rules.iter().find_map(|rule| {
            let caps = rule.regex.captures(rest)?;
            let text = |name: &str| caps.name(name).map(|m| m.as_str().trim().to_string());
            let entry = match rule.kind {
                EventKind::LocationChanged => LogEntry::Location {
                    world: text("world")?,
                    instance: text("instance")?,
                },
                EventKind::WorldEntered => LogEntry::WorldName { name: text("name")? },
                EventKind::MemberJoined => LogEntry::PlayerJoined {
                    name: text("name")?,
                    user_id: text("user"),
                },
                EventKind::MemberLeft => LogEntry::PlayerLeft {
                    name: text("name")?,
                    user_id: text("user"),
                },
                EventKind::AvatarChanged => LogEntry::AvatarChanged {
                    name: text("name")?,
                    avatar: text("avatar")?,
                },
                _ => return None,
            };
            Some(ParsedLine { timestamp, entry })
        })
    }
}

/// Log timestamps are written in the client's local time.
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let naive = NaiveDateTime::parse_from_str(raw, TIMESTAMP_FORMAT).ok()?;
    Some(
        Local
            .from_local_datetime(&naive)
            .earliest()
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|| naive.and_utc()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grammar() -> Grammar {
        Grammar::compile(&default_rules()).unwrap()
    }

    const PREFIX: &str = "2024.03.09 21:14:02 Log        -  ";

    fn line(body: &str) -> String {
        format!("{PREFIX}{body}")
    }

    #[test]
    fn location_keeps_full_instance_qualifier() {
        let parsed = grammar()
            .parse(&line(
                "[Behaviour] Joining wrld_4432ea9b-729c-46e3-8eaf-846aa0a37fdd:82917~group(grp_abc)~groupAccessType(plus)~region(eu)",
            ))
            .unwrap();
        assert_eq!(
            parsed.entry,
            LogEntry::Location {
                world: "wrld_4432ea9b-729c-46e3-8eaf-846aa0a37fdd".into(),
                instance: "82917~group(grp_abc)~groupAccessType(plus)~region(eu)".into(),
            }
        );
    }

    #[test]
    fn player_lines_with_and_without_user_id() {
        let g = grammar();
        assert_eq!(
            g.parse(&line("[Behaviour] OnPlayerJoined Alice (usr_1a2b)")).unwrap().entry,
            LogEntry::PlayerJoined {
                name: "Alice".into(),
                user_id: Some("usr_1a2b".into()),
            }
        );
        assert_eq!(
            g.parse(&line("[Behaviour] OnPlayerLeft Bob the Builder")).unwrap().entry,
            LogEntry::PlayerLeft {
                name: "Bob the Builder".into(),
                user_id: None,
            }
        );
    }

    #[test]
    fn other_lines_are_skipped() {
        let g = grammar();
        assert!(g.parse(&line("[Behaviour] OnPlayerLeftRoom")).is_none());
        assert!(g.parse(&line("[Behaviour] Joining or Creating Room: Home")).is_none());
        assert!(g.parse("garbage").is_none());
        assert!(g.parse("").is_none());
        assert!(g
            .parse("2024-03-09 21:14:02 [Behaviour] OnPlayerJoined Alice")
            .is_none());
    }

    #[test]
    fn avatar_and_world_name() {
        let g = grammar();
        assert_eq!(
            g.parse(&line("[Behaviour] Switching Alice to avatar Fox Kin")).unwrap().entry,
            LogEntry::AvatarChanged {
                name: "Alice".into(),
                avatar: "Fox Kin".into(),
            }
        );
        assert_eq!(
            g.parse(&line("[Behaviour] Entering Room: The Great Pug\r")).unwrap().entry,
            LogEntry::WorldName {
                name: "The Great Pug".into(),
            }
        );
    }

    #[test]
    fn custom_grammar_replaces_defaults() {
        let g = Grammar::compile(&[GrammarRule::new(
            EventKind::MemberJoined,
            r"PLAYER IN (?P<name>\w+)",
        )])
        .unwrap();
        assert_eq!(
            g.parse(&line("PLAYER IN carol")).unwrap().entry,
            LogEntry::PlayerJoined {
                name: "carol".into(),
                user_id: None,
            }
        );
        assert!(g.parse(&line("[Behaviour] OnPlayerJoined Alice")).is_none());
    }

    #[test]
    fn compile_rejects_bad_rules() {
        let bad_regex = Grammar::compile(&[GrammarRule::new(EventKind::MemberJoined, "(")]);
        assert!(matches!(bad_regex, Err(WatcherError::InvalidPattern { .. })));

        let bad_kind = Grammar::compile(&[GrammarRule::new(EventKind::Ban, "x")]);
        assert!(matches!(
            bad_kind,
            Err(WatcherError::UnsupportedKind(EventKind::Ban))
        ));
    }
}
