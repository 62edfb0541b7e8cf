//! Control-channel command parsing.
//!
//! Every raw request decodes to exactly one [`ControlCommand`]. Malformed input
//! is not an error: it becomes [`ControlCommand::Unknown`] and is answered like
//! any other unrecognised request.

/// Literal request that asks for the relay's clock.
pub const PING: &str = "ping";

/// Prefix of an announce request: `announce <topic>!<content>`.
pub const ANNOUNCE_PREFIX: &str = "announce ";

/// Separator between topic and content inside an announce body.
pub const TOPIC_DELIMITER: char = '!';

/// Alias for a topic name.
pub type TopicName = String;

/// A `(topic, content)` pair taken from an announce request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Announcement {
    pub topic: TopicName,
    pub content: String,
}

impl Announcement {
    pub fn new(topic: impl Into<TopicName>, content: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            content: content.into(),
        }
    }

    /// Both parts must be non-empty for the announcement to be relayed.
    #[inline]
    pub fn is_valid(&self) -> bool {
        !self.topic.is_empty() && !self.content.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCommand {
    Ping,
    Announce { topic: TopicName, content: String },
    Unknown { raw: String },
}

impl ControlCommand {
    /// Short label used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            ControlCommand::Ping => "ping",
            ControlCommand::Announce { .. } => "announce",
            ControlCommand::Unknown { .. } => "unknown",
        }
    }
}

/// Decode one raw control message.
///
/// Matching is exact and case-sensitive; no whitespace is trimmed. The announce
/// body is split on the *first* delimiter only, so the content may itself
/// contain `!`.
pub fn parse(raw: &str) -> ControlCommand {
    if raw == PING {
        return ControlCommand::Ping;
    }

    if let Some(body) = raw.strip_prefix(ANNOUNCE_PREFIX) {
        if let Some((topic, content)) = body.split_once(TOPIC_DELIMITER) {
            return ControlCommand::Announce {
                topic: topic.to_owned(),
                content: content.to_owned(),
            };
        }
    }

    ControlCommand::Unknown {
        raw: raw.to_owned(),
    }
}

/// Encode an announce request, the inverse of [`parse`] for well-formed input.
pub fn encode_announce(topic: &str, content: &str) -> String {
    format!("{ANNOUNCE_PREFIX}{topic}{TOPIC_DELIMITER}{content}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unknown(raw: &str) -> ControlCommand {
        ControlCommand::Unknown {
            raw: raw.to_string(),
        }
    }

    #[test]
    fn ping_is_exact() {
        assert_eq!(parse("ping"), ControlCommand::Ping);
        assert_eq!(parse("PING"), unknown("PING"));
        assert_eq!(parse(" ping"), unknown(" ping"));
        assert_eq!(parse("ping\n"), unknown("ping\n"));
    }

    #[test]
    fn announce_splits_topic_and_content() {
        assert_eq!(
            parse("announce kittens!hello"),
            ControlCommand::Announce {
                topic: "kittens".into(),
                content: "hello".into(),
            }
        );
    }

    #[test]
    fn announce_splits_on_first_delimiter_only() {
        assert_eq!(
            parse("announce kittens!hello!world"),
            ControlCommand::Announce {
                topic: "kittens".into(),
                content: "hello!world".into(),
            }
        );
    }

    #[test]
    fn announce_with_empty_parts_still_parses() {
        assert_eq!(
            parse("announce !hello"),
            ControlCommand::Announce {
                topic: String::new(),
                content: "hello".into(),
            }
        );
        assert_eq!(
            parse("announce kittens!"),
            ControlCommand::Announce {
                topic: "kittens".into(),
                content: String::new(),
            }
        );
    }

    #[test]
    fn announce_without_delimiter_is_unknown() {
        assert_eq!(
            parse("announce onlyonepart"),
            unknown("announce onlyonepart")
        );
        assert_eq!(parse("announce "), unknown("announce "));
    }

    #[test]
    fn prefix_needs_trailing_space() {
        assert_eq!(parse("announce"), unknown("announce"));
        assert_eq!(parse("announcekittens!hi"), unknown("announcekittens!hi"));
        assert_eq!(parse("Announce a!b"), unknown("Announce a!b"));
    }

    #[test]
    fn everything_else_is_unknown() {
        for raw in ["", "hello", "pong", "subscribe kittens", "pingping"] {
            assert_eq!(parse(raw), unknown(raw));
        }
    }

    #[test]
    fn encode_announce_parses_back() {
        let raw = encode_announce("puppies", "woof");
        assert_eq!(raw, "announce puppies!woof");
        assert_eq!(
            parse(&raw),
            ControlCommand::Announce {
                topic: "puppies".into(),
                content: "woof".into(),
            }
        );
    }

    #[test]
    fn announcement_validity() {
        assert!(Announcement::new("a", "b").is_valid());
        assert!(!Announcement::new("", "b").is_valid());
        assert!(!Announcement::new("a", "").is_valid());
    }
}
