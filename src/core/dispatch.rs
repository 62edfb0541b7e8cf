//! Command dispatch.
//!
//! Turns a parsed [`ControlCommand`] into an [`Outcome`]: the reply to send on
//! the control channel (if any) and the announcement to fan out (if any).
//! Dispatch is pure; the relay server performs all I/O.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::core::command::{Announcement, ControlCommand};

/// Reply to an accepted announcement.
pub const REPLY_OK: &str = "OK";
/// Reply to anything the relay does not understand.
pub const REPLY_UNKNOWN: &str = "Huh?";
/// Reply the server substitutes for a rejected announcement when
/// `relay.reply_on_rejected` is on. Never produced by [`dispatch`] itself.
pub const REPLY_REJECTED: &str = "Invalid";

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Outcome {
    /// `None` only for an announcement that failed validation.
    pub reply: Option<String>,
    pub broadcast: Option<Announcement>,
}

impl Outcome {
    fn reply(text: impl Into<String>) -> Self {
        Self {
            reply: Some(text.into()),
            broadcast: None,
        }
    }

    /// Validation failure: nothing to say, nothing to publish.
    fn rejected() -> Self {
        Self::default()
    }

    #[inline]
    pub fn is_rejected(&self) -> bool {
        self.reply.is_none()
    }
}

/// Whole seconds since the Unix epoch, truncated toward zero.
pub fn unix_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Dispatch against the system clock.
pub fn dispatch(cmd: ControlCommand) -> Outcome {
    dispatch_at(cmd, unix_timestamp())
}

/// Dispatch with an explicit clock reading, used for `ping` replies.
pub fn dispatch_at(cmd: ControlCommand, now_secs: u64) -> Outcome {
    match cmd {
        ControlCommand::Ping => Outcome::reply(now_secs.to_string()),
        ControlCommand::Announce { topic, content } => {
            let announcement = Announcement { topic, content };
            if announcement.is_valid() {
                Outcome {
                    reply: Some(REPLY_OK.to_string()),
                    broadcast: Some(announcement),
                }
            } else {
                Outcome::rejected()
            }
        }
        ControlCommand::Unknown { .. } => Outcome::reply(REPLY_UNKNOWN),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::command::parse;

    #[test]
    fn ping_replies_with_the_clock() {
        let out = dispatch_at(ControlCommand::Ping, 1_700_000_000);
        assert_eq!(out.reply.as_deref(), Some("1700000000"));
        assert!(out.broadcast.is_none());
    }

    #[test]
    fn ping_against_system_clock_is_monotonic() {
        let first: u64 = dispatch(parse("ping")).reply.unwrap().parse().unwrap();
        let second: u64 = dispatch(parse("ping")).reply.unwrap().parse().unwrap();
        assert!(first > 0);
        assert!(second >= first);
    }

    #[test]
    fn valid_announce_is_broadcast() {
        let out = dispatch(parse("announce kittens!hello"));
        assert_eq!(out.reply.as_deref(), Some(REPLY_OK));
        assert_eq!(out.broadcast, Some(Announcement::new("kittens", "hello")));
    }

    #[test]
    fn empty_topic_or_content_is_rejected_silently() {
        for raw in ["announce !hello", "announce kittens!", "announce !"] {
            let out = dispatch(parse(raw));
            assert!(out.is_rejected(), "{raw} should be rejected");
            assert!(out.broadcast.is_none());
        }
    }

    #[test]
    fn unknown_gets_huh() {
        for raw in ["announce onlyonepart", "hello", "", "Ping"] {
            let out = dispatch(parse(raw));
            assert_eq!(out.reply.as_deref(), Some(REPLY_UNKNOWN));
            assert!(out.broadcast.is_none());
        }
    }
}
