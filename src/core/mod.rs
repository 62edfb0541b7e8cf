//! Protocol core: parsing control messages and deciding what to reply and
//! what to fan out. No I/O happens here.

pub mod command;
pub mod dispatch;
pub mod error;

pub use command::{parse, Announcement, ControlCommand, TopicName};
pub use dispatch::{dispatch, dispatch_at, Outcome};
pub use error::RelayError;
