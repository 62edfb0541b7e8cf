//! # Relay Module
//!
//! The receive/dispatch/respond loop that ties the control endpoint, the
//! protocol core and the broadcast endpoint together.

pub mod server;

pub use self::server::RelayServer;
