//! Fanout – a minimal request/reply to publish/subscribe relay.
//!
//! Requesters send `ping` or `announce <topic>!<content>` on the control
//! channel; accepted announcements are republished as `[topic, content]` to
//! every subscriber of the broadcast channel whose prefix matches the topic.
//!
//! This crate exports
//!  * `core`   – command parsing and dispatch (no I/O)
//!  * `net`    – TCP control/broadcast endpoints, framing and clients
//!  * `relay`  – the server loop owning both endpoints
//!  * `config` – TOML + environment runtime configuration
//!  * `logging`, `metrics` – tracing setup and relay counters

// ───────────────────────────────────────────────────────────
// Public modules
// ───────────────────────────────────────────────────────────
pub mod config;
pub mod core;
pub mod logging;
pub mod metrics;
pub mod net;
pub mod relay;

// ───────────────────────────────────────────────────────────
// Re-exports
// ───────────────────────────────────────────────────────────
pub use config::Config;
pub use relay::RelayServer;
