//! rcon-server - Hardened Source-engine RCON server
//!
//! This library provides the core of a remote console server that:
//! - Speaks the Source RCON framed binary protocol over TCP
//! - Authenticates each connection against a salted SHA-256 credential record
//! - Dispatches command text to a pluggable [`command::CommandExecutor`]
//! - Isolates connections from one another and bounds every resource
//!   (frame size, receive buffer, in-flight writes, concurrent connections)
//!
//! Adversarial wire input (oversized frames, overflowing size fields,
//! fragmentation, command-before-auth) closes the offending connection and
//! never reaches the executor.

#[macro_use]
mod logging;

pub mod auth;
pub mod command;
pub mod config;
pub mod error;
pub mod protocol;
pub mod server;

pub use auth::PasswordRecord;
pub use command::{CommandDispatcher, CommandExecutor, ExecutorError};
pub use config::Config;
pub use error::{RconError, Result};
pub use protocol::{ClientPacket, DecodeOutcome, FrameViolation, Packet, Session};
pub use server::{ConnectionId, ListenerStats, RconServer};
