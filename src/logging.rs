//! Logging macros that set target to "rcon_server" for all log calls.
//!
//! Operator log sinks filter on the target; without an explicit one,
//! tracing uses the full module path (e.g. "rcon_server::server::connection"),
//! which fragments the event stream across per-module logger names. These
//! macros ensure all logs from this crate use a single "rcon_server" target.

macro_rules! trace {
    ($($arg:tt)*) => { ::tracing::trace!(target: "rcon_server", $($arg)*) };
}

macro_rules! debug {
    ($($arg:tt)*) => { ::tracing::debug!(target: "rcon_server", $($arg)*) };
}

macro_rules! info {
    ($($arg:tt)*) => { ::tracing::info!(target: "rcon_server", $($arg)*) };
}

macro_rules! warn {
    ($($arg:tt)*) => { ::tracing::warn!(target: "rcon_server", $($arg)*) };
}

macro_rules! error {
    ($($arg:tt)*) => { ::tracing::error!(target: "rcon_server", $($arg)*) };
}
