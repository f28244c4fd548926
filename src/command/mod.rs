//! Command execution seam between the RCON core and the embedding host.
//!
//! The core forwards command text verbatim to a [`CommandExecutor`] and
//! treats the returned text as an opaque payload. The executor is a
//! synchronous capability with its own bounded time budget; the core maps
//! its failures onto per-command error responses without closing the
//! connection.
//!
//! [`CommandDispatcher`] is the default host-side executor: it routes the
//! first whitespace-delimited token to a registered handler.

use std::collections::HashMap;

use thiserror::Error;

/// Failures an executor may report for a single command.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecutorError {
    /// The command exceeded the executor's time budget.
    #[error("command timed out")]
    Timeout,

    /// The executor cannot currently run commands.
    #[error("executor unavailable")]
    Unavailable,

    /// The command ran and failed.
    #[error("command failed: {0}")]
    Failed(String),
}

/// Opaque synchronous command capability supplied by the embedding host.
///
/// Runs on a blocking worker off the connection's read task; a slow
/// command stalls that connection's subsequent packets but never another
/// connection's.
pub trait CommandExecutor: Send + Sync {
    fn execute(&self, command: &str) -> Result<String, ExecutorError>;
}

/// Extract the command name (first whitespace-delimited token, lowercased).
///
/// This is the only fragment of a command line that may appear in logs.
pub fn command_name(command: &str) -> String {
    command
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_lowercase()
}

type HandlerFn = Box<dyn Fn(&str) -> Result<String, ExecutorError> + Send + Sync>;

/// Default executor: routes the first token of the command line to a
/// registered handler, passing the remainder as arguments.
pub struct CommandDispatcher {
    handlers: HashMap<String, HandlerFn>,
}

impl CommandDispatcher {
    /// Create a dispatcher with the built-in `echo` command registered.
    pub fn new() -> Self {
        let mut dispatcher = Self {
            handlers: HashMap::new(),
        };
        dispatcher.register("echo", |args| Ok(args.to_string()));
        dispatcher
    }

    /// Register a handler for a command name. Names are matched
    /// case-insensitively; re-registering replaces the previous handler.
    pub fn register<F>(&mut self, name: &str, handler: F)
    where
        F: Fn(&str) -> Result<String, ExecutorError> + Send + Sync + 'static,
    {
        self.handlers
            .insert(name.to_lowercase(), Box::new(handler));
    }
}

impl Default for CommandDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandExecutor for CommandDispatcher {
    fn execute(&self, command: &str) -> Result<String, ExecutorError> {
        let trimmed = command.trim();
        if trimmed.is_empty() {
            return Err(ExecutorError::Failed("empty command".into()));
        }

        let (name, args) = match trimmed.split_once(char::is_whitespace) {
            Some((name, args)) => (name, args.trim_start()),
            None => (trimmed, ""),
        };

        match self.handlers.get(&name.to_lowercase()) {
            Some(handler) => handler(args),
            None => Err(ExecutorError::Failed(format!(
                "unknown command: {}",
                name.to_lowercase()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn echo_returns_arguments() {
        let dispatcher = CommandDispatcher::new();
        assert_eq!(
            dispatcher.execute("echo hello world").unwrap(),
            "hello world"
        );
        assert_eq!(dispatcher.execute("ECHO x").unwrap(), "x");
        assert_eq!(dispatcher.execute("echo").unwrap(), "");
    }

    #[test]
    fn unknown_command_fails() {
        let dispatcher = CommandDispatcher::new();
        let err = dispatcher.execute("restart now").unwrap_err();
        assert_eq!(err, ExecutorError::Failed("unknown command: restart".into()));
    }

    #[test]
    fn empty_command_fails() {
        let dispatcher = CommandDispatcher::new();
        assert!(dispatcher.execute("   ").is_err());
    }

    #[test]
    fn registered_handler_is_invoked() {
        let mut dispatcher = CommandDispatcher::new();
        dispatcher.register("status", |_| Ok("ok".into()));
        assert_eq!(dispatcher.execute("status").unwrap(), "ok");
    }

    #[test]
    fn command_name_takes_first_token() {
        assert_eq!(command_name("echo hello world"), "echo");
        assert_eq!(command_name("  Save-All   now"), "save-all");
        assert_eq!(command_name(""), "");
    }
}
