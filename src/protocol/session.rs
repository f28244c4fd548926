//! Per-connection authentication state machine.
//!
//! Session state is connection-scoped and owned by the connection's read
//! task. It is never shared between connections and never keyed by
//! anything derivable from the wire, so authenticating one connection can
//! never confer authentication on another.

use std::fmt;
use std::time::Instant;

use super::packet::{ClientPacket, Packet};

/// Authentication state of one connection.
///
/// ```text
/// Unauthenticated --auth ok-->     Authenticated
/// Unauthenticated --auth fails-->  Closed   (after the "-1" reply)
/// Unauthenticated --other type-->  Closed
/// Authenticated   --exec-->        Authenticated
/// Authenticated   --auth-->        Closed   (re-authentication forbidden)
/// Authenticated   --response-->    Authenticated (keepalive, ignored)
/// Closed          --any-->         Closed   (input silently dropped)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    Authenticated,
    Closed,
}

/// Protocol-state violations. Each one is fatal to the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateViolation {
    /// A command arrived before authentication succeeded.
    CommandBeforeAuth,
    /// A second auth attempt on an authenticated connection.
    ReAuthentication,
    /// A type code with no meaning in the current state.
    UnexpectedType(i32),
}

impl fmt::Display for StateViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CommandBeforeAuth => write!(f, "command before authentication"),
            Self::ReAuthentication => write!(f, "re-authentication not allowed"),
            Self::UnexpectedType(code) => write!(f, "unexpected packet type {code}"),
        }
    }
}

/// What the connection manager should do with one classified packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketAction {
    /// Verify the packet body against the credential record and reply.
    Authenticate,
    /// Forward the packet body verbatim to the executor.
    Execute,
    /// Tolerated client ping; do nothing.
    Keepalive,
    /// Protocol violation; close the connection.
    Reject(StateViolation),
    /// Session already closed; drop the input silently.
    Drop,
}

/// Connection-scoped session: state plus the counters reported when the
/// session ends.
#[derive(Debug)]
pub struct Session {
    state: SessionState,
    commands_executed: u64,
    started_at: Instant,
}

impl Session {
    pub fn new() -> Self {
        Self {
            state: SessionState::Unauthenticated,
            commands_executed: 0,
            started_at: Instant::now(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_authenticated(&self) -> bool {
        self.state == SessionState::Authenticated
    }

    /// Classify a packet against the current state.
    ///
    /// Pure: the caller applies the returned action and drives any state
    /// change through [`Session::mark_authenticated`] / [`Session::close`].
    pub fn classify(&self, packet: &Packet) -> PacketAction {
        match self.state {
            SessionState::Closed => PacketAction::Drop,
            SessionState::Unauthenticated => match packet.client_kind() {
                ClientPacket::Auth => PacketAction::Authenticate,
                ClientPacket::ExecCommand => {
                    PacketAction::Reject(StateViolation::CommandBeforeAuth)
                }
                ClientPacket::ResponseValue | ClientPacket::Unknown(_) => {
                    PacketAction::Reject(StateViolation::UnexpectedType(packet.packet_type))
                }
            },
            SessionState::Authenticated => match packet.client_kind() {
                ClientPacket::ExecCommand => PacketAction::Execute,
                ClientPacket::ResponseValue => PacketAction::Keepalive,
                ClientPacket::Auth => PacketAction::Reject(StateViolation::ReAuthentication),
                ClientPacket::Unknown(code) => {
                    PacketAction::Reject(StateViolation::UnexpectedType(code))
                }
            },
        }
    }

    /// Transition to `Authenticated` after a verified auth exchange.
    pub fn mark_authenticated(&mut self) {
        if self.state == SessionState::Unauthenticated {
            self.state = SessionState::Authenticated;
        }
    }

    /// Terminal transition; idempotent.
    pub fn close(&mut self) {
        self.state = SessionState::Closed;
    }

    pub fn record_command(&mut self) {
        self.commands_executed += 1;
    }

    pub fn commands_executed(&self) -> u64 {
        self.commands_executed
    }

    pub fn duration_ms(&self) -> u64 {
        self.started_at.elapsed().as_millis() as u64
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::packet::{
        SERVERDATA_AUTH, SERVERDATA_EXECCOMMAND, SERVERDATA_RESPONSE_VALUE,
    };

    fn auth() -> Packet {
        Packet::new(1, SERVERDATA_AUTH, "hunter2")
    }

    fn exec() -> Packet {
        Packet::new(2, SERVERDATA_EXECCOMMAND, "echo x")
    }

    fn response() -> Packet {
        Packet::new(3, SERVERDATA_RESPONSE_VALUE, "")
    }

    #[test]
    fn auth_is_the_only_way_in() {
        let session = Session::new();
        assert_eq!(session.classify(&auth()), PacketAction::Authenticate);
        assert_eq!(
            session.classify(&exec()),
            PacketAction::Reject(StateViolation::CommandBeforeAuth)
        );
        assert_eq!(
            session.classify(&response()),
            PacketAction::Reject(StateViolation::UnexpectedType(SERVERDATA_RESPONSE_VALUE))
        );
        assert_eq!(
            session.classify(&Packet::new(4, 99, "")),
            PacketAction::Reject(StateViolation::UnexpectedType(99))
        );
    }

    #[test]
    fn authenticated_accepts_commands_and_keepalives() {
        let mut session = Session::new();
        session.mark_authenticated();
        assert_eq!(session.classify(&exec()), PacketAction::Execute);
        assert_eq!(session.classify(&response()), PacketAction::Keepalive);
    }

    #[test]
    fn re_authentication_is_rejected() {
        let mut session = Session::new();
        session.mark_authenticated();
        assert_eq!(
            session.classify(&auth()),
            PacketAction::Reject(StateViolation::ReAuthentication)
        );
    }

    #[test]
    fn closed_session_drops_everything() {
        let mut session = Session::new();
        session.close();
        assert_eq!(session.classify(&auth()), PacketAction::Drop);
        assert_eq!(session.classify(&exec()), PacketAction::Drop);
        // close is idempotent and terminal
        session.close();
        session.mark_authenticated();
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[test]
    fn command_counter_accumulates() {
        let mut session = Session::new();
        assert_eq!(session.commands_executed(), 0);
        session.record_command();
        session.record_command();
        assert_eq!(session.commands_executed(), 2);
    }
}
