//! RCON wire protocol: frame codec and per-connection state machine.

pub mod packet;
pub mod session;

pub use packet::{
    try_decode_one, ClientPacket, DecodeOutcome, FrameViolation, Packet, MIN_FRAME_LEN,
    SERVERDATA_AUTH, SERVERDATA_AUTH_RESPONSE, SERVERDATA_EXECCOMMAND, SERVERDATA_RESPONSE_VALUE,
};
pub use session::{PacketAction, Session, SessionState, StateViolation};
