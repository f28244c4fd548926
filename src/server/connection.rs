//! Per-connection state and the read task that drives it.
//!
//! Each accepted socket is split: the write half lives in a shared
//! [`Connection`] handle (registry, sweeper, and responders reach it
//! there); the read half, the receive buffer, and the [`Session`] are
//! owned exclusively by the connection's read task.

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{broadcast, Mutex, Notify, Semaphore};
use tokio::time::timeout;

use super::registry::ConnectionRegistry;
use crate::auth::PasswordRecord;
use crate::command::{self, CommandExecutor};
use crate::error::{RconError, Result};
use crate::protocol::packet::{self, DecodeOutcome, Packet};
use crate::protocol::session::{PacketAction, Session};

/// Socket read chunk size.
const READ_CHUNK: usize = 4096;

/// Body sent when a command's output cannot fit in one response frame.
const RESPONSE_TOO_LARGE: &str = "error: response too large";

/// Process-unique connection identity, stable for the connection lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub(crate) u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Shared handle to one live connection.
///
/// Observers outside the read task hold this through the registry. All
/// mutable per-session state stays with the read task; the handle only
/// carries what closing and responding need.
pub(crate) struct Connection {
    id: ConnectionId,
    remote_addr: SocketAddr,
    writer: Mutex<OwnedWriteHalf>,
    /// Single permit: at most one in-flight write per connection, so two
    /// responses can never interleave on the socket.
    write_permit: Semaphore,
    closed: AtomicBool,
    close_reason: StdMutex<Option<String>>,
    close_notify: Notify,
    last_activity_ms: AtomicU64,
    connected_at: Instant,
}

impl Connection {
    pub(crate) fn new(id: ConnectionId, remote_addr: SocketAddr, writer: OwnedWriteHalf) -> Self {
        Self {
            id,
            remote_addr,
            writer: Mutex::new(writer),
            write_permit: Semaphore::new(1),
            closed: AtomicBool::new(false),
            close_reason: StdMutex::new(None),
            close_notify: Notify::new(),
            last_activity_ms: AtomicU64::new(now_ms()),
            connected_at: Instant::now(),
        }
    }

    pub(crate) fn id(&self) -> ConnectionId {
        self.id
    }

    pub(crate) fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn touch(&self) {
        self.last_activity_ms.store(now_ms(), Ordering::Relaxed);
    }

    pub(crate) fn idle_for(&self) -> Duration {
        let last = self.last_activity_ms.load(Ordering::Relaxed);
        Duration::from_millis(now_ms().saturating_sub(last))
    }

    pub(crate) fn age_ms(&self) -> u64 {
        self.connected_at.elapsed().as_millis() as u64
    }

    /// One-shot close latch. The first caller wins and its reason sticks;
    /// later calls are no-ops. Wakes the read task so it can release
    /// resources at its next suspension point.
    pub(crate) fn begin_close(&self, reason: &str) -> bool {
        if self
            .closed
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            if let Ok(mut slot) = self.close_reason.lock() {
                *slot = Some(reason.to_string());
            }
            self.close_notify.notify_waiters();
            true
        } else {
            false
        }
    }

    pub(crate) fn close_reason(&self) -> Option<String> {
        self.close_reason.lock().ok().and_then(|slot| slot.clone())
    }

    pub(crate) async fn closed_notified(&self) {
        self.close_notify.notified().await;
    }

    /// Write one encoded frame under the connection's write discipline:
    /// acquire the single write permit, then the writer, write and flush.
    pub(crate) async fn send_frame(&self, frame: &[u8]) -> Result<()> {
        if self.is_closed() {
            return Err(RconError::Connection("connection is closed".into()));
        }

        let _permit = self
            .write_permit
            .acquire()
            .await
            .map_err(|_| RconError::Connection("write permit unavailable".into()))?;
        let mut writer = self.writer.lock().await;
        writer.write_all(frame).await?;
        writer.flush().await?;
        self.touch();
        Ok(())
    }

    /// Half-close the socket so the peer observes EOF.
    pub(crate) async fn shutdown_writer(&self) {
        let mut writer = self.writer.lock().await;
        let _ = writer.shutdown().await;
    }
}

/// Whether the read loop keeps going after one handled packet.
enum PacketOutcome {
    Continue,
    Close(&'static str),
}

/// The read task for one connection. Owns the read half, the receive
/// buffer, and the session; runs until the connection closes.
pub(crate) struct ConnectionTask {
    pub(crate) conn: Arc<Connection>,
    pub(crate) reader: OwnedReadHalf,
    pub(crate) registry: Arc<ConnectionRegistry>,
    pub(crate) executor: Arc<dyn CommandExecutor>,
    pub(crate) credential: Option<Arc<PasswordRecord>>,
    pub(crate) max_frame_size: usize,
    pub(crate) read_timeout: Duration,
    pub(crate) shutdown_rx: broadcast::Receiver<()>,
}

impl ConnectionTask {
    pub(crate) async fn run(mut self) {
        let mut session = Session::new();
        let mut buffer = BytesMut::with_capacity(self.max_frame_size);

        let reason = self.read_loop(&mut session, &mut buffer).await;

        let was_authenticated = session.is_authenticated();
        let commands_executed = session.commands_executed();
        session.close();

        self.conn.begin_close(&reason);
        // First closer wins; if the sweeper or shutdown got there before the
        // read loop noticed, keep their reason.
        let reason = self.conn.close_reason().unwrap_or(reason);

        self.registry.remove(self.conn.id()).await;
        self.conn.shutdown_writer().await;

        if was_authenticated {
            info!(
                connection_id = %self.conn.id(),
                commands_executed,
                "application.session.end"
            );
        }
        info!(
            connection_id = %self.conn.id(),
            reason = %reason,
            session_duration_ms = self.conn.age_ms(),
            "transport.disconnect"
        );
    }

    /// Read, buffer, decode, act. Returns the close reason.
    async fn read_loop(&mut self, session: &mut Session, buffer: &mut BytesMut) -> String {
        let max_buffer = self.max_frame_size * 2;
        let mut scratch = [0u8; READ_CHUNK];

        loop {
            if self.conn.is_closed() {
                return "closed".to_string();
            }

            let read = tokio::select! {
                _ = self.conn.closed_notified() => continue,
                _ = self.shutdown_rx.recv() => return "server shutdown".to_string(),
                read = timeout(self.read_timeout, self.reader.read(&mut scratch)) => read,
            };

            match read {
                Err(_elapsed) => return "idle timeout".to_string(),
                Ok(Err(err)) => {
                    warn!(connection_id = %self.conn.id(), error = %err, "socket read failed");
                    return format!("read error: {err}");
                }
                Ok(Ok(0)) => return "client disconnected".to_string(),
                Ok(Ok(n)) => {
                    self.conn.touch();

                    // Hard cap: a peer may not dribble bytes forever without
                    // ever completing a frame.
                    if buffer.len() + n > max_buffer {
                        warn!(
                            connection_id = %self.conn.id(),
                            violation = "receive buffer overflow",
                            "protocol.packet.invalid"
                        );
                        return "receive buffer overflow".to_string();
                    }
                    buffer.extend_from_slice(&scratch[..n]);
                }
            }

            // Drain every complete frame at the front of the buffer.
            loop {
                match packet::try_decode_one(buffer, self.max_frame_size) {
                    DecodeOutcome::NeedMore(_) => break,
                    DecodeOutcome::Invalid(violation) => {
                        warn!(
                            connection_id = %self.conn.id(),
                            violation = %violation,
                            "protocol.packet.invalid"
                        );
                        return "protocol error".to_string();
                    }
                    DecodeOutcome::Frame(frame) => {
                        match self.handle_packet(session, &frame).await {
                            PacketOutcome::Continue => {}
                            PacketOutcome::Close(reason) => return reason.to_string(),
                        }
                    }
                }
            }
        }
    }

    async fn handle_packet(&self, session: &mut Session, frame: &Packet) -> PacketOutcome {
        match session.classify(frame) {
            PacketAction::Authenticate => self.handle_auth(session, frame).await,
            PacketAction::Execute => self.handle_command(session, frame).await,
            PacketAction::Keepalive => {
                trace!(connection_id = %self.conn.id(), "keepalive response value ignored");
                PacketOutcome::Continue
            }
            PacketAction::Reject(violation) => {
                warn!(
                    connection_id = %self.conn.id(),
                    violation = %violation,
                    "protocol.packet.invalid"
                );
                PacketOutcome::Close("protocol violation")
            }
            PacketAction::Drop => PacketOutcome::Continue,
        }
    }

    async fn handle_auth(&self, session: &mut Session, frame: &Packet) -> PacketOutcome {
        let success = match &self.credential {
            Some(record) => record.verify(&frame.body),
            // Insecure mode: no credential configured, any secret passes.
            None => true,
        };

        // The reply always goes out, success or not, so the client can tell
        // a wrong password apart from a transport failure.
        let response = Packet::auth_response(frame.request_id, success);
        let wire = match response.encode(self.max_frame_size) {
            Ok(wire) => wire,
            Err(violation) => {
                error!(connection_id = %self.conn.id(), violation = %violation, "auth response encoding failed");
                return PacketOutcome::Close("internal error");
            }
        };
        if let Err(err) = self.conn.send_frame(&wire).await {
            warn!(connection_id = %self.conn.id(), error = %err, "auth response write failed");
            return PacketOutcome::Close("write failed");
        }

        if success {
            session.mark_authenticated();
            info!(connection_id = %self.conn.id(), result = "success", "protocol.auth");
            info!(connection_id = %self.conn.id(), "application.session.start");
            PacketOutcome::Continue
        } else {
            warn!(connection_id = %self.conn.id(), result = "failure", "protocol.auth");
            PacketOutcome::Close("authentication failed")
        }
    }

    async fn handle_command(&self, session: &mut Session, frame: &Packet) -> PacketOutcome {
        let command_name = command::command_name(&frame.body);
        let started = Instant::now();

        // The executor is synchronous and bounded by its own time budget;
        // run it off the async worker so a slow command stalls only this
        // connection's packets.
        let executor = Arc::clone(&self.executor);
        let command_text = frame.body.clone();
        let outcome = tokio::task::spawn_blocking(move || executor.execute(&command_text)).await;
        let execution_time_ms = started.elapsed().as_millis() as u64;

        let (result, body) = match outcome {
            Ok(Ok(output)) => ("success", output),
            Ok(Err(err)) => ("error", format!("error: {err}")),
            Err(_join) => ("error", "error: executor unavailable".to_string()),
        };

        let response = Packet::command_response(frame.request_id, body);
        let wire = match response.encode(self.max_frame_size) {
            Ok(wire) => wire,
            Err(violation) => {
                // Operational error: report it in-band, never ship a
                // truncated frame, and keep the connection open.
                warn!(
                    connection_id = %self.conn.id(),
                    command_name = %command_name,
                    violation = %violation,
                    "command response dropped"
                );
                match Packet::command_response(frame.request_id, RESPONSE_TOO_LARGE)
                    .encode(self.max_frame_size)
                {
                    Ok(wire) => wire,
                    Err(_) => return PacketOutcome::Close("internal error"),
                }
            }
        };

        if let Err(err) = self.conn.send_frame(&wire).await {
            warn!(connection_id = %self.conn.id(), error = %err, "command response write failed");
            return PacketOutcome::Close("write failed");
        }

        if result == "success" {
            session.record_command();
        }
        info!(
            connection_id = %self.conn.id(),
            command_name = %command_name,
            result,
            execution_time_ms,
            "command.execute"
        );
        PacketOutcome::Continue
    }
}
