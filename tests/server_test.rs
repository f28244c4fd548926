//! End-to-end tests exercising the server over real TCP connections.
//!
//! Each test binds port 0, speaks the wire protocol with raw
//! `TcpStream`s, and asserts on the observable exchange: responses,
//! closes, and executor invocations.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

use rcon_server::protocol::{
    SERVERDATA_AUTH, SERVERDATA_AUTH_RESPONSE, SERVERDATA_EXECCOMMAND, SERVERDATA_RESPONSE_VALUE,
};
use rcon_server::{
    CommandDispatcher, CommandExecutor, Config, ExecutorError, Packet, PasswordRecord, RconServer,
};

const MAX: usize = 4096;
const READ_DEADLINE: Duration = Duration::from_secs(5);

/// Executor that counts invocations and echoes the raw command back.
struct CountingExecutor {
    calls: AtomicUsize,
}

impl CountingExecutor {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl CommandExecutor for CountingExecutor {
    fn execute(&self, command: &str) -> Result<String, ExecutorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(command.to_string())
    }
}

/// Executor that stalls long enough for the sweeper to act mid-command.
struct SlowExecutor {
    calls: AtomicUsize,
}

impl SlowExecutor {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
        })
    }
}

impl CommandExecutor for SlowExecutor {
    fn execute(&self, command: &str) -> Result<String, ExecutorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(3_000));
        Ok(command.to_string())
    }
}

fn test_config(credential: Option<String>, max_connections: usize) -> Config {
    let mut config = Config::default();
    config.server.host = "127.0.0.1".to_string();
    config.server.port = 0;
    config.server.allow_ephemeral_port = true;
    config.server.max_connections = max_connections;
    config.server.read_timeout_ms = 2_000;
    config.server.accept_timeout_ms = 200;
    config.credential = credential;
    config
}

fn hunter2() -> Option<String> {
    Some(PasswordRecord::generate("hunter2").encode())
}

async fn start_server(
    credential: Option<String>,
    executor: Arc<dyn CommandExecutor>,
) -> (RconServer, SocketAddr) {
    let mut server = RconServer::new(test_config(credential, 10), executor).expect("valid config");
    let addr = server.start().await.expect("bind should succeed");
    (server, addr)
}

async fn send_frame(stream: &mut TcpStream, request_id: i32, packet_type: i32, body: &str) {
    let wire = Packet::new(request_id, packet_type, body)
        .encode(MAX)
        .expect("test frame fits");
    stream.write_all(&wire).await.expect("write");
}

/// Read one response frame; `None` means the server closed the connection.
async fn read_frame(stream: &mut TcpStream) -> Option<(i32, i32, String)> {
    let read = async {
        let mut header = [0u8; 4];
        stream.read_exact(&mut header).await.ok()?;
        let size = i32::from_le_bytes(header) as usize;
        let mut payload = vec![0u8; size];
        stream.read_exact(&mut payload).await.ok()?;

        let request_id = i32::from_le_bytes(payload[0..4].try_into().unwrap());
        let packet_type = i32::from_le_bytes(payload[4..8].try_into().unwrap());
        let body = String::from_utf8(payload[8..size - 2].to_vec()).unwrap();
        Some((request_id, packet_type, body))
    };
    timeout(READ_DEADLINE, read).await.expect("server went silent")
}

async fn authenticate(stream: &mut TcpStream, request_id: i32, password: &str) {
    send_frame(stream, request_id, SERVERDATA_AUTH, password).await;
    let (id, packet_type, body) = read_frame(stream).await.expect("auth response expected");
    assert_eq!(id, request_id);
    assert_eq!(packet_type, SERVERDATA_AUTH_RESPONSE);
    assert_eq!(body, "1");
}

#[tokio::test]
async fn happy_path_auth_then_command() {
    let (mut server, addr) = start_server(hunter2(), Arc::new(CommandDispatcher::new())).await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    authenticate(&mut stream, 100, "hunter2").await;

    send_frame(&mut stream, 101, SERVERDATA_EXECCOMMAND, "echo hello world").await;
    let (id, packet_type, body) = read_frame(&mut stream).await.expect("command response");
    assert_eq!(id, 101);
    assert_eq!(packet_type, SERVERDATA_RESPONSE_VALUE);
    assert_eq!(body, "hello world");

    server.stop().await;
}

#[tokio::test]
async fn command_before_auth_closes_without_executing() {
    let executor = CountingExecutor::new();
    let (mut server, addr) = start_server(hunter2(), executor.clone()).await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    send_frame(&mut stream, 200, SERVERDATA_EXECCOMMAND, "echo x").await;

    assert_eq!(read_frame(&mut stream).await, None, "connection should close");
    assert_eq!(executor.calls(), 0, "executor must never see the command");

    server.stop().await;
}

#[tokio::test]
async fn wrong_password_gets_reply_then_close() {
    let (mut server, addr) = start_server(hunter2(), Arc::new(CommandDispatcher::new())).await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    send_frame(&mut stream, 1, SERVERDATA_AUTH, "wrong").await;

    let (id, packet_type, body) = read_frame(&mut stream).await.expect("failure reply expected");
    assert_eq!(id, 1);
    assert_eq!(packet_type, SERVERDATA_AUTH_RESPONSE);
    assert_eq!(body, "-1");

    // The reply is the last thing on this socket.
    assert_eq!(read_frame(&mut stream).await, None);

    server.stop().await;
}

#[tokio::test]
async fn re_authentication_closes_without_second_reply() {
    let (mut server, addr) = start_server(hunter2(), Arc::new(CommandDispatcher::new())).await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    authenticate(&mut stream, 2, "hunter2").await;

    send_frame(&mut stream, 3, SERVERDATA_AUTH, "hunter2").await;
    assert_eq!(read_frame(&mut stream).await, None, "no second auth response");

    server.stop().await;
}

#[tokio::test]
async fn fragmented_auth_yields_exactly_one_response() {
    let (mut server, addr) = start_server(hunter2(), Arc::new(CommandDispatcher::new())).await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    let wire = Packet::new(7, SERVERDATA_AUTH, "hunter2").encode(MAX).unwrap();
    for byte in wire.iter() {
        stream.write_all(&[*byte]).await.unwrap();
        stream.flush().await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let (id, packet_type, body) = read_frame(&mut stream).await.expect("auth response");
    assert_eq!((id, packet_type, body.as_str()), (7, SERVERDATA_AUTH_RESPONSE, "1"));

    // Exactly one response: nothing else arrives while the connection idles.
    let mut probe = [0u8; 1];
    let extra = timeout(Duration::from_millis(300), stream.read(&mut probe)).await;
    assert!(extra.is_err(), "server sent unexpected extra bytes");

    server.stop().await;
}

#[tokio::test]
async fn sessions_are_isolated_across_connections() {
    let executor = CountingExecutor::new();
    let (mut server, addr) = start_server(hunter2(), executor.clone()).await;

    let mut alice = TcpStream::connect(addr).await.unwrap();
    authenticate(&mut alice, 10, "hunter2").await;

    // Bob never authenticated; his command closes his connection only.
    let mut bob = TcpStream::connect(addr).await.unwrap();
    send_frame(&mut bob, 20, SERVERDATA_EXECCOMMAND, "echo stolen").await;
    assert_eq!(read_frame(&mut bob).await, None);
    assert_eq!(executor.calls(), 0);

    // Alice's session is untouched.
    send_frame(&mut alice, 11, SERVERDATA_EXECCOMMAND, "echo still here").await;
    let (id, _, body) = read_frame(&mut alice).await.expect("alice still works");
    assert_eq!(id, 11);
    assert_eq!(body, "echo still here");
    assert_eq!(executor.calls(), 1);

    server.stop().await;
}

#[tokio::test]
async fn connection_cap_rejects_excess_sockets() {
    let mut server = RconServer::new(
        test_config(hunter2(), 1),
        Arc::new(CommandDispatcher::new()),
    )
    .unwrap();
    let addr = server.start().await.unwrap();

    let mut first = TcpStream::connect(addr).await.unwrap();
    authenticate(&mut first, 1, "hunter2").await;

    // The cap is reached; the next socket is dropped without a session.
    let mut second = TcpStream::connect(addr).await.unwrap();
    assert_eq!(read_frame(&mut second).await, None);
    assert_eq!(
        server.stats().connections_rejected.load(Ordering::Relaxed),
        1
    );

    // The first connection is unaffected.
    send_frame(&mut first, 2, SERVERDATA_EXECCOMMAND, "echo alive").await;
    assert!(read_frame(&mut first).await.is_some());

    server.stop().await;
}

#[tokio::test]
async fn keepalive_response_values_are_tolerated() {
    let (mut server, addr) = start_server(hunter2(), Arc::new(CommandDispatcher::new())).await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    authenticate(&mut stream, 30, "hunter2").await;

    send_frame(&mut stream, 31, SERVERDATA_RESPONSE_VALUE, "").await;
    send_frame(&mut stream, 32, SERVERDATA_EXECCOMMAND, "echo ping").await;

    let (id, _, body) = read_frame(&mut stream).await.expect("still serving");
    assert_eq!(id, 32);
    assert_eq!(body, "ping");

    server.stop().await;
}

#[tokio::test]
async fn unknown_type_code_closes_connection() {
    let (mut server, addr) = start_server(hunter2(), Arc::new(CommandDispatcher::new())).await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    authenticate(&mut stream, 40, "hunter2").await;

    send_frame(&mut stream, 41, 9, "whatever").await;
    assert_eq!(read_frame(&mut stream).await, None);

    server.stop().await;
}

#[tokio::test]
async fn executor_failure_keeps_connection_open() {
    // The dispatcher has no "restart" command; the failure must come back
    // in-band and the session must survive it.
    let (mut server, addr) = start_server(hunter2(), Arc::new(CommandDispatcher::new())).await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    authenticate(&mut stream, 50, "hunter2").await;

    send_frame(&mut stream, 51, SERVERDATA_EXECCOMMAND, "restart now").await;
    let (id, packet_type, body) = read_frame(&mut stream).await.expect("error response");
    assert_eq!(id, 51);
    assert_eq!(packet_type, SERVERDATA_RESPONSE_VALUE);
    assert!(body.starts_with("error:"), "got: {body}");

    send_frame(&mut stream, 52, SERVERDATA_EXECCOMMAND, "echo ok").await;
    let (id, _, body) = read_frame(&mut stream).await.expect("session survived");
    assert_eq!((id, body.as_str()), (52, "ok"));

    server.stop().await;
}

#[tokio::test]
async fn insecure_mode_accepts_any_password() {
    let (mut server, addr) = start_server(None, Arc::new(CommandDispatcher::new())).await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    send_frame(&mut stream, 60, SERVERDATA_AUTH, "anything at all").await;
    let (id, packet_type, body) = read_frame(&mut stream).await.expect("auth response");
    assert_eq!((id, packet_type, body.as_str()), (60, SERVERDATA_AUTH_RESPONSE, "1"));

    server.stop().await;
}

#[tokio::test]
async fn malformed_size_field_closes_connection() {
    let executor = CountingExecutor::new();
    let (mut server, addr) = start_server(hunter2(), executor.clone()).await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    // size_field = 0x7FFFFFFF: rejected before any allocation.
    stream
        .write_all(&0x7FFF_FFFFi32.to_le_bytes())
        .await
        .unwrap();
    assert_eq!(read_frame(&mut stream).await, None);
    assert_eq!(executor.calls(), 0);

    server.stop().await;
}

#[tokio::test]
async fn receive_buffer_cap_closes_flooding_connection() {
    let executor = CountingExecutor::new();
    let mut config = test_config(hunter2(), 10);
    // Receive buffer hard cap: 2 x max_frame_size = 128 bytes.
    config.server.max_frame_size = 64;
    let mut server = RconServer::new(config, executor.clone()).unwrap();
    let addr = server.start().await.unwrap();

    let mut stream = TcpStream::connect(addr).await.unwrap();

    // A flood holding no valid frame: a plausible size field followed by
    // 0xFF fill, far past the buffer cap. Whether the server trips the
    // cap on a large read or rejects the junk frame it assembles first,
    // the connection must close and nothing may reach the executor.
    let mut flood = Vec::with_capacity(1024);
    flood.extend_from_slice(&50i32.to_le_bytes());
    flood.resize(1024, 0xFF);
    stream.write_all(&flood).await.unwrap();

    assert_eq!(read_frame(&mut stream).await, None);
    assert_eq!(executor.calls(), 0);

    server.stop().await;
}

#[tokio::test]
async fn sweeper_closes_connection_stalled_outside_a_read() {
    let executor = SlowExecutor::new();
    let mut config = test_config(hunter2(), 10);
    config.server.read_timeout_ms = 500; // sweeper idle limit
    config.server.accept_timeout_ms = 100; // sweeper interval
    let mut server = RconServer::new(config, executor.clone()).unwrap();
    let addr = server.start().await.unwrap();

    let mut stream = TcpStream::connect(addr).await.unwrap();
    authenticate(&mut stream, 80, "hunter2").await;

    // While the executor runs, the read task sits in the command call,
    // not in a socket read, so the per-read deadline is not armed. Only
    // the sweeper can notice the stale activity timestamp and close the
    // connection.
    send_frame(&mut stream, 81, SERVERDATA_EXECCOMMAND, "echo slow").await;

    // The in-flight command runs to completion, but the sweeper closed
    // the connection first: the result is discarded instead of delivered.
    assert_eq!(read_frame(&mut stream).await, None);
    assert_eq!(executor.calls.load(Ordering::SeqCst), 1);
    assert_eq!(server.connection_count().await, 0);

    server.stop().await;
}

#[tokio::test]
async fn shutdown_closes_live_connections() {
    let (mut server, addr) = start_server(hunter2(), Arc::new(CommandDispatcher::new())).await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    authenticate(&mut stream, 70, "hunter2").await;

    server.stop().await;

    assert_eq!(read_frame(&mut stream).await, None, "shutdown closes sessions");
    assert!(
        TcpStream::connect(addr).await.is_err(),
        "listener should be gone after stop"
    );
}

#[tokio::test]
async fn request_ids_echo_verbatim() {
    let (mut server, addr) = start_server(hunter2(), Arc::new(CommandDispatcher::new())).await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    authenticate(&mut stream, i32::MIN, "hunter2").await;

    for request_id in [0, -1, 42, i32::MAX] {
        send_frame(&mut stream, request_id, SERVERDATA_EXECCOMMAND, "echo id").await;
        let (id, _, _) = read_frame(&mut stream).await.expect("response");
        assert_eq!(id, request_id);
    }

    server.stop().await;
}
