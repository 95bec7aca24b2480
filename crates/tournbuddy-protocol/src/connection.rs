//! Connection state machine and the task that drives it over a byte stream.
//!
//! [`Connection`] holds all framing and lifecycle rules and never touches
//! I/O, so it can be fed bytes directly. [`connect`] and [`open`] spawn one
//! task per stream that owns both the stream and the `Connection`; the
//! owner talks to it through a [`ConnectionHandle`] and observes it through a
//! single [`ConnectionEvents`] channel.

use std::collections::VecDeque;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::{mpsc, watch};
use tournbuddy_types::{Endpoint, Message};
use tracing::{debug, trace};

use crate::error::ProtocolError;
use crate::transport::{self, BoxedStream};
use crate::wire::{encode_message, FrameDecoder};

/// Bytes read from the stream per readiness event.
const READ_CHUNK: usize = 16 * 1024;

/// Capacity of the event channel handed to the owner.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Lifecycle of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Constructed, nothing requested yet.
    Idle,
    /// Resolving or connecting to the endpoint.
    Connecting,
    /// Stream established; messages flow both ways.
    Open,
    /// Close requested; draining queued writes.
    Closing,
    /// Closed cleanly, by either side.
    Closed,
    /// Ended by an error or a cancelled connect.
    Failed,
}

impl ConnectionState {
    /// Whether the connection has ended. Terminal connections are never
    /// reused.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Failed)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Open => write!(f, "Open"),
            Self::Closing => write!(f, "Closing"),
            Self::Closed => write!(f, "Closed"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

/// What a connection reports to its owner.
#[derive(Debug)]
pub enum ConnectionEvent {
    /// The connection reached [`ConnectionState::Open`].
    Connected,
    /// A complete message arrived.
    Message(Message),
    /// The connection closed cleanly. Reported at most once.
    Closed,
    /// The connection failed. Reported at most once.
    Failed(ProtocolError),
}

/// Sans-io connection: state, input framing, and the outbound queue.
#[derive(Debug)]
pub struct Connection {
    state: ConnectionState,
    decoder: FrameDecoder,
    pending: VecDeque<Vec<u8>>,
    /// Bytes of `pending.front()` already written.
    written: usize,
    events: VecDeque<ConnectionEvent>,
}

impl Connection {
    pub fn new() -> Self {
        Self::with_decoder(FrameDecoder::new())
    }

    pub fn with_decoder(decoder: FrameDecoder) -> Self {
        Self {
            state: ConnectionState::Idle,
            decoder,
            pending: VecDeque::new(),
            written: 0,
            events: VecDeque::new(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// A connect was requested.
    pub fn connecting(&mut self) {
        if self.state == ConnectionState::Idle {
            self.state = ConnectionState::Connecting;
        }
    }

    /// The stream is established in both directions.
    pub fn opened(&mut self) {
        if matches!(self.state, ConnectionState::Idle | ConnectionState::Connecting) {
            self.state = ConnectionState::Open;
            self.events.push_back(ConnectionEvent::Connected);
        }
    }

    /// Bytes arrived from the stream. Every complete message is queued as an
    /// event, in arrival order. Ignored unless open.
    pub fn receive(&mut self, bytes: &[u8]) {
        if self.state != ConnectionState::Open {
            return;
        }
        match self.decoder.feed(bytes) {
            Ok(messages) => {
                for msg in messages {
                    trace!(len = msg.len(), "received message");
                    self.events.push_back(ConnectionEvent::Message(msg));
                }
            }
            Err(e) => self.fail(e),
        }
    }

    /// Queue a message for writing.
    pub fn send(&mut self, msg: &Message) -> Result<(), ProtocolError> {
        if self.state != ConnectionState::Open {
            return Err(ProtocolError::NotOpen(self.state));
        }
        self.pending.push_back(encode_message(msg));
        trace!(len = msg.len(), "queued message");
        Ok(())
    }

    /// Unwritten bytes of the oldest queued message, if any.
    pub fn pending_write(&self) -> Option<&[u8]> {
        if !matches!(self.state, ConnectionState::Open | ConnectionState::Closing) {
            return None;
        }
        self.pending.front().map(|frame| &frame[self.written..])
    }

    /// Total bytes still waiting to be written.
    pub fn pending_bytes(&self) -> usize {
        self.pending.iter().map(Vec::len).sum::<usize>() - self.written
    }

    /// The stream accepted `n` bytes of [`Self::pending_write`].
    pub fn wrote(&mut self, mut n: usize) {
        while n > 0 {
            let Some(front) = self.pending.front() else {
                break;
            };
            let remaining = front.len() - self.written;
            if n < remaining {
                self.written += n;
                break;
            }
            n -= remaining;
            self.written = 0;
            self.pending.pop_front();
        }
        if self.state == ConnectionState::Closing && self.pending.is_empty() {
            self.finish_closed();
        }
    }

    /// Consumer-requested close. Queued writes are drained first; a connect
    /// still in progress is cancelled and fails. Calling it again is a no-op.
    pub fn close(&mut self) {
        match self.state {
            ConnectionState::Idle => self.finish_closed(),
            ConnectionState::Connecting => self.fail(ProtocolError::Cancelled),
            ConnectionState::Open if self.pending.is_empty() => self.finish_closed(),
            ConnectionState::Open => self.state = ConnectionState::Closing,
            ConnectionState::Closing | ConnectionState::Closed | ConnectionState::Failed => {}
        }
    }

    /// The peer closed its side of the stream.
    pub fn peer_closed(&mut self) {
        match self.state {
            ConnectionState::Open | ConnectionState::Closing => self.finish_closed(),
            ConnectionState::Idle | ConnectionState::Connecting => {
                self.fail(ProtocolError::Stream(std::io::ErrorKind::UnexpectedEof.into()));
            }
            ConnectionState::Closed | ConnectionState::Failed => {}
        }
    }

    /// Force the connection into [`ConnectionState::Failed`]. No-op once
    /// terminal, so the failure is reported exactly once.
    pub fn fail(&mut self, error: ProtocolError) {
        if self.state.is_terminal() {
            return;
        }
        debug!(from = %self.state, error = %error, "connection failed");
        self.state = ConnectionState::Failed;
        self.pending.clear();
        self.written = 0;
        self.events.push_back(ConnectionEvent::Failed(error));
    }

    /// Next event for the owner.
    pub fn poll_event(&mut self) -> Option<ConnectionEvent> {
        self.events.pop_front()
    }

    fn finish_closed(&mut self) {
        self.state = ConnectionState::Closed;
        self.pending.clear();
        self.written = 0;
        self.events.push_back(ConnectionEvent::Closed);
    }
}

impl Default for Connection {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiving side of a connection's events.
pub type ConnectionEvents = mpsc::Receiver<ConnectionEvent>;

enum Command {
    Send(Message),
    Close,
    Fail(ProtocolError),
}

/// Owner's handle on a running connection.
///
/// Dropping the handle closes the connection.
#[derive(Debug)]
pub struct ConnectionHandle {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ConnectionState>,
    peer: String,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Send(msg) => write!(f, "Send({} bytes)", msg.len()),
            Self::Close => write!(f, "Close"),
            Self::Fail(e) => write!(f, "Fail({e})"),
        }
    }
}

impl ConnectionHandle {
    /// Current state, as last published by the connection task.
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Peer description, for logging.
    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Queue a message. Only allowed while open.
    pub fn send(&self, msg: Message) -> Result<(), ProtocolError> {
        let state = self.state();
        if state != ConnectionState::Open {
            return Err(ProtocolError::NotOpen(state));
        }
        self.commands
            .send(Command::Send(msg))
            .map_err(|_| ProtocolError::NotOpen(self.state()))
    }

    /// Request a close. Safe to call repeatedly and after the connection
    /// has ended.
    pub fn close(&self) {
        let _ = self.commands.send(Command::Close);
    }

    /// Fail the connection with the given reason, dropping queued writes.
    pub fn abort(&self, reason: ProtocolError) {
        let _ = self.commands.send(Command::Fail(reason));
    }

    /// Wait until the connection is closed or failed.
    pub async fn terminated(&self) -> ConnectionState {
        let mut state = self.state.clone();
        // A dropped driver leaves the last published state in place.
        let _ = state.wait_for(|s| s.is_terminal()).await;
        let last = *state.borrow();
        last
    }
}

/// Connect to an endpoint in the background.
///
/// The returned handle starts in [`ConnectionState::Connecting`]; a
/// [`ConnectionEvent::Connected`] or [`ConnectionEvent::Failed`] follows.
/// Closing the handle before the connect completes cancels it.
pub fn connect(endpoint: Endpoint) -> (ConnectionHandle, ConnectionEvents) {
    let mut conn = Connection::new();
    conn.connecting();
    let (handle, events, driver) = Driver::new(conn, endpoint.to_string());
    tokio::spawn(driver.connect_and_run(endpoint));
    (handle, events)
}

/// Wrap an already established stream, such as one accepted by a listener.
///
/// The first event is [`ConnectionEvent::Connected`].
pub fn open(stream: BoxedStream, peer: impl Into<String>) -> (ConnectionHandle, ConnectionEvents) {
    let (handle, events, driver) = Driver::new(Connection::new(), peer.into());
    tokio::spawn(driver.run(stream));
    (handle, events)
}

/// The task side of a connection: sole owner of the stream and the
/// state machine.
struct Driver {
    conn: Connection,
    commands: mpsc::UnboundedReceiver<Command>,
    commands_open: bool,
    events: mpsc::Sender<ConnectionEvent>,
    state: watch::Sender<ConnectionState>,
    peer: String,
}

impl Driver {
    fn new(conn: Connection, peer: String) -> (ConnectionHandle, ConnectionEvents, Self) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (state_tx, state_rx) = watch::channel(conn.state());
        let handle = ConnectionHandle {
            commands: command_tx,
            state: state_rx,
            peer: peer.clone(),
        };
        let driver = Self {
            conn,
            commands: command_rx,
            commands_open: true,
            events: event_tx,
            state: state_tx,
            peer,
        };
        (handle, event_rx, driver)
    }

    async fn connect_and_run(mut self, endpoint: Endpoint) {
        debug!(peer = %self.peer, "connecting");
        let connecting = transport::connect(&endpoint);
        tokio::pin!(connecting);

        let stream = loop {
            // A queued close wins over a connect that is also ready.
            tokio::select! {
                biased;
                cmd = self.commands.recv() => {
                    match cmd {
                        // The handle refuses sends until open.
                        Some(Command::Send(_)) => continue,
                        Some(Command::Close) | None => self.conn.close(),
                        Some(Command::Fail(e)) => self.conn.fail(e),
                    }
                    break None;
                }
                result = &mut connecting => match result {
                    Ok(stream) => break Some(stream),
                    Err(e) => {
                        self.conn.fail(e);
                        break None;
                    }
                },
            }
        };

        match stream {
            Some(stream) => self.run(stream).await,
            None => self.flush().await,
        }
    }

    async fn run(mut self, stream: BoxedStream) {
        self.conn.opened();
        self.flush().await;
        debug!(peer = %self.peer, "connection open");

        let (mut reader, mut writer) = tokio::io::split(stream);
        let mut chunk = vec![0u8; READ_CHUNK];

        while !self.conn.state().is_terminal() {
            let reading = self.conn.state() == ConnectionState::Open;
            let pending = self.conn.pending_write();
            let writing = pending.is_some();

            tokio::select! {
                read = reader.read(&mut chunk), if reading => match read {
                    Ok(0) => self.conn.peer_closed(),
                    Ok(n) => self.conn.receive(&chunk[..n]),
                    Err(e) => self.conn.fail(ProtocolError::Stream(e)),
                },
                written = writer.write(pending.unwrap_or_default()), if writing => match written {
                    Ok(0) => self
                        .conn
                        .fail(ProtocolError::Stream(std::io::ErrorKind::WriteZero.into())),
                    Ok(n) => self.conn.wrote(n),
                    Err(e) => self.conn.fail(ProtocolError::Stream(e)),
                },
                cmd = self.commands.recv(), if self.commands_open => match cmd {
                    Some(Command::Send(msg)) => {
                        if let Err(e) = self.conn.send(&msg) {
                            debug!(peer = %self.peer, error = %e, "dropped outbound message");
                        }
                    }
                    Some(Command::Close) => self.conn.close(),
                    Some(Command::Fail(e)) => self.conn.fail(e),
                    None => {
                        self.commands_open = false;
                        self.conn.close();
                    }
                },
            }

            self.flush().await;
        }

        if self.conn.state() == ConnectionState::Closed {
            let _ = writer.shutdown().await;
        }
        debug!(peer = %self.peer, state = %self.conn.state(), "connection finished");
    }

    /// Publish the current state, then hand queued events to the owner.
    async fn flush(&mut self) {
        self.state.send_replace(self.conn.state());
        while let Some(event) = self.conn.poll_event() {
            // A dropped receiver only means nobody is listening; the
            // connection still drains and closes.
            let _ = self.events.send(event).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(s: &str) -> Message {
        Message::try_from(s).unwrap()
    }

    fn open_connection() -> Connection {
        let mut conn = Connection::new();
        conn.opened();
        assert!(matches!(conn.poll_event(), Some(ConnectionEvent::Connected)));
        conn
    }

    fn drain_messages(conn: &mut Connection) -> Vec<Vec<u8>> {
        let mut out = Vec::new();
        while let Some(event) = conn.poll_event() {
            match event {
                ConnectionEvent::Message(m) => out.push(m.into_bytes()),
                other => panic!("unexpected event {other:?}"),
            }
        }
        out
    }

    #[test]
    fn lifecycle_to_open() {
        let mut conn = Connection::new();
        assert_eq!(conn.state(), ConnectionState::Idle);
        conn.connecting();
        assert_eq!(conn.state(), ConnectionState::Connecting);
        conn.opened();
        assert_eq!(conn.state(), ConnectionState::Open);
    }

    #[test]
    fn ordering_survives_any_chunking() {
        let wire = b"A\nBB\nCCC\n";
        for chunk_size in 1..=wire.len() {
            let mut conn = open_connection();
            for chunk in wire.chunks(chunk_size) {
                conn.receive(chunk);
            }
            assert_eq!(
                drain_messages(&mut conn),
                vec![b"A".to_vec(), b"BB".to_vec(), b"CCC".to_vec()],
                "chunk size {chunk_size}"
            );
        }
    }

    #[test]
    fn messages_only_delivered_while_open() {
        let mut conn = Connection::new();
        conn.receive(b"early\n");
        assert!(conn.poll_event().is_none());
        assert!(matches!(
            conn.send(&msg("x")),
            Err(ProtocolError::NotOpen(ConnectionState::Idle))
        ));
    }

    #[test]
    fn partial_writes_resume_from_remainder() {
        let mut conn = open_connection();
        conn.send(&msg("hello")).unwrap();
        conn.send(&msg("world")).unwrap();
        assert_eq!(conn.pending_bytes(), 12);

        assert_eq!(conn.pending_write(), Some(&b"hello\n"[..]));
        conn.wrote(2);
        assert_eq!(conn.pending_write(), Some(&b"llo\n"[..]));
        // Spans the end of the first frame into the second.
        conn.wrote(5);
        assert_eq!(conn.pending_write(), Some(&b"orld\n"[..]));
        conn.wrote(5);
        assert_eq!(conn.pending_write(), None);
        assert_eq!(conn.pending_bytes(), 0);
    }

    #[test]
    fn close_drains_queued_writes() {
        let mut conn = open_connection();
        conn.send(&msg("bye")).unwrap();
        conn.close();
        assert_eq!(conn.state(), ConnectionState::Closing);
        assert!(conn.send(&msg("late")).is_err());
        assert_eq!(conn.pending_write(), Some(&b"bye\n"[..]));
        conn.wrote(4);
        assert_eq!(conn.state(), ConnectionState::Closed);
        assert!(matches!(conn.poll_event(), Some(ConnectionEvent::Closed)));
    }

    #[test]
    fn close_twice_reports_once() {
        let mut conn = open_connection();
        conn.close();
        conn.close();
        assert_eq!(conn.state(), ConnectionState::Closed);
        assert!(matches!(conn.poll_event(), Some(ConnectionEvent::Closed)));
        assert!(conn.poll_event().is_none());
    }

    #[test]
    fn closing_while_connecting_fails() {
        let mut conn = Connection::new();
        conn.connecting();
        conn.close();
        assert_eq!(conn.state(), ConnectionState::Failed);
        assert!(matches!(
            conn.poll_event(),
            Some(ConnectionEvent::Failed(ProtocolError::Cancelled))
        ));
    }

    #[test]
    fn failure_is_terminal_and_reported_once() {
        let mut conn = open_connection();
        conn.send(&msg("queued")).unwrap();
        conn.fail(ProtocolError::Stream(std::io::ErrorKind::BrokenPipe.into()));
        conn.fail(ProtocolError::Stream(std::io::ErrorKind::BrokenPipe.into()));
        conn.close();
        conn.peer_closed();
        assert_eq!(conn.state(), ConnectionState::Failed);
        assert!(conn.pending_write().is_none());
        assert!(matches!(conn.poll_event(), Some(ConnectionEvent::Failed(_))));
        assert!(conn.poll_event().is_none());
    }

    #[test]
    fn peer_eof_closes_cleanly() {
        let mut conn = open_connection();
        conn.receive(b"last\npartial");
        conn.peer_closed();
        assert!(matches!(conn.poll_event(), Some(ConnectionEvent::Message(_))));
        assert!(matches!(conn.poll_event(), Some(ConnectionEvent::Closed)));
        assert_eq!(conn.state(), ConnectionState::Closed);
    }

    #[test]
    fn oversized_input_fails_connection() {
        let mut conn = Connection::with_decoder(FrameDecoder::with_max_message_size(4));
        conn.opened();
        conn.poll_event();
        conn.receive(b"ok\n");
        conn.receive(b"12345");
        assert!(matches!(conn.poll_event(), Some(ConnectionEvent::Message(_))));
        assert!(matches!(
            conn.poll_event(),
            Some(ConnectionEvent::Failed(ProtocolError::MessageTooLarge { .. }))
        ));
        assert_eq!(conn.state(), ConnectionState::Failed);
    }
}
