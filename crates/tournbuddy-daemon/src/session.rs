//! Sessions: inbound connections that presented the authorization code.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tournbuddy_protocol::{
    ConnectionEvent, ConnectionEvents, ConnectionHandle, ConnectionState, ProtocolError,
};
use tournbuddy_types::{AuthorizationCode, Message};
use tracing::{debug, info};
use uuid::Uuid;

/// Identifies one session in logs and in the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An authorized connection. Messages after the code arrive on
/// [`Session::recv`]; nothing is authorized per message.
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    handle: ConnectionHandle,
    events: ConnectionEvents,
}

impl Session {
    fn new(handle: ConnectionHandle, events: ConnectionEvents) -> Self {
        Self {
            id: SessionId::new(),
            handle,
            events,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn peer(&self) -> &str {
        self.handle.peer()
    }

    pub fn state(&self) -> ConnectionState {
        self.handle.state()
    }

    pub fn send(&self, msg: Message) -> Result<(), ProtocolError> {
        self.handle.send(msg)
    }

    /// Close the session after queued messages are written. Idempotent.
    pub fn close(&self) {
        self.handle.close();
    }

    /// Next event from the peer. `None` once the connection has ended and
    /// its final event was delivered.
    pub async fn recv(&mut self) -> Option<ConnectionEvent> {
        self.events.recv().await
    }

    /// Split into the connection handle and its event stream.
    pub fn into_parts(self) -> (SessionId, ConnectionHandle, ConnectionEvents) {
        (self.id, self.handle, self.events)
    }
}

/// Wait for the first message on a freshly accepted connection and check it
/// against `code`.
///
/// On a wrong code or a timeout the connection is failed, so it never
/// reaches the application. A peer that closes first leaves it `Closed`.
pub async fn authorize(
    handle: ConnectionHandle,
    mut events: ConnectionEvents,
    code: AuthorizationCode,
    timeout: Option<Duration>,
) -> Result<Session, ProtocolError> {
    let deadline = timeout.map(|t| Instant::now() + t);

    loop {
        let event = match deadline {
            Some(deadline) => match tokio::time::timeout_at(deadline, events.recv()).await {
                Ok(event) => event,
                Err(_) => {
                    let reason = "timed out waiting for the authorization code";
                    handle.abort(ProtocolError::Authorization(reason.to_string()));
                    return Err(ProtocolError::Authorization(reason.to_string()));
                }
            },
            None => events.recv().await,
        };

        match event {
            Some(ConnectionEvent::Connected) => {}
            Some(ConnectionEvent::Message(msg)) => {
                if code.matches(msg.as_bytes()) {
                    let session = Session::new(handle, events);
                    info!(session = %session.id, peer = %session.peer(), "session authorized");
                    return Ok(session);
                }
                debug!(peer = %handle.peer(), len = msg.len(), "wrong authorization code");
                let reason = "wrong authorization code";
                handle.abort(ProtocolError::Authorization(reason.to_string()));
                return Err(ProtocolError::Authorization(reason.to_string()));
            }
            Some(ConnectionEvent::Closed) | None => {
                return Err(ProtocolError::Authorization(
                    "closed before sending the authorization code".to_string(),
                ));
            }
            Some(ConnectionEvent::Failed(e)) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tournbuddy_protocol::open;

    fn pair() -> (ConnectionHandle, ConnectionEvents, tokio::net::UnixStream) {
        let (server, client) = tokio::net::UnixStream::pair().unwrap();
        let (handle, events) = open(Box::new(server), "test");
        (handle, events, client)
    }

    #[tokio::test]
    async fn right_code_promotes() {
        let (handle, events, mut client) = pair();
        client.write_all(b"4321\n{\"hello\":1}\n").await.unwrap();
        let mut session = authorize(handle, events, AuthorizationCode::new(4321), None)
            .await
            .unwrap();
        assert_eq!(session.state(), ConnectionState::Open);
        match session.recv().await {
            Some(ConnectionEvent::Message(msg)) => assert_eq!(msg.as_bytes(), b"{\"hello\":1}"),
            other => panic!("expected message, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn wrong_code_fails_connection() {
        let (handle, events, mut client) = pair();
        client.write_all(b"1111\n").await.unwrap();
        let err = authorize(handle, events, AuthorizationCode::new(4321), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ProtocolError::Authorization(_)));

        // The server side dropped the stream without promoting it.
        let mut buf = [0u8; 8];
        let n = tokio::time::timeout(Duration::from_secs(5), client.read(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn silent_peer_times_out() {
        let (handle, events, _client) = pair();
        let err = authorize(
            handle,
            events,
            AuthorizationCode::new(1),
            Some(Duration::from_millis(50)),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ProtocolError::Authorization(reason) if reason.contains("timed out")));
    }

    #[tokio::test]
    async fn close_before_code_is_rejected() {
        let (handle, events, client) = pair();
        drop(client);
        let err = authorize(handle, events, AuthorizationCode::new(1), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ProtocolError::Authorization(reason) if reason.contains("closed")));
    }

    #[test]
    fn session_ids_are_unique() {
        assert_ne!(SessionId::new(), SessionId::new());
    }
}
