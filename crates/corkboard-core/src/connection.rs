//! Connections to remote participants.
//!
//! A [`Connection`] hides whether messages travel over a direct peer channel
//! or through the relay server. Either way the board calls `send` with a
//! [`Message`] and receives [`TransportEvent`]s for the connection's id.

use crate::events::{Emitter, NamedEvent};
use crate::protocol::{self, Message};
use crate::relay::{BoardId, RelayRequest, SharedRelay};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Transport-level failures.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Connection is closed")]
    Closed,
    #[error("Send failed: {0}")]
    Send(String),
    #[error("Dial failed: {0}")]
    Dial(String),
    #[error("Relay error: {0}")]
    Relay(String),
    #[error("No relay channel is configured")]
    NoRelay,
    #[error("Failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Remote peer id (direct) or remote relay socket id (relayed).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionId(String);

impl ConnectionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConnectionId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ConnectionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// A direct point-to-point channel to one peer.
///
/// Inbound activity is reported to the board as [`TransportEvent`]s by
/// whoever drives the channel. After `close` the channel must not report
/// further events.
pub trait PeerChannel {
    fn send_text(&mut self, text: &str) -> Result<(), TransportError>;
    fn close(&mut self);
}

/// Opens direct channels to peers by id.
pub trait PeerDialer {
    fn dial(&mut self, peer_id: &str) -> Result<Box<dyn PeerChannel>, TransportError>;
}

/// Carrier-level activity on a connection.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Open,
    Data(String),
    Close,
    Error(String),
}

impl NamedEvent for TransportEvent {
    fn name(&self) -> &'static str {
        match self {
            TransportEvent::Open => "open",
            TransportEvent::Data(_) => "data",
            TransportEvent::Close => "close",
            TransportEvent::Error(_) => "error",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Direct,
    Relayed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closed,
}

enum Carrier {
    Direct(Box<dyn PeerChannel>),
    Relayed { relay: SharedRelay, board_id: BoardId },
}

/// One remote participant, reachable directly or through the relay.
pub struct Connection {
    id: ConnectionId,
    carrier: Carrier,
    state: ConnectionState,
    listeners: Emitter<TransportEvent>,
}

impl Connection {
    /// A connection over a direct channel that has not opened yet.
    pub fn direct(id: ConnectionId, channel: Box<dyn PeerChannel>) -> Self {
        Self {
            id,
            carrier: Carrier::Direct(channel),
            state: ConnectionState::Connecting,
            listeners: Emitter::new(),
        }
    }

    /// A connection routed through the relay to the socket `id`.
    pub fn relayed(id: ConnectionId, relay: SharedRelay, board_id: BoardId) -> Self {
        Self {
            id,
            carrier: Carrier::Relayed { relay, board_id },
            state: ConnectionState::Connecting,
            listeners: Emitter::new(),
        }
    }

    /// Remote peer id, or the remote relay socket id when relayed.
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// Which carrier this connection uses.
    pub fn kind(&self) -> TransportKind {
        match self.carrier {
            Carrier::Direct(_) => TransportKind::Direct,
            Carrier::Relayed { .. } => TransportKind::Relayed,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Whether messages can be sent.
    pub fn is_open(&self) -> bool {
        self.state == ConnectionState::Open
    }

    /// Mark the carrier open. Returns `false` if it already was.
    pub(crate) fn mark_open(&mut self) -> bool {
        if self.state == ConnectionState::Connecting {
            self.state = ConnectionState::Open;
            true
        } else {
            false
        }
    }

    pub(crate) fn mark_closed(&mut self) {
        self.state = ConnectionState::Closed;
    }

    /// Encode and transmit a message.
    pub fn send(&mut self, message: &Message) -> Result<(), TransportError> {
        if self.state == ConnectionState::Closed {
            return Err(TransportError::Closed);
        }
        let text = protocol::encode(message)?;
        log::debug!("Sending {} to {}", message.event_name(), self.id);
        match &mut self.carrier {
            Carrier::Direct(channel) => channel.send_text(&text),
            Carrier::Relayed { relay, board_id } => relay.borrow_mut().send(&RelayRequest::RouteData {
                board_id: *board_id,
                receiver_id: self.id.to_string(),
                payload: text,
            }),
        }
    }

    /// Register a listener for one transport event name.
    pub fn on(&mut self, name: &'static str, listener: impl FnMut(&TransportEvent) + 'static) {
        self.listeners.on(name, listener);
    }

    /// Register a listener for every transport event.
    pub fn on_any(&mut self, listener: impl FnMut(&TransportEvent) + 'static) {
        self.listeners.on_any(listener);
    }

    /// Dispatch to local listeners only; nothing is sent to the peer.
    pub fn emit(&mut self, event: &TransportEvent) {
        self.listeners.emit(event);
    }

    /// Close the carrier. Closing twice is a no-op.
    pub fn close(&mut self) {
        if self.state == ConnectionState::Closed {
            return;
        }
        self.state = ConnectionState::Closed;
        match &mut self.carrier {
            Carrier::Direct(channel) => channel.close(),
            Carrier::Relayed { relay, board_id } => {
                let request = RelayRequest::RouteClose {
                    board_id: *board_id,
                    receiver_id: self.id.to_string(),
                };
                if let Err(e) = relay.borrow_mut().send(&request) {
                    log::warn!("Failed to close relay route to {}: {}", self.id, e);
                }
            }
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("kind", &self.kind())
            .field("state", &self.state)
            .finish()
    }
}

/// Connections of one board, keyed by remote id.
///
/// Inbound relay envelopes carry only a sender id; the registry maps it back
/// to the local connection.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: HashMap<ConnectionId, Connection>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection. An existing entry under the same id is
    /// replaced and returned so the caller can close it.
    pub fn register(&mut self, connection: Connection) -> Option<Connection> {
        let id = connection.id.clone();
        let displaced = self.connections.insert(id.clone(), connection);
        if displaced.is_some() {
            log::warn!("Connection {} re-registered, replacing the previous one", id);
        }
        displaced
    }

    /// Deregister a connection.
    pub fn remove(&mut self, id: &ConnectionId) -> Option<Connection> {
        self.connections.remove(id)
    }

    /// Look up a connection by id.
    pub fn get(&self, id: &ConnectionId) -> Option<&Connection> {
        self.connections.get(id)
    }

    pub fn get_mut(&mut self, id: &ConnectionId) -> Option<&mut Connection> {
        self.connections.get_mut(id)
    }

    /// Whether a connection is registered under `id`.
    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.connections.contains_key(id)
    }

    /// Ids of every registered connection, in no particular order.
    pub fn ids(&self) -> impl Iterator<Item = &ConnectionId> {
        self.connections.keys()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::items::Partial;
    use crate::testing::{RecordingChannel, RecordingRelay};
    use std::cell::RefCell;
    use std::rc::Rc;

    fn move_msg() -> Message {
        Message::MoveItem {
            key: 7,
            position: Partial([Some(10.0), None, None]),
        }
    }

    #[test]
    fn test_direct_send() {
        let (channel, probe) = RecordingChannel::new();
        let mut conn = Connection::direct("peer-1".into(), Box::new(channel));
        assert_eq!(conn.kind(), TransportKind::Direct);

        conn.send(&move_msg()).unwrap();
        assert_eq!(probe.sent(), vec![r#"["moveItem",7,[10.0,null,null]]"#.to_string()]);
    }

    #[test]
    fn test_relayed_send_wraps_payload() {
        let relay = Rc::new(RefCell::new(RecordingRelay::default()));
        let mut conn = Connection::relayed("sock-4".into(), relay.clone(), 321);
        assert_eq!(conn.kind(), TransportKind::Relayed);

        conn.send(&move_msg()).unwrap();
        assert_eq!(
            relay.borrow().requests,
            vec![RelayRequest::RouteData {
                board_id: 321,
                receiver_id: "sock-4".into(),
                payload: r#"["moveItem",7,[10.0,null,null]]"#.into(),
            }]
        );

        conn.close();
        conn.close();
        assert_eq!(relay.borrow().requests.len(), 2);
        assert!(matches!(conn.send(&move_msg()), Err(TransportError::Closed)));
    }

    #[test]
    fn test_close_direct() {
        let (channel, probe) = RecordingChannel::new();
        let mut conn = Connection::direct("peer-1".into(), Box::new(channel));
        conn.close();
        assert!(probe.is_closed());
        assert_eq!(conn.state(), ConnectionState::Closed);
    }

    #[test]
    fn test_emit_is_local_only() {
        let (channel, probe) = RecordingChannel::new();
        let mut conn = Connection::direct("peer-1".into(), Box::new(channel));
        let seen = Rc::new(RefCell::new(Vec::new()));
        let log = seen.clone();
        conn.on("data", move |e| {
            if let TransportEvent::Data(text) = e {
                log.borrow_mut().push(text.clone());
            }
        });

        conn.emit(&TransportEvent::Open);
        conn.emit(&TransportEvent::Data("hello".into()));

        assert_eq!(*seen.borrow(), vec!["hello".to_string()]);
        assert!(probe.sent().is_empty());
    }

    #[test]
    fn test_mark_open_once() {
        let (channel, _probe) = RecordingChannel::new();
        let mut conn = Connection::direct("peer-1".into(), Box::new(channel));
        assert!(conn.mark_open());
        assert!(!conn.mark_open());
        assert!(conn.is_open());
    }

    #[test]
    fn test_registry_overwrite_returns_displaced() {
        let mut registry = ConnectionRegistry::new();
        let (a, _) = RecordingChannel::new();
        let (b, _) = RecordingChannel::new();
        assert!(registry.register(Connection::direct("peer-1".into(), Box::new(a))).is_none());
        let displaced = registry.register(Connection::direct("peer-1".into(), Box::new(b)));
        assert!(displaced.is_some());
        assert_eq!(registry.len(), 1);

        let id = ConnectionId::from("peer-1");
        assert!(registry.remove(&id).is_some());
        assert!(registry.is_empty());
        assert!(!registry.contains(&id));
    }
}
