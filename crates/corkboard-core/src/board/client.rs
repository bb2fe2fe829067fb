//! Replica client role.

use super::connect::{ConnectAction, ConnectInput, ConnectMachine, ConnectPhase};
use super::{Board, BoardError, BoardEvent, BoardState, Origin, Replicator, Status};
use crate::config::ClientConfig;
use crate::connection::{Connection, ConnectionId, PeerDialer, TransportError};
use crate::protocol::Message;
use crate::relay::{RelayRequest, SharedRelay};
use std::collections::VecDeque;
use std::fmt;

#[cfg(not(target_arch = "wasm32"))]
use std::time::Instant;

#[cfg(target_arch = "wasm32")]
use web_time::Instant;

/// Applies local mutations immediately and forwards them to the host.
/// Mutations received from the host are applied but never sent back.
pub struct ClientRole {
    dialer: Box<dyn PeerDialer>,
    host_peer_id: String,
    /// Connection currently carrying the session, direct or relayed.
    host: Option<ConnectionId>,
    machine: ConnectMachine,
}

impl ClientRole {
    pub fn phase(&self) -> ConnectPhase {
        self.machine.phase()
    }

    pub fn host_connection(&self) -> Option<&ConnectionId> {
        self.host.as_ref()
    }

    fn is_host(&self, id: &ConnectionId) -> bool {
        self.host.as_ref() == Some(id)
    }

    /// Feed the connect machine and carry out what it asks for, including
    /// any inputs those actions produce.
    fn drive(&mut self, state: &mut BoardState, input: ConnectInput) {
        let mut pending = VecDeque::from([input]);
        while let Some(input) = pending.pop_front() {
            for action in self.machine.handle(input) {
                if let Some(next) = self.perform(state, action) {
                    pending.push_back(next);
                }
            }
        }
    }

    fn perform(&mut self, state: &mut BoardState, action: ConnectAction) -> Option<ConnectInput> {
        match action {
            ConnectAction::Dial { attempt } => {
                log::info!("Dialing host {} (attempt {})", self.host_peer_id, attempt);
                match self.dialer.dial(&self.host_peer_id) {
                    Ok(channel) => {
                        let id = ConnectionId::from(self.host_peer_id.as_str());
                        state.register(Connection::direct(id.clone(), channel));
                        self.host = Some(id);
                    }
                    Err(e) => {
                        log::warn!("Dial failed: {}", e);
                        state.set_status(Status::Error(e.to_string()));
                    }
                }
                None
            }
            ConnectAction::AbandonDirect => {
                if let Some(id) = self.host.take() {
                    state.drop_connection(&id);
                }
                None
            }
            ConnectAction::RequestRoute => {
                let Some(relay) = state.relay.clone() else {
                    log::warn!("No relay configured, cannot reroute");
                    return Some(ConnectInput::RouteUnavailable);
                };
                let request = RelayRequest::RequestRoute { board_id: state.id };
                match relay.borrow_mut().send(&request) {
                    Ok(()) => None,
                    Err(e) => {
                        log::warn!("Route request failed: {}", e);
                        Some(ConnectInput::RouteUnavailable)
                    }
                }
            }
            ConnectAction::SendJoin => {
                let Some(id) = self.host.clone() else {
                    log::warn!("No host connection to join over");
                    return None;
                };
                let join = Message::Join {
                    password: state.password.clone(),
                    player_name: state.player_name.clone(),
                };
                if let Err(e) = state.send_to(&id, &join) {
                    log::warn!("Failed to send join: {}", e);
                }
                None
            }
            ConnectAction::Status(status) => {
                state.set_status(status);
                None
            }
        }
    }
}

impl fmt::Debug for ClientRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientRole")
            .field("host_peer_id", &self.host_peer_id)
            .field("host", &self.host)
            .field("machine", &self.machine)
            .finish()
    }
}

impl Replicator for ClientRole {
    fn role(&self) -> &'static str {
        "client"
    }

    fn accepts(&self, from: &ConnectionId) -> bool {
        self.machine.is_joined() && self.is_host(from)
    }

    fn propagate(&mut self, state: &mut BoardState, message: &Message, origin: &Origin) {
        if origin.is_foreign() {
            return;
        }
        match (&self.host, self.machine.is_joined()) {
            (Some(host), true) => {
                if let Err(e) = state.send_to(host, message) {
                    log::warn!("Failed to forward {}: {}", message.event_name(), e);
                }
            }
            _ => log::debug!("Not joined, keeping {} local", message.event_name()),
        }
    }

    fn on_handshake(
        &mut self,
        state: &mut BoardState,
        from: &ConnectionId,
        message: Message,
    ) -> Result<(), BoardError> {
        let snapshot = match message {
            Message::JoinResponse(snapshot)
                if self.is_host(from) && self.machine.phase() == ConnectPhase::Joining =>
            {
                snapshot
            }
            other => {
                return Err(BoardError::Unexpected {
                    event: other.event_name(),
                    role: self.role(),
                });
            }
        };

        match snapshot {
            Some(snapshot) => {
                log::info!("Joined board {} with {} items", state.id, snapshot.items.len());
                state.adopt(snapshot);
                self.drive(state, ConnectInput::JoinAccepted);
                state.emit(BoardEvent::Joined);
            }
            None => {
                log::warn!("Host rejected join to board {}", state.id);
                self.drive(state, ConnectInput::JoinRejected);
                state.emit(BoardEvent::JoinFailed);
            }
        }
        Ok(())
    }

    fn on_open(&mut self, state: &mut BoardState, id: &ConnectionId) {
        if self.is_host(id) {
            self.drive(state, ConnectInput::TransportOpened);
        }
    }

    fn on_close(&mut self, state: &mut BoardState, id: &ConnectionId) {
        if self.is_host(id) {
            self.host = None;
            self.drive(state, ConnectInput::TransportClosed);
        }
    }

    fn on_route_open(&mut self, state: &mut BoardState, peer_id: &str) -> Result<(), BoardError> {
        if self.machine.phase() != ConnectPhase::Rerouting {
            log::debug!("Ignoring route to {} outside of rerouting", peer_id);
            return Ok(());
        }
        let relay = state.relay.clone().ok_or(TransportError::NoRelay)?;
        let id = ConnectionId::from(peer_id);
        let mut connection = Connection::relayed(id.clone(), relay, state.id);
        connection.mark_open();
        state.register(connection);
        self.host = Some(id);
        self.drive(state, ConnectInput::RouteOpened);
        Ok(())
    }

    fn on_relay_error(&mut self, state: &mut BoardState, message: String) {
        state.set_status(Status::Error(message));
        if self.machine.phase() == ConnectPhase::Rerouting {
            self.drive(state, ConnectInput::RouteUnavailable);
        }
    }
}

impl Board<ClientRole> {
    /// An empty board, filled in by the host's join response.
    pub fn client(config: ClientConfig, dialer: Box<dyn PeerDialer>, relay: Option<SharedRelay>) -> Self {
        let mut state = BoardState::new(config.board_id, config.player_name, relay);
        state.password = config.password;
        Self {
            state,
            role: ClientRole {
                dialer,
                host_peer_id: config.host_peer_id,
                host: None,
                machine: ConnectMachine::new(&config.connect),
            },
        }
    }

    /// Start connecting to the host.
    pub fn connect(&mut self, now: Instant) {
        self.role.drive(&mut self.state, ConnectInput::Start(now));
    }

    /// Advance the connect timeout. Call periodically, or at [`Self::deadline`].
    pub fn poll(&mut self, now: Instant) {
        self.role.drive(&mut self.state, ConnectInput::Tick(now));
    }

    pub fn phase(&self) -> ConnectPhase {
        self.role.phase()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.role.machine.deadline()
    }

    pub fn is_joined(&self) -> bool {
        self.role.machine.is_joined()
    }
}
