//! Board sessions: shared state, inbound dispatch, and replicated mutations.
//!
//! A [`Board`] pairs the session state with a [`Replicator`] role. The host
//! role applies mutations and broadcasts them to every other joined
//! connection; the client role applies them optimistically and forwards
//! local ones to the host. Messages that arrived from a peer are applied
//! with a [`Origin::Remote`] tag and are never forwarded back.

pub mod client;
pub mod connect;
pub mod host;

pub use client::ClientRole;
pub use connect::{ConnectAction, ConnectInput, ConnectMachine, ConnectPhase};
pub use host::HostRole;

use crate::connection::{Connection, ConnectionId, ConnectionRegistry, TransportError, TransportEvent};
use crate::events::{Emitter, NamedEvent};
use crate::items::{
    Item, ItemEvent, ItemKey, ItemTree, NewItem, PartialPosition, PartialScale, StructuralError,
};
use crate::protocol::{self, JoinSnapshot, Message, ProtocolError, Settings};
use crate::relay::{BoardId, RelayNotice, SharedRelay};
#[cfg(not(target_arch = "wasm32"))]
use crate::relay::RelayEvent;
use std::collections::HashSet;
use std::fmt;
use thiserror::Error;

pub type HostBoard = Board<HostRole>;
pub type ClientBoard = Board<ClientRole>;

/// Size of the key range each participant allocates item keys from. The
/// host uses the first range and gives every joining connection a fresh one
/// in its join response, so items created concurrently never share a key.
pub const KEY_BLOCK: ItemKey = 1 << 32;

fn same_block(a: ItemKey, b: ItemKey) -> bool {
    a / KEY_BLOCK == b / KEY_BLOCK
}

#[derive(Debug, Error)]
pub enum BoardError {
    #[error(transparent)]
    Structural(#[from] StructuralError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("Unknown connection: {0}")]
    UnknownConnection(ConnectionId),
    #[error("Connection {0} has not joined the board")]
    NotJoined(ConnectionId),
    #[error("Unexpected {event} message for a {role}")]
    Unexpected { event: &'static str, role: &'static str },
}

/// Where a mutation came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Origin {
    /// Made by this participant.
    Local,
    /// Received from a peer over the given connection.
    Remote(ConnectionId),
}

impl Origin {
    pub fn is_foreign(&self) -> bool {
        matches!(self, Origin::Remote(_))
    }

    pub fn connection(&self) -> Option<&ConnectionId> {
        match self {
            Origin::Local => None,
            Origin::Remote(id) => Some(id),
        }
    }
}

/// Human-readable connection status, as shown to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    Connecting,
    Connected,
    Retrying,
    Rerouting,
    Joined,
    Disconnected,
    Failed(String),
    Error(String),
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Connecting => f.write_str("Connecting"),
            Status::Connected => f.write_str("Connected"),
            Status::Retrying => f.write_str("Retrying"),
            Status::Rerouting => f.write_str("Rerouting through server"),
            Status::Joined => f.write_str("Joined"),
            Status::Disconnected => f.write_str("Disconnected"),
            Status::Failed(reason) => write!(f, "Failed: {}", reason),
            Status::Error(message) => write!(f, "Error: {}", message),
        }
    }
}

/// Coarse lifecycle of the board's link to the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkState {
    #[default]
    Idle,
    Connecting,
    Connected,
    Disconnected,
    Failed,
}

/// Notifications for the presentation layer.
#[derive(Debug, Clone, PartialEq)]
pub enum BoardEvent {
    ConnUpdate(Status),
    Joined,
    JoinFailed,
    PlayerJoined(String),
    PlayerLeft(String),
    /// A mutation was applied. Named after the message (`addItem`,
    /// `moveItem`, ...).
    Applied { message: Message, origin: Origin },
}

impl NamedEvent for BoardEvent {
    fn name(&self) -> &'static str {
        match self {
            BoardEvent::ConnUpdate(_) => "connUpdate",
            BoardEvent::Joined => "joined",
            BoardEvent::JoinFailed => "joinFailed",
            BoardEvent::PlayerJoined(_) => "playerJoined",
            BoardEvent::PlayerLeft(_) => "playerLeft",
            BoardEvent::Applied { message, .. } => message.event_name(),
        }
    }
}

/// Session state shared by both roles.
pub struct BoardState {
    pub(crate) name: Option<String>,
    pub(crate) id: BoardId,
    /// Host: required from joiners. Client: presented once, then dropped.
    pub(crate) password: Option<String>,
    pub(crate) settings: Settings,
    pub(crate) player_name: String,
    pub(crate) player_names: HashSet<String>,
    pub(crate) next_key: ItemKey,
    pub(crate) items: ItemTree,
    pub(crate) connections: ConnectionRegistry,
    pub(crate) relay: Option<SharedRelay>,
    pub(crate) link: LinkState,
    events: Emitter<BoardEvent>,
}

impl fmt::Debug for BoardState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoardState")
            .field("name", &self.name)
            .field("id", &self.id)
            .field("player_name", &self.player_name)
            .field("player_names", &self.player_names)
            .field("next_key", &self.next_key)
            .field("items", &self.items.len())
            .field("connections", &self.connections)
            .field("relay", &self.relay.is_some())
            .field("link", &self.link)
            .finish()
    }
}

impl BoardState {
    pub(crate) fn new(id: BoardId, player_name: String, relay: Option<SharedRelay>) -> Self {
        Self {
            name: None,
            id,
            password: None,
            settings: Settings::new(),
            player_name,
            player_names: HashSet::new(),
            next_key: 0,
            items: ItemTree::new(),
            connections: ConnectionRegistry::new(),
            relay,
            link: LinkState::Idle,
            events: Emitter::new(),
        }
    }

    pub(crate) fn emit(&mut self, event: BoardEvent) {
        self.events.emit(&event);
    }

    /// Record a status change and notify `connUpdate` listeners.
    pub(crate) fn set_status(&mut self, status: Status) {
        log::info!("Board {}: {}", self.id, status);
        self.link = match &status {
            Status::Connecting | Status::Retrying | Status::Rerouting => LinkState::Connecting,
            Status::Connected | Status::Joined => LinkState::Connected,
            Status::Disconnected => LinkState::Disconnected,
            Status::Failed(_) => LinkState::Failed,
            Status::Error(_) => self.link,
        };
        self.emit(BoardEvent::ConnUpdate(status));
    }

    /// Register a connection, closing any connection it displaces. Returns
    /// whether one was displaced.
    pub(crate) fn register(&mut self, connection: Connection) -> bool {
        match self.connections.register(connection) {
            Some(mut displaced) => {
                displaced.close();
                true
            }
            None => false,
        }
    }

    /// Deregister and close a connection.
    pub(crate) fn drop_connection(&mut self, id: &ConnectionId) {
        if let Some(mut connection) = self.connections.remove(id) {
            connection.close();
        }
    }

    pub(crate) fn send_to(&mut self, id: &ConnectionId, message: &Message) -> Result<(), BoardError> {
        let connection = self
            .connections
            .get_mut(id)
            .ok_or_else(|| BoardError::UnknownConnection(id.clone()))?;
        connection.send(message)?;
        Ok(())
    }

    pub(crate) fn add_player(&mut self, name: &str) -> bool {
        let added = self.player_names.insert(name.to_string());
        if added {
            self.emit(BoardEvent::PlayerJoined(name.to_string()));
        }
        added
    }

    pub(crate) fn remove_player(&mut self, name: &str) -> bool {
        let removed = self.player_names.remove(name);
        if removed {
            self.emit(BoardEvent::PlayerLeft(name.to_string()));
        }
        removed
    }

    /// Full state for a joining client.
    pub(crate) fn join_snapshot(&self) -> JoinSnapshot {
        JoinSnapshot {
            name: self.name.clone(),
            player_names: self.player_names.clone(),
            settings: self.settings.clone(),
            items: self.items.snapshot(),
            next_key: self.next_key,
        }
    }

    /// Replace the session state with the host's snapshot.
    pub(crate) fn adopt(&mut self, snapshot: JoinSnapshot) {
        self.name = snapshot.name;
        self.player_names = snapshot.player_names;
        self.settings = snapshot.settings;
        self.items.load(&snapshot.items);
        let start = snapshot.next_key;
        let past_items = self
            .items
            .iter()
            .map(|item| item.key)
            .filter(|&key| same_block(key, start))
            .max()
            .map_or(start, |key| key + 1);
        self.next_key = start.max(past_items);
        self.password = None;
    }

    /// Apply a mutation message to the item tree.
    fn mutate(&mut self, message: &Message) -> Result<(), BoardError> {
        match message {
            Message::AddItem(snapshot) => {
                self.items.insert_snapshot(snapshot)?;
                if same_block(snapshot.key, self.next_key) {
                    self.next_key = self.next_key.max(snapshot.key + 1);
                }
            }
            Message::MoveItem { key, position } => self.items.move_to(*key, position)?,
            Message::ScaleItem { key, scale } => self.items.scale_to(*key, scale)?,
            Message::RotateItem { key, rotation } => self.items.rotate_to(*key, *rotation)?,
            Message::ParentItem { child, parent } => self.items.set_parent(*child, *parent)?,
            Message::UnparentItem { child } => self.items.remove_parent(*child)?,
            Message::Join { .. } | Message::JoinResponse(_) => {
                return Err(BoardError::Unexpected {
                    event: message.event_name(),
                    role: "board",
                });
            }
        }
        Ok(())
    }
}

/// Role-specific replication behaviour.
pub trait Replicator {
    /// Short role name used in logs and errors.
    fn role(&self) -> &'static str;

    /// Whether mutations from `from` may be applied.
    fn accepts(&self, from: &ConnectionId) -> bool;

    /// Replicate a mutation that has just been applied.
    fn propagate(&mut self, state: &mut BoardState, message: &Message, origin: &Origin);

    /// Handle `join` / `joinResponse`.
    fn on_handshake(
        &mut self,
        state: &mut BoardState,
        from: &ConnectionId,
        message: Message,
    ) -> Result<(), BoardError>;

    /// A registered connection's transport opened.
    fn on_open(&mut self, state: &mut BoardState, id: &ConnectionId);

    /// A connection closed and has been deregistered.
    fn on_close(&mut self, state: &mut BoardState, id: &ConnectionId);

    /// The relay opened a forwarded route to `peer_id`.
    fn on_route_open(&mut self, state: &mut BoardState, peer_id: &str) -> Result<(), BoardError>;

    /// The relay reported an error.
    fn on_relay_error(&mut self, state: &mut BoardState, message: String) {
        state.set_status(Status::Error(message));
    }
}

/// A board session in either role.
#[derive(Debug)]
pub struct Board<R: Replicator> {
    pub(crate) state: BoardState,
    pub(crate) role: R,
}

impl<R: Replicator> Board<R> {
    // --- Accessors ---

    /// Board name, as set by the host.
    pub fn name(&self) -> Option<&str> {
        self.state.name.as_deref()
    }

    /// Id the relay allocated for this board.
    pub fn id(&self) -> BoardId {
        self.state.id
    }

    /// Opaque board settings.
    pub fn settings(&self) -> &Settings {
        &self.state.settings
    }

    /// Name of the local player.
    pub fn player_name(&self) -> &str {
        &self.state.player_name
    }

    /// Everyone on the roster.
    pub fn player_names(&self) -> &HashSet<String> {
        &self.state.player_names
    }

    /// Whether a non-empty password is set. A client drops its password
    /// after joining.
    pub fn has_password(&self) -> bool {
        self.state.password.as_deref().is_some_and(|p| !p.is_empty())
    }

    /// Key the next locally created item will get. Each participant
    /// allocates from its own [`KEY_BLOCK`] range.
    pub fn next_key(&self) -> ItemKey {
        self.state.next_key
    }

    /// All items on the board.
    pub fn items(&self) -> &ItemTree {
        &self.state.items
    }

    /// Look up one item.
    pub fn item(&self, key: ItemKey) -> Option<&Item> {
        self.state.items.get(key)
    }

    /// Registered connections, keyed by id.
    pub fn connections(&self) -> &ConnectionRegistry {
        &self.state.connections
    }

    /// Mutable access, e.g. to register per-connection listeners.
    pub fn connection_mut(&mut self, id: &ConnectionId) -> Option<&mut Connection> {
        self.state.connections.get_mut(id)
    }

    /// Coarse link state, following the last status.
    pub fn link(&self) -> LinkState {
        self.state.link
    }

    /// The replication role.
    pub fn role(&self) -> &R {
        &self.role
    }

    // --- Listeners ---

    /// Listen for board events named `name`.
    pub fn on(&mut self, name: &'static str, listener: impl FnMut(&BoardEvent) + 'static) {
        self.state.events.on(name, listener);
    }

    /// Listen for every board event.
    pub fn on_any(&mut self, listener: impl FnMut(&BoardEvent) + 'static) {
        self.state.events.on_any(listener);
    }

    /// Listen for one event on one item.
    pub fn on_item(&mut self, key: ItemKey, name: &'static str, listener: impl FnMut(&ItemEvent) + 'static) {
        self.state.items.on(key, name, listener);
    }

    // --- Roster ---

    /// Add a player name. Returns `false` if it was already present.
    pub fn add_player(&mut self, name: &str) -> bool {
        self.state.add_player(name)
    }

    /// Remove a player name. Returns `false` if it was not present.
    pub fn remove_player(&mut self, name: &str) -> bool {
        self.state.remove_player(name)
    }

    // --- Local mutations ---

    /// Create an item owned by this player and replicate it.
    pub fn add_item(&mut self, new_item: NewItem) -> Result<ItemKey, BoardError> {
        let key = self.state.next_key;
        let item = Item {
            key,
            owner: self.state.player_name.clone(),
            transform: new_item.transform,
            size: new_item.size,
            kind: new_item.kind,
            data: new_item.data,
            parent: None,
            children: HashSet::new(),
            selected: false,
        };
        self.apply(Message::AddItem(item.snapshot()), Origin::Local)?;
        Ok(key)
    }

    /// Move an item. Missing or non-finite components are left as they are.
    pub fn move_item(&mut self, key: ItemKey, position: impl Into<PartialPosition>) -> Result<(), BoardError> {
        let position = position.into();
        self.apply(Message::MoveItem { key, position }, Origin::Local)
    }

    /// Rescale an item. Missing or non-finite components are left as they are.
    pub fn scale_item(&mut self, key: ItemKey, scale: impl Into<PartialScale>) -> Result<(), BoardError> {
        let scale = scale.into();
        self.apply(Message::ScaleItem { key, scale }, Origin::Local)
    }

    /// Set an item's rotation, in radians.
    pub fn rotate_item(&mut self, key: ItemKey, rotation: f64) -> Result<(), BoardError> {
        let rotation = Some(rotation);
        self.apply(Message::RotateItem { key, rotation }, Origin::Local)
    }

    /// Attach `child` under `parent`, keeping its absolute placement.
    pub fn parent_item(&mut self, child: ItemKey, parent: ItemKey) -> Result<(), BoardError> {
        self.apply(Message::ParentItem { child, parent }, Origin::Local)
    }

    /// Detach `child` to the top level, keeping its absolute placement.
    pub fn unparent_item(&mut self, child: ItemKey) -> Result<(), BoardError> {
        self.apply(Message::UnparentItem { child }, Origin::Local)
    }

    /// Selection is local to each participant and not replicated.
    pub fn select_item(&mut self, key: ItemKey) -> Result<(), BoardError> {
        Ok(self.state.items.select(key)?)
    }

    /// Clear the local selection flag.
    pub fn deselect_item(&mut self, key: ItemKey) -> Result<(), BoardError> {
        Ok(self.state.items.deselect(key)?)
    }

    /// Apply a mutation, notify listeners, then let the role replicate it.
    /// A rejected mutation is neither announced nor replicated.
    pub fn apply(&mut self, message: Message, origin: Origin) -> Result<(), BoardError> {
        self.state.mutate(&message)?;
        log::debug!("Applied {} ({:?})", message.event_name(), origin);
        self.state.emit(BoardEvent::Applied {
            message: message.clone(),
            origin: origin.clone(),
        });
        self.role.propagate(&mut self.state, &message, &origin);
        Ok(())
    }

    // --- Inbound ---

    /// Feed carrier activity for the connection `id`.
    pub fn handle_transport(&mut self, id: &ConnectionId, event: TransportEvent) {
        let Some(connection) = self.state.connections.get_mut(id) else {
            log::debug!("Ignoring {} from unknown connection {}", event.name(), id);
            return;
        };
        connection.emit(&event);

        match event {
            TransportEvent::Open => {
                if connection.mark_open() {
                    log::info!("Connection {} open ({:?})", id, connection.kind());
                    self.role.on_open(&mut self.state, id);
                }
            }
            TransportEvent::Data(text) => self.receive(id, &text),
            TransportEvent::Close => {
                connection.mark_closed();
                self.state.connections.remove(id);
                log::info!("Connection {} closed", id);
                self.role.on_close(&mut self.state, id);
            }
            TransportEvent::Error(message) => {
                log::warn!("Transport error on {}: {}", id, message);
                self.state.set_status(Status::Error(message));
            }
        }
    }

    /// Feed a notice from the relay.
    pub fn handle_relay(&mut self, notice: RelayNotice) {
        match notice {
            RelayNotice::RouteData { sender_id, payload } => {
                self.handle_transport(&sender_id.into(), TransportEvent::Data(payload));
            }
            RelayNotice::RouteClose { peer_id } => {
                self.handle_transport(&peer_id.into(), TransportEvent::Close);
            }
            RelayNotice::RouteOpen { peer_id } => {
                if let Err(e) = self.role.on_route_open(&mut self.state, &peer_id) {
                    log::warn!("Failed to open route to {}: {}", peer_id, e);
                }
            }
            RelayNotice::Error { message } => {
                log::warn!("Relay error: {}", message);
                self.role.on_relay_error(&mut self.state, message);
            }
            RelayNotice::BoardCreated { board_id } => log::info!("Relay registered board {}", board_id),
            RelayNotice::BoardFound { board_id, host_peer_id } => {
                log::info!("Relay found board {}: host {:?}", board_id, host_peer_id);
            }
        }
    }

    /// Feed an event drained from [`NativeRelaySocket::poll_events`].
    /// Losing the relay counts as a relay error.
    ///
    /// [`NativeRelaySocket::poll_events`]: crate::relay::NativeRelaySocket::poll_events
    #[cfg(not(target_arch = "wasm32"))]
    pub fn handle_relay_event(&mut self, event: RelayEvent) {
        match event {
            RelayEvent::Connected => log::info!("Board {} reached the relay", self.state.id),
            RelayEvent::Notice(notice) => self.handle_relay(notice),
            RelayEvent::Error { message } => self.role.on_relay_error(&mut self.state, message),
            RelayEvent::Disconnected => {
                log::warn!("Board {} lost the relay", self.state.id);
                self.role.on_relay_error(&mut self.state, "relay disconnected".to_string());
            }
        }
    }

    /// Handle one inbound frame. Failures are logged and the message
    /// dropped; the connection stays up.
    pub fn receive(&mut self, from: &ConnectionId, text: &str) {
        if let Err(e) = self.dispatch(from, text) {
            log::warn!("Dropped message from {} ({}): {}", from, self.role.role(), e);
        }
    }

    /// Decode and route one inbound frame.
    pub fn dispatch(&mut self, from: &ConnectionId, text: &str) -> Result<(), BoardError> {
        let message = protocol::decode(text)?;
        if message.is_handshake() {
            return self.role.on_handshake(&mut self.state, from, message);
        }
        if !self.role.accepts(from) {
            return Err(BoardError::NotJoined(from.clone()));
        }
        self.apply(message, Origin::Remote(from.clone()))
    }
}
