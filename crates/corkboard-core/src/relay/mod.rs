//! Boundary with the rendezvous/relay server.
//!
//! The relay registers boards, hands out board ids, tells clients which peer
//! hosts a board, and forwards opaque payloads between sockets when a direct
//! peer channel cannot be established. The engine only speaks this envelope;
//! the server itself lives elsewhere.

#[cfg(not(target_arch = "wasm32"))]
mod socket;

#[cfg(not(target_arch = "wasm32"))]
pub use socket::{NativeRelaySocket, RelayEvent};

use crate::connection::TransportError;
use crate::protocol::Settings;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::rc::Rc;

/// Board identifier allocated by the relay.
pub type BoardId = u32;

/// Messages sent to the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RelayRequest {
    /// Register a new board hosted by `host_peer_id`.
    CreateBoard {
        host_peer_id: String,
        #[serde(default)]
        settings: Settings,
    },
    /// Ask which peer hosts `board_id`.
    JoinBoard { board_id: BoardId },
    /// Ask the relay to open a forwarded route to the board's host.
    RequestRoute { board_id: BoardId },
    /// Forward `payload` unopened to `receiver_id`.
    RouteData {
        board_id: BoardId,
        receiver_id: String,
        payload: String,
    },
    /// Tear down the route to `receiver_id`.
    RouteClose { board_id: BoardId, receiver_id: String },
}

/// Messages received from the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RelayNotice {
    /// Answer to `CreateBoard`.
    BoardCreated { board_id: BoardId },
    /// Answer to `JoinBoard`; `None` when the board does not exist.
    BoardFound {
        board_id: BoardId,
        #[serde(skip_serializing_if = "Option::is_none")]
        host_peer_id: Option<String>,
    },
    /// A forwarded route to `peer_id` is open.
    RouteOpen { peer_id: String },
    /// Forwarded payload from `sender_id`.
    RouteData { sender_id: String, payload: String },
    /// The route to `peer_id` closed.
    RouteClose { peer_id: String },
    /// Error message
    Error { message: String },
}

/// Outbound side of the relay channel.
pub trait RelayTransport {
    fn send(&mut self, request: &RelayRequest) -> Result<(), TransportError>;
}

/// One relay channel is shared by every relayed connection of a board.
pub type SharedRelay = Rc<RefCell<dyn RelayTransport>>;
