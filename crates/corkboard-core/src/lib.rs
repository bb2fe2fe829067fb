//! Corkboard Core Library
//!
//! Synchronization engine for shared corkboard sessions: a tree of
//! positioned, nestable items replicated from one authoritative host to its
//! clients over direct peer channels, with the relay server as fallback.

pub mod board;
pub mod codec;
pub mod config;
pub mod connection;
pub mod events;
pub mod items;
pub mod protocol;
pub mod relay;

#[cfg(test)]
pub(crate) mod testing;

pub use board::{
    Board, BoardError, BoardEvent, ClientBoard, HostBoard, KEY_BLOCK, LinkState, Origin, Replicator, Status,
};
pub use config::{ClientConfig, ConnectOptions, HostConfig};
pub use connection::{
    Connection, ConnectionId, ConnectionRegistry, PeerChannel, PeerDialer, TransportError, TransportEvent,
};
pub use events::{Emitter, NamedEvent};
pub use items::{Item, ItemEvent, ItemKey, ItemSnapshot, ItemTree, NewItem, StructuralError, Transform};
pub use protocol::{Message, ProtocolError};
pub use relay::{RelayNotice, RelayRequest, RelayTransport};
