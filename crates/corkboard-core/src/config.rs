//! Session configuration for hosts and clients.

use crate::protocol::Settings;
use crate::relay::BoardId;
use serde::{Deserialize, Serialize};

#[cfg(not(target_arch = "wasm32"))]
use std::time::Duration;

#[cfg(target_arch = "wasm32")]
use web_time::Duration;

/// How long a direct connection attempt may take before it is abandoned.
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5500;

/// Direct attempts made before falling back to the relay.
pub const DEFAULT_DIRECT_ATTEMPTS: u32 = 2;

/// Client connect behaviour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectOptions {
    pub timeout_ms: u64,
    pub direct_attempts: u32,
}

impl ConnectOptions {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = timeout.as_millis() as u64;
        self
    }
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            direct_attempts: DEFAULT_DIRECT_ATTEMPTS,
        }
    }
}

/// Configuration of a hosted board.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    pub name: Option<String>,
    /// Id the relay allocated for the board.
    pub board_id: BoardId,
    /// Password clients must present. `None` or empty admits everyone.
    pub password: Option<String>,
    pub settings: Settings,
    /// Name of the hosting player.
    pub player_name: String,
}

impl HostConfig {
    pub fn new(board_id: BoardId, player_name: impl Into<String>) -> Self {
        Self {
            board_id,
            player_name: player_name.into(),
            ..Self::default()
        }
    }
}

/// Configuration of a board joined as a client.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub board_id: BoardId,
    /// Peer id of the host, as returned by the relay's `JoinBoard`.
    pub host_peer_id: String,
    pub password: Option<String>,
    pub player_name: String,
    pub connect: ConnectOptions,
}

impl ClientConfig {
    pub fn new(board_id: BoardId, host_peer_id: impl Into<String>, player_name: impl Into<String>) -> Self {
        Self {
            board_id,
            host_peer_id: host_peer_id.into(),
            player_name: player_name.into(),
            ..Self::default()
        }
    }
}
