//! Store and sync configuration.

use crate::geometry::Size;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default hub endpoint.
pub const DEFAULT_HUB_URL: &str = "ws://127.0.0.1:3030/ws";

/// Configuration of a [`Store`](crate::store::Store).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// How many committed mutations the store keeps in its log.
    pub max_log_len: usize,
    /// Video canvas size until the main window sets it.
    pub canvas: Size,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_log_len: 256,
            canvas: Size::new(1920.0, 1080.0),
        }
    }
}

impl StoreConfig {
    /// Parse from JSON. Missing fields fall back to defaults.
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

/// Configuration of a window's connection to the hub.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub hub_url: String,
    /// How long a child window waits for its initial snapshot.
    pub snapshot_timeout_ms: u64,
    /// How long an id allocation may take.
    pub id_timeout_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            hub_url: DEFAULT_HUB_URL.to_string(),
            snapshot_timeout_ms: 5_000,
            id_timeout_ms: 2_000,
        }
    }
}

impl SyncConfig {
    /// Parse from JSON. Missing fields fall back to defaults.
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    pub fn snapshot_timeout(&self) -> Duration {
        Duration::from_millis(self.snapshot_timeout_ms)
    }

    pub fn id_timeout(&self) -> Duration {
        Duration::from_millis(self.id_timeout_ms)
    }
}
