//! Synchronizer configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tunables for one session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Quiet period after the last refetch trigger before the fetch fires.
    /// Default: 300
    pub debounce_ms: u64,

    /// Page size for authoritative fetches.
    /// Default: 50
    pub page_size: usize,

    /// Upper bound on conversations pulled by one fetch.
    /// Default: 200
    pub max_conversations: usize,

    /// Max buffered deliveries on the conversation channel before lagging.
    /// Default: 1000
    pub delivery_buffer: usize,

    /// Max buffered events per `Session::watch` receiver.
    /// Default: 64
    pub watcher_buffer: usize,

    /// Max characters of a text preview.
    /// Default: 80
    pub preview_max_chars: usize,
}

impl SyncConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 300,
            page_size: 50,
            max_conversations: 200,
            delivery_buffer: 1000,
            watcher_buffer: 64,
            preview_max_chars: 80,
        }
    }
}
