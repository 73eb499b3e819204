//! Connectivity state tracking
//!
//! [`ConnectionMonitor`] is the single source of truth for whether the agent
//! service is reachable. It listens to a [`ConnectivitySource`] for
//! online/offline notifications, exposes manual checks, and runs an
//! exponential-backoff reconnection loop.

mod monitor;
mod source;

pub use monitor::{ConnectionMonitor, ConnectionMonitorConfig};
pub use source::{ConnectivityError, ConnectivitySource, ManualConnectivity};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Connectivity state of a [`ConnectionMonitor`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Connected,
    Connecting,
    /// Initial state, and the state after an offline notification
    #[default]
    Disconnected,
    Reconnecting,
    /// The source could not be read, or reconnection gave up
    Error,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Connected => "connected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Error => "error",
        };
        f.write_str(name)
    }
}
