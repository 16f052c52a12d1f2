//! Device Connection Registry

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Device announcing itself on a streaming connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub device_id: String,
    pub device_type: String,
}

/// Live streaming session for one device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionState {
    pub user_id: String,
    pub device_id: String,
    pub device_type: String,
    pub connected_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
}

#[derive(Debug)]
struct Session {
    state: ConnectionState,
    /// Monotonic activity clock used for idle detection
    last_seen: Instant,
}

/// Sessions keyed by device id
#[derive(Debug, Default)]
pub struct SessionTable {
    sessions: HashMap<String, Session>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a device; a device already connected keeps its session
    pub fn register(&mut self, user_id: &str, device: DeviceInfo) -> ConnectionState {
        if let Some(existing) = self.sessions.get(&device.device_id) {
            if existing.state.user_id != user_id {
                warn!(
                    "Device {} already connected for user {}, ignoring registration for {}",
                    device.device_id, existing.state.user_id, user_id
                );
            } else {
                debug!("Device {} already connected", device.device_id);
            }
            return existing.state.clone();
        }

        let now = Utc::now();
        let state = ConnectionState {
            user_id: user_id.to_string(),
            device_id: device.device_id.clone(),
            device_type: device.device_type,
            connected_at: now,
            last_activity_at: now,
        };
        info!("Device {} connected for user {}", state.device_id, user_id);
        self.sessions.insert(
            device.device_id,
            Session {
                state: state.clone(),
                last_seen: Instant::now(),
            },
        );
        state
    }

    /// Refresh a device's activity; unknown devices are ignored
    pub fn touch(&mut self, device_id: &str) -> bool {
        match self.sessions.get_mut(device_id) {
            Some(session) => {
                session.state.last_activity_at = Utc::now();
                session.last_seen = Instant::now();
                true
            }
            None => false,
        }
    }

    /// Drop a device's session
    pub fn disconnect(&mut self, device_id: &str) -> Option<ConnectionState> {
        let removed = self.sessions.remove(device_id).map(|s| s.state);
        if let Some(state) = &removed {
            info!("Device {} disconnected (user {})", device_id, state.user_id);
        }
        removed
    }

    /// Disconnect every device idle for longer than `timeout`
    pub fn sweep_idle(&mut self, timeout: Duration) -> Vec<ConnectionState> {
        let now = Instant::now();
        let idle: Vec<String> = self
            .sessions
            .iter()
            .filter(|(_, s)| now.duration_since(s.last_seen) > timeout)
            .map(|(id, _)| id.clone())
            .collect();

        idle.into_iter()
            .filter_map(|id| {
                let state = self.sessions.remove(&id).map(|s| s.state);
                if let Some(state) = &state {
                    warn!(
                        "Device {} idle for more than {}s, disconnecting",
                        state.device_id,
                        timeout.as_secs()
                    );
                }
                state
            })
            .collect()
    }

    pub fn get(&self, device_id: &str) -> Option<&ConnectionState> {
        self.sessions.get(device_id).map(|s| &s.state)
    }

    /// Snapshot of all live sessions
    pub fn states(&self) -> Vec<ConnectionState> {
        self.sessions.values().map(|s| s.state.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
