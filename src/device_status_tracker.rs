//! Device Status Tracker
//!
//! Tracks controller reachability per device. Only transitions are logged,
//! so a controller that stays offline does not warn on every poll cycle.

use crate::device_gateway::GatewayFault;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Device connection status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceConnectionStatus {
    /// Never polled
    Unknown,
    Online,
    /// Unreachable or timed out
    Offline,
    /// Reachable but rejecting credentials
    AuthRejected,
}

/// Status transition event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceStatusEvent {
    Lost,
    Recovered,
    CredentialsRejected,
}

/// Status as exposed over the API
#[derive(Debug, Clone, Serialize)]
pub struct DeviceStatusEntry {
    pub status: DeviceConnectionStatus,
    pub last_seen: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl Default for DeviceStatusEntry {
    fn default() -> Self {
        Self {
            status: DeviceConnectionStatus::Unknown,
            last_seen: None,
            last_error: None,
        }
    }
}

/// Tracks device status and detects transitions
pub struct DeviceStatusTracker {
    entries: RwLock<HashMap<String, DeviceStatusEntry>>,
}

impl DeviceStatusTracker {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Record a successful exchange
    pub async fn record_success(&self, device_id: &str) -> Option<DeviceStatusEvent> {
        self.update(device_id, DeviceConnectionStatus::Online, None).await
    }

    /// Record a gateway fault. Protocol rejections mean the device answered,
    /// so they count as online.
    pub async fn record_fault(&self, device_id: &str, fault: &GatewayFault) -> Option<DeviceStatusEvent> {
        let status = match fault {
            GatewayFault::Network { .. } => DeviceConnectionStatus::Offline,
            GatewayFault::Authentication { .. } => DeviceConnectionStatus::AuthRejected,
            GatewayFault::ProtocolMismatch { .. } | GatewayFault::Rejected { .. } => {
                DeviceConnectionStatus::Online
            }
        };
        self.update(device_id, status, Some(fault.to_string())).await
    }

    /// Record a poll abandoned by the cycle timeout
    pub async fn record_timeout(&self, device_id: &str) -> Option<DeviceStatusEvent> {
        self.update(
            device_id,
            DeviceConnectionStatus::Offline,
            Some("poll timed out".to_string()),
        )
        .await
    }

    /// Update status and return transition event if any
    ///
    /// - `Lost`: Online/Unknown -> Offline
    /// - `Recovered`: Offline/AuthRejected -> Online
    /// - `CredentialsRejected`: any other status -> AuthRejected
    async fn update(
        &self,
        device_id: &str,
        new_status: DeviceConnectionStatus,
        error: Option<String>,
    ) -> Option<DeviceStatusEvent> {
        use DeviceConnectionStatus::*;

        let mut entries = self.entries.write().await;
        let entry = entries.entry(device_id.to_string()).or_default();
        let prev = entry.status;

        entry.status = new_status;
        if new_status != Offline {
            entry.last_seen = Some(Utc::now());
        }
        entry.last_error = error;

        match (prev, new_status) {
            (Online | Unknown, Offline) => {
                tracing::warn!(device_id = %device_id, error = ?entry.last_error, "Device connection lost");
                Some(DeviceStatusEvent::Lost)
            }
            (Offline | AuthRejected, Online) => {
                tracing::info!(device_id = %device_id, "Device connection recovered");
                Some(DeviceStatusEvent::Recovered)
            }
            (Unknown | Online | Offline, AuthRejected) => {
                tracing::error!(device_id = %device_id, "Device rejected credentials");
                Some(DeviceStatusEvent::CredentialsRejected)
            }
            _ => None,
        }
    }

    pub async fn get_status(&self, device_id: &str) -> DeviceConnectionStatus {
        self.entries
            .read()
            .await
            .get(device_id)
            .map(|e| e.status)
            .unwrap_or(DeviceConnectionStatus::Unknown)
    }

    pub async fn get_entry(&self, device_id: &str) -> DeviceStatusEntry {
        self.entries
            .read()
            .await
            .get(device_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Devices currently offline or rejecting credentials
    pub async fn get_flagged_devices(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .entries
            .read()
            .await
            .iter()
            .filter(|(_, e)| {
                matches!(
                    e.status,
                    DeviceConnectionStatus::Offline | DeviceConnectionStatus::AuthRejected
                )
            })
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }
}

impl Default for DeviceStatusTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn network() -> GatewayFault {
        GatewayFault::Network {
            message: "connection refused".to_string(),
        }
    }

    fn auth() -> GatewayFault {
        GatewayFault::Authentication {
            status: 401,
            body: String::new(),
        }
    }

    #[tokio::test]
    async fn test_initial_online_no_event() {
        let tracker = DeviceStatusTracker::new();
        assert!(tracker.record_success("gate1").await.is_none());
        assert_eq!(tracker.get_status("gate1").await, DeviceConnectionStatus::Online);
    }

    #[tokio::test]
    async fn test_initial_offline_triggers_lost() {
        let tracker = DeviceStatusTracker::new();
        assert_eq!(tracker.record_fault("gate1", &network()).await, Some(DeviceStatusEvent::Lost));
    }

    #[tokio::test]
    async fn test_offline_to_online_triggers_recovered() {
        let tracker = DeviceStatusTracker::new();
        tracker.record_timeout("gate1").await;
        assert_eq!(tracker.record_success("gate1").await, Some(DeviceStatusEvent::Recovered));
    }

    #[tokio::test]
    async fn test_offline_to_offline_no_event() {
        let tracker = DeviceStatusTracker::new();
        tracker.record_fault("gate1", &network()).await;
        assert!(tracker.record_fault("gate1", &network()).await.is_none());
    }

    #[tokio::test]
    async fn test_auth_rejection_flags_device() {
        let tracker = DeviceStatusTracker::new();
        tracker.record_success("gate1").await;
        tracker.record_success("gate2").await;
        assert_eq!(
            tracker.record_fault("gate1", &auth()).await,
            Some(DeviceStatusEvent::CredentialsRejected)
        );
        assert!(tracker.record_fault("gate1", &auth()).await.is_none());
        assert_eq!(tracker.get_flagged_devices().await, vec!["gate1".to_string()]);
        assert_eq!(tracker.get_status("gate2").await, DeviceConnectionStatus::Online);
        assert!(tracker.get_entry("gate1").await.last_error.is_some());
    }

    #[tokio::test]
    async fn test_protocol_mismatch_counts_as_online() {
        let tracker = DeviceStatusTracker::new();
        let fault = GatewayFault::ProtocolMismatch {
            status: 400,
            body: String::new(),
            attempts: Vec::new(),
        };
        tracker.record_fault("gate1", &fault).await;
        assert_eq!(tracker.get_status("gate1").await, DeviceConnectionStatus::Online);
    }
}
