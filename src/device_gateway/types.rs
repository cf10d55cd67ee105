//! DeviceGateway type definitions

use crate::digest_auth::Credentials;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Wire dialect of a controller payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dialect {
    Json,
    Xml,
}

impl Default for Dialect {
    fn default() -> Self {
        Self::Json
    }
}

impl Dialect {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Xml => "xml",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "xml" => Self::Xml,
            _ => Self::Json,
        }
    }
}

/// Configured direction role of a controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DirectionRole {
    In,
    Out,
    Unknown,
}

impl Default for DirectionRole {
    fn default() -> Self {
        Self::Unknown
    }
}

impl DirectionRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::In => "in",
            Self::Out => "out",
            Self::Unknown => "unknown",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "in" | "entry" => Self::In,
            "out" | "exit" => Self::Out,
            _ => Self::Unknown,
        }
    }
}

/// One access-control terminal
#[derive(Debug, Clone)]
pub struct Device {
    pub id: String,
    /// `host`, `host:port` or base URL
    pub address: String,
    pub credentials: Credentials,
    pub role: DirectionRole,
    /// `Xml` marks firmware known to require the XML dialect
    pub dialect: Dialect,
    pub enabled: bool,
}

impl Device {
    pub fn new(id: &str, address: &str, username: &str, password: &str) -> Self {
        Self {
            id: id.to_string(),
            address: address.to_string(),
            credentials: Credentials {
                username: username.to_string(),
                password: password.to_string(),
            },
            role: DirectionRole::Unknown,
            dialect: Dialect::Json,
            enabled: true,
        }
    }

    pub fn with_role(mut self, role: DirectionRole) -> Self {
        self.role = role;
        self
    }

    pub fn with_dialect(mut self, dialect: Dialect) -> Self {
        self.dialect = dialect;
        self
    }

    pub fn requires_xml(&self) -> bool {
        self.dialect == Dialect::Xml
    }
}

/// Device summary as exposed over the API (no credentials)
#[derive(Debug, Clone, Serialize)]
pub struct DeviceSummary {
    pub id: String,
    pub address: String,
    pub role: DirectionRole,
    pub dialect: Dialect,
    pub enabled: bool,
}

impl From<&Device> for DeviceSummary {
    fn from(d: &Device) -> Self {
        Self {
            id: d.id.clone(),
            address: d.address.clone(),
            role: d.role,
            dialect: d.dialect,
            enabled: d.enabled,
        }
    }
}

/// Event search strategy, tried in order until one is accepted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchStrategy {
    JsonWindowed,
    JsonUnwindowed,
    XmlWindowed,
    XmlUnwindowed,
}

impl SearchStrategy {
    pub fn dialect(&self) -> Dialect {
        match self {
            Self::JsonWindowed | Self::JsonUnwindowed => Dialect::Json,
            Self::XmlWindowed | Self::XmlUnwindowed => Dialect::Xml,
        }
    }

    pub fn is_windowed(&self) -> bool {
        matches!(self, Self::JsonWindowed | Self::XmlWindowed)
    }

    /// Ordered strategy list for a device and query.
    ///
    /// JSON first; XML only for devices known to require it. Windowed
    /// variants are skipped when the caller gave no window.
    pub fn plan(device: &Device, has_window: bool) -> Vec<SearchStrategy> {
        let mut order = vec![Self::JsonWindowed, Self::JsonUnwindowed];
        if device.requires_xml() {
            order.push(Self::XmlWindowed);
            order.push(Self::XmlUnwindowed);
        }
        order
            .into_iter()
            .filter(|s| has_window || !s.is_windowed())
            .collect()
    }
}

/// Time window for event search
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Event search parameters
#[derive(Debug, Clone)]
pub struct EventSearchQuery {
    pub window: Option<SearchWindow>,
    /// `searchResultPosition`
    pub cursor: u32,
    pub max_results: u32,
    /// `searchID`; constant across pages of one search
    pub search_id: String,
}

impl EventSearchQuery {
    pub fn new(window: Option<SearchWindow>, max_results: u32) -> Self {
        Self {
            window,
            cursor: 0,
            max_results,
            search_id: uuid::Uuid::new_v4().simple().to_string(),
        }
    }

    pub fn next_page(&self, returned: u32) -> Self {
        Self {
            cursor: self.cursor + returned,
            ..self.clone()
        }
    }
}

/// One strategy attempt and what the device answered
#[derive(Debug, Clone, Serialize)]
pub struct StrategyAttempt {
    pub strategy: SearchStrategy,
    pub status: u16,
}

/// Accepted event search response
#[derive(Debug, Clone)]
pub struct SearchOutcome {
    pub strategy: SearchStrategy,
    pub dialect: Dialect,
    pub body: String,
    /// Rejected attempts before the accepted one
    pub rejected: Vec<StrategyAttempt>,
}

/// Device information (`/ISAPI/System/deviceInfo`)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub device_name: Option<String>,
    pub device_id: Option<String>,
    pub model: Option<String>,
    pub serial_number: Option<String>,
    pub mac_address: Option<String>,
    pub firmware_version: Option<String>,
    pub firmware_released_date: Option<String>,
}

/// User provisioning payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProvision {
    pub id: String,
    pub name: String,
    pub valid_from: DateTime<Utc>,
    pub valid_to: DateTime<Utc>,
}

/// Structured failure of a device call
#[derive(Debug, Clone, Serialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GatewayFault {
    /// Unreachable or timed out
    #[error("network failure: {message}")]
    Network { message: String },

    /// Digest credentials rejected after the challenge was answered
    #[error("authentication failed (status {status})")]
    Authentication { status: u16, body: String },

    /// Every search strategy was rejected
    #[error("no accepted dialect after {} attempts (last status {status})", .attempts.len())]
    ProtocolMismatch {
        status: u16,
        body: String,
        attempts: Vec<StrategyAttempt>,
    },

    /// A fixed-shape call returned a non-success status
    #[error("device rejected request (status {status})")]
    Rejected { status: u16, body: String },
}

impl GatewayFault {
    pub fn is_authentication(&self) -> bool {
        matches!(self, Self::Authentication { .. })
    }

    pub fn is_network(&self) -> bool {
        matches!(self, Self::Network { .. })
    }
}
