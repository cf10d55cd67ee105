//! Direction Table
//!
//! Maps a controller's network address to the direction its events mean.
//! Built from the device registry; an unmapped address or a device with
//! role `unknown` yields `check`, never an error.

use crate::device_gateway::{Device, DirectionRole};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Direction recorded on an attendance row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    In,
    Out,
    Check,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::In => "in",
            Self::Out => "out",
            Self::Check => "check",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "in" => Self::In,
            "out" => Self::Out,
            _ => Self::Check,
        }
    }
}

impl From<DirectionRole> for Direction {
    fn from(role: DirectionRole) -> Self {
        match role {
            DirectionRole::In => Self::In,
            DirectionRole::Out => Self::Out,
            DirectionRole::Unknown => Self::Check,
        }
    }
}

/// Address -> role lookup
#[derive(Debug, Clone, Default)]
pub struct DirectionTable {
    roles: HashMap<String, DirectionRole>,
}

impl DirectionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from device registry entries
    pub fn from_devices(devices: &[Device]) -> Self {
        let mut table = Self::new();
        for device in devices {
            table.insert(&device.address, device.role);
        }
        table
    }

    pub fn insert(&mut self, address: &str, role: DirectionRole) {
        self.roles.insert(host_key(address), role);
    }

    pub fn len(&self) -> usize {
        self.roles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roles.is_empty()
    }

    /// Direction for events coming from `address`
    pub fn resolve(&self, address: &str) -> Direction {
        self.roles
            .get(&host_key(address))
            .copied()
            .map(Direction::from)
            .unwrap_or(Direction::Check)
    }
}

/// Reduce `http://host:port/path`, `host:port` or `[v6]:port` to the bare host
pub fn host_key(address: &str) -> String {
    let mut rest = address.trim();
    if let Some(idx) = rest.find("://") {
        rest = &rest[idx + 3..];
    }
    if let Some(idx) = rest.find('/') {
        rest = &rest[..idx];
    }
    if let Some(idx) = rest.rfind('@') {
        rest = &rest[idx + 1..];
    }

    let host = if let Some(stripped) = rest.strip_prefix('[') {
        stripped.split(']').next().unwrap_or(stripped)
    } else if rest.matches(':').count() == 1 {
        rest.split(':').next().unwrap_or(rest)
    } else {
        rest
    };

    host.to_lowercase()
}
