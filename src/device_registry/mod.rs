//! DeviceRegistry - controller inventory
//!
//! ## Responsibilities
//!
//! - Load `access_devices` and keep an in-memory copy for the poll loop
//!   and webhook intake
//! - Derive the address -> direction table from the device roles
//!
//! Devices are configured outside this service; the registry only reads.

mod repository;

pub use repository::DeviceRepository;

use crate::device_gateway::Device;
use crate::direction_table::{host_key, DirectionTable};
use sqlx::MySqlPool;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Registry instance
pub struct DeviceRegistry {
    /// `None` for a fixed device list (probe tool, tests)
    repo: Option<DeviceRepository>,
    cache: Arc<RwLock<RegistryCache>>,
}

impl DeviceRegistry {
    /// Create registry backed by the database and load it
    pub async fn new(pool: MySqlPool) -> crate::Result<Self> {
        let registry = Self {
            repo: Some(DeviceRepository::new(pool)),
            cache: Arc::new(RwLock::new(RegistryCache::default())),
        };

        registry.refresh().await?;

        Ok(registry)
    }

    /// Registry over a fixed device list
    pub fn from_devices(devices: Vec<Device>) -> Self {
        Self {
            repo: None,
            cache: Arc::new(RwLock::new(RegistryCache::build(devices))),
        }
    }

    /// Reload devices from the database
    pub async fn refresh(&self) -> crate::Result<usize> {
        let repo = match &self.repo {
            Some(repo) => repo,
            None => return Ok(self.cache.read().await.devices.len()),
        };

        let devices = repo.get_all_devices().await?;
        let count = devices.len();
        *self.cache.write().await = RegistryCache::build(devices);

        tracing::info!("DeviceRegistry cache refreshed: {} devices", count);

        Ok(count)
    }

    /// All devices
    pub async fn list(&self) -> Vec<Device> {
        self.cache.read().await.devices.clone()
    }

    /// Enabled devices (poll targets)
    pub async fn enabled(&self) -> Vec<Device> {
        self.cache
            .read()
            .await
            .devices
            .iter()
            .filter(|d| d.enabled)
            .cloned()
            .collect()
    }

    pub async fn get(&self, device_id: &str) -> Option<Device> {
        self.cache
            .read()
            .await
            .devices
            .iter()
            .find(|d| d.id == device_id)
            .cloned()
    }

    /// Device whose host matches `address` (port and scheme ignored)
    pub async fn find_by_address(&self, address: &str) -> Option<Device> {
        let key = host_key(address);
        self.cache
            .read()
            .await
            .devices
            .iter()
            .find(|d| host_key(&d.address) == key)
            .cloned()
    }

    /// Snapshot of the current direction table
    pub async fn direction_table(&self) -> DirectionTable {
        self.cache.read().await.directions.clone()
    }
}

#[derive(Default)]
struct RegistryCache {
    devices: Vec<Device>,
    directions: DirectionTable,
}

impl RegistryCache {
    fn build(devices: Vec<Device>) -> Self {
        let directions = DirectionTable::from_devices(&devices);
        Self {
            devices,
            directions,
        }
    }
}
