//! DeviceRegistry Repository
//!
//! Database access layer for `access_devices`

use crate::device_gateway::{Device, Dialect, DirectionRole};
use crate::digest_auth::Credentials;
use crate::error::Result;
use sqlx::MySqlPool;

/// Database row for access_devices
#[derive(Debug, sqlx::FromRow)]
struct DeviceRow {
    pub device_id: String,
    pub address: String,
    pub username: String,
    pub password: String,
    pub direction_role: String,
    pub dialect: String,
    pub enabled: bool,
}

impl From<DeviceRow> for Device {
    fn from(row: DeviceRow) -> Self {
        Device {
            id: row.device_id,
            address: row.address,
            credentials: Credentials {
                username: row.username,
                password: row.password,
            },
            role: DirectionRole::from_str(&row.direction_role),
            dialect: Dialect::from_str(&row.dialect),
            enabled: row.enabled,
        }
    }
}

/// Device repository for database operations
#[derive(Clone)]
pub struct DeviceRepository {
    pool: MySqlPool,
}

impl DeviceRepository {
    /// Create new repository
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }

    /// Get all registered devices
    pub async fn get_all_devices(&self) -> Result<Vec<Device>> {
        let rows: Vec<DeviceRow> = sqlx::query_as(
            r#"
            SELECT device_id, address, username, password,
                   direction_role, dialect, enabled
            FROM access_devices
            ORDER BY device_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Device::from).collect())
    }
}
