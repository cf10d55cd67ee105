//! Application state
//!
//! Holds all shared components and state

use crate::attendance::{AttendanceIngester, AttendanceStore};
use crate::device_gateway::DeviceGateway;
use crate::device_registry::DeviceRegistry;
use crate::device_status_tracker::DeviceStatusTracker;
use crate::lifecycle_reconciler::LifecycleReconciler;
use crate::polling_orchestrator::{PollSettings, PollingOrchestrator};
use chrono_tz::Tz;
use std::sync::Arc;
use std::time::Duration;

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Database URL
    pub database_url: String,
    /// Server port
    pub port: u16,
    /// Server host
    pub host: String,
    /// Poll cycle interval (seconds)
    pub poll_interval_secs: u64,
    /// Timeout of one device HTTP exchange (milliseconds)
    pub device_timeout_ms: u64,
    /// Window start on a device's first poll (minutes before now)
    pub poll_lookback_minutes: i64,
    /// `maxResults` per search page
    pub poll_max_results: u32,
    /// Pages followed per device per cycle
    pub poll_max_pages: u32,
    /// Idle days before a member is inactivated
    pub inactivity_threshold_days: u32,
    /// Reconciler run interval (seconds)
    pub reconcile_interval_secs: u64,
    /// Zone of device clocks that report times without offset
    pub device_timezone: Tz,
    /// Redelivery window for keyless push events (seconds)
    pub webhook_dedup_window_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        let device_timezone = std::env::var("DEVICE_TIMEZONE")
            .ok()
            .and_then(|tz| match tz.parse::<Tz>() {
                Ok(tz) => Some(tz),
                Err(_) => {
                    tracing::warn!(value = %tz, "Invalid DEVICE_TIMEZONE, using UTC");
                    None
                }
            })
            .unwrap_or(Tz::UTC);

        Self {
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "mysql://root@localhost/gym".to_string()),
            port: env_or("PORT", 8080),
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            poll_interval_secs: env_or("POLL_INTERVAL_SECS", 60),
            device_timeout_ms: env_or("DEVICE_TIMEOUT_MS", 5000),
            poll_lookback_minutes: env_or("POLL_LOOKBACK_MINUTES", 10),
            poll_max_results: env_or("POLL_MAX_RESULTS", 30),
            poll_max_pages: env_or("POLL_MAX_PAGES", 10),
            inactivity_threshold_days: env_or("INACTIVITY_THRESHOLD_DAYS", 60),
            reconcile_interval_secs: env_or("RECONCILE_INTERVAL_SECS", 21600),
            device_timezone,
            webhook_dedup_window_secs: env_or("WEBHOOK_DEDUP_WINDOW_SECS", 3),
        }
    }
}

impl AppConfig {
    pub fn device_timeout(&self) -> Duration {
        Duration::from_millis(self.device_timeout_ms)
    }

    /// Poll loop settings. A device poll may use at most one interval.
    pub fn poll_settings(&self) -> PollSettings {
        let interval = Duration::from_secs(self.poll_interval_secs.max(1));
        PollSettings {
            interval,
            lookback: chrono::Duration::minutes(self.poll_lookback_minutes),
            max_results: self.poll_max_results.max(1),
            max_pages: self.poll_max_pages.max(1),
            device_budget: interval,
            timezone: self.device_timezone,
        }
    }
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Application config
    pub config: AppConfig,
    /// Attendance and member storage
    pub store: Arc<dyn AttendanceStore>,
    /// DeviceRegistry (access_devices cache)
    pub registry: Arc<DeviceRegistry>,
    /// DeviceGateway (ISAPI over digest auth)
    pub gateway: Arc<DeviceGateway>,
    /// DeviceStatusTracker (online/offline/auth rejected)
    pub device_status: Arc<DeviceStatusTracker>,
    /// AttendanceIngester
    pub ingester: Arc<AttendanceIngester>,
    /// PollingOrchestrator
    pub polling: Arc<PollingOrchestrator>,
    /// LifecycleReconciler
    pub reconciler: Arc<LifecycleReconciler>,
}

impl AppState {
    /// Wire all components over `store` and `registry`
    pub fn build(
        config: AppConfig,
        store: Arc<dyn AttendanceStore>,
        registry: Arc<DeviceRegistry>,
    ) -> Self {
        let gateway = Arc::new(DeviceGateway::new(
            config.device_timeout(),
            config.device_timezone,
        ));
        let device_status = Arc::new(DeviceStatusTracker::new());
        let ingester = Arc::new(AttendanceIngester::new(
            store.clone(),
            registry.clone(),
            config.device_timezone,
            config.webhook_dedup_window_secs,
        ));
        let polling = Arc::new(PollingOrchestrator::new(
            registry.clone(),
            gateway.clone(),
            ingester.clone(),
            device_status.clone(),
            config.poll_settings(),
        ));
        let reconciler = Arc::new(
            LifecycleReconciler::new(store.clone(), config.inactivity_threshold_days)
                .with_tick_interval(config.reconcile_interval_secs.max(1)),
        );

        Self {
            config,
            store,
            registry,
            gateway,
            device_status,
            ingester,
            polling,
            reconciler,
        }
    }
}
