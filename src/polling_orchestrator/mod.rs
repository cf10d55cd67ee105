//! PollingOrchestrator - Concurrent Device Event Polling
//!
//! ## Responsibilities
//!
//! - Periodic event search on every enabled controller, concurrently
//! - Per-device window cursor and result paging
//! - Handing normalized events to the AttendanceIngester
//! - Feeding the DeviceStatusTracker
//!
//! A failing or slow device is skipped for the cycle; it never blocks or
//! aborts the others. Ingestion is idempotent, so an abandoned cycle needs
//! no cleanup.

use crate::attendance::AttendanceIngester;
use crate::device_gateway::{
    Device, DeviceGateway, EventSearchQuery, GatewayFault, SearchStrategy, SearchWindow,
};
use crate::device_registry::DeviceRegistry;
use crate::device_status_tracker::DeviceStatusTracker;
use crate::error::{Error, Result};
use crate::event_normalizer::{normalize, AccessEvent, EventSource, NormalizeContext};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use futures::future::join_all;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::{interval, timeout};

/// Polling parameters
#[derive(Debug, Clone)]
pub struct PollSettings {
    pub interval: Duration,
    /// Window start for a device's first poll
    pub lookback: chrono::Duration,
    pub max_results: u32,
    pub max_pages: u32,
    /// Budget for one device's whole poll within a cycle
    pub device_budget: Duration,
    /// Zone for device times without offset
    pub timezone: Tz,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            lookback: chrono::Duration::minutes(10),
            max_results: 30,
            max_pages: 10,
            device_budget: Duration::from_secs(60),
            timezone: Tz::UTC,
        }
    }
}

/// Result of polling one device
#[derive(Debug, Clone, Serialize)]
pub struct PollResult {
    pub device_id: String,
    /// Events ingested (new or already stored)
    pub count: usize,
    pub inserted: usize,
    pub duplicates: usize,
    /// Items dropped by the emission rule
    pub dropped: usize,
    pub pages: u32,
    pub strategy: Option<SearchStrategy>,
    pub records: Vec<AccessEvent>,
    /// Set when the device failed; events before the failure are kept
    pub fault: Option<GatewayFault>,
    /// Page limit reached while the device still reported `MORE`
    pub truncated: bool,
}

impl PollResult {
    fn empty(device_id: &str) -> Self {
        Self {
            device_id: device_id.to_string(),
            count: 0,
            inserted: 0,
            duplicates: 0,
            dropped: 0,
            pages: 0,
            strategy: None,
            records: Vec::new(),
            fault: None,
            truncated: false,
        }
    }

    /// Newest device time among the polled events
    fn newest_event_time(&self) -> Option<DateTime<Utc>> {
        self.records.iter().filter_map(|e| e.event_timestamp).max()
    }
}

/// PollingOrchestrator instance
pub struct PollingOrchestrator {
    registry: Arc<DeviceRegistry>,
    gateway: Arc<DeviceGateway>,
    ingester: Arc<AttendanceIngester>,
    status: Arc<DeviceStatusTracker>,
    settings: PollSettings,
    /// Window end of the last successful poll, per device
    cursors: RwLock<HashMap<String, DateTime<Utc>>>,
    running: RwLock<bool>,
}

impl PollingOrchestrator {
    /// Create new PollingOrchestrator
    pub fn new(
        registry: Arc<DeviceRegistry>,
        gateway: Arc<DeviceGateway>,
        ingester: Arc<AttendanceIngester>,
        status: Arc<DeviceStatusTracker>,
        settings: PollSettings,
    ) -> Self {
        Self {
            registry,
            gateway,
            ingester,
            status,
            settings,
            cursors: RwLock::new(HashMap::new()),
            running: RwLock::new(false),
        }
    }

    /// Start polling loop
    pub async fn start(self: Arc<Self>) {
        {
            let mut running = self.running.write().await;
            if *running {
                tracing::warn!("Polling already running");
                return;
            }
            *running = true;
        }

        tracing::info!(
            interval_secs = self.settings.interval.as_secs(),
            "Starting polling orchestrator"
        );

        tokio::spawn(async move {
            let mut interval = interval(self.settings.interval);

            loop {
                interval.tick().await;

                if !*self.running.read().await {
                    break;
                }

                self.run_cycle().await;
            }

            tracing::info!("Polling orchestrator stopped");
        });
    }

    /// Stop polling loop; an in-flight cycle is abandoned
    pub async fn stop(&self) {
        *self.running.write().await = false;
        tracing::info!("Stopping polling orchestrator");
    }

    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }

    /// Poll every enabled device once, concurrently
    pub async fn run_cycle(&self) -> Vec<PollResult> {
        if let Err(e) = self.registry.refresh().await {
            tracing::error!(error = %e, "Device registry refresh failed, using cached devices");
        }

        let devices = self.registry.enabled().await;
        if devices.is_empty() {
            tracing::debug!("No enabled devices");
            return Vec::new();
        }

        let polls = devices.iter().map(|device| async move {
            match timeout(self.settings.device_budget, self.poll_cursor(device)).await {
                Ok(Ok(result)) => Some(result),
                Ok(Err(e)) => {
                    tracing::error!(device_id = %device.id, error = %e, "Device poll failed");
                    None
                }
                Err(_) => {
                    self.status.record_timeout(&device.id).await;
                    tracing::warn!(
                        device_id = %device.id,
                        budget_secs = self.settings.device_budget.as_secs(),
                        "Device poll timed out, skipped this cycle"
                    );
                    None
                }
            }
        });

        let results: Vec<PollResult> = join_all(polls).await.into_iter().flatten().collect();

        let ingested: usize = results.iter().map(|r| r.inserted).sum();
        tracing::debug!(
            devices = devices.len(),
            completed = results.len(),
            inserted = ingested,
            "Poll cycle finished"
        );

        results
    }

    /// Poll one device on demand.
    ///
    /// Without a window start the device cursor is used and advanced, as in
    /// the background loop. An explicit window leaves the cursor alone.
    pub async fn poll_device_events(
        &self,
        device_id: &str,
        window_start: Option<DateTime<Utc>>,
        window_end: Option<DateTime<Utc>>,
    ) -> Result<PollResult> {
        let device = self
            .registry
            .get(device_id)
            .await
            .ok_or_else(|| Error::NotFound(format!("Device {} not found", device_id)))?;

        match window_start {
            None => self.poll_cursor(&device).await,
            Some(start) => {
                let end = window_end.unwrap_or_else(Utc::now);
                if end <= start {
                    return Err(Error::Validation(
                        "window end must be after window start".to_string(),
                    ));
                }
                self.poll_window(&device, SearchWindow { start, end }).await
            }
        }
    }

    /// Poll from the device cursor to now and advance it on success.
    ///
    /// A truncated poll only advances the cursor to its newest event, so
    /// the next cycle picks up the remainder.
    async fn poll_cursor(&self, device: &Device) -> Result<PollResult> {
        let now = Utc::now();
        let start = self
            .cursors
            .read()
            .await
            .get(&device.id)
            .copied()
            .unwrap_or(now - self.settings.lookback);
        let window = SearchWindow { start, end: now };

        let result = self.poll_window(device, window).await?;
        if result.fault.is_some() {
            return Ok(result);
        }

        let next = if result.truncated {
            result
                .newest_event_time()
                .map(|t| t.max(start).min(now))
                .unwrap_or(start)
        } else {
            now
        };
        self.cursors.write().await.insert(device.id.clone(), next);
        Ok(result)
    }

    /// Search, normalize and ingest every page of one window.
    ///
    /// Device faults end up in `PollResult::fault`; only storage errors
    /// are returned as `Err`.
    async fn poll_window(&self, device: &Device, window: SearchWindow) -> Result<PollResult> {
        let mut result = PollResult::empty(&device.id);
        let mut query = EventSearchQuery::new(Some(window), self.settings.max_results);
        let mut more = false;

        while result.pages < self.settings.max_pages {
            let outcome = match self.gateway.search_events(device, &query).await {
                Ok(outcome) => outcome,
                Err(fault) => {
                    self.status.record_fault(&device.id, &fault).await;
                    tracing::warn!(
                        device_id = %device.id,
                        page = result.pages,
                        error = %fault,
                        "Event search failed"
                    );
                    result.fault = Some(fault);
                    return Ok(result);
                }
            };
            self.status.record_success(&device.id).await;

            let directions = self.registry.direction_table().await;
            let ctx = NormalizeContext {
                device_id: &device.id,
                device_address: &device.address,
                received_at: Utc::now(),
                directions: &directions,
                timezone: self.settings.timezone,
                source: EventSource::Poll,
            };
            let batch = normalize(outcome.dialect, &outcome.body, &ctx);
            let report = self.ingester.ingest_batch(&batch.events).await?;

            result.pages += 1;
            result.strategy = Some(outcome.strategy);
            result.count += report.count();
            result.inserted += report.inserted;
            result.duplicates += report.duplicates + report.suppressed;
            result.dropped += batch.dropped;
            result.records.extend(batch.events);

            more = batch.more && batch.raw_count > 0;
            if !more {
                break;
            }
            query = query.next_page(batch.raw_count);
        }

        if more {
            result.truncated = true;
            tracing::warn!(
                device_id = %device.id,
                pages = result.pages,
                "Page limit reached with events remaining; resuming next cycle"
            );
        }

        if result.count > 0 {
            tracing::info!(
                device_id = %device.id,
                count = result.count,
                inserted = result.inserted,
                pages = result.pages,
                strategy = ?result.strategy,
                "Device events polled"
            );
        }

        Ok(result)
    }
}
