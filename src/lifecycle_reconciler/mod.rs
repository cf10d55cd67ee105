//! LifecycleReconciler - member active/inactive status from idle time
//!
//! ## Responsibilities
//!
//! - Periodic and on-demand inactivation of members idle beyond the
//!   threshold (one bulk conditional update per run)
//! - Explicit block/unblock
//!
//! ## State machine
//!
//! - active -> inactive: `last_access` older than the threshold
//! - inactive -> active: explicit unblock only
//!
//! Members with no recorded access are never inactivated.

use crate::attendance::{AttendanceStore, MemberStatus};
use crate::error::{Error, Result};
use chrono::{DateTime, Duration, NaiveTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::time::Duration as TokioDuration;
use tracing::{debug, error, info};

/// Default inactivity threshold
pub const DEFAULT_THRESHOLD_DAYS: u32 = 60;

/// Result of one reconcile run
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ReconcileReport {
    pub marked_inactive: u64,
    /// Candidates selected (some may have changed before the update)
    pub member_ids: Vec<String>,
    pub threshold: DateTime<Utc>,
}

/// Cut-off: midnight UTC, `threshold_days` before `now`'s date.
///
/// A member whose last access falls on an earlier calendar date is idle.
pub fn inactivity_cutoff(now: DateTime<Utc>, threshold_days: u32) -> DateTime<Utc> {
    let date = now.date_naive() - Duration::days(threshold_days as i64);
    date.and_time(NaiveTime::MIN).and_utc()
}

/// Reconciler instance
pub struct LifecycleReconciler {
    store: Arc<dyn AttendanceStore>,
    threshold_days: u32,
    /// Run interval (seconds)
    tick_interval_secs: u64,
}

impl LifecycleReconciler {
    /// Create new reconciler
    pub fn new(store: Arc<dyn AttendanceStore>, threshold_days: u32) -> Self {
        Self {
            store,
            threshold_days,
            tick_interval_secs: 6 * 60 * 60,
        }
    }

    /// Set run interval
    pub fn with_tick_interval(mut self, secs: u64) -> Self {
        self.tick_interval_secs = secs;
        self
    }

    pub fn threshold_days(&self) -> u32 {
        self.threshold_days
    }

    /// Start background loop
    pub async fn start(self: Arc<Self>) {
        info!(
            threshold_days = self.threshold_days,
            interval_secs = self.tick_interval_secs,
            "Lifecycle reconciler started"
        );

        tokio::spawn(async move {
            loop {
                if let Err(e) = self.tick().await {
                    error!(error = %e, "Reconcile tick error");
                }

                tokio::time::sleep(TokioDuration::from_secs(self.tick_interval_secs)).await;
            }
        });
    }

    /// One scheduled run with the configured threshold
    pub async fn tick(&self) -> Result<()> {
        self.reconcile_inactivity(self.threshold_days).await?;
        Ok(())
    }

    /// Inactivate members idle for more than `threshold_days`
    pub async fn reconcile_inactivity(&self, threshold_days: u32) -> Result<ReconcileReport> {
        self.reconcile_inactivity_at(threshold_days, Utc::now()).await
    }

    /// As `reconcile_inactivity`, evaluated at `now`
    pub async fn reconcile_inactivity_at(
        &self,
        threshold_days: u32,
        now: DateTime<Utc>,
    ) -> Result<ReconcileReport> {
        if threshold_days == 0 {
            return Err(Error::Validation(
                "threshold_days must be at least 1".to_string(),
            ));
        }

        let threshold = inactivity_cutoff(now, threshold_days);
        let member_ids = self.store.list_active_members_older_than(threshold).await?;

        if member_ids.is_empty() {
            debug!(threshold = %threshold, "No idle members");
            return Ok(ReconcileReport {
                marked_inactive: 0,
                member_ids,
                threshold,
            });
        }

        let marked_inactive = self.store.set_members_inactive(&member_ids, threshold).await?;

        info!(
            threshold = %threshold,
            candidates = member_ids.len(),
            marked_inactive = marked_inactive,
            "Idle members marked inactive"
        );

        Ok(ReconcileReport {
            marked_inactive,
            member_ids,
            threshold,
        })
    }

    /// Explicit block (inactive)
    pub async fn block(&self, member_id: &str) -> Result<()> {
        self.set_status(member_id, MemberStatus::Inactive).await
    }

    /// Explicit unblock (active); the only path back from inactive
    pub async fn unblock(&self, member_id: &str) -> Result<()> {
        self.set_status(member_id, MemberStatus::Active).await
    }

    async fn set_status(&self, member_id: &str, status: MemberStatus) -> Result<()> {
        if !self.store.set_member_status(member_id, status).await? {
            return Err(Error::NotFound(format!("Member {} not found", member_id)));
        }
        info!(member_id = %member_id, status = status.as_str(), "Member status set");
        Ok(())
    }
}
