//! Storage contract for attendance and member lifecycle

use super::types::*;
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Storage used by the ingester and the reconciler.
///
/// Implementations must make `insert_attendance` idempotent on
/// `AttendanceRecord::id` and apply member updates conditionally, so that
/// concurrent pollers and webhook deliveries can write without locking.
#[async_trait]
pub trait AttendanceStore: Send + Sync {
    /// Insert unless a row with the same id exists
    async fn insert_attendance(&self, record: &AttendanceRecord) -> Result<InsertOutcome>;

    /// Advance `last_access` if `at` is strictly newer. Independently, set
    /// `first_access` whenever it is unset. Returns false for unknown
    /// members or no change.
    async fn update_member_last_access(&self, member_id: &str, at: DateTime<Utc>) -> Result<bool>;

    /// Active members with non-null `last_access` before `threshold`
    async fn list_active_members_older_than(&self, threshold: DateTime<Utc>) -> Result<Vec<String>>;

    /// Bulk conditional inactivation of `member_ids`; rows that no longer
    /// match (reactivated, fresh access) are left alone. Sets `needs_sync`.
    async fn set_members_inactive(&self, member_ids: &[String], threshold: DateTime<Utc>) -> Result<u64>;

    /// Explicit status change; sets `needs_sync`
    async fn set_member_status(&self, member_id: &str, status: MemberStatus) -> Result<bool>;

    async fn get_member(&self, member_id: &str) -> Result<Option<Member>>;

    /// Most recent first
    async fn list_attendance(&self, query: &AttendanceQuery) -> Result<Vec<AttendanceRecord>>;

    /// Administrative purge; returns rows deleted
    async fn purge_attendance_before(&self, before: DateTime<Utc>) -> Result<u64>;
}
