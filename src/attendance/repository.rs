//! Attendance Repository - MySQL implementation of `AttendanceStore`

use super::store::AttendanceStore;
use super::types::*;
use crate::direction_table::Direction;
use crate::error::{Error, Result};
use crate::event_normalizer::EventSource;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::MySqlPool;

/// Database row for attendance_records
#[derive(Debug, sqlx::FromRow)]
struct AttendanceRow {
    pub record_id: String,
    pub device_address: String,
    pub subject_id: Option<String>,
    pub subject_name: Option<String>,
    pub event_time: DateTime<Utc>,
    pub received_at: DateTime<Utc>,
    pub direction: String,
    pub raw_code: String,
    pub source: String,
}

impl From<AttendanceRow> for AttendanceRecord {
    fn from(row: AttendanceRow) -> Self {
        AttendanceRecord {
            id: row.record_id,
            device_address: row.device_address,
            subject_id: row.subject_id,
            subject_name: row.subject_name,
            timestamp: row.event_time,
            received_at: row.received_at,
            direction: Direction::from_str(&row.direction),
            raw_code: row.raw_code,
            source: EventSource::from_str(&row.source),
        }
    }
}

/// Database row for members
#[derive(Debug, sqlx::FromRow)]
struct MemberRow {
    pub member_id: String,
    pub status: String,
    pub last_access: Option<DateTime<Utc>>,
    pub first_access: Option<DateTime<Utc>>,
    pub needs_sync: bool,
}

impl From<MemberRow> for Member {
    fn from(row: MemberRow) -> Self {
        Member {
            id: row.member_id,
            status: MemberStatus::from_str(&row.status),
            last_access: row.last_access,
            first_access: row.first_access,
            needs_sync: row.needs_sync,
        }
    }
}

/// MySQL-backed store
#[derive(Clone)]
pub struct MySqlAttendanceStore {
    pool: MySqlPool,
}

impl MySqlAttendanceStore {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }

    /// Get pool reference (for internal use)
    pub fn pool(&self) -> &MySqlPool {
        &self.pool
    }
}

#[async_trait]
impl AttendanceStore for MySqlAttendanceStore {
    async fn insert_attendance(&self, record: &AttendanceRecord) -> Result<InsertOutcome> {
        let result = sqlx::query(
            r#"
            INSERT INTO attendance_records (
                record_id, device_address, subject_id, subject_name,
                event_time, received_at, direction, raw_code, source
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.id)
        .bind(&record.device_address)
        .bind(&record.subject_id)
        .bind(&record.subject_name)
        .bind(record.timestamp)
        .bind(record.received_at)
        .bind(record.direction.as_str())
        .bind(&record.raw_code)
        .bind(record.source.as_str())
        .execute(&self.pool)
        .await;

        // Only a key collision is a duplicate; every other failure surfaces
        match result {
            Ok(_) => Ok(InsertOutcome::Inserted),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => Ok(InsertOutcome::Duplicate),
            Err(e) => Err(Error::Database(e.to_string())),
        }
    }

    async fn update_member_last_access(&self, member_id: &str, at: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE members
            SET first_access = COALESCE(first_access, ?),
                last_access = CASE
                    WHEN last_access IS NULL OR last_access < ? THEN ?
                    ELSE last_access
                END
            WHERE member_id = ?
            AND (first_access IS NULL OR last_access IS NULL OR last_access < ?)
            "#,
        )
        .bind(at)
        .bind(at)
        .bind(at)
        .bind(member_id)
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_active_members_older_than(&self, threshold: DateTime<Utc>) -> Result<Vec<String>> {
        let ids: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT member_id FROM members
            WHERE status = 'active'
            AND last_access IS NOT NULL
            AND last_access < ?
            ORDER BY member_id
            "#,
        )
        .bind(threshold)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        Ok(ids.into_iter().map(|(id,)| id).collect())
    }

    async fn set_members_inactive(&self, member_ids: &[String], threshold: DateTime<Utc>) -> Result<u64> {
        if member_ids.is_empty() {
            return Ok(0);
        }

        let placeholders = vec!["?"; member_ids.len()].join(", ");
        let query = format!(
            r#"
            UPDATE members
            SET status = 'inactive', needs_sync = TRUE
            WHERE member_id IN ({})
            AND status = 'active'
            AND last_access IS NOT NULL
            AND last_access < ?
            "#,
            placeholders
        );

        let mut q = sqlx::query(&query);
        for id in member_ids {
            q = q.bind(id);
        }
        let result = q
            .bind(threshold)
            .execute(&self.pool)
            .await
            .map_err(|e| Error::Database(e.to_string()))?;

        Ok(result.rows_affected())
    }

    async fn set_member_status(&self, member_id: &str, status: MemberStatus) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE members
            SET status = ?, needs_sync = TRUE
            WHERE member_id = ?
            "#,
        )
        .bind(status.as_str())
        .bind(member_id)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    async fn get_member(&self, member_id: &str) -> Result<Option<Member>> {
        let row: Option<MemberRow> = sqlx::query_as(
            r#"
            SELECT member_id, status, last_access, first_access, needs_sync
            FROM members
            WHERE member_id = ?
            "#,
        )
        .bind(member_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        Ok(row.map(Member::from))
    }

    async fn list_attendance(&self, query: &AttendanceQuery) -> Result<Vec<AttendanceRecord>> {
        let rows: Vec<AttendanceRow> = sqlx::query_as(
            r#"
            SELECT record_id, device_address, subject_id, subject_name,
                   event_time, received_at, direction, raw_code, source
            FROM attendance_records
            WHERE (? IS NULL OR subject_id = ?)
            ORDER BY event_time DESC, record_id
            LIMIT ?
            "#,
        )
        .bind(&query.subject_id)
        .bind(&query.subject_id)
        .bind(query.limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        Ok(rows.into_iter().map(AttendanceRecord::from).collect())
    }

    async fn purge_attendance_before(&self, before: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM attendance_records WHERE event_time < ?")
            .bind(before)
            .execute(&self.pool)
            .await
            .map_err(|e| Error::Database(e.to_string()))?;

        tracing::info!(
            before = %before,
            deleted = result.rows_affected(),
            "Attendance purged"
        );

        Ok(result.rows_affected())
    }
}
