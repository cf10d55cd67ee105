//! Attendance type definitions

use crate::direction_table::Direction;
use crate::event_normalizer::EventSource;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Persisted attendance row (append-only)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    /// Idempotency key
    pub id: String,
    pub device_address: String,
    pub subject_id: Option<String>,
    pub subject_name: Option<String>,
    /// Attendance time (device time on poll, receipt time on push)
    pub timestamp: DateTime<Utc>,
    /// Gateway receipt time, kept for audit
    pub received_at: DateTime<Utc>,
    pub direction: Direction,
    /// `major-minor`
    pub raw_code: String,
    pub source: EventSource,
}

/// Result of `insert_attendance`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InsertOutcome {
    Inserted,
    Duplicate,
}

/// Member lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberStatus {
    Active,
    Inactive,
}

impl MemberStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "inactive" => Self::Inactive,
            _ => Self::Active,
        }
    }
}

/// Fields of the member entity owned by this service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Member {
    pub id: String,
    pub status: MemberStatus,
    pub last_access: Option<DateTime<Utc>>,
    pub first_access: Option<DateTime<Utc>>,
    /// Changed here, not yet pushed upstream
    pub needs_sync: bool,
}

impl Member {
    pub fn active(id: &str) -> Self {
        Self {
            id: id.to_string(),
            status: MemberStatus::Active,
            last_access: None,
            first_access: None,
            needs_sync: false,
        }
    }

    pub fn with_last_access(mut self, at: DateTime<Utc>) -> Self {
        self.last_access = Some(at);
        self.first_access.get_or_insert(at);
        self
    }
}

/// Attendance listing filter
#[derive(Debug, Clone, Deserialize)]
pub struct AttendanceQuery {
    pub subject_id: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: u32,
}

fn default_limit() -> u32 {
    100
}

impl Default for AttendanceQuery {
    fn default() -> Self {
        Self {
            subject_id: None,
            limit: default_limit(),
        }
    }
}

/// Per-event ingestion result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestOutcome {
    Inserted,
    Duplicate,
    /// Suppressed by the push redelivery window
    Suppressed,
}

/// Batch ingestion summary
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub inserted: usize,
    pub duplicates: usize,
    pub suppressed: usize,
    pub records: Vec<String>,
}

impl IngestReport {
    /// Events accepted (new or already stored)
    pub fn count(&self) -> usize {
        self.inserted + self.duplicates + self.suppressed
    }

    pub(crate) fn add(&mut self, outcome: IngestOutcome, record_id: String) {
        match outcome {
            IngestOutcome::Inserted => self.inserted += 1,
            IngestOutcome::Duplicate => self.duplicates += 1,
            IngestOutcome::Suppressed => self.suppressed += 1,
        }
        self.records.push(record_id);
    }
}

/// Webhook intake acknowledgement
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WebhookAck {
    /// At least one event was recognized and stored (or already stored)
    pub accepted: bool,
    pub inserted: usize,
    pub duplicates: usize,
    /// Items dropped as status pings
    pub dropped: usize,
}
