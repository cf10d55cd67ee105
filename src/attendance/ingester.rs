//! AttendanceIngester - idempotent persistence of canonical events
//!
//! ## Responsibilities
//!
//! - Idempotency key per event (stable tuple, event serial, or a random
//!   token behind a short redelivery window)
//! - Clock policy: receipt time on push, device time on poll
//! - Member `last_access` / `first_access` advancement, retried on duplicates
//!
//! Duplicates are successes. Only storage failures surface as errors.

use super::store::AttendanceStore;
use super::types::*;
use crate::device_registry::DeviceRegistry;
use crate::direction_table::host_key;
use crate::error::Result;
use crate::event_normalizer::{normalize_push, AccessEvent, EventSource, NormalizeContext};
use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Device/receipt time gap that is logged as clock skew
const CLOCK_SKEW_WARN_SECS: i64 = 86_400;

/// Stable idempotency key, if the event carries enough identity.
///
/// In order: (address, subject or code, device time); (address, event
/// serial); for polled events, (address, subject or code, raw time text).
/// `None` means only a random key is possible, which is push-only since a
/// polled event always carries a time string.
pub fn idempotency_key(event: &AccessEvent) -> Option<String> {
    let host = host_key(&event.device_address);
    let who = match &event.subject_id {
        Some(subject) => subject.clone(),
        None => format!("code:{}", event.code.raw_code()),
    };

    let material = match (&event.event_timestamp, &event.serial_no, &event.event_time_raw) {
        (Some(ts), _, _) => format!("evt|{}|{}|{}", host, who, ts.timestamp_millis()),
        (None, Some(serial), _) => format!("seq|{}|{}", host, serial),
        (None, None, Some(raw)) if event.source == EventSource::Poll => {
            format!("raw|{}|{}|{}", host, who, raw.trim())
        }
        _ => return None,
    };

    Some(hex_sha256(&material))
}

fn hex_sha256(input: &str) -> String {
    Sha256::digest(input.as_bytes())
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

/// Attendance time for the record
pub fn record_timestamp(event: &AccessEvent) -> DateTime<Utc> {
    match event.source {
        EventSource::Push => event.received_at,
        EventSource::Poll => event.event_timestamp.unwrap_or(event.received_at),
    }
}

/// Ingester instance
pub struct AttendanceIngester {
    store: Arc<dyn AttendanceStore>,
    registry: Arc<DeviceRegistry>,
    /// Zone for device times without offset
    timezone: Tz,
    dedup_window: Duration,
    /// Redelivery window for events without a stable key
    recent_push: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl AttendanceIngester {
    /// Create new ingester
    pub fn new(
        store: Arc<dyn AttendanceStore>,
        registry: Arc<DeviceRegistry>,
        timezone: Tz,
        dedup_window_secs: u64,
    ) -> Self {
        Self {
            store,
            registry,
            timezone,
            dedup_window: Duration::seconds(dedup_window_secs as i64),
            recent_push: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<dyn AttendanceStore> {
        &self.store
    }

    /// Persist one canonical event
    pub async fn ingest(&self, event: &AccessEvent) -> Result<(IngestOutcome, String)> {
        let id = match idempotency_key(event) {
            Some(id) => id,
            None => {
                if self.seen_recently(event).await {
                    tracing::debug!(
                        device_id = %event.device_id,
                        subject_id = ?event.subject_id,
                        "Push redelivery suppressed"
                    );
                    return Ok((IngestOutcome::Suppressed, String::new()));
                }
                Uuid::new_v4().simple().to_string()
            }
        };

        let timestamp = record_timestamp(event);
        self.check_clock(event);

        let record = AttendanceRecord {
            id: id.clone(),
            device_address: event.device_address.clone(),
            subject_id: event.subject_id.clone(),
            subject_name: event.subject_name.clone(),
            timestamp,
            received_at: event.received_at,
            direction: event.direction_hint,
            raw_code: event.code.raw_code(),
            source: event.source,
        };

        let outcome = match self.store.insert_attendance(&record).await? {
            InsertOutcome::Duplicate => IngestOutcome::Duplicate,
            InsertOutcome::Inserted => IngestOutcome::Inserted,
        };

        // Also on duplicates: a previous attempt may have stored the row
        // and failed before the member update. The update is monotonic.
        if let Some(subject) = &event.subject_id {
            let advanced = self.store.update_member_last_access(subject, timestamp).await?;
            tracing::debug!(
                subject_id = %subject,
                at = %timestamp,
                advanced = advanced,
                "Member last access evaluated"
            );
        }

        if outcome == IngestOutcome::Duplicate {
            tracing::debug!(record_id = %id, device_id = %event.device_id, "Duplicate attendance ignored");
            return Ok((outcome, id));
        }

        tracing::info!(
            record_id = %id,
            device_id = %event.device_id,
            subject_id = ?event.subject_id,
            direction = event.direction_hint.as_str(),
            code = %record.raw_code,
            source = event.source.as_str(),
            "Attendance recorded"
        );

        Ok((outcome, id))
    }

    /// Persist events in order
    pub async fn ingest_batch(&self, events: &[AccessEvent]) -> Result<IngestReport> {
        let mut report = IngestReport::default();
        for event in events {
            let (outcome, id) = self.ingest(event).await?;
            report.add(outcome, id);
        }
        Ok(report)
    }

    /// Handle one webhook delivery from `source_address`
    pub async fn ingest_webhook_payload(&self, raw: &[u8], source_address: &str) -> Result<WebhookAck> {
        self.ingest_webhook_payload_at(raw, source_address, Utc::now()).await
    }

    /// As `ingest_webhook_payload`, with an explicit receipt time
    pub async fn ingest_webhook_payload_at(
        &self,
        raw: &[u8],
        source_address: &str,
        received_at: DateTime<Utc>,
    ) -> Result<WebhookAck> {
        let device = self.registry.find_by_address(source_address).await;
        let (device_id, device_address) = match &device {
            Some(d) => (d.id.clone(), d.address.clone()),
            None => (source_address.to_string(), source_address.to_string()),
        };
        let directions = self.registry.direction_table().await;

        let ctx = NormalizeContext {
            device_id: &device_id,
            device_address: &device_address,
            received_at,
            directions: &directions,
            timezone: self.timezone,
            source: EventSource::Push,
        };
        let batch = normalize_push(raw, &ctx);

        if device.is_none() {
            tracing::warn!(address = %source_address, "Webhook from unregistered address");
        }
        if !batch.diagnostics.is_empty() {
            tracing::debug!(
                address = %source_address,
                diagnostics = ?batch.diagnostics,
                "Webhook payload diagnostics"
            );
        }

        let report = self.ingest_batch(&batch.events).await?;

        Ok(WebhookAck {
            accepted: !batch.events.is_empty(),
            inserted: report.inserted,
            duplicates: report.duplicates + report.suppressed,
            dropped: batch.dropped,
        })
    }

    /// True if an equivalent keyless event was seen within the window
    async fn seen_recently(&self, event: &AccessEvent) -> bool {
        let key = format!(
            "{}|{}|{}",
            host_key(&event.device_address),
            event.subject_id.as_deref().unwrap_or(""),
            event.code.raw_code()
        );
        let now = event.received_at;
        let window = self.dedup_window;

        let mut recent = self.recent_push.lock().await;
        recent.retain(|_, seen| now - *seen <= window);
        match recent.insert(key, now) {
            Some(prev) => now - prev <= window,
            None => false,
        }
    }

    fn check_clock(&self, event: &AccessEvent) {
        let device_time = match event.event_timestamp {
            Some(t) => t,
            None => return,
        };
        let skew = (device_time - event.received_at).num_seconds();
        if skew.abs() <= CLOCK_SKEW_WARN_SECS {
            return;
        }
        match event.source {
            EventSource::Poll => tracing::warn!(
                device_id = %event.device_id,
                device_time = %device_time,
                received_at = %event.received_at,
                skew_secs = skew,
                "Device clock skew; keeping device time"
            ),
            EventSource::Push => tracing::debug!(
                device_id = %event.device_id,
                device_time = %device_time,
                skew_secs = skew,
                "Device clock skew; using receipt time"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attendance::MemoryAttendanceStore;
    use crate::device_gateway::{Device, DirectionRole};
    use crate::direction_table::Direction;
    use crate::event_normalizer::EventCode;
    use chrono::TimeZone;

    fn event(source: EventSource) -> AccessEvent {
        AccessEvent {
            device_id: "gate-1".to_string(),
            device_address: "10.0.0.10".to_string(),
            subject_id: Some("123".to_string()),
            subject_name: Some("Jane Doe".to_string()),
            event_timestamp: Some(Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap()),
            event_time_raw: Some("2024-05-01T08:00:00Z".to_string()),
            received_at: Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 3).unwrap(),
            code: EventCode::new(5, 75),
            direction_hint: Direction::In,
            serial_no: None,
            source,
        }
    }

    fn setup() -> (Arc<MemoryAttendanceStore>, AttendanceIngester) {
        let store = Arc::new(MemoryAttendanceStore::new());
        let registry = Arc::new(DeviceRegistry::from_devices(vec![Device::new(
            "gate-1", "10.0.0.10", "admin", "pw",
        )
        .with_role(DirectionRole::In)]));
        let ingester = AttendanceIngester::new(store.clone(), registry, Tz::UTC, 3);
        (store, ingester)
    }

    #[test]
    fn test_key_is_stable_for_tuple() {
        let a = event(EventSource::Poll);
        let mut b = a.clone();
        b.received_at = b.received_at + Duration::minutes(5);
        b.device_address = "http://10.0.0.10:80".to_string();
        assert_eq!(idempotency_key(&a), idempotency_key(&b));

        let mut c = a.clone();
        c.subject_id = Some("124".to_string());
        assert_ne!(idempotency_key(&a), idempotency_key(&c));
    }

    #[test]
    fn test_key_falls_back_to_serial() {
        let mut e = event(EventSource::Push);
        e.event_timestamp = None;
        assert!(idempotency_key(&e).is_none());
        e.serial_no = Some("77".to_string());
        assert_eq!(idempotency_key(&e).map(|k| k.len()), Some(64));
    }

    #[test]
    fn test_clock_policy() {
        let poll = event(EventSource::Poll);
        assert_eq!(record_timestamp(&poll), poll.event_timestamp.unwrap());
        let push = event(EventSource::Push);
        assert_eq!(record_timestamp(&push), push.received_at);
    }

    #[tokio::test]
    async fn test_ingest_twice_yields_one_record() {
        let (store, ingester) = setup();
        store.put_member(Member::active("123")).await;
        let e = event(EventSource::Poll);

        let (first, id1) = ingester.ingest(&e).await.unwrap();
        let (second, id2) = ingester.ingest(&e).await.unwrap();
        assert_eq!(first, IngestOutcome::Inserted);
        assert_eq!(second, IngestOutcome::Duplicate);
        assert_eq!(id1, id2);
        assert_eq!(store.record_count().await, 1);

        let member = store.get_member("123").await.unwrap().unwrap();
        assert_eq!(member.last_access, e.event_timestamp);
        assert_eq!(member.first_access, e.event_timestamp);
    }

    #[tokio::test]
    async fn test_older_event_does_not_rewind_last_access() {
        let (store, ingester) = setup();
        store.put_member(Member::active("123")).await;
        let newer = event(EventSource::Poll);
        let mut older = newer.clone();
        older.event_timestamp = Some(newer.event_timestamp.unwrap() - Duration::days(2));

        ingester.ingest(&newer).await.unwrap();
        ingester.ingest(&older).await.unwrap();

        let member = store.get_member("123").await.unwrap().unwrap();
        assert_eq!(member.last_access, newer.event_timestamp);
        assert_eq!(store.record_count().await, 2);
    }

    #[tokio::test]
    async fn test_keyless_push_redelivery_window() {
        let (store, ingester) = setup();
        let mut e = event(EventSource::Push);
        e.event_timestamp = None;

        let (first, _) = ingester.ingest(&e).await.unwrap();
        let (again, _) = ingester.ingest(&e).await.unwrap();
        assert_eq!(first, IngestOutcome::Inserted);
        assert_eq!(again, IngestOutcome::Suppressed);

        let mut later = e.clone();
        later.received_at = e.received_at + Duration::seconds(10);
        let (third, _) = ingester.ingest(&later).await.unwrap();
        assert_eq!(third, IngestOutcome::Inserted);
        assert_eq!(store.record_count().await, 2);
    }

    #[tokio::test]
    async fn test_webhook_end_to_end() {
        let (store, ingester) = setup();
        store.put_member(Member::active("123")).await;
        let received = Utc.with_ymd_and_hms(2024, 5, 1, 9, 30, 0).unwrap();
        let body = br#"{"name":"Jane Doe","employeeNoString":"123","majorEventType":5,"subEventType":75}"#;

        let ack = ingester
            .ingest_webhook_payload_at(body, "10.0.0.10", received)
            .await
            .unwrap();
        assert!(ack.accepted);
        assert_eq!(ack.inserted, 1);

        let records = store.list_attendance(&AttendanceQuery::default()).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].subject_id.as_deref(), Some("123"));
        assert_eq!(records[0].subject_name.as_deref(), Some("Jane Doe"));
        assert_eq!(records[0].direction, Direction::In);
        assert_eq!(records[0].timestamp, received);

        let member = store.get_member("123").await.unwrap().unwrap();
        assert_eq!(member.last_access, Some(received));
    }

    #[tokio::test]
    async fn test_webhook_unmapped_address_is_check() {
        let (store, ingester) = setup();
        let body = br#"{"AccessControllerEvent":{"employeeNoString":"9","majorEventType":5,"subEventType":75}}"#;
        let ack = ingester.ingest_webhook_payload(body, "10.9.9.9").await.unwrap();
        assert!(ack.accepted);
        let records = store.list_attendance(&AttendanceQuery::default()).await.unwrap();
        assert_eq!(records[0].direction, Direction::Check);
    }

    #[tokio::test]
    async fn test_webhook_heartbeat_not_accepted() {
        let (store, ingester) = setup();
        let ack = ingester
            .ingest_webhook_payload(br#"{"eventType":"heartBeat"}"#, "10.0.0.10")
            .await
            .unwrap();
        assert!(!ack.accepted);
        assert_eq!(ack.dropped, 1);
        assert_eq!(store.record_count().await, 0);
    }

    #[test]
    fn test_poll_key_uses_raw_time_when_unparsable() {
        let mut e = event(EventSource::Poll);
        e.event_timestamp = None;
        e.event_time_raw = Some("20240501T100000+0800".to_string());
        let key = idempotency_key(&e);
        assert!(key.is_some());

        let mut redelivered = e.clone();
        redelivered.received_at = e.received_at + Duration::minutes(1);
        assert_eq!(idempotency_key(&redelivered), key);

        let mut push = e.clone();
        push.source = EventSource::Push;
        assert!(idempotency_key(&push).is_none());
    }

    #[test]
    fn test_key_without_subject_uses_code() {
        let mut e = event(EventSource::Poll);
        e.subject_id = None;
        let key = idempotency_key(&e);
        assert!(key.is_some());

        let mut other_code = e.clone();
        other_code.code = EventCode::new(196, 1);
        assert_ne!(idempotency_key(&other_code), key);
    }

    #[tokio::test]
    async fn test_repoll_of_degraded_event_yields_one_record() {
        let (store, ingester) = setup();
        let mut e = event(EventSource::Poll);
        e.event_timestamp = None;
        e.event_time_raw = Some("20240501T100000+0800".to_string());
        e.subject_id = None;

        let (first, _) = ingester.ingest(&e).await.unwrap();
        let mut later = e.clone();
        later.received_at = e.received_at + Duration::seconds(4);
        let (second, _) = ingester.ingest(&later).await.unwrap();

        assert_eq!(first, IngestOutcome::Inserted);
        assert_eq!(second, IngestOutcome::Duplicate);
        assert_eq!(store.record_count().await, 1);
    }

    /// Memory store whose first member update fails
    struct FlakyMemberStore {
        inner: MemoryAttendanceStore,
        failed: std::sync::atomic::AtomicBool,
    }

    #[async_trait::async_trait]
    impl AttendanceStore for FlakyMemberStore {
        async fn insert_attendance(&self, record: &AttendanceRecord) -> Result<InsertOutcome> {
            self.inner.insert_attendance(record).await
        }

        async fn update_member_last_access(&self, member_id: &str, at: DateTime<Utc>) -> Result<bool> {
            if !self.failed.swap(true, std::sync::atomic::Ordering::SeqCst) {
                return Err(crate::error::Error::Database("connection reset".to_string()));
            }
            self.inner.update_member_last_access(member_id, at).await
        }

        async fn list_active_members_older_than(&self, threshold: DateTime<Utc>) -> Result<Vec<String>> {
            self.inner.list_active_members_older_than(threshold).await
        }

        async fn set_members_inactive(&self, member_ids: &[String], threshold: DateTime<Utc>) -> Result<u64> {
            self.inner.set_members_inactive(member_ids, threshold).await
        }

        async fn set_member_status(&self, member_id: &str, status: MemberStatus) -> Result<bool> {
            self.inner.set_member_status(member_id, status).await
        }

        async fn get_member(&self, member_id: &str) -> Result<Option<Member>> {
            self.inner.get_member(member_id).await
        }

        async fn list_attendance(&self, query: &AttendanceQuery) -> Result<Vec<AttendanceRecord>> {
            self.inner.list_attendance(query).await
        }

        async fn purge_attendance_before(&self, before: DateTime<Utc>) -> Result<u64> {
            self.inner.purge_attendance_before(before).await
        }
    }

    #[tokio::test]
    async fn test_retry_after_member_update_failure_advances_member() {
        let inner = MemoryAttendanceStore::new();
        inner.put_member(Member::active("123")).await;
        let store = Arc::new(FlakyMemberStore {
            inner,
            failed: std::sync::atomic::AtomicBool::new(false),
        });
        let registry = Arc::new(DeviceRegistry::from_devices(Vec::new()));
        let ingester = AttendanceIngester::new(store.clone(), registry, Tz::UTC, 3);
        let e = event(EventSource::Poll);

        assert!(ingester.ingest(&e).await.is_err());
        let member = store.get_member("123").await.unwrap().unwrap();
        assert_eq!(member.last_access, None);

        let (outcome, _) = ingester.ingest(&e).await.unwrap();
        assert_eq!(outcome, IngestOutcome::Duplicate);
        assert_eq!(store.inner.record_count().await, 1);

        let member = store.get_member("123").await.unwrap().unwrap();
        assert_eq!(member.last_access, e.event_timestamp);
        assert_eq!(member.first_access, e.event_timestamp);
    }
}
