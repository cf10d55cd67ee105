//! EventNormalizer - raw controller payloads to canonical access events
//!
//! ## Responsibilities
//!
//! - JSON dialect: first non-empty list among known result locations
//! - XML dialect: per-event fragments, tag-scoped field lookup
//! - Push bodies: first embedded JSON object (multipart tolerant)
//! - Emission rule: timestamp AND (subject id OR access-granted code)
//!
//! Normalization never fails. Unreadable input yields fewer events plus
//! diagnostics; a fragment with bad fields yields a partially-null event.

mod fields;
mod json;
mod push;
pub mod xml;

pub use fields::RawEventFields;
pub use json::RESULT_LOCATIONS;
pub use push::{extract_first_json_object, normalize_push};

use crate::device_gateway::Dialect;
use crate::direction_table::{Direction, DirectionTable};
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use fields::{MAJOR_KEYS, MINOR_KEYS, NAME_KEYS, SERIAL_KEYS, SUBJECT_KEYS, TIME_KEYS};
use serde::{Deserialize, Serialize};

/// XML element names that delimit one event, tried in order
const XML_EVENT_TAGS: &[&str] = &["Info", "AccessControllerEvent"];

/// How the event reached the gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventSource {
    /// Returned by an event search
    Poll,
    /// Delivered to the webhook endpoint
    Push,
}

impl EventSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Poll => "poll",
            Self::Push => "push",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "push" => Self::Push,
            _ => Self::Poll,
        }
    }
}

/// ISAPI major/minor event code
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventCode {
    pub major: Option<u32>,
    pub minor: Option<u32>,
}

impl EventCode {
    pub fn new(major: u32, minor: u32) -> Self {
        Self {
            major: Some(major),
            minor: Some(minor),
        }
    }

    /// (5, 75) card/face pass, or any major 196
    pub fn is_access_granted(&self) -> bool {
        matches!((self.major, self.minor), (Some(5), Some(75))) || self.major == Some(196)
    }

    /// `major-minor`, `?` for a missing part
    pub fn raw_code(&self) -> String {
        let part = |v: Option<u32>| v.map(|n| n.to_string()).unwrap_or_else(|| "?".to_string());
        format!("{}-{}", part(self.major), part(self.minor))
    }
}

/// Canonical access event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessEvent {
    pub device_id: String,
    pub device_address: String,
    pub subject_id: Option<String>,
    pub subject_name: Option<String>,
    /// Device-reported time, if present and readable
    pub event_timestamp: Option<DateTime<Utc>>,
    /// Device-reported time as sent
    pub event_time_raw: Option<String>,
    /// Gateway-observed time
    pub received_at: DateTime<Utc>,
    pub code: EventCode,
    pub direction_hint: Direction,
    /// Device event sequence number
    pub serial_no: Option<String>,
    pub source: EventSource,
}

impl AccessEvent {
    pub fn access_granted(&self) -> bool {
        self.code.is_access_granted()
    }
}

/// Per-payload context
#[derive(Debug, Clone, Copy)]
pub struct NormalizeContext<'a> {
    pub device_id: &'a str,
    pub device_address: &'a str,
    pub received_at: DateTime<Utc>,
    pub directions: &'a DirectionTable,
    /// Zone for device times without offset
    pub timezone: Tz,
    pub source: EventSource,
}

/// Result of normalizing one payload
#[derive(Debug, Clone, Default)]
pub struct NormalizedBatch {
    pub events: Vec<AccessEvent>,
    pub diagnostics: Vec<String>,
    /// Items dropped by the emission rule
    pub dropped: usize,
    /// Items the device returned (for advancing the search cursor)
    pub raw_count: u32,
    /// Device reported further pages
    pub more: bool,
}

/// Normalize a search response body
pub fn normalize(dialect: Dialect, payload: &str, ctx: &NormalizeContext<'_>) -> NormalizedBatch {
    let batch = match dialect {
        Dialect::Json => normalize_json(payload, ctx),
        Dialect::Xml => normalize_xml(payload, ctx),
    };

    if !batch.diagnostics.is_empty() {
        tracing::debug!(
            device_id = %ctx.device_id,
            dialect = dialect.as_str(),
            diagnostics = ?batch.diagnostics,
            "Payload normalized with diagnostics"
        );
    }
    batch
}

pub(crate) fn normalize_json(payload: &str, ctx: &NormalizeContext<'_>) -> NormalizedBatch {
    let mut batch = NormalizedBatch::default();

    let root: serde_json::Value = match serde_json::from_str(payload) {
        Ok(v) => v,
        Err(e) => {
            batch.diagnostics.push(format!("unparsable JSON payload: {}", e));
            return batch;
        }
    };

    batch.more = json::has_more(&root);

    let list = match json::locate_results(&root) {
        Some((_, list)) => list,
        None => {
            if !is_empty_result(&root) {
                batch
                    .diagnostics
                    .push("no known result list in JSON payload".to_string());
            }
            return batch;
        }
    };

    batch.raw_count = list.len() as u32;
    for (i, item) in list.iter().enumerate() {
        if !item.is_object() {
            batch.dropped += 1;
            batch.diagnostics.push(format!("item {} is not an object", i));
            continue;
        }
        let fields = json::extract_fields(item);
        if let Some(event) = build_event(fields, ctx, &mut batch) {
            batch.events.push(event);
        }
    }
    batch
}

fn is_empty_result(root: &serde_json::Value) -> bool {
    ["AcsEvent", "AcsEventSearchResult", "EventSearchResult"]
        .iter()
        .filter_map(|w| root.get(w))
        .any(|w| {
            w.get("numOfMatches").and_then(|n| n.as_u64()) == Some(0)
                || w.get("responseStatusStrg").and_then(|s| s.as_str()) == Some("NO MATCH")
        })
}

pub(crate) fn normalize_xml(payload: &str, ctx: &NormalizeContext<'_>) -> NormalizedBatch {
    let mut batch = NormalizedBatch {
        more: xml::extract_xml_value(payload, "responseStatusStrg")
            .map(|s| s.eq_ignore_ascii_case("MORE"))
            .unwrap_or(false),
        ..Default::default()
    };

    let (tag, fragments) = match XML_EVENT_TAGS
        .iter()
        .map(|tag| (*tag, xml::split_fragments(payload, tag)))
        .find(|(_, f)| !f.is_empty())
    {
        Some(found) => found,
        None => return batch,
    };

    // Push alerts carry the time on the enclosing element
    let wrapper_time = if tag == "AccessControllerEvent" {
        xml::extract_xml_value(payload, "dateTime")
    } else {
        None
    };

    batch.raw_count = fragments.len() as u32;
    for fragment in fragments {
        let mut fields = RawEventFields {
            time: xml::extract_first(fragment, TIME_KEYS).or_else(|| wrapper_time.clone()),
            subject_id: xml::extract_first(fragment, SUBJECT_KEYS),
            subject_name: xml::extract_first(fragment, NAME_KEYS),
            serial_no: xml::extract_first(fragment, SERIAL_KEYS),
            ..Default::default()
        };
        fields.set_major(xml::extract_first(fragment, MAJOR_KEYS));
        fields.set_minor(xml::extract_first(fragment, MINOR_KEYS));

        if let Some(event) = build_event(fields, ctx, &mut batch) {
            batch.events.push(event);
        }
    }
    batch
}

/// Apply the emission rule and build the canonical event
pub(crate) fn build_event(
    fields: RawEventFields,
    ctx: &NormalizeContext<'_>,
    batch: &mut NormalizedBatch,
) -> Option<AccessEvent> {
    let code = EventCode {
        major: fields.major,
        minor: fields.minor,
    };

    // Push events are stamped with receipt time, so they always have one
    let has_time = fields.time.is_some() || ctx.source == EventSource::Push;
    let has_identity = fields.subject_id.is_some() || code.is_access_granted();
    if !has_time || !has_identity {
        batch.dropped += 1;
        return None;
    }

    for m in &fields.malformed {
        batch.diagnostics.push(format!("malformed field {}", m));
    }

    let event_timestamp = fields
        .time
        .as_deref()
        .and_then(|t| parse_device_time(t, &ctx.timezone));
    if let (Some(raw), None) = (&fields.time, &event_timestamp) {
        batch.diagnostics.push(format!("unparsable time {:?}", raw));
    }

    Some(AccessEvent {
        device_id: ctx.device_id.to_string(),
        device_address: ctx.device_address.to_string(),
        subject_id: fields.subject_id,
        subject_name: fields.subject_name,
        event_timestamp,
        event_time_raw: fields.time,
        received_at: ctx.received_at,
        code,
        direction_hint: ctx.directions.resolve(ctx.device_address),
        serial_no: fields.serial_no,
        source: ctx.source,
    })
}

/// Parse a device time; offset-less values are read in `tz`
pub fn parse_device_time(raw: &str, tz: &Tz) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%z") {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return tz
                .from_local_datetime(&naive)
                .earliest()
                .map(|dt| dt.with_timezone(&Utc));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device_gateway::DirectionRole;

    fn table() -> DirectionTable {
        let mut t = DirectionTable::new();
        t.insert("10.0.0.10", DirectionRole::In);
        t
    }

    fn ctx<'a>(directions: &'a DirectionTable, source: EventSource) -> NormalizeContext<'a> {
        NormalizeContext {
            device_id: "gate-1",
            device_address: "10.0.0.10",
            received_at: Utc.with_ymd_and_hms(2024, 5, 1, 2, 0, 5).unwrap(),
            directions,
            timezone: Tz::UTC,
            source,
        }
    }

    const JSON_FIXTURE: &str = r#"{
        "AcsEvent": {
            "searchID": "s1",
            "responseStatusStrg": "OK",
            "numOfMatches": 1,
            "InfoList": [
                {"major": 5, "minor": 75, "time": "2024-05-01T10:00:00+08:00",
                 "employeeNoString": "123", "name": "Jane Doe", "serialNo": 881}
            ]
        }
    }"#;

    const XML_FIXTURE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<AcsEvent version="2.0" xmlns="http://www.isapi.org/ver20/XMLSchema">
  <searchID>s1</searchID>
  <responseStatusStrg>OK</responseStatusStrg>
  <InfoList>
    <Info>
      <major>5</major>
      <minor>75</minor>
      <time>2024-05-01T10:00:00+08:00</time>
      <employeeNo>123</employeeNo>
      <name>Jane Doe</name>
      <serialNo>881</serialNo>
    </Info>
  </InfoList>
</AcsEvent>"#;

    #[test]
    fn test_cross_dialect_equivalence() {
        let t = table();
        let c = ctx(&t, EventSource::Poll);
        let from_json = normalize(Dialect::Json, JSON_FIXTURE, &c);
        let from_xml = normalize(Dialect::Xml, XML_FIXTURE, &c);

        assert_eq!(from_json.events.len(), 1);
        assert_eq!(from_json.events, from_xml.events);

        let event = &from_json.events[0];
        assert_eq!(event.subject_id.as_deref(), Some("123"));
        assert_eq!(event.subject_name.as_deref(), Some("Jane Doe"));
        assert_eq!(event.code, EventCode::new(5, 75));
        assert_eq!(
            event.event_timestamp,
            Some(Utc.with_ymd_and_hms(2024, 5, 1, 2, 0, 0).unwrap())
        );
        assert_eq!(event.direction_hint, Direction::In);
        assert!(event.access_granted());
    }

    #[test]
    fn test_status_ping_dropped() {
        let t = table();
        let payload = r#"{"AcsEvent":{"InfoList":[
            {"major": 2, "minor": 39, "time": "2024-05-01T10:00:00+08:00"},
            {"major": 5, "minor": 21, "time": "2024-05-01T10:00:01+08:00", "employeeNoString": "7"}
        ]}}"#;
        let batch = normalize(Dialect::Json, payload, &ctx(&t, EventSource::Poll));
        assert_eq!(batch.raw_count, 2);
        assert_eq!(batch.dropped, 1);
        assert_eq!(batch.events.len(), 1);
        // Non-grant code still forwarded when a subject is present
        assert_eq!(batch.events[0].code.raw_code(), "5-21");
        assert!(!batch.events[0].access_granted());
    }

    #[test]
    fn test_grant_without_subject_is_kept() {
        let t = table();
        let payload = r#"{"AcsEvent":{"InfoList":[{"major": 196, "minor": 1, "time": "2024-05-01T10:00:00Z"}]}}"#;
        let batch = normalize(Dialect::Json, payload, &ctx(&t, EventSource::Poll));
        assert_eq!(batch.events.len(), 1);
        assert!(batch.events[0].subject_id.is_none());
    }

    #[test]
    fn test_poll_event_without_time_dropped() {
        let t = table();
        let payload = r#"{"AcsEvent":{"InfoList":[{"major": 5, "minor": 75, "employeeNoString": "1"}]}}"#;
        let batch = normalize(Dialect::Json, payload, &ctx(&t, EventSource::Poll));
        assert!(batch.events.is_empty());
        assert_eq!(batch.dropped, 1);
    }

    #[test]
    fn test_unparsable_json_root() {
        let t = table();
        let batch = normalize(Dialect::Json, "{\"AcsEvent\": [", &ctx(&t, EventSource::Poll));
        assert!(batch.events.is_empty());
        assert_eq!(batch.diagnostics.len(), 1);
    }

    #[test]
    fn test_empty_search_has_no_diagnostic() {
        let t = table();
        let payload = r#"{"AcsEvent":{"searchID":"s","responseStatusStrg":"NO MATCH","numOfMatches":0}}"#;
        let batch = normalize(Dialect::Json, payload, &ctx(&t, EventSource::Poll));
        assert!(batch.events.is_empty());
        assert!(batch.diagnostics.is_empty());
    }

    #[test]
    fn test_malformed_fragment_degrades() {
        let t = table();
        let payload = "<InfoList><Info><major>x5</major><minor>75</minor><time>yesterday</time><employeeNoString>42</employeeNoString></Info></InfoList>";
        let batch = normalize(Dialect::Xml, payload, &ctx(&t, EventSource::Poll));
        assert_eq!(batch.events.len(), 1);
        let event = &batch.events[0];
        assert_eq!(event.subject_id.as_deref(), Some("42"));
        assert_eq!(event.code.major, None);
        assert_eq!(event.code.minor, Some(75));
        assert!(event.event_timestamp.is_none());
        assert_eq!(event.event_time_raw.as_deref(), Some("yesterday"));
        assert_eq!(batch.diagnostics.len(), 2);
    }

    #[test]
    fn test_xml_more_flag() {
        let t = table();
        let payload = "<AcsEvent><responseStatusStrg>MORE</responseStatusStrg><InfoList><Info><time>2024-05-01T10:00:00Z</time><employeeNo>1</employeeNo></Info></InfoList></AcsEvent>";
        let batch = normalize(Dialect::Xml, payload, &ctx(&t, EventSource::Poll));
        assert!(batch.more);
        assert_eq!(batch.raw_count, 1);
    }

    #[test]
    fn test_unmapped_device_direction_is_check() {
        let t = DirectionTable::new();
        let batch = normalize(Dialect::Json, JSON_FIXTURE, &ctx(&t, EventSource::Poll));
        assert_eq!(batch.events[0].direction_hint, Direction::Check);
    }

    #[test]
    fn test_parse_device_time_formats() {
        let tokyo: Tz = "Asia/Tokyo".parse().unwrap();
        let expected = Utc.with_ymd_and_hms(2024, 5, 1, 1, 0, 0).unwrap();
        assert_eq!(parse_device_time("2024-05-01T10:00:00+09:00", &Tz::UTC), Some(expected));
        assert_eq!(parse_device_time("2024-05-01T10:00:00+0900", &Tz::UTC), Some(expected));
        assert_eq!(parse_device_time("2024-05-01T10:00:00", &tokyo), Some(expected));
        assert_eq!(parse_device_time("2024-05-01 10:00:00", &tokyo), Some(expected));
        assert_eq!(parse_device_time("not a time", &tokyo), None);
    }
}
