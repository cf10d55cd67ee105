//! Push (webhook) body handling
//!
//! Controllers post event alerts as `multipart/form-data` or as a bare
//! document depending on firmware. The body is scanned for the first
//! complete top-level JSON object; XML alerts are handled as a fallback.

use super::{build_event, json, normalize_xml, NormalizeContext, NormalizedBatch};
use serde_json::Value;

/// Byte range of the balanced `{...}` starting at `start`, if it closes
fn balanced_object_end(bytes: &[u8], start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &b) in bytes[start..].iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(start + offset + 1);
                }
            }
            _ => {}
        }
    }
    None
}

/// First top-level JSON object literal embedded in `raw`.
///
/// Linear in the body size: an unclosed `{` ends the search, since every
/// later brace sits inside it, and a balanced span that fails to parse is
/// skipped whole.
pub fn extract_first_json_object(raw: &[u8]) -> Option<Value> {
    let mut search = 0;
    while let Some(rel) = raw[search..].iter().position(|&b| b == b'{') {
        let start = search + rel;
        let end = balanced_object_end(raw, start)?;
        if let Ok(value) = serde_json::from_slice::<Value>(&raw[start..end]) {
            if value.is_object() {
                return Some(value);
            }
        }
        search = end;
    }
    None
}

/// Normalize one webhook delivery
pub fn normalize_push(raw: &[u8], ctx: &NormalizeContext<'_>) -> NormalizedBatch {
    if let Some(root) = extract_first_json_object(raw) {
        let mut batch = NormalizedBatch {
            raw_count: 1,
            ..Default::default()
        };
        let fields = json::extract_fields(&root);
        if let Some(event) = build_event(fields, ctx, &mut batch) {
            batch.events.push(event);
        }
        return batch;
    }

    let text = String::from_utf8_lossy(raw);
    if text.contains("EventNotificationAlert") || text.contains("AccessControllerEvent") {
        return normalize_xml(&text, ctx);
    }

    NormalizedBatch {
        diagnostics: vec!["no JSON object or XML alert in push body".to_string()],
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device_gateway::DirectionRole;
    use crate::direction_table::{Direction, DirectionTable};
    use crate::event_normalizer::{EventCode, EventSource};
    use chrono::{TimeZone, Utc};
    use chrono_tz::Tz;

    fn ctx<'a>(directions: &'a DirectionTable) -> NormalizeContext<'a> {
        NormalizeContext {
            device_id: "gate-1",
            device_address: "10.0.0.10",
            received_at: Utc.with_ymd_and_hms(2024, 5, 1, 2, 0, 5).unwrap(),
            directions,
            timezone: Tz::UTC,
            source: EventSource::Push,
        }
    }

    #[test]
    fn test_extract_from_multipart() {
        let body = b"--MIME_boundary\r\nContent-Disposition: form-data; name=\"event_log\"\r\nContent-Type: application/json\r\n\r\n{\"ipAddress\":\"10.0.0.10\",\"note\":\"a } in a string\",\"AccessControllerEvent\":{\"name\":\"Jane Doe\"}}\r\n--MIME_boundary--\r\n";
        let value = extract_first_json_object(body).unwrap();
        assert_eq!(value["note"], "a } in a string");
        assert_eq!(value["AccessControllerEvent"]["name"], "Jane Doe");
    }

    #[test]
    fn test_extract_skips_broken_prefix() {
        let body = b"junk {not json} more {\"a\": 1}";
        let value = extract_first_json_object(body).unwrap();
        assert_eq!(value["a"], 1);
    }

    #[test]
    fn test_extract_unbalanced_body_is_linear() {
        let started = std::time::Instant::now();
        let body = vec![b'{'; 2 * 1024 * 1024];
        assert!(extract_first_json_object(&body).is_none());

        let mut nested = vec![b'{'; 512 * 1024];
        nested.extend(vec![b'}'; 512 * 1024]);
        assert!(extract_first_json_object(&nested).is_none());

        assert!(started.elapsed() < std::time::Duration::from_secs(2));
    }

    #[test]
    fn test_extract_none() {
        assert!(extract_first_json_object(b"no object here").is_none());
        assert!(extract_first_json_object(b"{\"open\": ").is_none());
    }

    #[test]
    fn test_push_nested_event() {
        let mut t = DirectionTable::new();
        t.insert("10.0.0.10", DirectionRole::In);
        let body = br#"--b
Content-Type: application/json

{"ipAddress":"10.0.0.10","dateTime":"2023-01-01T00:00:00+08:00","eventType":"AccessControllerEvent",
 "AccessControllerEvent":{"name":"Jane Doe","employeeNoString":"123","majorEventType":5,"subEventType":75,"serialNo":4021}}
--b--"#;
        let batch = normalize_push(body, &ctx(&t));
        assert_eq!(batch.events.len(), 1);
        let event = &batch.events[0];
        assert_eq!(event.subject_id.as_deref(), Some("123"));
        assert_eq!(event.code, EventCode::new(5, 75));
        assert_eq!(event.serial_no.as_deref(), Some("4021"));
        assert_eq!(event.direction_hint, Direction::In);
        assert_eq!(event.source, EventSource::Push);
    }

    #[test]
    fn test_push_flat_event_without_time_kept() {
        let t = DirectionTable::new();
        let body = br#"{"name":"Jane Doe","employeeNoString":"123","majorEventType":5,"subEventType":75}"#;
        let batch = normalize_push(body, &ctx(&t));
        assert_eq!(batch.events.len(), 1);
        assert!(batch.events[0].event_timestamp.is_none());
        assert_eq!(batch.events[0].direction_hint, Direction::Check);
    }

    #[test]
    fn test_push_heartbeat_dropped() {
        let t = DirectionTable::new();
        let body = br#"{"ipAddress":"10.0.0.10","eventType":"heartBeat","eventState":"active"}"#;
        let batch = normalize_push(body, &ctx(&t));
        assert!(batch.events.is_empty());
        assert_eq!(batch.dropped, 1);
    }

    #[test]
    fn test_push_xml_alert() {
        let t = DirectionTable::new();
        let body = br#"<EventNotificationAlert version="2.0">
<ipAddress>10.0.0.10</ipAddress>
<dateTime>2024-05-01T10:00:00+08:00</dateTime>
<eventType>AccessControllerEvent</eventType>
<AccessControllerEvent>
<majorEventType>5</majorEventType>
<subEventType>75</subEventType>
<employeeNoString>55</employeeNoString>
</AccessControllerEvent>
</EventNotificationAlert>"#;
        let batch = normalize_push(body, &ctx(&t));
        assert_eq!(batch.events.len(), 1);
        assert_eq!(batch.events[0].subject_id.as_deref(), Some("55"));
        assert_eq!(
            batch.events[0].event_timestamp,
            Some(Utc.with_ymd_and_hms(2024, 5, 1, 2, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_push_garbage() {
        let t = DirectionTable::new();
        let batch = normalize_push(b"hello", &ctx(&t));
        assert!(batch.events.is_empty());
        assert_eq!(batch.diagnostics.len(), 1);
    }
}
