//! JSON dialect extraction

use super::fields::{RawEventFields, MAJOR_KEYS, MINOR_KEYS, NAME_KEYS, SERIAL_KEYS, SUBJECT_KEYS, TIME_KEYS};
use serde_json::Value;

/// Known result-list locations, tried in order; first non-empty list wins
pub const RESULT_LOCATIONS: &[&[&str]] = &[
    &["AcsEventSearchResult", "MatchList"],
    &["EventSearchResult", "matchList"],
    &["AcsEvent", "InfoList"],
    &["InfoList"],
];

/// Find the event list inside a search response
pub fn locate_results(root: &Value) -> Option<(&'static [&'static str], &Vec<Value>)> {
    for location in RESULT_LOCATIONS {
        let mut node = root;
        let mut found = true;
        for key in location.iter() {
            match node.get(key) {
                Some(next) => node = next,
                None => {
                    found = false;
                    break;
                }
            }
        }
        if !found {
            continue;
        }
        if let Some(list) = node.as_array() {
            if !list.is_empty() {
                return Some((location, list));
            }
        }
    }
    None
}

/// `responseStatusStrg == "MORE"` anywhere under the search wrapper
pub fn has_more(root: &Value) -> bool {
    ["AcsEvent", "AcsEventSearchResult", "EventSearchResult"]
        .iter()
        .filter_map(|wrapper| root.get(wrapper))
        .filter_map(|w| w.get("responseStatusStrg"))
        .any(|s| s.as_str().map(|s| s.eq_ignore_ascii_case("MORE")).unwrap_or(false))
}

fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() {
                None
            } else {
                Some(s.to_string())
            }
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn first_string(obj: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|k| obj.get(k))
        .find_map(scalar_string)
}

/// Read event fields from one JSON object.
///
/// Match-list items may wrap the event in an `AccessControllerEvent`
/// sub-object with the time on the wrapper; both levels are consulted.
pub fn extract_fields(item: &Value) -> RawEventFields {
    let inner = item
        .get("AccessControllerEvent")
        .filter(|v| v.is_object())
        .unwrap_or(item);

    let lookup = |keys: &[&str]| first_string(inner, keys).or_else(|| first_string(item, keys));

    let mut fields = RawEventFields {
        time: lookup(TIME_KEYS),
        subject_id: lookup(SUBJECT_KEYS),
        subject_name: lookup(NAME_KEYS),
        serial_no: lookup(SERIAL_KEYS),
        ..Default::default()
    };
    fields.set_major(lookup(MAJOR_KEYS));
    fields.set_minor(lookup(MINOR_KEYS));
    fields
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_locate_info_list() {
        let root = json!({"AcsEvent": {"InfoList": [{"major": 5}]}});
        let (location, list) = locate_results(&root).unwrap();
        assert_eq!(location, &["AcsEvent", "InfoList"]);
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn test_locate_skips_empty_first_location() {
        let root = json!({
            "AcsEventSearchResult": {"MatchList": []},
            "AcsEvent": {"InfoList": [{"major": 5}, {"major": 5}]}
        });
        let (location, list) = locate_results(&root).unwrap();
        assert_eq!(location, &["AcsEvent", "InfoList"]);
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn test_locate_none() {
        assert!(locate_results(&json!({"AcsEvent": {"numOfMatches": 0}})).is_none());
    }

    #[test]
    fn test_has_more() {
        assert!(has_more(&json!({"AcsEvent": {"responseStatusStrg": "MORE"}})));
        assert!(!has_more(&json!({"AcsEvent": {"responseStatusStrg": "OK"}})));
    }

    #[test]
    fn test_numeric_employee_no() {
        let fields = extract_fields(&json!({"employeeNo": 123, "time": "2024-05-01T10:00:00+08:00"}));
        assert_eq!(fields.subject_id.as_deref(), Some("123"));
    }

    #[test]
    fn test_wrapped_event_inherits_wrapper_time() {
        let fields = extract_fields(&json!({
            "dateTime": "2024-05-01T10:00:00+08:00",
            "AccessControllerEvent": {"majorEventType": 5, "subEventType": 75, "employeeNoString": "9"}
        }));
        assert_eq!(fields.time.as_deref(), Some("2024-05-01T10:00:00+08:00"));
        assert_eq!(fields.major, Some(5));
        assert_eq!(fields.minor, Some(75));
        assert_eq!(fields.subject_id.as_deref(), Some("9"));
    }
}
