//! ISAPI paths and request bodies

use super::types::{EventSearchQuery, SearchStrategy, UserProvision};
use crate::digest_auth::DigestResponse;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde_json::json;
use std::net::IpAddr;

pub const CONTENT_JSON: &str = "application/json";
pub const CONTENT_XML: &str = "application/xml";

/// Fixed vendor paths
pub mod paths {
    pub const DEVICE_INFO: &str = "/ISAPI/System/deviceInfo";
    pub const ACS_EVENT_JSON: &str = "/ISAPI/AccessControl/AcsEvent?format=json";
    pub const ACS_EVENT_XML: &str = "/ISAPI/AccessControl/AcsEvent";
    pub const USER_SETUP: &str = "/ISAPI/AccessControl/UserInfo/SetUp?format=json";
    pub const REMOTE_CONTROL_DOOR: &str = "/ISAPI/AccessControl/RemoteControl/door/1";
    pub const HTTP_HOSTS: &str = "/ISAPI/Event/notification/httpHosts";
}

/// ISAPI sub-status codes that mean "this firmware does not accept these parameters"
const PARAMETER_FAULT_MARKERS: &[&str] = &[
    "badParameters",
    "badJsonFormat",
    "badJsonContent",
    "badXmlFormat",
    "badXmlContent",
    "invalidContent",
    "notSupport",
    "methodNotAllowed",
    "Invalid Content",
    "Invalid Format",
];

const ISAPI_XMLNS: &str = "http://www.isapi.org/ver20/XMLSchema";

pub(super) struct SearchRequest {
    pub path: &'static str,
    pub body: String,
    pub content_type: &'static str,
}

/// Whether a response body carries an ISAPI parameter fault
pub fn is_parameter_fault(body: &str) -> bool {
    PARAMETER_FAULT_MARKERS.iter().any(|m| body.contains(m))
}

fn device_time(t: &DateTime<Utc>, tz: &Tz) -> String {
    t.with_timezone(tz).format("%Y-%m-%dT%H:%M:%S%:z").to_string()
}

fn device_local_time(t: &DateTime<Utc>, tz: &Tz) -> String {
    t.with_timezone(tz).format("%Y-%m-%dT%H:%M:%S").to_string()
}

fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

pub(super) fn search_request(
    strategy: SearchStrategy,
    query: &EventSearchQuery,
    tz: &Tz,
) -> SearchRequest {
    let window = if strategy.is_windowed() {
        query.window
    } else {
        None
    };

    match strategy {
        SearchStrategy::JsonWindowed | SearchStrategy::JsonUnwindowed => {
            let mut cond = json!({
                "searchID": query.search_id,
                "searchResultPosition": query.cursor,
                "maxResults": query.max_results,
                "major": 0,
                "minor": 0,
            });
            match window {
                Some(w) => {
                    cond["startTime"] = json!(device_time(&w.start, tz));
                    cond["endTime"] = json!(device_time(&w.end, tz));
                }
                // Newest first: "last N events"
                None => cond["timeReverseOrder"] = json!(true),
            }
            SearchRequest {
                path: paths::ACS_EVENT_JSON,
                body: json!({ "AcsEventCond": cond }).to_string(),
                content_type: CONTENT_JSON,
            }
        }
        SearchStrategy::XmlWindowed | SearchStrategy::XmlUnwindowed => {
            let window_xml = match window {
                Some(w) => format!(
                    "<startTime>{}</startTime><endTime>{}</endTime>",
                    device_time(&w.start, tz),
                    device_time(&w.end, tz)
                ),
                None => "<timeReverseOrder>true</timeReverseOrder>".to_string(),
            };
            let body = format!(
                r#"<?xml version="1.0" encoding="UTF-8"?>
<AcsEventCond version="2.0" xmlns="{}">
  <searchID>{}</searchID>
  <searchResultPosition>{}</searchResultPosition>
  <maxResults>{}</maxResults>
  <major>0</major>
  <minor>0</minor>
  {}
</AcsEventCond>"#,
                ISAPI_XMLNS, query.search_id, query.cursor, query.max_results, window_xml
            );
            SearchRequest {
                path: paths::ACS_EVENT_XML,
                body,
                content_type: CONTENT_XML,
            }
        }
    }
}

/// Whether a search response is accepted for the strategy's dialect
pub(super) fn accepts(strategy: SearchStrategy, response: &DigestResponse) -> bool {
    if !response.is_success() || is_parameter_fault(&response.body) {
        return false;
    }
    match strategy.dialect() {
        super::Dialect::Json => serde_json::from_str::<serde_json::Value>(&response.body)
            .map(|v| v.is_object())
            .unwrap_or(false),
        super::Dialect::Xml => response.body.trim_start().starts_with('<'),
    }
}

pub(super) fn user_body(user: &UserProvision, tz: &Tz) -> serde_json::Value {
    json!({
        "UserInfo": {
            "employeeNo": user.id,
            "name": user.name,
            "userType": "normal",
            "Valid": {
                "enable": true,
                "beginTime": device_local_time(&user.valid_from, tz),
                "endTime": device_local_time(&user.valid_to, tz),
                "timeType": "local"
            },
            "doorRight": "1",
            "RightPlan": [{ "doorNo": 1, "planTemplateNo": "1" }]
        }
    })
}

pub(super) fn relay_body(open: bool) -> String {
    let cmd = if open { "open" } else { "close" };
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<RemoteControlDoor version="2.0" xmlns="{}">
  <cmd>{}</cmd>
</RemoteControlDoor>"#,
        ISAPI_XMLNS, cmd
    )
}

pub(super) fn http_host_body(url: &str) -> Result<String, String> {
    let parsed = reqwest::Url::parse(url).map_err(|e| format!("invalid webhook url: {}", e))?;
    let host = parsed
        .host_str()
        .ok_or_else(|| "webhook url has no host".to_string())?;
    let port = parsed
        .port_or_known_default()
        .ok_or_else(|| "webhook url has no port".to_string())?;
    let protocol = if parsed.scheme() == "https" { "HTTPS" } else { "HTTP" };

    let mut target_path = parsed.path().to_string();
    if let Some(q) = parsed.query() {
        target_path.push('?');
        target_path.push_str(q);
    }

    let addressing = match host.parse::<IpAddr>() {
        Ok(_) => format!(
            "<addressingFormatType>ipaddress</addressingFormatType><ipAddress>{}</ipAddress>",
            xml_escape(host)
        ),
        Err(_) => format!(
            "<addressingFormatType>hostname</addressingFormatType><hostName>{}</hostName>",
            xml_escape(host)
        ),
    };

    Ok(format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<HttpHostNotificationList version="2.0" xmlns="{}">
  <HttpHostNotification>
    <id>1</id>
    <url>{}</url>
    <protocolType>{}</protocolType>
    <parameterFormatType>JSON</parameterFormatType>
    {}
    <portNo>{}</portNo>
    <httpAuthenticationMethod>none</httpAuthenticationMethod>
  </HttpHostNotification>
</HttpHostNotificationList>"#,
        ISAPI_XMLNS,
        xml_escape(&target_path),
        protocol,
        addressing,
        port
    ))
}
