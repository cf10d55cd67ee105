//! Mock ISAPI controller helpers

#![allow(dead_code)]

use std::collections::HashMap;
use turnstile_bridge::digest_auth::compute_response;
use wiremock::matchers::any;
use wiremock::{Match, Mock, MockServer, Request, ResponseTemplate};

pub const USER: &str = "admin";
pub const PASSWORD: &str = "Passw0rd!";
pub const REALM: &str = "DS-K1T671";
pub const NONCE: &str = "4e6a4d304d5467324f54e4d6a4d784d";
pub const OPAQUE: &str = "799d5";

pub fn challenge_header() -> String {
    format!(
        r#"Digest qop="auth", realm="{}", nonce="{}", stale="FALSE", opaque="{}""#,
        REALM, NONCE, OPAQUE
    )
}

fn parse_digest_fields(header: &str) -> HashMap<String, String> {
    header
        .trim_start_matches("Digest ")
        .split(", ")
        .filter_map(|part| part.split_once('='))
        .map(|(k, v)| (k.trim().to_string(), v.trim().trim_matches('"').to_string()))
        .collect()
}

/// Matches only requests carrying a correct digest answer to our challenge
pub struct ValidDigest {
    pub username: &'static str,
    pub password: &'static str,
}

impl Match for ValidDigest {
    fn matches(&self, request: &Request) -> bool {
        let header = match request
            .headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
        {
            Some(h) => h,
            None => return false,
        };
        let fields = parse_digest_fields(header);
        let get = |k: &str| fields.get(k).map(String::as_str);

        let request_uri = match request.url.query() {
            Some(q) => format!("{}?{}", request.url.path(), q),
            None => request.url.path().to_string(),
        };
        if get("uri") != Some(request_uri.as_str())
            || get("nonce") != Some(NONCE)
            || get("opaque") != Some(OPAQUE)
            || get("username") != Some(self.username)
        {
            return false;
        }

        let expected = compute_response(
            self.username,
            self.password,
            REALM,
            NONCE,
            request.method.as_str(),
            &request_uri,
            get("qop"),
            get("nc").unwrap_or(""),
            get("cnonce").unwrap_or(""),
            false,
        );
        get("response") == Some(expected.as_str())
    }
}

pub fn authed() -> ValidDigest {
    ValidDigest {
        username: USER,
        password: PASSWORD,
    }
}

/// Mock controller answering every unauthenticated or wrongly
/// authenticated request with a digest challenge
pub async fn controller() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(any())
        .respond_with(
            ResponseTemplate::new(401).insert_header("WWW-Authenticate", challenge_header().as_str()),
        )
        .with_priority(10)
        .mount(&server)
        .await;
    server
}

pub fn bad_parameters() -> ResponseTemplate {
    ResponseTemplate::new(400).set_body_string(
        r#"{"statusCode":6,"statusString":"Invalid Content","subStatusCode":"badParameters","errorCode":1610637344,"errorMsg":"startTime"}"#,
    )
}

pub fn acs_event_page(status: &str, serials: &[u32]) -> String {
    let items: Vec<String> = serials
        .iter()
        .map(|n| {
            format!(
                r#"{{"major":5,"minor":75,"time":"2024-05-01T10:{:02}:00+08:00","employeeNoString":"{}","name":"Member {}","serialNo":{}}}"#,
                n % 60,
                100 + n,
                n,
                n
            )
        })
        .collect();
    format!(
        r#"{{"AcsEvent":{{"searchID":"x","responseStatusStrg":"{}","numOfMatches":{},"totalMatches":{},"InfoList":[{}]}}}}"#,
        status,
        serials.len(),
        serials.len(),
        items.join(",")
    )
}
