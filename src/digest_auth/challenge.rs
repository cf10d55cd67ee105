//! RFC 2617 challenge parsing and response computation

use md5::{Digest, Md5};
use rand::Rng;

/// Nonce count sent with every authenticated request.
///
/// Challenges are never reused across logical requests, so the count
/// never advances past one.
pub const NONCE_COUNT: &str = "00000001";

/// Parsed `WWW-Authenticate: Digest ...` challenge
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Challenge {
    pub realm: String,
    pub nonce: String,
    /// Raw qop list as offered by the server (e.g. `auth,auth-int`)
    pub qop: Option<String>,
    pub opaque: Option<String>,
    pub algorithm: Option<String>,
}

impl Challenge {
    /// Parse a `WWW-Authenticate` header value.
    ///
    /// Returns `None` when the scheme is not Digest or the nonce is missing.
    /// Field order, key case and quoting are not significant.
    pub fn parse(header: &str) -> Option<Self> {
        let trimmed = header.trim();
        let scheme_end = trimmed.find(char::is_whitespace).unwrap_or(trimmed.len());
        if !trimmed[..scheme_end].eq_ignore_ascii_case("digest") {
            return None;
        }

        let mut challenge = Challenge::default();
        let mut has_nonce = false;

        for (key, value) in split_params(&trimmed[scheme_end..]) {
            match key.to_ascii_lowercase().as_str() {
                "realm" => challenge.realm = value,
                "nonce" => {
                    challenge.nonce = value;
                    has_nonce = true;
                }
                "qop" => challenge.qop = Some(value),
                "opaque" => challenge.opaque = Some(value),
                "algorithm" => challenge.algorithm = Some(value),
                _ => {}
            }
        }

        if !has_nonce || challenge.nonce.is_empty() {
            return None;
        }
        Some(challenge)
    }

    /// The qop value this client answers with, if the server offered one.
    ///
    /// `auth` is preferred; bodies are never integrity-protected.
    pub fn selected_qop(&self) -> Option<&str> {
        let offered = self.qop.as_deref()?;
        let options: Vec<&str> = offered
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect();
        if options.iter().any(|q| q.eq_ignore_ascii_case("auth")) {
            Some("auth")
        } else {
            options.first().copied()
        }
    }

    fn is_session_algorithm(&self) -> bool {
        self.algorithm
            .as_deref()
            .map(|a| a.eq_ignore_ascii_case("MD5-sess"))
            .unwrap_or(false)
    }
}

/// Split `k=v, k="v, with comma", ...` into pairs.
fn split_params(input: &str) -> Vec<(String, String)> {
    let mut params = Vec::new();
    let mut chars = input.chars().peekable();

    loop {
        // Skip separators
        while matches!(chars.peek(), Some(c) if *c == ',' || c.is_whitespace()) {
            chars.next();
        }
        if chars.peek().is_none() {
            break;
        }

        let mut key = String::new();
        while let Some(&c) = chars.peek() {
            if c == '=' || c == ',' {
                break;
            }
            key.push(c);
            chars.next();
        }

        let mut value = String::new();
        if chars.peek() == Some(&'=') {
            chars.next();
            while matches!(chars.peek(), Some(c) if c.is_whitespace()) {
                chars.next();
            }
            if chars.peek() == Some(&'"') {
                chars.next();
                while let Some(c) = chars.next() {
                    match c {
                        '\\' => {
                            if let Some(escaped) = chars.next() {
                                value.push(escaped);
                            }
                        }
                        '"' => break,
                        _ => value.push(c),
                    }
                }
            } else {
                while let Some(&c) = chars.peek() {
                    if c == ',' {
                        break;
                    }
                    value.push(c);
                    chars.next();
                }
                value = value.trim().to_string();
            }
        }

        let key = key.trim().to_string();
        if !key.is_empty() {
            params.push((key, value));
        }
    }

    params
}

fn md5_hex(input: &str) -> String {
    format!("{:x}", Md5::digest(input.as_bytes()))
}

/// Compute the digest `response` value.
///
/// With qop: `MD5(HA1:nonce:nc:cnonce:qop:HA2)`, otherwise `MD5(HA1:nonce:HA2)`.
#[allow(clippy::too_many_arguments)]
pub fn compute_response(
    username: &str,
    password: &str,
    realm: &str,
    nonce: &str,
    method: &str,
    uri: &str,
    qop: Option<&str>,
    nc: &str,
    cnonce: &str,
    session: bool,
) -> String {
    let mut ha1 = md5_hex(&format!("{}:{}:{}", username, realm, password));
    if session {
        ha1 = md5_hex(&format!("{}:{}:{}", ha1, nonce, cnonce));
    }
    let ha2 = md5_hex(&format!("{}:{}", method, uri));

    match qop {
        Some(qop) => md5_hex(&format!(
            "{}:{}:{}:{}:{}:{}",
            ha1, nonce, nc, cnonce, qop, ha2
        )),
        None => md5_hex(&format!("{}:{}:{}", ha1, nonce, ha2)),
    }
}

/// Fresh client nonce (16 hex chars)
pub fn generate_cnonce() -> String {
    let bytes: [u8; 8] = rand::thread_rng().gen();
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Build the `Authorization` header value answering `challenge`.
///
/// Only fields the server offered are echoed back: `qop`/`nc`/`cnonce`
/// appear only when qop was offered, `opaque` and `algorithm` only when
/// present in the challenge.
pub fn authorization_header(
    challenge: &Challenge,
    username: &str,
    password: &str,
    method: &str,
    uri: &str,
    cnonce: &str,
) -> String {
    let qop = challenge.selected_qop();
    let response = compute_response(
        username,
        password,
        &challenge.realm,
        &challenge.nonce,
        method,
        uri,
        qop,
        NONCE_COUNT,
        cnonce,
        challenge.is_session_algorithm(),
    );

    let mut header = format!(
        r#"Digest username="{}", realm="{}", nonce="{}", uri="{}""#,
        username, challenge.realm, challenge.nonce, uri
    );
    if let Some(algorithm) = &challenge.algorithm {
        header.push_str(&format!(", algorithm={}", algorithm));
    }
    header.push_str(&format!(r#", response="{}""#, response));
    if let Some(opaque) = &challenge.opaque {
        header.push_str(&format!(r#", opaque="{}""#, opaque));
    }
    if let Some(qop) = qop {
        header.push_str(&format!(
            r#", qop={}, nc={}, cnonce="{}""#,
            qop, NONCE_COUNT, cnonce
        ));
    }
    header
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rfc2617_reference_vector() {
        let response = compute_response(
            "Mufasa",
            "Circle Of Life",
            "testrealm@host.com",
            "dcd98b7102dd2f0e8b11d0f600bfb0c093",
            "GET",
            "/dir/index.html",
            Some("auth"),
            "00000001",
            "0a4f113b",
            false,
        );
        assert_eq!(response, "6629fae49393a05397450978507c4ef1");
    }

    #[test]
    fn test_response_without_qop() {
        let ha1 = md5_hex("Mufasa:testrealm@host.com:Circle Of Life");
        let ha2 = md5_hex("GET:/dir/index.html");
        let expected = md5_hex(&format!("{}:{}:{}", ha1, "abc", ha2));

        let response = compute_response(
            "Mufasa",
            "Circle Of Life",
            "testrealm@host.com",
            "abc",
            "GET",
            "/dir/index.html",
            None,
            NONCE_COUNT,
            "ignored",
            false,
        );
        assert_eq!(response, expected);
    }

    #[test]
    fn test_parse_quoted_challenge() {
        let header = r#"Digest realm="testrealm@host.com", qop="auth,auth-int", nonce="dcd98b7102dd2f0e8b11d0f600bfb0c093", opaque="5ccc069c403ebaf9f0171e9517f40e41""#;
        let challenge = Challenge::parse(header).unwrap();
        assert_eq!(challenge.realm, "testrealm@host.com");
        assert_eq!(challenge.nonce, "dcd98b7102dd2f0e8b11d0f600bfb0c093");
        assert_eq!(challenge.qop.as_deref(), Some("auth,auth-int"));
        assert_eq!(challenge.selected_qop(), Some("auth"));
        assert_eq!(
            challenge.opaque.as_deref(),
            Some("5ccc069c403ebaf9f0171e9517f40e41")
        );
        assert!(challenge.algorithm.is_none());
    }

    #[test]
    fn test_parse_unquoted_and_reordered() {
        let header = "digest NONCE=abc123,algorithm=MD5, qop=auth ,Realm=\"DS-K1T671\"";
        let challenge = Challenge::parse(header).unwrap();
        assert_eq!(challenge.realm, "DS-K1T671");
        assert_eq!(challenge.nonce, "abc123");
        assert_eq!(challenge.algorithm.as_deref(), Some("MD5"));
        assert_eq!(challenge.selected_qop(), Some("auth"));
    }

    #[test]
    fn test_parse_rejects_basic_and_missing_nonce() {
        assert!(Challenge::parse(r#"Basic realm="x""#).is_none());
        assert!(Challenge::parse(r#"Digest realm="x", qop="auth""#).is_none());
    }

    #[test]
    fn test_header_omits_unoffered_fields() {
        let challenge = Challenge {
            realm: "r".to_string(),
            nonce: "n".to_string(),
            ..Default::default()
        };
        let header = authorization_header(&challenge, "admin", "pw", "GET", "/ISAPI/System/deviceInfo", "c");
        assert!(header.starts_with("Digest username=\"admin\""));
        assert!(!header.contains("qop="));
        assert!(!header.contains("nc="));
        assert!(!header.contains("opaque="));
        assert!(!header.contains("algorithm="));
    }

    #[test]
    fn test_header_echoes_opaque_and_qop() {
        let challenge = Challenge {
            realm: "r".to_string(),
            nonce: "n".to_string(),
            qop: Some("auth".to_string()),
            opaque: Some("op".to_string()),
            algorithm: Some("MD5".to_string()),
        };
        let header = authorization_header(&challenge, "admin", "pw", "POST", "/x?format=json", "0a4f113b");
        assert!(header.contains(r#"uri="/x?format=json""#));
        assert!(header.contains(r#"opaque="op""#));
        assert!(header.contains("qop=auth, nc=00000001, cnonce=\"0a4f113b\""));
        assert!(header.contains("algorithm=MD5"));
    }

    #[test]
    fn test_cnonce_is_fresh() {
        let a = generate_cnonce();
        let b = generate_cnonce();
        assert_eq!(a.len(), 16);
        assert_ne!(a, b);
    }
}
