//! Namespace-agnostic XML field extraction
//!
//! Controllers prefix tags inconsistently (`<Info>`, `<isapi:Info>`) and
//! some firmware emits truncated documents, so lookups are tag-scoped text
//! scans rather than a full parse. A missing tag is `None`, never an error.

/// Local name of a tag starting right after `<`, if it is an opening tag
fn opening_tag_name(rest: &str) -> Option<&str> {
    if rest.starts_with('/') || rest.starts_with('?') || rest.starts_with('!') {
        return None;
    }
    let end = rest
        .find(|c: char| c == '>' || c == '/' || c.is_whitespace())
        .unwrap_or(rest.len());
    let name = &rest[..end];
    Some(name.rsplit(':').next().unwrap_or(name))
}

/// Byte offset of the first `</tag>` (any prefix) at or after `from`
fn find_closing(xml: &str, tag: &str, from: usize) -> Option<usize> {
    let mut search = from;
    while let Some(rel) = xml[search..].find("</") {
        let idx = search + rel;
        let rest = &xml[idx + 2..];
        let end = rest.find('>').unwrap_or(rest.len());
        let name = rest[..end].trim();
        if name.rsplit(':').next() == Some(tag) {
            return Some(idx);
        }
        search = idx + 2;
    }
    None
}

fn unescape(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// First non-empty text value of `<tag>` (any namespace prefix)
pub fn extract_xml_value(xml: &str, tag: &str) -> Option<String> {
    for (idx, _) in xml.match_indices('<') {
        let rest = &xml[idx + 1..];
        if opening_tag_name(rest) != Some(tag) {
            continue;
        }
        let gt = match rest.find('>') {
            Some(gt) => gt,
            None => continue,
        };
        // <tag/>
        if rest[..gt].ends_with('/') {
            continue;
        }
        let content_start = idx + 1 + gt + 1;
        let content_end = xml[content_start..]
            .find("</")
            .map(|e| content_start + e)
            .unwrap_or(xml.len());
        let value = xml[content_start..content_end].trim();
        if !value.is_empty() && !value.starts_with('<') {
            return Some(unescape(value));
        }
    }
    None
}

/// First non-empty value among alternative tag names, in order
pub fn extract_first(xml: &str, tags: &[&str]) -> Option<String> {
    tags.iter().find_map(|tag| extract_xml_value(xml, tag))
}

/// Split `payload` into the bodies of each `<tag>...</tag>` element.
///
/// Matching is on the local name, so `Info` does not match `InfoList`.
/// An element without a closing tag runs to the end of the payload.
pub fn split_fragments<'a>(payload: &'a str, tag: &str) -> Vec<&'a str> {
    let mut fragments = Vec::new();
    let mut search = 0;

    while search < payload.len() {
        let rel = match payload[search..].find('<') {
            Some(rel) => rel,
            None => break,
        };
        let idx = search + rel;
        let rest = &payload[idx + 1..];
        if opening_tag_name(rest) != Some(tag) {
            search = idx + 1;
            continue;
        }
        let body_start = match rest.find('>') {
            Some(gt) => idx + 1 + gt + 1,
            None => payload.len(),
        };
        match find_closing(payload, tag, body_start) {
            Some(close) => {
                fragments.push(&payload[body_start..close]);
                search = close + 2;
            }
            None => {
                fragments.push(&payload[body_start..]);
                break;
            }
        }
    }

    fragments
}
