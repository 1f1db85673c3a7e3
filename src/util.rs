use std::time::SystemTime;

use chrono::{DateTime, Utc};
use reqwest::header::{DATE, HeaderMap};

/// `Date` header of a response, if present and well-formed.
pub fn server_date(headers: &HeaderMap) -> Option<SystemTime> {
    headers
        .get(DATE)
        .and_then(|s| s.to_str().ok())
        .and_then(|s| httpdate::parse_http_date(s).ok())
}

/// Prefer the server's clock; fall back to ours.
pub fn stamp(server: Option<SystemTime>) -> DateTime<Utc> {
    server.map_or_else(Utc::now, DateTime::<Utc>::from)
}

/// Collapse runs of whitespace (NBSP included) into single spaces.
pub fn clean_text<'a>(parts: impl IntoIterator<Item = &'a str>) -> String {
    let mut out = String::new();
    for word in parts.into_iter().flat_map(str::split_whitespace) {
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(word);
    }
    out
}
