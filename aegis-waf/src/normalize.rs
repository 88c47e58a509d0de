use std::net::IpAddr;

use ipnet::IpNet;
use pingora::http::RequestHeader;

use crate::waf::context::{truncate, InspectionContext};

/// Percent-decode up to two iterations; turn backslashes into forward
/// slashes; strip null bytes; guarantee a leading slash. Does **not**
/// collapse `..` segments — callers that need traversal detection want the
/// raw decoded form (§4.A `path_raw`).
pub fn decode_path(raw: &str) -> String {
    let mut decoded = percent_decode_once(raw);
    decoded = percent_decode_once(&decoded);
    let mut out: String = decoded.chars().map(|c| if c == '\\' { '/' } else { c }).collect();
    out.retain(|c| c != '\0');
    if !out.starts_with('/') {
        out.insert(0, '/');
    }
    out
}

fn percent_decode_once(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let (Some(hi), Some(lo)) = (hex_val(bytes[i + 1]), hex_val(bytes[i + 2])) {
                out.push(hi * 16 + lo);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn hex_val(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

/// POSIX path normalization: resolve `.` and `..`, collapse duplicate
/// slashes. This is the `path` input the engine uses for traversal-safe
/// matching.
pub fn canonicalize(decoded: &str) -> String {
    let mut stack: Vec<&str> = Vec::new();
    for segment in decoded.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                stack.pop();
            }
            s => stack.push(s),
        }
    }
    let mut out = String::from("/");
    out.push_str(&stack.join("/"));
    if out.len() > 1 && out.ends_with('/') {
        out.pop();
    }
    out
}

/// Percent-decode (<=2 iterations) and strip nulls. Same decode budget as
/// `decode_path` so `normalize_query(unquote_twice(q)) == normalize_query(q)`.
pub fn normalize_query(raw: &str) -> String {
    let mut decoded = percent_decode_once(raw);
    decoded = percent_decode_once(&decoded);
    decoded.retain(|c| c != '\0');
    decoded
}

const DIGEST_HEADERS: &[&str] = &["user-agent", "referer", "content-type", "accept", "host"];

/// Lowercase, space-joined `"name:value"` pairs for a fixed header set.
/// Missing headers are omitted; header access is case-insensitive (the
/// underlying `HeaderMap` already is).
pub fn header_digest(headers: &pingora::http::RequestHeader) -> String {
    let mut parts = Vec::new();
    for name in DIGEST_HEADERS {
        if let Some(v) = headers.headers.get(*name).and_then(|v| v.to_str().ok()) {
            parts.push(format!("{name}:{}", v.to_ascii_lowercase()));
        }
    }
    parts.join(" ")
}

/// §4.A client-IP derivation through a chain of trusted forwarding proxies.
pub fn client_ip(req: &RequestHeader, peer: Option<IpAddr>, trusted_proxies: &[IpNet]) -> IpAddr {
    let Some(peer) = peer else {
        return "0.0.0.0".parse().unwrap();
    };
    if trusted_proxies.is_empty() {
        return peer;
    }
    if !trusted_proxies.iter().any(|net| net.contains(&peer)) {
        return peer;
    }

    let mut chain: Vec<IpAddr> = req
        .headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .map(|raw| {
            raw.split(',')
                .filter_map(|s| s.trim().parse::<IpAddr>().ok())
                .collect()
        })
        .unwrap_or_default();
    chain.push(peer);

    while let Some(last) = chain.last() {
        if trusted_proxies.iter().any(|net| net.contains(last)) {
            chain.pop();
        } else {
            break;
        }
    }

    chain.pop().unwrap_or(peer)
}

pub fn build_inspection(
    path_raw: String,
    path: String,
    query: String,
    headers_digest: String,
    body: Option<&[u8]>,
    max_inspect_bytes: usize,
) -> InspectionContext {
    InspectionContext {
        path: truncate(path, max_inspect_bytes),
        path_raw: truncate(path_raw, max_inspect_bytes),
        query: truncate(query, max_inspect_bytes),
        headers_digest: truncate(headers_digest, max_inspect_bytes),
        body: body.map(|b| truncate(String::from_utf8_lossy(b).into_owned(), max_inspect_bytes)),
    }
}

#[cfg(test)]
#[path = "normalize_tests.rs"]
mod normalize_tests;
