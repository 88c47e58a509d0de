use std::net::IpAddr;

use http::{HeaderMap, HeaderValue};

const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Tokens listed in the request's own `Connection` header are hop-by-hop
/// too (RFC 7230 §6.1), on top of the fixed set above.
fn connection_tokens(headers: &HeaderMap) -> Vec<String> {
    headers
        .get_all("connection")
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|s| s.trim().to_ascii_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let extra = connection_tokens(headers);
    for name in HOP_BY_HOP {
        headers.remove(*name);
    }
    for token in extra {
        headers.remove(token.as_str());
    }
}

/// Drop hop-by-hop headers from a request bound for the upstream, and strip
/// `content-length` — the HTTP client sets its own from the body it sends.
pub fn filter_request(headers: &mut HeaderMap) {
    strip_hop_by_hop(headers);
    headers.remove("content-length");
}

/// Drop hop-by-hop headers from a response bound for the client.
pub fn filter_response(headers: &mut HeaderMap) {
    strip_hop_by_hop(headers);
}

/// Append `client_ip` to `X-Forwarded-For` (creating it if absent); set
/// `X-Forwarded-Proto` / `X-Forwarded-Host` only when not already present.
pub fn add_forwarding(headers: &mut HeaderMap, client_ip: IpAddr, scheme: &str, host: &str) {
    let existing = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let new_value = match existing {
        Some(v) if !v.is_empty() => format!("{v}, {client_ip}"),
        _ => client_ip.to_string(),
    };
    if let Ok(hv) = HeaderValue::from_str(&new_value) {
        headers.insert("x-forwarded-for", hv);
    }

    if !headers.contains_key("x-forwarded-proto") {
        if let Ok(hv) = HeaderValue::from_str(scheme) {
            headers.insert("x-forwarded-proto", hv);
        }
    }
    if !headers.contains_key("x-forwarded-host") && !host.is_empty() {
        if let Ok(hv) = HeaderValue::from_str(host) {
            headers.insert("x-forwarded-host", hv);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_fixed_hop_by_hop_set() {
        let mut headers = HeaderMap::new();
        headers.insert("connection", HeaderValue::from_static("keep-alive"));
        headers.insert("keep-alive", HeaderValue::from_static("timeout=5"));
        headers.insert("x-custom", HeaderValue::from_static("keep"));
        filter_request(&mut headers);
        assert!(!headers.contains_key("connection"));
        assert!(!headers.contains_key("keep-alive"));
        assert!(headers.contains_key("x-custom"));
    }

    #[test]
    fn strips_tokens_named_in_connection_header() {
        let mut headers = HeaderMap::new();
        headers.insert("connection", HeaderValue::from_static("x-foo"));
        headers.insert("x-foo", HeaderValue::from_static("bar"));
        filter_request(&mut headers);
        assert!(!headers.contains_key("x-foo"));
    }

    #[test]
    fn strips_content_length_on_request_path_only() {
        let mut req_headers = HeaderMap::new();
        req_headers.insert("content-length", HeaderValue::from_static("12"));
        filter_request(&mut req_headers);
        assert!(!req_headers.contains_key("content-length"));

        let mut resp_headers = HeaderMap::new();
        resp_headers.insert("content-length", HeaderValue::from_static("12"));
        filter_response(&mut resp_headers);
        assert!(resp_headers.contains_key("content-length"));
    }

    #[test]
    fn forwarding_headers_append_and_do_not_overwrite() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("1.1.1.1"));
        headers.insert("x-forwarded-proto", HeaderValue::from_static("https"));
        add_forwarding(&mut headers, "2.2.2.2".parse().unwrap(), "http", "example.com");
        assert_eq!(headers.get("x-forwarded-for").unwrap(), "1.1.1.1, 2.2.2.2");
        assert_eq!(headers.get("x-forwarded-proto").unwrap(), "https");
        assert_eq!(headers.get("x-forwarded-host").unwrap(), "example.com");
    }
}
