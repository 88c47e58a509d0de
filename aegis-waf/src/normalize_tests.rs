use super::*;

#[test]
fn decode_path_handles_two_iterations() {
    // %252e%252e -> %2e%2e -> ..
    assert_eq!(decode_path("/%252e%252e/etc"), "/../etc");
}

#[test]
fn decode_path_converts_backslashes_and_strips_nulls() {
    assert_eq!(decode_path("a\\b\0c"), "/a/bc");
}

#[test]
fn decode_path_does_not_collapse_traversal() {
    assert_eq!(decode_path("/a/../b"), "/a/../b");
}

#[test]
fn decode_path_guarantees_leading_slash() {
    assert_eq!(decode_path("a/b"), "/a/b");
}

#[test]
fn canonicalize_collapses_dot_segments_and_slashes() {
    assert_eq!(canonicalize("/a/../b//c/./d"), "/b/c/d");
}

#[test]
fn canonicalize_traversal_above_root_stays_at_root() {
    assert_eq!(canonicalize("/../../etc/passwd"), "/etc/passwd");
}

#[test]
fn normalize_query_idempotent_under_decode_budget() {
    let q = "a=1%26b=2";
    let once = normalize_query(q);
    let twice = normalize_query(&once);
    assert_eq!(normalize_query(&twice), normalize_query(q));
}

#[test]
fn client_ip_no_peer_returns_unspecified() {
    assert_eq!(client_ip_from_parts(None, &[], None), "0.0.0.0".parse().unwrap());
}

#[test]
fn client_ip_untrusted_peer_ignores_xff() {
    let peer: std::net::IpAddr = "9.8.7.6".parse().unwrap();
    let trusted: Vec<IpNet> = vec!["10.0.0.0/8".parse().unwrap()];
    let ip = client_ip_from_parts(Some(peer), &trusted, Some("1.2.3.4"));
    assert_eq!(ip, peer);
}

#[test]
fn client_ip_trusted_peer_honors_xff() {
    let peer: std::net::IpAddr = "10.0.0.5".parse().unwrap();
    let trusted: Vec<IpNet> = vec!["10.0.0.0/8".parse().unwrap()];
    let ip = client_ip_from_parts(Some(peer), &trusted, Some("1.2.3.4"));
    assert_eq!(ip, "1.2.3.4".parse().unwrap());
}

#[test]
fn client_ip_walks_back_over_trusted_hops() {
    let peer: std::net::IpAddr = "10.0.0.5".parse().unwrap();
    let trusted: Vec<IpNet> = vec!["10.0.0.0/8".parse().unwrap()];
    // 1.2.3.4 (real client), 10.0.0.9 (trusted hop) -> result should be 1.2.3.4
    let ip = client_ip_from_parts(Some(peer), &trusted, Some("1.2.3.4, 10.0.0.9"));
    assert_eq!(ip, "1.2.3.4".parse().unwrap());
}

#[test]
fn client_ip_falls_back_to_peer_when_every_hop_is_trusted() {
    let peer: std::net::IpAddr = "10.0.0.5".parse().unwrap();
    let trusted: Vec<IpNet> = vec!["10.0.0.0/8".parse().unwrap()];
    // every parsed XFF entry and the peer are inside the trusted CIDR, so
    // the walk-back empties the chain entirely and falls back to peer.
    let ip = client_ip_from_parts(Some(peer), &trusted, Some("10.0.0.9"));
    assert_eq!(ip, peer);
}

fn client_ip_from_parts(peer: Option<std::net::IpAddr>, trusted: &[IpNet], xff: Option<&str>) -> std::net::IpAddr {
    let mut req = RequestHeader::build("GET", b"/", None).unwrap();
    if let Some(xff) = xff {
        req.insert_header("x-forwarded-for", xff).unwrap();
    }
    client_ip(&req, peer, trusted)
}

#[test]
fn header_digest_is_lowercased_and_omits_missing() {
    let mut req = RequestHeader::build("GET", b"/", None).unwrap();
    req.insert_header("User-Agent", "SQLMap/1.0").unwrap();
    req.insert_header("Host", "Example.COM").unwrap();
    let digest = header_digest(&req);
    assert_eq!(digest, "user-agent:sqlmap/1.0 host:example.com");
}
