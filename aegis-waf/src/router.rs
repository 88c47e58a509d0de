use rand::Rng;

use crate::config::types::UpstreamConfig;

/// Picks an upstream for one request (§4.E). Built fresh from a `Config`
/// snapshot and replaced wholesale on reload, same as the rule engine.
pub struct Router {
    upstreams: Vec<UpstreamConfig>,
}

impl Router {
    pub fn new(upstreams: Vec<UpstreamConfig>) -> Self {
        Self { upstreams }
    }

    /// Host match, then longest path-prefix match, then weighted choice.
    /// Returns `None` only when there are no upstreams at all.
    pub fn get_upstream(&self, host: Option<&str>, path: &str) -> Option<&UpstreamConfig> {
        if self.upstreams.is_empty() {
            return None;
        }

        if let Some(host) = host {
            if let Some(up) = self.upstreams.iter().find(|u| {
                u.hosts
                    .as_ref()
                    .is_some_and(|hosts| hosts.iter().any(|h| h.eq_ignore_ascii_case(host)))
            }) {
                return Some(up);
            }
        }

        if let Some(up) = self.longest_prefix_match(path) {
            return Some(up);
        }

        self.weighted_choice()
    }

    fn longest_prefix_match(&self, path: &str) -> Option<&UpstreamConfig> {
        let mut best: Option<(&UpstreamConfig, usize)> = None;
        for up in &self.upstreams {
            let Some(prefixes) = &up.path_prefixes else {
                continue;
            };
            for prefix in prefixes {
                if !path.starts_with(prefix.as_str()) {
                    continue;
                }
                let len = prefix.len();
                // Strict `>` keeps the earliest-declared upstream on a tie.
                if best.map(|(_, blen)| len > blen).unwrap_or(true) {
                    best = Some((up, len));
                }
            }
        }
        best.map(|(up, _)| up)
    }

    fn weighted_choice(&self) -> Option<&UpstreamConfig> {
        let total: i64 = self.upstreams.iter().map(|u| u.weight.max(0)).sum();
        if total <= 0 {
            return self.upstreams.first();
        }
        let mut pick = rand::thread_rng().gen_range(0..total);
        for up in &self.upstreams {
            let w = up.weight.max(0);
            if pick < w {
                return Some(up);
            }
            pick -= w;
        }
        self.upstreams.last()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn up(name: &str, hosts: Option<Vec<&str>>, prefixes: Option<Vec<&str>>, weight: i64) -> UpstreamConfig {
        UpstreamConfig {
            name: name.to_string(),
            base_url: format!("http://{name}.internal"),
            hosts: hosts.map(|v| v.into_iter().map(String::from).collect()),
            path_prefixes: prefixes.map(|v| v.into_iter().map(String::from).collect()),
            weight,
            healthcheck_path: None,
        }
    }

    #[test]
    fn empty_router_returns_none() {
        let router = Router::new(vec![]);
        assert!(router.get_upstream(Some("example.com"), "/").is_none());
    }

    #[test]
    fn host_match_wins_over_prefix_and_weight() {
        let upstreams = vec![
            up("by-prefix", None, Some(vec!["/api"]), 1),
            up("by-host", Some(vec!["api.example.com"]), None, 1),
        ];
        let router = Router::new(upstreams);
        let chosen = router.get_upstream(Some("api.example.com"), "/api/v1").unwrap();
        assert_eq!(chosen.name, "by-host");
    }

    #[test]
    fn longest_prefix_wins_and_ties_favor_declaration_order() {
        let upstreams = vec![
            up("short", None, Some(vec!["/api"]), 1),
            up("long", None, Some(vec!["/api/v2"]), 1),
            up("dup", None, Some(vec!["/api"]), 1),
        ];
        let router = Router::new(upstreams);
        let chosen = router.get_upstream(None, "/api/v2/things").unwrap();
        assert_eq!(chosen.name, "long");

        let tie = router.get_upstream(None, "/api/legacy").unwrap();
        assert_eq!(tie.name, "short");
    }

    #[test]
    fn falls_back_to_first_upstream_when_all_weights_non_positive() {
        let upstreams = vec![up("a", None, None, 0), up("b", None, None, 0)];
        let router = Router::new(upstreams);
        let chosen = router.get_upstream(None, "/").unwrap();
        assert_eq!(chosen.name, "a");
    }
}
