/// A normalized, already-truncated view of one request, ready to be handed
/// to the rule engine. Every field has already been cut to `max_inspect_bytes`.
#[derive(Debug, Clone, Default)]
pub struct InspectionContext {
    pub path: String,
    pub path_raw: String,
    pub query: String,
    pub headers_digest: String,
    pub body: Option<String>,
}

impl InspectionContext {
    pub fn field(&self, target: crate::config::types::RuleTarget) -> &str {
        use crate::config::types::RuleTarget;
        match target {
            RuleTarget::Path => &self.path,
            RuleTarget::PathRaw => &self.path_raw,
            RuleTarget::Query => &self.query,
            RuleTarget::Headers => &self.headers_digest,
            RuleTarget::Body => self.body.as_deref().unwrap_or(""),
        }
    }
}

pub fn truncate(s: String, max_bytes: usize) -> String {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_respects_char_boundaries() {
        let s = "héllo".to_string();
        let out = truncate(s, 2);
        assert!(out.len() <= 2);
    }

    #[test]
    fn truncate_noop_when_short() {
        assert_eq!(truncate("abc".to_string(), 10), "abc");
    }
}
