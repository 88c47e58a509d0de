#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerdictKind {
    Allow,
    Suspicious,
    Block,
}

impl VerdictKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerdictKind::Allow => "ALLOW",
            VerdictKind::Suspicious => "SUSPICIOUS",
            VerdictKind::Block => "BLOCK",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Finding {
    pub rule_id: String,
    pub target: &'static str,
    pub score: i64,
}

#[derive(Debug, Clone)]
pub struct Verdict {
    pub kind: VerdictKind,
    pub score: i64,
    pub findings: Vec<Finding>,
    pub rule_ids: Vec<String>,
}

impl Verdict {
    pub fn allowlisted() -> Self {
        Self {
            kind: VerdictKind::Allow,
            score: 0,
            findings: vec![Finding {
                rule_id: "allowlist".to_string(),
                target: "client_ip",
                score: 0,
            }],
            rule_ids: vec!["allowlist".to_string()],
        }
    }
}
