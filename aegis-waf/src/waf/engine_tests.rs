use super::*;
use crate::config::types::{RuleConfig, RuleTarget};

fn thresholds(allow: i64, challenge: i64, block: i64) -> ThresholdsConfig {
    ThresholdsConfig { allow, challenge, block }
}

fn rule(id: &str, target: RuleTarget, pattern: &str, score: i64) -> RuleConfig {
    RuleConfig {
        id: id.to_string(),
        description: None,
        target,
        pattern: pattern.to_string(),
        score,
        enabled: true,
    }
}

fn ctx(path: &str, path_raw: &str, headers: &str) -> InspectionContext {
    InspectionContext {
        path: path.to_string(),
        path_raw: path_raw.to_string(),
        query: String::new(),
        headers_digest: headers.to_string(),
        body: None,
    }
}

#[test]
fn allowlisted_ip_always_allows() {
    let allow = vec![IpEntry::parse("1.1.1.1").unwrap()];
    let rules = vec![rule("R1", RuleTarget::Path, ".*", 1000)];
    let engine = RuleEngine::new(allow, vec![], &rules, thresholds(0, 5, 10), WafMode::Block, 4096);
    let verdict = engine.evaluate(&ctx("/", "/", ""), "1.1.1.1".parse().unwrap());
    assert_eq!(verdict.kind, VerdictKind::Allow);
    assert_eq!(verdict.score, 0);
    assert_eq!(verdict.rule_ids, vec!["allowlist".to_string()]);
}

#[test]
fn blocklisted_ip_blocks_in_block_mode() {
    let block = vec![IpEntry::parse("9.9.9.9").unwrap()];
    let engine = RuleEngine::new(vec![], block, &[], thresholds(0, 5, 10), WafMode::Block, 4096);
    let verdict = engine.evaluate(&ctx("/", "/", ""), "9.9.9.9".parse().unwrap());
    assert_eq!(verdict.kind, VerdictKind::Block);
    assert_eq!(verdict.score, 100);
}

#[test]
fn monitor_mode_never_blocks() {
    let block = vec![IpEntry::parse("9.9.9.9").unwrap()];
    let engine = RuleEngine::new(vec![], block, &[], thresholds(0, 5, 10), WafMode::Monitor, 4096);
    let verdict = engine.evaluate(&ctx("/", "/", ""), "9.9.9.9".parse().unwrap());
    assert_eq!(verdict.kind, VerdictKind::Suspicious);
    assert_eq!(verdict.score, 100);
}

#[test]
fn score_is_commutative_over_rule_order() {
    let rules_a = vec![
        rule("A", RuleTarget::Path, "a", 3),
        rule("B", RuleTarget::Path, "b", 4),
    ];
    let rules_b = vec![
        rule("B", RuleTarget::Path, "b", 4),
        rule("A", RuleTarget::Path, "a", 3),
    ];
    let e1 = RuleEngine::new(vec![], vec![], &rules_a, thresholds(0, 5, 10), WafMode::Block, 4096);
    let e2 = RuleEngine::new(vec![], vec![], &rules_b, thresholds(0, 5, 10), WafMode::Block, 4096);
    let ip = "2.2.2.2".parse().unwrap();
    let v1 = e1.evaluate(&ctx("ab", "ab", ""), ip);
    let v2 = e2.evaluate(&ctx("ab", "ab", ""), ip);
    assert_eq!(v1.score, v2.score);
    assert_eq!(v1.kind, v2.kind);
    // emitted rule_ids still follow declaration order
    assert_eq!(v1.rule_ids, vec!["A".to_string(), "B".to_string()]);
    assert_eq!(v2.rule_ids, vec!["B".to_string(), "A".to_string()]);
}

#[test]
fn threshold_edges() {
    // thresholds {allow:5, challenge:6, block:10}; scores 0/5/6/9/10 -> ALLOW/ALLOW/SUSPICIOUS/SUSPICIOUS/BLOCK
    let t = thresholds(5, 6, 10);
    let rules = vec![rule("SCORE", RuleTarget::Path, ".*", 0)];
    let cases = [(0, VerdictKind::Allow), (5, VerdictKind::Allow), (6, VerdictKind::Suspicious), (9, VerdictKind::Suspicious), (10, VerdictKind::Block)];
    for (score, expected) in cases {
        let mut rules = rules.clone_with_score(score);
        let engine = RuleEngine::new(vec![], vec![], &rules, t, WafMode::Block, 4096);
        let verdict = engine.evaluate(&ctx("/", "/", ""), "3.3.3.3".parse().unwrap());
        assert_eq!(verdict.kind, expected, "score {score}");
        rules.clear();
    }
}

trait CloneWithScore {
    fn clone_with_score(&self, score: i64) -> Vec<RuleConfig>;
}

impl CloneWithScore for Vec<RuleConfig> {
    fn clone_with_score(&self, score: i64) -> Vec<RuleConfig> {
        self.iter()
            .map(|r| RuleConfig { score, ..r.clone() })
            .collect()
    }
}

#[test]
fn bad_regex_is_skipped_not_fatal() {
    let rules = vec![
        rule("BAD", RuleTarget::Path, "(unclosed", 10),
        rule("GOOD", RuleTarget::Path, "ok", 1),
    ];
    let engine = RuleEngine::new(vec![], vec![], &rules, thresholds(0, 5, 10), WafMode::Block, 4096);
    let verdict = engine.evaluate(&ctx("ok", "ok", ""), "4.4.4.4".parse().unwrap());
    assert_eq!(verdict.score, 1);
    assert_eq!(verdict.rule_ids, vec!["GOOD".to_string()]);
}
