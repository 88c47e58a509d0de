use std::net::IpAddr;

use crate::config::types::{IpEntry, ThresholdsConfig, WafMode};
use crate::waf::context::InspectionContext;
use crate::waf::decision::{Finding, Verdict, VerdictKind};
use crate::waf::rule::{compile_rules, target_label, CompiledRule};

/// Compiled, ready-to-evaluate rule set plus the IP lists, thresholds and
/// mode it was built from. One `RuleEngine` is part of a `Snapshot`; it is
/// replaced wholesale on reload, never mutated in place.
pub struct RuleEngine {
    allowlist: Vec<IpEntry>,
    blocklist: Vec<IpEntry>,
    rules: Vec<CompiledRule>,
    thresholds: ThresholdsConfig,
    mode: WafMode,
    max_inspect_bytes: usize,
}

impl RuleEngine {
    pub fn new(
        allowlist: Vec<IpEntry>,
        blocklist: Vec<IpEntry>,
        rules: &[crate::config::types::RuleConfig],
        thresholds: ThresholdsConfig,
        mode: WafMode,
        max_inspect_bytes: usize,
    ) -> Self {
        Self {
            allowlist,
            blocklist,
            rules: compile_rules(rules),
            thresholds,
            mode,
            max_inspect_bytes,
        }
    }

    /// §4.B decision order: allowlist fast path, then blocklist fast path,
    /// then per-rule scoring. The blocklist still runs through thresholding
    /// (as a synthetic score-100 finding) so monitor mode can demote it.
    pub fn evaluate(&self, ctx: &InspectionContext, client_ip: IpAddr) -> Verdict {
        if self.allowlist.iter().any(|e| e.contains(client_ip)) {
            return Verdict::allowlisted();
        }

        let mut findings = Vec::new();

        if self.blocklist.iter().any(|e| e.contains(client_ip)) {
            findings.push(Finding {
                rule_id: "blocklist".to_string(),
                target: "client_ip",
                score: 100,
            });
        } else {
            for rule in &self.rules {
                let field = ctx.field(rule.target);
                let truncated = crate::waf::context::truncate(field.to_string(), self.max_inspect_bytes);
                if rule.regex.is_match(&truncated) {
                    findings.push(Finding {
                        rule_id: rule.id.clone(),
                        target: target_label(rule.target),
                        score: rule.score,
                    });
                }
            }
        }

        let score: i64 = findings.iter().map(|f| f.score).sum();
        let rule_ids: Vec<String> = findings.iter().map(|f| f.rule_id.clone()).collect();

        let mut kind = if score >= self.thresholds.block {
            VerdictKind::Block
        } else if score > self.thresholds.allow {
            VerdictKind::Suspicious
        } else {
            VerdictKind::Allow
        };

        if self.mode == WafMode::Monitor && kind == VerdictKind::Block {
            kind = VerdictKind::Suspicious;
        }

        Verdict {
            kind,
            score,
            findings,
            rule_ids,
        }
    }
}

#[cfg(test)]
#[path = "engine_tests.rs"]
mod engine_tests;
