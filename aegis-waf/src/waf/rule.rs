use regex::Regex;

use crate::config::types::{RuleConfig, RuleTarget};

/// Same shape as `RuleConfig` with the pattern replaced by its compiled
/// matcher. Only rules whose pattern compiled successfully are ever held
/// here (§4.B) — a bad pattern is a warning, never a fatal error.
#[derive(Debug)]
pub struct CompiledRule {
    pub id: String,
    pub target: RuleTarget,
    pub regex: Regex,
    pub score: i64,
}

pub fn target_label(target: RuleTarget) -> &'static str {
    match target {
        RuleTarget::Path => "path",
        RuleTarget::PathRaw => "path_raw",
        RuleTarget::Query => "query",
        RuleTarget::Headers => "headers",
        RuleTarget::Body => "body",
    }
}

/// Compile every enabled rule's pattern, in declaration order. Patterns that
/// fail to compile are logged and dropped rather than aborting the whole set.
pub fn compile_rules(rules: &[RuleConfig]) -> Vec<CompiledRule> {
    let mut compiled = Vec::with_capacity(rules.len());
    for r in rules {
        if !r.enabled {
            continue;
        }
        match Regex::new(&r.pattern) {
            Ok(regex) => compiled.push(CompiledRule {
                id: r.id.clone(),
                target: r.target,
                regex,
                score: r.score,
            }),
            Err(e) => {
                tracing::warn!(rule_id = %r.id, pattern = %r.pattern, error = %e, "rule pattern failed to compile, skipping");
            }
        }
    }
    compiled
}
