//! The shipped rule engine: a small, declarative evaluator over ordered
//! match rules plus a mandatory default. Deliberately not a general policy
//! language: no boolean composition, no external calls, no access to
//! trace-wide aggregates beyond what a rule author encodes as separate
//! rules.

use std::path::Path;

use rand::Rng;
use regex::Regex;
use serde::Deserialize;
use tracing::warn;

use super::errors::PolicyFileError;
use super::span::Span;

/// The outcome of evaluating a trace against the policy.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleResult {
    pub sample_rate: u8,
    pub reason: String,
}

impl SampleResult {
    fn default_accept() -> Self {
        SampleResult {
            sample_rate: 100,
            reason: "Unexpected response, default to accept".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawRule {
    #[serde(rename = "match")]
    pattern: String,
    sample_rate: u8,
    reason: String,
}

#[derive(Debug, Deserialize)]
struct RawDefault {
    sample_rate: u8,
    reason: String,
}

#[derive(Debug, Deserialize)]
struct RawPolicy {
    #[serde(default)]
    rule: Vec<RawRule>,
    default: RawDefault,
}

struct Rule {
    /// `None` when the configured pattern failed to compile; such a rule
    /// never matches and evaluation falls through to later rules or the
    /// default, per the policy file's documented evaluation-time failure
    /// path (this is not a startup error).
    pattern: Option<Regex>,
    sample_rate: u8,
    reason: String,
}

/// An ordered rule list loaded once from `--policy-file`, read-only and
/// safe for concurrent evaluation after construction.
pub struct PolicyEngine {
    rules: Vec<Rule>,
    default_rate: u8,
    default_reason: String,
}

impl PolicyEngine {
    pub fn load(path: &Path) -> Result<Self, PolicyFileError> {
        let text = std::fs::read_to_string(path).map_err(|e| PolicyFileError {
            reason: format!("reading {}: {}", path.display(), e),
        })?;
        Self::from_str(&text)
    }

    /// Parse a policy document already in memory, the same TOML shape
    /// `load` reads from disk. Useful for tests and for embedding a
    /// default policy.
    pub fn from_str(text: &str) -> Result<Self, PolicyFileError> {
        let raw: RawPolicy = toml::from_str(text).map_err(|e| PolicyFileError {
            reason: format!("parsing policy: {}", e),
        })?;

        let mut rules = Vec::with_capacity(raw.rule.len());
        for r in raw.rule {
            let pattern = match Regex::new(&r.pattern) {
                Ok(re) => Some(re),
                Err(e) => {
                    warn!(pattern = %r.pattern, error = %e, "policy rule has an invalid match pattern, it will never match");
                    None
                }
            };
            rules.push(Rule {
                pattern,
                sample_rate: r.sample_rate,
                reason: r.reason,
            });
        }

        Ok(PolicyEngine {
            rules,
            default_rate: raw.default.sample_rate,
            default_reason: raw.default.reason,
        })
    }

    /// Pure; does not retain or mutate the spans passed in. Walks the
    /// trace's root span (falling back to any span if no root is present)
    /// and returns the first matching rule's result, or the default.
    ///
    /// On any internal failure (no spans at all, an evaluation-time error)
    /// returns a default accept: failure biases toward forwarding.
    pub fn evaluate(&self, spans: &[Span]) -> SampleResult {
        let subject = spans
            .iter()
            .find(|s| s.is_root())
            .or_else(|| spans.first());

        let subject = match subject {
            Some(s) => s,
            None => return SampleResult::default_accept(),
        };

        for rule in &self.rules {
            if let Some(pattern) = &rule.pattern {
                if pattern.is_match(&subject.name) {
                    return SampleResult {
                        sample_rate: rule.sample_rate,
                        reason: rule.reason.clone(),
                    };
                }
            }
        }

        SampleResult {
            sample_rate: self.default_rate,
            reason: self.default_reason.clone(),
        }
    }

    /// Fair Bernoulli sampler over an integer percentage: rate 0 is always
    /// false, rate 100 is always true.
    pub fn decide(rate: u8) -> bool {
        match rate {
            0 => false,
            100 => true,
            r => rand::thread_rng().gen_range(0, 100) < r,
        }
    }

    /// Composes `evaluate` and `decide`.
    pub fn accept_spans(&self, spans: &[Span]) -> (bool, SampleResult) {
        let result = self.evaluate(spans);
        if result.sample_rate > 100 {
            warn!(rate = result.sample_rate, "policy returned out-of-range sample rate, defaulting to accept");
            let fallback = SampleResult::default_accept();
            let decided = Self::decide(fallback.sample_rate);
            return (decided, fallback);
        }
        let decided = Self::decide(result.sample_rate);
        (decided, result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::HashMap;

    fn span(name: &str) -> Span {
        Span {
            trace_id: "t1".into(),
            trace_id_high: None,
            name: name.into(),
            id: "root".into(),
            parent_id: None,
            annotations: Vec::new(),
            binary_annotations: Vec::new(),
            debug: false,
            timestamp: Utc::now(),
            duration: chrono::Duration::zero(),
            tags: HashMap::new(),
        }
    }

    const POLICY: &str = r#"
        [[rule]]
        match = "^ping$"
        sample_rate = 0
        reason = "ping"

        [default]
        sample_rate = 100
        reason = "default accept"
    "#;

    #[test]
    fn matching_rule_wins() {
        let engine = PolicyEngine::from_str(POLICY).unwrap();
        let result = engine.evaluate(&[span("ping")]);
        assert_eq!(result.sample_rate, 0);
        assert_eq!(result.reason, "ping");
    }

    #[test]
    fn unmatched_falls_back_to_default() {
        let engine = PolicyEngine::from_str(POLICY).unwrap();
        let result = engine.evaluate(&[span("checkout")]);
        assert_eq!(result.sample_rate, 100);
        assert_eq!(result.reason, "default accept");
    }

    #[test]
    fn empty_spans_default_accepts() {
        let engine = PolicyEngine::from_str(POLICY).unwrap();
        let result = engine.evaluate(&[]);
        assert_eq!(result.sample_rate, 100);
        assert!(result.reason.contains("Unexpected"));
    }

    #[test]
    fn default_only_policy_always_defaults() {
        let policy = r#"
            [default]
            sample_rate = 42
            reason = "sampled"
        "#;
        let engine = PolicyEngine::from_str(policy).unwrap();
        let result = engine.evaluate(&[span("anything")]);
        assert_eq!(result.sample_rate, 42);
    }

    #[test]
    fn decide_is_deterministic_at_extremes() {
        assert!(!PolicyEngine::decide(0));
        assert!(PolicyEngine::decide(100));
    }

    #[test]
    fn malformed_pattern_falls_through_to_default_instead_of_failing_load() {
        let policy = r#"
            [[rule]]
            match = "("
            sample_rate = 0
            reason = "broken"

            [default]
            sample_rate = 100
            reason = "accept"
        "#;
        let engine = PolicyEngine::from_str(policy).expect("unreadable syntax is a load error, an invalid regex is not");
        let result = engine.evaluate(&[span("anything")]);
        assert_eq!(result.sample_rate, 100);
        assert_eq!(result.reason, "accept");
    }

    #[test]
    fn malformed_toml_is_a_load_error() {
        assert!(PolicyEngine::from_str("not valid toml [[[").is_err());
    }
}
