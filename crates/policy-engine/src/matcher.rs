use regex::Regex;

use crate::decision::{Denial, Dimension};
use crate::error::PolicyError;
use crate::schema::PatternMode;

/// An ordered list of pre-compiled regular expressions.
///
/// Patterns are searched (not anchored) against the value. In lenient mode a
/// pattern that fails to compile is kept as a slot that never matches, so the
/// list still counts as configured.
#[derive(Debug, Clone, Default)]
pub struct PatternSet {
    patterns: Vec<Option<Regex>>,
}

impl PatternSet {
    /// Compile `sources` for the policy field `field`.
    ///
    /// In [`PatternMode::Strict`] the first broken pattern is returned as an
    /// error; in [`PatternMode::Lenient`] it is logged and treated as a
    /// non-match.
    pub fn compile(field: &str, sources: &[String], mode: PatternMode) -> Result<Self, PolicyError> {
        let mut patterns = Vec::with_capacity(sources.len());
        for source in sources {
            match Regex::new(source) {
                Ok(re) => patterns.push(Some(re)),
                Err(e) if mode == PatternMode::Strict => {
                    return Err(PolicyError::InvalidPattern {
                        field: field.to_string(),
                        pattern: source.clone(),
                        source: e,
                    });
                }
                Err(e) => {
                    tracing::warn!(
                        field,
                        pattern = source.as_str(),
                        error = %e,
                        "failed to compile policy pattern; treating as non-match"
                    );
                    patterns.push(None);
                }
            }
        }
        Ok(Self { patterns })
    }

    /// Number of configured patterns, including broken ones.
    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// True if any compiled pattern is found in `value`.
    pub fn matches(&self, value: &str) -> bool {
        self.patterns.iter().flatten().any(|re| re.is_match(value))
    }
}

/// A deny list and an allow list guarding one [`Dimension`].
#[derive(Debug, Clone, Default)]
pub struct DimensionRule {
    denied: PatternSet,
    allowed: PatternSet,
}

impl DimensionRule {
    /// Compile the `denied_<stem>` and `allowed_<stem>` lists of `section`.
    pub fn compile(
        section: &str,
        stem: &str,
        denied: &[String],
        allowed: &[String],
        mode: PatternMode,
    ) -> Result<Self, PolicyError> {
        Ok(Self {
            denied: PatternSet::compile(&format!("{section}.denied_{stem}"), denied, mode)?,
            allowed: PatternSet::compile(&format!("{section}.allowed_{stem}"), allowed, mode)?,
        })
    }

    /// True when neither list has patterns.
    pub fn is_empty(&self) -> bool {
        self.denied.is_empty() && self.allowed.is_empty()
    }

    /// True when values must match an allow pattern to pass.
    pub fn has_allow_list(&self) -> bool {
        !self.allowed.is_empty()
    }

    /// Check `value`: any deny match rejects, then a non-empty allow list
    /// with no match rejects. An empty allow list places no restriction.
    pub fn check(&self, dimension: Dimension, value: &str) -> Result<(), Denial> {
        if self.denied.matches(value) {
            return Err(Denial::Denied {
                dimension,
                value: value.to_string(),
            });
        }
        if !self.allowed.is_empty() && !self.allowed.matches(value) {
            return Err(Denial::NotAllowed {
                dimension,
                value: value.to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn rule(denied: &[&str], allowed: &[&str]) -> DimensionRule {
        DimensionRule::compile("volumes", "names", &strings(denied), &strings(allowed), PatternMode::Lenient)
            .unwrap()
    }

    // ---- pattern sets ----

    #[test]
    fn patterns_search_anywhere_in_value() {
        let set = PatternSet::compile("p", &strings(&["prod"]), PatternMode::Lenient).unwrap();
        assert!(set.matches("my-prod-db"));
        assert!(!set.matches("staging"));
    }

    #[test]
    fn anchored_patterns_respect_anchors() {
        let set = PatternSet::compile("p", &strings(&["^prod-.*"]), PatternMode::Lenient).unwrap();
        assert!(set.matches("prod-db"));
        assert!(!set.matches("my-prod-db"));
    }

    #[test]
    fn broken_pattern_is_a_non_match_in_lenient_mode() {
        let set = PatternSet::compile("p", &strings(&["[invalid", "^ok$"]), PatternMode::Lenient)
            .unwrap();
        assert_eq!(set.len(), 2);
        assert!(set.matches("ok"));
        assert!(!set.matches("[invalid"));
    }

    #[test]
    fn broken_pattern_is_an_error_in_strict_mode() {
        let err = PatternSet::compile("denied_names", &strings(&["(unclosed"]), PatternMode::Strict)
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("denied_names"), "unexpected error: {msg}");
        assert!(msg.contains("(unclosed"), "unexpected error: {msg}");
    }

    // ---- dimension rules ----

    #[test]
    fn empty_rule_allows_everything() {
        let r = rule(&[], &[]);
        assert!(r.is_empty());
        assert!(r.check(Dimension::VolumeName, "anything").is_ok());
        assert!(r.check(Dimension::VolumeName, "").is_ok());
    }

    #[test]
    fn deny_match_rejects() {
        let r = rule(&["^prod-"], &[]);
        assert_eq!(
            r.check(Dimension::VolumeName, "prod-db").unwrap_err().to_string(),
            "volume name is denied: prod-db"
        );
        assert!(r.check(Dimension::VolumeName, "dev-db").is_ok());
    }

    #[test]
    fn allow_list_miss_rejects() {
        let r = rule(&[], &["^app-", "^svc-"]);
        assert!(r.check(Dimension::NetworkName, "svc-mesh").is_ok());
        assert_eq!(
            r.check(Dimension::NetworkName, "other").unwrap_err().to_string(),
            "network name not in allowed list: other"
        );
    }

    #[test]
    fn deny_takes_precedence_over_allow() {
        let r = rule(&["secret"], &["^app-"]);
        assert!(matches!(
            r.check(Dimension::ContainerName, "app-secret"),
            Err(Denial::Denied { .. })
        ));
    }

    #[test]
    fn broken_deny_pattern_fails_open() {
        let r = rule(&["[broken"], &[]);
        assert!(r.check(Dimension::HostPath, "/var/run/docker.sock").is_ok());
    }

    #[test]
    fn sole_broken_allow_pattern_fails_closed() {
        let r = rule(&[], &["[broken"]);
        assert!(matches!(
            r.check(Dimension::ImageTag, "latest"),
            Err(Denial::NotAllowed { .. })
        ));
    }

    #[test]
    fn broken_allow_pattern_does_not_affect_siblings() {
        let r = rule(&[], &["[broken", "^v1"]);
        assert!(r.check(Dimension::ImageTag, "v1.2").is_ok());
    }
}
