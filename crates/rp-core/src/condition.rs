//! Condition evaluation
//!
//! Conditions are pure predicates over a [`RequestContext`]. Regex patterns
//! are compiled once per published table; a pattern that fails to compile
//! never matches.

use std::borrow::Cow;
use std::collections::HashMap;

use regex::Regex;

use crate::types::{Condition, ConditionTarget, Operator, Rule};
use crate::url::{extract_host, extract_path, needs_normalization, normalized_host_path};

// =============================================================================
// Request Context
// =============================================================================

/// URL of an interception event with its host and path parsed once.
#[derive(Debug, Clone)]
pub struct RequestContext<'a> {
    /// Full request URL
    pub url: &'a str,
    /// Lower-cased hostname, empty if the URL has no authority
    pub host: String,
    /// Path component, `/` if absent
    pub path: Cow<'a, str>,
}

impl<'a> RequestContext<'a> {
    pub fn new(url: &'a str) -> Self {
        if needs_normalization(url) {
            if let Some((host, path)) = normalized_host_path(url) {
                return Self {
                    url,
                    host,
                    path: Cow::Owned(path),
                };
            }
        }
        Self {
            url,
            host: extract_host(url).unwrap_or("").to_ascii_lowercase(),
            path: Cow::Borrowed(extract_path(url)),
        }
    }

    #[inline]
    pub fn target(&self, target: ConditionTarget) -> &str {
        match target {
            ConditionTarget::Url => self.url,
            ConditionTarget::Host => &self.host,
            ConditionTarget::Path => &self.path,
        }
    }
}

// =============================================================================
// Pattern Cache
// =============================================================================

/// Compiled regex patterns keyed by their source text. `None` marks a
/// pattern that failed to compile.
#[derive(Debug, Clone, Default)]
pub struct PatternCache {
    patterns: HashMap<String, Option<Regex>>,
}

impl PatternCache {
    /// Compile every regex condition of `rules`, reusing entries of
    /// `previous` for patterns that did not change.
    pub fn build<'r>(rules: impl IntoIterator<Item = &'r Rule>, previous: Option<&PatternCache>) -> Self {
        let mut patterns = HashMap::new();

        for rule in rules {
            for cond in &rule.conditions {
                if cond.operator != Operator::Regex || patterns.contains_key(&cond.value) {
                    continue;
                }
                let compiled = match previous.and_then(|p| p.patterns.get(&cond.value)) {
                    Some(entry) => entry.clone(),
                    None => compile_pattern(&cond.value, &rule.id),
                };
                patterns.insert(cond.value.clone(), compiled);
            }
        }

        Self { patterns }
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Number of cached patterns that failed to compile.
    pub fn invalid_count(&self) -> usize {
        self.patterns.values().filter(|p| p.is_none()).count()
    }

    /// Whether `pattern` compiles. Patterns outside the cache are compiled
    /// on the spot.
    pub fn is_valid(&self, pattern: &str) -> bool {
        match self.patterns.get(pattern) {
            Some(entry) => entry.is_some(),
            None => Regex::new(pattern).is_ok(),
        }
    }

    fn is_match(&self, pattern: &str, haystack: &str) -> bool {
        match self.patterns.get(pattern) {
            Some(Some(re)) => re.is_match(haystack),
            Some(None) => false,
            None => Regex::new(pattern).map_or(false, |re| re.is_match(haystack)),
        }
    }
}

fn compile_pattern(pattern: &str, rule_id: &str) -> Option<Regex> {
    match Regex::new(pattern) {
        Ok(re) => Some(re),
        Err(e) => {
            log::warn!("rule {}: invalid regex condition {:?}: {}", rule_id, pattern, e);
            None
        }
    }
}

// =============================================================================
// Evaluator
// =============================================================================

/// Evaluates conditions against a request context.
#[derive(Debug, Clone, Copy)]
pub struct ConditionEvaluator<'p> {
    patterns: &'p PatternCache,
}

impl<'p> ConditionEvaluator<'p> {
    pub fn new(patterns: &'p PatternCache) -> Self {
        Self { patterns }
    }

    pub fn evaluate(&self, ctx: &RequestContext<'_>, condition: &Condition) -> bool {
        let value = ctx.target(condition.target);
        let pattern = condition.value.as_str();

        match condition.operator {
            Operator::Contains => value.contains(pattern),
            Operator::Equals => value == pattern,
            Operator::StartsWith => value.starts_with(pattern),
            Operator::EndsWith => value.ends_with(pattern),
            Operator::Regex => self.patterns.is_match(pattern, value),
        }
    }

    /// All conditions must hold. An empty list matches nothing.
    pub fn matches(&self, ctx: &RequestContext<'_>, conditions: &[Condition]) -> bool {
        !conditions.is_empty() && conditions.iter().all(|c| self.evaluate(ctx, c))
    }
}
