//! Rule table snapshots
//!
//! A [`RuleTable`] is immutable once built. Mutations produce a new table
//! that the engine publishes as a whole, so evaluators always see either
//! the old or the new rule set.

use std::collections::HashSet;

use serde::Serialize;

use crate::condition::{ConditionEvaluator, PatternCache};
use crate::error::ValidationError;
use crate::types::{Rule, RuleType};

/// How block and redirect rules of a table are enforced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Routing {
    /// Compiled into the host's declarative table
    #[default]
    Declarative,
    /// Evaluated by `on_before_request` after a failed install
    Synchronous,
}

#[derive(Debug, Clone, Default)]
pub struct RuleTable {
    rules: Vec<Rule>,
    patterns: PatternCache,
    routing: Routing,
}

impl PartialEq for RuleTable {
    fn eq(&self, other: &Self) -> bool {
        self.rules == other.rules && self.routing == other.routing
    }
}

impl RuleTable {
    /// Validate `rules` and build a declaratively routed table.
    pub fn new(rules: Vec<Rule>) -> Result<Self, ValidationError> {
        validate_all(&rules)?;
        Ok(Self::build(rules, None, Routing::Declarative))
    }

    fn build(rules: Vec<Rule>, previous: Option<&RuleTable>, routing: Routing) -> Self {
        let patterns = PatternCache::build(&rules, previous.map(|t| &t.patterns));
        Self {
            rules,
            patterns,
            routing,
        }
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    #[inline]
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Rule> {
        self.rules.iter().find(|r| r.id == id)
    }

    pub fn active(&self) -> impl Iterator<Item = &Rule> {
        self.rules.iter().filter(|r| r.is_active())
    }

    /// Active rules of one of the given types, in table order.
    pub fn active_of<'a>(&'a self, types: &'a [RuleType]) -> impl Iterator<Item = &'a Rule> + 'a {
        self.active().filter(move |r| types.contains(&r.rule_type))
    }

    pub fn active_count(&self) -> usize {
        self.active().count()
    }

    pub fn active_count_of(&self, rule_type: RuleType) -> usize {
        self.active().filter(|r| r.rule_type == rule_type).count()
    }

    pub fn evaluator(&self) -> ConditionEvaluator<'_> {
        ConditionEvaluator::new(&self.patterns)
    }

    pub fn patterns(&self) -> &PatternCache {
        &self.patterns
    }

    #[inline]
    pub fn routing(&self) -> Routing {
        self.routing
    }

    /// True if `rule` belongs to the compiled table rather than the
    /// synchronous block/redirect path. Exactly one of the two paths owns
    /// every block and redirect rule.
    #[inline]
    pub fn is_compiled(&self, rule: &Rule) -> bool {
        self.routing == Routing::Declarative && rule.rule_type.is_declarative()
    }

    // -------------------------------------------------------------------------
    // Copy-on-write mutations
    // -------------------------------------------------------------------------

    /// Replace every rule. Routing resets to declarative.
    pub fn with_rules(&self, rules: Vec<Rule>) -> Result<Self, ValidationError> {
        validate_all(&rules)?;
        Ok(Self::build(rules, Some(self), Routing::Declarative))
    }

    pub fn with_added(&self, rule: Rule) -> Result<Self, ValidationError> {
        rule.validate()?;
        if self.get(&rule.id).is_some() {
            return Err(ValidationError::DuplicateId(rule.id));
        }
        let mut rules = self.rules.clone();
        rules.push(rule);
        Ok(Self::build(rules, Some(self), Routing::Declarative))
    }

    pub fn with_replaced(&self, rule: Rule) -> Result<Self, ValidationError> {
        rule.validate()?;
        let idx = self.position(&rule.id)?;
        let mut rules = self.rules.clone();
        rules[idx] = rule;
        Ok(Self::build(rules, Some(self), Routing::Declarative))
    }

    pub fn with_removed(&self, id: &str) -> Result<Self, ValidationError> {
        let idx = self.position(id)?;
        let mut rules = self.rules.clone();
        rules.remove(idx);
        Ok(Self::build(rules, Some(self), Routing::Declarative))
    }

    pub fn with_toggled(&self, id: &str) -> Result<Self, ValidationError> {
        let idx = self.position(id)?;
        let mut rules = self.rules.clone();
        rules[idx].status = rules[idx].status.toggled();
        Ok(Self::build(rules, Some(self), Routing::Declarative))
    }

    /// Same rules under a different routing mode.
    pub fn with_routing(&self, routing: Routing) -> Self {
        Self {
            rules: self.rules.clone(),
            patterns: self.patterns.clone(),
            routing,
        }
    }

    fn position(&self, id: &str) -> Result<usize, ValidationError> {
        self.rules
            .iter()
            .position(|r| r.id == id)
            .ok_or_else(|| ValidationError::UnknownRule(id.to_string()))
    }
}

pub(crate) fn validate_all(rules: &[Rule]) -> Result<(), ValidationError> {
    let mut seen = HashSet::with_capacity(rules.len());
    for rule in rules {
        rule.validate()?;
        if !seen.insert(rule.id.as_str()) {
            return Err(ValidationError::DuplicateId(rule.id.clone()));
        }
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::types::{Action, ActionKind, Condition, ConditionTarget, Operator, RuleStatus};

    pub(crate) fn rule(id: &str, rule_type: RuleType) -> Rule {
        let (kind, key, value) = match rule_type {
            RuleType::Redirect => (ActionKind::Redirect, None, "https://example.org/"),
            RuleType::ModifyHeaders => (ActionKind::AddHeader, Some("X-Test"), "1"),
            RuleType::Block => (ActionKind::Block, None, "true"),
            RuleType::Delay => (ActionKind::Delay, None, "500"),
            RuleType::ScriptInjection => (ActionKind::InjectScript, None, "window.__rp = 1"),
            RuleType::QueryParam => (ActionKind::AddParam, Some("debug"), "1"),
            RuleType::UserAgent => (ActionKind::UserAgent, None, "RequestPro/1.0"),
            RuleType::ModifyResponse => (ActionKind::ModifyResponse, None, r#"{"mock":true}"#),
        };
        let ts = "2024-01-01T00:00:00Z".parse().unwrap();
        Rule {
            id: id.to_string(),
            name: format!("rule {id}"),
            description: String::new(),
            rule_type,
            status: RuleStatus::Active,
            conditions: vec![Condition {
                id: format!("{id}_c"),
                target: ConditionTarget::Url,
                operator: Operator::Contains,
                value: "example.com".to_string(),
            }],
            actions: vec![Action {
                id: format!("{id}_a"),
                kind,
                value: value.to_string(),
                key: key.map(str::to_string),
            }],
            created_at: ts,
            updated_at: ts,
        }
    }

    #[test]
    fn test_new_rejects_duplicate_ids() {
        let err = RuleTable::new(vec![rule("a", RuleType::Block), rule("a", RuleType::Redirect)]).unwrap_err();
        assert!(matches!(err, ValidationError::DuplicateId(id) if id == "a"));
    }

    #[test]
    fn test_mutations_leave_original_untouched() {
        let table = RuleTable::new(vec![rule("a", RuleType::Block)]).unwrap();
        let added = table.with_added(rule("b", RuleType::ModifyHeaders)).unwrap();
        let toggled = added.with_toggled("a").unwrap();
        let removed = toggled.with_removed("b").unwrap();

        assert_eq!(table.len(), 1);
        assert_eq!(added.len(), 2);
        assert_eq!(toggled.active_count(), 1);
        assert_eq!(removed.len(), 1);
        assert!(!removed.rules()[0].is_active());
        assert!(table.rules()[0].is_active());
    }

    #[test]
    fn test_unknown_ids_are_rejected() {
        let table = RuleTable::default();
        assert!(matches!(table.with_toggled("x"), Err(ValidationError::UnknownRule(_))));
        assert!(matches!(table.with_removed("x"), Err(ValidationError::UnknownRule(_))));
        assert!(matches!(
            table.with_replaced(rule("x", RuleType::Block)),
            Err(ValidationError::UnknownRule(_))
        ));
    }

    #[test]
    fn test_add_rejects_mismatched_actions() {
        let mut bad = rule("a", RuleType::ModifyHeaders);
        bad.actions[0].kind = ActionKind::Block;
        assert!(matches!(
            RuleTable::default().with_added(bad),
            Err(ValidationError::ActionNotAllowed { .. })
        ));
    }

    #[test]
    fn test_routing_partitions_block_and_redirect() {
        let table = RuleTable::new(vec![
            rule("b", RuleType::Block),
            rule("r", RuleType::Redirect),
            rule("h", RuleType::ModifyHeaders),
        ])
        .unwrap();

        let compiled: Vec<_> = table.rules().iter().filter(|r| table.is_compiled(r)).map(|r| r.id.as_str()).collect();
        assert_eq!(compiled, ["b", "r"]);

        let fallback = table.with_routing(Routing::Synchronous);
        assert!(fallback.rules().iter().all(|r| !fallback.is_compiled(r)));

        // Any mutation goes back to trying the declarative path
        let retried = fallback.with_toggled("h").unwrap();
        assert_eq!(retried.routing(), Routing::Declarative);
    }
}
