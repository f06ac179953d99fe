//! Declarative table compilation
//!
//! Folds active block and redirect rules into the host filter engine's rule
//! shape: one compiled entry per rule, with a url filter, a regex filter,
//! or a domain restriction standing in for the rule's conditions.

use serde::{Deserialize, Serialize};

use rp_core::actions::redirect_target;
use rp_core::table::{Routing, RuleTable};
use rp_core::types::{Condition, ConditionTarget, Operator, Rule, RuleType};

/// Dynamic-rule ceiling of the common host filter engines.
pub const DEFAULT_MAX_RULES: usize = 5000;

#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CompilerConfig {
    /// Priority assigned to every compiled rule
    pub priority: u32,
    /// Largest table the host accepts; larger tables are not installed
    pub max_rules: usize,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            priority: 1,
            max_rules: DEFAULT_MAX_RULES,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompiledRule {
    pub id: u32,
    pub priority: u32,
    pub action: CompiledAction,
    pub condition: CompiledCondition,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompiledActionType {
    Block,
    Redirect,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedirectTarget {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompiledAction {
    #[serde(rename = "type")]
    pub kind: CompiledActionType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect: Option<RedirectTarget>,
}

/// Match predicate of a compiled rule. `url_filter` and `domains` never
/// appear together, nor do `url_filter` and `regex_filter`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompiledCondition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url_filter: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regex_filter: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domains: Option<Vec<String>>,
}

impl CompiledCondition {
    pub fn is_empty(&self) -> bool {
        self.url_filter.is_none() && self.regex_filter.is_none() && self.domains.is_none()
    }
}

/// Compile the declaratively routed rules of `table`. Pure and
/// deterministic: the same table always yields the same ids in the same
/// order. A synchronously routed table compiles to nothing, which clears
/// the host table.
pub fn compile(table: &RuleTable, config: &CompilerConfig) -> Vec<CompiledRule> {
    if table.routing() == Routing::Synchronous {
        return Vec::new();
    }

    let mut compiled = Vec::new();
    let mut skipped = 0usize;

    for rule in table.active_of(&[RuleType::Block, RuleType::Redirect]) {
        // Never matches synchronously, and would fail the whole host install
        let bad_regex = rule
            .conditions
            .iter()
            .any(|c| c.operator == Operator::Regex && !table.patterns().is_valid(&c.value));
        if bad_regex {
            log::debug!("rule {} has an invalid regex condition, skipping", rule.id);
            skipped += 1;
            continue;
        }

        let condition = fold_conditions(&rule.conditions);
        let action = build_action(rule);

        match action {
            Some(action) if !condition.is_empty() => {
                compiled.push(CompiledRule {
                    id: compiled.len() as u32 + 1,
                    priority: config.priority,
                    action,
                    condition,
                });
            }
            _ => {
                log::debug!("rule {} has no declarative form, skipping", rule.id);
                skipped += 1;
            }
        }
    }

    log::debug!("compiled {} declarative rules ({} skipped)", compiled.len(), skipped);
    compiled
}

/// Fold a rule's conditions into one predicate. Conditions are processed in
/// order and later pattern fields overwrite earlier ones. Any `host`
/// condition restricts by domain and removes the url filter, wherever it
/// appears in the list.
pub fn fold_conditions(conditions: &[Condition]) -> CompiledCondition {
    let mut out = CompiledCondition::default();

    for cond in conditions {
        let value = &cond.value;
        match cond.operator {
            Operator::Contains => set_url_filter(&mut out, format!("*{value}*")),
            Operator::Equals => set_url_filter(&mut out, value.clone()),
            Operator::StartsWith => set_url_filter(&mut out, format!("{value}*")),
            Operator::EndsWith => set_url_filter(&mut out, format!("*{value}")),
            Operator::Regex => {
                out.url_filter = None;
                out.regex_filter = Some(value.clone());
            }
        }

        if cond.target == ConditionTarget::Host {
            out.domains = Some(vec![value.clone()]);
        }
    }

    // Host always wins over url/path patterns
    if out.domains.is_some() {
        out.url_filter = None;
    }

    out
}

fn set_url_filter(out: &mut CompiledCondition, filter: String) {
    out.regex_filter = None;
    out.url_filter = Some(filter);
}

fn build_action(rule: &Rule) -> Option<CompiledAction> {
    match rule.rule_type {
        RuleType::Block => Some(CompiledAction {
            kind: CompiledActionType::Block,
            redirect: None,
        }),
        RuleType::Redirect => redirect_target(&rule.actions).map(|url| CompiledAction {
            kind: CompiledActionType::Redirect,
            redirect: Some(RedirectTarget { url: url.to_string() }),
        }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rp_core::types::{Action, ActionKind, RuleStatus};

    fn cond(target: ConditionTarget, operator: Operator, value: &str) -> Condition {
        Condition {
            id: "c".to_string(),
            target,
            operator,
            value: value.to_string(),
        }
    }

    fn rule(id: &str, rule_type: RuleType, conditions: Vec<Condition>) -> Rule {
        let mut rule = Rule::template(id, rule_type, "2024-01-01T00:00:00Z".parse().unwrap());
        rule.status = RuleStatus::Active;
        rule.conditions = conditions;
        if rule_type == RuleType::Redirect {
            rule.actions[0].value = "https://example.org/landing".to_string();
        }
        rule
    }

    fn table(rules: Vec<Rule>) -> RuleTable {
        RuleTable::new(rules).unwrap()
    }

    #[test]
    fn host_equals_compiles_to_domain_restriction() {
        let t = table(vec![rule(
            "r1",
            RuleType::Block,
            vec![cond(ConditionTarget::Host, Operator::Equals, "ads.example.com")],
        )]);
        let compiled = compile(&t, &CompilerConfig::default());

        assert_eq!(compiled.len(), 1);
        assert_eq!(compiled[0].id, 1);
        assert_eq!(compiled[0].priority, 1);
        assert_eq!(compiled[0].action.kind, CompiledActionType::Block);
        assert_eq!(compiled[0].condition.domains, Some(vec!["ads.example.com".to_string()]));
        assert_eq!(compiled[0].condition.url_filter, None);
    }

    #[test]
    fn operators_fold_to_filter_syntax() {
        let cases = [
            (Operator::Contains, "*ads*"),
            (Operator::Equals, "ads"),
            (Operator::StartsWith, "ads*"),
            (Operator::EndsWith, "*ads"),
        ];
        for (operator, expected) in cases {
            let folded = fold_conditions(&[cond(ConditionTarget::Url, operator, "ads")]);
            assert_eq!(folded.url_filter.as_deref(), Some(expected));
            assert_eq!(folded.regex_filter, None);
        }

        let folded = fold_conditions(&[cond(ConditionTarget::Path, Operator::Regex, r"^/ads/\d+")]);
        assert_eq!(folded.regex_filter.as_deref(), Some(r"^/ads/\d+"));
        assert_eq!(folded.url_filter, None);
    }

    #[test]
    fn host_discards_url_pattern_in_either_order() {
        let url = cond(ConditionTarget::Url, Operator::Contains, "/track");
        let host = cond(ConditionTarget::Host, Operator::Equals, "cdn.example.com");

        for conditions in [vec![url.clone(), host.clone()], vec![host, url]] {
            let folded = fold_conditions(&conditions);
            assert_eq!(folded.domains, Some(vec!["cdn.example.com".to_string()]));
            assert_eq!(folded.url_filter, None);
        }
    }

    #[test]
    fn later_pattern_overwrites_earlier() {
        let folded = fold_conditions(&[
            cond(ConditionTarget::Url, Operator::Regex, "a+"),
            cond(ConditionTarget::Url, Operator::StartsWith, "https://x"),
        ]);
        assert_eq!(folded.url_filter.as_deref(), Some("https://x*"));
        assert_eq!(folded.regex_filter, None);
    }

    #[test]
    fn skips_ineligible_rules() {
        let mut empty_redirect = rule("r2", RuleType::Redirect, vec![cond(ConditionTarget::Url, Operator::Contains, "x")]);
        empty_redirect.actions[0].value.clear();
        let mut inactive = rule("r4", RuleType::Block, vec![cond(ConditionTarget::Url, Operator::Contains, "x")]);
        inactive.status = RuleStatus::Inactive;

        let t = table(vec![
            rule("r1", RuleType::Block, vec![]),
            empty_redirect,
            rule("r3", RuleType::ModifyHeaders, vec![cond(ConditionTarget::Url, Operator::Contains, "x")]),
            inactive,
            rule("r5", RuleType::Redirect, vec![cond(ConditionTarget::Url, Operator::Contains, "x")]),
        ]);
        let compiled = compile(&t, &CompilerConfig::default());

        assert_eq!(compiled.len(), 1);
        assert_eq!(compiled[0].id, 1);
        assert_eq!(
            compiled[0].action.redirect,
            Some(RedirectTarget {
                url: "https://example.org/landing".to_string()
            })
        );
    }

    #[test]
    fn invalid_regex_rule_is_not_compiled() {
        let t = table(vec![
            rule("r1", RuleType::Block, vec![cond(ConditionTarget::Url, Operator::Regex, "([unclosed")]),
            rule("r2", RuleType::Block, vec![cond(ConditionTarget::Host, Operator::Equals, "ads.example.com")]),
        ]);
        assert_eq!(t.patterns().invalid_count(), 1);

        let compiled = compile(&t, &CompilerConfig::default());
        assert_eq!(compiled.len(), 1);
        assert_eq!(compiled[0].id, 1);
        assert_eq!(compiled[0].condition.regex_filter, None);
        assert_eq!(compiled[0].condition.domains, Some(vec!["ads.example.com".to_string()]));
    }

    #[test]
    fn regex_filter_survives_host_restriction() {
        let folded = fold_conditions(&[
            cond(ConditionTarget::Host, Operator::Equals, "api.example.com"),
            cond(ConditionTarget::Url, Operator::Regex, r"/v\d+/"),
        ]);
        assert_eq!(folded.domains, Some(vec!["api.example.com".to_string()]));
        assert_eq!(folded.regex_filter.as_deref(), Some(r"/v\d+/"));
        assert_eq!(folded.url_filter, None);
    }

    #[test]
    fn redirect_uses_first_non_empty_action() {
        let mut r = rule("r1", RuleType::Redirect, vec![cond(ConditionTarget::Url, Operator::Contains, "x")]);
        r.actions = vec![
            Action {
                id: "a0".to_string(),
                kind: ActionKind::Redirect,
                value: String::new(),
                key: None,
            },
            Action {
                id: "a1".to_string(),
                kind: ActionKind::Redirect,
                value: "https://second.example/".to_string(),
                key: None,
            },
        ];
        let compiled = compile(&table(vec![r]), &CompilerConfig::default());
        assert_eq!(compiled[0].action.redirect.as_ref().unwrap().url, "https://second.example/");
    }

    #[test]
    fn compile_is_deterministic() {
        let rules: Vec<_> = (0..20)
            .map(|i| {
                let t = if i % 2 == 0 { RuleType::Block } else { RuleType::Redirect };
                rule(&format!("r{i}"), t, vec![cond(ConditionTarget::Url, Operator::Contains, &format!("site{i}"))])
            })
            .collect();
        let t = table(rules);
        let config = CompilerConfig {
            priority: 3,
            ..Default::default()
        };

        let a = serde_json::to_string(&compile(&t, &config)).unwrap();
        let b = serde_json::to_string(&compile(&t, &config)).unwrap();
        assert_eq!(a, b);

        let ids: Vec<_> = compile(&t, &config).iter().map(|r| r.id).collect();
        assert_eq!(ids, (1..=20).collect::<Vec<u32>>());
    }

    #[test]
    fn synchronous_routing_compiles_to_empty_table() {
        let t = table(vec![rule(
            "r1",
            RuleType::Block,
            vec![cond(ConditionTarget::Url, Operator::Contains, "x")],
        )]);
        assert_eq!(compile(&t, &CompilerConfig::default()).len(), 1);

        let fallback = t.with_routing(Routing::Synchronous);
        assert!(compile(&fallback, &CompilerConfig::default()).is_empty());
    }

    #[test]
    fn wire_shape_matches_host_format() {
        let t = table(vec![rule(
            "r1",
            RuleType::Redirect,
            vec![cond(ConditionTarget::Url, Operator::EndsWith, ".js")],
        )]);
        let json = serde_json::to_string(&compile(&t, &CompilerConfig::default())).unwrap();
        assert_eq!(
            json,
            r#"[{"id":1,"priority":1,"action":{"type":"redirect","redirect":{"url":"https://example.org/landing"}},"condition":{"urlFilter":"*.js"}}]"#
        );
    }
}
