//! Core type definitions for RequestPro
//!
//! These types map directly to the rule records persisted by the dashboard
//! and exchanged through import/export, and are used throughout the engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

// =============================================================================
// Rule Types
// =============================================================================

/// Kind of rule. Determines which actions a rule may carry and which
/// interception point evaluates it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RuleType {
    /// Redirect the request to another URL
    Redirect,
    /// Add or remove request/response headers
    ModifyHeaders,
    /// Cancel the request
    Block,
    /// Hold the request back (recorded intent only)
    Delay,
    /// Inject a script into the page
    ScriptInjection,
    /// Rewrite query parameters of the document location
    QueryParam,
    /// Override the User-Agent request header
    UserAgent,
    /// Substitute the response body
    ModifyResponse,
}

impl RuleType {
    pub const ALL: [RuleType; 8] = [
        Self::Redirect,
        Self::ModifyHeaders,
        Self::Block,
        Self::Delay,
        Self::ScriptInjection,
        Self::QueryParam,
        Self::UserAgent,
        Self::ModifyResponse,
    ];

    /// Parse from the wire name (`"modify-headers"`, `"block"`, ...).
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == s)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Redirect => "redirect",
            Self::ModifyHeaders => "modify-headers",
            Self::Block => "block",
            Self::Delay => "delay",
            Self::ScriptInjection => "script-injection",
            Self::QueryParam => "query-param",
            Self::UserAgent => "user-agent",
            Self::ModifyResponse => "modify-response",
        }
    }

    /// Human readable label used by listings.
    pub fn label(self) -> &'static str {
        match self {
            Self::Redirect => "URL Redirect",
            Self::ModifyHeaders => "Modify Headers",
            Self::Block => "Block Request",
            Self::Delay => "Delay Request",
            Self::ScriptInjection => "Script Injection",
            Self::QueryParam => "Query Parameters",
            Self::UserAgent => "User Agent",
            Self::ModifyResponse => "Modify API Response",
        }
    }

    /// Action kinds a rule of this type may carry.
    pub fn allowed_actions(self) -> &'static [ActionKind] {
        match self {
            Self::Redirect => &[ActionKind::Redirect],
            Self::ModifyHeaders => &[ActionKind::AddHeader, ActionKind::RemoveHeader],
            Self::Block => &[ActionKind::Block],
            Self::Delay => &[ActionKind::Delay],
            Self::ScriptInjection => &[ActionKind::InjectScript],
            Self::QueryParam => &[ActionKind::AddParam, ActionKind::RemoveParam],
            Self::UserAgent => &[ActionKind::UserAgent],
            Self::ModifyResponse => &[ActionKind::ModifyResponse],
        }
    }

    /// Block and redirect can be enforced without live inspection and are
    /// compiled into the declarative table.
    pub fn is_declarative(self) -> bool {
        matches!(self, Self::Block | Self::Redirect)
    }

    /// Action a freshly created rule of this type starts with.
    fn template_action(self) -> (ActionKind, Option<&'static str>, &'static str) {
        match self {
            Self::Redirect => (ActionKind::Redirect, None, ""),
            Self::ModifyHeaders => (ActionKind::AddHeader, Some(""), ""),
            Self::Block => (ActionKind::Block, None, "true"),
            Self::Delay => (ActionKind::Delay, None, "1000"),
            Self::ScriptInjection => (ActionKind::InjectScript, None, ""),
            Self::QueryParam => (ActionKind::AddParam, Some(""), ""),
            Self::UserAgent => (ActionKind::UserAgent, None, ""),
            Self::ModifyResponse => (ActionKind::ModifyResponse, None, ""),
        }
    }
}

impl std::fmt::Display for RuleType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a rule takes part in evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleStatus {
    Active,
    Inactive,
}

impl RuleStatus {
    pub fn toggled(self) -> Self {
        match self {
            Self::Active => Self::Inactive,
            Self::Inactive => Self::Active,
        }
    }
}

// =============================================================================
// Conditions
// =============================================================================

/// Request attribute a condition inspects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConditionTarget {
    Url,
    Host,
    Path,
}

/// String relation between the inspected attribute and the condition value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Operator {
    Contains,
    Equals,
    StartsWith,
    EndsWith,
    Regex,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Condition {
    pub id: String,
    #[serde(rename = "type")]
    pub target: ConditionTarget,
    pub operator: Operator,
    pub value: String,
}

// =============================================================================
// Actions
// =============================================================================

/// Kind of an action. Valid kinds per rule type are listed by
/// [`RuleType::allowed_actions`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActionKind {
    Redirect,
    AddHeader,
    RemoveHeader,
    Block,
    Delay,
    InjectScript,
    AddParam,
    RemoveParam,
    UserAgent,
    ModifyResponse,
}

impl ActionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Redirect => "redirect",
            Self::AddHeader => "add-header",
            Self::RemoveHeader => "remove-header",
            Self::Block => "block",
            Self::Delay => "delay",
            Self::InjectScript => "inject-script",
            Self::AddParam => "add-param",
            Self::RemoveParam => "remove-param",
            Self::UserAgent => "user-agent",
            Self::ModifyResponse => "modify-response",
        }
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ActionKind,
    #[serde(default)]
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

impl Action {
    /// Key if present and non-empty.
    pub fn key(&self) -> Option<&str> {
        self.key.as_deref().filter(|k| !k.is_empty())
    }
}

// =============================================================================
// Rule
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "type")]
    pub rule_type: RuleType,
    pub status: RuleStatus,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub actions: Vec<Action>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Rule {
    /// Build an inactive rule of the given type with one empty `url contains`
    /// condition and the type's default action.
    pub fn template(id: impl Into<String>, rule_type: RuleType, now: DateTime<Utc>) -> Self {
        let id = id.into();
        let (kind, key, value) = rule_type.template_action();
        Self {
            name: format!("New {} rule", rule_type.as_str().replacen('-', " ", 1)),
            description: String::new(),
            rule_type,
            status: RuleStatus::Inactive,
            conditions: vec![Condition {
                id: format!("{id}_c0"),
                target: ConditionTarget::Url,
                operator: Operator::Contains,
                value: String::new(),
            }],
            actions: vec![Action {
                id: format!("{id}_a0"),
                kind,
                value: value.to_string(),
                key: key.map(str::to_string),
            }],
            id,
            created_at: now,
            updated_at: now,
        }
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.status == RuleStatus::Active
    }

    /// Check the shape invariants enforced at the table-mutation boundary.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.id.trim().is_empty() {
            return Err(ValidationError::EmptyId);
        }

        let allowed = self.rule_type.allowed_actions();
        for action in &self.actions {
            if !allowed.contains(&action.kind) {
                return Err(ValidationError::ActionNotAllowed {
                    rule_id: self.id.clone(),
                    rule_type: self.rule_type,
                    action: action.kind,
                });
            }
        }

        Ok(())
    }
}

// =============================================================================
// Traffic Model
// =============================================================================

/// Host-side identifier of a browsing context (tab).
pub type ContextId = i32;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub name: String,
    pub value: String,
}

impl Header {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Full replacement header list returned to the host.
pub type HeaderPatch = Vec<Header>;

/// Final decision for a request on the synchronous path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Decision {
    Allow,
    Block,
    Redirect { url: String },
}

/// A delay some rule asked for. Never enforced by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DelayIntent {
    pub millis: u64,
    pub enforced: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestVerdict {
    pub decision: Decision,
    /// Rule that determined the decision
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delay: Option<DelayIntent>,
}

impl Default for RequestVerdict {
    fn default() -> Self {
        Self {
            decision: Decision::Allow,
            rule_id: None,
            delay: None,
        }
    }
}

/// Body substitution for a response lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseOverride {
    pub rule_id: String,
    pub body: String,
    pub content_type: &'static str,
}

/// Effects the page-level collaborator applies to a loaded document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageEffects {
    /// Script sources to inject, in rule order
    pub scripts: Vec<String>,
    /// Rewritten document URL if a query-param rule applied
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

impl PageEffects {
    pub fn is_empty(&self) -> bool {
        self.scripts.is_empty() && self.location.is_none()
    }
}

/// Instruction for the response-inspection hook installer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum HookSignal {
    /// First modify-response rule became active: install in every open context
    InstallAll,
    /// Last modify-response rule became inactive: tear down everywhere
    TeardownAll,
    /// A single context navigated while modify-response rules are active
    InstallIn {
        #[serde(rename = "contextId")]
        context_id: ContextId,
    },
}

/// Verdict kind reported by the host's declarative enforcement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeclarativeKind {
    Block,
    Redirect,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts() -> DateTime<Utc> {
        "2024-03-01T10:00:00Z".parse().unwrap()
    }

    #[test]
    fn test_rule_type_names() {
        for t in RuleType::ALL {
            assert_eq!(RuleType::parse(t.as_str()), Some(t));
            let json = serde_json::to_string(&t).unwrap();
            assert_eq!(json, format!("\"{}\"", t.as_str()));
        }
        assert_eq!(RuleType::parse("nope"), None);
    }

    #[test]
    fn test_template_is_valid() {
        for t in RuleType::ALL {
            let rule = Rule::template("r1", t, ts());
            assert!(rule.validate().is_ok(), "template for {t} should validate");
            assert_eq!(rule.status, RuleStatus::Inactive);
        }
        assert_eq!(Rule::template("r", RuleType::ModifyHeaders, ts()).name, "New modify headers rule");
    }

    #[test]
    fn test_validate_rejects_mismatched_action() {
        let mut rule = Rule::template("r1", RuleType::Block, ts());
        rule.actions[0].kind = ActionKind::Redirect;
        match rule.validate() {
            Err(ValidationError::ActionNotAllowed { action, rule_type, .. }) => {
                assert_eq!(action, ActionKind::Redirect);
                assert_eq!(rule_type, RuleType::Block);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_validate_rejects_empty_id() {
        let rule = Rule::template("  ", RuleType::Block, ts());
        assert!(matches!(rule.validate(), Err(ValidationError::EmptyId)));
    }

    #[test]
    fn test_rule_wire_shape() {
        let json = r#"{
            "id": "rule_1",
            "name": "Headers",
            "description": "",
            "type": "modify-headers",
            "status": "active",
            "conditions": [{"id": "c1", "type": "host", "operator": "starts-with", "value": "api."}],
            "actions": [{"id": "a1", "type": "add-header", "key": "X-Test", "value": "1"}],
            "createdAt": "2024-03-01T10:00:00.000Z",
            "updatedAt": "2024-03-01T12:00:00+02:00"
        }"#;
        let rule: Rule = serde_json::from_str(json).unwrap();
        assert_eq!(rule.rule_type, RuleType::ModifyHeaders);
        assert_eq!(rule.conditions[0].operator, Operator::StartsWith);
        assert_eq!(rule.actions[0].key(), Some("X-Test"));
        assert_eq!(rule.created_at, rule.updated_at);
    }

    #[test]
    fn test_unknown_action_kind_is_rejected() {
        let json = r#"{"id": "a1", "type": "teleport", "value": ""}"#;
        assert!(serde_json::from_str::<Action>(json).is_err());
    }

    #[test]
    fn test_hook_signal_wire_shape() {
        let json = serde_json::to_string(&HookSignal::InstallIn { context_id: 7 }).unwrap();
        assert_eq!(json, r#"{"type":"installIn","contextId":7}"#);
        let json = serde_json::to_string(&HookSignal::TeardownAll).unwrap();
        assert_eq!(json, r#"{"type":"teardownAll"}"#);
    }
}
