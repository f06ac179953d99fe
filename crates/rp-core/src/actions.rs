//! Action application
//!
//! Applies one matching rule's ordered action list to the working state of
//! an interception event. Actions whose payload is incomplete (for example
//! an `add-header` without a key) are skipped.

use crate::types::{Action, ActionKind, DelayIntent, Header, RuleType};
use crate::url::{rewrite_query, QueryEdit};

pub const USER_AGENT: &str = "User-Agent";

/// Content type attached to substituted response bodies.
pub const RESPONSE_CONTENT_TYPE: &str = "application/json";

/// Mutable state threaded through the matching rules of one event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkingState {
    pub headers: Vec<Header>,
    /// Document URL, only present on the page path
    pub location: Option<String>,
}

/// Effect of a rule that is not a change to the working state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SideEffect {
    Block,
    Redirect { url: String },
    Delay(DelayIntent),
    InjectScript { source: String },
    SubstituteBody { body: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Applied {
    /// The rule changed (or claimed) the working state
    pub touched: bool,
    pub effect: Option<SideEffect>,
}

/// Apply `actions` according to the semantics of `rule_type`.
pub fn apply(rule_type: RuleType, actions: &[Action], state: &mut WorkingState) -> Applied {
    match rule_type {
        RuleType::ModifyHeaders => {
            apply_header_actions(&mut state.headers, actions);
            Applied {
                touched: true,
                effect: None,
            }
        }
        RuleType::UserAgent => match user_agent(actions) {
            Some(ua) => {
                set_header(&mut state.headers, USER_AGENT, ua);
                Applied {
                    touched: true,
                    effect: None,
                }
            }
            None => Applied::default(),
        },
        RuleType::Redirect => Applied {
            touched: false,
            effect: redirect_target(actions).map(|url| SideEffect::Redirect {
                url: url.to_string(),
            }),
        },
        RuleType::Block => Applied {
            touched: false,
            effect: Some(SideEffect::Block),
        },
        RuleType::Delay => Applied {
            touched: false,
            effect: Some(SideEffect::Delay(DelayIntent {
                millis: delay_millis(actions),
                enforced: false,
            })),
        },
        RuleType::ScriptInjection => Applied {
            touched: false,
            effect: first_value(actions, ActionKind::InjectScript).map(|source| SideEffect::InjectScript {
                source: source.to_string(),
            }),
        },
        RuleType::QueryParam => {
            let edits = query_edits(actions);
            let rewritten = state
                .location
                .as_deref()
                .and_then(|location| rewrite_query(location, &edits));
            match rewritten {
                Some(location) => {
                    state.location = Some(location);
                    Applied {
                        touched: true,
                        effect: None,
                    }
                }
                None => Applied::default(),
            }
        }
        RuleType::ModifyResponse => Applied {
            touched: false,
            effect: response_body(actions).map(|body| SideEffect::SubstituteBody {
                body: body.to_string(),
            }),
        },
    }
}

// =============================================================================
// Headers
// =============================================================================

/// Apply `add-header` / `remove-header` actions in order. Names compare
/// case-insensitively; the last applied value wins.
pub fn apply_header_actions(headers: &mut Vec<Header>, actions: &[Action]) {
    for action in actions {
        match action.kind {
            ActionKind::AddHeader => {
                if let Some(name) = action.key() {
                    if !action.value.is_empty() {
                        set_header(headers, name, &action.value);
                    }
                }
            }
            ActionKind::RemoveHeader => {
                if let Some(name) = action.key() {
                    remove_header(headers, name);
                }
            }
            _ => {}
        }
    }
}

/// Replace every header named `name` with a single `name: value`.
pub fn set_header(headers: &mut Vec<Header>, name: &str, value: &str) {
    remove_header(headers, name);
    headers.push(Header::new(name, value));
}

pub fn remove_header(headers: &mut Vec<Header>, name: &str) {
    headers.retain(|h| !h.name.eq_ignore_ascii_case(name));
}

// =============================================================================
// Payload Helpers
// =============================================================================

fn first_value(actions: &[Action], kind: ActionKind) -> Option<&str> {
    actions
        .iter()
        .find(|a| a.kind == kind && !a.value.is_empty())
        .map(|a| a.value.as_str())
}

pub fn user_agent(actions: &[Action]) -> Option<&str> {
    first_value(actions, ActionKind::UserAgent)
}

/// Target of the first `redirect` action with a non-empty value.
pub fn redirect_target(actions: &[Action]) -> Option<&str> {
    first_value(actions, ActionKind::Redirect)
}

/// Body of the first `modify-response` action. An empty body is a valid
/// substitution.
pub fn response_body(actions: &[Action]) -> Option<&str> {
    actions
        .iter()
        .find(|a| a.kind == ActionKind::ModifyResponse)
        .map(|a| a.value.as_str())
}

/// Delay requested by the first `delay` action, 0 if absent.
pub fn delay_millis(actions: &[Action]) -> u64 {
    actions
        .iter()
        .find(|a| a.kind == ActionKind::Delay)
        .map_or(0, |a| parse_delay(&a.value))
}

/// Parse leading decimal digits after optional whitespace and sign.
/// Negative, empty, or overflowing input yields 0.
pub fn parse_delay(value: &str) -> u64 {
    let trimmed = value.trim_start();
    let (negative, digits) = match trimmed.as_bytes().first() {
        Some(b'-') => (true, &trimmed[1..]),
        Some(b'+') => (false, &trimmed[1..]),
        _ => (false, trimmed),
    };

    let end = digits
        .bytes()
        .position(|b| !b.is_ascii_digit())
        .unwrap_or(digits.len());

    if negative || end == 0 {
        return 0;
    }

    digits[..end].parse().unwrap_or(0)
}

/// Query edits of a query-param rule, skipping incomplete actions.
pub fn query_edits(actions: &[Action]) -> Vec<QueryEdit<'_>> {
    actions
        .iter()
        .filter_map(|action| match action.kind {
            ActionKind::AddParam if !action.value.is_empty() => {
                action.key().map(|key| QueryEdit::Set(key, action.value.as_str()))
            }
            ActionKind::RemoveParam => action.key().map(QueryEdit::Remove),
            _ => None,
        })
        .collect()
}
