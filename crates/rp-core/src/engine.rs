//! Rule Engine
//!
//! Owns the published rule table and answers the host's interception
//! hooks. Every traffic hook works on one `Arc<RuleTable>` snapshot taken at
//! entry, so a concurrent mutation is seen either entirely or not at all.

use std::sync::{Arc, Mutex, PoisonError};

use serde::Deserialize;
use tokio::sync::watch;

use crate::actions::{self, SideEffect, WorkingState, RESPONSE_CONTENT_TYPE};
use crate::condition::RequestContext;
use crate::error::{EngineError, ValidationError};
use crate::notify::{NotificationChannel, NotificationReceiver, DEFAULT_CAPACITY};
use crate::stats::{Stats, StatsAggregator};
use crate::store::{RuleStore, StoredState};
use crate::table::{Routing, RuleTable};
use crate::types::{
    ContextId, Decision, DeclarativeKind, Header, HeaderPatch, HookSignal, PageEffects, RequestVerdict,
    ResponseOverride, Rule, RuleStatus, RuleType,
};
use crate::url::is_web_url;

const REQUEST_HEADER_RULES: &[RuleType] = &[RuleType::ModifyHeaders, RuleType::UserAgent];
const RESPONSE_HEADER_RULES: &[RuleType] = &[RuleType::ModifyHeaders];
const REQUEST_RULES: &[RuleType] = &[RuleType::Block, RuleType::Redirect, RuleType::Delay];
const PAGE_RULES: &[RuleType] = &[RuleType::ScriptInjection, RuleType::QueryParam];
const RESPONSE_RULES: &[RuleType] = &[RuleType::ModifyResponse];

#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineConfig {
    /// Capacity of the notification queue
    pub notification_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            notification_capacity: DEFAULT_CAPACITY,
        }
    }
}

/// Outcome of a table mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mutation {
    /// Set when the number of active modify-response rules went 0→n or n→0
    pub hook: Option<HookSignal>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Toggled {
    pub status: RuleStatus,
    pub hook: Option<HookSignal>,
}

pub struct RuleEngine {
    table: watch::Sender<Arc<RuleTable>>,
    /// Serializes writers; readers never take it
    write_lock: Mutex<()>,
    stats: StatsAggregator,
    notifications: NotificationChannel,
}

impl RuleEngine {
    pub fn new(config: &EngineConfig) -> (Self, NotificationReceiver) {
        let (notifications, rx) = NotificationChannel::bounded(config.notification_capacity);
        let (table, _) = watch::channel(Arc::new(RuleTable::default()));
        let engine = Self {
            table,
            write_lock: Mutex::new(()),
            stats: StatsAggregator::default(),
            notifications,
        };
        (engine, rx)
    }

    /// Construct from persisted state. Request counters resume where they
    /// left off; rule totals are recomputed.
    pub fn with_state(config: &EngineConfig, state: StoredState) -> Result<(Self, NotificationReceiver), ValidationError> {
        let table = RuleTable::new(state.rules)?;
        let (notifications, rx) = NotificationChannel::bounded(config.notification_capacity);
        let stats = StatsAggregator::restore(state.stats);
        stats.set_rule_counts(table.len(), table.active_count());

        let (table, _) = watch::channel(Arc::new(table));
        let engine = Self {
            table,
            write_lock: Mutex::new(()),
            stats,
            notifications,
        };
        Ok((engine, rx))
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Current table snapshot.
    #[inline]
    pub fn table(&self) -> Arc<RuleTable> {
        self.table.borrow().clone()
    }

    /// Observe table publications. The declarative compiler runs off this.
    pub fn subscribe(&self) -> watch::Receiver<Arc<RuleTable>> {
        self.table.subscribe()
    }

    pub fn stats(&self) -> Stats {
        self.stats.snapshot()
    }

    pub fn state(&self) -> StoredState {
        StoredState {
            rules: self.table().rules().to_vec(),
            stats: self.stats(),
        }
    }

    /// Write the current state through `store`. On failure the in-memory
    /// table stays as it is.
    pub fn persist_to(&self, store: &dyn RuleStore) -> Result<(), EngineError> {
        store.save(&self.state())?;
        Ok(())
    }

    // =========================================================================
    // Traffic Hooks
    // =========================================================================

    /// Rewrite outgoing request headers. Returns the full header list if any
    /// matching modify-headers or user-agent rule touched it.
    pub fn on_before_send(&self, url: &str, headers: &[Header]) -> Option<HeaderPatch> {
        self.patch_headers(url, headers, REQUEST_HEADER_RULES)
    }

    /// Rewrite response headers with the matching modify-headers rules.
    pub fn on_headers_received(&self, url: &str, headers: &[Header]) -> Option<HeaderPatch> {
        self.patch_headers(url, headers, RESPONSE_HEADER_RULES)
    }

    fn patch_headers(&self, url: &str, headers: &[Header], types: &[RuleType]) -> Option<HeaderPatch> {
        let table = self.table();
        let eval = table.evaluator();
        let ctx = RequestContext::new(url);

        let mut state = WorkingState {
            headers: headers.to_vec(),
            location: None,
        };
        let mut modified = false;

        for rule in table.active_of(types) {
            if eval.matches(&ctx, &rule.conditions) {
                modified |= actions::apply(rule.rule_type, &rule.actions, &mut state).touched;
            }
        }

        modified.then_some(state.headers)
    }

    /// Synchronous block/redirect decision. Block and redirect rules are only
    /// evaluated here while the table routes them synchronously; otherwise the
    /// compiled table owns them. Delay rules are reported, never enforced.
    pub fn on_before_request(&self, url: &str) -> RequestVerdict {
        let table = self.table();
        let eval = table.evaluator();
        let ctx = RequestContext::new(url);
        let mut verdict = RequestVerdict::default();

        for rule in table.active_of(REQUEST_RULES) {
            if table.is_compiled(rule) || !eval.matches(&ctx, &rule.conditions) {
                continue;
            }

            let mut state = WorkingState::default();
            match actions::apply(rule.rule_type, &rule.actions, &mut state).effect {
                Some(SideEffect::Block) => {
                    self.stats.record_block();
                    verdict.decision = Decision::Block;
                    verdict.rule_id = Some(rule.id.clone());
                    return verdict;
                }
                Some(SideEffect::Redirect { url }) => {
                    self.stats.record_redirect();
                    verdict.decision = Decision::Redirect { url };
                    verdict.rule_id = Some(rule.id.clone());
                    return verdict;
                }
                Some(SideEffect::Delay(intent)) if intent.millis > 0 => {
                    log::debug!("rule {}: delay of {}ms requested but not enforced", rule.id, intent.millis);
                    verdict.delay.get_or_insert(intent);
                }
                _ => {}
            }
        }

        verdict
    }

    /// Body substitution for `url`, from the first active matching
    /// modify-response rule. When the lookup comes from a browsing context,
    /// a notification naming the rule is queued for it.
    pub fn on_response_lookup(&self, url: &str, context_id: Option<ContextId>) -> Option<ResponseOverride> {
        let table = self.table();
        let eval = table.evaluator();
        let ctx = RequestContext::new(url);

        let rule = table
            .active_of(RESPONSE_RULES)
            .find(|r| eval.matches(&ctx, &r.conditions))?;
        let body = actions::response_body(&rule.actions)?;

        if let Some(context_id) = context_id {
            self.notifications
                .notify(context_id, format!("Rule \"{}\" applied.", rule.name));
        }

        Some(ResponseOverride {
            rule_id: rule.id.clone(),
            body: body.to_string(),
            content_type: RESPONSE_CONTENT_TYPE,
        })
    }

    /// Scripts to inject and query rewrites for a loaded document.
    pub fn on_page_load(&self, url: &str) -> PageEffects {
        let table = self.table();
        let eval = table.evaluator();
        let ctx = RequestContext::new(url);

        let mut state = WorkingState {
            headers: Vec::new(),
            location: Some(url.to_string()),
        };
        let mut effects = PageEffects::default();
        let mut rewritten = false;

        for rule in table.active_of(PAGE_RULES) {
            if !eval.matches(&ctx, &rule.conditions) {
                continue;
            }
            let applied = actions::apply(rule.rule_type, &rule.actions, &mut state);
            rewritten |= applied.touched;
            if let Some(SideEffect::InjectScript { source }) = applied.effect {
                effects.scripts.push(source);
            }
        }

        if rewritten {
            effects.location = state.location;
        }
        effects
    }

    /// A context started loading `url`. While any modify-response rule is
    /// active, web documents need the response-inspection hook.
    pub fn on_context_navigated(&self, context_id: ContextId, url: &str) -> Option<HookSignal> {
        let table = self.table();
        (is_web_url(url) && table.active_count_of(RuleType::ModifyResponse) > 0)
            .then_some(HookSignal::InstallIn { context_id })
    }

    /// Count a block or redirect enforced by the host's compiled table.
    pub fn report_declarative(&self, kind: DeclarativeKind) {
        self.stats.record(kind);
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    pub fn add(&self, rule: Rule) -> Result<Mutation, EngineError> {
        self.publish(|t| t.with_added(rule)).map(|(prev, next)| count_transition(&prev, &next))
    }

    pub fn replace(&self, rule: Rule) -> Result<Mutation, EngineError> {
        self.publish(|t| t.with_replaced(rule)).map(|(prev, next)| count_transition(&prev, &next))
    }

    pub fn remove(&self, id: &str) -> Result<Mutation, EngineError> {
        self.publish(|t| t.with_removed(id)).map(|(prev, next)| count_transition(&prev, &next))
    }

    /// Replace the whole rule set, as on import.
    pub fn replace_all(&self, rules: Vec<Rule>) -> Result<Mutation, EngineError> {
        self.publish(|t| t.with_rules(rules)).map(|(prev, next)| count_transition(&prev, &next))
    }

    /// Flip a rule between active and inactive. For modify-response rules,
    /// the other rules decide whether this was the first activation or the
    /// last deactivation.
    pub fn toggle(&self, id: &str) -> Result<Toggled, EngineError> {
        let (_, next) = self.publish(|t| t.with_toggled(id))?;
        let rule = next
            .get(id)
            .ok_or_else(|| ValidationError::UnknownRule(id.to_string()))?;

        let hook = if rule.rule_type == RuleType::ModifyResponse {
            let is_active = rule.is_active();
            let others_active = next
                .active_of(RESPONSE_RULES)
                .any(|r| r.id != rule.id);
            match (is_active, others_active) {
                (true, false) => Some(HookSignal::InstallAll),
                (false, false) => Some(HookSignal::TeardownAll),
                _ => None,
            }
        } else {
            None
        };

        Ok(Toggled {
            status: rule.status,
            hook,
        })
    }

    /// Move block/redirect enforcement to the synchronous path after the
    /// host failed to install the compiled table. Returns false if the
    /// table was already routed synchronously.
    pub fn fall_back_to_synchronous(&self) -> bool {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.route_synchronously(self.table())
    }

    /// Like [`fall_back_to_synchronous`](Self::fall_back_to_synchronous),
    /// but only while `failed` is still the published table. A table
    /// published since then has not been tried declaratively yet and keeps
    /// its routing.
    pub fn fall_back_from(&self, failed: &Arc<RuleTable>) -> bool {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let current = self.table();
        if !Arc::ptr_eq(&current, failed) {
            log::debug!("install failed for a superseded table, keeping routing");
            return false;
        }
        self.route_synchronously(current)
    }

    fn route_synchronously(&self, current: Arc<RuleTable>) -> bool {
        if current.routing() == Routing::Synchronous {
            return false;
        }
        log::warn!("declarative table unavailable, enforcing block/redirect rules synchronously");
        self.table.send_replace(Arc::new(current.with_routing(Routing::Synchronous)));
        true
    }

    fn publish<F>(&self, build: F) -> Result<(Arc<RuleTable>, Arc<RuleTable>), EngineError>
    where
        F: FnOnce(&RuleTable) -> Result<RuleTable, ValidationError>,
    {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let prev = self.table();
        let next = Arc::new(build(&prev)?);

        self.stats.set_rule_counts(next.len(), next.active_count());
        self.table.send_replace(Arc::clone(&next));
        log::debug!("published rule table: {} rules, {} active", next.len(), next.active_count());

        Ok((prev, next))
    }
}

fn count_transition(prev: &RuleTable, next: &RuleTable) -> Mutation {
    let before = prev.active_count_of(RuleType::ModifyResponse);
    let after = next.active_count_of(RuleType::ModifyResponse);
    let hook = match (before, after) {
        (0, n) if n > 0 => Some(HookSignal::InstallAll),
        (n, 0) if n > 0 => Some(HookSignal::TeardownAll),
        _ => None,
    };
    Mutation { hook }
}
