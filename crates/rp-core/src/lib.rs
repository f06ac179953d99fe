//! RequestPro Core Library
//!
//! This crate provides the rule engine behind RequestPro: user-authored
//! rules matched against intercepted traffic and applied to headers,
//! requests, responses and pages.
//!
//! # Architecture
//!
//! Rules live in an immutable [`RuleTable`]. Every mutation builds a new
//! table and publishes it whole through a watch channel; interception hooks
//! clone the current `Arc` once and evaluate against that snapshot. Block and
//! redirect rules are normally compiled into the host's declarative table by
//! `rp-compiler`, and only fall back to synchronous evaluation when that
//! install fails.
//!
//! # Modules
//!
//! - `types`: Rule model and traffic-facing result types
//! - `url`: Host/path extraction and query rewriting
//! - `condition`: Condition evaluation with a per-table regex cache
//! - `actions`: Application of a rule's actions to working state
//! - `table`: Copy-on-write rule table snapshots
//! - `engine`: Interception hooks and mutations
//! - `stats`: Atomic counters
//! - `notify`: Bounded user notification queue
//! - `io`: JSON import/export
//! - `store`: Persistence boundary

pub mod actions;
pub mod condition;
pub mod engine;
pub mod error;
pub mod io;
pub mod notify;
pub mod stats;
pub mod store;
pub mod table;
pub mod types;
pub mod url;

// Re-export commonly used types
pub use engine::{EngineConfig, Mutation, RuleEngine, Toggled};
pub use error::{EngineError, ImportError, StoreError, ValidationError};
pub use notify::{Notification, NotificationReceiver};
pub use stats::Stats;
pub use store::{RuleStore, StoredState};
pub use table::{Routing, RuleTable};
pub use types::{
    Action, ActionKind, Condition, ConditionTarget, ContextId, Decision, DeclarativeKind, Header, HeaderPatch,
    HookSignal, Operator, PageEffects, RequestVerdict, ResponseOverride, Rule, RuleStatus, RuleType,
};
