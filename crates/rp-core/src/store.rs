//! Durable storage boundary
//!
//! The engine never performs I/O itself. Callers hand a [`RuleStore`] to
//! [`crate::RuleEngine::persist_to`] after a mutation, or load a
//! [`StoredState`] before constructing the engine.

use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::stats::Stats;
use crate::types::Rule;

/// Everything that survives a restart.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredState {
    #[serde(default)]
    pub rules: Vec<Rule>,
    #[serde(default)]
    pub stats: Stats,
}

pub trait RuleStore {
    /// Load the saved state, or the empty state if nothing was saved yet.
    fn load(&self) -> Result<StoredState, StoreError>;

    fn save(&self, state: &StoredState) -> Result<(), StoreError>;
}
