//! Import and export of rule sets
//!
//! The exchange format is a pretty-printed JSON array of rules, in the same
//! shape the rules are stored in.

use serde_json::Value;

use crate::error::ImportError;
use crate::table::validate_all;
use crate::types::Rule;

/// Serialize rules for export.
pub fn export_rules(rules: &[Rule]) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(rules)
}

/// Parse and validate an exported rule set. Anything other than a JSON array
/// is rejected before individual rules are looked at, and a set with
/// duplicate ids or mismatched actions is rejected as a whole.
pub fn import_rules(text: &str) -> Result<Vec<Rule>, ImportError> {
    let value: Value = serde_json::from_str(text)?;
    if !value.is_array() {
        return Err(ImportError::NotAnArray);
    }

    let rules: Vec<Rule> = serde_json::from_value(value)?;
    validate_all(&rules)?;

    log::info!("imported {} rules", rules.len());
    Ok(rules)
}
