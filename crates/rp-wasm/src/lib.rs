//! WebAssembly bindings for RequestPro
//!
//! The extension's background worker holds exactly one engine. Rule and
//! state payloads cross the boundary as plain JS objects in the persisted
//! JSON shape; header lists are arrays of `{name, value}`.

use std::sync::{Mutex, OnceLock, PoisonError};

use rp_compiler::{compile, CompilerConfig};
use rp_core::{
    io, DeclarativeKind, EngineConfig, Header, HookSignal, Notification, NotificationReceiver, Rule, RuleEngine,
    StoredState,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use wasm_bindgen::prelude::*;

struct EngineState {
    engine: RuleEngine,
    notifications: Mutex<NotificationReceiver>,
    compiler: CompilerConfig,
}

static ENGINE_STATE: OnceLock<EngineState> = OnceLock::new();

/// Create the engine from the persisted `{rules, stats}` object, or empty
/// when `stored` is null/undefined.
#[wasm_bindgen]
pub fn init(stored: JsValue) -> Result<(), JsValue> {
    if ENGINE_STATE.get().is_some() {
        return Err(JsValue::from_str("Already initialized. Reload the extension to reinitialize."));
    }

    let stored: StoredState = if stored.is_null() || stored.is_undefined() {
        StoredState::default()
    } else {
        from_js(&stored)?
    };

    let (engine, notifications) = RuleEngine::with_state(&EngineConfig::default(), stored)
        .map_err(|e| JsValue::from_str(&format!("Failed to load rules: {}", e)))?;

    ENGINE_STATE
        .set(EngineState {
            engine,
            notifications: Mutex::new(notifications),
            compiler: CompilerConfig::default(),
        })
        .map_err(|_| JsValue::from_str("Failed to set engine state"))?;

    Ok(())
}

#[wasm_bindgen]
pub fn is_initialized() -> bool {
    ENGINE_STATE.get().is_some()
}

fn state() -> Result<&'static EngineState, JsValue> {
    ENGINE_STATE
        .get()
        .ok_or_else(|| JsValue::from_str("Engine not initialized"))
}

// =============================================================================
// Traffic Hooks
// =============================================================================

/// Returns the replacement header array, or null when no rule applied.
#[wasm_bindgen]
pub fn on_before_send(url: &str, headers: JsValue) -> JsValue {
    let Some(state) = ENGINE_STATE.get() else {
        return JsValue::NULL;
    };
    let headers = read_headers(&headers);
    match state.engine.on_before_send(url, &headers) {
        Some(patch) => write_headers(&patch),
        None => JsValue::NULL,
    }
}

#[wasm_bindgen]
pub fn on_headers_received(url: &str, headers: JsValue) -> JsValue {
    let Some(state) = ENGINE_STATE.get() else {
        return JsValue::NULL;
    };
    let headers = read_headers(&headers);
    match state.engine.on_headers_received(url, &headers) {
        Some(patch) => write_headers(&patch),
        None => JsValue::NULL,
    }
}

/// Synchronous block/redirect verdict. `{decision: {type: "allow"}}` before
/// initialization.
#[wasm_bindgen]
pub fn on_before_request(url: &str) -> Result<JsValue, JsValue> {
    match ENGINE_STATE.get() {
        Some(state) => to_js(&state.engine.on_before_request(url)),
        None => to_js(&rp_core::RequestVerdict::default()),
    }
}

/// `{ruleId, body, contentType}` for a mocked response, or null.
#[wasm_bindgen]
pub fn on_response_lookup(url: &str, context_id: Option<i32>) -> Result<JsValue, JsValue> {
    let Some(state) = ENGINE_STATE.get() else {
        return Ok(JsValue::NULL);
    };
    match state.engine.on_response_lookup(url, context_id) {
        Some(hit) => to_js(&hit),
        None => Ok(JsValue::NULL),
    }
}

#[wasm_bindgen]
pub fn on_page_load(url: &str) -> Result<JsValue, JsValue> {
    to_js(&state()?.engine.on_page_load(url))
}

#[wasm_bindgen]
pub fn on_context_navigated(context_id: i32, url: &str) -> Result<JsValue, JsValue> {
    let Some(state) = ENGINE_STATE.get() else {
        return Ok(JsValue::NULL);
    };
    hook_to_js(state.engine.on_context_navigated(context_id, url))
}

/// Count a match reported by the host's declarative engine
/// (`"block"` or `"redirect"`).
#[wasm_bindgen]
pub fn report_declarative(kind: &str) -> Result<(), JsValue> {
    let kind = parse_declarative_kind(kind).map_err(|_| JsValue::from_str(&format!("Unknown verdict kind: {}", kind)))?;
    state()?.engine.report_declarative(kind);
    Ok(())
}

// =============================================================================
// Rule Table
// =============================================================================

/// Each mutation resolves to the hook signal to act on, or null.
#[wasm_bindgen]
pub fn add_rule(rule: JsValue) -> Result<JsValue, JsValue> {
    let rule: Rule = from_js(&rule)?;
    let outcome = state()?.engine.add(rule).map_err(to_js_error)?;
    hook_to_js(outcome.hook)
}

#[wasm_bindgen]
pub fn replace_rule(rule: JsValue) -> Result<JsValue, JsValue> {
    let rule: Rule = from_js(&rule)?;
    let outcome = state()?.engine.replace(rule).map_err(to_js_error)?;
    hook_to_js(outcome.hook)
}

#[wasm_bindgen]
pub fn remove_rule(id: &str) -> Result<JsValue, JsValue> {
    let outcome = state()?.engine.remove(id).map_err(to_js_error)?;
    hook_to_js(outcome.hook)
}

#[wasm_bindgen]
pub fn toggle_rule(id: &str) -> Result<JsValue, JsValue> {
    let toggled = state()?.engine.toggle(id).map_err(to_js_error)?;
    hook_to_js(toggled.hook)
}

/// Replace the whole table from exported JSON text.
#[wasm_bindgen]
pub fn import_rules(text: &str) -> Result<JsValue, JsValue> {
    let rules = io::import_rules(text).map_err(to_js_error)?;
    let outcome = state()?.engine.replace_all(rules).map_err(to_js_error)?;
    hook_to_js(outcome.hook)
}

#[wasm_bindgen]
pub fn export_rules() -> Result<String, JsValue> {
    let table = state()?.engine.table();
    io::export_rules(table.rules()).map_err(to_js_error)
}

/// Persistable `{rules, stats}` snapshot. The host writes it to storage
/// after every successful mutation.
#[wasm_bindgen]
pub fn get_state() -> Result<JsValue, JsValue> {
    to_js(&state()?.engine.state())
}

#[wasm_bindgen]
pub fn get_stats() -> Result<JsValue, JsValue> {
    to_js(&state()?.engine.stats())
}

// =============================================================================
// Declarative Table
// =============================================================================

/// Compiled table for the current rules, ready for a full replace of the
/// host's dynamic rules.
#[wasm_bindgen]
pub fn compile_declarative() -> Result<JsValue, JsValue> {
    let state = state()?;
    let table = state.engine.table();
    to_js(&compile(&table, &state.compiler))
}

/// The host could not install the compiled table. Block and redirect rules
/// move to `on_before_request` until the next mutation.
#[wasm_bindgen]
pub fn declarative_install_failed(reason: &str) -> Result<(), JsValue> {
    web_sys::console::warn_1(&JsValue::from_str(&format!("Declarative install failed: {}", reason)));
    state()?.engine.fall_back_to_synchronous();
    Ok(())
}

// =============================================================================
// Notifications
// =============================================================================

/// Pending `{contextId, message}` notifications, oldest first.
#[wasm_bindgen]
pub fn drain_notifications() -> Result<JsValue, JsValue> {
    let state = state()?;
    let mut rx = state.notifications.lock().unwrap_or_else(PoisonError::into_inner);

    let pending: Vec<Notification> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
    to_js(&pending)
}

// =============================================================================
// Conversions
// =============================================================================

fn read_headers(headers: &JsValue) -> Vec<Header> {
    let headers_array = js_sys::Array::from(headers);
    let mut out = Vec::with_capacity(headers_array.length() as usize);

    for entry in headers_array.iter() {
        let name = js_sys::Reflect::get(&entry, &"name".into())
            .ok()
            .and_then(|value| value.as_string())
            .unwrap_or_default();
        if name.is_empty() {
            continue;
        }
        let value = js_sys::Reflect::get(&entry, &"value".into())
            .ok()
            .and_then(|value| value.as_string())
            .unwrap_or_default();
        out.push(Header { name, value });
    }

    out
}

fn write_headers(headers: &[Header]) -> JsValue {
    let result = js_sys::Array::new_with_length(headers.len() as u32);
    for (i, header) in headers.iter().enumerate() {
        let item = js_sys::Object::new();
        let _ = js_sys::Reflect::set(&item, &"name".into(), &JsValue::from_str(&header.name));
        let _ = js_sys::Reflect::set(&item, &"value".into(), &JsValue::from_str(&header.value));
        result.set(i as u32, item.into());
    }
    result.into()
}

fn hook_to_js(hook: Option<HookSignal>) -> Result<JsValue, JsValue> {
    match hook {
        Some(signal) => to_js(&signal),
        None => Ok(JsValue::NULL),
    }
}

fn to_js<T: Serialize>(value: &T) -> Result<JsValue, JsValue> {
    let text = serde_json::to_string(value).map_err(to_js_error)?;
    js_sys::JSON::parse(&text)
}

fn from_js<T: DeserializeOwned>(value: &JsValue) -> Result<T, JsValue> {
    let text: String = js_sys::JSON::stringify(value)?.into();
    serde_json::from_str(&text).map_err(|e| JsValue::from_str(&format!("Invalid payload: {}", e)))
}

fn to_js_error(e: impl std::fmt::Display) -> JsValue {
    JsValue::from_str(&e.to_string())
}

fn parse_declarative_kind(kind: &str) -> Result<DeclarativeKind, serde_json::Error> {
    serde_json::from_value(serde_json::Value::String(kind.to_string()))
}


#[cfg(all(test, target_arch = "wasm32"))]
mod web_tests {
    use super::*;
    use wasm_bindgen_test::*;

    #[wasm_bindgen_test]
    fn header_patch_round_trip() {
        let rules = r#"[{
            "id": "h1", "name": "Add header", "type": "modify-headers", "status": "active",
            "conditions": [{"id": "c", "type": "host", "operator": "equals", "value": "example.com"}],
            "actions": [{"id": "a", "type": "add-header", "key": "X-Debug", "value": "1"}],
            "createdAt": "2024-01-01T00:00:00Z", "updatedAt": "2024-01-01T00:00:00Z"
        }]"#;
        let stored = js_sys::JSON::parse(&format!(r#"{{"rules": {rules}}}"#)).unwrap();
        init(stored).unwrap();
        assert!(is_initialized());

        let patch = on_before_send("https://example.com/", js_sys::Array::new().into());
        let patch = js_sys::Array::from(&patch);
        assert_eq!(patch.length(), 1);
        let name = js_sys::Reflect::get(&patch.get(0), &"name".into()).unwrap();
        assert_eq!(name.as_string().as_deref(), Some("X-Debug"));

        assert!(on_before_send("https://other.org/", js_sys::Array::new().into()).is_null());
    }
}
