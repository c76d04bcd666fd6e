//! Host-platform API mock.
//!
//! A [`MockSpec`] describes the `chrome.*` surface an extension page expects:
//! a table from dotted namespace path to [`Stub`], plus per-area storage
//! snapshots. [`MockSpec::init_script`] renders it into a standalone script and
//! [`MockSpec::install`] registers that script with
//! `Page.addScriptToEvaluateOnNewDocument`, so the mock exists before the first
//! page script runs.

use std::collections::BTreeMap;

use chromiumoxide::cdp::browser_protocol::page::AddScriptToEvaluateOnNewDocumentParams;
use chromiumoxide::Page;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{HarnessError, Result};

/// Global the page scripts read the mock state from.
pub const MOCK_STATE_GLOBAL: &str = "__hostApiMock";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageArea {
    Sync,
    Local,
    Session,
}

impl StorageArea {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sync => "sync",
            Self::Local => "local",
            Self::Session => "session",
        }
    }
}

/// Key/value snapshot served by one storage area.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredState {
    #[serde(default)]
    pub items: Map<String, Value>,
    /// Reply for a requested key that is absent and has no caller default.
    #[serde(default = "default_missing")]
    pub missing: Value,
}

fn default_missing() -> Value {
    Value::Bool(false)
}

impl Default for StoredState {
    fn default() -> Self {
        Self {
            items: Map::new(),
            missing: default_missing(),
        }
    }
}

impl StoredState {
    pub fn new(items: Map<String, Value>) -> Self {
        Self {
            items,
            ..Self::default()
        }
    }
}

/// One mocked member of the host API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Stub {
    /// Plain data field, e.g. `runtime.id`.
    Field { value: Value },
    /// Synchronous function returning a copy of `value`.
    Returns { value: Value },
    /// Completes through the trailing callback argument, synchronously.
    /// Without a callback the call returns a resolved promise instead.
    /// An absent `value` calls back with no argument.
    Callback {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<Value>,
    },
    /// Returns its first argument unchanged (`runtime.getURL`).
    Identity,
    /// Listener registration. Listeners are kept but never invoked.
    Listener,
    StorageGet { area: StorageArea },
    StorageSet { area: StorageArea },
    StorageRemove { area: StorageArea },
}

impl Stub {
    pub fn field(value: Value) -> Self {
        Self::Field { value }
    }

    pub fn returns(value: Value) -> Self {
        Self::Returns { value }
    }

    pub fn callback(value: Value) -> Self {
        Self::Callback { value: Some(value) }
    }

    pub fn callback_empty() -> Self {
        Self::Callback { value: None }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MockSpec {
    #[serde(default = "default_global")]
    pub global: String,
    #[serde(default)]
    pub stubs: BTreeMap<String, Stub>,
    #[serde(default)]
    pub storage: BTreeMap<StorageArea, StoredState>,
}

fn default_global() -> String {
    "chrome".to_string()
}

impl Default for MockSpec {
    fn default() -> Self {
        Self::extension("1.0")
    }
}

impl MockSpec {
    /// An empty mock: the global exists but exposes nothing.
    pub fn empty() -> Self {
        Self {
            global: default_global(),
            stubs: BTreeMap::new(),
            storage: BTreeMap::new(),
        }
    }

    /// The surface a Manifest V3 extension page touches: storage, runtime
    /// metadata and messaging, and tab queries.
    pub fn extension(version: &str) -> Self {
        let mut spec = Self::empty();
        for area in [StorageArea::Sync, StorageArea::Local] {
            let prefix = format!("storage.{}", area.as_str());
            spec.stubs
                .insert(format!("{prefix}.get"), Stub::StorageGet { area });
            spec.stubs
                .insert(format!("{prefix}.set"), Stub::StorageSet { area });
            spec.stubs
                .insert(format!("{prefix}.remove"), Stub::StorageRemove { area });
            spec.stubs
                .insert(format!("{prefix}.clear"), Stub::callback_empty());
            spec.storage.insert(area, StoredState::default());
        }
        for path in [
            "storage.onChanged.addListener",
            "storage.onChanged.removeListener",
            "runtime.onMessage.addListener",
            "runtime.onMessage.removeListener",
        ] {
            spec.stubs.insert(path.to_string(), Stub::Listener);
        }
        spec.stubs.insert(
            "storage.onChanged.hasListener".to_string(),
            Stub::returns(Value::Bool(false)),
        );
        spec.stubs.insert(
            "runtime.id".to_string(),
            Stub::field(Value::String("mock-id".to_string())),
        );
        spec.stubs
            .insert("runtime.lastError".to_string(), Stub::field(Value::Null));
        spec.stubs.insert(
            "runtime.getManifest".to_string(),
            Stub::returns(serde_json::json!({
                "name": "Mock Extension",
                "version": version,
                "manifest_version": 3
            })),
        );
        spec.stubs
            .insert("runtime.getURL".to_string(), Stub::Identity);
        spec.stubs
            .insert("runtime.sendMessage".to_string(), Stub::callback_empty());
        spec.stubs.insert(
            "tabs.query".to_string(),
            Stub::callback(Value::Array(Vec::new())),
        );
        spec.stubs
            .insert("tabs.sendMessage".to_string(), Stub::callback_empty());
        spec
    }

    pub fn with_global(mut self, global: impl Into<String>) -> Self {
        self.global = global.into();
        self
    }

    /// Replace the snapshot of `area`, keeping its missing-key default.
    pub fn with_storage(mut self, area: StorageArea, items: Map<String, Value>) -> Self {
        self.storage.entry(area).or_default().items = items;
        self
    }

    pub fn with_missing_default(mut self, area: StorageArea, missing: Value) -> Self {
        self.storage.entry(area).or_default().missing = missing;
        self
    }

    pub fn with_stub(mut self, path: impl Into<String>, stub: Stub) -> Self {
        self.stubs.insert(path.into(), stub);
        self
    }

    /// Drop a stub, and every stub below it when `path` names a namespace.
    pub fn without(mut self, path: &str) -> Self {
        let namespace = format!("{path}.");
        self.stubs
            .retain(|key, _| key != path && !key.starts_with(&namespace));
        self
    }

    /// Check that the stub table describes a well-formed object graph.
    pub fn validate(&self) -> Result<()> {
        if !is_identifier(&self.global) {
            return Err(HarnessError::InvalidScenario(format!(
                "mock global '{}' is not a valid identifier",
                self.global
            )));
        }
        for path in self.stubs.keys() {
            if path.split('.').any(|segment| !is_identifier(segment)) {
                return Err(HarnessError::InvalidScenario(format!(
                    "mock path '{path}' must be dot-separated identifiers"
                )));
            }
        }
        for path in self.stubs.keys() {
            let namespace = format!("{path}.");
            if let Some((nested, _)) = self.stubs.range(namespace.clone()..).next() {
                if nested.starts_with(&namespace) {
                    return Err(HarnessError::InvalidScenario(format!(
                        "mock path '{path}' is both a member and the namespace of '{nested}'"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Render the standalone script that builds the mock inside a page.
    pub fn init_script(&self) -> Result<String> {
        self.validate()?;
        let spec_json = serde_json::to_string(self)?;
        Ok(MOCK_RUNTIME_JS
            .replace("__MOCK_STATE_GLOBAL__", MOCK_STATE_GLOBAL)
            .replace("__HOST_API_SPEC__", &spec_json))
    }

    /// Register the mock to run before any script of every document the tab
    /// loads from now on.
    pub async fn install(&self, page: &Page) -> Result<()> {
        let script = self.init_script()?;
        page.evaluate_on_new_document(AddScriptToEvaluateOnNewDocumentParams::new(script))
            .await
            .map_err(|e| HarnessError::browser("installing host API mock", e))?;
        log::debug!(
            "installed {} mock with {} stubs",
            self.global,
            self.stubs.len()
        );
        Ok(())
    }
}

fn is_identifier(segment: &str) -> bool {
    let mut chars = segment.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '$' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

/// Expression returning the host API paths the page read but the mock lacks,
/// as a JSON array string.
pub fn gaps_expression() -> String {
    format!("JSON.stringify((window.{MOCK_STATE_GLOBAL} && window.{MOCK_STATE_GLOBAL}.gaps) || [])")
}

/// Expression returning the recorded mock calls as a JSON array string.
pub fn calls_expression() -> String {
    format!("JSON.stringify((window.{MOCK_STATE_GLOBAL} && window.{MOCK_STATE_GLOBAL}.calls) || [])")
}

const MOCK_RUNTIME_JS: &str = r#"(() => {
  const SPEC = __HOST_API_SPEC__;
  // `quiet` is set while the harness checks paths so those reads are not taken as gaps.
  const state = { calls: [], gaps: [], listeners: {}, quiet: false };
  Object.defineProperty(window, '__MOCK_STATE_GLOBAL__', {
    value: state,
    enumerable: false,
    configurable: true
  });

  const clone = (value) => value === undefined ? undefined : JSON.parse(JSON.stringify(value));
  const plain = (value) => {
    try {
      return clone(value);
    } catch (err) {
      return String(value);
    }
  };
  const record = (api, args) => {
    state.calls.push({
      api: SPEC.global + '.' + api,
      args: args.filter((arg) => typeof arg !== 'function').map(plain)
    });
  };
  const trailingCallback = (args) => {
    for (let i = args.length - 1; i >= 0; i--) {
      if (typeof args[i] === 'function') return args[i];
    }
    return null;
  };
  const complete = (args, value) => {
    const callback = trailingCallback(args);
    if (callback) {
      if (value === undefined) callback(); else callback(value);
      return undefined;
    }
    return Promise.resolve(value);
  };
  const has = (obj, key) => Object.prototype.hasOwnProperty.call(obj, key);

  const storageGet = (area, keys) => {
    const snapshot = SPEC.storage[area] || { items: {}, missing: false };
    const items = snapshot.items || {};
    const pick = (key, fallback) => has(items, key) ? clone(items[key]) : clone(fallback);
    if (keys === null || keys === undefined) return clone(items);
    if (typeof keys === 'string') return { [keys]: pick(keys, snapshot.missing) };
    const out = {};
    if (Array.isArray(keys)) {
      keys.forEach((key) => { out[key] = pick(key, snapshot.missing); });
    } else if (typeof keys === 'object') {
      Object.keys(keys).forEach((key) => {
        out[key] = pick(key, keys[key] === undefined ? snapshot.missing : keys[key]);
      });
    }
    return out;
  };

  const member = (path, stub) => {
    switch (stub.kind) {
      case 'field':
        return clone(stub.value);
      case 'returns':
        return (...args) => { record(path, args); return clone(stub.value); };
      case 'callback':
        return (...args) => { record(path, args); return complete(args, clone(stub.value)); };
      case 'identity':
        return (...args) => { record(path, args); return args[0]; };
      case 'listener':
        return (...args) => {
          record(path, args);
          (state.listeners[path] = state.listeners[path] || []).push(args[0]);
        };
      case 'storage_get':
        return (...args) => {
          record(path, args);
          const keys = typeof args[0] === 'function' ? null : args[0];
          return complete(args, storageGet(stub.area, keys));
        };
      case 'storage_set':
      case 'storage_remove':
        return (...args) => { record(path, args); return complete(args, undefined); };
      default:
        throw new Error('unknown host API stub kind: ' + stub.kind);
    }
  };

  const namespaces = new Set();
  const rootObject = {};
  namespaces.add(rootObject);
  Object.keys(SPEC.stubs).sort().forEach((path) => {
    const segments = path.split('.');
    let node = rootObject;
    segments.slice(0, -1).forEach((segment) => {
      if (!has(node, segment)) {
        node[segment] = {};
        namespaces.add(node[segment]);
      }
      node = node[segment];
    });
    node[segments[segments.length - 1]] = member(path, SPEC.stubs[path]);
  });

  const PASSTHROUGH = new Set(['then', 'toJSON', 'constructor', 'valueOf', 'toString']);
  const guard = (target, prefix) => {
    Object.keys(target).forEach((key) => {
      if (namespaces.has(target[key])) target[key] = guard(target[key], prefix + '.' + key);
    });
    return new Proxy(target, {
      get(obj, prop, receiver) {
        if (typeof prop === 'symbol' || prop in obj || PASSTHROUGH.has(prop)) {
          return Reflect.get(obj, prop, receiver);
        }
        if (state.quiet) return undefined;
        const api = prefix + '.' + prop;
        if (!state.gaps.includes(api)) state.gaps.push(api);
        if (typeof console !== 'undefined') {
          console.error('[host-api-mock] unmocked host API: ' + api);
        }
        return undefined;
      }
    });
  };

  // Replaces the browser's own `window.chrome` outright.
  Object.defineProperty(window, SPEC.global, {
    value: guard(rootObject, SPEC.global),
    writable: true,
    enumerable: true,
    configurable: true
  });
})();
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    /// Run the rendered mock in an embedded engine and return `expression`,
    /// which must evaluate to a string.
    fn eval_with_mock(spec: &MockSpec, expression: &str) -> String {
        let script = spec
            .init_script()
            .unwrap_or_else(|err| panic!("failed to render mock: {err}"));
        let runtime =
            rquickjs::Runtime::new().unwrap_or_else(|err| panic!("failed to create runtime: {err}"));
        let context = rquickjs::Context::full(&runtime)
            .unwrap_or_else(|err| panic!("failed to create context: {err}"));
        context.with(|ctx| {
            ctx.eval::<(), _>("globalThis.window = globalThis;")
                .unwrap_or_else(|err| panic!("failed to define window: {err}"));
            ctx.eval::<(), _>(script.as_str())
                .unwrap_or_else(|err| panic!("mock script failed: {err}"));
            ctx.eval::<String, _>(expression)
                .unwrap_or_else(|err| panic!("expression failed: {expression}: {err}"))
        })
    }

    fn eval_json(spec: &MockSpec, expression: &str) -> Value {
        let text = eval_with_mock(spec, expression);
        serde_json::from_str(&text).unwrap_or_else(|err| panic!("bad JSON {text}: {err}"))
    }

    fn settings_spec() -> MockSpec {
        MockSpec::extension("1.4").with_storage(
            StorageArea::Sync,
            object(json!({ "alwaysShowCommentsEnabled": true, "reminderDay": "Friday" })),
        )
    }

    #[test]
    fn storage_get_single_key_replies_through_callback() {
        let out = eval_json(
            &settings_spec(),
            r#"(() => {
                let reply;
                chrome.storage.sync.get('alwaysShowCommentsEnabled', (data) => { reply = data; });
                return JSON.stringify(reply);
            })()"#,
        );
        assert_eq!(out, json!({ "alwaysShowCommentsEnabled": true }));
    }

    #[test]
    fn storage_get_fills_absent_keys_with_missing_default() {
        let out = eval_json(
            &settings_spec(),
            r#"(() => {
                let reply;
                chrome.storage.sync.get(['reminderDay', 'logoReplaceEnabled'], (data) => { reply = data; });
                return JSON.stringify(reply);
            })()"#,
        );
        assert_eq!(
            out,
            json!({ "reminderDay": "Friday", "logoReplaceEnabled": false })
        );
    }

    #[test]
    fn storage_get_merges_caller_defaults() {
        let out = eval_json(
            &settings_spec(),
            r#"(() => {
                let reply;
                chrome.storage.sync.get({ reminderDay: 'Monday', reminderTime: '14:30' }, (data) => { reply = data; });
                return JSON.stringify(reply);
            })()"#,
        );
        assert_eq!(
            out,
            json!({ "reminderDay": "Friday", "reminderTime": "14:30" })
        );
    }

    #[test]
    fn storage_get_without_keys_returns_whole_snapshot() {
        let out = eval_json(
            &settings_spec(),
            r#"(() => {
                let reply;
                chrome.storage.sync.get((data) => { reply = data; });
                return JSON.stringify(reply);
            })()"#,
        );
        assert_eq!(
            out,
            json!({ "alwaysShowCommentsEnabled": true, "reminderDay": "Friday" })
        );
    }

    #[test]
    fn missing_default_is_configurable_per_area() {
        let spec = MockSpec::extension("1.4").with_missing_default(StorageArea::Local, json!({}));
        let out = eval_json(
            &spec,
            r#"(() => {
                let reply;
                chrome.storage.local.get('prismaUserStats', (data) => { reply = data; });
                return JSON.stringify(reply);
            })()"#,
        );
        assert_eq!(out, json!({ "prismaUserStats": {} }));
    }

    #[test]
    fn snapshot_is_not_mutated_by_page_reads() {
        let spec = MockSpec::extension("1.4").with_storage(
            StorageArea::Local,
            object(json!({ "prismaUserStats": { "visitedCampaigns": ["1", "2", "3"] } })),
        );
        let out = eval_json(
            &spec,
            r#"(() => {
                let first;
                chrome.storage.local.get('prismaUserStats', (data) => { first = data; });
                first.prismaUserStats.visitedCampaigns.push('4');
                chrome.storage.local.set({ prismaUserStats: {} });
                let second;
                chrome.storage.local.get('prismaUserStats', (data) => { second = data; });
                return JSON.stringify(second.prismaUserStats.visitedCampaigns);
            })()"#,
        );
        assert_eq!(out, json!(["1", "2", "3"]));
    }

    #[test]
    fn storage_set_invokes_optional_callback_with_no_error() {
        let out = eval_with_mock(
            &settings_spec(),
            r#"(() => {
                let calledWith = 'not called';
                chrome.storage.sync.set({ a: 1 }, (...args) => { calledWith = args.length; });
                const noCallback = chrome.storage.sync.set({ a: 2 });
                return String(calledWith) + ':' + String(chrome.runtime.lastError) + ':' + (noCallback instanceof Promise);
            })()"#,
        );
        assert_eq!(out, "0:null:true");
    }

    #[test]
    fn runtime_accessors_return_fixed_values() {
        let out = eval_json(
            &MockSpec::extension("1.4"),
            r#"JSON.stringify({
                version: chrome.runtime.getManifest().version,
                url: chrome.runtime.getURL('images/logo.png'),
                id: chrome.runtime.id
            })"#,
        );
        assert_eq!(
            out,
            json!({ "version": "1.4", "url": "images/logo.png", "id": "mock-id" })
        );
    }

    #[test]
    fn messaging_calls_back_without_result() {
        let out = eval_with_mock(
            &MockSpec::extension("1.4"),
            r#"(() => {
                let result = 'pending';
                chrome.runtime.sendMessage({ action: 'ping' }, (...args) => { result = 'args=' + args.length; });
                let tabs;
                chrome.tabs.query({ active: true }, (found) => { tabs = found; });
                return result + ';tabs=' + JSON.stringify(tabs);
            })()"#,
        );
        assert_eq!(out, "args=0;tabs=[]");
    }

    #[test]
    fn listeners_are_registered_but_never_fired() {
        let out = eval_with_mock(
            &MockSpec::extension("1.4"),
            r#"(() => {
                let fired = false;
                chrome.storage.onChanged.addListener(() => { fired = true; });
                chrome.storage.sync.set({ a: 1 });
                return String(fired) + ':' + __hostApiMock.listeners['storage.onChanged.addListener'].length;
            })()"#,
        );
        assert_eq!(out, "false:1");
    }

    #[test]
    fn unmocked_access_is_recorded_as_gap() {
        let out = eval_json(
            &MockSpec::extension("1.4"),
            r#"(() => {
                try { chrome.bookmarks.getTree(() => {}); } catch (err) {}
                try { chrome.storage.managed.get('x'); } catch (err) {}
                return JSON.stringify(__hostApiMock.gaps);
            })()"#,
        );
        assert_eq!(out, json!(["chrome.bookmarks", "chrome.storage.managed"]));
    }

    #[test]
    fn defined_predicate_reads_through_guard_without_gap() {
        let missing = crate::driver::Predicate::defined("chrome.alarms")
            .probe_expression()
            .unwrap_or_else(|err| panic!("probe: {err}"));
        let present = crate::driver::Predicate::defined("chrome.runtime.getManifest")
            .probe_expression()
            .unwrap_or_else(|err| panic!("probe: {err}"));
        let out = eval_json(
            &MockSpec::extension("1.4"),
            &format!(
                "JSON.stringify([{missing}, {present}, __hostApiMock.gaps, __hostApiMock.quiet])"
            ),
        );
        assert_eq!(out, json!([false, true, [], false]));
    }

    #[test]
    fn calls_are_logged_without_callbacks() {
        let spec = settings_spec();
        let out = eval_json(
            &spec,
            &format!(
                r#"(() => {{
                    chrome.storage.sync.set({{ reminderDay: 'Monday' }}, () => {{}});
                    return {};
                }})()"#,
                calls_expression()
            ),
        );
        assert_eq!(
            out,
            json!([{ "api": "chrome.storage.sync.set", "args": [{ "reminderDay": "Monday" }] }])
        );
    }

    #[test]
    fn gaps_expression_is_empty_when_page_stays_in_bounds() {
        let out = eval_json(
            &MockSpec::extension("1.4"),
            &format!("(() => {{ chrome.runtime.getManifest(); return {}; }})()", gaps_expression()),
        );
        assert_eq!(out, json!([]));
    }

    #[test]
    fn without_removes_whole_namespace() {
        let spec = MockSpec::extension("1.4").without("tabs");
        assert!(!spec.stubs.keys().any(|path| path.starts_with("tabs.")));
        assert!(spec.stubs.contains_key("runtime.getURL"));
    }

    #[test]
    fn validate_rejects_member_that_is_also_namespace() {
        let spec = MockSpec::extension("1.4").with_stub("runtime", Stub::field(json!({})));
        let err = spec
            .validate()
            .err()
            .unwrap_or_else(|| panic!("expected namespace conflict"));
        assert!(err.to_string().contains("'runtime'"), "{err}");
    }

    #[test]
    fn validate_rejects_non_identifier_segments() {
        let spec = MockSpec::extension("1.4").with_stub("storage..get", Stub::Identity);
        assert!(spec.validate().is_err());
        let spec = MockSpec::extension("1.4").with_global("not-valid");
        assert!(spec.validate().is_err());
    }

    #[test]
    fn mock_spec_reads_from_json() {
        let spec: MockSpec = serde_json::from_value(json!({
            "stubs": {
                "runtime.getURL": { "kind": "identity" },
                "tabs.query": { "kind": "callback", "value": [] }
            },
            "storage": { "local": { "items": { "statsStartDate": "2023-01-01" } } }
        }))
        .unwrap_or_else(|err| panic!("failed to parse mock spec: {err}"));
        assert_eq!(spec.global, "chrome");
        assert_eq!(spec.stubs.len(), 2);
        let local = spec
            .storage
            .get(&StorageArea::Local)
            .unwrap_or_else(|| panic!("missing local area"));
        assert_eq!(local.missing, Value::Bool(false));
    }
}
