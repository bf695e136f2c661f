//! Page-side scripts evaluated through `Runtime.evaluate`.
//!
//! The snapshot script leaves a registry on `globalThis.__crmAutoRefresh` holding the elements
//! and component instances of the latest snapshot, keyed by index/uid. Later scripts address
//! targets through that registry and refuse handles whose sequence number is not current.

use serde_json::json;

use crate::model::ActionTarget;

const UNWRAP_REF: &str =
    "const unwrap = (v) => (v && typeof v === 'object' && v.__v_isRef) ? v.value : v;";

// A collection is exposed either directly or wrapped one level in `.value`.
const COLLECTION: &str = "const collection = (v) => { \
if (!v || typeof v !== 'object') return null; \
const inner = v.value; \
if (inner && typeof inner === 'object' && (typeof inner.reload === 'function' || 'loading' in inner)) return inner; \
return (typeof v.reload === 'function' || 'loading' in v) ? v : null; };";

// Live disabled/busy/visible reading; busy follows `DocumentSnapshot::is_busy`.
const ELEMENT_STATE: &str = "const elementState = (el) => { \
const rect = el.getBoundingClientRect(); \
const cls = (n) => (n.getAttribute && n.getAttribute('class')) || ''; \
const busy = el.getAttribute('aria-busy') === 'true' || el.classList.contains('loading') \
|| Array.from(el.querySelectorAll('*')).some((d) => /spinner|loading/.test(cls(d))); \
return { present: true, \
disabled: el.disabled === true || el.getAttribute('aria-disabled') === 'true', \
busy, visible: rect.width > 0 && rect.height > 0 }; };";

/// Knobs baked into the snapshot script.
#[derive(Clone, Debug)]
pub struct SnapshotScript<'a> {
    pub seq: u64,
    pub app_selector: &'a str,
    pub attributes: &'a [String],
    pub max_nodes: usize,
}

impl SnapshotScript<'_> {
    pub fn render(&self) -> String {
        let opts = json!({
            "seq": self.seq,
            "appSelector": self.app_selector,
            "attributes": self.attributes,
            "maxNodes": self.max_nodes,
        });
        format!(
            r#"(() => {{
  const opts = {opts};
  {UNWRAP_REF}
  {COLLECTION}
  const state = {{ seq: opts.seq, nodes: [], comps: new Map() }};
  globalThis.__crmAutoRefresh = state;
  const out = {{ path: location.pathname, truncated: false, nodes: [], components: [], app: null, error: null }};
  const seen = new Set();
  const record = (inst) => {{
    let guard = 0;
    while (inst && typeof inst.uid === 'number' && !seen.has(inst.uid) && guard++ < 10000) {{
      seen.add(inst.uid);
      state.comps.set(inst.uid, inst);
      const type = inst.type || {{}};
      const collections = {{}};
      try {{
        const setup = inst.setupState || {{}};
        for (const key of Object.keys(setup)) {{
          const c = collection(setup[key]);
          if (c) {{
            collections[key] = {{ loading: unwrap(c.loading) === true, reload: typeof c.reload === 'function' }};
          }}
        }}
      }} catch (e) {{ out.error = String(e); }}
      const parent = inst.parent && typeof inst.parent.uid === 'number' ? inst.parent.uid : null;
      out.components.push({{
        uid: inst.uid,
        name: typeof type.name === 'string' ? type.name : null,
        setupName: typeof type.__name === 'string' ? type.__name : null,
        parent,
        collections,
      }});
      inst = inst.parent;
    }}
  }};
  const all = document.getElementsByTagName('*');
  const limit = Math.min(all.length, opts.maxNodes);
  out.truncated = all.length > opts.maxNodes;
  const index = new Map();
  for (let i = 0; i < limit; i++) {{
    const el = all[i];
    index.set(el, i);
    state.nodes.push(el);
    const attrs = {{}};
    for (const name of opts.attributes) {{
      const v = el.getAttribute(name);
      if (v !== null) attrs[name] = v;
    }}
    const rect = el.getBoundingClientRect();
    let component = null;
    try {{
      const inst = el.__vueParentComponent;
      if (inst && typeof inst.uid === 'number') {{ component = inst.uid; record(inst); }}
    }} catch (e) {{ out.error = String(e); }}
    const parent = el.parentElement;
    out.nodes.push({{
      tag: el.tagName,
      attrs,
      class: el.getAttribute('class') || '',
      disabled: el.disabled === true || el.getAttribute('aria-disabled') === 'true',
      w: rect.width,
      h: rect.height,
      parent: parent && index.has(parent) ? index.get(parent) : null,
      component,
    }});
  }}
  try {{
    const root = document.querySelector(opts.appSelector);
    if (root) {{
      const app = root.__vue_app__;
      const props = app && app.config ? app.config.globalProperties : null;
      const router = props ? props.$router : null;
      const current = router && router.currentRoute ? unwrap(router.currentRoute) : null;
      const inst = app ? app._instance : null;
      if (inst) record(inst);
      out.app = {{
        node: index.has(root) ? index.get(root) : null,
        router: !!router,
        route: current ? {{ name: current.name == null ? null : String(current.name), path: current.path == null ? null : String(current.path) }} : null,
        root: inst && typeof inst.uid === 'number' ? inst.uid : null,
      }};
    }}
  }} catch (e) {{ out.error = String(e); }}
  return out;
}})()"#
        )
    }
}

pub fn current_path() -> &'static str {
    "location.pathname"
}

pub fn control_state(target: &ActionTarget) -> String {
    let target = json!(target);
    format!(
        r#"(() => {{
  const t = {target};
  {UNWRAP_REF}
  {COLLECTION}
  {ELEMENT_STATE}
  const s = globalThis.__crmAutoRefresh;
  if (!s || s.seq !== t.seq) return {{ present: false, stale: true }};
  if (t.kind === 'element') {{
    const el = s.nodes[t.node];
    if (!el || !el.isConnected) return {{ present: false }};
    return elementState(el);
  }}
  const inst = s.comps.get(t.component);
  if (!inst || inst.isUnmounted) return {{ present: false }};
  const c = inst.setupState ? collection(inst.setupState[t.field]) : null;
  if (!c || typeof c.reload !== 'function') return {{ present: false }};
  return {{ present: true, disabled: false, busy: unwrap(c.loading) === true, visible: true }};
}})()"#
    )
}

/// Re-checks the target and acts on it in one page turn; a target that turned disabled or
/// busy is declined with the state that was seen.
pub fn activate(target: &ActionTarget) -> String {
    let target = json!(target);
    format!(
        r#"(() => {{
  const t = {target};
  {UNWRAP_REF}
  {COLLECTION}
  {ELEMENT_STATE}
  const s = globalThis.__crmAutoRefresh;
  if (!s || s.seq !== t.seq) return {{ ok: false, reason: 'stale', current: s ? s.seq : null }};
  const decline = (state) => ({{ ok: false, reason: state.disabled ? 'disabled' : 'busy', state }});
  if (t.kind === 'element') {{
    const el = s.nodes[t.node];
    if (!el || !el.isConnected) return {{ ok: false, reason: 'gone' }};
    const state = elementState(el);
    if (state.disabled || state.busy) return decline(state);
    el.click();
    return {{ ok: true }};
  }}
  const inst = s.comps.get(t.component);
  const c = inst && !inst.isUnmounted && inst.setupState ? collection(inst.setupState[t.field]) : null;
  if (!c || typeof c.reload !== 'function') return {{ ok: false, reason: 'gone' }};
  if (unwrap(c.loading) === true) {{
    return decline({{ present: true, disabled: false, busy: true, visible: true }});
  }}
  const r = c.reload();
  if (r && typeof r.catch === 'function') r.catch(() => {{}});
  return {{ ok: true }};
}})()"#
    )
}

pub fn readiness(app_selector: &str) -> String {
    let selector = json!(app_selector);
    format!(
        r#"(() => {{
  const root = document.querySelector({selector});
  const app = root ? root.__vue_app__ : null;
  const props = app && app.config ? app.config.globalProperties : null;
  return {{ app_mounted: !!(app && app._instance), router_present: !!(props && props.$router) }};
}})()"#
    )
}

pub fn current_route(app_selector: &str) -> String {
    let selector = json!(app_selector);
    format!(
        r#"(() => {{
  {UNWRAP_REF}
  const root = document.querySelector({selector});
  const app = root ? root.__vue_app__ : null;
  const router = app && app.config ? app.config.globalProperties.$router : null;
  const current = router && router.currentRoute ? unwrap(router.currentRoute) : null;
  if (!current) return null;
  return {{ name: current.name == null ? null : String(current.name), path: current.path == null ? null : String(current.path) }};
}})()"#
    )
}

const SEND: &str =
    "const send = (msg) => { try { window[binding](JSON.stringify(msg)); } catch (e) {} };";

/// Installs popstate/beforeunload listeners that report through `binding`. Needs no router,
/// so it works while the app is still booting. Re-running it is a no-op.
pub fn history_hook(binding: &str) -> String {
    let binding = json!(binding);
    format!(
        r#"(() => {{
  const binding = {binding};
  if (window.__crmAutoRefreshHistoryHook === binding) return true;
  window.__crmAutoRefreshHistoryHook = binding;
  {SEND}
  window.addEventListener('popstate', () => send({{ kind: 'history', path: location.pathname }}));
  window.addEventListener('beforeunload', () => send({{ kind: 'teardown' }}));
  return true;
}})()"#
    )
}

/// Installs a router `afterEach` listener that reports through `binding`.
/// Returns `false` when the router is not reachable. Re-running it is a no-op.
pub fn navigation_hook(app_selector: &str, binding: &str) -> String {
    let selector = json!(app_selector);
    let binding = json!(binding);
    format!(
        r#"(() => {{
  const binding = {binding};
  const root = document.querySelector({selector});
  const app = root ? root.__vue_app__ : null;
  const router = app && app.config ? app.config.globalProperties.$router : null;
  if (!router || typeof router.afterEach !== 'function') return false;
  if (window.__crmAutoRefreshHook === binding) return true;
  window.__crmAutoRefreshHook = binding;
  {SEND}
  router.afterEach((to) => send({{ kind: 'route', name: to.name == null ? null : String(to.name), path: to.path }}));
  return true;
}})()"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::ComponentUid;
    use crate::model::{ElementHandle, NodeId, ReloadHandle};

    #[test]
    fn snapshot_script_embeds_options_as_json() {
        let attrs = vec!["title".to_string(), "data-x\"y".to_string()];
        let script = SnapshotScript {
            seq: 42,
            app_selector: "#app",
            attributes: &attrs,
            max_nodes: 500,
        }
        .render();
        assert!(script.contains(r#""seq":42"#));
        assert!(script.contains(r#""maxNodes":500"#));
        assert!(script.contains(r#""data-x\"y""#));
        assert!(script.starts_with("(() => {"));
        assert!(script.ends_with("})()"));
    }

    #[test]
    fn target_scripts_carry_the_handle() {
        let element = ActionTarget::Element(ElementHandle {
            seq: 7,
            node: NodeId(12),
        });
        let script = activate(&element);
        assert!(script.contains(r#""kind":"element""#));
        assert!(script.contains(r#""node":12"#));

        let reload = ActionTarget::Reload(ReloadHandle {
            seq: 7,
            component: ComponentUid(3),
            field: "leads".into(),
        });
        let script = control_state(&reload);
        assert!(script.contains(r#""kind":"reload""#));
        assert!(script.contains(r#""component":3"#));
        assert!(script.contains(r#""field":"leads""#));
    }

    #[test]
    fn activation_rechecks_state_before_acting() {
        let element = activate(&ActionTarget::Element(ElementHandle {
            seq: 2,
            node: NodeId(5),
        }));
        let check = element.find("if (state.disabled || state.busy) return decline(state);");
        let click = element.find("el.click();");
        assert!(element.contains("const elementState = (el) =>"));
        assert!(check.is_some() && click.is_some() && check < click);

        let reload = activate(&ActionTarget::Reload(ReloadHandle {
            seq: 2,
            component: ComponentUid(4),
            field: "leads".into(),
        }));
        let check = reload.find("if (unwrap(c.loading) === true)");
        let call = reload.find("const r = c.reload();");
        assert!(reload.contains("const unwrap = (v) =>"));
        assert!(check.is_some() && call.is_some() && check < call);
    }

    #[test]
    fn hook_script_quotes_binding_and_selector() {
        let script = navigation_hook("#app", "__crmAutoRefreshSignal");
        assert!(script.contains(r#"const binding = "__crmAutoRefreshSignal";"#));
        assert!(script.contains(r##"document.querySelector("#app")"##));
        assert!(script.contains("router.afterEach"));
        assert!(!script.contains("popstate"));
    }

    #[test]
    fn history_hook_does_not_need_the_router() {
        let script = history_hook("__crmAutoRefreshSignal");
        assert!(script.contains(r#"const binding = "__crmAutoRefreshSignal";"#));
        assert!(script.contains("'popstate'"));
        assert!(script.contains("'beforeunload'"));
        assert!(!script.contains("$router"));
        assert!(!script.contains("return false"));
    }
}
