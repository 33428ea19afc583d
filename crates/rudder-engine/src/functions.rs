//! Render-scoped template functions
//!
//! `include`, `tpl`, `required` and `lookup` close over a [`RenderState`]
//! created for a single render call. Nothing here is process-global: two
//! renders never share a recursion counter or a warning list.

use minijinja::{Environment, Error, ErrorKind, State, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// Default bound on nested `include`/`tpl` calls
pub const DEFAULT_MAX_INCLUDE_DEPTH: usize = 1000;

/// Names under which the standard context is exposed to templates
const CONTEXT_KEYS: [&str; 5] = ["values", "release", "chart", "capabilities", "template"];

/// Read-only access to live cluster objects for the `lookup` function
pub trait ResourceLookup: Send + Sync {
    /// Fetch one object, or a list when `name` is empty.
    /// A missing object is `Ok(Value::Null)`.
    fn lookup(
        &self,
        api_version: &str,
        kind: &str,
        namespace: &str,
        name: &str,
    ) -> std::result::Result<serde_json::Value, String>;
}

/// Per-render bookkeeping shared by the function closures
pub(crate) struct RenderState {
    depth: AtomicUsize,
    max_depth: usize,
    lint: bool,
    lookup: Option<Arc<dyn ResourceLookup>>,
    missing: Mutex<Vec<String>>,
    warnings: Mutex<Vec<String>>,
}

impl RenderState {
    pub(crate) fn new(
        max_depth: usize,
        lint: bool,
        lookup: Option<Arc<dyn ResourceLookup>>,
    ) -> Self {
        Self {
            depth: AtomicUsize::new(0),
            max_depth,
            lint,
            lookup,
            missing: Mutex::new(Vec::new()),
            warnings: Mutex::new(Vec::new()),
        }
    }

    fn enter(&self, what: &str) -> Result<DepthGuard<'_>, Error> {
        let depth = self.depth.fetch_add(1, Ordering::SeqCst) + 1;
        let guard = DepthGuard(&self.depth);
        if depth > self.max_depth {
            return Err(Error::new(
                ErrorKind::InvalidOperation,
                format!(
                    "include depth {} exceeded maximum {} while rendering {}",
                    depth, self.max_depth, what
                ),
            ));
        }
        Ok(guard)
    }

    fn warn(&self, message: String) {
        lock(&self.warnings).push(message);
    }

    /// Key of the first failed `required` assertion since the last call
    pub(crate) fn take_missing(&self) -> Option<String> {
        let mut missing = lock(&self.missing);
        let first = missing.first().cloned();
        missing.clear();
        first
    }

    pub(crate) fn take_warnings(&self) -> Vec<String> {
        std::mem::take(&mut *lock(&self.warnings))
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct DepthGuard<'a>(&'a AtomicUsize);

impl Drop for DepthGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Register the render-scoped functions on `env`
pub(crate) fn register(env: &mut Environment<'static>, state: &Arc<RenderState>) {
    let st = Arc::clone(state);
    env.add_function(
        "include",
        move |s: &State, name: String, ctx: Option<Value>| -> Result<String, Error> {
            let _guard = st.enter(&name)?;
            let template = s.env().get_template(&name)?;
            template.render(ctx.unwrap_or_else(|| current_context(s)))
        },
    );

    let st = Arc::clone(state);
    env.add_function(
        "tpl",
        move |s: &State, text: String, ctx: Option<Value>| -> Result<String, Error> {
            if !text.contains("{{") && !text.contains("{%") {
                return Ok(text);
            }
            let _guard = st.enter("tpl")?;
            s.env()
                .render_str(&text, ctx.unwrap_or_else(|| current_context(s)))
        },
    );

    let st = Arc::clone(state);
    let required = move |value: Value, key: Option<String>| -> Result<Value, Error> {
        let absent = value.is_undefined()
            || value.is_none()
            || value.as_str().map(str::is_empty).unwrap_or(false);
        if !absent {
            return Ok(value);
        }

        let key = key.unwrap_or_else(|| "<unnamed>".to_string());
        if st.lint {
            st.warn(format!("missing required value `{}`", key));
            return Ok(Value::from(""));
        }

        lock(&st.missing).push(key.clone());
        Err(Error::new(
            ErrorKind::InvalidOperation,
            format!("missing required value `{}`", key),
        ))
    };
    env.add_filter("required", required.clone());
    env.add_function("required", required);

    let st = Arc::clone(state);
    env.add_function(
        "lookup",
        move |api_version: String,
              kind: String,
              namespace: String,
              name: String|
              -> Result<Value, Error> {
            let Some(lookup) = &st.lookup else {
                return Ok(Value::from_serialize(serde_json::json!({})));
            };
            match lookup.lookup(&api_version, &kind, &namespace, &name) {
                Ok(serde_json::Value::Null) => Ok(Value::from_serialize(serde_json::json!({}))),
                Ok(found) => Ok(Value::from_serialize(found)),
                Err(e) => Err(Error::new(
                    ErrorKind::InvalidOperation,
                    format!("lookup {}/{} {}/{}: {}", api_version, kind, namespace, name, e),
                )),
            }
        },
    );

    env.add_function("fail", fail);
}

/// Abort rendering with a message
///
/// Usage: {{ fail("replicas must be positive") }}
pub fn fail(message: String) -> Result<Value, Error> {
    Err(Error::new(ErrorKind::InvalidOperation, message))
}

/// The standard context of the calling template
fn current_context(state: &State) -> Value {
    let mut ctx = serde_json::Map::new();
    for key in CONTEXT_KEYS {
        if let Some(v) = state.lookup(key)
            && !v.is_undefined()
            && let Ok(json) = serde_json::to_value(&v)
        {
            ctx.insert(key.to_string(), json);
        }
    }
    Value::from_serialize(serde_json::Value::Object(ctx))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env_with(state: &Arc<RenderState>) -> Environment<'static> {
        let mut env = Environment::new();
        register(&mut env, state);
        env
    }

    #[test]
    fn test_include_renders_named_template() {
        let state = Arc::new(RenderState::new(DEFAULT_MAX_INCLUDE_DEPTH, false, None));
        let mut env = env_with(&state);
        env.add_template("_name.tpl", "{{ values.name }}-svc").unwrap();

        let out = env
            .render_str(
                "name: {{ include('_name.tpl') }}",
                minijinja::context! { values => minijinja::context! { name => "web" } },
            )
            .unwrap();
        assert_eq!(out, "name: web-svc");
    }

    #[test]
    fn test_include_recursion_is_bounded() {
        let state = Arc::new(RenderState::new(16, false, None));
        let mut env = env_with(&state);
        env.add_template("_loop.tpl", "{{ include('_loop.tpl') }}").unwrap();

        let err = env
            .render_str("{{ include('_loop.tpl') }}", minijinja::context! {})
            .unwrap_err();
        assert!(format!("{:#}", err).contains("exceeded maximum 16"));
        // the guard unwinds fully
        assert_eq!(state.depth.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_sibling_includes_do_not_accumulate_depth() {
        let state = Arc::new(RenderState::new(2, false, None));
        let mut env = env_with(&state);
        env.add_template("_a.tpl", "a").unwrap();

        let body = "{{ include('_a.tpl') }}".repeat(10);
        assert_eq!(env.render_str(&body, minijinja::context! {}).unwrap(), "a".repeat(10));
    }

    #[test]
    fn test_required_records_missing_key() {
        let state = Arc::new(RenderState::new(DEFAULT_MAX_INCLUDE_DEPTH, false, None));
        let env = env_with(&state);

        let err = env.render_str(
            "{{ values.password | required('values.password') }}",
            minijinja::context! { values => minijinja::context! {} },
        );
        assert!(err.is_err());
        assert_eq!(state.take_missing().as_deref(), Some("values.password"));
        assert_eq!(state.take_missing(), None);
    }

    #[test]
    fn test_required_in_lint_mode_warns() {
        let state = Arc::new(RenderState::new(DEFAULT_MAX_INCLUDE_DEPTH, true, None));
        let env = env_with(&state);

        let out = env
            .render_str(
                "password: '{{ required(values.password, 'values.password') }}'",
                minijinja::context! { values => minijinja::context! {} },
            )
            .unwrap();
        assert_eq!(out, "password: ''");
        assert_eq!(state.take_warnings(), vec!["missing required value `values.password`"]);
    }

    #[test]
    fn test_lookup_disabled_returns_empty() {
        let state = Arc::new(RenderState::new(DEFAULT_MAX_INCLUDE_DEPTH, false, None));
        let env = env_with(&state);

        let out = env
            .render_str(
                "{{ lookup('v1', 'Secret', 'default', 'x') | length }}",
                minijinja::context! {},
            )
            .unwrap();
        assert_eq!(out, "0");
    }

    #[test]
    fn test_tpl_with_current_context() {
        let state = Arc::new(RenderState::new(DEFAULT_MAX_INCLUDE_DEPTH, false, None));
        let env = env_with(&state);

        let out = env
            .render_str(
                "{{ tpl(values.host) }}",
                minijinja::context! {
                    values => minijinja::context! { host => "{{ release.name }}.example.com" },
                    release => minijinja::context! { name => "web" },
                },
            )
            .unwrap();
        assert_eq!(out, "web.example.com");
    }
}
