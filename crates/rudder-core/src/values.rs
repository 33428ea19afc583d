//! Values tree with deep merge support

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::path::Path;

use crate::error::{CoreError, Result};

/// Reserved top-level key propagated unscoped into every sub-chart
pub const GLOBAL_KEY: &str = "global";

/// A tree of scalars, lists and nested tables
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Values(pub JsonValue);

impl Values {
    /// Create empty values
    pub fn new() -> Self {
        Self(JsonValue::Object(serde_json::Map::new()))
    }

    /// Load values from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content).map_err(|e| match e {
            CoreError::InvalidValues { message } => {
                CoreError::invalid_values(format!("{}: {}", path.display(), message))
            }
            other => other,
        })
    }

    /// Parse values from a YAML document
    ///
    /// An empty document yields empty values. Anything other than a mapping
    /// at the top level is rejected.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let value: JsonValue = serde_yaml::from_str(yaml)
            .map_err(|e| CoreError::invalid_values(e.to_string()))?;
        Self::from_json_value(value)
    }

    /// Wrap a JSON value, checking that it is a key/value structure
    pub fn from_json_value(value: JsonValue) -> Result<Self> {
        match value {
            JsonValue::Null => Ok(Self::new()),
            JsonValue::Object(_) => Ok(Self(value)),
            other => Err(CoreError::invalid_values(format!(
                "expected a mapping at the top level, found {}",
                kind_name(&other)
            ))),
        }
    }

    /// Deep merge another Values into this one
    ///
    /// Maps merge key-wise; scalars and lists in `overlay` replace the base.
    pub fn merge(&mut self, overlay: &Values) {
        deep_merge(&mut self.0, &overlay.0);
    }

    /// Merge layers in order, later layers winning
    pub fn merge_all<'a>(layers: impl IntoIterator<Item = &'a Values>) -> Self {
        let mut result = Values::new();
        for layer in layers {
            result.merge(layer);
        }
        result
    }

    /// Set a value by dotted path (e.g., "image.tag")
    pub fn set(&mut self, path: &str, value: JsonValue) {
        let parts: Vec<&str> = path.split('.').filter(|p| !p.is_empty()).collect();
        set_nested(&mut self.0, &parts, value);
    }

    /// Get a value by dotted path
    pub fn get(&self, path: &str) -> Option<&JsonValue> {
        let parts: Vec<&str> = path.split('.').filter(|p| !p.is_empty()).collect();
        get_nested(&self.0, &parts)
    }

    pub fn into_inner(self) -> JsonValue {
        self.0
    }

    /// Check if values are empty
    pub fn is_empty(&self) -> bool {
        match &self.0 {
            JsonValue::Object(map) => map.is_empty(),
            JsonValue::Null => true,
            _ => false,
        }
    }

    /// Truthiness of a dotted path, as used by dependency conditions
    ///
    /// Returns `None` when the path is absent so callers can fall through
    /// to the next condition.
    pub fn truthy(&self, path: &str) -> Option<bool> {
        self.get(path).map(|v| match v {
            JsonValue::Bool(b) => *b,
            JsonValue::Null => false,
            JsonValue::String(s) => !s.is_empty() && s != "false" && s != "0",
            JsonValue::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
            JsonValue::Array(a) => !a.is_empty(),
            JsonValue::Object(o) => !o.is_empty(),
        })
    }

    // =========================================================================
    // Sub-chart scoping
    // =========================================================================

    /// Scope values for a sub-chart
    ///
    /// The sub-chart only sees the sub-tree stored under its name, plus the
    /// `global` table copied as-is.
    ///
    /// # Example
    ///
    /// Parent values:
    /// ```yaml
    /// global:
    ///   imageRegistry: docker.io
    /// redis:
    ///   replicas: 3
    /// postgresql:
    ///   enabled: false
    /// ```
    ///
    /// `scope_for_subchart("redis")` produces:
    /// ```yaml
    /// global:
    ///   imageRegistry: docker.io
    /// replicas: 3
    /// ```
    pub fn scope_for_subchart(&self, subchart_name: &str) -> Values {
        let mut scoped = serde_json::Map::new();

        if let JsonValue::Object(parent_obj) = &self.0 {
            if let Some(JsonValue::Object(subchart_obj)) = parent_obj.get(subchart_name) {
                for (k, v) in subchart_obj {
                    scoped.insert(k.clone(), v.clone());
                }
            }

            // Parent globals always win over whatever the sub-tree carries
            if let Some(global) = parent_obj.get(GLOBAL_KEY) {
                let mut merged = scoped
                    .remove(GLOBAL_KEY)
                    .unwrap_or_else(|| JsonValue::Object(serde_json::Map::new()));
                deep_merge(&mut merged, global);
                scoped.insert(GLOBAL_KEY.to_string(), merged);
            }
        }

        Values(JsonValue::Object(scoped))
    }
}

fn kind_name(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "a boolean",
        JsonValue::Number(_) => "a number",
        JsonValue::String(_) => "a string",
        JsonValue::Array(_) => "a list",
        JsonValue::Object(_) => "a mapping",
    }
}

/// Deep merge two JSON values
pub(crate) fn deep_merge(base: &mut JsonValue, overlay: &JsonValue) {
    match (base, overlay) {
        (JsonValue::Object(base_map), JsonValue::Object(overlay_map)) => {
            for (key, overlay_value) in overlay_map {
                match base_map.get_mut(key) {
                    Some(base_value) => deep_merge(base_value, overlay_value),
                    None => {
                        base_map.insert(key.clone(), overlay_value.clone());
                    }
                }
            }
        }
        (base, overlay) => {
            *base = overlay.clone();
        }
    }
}

fn set_nested(value: &mut JsonValue, path: &[&str], new_value: JsonValue) {
    let Some((key, remaining)) = path.split_first() else {
        *value = new_value;
        return;
    };

    if !value.is_object() {
        *value = JsonValue::Object(serde_json::Map::new());
    }

    if let JsonValue::Object(map) = value {
        if remaining.is_empty() {
            map.insert((*key).to_string(), new_value);
        } else {
            let entry = map
                .entry((*key).to_string())
                .or_insert_with(|| JsonValue::Object(serde_json::Map::new()));
            set_nested(entry, remaining, new_value);
        }
    }
}

fn get_nested<'a>(value: &'a JsonValue, path: &[&str]) -> Option<&'a JsonValue> {
    let Some((key, remaining)) = path.split_first() else {
        return Some(value);
    };

    match value {
        JsonValue::Object(map) => map.get(*key).and_then(|v| get_nested(v, remaining)),
        _ => None,
    }
}

/// Parse `--set` arguments (`key=value` format)
///
/// Values are typed: `true`/`false`, `null`, integers, floats and JSON
/// lists/objects are recognised, everything else is a string.
pub fn parse_set_values(set_args: &[String]) -> Result<Values> {
    let mut values = Values::new();

    for arg in set_args {
        let (key, val) = arg.split_once('=').ok_or_else(|| {
            CoreError::invalid_values(format!("invalid --set format '{}', expected key=value", arg))
        })?;

        let key = key.trim();
        if key.is_empty() || key.split('.').any(str::is_empty) {
            return Err(CoreError::invalid_values(format!(
                "invalid key '{}' in --set '{}'",
                key, arg
            )));
        }

        let json_value = if val == "true" {
            JsonValue::Bool(true)
        } else if val == "false" {
            JsonValue::Bool(false)
        } else if val == "null" {
            JsonValue::Null
        } else if let Ok(num) = val.parse::<i64>() {
            JsonValue::Number(num.into())
        } else if let Some(num) = val.parse::<f64>().ok().and_then(serde_json::Number::from_f64) {
            JsonValue::Number(num)
        } else if val.starts_with('[') || val.starts_with('{') {
            serde_json::from_str(val).unwrap_or_else(|_| JsonValue::String(val.to_string()))
        } else {
            JsonValue::String(val.to_string())
        };

        values.set(key, json_value);
    }

    Ok(values)
}
