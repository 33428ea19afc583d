//! Value coalescing across the chart tree
//!
//! Precedence, highest first:
//!
//! 1. `--set` overrides
//! 2. user value files, later files winning
//! 3. the chart's own `values.yaml`
//! 4. values a sub-chart re-surfaces through `importValues`
//!
//! Each enabled sub-chart's resolved tree is nested under the name the parent
//! addresses it by, so the renderer can later hand every chart only its own
//! sub-tree plus `global`. The nested tree keeps the sub-chart's `global`,
//! its own defaults already layered beneath the parent's.

use serde_json::Value as JsonValue;
use std::path::PathBuf;

use crate::chart::{Chart, ImportValue};
use crate::error::Result;
use crate::values::{Values, parse_set_values};

/// User-supplied value layers, in argument order
#[derive(Debug, Clone, Default)]
pub struct ValueOverrides {
    pub files: Vec<Values>,
    pub set: Values,
}

impl ValueOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load value files and parse `--set` pairs
    pub fn from_sources(files: &[PathBuf], set: &[String]) -> Result<Self> {
        let files = files
            .iter()
            .map(Values::from_file)
            .collect::<Result<Vec<_>>>()?;
        let set = parse_set_values(set)?;
        Ok(Self { files, set })
    }

    pub fn with_file(mut self, values: Values) -> Self {
        self.files.push(values);
        self
    }

    pub fn with_set(mut self, values: Values) -> Self {
        self.set.merge(&values);
        self
    }

    /// The user-supplied layers merged into one tree
    pub fn user_supplied(&self) -> Values {
        let mut merged = Values::merge_all(&self.files);
        merged.merge(&self.set);
        merged
    }
}

/// Resolve the full value tree for a chart and its enabled sub-charts
///
/// Pure; the same chart and overrides always produce the same tree.
pub fn coalesce(chart: &Chart, overrides: &ValueOverrides) -> Result<Values> {
    Ok(coalesce_values(chart, &overrides.user_supplied()))
}

/// Resolve against an already merged user tree (used for reuse-values)
pub fn coalesce_values(chart: &Chart, user: &Values) -> Values {
    resolve(chart, user)
}

fn resolve(chart: &Chart, overrides: &Values) -> Values {
    let mut values = chart.values.clone();
    values.merge(overrides);

    let mut imported = Values::new();

    for (name, dependency, subchart) in chart.resolved_subcharts() {
        if let Some(dep) = dependency
            && !dep.is_enabled(&values)
        {
            tracing::debug!(chart = chart.name(), subchart = name, "sub-chart disabled");
            continue;
        }

        let mut child = resolve(subchart, &values.scope_for_subchart(name));

        if let Some(dep) = dependency {
            for import in &dep.import_values {
                import_from(&child, import, &mut imported);
            }
        }

        if let JsonValue::Object(map) = &mut values.0 {
            map.insert(name.to_string(), child.into_inner());
        }
    }

    imported.merge(&values);
    imported
}

fn import_from(child: &Values, import: &ImportValue, into: &mut Values) {
    match import {
        ImportValue::Export(key) => match child.get(&format!("exports.{}", key)) {
            Some(JsonValue::Object(map)) => {
                into.merge(&Values(JsonValue::Object(map.clone())));
            }
            Some(_) => {
                tracing::warn!(key = %key, "exported value is not a table, skipping import");
            }
            None => {}
        },
        ImportValue::Mapping { child: from, parent } => {
            if let Some(value) = child.get(from) {
                let mut layer = Values::new();
                layer.set(parent, value.clone());
                into.merge(&layer);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::FileMap;

    fn chart(files: &[(&str, &str)]) -> Chart {
        let map: FileMap = files
            .iter()
            .map(|(k, v)| (k.to_string(), v.as_bytes().to_vec()))
            .collect();
        Chart::from_files(map).unwrap()
    }

    fn chart_yaml(name: &str, deps: &str) -> String {
        format!(
            "apiVersion: rudder/v1\nmetadata:\n  name: {}\n  version: 0.1.0\n{}",
            name, deps
        )
    }

    fn parent_with_common() -> Chart {
        let parent_def = chart_yaml("web", "dependencies:\n  - name: common\n    version: 0.0.5\n");
        let common_def = chart_yaml("common", "");
        chart(&[
            ("Chart.yaml", &parent_def),
            ("values.yaml", "replicas: 1\nbar:\n  secret: parent-only\nglobal:\n  env: prod\n"),
            ("charts/common/Chart.yaml", &common_def),
            ("charts/common/values.yaml", "labels:\n  tier: shared\nport: 80\n"),
        ])
    }

    #[test]
    fn test_precedence() {
        let chart = parent_with_common();
        let overrides = ValueOverrides::new()
            .with_file(Values::from_yaml("replicas: 2\nimage: a\n").unwrap())
            .with_file(Values::from_yaml("image: b\n").unwrap())
            .with_set(parse_set_values(&["replicas=3".to_string()]).unwrap());

        let values = coalesce(&chart, &overrides).unwrap();

        assert_eq!(values.get("replicas").unwrap(), 3);
        assert_eq!(values.get("image").unwrap(), "b");
        assert_eq!(values.get("bar.secret").unwrap(), "parent-only");
    }

    #[test]
    fn test_file_order_changes_only_overlapping_keys() {
        let chart = parent_with_common();
        let a = Values::from_yaml("image: a\nonlyA: 1\n").unwrap();
        let b = Values::from_yaml("image: b\nonlyB: 2\n").unwrap();

        let ab = coalesce(&chart, &ValueOverrides::new().with_file(a.clone()).with_file(b.clone())).unwrap();
        let ba = coalesce(&chart, &ValueOverrides::new().with_file(b).with_file(a)).unwrap();

        assert_eq!(ab.get("image").unwrap(), "b");
        assert_eq!(ba.get("image").unwrap(), "a");
        assert_eq!(ab.get("onlyA"), ba.get("onlyA"));
        assert_eq!(ab.get("onlyB"), ba.get("onlyB"));
    }

    #[test]
    fn test_coalesce_is_deterministic() {
        let chart = parent_with_common();
        let overrides = ValueOverrides::new().with_set(Values::from_yaml("common:\n  port: 81\n").unwrap());

        let first = coalesce(&chart, &overrides).unwrap();
        let second = coalesce(&chart, &overrides).unwrap();
        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
    }

    #[test]
    fn test_subchart_defaults_nested_under_name() {
        let chart = parent_with_common();
        let overrides = ValueOverrides::new().with_set(Values::from_yaml("common:\n  port: 8080\n").unwrap());

        let values = coalesce(&chart, &overrides).unwrap();

        assert_eq!(values.get("common.port").unwrap(), 8080);
        assert_eq!(values.get("common.labels.tier").unwrap(), "shared");
        // parent-only keys never leak into the sub-chart's tree
        assert!(values.get("common.bar").is_none());

        let scoped = values.scope_for_subchart("common");
        assert_eq!(scoped.get("global.env").unwrap(), "prod");
        assert!(scoped.get("bar").is_none());
    }

    #[test]
    fn test_subchart_global_defaults_sit_beneath_parent() {
        let parent_def = chart_yaml("web", "dependencies:\n  - name: common\n");
        let common_def = chart_yaml("common", "");
        let chart = chart(&[
            ("Chart.yaml", &parent_def),
            ("values.yaml", "global:\n  env: prod\n  logLevel: warn\n"),
            ("charts/common/Chart.yaml", &common_def),
            (
                "charts/common/values.yaml",
                "global:\n  logLevel: info\n  tracing: false\n",
            ),
        ]);

        let values = coalesce(&chart, &ValueOverrides::new()).unwrap();
        let scoped = values.scope_for_subchart("common");

        assert_eq!(scoped.get("global.env").unwrap(), "prod");
        assert_eq!(scoped.get("global.logLevel").unwrap(), "warn");
        assert_eq!(scoped.get("global.tracing").unwrap(), false);
        // the parent's own global is untouched by child defaults
        assert!(values.get("global.tracing").is_none());
    }

    #[test]
    fn test_disabled_subchart_not_coalesced() {
        let parent_def = chart_yaml(
            "web",
            "dependencies:\n  - name: common\n    condition: common.enabled\n",
        );
        let common_def = chart_yaml("common", "");
        let chart = chart(&[
            ("Chart.yaml", &parent_def),
            ("values.yaml", "common:\n  enabled: false\n"),
            ("charts/common/Chart.yaml", &common_def),
            ("charts/common/values.yaml", "port: 80\n"),
        ]);

        let values = coalesce(&chart, &ValueOverrides::new()).unwrap();
        assert!(values.get("common.port").is_none());
    }

    #[test]
    fn test_import_values() {
        let parent_def = chart_yaml(
            "web",
            "dependencies:\n  - name: db\n    importValues:\n      - data\n      - child: service.port\n        parent: dbPort\n",
        );
        let db_def = chart_yaml("db", "");
        let chart = chart(&[
            ("Chart.yaml", &parent_def),
            ("values.yaml", "shared: parent\n"),
            ("charts/db/Chart.yaml", &db_def),
            (
                "charts/db/values.yaml",
                "exports:\n  data:\n    shared: child\n    dbName: app\nservice:\n  port: 5432\n",
            ),
        ]);

        let values = coalesce(&chart, &ValueOverrides::new()).unwrap();

        assert_eq!(values.get("dbName").unwrap(), "app");
        assert_eq!(values.get("dbPort").unwrap(), 5432);
        // imports rank below the parent's own defaults
        assert_eq!(values.get("shared").unwrap(), "parent");
    }

    #[test]
    fn test_from_sources_rejects_bad_set() {
        let err = ValueOverrides::from_sources(&[], &["broken".to_string()]).unwrap_err();
        assert!(matches!(err, crate::CoreError::InvalidValues { .. }));
    }
}
