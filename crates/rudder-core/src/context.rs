//! Template rendering context

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::chart::ChartMetadata;
use crate::values::Values;

/// Context available to all templates of one chart
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateContext {
    /// Values scoped to the chart being rendered
    pub values: JsonValue,

    pub release: ReleaseContext,

    pub chart: ChartInfo,

    pub capabilities: Capabilities,

    /// Current template info
    pub template: TemplateInfo,
}

/// Release information for templates
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseContext {
    pub name: String,
    pub namespace: String,
    pub revision: u32,
    pub is_install: bool,
    pub is_upgrade: bool,
    /// Always "Rudder"
    pub service: String,
}

impl ReleaseContext {
    pub fn for_install(name: &str, namespace: &str) -> Self {
        Self {
            name: name.to_string(),
            namespace: namespace.to_string(),
            revision: 1,
            is_install: true,
            is_upgrade: false,
            service: "Rudder".to_string(),
        }
    }

    /// Upgrades and rollbacks both render as upgrades
    pub fn for_upgrade(name: &str, namespace: &str, revision: u32) -> Self {
        Self {
            name: name.to_string(),
            namespace: namespace.to_string(),
            revision,
            is_install: false,
            is_upgrade: true,
            service: "Rudder".to_string(),
        }
    }
}

/// Chart information for templates
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartInfo {
    pub name: String,
    pub version: String,
    pub app_version: Option<String>,
}

impl From<&ChartMetadata> for ChartInfo {
    fn from(meta: &ChartMetadata) -> Self {
        Self {
            name: meta.name.clone(),
            version: meta.version.to_string(),
            app_version: meta.app_version.clone(),
        }
    }
}

/// Cluster capabilities
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Capabilities {
    pub kube_version: KubeVersion,

    /// Available API versions
    pub api_versions: Vec<String>,
}

/// Kubernetes version info
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KubeVersion {
    pub version: String,
    pub major: String,
    pub minor: String,
}

impl Default for KubeVersion {
    fn default() -> Self {
        // Used when no cluster is consulted (template, lint, dry-run)
        Self::new("v1.31.0")
    }
}

impl KubeVersion {
    pub fn new(version: &str) -> Self {
        let version = version.trim_start_matches('v');
        let mut parts = version.split('.');

        Self {
            version: format!("v{}", version),
            major: parts.next().unwrap_or("1").to_string(),
            minor: parts.next().unwrap_or("31").to_string(),
        }
    }
}

/// Current template information
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateInfo {
    /// Path ID of the template being rendered
    pub name: String,

    /// Path ID of the chart's templates directory
    pub base_path: String,
}

impl TemplateContext {
    pub fn new(values: Values, release: ReleaseContext, chart: &ChartMetadata) -> Self {
        Self {
            values: values.into_inner(),
            release,
            chart: ChartInfo::from(chart),
            capabilities: Capabilities::default(),
            template: TemplateInfo::default(),
        }
    }

    pub fn with_template(mut self, name: &str, base_path: &str) -> Self {
        self.template = TemplateInfo {
            name: name.to_string(),
            base_path: base_path.to_string(),
        };
        self
    }

    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use semver::Version;

    fn metadata() -> ChartMetadata {
        ChartMetadata {
            name: "web".to_string(),
            version: Version::new(1, 0, 0),
            description: None,
            app_version: Some("2.0.0".to_string()),
            weight: 0,
            annotations: Default::default(),
        }
    }

    #[test]
    fn test_template_context() {
        let values = Values::from_yaml("replicas: 3").unwrap();
        let release = ReleaseContext::for_install("myapp", "default");

        let ctx = TemplateContext::new(values, release, &metadata())
            .with_template("web/templates/a.yaml", "web/templates");

        assert_eq!(ctx.chart.name, "web");
        assert_eq!(ctx.release.name, "myapp");
        assert!(ctx.release.is_install);
        assert_eq!(ctx.template.base_path, "web/templates");
    }

    #[test]
    fn test_kube_version_parse() {
        let v = KubeVersion::new("v1.29.3");
        assert_eq!(v.major, "1");
        assert_eq!(v.minor, "29");
        assert_eq!(v.version, "v1.29.3");
    }
}
