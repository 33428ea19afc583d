//! Manifest splitting and install ordering
//!
//! Rendered templates are split into single documents, hooks are separated
//! from regular resources, and resources get a total install order:
//! chart weight, then resource weight, then kind priority, then name.
//! Uninstall deletes in exactly the reverse order.

use rudder_core::Chart;
use rudder_engine::RenderOutput;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::annotations::{self, helm, rudder};
use crate::error::{KubeError, Result};
use crate::hooks::Hook;

const SOURCE_PREFIX: &str = "# Source: ";

/// Kinds that never carry a namespace
const CLUSTER_SCOPED_KINDS: &[&str] = &[
    "Namespace",
    "CustomResourceDefinition",
    "ClusterRole",
    "ClusterRoleBinding",
    "PersistentVolume",
    "StorageClass",
    "IngressClass",
    "PriorityClass",
    "RuntimeClass",
    "PodSecurityPolicy",
    "MutatingWebhookConfiguration",
    "ValidatingWebhookConfiguration",
    "APIService",
];

/// Install priority by kind; lower installs first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum KindPriority {
    /// CustomResourceDefinition
    Crd = 0,
    Namespace = 1,
    /// ResourceQuota, LimitRange, PodSecurityPolicy
    NamespaceConfig = 2,
    /// ClusterRole, ClusterRoleBinding
    ClusterRbac = 10,
    /// Role, RoleBinding, ServiceAccount
    NamespacedRbac = 11,
    /// ConfigMap, Secret
    Config = 20,
    /// PersistentVolume, PersistentVolumeClaim, StorageClass
    Storage = 21,
    /// NetworkPolicy, Service, Endpoints, Ingress
    Network = 30,
    /// Deployment, StatefulSet, DaemonSet, ReplicaSet, Pod
    Workload = 40,
    /// Job, CronJob
    Batch = 50,
    /// HorizontalPodAutoscaler, VerticalPodAutoscaler, PodDisruptionBudget
    Autoscaling = 60,
    /// Instances of custom resource definitions
    CustomResource = 70,
    Other = 100,
}

impl KindPriority {
    /// Categorize a resource by its kind and apiVersion
    pub fn of(kind: &str, api_version: &str) -> Self {
        match kind {
            "CustomResourceDefinition" => Self::Crd,
            "Namespace" => Self::Namespace,
            "ResourceQuota" | "LimitRange" | "PodSecurityPolicy" => Self::NamespaceConfig,
            "ClusterRole" | "ClusterRoleBinding" => Self::ClusterRbac,
            "Role" | "RoleBinding" | "ServiceAccount" => Self::NamespacedRbac,
            "ConfigMap" | "Secret" => Self::Config,
            "PersistentVolume" | "PersistentVolumeClaim" | "StorageClass" => Self::Storage,
            "NetworkPolicy" | "Service" | "Endpoints" | "Ingress" | "IngressClass" => Self::Network,
            "Deployment" | "StatefulSet" | "DaemonSet" | "ReplicaSet" | "Pod" => Self::Workload,
            "Job" | "CronJob" => Self::Batch,
            "HorizontalPodAutoscaler" | "VerticalPodAutoscaler" | "PodDisruptionBudget" => {
                Self::Autoscaling
            }
            _ if is_custom_api_version(api_version) => Self::CustomResource,
            _ => Self::Other,
        }
    }
}

/// Whether an apiVersion belongs to a non-core API group
pub fn is_custom_api_version(api_version: &str) -> bool {
    const CORE_GROUPS: &[&str] = &[
        "apps",
        "batch",
        "autoscaling",
        "policy",
        "networking.k8s.io",
        "rbac.authorization.k8s.io",
        "storage.k8s.io",
        "admissionregistration.k8s.io",
        "apiextensions.k8s.io",
        "certificates.k8s.io",
        "coordination.k8s.io",
        "discovery.k8s.io",
        "events.k8s.io",
        "flowcontrol.apiserver.k8s.io",
        "node.k8s.io",
        "scheduling.k8s.io",
    ];

    match api_version.rsplit_once('/') {
        Some((group, _)) => !CORE_GROUPS.contains(&group),
        // bare "v1" is the core group
        None => false,
    }
}

/// Identity of a live object
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ResourceKey {
    pub kind: String,
    pub namespace: Option<String>,
    pub name: String,
}

impl std::fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}/{}", self.kind, ns, self.name),
            None => write!(f, "{}/{}", self.kind, self.name),
        }
    }
}

/// One rendered Kubernetes document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Template path ID the document came from
    pub source: String,
    /// `rudder.io/weight` annotation
    #[serde(default)]
    pub weight: i32,
    /// Weight of the chart that rendered it
    #[serde(default)]
    pub chart_weight: i32,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    /// Document text, without the source comment
    pub manifest: String,
}

impl Resource {
    pub fn key(&self) -> ResourceKey {
        ResourceKey {
            kind: self.kind.clone(),
            namespace: self.namespace.clone(),
            name: self.name.clone(),
        }
    }

    pub fn priority(&self) -> KindPriority {
        KindPriority::of(&self.kind, &self.api_version)
    }

    /// Whether uninstall must leave this resource in place
    pub fn is_kept(&self) -> bool {
        annotations::is_kept(&self.annotations)
    }

    pub fn is_cluster_scoped(&self) -> bool {
        CLUSTER_SCOPED_KINDS.contains(&self.kind.as_str())
    }

    /// The document as a JSON object
    pub fn object(&self) -> Result<serde_json::Value> {
        let mut value: serde_json::Value = serde_yaml::from_str(&self.manifest)?;
        if let Some(ns) = &self.namespace
            && let Some(meta) = value.get_mut("metadata").and_then(|m| m.as_object_mut())
        {
            meta.insert("namespace".to_string(), serde_json::Value::String(ns.clone()));
        }
        Ok(value)
    }

    fn install_key(&self) -> (i32, i32, KindPriority, &str, &str, Option<&str>) {
        (
            self.chart_weight,
            self.weight,
            self.priority(),
            &self.name,
            &self.kind,
            self.namespace.as_deref(),
        )
    }
}

/// Regular resources and hooks of a rendered release
#[derive(Debug, Clone, Default)]
pub struct SplitManifest {
    pub resources: Vec<Resource>,
    pub hooks: Vec<Hook>,
}

impl SplitManifest {
    fn extend(&mut self, other: SplitManifest) {
        self.resources.extend(other.resources);
        self.hooks.extend(other.hooks);
    }
}

/// Chart weights by chart path ID
pub type ChartWeights = BTreeMap<String, i32>;

/// Weights of every chart a render visited
pub fn weights_from_output(output: &RenderOutput) -> ChartWeights {
    output
        .charts
        .iter()
        .map(|(path, info)| (path.clone(), info.weight))
        .collect()
}

/// Weights of every chart in the tree, enabled or not
pub fn weights_from_chart(chart: &Chart) -> ChartWeights {
    fn walk(chart: &Chart, path: String, out: &mut ChartWeights) {
        for (name, _, sub) in chart.resolved_subcharts() {
            walk(sub, format!("{}/charts/{}", path, name), out);
        }
        out.insert(path, chart.metadata().weight);
    }

    let mut out = ChartWeights::new();
    walk(chart, chart.name().to_string(), &mut out);
    out
}

/// Weight of the chart owning a template path; the longest prefix wins
pub fn chart_weight(weights: &ChartWeights, source: &str) -> i32 {
    weights
        .iter()
        .filter(|(path, _)| {
            source
                .strip_prefix(path.as_str())
                .is_some_and(|rest| rest.starts_with("/templates/"))
        })
        .max_by_key(|(path, _)| path.len())
        .map(|(_, weight)| *weight)
        .unwrap_or(0)
}

/// Split every manifest of a render
pub fn split_rendered(output: &RenderOutput) -> Result<SplitManifest> {
    let weights = weights_from_output(output);
    let mut split = SplitManifest::default();
    for (path, text) in &output.manifests {
        split.extend(split_manifest(path, text, chart_weight(&weights, path))?);
    }
    Ok(split)
}

/// Split the documents of one template
pub fn split_manifest(source: &str, text: &str, chart_weight: i32) -> Result<SplitManifest> {
    let mut split = SplitManifest::default();
    for doc in documents(text) {
        if let Some(resource) = parse_document(source, &doc.body, chart_weight)? {
            push(&mut split, resource)?;
        }
    }
    Ok(split)
}

/// Split a joined stream that carries `# Source:` comments
pub fn split_stream(stream: &str, weights: &ChartWeights) -> Result<SplitManifest> {
    let mut split = SplitManifest::default();
    let mut source = String::new();
    for doc in documents(stream) {
        if let Some(path) = doc.source {
            source = path;
        }
        let weight = chart_weight(weights, &source);
        if let Some(resource) = parse_document(&source, &doc.body, weight)? {
            push(&mut split, resource)?;
        }
    }
    Ok(split)
}

fn push(split: &mut SplitManifest, resource: Resource) -> Result<()> {
    if annotations::get_annotation(&resource.annotations, rudder::HOOK, helm::HOOK).is_some() {
        split.hooks.push(Hook::from_resource(resource)?);
    } else {
        split.resources.push(resource);
    }
    Ok(())
}

/// Join resources into a stream `split_stream` reads back
pub fn join_resources(resources: &[Resource]) -> String {
    let mut out = String::new();
    for r in resources {
        out.push_str("---\n");
        out.push_str(SOURCE_PREFIX);
        out.push_str(&r.source);
        out.push('\n');
        out.push_str(r.manifest.trim_end());
        out.push('\n');
    }
    out
}

/// Order resources for install
pub fn sort_for_install(resources: &mut [Resource]) {
    resources.sort_by(|a, b| a.install_key().cmp(&b.install_key()));
}

/// Order resources for uninstall, the exact reverse of install order
pub fn sort_for_uninstall(resources: &mut [Resource]) {
    sort_for_install(resources);
    resources.reverse();
}

/// Put namespaced resources without a namespace into `namespace`
pub fn default_namespace(resources: &mut [Resource], namespace: &str) {
    for r in resources.iter_mut() {
        if r.namespace.is_none() && !r.is_cluster_scoped() {
            r.namespace = Some(namespace.to_string());
        }
    }
}

struct Document {
    source: Option<String>,
    body: String,
}

fn documents(text: &str) -> Vec<Document> {
    let mut docs = Vec::new();
    let mut current = Document {
        source: None,
        body: String::new(),
    };

    for line in text.lines() {
        if line.trim_end() == "---" {
            docs.push(std::mem::replace(
                &mut current,
                Document {
                    source: None,
                    body: String::new(),
                },
            ));
            continue;
        }
        if let Some(path) = line.strip_prefix(SOURCE_PREFIX) {
            current.source = Some(path.trim().to_string());
            continue;
        }
        current.body.push_str(line);
        current.body.push('\n');
    }
    docs.push(current);
    docs
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Header {
    api_version: Option<String>,
    kind: Option<String>,
    #[serde(default)]
    metadata: HeaderMetadata,
}

#[derive(Deserialize, Default)]
struct HeaderMetadata {
    name: Option<String>,
    namespace: Option<String>,
    #[serde(default)]
    annotations: BTreeMap<String, serde_yaml::Value>,
}

fn parse_document(source: &str, body: &str, chart_weight: i32) -> Result<Option<Resource>> {
    let blank = body
        .lines()
        .all(|l| l.trim().is_empty() || l.trim_start().starts_with('#'));
    if blank {
        return Ok(None);
    }

    let parse_err = |message: String| KubeError::ManifestParse {
        path: source.to_string(),
        message,
    };

    let header: Header = serde_yaml::from_str(body).map_err(|e| parse_err(e.to_string()))?;
    let kind = header
        .kind
        .ok_or_else(|| parse_err("document has no kind".to_string()))?;
    let api_version = header
        .api_version
        .ok_or_else(|| parse_err(format!("{} has no apiVersion", kind)))?;
    let name = header
        .metadata
        .name
        .ok_or_else(|| parse_err(format!("{} has no metadata.name", kind)))?;

    let annotations: BTreeMap<String, String> = header
        .metadata
        .annotations
        .into_iter()
        .map(|(k, v)| {
            let v = match v {
                serde_yaml::Value::String(s) => s,
                serde_yaml::Value::Number(n) => n.to_string(),
                serde_yaml::Value::Bool(b) => b.to_string(),
                other => serde_yaml::to_string(&other)
                    .unwrap_or_default()
                    .trim()
                    .to_string(),
            };
            (k, v)
        })
        .collect();

    Ok(Some(Resource {
        weight: annotations::parse_weight(&annotations, rudder::WEIGHT, helm::WEIGHT),
        api_version,
        kind,
        name,
        namespace: header.metadata.namespace,
        source: source.to_string(),
        chart_weight,
        annotations,
        manifest: body.trim_end().to_string() + "\n",
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rudder_engine::ChartNodeInfo;

    fn doc(kind: &str, name: &str) -> String {
        let api = match kind {
            "Deployment" => "apps/v1",
            "Job" => "batch/v1",
            "CustomResourceDefinition" => "apiextensions.k8s.io/v1",
            _ => "v1",
        };
        format!("apiVersion: {}\nkind: {}\nmetadata:\n  name: {}\n", api, kind, name)
    }

    fn names(resources: &[Resource]) -> Vec<String> {
        resources
            .iter()
            .map(|r| format!("{}/{}", r.kind, r.name))
            .collect()
    }

    #[test]
    fn test_kind_priority() {
        assert_eq!(
            KindPriority::of("CustomResourceDefinition", "apiextensions.k8s.io/v1"),
            KindPriority::Crd
        );
        assert_eq!(KindPriority::of("ServiceAccount", "v1"), KindPriority::NamespacedRbac);
        assert_eq!(KindPriority::of("Deployment", "apps/v1"), KindPriority::Workload);
        assert_eq!(
            KindPriority::of("Certificate", "cert-manager.io/v1"),
            KindPriority::CustomResource
        );
        assert_eq!(KindPriority::of("Lease", "coordination.k8s.io/v1"), KindPriority::Other);
        assert!(KindPriority::Namespace < KindPriority::Config);
    }

    #[test]
    fn test_split_separates_hooks_and_skips_empty_documents() {
        let text = format!(
            "{}---\n# just a comment\n---\n{}  annotations:\n    helm.sh/hook: pre-install\n",
            doc("ConfigMap", "cfg"),
            doc("Job", "migrate")
        );
        let split = split_manifest("web/templates/all.yaml", &text, 0).unwrap();

        assert_eq!(names(&split.resources), vec!["ConfigMap/cfg"]);
        assert_eq!(split.hooks.len(), 1);
        assert_eq!(split.hooks[0].name, "migrate");
    }

    #[test]
    fn test_split_rejects_document_without_kind() {
        let err = split_manifest("web/templates/bad.yaml", "metadata:\n  name: x\n", 0).unwrap_err();
        assert!(matches!(err, KubeError::ManifestParse { ref path, .. } if path == "web/templates/bad.yaml"));
    }

    #[test]
    fn test_install_order() {
        let text = [
            doc("Deployment", "web"),
            doc("Service", "web"),
            doc("ConfigMap", "b"),
            doc("ConfigMap", "a"),
            doc("Namespace", "apps"),
            doc("CustomResourceDefinition", "widgets.example.com"),
            doc("ServiceAccount", "web"),
        ]
        .join("---\n");
        let mut split = split_manifest("web/templates/all.yaml", &text, 0).unwrap();
        sort_for_install(&mut split.resources);

        assert_eq!(
            names(&split.resources),
            vec![
                "CustomResourceDefinition/widgets.example.com",
                "Namespace/apps",
                "ServiceAccount/web",
                "ConfigMap/a",
                "ConfigMap/b",
                "Service/web",
                "Deployment/web",
            ]
        );

        let installed = names(&split.resources);
        sort_for_uninstall(&mut split.resources);
        let mut reversed = installed.clone();
        reversed.reverse();
        assert_eq!(names(&split.resources), reversed);
    }

    #[test]
    fn test_joined_stream_keeps_sources() {
        let text = format!("{}---\n{}", doc("Service", "web"), doc("ConfigMap", "cfg"));
        let mut split = split_manifest("web/templates/all.yaml", &text, 0).unwrap();
        sort_for_install(&mut split.resources);

        insta::assert_snapshot!(join_resources(&split.resources), @r"
        ---
        # Source: web/templates/all.yaml
        apiVersion: v1
        kind: ConfigMap
        metadata:
          name: cfg
        ---
        # Source: web/templates/all.yaml
        apiVersion: v1
        kind: Service
        metadata:
          name: web
        ");
    }

    #[test]
    fn test_weights_dominate_kind_priority() {
        let weighted = "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: late\n  annotations:\n    rudder.io/weight: \"5\"\n";
        let text = format!("{}---\n{}", weighted, doc("Deployment", "early"));
        let mut split = split_manifest("web/templates/all.yaml", &text, 0).unwrap();
        sort_for_install(&mut split.resources);
        assert_eq!(names(&split.resources), vec!["Deployment/early", "ConfigMap/late"]);
    }

    #[test]
    fn test_chart_weight_orders_across_charts() {
        let mut output = RenderOutput::default();
        output.charts.insert(
            "web".to_string(),
            ChartNodeInfo { weight: 0, post_renderer: None },
        );
        output.charts.insert(
            "web/charts/db".to_string(),
            ChartNodeInfo { weight: -10, post_renderer: None },
        );
        output
            .manifests
            .insert("web/templates/cm.yaml".to_string(), doc("ConfigMap", "web"));
        output.manifests.insert(
            "web/charts/db/templates/sts.yaml".to_string(),
            doc("Deployment", "db"),
        );

        let mut split = split_rendered(&output).unwrap();
        sort_for_install(&mut split.resources);
        assert_eq!(names(&split.resources), vec!["Deployment/db", "ConfigMap/web"]);
        assert_eq!(split.resources[0].chart_weight, -10);
    }

    #[test]
    fn test_stream_round_trip_keeps_sources() {
        let mut weights = ChartWeights::new();
        weights.insert("web".to_string(), 0);
        weights.insert("web/charts/db".to_string(), 3);

        let stream = format!(
            "---\n# Source: web/charts/db/templates/a.yaml\n{}---\n{}---\n# Source: web/templates/b.yaml\n{}",
            doc("ConfigMap", "one"),
            doc("ConfigMap", "two"),
            doc("Service", "three")
        );
        let split = split_stream(&stream, &weights).unwrap();
        let sources: Vec<_> = split.resources.iter().map(|r| r.source.as_str()).collect();
        assert_eq!(
            sources,
            vec![
                "web/charts/db/templates/a.yaml",
                "web/charts/db/templates/a.yaml",
                "web/templates/b.yaml"
            ]
        );
        assert_eq!(split.resources[1].chart_weight, 3);

        let rejoined = split_stream(&join_resources(&split.resources), &weights).unwrap();
        assert_eq!(rejoined.resources, split.resources);
    }

    #[test]
    fn test_default_namespace_skips_cluster_scoped() {
        let text = format!("{}---\n{}", doc("Namespace", "apps"), doc("ConfigMap", "cfg"));
        let mut split = split_manifest("web/templates/all.yaml", &text, 0).unwrap();
        default_namespace(&mut split.resources, "prod");

        assert_eq!(split.resources[0].namespace, None);
        assert_eq!(split.resources[1].namespace.as_deref(), Some("prod"));
        assert_eq!(split.resources[1].key().to_string(), "ConfigMap/prod/cfg");
        assert_eq!(split.resources[1].object().unwrap()["metadata"]["namespace"], "prod");
    }
}
