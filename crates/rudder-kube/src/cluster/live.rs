//! Cluster access through the Kubernetes API
//!
//! Resources are applied with Server-Side Apply through dynamic objects
//! resolved by discovery, so any kind the server knows can be managed.

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{Namespace, Pod};
use kube::{
    Client,
    api::{Api, DeleteParams, DynamicObject, ListParams, Patch, PatchParams, PostParams, PropagationPolicy},
    core::GroupVersionKind,
    discovery::{self, Discovery, Scope},
    runtime::wait::{await_condition, conditions},
};
use rudder_engine::ResourceLookup;
use std::time::{Duration, Instant};

use super::{ApplyResult, ClusterClient, DeleteResult, orphans};
use crate::error::{KubeError, Result};
use crate::manifest::Resource;

/// Field manager name for Server-Side Apply
const FIELD_MANAGER: &str = "rudder";

const POLL_INTERVAL: Duration = Duration::from_secs(2);

const CRD_KIND: &str = "CustomResourceDefinition";

/// A live cluster
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Connect with the default kubeconfig or in-cluster configuration
    pub async fn try_default() -> Result<Self> {
        let client = Client::try_default()
            .await
            .map_err(|e| KubeError::ClusterUnreachable(e.to_string()))?;
        Ok(Self::new(client))
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    async fn discovery(&self) -> Result<Discovery> {
        Discovery::new(self.client.clone())
            .run()
            .await
            .map_err(KubeError::Api)
    }

    fn api_for(&self, discovery: &Discovery, resource: &Resource) -> Result<Api<DynamicObject>> {
        let gvk = gvk_of(&resource.api_version, &resource.kind);
        let (api_resource, capabilities) = discovery.resolve_gvk(&gvk).ok_or_else(|| {
            KubeError::ResourceFailed {
                resource: resource.key().to_string(),
                message: format!("unknown resource type {}/{}", resource.api_version, resource.kind),
            }
        })?;

        Ok(if capabilities.scope == Scope::Namespaced {
            let ns = resource.namespace.as_deref().unwrap_or("default");
            Api::namespaced_with(self.client.clone(), ns, &api_resource)
        } else {
            Api::all_with(self.client.clone(), &api_resource)
        })
    }

    /// Apply each resource in order; rediscover once CRDs have been applied
    async fn apply_all(&self, resources: &[Resource], force: bool, result: &mut ApplyResult) -> Result<()> {
        let mut discovery = self.discovery().await?;
        let mut stale = false;

        for resource in resources {
            if stale && resource.kind != CRD_KIND {
                discovery = self.discovery().await?;
                stale = false;
            }

            let created = self.apply_one(&discovery, resource, force).await?;
            tracing::debug!(resource = %resource.key(), created, "applied");
            if created {
                result.created.push(resource.key());
            } else {
                result.updated.push(resource.key());
            }

            if resource.kind == CRD_KIND {
                stale = true;
            }
        }
        Ok(())
    }

    /// Returns whether the object was newly created
    async fn apply_one(&self, discovery: &Discovery, resource: &Resource, force: bool) -> Result<bool> {
        let api = self.api_for(discovery, resource)?;
        let obj: DynamicObject = serde_json::from_value(resource.object()?)?;
        let name = resource.name.as_str();
        let failed = |e: kube::Error| KubeError::ResourceFailed {
            resource: resource.key().to_string(),
            message: e.to_string(),
        };

        let exists = api.get_opt(name).await.map_err(KubeError::Api)?.is_some();
        let params = PatchParams::apply(FIELD_MANAGER).force();

        match api.patch(name, &params, &Patch::Apply(&obj)).await {
            Ok(_) => Ok(!exists),
            // immutable field changed; replace the object
            Err(kube::Error::Api(resp)) if force && resp.code == 422 => {
                tracing::warn!(resource = %resource.key(), "recreating resource with immutable changes");
                api.delete(name, &delete_params()).await.map_err(failed)?;
                api.create(&PostParams::default(), &obj).await.map_err(failed)?;
                Ok(false)
            }
            Err(e) => Err(failed(e)),
        }
    }

    /// Returns false when there was nothing to delete
    async fn delete_one(&self, discovery: &Discovery, resource: &Resource) -> Result<bool> {
        let api = self.api_for(discovery, resource)?;
        match api.delete(&resource.name, &delete_params()).await {
            Ok(_) => Ok(true),
            Err(kube::Error::Api(resp)) if resp.code == 404 => Ok(false),
            Err(e) => Err(KubeError::ResourceFailed {
                resource: resource.key().to_string(),
                message: e.to_string(),
            }),
        }
    }

    async fn readiness(&self, resource: &Resource) -> Result<Readiness> {
        let ns = resource.namespace.as_deref().unwrap_or("default");
        let client = self.client.clone();
        let name = resource.name.as_str();

        let readiness = match resource.kind.as_str() {
            "Deployment" => Api::<Deployment>::namespaced(client, ns)
                .get_opt(name)
                .await?
                .map(|d| deployment_readiness(&d)),
            "StatefulSet" => Api::<StatefulSet>::namespaced(client, ns)
                .get_opt(name)
                .await?
                .map(|s| statefulset_readiness(&s)),
            "DaemonSet" => Api::<DaemonSet>::namespaced(client, ns)
                .get_opt(name)
                .await?
                .map(|d| daemonset_readiness(&d)),
            "Job" => Api::<Job>::namespaced(client, ns)
                .get_opt(name)
                .await?
                .map(|j| job_readiness(&j)),
            "Pod" => Api::<Pod>::namespaced(client, ns)
                .get_opt(name)
                .await?
                .map(|p| pod_readiness(&p)),
            _ => Some(Readiness::Ready),
        };

        Ok(readiness.unwrap_or_else(|| Readiness::Pending("not found".to_string())))
    }
}

fn delete_params() -> DeleteParams {
    DeleteParams {
        propagation_policy: Some(PropagationPolicy::Background),
        ..Default::default()
    }
}

#[async_trait]
impl ClusterClient for KubeCluster {
    async fn create(&self, resources: &[Resource]) -> Result<ApplyResult> {
        let mut result = ApplyResult::default();
        self.apply_all(resources, false, &mut result).await?;
        Ok(result)
    }

    async fn update(&self, current: &[Resource], target: &[Resource], force: bool) -> Result<ApplyResult> {
        let mut result = ApplyResult::default();
        self.apply_all(target, force, &mut result).await?;

        let discovery = self.discovery().await?;
        for resource in orphans(current, target).into_iter().rev() {
            if resource.is_kept() {
                tracing::info!(resource = %resource.key(), "keeping resource removed from the chart");
                continue;
            }
            if self.delete_one(&discovery, resource).await? {
                result.deleted.push(resource.key());
            }
        }
        Ok(result)
    }

    async fn delete(&self, resources: &[Resource]) -> Result<DeleteResult> {
        let discovery = self.discovery().await?;
        let mut result = DeleteResult::default();

        for resource in resources {
            let key = resource.key();
            if resource.is_kept() {
                result.skipped.push((key, "resource-policy: keep".to_string()));
                continue;
            }
            if self.delete_one(&discovery, resource).await? {
                tracing::debug!(resource = %key, "deleted");
                result.deleted.push(key);
            } else {
                result.skipped.push((key, "not found".to_string()));
            }
        }
        Ok(result)
    }

    async fn wait(&self, resources: &[Resource], timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;

        loop {
            let mut pending = Vec::new();
            for resource in resources {
                match self.readiness(resource).await? {
                    Readiness::Ready => {}
                    Readiness::Pending(why) => pending.push(format!("{} ({})", resource.key(), why)),
                    Readiness::Failed(why) => {
                        return Err(KubeError::ResourceFailed {
                            resource: resource.key().to_string(),
                            message: why,
                        });
                    }
                }
            }

            if pending.is_empty() {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(KubeError::WaitTimeout { timeout, pending });
            }
            tracing::debug!(pending = pending.len(), "waiting for resources");
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn wait_for_completion(&self, resources: &[Resource], timeout: Duration) -> Result<()> {
        for resource in resources {
            let ns = resource.namespace.as_deref().unwrap_or("default");
            let failed = |message: String| KubeError::ResourceFailed {
                resource: resource.key().to_string(),
                message,
            };

            match resource.kind.as_str() {
                "Job" => {
                    let jobs: Api<Job> = Api::namespaced(self.client.clone(), ns);
                    let condition = await_condition(jobs, &resource.name, conditions::is_job_completed());
                    match tokio::time::timeout(timeout, condition).await {
                        Ok(Ok(Some(job))) => match job_readiness(&job) {
                            Readiness::Ready => {}
                            Readiness::Failed(why) | Readiness::Pending(why) => return Err(failed(why)),
                        },
                        Ok(Ok(None)) => return Err(failed("job was deleted before completing".to_string())),
                        Ok(Err(e)) => return Err(failed(e.to_string())),
                        Err(_) => {
                            return Err(KubeError::WaitTimeout {
                                timeout,
                                pending: vec![resource.key().to_string()],
                            });
                        }
                    }
                }
                "Pod" => {
                    let pods: Api<Pod> = Api::namespaced(self.client.clone(), ns);
                    let deadline = Instant::now() + timeout;
                    loop {
                        let phase = pods
                            .get_opt(&resource.name)
                            .await?
                            .and_then(|p| p.status)
                            .and_then(|s| s.phase)
                            .unwrap_or_default();
                        match phase.as_str() {
                            "Succeeded" => break,
                            "Failed" => return Err(failed("pod failed".to_string())),
                            _ if Instant::now() >= deadline => {
                                return Err(KubeError::WaitTimeout {
                                    timeout,
                                    pending: vec![resource.key().to_string()],
                                });
                            }
                            _ => tokio::time::sleep(POLL_INTERVAL).await,
                        }
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    async fn create_namespace(&self, namespace: &str) -> Result<()> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let ns: Namespace = serde_json::from_value(serde_json::json!({
            "apiVersion": "v1",
            "kind": "Namespace",
            "metadata": { "name": namespace },
        }))?;

        match api.create(&PostParams::default(), &ns).await {
            Ok(_) => {
                tracing::info!(namespace, "created namespace");
                Ok(())
            }
            Err(kube::Error::Api(resp)) if resp.code == 409 => Ok(()),
            Err(e) => Err(KubeError::Api(e)),
        }
    }

    async fn ping(&self) -> Result<()> {
        self.client
            .apiserver_version()
            .await
            .map(|_| ())
            .map_err(|e| KubeError::ClusterUnreachable(e.to_string()))
    }
}

/// `lookup` backed by the live cluster
///
/// Blocks on the given runtime handle, so it must be called from a
/// blocking thread; the release manager renders inside `spawn_blocking`.
pub struct KubeLookup {
    client: Client,
    handle: tokio::runtime::Handle,
}

impl KubeLookup {
    pub fn new(client: Client, handle: tokio::runtime::Handle) -> Self {
        Self { client, handle }
    }
}

impl ResourceLookup for KubeLookup {
    fn lookup(
        &self,
        api_version: &str,
        kind: &str,
        namespace: &str,
        name: &str,
    ) -> std::result::Result<serde_json::Value, String> {
        let gvk = gvk_of(api_version, kind);
        self.handle.block_on(async {
            let (api_resource, capabilities) = discovery::pinned_kind(&self.client, &gvk)
                .await
                .map_err(|e| e.to_string())?;

            let api: Api<DynamicObject> = if capabilities.scope == Scope::Namespaced && !namespace.is_empty() {
                Api::namespaced_with(self.client.clone(), namespace, &api_resource)
            } else {
                Api::all_with(self.client.clone(), &api_resource)
            };

            if name.is_empty() {
                let list = api.list(&ListParams::default()).await.map_err(|e| e.to_string())?;
                return Ok(serde_json::json!({ "items": list.items }));
            }

            match api.get_opt(name).await.map_err(|e| e.to_string())? {
                Some(obj) => serde_json::to_value(obj).map_err(|e| e.to_string()),
                None => Ok(serde_json::Value::Null),
            }
        })
    }
}

/// Split an apiVersion into group and version
///
/// `apps/v1` is group `apps`, version `v1`; `v1` is the core group.
fn gvk_of(api_version: &str, kind: &str) -> GroupVersionKind {
    let (group, version) = match api_version.rsplit_once('/') {
        Some((g, v)) => (g, v),
        None => ("", api_version),
    };
    GroupVersionKind::gvk(group, version, kind)
}

#[derive(Debug, Clone, PartialEq)]
enum Readiness {
    Ready,
    Pending(String),
    Failed(String),
}

/// Ready when every desired replica is updated, ready and available
fn deployment_readiness(deployment: &Deployment) -> Readiness {
    let desired = deployment.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
    let status = deployment.status.as_ref();
    let ready = status.and_then(|s| s.ready_replicas).unwrap_or(0);
    let updated = status.and_then(|s| s.updated_replicas).unwrap_or(0);
    let available = status.and_then(|s| s.available_replicas).unwrap_or(0);

    if ready == desired && updated == desired && available == desired {
        Readiness::Ready
    } else {
        Readiness::Pending(format!(
            "{}/{} ready, {}/{} updated, {}/{} available",
            ready, desired, updated, desired, available, desired
        ))
    }
}

/// Ready when replicas are ready and current and the rollout finished
fn statefulset_readiness(sts: &StatefulSet) -> Readiness {
    let desired = sts.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
    let status = sts.status.as_ref();
    let ready = status.and_then(|s| s.ready_replicas).unwrap_or(0);
    let current = status.and_then(|s| s.current_replicas).unwrap_or(0);
    let revision_match =
        status.and_then(|s| s.current_revision.as_ref()) == status.and_then(|s| s.update_revision.as_ref());

    if ready == desired && current == desired && revision_match {
        Readiness::Ready
    } else {
        Readiness::Pending(format!(
            "{}/{} ready, {}/{} current, revision match: {}",
            ready, desired, current, desired, revision_match
        ))
    }
}

fn daemonset_readiness(ds: &DaemonSet) -> Readiness {
    let status = ds.status.as_ref();
    let desired = status.map(|s| s.desired_number_scheduled).unwrap_or(0);
    let ready = status.map(|s| s.number_ready).unwrap_or(0);
    let updated = status.and_then(|s| s.updated_number_scheduled).unwrap_or(0);

    if ready == desired && updated == desired && desired > 0 {
        Readiness::Ready
    } else {
        Readiness::Pending(format!("{}/{} ready, {}/{} updated", ready, desired, updated, desired))
    }
}

fn job_readiness(job: &Job) -> Readiness {
    let status = job.status.as_ref();
    let succeeded = status.and_then(|s| s.succeeded).unwrap_or(0);
    let failed = status.and_then(|s| s.failed).unwrap_or(0);
    let active = status.and_then(|s| s.active).unwrap_or(0);

    let failed_condition = status
        .and_then(|s| s.conditions.as_ref())
        .and_then(|c| c.iter().find(|cond| cond.type_ == "Failed" && cond.status == "True"));

    if let Some(cond) = failed_condition {
        let reason = cond.reason.clone().unwrap_or_else(|| "Failed".to_string());
        return Readiness::Failed(format!("job failed: {}", reason));
    }
    if succeeded > 0 {
        Readiness::Ready
    } else if failed > 0 && active == 0 {
        Readiness::Failed(format!("job failed with {} failed pods", failed))
    } else {
        Readiness::Pending(format!("{} active", active))
    }
}

fn pod_readiness(pod: &Pod) -> Readiness {
    let status = pod.status.as_ref();
    match status.and_then(|s| s.phase.as_deref()) {
        Some("Succeeded") => Readiness::Ready,
        Some("Failed") => Readiness::Failed("pod failed".to_string()),
        _ => {
            let ready = status
                .and_then(|s| s.conditions.as_ref())
                .is_some_and(|c| c.iter().any(|cond| cond.type_ == "Ready" && cond.status == "True"));
            if ready {
                Readiness::Ready
            } else {
                Readiness::Pending("pod not ready".to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn from_json<T: serde::de::DeserializeOwned>(value: serde_json::Value) -> T {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_gvk_of() {
        let gvk = gvk_of("apps/v1", "Deployment");
        assert_eq!((gvk.group.as_str(), gvk.version.as_str()), ("apps", "v1"));

        let gvk = gvk_of("v1", "ConfigMap");
        assert_eq!((gvk.group.as_str(), gvk.version.as_str()), ("", "v1"));

        let gvk = gvk_of("networking.k8s.io/v1", "Ingress");
        assert_eq!(gvk.group, "networking.k8s.io");
    }

    #[test]
    fn test_deployment_readiness() {
        let ready: Deployment = from_json(serde_json::json!({
            "spec": { "replicas": 2, "selector": {}, "template": {} },
            "status": { "readyReplicas": 2, "updatedReplicas": 2, "availableReplicas": 2 }
        }));
        assert_eq!(deployment_readiness(&ready), Readiness::Ready);

        let rolling: Deployment = from_json(serde_json::json!({
            "spec": { "replicas": 2, "selector": {}, "template": {} },
            "status": { "readyReplicas": 2, "updatedReplicas": 1, "availableReplicas": 2 }
        }));
        assert!(matches!(deployment_readiness(&rolling), Readiness::Pending(_)));
    }

    #[test]
    fn test_job_readiness() {
        let done: Job = from_json(serde_json::json!({ "status": { "succeeded": 1 } }));
        assert_eq!(job_readiness(&done), Readiness::Ready);

        let failed: Job = from_json(serde_json::json!({
            "status": { "failed": 3, "conditions": [
                { "type": "Failed", "status": "True", "reason": "BackoffLimitExceeded" }
            ] }
        }));
        assert_eq!(
            job_readiness(&failed),
            Readiness::Failed("job failed: BackoffLimitExceeded".to_string())
        );

        let running: Job = from_json(serde_json::json!({ "status": { "active": 1 } }));
        assert!(matches!(job_readiness(&running), Readiness::Pending(_)));
    }

    #[test]
    fn test_daemonset_needs_scheduled_pods() {
        let empty: DaemonSet = from_json(serde_json::json!({
            "status": {
                "currentNumberScheduled": 0, "desiredNumberScheduled": 0,
                "numberMisscheduled": 0, "numberReady": 0
            }
        }));
        assert!(matches!(daemonset_readiness(&empty), Readiness::Pending(_)));
    }
}
