//! Lifecycle hooks
//!
//! Hooks are resources annotated with `rudder.io/hook` (or `helm.sh/hook`).
//! They are kept out of the regular resource set and run at their events,
//! ordered by weight and then name.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::annotations::{self, helm, rudder};
use crate::cluster::ClusterClient;
use crate::error::{KubeError, Result};
use crate::manifest::Resource;

/// Lifecycle events a hook can run at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HookEvent {
    PreInstall,
    PostInstall,
    PreUpgrade,
    PostUpgrade,
    PreRollback,
    PostRollback,
    PreDelete,
    PostDelete,
    Test,
}

impl HookEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PreInstall => "pre-install",
            Self::PostInstall => "post-install",
            Self::PreUpgrade => "pre-upgrade",
            Self::PostUpgrade => "post-upgrade",
            Self::PreRollback => "pre-rollback",
            Self::PostRollback => "post-rollback",
            Self::PreDelete => "pre-delete",
            Self::PostDelete => "post-delete",
            Self::Test => "test",
        }
    }

    /// Parse an annotation entry; `test-success` is accepted for `test`
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "pre-install" => Self::PreInstall,
            "post-install" => Self::PostInstall,
            "pre-upgrade" => Self::PreUpgrade,
            "post-upgrade" => Self::PostUpgrade,
            "pre-rollback" => Self::PreRollback,
            "post-rollback" => Self::PostRollback,
            "pre-delete" => Self::PreDelete,
            "post-delete" => Self::PostDelete,
            "test" | "test-success" => Self::Test,
            _ => return None,
        })
    }
}

impl std::fmt::Display for HookEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// When a hook resource is deleted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HookDeletePolicy {
    /// Remove the previous instance before creating a new one
    BeforeHookCreation,
    HookSucceeded,
    HookFailed,
}

impl HookDeletePolicy {
    /// Parse the annotation; absent means before-hook-creation, `never` means none
    fn parse_list(value: Option<&str>) -> Vec<Self> {
        let Some(value) = value else {
            return vec![Self::BeforeHookCreation];
        };
        annotations::parse_list(value)
            .into_iter()
            .filter_map(|p| match p {
                "before-hook-creation" => Some(Self::BeforeHookCreation),
                "hook-succeeded" => Some(Self::HookSucceeded),
                "hook-failed" => Some(Self::HookFailed),
                _ => None,
            })
            .collect()
    }
}

/// What a hook failure does to the operation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HookFailurePolicy {
    /// Abort the operation
    #[default]
    Fail,
    /// Log and continue
    AllowFailure,
}

/// Outcome of the last run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HookPhase {
    #[default]
    Unknown,
    Running,
    Succeeded,
    Failed,
}

/// Last execution of a hook
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HookExecution {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub phase: HookPhase,
}

/// A hook resource with its annotations parsed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hook {
    pub name: String,
    pub kind: String,
    pub events: Vec<HookEvent>,
    #[serde(default)]
    pub weight: i32,
    #[serde(default)]
    pub delete_policies: Vec<HookDeletePolicy>,
    #[serde(default)]
    pub failure_policy: HookFailurePolicy,
    /// Per-hook timeout overriding the operation's hook timeout
    #[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,
    pub resource: Resource,
    #[serde(default)]
    pub last_run: HookExecution,
}

impl Hook {
    /// Build a hook from a resource carrying a hook annotation
    pub fn from_resource(resource: Resource) -> Result<Self> {
        let a = &resource.annotations;
        let raw = annotations::get_annotation(a, rudder::HOOK, helm::HOOK).unwrap_or_default();

        let mut events = Vec::new();
        for entry in annotations::parse_list(raw) {
            let event = HookEvent::parse(entry).ok_or_else(|| KubeError::ManifestParse {
                path: resource.source.clone(),
                message: format!("{}/{}: unknown hook event '{}'", resource.kind, resource.name, entry),
            })?;
            if !events.contains(&event) {
                events.push(event);
            }
        }

        let failure_policy = match a.get(rudder::HOOK_FAILURE_POLICY).map(|s| s.trim()) {
            Some("allow-failure") | Some("continue") => HookFailurePolicy::AllowFailure,
            _ => HookFailurePolicy::Fail,
        };

        Ok(Self {
            name: resource.name.clone(),
            kind: resource.kind.clone(),
            events,
            weight: annotations::parse_weight(a, rudder::HOOK_WEIGHT, helm::HOOK_WEIGHT),
            delete_policies: HookDeletePolicy::parse_list(annotations::get_annotation(
                a,
                rudder::HOOK_DELETE_POLICY,
                helm::HOOK_DELETE_POLICY,
            )),
            failure_policy,
            timeout: a
                .get(rudder::HOOK_TIMEOUT)
                .and_then(|s| annotations::parse_duration(s)),
            resource,
            last_run: HookExecution::default(),
        })
    }

    pub fn runs_at(&self, event: HookEvent) -> bool {
        self.events.contains(&event)
    }

    fn has_policy(&self, policy: HookDeletePolicy) -> bool {
        self.delete_policies.contains(&policy)
    }
}

/// Runs the hooks of one event against a cluster
pub struct HookExecutor<'a> {
    cluster: &'a dyn ClusterClient,
    timeout: Duration,
}

impl<'a> HookExecutor<'a> {
    /// `timeout` applies to hooks without their own
    pub fn new(cluster: &'a dyn ClusterClient, timeout: Duration) -> Self {
        Self { cluster, timeout }
    }

    /// Run every hook registered for `event`, in weight then name order
    ///
    /// Execution records are written back into `hooks`. The first failing
    /// hook with the `fail` policy aborts the event.
    pub async fn run(&self, hooks: &mut [Hook], event: HookEvent) -> Result<()> {
        let mut order: Vec<usize> = (0..hooks.len()).filter(|&i| hooks[i].runs_at(event)).collect();
        order.sort_by(|&a, &b| {
            (hooks[a].weight, &hooks[a].name).cmp(&(hooks[b].weight, &hooks[b].name))
        });

        if !order.is_empty() {
            tracing::info!(event = %event, count = order.len(), "running hooks");
        }

        for i in order {
            let hook = &mut hooks[i];
            match self.run_one(hook).await {
                Ok(()) => tracing::debug!(hook = %hook.name, event = %event, "hook succeeded"),
                Err(e) if hook.failure_policy == HookFailurePolicy::AllowFailure => {
                    tracing::warn!(hook = %hook.name, event = %event, error = %e, "hook failed, continuing");
                }
                Err(e) => {
                    return Err(KubeError::HookFailed {
                        hook: hook.name.clone(),
                        event: event.to_string(),
                        message: e.to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    async fn run_one(&self, hook: &mut Hook) -> Result<()> {
        let resources = std::slice::from_ref(&hook.resource);

        if hook.has_policy(HookDeletePolicy::BeforeHookCreation) {
            self.cluster.delete(resources).await?;
        }

        hook.last_run = HookExecution {
            started_at: Some(Utc::now()),
            completed_at: None,
            phase: HookPhase::Running,
        };

        let timeout = hook.timeout.unwrap_or(self.timeout);
        let outcome = match self.cluster.create(resources).await {
            Ok(_) => self.cluster.wait_for_completion(resources, timeout).await,
            Err(e) => Err(e),
        };

        hook.last_run.completed_at = Some(Utc::now());
        hook.last_run.phase = if outcome.is_ok() {
            HookPhase::Succeeded
        } else {
            HookPhase::Failed
        };

        let cleanup = match outcome {
            Ok(()) => hook.has_policy(HookDeletePolicy::HookSucceeded),
            Err(_) => hook.has_policy(HookDeletePolicy::HookFailed),
        };
        if cleanup && let Err(e) = self.cluster.delete(resources).await {
            tracing::warn!(hook = %hook.name, error = %e, "failed to delete hook resource");
        }

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{ClusterOp, MemoryCluster};
    use crate::manifest::split_manifest;

    fn hook(name: &str, annotations: &str) -> Hook {
        let doc = format!(
            "apiVersion: batch/v1\nkind: Job\nmetadata:\n  name: {}\n  annotations:\n{}",
            name, annotations
        );
        let mut split = split_manifest("web/templates/hooks.yaml", &doc, 0).unwrap();
        split.hooks.remove(0)
    }

    #[test]
    fn test_parse_annotations() {
        let h = hook(
            "migrate",
            "    helm.sh/hook: pre-install,pre-upgrade\n    helm.sh/hook-weight: \"-5\"\n    helm.sh/hook-delete-policy: hook-succeeded,hook-failed\n    rudder.io/hook-timeout: 2m\n",
        );
        assert_eq!(h.events, vec![HookEvent::PreInstall, HookEvent::PreUpgrade]);
        assert_eq!(h.weight, -5);
        assert_eq!(
            h.delete_policies,
            vec![HookDeletePolicy::HookSucceeded, HookDeletePolicy::HookFailed]
        );
        assert_eq!(h.timeout, Some(Duration::from_secs(120)));
        assert_eq!(h.failure_policy, HookFailurePolicy::Fail);
    }

    #[test]
    fn test_default_and_never_delete_policy() {
        let h = hook("a", "    rudder.io/hook: test-success\n");
        assert_eq!(h.events, vec![HookEvent::Test]);
        assert_eq!(h.delete_policies, vec![HookDeletePolicy::BeforeHookCreation]);

        let h = hook("b", "    rudder.io/hook: post-install\n    rudder.io/hook-delete-policy: never\n");
        assert!(h.delete_policies.is_empty());
    }

    #[test]
    fn test_unknown_event_is_rejected() {
        let doc = "apiVersion: batch/v1\nkind: Job\nmetadata:\n  name: x\n  annotations:\n    helm.sh/hook: pre-launch\n";
        let err = split_manifest("web/templates/x.yaml", doc, 0).unwrap_err();
        assert!(err.to_string().contains("unknown hook event 'pre-launch'"));
    }

    #[tokio::test]
    async fn test_hooks_run_in_weight_then_name_order() {
        let cluster = MemoryCluster::new();
        let mut hooks = vec![
            hook("c", "    rudder.io/hook: pre-install\n    rudder.io/hook-weight: \"1\"\n"),
            hook("b", "    rudder.io/hook: pre-install\n"),
            hook("a", "    rudder.io/hook: pre-install\n"),
            hook("z", "    rudder.io/hook: post-install\n"),
        ];

        HookExecutor::new(&cluster, Duration::from_secs(5))
            .run(&mut hooks, HookEvent::PreInstall)
            .await
            .unwrap();

        let created: Vec<String> = cluster
            .journal()
            .into_iter()
            .filter_map(|op| match op {
                ClusterOp::Create(key) => Some(key.name),
                _ => None,
            })
            .collect();
        assert_eq!(created, vec!["a", "b", "c"]);
        assert_eq!(hooks[0].last_run.phase, HookPhase::Succeeded);
        assert_eq!(hooks[3].last_run.phase, HookPhase::Unknown);
    }

    #[tokio::test]
    async fn test_before_hook_creation_leaves_one_instance() {
        let cluster = MemoryCluster::new();
        let mut hooks = vec![hook("migrate", "    rudder.io/hook: pre-upgrade\n")];
        let executor = HookExecutor::new(&cluster, Duration::from_secs(5));

        executor.run(&mut hooks, HookEvent::PreUpgrade).await.unwrap();
        executor.run(&mut hooks, HookEvent::PreUpgrade).await.unwrap();

        assert_eq!(cluster.live_count("Job", "migrate"), 1);
        assert!(cluster
            .journal()
            .iter()
            .any(|op| matches!(op, ClusterOp::Delete(key) if key.name == "migrate")));
    }

    #[tokio::test]
    async fn test_failing_hook_aborts_unless_allowed() {
        let cluster = MemoryCluster::new();
        cluster.fail_hook("migrate");

        let mut hooks = vec![hook(
            "migrate",
            "    rudder.io/hook: pre-install\n    helm.sh/hook-delete-policy: hook-failed\n",
        )];
        let executor = HookExecutor::new(&cluster, Duration::from_secs(5));
        let err = executor.run(&mut hooks, HookEvent::PreInstall).await.unwrap_err();

        assert!(matches!(err, KubeError::HookFailed { ref hook, ref event, .. } if hook == "migrate" && event == "pre-install"));
        assert_eq!(hooks[0].last_run.phase, HookPhase::Failed);
        assert_eq!(cluster.live_count("Job", "migrate"), 0);

        let mut hooks = vec![hook(
            "migrate",
            "    rudder.io/hook: pre-install\n    rudder.io/hook-failure-policy: allow-failure\n",
        )];
        executor.run(&mut hooks, HookEvent::PreInstall).await.unwrap();
        assert_eq!(hooks[0].last_run.phase, HookPhase::Failed);
    }
}
