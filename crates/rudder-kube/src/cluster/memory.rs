//! In-memory cluster for tests and dry runs

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use super::{ApplyResult, ClusterClient, DeleteResult, orphans};
use crate::error::{KubeError, Result};
use crate::manifest::{Resource, ResourceKey};

/// One recorded call
#[derive(Debug, Clone, PartialEq)]
pub enum ClusterOp {
    Create(ResourceKey),
    Update(ResourceKey),
    Delete(ResourceKey),
    Wait(Vec<ResourceKey>),
    WaitForCompletion(ResourceKey),
    CreateNamespace(String),
}

#[derive(Default)]
struct State {
    live: BTreeMap<ResourceKey, Resource>,
    namespaces: BTreeSet<String>,
    journal: Vec<ClusterOp>,
    fail_create: bool,
    fail_update: bool,
    fail_wait: bool,
    unreachable: bool,
    failing_hooks: HashSet<String>,
    wait_delay: Option<Duration>,
}

/// Cluster that keeps objects in memory and journals every call
///
/// Clones share state, so a test can keep a handle while the release
/// manager owns another. Failures can be injected per operation.
#[derive(Clone, Default)]
pub struct MemoryCluster {
    state: Arc<Mutex<State>>,
}

impl MemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Make every create fail
    pub fn set_fail_create(&self, fail: bool) {
        self.lock().fail_create = fail;
    }

    /// Make every update fail before touching anything
    pub fn set_fail_update(&self, fail: bool) {
        self.lock().fail_update = fail;
    }

    /// Make readiness waits time out
    pub fn set_fail_wait(&self, fail: bool) {
        self.lock().fail_wait = fail;
    }

    /// Make the named hook's run fail
    pub fn fail_hook(&self, name: &str) {
        self.lock().failing_hooks.insert(name.to_string());
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.lock().unreachable = unreachable;
    }

    /// Delay readiness waits, to hold an operation open
    pub fn set_wait_delay(&self, delay: Duration) {
        self.lock().wait_delay = Some(delay);
    }

    /// Every call so far, in order
    pub fn journal(&self) -> Vec<ClusterOp> {
        self.lock().journal.clone()
    }

    pub fn clear_journal(&self) {
        self.lock().journal.clear();
    }

    /// Keys of deleted objects, in deletion order
    pub fn deletions(&self) -> Vec<ResourceKey> {
        self.lock()
            .journal
            .iter()
            .filter_map(|op| match op {
                ClusterOp::Delete(key) => Some(key.clone()),
                _ => None,
            })
            .collect()
    }

    /// Keys of live objects
    pub fn live(&self) -> Vec<ResourceKey> {
        self.lock().live.keys().cloned().collect()
    }

    /// Live objects of this kind and name, across namespaces
    pub fn live_count(&self, kind: &str, name: &str) -> usize {
        self.lock()
            .live
            .keys()
            .filter(|k| k.kind == kind && k.name == name)
            .count()
    }

    pub fn get(&self, kind: &str, name: &str) -> Option<Resource> {
        self.lock()
            .live
            .values()
            .find(|r| r.kind == kind && r.name == name)
            .cloned()
    }

    pub fn namespaces(&self) -> Vec<String> {
        self.lock().namespaces.iter().cloned().collect()
    }
}

fn failed(resource: &Resource, message: &str) -> KubeError {
    KubeError::ResourceFailed {
        resource: resource.key().to_string(),
        message: message.to_string(),
    }
}

#[async_trait]
impl ClusterClient for MemoryCluster {
    async fn create(&self, resources: &[Resource]) -> Result<ApplyResult> {
        let mut state = self.lock();
        let mut result = ApplyResult::default();

        for r in resources {
            if state.fail_create {
                return Err(failed(r, "create rejected"));
            }
            let key = r.key();
            let existed = state.live.insert(key.clone(), r.clone()).is_some();
            state.journal.push(ClusterOp::Create(key.clone()));
            if existed {
                result.updated.push(key);
            } else {
                result.created.push(key);
            }
        }
        Ok(result)
    }

    async fn update(&self, current: &[Resource], target: &[Resource], _force: bool) -> Result<ApplyResult> {
        let mut state = self.lock();
        let mut result = ApplyResult::default();

        if state.fail_update
            && let Some(first) = target.first()
        {
            return Err(failed(first, "update rejected"));
        }

        for r in target {
            let key = r.key();
            if state.live.insert(key.clone(), r.clone()).is_some() {
                state.journal.push(ClusterOp::Update(key.clone()));
                result.updated.push(key);
            } else {
                state.journal.push(ClusterOp::Create(key.clone()));
                result.created.push(key);
            }
        }

        for r in orphans(current, target).into_iter().rev() {
            if r.is_kept() {
                continue;
            }
            let key = r.key();
            if state.live.remove(&key).is_some() {
                state.journal.push(ClusterOp::Delete(key.clone()));
                result.deleted.push(key);
            }
        }
        Ok(result)
    }

    async fn delete(&self, resources: &[Resource]) -> Result<DeleteResult> {
        let mut state = self.lock();
        let mut result = DeleteResult::default();

        for r in resources {
            let key = r.key();
            if r.is_kept() {
                result.skipped.push((key, "resource-policy: keep".to_string()));
            } else if state.live.remove(&key).is_some() {
                state.journal.push(ClusterOp::Delete(key.clone()));
                result.deleted.push(key);
            } else {
                result.skipped.push((key, "not found".to_string()));
            }
        }
        Ok(result)
    }

    async fn wait(&self, resources: &[Resource], timeout: Duration) -> Result<()> {
        let keys: Vec<ResourceKey> = resources.iter().map(Resource::key).collect();
        let delay = {
            let mut state = self.lock();
            state.journal.push(ClusterOp::Wait(keys.clone()));
            state.wait_delay
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.lock().fail_wait {
            return Err(KubeError::WaitTimeout {
                timeout,
                pending: keys.iter().map(ToString::to_string).collect(),
            });
        }
        Ok(())
    }

    async fn wait_for_completion(&self, resources: &[Resource], _timeout: Duration) -> Result<()> {
        let mut state = self.lock();
        for r in resources {
            state.journal.push(ClusterOp::WaitForCompletion(r.key()));
            if state.failing_hooks.contains(&r.name) {
                return Err(failed(r, "job failed: BackoffLimitExceeded"));
            }
        }
        Ok(())
    }

    async fn create_namespace(&self, namespace: &str) -> Result<()> {
        let mut state = self.lock();
        if state.namespaces.insert(namespace.to_string()) {
            state.journal.push(ClusterOp::CreateNamespace(namespace.to_string()));
        }
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        if self.lock().unreachable {
            return Err(KubeError::ClusterUnreachable("connection refused".to_string()));
        }
        Ok(())
    }
}
