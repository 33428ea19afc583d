//! Release queries over a storage driver

use std::sync::Arc;

use super::{StorageDriver, not_found};
use crate::error::Result;
use crate::release::{Release, ReleaseStatus};

/// Release history queries on top of a [`StorageDriver`]
///
/// Drivers return records in no particular order; everything here sorts
/// by version.
#[derive(Clone)]
pub struct ReleaseStore {
    driver: Arc<dyn StorageDriver>,
}

impl ReleaseStore {
    pub fn new(driver: impl StorageDriver + 'static) -> Self {
        Self {
            driver: Arc::new(driver),
        }
    }

    pub fn from_arc(driver: Arc<dyn StorageDriver>) -> Self {
        Self { driver }
    }

    pub fn driver_name(&self) -> &'static str {
        self.driver.name()
    }

    pub async fn create(&self, release: &Release) -> Result<()> {
        tracing::debug!(release = %release.name, version = release.version, status = %release.status(), "storing release record");
        self.driver.create(release).await
    }

    pub async fn update(&self, release: &Release) -> Result<()> {
        tracing::debug!(release = %release.name, version = release.version, status = %release.status(), "updating release record");
        self.driver.update(release).await
    }

    pub async fn get(&self, namespace: &str, name: &str, version: u32) -> Result<Release> {
        self.driver.get(namespace, name, version).await
    }

    /// All versions of a release, oldest first; `ReleaseNotFound` if none
    pub async fn history(&self, namespace: &str, name: &str) -> Result<Vec<Release>> {
        let mut releases = self.driver.list(Some(namespace), Some(name)).await?;
        if releases.is_empty() {
            return Err(not_found(namespace, name));
        }
        releases.sort_by_key(|r| r.version);
        Ok(releases)
    }

    /// Highest version of a release, whatever its status
    pub async fn last(&self, namespace: &str, name: &str) -> Result<Release> {
        let mut history = self.history(namespace, name).await?;
        history.pop().ok_or_else(|| not_found(namespace, name))
    }

    /// Highest version currently deployed
    pub async fn deployed(&self, namespace: &str, name: &str) -> Result<Release> {
        self.deployed_all(namespace, name)
            .await?
            .pop()
            .ok_or_else(|| not_found(namespace, name))
    }

    /// Every version marked deployed, oldest first
    ///
    /// Normally at most one; more after an interrupted operation.
    pub async fn deployed_all(&self, namespace: &str, name: &str) -> Result<Vec<Release>> {
        Ok(self
            .history(namespace, name)
            .await?
            .into_iter()
            .filter(|r| r.status() == ReleaseStatus::Deployed)
            .collect())
    }

    /// Latest version of each release that satisfies `predicate`
    ///
    /// Sorted by namespace then name.
    pub async fn list_matching(
        &self,
        namespace: Option<&str>,
        predicate: impl Fn(&Release) -> bool,
    ) -> Result<Vec<Release>> {
        let mut all = self.driver.list(namespace, None).await?;
        all.sort_by(|a, b| {
            (&a.namespace, &a.name)
                .cmp(&(&b.namespace, &b.name))
                .then(b.version.cmp(&a.version))
        });
        all.dedup_by(|later, first| later.namespace == first.namespace && later.name == first.name);
        all.retain(|r| predicate(r));
        Ok(all)
    }

    /// Latest version of each release, filtered by status
    ///
    /// An empty `statuses` slice matches everything.
    pub async fn list_filtered(
        &self,
        namespace: Option<&str>,
        statuses: &[ReleaseStatus],
    ) -> Result<Vec<Release>> {
        self.list_matching(namespace, |r| statuses.is_empty() || statuses.contains(&r.status()))
            .await
    }

    pub async fn delete(&self, namespace: &str, name: &str, version: u32) -> Result<Release> {
        self.driver.delete(namespace, name, version).await
    }

    /// Remove every version of a release
    pub async fn purge(&self, namespace: &str, name: &str) -> Result<Vec<Release>> {
        let history = self.history(namespace, name).await?;
        let mut removed = Vec::with_capacity(history.len());
        for release in history {
            removed.push(self.driver.delete(namespace, name, release.version).await?);
        }
        Ok(removed)
    }

    /// Delete the oldest records beyond `max` versions
    ///
    /// The latest deployed version is never pruned. `max == 0` keeps all.
    pub async fn prune_history(&self, namespace: &str, name: &str, max: u32) -> Result<Vec<u32>> {
        let max = max as usize;
        if max == 0 {
            return Ok(Vec::new());
        }

        let history = self.history(namespace, name).await?;
        if history.len() <= max {
            return Ok(Vec::new());
        }

        let keep_deployed = history
            .iter()
            .rev()
            .find(|r| r.status() == ReleaseStatus::Deployed)
            .map(|r| r.version);

        let excess = history.len() - max;
        let mut pruned = Vec::with_capacity(excess);
        for release in history.iter().filter(|r| Some(r.version) != keep_deployed) {
            if pruned.len() == excess {
                break;
            }
            self.driver.delete(namespace, name, release.version).await?;
            pruned.push(release.version);
        }

        if !pruned.is_empty() {
            tracing::debug!(release = name, versions = ?pruned, "pruned release history");
        }
        Ok(pruned)
    }
}
