//! In-memory storage driver
//!
//! Keeps records in a process-local map. Used by tests, dry runs and
//! `--driver memory`.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

use super::{StorageDriver, already_exists, not_found};
use crate::error::Result;
use crate::release::Release;

type Records = HashMap<String, HashMap<String, BTreeMap<u32, Release>>>;

/// In-memory storage driver
#[derive(Clone, Default)]
pub struct MemoryDriver {
    /// namespace -> name -> version -> release
    store: Arc<RwLock<Records>>,
    operations: Arc<RwLock<OperationCounts>>,
}

/// Counts of operations performed, for assertions
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct OperationCounts {
    pub gets: usize,
    pub lists: usize,
    pub creates: usize,
    pub updates: usize,
    pub deletes: usize,
}

impl MemoryDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create with pre-populated releases
    pub async fn with_releases(releases: Vec<Release>) -> Self {
        let driver = Self::new();
        {
            let mut store = driver.store.write().await;
            for release in releases {
                store
                    .entry(release.namespace.clone())
                    .or_default()
                    .entry(release.name.clone())
                    .or_default()
                    .insert(release.version, release);
            }
        }
        driver
    }

    pub async fn operation_counts(&self) -> OperationCounts {
        self.operations.read().await.clone()
    }

    pub async fn reset_counts(&self) {
        *self.operations.write().await = OperationCounts::default();
    }

    /// Number of stored records across all releases
    pub async fn release_count(&self) -> usize {
        self.store
            .read()
            .await
            .values()
            .flat_map(|ns| ns.values())
            .map(|versions| versions.len())
            .sum()
    }

    async fn count(&self, op: impl FnOnce(&mut OperationCounts)) {
        op(&mut *self.operations.write().await);
    }
}

#[async_trait]
impl StorageDriver for MemoryDriver {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, namespace: &str, name: &str, version: u32) -> Result<Release> {
        self.count(|c| c.gets += 1).await;

        self.store
            .read()
            .await
            .get(namespace)
            .and_then(|ns| ns.get(name))
            .and_then(|versions| versions.get(&version))
            .cloned()
            .ok_or_else(|| not_found(namespace, name))
    }

    async fn list(&self, namespace: Option<&str>, name: Option<&str>) -> Result<Vec<Release>> {
        self.count(|c| c.lists += 1).await;

        let store = self.store.read().await;
        Ok(store
            .iter()
            .filter(|(ns, _)| namespace.is_none_or(|n| n == ns.as_str()))
            .flat_map(|(_, names)| names.iter())
            .filter(|(n, _)| name.is_none_or(|filter| filter == n.as_str()))
            .flat_map(|(_, versions)| versions.values())
            .cloned()
            .collect())
    }

    async fn create(&self, release: &Release) -> Result<()> {
        self.count(|c| c.creates += 1).await;

        let mut store = self.store.write().await;
        let versions = store
            .entry(release.namespace.clone())
            .or_default()
            .entry(release.name.clone())
            .or_default();

        if versions.contains_key(&release.version) {
            return Err(already_exists(release));
        }
        versions.insert(release.version, release.clone());
        Ok(())
    }

    async fn update(&self, release: &Release) -> Result<()> {
        self.count(|c| c.updates += 1).await;

        let mut store = self.store.write().await;
        let slot = store
            .get_mut(&release.namespace)
            .and_then(|ns| ns.get_mut(&release.name))
            .and_then(|versions| versions.get_mut(&release.version))
            .ok_or_else(|| not_found(&release.namespace, &release.name))?;
        *slot = release.clone();
        Ok(())
    }

    async fn delete(&self, namespace: &str, name: &str, version: u32) -> Result<Release> {
        self.count(|c| c.deletes += 1).await;

        let mut store = self.store.write().await;
        let names = store.get_mut(namespace).ok_or_else(|| not_found(namespace, name))?;
        let versions = names.get_mut(name).ok_or_else(|| not_found(namespace, name))?;
        let release = versions
            .remove(&version)
            .ok_or_else(|| not_found(namespace, name))?;
        if versions.is_empty() {
            names.remove(name);
        }
        Ok(release)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::KubeError;
    use crate::release::ReleaseStatus;
    use crate::storage::tests::test_release;

    #[tokio::test]
    async fn test_create_and_get() {
        let driver = MemoryDriver::new();
        let release = test_release("myapp", 1, ReleaseStatus::Deployed);
        driver.create(&release).await.unwrap();

        assert_eq!(driver.get("default", "myapp", 1).await.unwrap(), release);
        assert!(matches!(
            driver.get("default", "myapp", 2).await,
            Err(KubeError::ReleaseNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_create_duplicate_version_fails() {
        let driver = MemoryDriver::new();
        let release = test_release("myapp", 1, ReleaseStatus::Deployed);
        driver.create(&release).await.unwrap();

        let err = driver.create(&release).await.unwrap_err();
        assert!(matches!(err, KubeError::AlreadyExists { version: 1, .. }));
    }

    #[tokio::test]
    async fn test_update_requires_existing_record() {
        let driver = MemoryDriver::new();
        let mut release = test_release("myapp", 1, ReleaseStatus::PendingInstall);
        assert!(driver.update(&release).await.is_err());

        driver.create(&release).await.unwrap();
        release.info.status = ReleaseStatus::Deployed;
        driver.update(&release).await.unwrap();
        assert_eq!(
            driver.get("default", "myapp", 1).await.unwrap().status(),
            ReleaseStatus::Deployed
        );
    }

    #[tokio::test]
    async fn test_list_filters() {
        let mut other_ns = test_release("myapp", 1, ReleaseStatus::Deployed);
        other_ns.namespace = "staging".to_string();
        let driver = MemoryDriver::with_releases(vec![
            test_release("myapp", 1, ReleaseStatus::Superseded),
            test_release("myapp", 2, ReleaseStatus::Deployed),
            test_release("other", 1, ReleaseStatus::Deployed),
            other_ns,
        ])
        .await;

        assert_eq!(driver.list(None, None).await.unwrap().len(), 4);
        assert_eq!(driver.list(Some("default"), None).await.unwrap().len(), 3);
        assert_eq!(driver.list(Some("default"), Some("myapp")).await.unwrap().len(), 2);
        assert_eq!(driver.list(None, Some("myapp")).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_operation_counts() {
        let driver = MemoryDriver::new();
        let release = test_release("myapp", 1, ReleaseStatus::Deployed);
        driver.create(&release).await.unwrap();
        driver.get("default", "myapp", 1).await.unwrap();
        driver.delete("default", "myapp", 1).await.unwrap();

        let counts = driver.operation_counts().await;
        assert_eq!((counts.creates, counts.gets, counts.deletes), (1, 1, 1));
        assert_eq!(driver.release_count().await, 0);

        driver.reset_counts().await;
        assert_eq!(driver.operation_counts().await, OperationCounts::default());
    }
}
