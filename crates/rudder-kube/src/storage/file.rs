//! File-based storage driver
//!
//! Stores one file per release version under `<base>/<namespace>/<name>/v<N>.json`.
//! Useful for development without a cluster and for offline inspection.

use async_trait::async_trait;
use std::path::{Path, PathBuf};

use super::{StorageConfig, StorageDriver, StoredRecord, already_exists, compress, decompress, not_found};
use crate::error::Result;
use crate::release::Release;

/// File-based storage driver
pub struct FileDriver {
    base_dir: PathBuf,
    config: StorageConfig,
}

impl FileDriver {
    /// Create a driver rooted at `base_dir`, creating it if needed
    pub fn new(base_dir: impl Into<PathBuf>, config: StorageConfig) -> Result<Self> {
        let base_dir = base_dir.into();
        std::fs::create_dir_all(&base_dir)?;
        Ok(Self { base_dir, config })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn release_dir(&self, namespace: &str, name: &str) -> PathBuf {
        self.base_dir.join(namespace).join(name)
    }

    fn release_path(&self, namespace: &str, name: &str, version: u32) -> PathBuf {
        self.release_dir(namespace, name).join(format!("v{}.json", version))
    }

    fn write_release(&self, release: &Release) -> Result<()> {
        let path = self.release_path(&release.namespace, &release.name, release.version);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let json = StoredRecord::encode(release)?;
        let data = compress(&json, self.config.compression)?;

        // write then rename so readers never see a partial record
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, data)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn read_release(&self, path: &Path) -> Result<Release> {
        let data = std::fs::read(path)?;
        let decompressed = decompress(&data, self.config.compression)?;
        StoredRecord::decode(&decompressed)
    }

    fn subdirs(dir: &Path) -> Result<Vec<PathBuf>> {
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        Ok(std::fs::read_dir(dir)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_dir())
            .collect())
    }

    fn remove_if_empty(dir: &Path) {
        if std::fs::read_dir(dir).is_ok_and(|mut entries| entries.next().is_none()) {
            let _ = std::fs::remove_dir(dir);
        }
    }
}

#[async_trait]
impl StorageDriver for FileDriver {
    fn name(&self) -> &'static str {
        "file"
    }

    async fn get(&self, namespace: &str, name: &str, version: u32) -> Result<Release> {
        let path = self.release_path(namespace, name, version);
        if !path.exists() {
            return Err(not_found(namespace, name));
        }
        self.read_release(&path)
    }

    async fn list(&self, namespace: Option<&str>, name: Option<&str>) -> Result<Vec<Release>> {
        let namespaces = match namespace {
            Some(ns) => vec![self.base_dir.join(ns)],
            None => Self::subdirs(&self.base_dir)?,
        };

        let mut releases = Vec::new();
        for ns_path in namespaces {
            let names = match name {
                Some(n) => vec![ns_path.join(n)],
                None => Self::subdirs(&ns_path)?,
            };

            for name_path in names.iter().filter(|p| p.is_dir()) {
                for entry in std::fs::read_dir(name_path)?.filter_map(|e| e.ok()) {
                    let path = entry.path();
                    if path.extension().is_none_or(|e| e != "json") {
                        continue;
                    }
                    match self.read_release(&path) {
                        Ok(release) => releases.push(release),
                        Err(e) => tracing::warn!(path = %path.display(), error = %e, "skipping unreadable release record"),
                    }
                }
            }
        }
        Ok(releases)
    }

    async fn create(&self, release: &Release) -> Result<()> {
        let path = self.release_path(&release.namespace, &release.name, release.version);
        if path.exists() {
            return Err(already_exists(release));
        }
        self.write_release(release)
    }

    async fn update(&self, release: &Release) -> Result<()> {
        let path = self.release_path(&release.namespace, &release.name, release.version);
        if !path.exists() {
            return Err(not_found(&release.namespace, &release.name));
        }
        self.write_release(release)
    }

    async fn delete(&self, namespace: &str, name: &str, version: u32) -> Result<Release> {
        let release = self.get(namespace, name, version).await?;
        std::fs::remove_file(self.release_path(namespace, name, version))?;

        Self::remove_if_empty(&self.release_dir(namespace, name));
        Self::remove_if_empty(&self.base_dir.join(namespace));
        Ok(release)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::KubeError;
    use crate::release::ReleaseStatus;
    use crate::storage::CompressionMethod;
    use crate::storage::tests::test_release;
    use tempfile::TempDir;

    fn driver(tmp: &TempDir) -> FileDriver {
        FileDriver::new(tmp.path(), StorageConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let tmp = TempDir::new().unwrap();
        let driver = driver(&tmp);

        let release = test_release("myapp", 1, ReleaseStatus::Deployed);
        driver.create(&release).await.unwrap();

        assert!(tmp.path().join("default/myapp/v1.json").exists());
        assert_eq!(driver.get("default", "myapp", 1).await.unwrap(), release);
    }

    #[tokio::test]
    async fn test_create_existing_version_fails() {
        let tmp = TempDir::new().unwrap();
        let driver = driver(&tmp);

        let release = test_release("myapp", 1, ReleaseStatus::Deployed);
        driver.create(&release).await.unwrap();
        assert!(matches!(
            driver.create(&release).await,
            Err(KubeError::AlreadyExists { .. })
        ));
    }

    #[tokio::test]
    async fn test_update_missing_fails() {
        let tmp = TempDir::new().unwrap();
        let driver = driver(&tmp);
        let release = test_release("myapp", 1, ReleaseStatus::Deployed);

        assert!(matches!(
            driver.update(&release).await,
            Err(KubeError::ReleaseNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_list_filters() {
        let tmp = TempDir::new().unwrap();
        let driver = driver(&tmp);

        driver.create(&test_release("app1", 1, ReleaseStatus::Superseded)).await.unwrap();
        driver.create(&test_release("app1", 2, ReleaseStatus::Deployed)).await.unwrap();
        driver.create(&test_release("app2", 1, ReleaseStatus::Deployed)).await.unwrap();

        assert_eq!(driver.list(Some("default"), None).await.unwrap().len(), 3);
        assert_eq!(driver.list(None, Some("app1")).await.unwrap().len(), 2);
        assert!(driver.list(Some("missing"), None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_cleans_directories() {
        let tmp = TempDir::new().unwrap();
        let driver = driver(&tmp);

        driver.create(&test_release("myapp", 1, ReleaseStatus::Deployed)).await.unwrap();
        let deleted = driver.delete("default", "myapp", 1).await.unwrap();

        assert_eq!(deleted.version, 1);
        assert!(!tmp.path().join("default").exists());
        assert!(matches!(
            driver.get("default", "myapp", 1).await,
            Err(KubeError::ReleaseNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_uncompressed_records_are_plain_json() {
        let tmp = TempDir::new().unwrap();
        let config = StorageConfig {
            compression: CompressionMethod::None,
            ..Default::default()
        };
        let driver = FileDriver::new(tmp.path(), config).unwrap();
        driver.create(&test_release("myapp", 1, ReleaseStatus::Deployed)).await.unwrap();

        let raw = std::fs::read_to_string(tmp.path().join("default/myapp/v1.json")).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["schema"], "v2");
        assert_eq!(value["name"], "myapp");
    }
}
