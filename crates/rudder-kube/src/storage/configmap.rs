//! Kubernetes ConfigMap storage driver
//!
//! Same layout as the Secrets driver, with the encoded record kept in
//! ConfigMap string data. For clusters where Secret access is restricted.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::Client;
use kube::api::{Api, DeleteParams, ListParams, PostParams};
use std::collections::BTreeMap;

use super::{
    RELEASE_DATA_KEY, StorageConfig, StorageDriver, already_exists, compression_from_labels,
    decode_from_storage, encode_for_storage, label_selector, not_found, storage_labels,
};
use crate::error::{KubeError, Result};
use crate::release::{Release, storage_key};

/// Kubernetes ConfigMap storage driver
pub struct ConfigMapDriver {
    client: Client,
    config: StorageConfig,
}

impl ConfigMapDriver {
    pub async fn new(config: StorageConfig) -> Result<Self> {
        let client = Client::try_default().await?;
        Ok(Self { client, config })
    }

    pub fn with_client(client: Client, config: StorageConfig) -> Self {
        Self { client, config }
    }

    fn api(&self, namespace: &str) -> Api<ConfigMap> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn build_configmap(&self, release: &Release) -> Result<ConfigMap> {
        let encoded = encode_for_storage(release, self.config.compression)?;

        let mut data = BTreeMap::new();
        data.insert(RELEASE_DATA_KEY.to_string(), encoded);

        Ok(ConfigMap {
            metadata: ObjectMeta {
                name: Some(release.storage_key()),
                namespace: Some(release.namespace.clone()),
                labels: Some(storage_labels(release, self.config.compression)),
                ..Default::default()
            },
            data: Some(data),
            ..Default::default()
        })
    }

    fn parse_configmap(&self, cm: &ConfigMap) -> Result<Release> {
        let encoded = cm
            .data
            .as_ref()
            .and_then(|d| d.get(RELEASE_DATA_KEY))
            .ok_or_else(|| KubeError::Storage("configmap has no 'release' data".to_string()))?;

        let compression = compression_from_labels(cm.metadata.labels.as_ref(), self.config.compression);
        decode_from_storage(encoded, compression)
    }
}

#[async_trait]
impl StorageDriver for ConfigMapDriver {
    fn name(&self) -> &'static str {
        "configmap"
    }

    async fn get(&self, namespace: &str, name: &str, version: u32) -> Result<Release> {
        match self.api(namespace).get(&storage_key(name, version)).await {
            Ok(cm) => self.parse_configmap(&cm),
            Err(kube::Error::Api(e)) if e.code == 404 => Err(not_found(namespace, name)),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self, namespace: Option<&str>, name: Option<&str>) -> Result<Vec<Release>> {
        let lp = ListParams::default().labels(&label_selector(name));
        let configmaps = match namespace {
            Some(ns) => self.api(ns).list(&lp).await?,
            None => Api::<ConfigMap>::all(self.client.clone()).list(&lp).await?,
        };

        let mut releases = Vec::with_capacity(configmaps.items.len());
        for cm in &configmaps.items {
            match self.parse_configmap(cm) {
                Ok(release) => releases.push(release),
                Err(e) => tracing::warn!(
                    configmap = cm.metadata.name.as_deref().unwrap_or_default(),
                    error = %e,
                    "skipping unreadable release record"
                ),
            }
        }
        Ok(releases)
    }

    async fn create(&self, release: &Release) -> Result<()> {
        let cm = self.build_configmap(release)?;
        match self.api(&release.namespace).create(&PostParams::default(), &cm).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(e)) if e.code == 409 => Err(already_exists(release)),
            Err(e) => Err(e.into()),
        }
    }

    async fn update(&self, release: &Release) -> Result<()> {
        let cm = self.build_configmap(release)?;
        match self
            .api(&release.namespace)
            .replace(&release.storage_key(), &PostParams::default(), &cm)
            .await
        {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(e)) if e.code == 404 => {
                Err(not_found(&release.namespace, &release.name))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, namespace: &str, name: &str, version: u32) -> Result<Release> {
        let release = self.get(namespace, name, version).await?;
        match self
            .api(namespace)
            .delete(&storage_key(name, version), &DeleteParams::default())
            .await
        {
            Ok(_) => Ok(release),
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(release),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::release::ReleaseStatus;
    use crate::storage::tests::test_release;

    #[tokio::test]
    async fn test_configmap_roundtrip() {
        let kubeconfig = kube::Config::new("http://127.0.0.1:1".parse().unwrap());
        let driver = ConfigMapDriver::with_client(
            Client::try_from(kubeconfig).unwrap(),
            StorageConfig::default(),
        );
        let release = test_release("myapp", 2, ReleaseStatus::Superseded);
        let cm = driver.build_configmap(&release).unwrap();

        assert_eq!(cm.metadata.name.as_deref(), Some("sh.rudder.release.v1.myapp.v2"));
        assert_eq!(cm.metadata.labels.as_ref().unwrap()["name"], "myapp");
        assert_eq!(driver.parse_configmap(&cm).unwrap(), release);
    }
}
