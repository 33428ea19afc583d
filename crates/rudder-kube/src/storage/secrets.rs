//! Kubernetes Secrets storage driver
//!
//! The default driver. One Secret per release version, named by
//! [`Release::storage_key`], typed `rudder.io/release.v1`, with the encoded
//! record under the `release` data key.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
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

/// Secret type of release records
pub const SECRET_TYPE: &str = "rudder.io/release.v1";

/// Kubernetes Secrets storage driver
pub struct SecretsDriver {
    client: Client,
    config: StorageConfig,
}

impl SecretsDriver {
    /// Create a driver from the ambient kubeconfig
    pub async fn new(config: StorageConfig) -> Result<Self> {
        let client = Client::try_default().await?;
        Ok(Self { client, config })
    }

    pub fn with_client(client: Client, config: StorageConfig) -> Self {
        Self { client, config }
    }

    fn api(&self, namespace: &str) -> Api<Secret> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn build_secret(&self, release: &Release) -> Result<Secret> {
        let encoded = encode_for_storage(release, self.config.compression)?;

        let mut data = BTreeMap::new();
        data.insert(
            RELEASE_DATA_KEY.to_string(),
            k8s_openapi::ByteString(encoded.into_bytes()),
        );

        Ok(Secret {
            metadata: ObjectMeta {
                name: Some(release.storage_key()),
                namespace: Some(release.namespace.clone()),
                labels: Some(storage_labels(release, self.config.compression)),
                ..Default::default()
            },
            type_: Some(SECRET_TYPE.to_string()),
            data: Some(data),
            ..Default::default()
        })
    }

    fn parse_secret(&self, secret: &Secret) -> Result<Release> {
        let data = secret
            .data
            .as_ref()
            .and_then(|d| d.get(RELEASE_DATA_KEY))
            .ok_or_else(|| KubeError::Storage("secret has no 'release' data".to_string()))?;

        let encoded = std::str::from_utf8(&data.0)
            .map_err(|e| KubeError::Storage(format!("invalid UTF-8 in secret: {}", e)))?;

        let compression = compression_from_labels(secret.metadata.labels.as_ref(), self.config.compression);
        decode_from_storage(encoded, compression)
    }
}

#[async_trait]
impl StorageDriver for SecretsDriver {
    fn name(&self) -> &'static str {
        "secret"
    }

    async fn get(&self, namespace: &str, name: &str, version: u32) -> Result<Release> {
        match self.api(namespace).get(&storage_key(name, version)).await {
            Ok(secret) => self.parse_secret(&secret),
            Err(kube::Error::Api(e)) if e.code == 404 => Err(not_found(namespace, name)),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self, namespace: Option<&str>, name: Option<&str>) -> Result<Vec<Release>> {
        let lp = ListParams::default().labels(&label_selector(name));
        let secrets = match namespace {
            Some(ns) => self.api(ns).list(&lp).await?,
            None => Api::<Secret>::all(self.client.clone()).list(&lp).await?,
        };

        let mut releases = Vec::with_capacity(secrets.items.len());
        for secret in &secrets.items {
            match self.parse_secret(secret) {
                Ok(release) => releases.push(release),
                Err(e) => tracing::warn!(
                    secret = secret.metadata.name.as_deref().unwrap_or_default(),
                    error = %e,
                    "skipping unreadable release record"
                ),
            }
        }
        Ok(releases)
    }

    async fn create(&self, release: &Release) -> Result<()> {
        let secret = self.build_secret(release)?;
        match self.api(&release.namespace).create(&PostParams::default(), &secret).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(e)) if e.code == 409 => Err(already_exists(release)),
            Err(e) => Err(e.into()),
        }
    }

    async fn update(&self, release: &Release) -> Result<()> {
        let secret = self.build_secret(release)?;
        match self
            .api(&release.namespace)
            .replace(&release.storage_key(), &PostParams::default(), &secret)
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
    use crate::storage::CompressionMethod;
    use crate::storage::tests::test_release;

    fn driver(config: StorageConfig) -> SecretsDriver {
        let kubeconfig = kube::Config::new("http://127.0.0.1:1".parse().unwrap());
        SecretsDriver::with_client(Client::try_from(kubeconfig).unwrap(), config)
    }

    #[tokio::test]
    async fn test_build_secret_layout() {
        let driver = driver(StorageConfig::default());
        let release = test_release("myapp", 3, ReleaseStatus::Deployed);
        let secret = driver.build_secret(&release).unwrap();

        assert_eq!(secret.metadata.name.as_deref(), Some("sh.rudder.release.v1.myapp.v3"));
        assert_eq!(secret.type_.as_deref(), Some(SECRET_TYPE));
        let labels = secret.metadata.labels.as_ref().unwrap();
        assert_eq!(labels["owner"], "rudder");
        assert_eq!(labels["status"], "deployed");
        assert_eq!(labels["rudder.io/compression"], "zstd");
    }

    #[tokio::test]
    async fn test_parse_uses_labelled_compression() {
        let writer = driver(StorageConfig {
            compression: CompressionMethod::Gzip { level: 6 },
            ..Default::default()
        });
        let release = test_release("myapp", 1, ReleaseStatus::Failed);
        let secret = writer.build_secret(&release).unwrap();

        // a reader configured differently still decodes via the label
        let reader = driver(StorageConfig::default());
        assert_eq!(reader.parse_secret(&secret).unwrap(), release);
    }

    #[tokio::test]
    async fn test_parse_secret_without_data() {
        let driver = driver(StorageConfig::default());
        assert!(matches!(
            driver.parse_secret(&Secret::default()),
            Err(KubeError::Storage(_))
        ));
    }
}
