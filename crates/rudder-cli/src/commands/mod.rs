//! CLI commands

use console::style;
use rudder_core::{Chart, ValueOverrides};
use rudder_engine::Engine;
use rudder_kube::{
    CancelToken, ConfigMapDriver, DriverKind, ExecPostRenderer, FileDriver, KubeCluster,
    KubeLookup, MemoryDriver, ReleaseManager, ReleaseStore, SecretsDriver, StorageConfig,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{CliError, Result};

pub mod template;

// Release lifecycle
pub mod install;
pub mod upgrade;
pub mod rollback;
pub mod uninstall;
pub mod test;

// Release queries
pub mod history;
pub mod status;
pub mod list;
pub mod values;

// Repository management
pub mod repo;

/// Settings shared by release commands
pub struct Context {
    pub namespace: String,
    pub driver: DriverKind,
    pub storage_dir: Option<PathBuf>,
    pub post_renderer: Option<(String, Vec<String>)>,
}

impl Context {
    /// Release store for read-only commands
    pub async fn store(&self) -> Result<ReleaseStore> {
        let config = StorageConfig::default();
        let store = match self.driver {
            DriverKind::Secret => ReleaseStore::new(SecretsDriver::new(config).await?),
            DriverKind::ConfigMap => ReleaseStore::new(ConfigMapDriver::new(config).await?),
            DriverKind::File => ReleaseStore::new(FileDriver::new(self.storage_path()?, config)?),
            DriverKind::Memory => ReleaseStore::new(MemoryDriver::new()),
        };
        tracing::debug!(driver = store.driver_name(), "release store ready");
        Ok(store)
    }

    /// Release manager against the current kubeconfig cluster
    ///
    /// Ctrl-C stops waiting; the action still records its outcome.
    pub async fn manager(&self) -> Result<ReleaseManager> {
        let cluster = KubeCluster::try_default().await?;
        let client = cluster.client().clone();

        let config = StorageConfig::default();
        let store = match self.driver {
            DriverKind::Secret => ReleaseStore::new(SecretsDriver::with_client(client.clone(), config)),
            DriverKind::ConfigMap => {
                ReleaseStore::new(ConfigMapDriver::with_client(client.clone(), config))
            }
            DriverKind::File => ReleaseStore::new(FileDriver::new(self.storage_path()?, config)?),
            DriverKind::Memory => ReleaseStore::new(MemoryDriver::new()),
        };

        let engine = Engine::builder()
            .strict(true)
            .lookup(Arc::new(KubeLookup::new(
                client,
                tokio::runtime::Handle::current(),
            )))
            .build();

        let mut manager = ReleaseManager::new(store, Arc::new(cluster), engine);
        if let Some((command, args)) = &self.post_renderer {
            manager = manager.with_post_renderer(Arc::new(ExecPostRenderer::new(command.clone(), args.clone())));
        }

        let token = CancelToken::new();
        let on_interrupt = token.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!(
                    "{} Interrupted; the operation continues in the cluster and will record its result",
                    style("!").yellow().bold()
                );
                on_interrupt.cancel();
            }
        });
        Ok(manager.cancellable(token))
    }

    fn storage_path(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.storage_dir {
            return Ok(dir.clone());
        }
        let data_dir = dirs::data_dir()
            .ok_or_else(|| CliError::validation("could not determine data directory; pass --storage-dir"))?;
        Ok(data_dir.join("rudder").join("releases"))
    }
}

/// Chart plus user value layers
pub fn load_chart(path: &Path, values_files: &[PathBuf], set: &[String]) -> Result<(Chart, ValueOverrides)> {
    let chart = Chart::load(path)?;
    tracing::debug!(chart = chart.name(), version = %chart.version(), path = %path.display(), "chart loaded");

    let overrides = ValueOverrides::from_sources(values_files, set).map_err(|e| CliError::Validation {
        message: e.to_string(),
        help: Some("values files must be YAML maps; --set takes key=value".to_string()),
    })?;
    Ok((chart, overrides))
}
