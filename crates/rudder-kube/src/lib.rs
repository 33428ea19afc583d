//! Rudder Kube - release lifecycle against a cluster
//!
//! This crate provides:
//! - **Release Management**: install, upgrade, rollback, uninstall and test
//!   with versioned history and atomic recovery ([`ReleaseManager`])
//! - **Storage Drivers**: release records in Secrets, ConfigMaps, local files or memory
//! - **Hooks**: weighted lifecycle hooks with delete and failure policies
//! - **Manifests**: splitting rendered output into resources and ordering them
//! - **Post-renderers**: external commands filtering rendered manifests
//! - **Cluster access**: a live client over kube-rs and an in-memory cluster
//! - **Annotations**: `rudder.io/` annotations with `helm.sh/` fallbacks

pub mod actions;
pub mod annotations;
pub mod client;
pub mod cluster;
pub mod error;
pub mod hooks;
pub mod manifest;
pub mod postrender;
pub mod release;
pub mod render;
pub mod storage;

pub use actions::{
    InstallOptions, RenderOptions, RollbackOptions, TestOptions, UninstallOptions, UpgradeOptions,
};
pub use client::{CancelToken, ReleaseManager};
pub use cluster::{ApplyResult, ClusterClient, DeleteResult, KubeCluster, KubeLookup, MemoryCluster};
pub use error::{Action, KubeError, Result};
pub use hooks::{Hook, HookDeletePolicy, HookEvent, HookExecutor, HookFailurePolicy, HookPhase};
pub use manifest::{Resource, ResourceKey, SplitManifest};
pub use postrender::{ExecPostRenderer, PostRenderer};
pub use release::{Release, ReleaseInfo, ReleaseStatus};
pub use render::{Rendered, render_chart, render_release};
pub use storage::{
    CompressionMethod, ConfigMapDriver, DriverKind, FileDriver, MemoryDriver, OperationCounts,
    ReleaseStore, SecretsDriver, StorageConfig, StorageDriver,
};
