//! Storage drivers for persisting release records
//!
//! - **Secret** (default): one Secret per release version, like Helm
//! - **ConfigMap**: one ConfigMap per release version
//! - **File**: JSON files under a local directory
//! - **Memory**: in-process map for tests and dry runs
//!
//! Kubernetes drivers store each record as JSON, compressed, then base64
//! encoded, under the data key `release`. Records carry a schema tag so
//! that older layouts still decode.

mod configmap;
mod file;
mod memory;
mod schema;
mod secrets;
mod store;

pub use configmap::ConfigMapDriver;
pub use file::FileDriver;
pub use memory::{MemoryDriver, OperationCounts};
pub use schema::{LegacyRecord, StoredRecord};
pub use secrets::SecretsDriver;
pub use store::ReleaseStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{KubeError, Result};
use crate::release::Release;

/// Data key holding the encoded record
pub const RELEASE_DATA_KEY: &str = "release";

/// `owner` label value on every record object
pub const OWNER: &str = "rudder";

/// Label recording how the payload is compressed
pub const COMPRESSION_LABEL: &str = "rudder.io/compression";

/// Persistence for release records, one record per name and version
///
/// Drivers only store and fetch. Ordering and queries live in
/// [`ReleaseStore`].
#[async_trait]
pub trait StorageDriver: Send + Sync {
    /// Driver name, e.g. `secret`
    fn name(&self) -> &'static str;

    /// Fetch one version; `ReleaseNotFound` if absent
    async fn get(&self, namespace: &str, name: &str, version: u32) -> Result<Release>;

    /// All records, optionally restricted to a namespace and a release name
    async fn list(&self, namespace: Option<&str>, name: Option<&str>) -> Result<Vec<Release>>;

    /// Store a new record; `AlreadyExists` if that version is stored
    async fn create(&self, release: &Release) -> Result<()>;

    /// Replace a stored record; `ReleaseNotFound` if absent
    async fn update(&self, release: &Release) -> Result<()>;

    /// Remove one version and return it
    async fn delete(&self, namespace: &str, name: &str, version: u32) -> Result<Release>;
}

/// Which driver to use
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriverKind {
    #[default]
    Secret,
    ConfigMap,
    File,
    Memory,
}

impl std::str::FromStr for DriverKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "secret" | "secrets" => Ok(Self::Secret),
            "configmap" | "configmaps" => Ok(Self::ConfigMap),
            "file" => Ok(Self::File),
            "memory" => Ok(Self::Memory),
            other => Err(format!(
                "unknown storage driver '{}' (expected secret, configmap, file or memory)",
                other
            )),
        }
    }
}

impl std::fmt::Display for DriverKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Secret => "secret",
            Self::ConfigMap => "configmap",
            Self::File => "file",
            Self::Memory => "memory",
        })
    }
}

/// Storage configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StorageConfig {
    pub compression: CompressionMethod,

    /// Versions kept per release; 0 keeps everything
    pub max_history: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            compression: CompressionMethod::Zstd { level: 3 },
            max_history: 10,
        }
    }
}

/// Compression method for record payloads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "lowercase")]
pub enum CompressionMethod {
    None,

    /// Gzip compression (Helm-compatible)
    Gzip { level: u32 },

    /// Zstd compression
    Zstd { level: i32 },
}

impl Default for CompressionMethod {
    fn default() -> Self {
        Self::Zstd { level: 3 }
    }
}

impl CompressionMethod {
    pub fn label(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Gzip { .. } => "gzip",
            Self::Zstd { .. } => "zstd",
        }
    }

    /// Method named by a label; levels only matter when compressing
    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "none" => Some(Self::None),
            "gzip" => Some(Self::Gzip { level: 6 }),
            "zstd" => Some(Self::Zstd { level: 3 }),
            _ => None,
        }
    }
}

/// Compress data using the configured method
pub fn compress(data: &[u8], method: CompressionMethod) -> Result<Vec<u8>> {
    match method {
        CompressionMethod::None => Ok(data.to_vec()),
        CompressionMethod::Gzip { level } => {
            use std::io::Write;
            let mut encoder =
                flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::new(level));
            encoder
                .write_all(data)
                .map_err(|e| KubeError::Compression(e.to_string()))?;
            encoder
                .finish()
                .map_err(|e| KubeError::Compression(e.to_string()))
        }
        CompressionMethod::Zstd { level } => zstd::encode_all(std::io::Cursor::new(data), level)
            .map_err(|e| KubeError::Compression(e.to_string())),
    }
}

/// Decompress data
pub fn decompress(data: &[u8], method: CompressionMethod) -> Result<Vec<u8>> {
    match method {
        CompressionMethod::None => Ok(data.to_vec()),
        CompressionMethod::Gzip { .. } => {
            use std::io::Read;
            let mut decoder = flate2::read::GzDecoder::new(data);
            let mut decompressed = Vec::new();
            decoder
                .read_to_end(&mut decompressed)
                .map_err(|e| KubeError::Compression(e.to_string()))?;
            Ok(decompressed)
        }
        CompressionMethod::Zstd { .. } => zstd::decode_all(std::io::Cursor::new(data))
            .map_err(|e| KubeError::Compression(e.to_string())),
    }
}

/// Encode a release for storage (tag schema, serialize, compress, base64)
pub fn encode_for_storage(release: &Release, compression: CompressionMethod) -> Result<String> {
    let json = StoredRecord::encode(release)?;
    let compressed = compress(&json, compression)?;
    Ok(base64::Engine::encode(
        &base64::engine::general_purpose::STANDARD,
        &compressed,
    ))
}

/// Decode a stored record (base64, decompress, deserialize any schema)
pub fn decode_from_storage(data: &str, compression: CompressionMethod) -> Result<Release> {
    let decoded = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, data.trim())
        .map_err(|e| KubeError::Serialization(format!("base64 decode error: {}", e)))?;
    let decompressed = decompress(&decoded, compression)?;
    StoredRecord::decode(&decompressed)
}

/// Labels on every stored record object
pub fn storage_labels(release: &Release, compression: CompressionMethod) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert("owner".to_string(), OWNER.to_string());
    labels.insert("name".to_string(), release.name.clone());
    labels.insert("version".to_string(), release.version.to_string());
    labels.insert("status".to_string(), release.status().to_string());
    labels.insert(COMPRESSION_LABEL.to_string(), compression.label().to_string());
    labels
}

/// Label selector for all records, or those of one release
pub fn label_selector(name: Option<&str>) -> String {
    match name {
        Some(name) => format!("owner={},name={}", OWNER, name),
        None => format!("owner={}", OWNER),
    }
}

/// Compression named by an object's labels, falling back to `default`
pub fn compression_from_labels(
    labels: Option<&BTreeMap<String, String>>,
    default: CompressionMethod,
) -> CompressionMethod {
    labels
        .and_then(|l| l.get(COMPRESSION_LABEL))
        .and_then(|c| CompressionMethod::from_label(c))
        .unwrap_or(default)
}

fn not_found(namespace: &str, name: &str) -> KubeError {
    KubeError::ReleaseNotFound {
        name: name.to_string(),
        namespace: namespace.to_string(),
    }
}

fn already_exists(release: &Release) -> KubeError {
    KubeError::AlreadyExists {
        name: release.name.clone(),
        namespace: release.namespace.clone(),
        version: release.version,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::release::ReleaseStatus;
    use rudder_core::{Chart, archive::FileMap};

    pub(crate) fn test_chart() -> Chart {
        let mut files = FileMap::new();
        files.insert(
            "Chart.yaml".to_string(),
            b"apiVersion: rudder/v1\nmetadata:\n  name: web\n  version: 1.0.0\n".to_vec(),
        );
        files.insert(
            "templates/cm.yaml".to_string(),
            b"apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: {{ release.name }}\n".to_vec(),
        );
        Chart::from_files(files).unwrap()
    }

    pub(crate) fn test_release(name: &str, version: u32, status: ReleaseStatus) -> Release {
        let mut release = Release::for_install(name, "default", version, test_chart());
        release.manifest = "apiVersion: v1\nkind: ConfigMap\n".to_string();
        release.info.status = status;
        release
    }

    #[test]
    fn test_compression_roundtrip() {
        let data = b"Hello, World! This is test data for compression.";
        for method in [
            CompressionMethod::None,
            CompressionMethod::Gzip { level: 6 },
            CompressionMethod::Zstd { level: 3 },
        ] {
            let compressed = compress(data, method).unwrap();
            assert_eq!(decompress(&compressed, method).unwrap(), data);
        }
    }

    #[test]
    fn test_encode_decode_preserves_release() {
        let mut release = test_release("myapp", 2, ReleaseStatus::Failed);
        release.info.description = "Release \"myapp\" failed: boom".to_string();
        release.labels.insert("env".to_string(), "prod".to_string());

        for method in [CompressionMethod::Gzip { level: 6 }, CompressionMethod::Zstd { level: 3 }] {
            let encoded = encode_for_storage(&release, method).unwrap();
            assert_eq!(decode_from_storage(&encoded, method).unwrap(), release);
        }
    }

    #[test]
    fn test_large_manifest_compresses() {
        let mut release = test_release("myapp", 1, ReleaseStatus::Deployed);
        release.manifest = "apiVersion: v1\nkind: ConfigMap\n".repeat(1000);

        let encoded = encode_for_storage(&release, CompressionMethod::default()).unwrap();
        assert!(encoded.len() < release.manifest.len());
    }

    #[test]
    fn test_decode_invalid_input() {
        assert!(decode_from_storage("not valid base64!!!", CompressionMethod::None).is_err());

        let invalid = base64::Engine::encode(&base64::engine::general_purpose::STANDARD, b"not json");
        assert!(decode_from_storage(&invalid, CompressionMethod::None).is_err());
    }

    #[test]
    fn test_storage_labels() {
        let release = test_release("myapp", 3, ReleaseStatus::Superseded);
        let labels = storage_labels(&release, CompressionMethod::Gzip { level: 6 });

        assert_eq!(labels["owner"], "rudder");
        assert_eq!(labels["name"], "myapp");
        assert_eq!(labels["version"], "3");
        assert_eq!(labels["status"], "superseded");
        assert_eq!(
            compression_from_labels(Some(&labels), CompressionMethod::None),
            CompressionMethod::Gzip { level: 6 }
        );
        assert_eq!(label_selector(Some("myapp")), "owner=rudder,name=myapp");
    }

    #[test]
    fn test_driver_kind_parse() {
        assert_eq!("Secrets".parse::<DriverKind>().unwrap(), DriverKind::Secret);
        assert_eq!("configmap".parse::<DriverKind>().unwrap(), DriverKind::ConfigMap);
        assert!("sql".parse::<DriverKind>().is_err());
    }
}
