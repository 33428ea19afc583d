//! Repository index types
//!
//! Helm-compatible `index.yaml`: chart versions grouped by chart name.

use chrono::{DateTime, Utc};
use semver::Version;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::error::{RepoError, Result};

/// Repository index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryIndex {
    #[serde(default = "default_api_version")]
    pub api_version: String,

    #[serde(default = "Utc::now")]
    pub generated: DateTime<Utc>,

    /// Versions indexed by chart name
    #[serde(default)]
    pub entries: BTreeMap<String, Vec<ChartEntry>>,
}

fn default_api_version() -> String {
    "v1".to_string()
}

impl Default for RepositoryIndex {
    fn default() -> Self {
        Self {
            api_version: default_api_version(),
            generated: Utc::now(),
            entries: BTreeMap::new(),
        }
    }
}

impl RepositoryIndex {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(|e| RepoError::IndexParseError {
            message: e.to_string(),
        })
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let yaml = std::str::from_utf8(bytes).map_err(|e| RepoError::IndexParseError {
            message: format!("Invalid UTF-8: {}", e),
        })?;
        Self::from_yaml(yaml)
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Number of chart versions across all charts
    pub fn version_count(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    /// Highest semver version of a chart
    pub fn get_latest(&self, name: &str) -> Option<&ChartEntry> {
        self.entries.get(name)?.iter().max_by(|a, b| compare_versions(a, b))
    }
}

/// Semver order; unparsable versions sort below parsable ones
fn compare_versions(a: &ChartEntry, b: &ChartEntry) -> Ordering {
    let parse = |e: &ChartEntry| Version::parse(&e.version).ok();
    match (parse(a), parse(b)) {
        (Some(va), Some(vb)) => va.cmp(&vb),
        (Some(_), None) => Ordering::Greater,
        (None, Some(_)) => Ordering::Less,
        (None, None) => a.version.cmp(&b.version),
    }
}

/// One chart version in the index
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartEntry {
    pub name: String,

    pub version: String,

    #[serde(default)]
    pub app_version: Option<String>,

    #[serde(default)]
    pub description: Option<String>,

    /// Archive download URLs, absolute or relative to the repository
    #[serde(default)]
    pub urls: Vec<String>,

    /// SHA256 digest of the archive
    #[serde(default)]
    pub digest: Option<String>,

    #[serde(default)]
    pub created: Option<DateTime<Utc>>,

    #[serde(default)]
    pub deprecated: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_index() -> RepositoryIndex {
        let yaml = r#"
apiVersion: v1
generated: "2024-01-01T00:00:00Z"
entries:
  nginx:
    - name: nginx
      version: "15.0.0"
      appVersion: "1.25.0"
      description: NGINX Open Source
      urls:
        - https://example.com/charts/nginx-15.0.0.tgz
      digest: "sha256:abc123"
    - name: nginx
      version: "14.0.0"
      appVersion: "1.24.0"
      urls:
        - https://example.com/charts/nginx-14.0.0.tgz
  redis:
    - name: redis
      version: "17.0.0"
      description: Redis database
      urls:
        - redis-17.0.0.tgz
"#;
        RepositoryIndex::from_yaml(yaml).unwrap()
    }

    #[test]
    fn test_parse_index() {
        let index = sample_index();
        assert_eq!(index.entries.len(), 2);
        assert_eq!(index.version_count(), 3);
        assert_eq!(
            index.get_latest("redis").unwrap().urls,
            vec!["redis-17.0.0.tgz".to_string()]
        );
    }

    #[test]
    fn test_get_latest() {
        let index = sample_index();
        assert_eq!(index.get_latest("nginx").unwrap().version, "15.0.0");
        assert!(index.get_latest("postgresql").is_none());
    }

    #[test]
    fn test_unparsable_versions_rank_lowest() {
        let index = RepositoryIndex::from_yaml(
            "entries:\n  app:\n    - name: app\n      version: nightly\n    - name: app\n      version: 0.1.0\n",
        )
        .unwrap();
        assert_eq!(index.get_latest("app").unwrap().version, "0.1.0");
    }

    #[test]
    fn test_invalid_index() {
        assert!(matches!(
            RepositoryIndex::from_yaml("entries: [not, a, map]"),
            Err(RepoError::IndexParseError { .. })
        ));
        assert!(RepositoryIndex::from_bytes(&[0xff, 0xfe]).is_err());
    }
}
