//! Repository configuration
//!
//! Stored in `~/.config/rudder/repositories.yaml`; refreshed indexes are
//! cached under `~/.cache/rudder/repository`.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use url::Url;

use crate::error::{RepoError, Result};

/// Repository configuration file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryConfig {
    #[serde(default = "default_api_version")]
    pub api_version: String,

    /// Fail a refresh when any repository cannot be fetched
    #[serde(default)]
    pub fail_on_any: bool,

    #[serde(default)]
    pub repositories: Vec<Repository>,
}

fn default_api_version() -> String {
    "rudder/v1".to_string()
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            api_version: default_api_version(),
            fail_on_any: false,
            repositories: Vec::new(),
        }
    }
}

impl RepositoryConfig {
    /// Load configuration from default location
    pub fn load() -> Result<Self> {
        Self::load_or_default(&Self::default_path()?)
    }

    /// Load from `path`, or an empty configuration when it does not exist yet
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load_from(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&content)?;
        for repo in &config.repositories {
            repo.validate()?;
        }
        Ok(config)
    }

    /// Save configuration to a specific path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir().ok_or_else(|| RepoError::InvalidConfig {
            message: "Could not determine config directory".to_string(),
        })?;
        Ok(config_dir.join("rudder").join("repositories.yaml"))
    }

    /// Directory refreshed indexes are written to
    pub fn default_cache_dir() -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir().ok_or_else(|| RepoError::InvalidConfig {
            message: "Could not determine cache directory".to_string(),
        })?;
        Ok(cache_dir.join("rudder").join("repository"))
    }

    pub fn get(&self, name: &str) -> Option<&Repository> {
        self.repositories.iter().find(|r| r.name == name)
    }

    pub fn add(&mut self, repo: Repository) -> Result<()> {
        if self.get(&repo.name).is_some() {
            return Err(RepoError::RepositoryAlreadyExists {
                name: repo.name.clone(),
            });
        }
        self.repositories.push(repo);
        Ok(())
    }

    pub fn remove(&mut self, name: &str) -> Result<Repository> {
        let idx = self
            .repositories
            .iter()
            .position(|r| r.name == name)
            .ok_or_else(|| RepoError::RepositoryNotFound {
                name: name.to_string(),
            })?;
        Ok(self.repositories.remove(idx))
    }

    /// Repositories named in `names`, or all of them when empty
    pub fn select(&self, names: &[String]) -> Result<Vec<Repository>> {
        if names.is_empty() {
            return Ok(self.repositories.clone());
        }
        names
            .iter()
            .map(|name| {
                self.get(name).cloned().ok_or_else(|| RepoError::RepositoryNotFound {
                    name: name.clone(),
                })
            })
            .collect()
    }
}

/// A chart repository serving `index.yaml` over HTTP
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Repository {
    /// Unique name for this repository
    pub name: String,

    /// Base URL; the index lives at `<url>/index.yaml`
    pub url: String,

    /// Last successful refresh
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<chrono::DateTime<chrono::Utc>>,
}

impl Repository {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Result<Self> {
        let repo = Self {
            name: name.into(),
            url: url.into(),
            last_updated: None,
        };
        repo.validate()?;
        Ok(repo)
    }

    fn validate(&self) -> Result<()> {
        if self.name.is_empty() || self.name.contains(['/', '\\']) {
            return Err(RepoError::InvalidConfig {
                message: format!("invalid repository name '{}'", self.name),
            });
        }
        let parsed = Url::parse(&self.url).map_err(|e| RepoError::InvalidRepositoryUrl {
            url: self.url.clone(),
            reason: e.to_string(),
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(RepoError::InvalidRepositoryUrl {
                url: self.url.clone(),
                reason: "URL must start with http:// or https://".to_string(),
            });
        }
        Ok(())
    }

    pub fn index_url(&self) -> String {
        format!("{}/index.yaml", self.url.trim_end_matches('/'))
    }

    /// Where this repository's refreshed index is cached
    pub fn cache_file(&self, cache_dir: &Path) -> PathBuf {
        cache_dir.join(format!("{}-index.yaml", self.name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repository_new() {
        let repo = Repository::new("bitnami", "https://charts.bitnami.com/bitnami/").unwrap();
        assert_eq!(repo.name, "bitnami");
        assert_eq!(repo.index_url(), "https://charts.bitnami.com/bitnami/index.yaml");
        assert_eq!(
            repo.cache_file(Path::new("/cache")),
            PathBuf::from("/cache/bitnami-index.yaml")
        );
    }

    #[test]
    fn test_repository_rejects_bad_urls() {
        assert!(Repository::new("x", "oci://ghcr.io/charts").is_err());
        assert!(Repository::new("x", "not a url").is_err());
        assert!(Repository::new("a/b", "https://example.com").is_err());
    }

    #[test]
    fn test_config_add_remove_select() {
        let mut config = RepositoryConfig::default();
        config.add(Repository::new("one", "https://one.example.com").unwrap()).unwrap();
        config.add(Repository::new("two", "https://two.example.com").unwrap()).unwrap();

        assert!(config.add(Repository::new("one", "https://other.com").unwrap()).is_err());
        assert_eq!(config.select(&[]).unwrap().len(), 2);
        assert_eq!(config.select(&["two".to_string()]).unwrap()[0].name, "two");
        assert!(config.select(&["three".to_string()]).is_err());

        assert_eq!(config.remove("one").unwrap().name, "one");
        assert!(config.get("one").is_none());
    }

    #[test]
    fn test_config_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("repositories.yaml");

        let mut config = RepositoryConfig {
            fail_on_any: true,
            ..Default::default()
        };
        config.add(Repository::new("stable", "https://charts.example.com").unwrap()).unwrap();
        config.save_to(&path).unwrap();

        assert_eq!(RepositoryConfig::load_from(&path).unwrap(), config);
    }

    #[test]
    fn test_config_parses_yaml() {
        let yaml = "failOnAny: true\nrepositories:\n  - name: stable\n    url: https://charts.example.com\n";
        let config: RepositoryConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(config.fail_on_any);
        assert_eq!(config.api_version, "rudder/v1");
        assert_eq!(config.repositories[0].name, "stable");
    }
}
