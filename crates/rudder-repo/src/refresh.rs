//! Concurrent index refresh
//!
//! One task per repository; a failing source never stops its siblings.
//! The refresh as a whole fails only with `fail_on_any`.

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::config::Repository;
use crate::error::{RepoError, Result};
use crate::index::RepositoryIndex;

/// Fetches a repository's index
#[async_trait]
pub trait IndexFetcher: Send + Sync {
    async fn fetch(&self, repo: &Repository) -> Result<RepositoryIndex>;
}

/// Fetches `index.yaml` over HTTP
#[derive(Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self> {
        Self::with_timeout(Duration::from_secs(30))
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("rudder/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| RepoError::NetworkError {
                message: e.to_string(),
            })?;
        Ok(Self { client })
    }
}

#[async_trait]
impl IndexFetcher for HttpFetcher {
    async fn fetch(&self, repo: &Repository) -> Result<RepositoryIndex> {
        let url = repo.index_url();
        tracing::debug!(repository = %repo.name, %url, "fetching index");

        let response = self.client.get(&url).send().await?;
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(RepoError::IndexNotFound { url });
        }
        if !status.is_success() {
            return Err(RepoError::HttpError {
                status: status.as_u16(),
                message: format!("Request to {} failed", url),
            });
        }

        let bytes = response.bytes().await?;
        RepositoryIndex::from_bytes(&bytes)
    }
}

#[derive(Debug, Clone, Default)]
pub struct RefreshOptions {
    /// Fail the whole refresh when any source fails
    pub fail_on_any: bool,

    /// Write each fetched index to `<dir>/<name>-index.yaml`
    pub cache_dir: Option<PathBuf>,
}

/// A repository refreshed successfully
#[derive(Debug, Clone, PartialEq)]
pub struct Refreshed {
    pub name: String,
    /// Chart versions in the fetched index
    pub versions: usize,
}

/// Per-source outcome of a refresh, in repository order
#[derive(Debug, Default)]
pub struct RefreshReport {
    pub updated: Vec<Refreshed>,
    pub failed: Vec<(String, RepoError)>,
}

impl RefreshReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Refresh every repository concurrently
pub async fn refresh_all(
    fetcher: Arc<dyn IndexFetcher>,
    repos: &[Repository],
    options: &RefreshOptions,
) -> Result<RefreshReport> {
    let handles: Vec<_> = repos
        .iter()
        .cloned()
        .map(|repo| {
            let fetcher = Arc::clone(&fetcher);
            let cache_dir = options.cache_dir.clone();
            tokio::spawn(async move {
                let outcome = refresh_one(fetcher.as_ref(), &repo, cache_dir).await;
                (repo.name, outcome)
            })
        })
        .collect();

    let mut report = RefreshReport::default();
    for (repo, joined) in repos.iter().zip(futures::future::join_all(handles).await) {
        let (name, outcome) = match joined {
            Ok(done) => done,
            Err(e) => (repo.name.clone(), Err(RepoError::Io(e.into()))),
        };
        match outcome {
            Ok(versions) => {
                tracing::info!(repository = %name, versions, "index refreshed");
                report.updated.push(Refreshed { name, versions });
            }
            Err(e) => {
                tracing::warn!(repository = %name, error = %e, "index refresh failed");
                report.failed.push((name, e));
            }
        }
    }

    if options.fail_on_any && !report.is_complete() {
        return Err(RepoError::RefreshFailed {
            total: repos.len(),
            failed: report
                .failed
                .iter()
                .map(|(name, e)| format!("{} ({})", name, e))
                .collect(),
        });
    }
    Ok(report)
}

async fn refresh_one(
    fetcher: &dyn IndexFetcher,
    repo: &Repository,
    cache_dir: Option<PathBuf>,
) -> Result<usize> {
    let index = fetcher.fetch(repo).await?;

    if let Some(dir) = cache_dir {
        tokio::fs::create_dir_all(&dir).await?;
        tokio::fs::write(repo.cache_file(&dir), index.to_yaml()?).await?;
    }
    Ok(index.version_count())
}
