//! Rudder Repository Management
//!
//! - **Configuration**: the repository list in `repositories.yaml`
//! - **Index**: Helm-compatible `index.yaml` model with latest-version lookup
//! - **Refresh**: concurrent index refresh with per-source failure reporting

pub mod config;
pub mod error;
pub mod index;
pub mod refresh;

pub use config::{Repository, RepositoryConfig};
pub use error::{RepoError, Result};
pub use index::{ChartEntry, RepositoryIndex};
pub use refresh::{HttpFetcher, IndexFetcher, RefreshOptions, RefreshReport, Refreshed, refresh_all};
