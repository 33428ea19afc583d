//! Release records and their state machine

use chrono::{DateTime, Utc};
use rudder_core::{Chart, Values};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::hooks::Hook;

/// Lifecycle status of one release version
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReleaseStatus {
    #[default]
    Unknown,
    Deployed,
    Uninstalled,
    /// Replaced by a newer version
    Superseded,
    Failed,
    Uninstalling,
    PendingInstall,
    PendingUpgrade,
    PendingRollback,
}

impl ReleaseStatus {
    pub const ALL: [ReleaseStatus; 9] = [
        Self::Unknown,
        Self::Deployed,
        Self::Uninstalled,
        Self::Superseded,
        Self::Failed,
        Self::Uninstalling,
        Self::PendingInstall,
        Self::PendingUpgrade,
        Self::PendingRollback,
    ];

    /// An operation is still running against this version
    pub fn is_pending(&self) -> bool {
        matches!(
            self,
            Self::PendingInstall | Self::PendingUpgrade | Self::PendingRollback | Self::Uninstalling
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Deployed => "deployed",
            Self::Uninstalled => "uninstalled",
            Self::Superseded => "superseded",
            Self::Failed => "failed",
            Self::Uninstalling => "uninstalling",
            Self::PendingInstall => "pending-install",
            Self::PendingUpgrade => "pending-upgrade",
            Self::PendingRollback => "pending-rollback",
        }
    }
}

impl std::fmt::Display for ReleaseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ReleaseStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown release status: {}", s))
    }
}

/// Status and timestamps of a release version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseInfo {
    pub status: ReleaseStatus,
    pub first_deployed: DateTime<Utc>,
    pub last_deployed: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted: Option<DateTime<Utc>>,
    #[serde(default)]
    pub description: String,
    /// Rendered NOTES.txt of the root chart
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl ReleaseInfo {
    fn new(status: ReleaseStatus, description: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            status,
            first_deployed: now,
            last_deployed: now,
            deleted: None,
            description: description.into(),
            notes: None,
        }
    }
}

/// One version of a named installation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Release {
    pub name: String,
    pub namespace: String,
    /// Starts at 1; every install, upgrade or rollback adds one
    pub version: u32,
    pub info: ReleaseInfo,
    /// Chart snapshot, enough to re-render or re-apply
    pub chart: Chart,
    /// Values the user supplied
    #[serde(default)]
    pub config: Values,
    /// Coalesced values the templates saw
    #[serde(default)]
    pub values: Values,
    /// Rendered resources in install order
    #[serde(default)]
    pub manifest: String,
    #[serde(default)]
    pub hooks: Vec<Hook>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

impl Release {
    /// A first version, pending install
    pub fn for_install(name: &str, namespace: &str, version: u32, chart: Chart) -> Self {
        Self {
            name: name.to_string(),
            namespace: namespace.to_string(),
            version,
            info: ReleaseInfo::new(ReleaseStatus::PendingInstall, "Initial install underway"),
            chart,
            config: Values::new(),
            values: Values::new(),
            manifest: String::new(),
            hooks: Vec::new(),
            labels: BTreeMap::new(),
        }
    }

    /// The next version after `previous`, pending upgrade
    pub fn for_upgrade(previous: &Release, chart: Chart) -> Self {
        let mut next = Self::for_install(&previous.name, &previous.namespace, previous.version + 1, chart);
        next.info = ReleaseInfo::new(ReleaseStatus::PendingUpgrade, "Preparing upgrade");
        next.info.first_deployed = previous.info.first_deployed;
        next.labels = previous.labels.clone();
        next
    }

    /// A new version re-applying `target`, pending rollback
    pub fn for_rollback(target: &Release, version: u32) -> Self {
        let mut next = target.clone();
        next.version = version;
        next.info = ReleaseInfo::new(
            ReleaseStatus::PendingRollback,
            format!("Rollback to {}", target.version),
        );
        next.info.first_deployed = target.info.first_deployed;
        for hook in &mut next.hooks {
            hook.last_run = Default::default();
        }
        next
    }

    /// Storage key for this release version
    pub fn storage_key(&self) -> String {
        storage_key(&self.name, self.version)
    }

    pub fn status(&self) -> ReleaseStatus {
        self.info.status
    }

    pub fn set_status(&mut self, status: ReleaseStatus, description: impl Into<String>) {
        self.info.status = status;
        self.info.description = description.into();
    }

    /// Mark the release as deployed
    pub fn mark_deployed(&mut self, description: impl Into<String>) {
        self.set_status(ReleaseStatus::Deployed, description);
        self.info.last_deployed = Utc::now();
    }

    /// Mark the release as failed
    pub fn mark_failed(&mut self, reason: impl std::fmt::Display) {
        self.set_status(
            ReleaseStatus::Failed,
            format!("Release \"{}\" failed: {}", self.name, reason),
        );
    }

    /// Mark the release as superseded (replaced by a newer version)
    pub fn mark_superseded(&mut self) {
        self.set_status(ReleaseStatus::Superseded, "Superseded by a newer version");
    }

    /// Mark the release as uninstalled
    pub fn mark_uninstalled(&mut self) {
        self.set_status(ReleaseStatus::Uninstalled, "Uninstallation complete");
        self.info.deleted = Some(Utc::now());
    }
}

/// Storage key for a release version
pub fn storage_key(name: &str, version: u32) -> String {
    format!("sh.rudder.release.v1.{}.v{}", name, version)
}
