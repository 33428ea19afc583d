//! Versioned record layout
//!
//! New records are written as `{"schema": "v2", ...release}`. Records
//! without a schema tag use the flat v1 layout and are upgraded on read.

use chrono::{DateTime, Utc};
use rudder_core::{Chart, Values};
use serde::{Deserialize, Serialize};

use crate::error::{KubeError, Result};
use crate::hooks::Hook;
use crate::release::{Release, ReleaseInfo, ReleaseStatus};

/// A record as stored, tagged by schema
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "schema")]
pub enum StoredRecord {
    #[serde(rename = "v1")]
    V1(LegacyRecord),
    #[serde(rename = "v2")]
    V2(Release),
}

/// First record layout: flat, one value tree, free-form status
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyRecord {
    pub name: String,
    pub namespace: String,
    pub version: u32,
    pub status: String,
    pub chart: Chart,
    #[serde(default)]
    pub values: Values,
    #[serde(default)]
    pub manifest: String,
    #[serde(default)]
    pub hooks: Vec<Hook>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub notes: Option<String>,
    pub updated: DateTime<Utc>,
}

impl LegacyRecord {
    pub fn into_release(self) -> Release {
        let status = self.status.parse().unwrap_or(ReleaseStatus::Unknown);
        Release {
            name: self.name,
            namespace: self.namespace,
            version: self.version,
            info: ReleaseInfo {
                status,
                first_deployed: self.updated,
                last_deployed: self.updated,
                deleted: (status == ReleaseStatus::Uninstalled).then_some(self.updated),
                description: self.description,
                notes: self.notes,
            },
            chart: self.chart,
            // v1 did not keep user input apart from the resolved tree
            config: self.values.clone(),
            values: self.values,
            manifest: self.manifest,
            hooks: self.hooks,
            labels: Default::default(),
        }
    }
}

impl StoredRecord {
    pub fn into_release(self) -> Release {
        match self {
            Self::V1(legacy) => legacy.into_release(),
            Self::V2(release) => release,
        }
    }

    /// Serialize a release in the current layout
    pub fn encode(release: &Release) -> Result<Vec<u8>> {
        // serialize through the tagged enum without cloning the release
        #[derive(Serialize)]
        #[serde(tag = "schema")]
        enum Current<'a> {
            #[serde(rename = "v2")]
            V2(&'a Release),
        }
        Ok(serde_json::to_vec(&Current::V2(release))?)
    }

    /// Deserialize any known layout
    pub fn decode(data: &[u8]) -> Result<Release> {
        let value: serde_json::Value = serde_json::from_slice(data)?;
        let tagged = value.get("schema").is_some();

        let record = if tagged {
            serde_json::from_value::<StoredRecord>(value)
        } else {
            serde_json::from_value::<LegacyRecord>(value).map(StoredRecord::V1)
        }
        .map_err(|e| KubeError::Serialization(format!("unreadable release record: {}", e)))?;

        Ok(record.into_release())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::tests::{test_chart, test_release};

    #[test]
    fn test_current_layout_is_tagged() {
        let release = test_release("myapp", 1, ReleaseStatus::Deployed);
        let bytes = StoredRecord::encode(&release).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(value["schema"], "v2");
        assert_eq!(value["info"]["status"], "deployed");
        assert_eq!(StoredRecord::decode(&bytes).unwrap(), release);
    }

    #[test]
    fn test_untagged_legacy_record_upgrades() {
        let legacy = serde_json::json!({
            "name": "myapp",
            "namespace": "default",
            "version": 4,
            "status": "superseded",
            "chart": serde_json::to_value(test_chart()).unwrap(),
            "values": { "replicas": 2 },
            "manifest": "kind: ConfigMap\n",
            "updated": "2024-05-01T10:00:00Z",
        });

        let release = StoredRecord::decode(&serde_json::to_vec(&legacy).unwrap()).unwrap();
        assert_eq!(release.version, 4);
        assert_eq!(release.status(), ReleaseStatus::Superseded);
        assert_eq!(release.config.get("replicas").unwrap(), 2);
        assert_eq!(release.info.first_deployed.to_rfc3339(), "2024-05-01T10:00:00+00:00");
    }

    #[test]
    fn test_legacy_unknown_status() {
        let mut legacy = serde_json::json!({
            "schema": "v1",
            "name": "myapp",
            "namespace": "default",
            "version": 1,
            "status": "DEPLOYED",
            "chart": serde_json::to_value(test_chart()).unwrap(),
            "updated": "2024-05-01T10:00:00Z",
        });
        let release = StoredRecord::decode(&serde_json::to_vec(&legacy).unwrap()).unwrap();
        assert_eq!(release.status(), ReleaseStatus::Unknown);

        legacy["schema"] = "v9".into();
        assert!(StoredRecord::decode(&serde_json::to_vec(&legacy).unwrap()).is_err());
    }
}
