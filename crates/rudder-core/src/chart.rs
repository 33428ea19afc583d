//! Chart definition and loading

use semver::Version;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use crate::archive::{self, FileMap};
use crate::error::{CoreError, Result};
use crate::values::Values;

/// Chart definition file name
pub const CHART_FILE: &str = "Chart.yaml";
/// Default values file name
pub const VALUES_FILE: &str = "values.yaml";
/// Supported `apiVersion`
pub const API_VERSION: &str = "rudder/v1";

const TEMPLATES_DIR: &str = "templates/";
const CHARTS_DIR: &str = "charts/";

/// Contents of `Chart.yaml`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartDefinition {
    /// API version (rudder/v1)
    pub api_version: String,

    /// Chart type
    #[serde(default)]
    pub kind: ChartKind,

    pub metadata: ChartMetadata,

    /// Sub-charts this chart expects under `charts/`
    #[serde(default)]
    pub dependencies: Vec<Dependency>,

    /// External filter applied to this chart's rendered manifests
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_renderer: Option<PostRendererConfig>,
}

/// Chart type
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChartKind {
    #[default]
    Application,
    /// Only contributes partials; cannot be installed on its own
    Library,
}

/// Chart metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartMetadata {
    pub name: String,

    /// Chart version (SemVer)
    pub version: Version,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_version: Option<String>,

    /// Chart-level ordering weight, applied before per-resource weights
    #[serde(default)]
    pub weight: i32,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

/// A declared sub-chart
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dependency {
    pub name: String,

    /// Version constraint (semver)
    #[serde(default)]
    pub version: String,

    #[serde(default)]
    pub repository: String,

    /// Dot-path(s) evaluated against the parent's values, comma separated.
    /// The first path that resolves decides.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,

    /// Tags enabling this sub-chart through the parent's `tags` table
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    /// Name the sub-chart is addressed by in values and templates
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,

    /// Child values re-surfaced at the parent scope
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub import_values: Vec<ImportValue>,
}

/// An `importValues` entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ImportValue {
    /// Imports `exports.<name>` from the child into the parent root
    Export(String),
    /// Imports the child path `child` to the parent path `parent`
    Mapping { child: String, parent: String },
}

/// Command run over a chart's rendered manifests
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostRendererConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl Dependency {
    /// Alias if set, otherwise name
    #[inline]
    pub fn effective_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }

    /// Whether this sub-chart is enabled for the given parent values
    ///
    /// `condition` wins over `tags`; when neither resolves the sub-chart is
    /// enabled.
    pub fn is_enabled(&self, parent_values: &Values) -> bool {
        if let Some(condition) = &self.condition {
            for path in condition.split(',').map(str::trim).filter(|p| !p.is_empty()) {
                if let Some(enabled) = parent_values.truthy(path) {
                    return enabled;
                }
            }
        }

        if !self.tags.is_empty() {
            let mut any_set = false;
            for tag in &self.tags {
                match parent_values.truthy(&format!("tags.{}", tag)) {
                    Some(true) => return true,
                    Some(false) => any_set = true,
                    None => {}
                }
            }
            if any_set {
                return false;
            }
        }

        true
    }
}

/// A raw template blob
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateFile {
    /// Path relative to the chart root, e.g. `templates/deployment.yaml`
    pub name: String,
    pub data: String,
}

impl TemplateFile {
    /// Partials are parsed for their definitions but never emitted
    pub fn is_partial(&self) -> bool {
        self.name
            .rsplit('/')
            .next()
            .map(|base| base.starts_with('_'))
            .unwrap_or(false)
    }

    /// Directory depth below the chart root
    pub fn depth(&self) -> usize {
        self.name.matches('/').count()
    }
}

/// A loaded chart tree
///
/// Immutable once loaded; sub-charts are embedded children. Releases keep a
/// serialized copy so that rollback can re-apply without the source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chart {
    pub definition: ChartDefinition,
    pub templates: Vec<TemplateFile>,
    /// Static files other than templates, values and Chart.yaml
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub files: BTreeMap<String, Vec<u8>>,
    pub values: Values,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub charts: Vec<Chart>,
}

impl Chart {
    /// Load a chart from a directory or a packaged `.tgz` archive
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(CoreError::ChartNotFound {
                path: path.display().to_string(),
            });
        }

        let files = if path.is_dir() {
            read_dir(path)?
        } else if archive::is_archive(path) {
            archive::read_archive(path)?
        } else {
            return Err(CoreError::InvalidChart {
                message: format!("{} is neither a directory nor a .tgz archive", path.display()),
            });
        };

        Self::from_files(files).map_err(|e| match e {
            CoreError::InvalidChart { message } => CoreError::InvalidChart {
                message: format!("{}: {}", path.display(), message),
            },
            other => other,
        })
    }

    /// Build a chart from an in-memory file map
    pub fn from_files(mut files: FileMap) -> Result<Self> {
        let raw = files.remove(CHART_FILE).ok_or_else(|| CoreError::InvalidChart {
            message: format!("{} not found", CHART_FILE),
        })?;

        let definition: ChartDefinition = serde_yaml::from_slice(&raw)?;
        if definition.api_version != API_VERSION {
            return Err(CoreError::InvalidChart {
                message: format!(
                    "unsupported apiVersion {}, expected {}",
                    definition.api_version, API_VERSION
                ),
            });
        }
        if definition.metadata.name.is_empty() {
            return Err(CoreError::InvalidChart {
                message: "metadata.name is required".to_string(),
            });
        }

        let values = match files.remove(VALUES_FILE) {
            Some(bytes) => Values::from_yaml(&String::from_utf8_lossy(&bytes))?,
            None => Values::new(),
        };

        let mut templates = Vec::new();
        let mut sub_dirs: BTreeMap<String, FileMap> = BTreeMap::new();
        let mut sub_archives = Vec::new();
        let mut static_files = BTreeMap::new();

        for (path, data) in files {
            if path.starts_with(TEMPLATES_DIR) {
                let data = String::from_utf8(data).map_err(|_| CoreError::InvalidChart {
                    message: format!("template {} is not valid UTF-8", path),
                })?;
                templates.push(TemplateFile { name: path, data });
            } else if let Some(rest) = path.strip_prefix(CHARTS_DIR) {
                match rest.split_once('/') {
                    Some((dir, inner)) => {
                        sub_dirs
                            .entry(dir.to_string())
                            .or_default()
                            .insert(inner.to_string(), data);
                    }
                    None if archive::is_archive(Path::new(rest)) => sub_archives.push(data),
                    None => {}
                }
            } else {
                static_files.insert(path, data);
            }
        }

        templates.sort_by(|a, b| a.name.cmp(&b.name));

        let mut charts = Vec::new();
        for (_, sub_files) in sub_dirs {
            charts.push(Self::from_files(sub_files)?);
        }
        for bytes in sub_archives {
            charts.push(Self::from_files(archive::read_archive_bytes(&bytes)?)?);
        }
        charts.sort_by(|a, b| a.name().cmp(b.name()));

        Ok(Self {
            definition,
            templates,
            files: static_files,
            values,
            charts,
        })
    }

    pub fn name(&self) -> &str {
        &self.definition.metadata.name
    }

    pub fn version(&self) -> &Version {
        &self.definition.metadata.version
    }

    pub fn metadata(&self) -> &ChartMetadata {
        &self.definition.metadata
    }

    pub fn is_library(&self) -> bool {
        self.definition.kind == ChartKind::Library
    }

    /// Embedded sub-chart for a declared dependency
    pub fn subchart(&self, dependency: &Dependency) -> Option<&Chart> {
        self.charts.iter().find(|c| c.name() == dependency.name)
    }

    /// Sub-charts paired with the name they are addressed by
    ///
    /// Undeclared sub-charts found under `charts/` are addressed by their own
    /// name; declared ones by their alias. Missing dependencies are skipped.
    pub fn resolved_subcharts(&self) -> Vec<(&str, Option<&Dependency>, &Chart)> {
        let mut out = Vec::new();
        let mut declared = HashSet::new();

        for dep in &self.definition.dependencies {
            declared.insert(dep.name.as_str());
            if let Some(chart) = self.subchart(dep) {
                out.push((dep.effective_name(), Some(dep), chart));
            }
        }

        for chart in &self.charts {
            if !declared.contains(chart.name()) {
                out.push((chart.name(), None, chart));
            }
        }

        out
    }

    /// Declared dependencies with no embedded sub-chart
    pub fn missing_dependencies(&self) -> Vec<String> {
        self.definition
            .dependencies
            .iter()
            .filter(|d| self.subchart(d).is_none())
            .map(|d| d.name.clone())
            .collect()
    }
}

/// Walk a chart directory into a file map
fn read_dir(root: &Path) -> Result<FileMap> {
    let mut files = FileMap::new();

    for entry in walkdir::WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
    {
        let rel = entry
            .path()
            .strip_prefix(root)
            .unwrap_or(entry.path())
            .to_string_lossy()
            .replace('\\', "/");

        // Hidden files (editor swap files, .helmignore-like files) are not chart content
        if rel.split('/').any(|part| part.starts_with('.')) {
            continue;
        }

        files.insert(rel, std::fs::read(entry.path())?);
    }

    Ok(files)
}
