//! Options for install, upgrade, rollback, uninstall and render

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Default timeout for readiness waits and for hooks
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

fn default_timeout() -> Duration {
    DEFAULT_TIMEOUT
}

/// Options for install operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct InstallOptions {
    /// Release name
    pub name: String,

    /// Target namespace
    pub namespace: String,

    /// Reuse a name whose last version is not failed or uninstalled
    pub replace: bool,

    /// Render and split only; touch neither cluster nor store
    pub dry_run: bool,

    /// Create namespace if it doesn't exist
    pub create_namespace: bool,

    /// Wait for resources to be ready
    pub wait: bool,

    /// Timeout for the readiness wait
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,

    /// Timeout for each hook
    #[serde(with = "humantime_serde")]
    pub hook_timeout: Duration,

    /// Uninstall the attempted version on failure
    pub atomic: bool,

    /// Skip pre/post-install hooks
    pub no_hooks: bool,

    /// Render without dependencies missing from `charts/`
    pub dependency_update: bool,

    /// Description for this release
    pub description: Option<String>,

    /// Custom labels stored with the release
    pub labels: BTreeMap<String, String>,
}

impl Default for InstallOptions {
    fn default() -> Self {
        Self {
            name: String::new(),
            namespace: "default".to_string(),
            replace: false,
            dry_run: false,
            create_namespace: false,
            wait: false,
            timeout: default_timeout(),
            hook_timeout: default_timeout(),
            atomic: false,
            no_hooks: false,
            dependency_update: false,
            description: None,
            labels: BTreeMap::new(),
        }
    }
}

impl InstallOptions {
    /// Create default install options with name and namespace
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            ..Default::default()
        }
    }

    /// Enable waiting for resources
    pub fn with_wait(mut self, timeout: Duration) -> Self {
        self.wait = true;
        self.timeout = timeout;
        self
    }

    /// Enable atomic mode; implies wait
    pub fn with_atomic(mut self) -> Self {
        self.wait = true;
        self.atomic = true;
        self
    }

    pub fn with_replace(mut self) -> Self {
        self.replace = true;
        self
    }

    pub fn with_create_namespace(mut self) -> Self {
        self.create_namespace = true;
        self
    }

    pub fn with_hook_timeout(mut self, timeout: Duration) -> Self {
        self.hook_timeout = timeout;
        self
    }

    pub fn without_hooks(mut self) -> Self {
        self.no_hooks = true;
        self
    }

    pub fn with_dependency_update(mut self) -> Self {
        self.dependency_update = true;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Enable dry-run mode
    pub fn dry_run(mut self) -> Self {
        self.dry_run = true;
        self
    }
}

/// Options for upgrade operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct UpgradeOptions {
    pub name: String,
    pub namespace: String,

    /// Install if the release doesn't exist
    pub install: bool,

    /// Merge new overrides over the previous release's user values
    pub reuse_values: bool,

    /// Ignore previous user values; wins over `reuse_values`
    pub reset_values: bool,

    /// Recreate resources whose update is rejected
    pub force: bool,

    /// Roll back to the last deployed version on failure
    pub atomic: bool,

    pub wait: bool,

    #[serde(with = "humantime_serde")]
    pub timeout: Duration,

    #[serde(with = "humantime_serde")]
    pub hook_timeout: Duration,

    pub no_hooks: bool,

    pub dry_run: bool,

    /// Versions kept after the upgrade; 0 keeps all
    pub max_history: u32,

    /// Delete resources created by a failed upgrade
    pub cleanup_on_fail: bool,

    pub description: Option<String>,

    pub labels: BTreeMap<String, String>,
}

impl Default for UpgradeOptions {
    fn default() -> Self {
        Self {
            name: String::new(),
            namespace: "default".to_string(),
            install: false,
            reuse_values: false,
            reset_values: false,
            force: false,
            atomic: false,
            wait: false,
            timeout: default_timeout(),
            hook_timeout: default_timeout(),
            no_hooks: false,
            dry_run: false,
            max_history: 10,
            cleanup_on_fail: false,
            description: None,
            labels: BTreeMap::new(),
        }
    }
}

impl UpgradeOptions {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            ..Default::default()
        }
    }

    /// Enable install-if-not-exists
    pub fn with_install(mut self) -> Self {
        self.install = true;
        self
    }

    /// Enable atomic mode; implies wait
    pub fn with_atomic(mut self) -> Self {
        self.wait = true;
        self.atomic = true;
        self
    }

    pub fn with_wait(mut self, timeout: Duration) -> Self {
        self.wait = true;
        self.timeout = timeout;
        self
    }

    pub fn with_force(mut self) -> Self {
        self.force = true;
        self
    }

    pub fn with_reuse_values(mut self) -> Self {
        self.reuse_values = true;
        self
    }

    pub fn with_reset_values(mut self) -> Self {
        self.reset_values = true;
        self
    }

    pub fn with_cleanup_on_fail(mut self) -> Self {
        self.cleanup_on_fail = true;
        self
    }

    pub fn with_max_history(mut self, max: u32) -> Self {
        self.max_history = max;
        self
    }

    pub fn without_hooks(mut self) -> Self {
        self.no_hooks = true;
        self
    }

    pub fn dry_run(mut self) -> Self {
        self.dry_run = true;
        self
    }

    /// Matching install options, for upgrade-or-install
    pub fn to_install(&self) -> InstallOptions {
        InstallOptions {
            name: self.name.clone(),
            namespace: self.namespace.clone(),
            dry_run: self.dry_run,
            wait: self.wait,
            timeout: self.timeout,
            hook_timeout: self.hook_timeout,
            atomic: self.atomic,
            no_hooks: self.no_hooks,
            description: self.description.clone(),
            labels: self.labels.clone(),
            ..Default::default()
        }
    }
}

/// Options for rollback operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RollbackOptions {
    pub name: String,
    pub namespace: String,

    /// Target version; 0 means the one before the current
    pub version: i64,

    pub wait: bool,

    #[serde(with = "humantime_serde")]
    pub timeout: Duration,

    #[serde(with = "humantime_serde")]
    pub hook_timeout: Duration,

    pub no_hooks: bool,

    pub force: bool,

    pub dry_run: bool,

    pub max_history: u32,
}

impl Default for RollbackOptions {
    fn default() -> Self {
        Self {
            name: String::new(),
            namespace: "default".to_string(),
            version: 0,
            wait: false,
            timeout: default_timeout(),
            hook_timeout: default_timeout(),
            no_hooks: false,
            force: false,
            dry_run: false,
            max_history: 10,
        }
    }
}

impl RollbackOptions {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            ..Default::default()
        }
    }

    /// Set target version
    pub fn to_version(mut self, version: i64) -> Self {
        self.version = version;
        self
    }

    pub fn with_force(mut self) -> Self {
        self.force = true;
        self
    }

    pub fn with_wait(mut self, timeout: Duration) -> Self {
        self.wait = true;
        self.timeout = timeout;
        self
    }

    pub fn without_hooks(mut self) -> Self {
        self.no_hooks = true;
        self
    }

    pub fn dry_run(mut self) -> Self {
        self.dry_run = true;
        self
    }
}

/// Options for uninstall operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct UninstallOptions {
    pub name: String,
    pub namespace: String,

    /// Keep release records as `uninstalled`; false purges every version
    pub keep_history: bool,

    /// Skip pre/post-delete hooks
    pub no_hooks: bool,

    #[serde(with = "humantime_serde")]
    pub hook_timeout: Duration,

    pub dry_run: bool,

    pub description: Option<String>,
}

impl Default for UninstallOptions {
    fn default() -> Self {
        Self {
            name: String::new(),
            namespace: "default".to_string(),
            keep_history: true,
            no_hooks: false,
            hook_timeout: default_timeout(),
            dry_run: false,
            description: None,
        }
    }
}

impl UninstallOptions {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            ..Default::default()
        }
    }

    /// Delete all release records as well
    pub fn purge(mut self) -> Self {
        self.keep_history = false;
        self
    }

    pub fn without_hooks(mut self) -> Self {
        self.no_hooks = true;
        self
    }

    pub fn dry_run(mut self) -> Self {
        self.dry_run = true;
        self
    }
}

/// Options for `test`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TestOptions {
    pub name: String,
    pub namespace: String,

    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for TestOptions {
    fn default() -> Self {
        Self {
            name: String::new(),
            namespace: "default".to_string(),
            timeout: default_timeout(),
        }
    }
}

impl TestOptions {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            ..Default::default()
        }
    }
}

/// Options for rendering without installing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RenderOptions {
    /// Release name exposed to templates
    pub name: String,

    pub namespace: String,

    /// Downgrade `required` failures to warnings
    pub lint: bool,

    /// Render without dependencies missing from `charts/`
    pub dependency_update: bool,

    /// Include hook documents in the output
    pub include_hooks: bool,

    /// Render only these templates (path IDs or short names)
    pub show_only: Vec<String>,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            name: "release-name".to_string(),
            namespace: "default".to_string(),
            lint: false,
            dependency_update: false,
            include_hooks: true,
            show_only: Vec::new(),
        }
    }
}

impl RenderOptions {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_install_options_builder() {
        let opts = InstallOptions::new("myapp", "prod")
            .with_wait(Duration::from_secs(60))
            .with_label("team", "web");

        assert_eq!(opts.name, "myapp");
        assert_eq!(opts.namespace, "prod");
        assert!(opts.wait);
        assert_eq!(opts.timeout, Duration::from_secs(60));
        assert_eq!(opts.hook_timeout, DEFAULT_TIMEOUT);
        assert_eq!(opts.labels["team"], "web");
    }

    #[test]
    fn test_atomic_implies_wait() {
        let opts = UpgradeOptions::new("myapp", "default").with_atomic().with_install();
        assert!(opts.wait);
        assert!(opts.atomic);
        assert!(opts.install);

        let install = opts.to_install();
        assert!(install.atomic && install.wait);
        assert!(!install.replace);
    }

    #[test]
    fn test_uninstall_keeps_history_by_default() {
        assert!(UninstallOptions::new("myapp", "default").keep_history);
        assert!(!UninstallOptions::new("myapp", "default").purge().keep_history);
    }

    #[test]
    fn test_options_from_yaml() {
        let opts: UpgradeOptions = serde_yaml::from_str(
            "name: myapp\nnamespace: prod\natomic: true\ntimeout: 2m 30s\nmaxHistory: 3\n",
        )
        .unwrap();

        assert_eq!(opts.timeout, Duration::from_secs(150));
        assert_eq!(opts.hook_timeout, DEFAULT_TIMEOUT);
        assert_eq!(opts.max_history, 3);
        assert!(opts.atomic);
    }
}
