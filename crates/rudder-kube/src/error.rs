//! Error types for rudder-kube

use std::time::Duration;
use thiserror::Error;

/// Result type for rudder-kube operations
pub type Result<T> = std::result::Result<T, KubeError>;

/// Lifecycle action an error is reported under
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Install,
    Upgrade,
    Rollback,
    Uninstall,
    Test,
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Install => "install",
            Self::Upgrade => "upgrade",
            Self::Rollback => "rollback",
            Self::Uninstall => "uninstall",
            Self::Test => "test",
        };
        f.write_str(s)
    }
}

/// Errors that can occur during release operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum KubeError {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Api(#[from] kube::Error),

    /// No record for this release, or for this version of it
    #[error("release '{name}' not found in namespace '{namespace}'")]
    ReleaseNotFound { name: String, namespace: String },

    /// A record with this name and version is already stored
    #[error("release '{name}' version {version} already exists in namespace '{namespace}'")]
    AlreadyExists {
        name: String,
        namespace: String,
        version: u32,
    },

    /// Install onto a name that is still in use
    #[error("cannot re-use release name '{name}': it is still in use (status: {status})\nHint: pass --replace to take it over")]
    NameInUse { name: String, status: String },

    /// Another operation left the release pending
    #[error("another operation is in progress for release '{name}': {status}")]
    OperationInProgress { name: String, status: String },

    /// Rollback target does not exist or is negative
    #[error("invalid revision {version} for release '{name}': {reason}")]
    InvalidRevision {
        name: String,
        version: i64,
        reason: String,
    },

    /// Hook execution failed
    #[error("hook '{hook}' failed during {event}: {message}")]
    HookFailed {
        hook: String,
        event: String,
        message: String,
    },

    /// Resources did not become ready in time
    #[error("timed out after {timeout:?} waiting for: {}", .pending.join(", "))]
    WaitTimeout {
        timeout: Duration,
        pending: Vec<String>,
    },

    /// The API server cannot be reached
    #[error("cluster unreachable: {0}")]
    ClusterUnreachable(String),

    /// A rendered document is not a valid resource
    #[error("failed to parse manifest {path}: {message}")]
    ManifestParse { path: String, message: String },

    /// The cluster rejected a resource
    #[error("{resource}: {message}")]
    ResourceFailed { resource: String, message: String },

    /// Template rendering failed
    #[error(transparent)]
    Render(#[from] rudder_engine::EngineError),

    /// Chart or values error
    #[error(transparent)]
    Core(#[from] rudder_core::CoreError),

    /// Post-renderer failed
    #[error("post-renderer failed: {0}")]
    PostRender(String),

    /// Storage error
    #[error("storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Compression error
    #[error("compression error: {0}")]
    Compression(String),

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The caller stopped waiting; the operation keeps running
    #[error("operation cancelled; the release will record its final state when the operation completes")]
    Cancelled,

    /// A failed atomic operation and the outcome of its recovery
    #[error("{cause}; {recovery}")]
    Atomic {
        #[source]
        cause: Box<KubeError>,
        recovery: String,
    },

    /// Any error leaving a lifecycle action
    #[error("{action} \"{release}\": {source}")]
    Action {
        action: Action,
        release: String,
        #[source]
        source: Box<KubeError>,
    },
}

impl From<serde_json::Error> for KubeError {
    fn from(e: serde_json::Error) -> Self {
        KubeError::Serialization(e.to_string())
    }
}

impl From<serde_yaml::Error> for KubeError {
    fn from(e: serde_yaml::Error) -> Self {
        KubeError::Serialization(e.to_string())
    }
}

impl KubeError {
    /// Check if this is a Kubernetes 404 Not Found error
    pub fn is_not_found(&self) -> bool {
        matches!(self, KubeError::Api(kube::Error::Api(resp)) if resp.code == 404)
    }

    /// Check if this is a conflict error (409)
    pub fn is_conflict(&self) -> bool {
        matches!(self, KubeError::Api(kube::Error::Api(resp)) if resp.code == 409)
    }

    /// Decorate with the action and release it came from
    pub fn in_action(self, action: Action, release: &str) -> Self {
        match self {
            already @ KubeError::Action { .. } => already,
            other => KubeError::Action {
                action,
                release: release.to_string(),
                source: Box::new(other),
            },
        }
    }

    /// The underlying error, without action or atomic decoration
    pub fn cause(&self) -> &KubeError {
        match self {
            KubeError::Action { source, .. } => source.cause(),
            KubeError::Atomic { cause, .. } => cause.cause(),
            other => other,
        }
    }

    /// Owned form of [`KubeError::cause`]
    pub fn into_cause(self) -> KubeError {
        match self {
            KubeError::Action { source, .. } => source.into_cause(),
            KubeError::Atomic { cause, .. } => cause.into_cause(),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_display_decorates_cause() {
        let err = KubeError::ReleaseNotFound {
            name: "myapp".to_string(),
            namespace: "default".to_string(),
        }
        .in_action(Action::Upgrade, "myapp");

        assert_eq!(
            err.to_string(),
            "upgrade \"myapp\": release 'myapp' not found in namespace 'default'"
        );
        assert!(matches!(err.cause(), KubeError::ReleaseNotFound { .. }));
    }

    #[test]
    fn test_in_action_does_not_nest() {
        let err = KubeError::Cancelled
            .in_action(Action::Install, "a")
            .in_action(Action::Upgrade, "b");
        assert!(err.to_string().starts_with("install \"a\""));
    }

    #[test]
    fn test_into_cause_unwraps_atomic() {
        let err = KubeError::Atomic {
            cause: Box::new(KubeError::Cancelled),
            recovery: "rolled back to version 1 as version 3".to_string(),
        }
        .in_action(Action::Upgrade, "web");

        assert!(err.to_string().ends_with("; rolled back to version 1 as version 3"));
        assert!(matches!(err.into_cause(), KubeError::Cancelled));
    }

    #[test]
    fn test_wait_timeout_message() {
        let err = KubeError::WaitTimeout {
            timeout: Duration::from_secs(90),
            pending: vec!["Deployment/default/web".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "timed out after 90s waiting for: Deployment/default/web"
        );
    }
}
