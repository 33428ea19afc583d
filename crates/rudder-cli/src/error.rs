//! CLI error types with exit code handling
//!
//! Library errors are mapped onto a few classes, each with its own exit
//! code. Template errors keep their source spans for miette.

use miette::Diagnostic;
use rudder_engine::EngineError;
use rudder_kube::KubeError;
use rudder_repo::RepoError;
use thiserror::Error;

use crate::exit_codes;

#[derive(Error, Debug, Diagnostic)]
pub enum CliError {
    /// Template rendering failed
    #[error(transparent)]
    #[diagnostic(transparent)]
    Render(EngineError),

    /// Chart could not be loaded
    #[error("Chart error: {message}")]
    #[diagnostic(code(rudder::cli::chart))]
    Chart { message: String },

    /// Invalid values, options or names
    #[error("{message}")]
    #[diagnostic(code(rudder::cli::validation))]
    Validation {
        message: String,
        #[help]
        help: Option<String>,
    },

    /// A release action failed
    #[error("{message}")]
    #[diagnostic(code(rudder::cli::release))]
    Release {
        message: String,
        #[help]
        help: Option<String>,
        exit_code: u8,
    },

    #[error("Repository error: {message}")]
    #[diagnostic(code(rudder::cli::repo))]
    Repo { message: String },

    /// IO error (file not found, permissions, etc.)
    #[error("IO error: {message}")]
    #[diagnostic(code(rudder::cli::io))]
    Io { message: String },
}

impl CliError {
    pub fn exit_code(&self) -> u8 {
        match self {
            CliError::Render(_) => exit_codes::TEMPLATE_ERROR,
            CliError::Chart { .. } => exit_codes::CHART_ERROR,
            CliError::Validation { .. } => exit_codes::VALIDATION_ERROR,
            CliError::Release { exit_code, .. } => *exit_code,
            CliError::Repo { .. } => exit_codes::ERROR,
            CliError::Io { .. } => exit_codes::IO_ERROR,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            help: None,
        }
    }
}

impl From<KubeError> for CliError {
    fn from(err: KubeError) -> Self {
        let (exit_code, help) = classify(err.cause());
        let message = err.to_string();

        match err.into_cause() {
            KubeError::Render(e) => CliError::Render(e),
            KubeError::Core(e) => CliError::Validation {
                message: e.to_string(),
                help: None,
            },
            _ => CliError::Release {
                message,
                help,
                exit_code,
            },
        }
    }
}

/// Exit code and hint for an undecorated release error
fn classify(cause: &KubeError) -> (u8, Option<String>) {
    match cause {
        KubeError::ReleaseNotFound { .. } => (
            exit_codes::NOT_FOUND,
            Some("check the release name and namespace (-n)".to_string()),
        ),
        KubeError::InvalidRevision { .. } => (
            exit_codes::NOT_FOUND,
            Some("`rudder history` lists the available versions".to_string()),
        ),
        KubeError::NameInUse { .. } | KubeError::AlreadyExists { .. } => {
            (exit_codes::CONFLICT, None)
        }
        KubeError::OperationInProgress { .. } => (
            exit_codes::CONFLICT,
            Some("wait for the other operation, or roll back a release stuck in a pending state".to_string()),
        ),
        KubeError::HookFailed { .. } | KubeError::ResourceFailed { .. } | KubeError::Api(_) => {
            (exit_codes::CLUSTER_FAILURE, None)
        }
        KubeError::WaitTimeout { .. } => (
            exit_codes::TIMEOUT,
            Some("raise --timeout, or inspect the pending resources".to_string()),
        ),
        KubeError::ClusterUnreachable(_) => (exit_codes::UNAVAILABLE, None),
        KubeError::Cancelled => (exit_codes::CANCELLED, None),
        KubeError::InvalidConfig(_) | KubeError::ManifestParse { .. } | KubeError::PostRender(_) => {
            (exit_codes::VALIDATION_ERROR, None)
        }
        KubeError::Io(_) => (exit_codes::IO_ERROR, None),
        _ => (exit_codes::ERROR, None),
    }
}

impl From<EngineError> for CliError {
    fn from(err: EngineError) -> Self {
        CliError::Render(err)
    }
}

impl From<rudder_core::CoreError> for CliError {
    fn from(err: rudder_core::CoreError) -> Self {
        CliError::Chart {
            message: err.to_string(),
        }
    }
}

impl From<RepoError> for CliError {
    fn from(err: RepoError) -> Self {
        CliError::Repo {
            message: err.to_string(),
        }
    }
}

impl From<std::io::Error> for CliError {
    fn from(err: std::io::Error) -> Self {
        CliError::Io {
            message: err.to_string(),
        }
    }
}

impl From<serde_yaml::Error> for CliError {
    fn from(err: serde_yaml::Error) -> Self {
        CliError::Io {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for CliError {
    fn from(err: serde_json::Error) -> Self {
        CliError::Io {
            message: err.to_string(),
        }
    }
}

/// Result type for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;

#[cfg(test)]
mod tests {
    use super::*;
    use rudder_kube::Action;
    use std::time::Duration;

    #[test]
    fn test_release_errors_keep_context_and_code() {
        let err: CliError = KubeError::WaitTimeout {
            timeout: Duration::from_secs(5),
            pending: vec!["Deployment/default/web".to_string()],
        }
        .in_action(Action::Install, "web")
        .into();

        assert_eq!(err.exit_code(), exit_codes::TIMEOUT);
        assert!(err.to_string().starts_with("install \"web\": timed out"));
    }

    #[test]
    fn test_not_found_and_conflict_codes() {
        let missing: CliError = KubeError::ReleaseNotFound {
            name: "web".to_string(),
            namespace: "default".to_string(),
        }
        .into();
        assert_eq!(missing.exit_code(), exit_codes::NOT_FOUND);

        let in_use: CliError = KubeError::NameInUse {
            name: "web".to_string(),
            status: "deployed".to_string(),
        }
        .into();
        assert_eq!(in_use.exit_code(), exit_codes::CONFLICT);

        let cancelled: CliError = KubeError::Cancelled.in_action(Action::Upgrade, "web").into();
        assert_eq!(cancelled.exit_code(), exit_codes::CANCELLED);
    }

    #[test]
    fn test_render_errors_become_diagnostics() {
        let err: CliError = KubeError::Render(EngineError::MissingValue {
            key: "image.tag".to_string(),
            template: "web/templates/deploy.yaml".to_string(),
        })
        .in_action(Action::Install, "web")
        .into();

        assert!(matches!(err, CliError::Render(_)));
        assert_eq!(err.exit_code(), exit_codes::TEMPLATE_ERROR);
    }
}
