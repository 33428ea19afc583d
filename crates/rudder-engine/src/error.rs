//! Renderer error types

use miette::{Diagnostic, NamedSource, SourceSpan};
use rudder_core::CoreError;
use thiserror::Error;

/// Main engine error type
#[derive(Error, Debug, Diagnostic)]
pub enum EngineError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Template(#[from] TemplateError),

    /// A `required` assertion found no value
    #[error("missing required value `{key}` (in {template})")]
    #[diagnostic(
        code(rudder::render::missing_value),
        help("set it in a values file or with --set")
    )]
    MissingValue { key: String, template: String },

    /// Declared sub-charts absent from `charts/`
    #[error("chart {chart} is missing dependencies: {}", .missing.join(", "))]
    #[diagnostic(
        code(rudder::render::missing_dependency),
        help("vendor the sub-charts into charts/ or request a dependency update")
    )]
    MissingDependency { chart: String, missing: Vec<String> },

    #[error(transparent)]
    #[diagnostic(code(rudder::core))]
    Core(#[from] CoreError),
}

/// Error kind for categorizing template errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum TemplateErrorKind {
    UndefinedVariable,
    UnknownFilter,
    UnknownFunction,
    SyntaxError,
    TypeError,
    InvalidOperation,
    Other,
}

impl From<minijinja::ErrorKind> for TemplateErrorKind {
    fn from(kind: minijinja::ErrorKind) -> Self {
        match kind {
            minijinja::ErrorKind::UndefinedError => Self::UndefinedVariable,
            minijinja::ErrorKind::UnknownFilter => Self::UnknownFilter,
            minijinja::ErrorKind::UnknownFunction => Self::UnknownFunction,
            minijinja::ErrorKind::SyntaxError => Self::SyntaxError,
            minijinja::ErrorKind::InvalidOperation => Self::InvalidOperation,
            minijinja::ErrorKind::NonPrimitive | minijinja::ErrorKind::NonKey => Self::TypeError,
            _ => Self::Other,
        }
    }
}

/// Template error carrying file and line
#[derive(Error, Debug, Diagnostic, Clone)]
#[error("{template}{}: {message}", .line.map(|l| format!(":{}", l)).unwrap_or_default())]
#[diagnostic(code(rudder::template::render))]
pub struct TemplateError {
    pub message: String,

    pub kind: TemplateErrorKind,

    /// Path ID of the template where the error occurred
    pub template: String,

    /// 1-based line number, when known
    pub line: Option<usize>,

    #[source_code]
    pub src: NamedSource<String>,

    #[label("error occurred here")]
    pub span: Option<SourceSpan>,
}

impl TemplateError {
    /// Build from a MiniJinja error
    ///
    /// `source_of` resolves a template name to its text; the error may point
    /// into an included template rather than the one being rendered.
    pub fn from_minijinja<'a>(
        err: &minijinja::Error,
        rendering: &str,
        source_of: impl Fn(&str) -> Option<&'a str>,
    ) -> Self {
        let template = err.name().unwrap_or(rendering).to_string();
        let source = source_of(&template).unwrap_or_default().to_string();
        let line = err.line();
        let span = line.and_then(|l| calculate_span(&source, l));

        let message = match err.detail() {
            Some(detail) => format!("{}: {}", err.kind(), detail),
            None => err.kind().to_string(),
        };

        Self {
            message,
            kind: err.kind().into(),
            src: NamedSource::new(template.clone(), source),
            template,
            line,
            span,
        }
    }
}

/// Span covering one 1-based line
fn calculate_span(source: &str, line_num: usize) -> Option<SourceSpan> {
    let mut offset = 0;

    for (idx, line) in source.lines().enumerate() {
        if idx + 1 == line_num {
            return Some(SourceSpan::new(offset.into(), line.len()));
        }
        offset += line.len() + 1;
    }

    None
}

pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_calculate_span() {
        let source = "a: 1\nbb: 2\nccc: 3";
        let span = calculate_span(source, 2).unwrap();
        assert_eq!(span.offset(), 5);
        assert_eq!(span.len(), 5);
        assert!(calculate_span(source, 9).is_none());
    }

    #[test]
    fn test_display_includes_position() {
        let mut env = minijinja::Environment::new();
        let err = env
            .add_template("web/templates/x.yaml", "ok\n{% if %}")
            .unwrap_err();
        let te = TemplateError::from_minijinja(&err, "web/templates/x.yaml", |_| {
            Some("ok\n{% if %}")
        });

        assert_eq!(te.kind, TemplateErrorKind::SyntaxError);
        assert_eq!(te.line, Some(2));
        assert!(te.to_string().starts_with("web/templates/x.yaml:2: "));
    }

    #[test]
    fn test_missing_dependency_message() {
        let err = EngineError::MissingDependency {
            chart: "web".to_string(),
            missing: vec!["common".to_string(), "redis".to_string()],
        };
        assert_eq!(err.to_string(), "chart web is missing dependencies: common, redis");
    }
}
