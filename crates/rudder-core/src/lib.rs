//! Rudder Core - foundational types for the release lifecycle engine
//!
//! - `Chart`: a template bundle with defaults and embedded sub-charts
//! - `Values`: value trees with deep merge
//! - `coalesce`: layered value resolution across the chart tree
//! - `TemplateContext`: what templates see while rendering

pub mod archive;
pub mod chart;
pub mod coalesce;
pub mod context;
pub mod error;
pub mod values;

pub use chart::{
    Chart, ChartDefinition, ChartKind, ChartMetadata, Dependency, ImportValue,
    PostRendererConfig, TemplateFile,
};
pub use coalesce::{ValueOverrides, coalesce, coalesce_values};
pub use context::{Capabilities, ChartInfo, KubeVersion, ReleaseContext, TemplateContext};
pub use error::{CoreError, Result};
pub use values::{GLOBAL_KEY, Values, parse_set_values};
