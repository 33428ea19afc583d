//! Rudder Engine - renders chart trees into manifests
//!
//! - MiniJinja environment with Kubernetes-oriented filters
//! - `include`, `tpl`, `required` and `lookup` scoped to one render call
//! - Depth-first rendering over an arena of chart nodes
//! - Positional errors rendered through miette

pub mod arena;
pub mod engine;
pub mod error;
pub mod filters;
pub mod functions;

pub use arena::{ChartArena, ChartNode};
pub use engine::{ChartNodeInfo, Engine, EngineBuilder, NOTES_TEMPLATE, RenderOutput};
pub use error::{EngineError, Result, TemplateError, TemplateErrorKind};
pub use functions::{DEFAULT_MAX_INCLUDE_DEPTH, ResourceLookup};
