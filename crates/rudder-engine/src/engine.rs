//! Template engine based on MiniJinja

use indexmap::IndexMap;
use minijinja::Environment;
use rudder_core::{Capabilities, Chart, PostRendererConfig, ReleaseContext, TemplateContext, Values};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::arena::{ChartArena, ChartNode};
use crate::error::{EngineError, Result, TemplateError};
use crate::filters;
use crate::functions::{self, DEFAULT_MAX_INCLUDE_DEPTH, RenderState, ResourceLookup};

/// Name of the template rendered into release notes
pub const NOTES_TEMPLATE: &str = "NOTES.txt";

/// Per-chart facts the manifest sorter and post-renderer need
#[derive(Debug, Clone, PartialEq)]
pub struct ChartNodeInfo {
    pub weight: i32,
    pub post_renderer: Option<PostRendererConfig>,
}

/// Result of rendering a chart tree
#[derive(Debug, Clone, Default)]
pub struct RenderOutput {
    /// Rendered manifests by template path ID, in render order
    pub manifests: IndexMap<String, String>,

    /// Root chart notes, if it has a NOTES.txt
    pub notes: Option<String>,

    /// Downgraded problems (lint mode, skipped templates)
    pub warnings: Vec<String>,

    /// Every rendered chart by path ID
    pub charts: IndexMap<String, ChartNodeInfo>,
}

impl RenderOutput {
    /// All manifests joined into one YAML stream
    pub fn manifest_stream(&self) -> String {
        let mut out = String::new();
        for (path, body) in &self.manifests {
            out.push_str("---\n# Source: ");
            out.push_str(path);
            out.push('\n');
            out.push_str(body.trim_end());
            out.push('\n');
        }
        out
    }
}

/// Template engine builder
pub struct EngineBuilder {
    strict_mode: bool,
    lint: bool,
    dry_run: bool,
    max_include_depth: usize,
    allow_missing_dependencies: bool,
    capabilities: Capabilities,
    lookup: Option<Arc<dyn ResourceLookup>>,
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self {
            strict_mode: true,
            lint: false,
            dry_run: false,
            max_include_depth: DEFAULT_MAX_INCLUDE_DEPTH,
            allow_missing_dependencies: false,
            capabilities: Capabilities::default(),
            lookup: None,
        }
    }

    /// Set strict mode (fail on undefined variables)
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict_mode = strict;
        self
    }

    /// Downgrade `required` failures to warnings
    pub fn lint(mut self, lint: bool) -> Self {
        self.lint = lint;
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn max_include_depth(mut self, depth: usize) -> Self {
        self.max_include_depth = depth;
        self
    }

    /// Render what is present instead of failing on absent sub-charts
    pub fn allow_missing_dependencies(mut self, allow: bool) -> Self {
        self.allow_missing_dependencies = allow;
        self
    }

    pub fn capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Live object access for the `lookup` function
    pub fn lookup(mut self, lookup: Arc<dyn ResourceLookup>) -> Self {
        self.lookup = Some(lookup);
        self
    }

    /// Build the engine
    pub fn build(self) -> Engine {
        // lint and dry-run never reach the cluster
        let lookup = if self.lint || self.dry_run {
            None
        } else {
            self.lookup
        };

        Engine {
            strict_mode: self.strict_mode,
            lint: self.lint,
            max_include_depth: self.max_include_depth,
            allow_missing_dependencies: self.allow_missing_dependencies,
            capabilities: self.capabilities,
            lookup,
        }
    }
}

/// The template engine
///
/// Holds configuration only. Every render call builds its own environment
/// and bookkeeping, so one engine can render concurrently.
#[derive(Clone)]
pub struct Engine {
    strict_mode: bool,
    lint: bool,
    max_include_depth: usize,
    allow_missing_dependencies: bool,
    capabilities: Capabilities,
    lookup: Option<Arc<dyn ResourceLookup>>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("strict_mode", &self.strict_mode)
            .field("lint", &self.lint)
            .field("max_include_depth", &self.max_include_depth)
            .field("lookup", &self.lookup.is_some())
            .finish()
    }
}

impl Engine {
    /// Create a builder
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    /// Strict engine, undefined variables are errors
    pub fn strict() -> Self {
        EngineBuilder::new().build()
    }

    /// Lenient engine, undefined variables render empty
    pub fn lenient() -> Self {
        EngineBuilder::new().strict(false).build()
    }

    /// Lint-mode engine with default configuration
    pub fn lint() -> Self {
        Self::strict().linting()
    }

    /// Copy of this engine in lint mode, keeping its capabilities and limits
    pub fn linting(&self) -> Self {
        Self {
            strict_mode: false,
            lint: true,
            allow_missing_dependencies: true,
            lookup: None,
            ..self.clone()
        }
    }

    pub fn is_lint(&self) -> bool {
        self.lint
    }

    /// Copy of this engine that skips absent sub-charts with a warning
    pub fn allowing_missing_dependencies(&self) -> Self {
        Self {
            allow_missing_dependencies: true,
            ..self.clone()
        }
    }

    /// Copy of this engine with live lookups disabled, for dry runs
    pub fn offline(&self) -> Self {
        Self {
            lookup: None,
            ..self.clone()
        }
    }

    /// Create a configured MiniJinja environment bound to one render
    fn create_environment(&self, state: &Arc<RenderState>) -> Environment<'static> {
        let mut env = Environment::new();

        if self.strict_mode {
            env.set_undefined_behavior(minijinja::UndefinedBehavior::Strict);
        } else {
            env.set_undefined_behavior(minijinja::UndefinedBehavior::Lenient);
        }

        env.add_filter("toyaml", filters::toyaml);
        env.add_filter("tojson", filters::tojson);
        env.add_filter("b64encode", filters::b64encode);
        env.add_filter("b64decode", filters::b64decode);
        env.add_filter("quote", filters::quote);
        env.add_filter("indent", filters::indent);
        env.add_filter("nindent", filters::nindent);
        env.add_filter("sha256", filters::sha256);

        functions::register(&mut env, state);

        env
    }

    fn new_state(&self) -> Arc<RenderState> {
        Arc::new(RenderState::new(
            self.max_include_depth,
            self.lint,
            self.lookup.clone(),
        ))
    }

    /// Render a single template string
    pub fn render_string(
        &self,
        template: &str,
        context: &TemplateContext,
        template_name: &str,
    ) -> Result<String> {
        let state = self.new_state();
        let mut env = self.create_environment(&state);

        env.add_template_owned(template_name.to_string(), template.to_string())
            .map_err(|e| TemplateError::from_minijinja(&e, template_name, |_| Some(template)))?;

        let tmpl = env
            .get_template(template_name)
            .map_err(|e| TemplateError::from_minijinja(&e, template_name, |_| Some(template)))?;

        tmpl.render(context_value(context)).map_err(|e| {
            match state.take_missing() {
                Some(key) => EngineError::MissingValue {
                    key,
                    template: template_name.to_string(),
                },
                None => TemplateError::from_minijinja(&e, template_name, |_| Some(template)).into(),
            }
        })
    }

    /// Render a chart and all its enabled sub-charts
    ///
    /// `values` are the coalesced values of the root chart. Charts render
    /// depth-first, parents first; each sees only its scoped values.
    pub fn render(
        &self,
        chart: &Chart,
        values: &Values,
        release: &ReleaseContext,
    ) -> Result<RenderOutput> {
        let arena = ChartArena::build(chart, values);
        let mut output = RenderOutput::default();

        let missing = arena.missing_dependencies();
        if !missing.is_empty() {
            if !self.allow_missing_dependencies {
                return Err(EngineError::MissingDependency {
                    chart: chart.name().to_string(),
                    missing: missing.to_vec(),
                });
            }
            for path in missing {
                output
                    .warnings
                    .push(format!("sub-chart {} is missing and was not rendered", path));
            }
        }

        let state = self.new_state();
        let mut env = self.create_environment(&state);
        let sources = register_templates(&mut env, &arena, &mut output.warnings)?;
        let source_of = |name: &str| sources.get(name).map(String::as_str);

        for node in arena.nodes() {
            output.charts.insert(
                node.path.clone(),
                ChartNodeInfo {
                    weight: node.chart.metadata().weight,
                    post_renderer: node.chart.definition.post_renderer.clone(),
                },
            );

            if node.chart.is_library() {
                continue;
            }

            for file in node.chart.templates.iter().filter(|t| !t.is_partial()) {
                let id = template_id(node, &file.name);
                let ctx = TemplateContext::new(
                    node.values.clone(),
                    release.clone(),
                    node.chart.metadata(),
                )
                .with_template(&id, &node.templates_path())
                .with_capabilities(self.capabilities.clone());

                let tmpl = env
                    .get_template(&id)
                    .map_err(|e| TemplateError::from_minijinja(&e, &id, source_of))?;

                let rendered = tmpl.render(context_value(&ctx)).map_err(|e| {
                    match state.take_missing() {
                        Some(key) => EngineError::MissingValue {
                            key,
                            template: id.clone(),
                        },
                        None => TemplateError::from_minijinja(&e, &id, source_of).into(),
                    }
                })?;

                if is_notes(&file.name) {
                    if node.parent.is_none() {
                        output.notes = Some(rendered);
                    }
                    continue;
                }

                let trimmed = rendered.trim();
                if trimmed.is_empty() || trimmed == "---" {
                    tracing::debug!(template = %id, "template rendered empty, skipping");
                    continue;
                }
                output.manifests.insert(id, rendered);
            }
        }

        output.warnings.extend(state.take_warnings());
        tracing::debug!(
            chart = %chart.name(),
            manifests = output.manifests.len(),
            charts = output.charts.len(),
            "rendered chart"
        );

        Ok(output)
    }
}

fn context_value(ctx: &TemplateContext) -> minijinja::Value {
    minijinja::context! {
        values => &ctx.values,
        release => &ctx.release,
        chart => &ctx.chart,
        capabilities => &ctx.capabilities,
        template => &ctx.template,
    }
}

fn template_id(node: &ChartNode<'_>, name: &str) -> String {
    format!("{}/{}", node.path, name)
}

fn is_notes(name: &str) -> bool {
    name.rsplit('/').next() == Some(NOTES_TEMPLATE)
}

/// Add every template of the tree to `env`, shallowest first
///
/// Partials are also registered under their name relative to `templates/`
/// so that `include('_helpers.tpl')` resolves. The first registration of a
/// short name wins, so a root partial shadows a sub-chart partial with the
/// same name. Returns template sources by every registered name.
fn register_templates(
    env: &mut Environment<'static>,
    arena: &ChartArena<'_>,
    warnings: &mut Vec<String>,
) -> Result<HashMap<String, String>> {
    let mut entries: Vec<(String, &ChartNode<'_>, &rudder_core::TemplateFile)> = Vec::new();
    for node in arena.nodes() {
        for file in &node.chart.templates {
            if node.chart.is_library() && !file.is_partial() {
                warnings.push(format!(
                    "{}: library charts only provide partials, template skipped",
                    template_id(node, &file.name)
                ));
                continue;
            }
            entries.push((template_id(node, &file.name), node, file));
        }
    }
    entries.sort_by(|a, b| {
        a.0.matches('/')
            .count()
            .cmp(&b.0.matches('/').count())
            .then_with(|| a.0.cmp(&b.0))
    });

    let mut sources = HashMap::new();
    let mut short_names = HashSet::new();

    for (id, _, file) in entries {
        env.add_template_owned(id.clone(), file.data.clone())
            .map_err(|e| TemplateError::from_minijinja(&e, &id, |_| Some(file.data.as_str())))?;
        sources.insert(id.clone(), file.data.clone());

        if file.is_partial() {
            let short = file
                .name
                .strip_prefix("templates/")
                .unwrap_or(&file.name)
                .to_string();
            if short_names.insert(short.clone()) {
                env.add_template_owned(short.clone(), file.data.clone())
                    .map_err(|e| {
                        TemplateError::from_minijinja(&e, &id, |_| Some(file.data.as_str()))
                    })?;
                sources.insert(short, file.data.clone());
            } else {
                tracing::trace!(template = %id, "partial shadowed by a shallower one");
            }
        }
    }

    Ok(sources)
}
