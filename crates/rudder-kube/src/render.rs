//! Render pipeline: template, post-render, split, sort

use indexmap::IndexMap;
use rudder_core::{Chart, ReleaseContext, ValueOverrides, Values, coalesce};
use rudder_engine::{Engine, RenderOutput};

use crate::actions::RenderOptions;
use crate::error::Result;
use crate::hooks::Hook;
use crate::manifest::{self, Resource, SplitManifest};
use crate::postrender::{ExecPostRenderer, PostRenderer};

/// File name under which post-rendered output is recorded
const POST_RENDERED: &str = "post-rendered.yaml";

/// A release's rendered state, ready to apply
#[derive(Debug, Clone)]
pub struct Rendered {
    /// Resources in install order, namespaces defaulted
    pub resources: Vec<Resource>,
    pub hooks: Vec<Hook>,
    /// Resources joined with `# Source:` comments, in install order
    pub manifest: String,
    pub notes: Option<String>,
    pub warnings: Vec<String>,
}

/// Render a chart with resolved values into a [`Rendered`] release
///
/// Chart-declared post-renderers run over their own chart's manifests;
/// `post` then runs over the whole stream.
pub async fn render_release(
    engine: &Engine,
    chart: &Chart,
    values: &Values,
    release: &ReleaseContext,
    post: Option<&dyn PostRenderer>,
) -> Result<Rendered> {
    let mut output = render_blocking(engine, chart, values, release).await?;
    apply_chart_post_renderers(&mut output).await?;

    let mut split = match post {
        Some(post) => {
            let stream = post.run(output.manifest_stream()).await?;
            let root = output.charts.keys().next().cloned().unwrap_or_default();
            split_post_rendered(&stream, &root, &manifest::weights_from_output(&output))?
        }
        None => manifest::split_rendered(&output)?,
    };

    manifest::default_namespace(&mut split.resources, &release.namespace);
    for hook in &mut split.hooks {
        manifest::default_namespace(std::slice::from_mut(&mut hook.resource), &release.namespace);
    }
    manifest::sort_for_install(&mut split.resources);

    tracing::debug!(
        release = %release.name,
        resources = split.resources.len(),
        hooks = split.hooks.len(),
        "rendered release"
    );

    Ok(Rendered {
        manifest: manifest::join_resources(&split.resources),
        resources: split.resources,
        hooks: split.hooks,
        notes: output.notes,
        warnings: output.warnings,
    })
}

/// Coalesce and render a chart without installing it
pub async fn render_chart(
    engine: &Engine,
    chart: &Chart,
    overrides: &ValueOverrides,
    options: &RenderOptions,
    post: Option<&dyn PostRenderer>,
) -> Result<Rendered> {
    let values = coalesce(chart, overrides)?;
    let release = ReleaseContext::for_install(&options.name, &options.namespace);

    let mut engine = if options.lint {
        engine.linting()
    } else {
        engine.offline()
    };
    if options.dependency_update {
        engine = engine.allowing_missing_dependencies();
    }

    let mut rendered = render_release(&engine, chart, &values, &release, post).await?;

    if !options.include_hooks {
        rendered.hooks.clear();
    }
    if !options.show_only.is_empty() {
        let wanted = |source: &str| {
            options
                .show_only
                .iter()
                .any(|s| source == s || source.ends_with(&format!("/{}", s)))
        };
        rendered.resources.retain(|r| wanted(&r.source));
        rendered.hooks.retain(|h| wanted(&h.resource.source));
        rendered.manifest = manifest::join_resources(&rendered.resources);
    }
    Ok(rendered)
}

/// Hooks joined as a stream, for display
pub fn join_hooks(hooks: &[Hook]) -> String {
    let resources: Vec<Resource> = hooks.iter().map(|h| h.resource.clone()).collect();
    manifest::join_resources(&resources)
}

// `lookup` blocks on the runtime, so rendering must leave the async context
async fn render_blocking(
    engine: &Engine,
    chart: &Chart,
    values: &Values,
    release: &ReleaseContext,
) -> Result<RenderOutput> {
    let (engine, chart, values, release) =
        (engine.clone(), chart.clone(), values.clone(), release.clone());
    let output = tokio::task::spawn_blocking(move || engine.render(&chart, &values, &release))
        .await
        .map_err(std::io::Error::from)??;
    Ok(output)
}

/// Chart path owning a template path ID; the longest prefix wins
fn owning_chart<'a>(output: &'a RenderOutput, template: &str) -> Option<&'a str> {
    output
        .charts
        .keys()
        .filter(|path| {
            template
                .strip_prefix(path.as_str())
                .is_some_and(|rest| rest.starts_with("/templates/"))
        })
        .max_by_key(|path| path.len())
        .map(String::as_str)
}

async fn apply_chart_post_renderers(output: &mut RenderOutput) -> Result<()> {
    let declared: Vec<(String, ExecPostRenderer)> = output
        .charts
        .iter()
        .filter_map(|(path, info)| info.post_renderer.as_ref().map(|pr| (path.clone(), pr.into())))
        .collect();

    for (chart_path, renderer) in declared {
        let owned: Vec<String> = output
            .manifests
            .keys()
            .filter(|id| owning_chart(output, id) == Some(chart_path.as_str()))
            .cloned()
            .collect();
        if owned.is_empty() {
            continue;
        }

        tracing::debug!(chart = %chart_path, command = renderer.command(), "applying chart post-renderer");

        let mut stream = String::new();
        let mut rest = IndexMap::with_capacity(output.manifests.len());
        for (id, body) in std::mem::take(&mut output.manifests) {
            if owned.contains(&id) {
                stream.push_str("---\n# Source: ");
                stream.push_str(&id);
                stream.push('\n');
                stream.push_str(body.trim_end());
                stream.push('\n');
            } else {
                rest.insert(id, body);
            }
        }

        let filtered = renderer.run(stream).await?;
        rest.insert(format!("{}/templates/{}", chart_path, POST_RENDERED), filtered);
        output.manifests = rest;
    }
    Ok(())
}

/// Split a post-renderer's output; documents before any `# Source:`
/// comment are attributed to the root chart
fn split_post_rendered(
    stream: &str,
    root: &str,
    weights: &manifest::ChartWeights,
) -> Result<SplitManifest> {
    let attributed = format!("---\n# Source: {}/templates/{}\n{}", root, POST_RENDERED, stream);
    manifest::split_stream(&attributed, weights)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use rudder_core::archive::FileMap;
    use rudder_core::{Capabilities, parse_set_values};

    fn chart(files: &[(&str, &str)]) -> Chart {
        let mut map = FileMap::new();
        for (path, body) in files {
            map.insert(path.to_string(), body.as_bytes().to_vec());
        }
        Chart::from_files(map).unwrap()
    }

    fn web_chart() -> Chart {
        chart(&[
            ("Chart.yaml", "apiVersion: rudder/v1\nmetadata:\n  name: web\n  version: 1.0.0\n"),
            ("values.yaml", "replicas: 1\n"),
            (
                "templates/deploy.yaml",
                "apiVersion: apps/v1\nkind: Deployment\nmetadata:\n  name: {{ release.name }}\nspec:\n  replicas: {{ values.replicas }}\n",
            ),
            ("templates/svc.yaml", "apiVersion: v1\nkind: Service\nmetadata:\n  name: {{ release.name }}\n"),
            ("templates/cm.yaml", "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: {{ release.name }}-cfg\n"),
            (
                "templates/job.yaml",
                "apiVersion: batch/v1\nkind: Job\nmetadata:\n  name: migrate\n  annotations:\n    rudder.io/hook: pre-install\n",
            ),
        ])
    }

    struct Upper;

    #[async_trait]
    impl PostRenderer for Upper {
        async fn run(&self, manifest: String) -> Result<String> {
            Ok(manifest.replace("name: myapp", "name: MYAPP"))
        }
    }

    #[tokio::test]
    async fn test_render_release_orders_and_splits() {
        let chart = web_chart();
        let values = coalesce(&chart, &ValueOverrides::new()).unwrap();
        let release = ReleaseContext::for_install("myapp", "prod");

        let rendered = render_release(&Engine::strict(), &chart, &values, &release, None)
            .await
            .unwrap();

        let kinds: Vec<&str> = rendered.resources.iter().map(|r| r.kind.as_str()).collect();
        assert_eq!(kinds, vec!["ConfigMap", "Service", "Deployment"]);
        assert!(rendered.resources.iter().all(|r| r.namespace.as_deref() == Some("prod")));
        assert_eq!(rendered.hooks.len(), 1);
        assert_eq!(rendered.hooks[0].resource.namespace.as_deref(), Some("prod"));
        assert!(rendered.manifest.contains("# Source: web/templates/cm.yaml"));
    }

    #[tokio::test]
    async fn test_render_is_deterministic() {
        let chart = web_chart();
        let values = coalesce(
            &chart,
            &ValueOverrides::new().with_set(parse_set_values(&["replicas=3".to_string()]).unwrap()),
        )
        .unwrap();
        let release = ReleaseContext::for_install("myapp", "default");
        let engine = Engine::strict();

        let first = render_release(&engine, &chart, &values, &release, None).await.unwrap();
        let second = render_release(&engine, &chart, &values, &release, None).await.unwrap();
        assert_eq!(first.manifest, second.manifest);
        assert!(first.manifest.contains("replicas: 3"));
    }

    #[tokio::test]
    async fn test_global_post_renderer_keeps_sources() {
        let chart = web_chart();
        let values = coalesce(&chart, &ValueOverrides::new()).unwrap();
        let release = ReleaseContext::for_install("myapp", "default");

        let rendered = render_release(&Engine::strict(), &chart, &values, &release, Some(&Upper))
            .await
            .unwrap();

        let svc = rendered.resources.iter().find(|r| r.kind == "Service").unwrap();
        assert_eq!(svc.name, "MYAPP");
        assert_eq!(svc.source, "web/templates/svc.yaml");
    }

    #[test]
    fn test_post_rendered_output_without_sources() {
        let stream = "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: a\n---\napiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: b\n";
        let split = split_post_rendered(stream, "web", &Default::default()).unwrap();

        assert_eq!(split.resources.len(), 2);
        assert!(split
            .resources
            .iter()
            .all(|r| r.source == "web/templates/post-rendered.yaml"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_chart_post_renderer_scoped_to_chart() {
        let chart = chart(&[
            (
                "Chart.yaml",
                "apiVersion: rudder/v1\nmetadata:\n  name: web\n  version: 1.0.0\npostRenderer:\n  command: sed\n  args: [\"s/name: cfg/name: filtered/\"]\n",
            ),
            ("templates/cm.yaml", "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: cfg\n"),
        ]);
        let values = coalesce(&chart, &ValueOverrides::new()).unwrap();
        let release = ReleaseContext::for_install("myapp", "default");

        let rendered = render_release(&Engine::strict(), &chart, &values, &release, None)
            .await
            .unwrap();
        assert_eq!(rendered.resources.len(), 1);
        assert_eq!(rendered.resources[0].name, "filtered");
        assert_eq!(rendered.resources[0].source, "web/templates/post-rendered.yaml");
    }

    #[tokio::test]
    async fn test_render_chart_show_only() {
        let chart = web_chart();
        let options = RenderOptions {
            show_only: vec!["svc.yaml".to_string()],
            include_hooks: false,
            ..RenderOptions::new("myapp", "default")
        };

        let rendered = render_chart(&Engine::strict(), &chart, &ValueOverrides::new(), &options, None)
            .await
            .unwrap();
        assert_eq!(rendered.resources.len(), 1);
        assert_eq!(rendered.resources[0].kind, "Service");
        assert!(rendered.hooks.is_empty());
    }

    #[tokio::test]
    async fn test_render_chart_lint_keeps_capabilities() {
        let chart = chart(&[
            ("Chart.yaml", "apiVersion: rudder/v1\nmetadata:\n  name: web\n  version: 1.0.0\n"),
            (
                "templates/cm.yaml",
                "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: cfg\ndata:\n  apis: \"{{ capabilities.apiVersions | join(',') }}\"\n  password: \"{{ values.password | required('password') }}\"\n",
            ),
        ]);
        let engine = Engine::builder()
            .capabilities(Capabilities {
                api_versions: vec!["example.io/v1".to_string()],
                ..Capabilities::default()
            })
            .build();
        let options = RenderOptions {
            lint: true,
            ..RenderOptions::new("myapp", "default")
        };

        let rendered = render_chart(&engine, &chart, &ValueOverrides::new(), &options, None)
            .await
            .unwrap();

        assert!(rendered.manifest.contains("apis: \"example.io/v1\""));
        assert_eq!(rendered.warnings, vec!["missing required value `password`"]);
    }
}
