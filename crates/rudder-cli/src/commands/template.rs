//! Template command - render a chart locally

use console::style;
use rudder_engine::Engine;
use rudder_kube::{ExecPostRenderer, PostRenderer, RenderOptions, Resource, render_chart};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use super::{Context, load_chart};
use crate::display::pluralize;
use crate::error::Result;

#[allow(clippy::too_many_arguments)]
pub async fn run(
    ctx: &Context,
    name: &str,
    chart_path: &Path,
    values_files: &[PathBuf],
    set: &[String],
    output_dir: Option<&Path>,
    show_only: &[String],
    skip_hooks: bool,
    lint: bool,
    show_values: bool,
) -> Result<()> {
    let (chart, overrides) = load_chart(chart_path, values_files, set)?;

    let options = RenderOptions {
        name: name.to_string(),
        namespace: ctx.namespace.clone(),
        lint,
        dependency_update: false,
        include_hooks: !skip_hooks,
        show_only: show_only.to_vec(),
    };
    let post = ctx
        .post_renderer
        .as_ref()
        .map(|(command, args)| ExecPostRenderer::new(command.clone(), args.clone()));

    let rendered = render_chart(
        &Engine::strict(),
        &chart,
        &overrides,
        &options,
        post.as_ref().map(|p| p as &dyn PostRenderer),
    )
    .await?;

    for warning in &rendered.warnings {
        eprintln!("{} {}", style("⚠").yellow(), warning);
    }

    if show_values {
        let values = rudder_core::coalesce(&chart, &overrides)?;
        println!("# Computed values");
        println!("{}", serde_yaml::to_string(&values)?);
    }

    let mut documents: Vec<&Resource> = rendered.resources.iter().collect();
    documents.extend(rendered.hooks.iter().map(|h| &h.resource));

    match output_dir {
        Some(dir) => {
            let written = write_documents(dir, &documents)?;
            eprintln!(
                "{} Wrote {} to {}",
                style("✓").green().bold(),
                pluralize(written, "file", "files"),
                style(dir.display()).cyan()
            );
        }
        None => {
            for doc in &documents {
                println!("---\n# Source: {}\n{}", doc.source, doc.manifest.trim_end());
            }
            if let Some(notes) = &rendered.notes {
                println!("\n# NOTES:\n{}", notes.trim_end());
            }
        }
    }
    Ok(())
}

/// One file per template; documents from the same template share it
fn write_documents(dir: &Path, documents: &[&Resource]) -> Result<usize> {
    let mut files: BTreeMap<PathBuf, String> = BTreeMap::new();
    for doc in documents {
        let content = files.entry(dir.join(&doc.source)).or_default();
        content.push_str("---\n");
        content.push_str(doc.manifest.trim_end());
        content.push('\n');
    }

    for (path, content) in &files {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
    }
    Ok(files.len())
}
