//! Status command - show the latest version of a release

use console::style;

use super::Context;
use crate::display;
use crate::error::Result;

pub async fn run(ctx: &Context, name: &str, version: Option<u32>, show_manifest: bool, output_json: bool) -> Result<()> {
    let store = ctx.store().await?;
    let release = match version {
        Some(v) => store.get(&ctx.namespace, name, v).await?,
        None => store.last(&ctx.namespace, name).await?,
    };

    if output_json {
        println!("{}", serde_json::to_string_pretty(&release)?);
        return Ok(());
    }

    println!("{}       {}", style("NAME:").bold(), style(&release.name).cyan());
    println!("{}  {}", style("NAMESPACE:").bold(), release.namespace);
    println!("{}    {}", style("VERSION:").bold(), style(release.version).yellow());
    println!("{}     {}", style("STATUS:").bold(), display::status(release.status()));
    println!("{}      {}", style("CHART:").bold(), display::chart_label(&release));
    println!("{}    {}", style("UPDATED:").bold(), display::timestamp(&release));
    println!("{} {}", style("DESCRIPTION:").bold(), release.info.description);

    if !release.hooks.is_empty() {
        println!("\n{}", style("HOOKS:").bold());
        display::hook_results(&release.hooks);
    }
    if show_manifest {
        println!("\n{}", style("MANIFEST:").bold());
        println!("{}", release.manifest);
    }
    if let Some(notes) = &release.info.notes {
        println!("\n{}", style("NOTES:").bold());
        println!("{}", notes.trim_end());
    }
    Ok(())
}
