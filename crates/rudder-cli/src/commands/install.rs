//! Install command - deploy a chart as a new release

use console::style;
use rudder_kube::InstallOptions;
use std::path::{Path, PathBuf};

use super::{Context, load_chart};
use crate::display;
use crate::error::Result;

pub async fn run(
    ctx: &Context,
    chart_path: &Path,
    values_files: &[PathBuf],
    set: &[String],
    options: InstallOptions,
) -> Result<()> {
    let (chart, overrides) = load_chart(chart_path, values_files, set)?;
    println!(
        "{} Installing chart {} version {}",
        style("→").blue().bold(),
        style(chart.name()).cyan(),
        style(chart.version()).yellow()
    );

    let manager = ctx.manager().await?;
    let release = manager.install(&chart, &overrides, &options).await?;

    if options.dry_run {
        println!(
            "{} Dry run - would install {} in namespace {}",
            style("✓").green().bold(),
            style(&release.name).cyan(),
            style(&release.namespace).yellow()
        );
        println!("{}", release.manifest);
        return Ok(());
    }

    display::release_summary("Installed", &release);
    Ok(())
}
