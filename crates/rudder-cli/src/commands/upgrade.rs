//! Upgrade command - roll a release forward to a new version

use console::style;
use rudder_kube::UpgradeOptions;
use std::path::{Path, PathBuf};

use super::{Context, load_chart};
use crate::display;
use crate::error::Result;

pub async fn run(
    ctx: &Context,
    chart_path: &Path,
    values_files: &[PathBuf],
    set: &[String],
    options: UpgradeOptions,
) -> Result<()> {
    let (chart, overrides) = load_chart(chart_path, values_files, set)?;
    println!(
        "{} Upgrading {} to chart {} version {}",
        style("→").blue().bold(),
        style(&options.name).cyan(),
        style(chart.name()).cyan(),
        style(chart.version()).yellow()
    );

    let manager = ctx.manager().await?;
    let release = manager.upgrade(&chart, &overrides, &options).await?;

    if options.dry_run {
        println!(
            "{} Dry run - would upgrade {} to version {}",
            style("✓").green().bold(),
            style(&release.name).cyan(),
            style(release.version).yellow()
        );
        println!("{}", release.manifest);
        return Ok(());
    }

    let verb = if release.version == 1 { "Installed" } else { "Upgraded" };
    display::release_summary(verb, &release);
    Ok(())
}
