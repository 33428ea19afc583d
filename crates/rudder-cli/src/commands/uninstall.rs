//! Uninstall command - remove a release's resources

use console::style;
use rudder_kube::UninstallOptions;

use super::Context;
use crate::error::Result;

pub async fn run(ctx: &Context, options: UninstallOptions) -> Result<()> {
    println!(
        "{} Uninstalling {} from namespace {}",
        style("→").blue().bold(),
        style(&options.name).cyan(),
        style(&options.namespace).yellow()
    );

    let manager = ctx.manager().await?;
    let release = manager.uninstall(&options).await?;

    if options.dry_run {
        println!(
            "{} Dry run - would delete these resources:",
            style("✓").green().bold()
        );
        println!("{}", release.manifest);
        return Ok(());
    }

    println!(
        "{} Uninstalled {}",
        style("✓").green().bold(),
        style(&release.name).cyan()
    );
    if options.keep_history {
        println!(
            "  History kept; version {} is marked {}",
            style(release.version).yellow(),
            release.status()
        );
    } else {
        println!("  All release records deleted");
    }
    Ok(())
}
