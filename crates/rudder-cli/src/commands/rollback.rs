//! Rollback command - re-apply an earlier version as a new one

use console::style;
use rudder_kube::RollbackOptions;

use super::Context;
use crate::display;
use crate::error::Result;

pub async fn run(ctx: &Context, options: RollbackOptions) -> Result<()> {
    let target = if options.version == 0 {
        "previous version".to_string()
    } else {
        format!("version {}", options.version)
    };
    println!(
        "{} Rolling back {} to {}",
        style("→").blue().bold(),
        style(&options.name).cyan(),
        style(target).yellow()
    );

    let manager = ctx.manager().await?;
    let release = manager.rollback(&options).await?;

    if options.dry_run {
        println!(
            "{} Dry run - rollback would create version {}",
            style("✓").green().bold(),
            style(release.version).yellow()
        );
        return Ok(());
    }

    display::release_summary("Rolled back", &release);
    Ok(())
}
