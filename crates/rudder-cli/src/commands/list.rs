//! List command - latest version of each release

use console::style;
use rudder_kube::ReleaseStatus;

use super::Context;
use crate::display;
use crate::error::Result;

pub async fn run(
    ctx: &Context,
    all_namespaces: bool,
    statuses: &[ReleaseStatus],
    output_json: bool,
) -> Result<()> {
    let store = ctx.store().await?;
    let namespace = (!all_namespaces).then_some(ctx.namespace.as_str());
    let releases = store.list_filtered(namespace, statuses).await?;

    if output_json {
        println!("{}", serde_json::to_string_pretty(&releases)?);
        return Ok(());
    }

    if releases.is_empty() {
        println!("No releases found");
        return Ok(());
    }

    println!(
        "{:<25} {:<15} {:<10} {:<18} {:<30} {}",
        style("NAME").bold(),
        style("NAMESPACE").bold(),
        style("VERSION").bold(),
        style("STATUS").bold(),
        style("CHART").bold(),
        style("UPDATED").bold()
    );
    for release in &releases {
        println!(
            "{:<25} {:<15} {:<10} {:<18} {:<30} {}",
            style(&release.name).cyan(),
            release.namespace,
            release.version,
            display::status(release.status()),
            display::chart_label(release),
            display::timestamp(release)
        );
    }
    println!(
        "\n{}",
        style(display::pluralize(releases.len(), "release", "releases")).dim()
    );
    Ok(())
}
