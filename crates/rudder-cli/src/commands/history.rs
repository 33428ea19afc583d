//! History command - show every version of a release

use console::style;

use super::Context;
use crate::display;
use crate::error::Result;

pub async fn run(ctx: &Context, name: &str, max: Option<usize>, output_json: bool) -> Result<()> {
    let store = ctx.store().await?;
    let mut history = store.history(&ctx.namespace, name).await?;

    // newest last; keep the most recent `max`
    if let Some(max) = max
        && history.len() > max
    {
        history.drain(..history.len() - max);
    }

    if output_json {
        println!("{}", serde_json::to_string_pretty(&history)?);
        return Ok(());
    }

    println!(
        "Release history for {} in namespace {}:\n",
        style(name).cyan(),
        style(&ctx.namespace).yellow()
    );
    println!(
        "{:<10} {:<18} {:<30} {:<20} {}",
        style("VERSION").bold(),
        style("STATUS").bold(),
        style("CHART").bold(),
        style("UPDATED").bold(),
        style("DESCRIPTION").bold()
    );
    for release in &history {
        println!(
            "{:<10} {:<18} {:<30} {:<20} {}",
            release.version,
            display::status(release.status()),
            display::chart_label(release),
            display::timestamp(release),
            release.info.description
        );
    }
    Ok(())
}
