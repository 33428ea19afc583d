//! Test command - run a release's test hooks

use console::style;
use rudder_kube::{HookEvent, TestOptions};

use super::Context;
use crate::display;
use crate::error::Result;

pub async fn run(ctx: &Context, options: TestOptions) -> Result<()> {
    println!(
        "{} Running tests for {}",
        style("→").blue().bold(),
        style(&options.name).cyan()
    );

    let manager = ctx.manager().await?;
    let release = manager.test(&options).await?;

    let tests: Vec<_> = release
        .hooks
        .iter()
        .filter(|h| h.runs_at(HookEvent::Test))
        .cloned()
        .collect();
    if tests.is_empty() {
        println!("  No tests defined");
        return Ok(());
    }

    display::hook_results(&tests);
    println!(
        "{} {} passed",
        style("✓").green().bold(),
        display::pluralize(tests.len(), "test", "tests")
    );
    Ok(())
}
