//! Get-values command - values stored with a release version

use super::Context;
use crate::error::Result;

pub async fn run(ctx: &Context, name: &str, version: Option<u32>, all: bool, output_json: bool) -> Result<()> {
    let store = ctx.store().await?;
    let release = match version {
        Some(v) => store.get(&ctx.namespace, name, v).await?,
        None => store.last(&ctx.namespace, name).await?,
    };
    let values = if all { release.values } else { release.config };

    if output_json {
        println!("{}", serde_json::to_string_pretty(&values)?);
    } else if values.is_empty() {
        println!("{{}}");
    } else {
        print!("{}", serde_yaml::to_string(&values)?);
    }
    Ok(())
}
