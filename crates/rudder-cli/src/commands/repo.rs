//! Repository management commands

use console::style;
use rudder_repo::{HttpFetcher, RefreshOptions, Repository, RepositoryConfig, refresh_all};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::display::pluralize;
use crate::error::Result;

fn config_path(explicit: Option<&Path>) -> Result<PathBuf> {
    match explicit {
        Some(path) => Ok(path.to_path_buf()),
        None => Ok(RepositoryConfig::default_path()?),
    }
}

/// Add a new repository
pub fn add(config_file: Option<&Path>, name: &str, url: &str) -> Result<()> {
    let path = config_path(config_file)?;
    let mut config = RepositoryConfig::load_or_default(&path)?;

    config.add(Repository::new(name, url)?)?;
    config.save_to(&path)?;

    println!("\"{}\" has been added to your repositories", style(name).cyan());
    println!("\nRun 'rudder repo update {}' to fetch the index", name);
    Ok(())
}

/// Remove a repository
pub fn remove(config_file: Option<&Path>, name: &str) -> Result<()> {
    let path = config_path(config_file)?;
    let mut config = RepositoryConfig::load_or_default(&path)?;

    config.remove(name)?;
    config.save_to(&path)?;

    println!("\"{}\" has been removed from your repositories", style(name).cyan());
    Ok(())
}

/// List configured repositories
pub fn list(config_file: Option<&Path>) -> Result<()> {
    let config = RepositoryConfig::load_or_default(&config_path(config_file)?)?;

    if config.repositories.is_empty() {
        println!("No repositories configured");
        println!("\nAdd one with: rudder repo add <name> <url>");
        return Ok(());
    }

    println!(
        "{:<20} {:<50} {}",
        style("NAME").bold(),
        style("URL").bold(),
        style("LAST UPDATED").bold()
    );
    for repo in &config.repositories {
        let updated = repo
            .last_updated
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "never".to_string());
        println!("{:<20} {:<50} {}", style(&repo.name).cyan(), repo.url, updated);
    }
    Ok(())
}

/// Refresh indexes of the named repositories, or all of them
pub async fn update(
    config_file: Option<&Path>,
    names: &[String],
    fail_on_any: bool,
    cache_dir: Option<&Path>,
) -> Result<()> {
    let path = config_path(config_file)?;
    let mut config = RepositoryConfig::load_or_default(&path)?;
    let repos = config.select(names)?;
    if repos.is_empty() {
        println!("No repositories configured");
        return Ok(());
    }

    let cache_dir = match cache_dir {
        Some(dir) => dir.to_path_buf(),
        None => RepositoryConfig::default_cache_dir()?,
    };
    let options = RefreshOptions {
        fail_on_any: fail_on_any || config.fail_on_any,
        cache_dir: Some(cache_dir),
    };

    println!(
        "{} Refreshing {}...",
        style("→").blue().bold(),
        pluralize(repos.len(), "repository", "repositories")
    );
    let report = refresh_all(Arc::new(HttpFetcher::new()?), &repos, &options).await?;

    let now = chrono::Utc::now();
    for refreshed in &report.updated {
        println!(
            "  {} {} ({})",
            style("✓").green(),
            style(&refreshed.name).cyan(),
            pluralize(refreshed.versions, "chart version", "chart versions")
        );
        if let Some(repo) = config.repositories.iter_mut().find(|r| r.name == refreshed.name) {
            repo.last_updated = Some(now);
        }
    }
    for (name, err) in &report.failed {
        println!("  {} {}: {}", style("✗").red(), style(name).cyan(), err);
    }
    config.save_to(&path)?;

    if report.is_complete() {
        println!("{} Update complete", style("✓").green().bold());
    } else {
        println!(
            "{} Update finished with {}",
            style("⚠").yellow(),
            pluralize(report.failed.len(), "failure", "failures")
        );
    }
    Ok(())
}
