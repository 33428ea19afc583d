//! Display formatting for CLI output

use console::{StyledObject, style};
use rudder_kube::{Hook, HookPhase, Release, ReleaseStatus};

/// Status colored by outcome
pub fn status(status: ReleaseStatus) -> StyledObject<&'static str> {
    let name = status.as_str();
    match status {
        ReleaseStatus::Deployed => style(name).green(),
        ReleaseStatus::Failed => style(name).red(),
        s if s.is_pending() => style(name).yellow(),
        _ => style(name).dim(),
    }
}

pub fn chart_label(release: &Release) -> String {
    format!("{}-{}", release.chart.name(), release.chart.version())
}

pub fn timestamp(release: &Release) -> String {
    release.info.last_deployed.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Summary printed after a lifecycle action
pub fn release_summary(verb: &str, release: &Release) {
    println!(
        "{} {} {} (version {}) in namespace {}",
        style("✓").green().bold(),
        verb,
        style(&release.name).cyan(),
        style(release.version).yellow(),
        style(&release.namespace).yellow()
    );
    println!("  Status:      {}", status(release.status()));
    println!("  Description: {}", release.info.description);

    if let Some(notes) = &release.info.notes {
        println!("\n{}", style("NOTES:").bold());
        println!("{}", notes.trim_end());
    }
}

/// Last run of each hook
pub fn hook_results(hooks: &[Hook]) {
    for hook in hooks {
        let phase = match hook.last_run.phase {
            HookPhase::Succeeded => style("succeeded").green(),
            HookPhase::Failed => style("failed").red(),
            HookPhase::Running => style("running").yellow(),
            HookPhase::Unknown => style("not run").dim(),
        };
        println!("  {:<30} {}", hook.name, phase);
    }
}

pub fn pluralize(count: usize, singular: &str, plural: &str) -> String {
    if count == 1 {
        format!("{} {}", count, singular)
    } else {
        format!("{} {}", count, plural)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pluralize() {
        assert_eq!(pluralize(1, "repository", "repositories"), "1 repository");
        assert_eq!(pluralize(3, "repository", "repositories"), "3 repositories");
    }

    #[test]
    fn test_status_text() {
        assert!(status(ReleaseStatus::PendingUpgrade).to_string().contains("pending-upgrade"));
    }
}
