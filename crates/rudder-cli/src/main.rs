//! Rudder CLI - release lifecycle manager for Kubernetes charts

use clap::{Parser, Subcommand};
use rudder_kube::{
    DriverKind, InstallOptions, ReleaseStatus, RollbackOptions, TestOptions, UninstallOptions,
    UpgradeOptions,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

mod commands;
mod display;
mod error;
mod exit_codes;

use commands::Context;
use error::CliError;

#[derive(Parser)]
#[command(name = "rudder")]
#[command(author = "Rudder Contributors")]
#[command(version)]
#[command(about = "Release lifecycle manager for Kubernetes charts", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug output
    #[arg(long, global = true)]
    debug: bool,

    /// Target namespace
    #[arg(short, long, global = true, default_value = "default")]
    namespace: String,

    /// Release storage backend (secret, configmap, file, memory)
    #[arg(long, global = true, env = "RUDDER_DRIVER", default_value = "secret")]
    driver: DriverKind,

    /// Directory for the file storage backend
    #[arg(long, global = true, env = "RUDDER_STORAGE_DIR")]
    storage_dir: Option<PathBuf>,

    /// Executable the rendered manifest stream is piped through
    #[arg(long, global = true)]
    post_renderer: Option<String>,

    /// Arguments passed to the post-renderer
    #[arg(long, global = true, requires = "post_renderer", allow_hyphen_values = true)]
    post_renderer_args: Vec<String>,
}

/// Flags shared by commands that render a chart
#[derive(clap::Args)]
struct ChartArgs {
    /// Chart directory
    chart: PathBuf,

    /// Values file(s) to merge, later files win
    #[arg(short = 'f', long = "values")]
    values: Vec<PathBuf>,

    /// Set values on command line (key=value)
    #[arg(long = "set")]
    set: Vec<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Render chart templates locally
    Template {
        /// Release name (for template context)
        name: String,

        #[command(flatten)]
        chart: ChartArgs,

        /// Write one file per template under this directory
        #[arg(long)]
        output_dir: Option<PathBuf>,

        /// Render only these templates
        #[arg(short = 's', long)]
        show_only: Vec<String>,

        /// Leave hook documents out
        #[arg(long)]
        skip_hooks: bool,

        /// Report `required` failures as warnings
        #[arg(long)]
        lint: bool,

        /// Print the computed values first
        #[arg(long)]
        show_values: bool,
    },

    /// Install a chart as a new release
    Install {
        /// Release name
        name: String,

        #[command(flatten)]
        chart: ChartArgs,

        /// Wait for resources to be ready
        #[arg(long)]
        wait: bool,

        /// Readiness timeout in seconds
        #[arg(long, default_value = "300")]
        timeout: u64,

        /// Per-hook timeout in seconds
        #[arg(long, default_value = "300")]
        hook_timeout: u64,

        /// Uninstall the attempt if it fails; implies --wait
        #[arg(long)]
        atomic: bool,

        /// Re-use a name that is still deployed
        #[arg(long)]
        replace: bool,

        /// Create the namespace if it does not exist
        #[arg(long)]
        create_namespace: bool,

        /// Skip hooks
        #[arg(long)]
        no_hooks: bool,

        /// Render missing dependencies as empty
        #[arg(long)]
        dependency_update: bool,

        /// Describe this version
        #[arg(long)]
        description: Option<String>,

        /// Render without touching the cluster or storage
        #[arg(long)]
        dry_run: bool,
    },

    /// Upgrade a release to a new chart or values
    Upgrade {
        /// Release name
        name: String,

        #[command(flatten)]
        chart: ChartArgs,

        /// Install if the release does not exist
        #[arg(short, long)]
        install: bool,

        /// Merge new values over the previous version's
        #[arg(long, conflicts_with = "reset_values")]
        reuse_values: bool,

        /// Start from the chart defaults only
        #[arg(long)]
        reset_values: bool,

        /// Replace resources that cannot be patched
        #[arg(long)]
        force: bool,

        /// Wait for resources to be ready
        #[arg(long)]
        wait: bool,

        /// Readiness timeout in seconds
        #[arg(long, default_value = "300")]
        timeout: u64,

        /// Per-hook timeout in seconds
        #[arg(long, default_value = "300")]
        hook_timeout: u64,

        /// Roll back if the upgrade fails; implies --wait
        #[arg(long)]
        atomic: bool,

        /// Delete resources this upgrade created if it fails
        #[arg(long)]
        cleanup_on_fail: bool,

        /// Skip hooks
        #[arg(long)]
        no_hooks: bool,

        /// Versions to keep (0 for unlimited)
        #[arg(long, default_value = "10")]
        history_max: u32,

        /// Describe this version
        #[arg(long)]
        description: Option<String>,

        /// Render without touching the cluster or storage
        #[arg(long)]
        dry_run: bool,
    },

    /// Roll a release back to an earlier version
    Rollback {
        /// Release name
        name: String,

        /// Target version (0 or omitted for the previous one)
        #[arg(default_value = "0", allow_negative_numbers = true)]
        revision: i64,

        /// Wait for resources to be ready
        #[arg(long)]
        wait: bool,

        /// Readiness timeout in seconds
        #[arg(long, default_value = "300")]
        timeout: u64,

        /// Per-hook timeout in seconds
        #[arg(long, default_value = "300")]
        hook_timeout: u64,

        /// Replace resources that cannot be patched
        #[arg(long)]
        force: bool,

        /// Skip hooks
        #[arg(long)]
        no_hooks: bool,

        /// Versions to keep (0 for unlimited)
        #[arg(long, default_value = "10")]
        history_max: u32,

        /// Validate without touching the cluster or storage
        #[arg(long)]
        dry_run: bool,
    },

    /// Uninstall a release
    Uninstall {
        /// Release name
        name: String,

        /// Delete every stored version as well
        #[arg(long)]
        purge: bool,

        /// Skip hooks
        #[arg(long)]
        no_hooks: bool,

        /// Per-hook timeout in seconds
        #[arg(long, default_value = "300")]
        hook_timeout: u64,

        /// Describe the uninstalled version
        #[arg(long)]
        description: Option<String>,

        /// Show what would be deleted
        #[arg(long)]
        dry_run: bool,
    },

    /// Run a release's test hooks
    Test {
        /// Release name
        name: String,

        /// Per-test timeout in seconds
        #[arg(long, default_value = "300")]
        timeout: u64,
    },

    /// Show release history
    History {
        /// Release name
        name: String,

        /// Show at most this many of the latest versions
        #[arg(long)]
        max: Option<usize>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show release status
    Status {
        /// Release name
        name: String,

        /// Show this version instead of the latest
        #[arg(long)]
        revision: Option<u32>,

        /// Include the rendered manifest
        #[arg(long)]
        show_manifest: bool,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// List releases
    List {
        /// List releases across all namespaces
        #[arg(short = 'A', long)]
        all_namespaces: bool,

        /// Only releases in these states
        #[arg(long = "status")]
        statuses: Vec<ReleaseStatus>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the values stored with a release
    GetValues {
        /// Release name
        name: String,

        /// Version to read (latest if omitted)
        #[arg(long)]
        revision: Option<u32>,

        /// Show all computed values, not only user-supplied ones
        #[arg(short, long)]
        all: bool,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Manage chart repositories
    Repo {
        /// Repository configuration file
        #[arg(long, global = true, env = "RUDDER_REPOSITORY_CONFIG")]
        repository_config: Option<PathBuf>,

        #[command(subcommand)]
        command: RepoCommands,
    },
}

#[derive(Subcommand)]
enum RepoCommands {
    /// Add a repository
    Add {
        /// Repository name
        name: String,

        /// Repository URL (http or https)
        url: String,
    },

    /// Remove a repository
    Remove {
        /// Repository name
        name: String,
    },

    /// List configured repositories
    List,

    /// Refresh repository indexes
    Update {
        /// Repositories to refresh (all if none given)
        names: Vec<String>,

        /// Fail if any repository cannot be refreshed
        #[arg(long)]
        fail_on_any: bool,

        /// Where fetched indexes are cached
        #[arg(long, env = "RUDDER_REPOSITORY_CACHE")]
        cache_dir: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    miette::set_panic_hook();

    let cli = Cli::parse();
    init_tracing(cli.debug);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let code = err.exit_code();
            eprintln!("{:?}", miette::Report::new(err));
            ExitCode::from(code)
        }
    }
}

/// Logs go to stderr; `RUST_LOG` overrides the level
fn init_tracing(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn secs(s: u64) -> Duration {
    Duration::from_secs(s)
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let ctx = Context {
        namespace: cli.namespace,
        driver: cli.driver,
        storage_dir: cli.storage_dir,
        post_renderer: cli.post_renderer.map(|command| (command, cli.post_renderer_args)),
    };

    match cli.command {
        Commands::Template {
            name,
            chart,
            output_dir,
            show_only,
            skip_hooks,
            lint,
            show_values,
        } => {
            commands::template::run(
                &ctx,
                &name,
                &chart.chart,
                &chart.values,
                &chart.set,
                output_dir.as_deref(),
                &show_only,
                skip_hooks,
                lint,
                show_values,
            )
            .await
        }

        Commands::Install {
            name,
            chart,
            wait,
            timeout,
            hook_timeout,
            atomic,
            replace,
            create_namespace,
            no_hooks,
            dependency_update,
            description,
            dry_run,
        } => {
            let options = InstallOptions {
                name,
                namespace: ctx.namespace.clone(),
                replace,
                dry_run,
                create_namespace,
                wait: wait || atomic,
                timeout: secs(timeout),
                hook_timeout: secs(hook_timeout),
                atomic,
                no_hooks,
                dependency_update,
                description,
                ..Default::default()
            };
            commands::install::run(&ctx, &chart.chart, &chart.values, &chart.set, options).await
        }

        Commands::Upgrade {
            name,
            chart,
            install,
            reuse_values,
            reset_values,
            force,
            wait,
            timeout,
            hook_timeout,
            atomic,
            cleanup_on_fail,
            no_hooks,
            history_max,
            description,
            dry_run,
        } => {
            let options = UpgradeOptions {
                name,
                namespace: ctx.namespace.clone(),
                install,
                reuse_values,
                reset_values,
                force,
                atomic,
                wait: wait || atomic,
                timeout: secs(timeout),
                hook_timeout: secs(hook_timeout),
                no_hooks,
                dry_run,
                max_history: history_max,
                cleanup_on_fail,
                description,
                ..Default::default()
            };
            commands::upgrade::run(&ctx, &chart.chart, &chart.values, &chart.set, options).await
        }

        Commands::Rollback {
            name,
            revision,
            wait,
            timeout,
            hook_timeout,
            force,
            no_hooks,
            history_max,
            dry_run,
        } => {
            let options = RollbackOptions {
                name,
                namespace: ctx.namespace.clone(),
                version: revision,
                wait,
                timeout: secs(timeout),
                hook_timeout: secs(hook_timeout),
                no_hooks,
                force,
                dry_run,
                max_history: history_max,
            };
            commands::rollback::run(&ctx, options).await
        }

        Commands::Uninstall {
            name,
            purge,
            no_hooks,
            hook_timeout,
            description,
            dry_run,
        } => {
            let options = UninstallOptions {
                name,
                namespace: ctx.namespace.clone(),
                keep_history: !purge,
                no_hooks,
                hook_timeout: secs(hook_timeout),
                dry_run,
                description,
            };
            commands::uninstall::run(&ctx, options).await
        }

        Commands::Test { name, timeout } => {
            let options = TestOptions {
                name,
                namespace: ctx.namespace.clone(),
                timeout: secs(timeout),
            };
            commands::test::run(&ctx, options).await
        }

        Commands::History { name, max, json } => commands::history::run(&ctx, &name, max, json).await,

        Commands::Status {
            name,
            revision,
            show_manifest,
            json,
        } => commands::status::run(&ctx, &name, revision, show_manifest, json).await,

        Commands::List {
            all_namespaces,
            statuses,
            json,
        } => commands::list::run(&ctx, all_namespaces, &statuses, json).await,

        Commands::GetValues {
            name,
            revision,
            all,
            json,
        } => commands::values::run(&ctx, &name, revision, all, json).await,

        Commands::Repo {
            repository_config,
            command,
        } => {
            let config = repository_config.as_deref();
            match command {
                RepoCommands::Add { name, url } => commands::repo::add(config, &name, &url),
                RepoCommands::Remove { name } => commands::repo::remove(config, &name),
                RepoCommands::List => commands::repo::list(config),
                RepoCommands::Update {
                    names,
                    fail_on_any,
                    cache_dir,
                } => commands::repo::update(config, &names, fail_on_any, cache_dir.as_deref()).await,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_upgrade_flags() {
        let cli = Cli::try_parse_from([
            "rudder", "upgrade", "web", "./chart", "-f", "a.yaml", "--set", "x=1", "--install", "--atomic",
            "-n", "prod",
        ])
        .unwrap();
        assert_eq!(cli.namespace, "prod");
        match cli.command {
            Commands::Upgrade {
                name,
                chart,
                install,
                atomic,
                ..
            } => {
                assert_eq!(name, "web");
                assert_eq!(chart.values, vec![PathBuf::from("a.yaml")]);
                assert_eq!(chart.set, vec!["x=1".to_string()]);
                assert!(install && atomic);
            }
            _ => panic!("expected upgrade"),
        }
    }

    #[test]
    fn test_parse_list_statuses() {
        let cli = Cli::try_parse_from(["rudder", "list", "--status", "failed", "--status", "deployed"]).unwrap();
        match cli.command {
            Commands::List { statuses, .. } => {
                assert_eq!(statuses, vec![ReleaseStatus::Failed, ReleaseStatus::Deployed]);
            }
            _ => panic!("expected list"),
        }
    }

    #[test]
    fn test_parse_rollback_revision() {
        let cli = Cli::try_parse_from(["rudder", "rollback", "web", "3"]).unwrap();
        assert!(matches!(cli.command, Commands::Rollback { revision: 3, .. }));

        let cli = Cli::try_parse_from(["rudder", "rollback", "web"]).unwrap();
        assert!(matches!(cli.command, Commands::Rollback { revision: 0, .. }));
    }

    #[test]
    fn test_reuse_and_reset_values_conflict() {
        assert!(Cli::try_parse_from(["rudder", "upgrade", "web", "./chart", "--reuse-values", "--reset-values"]).is_err());
    }
}
