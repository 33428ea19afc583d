//! Release lifecycle orchestration
//!
//! [`ReleaseManager`] ties rendering, hooks, the cluster and the release
//! store together for install, upgrade, rollback, uninstall and test.
//!
//! Every mutating action runs as a spawned task. A caller that stops
//! waiting (through a [`CancelToken`] or [`ReleaseManager::cancel`]) gets
//! [`KubeError::Cancelled`] at once, while the task runs on and records
//! the final state of the release.

use rudder_core::{Chart, ReleaseContext, ValueOverrides, Values, coalesce, coalesce_values};
use rudder_engine::Engine;
use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;

use crate::actions::{
    InstallOptions, RollbackOptions, TestOptions, UninstallOptions, UpgradeOptions,
};
use crate::cluster::ClusterClient;
use crate::error::{Action, KubeError, Result};
use crate::hooks::{HookEvent, HookExecutor};
use crate::manifest::{self, Resource, ResourceKey};
use crate::postrender::PostRenderer;
use crate::release::{Release, ReleaseStatus};
use crate::render::{Rendered, render_release};
use crate::storage::ReleaseStore;

/// Longest accepted release name
const MAX_NAME_LEN: usize = 53;

/// Lets a caller stop waiting on an action
///
/// Cancelling never aborts the action itself.
#[derive(Clone)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once cancelled
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        // the sender lives in `self`, so this only returns on cancel
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }

    fn same(&self, other: &CancelToken) -> bool {
        Arc::ptr_eq(&self.tx, &other.tx)
    }
}

type InFlight = Arc<Mutex<HashMap<String, CancelToken>>>;

/// Drives release lifecycle actions
#[derive(Clone)]
pub struct ReleaseManager {
    store: ReleaseStore,
    cluster: Arc<dyn ClusterClient>,
    engine: Engine,
    post_renderer: Option<Arc<dyn PostRenderer>>,
    cancel: Option<CancelToken>,
    in_flight: InFlight,
}

impl ReleaseManager {
    pub fn new(store: ReleaseStore, cluster: Arc<dyn ClusterClient>, engine: Engine) -> Self {
        Self {
            store,
            cluster,
            engine,
            post_renderer: None,
            cancel: None,
            in_flight: Arc::default(),
        }
    }

    /// Run this post-renderer over every rendered manifest stream
    pub fn with_post_renderer(mut self, post_renderer: Arc<dyn PostRenderer>) -> Self {
        self.post_renderer = Some(post_renderer);
        self
    }

    /// A handle whose actions stop waiting once `token` is cancelled
    ///
    /// Shares the in-flight registry with `self`.
    pub fn cancellable(&self, token: CancelToken) -> Self {
        Self {
            cancel: Some(token),
            ..self.clone()
        }
    }

    pub fn store(&self) -> &ReleaseStore {
        &self.store
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Stop waiting on the action in flight for a release
    ///
    /// Returns whether there was one.
    pub fn cancel(&self, namespace: &str, name: &str) -> bool {
        match self.lock_in_flight().get(&in_flight_key(namespace, name)) {
            Some(token) => {
                tracing::info!(release = name, namespace, "cancelling in-flight action");
                token.cancel();
                true
            }
            None => false,
        }
    }

    // ========== Actions ==========

    /// Install a chart as a new release
    pub async fn install(
        &self,
        chart: &Chart,
        overrides: &ValueOverrides,
        options: &InstallOptions,
    ) -> Result<Release> {
        let (this, chart, overrides, opts) =
            (self.clone(), chart.clone(), overrides.clone(), options.clone());
        self.run_detached(Action::Install, &options.namespace, &options.name, async move {
            this.install_inner(&chart, &overrides, &opts).await
        })
        .await
    }

    /// Upgrade a release to a new chart or new values
    pub async fn upgrade(
        &self,
        chart: &Chart,
        overrides: &ValueOverrides,
        options: &UpgradeOptions,
    ) -> Result<Release> {
        let (this, chart, overrides, opts) =
            (self.clone(), chart.clone(), overrides.clone(), options.clone());
        self.run_detached(Action::Upgrade, &options.namespace, &options.name, async move {
            this.upgrade_inner(&chart, &overrides, &opts).await
        })
        .await
    }

    /// Re-apply an earlier version as a new one
    pub async fn rollback(&self, options: &RollbackOptions) -> Result<Release> {
        let (this, opts) = (self.clone(), options.clone());
        self.run_detached(Action::Rollback, &options.namespace, &options.name, async move {
            this.rollback_inner(&opts).await
        })
        .await
    }

    /// Delete a release's resources and mark it uninstalled
    pub async fn uninstall(&self, options: &UninstallOptions) -> Result<Release> {
        let (this, opts) = (self.clone(), options.clone());
        self.run_detached(Action::Uninstall, &options.namespace, &options.name, async move {
            this.uninstall_inner(&opts).await
        })
        .await
    }

    /// Run the deployed release's test hooks
    pub async fn test(&self, options: &TestOptions) -> Result<Release> {
        let (this, opts) = (self.clone(), options.clone());
        self.run_detached(Action::Test, &options.namespace, &options.name, async move {
            this.test_inner(&opts).await
        })
        .await
    }

    // ========== Queries ==========

    /// Every version of a release, oldest first
    pub async fn history(&self, namespace: &str, name: &str) -> Result<Vec<Release>> {
        self.store.history(namespace, name).await
    }

    /// Latest version of a release
    pub async fn status(&self, namespace: &str, name: &str) -> Result<Release> {
        self.store.last(namespace, name).await
    }

    /// Latest version of each release with one of `statuses` (all if empty)
    pub async fn list(&self, namespace: Option<&str>, statuses: &[ReleaseStatus]) -> Result<Vec<Release>> {
        self.store.list_filtered(namespace, statuses).await
    }

    /// User-supplied values of a version (latest if `None`), or all
    /// resolved values
    pub async fn get_values(
        &self,
        namespace: &str,
        name: &str,
        version: Option<u32>,
        all: bool,
    ) -> Result<Values> {
        let release = match version {
            Some(v) => self.store.get(namespace, name, v).await?,
            None => self.store.last(namespace, name).await?,
        };
        Ok(if all { release.values } else { release.config })
    }

    // ========== Install ==========

    async fn install_inner(
        &self,
        chart: &Chart,
        overrides: &ValueOverrides,
        opts: &InstallOptions,
    ) -> Result<Release> {
        validate_name(&opts.name)?;
        reject_library(chart)?;
        if !opts.dry_run {
            self.cluster.ping().await?;
        }

        let version = self.next_install_version(opts).await?;

        let values = coalesce(chart, overrides)?;
        let mut ctx = ReleaseContext::for_install(&opts.name, &opts.namespace);
        ctx.revision = version;

        let mut engine = if opts.dependency_update {
            self.engine.allowing_missing_dependencies()
        } else {
            self.engine.clone()
        };
        if opts.dry_run {
            engine = engine.offline();
        }
        let rendered = self.render(&engine, chart, &values, &ctx).await?;
        for warning in &rendered.warnings {
            tracing::warn!(release = %opts.name, "{}", warning);
        }

        let mut release = Release::for_install(&opts.name, &opts.namespace, version, chart.clone());
        release.config = overrides.user_supplied();
        release.values = values;
        fill_rendered(&mut release, &rendered);
        release.labels.extend(opts.labels.clone());

        if opts.dry_run {
            release.info.description = "Dry run complete".to_string();
            return Ok(release);
        }

        tracing::info!(release = %release.name, namespace = %release.namespace, version, "installing");
        self.store.create(&release).await?;

        match self.perform_install(&mut release, &rendered.resources, opts).await {
            Ok(()) => {
                release.mark_deployed(
                    opts.description
                        .clone()
                        .unwrap_or_else(|| "Install complete".to_string()),
                );
                self.record(&release).await?;
                self.supersede_others(&release).await?;
                tracing::info!(release = %release.name, version, "installed");
                Ok(release)
            }
            Err(e) => {
                release.mark_failed(&e);
                let _ = self.record(&release).await;
                if !opts.atomic {
                    return Err(e);
                }

                tracing::warn!(release = %release.name, error = %e, "install failed, uninstalling the attempted release");
                let recovery = match self.discard_attempt(&release, &rendered.resources).await {
                    Ok(()) => "the attempted release was uninstalled".to_string(),
                    Err(cleanup) => format!("uninstalling the attempted release also failed: {}", cleanup),
                };
                Err(KubeError::Atomic {
                    cause: Box::new(e),
                    recovery,
                })
            }
        }
    }

    /// Version for a new install of `opts.name`
    async fn next_install_version(&self, opts: &InstallOptions) -> Result<u32> {
        let last = match self.store.last(&opts.namespace, &opts.name).await {
            Ok(last) => last,
            Err(KubeError::ReleaseNotFound { .. }) => return Ok(1),
            Err(e) => return Err(e),
        };

        match last.status() {
            status if status.is_pending() => Err(KubeError::OperationInProgress {
                name: opts.name.clone(),
                status: status.to_string(),
            }),
            ReleaseStatus::Failed | ReleaseStatus::Uninstalled => Ok(last.version + 1),
            _ if opts.replace => Ok(last.version + 1),
            status => Err(KubeError::NameInUse {
                name: opts.name.clone(),
                status: status.to_string(),
            }),
        }
    }

    async fn perform_install(
        &self,
        release: &mut Release,
        resources: &[Resource],
        opts: &InstallOptions,
    ) -> Result<()> {
        if opts.create_namespace {
            self.cluster.create_namespace(&release.namespace).await?;
        }

        let hooks = HookExecutor::new(self.cluster.as_ref(), opts.hook_timeout);
        if !opts.no_hooks {
            hooks.run(&mut release.hooks, HookEvent::PreInstall).await?;
        }

        let applied = self.cluster.create(resources).await?;
        tracing::debug!(release = %release.name, created = applied.created.len(), updated = applied.updated.len(), "resources applied");

        if opts.wait {
            self.cluster.wait(resources, opts.timeout).await?;
        }

        if !opts.no_hooks {
            hooks.run(&mut release.hooks, HookEvent::PostInstall).await?;
        }
        Ok(())
    }

    /// Remove what a failed atomic install created, record included
    async fn discard_attempt(&self, release: &Release, resources: &[Resource]) -> Result<()> {
        let mut resources = resources.to_vec();
        manifest::sort_for_uninstall(&mut resources);
        self.cluster.delete(&resources).await?;
        self.store
            .delete(&release.namespace, &release.name, release.version)
            .await?;
        Ok(())
    }

    // ========== Upgrade ==========

    async fn upgrade_inner(
        &self,
        chart: &Chart,
        overrides: &ValueOverrides,
        opts: &UpgradeOptions,
    ) -> Result<Release> {
        validate_name(&opts.name)?;
        reject_library(chart)?;

        let history = match self.store.history(&opts.namespace, &opts.name).await {
            Ok(history) => history,
            Err(KubeError::ReleaseNotFound { .. }) if opts.install => {
                tracing::info!(release = %opts.name, "release not found, installing");
                return self.install_inner(chart, overrides, &opts.to_install()).await;
            }
            Err(e) => return Err(e),
        };

        let Some(last) = history.last() else {
            return Err(KubeError::ReleaseNotFound {
                name: opts.name.clone(),
                namespace: opts.namespace.clone(),
            });
        };
        if last.status().is_pending() {
            return Err(KubeError::OperationInProgress {
                name: opts.name.clone(),
                status: last.status().to_string(),
            });
        }
        if last.status() == ReleaseStatus::Uninstalled {
            if opts.install {
                return self.install_inner(chart, overrides, &opts.to_install()).await;
            }
            return Err(KubeError::InvalidConfig(format!(
                "release \"{}\" has no deployed versions",
                opts.name
            )));
        }

        // upgrading from a failed or superseded version is allowed
        let current = history
            .iter()
            .rev()
            .find(|r| r.status() == ReleaseStatus::Deployed)
            .unwrap_or(last)
            .clone();

        if !opts.dry_run {
            self.cluster.ping().await?;
        }

        let config = upgrade_config(&current, overrides, opts);
        let values = coalesce_values(chart, &config);
        let version = last.version + 1;
        let ctx = ReleaseContext::for_upgrade(&opts.name, &opts.namespace, version);

        let engine = if opts.dry_run {
            self.engine.offline()
        } else {
            self.engine.clone()
        };
        let rendered = self.render(&engine, chart, &values, &ctx).await?;

        let mut release = Release::for_upgrade(last, chart.clone());
        release.config = config;
        release.values = values;
        fill_rendered(&mut release, &rendered);
        release.labels.extend(opts.labels.clone());

        if opts.dry_run {
            release.info.description = "Dry run complete".to_string();
            return Ok(release);
        }

        let current_resources = release_resources(&current)?;

        tracing::info!(release = %release.name, namespace = %release.namespace, from = current.version, version, "upgrading");
        self.store.create(&release).await?;

        match self
            .perform_update(
                &mut release,
                &current_resources,
                &rendered.resources,
                UpdateSteps {
                    pre: HookEvent::PreUpgrade,
                    post: HookEvent::PostUpgrade,
                    no_hooks: opts.no_hooks,
                    hook_timeout: opts.hook_timeout,
                    force: opts.force,
                    wait: opts.wait.then_some(opts.timeout),
                },
            )
            .await
        {
            Ok(()) => {
                release.mark_deployed(
                    opts.description
                        .clone()
                        .unwrap_or_else(|| "Upgrade complete".to_string()),
                );
                self.record(&release).await?;
                self.supersede_others(&release).await?;
                self.prune(&release, opts.max_history).await;
                tracing::info!(release = %release.name, version, "upgraded");
                Ok(release)
            }
            Err(e) => {
                release.mark_failed(&e);
                let _ = self.record(&release).await;

                if opts.cleanup_on_fail {
                    self.cleanup_created(&release, &current_resources, &rendered.resources)
                        .await;
                }
                if !opts.atomic {
                    return Err(e);
                }

                tracing::warn!(release = %release.name, error = %e, to = current.version, "upgrade failed, rolling back");
                let rollback = RollbackOptions {
                    name: opts.name.clone(),
                    namespace: opts.namespace.clone(),
                    version: i64::from(current.version),
                    wait: true,
                    timeout: opts.timeout,
                    hook_timeout: opts.hook_timeout,
                    no_hooks: opts.no_hooks,
                    force: opts.force,
                    dry_run: false,
                    max_history: opts.max_history,
                };
                let recovery = match self.rollback_inner(&rollback).await {
                    Ok(restored) => format!(
                        "rolled back to version {} as version {}",
                        current.version, restored.version
                    ),
                    Err(rollback_err) => format!(
                        "rollback to version {} also failed: {}",
                        current.version, rollback_err
                    ),
                };
                Err(KubeError::Atomic {
                    cause: Box::new(e),
                    recovery,
                })
            }
        }
    }

    /// Delete resources a failed upgrade created that the previous
    /// version did not have
    async fn cleanup_created(&self, release: &Release, previous: &[Resource], target: &[Resource]) {
        let existing: BTreeSet<ResourceKey> = previous.iter().map(Resource::key).collect();
        let mut created: Vec<Resource> = target
            .iter()
            .filter(|r| !existing.contains(&r.key()))
            .cloned()
            .collect();
        if created.is_empty() {
            return;
        }

        manifest::sort_for_uninstall(&mut created);
        match self.cluster.delete(&created).await {
            Ok(result) => tracing::info!(release = %release.name, deleted = result.deleted.len(), "cleaned up resources of failed upgrade"),
            Err(e) => tracing::warn!(release = %release.name, error = %e, "cleanup of failed upgrade incomplete"),
        }
    }

    // ========== Rollback ==========

    async fn rollback_inner(&self, opts: &RollbackOptions) -> Result<Release> {
        let invalid = |reason: &str| KubeError::InvalidRevision {
            name: opts.name.clone(),
            version: opts.version,
            reason: reason.to_string(),
        };
        if opts.version < 0 {
            return Err(invalid("versions are positive"));
        }

        let history = self.store.history(&opts.namespace, &opts.name).await?;
        let Some(mut current) = history.last().cloned() else {
            return Err(invalid("release has no history"));
        };
        if current.status().is_pending() {
            return Err(KubeError::OperationInProgress {
                name: opts.name.clone(),
                status: current.status().to_string(),
            });
        }

        let target_version = match opts.version {
            0 => current.version.saturating_sub(1),
            v => u32::try_from(v).map_err(|_| invalid("version out of range"))?,
        };
        if target_version == 0 {
            return Err(invalid("no previous version to roll back to"));
        }
        let target = history
            .iter()
            .find(|r| r.version == target_version)
            .ok_or_else(|| invalid("version not found in history"))?;

        let mut release = Release::for_rollback(target, current.version + 1);
        if opts.dry_run {
            release.info.description = "Dry run complete".to_string();
            return Ok(release);
        }
        self.cluster.ping().await?;

        let current_resources = release_resources(&current)?;
        let target_resources = release_resources(&release)?;

        tracing::info!(release = %release.name, namespace = %release.namespace, from = current.version, to = target_version, version = release.version, "rolling back");
        self.store.create(&release).await?;

        let outcome = self
            .perform_update(
                &mut release,
                &current_resources,
                &target_resources,
                UpdateSteps {
                    pre: HookEvent::PreRollback,
                    post: HookEvent::PostRollback,
                    no_hooks: opts.no_hooks,
                    hook_timeout: opts.hook_timeout,
                    force: opts.force,
                    wait: opts.wait.then_some(opts.timeout),
                },
            )
            .await;

        // the current version is replaced whatever the outcome
        if current.status() != ReleaseStatus::Superseded {
            current.mark_superseded();
            let _ = self.record(&current).await;
        }

        match outcome {
            Ok(()) => {
                release.mark_deployed(format!("Rollback to {}", target_version));
                self.record(&release).await?;
                self.supersede_others(&release).await?;
                self.prune(&release, opts.max_history).await;
                tracing::info!(release = %release.name, version = release.version, "rolled back");
                Ok(release)
            }
            Err(e) => {
                release.mark_failed(&e);
                let _ = self.record(&release).await;
                Err(e)
            }
        }
    }

    /// Shared upgrade/rollback cluster steps
    async fn perform_update(
        &self,
        release: &mut Release,
        current: &[Resource],
        target: &[Resource],
        steps: UpdateSteps,
    ) -> Result<()> {
        let hooks = HookExecutor::new(self.cluster.as_ref(), steps.hook_timeout);
        if !steps.no_hooks {
            hooks.run(&mut release.hooks, steps.pre).await?;
        }

        let applied = self.cluster.update(current, target, steps.force).await?;
        if !applied.deleted.is_empty() {
            tracing::warn!(
                release = %release.name,
                deleted = ?applied.deleted.iter().map(ToString::to_string).collect::<Vec<_>>(),
                "removed resources no longer in the release"
            );
        }

        if let Some(timeout) = steps.wait {
            self.cluster.wait(target, timeout).await?;
        }

        if !steps.no_hooks {
            hooks.run(&mut release.hooks, steps.post).await?;
        }
        Ok(())
    }

    // ========== Uninstall ==========

    async fn uninstall_inner(&self, opts: &UninstallOptions) -> Result<Release> {
        let mut release = self.store.last(&opts.namespace, &opts.name).await?;

        if release.status() == ReleaseStatus::Uninstalled {
            if !opts.keep_history && !opts.dry_run {
                self.store.purge(&opts.namespace, &opts.name).await?;
                return Ok(release);
            }
            return Err(KubeError::InvalidConfig(format!(
                "release \"{}\" is already uninstalled",
                opts.name
            )));
        }

        let mut resources = release_resources(&release)?;
        manifest::sort_for_uninstall(&mut resources);

        if opts.dry_run {
            return Ok(release);
        }
        self.cluster.ping().await?;

        tracing::info!(release = %release.name, namespace = %release.namespace, version = release.version, "uninstalling");
        release.set_status(ReleaseStatus::Uninstalling, "Deletion in progress");
        self.store.update(&release).await?;

        match self.perform_uninstall(&mut release, &resources, opts).await {
            Ok(()) => {
                release.mark_uninstalled();
                if let Some(description) = &opts.description {
                    release.info.description = description.clone();
                }
                if opts.keep_history {
                    self.record(&release).await?;
                } else {
                    self.store.purge(&opts.namespace, &opts.name).await.map_err(|e| {
                        tracing::error!(release = %release.name, error = %e, "resources deleted but release records remain");
                        e
                    })?;
                }
                tracing::info!(release = %release.name, "uninstalled");
                Ok(release)
            }
            Err(e) => {
                release.mark_failed(format!("uninstallation failed: {}", e));
                let _ = self.record(&release).await;
                Err(e)
            }
        }
    }

    async fn perform_uninstall(
        &self,
        release: &mut Release,
        resources: &[Resource],
        opts: &UninstallOptions,
    ) -> Result<()> {
        let hooks = HookExecutor::new(self.cluster.as_ref(), opts.hook_timeout);
        if !opts.no_hooks {
            hooks.run(&mut release.hooks, HookEvent::PreDelete).await?;
        }

        let deleted = self.cluster.delete(resources).await?;
        for (key, reason) in &deleted.skipped {
            tracing::info!(release = %release.name, resource = %key, reason = %reason, "left in place");
        }

        if !opts.no_hooks {
            hooks.run(&mut release.hooks, HookEvent::PostDelete).await?;
        }
        Ok(())
    }

    // ========== Test ==========

    async fn test_inner(&self, opts: &TestOptions) -> Result<Release> {
        let mut release = self.store.deployed(&opts.namespace, &opts.name).await?;
        self.cluster.ping().await?;

        let outcome = HookExecutor::new(self.cluster.as_ref(), opts.timeout)
            .run(&mut release.hooks, HookEvent::Test)
            .await;

        // results are recorded whether the tests passed or not
        self.record(&release).await?;
        outcome.map(|()| release)
    }

    // ========== Helpers ==========

    async fn render(
        &self,
        engine: &Engine,
        chart: &Chart,
        values: &Values,
        ctx: &ReleaseContext,
    ) -> Result<Rendered> {
        render_release(engine, chart, values, ctx, self.post_renderer.as_deref()).await
    }

    /// Write a release's new state after the cluster was changed
    ///
    /// A failure here means the cluster and the recorded history disagree.
    async fn record(&self, release: &Release) -> Result<()> {
        self.store.update(release).await.map_err(|e| {
            tracing::error!(
                release = %release.name,
                namespace = %release.namespace,
                key = %release.storage_key(),
                status = %release.status(),
                error = %e,
                "cluster changed but the release record could not be written; history no longer matches the cluster"
            );
            KubeError::Storage(format!(
                "recording {} as {}: {}",
                release.storage_key(),
                release.status(),
                e
            ))
        })
    }

    /// Mark every other deployed version of the release superseded
    ///
    /// Runs after `release` itself is recorded. Every version is attempted;
    /// the first write failure is returned.
    async fn supersede_others(&self, release: &Release) -> Result<()> {
        let mut first_error = None;
        for mut other in self.store.deployed_all(&release.namespace, &release.name).await? {
            if other.version != release.version {
                other.mark_superseded();
                if let Err(e) = self.record(&other).await {
                    first_error.get_or_insert(e);
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    async fn prune(&self, release: &Release, max_history: u32) {
        if let Err(e) = self
            .store
            .prune_history(&release.namespace, &release.name, max_history)
            .await
        {
            tracing::warn!(release = %release.name, error = %e, "failed to prune release history");
        }
    }

    fn lock_in_flight(&self) -> MutexGuard<'_, HashMap<String, CancelToken>> {
        self.in_flight.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Run `work` as its own task; return early if the caller cancels
    async fn run_detached<F>(&self, action: Action, namespace: &str, name: &str, work: F) -> Result<Release>
    where
        F: Future<Output = Result<Release>> + Send + 'static,
    {
        let key = in_flight_key(namespace, name);
        let token = CancelToken::new();
        {
            let mut in_flight = self.lock_in_flight();
            if in_flight.contains_key(&key) {
                return Err(KubeError::OperationInProgress {
                    name: name.to_string(),
                    status: "in flight in this process".to_string(),
                }
                .in_action(action, name));
            }
            in_flight.insert(key.clone(), token.clone());
        }

        let registry = self.in_flight.clone();
        let own = token.clone();
        let task = tokio::spawn(async move {
            let result = work.await;
            let mut in_flight = registry.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            if in_flight.get(&key).is_some_and(|t| t.same(&own)) {
                in_flight.remove(&key);
            }
            result
        });

        let external = self.cancel.clone().unwrap_or_default();
        let outcome = tokio::select! {
            joined = task => joined.map_err(|e| KubeError::Io(e.into())).and_then(|r| r),
            _ = token.cancelled() => Err(KubeError::Cancelled),
            _ = external.cancelled() => Err(KubeError::Cancelled),
        };

        if matches!(outcome, Err(KubeError::Cancelled)) {
            tracing::warn!(release = name, namespace, action = %action, "stopped waiting; the action continues in the background");
        }
        outcome.map_err(|e| e.in_action(action, name))
    }
}

/// Cluster steps of an upgrade or rollback
struct UpdateSteps {
    pre: HookEvent,
    post: HookEvent,
    no_hooks: bool,
    hook_timeout: std::time::Duration,
    force: bool,
    wait: Option<std::time::Duration>,
}

fn in_flight_key(namespace: &str, name: &str) -> String {
    format!("{}/{}", namespace, name)
}

/// User values for an upgrade
///
/// `reset_values` uses only the new overrides; `reuse_values` layers them
/// over the previous ones. With neither flag, previous values are kept
/// when no overrides are given.
fn upgrade_config(current: &Release, overrides: &ValueOverrides, opts: &UpgradeOptions) -> Values {
    let supplied = overrides.user_supplied();
    if opts.reset_values {
        return supplied;
    }
    if opts.reuse_values {
        let mut config = current.config.clone();
        config.merge(&supplied);
        return config;
    }
    if supplied.is_empty() {
        return current.config.clone();
    }
    supplied
}

fn fill_rendered(release: &mut Release, rendered: &Rendered) {
    release.manifest = rendered.manifest.clone();
    release.hooks = rendered.hooks.clone();
    release.info.notes = rendered.notes.clone();
}

/// Resources recorded in a release, namespaces defaulted
fn release_resources(release: &Release) -> Result<Vec<Resource>> {
    let weights = manifest::weights_from_chart(&release.chart);
    let mut resources = manifest::split_stream(&release.manifest, &weights)?.resources;
    manifest::default_namespace(&mut resources, &release.namespace);
    Ok(resources)
}

fn reject_library(chart: &Chart) -> Result<()> {
    if chart.is_library() {
        return Err(KubeError::InvalidConfig(format!(
            "chart '{}' is a library chart and cannot be installed",
            chart.name()
        )));
    }
    Ok(())
}

/// Release names are DNS labels of at most 53 characters
fn validate_name(name: &str) -> Result<()> {
    let invalid = |reason: &str| {
        Err(KubeError::InvalidConfig(format!(
            "invalid release name '{}': {}",
            name, reason
        )))
    };

    if name.is_empty() {
        return invalid("name is empty");
    }
    if name.len() > MAX_NAME_LEN {
        return invalid("longer than 53 characters");
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '.')
    {
        return invalid("only lowercase letters, digits, '-' and '.' are allowed");
    }
    let alnum = |c: Option<char>| c.is_some_and(|c| c.is_ascii_alphanumeric());
    if !alnum(name.chars().next()) || !alnum(name.chars().last()) {
        return invalid("must start and end with a letter or digit");
    }
    Ok(())
}
