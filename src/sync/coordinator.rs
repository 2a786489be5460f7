//! Entry points that mutate the registry
//!
//! Each entry point acquires the sync gate once, opens one store transaction,
//! and either commits or rolls back before the permit is dropped.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::changelog::ExtractOptions;
use crate::config::RegistryConfig;
use crate::store::{Package, Release, ReleaseRef, ReleaseStore};
use crate::sync::compat::{IndexMode, reindex_plugin};
use crate::sync::context::SyncContext;
use crate::sync::error::SyncError;
use crate::sync::gate::{SyncGate, SyncPermit};
use crate::sync::orderer::reorder;
use crate::sync::syncer::{SyncOptions, SyncReport, VersionSyncer, apply_changelog};
use crate::vcs::Vcs;
use crate::version::{Constraint, NormalizedVersion, Stability, normalize};

/// Per-package outcome of a batch sync
#[derive(Debug, Default)]
pub struct BatchReport {
    pub synced: Vec<(String, SyncReport)>,
    pub errors: Vec<(String, SyncError)>,
}

impl BatchReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

pub struct SyncCoordinator<S: ReleaseStore> {
    store: Arc<S>,
    vcs: Arc<dyn Vcs>,
    config: RegistryConfig,
    gate: SyncGate,
}

impl<S: ReleaseStore> SyncCoordinator<S> {
    pub fn new(store: Arc<S>, vcs: Arc<dyn Vcs>, config: RegistryConfig) -> Self {
        let gate = SyncGate::named(&config.lock.name, Duration::from_secs(config.lock.wait_secs));
        Self {
            store,
            vcs,
            config,
            gate,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    fn find_package(&self, name: &str) -> Result<(Package, i64), SyncError> {
        self.store
            .package_by_name(name)?
            .and_then(|p| p.id.map(|id| (p, id)))
            .ok_or_else(|| SyncError::UnknownPackage(name.to_string()))
    }

    /// Commit on success, roll back on failure; the error is always returned
    fn finish<T>(&self, result: Result<T, SyncError>) -> Result<T, SyncError> {
        match result {
            Ok(value) => match self.store.commit() {
                Ok(()) => Ok(value),
                Err(e) => {
                    error!("Commit failed: {}", e);
                    self.rollback();
                    Err(e.into())
                }
            },
            Err(e) => {
                warn!("Rolling back: {}", e);
                self.rollback();
                Err(e)
            }
        }
    }

    fn rollback(&self) {
        let _ = self
            .store
            .rollback()
            .inspect_err(|e| error!("Rollback failed: {}", e));
    }

    /// Sync one package and whatever dependencies it pulls in.
    /// Returns the report of the whole traversal.
    pub async fn sync_package(
        &self,
        name: &str,
        options: &SyncOptions,
    ) -> Result<SyncReport, SyncError> {
        let permit = self.gate.acquire().await?;
        self.store.begin()?;

        let result = self.sync_locked(&permit, name, options).await;
        self.finish(result)
    }

    async fn sync_locked(
        &self,
        permit: &SyncPermit,
        name: &str,
        options: &SyncOptions,
    ) -> Result<SyncReport, SyncError> {
        let mut ctx = SyncContext::new();
        let syncer = VersionSyncer::new(&*self.store, &*self.vcs, &self.config);

        let report = syncer.sync(permit, &mut ctx, name, options).await?;
        self.publish_if_releasable(name)?;

        Ok(report)
    }

    /// Mark an enabled plugin published once it has a valid release
    fn publish_if_releasable(&self, name: &str) -> Result<(), SyncError> {
        let (mut package, package_id) = self.find_package(name)?;
        if package.package_type != self.config.plugin_type || !package.enabled || package.published {
            return Ok(());
        }

        let releasable = self
            .store
            .release_refs(package_id)?
            .iter()
            .any(|r| r.valid);
        if releasable {
            package.published = true;
            self.store.update_package(&package)?;
            info!("Published {}", package.name);
        }

        Ok(())
    }

    pub async fn sync_all_managed(&self, force: bool) -> Result<BatchReport, SyncError> {
        let packages = self.store.managed_packages()?;
        Ok(self.sync_batch(packages, force).await)
    }

    pub async fn sync_all_dependencies(&self, force: bool) -> Result<BatchReport, SyncError> {
        let packages = self.store.dependency_packages()?;
        Ok(self.sync_batch(packages, force).await)
    }

    async fn sync_batch(&self, packages: Vec<Package>, force: bool) -> BatchReport {
        let options = SyncOptions {
            force,
            only_version: None,
        };
        let mut batch = BatchReport::default();

        for package in packages {
            match self.sync_package(&package.name, &options).await {
                Ok(report) => batch.synced.push((package.name, report)),
                Err(e) => {
                    error!("Failed to sync {}: {}", package.name, e);
                    batch.errors.push((package.name, e));
                }
            }
        }

        info!(
            "Batch sync finished: {} synced, {} failed",
            batch.synced.len(),
            batch.errors.len()
        );
        batch
    }

    /// Re-apply a release's changelog to every release it mentions.
    ///
    /// Without `version`, the changelog of the latest valid release is used.
    pub async fn extract_changelog(
        &self,
        name: &str,
        version: Option<&str>,
    ) -> Result<usize, SyncError> {
        let _permit = self.gate.acquire().await?;
        self.store.begin()?;

        let result = self.extract_changelog_locked(name, version);
        self.finish(result)
    }

    fn extract_changelog_locked(&self, name: &str, version: Option<&str>) -> Result<usize, SyncError> {
        let (_, package_id) = self.find_package(name)?;

        let source = match version {
            Some(version) => self
                .store
                .release_by_version(package_id, &normalize(version)?)?
                .ok_or_else(|| SyncError::UnknownRelease {
                    package: name.to_string(),
                    version: version.to_string(),
                })?,
            None => {
                let Some(latest) = newest_first(self.store.releases(package_id)?)
                    .into_iter()
                    .find(|r| r.valid)
                else {
                    return Ok(0);
                };
                latest
            }
        };

        let Some(changelog) = &source.changelog else {
            info!("{} {} has no changelog", name, source.version);
            return Ok(0);
        };

        let updated = apply_changelog(&*self.store, package_id, changelog, &ExtractOptions::default())?;
        info!("Updated notes of {} releases of {}", updated, name);
        Ok(updated)
    }

    /// Register a package; managed packages also get a push webhook
    pub async fn register_package(
        &self,
        name: &str,
        package_type: &str,
        repository: Option<&str>,
        managed: bool,
    ) -> Result<Package, SyncError> {
        let _permit = self.gate.acquire().await?;
        self.store.begin()?;

        let result = self
            .register_locked(name, package_type, repository, managed)
            .await;
        self.finish(result)
    }

    async fn register_locked(
        &self,
        name: &str,
        package_type: &str,
        repository: Option<&str>,
        managed: bool,
    ) -> Result<Package, SyncError> {
        if self.store.package_by_name(name)?.is_some() {
            return Err(SyncError::AlreadyRegistered(name.to_string()));
        }

        let mut package = Package::new(name, package_type);
        package.managed = managed;
        package.repository = repository.map(str::to_string);
        package.id = Some(self.store.insert_package(&package)?);

        if managed {
            match self.vcs.create_webhook(&package).await {
                Ok(Some(hook)) => {
                    package.webhook_id = Some(hook.id);
                    package.webhook_secret = hook.secret;
                    self.store.update_package(&package)?;
                }
                Ok(None) => {}
                Err(e) => warn!("Failed to create webhook for {}: {}", name, e),
            }
        }

        info!("Registered {} ({})", name, package_type);
        Ok(package)
    }

    /// Delete a package with all its releases and derived rows
    pub async fn remove_package(&self, name: &str) -> Result<(), SyncError> {
        let _permit = self.gate.acquire().await?;
        self.store.begin()?;

        let result = self.remove_locked(name).await;
        self.finish(result)
    }

    async fn remove_locked(&self, name: &str) -> Result<(), SyncError> {
        let (package, package_id) = self.find_package(name)?;

        if package.webhook_id.is_some() {
            let _ = self
                .vcs
                .delete_webhook(&package)
                .await
                .inspect_err(|e| warn!("Failed to delete webhook for {}: {}", name, e));
        }

        self.store.delete_package(package_id)?;
        info!("Removed {}", name);
        Ok(())
    }

    /// Rebuild a plugin's compatibility entries without the short-circuit
    pub async fn reindex_compatibility(&self, name: &str) -> Result<usize, SyncError> {
        let _permit = self.gate.acquire().await?;
        self.store.begin()?;

        let result = self.reindex_locked(name);
        self.finish(result)
    }

    fn reindex_locked(&self, name: &str) -> Result<usize, SyncError> {
        let (_, plugin_id) = self.find_package(name)?;
        reorder(&*self.store, plugin_id)?;
        let count = reindex_plugin(
            &*self.store,
            plugin_id,
            &self.config.host_package,
            IndexMode::Exhaustive,
        )?;
        info!("Reindexed {}: {} compatibility entries", name, count);
        Ok(count)
    }

    /// Latest valid release at or above `min_stability`, optionally matching
    /// `constraint`. Plugins are walked by descending stable order.
    pub fn latest_release(
        &self,
        name: &str,
        min_stability: Stability,
        constraint: Option<&str>,
    ) -> Result<Option<Release>, SyncError> {
        let (_, package_id) = self.find_package(name)?;
        let constraint = constraint.map(Constraint::parse).transpose()?;

        let releases = self.store.releases(package_id)?;
        let mut orders = self.store.release_orders(package_id)?;

        let candidates = if orders.is_empty() {
            newest_first(releases)
        } else {
            orders.sort_by(|a, b| b.stable_order.cmp(&a.stable_order));
            let mut by_id: std::collections::HashMap<i64, Release> = releases
                .into_iter()
                .filter_map(|r| r.id.map(|id| (id, r)))
                .collect();
            orders
                .iter()
                .filter_map(|o| by_id.remove(&o.release_id))
                .collect()
        };

        Ok(candidates.into_iter().find(|release| {
            release.valid
                && release.stability.rank() >= min_stability.rank()
                && constraint.as_ref().is_none_or(|c| {
                    NormalizedVersion::parse(&release.normalized_version)
                        .is_ok_and(|v| c.matches(&v))
                })
        }))
    }

    /// Host releases recorded as compatible with a plugin release
    pub fn compatible_host_releases(
        &self,
        plugin: &str,
        version: &str,
    ) -> Result<Vec<ReleaseRef>, SyncError> {
        let (_, plugin_id) = self.find_package(plugin)?;
        let release = self
            .store
            .release_by_version(plugin_id, &normalize(version)?)?
            .and_then(|r| r.id)
            .ok_or_else(|| SyncError::UnknownRelease {
                package: plugin.to_string(),
                version: version.to_string(),
            })?;

        let compatible = self.store.compatible_host_release_ids(release)?;
        let Some(host_id) = self
            .store
            .package_by_name(&self.config.host_package)?
            .and_then(|p| p.id)
        else {
            return Ok(Vec::new());
        };

        Ok(self
            .store
            .release_refs(host_id)?
            .into_iter()
            .filter(|r| compatible.contains(&r.id))
            .collect())
    }
}

fn newest_first(mut releases: Vec<Release>) -> Vec<Release> {
    releases.sort_by_cached_key(|r| std::cmp::Reverse(NormalizedVersion::parse(&r.normalized_version).ok()));
    releases
}
