//! Reconcile one package's stored releases with its VCS tags

use std::collections::HashSet;

use indexmap::IndexMap;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::changelog::{ExtractOptions, extract};
use crate::config::{PSEUDO_PACKAGE_PREFIXES, ROOT_PACKAGE_NAME, RegistryConfig};
use crate::store::{Dependency, Package, Release, ReleaseRef, ReleaseStore};
use crate::sync::compat::{IndexMode, index_new_host_release, index_new_plugin_release};
use crate::sync::context::SyncContext;
use crate::sync::error::SyncError;
use crate::sync::gate::SyncPermit;
use crate::sync::orderer::reorder;
use crate::vcs::Vcs;
use crate::version::{
    Constraint, NormalizedVersion, Stability, is_dev_branch, normalize, stability_of,
};

/// Literal constraint Composer resolves to the requiring package's own version
const SELF_VERSION: &str = "self.version";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncOptions {
    /// Repopulate releases even when their sha is unchanged
    pub force: bool,
    /// Restrict the sync to a single version
    pub only_version: Option<String>,
}

/// What one sync changed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub packages: usize,
    pub added: usize,
    pub updated: usize,
    pub deleted: usize,
    pub invalid: usize,
    pub compat_entries: usize,
    pub notes_updated: usize,
    pub dependencies_queued: usize,
}

impl SyncReport {
    /// Releases added, replaced or removed
    pub fn affected(&self) -> usize {
        self.added + self.updated + self.deleted
    }

    pub fn changed(&self) -> bool {
        self.affected() > 0
    }

    fn absorb(&mut self, other: &SyncReport) {
        self.packages += other.packages;
        self.added += other.added;
        self.updated += other.updated;
        self.deleted += other.deleted;
        self.invalid += other.invalid;
        self.compat_entries += other.compat_entries;
        self.notes_updated += other.notes_updated;
        self.dependencies_queued += other.dependencies_queued;
    }
}

/// A VCS tag that survived filtering
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteRelease {
    pub version: String,
    pub normalized: NormalizedVersion,
    pub stability: Stability,
    pub sha: String,
}

/// Stored vs. remote, keyed by normalized version
#[derive(Debug, Default)]
pub struct ReleaseDiff<'r> {
    pub deleted: Vec<&'r ReleaseRef>,
    pub updated: Vec<&'r ReleaseRef>,
    /// Remote releases to populate, including replacements for `updated`
    pub new: Vec<&'r RemoteRelease>,
}

impl ReleaseDiff<'_> {
    /// Rows to remove before anything is inserted
    pub fn stale_ids(&self) -> Vec<i64> {
        self.deleted
            .iter()
            .chain(self.updated.iter())
            .map(|r| r.id)
            .collect()
    }
}

pub fn diff_releases<'r>(
    stored: &'r [ReleaseRef],
    remote: &'r IndexMap<String, RemoteRelease>,
    force: bool,
) -> ReleaseDiff<'r> {
    let mut diff = ReleaseDiff::default();
    let mut seen = HashSet::new();

    for release in stored {
        seen.insert(release.normalized_version.as_str());
        match remote.get(&release.normalized_version) {
            None => diff.deleted.push(release),
            Some(remote_release) if force || remote_release.sha != release.sha => {
                diff.updated.push(release);
                diff.new.push(remote_release);
            }
            Some(_) => {}
        }
    }

    diff.new.extend(
        remote
            .iter()
            .filter(|(key, _)| !seen.contains(key.as_str()))
            .map(|(_, release)| release),
    );

    diff
}

/// Whether a required package should be tracked by the registry
pub fn needs_tracking(name: &str) -> bool {
    // Platform packages (php, ext-*, lib-*, composer-plugin-api) have no vendor
    name.contains('/')
        && name != ROOT_PACKAGE_NAME
        && !PSEUDO_PACKAGE_PREFIXES
            .iter()
            .any(|prefix| name.starts_with(prefix))
}

/// Dependency edges of a release, with `self.version` resolved
pub fn dependency_edges(package_id: i64, release_id: i64, release: &Release) -> Vec<Dependency> {
    release
        .require()
        .into_iter()
        .flatten()
        .map(|(name, constraint)| Dependency {
            package_id,
            release_id,
            name: name.clone(),
            constraints: constraint.replace(SELF_VERSION, &release.version),
        })
        .collect()
}

/// Write changelog notes onto every stored release the changelog mentions
pub fn apply_changelog<S: ReleaseStore + ?Sized>(
    store: &S,
    package_id: i64,
    changelog: &str,
    options: &ExtractOptions,
) -> Result<usize, SyncError> {
    let entries = extract(changelog, options);
    let mut updated = 0;

    for release in store.release_refs(package_id)? {
        if let Some(entry) = entries.get(&release.normalized_version) {
            store.update_release_notes(release.id, &entry.notes)?;
            updated += 1;
        }
    }

    debug!(
        "Applied {} changelog entries to {} releases",
        entries.len(),
        updated
    );
    Ok(updated)
}

/// The newest valid release added during a sync
struct NewestRelease {
    id: i64,
    stability: Stability,
    changelog: Option<String>,
}

pub struct VersionSyncer<'a, S: ReleaseStore + ?Sized> {
    store: &'a S,
    vcs: &'a dyn Vcs,
    config: &'a RegistryConfig,
}

impl<'a, S: ReleaseStore + ?Sized> VersionSyncer<'a, S> {
    pub fn new(store: &'a S, vcs: &'a dyn Vcs, config: &'a RegistryConfig) -> Self {
        Self { store, vcs, config }
    }

    /// Sync a package, then every dependency that sync queued
    pub async fn sync(
        &self,
        permit: &SyncPermit,
        ctx: &mut SyncContext,
        name: &str,
        options: &SyncOptions,
    ) -> Result<SyncReport, SyncError> {
        let package = self
            .store
            .package_by_name(name)?
            .ok_or_else(|| SyncError::UnknownPackage(name.to_string()))?;

        let mut report = self.sync_package(permit, ctx, &package, options).await?;

        let dependency_options = SyncOptions::default();
        while let Some(dependency_name) = ctx.next_pending() {
            let Some(dependency) = self.store.package_by_name(&dependency_name)? else {
                continue;
            };

            match self
                .sync_package(permit, ctx, &dependency, &dependency_options)
                .await
            {
                Ok(dependency_report) => report.absorb(&dependency_report),
                Err(SyncError::Vcs(e)) if !e.is_fatal() => {
                    warn!("Skipping dependency {}: {}", dependency_name, e);
                }
                Err(e) => return Err(e),
            }
        }

        Ok(report)
    }

    /// Sync exactly one package; dependencies needing work are queued on `ctx`
    pub async fn sync_package(
        &self,
        permit: &SyncPermit,
        ctx: &mut SyncContext,
        package: &Package,
        options: &SyncOptions,
    ) -> Result<SyncReport, SyncError> {
        let package_id = package
            .id
            .ok_or_else(|| SyncError::UnknownPackage(package.name.clone()))?;
        ctx.visit(&package.name);
        debug!(
            "Syncing {} under gate {} (force: {})",
            package.name,
            permit.gate_name(),
            options.force
        );

        let is_plugin = package.package_type == self.config.plugin_type;
        if self.config.vcs.require_token
            && (package.managed || is_plugin)
            && !self.vcs.has_token(package)
        {
            return Err(SyncError::MissingCredential(package.name.clone()));
        }

        let only_version = options.only_version.as_deref().map(normalize).transpose()?;

        let mut remote = self.remote_releases(package).await?;
        if let Some(only) = &only_version {
            remote.retain(|key, _| key == only);
        }
        if !package.managed {
            self.prune_unrequired(package, &mut remote)?;
        }

        let mut stored = self.store.release_refs(package_id)?;
        if let Some(only) = &only_version {
            stored.retain(|r| &r.normalized_version == only);
        }

        let diff = diff_releases(&stored, &remote, options.force);
        let mut report = SyncReport {
            packages: 1,
            added: diff.new.len() - diff.updated.len(),
            updated: diff.updated.len(),
            deleted: diff.deleted.len(),
            ..SyncReport::default()
        };
        debug!(
            "{}: {} new, {} updated, {} deleted",
            package.name, report.added, report.updated, report.deleted
        );

        self.store.delete_releases(&diff.stale_ids())?;

        let mut new_releases = diff.new;
        new_releases.sort_by(|a, b| b.normalized.cmp(&a.normalized));

        let mut required: IndexMap<String, Vec<String>> = IndexMap::new();
        let mut newest: Option<NewestRelease> = None;

        for remote_release in new_releases {
            let mut release = Release::shell(
                package_id,
                &remote_release.version,
                &remote_release.normalized.to_string(),
                remote_release.stability,
                &remote_release.sha,
            );

            if let Err(e) = self.vcs.populate_release(package, &mut release).await {
                if e.is_fatal() {
                    return Err(e.into());
                }
                release.invalidate(e.to_string());
            }

            if release.valid {
                enrich_from_own_changelog(&mut release);
            } else {
                warn!(
                    "Release {} of {} is invalid: {}",
                    release.version,
                    package.name,
                    release.invalid_reason.as_deref().unwrap_or("unknown reason")
                );
                report.invalid += 1;
            }

            let release_id = self.store.insert_release(&release)?;

            let dependencies = dependency_edges(package_id, release_id, &release);
            self.store.insert_dependencies(&dependencies)?;
            for dependency in dependencies {
                if needs_tracking(&dependency.name) && dependency.name != package.name {
                    required
                        .entry(dependency.name)
                        .or_default()
                        .push(dependency.constraints);
                }
            }

            if !release.valid {
                continue;
            }

            report.compat_entries += self.index_compat(package, is_plugin, release_id, &release)?;

            if newest.is_none() {
                newest = Some(NewestRelease {
                    id: release_id,
                    stability: release.stability,
                    changelog: release.changelog.take(),
                });
            }
        }

        if is_plugin && report.changed() {
            reorder(self.store, package_id)?;
        }
        ctx.forget_versions(&package.name);

        report.dependencies_queued = self.queue_dependencies(ctx, required)?;

        if !options.force && report.changed() {
            if let Some(newest) = newest {
                report.notes_updated = self.refresh_changelog(package_id, &newest)?;
            }
        }

        info!(
            "Synced {}: {} added, {} updated, {} deleted, {} invalid",
            package.name, report.added, report.updated, report.deleted, report.invalid
        );
        Ok(report)
    }

    /// Tags that normalize, are not dev builds, and are first for their version
    async fn remote_releases(
        &self,
        package: &Package,
    ) -> Result<IndexMap<String, RemoteRelease>, SyncError> {
        let tags = self.vcs.list_tags(package).await?;
        let mut remote = IndexMap::new();

        for (tag, sha) in tags {
            let normalized = match NormalizedVersion::parse(&tag) {
                Ok(version) => version,
                Err(e) => {
                    warn!("Skipping tag {} of {}: {}", tag, package.name, e);
                    continue;
                }
            };

            let stability = stability_of(&tag);
            if stability == Stability::Dev {
                debug!("Skipping dev tag {} of {}", tag, package.name);
                continue;
            }

            let key = normalized.to_string();
            if remote.contains_key(&key) {
                debug!("Skipping duplicate tag {} of {}", tag, package.name);
                continue;
            }

            remote.insert(
                key,
                RemoteRelease {
                    version: tag,
                    normalized,
                    stability,
                    sha,
                },
            );
        }

        Ok(remote)
    }

    /// Keep only versions some stored dependent asks for
    fn prune_unrequired(
        &self,
        package: &Package,
        remote: &mut IndexMap<String, RemoteRelease>,
    ) -> Result<(), SyncError> {
        let constraints: Vec<Constraint> = self
            .store
            .constraints_on(&package.name)?
            .iter()
            .filter_map(|raw| {
                Constraint::parse(raw)
                    .inspect_err(|e| warn!("Ignoring constraint on {}: {}", package.name, e))
                    .ok()
            })
            .collect();

        let before = remote.len();
        remote.retain(|_, release| constraints.iter().any(|c| c.matches(&release.normalized)));
        debug!(
            "{}: kept {} of {} tags required by dependents",
            package.name,
            remote.len(),
            before
        );

        Ok(())
    }

    fn index_compat(
        &self,
        package: &Package,
        is_plugin: bool,
        release_id: i64,
        release: &Release,
    ) -> Result<usize, SyncError> {
        let host = self.config.host_package.as_str();

        if package.name == host {
            return index_new_host_release(
                self.store,
                &release.to_ref(release_id),
                host,
                &self.config.plugin_type,
                IndexMode::from_flag(self.config.compat.short_circuit),
            );
        }

        if is_plugin {
            return index_new_plugin_release(
                self.store,
                release_id,
                release.constraint_on(host),
                host,
            );
        }

        Ok(0)
    }

    /// Queue required packages that are unknown or whose constraints no stored
    /// version satisfies. Returns how many were queued.
    fn queue_dependencies(
        &self,
        ctx: &mut SyncContext,
        required: IndexMap<String, Vec<String>>,
    ) -> Result<usize, SyncError> {
        let mut queued = 0;

        for (name, constraints) in required {
            if ctx.is_visited(&name) {
                continue;
            }

            let needs_sync = match self.store.package_by_name(&name)? {
                None => {
                    self.store.insert_package(&Package::discovered(&name))?;
                    info!("Discovered dependency {}", name);
                    true
                }
                Some(dependency) => !self.constraints_satisfied(ctx, &dependency, &constraints)?,
            };

            if needs_sync && ctx.enqueue(&name) {
                queued += 1;
            }
        }

        Ok(queued)
    }

    fn constraints_satisfied(
        &self,
        ctx: &mut SyncContext,
        package: &Package,
        constraints: &[String],
    ) -> Result<bool, SyncError> {
        let Some(package_id) = package.id else {
            return Ok(false);
        };

        if ctx.cached_versions(&package.name).is_none() {
            let versions = self
                .store
                .release_refs(package_id)?
                .into_iter()
                .filter(|r| r.valid)
                .filter_map(|r| NormalizedVersion::parse(&r.normalized_version).ok())
                .collect();
            ctx.cache_versions(&package.name, versions);
        }
        let versions = ctx.cached_versions(&package.name).unwrap_or_default();

        Ok(constraints.iter().all(|raw| {
            // Tags never satisfy a branch pin, so syncing again would not help
            if is_dev_branch(raw) {
                return true;
            }
            match Constraint::parse(raw) {
                Ok(constraint) => versions.iter().any(|v| constraint.matches(v)),
                Err(_) => true,
            }
        }))
    }

    /// Re-extract the changelog when the newest new release leads its tier
    fn refresh_changelog(&self, package_id: i64, newest: &NewestRelease) -> Result<usize, SyncError> {
        let Some(changelog) = &newest.changelog else {
            return Ok(0);
        };

        let latest_in_tier = self
            .store
            .release_refs(package_id)?
            .into_iter()
            .filter(|r| r.valid && r.stability == newest.stability)
            .filter_map(|r| {
                NormalizedVersion::parse(&r.normalized_version)
                    .ok()
                    .map(|v| (v, r.id))
            })
            .max_by(|(a, _), (b, _)| a.cmp(b));

        match latest_in_tier {
            Some((_, id)) if id == newest.id => {
                apply_changelog(self.store, package_id, changelog, &ExtractOptions::default())
            }
            _ => Ok(0),
        }
    }
}

/// Fill date/critical/notes from the release's own changelog section
fn enrich_from_own_changelog(release: &mut Release) {
    let Some(changelog) = &release.changelog else {
        return;
    };
    let entries = extract(changelog, &ExtractOptions::only(&release.version));
    if let Some(entry) = entries.get(&release.normalized_version) {
        release.notes = entry.notes.clone();
    }
}
