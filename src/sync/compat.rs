//! Plugin release <-> host release compatibility index
//!
//! An entry exists when the plugin release's constraint on the host package,
//! after [`tighten`], is satisfied by the host release's version.
//!
//! When a host release is added, each plugin's releases are walked newest
//! first. In [`IndexMode::ShortCircuit`] the walk stops at the first miss that
//! follows a hit, assuming older releases only ever constrain the host more
//! tightly. That assumption does not always hold; [`IndexMode::Exhaustive`]
//! evaluates every release.

use tracing::{debug, warn};

use crate::store::{CompatEntry, OrderedRelease, ReleaseRef, ReleaseStore};
use crate::sync::error::SyncError;
use crate::version::{Constraint, NormalizedVersion, tighten};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexMode {
    ShortCircuit,
    Exhaustive,
}

impl IndexMode {
    pub fn from_flag(short_circuit: bool) -> Self {
        if short_circuit {
            IndexMode::ShortCircuit
        } else {
            IndexMode::Exhaustive
        }
    }
}

/// A plugin release with its parsed, tightened host constraint
#[derive(Debug, Clone)]
pub struct ConstrainedRelease {
    pub release_id: i64,
    pub constraint: Constraint,
}

/// Parse the host constraints of releases already ordered newest first.
///
/// Releases without a constraint, or with one that does not parse, are left
/// out: they cannot be judged compatible with anything.
pub fn constrained_releases(ordered: &[OrderedRelease]) -> Vec<ConstrainedRelease> {
    ordered
        .iter()
        .filter(|r| r.valid)
        .filter_map(|r| {
            let raw = r.host_constraint.as_deref()?;
            Constraint::parse(&tighten(raw))
                .inspect_err(|e| {
                    warn!(
                        "Skipping release {} with unparsable host constraint {:?}: {}",
                        r.normalized_version, raw, e
                    )
                })
                .ok()
                .map(|constraint| ConstrainedRelease {
                    release_id: r.release_id,
                    constraint,
                })
        })
        .collect()
}

/// Result of walking one plugin's releases against one host version
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Walk {
    pub matched: Vec<i64>,
    /// Releases whose constraint was actually evaluated
    pub evaluated: usize,
}

pub fn walk(releases: &[ConstrainedRelease], host: &NormalizedVersion, mode: IndexMode) -> Walk {
    let mut result = Walk::default();

    for release in releases {
        result.evaluated += 1;
        if release.constraint.matches(host) {
            result.matched.push(release.release_id);
        } else if mode == IndexMode::ShortCircuit && !result.matched.is_empty() {
            break;
        }
    }

    result
}

/// Index a new host release against every plugin
pub fn index_new_host_release<S: ReleaseStore + ?Sized>(
    store: &S,
    host_release: &ReleaseRef,
    host_name: &str,
    plugin_type: &str,
    mode: IndexMode,
) -> Result<usize, SyncError> {
    let host_version = NormalizedVersion::parse(&host_release.normalized_version)?;
    let mut entries = Vec::new();

    for plugin in store.packages_by_type(plugin_type)? {
        let Some(plugin_id) = plugin.id else {
            continue;
        };
        let ordered = store.ordered_plugin_releases(plugin_id, host_name)?;
        let releases = constrained_releases(&ordered);

        let walked = walk(&releases, &host_version, mode);
        debug!(
            "{}: {} of {} releases evaluated against {} {}, {} compatible",
            plugin.name,
            walked.evaluated,
            releases.len(),
            host_name,
            host_release.version,
            walked.matched.len()
        );

        entries.extend(walked.matched.into_iter().map(|plugin_release_id| CompatEntry {
            plugin_release_id,
            host_release_id: host_release.id,
        }));
    }

    store.insert_compat_entries(&entries)?;
    Ok(entries.len())
}

/// Index a new plugin release against every host release.
///
/// A release without a constraint on the host is not indexed at all.
pub fn index_new_plugin_release<S: ReleaseStore + ?Sized>(
    store: &S,
    plugin_release_id: i64,
    host_constraint: Option<&str>,
    host_name: &str,
) -> Result<usize, SyncError> {
    let Some(raw) = host_constraint else {
        debug!("Release {} has no constraint on {}", plugin_release_id, host_name);
        return Ok(0);
    };
    let constraint = match Constraint::parse(&tighten(raw)) {
        Ok(constraint) => constraint,
        Err(e) => {
            warn!("Not indexing release {}: {}", plugin_release_id, e);
            return Ok(0);
        }
    };

    let Some(host_id) = store.package_by_name(host_name)?.and_then(|p| p.id) else {
        return Ok(0);
    };

    let mut entries = Vec::new();
    for host_release in store.release_refs(host_id)? {
        if !host_release.valid {
            continue;
        }
        let version = NormalizedVersion::parse(&host_release.normalized_version)?;
        if constraint.matches(&version) {
            entries.push(CompatEntry {
                plugin_release_id,
                host_release_id: host_release.id,
            });
        }
    }

    store.insert_compat_entries(&entries)?;
    Ok(entries.len())
}

/// Drop and rebuild all entries of one plugin
pub fn reindex_plugin<S: ReleaseStore + ?Sized>(
    store: &S,
    plugin_id: i64,
    host_name: &str,
    mode: IndexMode,
) -> Result<usize, SyncError> {
    store.delete_compat_for_plugin(plugin_id)?;

    let Some(host_id) = store.package_by_name(host_name)?.and_then(|p| p.id) else {
        return Ok(0);
    };

    let ordered = store.ordered_plugin_releases(plugin_id, host_name)?;
    let releases = constrained_releases(&ordered);

    let mut entries = Vec::new();
    for host_release in store.release_refs(host_id)? {
        if !host_release.valid {
            continue;
        }
        let version = NormalizedVersion::parse(&host_release.normalized_version)?;
        let walked = walk(&releases, &version, mode);
        entries.extend(walked.matched.into_iter().map(|plugin_release_id| CompatEntry {
            plugin_release_id,
            host_release_id: host_release.id,
        }));
    }

    store.insert_compat_entries(&entries)?;
    Ok(entries.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Dependency, Package, Release, SqliteStore};
    use crate::sync::orderer::reorder;
    use crate::version::{Stability, normalize};

    const HOST: &str = "craftcms/cms";

    fn ordered(id: i64, version: &str, constraint: Option<&str>) -> OrderedRelease {
        OrderedRelease {
            release_id: id,
            normalized_version: normalize(version).unwrap(),
            order: id,
            valid: true,
            host_constraint: constraint.map(str::to_string),
        }
    }

    fn host(version: &str) -> NormalizedVersion {
        NormalizedVersion::parse(version).unwrap()
    }

    #[test]
    fn walk_evaluates_past_a_leading_miss() {
        // 3.0.0 needs ^4.0.0 and misses 3.9.0; nothing has matched yet, so 2.0.0 is still tried
        let releases = constrained_releases(&[
            ordered(3, "3.0.0", Some("^4.0.0")),
            ordered(2, "2.0.0", Some("^3.0.0")),
        ]);

        let walked = walk(&releases, &host("3.9.0"), IndexMode::ShortCircuit);

        assert_eq!(
            walked,
            Walk {
                matched: vec![2],
                evaluated: 2
            }
        );
    }

    #[test]
    fn walk_stops_at_first_miss_after_a_hit() {
        let releases = constrained_releases(&[
            ordered(3, "3.0.0", Some("^4.0.0")),
            ordered(2, "2.0.0", Some("^3.0.0")),
            ordered(1, "1.0.0", Some("^4.0.0")),
        ]);

        let short = walk(&releases, &host("4.1.0"), IndexMode::ShortCircuit);
        let exhaustive = walk(&releases, &host("4.1.0"), IndexMode::Exhaustive);

        assert_eq!(
            short,
            Walk {
                matched: vec![3],
                evaluated: 2
            }
        );
        assert_eq!(
            exhaustive,
            Walk {
                matched: vec![3, 1],
                evaluated: 3
            }
        );
    }

    #[test]
    fn constrained_releases_tightens_greater_or_equal() {
        let releases = constrained_releases(&[ordered(1, "1.0.0", Some(">=3.5.0"))]);

        assert_eq!(walk(&releases, &host("3.9.0"), IndexMode::Exhaustive).matched, vec![1]);
        assert!(walk(&releases, &host("4.0.0"), IndexMode::Exhaustive).matched.is_empty());
    }

    #[test]
    fn constrained_releases_skips_unconstrained_invalid_and_unparsable() {
        let mut invalid = ordered(2, "2.0.0", Some("^4.0"));
        invalid.valid = false;

        let releases = constrained_releases(&[
            ordered(3, "3.0.0", None),
            invalid,
            ordered(1, "1.0.0", Some("not a constraint")),
        ]);

        assert!(releases.is_empty());
    }

    #[test]
    fn index_mode_from_flag() {
        assert_eq!(IndexMode::from_flag(true), IndexMode::ShortCircuit);
        assert_eq!(IndexMode::from_flag(false), IndexMode::Exhaustive);
    }

    struct Fixture {
        store: SqliteStore,
        plugin_id: i64,
        host_id: i64,
    }

    impl Fixture {
        fn new() -> Self {
            let store = SqliteStore::open_in_memory().unwrap();
            let host_id = store.insert_package(&Package::new(HOST, "project")).unwrap();
            let plugin_id = store
                .insert_package(&Package::new("vendor/plugin", "craft-plugin"))
                .unwrap();
            Self {
                store,
                plugin_id,
                host_id,
            }
        }

        fn host_release(&self, version: &str) -> ReleaseRef {
            let normalized = normalize(version).unwrap();
            let id = self
                .store
                .insert_release(&Release::shell(
                    self.host_id,
                    version,
                    &normalized,
                    Stability::Stable,
                    version,
                ))
                .unwrap();
            self.store
                .release_refs(self.host_id)
                .unwrap()
                .into_iter()
                .find(|r| r.id == id)
                .unwrap()
        }

        fn plugin_release(&self, version: &str, constraint: &str) -> i64 {
            let normalized = normalize(version).unwrap();
            let id = self
                .store
                .insert_release(&Release::shell(
                    self.plugin_id,
                    version,
                    &normalized,
                    Stability::Stable,
                    version,
                ))
                .unwrap();
            self.store
                .insert_dependencies(&[Dependency {
                    package_id: self.plugin_id,
                    release_id: id,
                    name: HOST.to_string(),
                    constraints: constraint.to_string(),
                }])
                .unwrap();
            reorder(&self.store, self.plugin_id).unwrap();
            id
        }
    }

    #[test]
    fn index_new_host_release_records_compatible_plugin_releases() {
        let f = Fixture::new();
        let old = f.plugin_release("2.0.0", "^3.0.0");
        let new = f.plugin_release("3.0.0", "^4.0.0");
        let host_release = f.host_release("3.9.0");

        let count = index_new_host_release(
            &f.store,
            &host_release,
            HOST,
            "craft-plugin",
            IndexMode::ShortCircuit,
        )
        .unwrap();

        assert_eq!(count, 1);
        assert_eq!(
            f.store.compatible_host_release_ids(old).unwrap(),
            vec![host_release.id]
        );
        assert!(f.store.compatible_host_release_ids(new).unwrap().is_empty());
    }

    #[test]
    fn index_new_plugin_release_checks_every_host_release() {
        let f = Fixture::new();
        let h3 = f.host_release("3.9.0");
        let h4 = f.host_release("4.1.0");
        let h5 = f.host_release("5.0.0");
        let release = f.plugin_release("3.0.0", ">=4.0.0");

        let count =
            index_new_plugin_release(&f.store, release, Some(">=4.0.0"), HOST).unwrap();

        assert_eq!(count, 1);
        let compatible = f.store.compatible_host_release_ids(release).unwrap();
        assert_eq!(compatible, vec![h4.id]);
        assert!(!compatible.contains(&h3.id));
        assert!(!compatible.contains(&h5.id));
    }

    #[test]
    fn index_new_plugin_release_skips_unconstrained_release() {
        let f = Fixture::new();
        f.host_release("4.0.0");

        let count = index_new_plugin_release(&f.store, 99, None, HOST).unwrap();

        assert_eq!(count, 0);
    }

    #[test]
    fn reindex_plugin_exhaustive_recovers_loosened_constraints() {
        let f = Fixture::new();
        let oldest = f.plugin_release("1.0.0", "^4.0.0");
        let middle = f.plugin_release("2.0.0", "^3.0.0");
        let newest = f.plugin_release("3.0.0", "^4.0.0");
        let h4 = f.host_release("4.1.0");

        let short = reindex_plugin(&f.store, f.plugin_id, HOST, IndexMode::ShortCircuit).unwrap();
        assert_eq!(short, 1);
        assert!(f.store.compatible_host_release_ids(oldest).unwrap().is_empty());

        let exhaustive = reindex_plugin(&f.store, f.plugin_id, HOST, IndexMode::Exhaustive).unwrap();
        assert_eq!(exhaustive, 2);
        assert_eq!(f.store.compatible_host_release_ids(oldest).unwrap(), vec![h4.id]);
        assert_eq!(f.store.compatible_host_release_ids(newest).unwrap(), vec![h4.id]);
        assert!(f.store.compatible_host_release_ids(middle).unwrap().is_empty());
    }
}
