//! Store and coordinator setup

use std::sync::Arc;

use tempfile::TempDir;

use plugin_registry::config::RegistryConfig;
use plugin_registry::store::{Package, ReleaseStore, SqliteStore};
use plugin_registry::sync::SyncCoordinator;
use plugin_registry::version::NormalizedVersion;

use super::vcs::ScriptedVcs;

/// A fresh on-disk store; keep the TempDir alive for the test's duration
pub fn create_test_store() -> (TempDir, Arc<SqliteStore>) {
    let temp_dir = TempDir::new().unwrap();
    let store = SqliteStore::open(&temp_dir.path().join("registry.db")).unwrap();
    (temp_dir, Arc::new(store))
}

/// Config with its own gate so tests in one binary do not contend
pub fn test_config(lock_name: &str) -> RegistryConfig {
    let mut config = RegistryConfig::default();
    config.lock.name = lock_name.to_string();
    config.lock.wait_secs = 1;
    config
}

pub fn create_coordinator(
    store: &Arc<SqliteStore>,
    vcs: &Arc<ScriptedVcs>,
    lock_name: &str,
) -> SyncCoordinator<SqliteStore> {
    SyncCoordinator::new(store.clone(), vcs.clone(), test_config(lock_name))
}

pub fn insert_package(store: &SqliteStore, name: &str, package_type: &str, managed: bool) -> i64 {
    let mut package = Package::new(name, package_type);
    package.managed = managed;
    store.insert_package(&package).unwrap()
}

pub fn package_id(store: &SqliteStore, name: &str) -> i64 {
    store.package_by_name(name).unwrap().unwrap().id.unwrap()
}

/// Stored raw versions of a package, ascending
pub fn stored_versions(store: &SqliteStore, name: &str) -> Vec<String> {
    let Some(package) = store.package_by_name(name).unwrap() else {
        return Vec::new();
    };
    let mut refs = store.release_refs(package.id.unwrap()).unwrap();
    refs.sort_by_key(|r| NormalizedVersion::parse(&r.normalized_version).unwrap());
    refs.into_iter().map(|r| r.version).collect()
}
