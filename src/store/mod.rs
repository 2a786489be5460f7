//! Persistence boundary for packages, releases and derived indexes
//!
//! The sync pipeline only talks to [`ReleaseStore`]; [`SqliteStore`] is the
//! bundled implementation.

#[cfg(test)]
use mockall::automock;

pub mod error;
pub mod sqlite;
pub mod types;

pub use error::StoreError;
pub use sqlite::SqliteStore;
pub use types::{
    Author, CompatEntry, Dependency, License, OrderedRelease, Package, Reference, Release,
    ReleaseMetadata, ReleaseNotes, ReleaseOrder, ReleaseRef,
};

/// Keyed CRUD over Package / Release / Dependency / ReleaseOrder / CompatEntry records
#[cfg_attr(test, automock)]
pub trait ReleaseStore: Send + Sync + 'static {
    /// Open the transaction that wraps one outer synchronization
    fn begin(&self) -> Result<(), StoreError>;

    fn commit(&self) -> Result<(), StoreError>;

    fn rollback(&self) -> Result<(), StoreError>;

    fn package_by_name(&self, name: &str) -> Result<Option<Package>, StoreError>;

    fn insert_package(&self, package: &Package) -> Result<i64, StoreError>;

    fn update_package(&self, package: &Package) -> Result<(), StoreError>;

    /// Remove a package together with its releases and everything derived from them
    fn delete_package(&self, package_id: i64) -> Result<(), StoreError>;

    fn managed_packages(&self) -> Result<Vec<Package>, StoreError>;

    /// Unmanaged packages, i.e. third-party dependencies
    fn dependency_packages(&self) -> Result<Vec<Package>, StoreError>;

    fn packages_by_type(&self, package_type: &str) -> Result<Vec<Package>, StoreError>;

    fn release_refs(&self, package_id: i64) -> Result<Vec<ReleaseRef>, StoreError>;

    fn releases(&self, package_id: i64) -> Result<Vec<Release>, StoreError>;

    fn release_by_version(
        &self,
        package_id: i64,
        normalized_version: &str,
    ) -> Result<Option<Release>, StoreError>;

    fn insert_release(&self, release: &Release) -> Result<i64, StoreError>;

    /// Batch delete; dependencies, orders and compatibility rows go with them
    fn delete_releases(&self, release_ids: &[i64]) -> Result<(), StoreError>;

    fn update_release_notes(&self, release_id: i64, notes: &ReleaseNotes)
    -> Result<(), StoreError>;

    fn insert_dependencies(&self, dependencies: &[Dependency]) -> Result<(), StoreError>;

    fn dependencies_for_release(&self, release_id: i64) -> Result<Vec<Dependency>, StoreError>;

    /// Every distinct constraint string stored against `dependency_name`
    fn constraints_on(&self, dependency_name: &str) -> Result<Vec<String>, StoreError>;

    /// Delete all orders for the plugin and write `orders` in one batch
    fn replace_release_orders(
        &self,
        plugin_id: i64,
        orders: &[ReleaseOrder],
    ) -> Result<(), StoreError>;

    fn release_orders(&self, plugin_id: i64) -> Result<Vec<ReleaseOrder>, StoreError>;

    /// Plugin releases newest first by `order`, with their constraint on `host_name`
    fn ordered_plugin_releases(
        &self,
        plugin_id: i64,
        host_name: &str,
    ) -> Result<Vec<OrderedRelease>, StoreError>;

    fn insert_compat_entries(&self, entries: &[CompatEntry]) -> Result<(), StoreError>;

    fn delete_compat_for_plugin(&self, plugin_id: i64) -> Result<(), StoreError>;

    /// Host release ids recorded as compatible with the plugin release
    fn compatible_host_release_ids(&self, plugin_release_id: i64)
    -> Result<Vec<i64>, StoreError>;
}
