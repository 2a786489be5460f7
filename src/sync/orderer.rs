//! Ranking keys for plugin releases
//!
//! `order` is the position in ascending version order. `stable_order` is the
//! position after a stable sort on (stability rank, `order`), so the highest
//! `stable_order` at or above a stability floor is the latest release in it.

use tracing::debug;

use crate::store::{ReleaseOrder, ReleaseRef, ReleaseStore};
use crate::sync::error::SyncError;
use crate::version::NormalizedVersion;

/// Compute both ranking keys for a plugin's releases
pub fn compute_orders(
    plugin_id: i64,
    releases: &[ReleaseRef],
) -> Result<Vec<ReleaseOrder>, SyncError> {
    let mut by_version = releases
        .iter()
        .map(|r| Ok((NormalizedVersion::parse(&r.normalized_version)?, r)))
        .collect::<Result<Vec<_>, SyncError>>()?;
    by_version.sort_by(|(a, _), (b, _)| a.cmp(b));

    let mut orders: Vec<ReleaseOrder> = by_version
        .iter()
        .enumerate()
        .map(|(i, (_, release))| ReleaseOrder {
            release_id: release.id,
            plugin_id,
            order: i as i64,
            stable_order: 0,
        })
        .collect();

    let mut grouped: Vec<usize> = (0..orders.len()).collect();
    grouped.sort_by_key(|&i| (by_version[i].1.stability.rank(), orders[i].order));
    for (position, index) in grouped.into_iter().enumerate() {
        orders[index].stable_order = position as i64;
    }

    Ok(orders)
}

/// Recompute and replace every order row of the plugin
pub fn reorder<S: ReleaseStore + ?Sized>(
    store: &S,
    plugin_id: i64,
) -> Result<Vec<ReleaseOrder>, SyncError> {
    let releases = store.release_refs(plugin_id)?;
    let orders = compute_orders(plugin_id, &releases)?;
    store.replace_release_orders(plugin_id, &orders)?;

    debug!("Reordered {} releases of plugin {}", orders.len(), plugin_id);
    Ok(orders)
}
