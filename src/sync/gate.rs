//! Process-wide synchronization gate
//!
//! Every registry-mutating entry point acquires the gate named in the config
//! before touching the store. Gates are looked up by name, so two
//! coordinators configured with the same name exclude each other.
//!
//! The gate is not re-entrant. An outer call acquires it once and hands the
//! [`SyncPermit`] down to the work it performs.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock, Mutex};
use std::time::Duration;

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::debug;

use crate::sync::error::SyncError;

static GATES: LazyLock<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

fn gate_named(name: &str) -> Arc<AsyncMutex<()>> {
    let mut gates = GATES.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    gates
        .entry(name.to_string())
        .or_insert_with(|| Arc::new(AsyncMutex::new(())))
        .clone()
}

#[derive(Clone)]
pub struct SyncGate {
    name: String,
    wait: Duration,
    lock: Arc<AsyncMutex<()>>,
}

impl SyncGate {
    pub fn named(name: &str, wait: Duration) -> Self {
        Self {
            name: name.to_string(),
            wait,
            lock: gate_named(name),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Wait up to the configured bound for the gate
    pub async fn acquire(&self) -> Result<SyncPermit, SyncError> {
        let guard = tokio::time::timeout(self.wait, self.lock.clone().lock_owned())
            .await
            .map_err(|_| SyncError::LockTimeout {
                name: self.name.clone(),
                waited_secs: self.wait.as_secs(),
            })?;

        debug!("Acquired sync gate {}", self.name);
        Ok(SyncPermit {
            name: self.name.clone(),
            _guard: guard,
        })
    }
}

/// Proof that the holder owns the gate; released on drop
pub struct SyncPermit {
    name: String,
    _guard: OwnedMutexGuard<()>,
}

impl SyncPermit {
    pub fn gate_name(&self) -> &str {
        &self.name
    }
}

impl Drop for SyncPermit {
    fn drop(&mut self) {
        debug!("Released sync gate {}", self.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn acquire_times_out_while_permit_is_held() {
        let gate = SyncGate::named("gate-test-timeout", Duration::from_millis(20));

        let permit = gate.acquire().await.unwrap();
        let second = gate.acquire().await;

        assert!(matches!(
            second,
            Err(SyncError::LockTimeout { ref name, .. }) if name == "gate-test-timeout"
        ));
        drop(permit);
    }

    #[tokio::test]
    async fn acquire_succeeds_after_permit_is_dropped() {
        let gate = SyncGate::named("gate-test-release", Duration::from_millis(20));

        drop(gate.acquire().await.unwrap());

        assert!(gate.acquire().await.is_ok());
    }

    #[tokio::test]
    async fn gates_with_the_same_name_share_one_lock() {
        let first = SyncGate::named("gate-test-shared", Duration::from_millis(20));
        let second = SyncGate::named("gate-test-shared", Duration::from_millis(20));

        let _permit = first.acquire().await.unwrap();

        assert!(second.acquire().await.is_err());
    }

    #[tokio::test]
    async fn gates_with_different_names_are_independent() {
        let first = SyncGate::named("gate-test-a", Duration::from_millis(20));
        let second = SyncGate::named("gate-test-b", Duration::from_millis(20));

        let _permit = first.acquire().await.unwrap();
        let other = second.acquire().await.unwrap();

        assert_eq!(other.gate_name(), "gate-test-b");
    }
}
