//! Request-scoped bookkeeping for one outer synchronization

use std::collections::{HashMap, HashSet, VecDeque};

use crate::version::NormalizedVersion;

/// Work queue, visited set and release-version cache for one outer sync.
///
/// Dependencies discovered while syncing a package are queued here instead of
/// being synced recursively; a package is synced at most once per context.
#[derive(Debug, Default)]
pub struct SyncContext {
    queue: VecDeque<String>,
    visited: HashSet<String>,
    versions: HashMap<String, Vec<NormalizedVersion>>,
}

impl SyncContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a package as synced. Returns false if it already was.
    pub fn visit(&mut self, name: &str) -> bool {
        self.visited.insert(name.to_string())
    }

    pub fn is_visited(&self, name: &str) -> bool {
        self.visited.contains(name)
    }

    /// Queue a package unless it was synced or queued already
    pub fn enqueue(&mut self, name: &str) -> bool {
        if self.is_visited(name) || self.queue.iter().any(|queued| queued == name) {
            return false;
        }
        self.queue.push_back(name.to_string());
        true
    }

    pub fn next_pending(&mut self) -> Option<String> {
        self.queue.pop_front()
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn cached_versions(&self, name: &str) -> Option<&[NormalizedVersion]> {
        self.versions.get(name).map(Vec::as_slice)
    }

    pub fn cache_versions(&mut self, name: &str, versions: Vec<NormalizedVersion>) {
        self.versions.insert(name.to_string(), versions);
    }

    /// Drop cached versions after the package's releases changed
    pub fn forget_versions(&mut self, name: &str) {
        self.versions.remove(name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enqueue_skips_visited_and_already_queued_packages() {
        let mut ctx = SyncContext::new();
        ctx.visit("vendor/a");

        assert!(!ctx.enqueue("vendor/a"));
        assert!(ctx.enqueue("vendor/b"));
        assert!(!ctx.enqueue("vendor/b"));
        assert_eq!(ctx.pending(), 1);
    }

    #[test]
    fn next_pending_is_fifo() {
        let mut ctx = SyncContext::new();
        ctx.enqueue("vendor/b");
        ctx.enqueue("vendor/c");

        assert_eq!(ctx.next_pending().as_deref(), Some("vendor/b"));
        assert_eq!(ctx.next_pending().as_deref(), Some("vendor/c"));
        assert_eq!(ctx.next_pending(), None);
    }

    #[test]
    fn visit_reports_first_visit_only() {
        let mut ctx = SyncContext::new();

        assert!(ctx.visit("vendor/a"));
        assert!(!ctx.visit("vendor/a"));
        assert!(ctx.is_visited("vendor/a"));
    }

    #[test]
    fn version_cache_can_be_forgotten() {
        let mut ctx = SyncContext::new();
        ctx.cache_versions("vendor/a", vec![NormalizedVersion::new(1, 0, 0, 0)]);

        assert_eq!(ctx.cached_versions("vendor/a").map(<[_]>::len), Some(1));

        ctx.forget_versions("vendor/a");
        assert!(ctx.cached_versions("vendor/a").is_none());
    }
}
