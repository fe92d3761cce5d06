//! A connection to one host's storage namespace with a read-through tree cache.
//!
//! Mutating commands never patch the cached tree; they mark it dirty and the
//! next [`Connection::pools`] call re-lists and reconciles. A `Connection` is
//! meant to have a single owner: every cache-touching method takes `&mut self`,
//! and sharing one across threads needs external synchronisation.

use crate::command::{
    create_args, destroy_args, list_args, receive_args, run_checked, send_args, snapshot_args,
};
use crate::pipeline::Stage;
use crate::target::Target;
use log::{debug, info};
use std::process::Stdio;
use zfsync_core::error::{StageRole, ZfsyncResult};
use zfsync_core::reconcile::{reconcile, ReconcileReport};
use zfsync_core::tree::{NodeId, Tree};
use zfsync_core::ZfsyncConfig;

/// Cached tree plus its staleness flag.
#[derive(Debug)]
pub struct DatasetCache {
    tree: Tree,
    dirty: bool,
}

impl Default for DatasetCache {
    fn default() -> Self {
        Self::new()
    }
}

impl DatasetCache {
    /// Empty cache that will be populated on first access.
    pub fn new() -> Self {
        Self {
            tree: Tree::new(),
            dirty: true,
        }
    }

    pub fn invalidate(&mut self) {
        self.dirty = true;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Reconcile the cached tree against `listing` and mark it clean.
    pub fn refresh(&mut self, listing: &str) -> ZfsyncResult<ReconcileReport> {
        let report = reconcile(&mut self.tree, listing)?;
        self.dirty = false;
        Ok(report)
    }

    pub fn tree(&self) -> &Tree {
        &self.tree
    }
}

#[derive(Debug)]
pub struct Connection {
    target: Target,
    cache: DatasetCache,
}

impl Connection {
    pub fn new(target: Target) -> Self {
        Self {
            target,
            cache: DatasetCache::new(),
        }
    }

    /// Connect to `host`, choosing local or ssh execution from the configuration.
    pub fn from_config(host: &str, config: &ZfsyncConfig) -> Self {
        Self::new(Target::resolve(host, config))
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn is_dirty(&self) -> bool {
        self.cache.is_dirty()
    }

    /// Force the next [`pools`](Self::pools) call to re-list.
    pub fn invalidate(&mut self) {
        self.cache.invalidate();
    }

    /// The mirrored tree, re-listing first when the cache is dirty.
    pub fn pools(&mut self) -> ZfsyncResult<&Tree> {
        if self.cache.is_dirty() {
            let listing = run_checked(&self.target.command(list_args()))?;
            let report = self.cache.refresh(&listing)?;
            debug!(
                "refreshed {}: {} nodes created, {} removed",
                self.target,
                report.created.len(),
                report.removed.len()
            );
        }
        Ok(self.cache.tree())
    }

    /// Resolve `path` in the (possibly refreshed) tree.
    pub fn lookup(&mut self, path: &str) -> ZfsyncResult<NodeId> {
        self.pools()?.lookup(path)
    }

    /// Create an unmounted dataset and return its node from a fresh listing.
    pub fn create_dataset(&mut self, name: &str) -> ZfsyncResult<NodeId> {
        self.mutate(create_args(name))?;
        self.lookup(name)
    }

    /// Recursively destroy `name` and everything below it.
    pub fn destroy(&mut self, name: &str) -> ZfsyncResult<()> {
        self.mutate(destroy_args(name))
    }

    /// Take `name@snapshot` recursively across descendants.
    pub fn snapshot_recursively(&mut self, name: &str, snapshot: &str) -> ZfsyncResult<()> {
        self.mutate(snapshot_args(name, snapshot))
    }

    fn mutate(&mut self, args: Vec<String>) -> ZfsyncResult<()> {
        let argv = self.target.command(args);
        info!("{}: {}", self.target, argv.join(" "));
        run_checked(&argv)?;
        self.cache.invalidate();
        Ok(())
    }

    /// Start a `send` of `name` whose stream is readable from the stage's stdout.
    pub fn send(&self, name: &str, incremental_from: Option<&str>) -> ZfsyncResult<Stage> {
        Stage::spawn(
            StageRole::Producer,
            self.target.command(send_args(name, incremental_from)),
            Stdio::null(),
            Stdio::piped(),
        )
    }

    /// Start a `receive` into `name` reading its stream from `input`.
    pub fn receive(&self, name: &str, input: Stdio) -> ZfsyncResult<Stage> {
        Stage::spawn(
            StageRole::Consumer,
            self.target.command(receive_args(name)),
            input,
            Stdio::inherit(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_starts_dirty_and_refresh_cleans_it() {
        let mut cache = DatasetCache::new();
        assert!(cache.is_dirty());

        let report = cache.refresh("tank\ntank/a\n").unwrap();
        assert_eq!(report.created.len(), 2);
        assert!(!cache.is_dirty());

        cache.invalidate();
        assert!(cache.is_dirty());
        let report = cache.refresh("tank\ntank/a\n").unwrap();
        assert!(report.is_noop());
    }

    #[test]
    fn failed_refresh_keeps_cache_dirty() {
        let mut cache = DatasetCache::new();
        assert!(cache.refresh("tank//broken\n").is_err());
        assert!(cache.is_dirty());
    }
}
