//! Incremental reconciliation of a [`Tree`] against a flat `zfs list` listing.
//!
//! Each record is one line, tab-separated, with the full path as its first
//! field. Nodes whose path survives keep their `NodeId`; new paths are created
//! get-or-insert style while walking the components; vanished paths are
//! removed deepest first so a cascading ancestor removal never races a
//! descendant removal.

use crate::error::{ZfsyncError, ZfsyncResult};
use crate::tree::{children_first, NodeId, Tree};
use log::debug;
use std::collections::{HashMap, HashSet};

/// What a single reconciliation pass changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Nodes created in this pass, in creation order.
    pub created: Vec<NodeId>,
    /// Paths that vanished and were removed, deepest first.
    pub removed: Vec<String>,
}

impl ReconcileReport {
    pub fn is_noop(&self) -> bool {
        self.created.is_empty() && self.removed.is_empty()
    }
}

/// One parsed listing record.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Record<'a> {
    pool: &'a str,
    datasets: Vec<&'a str>,
    snapshot: Option<&'a str>,
}

fn parse_record(line: &str) -> ZfsyncResult<Record<'_>> {
    let field = line.split('\t').next().unwrap_or_default().trim();
    let malformed = |reason: &str| ZfsyncError::MalformedListing {
        line: line.to_string(),
        reason: reason.to_string(),
    };

    let (path, snapshot) = match field.split_once('@') {
        Some((path, snapshot)) => {
            if snapshot.contains('@') {
                return Err(malformed("more than one `@`"));
            }
            if snapshot.is_empty() || snapshot.contains('/') {
                return Err(malformed("invalid snapshot name"));
            }
            (path, Some(snapshot))
        }
        None => (field, None),
    };

    let mut components = path.split('/');
    let pool = components.next().unwrap_or_default();
    let datasets: Vec<&str> = components.collect();
    if pool.is_empty() || datasets.iter().any(|component| component.is_empty()) {
        return Err(malformed("empty path component"));
    }

    Ok(Record {
        pool,
        datasets,
        snapshot,
    })
}

/// Mutate `tree` in place until its path set equals the paths in `listing`.
///
/// The listing is fully parsed before the tree is touched, so a malformed
/// record leaves the tree unchanged.
pub fn reconcile(tree: &mut Tree, listing: &str) -> ZfsyncResult<ReconcileReport> {
    let mut old_nodes: HashMap<String, NodeId> = HashMap::new();
    let mut old_paths = Vec::new();
    for id in tree.walk() {
        let id = id?;
        let path = tree.path(id)?;
        old_nodes.insert(path.clone(), id);
        old_paths.push(path);
    }

    let records = listing
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(parse_record)
        .collect::<ZfsyncResult<Vec<_>>>()?;

    let mut report = ReconcileReport::default();
    let mut new_paths: HashSet<String> = HashSet::new();

    for record in &records {
        let mut current = match tree.pool(record.pool) {
            Ok(pool) => pool,
            Err(err) if err.is_not_found() => {
                let pool = tree.add_pool(record.pool);
                report.created.push(pool);
                pool
            }
            Err(err) => return Err(err),
        };
        let mut path = record.pool.to_string();
        new_paths.insert(path.clone());

        for component in &record.datasets {
            let (child, created) = tree.dataset_or_insert(current, component)?;
            if created {
                report.created.push(child);
            }
            current = child;
            path.push('/');
            path.push_str(component);
            new_paths.insert(path.clone());
        }

        if let Some(snapshot) = record.snapshot {
            let (child, created) = tree.snapshot_or_insert(current, snapshot)?;
            if created {
                report.created.push(child);
            }
            new_paths.insert(format!("{path}@{snapshot}"));
        }
    }

    let vanished: Vec<String> = old_paths
        .into_iter()
        .filter(|path| !new_paths.contains(path))
        .collect();

    for path in children_first(vanished) {
        let id = old_nodes[&path];
        let parent = match tree.node(id) {
            Ok(node) => node.parent(),
            // An ancestor removed earlier in this pass already took it down.
            Err(ZfsyncError::InvalidatedNode(_)) => continue,
            Err(err) => return Err(err),
        };
        match parent {
            None => tree.remove_pool(&path)?,
            Some(parent) => tree.remove(parent, id)?,
        }
        report.removed.push(path);
    }

    debug!(
        "reconciled listing of {} records: {} created, {} removed",
        records.len(),
        report.created.len(),
        report.removed.len()
    );
    Ok(report)
}
