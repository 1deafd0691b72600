//! Parent/child hierarchy reconstruction.
//!
//! A dataset becomes hierarchical when it names an id column and a parent
//! column. [`link_rows`] links every row to the row whose id equals its
//! parent value, then walks down from the roots assigning ancestor chains
//! (`parent_rows`, nearest first). Siblings share one chain allocation.
//!
//! A row that cannot be reached from a root sits on a parent cycle (or
//! below one). In that case all links are discarded and the dataset falls
//! back to flat mode.

use std::sync::Arc;

use horizon_rowset_core::targets;

use crate::error::{NavError, Result};
use crate::index::IndexNode;
use crate::row::{RowId, RowStore, TreeLinks};

/// Raised when parent links form a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeCycle {
    /// Rows that could not be reached from a root.
    pub unreachable: usize,
}

/// Tree state of a dataset.
#[derive(Debug, Clone, Default)]
pub struct Hierarchy {
    /// `true` while the dataset is linked as a tree.
    pub active: bool,
    /// Rows without a parent, in load order.
    pub roots: Vec<RowId>,
}

/// Clear every tree link.
pub fn unlink_rows(store: &mut RowStore) {
    let all = store.all_rows().to_vec();
    for id in all {
        store[id].tree = TreeLinks::default();
        store[id].tags.parent_collapsed = false;
    }
}

/// Link rows by parent value and assign ancestor chains.
///
/// `ids` is an index on the id column. Returns the roots, or the cycle
/// that made linking fail (links are cleared in that case).
pub fn link_rows(
    store: &mut RowStore,
    ids: &IndexNode,
    parent_fi: usize,
) -> std::result::Result<Vec<RowId>, TreeCycle> {
    unlink_rows(store);
    let all = store.all_rows().to_vec();
    let mut roots = Vec::new();
    for &id in &all {
        let parent_val = store[id].val(parent_fi).clone();
        let parent = if parent_val.is_null() {
            None
        } else {
            ids.lookup(&[parent_val]).first().copied()
        };
        match parent {
            Some(parent) => {
                store[id].tree.parent_row = Some(parent);
                store[parent].tree.child_rows.push(id);
            }
            None => roots.push(id),
        }
    }

    let reached = assign_chains(store, &roots);
    if reached < all.len() {
        unlink_rows(store);
        let cycle = TreeCycle {
            unreachable: all.len() - reached,
        };
        tracing::warn!(
            target: targets::TREE,
            unreachable = cycle.unreachable,
            "circular parent reference detected, falling back to flat rows"
        );
        return Err(cycle);
    }

    for &root in &roots {
        refresh_collapsed(store, root);
    }
    tracing::debug!(target: targets::TREE, rows = all.len(), roots = roots.len(), "rows linked");
    Ok(roots)
}

/// Assign chains below `roots`; returns the number of rows reached.
fn assign_chains(store: &mut RowStore, roots: &[RowId]) -> usize {
    let empty: Arc<[RowId]> = Arc::from(Vec::new());
    let mut stack = Vec::with_capacity(roots.len());
    for &root in roots {
        store[root].tree.parent_rows = empty.clone();
        stack.push(root);
    }
    let mut reached = roots.len();
    while let Some(parent) = stack.pop() {
        reached += assign_children(store, parent, &mut stack);
    }
    reached
}

/// Give the children of `parent` a shared chain and queue them.
fn assign_children(store: &mut RowStore, parent: RowId, stack: &mut Vec<RowId>) -> usize {
    let children = store[parent].tree.child_rows.clone();
    if children.is_empty() {
        return 0;
    }
    let chain: Arc<[RowId]> = std::iter::once(parent)
        .chain(store[parent].tree.parent_rows.iter().copied())
        .collect();
    for &child in &children {
        store[child].tree.parent_rows = chain.clone();
        stack.push(child);
    }
    children.len()
}

/// Returns `true` if `ancestor` is `row` or one of its ancestors.
pub fn is_ancestor_or_self(store: &RowStore, ancestor: RowId, row: RowId) -> bool {
    ancestor == row || store[row].tree.parent_rows.contains(&ancestor)
}

/// Move `row` (with its subtree) under `new_parent`, or to the roots.
///
/// Only links are changed; the caller updates the parent column value.
pub fn reparent(
    store: &mut RowStore,
    hierarchy: &mut Hierarchy,
    row: RowId,
    new_parent: Option<RowId>,
) -> Result<()> {
    if let Some(parent) = new_parent {
        if is_ancestor_or_self(store, row, parent) {
            return Err(NavError::invalid_parent("a row cannot become its own descendant"));
        }
    }

    match store[row].tree.parent_row {
        Some(old) => store[old].tree.child_rows.retain(|&c| c != row),
        None => hierarchy.roots.retain(|&r| r != row),
    }
    store[row].tree.parent_row = new_parent;
    match new_parent {
        Some(parent) => {
            store[parent].tree.child_rows.push(row);
            let chain: Arc<[RowId]> = std::iter::once(parent)
                .chain(store[parent].tree.parent_rows.iter().copied())
                .collect();
            store[row].tree.parent_rows = chain;
        }
        None => {
            hierarchy.roots.push(row);
            store[row].tree.parent_rows = Arc::from(Vec::new());
            store[row].tags.parent_collapsed = false;
        }
    }

    let mut stack = vec![row];
    while let Some(parent) = stack.pop() {
        assign_children(store, parent, &mut stack);
    }
    match new_parent {
        Some(parent) => refresh_collapsed(store, parent),
        None => refresh_collapsed(store, row),
    }
    tracing::debug!(target: targets::TREE, ?row, ?new_parent, "row reparented");
    Ok(())
}

/// Descendants of `row`, depth first, in child order.
pub fn descendants(store: &RowStore, row: RowId) -> Vec<RowId> {
    let mut out = Vec::new();
    let mut stack: Vec<RowId> = store[row].tree.child_rows.iter().rev().copied().collect();
    while let Some(id) = stack.pop() {
        out.push(id);
        stack.extend(store[id].tree.child_rows.iter().rev().copied());
    }
    out
}

/// Recompute `parent_collapsed` for the subtree below `row`.
pub fn refresh_collapsed(store: &mut RowStore, row: RowId) {
    let mut stack = vec![row];
    while let Some(parent) = stack.pop() {
        let hidden = store[parent].tags.collapsed || store[parent].tags.parent_collapsed;
        let children = store[parent].tree.child_rows.clone();
        for child in children {
            store[child].tags.parent_collapsed = hidden;
            stack.push(child);
        }
    }
}

/// Collapse or expand a row, optionally with its whole subtree.
///
/// Only rows with children carry the collapsed flag; a leaf is left alone.
pub fn set_collapsed(store: &mut RowStore, row: RowId, collapsed: bool, recursive: bool) {
    if store[row].tree.child_rows.is_empty() {
        return;
    }
    store[row].tags.collapsed = collapsed;
    if recursive {
        for id in descendants(store, row) {
            if !store[id].tree.child_rows.is_empty() {
                store[id].tags.collapsed = collapsed;
            }
        }
    }
    refresh_collapsed(store, row);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::build_index;
    use crate::value::Value;

    // fields: id, parent_id
    fn store(rows: &[(i64, Option<i64>)]) -> (RowStore, Vec<RowId>) {
        let mut store = RowStore::new(2);
        let ids = rows
            .iter()
            .map(|&(id, parent)| store.push(vec![Value::Int(id), parent.into()]))
            .collect();
        (store, ids)
    }

    fn link(store: &mut RowStore) -> std::result::Result<Vec<RowId>, TreeCycle> {
        let index = build_index(store, &store.all_rows().to_vec(), &[0], &[]);
        link_rows(store, &index, 1)
    }

    #[test]
    fn test_link_rows_and_shared_chains() {
        let (mut store, r) = store(&[(1, None), (2, Some(1)), (3, Some(1)), (4, Some(2)), (5, Some(99))]);
        let roots = link(&mut store).unwrap();
        assert_eq!(roots, vec![r[0], r[4]]);
        assert_eq!(store[r[0]].tree.child_rows, vec![r[1], r[2]]);
        assert_eq!(&*store[r[3]].tree.parent_rows, &[r[1], r[0]]);
        assert!(Arc::ptr_eq(&store[r[1]].tree.parent_rows, &store[r[2]].tree.parent_rows));
        assert_eq!(descendants(&store, r[0]), vec![r[1], r[3], r[2]]);
    }

    #[test]
    fn test_cycle_falls_back_to_flat() {
        let (mut store, r) = store(&[(1, Some(2)), (2, Some(1)), (3, None)]);
        let err = link(&mut store).unwrap_err();
        assert_eq!(err.unreachable, 2);
        assert!(store[r[0]].tree.parent_row.is_none());
        assert!(store[r[1]].tree.child_rows.is_empty());
    }

    #[test]
    fn test_self_parent_is_a_cycle() {
        let (mut store, _) = store(&[(1, Some(1))]);
        assert!(link(&mut store).is_err());
    }

    #[test]
    fn test_reparent_moves_subtree() {
        let (mut store, r) = store(&[(1, None), (2, Some(1)), (3, Some(2)), (4, None)]);
        let roots = link(&mut store).unwrap();
        let mut hierarchy = Hierarchy { active: true, roots };

        reparent(&mut store, &mut hierarchy, r[1], Some(r[3])).unwrap();
        assert!(store[r[0]].tree.child_rows.is_empty());
        assert_eq!(store[r[3]].tree.child_rows, vec![r[1]]);
        assert_eq!(&*store[r[2]].tree.parent_rows, &[r[1], r[3]]);

        let err = reparent(&mut store, &mut hierarchy, r[3], Some(r[2])).unwrap_err();
        assert!(matches!(err, NavError::InvalidParent { .. }));
        assert!(reparent(&mut store, &mut hierarchy, r[3], Some(r[3])).is_err());

        reparent(&mut store, &mut hierarchy, r[1], None).unwrap();
        assert_eq!(hierarchy.roots, vec![r[0], r[3], r[1]]);
        assert_eq!(&*store[r[2]].tree.parent_rows, &[r[1]]);
    }

    #[test]
    fn test_reparent_to_roots_leaves_collapsed_parent() {
        let (mut store, r) = store(&[(1, None), (2, Some(1)), (3, Some(2))]);
        let roots = link(&mut store).unwrap();
        let mut hierarchy = Hierarchy { active: true, roots };
        set_collapsed(&mut store, r[0], true, false);
        assert!(store[r[1]].tags.parent_collapsed);

        reparent(&mut store, &mut hierarchy, r[1], None).unwrap();
        assert!(!store[r[1]].tags.parent_collapsed);
        assert!(!store[r[2]].tags.parent_collapsed);
        assert_eq!(hierarchy.roots, vec![r[0], r[1]]);
    }

    #[test]
    fn test_collapse_hides_descendants() {
        let (mut store, r) = store(&[(1, None), (2, Some(1)), (3, Some(2))]);
        link(&mut store).unwrap();

        set_collapsed(&mut store, r[1], true, false);
        assert!(!store[r[1]].tags.parent_collapsed);
        assert!(store[r[2]].tags.parent_collapsed);

        set_collapsed(&mut store, r[0], true, false);
        set_collapsed(&mut store, r[1], false, false);
        assert!(store[r[2]].tags.parent_collapsed);

        set_collapsed(&mut store, r[0], false, true);
        assert!(!store[r[1]].tags.parent_collapsed);
        assert!(!store[r[2]].tags.parent_collapsed);
    }

    #[test]
    fn test_recursive_collapse_skips_leaves() {
        let (mut store, r) = store(&[(1, None), (2, Some(1)), (3, Some(2)), (4, Some(1))]);
        link(&mut store).unwrap();

        set_collapsed(&mut store, r[0], true, true);
        assert!(store[r[0]].tags.collapsed && store[r[1]].tags.collapsed);
        assert!(!store[r[2]].tags.collapsed);
        assert!(!store[r[3]].tags.collapsed);
        assert!(store[r[2]].tags.parent_collapsed && store[r[3]].tags.parent_collapsed);

        set_collapsed(&mut store, r[2], true, false);
        assert!(!store[r[2]].tags.collapsed);
    }
}
