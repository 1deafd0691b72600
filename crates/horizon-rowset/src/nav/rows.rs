//! Row insertion and removal, lookups, ordering and tree operations.

use std::collections::HashMap;
use std::ops::RangeInclusive;
use std::sync::Arc;

use horizon_rowset_core::targets;

use super::{Nav, RowValues};
use crate::config::SaveTrigger;
use crate::error::{NavError, Result};
use crate::events::{FocusChange, UpdateFlags};
use crate::index::{IndexNode, RangeDef, RowGroup};
use crate::row::RowId;
use crate::schema::ColumnRef;
use crate::sort::{DirChange, OrderBy};
use crate::tree;
use crate::value::Value;

/// Options of [`Nav::insert_rows`].
#[derive(Debug, Clone, Default)]
pub struct InsertOptions {
    /// Visible position of the first inserted row; appended when `None`.
    pub at: Option<usize>,
    /// Update the row with the same primary key instead of inserting.
    pub upsert: bool,
    /// Focus the first inserted row.
    pub focus: bool,
}

/// A block of visible rows picked up by [`Nav::start_move_selected_rows`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowMove {
    rows: Vec<RowId>,
    from: usize,
    parent: Option<RowId>,
    range: RangeInclusive<usize>,
}

impl RowMove {
    /// The moved rows in visible order, expanded descendants included.
    pub fn rows(&self) -> &[RowId] {
        &self.rows
    }

    /// Visible position of the first moved row.
    pub fn start_index(&self) -> usize {
        self.from
    }

    /// Parent of the block's top rows.
    pub fn parent(&self) -> Option<RowId> {
        self.parent
    }

    /// Positions the block may be dropped at, counted with the block
    /// taken out of the visible rows.
    pub fn insert_range(&self) -> RangeInclusive<usize> {
        self.range.clone()
    }
}

impl Nav {
    /// Returns `true` if rows may be added.
    pub fn can_add_rows(&self) -> bool {
        self.perms.can_add_rows
    }

    /// Insert rows.
    ///
    /// Columns missing from a value map get the field's client default, or
    /// the master parameter value when the dataset is filtered by params.
    /// Inserted rows are new and modified, and every cell is validated, so
    /// a duplicate key shows up as a cell error. Returns the affected rows
    /// in input order (existing rows for upserted keys).
    ///
    /// # Panics
    ///
    /// Panics if a value map names a column that does not exist.
    pub fn insert_rows(&mut self, rows: Vec<RowValues>, opts: InsertOptions) -> Result<Vec<RowId>> {
        if !self.perms.can_add_rows {
            return Err(NavError::not_permitted("add rows"));
        }
        let ids = self.batch(|nav| {
            let mut ids = Vec::with_capacity(rows.len());
            let mut added = Vec::new();
            let mut at = opts.at.unwrap_or(nav.rows.len()).min(nav.rows.len());
            for values in rows {
                if opts.upsert {
                    if let Some(existing) = nav.find_by_key(&values) {
                        nav.upsert_row(existing, &values);
                        ids.push(existing);
                        continue;
                    }
                }
                let id = nav.insert_one(&values, at);
                if nav.store[id].row_index.is_some() {
                    at += 1;
                }
                ids.push(id);
                added.push(id);
            }
            if !added.is_empty() {
                if nav.hierarchy.active {
                    nav.reproject();
                }
                nav.signals.rows_added.emit(added.clone());
                nav.touch(UpdateFlags::ROWS);
                tracing::debug!(target: targets::NAV, count = added.len(), "rows inserted");
            }
            if opts.focus {
                if let Some(ri) = ids.first().and_then(|&id| nav.row_index(id)) {
                    nav.focus_cell(Some(ri), None, 0, 0, &super::FocusOpts::default());
                }
            }
            ids
        });
        self.auto_save(SaveTrigger::Input);
        Ok(ids)
    }

    /// Insert a single row.
    pub fn insert_row<K, V>(&mut self, values: impl IntoIterator<Item = (K, V)>) -> Result<RowId>
    where
        K: Into<String>,
        V: Into<Value>,
    {
        let values: RowValues = values.into_iter().map(|(k, v)| (k.into(), v.into())).collect();
        let ids = self.insert_rows(vec![values], InsertOptions::default())?;
        ids.first()
            .copied()
            .ok_or_else(|| NavError::not_permitted("add rows"))
    }

    fn insert_one(&mut self, values: &RowValues, at: usize) -> RowId {
        let mut vals: Vec<Value> = self
            .schema
            .fields()
            .iter()
            .map(|f| f.client_default.clone().unwrap_or(Value::Null))
            .collect();
        if !self.is_server_backed() {
            if let Some(params) = self.param_vals.first() {
                for (param, val) in params {
                    if let Some(fi) = self.schema.try_index(param.as_str()) {
                        vals[fi] = val.clone();
                    }
                }
            }
        }
        for (col, val) in values {
            let fi = self.schema.index(col);
            vals[fi] = self.schema.field(fi).convert(val.clone());
        }

        let id = self.store.push(vals);
        {
            let tags = &mut self.store[id].tags;
            tags.is_new = true;
            tags.modified = true;
        }
        self.index.invalidate();

        if self.hierarchy.active {
            self.hierarchy.roots.push(id);
            let parent = self.parent_field().and_then(|fi| {
                let val = self.store[id].val(fi).clone();
                self.find_parent_row(&val)
            });
            if parent.is_some() {
                if let Err(err) = tree::reparent(&mut self.store, &mut self.hierarchy, id, parent) {
                    tracing::warn!(target: targets::TREE, %err, "inserted row not linked");
                }
            }
        }

        self.validate_row_cells(id);
        self.update_row_flags(id);

        if self.row_visible(id) && !self.hierarchy.active {
            self.rows.insert(at, id);
            self.update_row_indices(at);
        }
        id
    }

    /// Row with the primary key given in `values`, if any.
    fn find_by_key(&self, values: &RowValues) -> Option<RowId> {
        if self.pk.is_empty() {
            return None;
        }
        let keys: Option<Vec<Value>> = self.pk.iter().map(|c| values.get(c).cloned()).collect();
        let keys = keys.filter(|k| !k.iter().any(Value::is_null))?;
        let cols: Vec<&str> = self.pk.iter().map(String::as_str).collect();
        self.lookup(&cols, &keys).first().copied()
    }

    fn upsert_row(&mut self, row: RowId, values: &RowValues) {
        for (col, val) in values {
            let fi = self.schema.index(col);
            if self.store[row].val(fi) == val {
                continue;
            }
            if let Err(err) = self.set_cell_val(row, fi, val.clone()) {
                tracing::debug!(target: targets::NAV, %err, col = %col, "upsert skipped a cell");
            }
        }
        self.signals.rows_changed.emit(vec![row]);
    }

    /// Check whether a row may be removed.
    pub fn can_remove_row(&self, row: RowId) -> Result<()> {
        let tags = &self.store[row].tags;
        if !self.perms.can_remove_rows && !tags.is_new {
            return Err(NavError::not_permitted("remove rows"));
        }
        if !tags.can_remove {
            return Err(NavError::not_permitted("remove this row"));
        }
        if tags.save_request.is_some() {
            return Err(NavError::row_locked("removed"));
        }
        Ok(())
    }

    /// Remove rows, with their descendants in a hierarchical dataset.
    ///
    /// New rows are dropped immediately; others are marked removed until a
    /// save confirms them. Rows that may not be removed are skipped; the
    /// first refusal is returned if nothing could be removed.
    pub fn remove_rows(&mut self, rows: &[RowId]) -> Result<Vec<RowId>> {
        let mut doomed = Vec::new();
        for &row in rows {
            if !self.store.contains(row) || doomed.contains(&row) {
                continue;
            }
            doomed.push(row);
            if self.hierarchy.active {
                for child in tree::descendants(&self.store, row) {
                    if !doomed.contains(&child) {
                        doomed.push(child);
                    }
                }
            }
        }

        let mut refusal = None;
        let removable: Vec<RowId> = doomed
            .into_iter()
            .filter(|&row| match self.can_remove_row(row) {
                Ok(()) => !self.store[row].tags.removed,
                Err(err) => {
                    tracing::debug!(target: targets::NAV, %err, ?row, "row not removed");
                    refusal.get_or_insert(err);
                    false
                }
            })
            .collect();
        if removable.is_empty() {
            return match refusal {
                Some(err) => Err(err),
                None => Ok(Vec::new()),
            };
        }

        let focused = self.focus.row;
        let forever = !self.can_save_changes();
        self.batch(|nav| {
            for &row in &removable {
                if nav.store[row].tags.is_new || forever {
                    nav.drop_row(row);
                } else {
                    nav.begin_set_state(row);
                    nav.store[row].tags.removed = true;
                    nav.update_row_flags(row);
                    nav.end_set_state();
                    nav.focus.selected.remove(&row);
                }
            }
            nav.index.invalidate();
            nav.reproject();
            nav.signals.rows_removed.emit(removable.clone());
            if focused.is_some_and(|f| removable.contains(&f)) {
                nav.refocus();
            }
            tracing::debug!(target: targets::NAV, count = removable.len(), "rows removed");
        });
        self.auto_save(SaveTrigger::Input);
        Ok(removable)
    }

    /// Remove one row.
    pub fn remove_row(&mut self, row: RowId) -> Result<bool> {
        Ok(!self.remove_rows(&[row])?.is_empty())
    }

    /// Remove the selected rows, falling back to the focused row.
    pub fn remove_selected_rows(&mut self) -> Result<Vec<RowId>> {
        let mut selected: Vec<(usize, RowId)> = self
            .focus
            .selected
            .keys()
            .filter_map(|&row| self.row_index(row).map(|ri| (ri, row)))
            .collect();
        selected.sort_unstable();
        let mut rows: Vec<RowId> = selected.into_iter().map(|(_, row)| row).collect();
        if rows.is_empty() {
            rows.extend(self.focus.row);
        }
        self.remove_rows(&rows)
    }

    /// Drop a row from storage, unlinking it from the tree and the
    /// selection.
    pub(crate) fn drop_row(&mut self, row: RowId) {
        if self.hierarchy.active {
            match self.store[row].tree.parent_row {
                Some(parent) => {
                    if let Some(p) = self.store.get_mut(parent) {
                        p.tree.child_rows.retain(|&c| c != row);
                    }
                }
                None => self.hierarchy.roots.retain(|&r| r != row),
            }
        }
        self.store.remove(row);
        self.changed.remove(&row);
        self.rows.retain(|&r| r != row);
        self.focus.selected.remove(&row);
        if self.focus.row == Some(row) {
            self.focus.row = None;
        }
        self.index.invalidate();
    }

    // lookups --------------------------------------------------------------

    /// Live rows whose `cols` equal `vals`, in load order. Removed rows are
    /// excluded. A shorter `vals` matches a key prefix.
    ///
    /// # Panics
    ///
    /// Panics if a column does not exist.
    pub fn lookup(&self, cols: &[&str], vals: &[Value]) -> Vec<RowId> {
        let fis: Vec<usize> = cols.iter().map(|c| self.schema.index(*c)).collect();
        let index = self.index_for(&fis, &[]);
        index
            .lookup(vals)
            .iter()
            .copied()
            .filter(|&r| !self.store[r].tags.removed)
            .collect()
    }

    /// The index tree over `cols`, bucketed by `ranges`.
    pub fn index_tree(&self, cols: &[&str], ranges: &[Option<RangeDef>]) -> Arc<IndexNode> {
        let fis: Vec<usize> = cols.iter().map(|c| self.schema.index(*c)).collect();
        self.index_for(&fis, ranges)
    }

    /// Leaf groups of the index over `cols`, in data order.
    pub fn row_groups(&self, cols: &[&str], ranges: &[Option<RangeDef>]) -> Vec<RowGroup> {
        let mut groups = self.index_tree(cols, ranges).leaf_groups();
        for group in &mut groups {
            group.rows.retain(|&r| !self.store[r].tags.removed);
        }
        groups.retain(|g| !g.rows.is_empty());
        groups
    }

    // ordering -------------------------------------------------------------

    /// Replace the order-by (`"col1 col2:desc"`) and re-sort.
    pub fn set_order_by(&mut self, order_by: &str) {
        self.apply_order_by(OrderBy::parse(order_by));
    }

    /// Change the direction of one sort column.
    ///
    /// `keep_others` keeps the other keys (multi-column sorting); otherwise
    /// the column becomes the only key.
    pub fn set_order_by_dir(&mut self, col: impl ColumnRef, dir: DirChange, keep_others: bool) -> Result<()> {
        let fi = self.schema.index(col);
        let field = self.schema.field(fi);
        if !self.config.can_sort_rows || !field.sortable {
            return Err(NavError::not_permitted("sort"));
        }
        let name = field.name.clone();
        let mut order_by = self.order_by.clone();
        let dir = dir.resolve(order_by.dir(&name));
        order_by.set(&name, dir, keep_others);
        self.apply_order_by(order_by);
        Ok(())
    }

    fn apply_order_by(&mut self, order_by: OrderBy) {
        self.batch(|nav| {
            nav.order_by = order_by;
            nav.compile_sort();
            nav.resort();
            let formatted = nav.order_by.to_string();
            tracing::debug!(target: targets::SORT, order_by = %formatted, "order changed");
            nav.signals.sort_order_changed.emit(formatted);
            nav.touch(UpdateFlags::SORT);
        });
    }

    /// Re-sort the visible rows, keeping focus on the same row.
    pub fn resort(&mut self) {
        self.batch(|nav| {
            nav.reproject();
            if let Some(row) = nav.focus.row {
                nav.signals.focused_row_changed.emit(FocusChange {
                    row: Some(row),
                    row_index: nav.row_index(row),
                    fi: nav.focus.fi,
                });
            }
        });
    }

    // tree -----------------------------------------------------------------

    /// Move a row under another parent (or to the roots) and update its
    /// parent column.
    pub fn change_row_parent(&mut self, row: RowId, parent: Option<RowId>) -> Result<()> {
        let (Some(id_fi), Some(parent_fi)) = (self.id_field(), self.parent_field()) else {
            return Err(NavError::invalid_parent("dataset is not hierarchical"));
        };
        self.can_change_val(row, parent_fi)?;
        let parent_val = parent.map_or(Value::Null, |p| self.store[p].val(id_fi).clone());
        tree::reparent(&mut self.store, &mut self.hierarchy, row, parent)?;
        self.batch(|nav| {
            nav.begin_set_state(row);
            if nav.apply_cell_val(row, parent_fi, parent_val) {
                nav.index.invalidate();
            }
            nav.update_row_flags(row);
            nav.end_set_state();
            nav.reproject();
        });
        Ok(())
    }

    /// Collapse or expand a row's children.
    pub fn set_collapsed(&mut self, row: RowId, collapsed: bool, recursive: bool) {
        if !self.hierarchy.active {
            return;
        }
        self.batch(|nav| {
            nav.begin_set_state(row);
            tree::set_collapsed(&mut nav.store, row, collapsed, recursive);
            nav.end_set_state();
            nav.resort();
        });
    }

    pub fn toggle_collapsed(&mut self, row: RowId, recursive: bool) {
        let collapsed = self.store[row].tags.collapsed;
        self.set_collapsed(row, !collapsed, recursive);
    }

    /// Collapse or expand every row with children.
    pub fn set_collapsed_all(&mut self, collapsed: bool) {
        if !self.hierarchy.active {
            return;
        }
        self.batch(|nav| {
            let roots = nav.hierarchy.roots.clone();
            for root in roots {
                tree::set_collapsed(&mut nav.store, root, collapsed, true);
            }
            nav.touch(UpdateFlags::STATE);
            nav.resort();
        });
    }

    /// Number of visible descendants of the row at visible position `ri`.
    pub fn expanded_child_row_count(&self, ri: usize) -> usize {
        let Some(row) = self.row_id(ri) else {
            return 0;
        };
        tree::descendants(&self.store, row)
            .into_iter()
            .filter(|&r| self.row_visible(r))
            .count()
    }

    /// Visit a row's descendants depth first.
    pub fn each_child_row(&self, row: RowId, mut f: impl FnMut(RowId)) {
        for child in tree::descendants(&self.store, row) {
            f(child);
        }
    }

    // moving ---------------------------------------------------------------

    /// Returns `true` if rows may be reordered by hand.
    ///
    /// An explicit order-by owns the row order, so moves wait until it is
    /// cleared.
    pub fn can_move_rows(&self) -> bool {
        self.perms.can_move_rows && self.order_by.is_empty()
    }

    /// Pick up the rows between the anchor and the focused row, with their
    /// expanded descendants.
    ///
    /// Returns `None` when moving is not allowed or when the selection
    /// climbs above the level of its first row.
    pub fn start_move_selected_rows(&self) -> Option<RowMove> {
        if !self.can_move_rows() {
            return None;
        }
        let focused_ri = self.focused_row_index()?;
        let selected_ri = self
            .focus
            .anchor
            .and_then(|(row, _)| self.row_index(row))
            .unwrap_or(focused_ri);
        let first = focused_ri.min(selected_ri);
        let last = focused_ri.max(selected_ri);
        let end = last + 1 + self.expanded_child_row_count(last);
        let rows: Vec<RowId> = self.rows[first..end].to_vec();

        let top = rows[0];
        let parent = if self.hierarchy.active { self.store[top].tree.parent_row } else { None };
        if self.hierarchy.active {
            let depth = self.store[top].tree.parent_rows.len();
            if rows.iter().any(|&r| self.store[r].tree.parent_rows.len() < depth) {
                return None;
            }
        }

        let n = rows.len();
        let range = match parent {
            Some(p) if !self.config.can_change_parent => {
                let start = self.row_index(p)? + 1;
                let count = self.expanded_child_row_count(start - 1);
                start..=start + count - n
            }
            _ => 0..=self.rows.len() - n,
        };
        Some(RowMove { rows, from: first, parent, range })
    }

    /// Drop a picked-up block at visible position `at`, under `parent` in a
    /// hierarchical dataset.
    ///
    /// The position column, when there is one, is renumbered for the rows
    /// whose order changed, so the new order is saved with them.
    pub fn finish_move_rows(&mut self, mv: RowMove, at: usize, parent: Option<RowId>) -> Result<()> {
        if !self.can_move_rows() {
            return Err(NavError::not_permitted("move rows"));
        }
        if !mv.range.contains(&at) {
            return Err(NavError::invalid_move(format!(
                "position {at} outside {}..={}",
                mv.range.start(),
                mv.range.end()
            )));
        }
        let in_place = mv
            .rows
            .iter()
            .enumerate()
            .all(|(i, &row)| self.row_index(row) == Some(mv.from + i));
        if !in_place {
            return Err(NavError::invalid_move("rows changed since the move started"));
        }

        let reparent = self.hierarchy.active && parent != mv.parent;
        if parent.is_some() && !self.hierarchy.active {
            return Err(NavError::invalid_move("dataset is not hierarchical"));
        }
        if reparent && !self.config.can_change_parent {
            return Err(NavError::not_permitted("change the parent of moved rows"));
        }
        let depth = self.store[mv.rows[0]].tree.parent_rows.len();
        let top_rows: Vec<RowId> = mv
            .rows
            .iter()
            .copied()
            .filter(|&r| self.store[r].tree.parent_rows.len() == depth)
            .collect();
        let mut parent_cols = None;
        if reparent {
            let (Some(id_fi), Some(parent_fi)) = (self.id_field(), self.parent_field()) else {
                return Err(NavError::invalid_parent("dataset is not hierarchical"));
            };
            if let Some(p) = parent {
                if !self.store.contains(p) || self.store[p].tags.removed {
                    return Err(NavError::invalid_parent("parent row is gone"));
                }
                if top_rows.iter().any(|&r| tree::is_ancestor_or_self(&self.store, r, p)) {
                    return Err(NavError::invalid_parent("a row cannot become its own descendant"));
                }
            }
            for &row in &top_rows {
                self.can_change_val(row, parent_fi)?;
            }
            parent_cols = Some((id_fi, parent_fi));
        }

        let mut order: Vec<RowId> = self
            .rows
            .iter()
            .copied()
            .filter(|r| !mv.rows.contains(r))
            .collect();
        order.splice(at..at, mv.rows.iter().copied());

        self.batch(|nav| -> Result<()> {
            nav.store.reorder(&order);
            if let Some((id_fi, parent_fi)) = parent_cols {
                let parent_val = parent.map_or(Value::Null, |p| nav.store[p].val(id_fi).clone());
                for &row in &top_rows {
                    tree::reparent(&mut nav.store, &mut nav.hierarchy, row, parent)?;
                    nav.begin_set_state(row);
                    nav.apply_cell_val(row, parent_fi, parent_val.clone());
                    nav.update_row_flags(row);
                    nav.end_set_state();
                }
                nav.index.invalidate();
            }
            if nav.hierarchy.active {
                nav.sort_siblings(mv.parent);
                nav.sort_siblings(parent);
            }
            nav.renumber_positions(mv.parent, parent);
            nav.rows_moved = true;
            nav.reproject();
            nav.refocus();
            tracing::debug!(target: targets::NAV, count = mv.rows.len(), at, ?parent, "rows moved");
            nav.signals.rows_moved.emit(mv.rows.clone());
            Ok(())
        })?;

        if self.config.save_row_move_on == SaveTrigger::Input
            && self.is_server_backed()
            && self.save_request.is_none()
            && self.has_changes()
        {
            if let Err(err) = self.save() {
                tracing::debug!(target: targets::PERSIST, %err, "save after move skipped");
            }
        }
        Ok(())
    }

    /// Move the selected rows to visible position `at` in one step.
    ///
    /// Returns `false` when there is nothing that may be moved.
    pub fn move_selected_rows(&mut self, at: usize, parent: Option<RowId>) -> Result<bool> {
        let Some(mv) = self.start_move_selected_rows() else {
            return Ok(false);
        };
        self.finish_move_rows(mv, at, parent)?;
        Ok(true)
    }

    /// Order a parent's children (or the roots) by load order.
    fn sort_siblings(&mut self, parent: Option<RowId>) {
        let position: HashMap<RowId, usize> =
            self.store.all_rows().iter().enumerate().map(|(i, &id)| (id, i)).collect();
        let siblings = match parent {
            Some(p) => &mut self.store[p].tree.child_rows,
            None => &mut self.hierarchy.roots,
        };
        siblings.sort_by_key(|id| position.get(id).copied());
    }

    /// Write 1, 2, 3... into the position column in load order.
    ///
    /// Flat datasets renumber every live row; hierarchical ones renumber
    /// the children of the parents the move touched.
    fn renumber_positions(&mut self, old_parent: Option<RowId>, new_parent: Option<RowId>) {
        let Some(pos_fi) = self.pos_col.as_deref().and_then(|c| self.schema.try_index(c)) else {
            return;
        };
        let live = |nav: &Self, parent: Option<RowId>| -> Vec<RowId> {
            nav.store
                .iter()
                .filter(|(_, row)| !row.tags.removed)
                .filter(|(_, row)| !nav.hierarchy.active || row.tree.parent_row == parent)
                .map(|(id, _)| id)
                .collect()
        };
        let mut groups = vec![live(self, old_parent)];
        if self.hierarchy.active && new_parent != old_parent {
            groups.push(live(self, new_parent));
        }

        let mut renumbered = 0;
        for group in groups {
            for (i, row) in group.into_iter().enumerate() {
                let pos = self.schema.field(pos_fi).convert(Value::Int(i as i64 + 1));
                self.begin_set_state(row);
                if self.apply_cell_val(row, pos_fi, pos) {
                    renumbered += 1;
                }
                self.update_row_flags(row);
                self.end_set_state();
            }
        }
        if renumbered > 0 {
            self.index.invalidate();
        }
        tracing::trace!(target: targets::NAV, renumbered, "positions renumbered");
    }
}
