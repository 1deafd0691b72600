//! Focus, selection, editing gates, quicksearch and display values.
//!
//! Positions are `(ri, vi)`: an index into the visible rows and an index
//! into the visible fields. [`Nav::first_focusable_cell`] resolves a target
//! cell from a start position and a row/column delta, skipping cells that
//! cannot take focus; arrow keys, Tab, paging, Home/End and
//! advance-after-Enter are all expressed through it.

use std::collections::{BTreeSet, HashMap};

use horizon_rowset_core::targets;

use super::Nav;
use crate::config::SaveTrigger;
use crate::events::{FocusChange, NotifyKind, UpdateFlags};
use crate::field::{FieldType, LookupLink};
use crate::row::RowId;
use crate::schema::ColumnRef;
use crate::value::Value;

/// Selection state of one row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowSelection {
    /// The whole row (row mode).
    Whole,
    /// Selected cells, by storage index (cell mode).
    Cells(BTreeSet<usize>),
}

/// Options of [`Nav::focus_cell`] and [`Nav::first_focusable_cell`].
#[derive(Debug, Clone, Default)]
pub struct FocusOpts {
    /// Fail instead of resolving to the start cell.
    pub must_move: bool,
    pub must_not_move_row: bool,
    pub must_not_move_col: bool,
    /// Only cells that can be edited qualify.
    pub editable: bool,
    /// Extend the selection from the anchor (shift).
    pub expand_selection: bool,
    /// Toggle the target in the selection (ctrl).
    pub invert_selection: bool,
    /// Enter edit mode after focusing.
    pub enter_edit: bool,
}

#[derive(Debug, Default)]
pub(crate) struct FocusState {
    pub(crate) row: Option<RowId>,
    /// Storage index of the focused field.
    pub(crate) fi: Option<usize>,
    /// Visible index of the last focused row, for refocusing.
    last_ri: Option<usize>,
    pub(crate) anchor: Option<(RowId, Option<usize>)>,
    last_fi: Option<usize>,
    pub(crate) selected: HashMap<RowId, RowSelection>,
    pub(crate) editing: bool,
    quicksearch_text: String,
    quicksearch_fi: Option<usize>,
}

impl FocusState {
    /// Shift stored field indices after the field at `fi` was removed.
    pub(crate) fn field_removed(&mut self, fi: usize) {
        let shift = |f: usize| if f > fi { Some(f - 1) } else if f == fi { None } else { Some(f) };
        self.fi = self.fi.and_then(shift);
        self.last_fi = self.last_fi.and_then(shift);
        self.quicksearch_fi = self.quicksearch_fi.and_then(shift);
        if let Some((_, afi)) = &mut self.anchor {
            *afi = afi.and_then(shift);
        }
        self.selected.retain(|_, selection| match selection {
            RowSelection::Whole => true,
            RowSelection::Cells(cells) => {
                *cells = cells.iter().filter_map(|&f| shift(f)).collect();
                !cells.is_empty()
            }
        });
        if self.fi.is_none() {
            self.editing = false;
        }
    }
}

/// Scan `0..n` from `start + delta` for a position accepted by `ok`:
/// first in the direction of `delta`, then back towards `start`.
fn scan(start: usize, delta: isize, n: usize, ok: impl Fn(usize) -> bool) -> Option<usize> {
    let target = start.saturating_add_signed(delta).min(n - 1);
    let forward = delta >= 0;
    let ahead: Box<dyn Iterator<Item = usize>> = if forward {
        Box::new(target..n)
    } else {
        Box::new((0..=target).rev())
    };
    let behind: Box<dyn Iterator<Item = usize>> = if forward {
        Box::new((0..target).rev())
    } else {
        Box::new(target + 1..n)
    };
    ahead.chain(behind).find(|&i| ok(i))
}

impl Nav {
    // state ----------------------------------------------------------------

    pub fn focused_row(&self) -> Option<RowId> {
        self.focus.row
    }

    pub fn focused_row_index(&self) -> Option<usize> {
        self.focus.row.and_then(|r| self.row_index(r))
    }

    /// Storage index of the focused field.
    pub fn focused_field(&self) -> Option<usize> {
        self.focus.fi
    }

    /// Visible index of the focused field.
    pub fn focused_col(&self) -> Option<usize> {
        self.focus.fi.and_then(|fi| self.schema.visible_index(fi))
    }

    /// Last field that had focus, kept while in row mode.
    pub fn last_focused_field(&self) -> Option<usize> {
        self.focus.last_fi
    }

    pub fn selected_rows(&self) -> &HashMap<RowId, RowSelection> {
        &self.focus.selected
    }

    pub fn is_row_selected(&self, row: RowId) -> bool {
        self.focus.selected.contains_key(&row)
    }

    pub fn is_cell_selected(&self, row: RowId, col: impl ColumnRef) -> bool {
        let fi = self.schema.index(col);
        match self.focus.selected.get(&row) {
            Some(RowSelection::Whole) => true,
            Some(RowSelection::Cells(cells)) => cells.contains(&fi),
            None => false,
        }
    }

    pub fn is_editing(&self) -> bool {
        self.focus.editing
    }

    pub fn is_last_row_focused(&self) -> bool {
        self.focused_row_index().is_some_and(|ri| ri + 1 == self.rows.len())
    }

    fn cell_mode(&self) -> bool {
        self.config.can_focus_cells && !self.schema.visible_fields().is_empty()
    }

    fn row_focusable(&self, ri: usize, editable: bool) -> bool {
        let tags = &self.store[self.rows[ri]].tags;
        tags.focusable && (!editable || (tags.can_change && !tags.removed))
    }

    fn col_focusable(&self, vi: usize, editable: bool) -> bool {
        let field = self.schema.field(self.schema.visible_fields()[vi]);
        field.focusable && (!editable || field.editable)
    }

    /// Returns `true` if the row (and the field, in cell mode) can take
    /// focus, and with `for_editing` also be changed.
    pub fn can_focus_cell(&self, row: RowId, fi: Option<usize>, for_editing: bool) -> bool {
        let tags = &self.store[row].tags;
        if !tags.focusable {
            return false;
        }
        if let Some(fi) = fi {
            if self.config.can_focus_cells && !self.schema.field(fi).focusable {
                return false;
            }
        }
        if !for_editing {
            return true;
        }
        match fi {
            Some(fi) => self.can_change_val(row, fi).is_ok(),
            None => tags.can_change && !tags.removed,
        }
    }

    /// Cells that cannot take focus render disabled.
    pub fn is_cell_disabled(&self, row: RowId, fi: Option<usize>) -> bool {
        !self.can_focus_cell(row, fi, false)
    }

    /// Returns `true` if the cell may join the current selection.
    ///
    /// Without `can_select_non_siblings`, rows of a hierarchical dataset
    /// may only be selected together with their siblings.
    pub fn can_select_cell(&self, row: RowId, fi: Option<usize>, for_editing: bool) -> bool {
        if !self.can_focus_cell(row, fi, for_editing) {
            return false;
        }
        if self.config.can_select_non_siblings || !self.hierarchy.active {
            return true;
        }
        let parent = self.store[row].tree.parent_row;
        self.focus
            .selected
            .keys()
            .all(|&s| self.store.get(s).is_none_or(|r| r.tree.parent_row == parent))
    }

    // navigation -----------------------------------------------------------

    /// Resolve the cell reached by moving `rows`/`cols` from `(ri, vi)`
    /// (defaulting to the focused cell). Returns the visible row index and,
    /// in cell mode, the visible field index.
    pub fn first_focusable_cell(
        &self,
        ri: Option<usize>,
        vi: Option<usize>,
        rows: isize,
        cols: isize,
        opts: &FocusOpts,
    ) -> Option<(usize, Option<usize>)> {
        let nrows = self.rows.len();
        if nrows == 0 {
            return None;
        }
        let ri0 = ri.or(self.focused_row_index()).unwrap_or(0).min(nrows - 1);
        let target_ri = if opts.must_not_move_row {
            self.row_focusable(ri0, opts.editable).then_some(ri0)?
        } else {
            scan(ri0, rows, nrows, |i| self.row_focusable(i, opts.editable))?
        };

        let target_vi = if self.cell_mode() {
            let ncols = self.schema.visible_fields().len();
            let start = vi
                .or(self.focused_col())
                .or_else(|| self.focus.last_fi.and_then(|fi| self.schema.visible_index(fi)))
                .unwrap_or(0)
                .min(ncols - 1);
            let target = if opts.must_not_move_col {
                self.col_focusable(start, opts.editable).then_some(start)?
            } else {
                scan(start, cols, ncols, |i| self.col_focusable(i, opts.editable))?
            };
            Some(target)
        } else {
            None
        };

        if opts.must_move {
            let unmoved = Some(target_ri) == self.focused_row_index()
                && (target_vi.is_none() || target_vi == self.focused_col());
            if unmoved {
                return None;
            }
        }
        Some((target_ri, target_vi))
    }

    /// Move focus, updating the selection.
    ///
    /// Leaving the focused row runs [`Nav::exit_focused_row`] and leaving
    /// the focused field while editing runs [`Nav::exit_edit`]; if either
    /// refuses, focus does not move. Returns `true` if focus moved (or was
    /// already on the target).
    pub fn focus_cell(
        &mut self,
        ri: Option<usize>,
        vi: Option<usize>,
        rows: isize,
        cols: isize,
        opts: &FocusOpts,
    ) -> bool {
        let Some((ri, vi)) = self.first_focusable_cell(ri, vi, rows, cols, opts) else {
            return false;
        };
        let row = self.rows[ri];
        let fi = vi.map(|v| self.schema.visible_fields()[v]);
        self.batch(|nav| {
            let current = nav.focus.row.filter(|&r| nav.store.contains(r));
            let row_changed = current != Some(row);
            let field_changed = nav.focus.fi != fi;
            if row_changed && current.is_some() {
                if !nav.exit_focused_row() {
                    return false;
                }
            } else if field_changed && !nav.exit_edit() {
                return false;
            }

            nav.focus.row = Some(row);
            nav.focus.fi = fi;
            nav.focus.last_ri = Some(ri);
            if fi.is_some() {
                nav.focus.last_fi = fi;
            }
            nav.update_selection(row, ri, fi, opts);

            if row_changed || field_changed {
                nav.signals.focused_row_changed.emit(FocusChange {
                    row: Some(row),
                    row_index: Some(ri),
                    fi,
                });
                nav.touch(UpdateFlags::FOCUS);
                tracing::trace!(target: targets::FOCUS, ri, ?fi, "focus moved");
            }
            nav.emit_selection();
            if opts.enter_edit {
                nav.enter_edit();
            }
            true
        })
    }

    fn update_selection(&mut self, row: RowId, ri: usize, fi: Option<usize>, opts: &FocusOpts) {
        let multiple = self.config.can_select_multiple;
        let anchor = self
            .focus
            .anchor
            .filter(|(a, _)| self.store.contains(*a))
            .and_then(|(a, afi)| self.row_index(a).map(|ari| (ari, afi)));

        match anchor {
            Some((ari, afi)) if opts.expand_selection && multiple => {
                let cells: Option<BTreeSet<usize>> = fi.map(|fi| {
                    let visible = self.schema.visible_fields();
                    let vi = self.schema.visible_index(fi).unwrap_or(0);
                    let avi = afi.and_then(|f| self.schema.visible_index(f)).unwrap_or(vi);
                    visible[vi.min(avi)..=vi.max(avi)].iter().copied().collect()
                });
                let parent = self.store[self.rows[ari]].tree.parent_row;
                let siblings_only = !self.config.can_select_non_siblings && self.hierarchy.active;
                let mut selected = HashMap::new();
                for r in ari.min(ri)..=ari.max(ri) {
                    let id = self.rows[r];
                    if !self.can_focus_cell(id, None, opts.editable)
                        || (siblings_only && self.store[id].tree.parent_row != parent)
                    {
                        continue;
                    }
                    let selection = match &cells {
                        Some(cells) => {
                            let cells: BTreeSet<usize> = cells
                                .iter()
                                .copied()
                                .filter(|&f| self.can_focus_cell(id, Some(f), opts.editable))
                                .collect();
                            if cells.is_empty() {
                                continue;
                            }
                            RowSelection::Cells(cells)
                        }
                        None => RowSelection::Whole,
                    };
                    selected.insert(id, selection);
                }
                self.focus.selected = selected;
            }
            _ if opts.invert_selection && multiple => {
                if !self.config.can_select_non_siblings && self.hierarchy.active {
                    let parent = self.store[row].tree.parent_row;
                    let foreign = self
                        .focus
                        .selected
                        .keys()
                        .any(|&s| self.store.get(s).is_some_and(|r| r.tree.parent_row != parent));
                    if foreign {
                        self.focus.selected.clear();
                    }
                }
                match fi {
                    Some(fi) => {
                        let entry = self
                            .focus
                            .selected
                            .entry(row)
                            .or_insert_with(|| RowSelection::Cells(BTreeSet::new()));
                        if let RowSelection::Cells(cells) = entry {
                            if !cells.remove(&fi) {
                                cells.insert(fi);
                            }
                            if cells.is_empty() {
                                self.focus.selected.remove(&row);
                            }
                        }
                    }
                    None => {
                        if self.focus.selected.remove(&row).is_none() {
                            self.focus.selected.insert(row, RowSelection::Whole);
                        }
                    }
                }
                self.focus.anchor = Some((row, fi));
            }
            _ => {
                self.focus.selected.clear();
                let selection = match fi {
                    Some(fi) => RowSelection::Cells(BTreeSet::from([fi])),
                    None => RowSelection::Whole,
                };
                self.focus.selected.insert(row, selection);
                self.focus.anchor = Some((row, fi));
            }
        }
    }

    /// Move focus by `cols` fields, wrapping to the next or previous row
    /// when `auto_advance_row` is set.
    pub fn focus_next_cell(&mut self, cols: isize, opts: &FocusOpts) -> bool {
        let step = FocusOpts {
            must_move: true,
            must_not_move_row: true,
            ..opts.clone()
        };
        if self.focus_cell(None, None, 0, cols, &step) {
            return true;
        }
        if !self.config.auto_advance_row || !self.cell_mode() {
            return false;
        }
        let Some(ri) = self.focused_row_index() else {
            return false;
        };
        let next = if cols < 0 { ri.checked_sub(1) } else { Some(ri + 1) };
        let Some(next) = next.filter(|&n| n < self.rows.len()) else {
            return false;
        };
        let edge = if cols < 0 { self.schema.visible_fields().len() - 1 } else { 0 };
        let wrap = FocusOpts {
            must_move: false,
            must_not_move_row: true,
            ..opts.clone()
        };
        self.focus_cell(Some(next), Some(edge), 0, 0, &wrap)
    }

    /// Re-establish focus after the projection changed.
    pub(crate) fn refocus(&mut self) {
        if let Some(row) = self.focus.row.filter(|&r| self.row_visible(r)) {
            let ri = self.row_index(row);
            self.focus.last_ri = ri;
            self.signals.focused_row_changed.emit(FocusChange {
                row: Some(row),
                row_index: ri,
                fi: self.focus.fi,
            });
            return;
        }
        let had_focus = self.focus.row.take().is_some();
        self.focus.editing = false;
        self.focus.selected.retain(|&r, _| self.store.get(r).is_some_and(|row| row.row_index.is_some()));
        if !self.rows.is_empty() && (had_focus || self.config.auto_focus_first_cell) {
            let ri = self.focus.last_ri.unwrap_or(0).min(self.rows.len() - 1);
            let fi = self.focus.fi.and_then(|fi| self.schema.visible_index(fi));
            if self.focus_cell(Some(ri), fi, 0, 0, &FocusOpts::default()) {
                return;
            }
        }
        self.focus.fi = None;
        self.signals.focused_row_changed.emit(FocusChange {
            row: None,
            row_index: None,
            fi: None,
        });
        self.emit_selection();
        self.touch(UpdateFlags::FOCUS);
    }

    /// Select every visible row (every visible cell in cell mode).
    pub fn select_all_cells(&mut self) {
        if !self.config.can_select_multiple {
            return;
        }
        let cell_mode = self.cell_mode();
        let parent = self
            .focus
            .row
            .or_else(|| self.rows.first().copied())
            .map(|r| self.store[r].tree.parent_row);
        let siblings_only = !self.config.can_select_non_siblings && self.hierarchy.active;
        let mut selected = HashMap::new();
        for &row in &self.rows {
            if !self.can_focus_cell(row, None, false)
                || (siblings_only && Some(self.store[row].tree.parent_row) != parent)
            {
                continue;
            }
            let selection = if cell_mode {
                let cells: BTreeSet<usize> = self
                    .schema
                    .visible_fields()
                    .iter()
                    .copied()
                    .filter(|&fi| self.can_focus_cell(row, Some(fi), false))
                    .collect();
                if cells.is_empty() {
                    continue;
                }
                RowSelection::Cells(cells)
            } else {
                RowSelection::Whole
            };
            selected.insert(row, selection);
        }
        self.batch(|nav| {
            nav.focus.selected = selected;
            nav.emit_selection();
        });
    }

    /// Clear the selection, keeping focus.
    pub fn select_none(&mut self) {
        if self.focus.selected.is_empty() {
            return;
        }
        self.batch(|nav| {
            nav.focus.selected.clear();
            nav.focus.anchor = None;
            nav.emit_selection();
        });
    }

    /// Set every selected, editable cell to null. Returns the number of
    /// cells changed.
    pub fn set_null_selected_cells(&mut self) -> usize {
        let visible = self.schema.visible_fields().to_vec();
        let targets: Vec<(RowId, Vec<usize>)> = self
            .focus
            .selected
            .iter()
            .map(|(&row, selection)| {
                let fis = match selection {
                    RowSelection::Whole => visible.clone(),
                    RowSelection::Cells(cells) => cells.iter().copied().collect(),
                };
                (row, fis)
            })
            .collect();
        self.batch(|nav| {
            let mut count = 0;
            for (row, fis) in targets {
                for fi in fis {
                    if nav.store[row].val(fi).is_null() || nav.can_change_val(row, fi).is_err() {
                        continue;
                    }
                    if nav.set_cell_val(row, fi, Value::Null).is_ok() && nav.store[row].val(fi).is_null() {
                        count += 1;
                    }
                }
            }
            count
        })
    }

    // editing --------------------------------------------------------------

    /// Enter edit mode on the focused cell.
    ///
    /// Boolean cells have no editor: their value is toggled instead.
    pub fn enter_edit(&mut self) -> bool {
        let (Some(row), Some(fi)) = (self.focus.row, self.focus.fi) else {
            return false;
        };
        if self.can_change_val(row, fi).is_err() {
            return false;
        }
        if self.schema.field(fi).field_type == FieldType::Bool {
            let toggled = !self.store[row].val(fi).as_bool().unwrap_or(false);
            return self.set_cell_val(row, fi, toggled).is_ok();
        }
        if !self.focus.editing {
            self.focus.editing = true;
            self.touch(UpdateFlags::FOCUS);
        }
        true
    }

    /// Returns `true` if the editor of the focused cell may be closed.
    pub fn can_exit_edit(&self) -> bool {
        let (Some(row), Some(fi)) = (self.focus.row, self.focus.fi) else {
            return true;
        };
        match self.store.get(row).and_then(|r| r.errors(fi)) {
            Some(errors) if !errors.passed => {
                self.config.can_exit_edit_on_errors || errors.allows_exit_edit()
            }
            _ => true,
        }
    }

    /// Leave edit mode. Returns `false` if validation forbids it.
    pub fn exit_edit(&mut self) -> bool {
        if !self.focus.editing {
            return true;
        }
        if !self.can_exit_edit() {
            tracing::debug!(target: targets::FOCUS, "exit edit refused");
            return false;
        }
        self.focus.editing = false;
        self.touch(UpdateFlags::FOCUS);
        self.auto_save(SaveTrigger::ExitEdit);
        true
    }

    /// Returns `true` if focus may leave `row`.
    pub fn can_exit_row(&self, row: RowId) -> bool {
        let Some(r) = self.store.get(row) else {
            return true;
        };
        if !r.tags.has_errors {
            return true;
        }
        let forbids = r.tags.error.as_ref().is_some_and(|e| e.must_not_allow_exit_row)
            || (0..r.field_count()).any(|fi| r.errors(fi).is_some_and(|e| e.forbids_exit_row()));
        !forbids && self.config.can_exit_row_on_errors
    }

    /// Validate and leave the focused row. Returns `false` if the row's
    /// errors forbid leaving it.
    pub fn exit_focused_row(&mut self) -> bool {
        let Some(row) = self.focus.row.filter(|&r| self.store.contains(r)) else {
            return true;
        };
        if !self.exit_edit() {
            return false;
        }
        self.validate_row(row);
        if !self.can_exit_row(row) {
            if let Some(message) = self.store[row].tags.error.as_ref().map(|e| e.message.clone()) {
                self.signals.notify.emit((NotifyKind::Error, message));
            }
            tracing::debug!(target: targets::FOCUS, ?row, "exit row refused");
            return false;
        }
        self.auto_save(SaveTrigger::ExitRow);
        true
    }

    // quicksearch ----------------------------------------------------------

    /// Focus the next row whose display text in the search column starts
    /// with `text` (case-insensitive), scanning cyclically from the focused
    /// row. Returns the visible index found.
    pub fn quicksearch(&mut self, text: &str, col: Option<&str>) -> Option<usize> {
        let fi = col
            .map(|c| self.schema.index(c))
            .or_else(|| self.config.quicksearch_col.as_deref().and_then(|c| self.schema.try_index(c)))
            .or(self.focus.fi)
            .or_else(|| self.schema.visible_fields().first().copied())?;
        self.focus.quicksearch_text = text.to_string();
        self.focus.quicksearch_fi = Some(fi);
        if text.is_empty() || self.rows.is_empty() {
            return None;
        }
        let needle = text.to_lowercase();
        let n = self.rows.len();
        let start = self.focused_row_index().unwrap_or(0);
        let found = (0..n)
            .map(|k| (start + k) % n)
            .find(|&ri| self.cell_display_val(self.rows[ri], fi).to_lowercase().starts_with(&needle))?;
        let vi = self.schema.visible_index(fi);
        self.focus_cell(Some(found), vi, 0, 0, &FocusOpts::default());
        Some(found)
    }

    /// Current quicksearch text and field.
    pub fn quicksearch_state(&self) -> (&str, Option<usize>) {
        (&self.focus.quicksearch_text, self.focus.quicksearch_fi)
    }

    // display values -------------------------------------------------------

    /// Display text of `value` as a value of `col`: null and empty texts,
    /// the lookup dataset's display column, then the field's formatter.
    pub fn cell_display_val_for(&self, col: impl ColumnRef, value: &Value) -> String {
        let field = self.schema.field(self.schema.index(col));
        if value.is_null() {
            return field.null_text.clone();
        }
        if value.as_str().is_some_and(str::is_empty) {
            return field.empty_text.clone();
        }
        if let Some(text) = field.lookup.as_ref().and_then(|link| self.lookup_display(link, value)) {
            return text;
        }
        field.format(value)
    }

    /// Display text of a cell's committed value.
    pub fn cell_display_val(&self, row: RowId, col: impl ColumnRef) -> String {
        let fi = self.schema.index(col);
        self.cell_display_val_for(fi, self.store[row].val(fi))
    }

    /// Plain text of a cell's input value, as an editor shows it.
    pub fn cell_text_val(&self, row: RowId, col: impl ColumnRef) -> String {
        let fi = self.schema.index(col);
        let value = self.store[row].input_val(fi);
        if value.is_null() {
            return String::new();
        }
        self.cell_display_val_for(fi, value)
    }

    // name column and picker ---------------------------------------------

    /// The field that names a row, as lookups and pickers show it.
    pub fn name_field(&self) -> Option<usize> {
        self.name_col.as_deref().and_then(|c| self.schema.try_index(c))
    }

    /// The field a tree view indents; the name field unless set apart.
    pub fn tree_field(&self) -> Option<usize> {
        self.tree_col
            .as_deref()
            .and_then(|c| self.schema.try_index(c))
            .or_else(|| self.name_field())
    }

    /// Change the name column; `None` falls back to the loaded rowset's.
    pub fn set_name_col(&mut self, col: Option<&str>) {
        self.config.name_col = col.map(str::to_string);
        self.name_col = self.config.name_col.clone().or_else(|| self.doc.name_col.clone());
        self.batch(|nav| {
            nav.signals.display_vals_changed.emit(None);
            nav.touch(UpdateFlags::FIELDS);
        });
        tracing::debug!(target: targets::NAV, name_col = ?self.name_col, "name column changed");
        self.notify_lookup_consumers();
    }

    /// Change the tree column; `None` falls back to the name column.
    pub fn set_tree_col(&mut self, col: Option<&str>) {
        self.config.tree_col = col.map(str::to_string);
        self.tree_col = self.config.tree_col.clone().or_else(|| self.doc.tree_col.clone());
        self.batch(|nav| {
            nav.signals.display_vals_changed.emit(None);
            nav.touch(UpdateFlags::FIELDS);
        });
    }

    /// Display text naming a row: its name cell.
    pub fn row_display_val(&self, row: RowId) -> Option<String> {
        let fi = self.name_field()?;
        Some(self.cell_display_val(row, fi))
    }

    /// What a closed dropdown shows: the focused row's display text.
    pub fn dropdown_display_val(&self) -> Option<String> {
        self.row_display_val(self.focus.row?)
    }

    /// Step the focus `delta` rows and pick the row reached, as a closed
    /// dropdown does on arrow keys. Emits `val_picked`.
    pub fn pick_near_val(&mut self, delta: isize) -> bool {
        let opts = FocusOpts {
            must_move: true,
            ..FocusOpts::default()
        };
        if !self.focus_cell(None, None, delta, 0, &opts) {
            return false;
        }
        if let Some(row) = self.focus.row {
            self.signals.val_picked.emit(row);
        }
        true
    }

    fn lookup_display(&self, link: &LookupLink, value: &Value) -> Option<String> {
        let nav = self.registry.as_ref()?.get(&link.rowset)?;
        let nav = nav.try_read()?;
        let lookup_fi = nav.schema.try_index(link.lookup_col.as_str())?;
        let display_fi = match &link.display_col {
            Some(col) => nav.schema.try_index(col.as_str())?,
            None => nav.name_field()?,
        };
        let index = nav.index_for(&[lookup_fi], &[]);
        let row = index.lookup(std::slice::from_ref(value)).first().copied()?;
        Some(nav.cell_display_val(row, display_fi))
    }
}
