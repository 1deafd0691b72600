//! Cell accessors, cell edits and validation.

use horizon_rowset_core::targets;

use super::Nav;
use crate::config::SaveTrigger;
use crate::error::{NavError, Result};
use crate::events::UpdateFlags;
use crate::field::LookupLink;
use crate::row::{CellKey, RowError, RowId, RowTags, Slot};
use crate::schema::ColumnRef;
use crate::tree;
use crate::validate::{
    CellErrors, ValidationCtx, builtin_results, lookup_result, parent_result, unique_result,
};
use crate::value::Value;

impl Nav {
    // reads ----------------------------------------------------------------

    /// Committed value.
    pub fn cell_val(&self, row: RowId, col: impl ColumnRef) -> &Value {
        self.store[row].val(self.schema.index(col))
    }

    /// Last entered value, valid or not.
    pub fn cell_input_val(&self, row: RowId, col: impl ColumnRef) -> &Value {
        self.store[row].input_val(self.schema.index(col))
    }

    /// Value before the current edit session.
    pub fn cell_old_val(&self, row: RowId, col: impl ColumnRef) -> &Value {
        self.store[row].old_val(self.schema.index(col))
    }

    /// Value before the last change.
    pub fn cell_prev_val(&self, row: RowId, col: impl ColumnRef) -> &Value {
        self.store[row].prev_val(self.schema.index(col))
    }

    pub fn cell_errors(&self, row: RowId, col: impl ColumnRef) -> Option<&CellErrors> {
        self.store[row].errors(self.schema.index(col))
    }

    pub fn cell_has_errors(&self, row: RowId, col: impl ColumnRef) -> bool {
        self.store[row].cell_has_errors(self.schema.index(col))
    }

    pub fn cell_modified(&self, row: RowId, col: impl ColumnRef) -> bool {
        self.store[row].modified(self.schema.index(col))
    }

    /// Raw state slot.
    pub fn cell_state(&self, row: RowId, col: impl ColumnRef, key: CellKey) -> &Slot {
        self.store[row].slot(key, self.schema.index(col))
    }

    pub fn row_tags(&self, row: RowId) -> &RowTags {
        &self.store[row].tags
    }

    pub fn row_has_errors(&self, row: RowId) -> bool {
        self.store[row].tags.has_errors
    }

    pub fn row_modified(&self, row: RowId) -> bool {
        self.store[row].tags.modified
    }

    pub fn row_error(&self, row: RowId) -> Option<&RowError> {
        self.store[row].tags.error.as_ref()
    }

    // low-level writers ----------------------------------------------------

    /// Write one state slot, reporting the change.
    pub fn set_cell_state(&mut self, row: RowId, col: impl ColumnRef, key: CellKey, slot: Slot) {
        let fi = self.schema.index(col);
        self.batch(|nav| {
            nav.begin_set_state(row);
            nav.store[row].set_slot(key, fi, slot);
            nav.update_row_flags(row);
            nav.end_set_state();
        });
    }

    /// Modify row tags, reporting the changed keys.
    pub fn set_row_state(&mut self, row: RowId, f: impl FnOnce(&mut RowTags)) {
        self.batch(|nav| {
            nav.begin_set_state(row);
            f(&mut nav.store[row].tags);
            nav.store[row].update_has_errors();
            nav.end_set_state();
        });
    }

    // edits ----------------------------------------------------------------

    /// Check whether a cell may be edited.
    pub fn can_change_val(&self, row: RowId, col: impl ColumnRef) -> Result<()> {
        let fi = self.schema.index(col);
        let tags = &self.store[row].tags;
        if !self.perms.can_edit {
            return Err(NavError::not_permitted("edit"));
        }
        if !tags.is_new && !self.perms.can_change_rows {
            return Err(NavError::not_permitted("change rows"));
        }
        if tags.removed {
            return Err(NavError::not_permitted("change removed rows"));
        }
        if !tags.can_change {
            return Err(NavError::not_permitted("change this row"));
        }
        if !self.schema.field(fi).editable {
            return Err(NavError::not_permitted("edit this field"));
        }
        Ok(())
    }

    /// Enter a value into a cell.
    ///
    /// The value is converted to the field's domain and validated. A valid
    /// value becomes the committed value; an invalid one is kept only as
    /// the cell's input value, with the failures in its errors. Either way
    /// the call succeeds: validation only annotates state.
    pub fn set_cell_val(&mut self, row: RowId, col: impl ColumnRef, value: impl Into<Value>) -> Result<()> {
        let fi = self.schema.index(col);
        self.can_change_val(row, fi)?;
        let value = self.schema.field(fi).convert(value.into());
        self.batch(|nav| {
            nav.begin_set_state(row);
            {
                let r = &mut nav.store[row];
                r.set_slot(CellKey::InputVal, fi, Slot::Value(value.clone()));
                if r.errors(fi).is_some_and(CellErrors::is_server) {
                    r.set_slot(CellKey::Errors, fi, Slot::Empty);
                }
                if r.tags.error.as_ref().is_some_and(|e| e.server) {
                    r.tags.error = None;
                }
            }
            let errors = nav.validate_cell(row, fi, &value);
            let passed = errors.as_ref().is_none_or(|e| e.passed);
            nav.store[row].set_slot(CellKey::Errors, fi, errors.map_or(Slot::Empty, Slot::Errors));
            if passed {
                nav.store[row].set_slot(CellKey::InputVal, fi, Slot::Empty);
                if nav.apply_cell_val(row, fi, value) {
                    nav.after_val_change(row, fi);
                }
            } else {
                tracing::debug!(target: targets::VALIDATE, ?row, fi, "cell input rejected");
            }
            nav.update_row_flags(row);
            nav.end_set_state();
        });
        self.auto_save(SaveTrigger::Input);
        Ok(())
    }

    /// Replace a cell's committed value and forget its edit state.
    ///
    /// Used for server-origin values; the cell is not marked modified.
    pub fn reset_cell_val(&mut self, row: RowId, col: impl ColumnRef, value: impl Into<Value>) {
        let fi = self.schema.index(col);
        let value = value.into();
        self.batch(|nav| {
            nav.begin_set_state(row);
            let changed = nav.store[row].val(fi) != &value;
            nav.store[row].set_val(fi, value);
            nav.store[row].clear_cell_state(fi);
            if changed {
                nav.after_val_change(row, fi);
            }
            nav.update_row_flags(row);
            nav.end_set_state();
        });
    }

    /// Store a value with old/prev/modified tracking. Returns `true` if the
    /// committed value changed.
    pub(crate) fn apply_cell_val(&mut self, row: RowId, fi: usize, value: Value) -> bool {
        let r = &mut self.store[row];
        let current = r.val(fi).clone();
        if current == value {
            return false;
        }
        if matches!(r.slot(CellKey::OldVal, fi), Slot::Empty) {
            r.set_slot(CellKey::OldVal, fi, Slot::Value(current.clone()));
        }
        r.set_slot(CellKey::PrevVal, fi, Slot::Value(current));
        r.set_val(fi, value);
        let modified = r.val(fi) != r.old_val(fi);
        if modified {
            r.set_slot(CellKey::Modified, fi, Slot::Flag(true));
        } else {
            r.set_slot(CellKey::Modified, fi, Slot::Empty);
            r.set_slot(CellKey::OldVal, fi, Slot::Empty);
        }
        true
    }

    /// Follow-up of a committed value change.
    pub(crate) fn after_val_change(&mut self, row: RowId, fi: usize) {
        self.index.invalidate();
        if self.parent_field() == Some(fi) {
            let parent = self.find_parent_row(self.store[row].val(fi));
            let result = tree::reparent(&mut self.store, &mut self.hierarchy, row, parent);
            match result {
                Ok(()) => self.reproject(),
                Err(err) => tracing::warn!(target: targets::TREE, %err, ?row, "parent not relinked"),
            }
        }
        self.touch(UpdateFlags::STATE);
    }

    /// Recompute the cached row tags after cell state changed.
    pub(crate) fn update_row_flags(&mut self, row: RowId) {
        let r = &mut self.store[row];
        r.update_has_errors();
        r.tags.modified = r.tags.is_new || r.tags.removed || r.any_cell_modified();
        if r.tags.modified {
            self.changed.insert(row);
        } else {
            self.changed.remove(&row);
        }
    }

    // validation -----------------------------------------------------------

    /// Run a cell's validation pipeline against `value`.
    ///
    /// Built-ins first, then key uniqueness, lookup membership and the
    /// parent reference, then user validators.
    pub(crate) fn validate_cell(&self, row: RowId, fi: usize, value: &Value) -> Option<CellErrors> {
        let field = self.schema.field(fi);
        let mut results = builtin_results(field, value);
        if !value.is_null() {
            if self.pk_fields().contains(&fi) {
                results.push(unique_result(self.is_duplicate_key(row, fi, value)));
            }
            if let Some(link) = &field.lookup {
                if let Some(found) = self.lookup_contains(link, value) {
                    results.push(lookup_result(&link.rowset, found));
                }
            }
            if self.parent_field() == Some(fi) {
                let acyclic = self
                    .find_parent_row(value)
                    .is_none_or(|parent| !tree::is_ancestor_or_self(&self.store, row, parent));
                results.push(parent_result(acyclic));
            }
        }
        if let Some(validators) = self.validators.get(&field.name) {
            let ctx = ValidationCtx {
                nav: self,
                row,
                fi: Some(fi),
            };
            results.extend(validators.iter().map(|v| v.run(value, &ctx)));
        }
        CellErrors::from_results(results)
    }

    /// Validate every cell of a row against its committed values.
    pub(crate) fn validate_row_cells(&mut self, row: RowId) {
        for fi in 0..self.schema.len() {
            let value = self.store[row].input_val(fi).clone();
            let errors = self.validate_cell(row, fi, &value);
            self.store[row].set_slot(CellKey::Errors, fi, errors.map_or(Slot::Empty, Slot::Errors));
        }
    }

    /// Run the row validators and record the first failure as the row error.
    ///
    /// A server-reported row error is kept until the row is edited.
    /// Returns `true` if the row has no errors afterwards.
    pub fn validate_row(&mut self, row: RowId) -> bool {
        self.batch(|nav| {
            nav.begin_set_state(row);
            let failure = {
                let ctx = ValidationCtx {
                    nav: &*nav,
                    row,
                    fi: None,
                };
                nav.row_validators.iter().find_map(|v| {
                    v.run(&ctx).map(|message| RowError {
                        must_not_allow_exit_row: v.must_not_allow_exit_row,
                        ..RowError::new(message)
                    })
                })
            };
            let r = &mut nav.store[row];
            if !r.tags.error.as_ref().is_some_and(|e| e.server) {
                r.tags.error = failure;
            }
            nav.update_row_flags(row);
            nav.end_set_state();
            !nav.store[row].tags.has_errors
        })
    }

    pub(crate) fn pk_fields(&self) -> Vec<usize> {
        self.pk.iter().filter_map(|c| self.schema.try_index(c.as_str())).collect()
    }

    /// Returns `true` if another live row already holds the key `row`
    /// would have with `value` in field `fi`. Rows whose key cells failed
    /// validation do not count.
    fn is_duplicate_key(&self, row: RowId, fi: usize, value: &Value) -> bool {
        let fis = self.pk_fields();
        let keys: Vec<Value> = fis
            .iter()
            .map(|&f| if f == fi { value.clone() } else { self.store[row].val(f).clone() })
            .collect();
        if keys.iter().any(Value::is_null) {
            return false;
        }
        let index = self.index_for(&fis, &[]);
        index.lookup(&keys).iter().any(|&other| {
            let r = &self.store[other];
            other != row && !r.tags.removed && !fis.iter().any(|&f| r.cell_has_errors(f))
        })
    }

    /// Whether a lookup dataset contains `value`; `None` if it cannot be
    /// consulted right now.
    fn lookup_contains(&self, link: &LookupLink, value: &Value) -> Option<bool> {
        let nav = self.registry.as_ref()?.get(&link.rowset)?;
        let nav = nav.try_read()?;
        let fi = nav.schema.try_index(link.lookup_col.as_str())?;
        let index = nav.index_for(&[fi], &[]);
        Some(
            index
                .lookup(std::slice::from_ref(value))
                .iter()
                .any(|&r| !nav.store[r].tags.removed),
        )
    }

    /// Row whose id equals `parent_val`.
    pub(crate) fn find_parent_row(&self, parent_val: &Value) -> Option<RowId> {
        if parent_val.is_null() {
            return None;
        }
        let id_fi = self.id_field()?;
        let index = self.index_for(&[id_fi], &[]);
        index.lookup(std::slice::from_ref(parent_val)).first().copied()
    }
}
