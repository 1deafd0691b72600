//! Change tracking and persistence.
//!
//! Saving packs every valid changed row into a [`ChangeSet`]. A
//! server-backed dataset hands it to its [`Transport`](crate::Transport) and
//! locks the packed rows until the matching [`TransportEvent::Saved`]
//! arrives; a client-only dataset commits in place and keeps the result as
//! its document rows (or as row states when `save_row_states` is set).
//!
//! Reloading goes through the same request/event cycle. With
//! `merge_on_reload` a loaded document is reconciled with the local rows by
//! primary key instead of replacing them.

use std::collections::{BTreeMap, HashSet};

use horizon_rowset_core::{PerfSpan, targets};
use serde::{Deserialize, Serialize};

use super::{Nav, RowValues};
use crate::error::{NavError, Result, TransportError};
use crate::events::{NotifyKind, UpdateFlags};
use crate::filter::ParamVals;
use crate::row::{CellKey, RowError, RowId, Slot};
use crate::transport::{
    ChangeKind, ChangeSet, LoadRequest, RequestId, RowChange, RowResult, RowsetDoc, SaveRequest,
    SaveResult, TransportEvent,
};
use crate::validate::CellErrors;
use crate::value::Value;

/// A row as it was sent in the in-flight save.
#[derive(Debug)]
struct PackedRow {
    row: RowId,
    kind: ChangeKind,
    /// Field values as sent.
    sent: Vec<(usize, Value)>,
}

#[derive(Debug)]
pub(crate) struct InFlightSave {
    id: RequestId,
    rows: Vec<PackedRow>,
}

/// What [`Nav::save`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    /// The change set was handed to the transport.
    Sent(RequestId),
    /// A client-only dataset stored its changes.
    Committed,
    NothingToSave,
}

fn is_false(b: &bool) -> bool {
    !*b
}

/// Edit state of one cell in a [`RowState`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CellStateDoc {
    #[serde(default, skip_serializing_if = "is_false")]
    pub modified: bool,
    /// Baseline of a modified cell.
    #[serde(default)]
    pub old_val: Value,
    /// Pending input that failed validation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_val: Option<Value>,
}

/// Serialized row with its change state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RowState {
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_new: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub removed: bool,
    pub vals: RowValues,
    /// Cells with edit state, by field name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cells: Option<BTreeMap<String, CellStateDoc>>,
}

impl Nav {
    // saving ---------------------------------------------------------------

    /// Save the changed rows.
    ///
    /// Rows that fail validation are skipped and stay changed. Fails with
    /// [`NavError::SaveInProgress`] while a save is in flight and with
    /// [`NavError::InvalidRows`] if no changed row is valid.
    #[tracing::instrument(skip_all, target = "horizon_rowset::persist", fields(changed = self.changed.len()))]
    pub fn save(&mut self) -> Result<SaveOutcome> {
        if self.save_request.is_some() {
            self.signals
                .notify
                .emit((NotifyKind::Error, "Saving in progress. Please wait.".to_string()));
            return Err(NavError::SaveInProgress);
        }
        let changed = self.changed_rows();
        if changed.is_empty() {
            return Ok(self.save_row_order());
        }
        self.batch(|nav| {
            let valid: Vec<RowId> = changed
                .iter()
                .copied()
                .filter(|&row| nav.store[row].tags.removed || nav.validate_row(row))
                .collect();
            if valid.is_empty() {
                return Err(NavError::InvalidRows { count: changed.len() });
            }
            if valid.len() < changed.len() {
                tracing::debug!(
                    target: targets::PERSIST,
                    skipped = changed.len() - valid.len(),
                    "rows with errors left out of the save"
                );
            }
            nav.rows_moved = false;
            if nav.is_server_backed() {
                nav.send_save(&valid).map(SaveOutcome::Sent)
            } else {
                nav.save_locally(&valid);
                Ok(SaveOutcome::Committed)
            }
        })
    }

    /// Save after moves that changed no value. Only a client-only dataset
    /// has a row order to store.
    fn save_row_order(&mut self) -> SaveOutcome {
        if !self.rows_moved {
            return SaveOutcome::NothingToSave;
        }
        self.rows_moved = false;
        if self.is_server_backed() {
            return SaveOutcome::NothingToSave;
        }
        self.batch(|nav| nav.save_locally(&[]));
        SaveOutcome::Committed
    }

    fn pack_row(&self, row: RowId) -> (RowChange, PackedRow) {
        let r = &self.store[row];
        let mut values = BTreeMap::new();
        let mut sent = Vec::new();
        let kind = if r.tags.removed {
            ChangeKind::Remove
        } else if r.tags.is_new {
            ChangeKind::New
        } else {
            ChangeKind::Update
        };
        match kind {
            ChangeKind::Remove => {
                for fi in self.pk_fields() {
                    values.insert(self.schema.field(fi).name.clone(), r.old_val(fi).clone());
                }
            }
            ChangeKind::New => {
                for field in self.schema.fields() {
                    let fi = field.val_index;
                    if field.nosave || r.val(fi) == &field.default {
                        continue;
                    }
                    values.insert(field.name.clone(), r.val(fi).clone());
                    sent.push((fi, r.val(fi).clone()));
                }
            }
            ChangeKind::Update => {
                for field in self.schema.fields() {
                    let fi = field.val_index;
                    if field.nosave || !r.modified(fi) {
                        continue;
                    }
                    values.insert(field.name.clone(), r.val(fi).clone());
                    sent.push((fi, r.val(fi).clone()));
                }
                for fi in self.pk_fields() {
                    let name = format!("{}:old", self.schema.field(fi).name);
                    values.insert(name, r.old_val(fi).clone());
                }
            }
        }
        (RowChange { kind, values }, PackedRow { row, kind, sent })
    }

    fn send_save(&mut self, rows: &[RowId]) -> Result<RequestId> {
        let (Some(transport), Some(url)) = (self.transport.clone(), self.config.rowset_url.clone()) else {
            return Err(self.no_transport());
        };
        let id = RequestId::next();
        let mut changes = ChangeSet::default();
        let mut packed = Vec::with_capacity(rows.len());
        for &row in rows {
            let (change, p) = self.pack_row(row);
            changes.rows.push(change);
            packed.push(p);
            self.begin_set_state(row);
            self.store[row].tags.save_request = Some(id);
            self.end_set_state();
        }
        tracing::info!(target: targets::PERSIST, id = id.get(), rows = packed.len(), "save sent");
        self.save_request = Some(InFlightSave { id, rows: packed });
        self.signals.saving.emit(true);
        transport.save(id, SaveRequest { url, changes });
        Ok(id)
    }

    fn save_locally(&mut self, rows: &[RowId]) {
        if self.config.save_row_states {
            self.local_states = Some(self.serialize_all_row_states());
            tracing::debug!(target: targets::PERSIST, rows = rows.len(), "row states stored");
            return;
        }
        self.commit_rows(rows);
        self.doc.rows = self
            .store
            .iter()
            .filter(|(_, r)| !r.tags.removed)
            .map(|(_, r)| r.vals())
            .collect();
        tracing::debug!(target: targets::PERSIST, rows = rows.len(), "changes committed locally");
        self.notify_lookup_consumers();
    }

    /// Row states stored by the last local save with `save_row_states`.
    pub fn local_row_states(&self) -> Option<&[RowState]> {
        self.local_states.as_deref()
    }

    /// Cancel the in-flight save. Locks are released and the rows stay
    /// changed; a late response is ignored.
    pub fn abort_saving(&mut self) {
        let Some(save) = self.save_request.take() else {
            return;
        };
        if let Some(transport) = &self.transport {
            transport.abort(save.id);
        }
        self.batch(|nav| nav.unlock_rows(&save));
        self.signals.saving.emit(false);
        tracing::debug!(target: targets::PERSIST, id = save.id.get(), "save aborted");
    }

    fn unlock_rows(&mut self, save: &InFlightSave) {
        for packed in &save.rows {
            if self.store.contains(packed.row) {
                self.begin_set_state(packed.row);
                self.store[packed.row].tags.save_request = None;
                self.end_set_state();
            }
        }
    }

    // transport events -----------------------------------------------------

    /// Feed a transport completion into the dataset. Events for requests
    /// the dataset no longer waits for are ignored.
    pub fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Loaded { id, result } => {
                if self.load_request != Some(id) {
                    tracing::debug!(target: targets::TRANSPORT, id = id.get(), "stale load response ignored");
                    return;
                }
                self.load_request = None;
                self.signals.loading.emit(false);
                match result {
                    Ok(doc) => self.apply_loaded_doc(doc),
                    Err(err) => self.load_failed(err),
                }
            }
            TransportEvent::Saved { id, result } => {
                let Some(save) = self.save_request.take_if(|s| s.id == id) else {
                    tracing::debug!(target: targets::TRANSPORT, id = id.get(), "stale save response ignored");
                    return;
                };
                self.batch(|nav| {
                    nav.unlock_rows(&save);
                    match result {
                        Ok(result) => nav.apply_save_result(save, result),
                        Err(err) => nav.save_failed(err),
                    }
                });
                self.signals.saving.emit(false);
            }
        }
    }

    fn apply_loaded_doc(&mut self, doc: RowsetDoc) {
        self.load_error = None;
        if self.config.merge_on_reload && !self.pk.is_empty() && !self.store.is_empty() {
            self.diff_merge(doc);
        } else {
            self.reset(doc);
        }
    }

    fn load_failed(&mut self, err: TransportError) {
        tracing::warn!(target: targets::PERSIST, %err, "load failed");
        self.load_error = Some(err.clone());
        self.signals
            .notify
            .emit((NotifyKind::Error, err.user_message("Loading")));
        self.signals.load_fail.emit(err);
        self.touch(UpdateFlags::ROWS);
    }

    fn save_failed(&mut self, err: TransportError) {
        tracing::warn!(target: targets::PERSIST, %err, "save failed");
        self.signals
            .notify
            .emit((NotifyKind::Error, err.user_message("Saving")));
        self.signals.save_fail.emit(err);
    }

    fn apply_save_result(&mut self, save: InFlightSave, result: SaveResult) {
        let _span = PerfSpan::new("apply_save_result");
        let mut dropped = Vec::new();
        let mut updated = Vec::new();
        let mut accepted_any = false;
        for (i, packed) in save.rows.iter().enumerate() {
            let row = packed.row;
            if !self.store.contains(row) {
                continue;
            }
            let res = result.rows.get(i).cloned().unwrap_or_default();
            let row_error = res.error.as_ref().and_then(|e| e.message());
            if res.remove || (packed.kind == ChangeKind::Remove && row_error.is_none()) {
                self.drop_row(row);
                dropped.push(row);
                accepted_any = true;
                continue;
            }
            self.begin_set_state(row);
            let rejected = self.apply_row_result(packed, res, row_error);
            accepted_any |= !rejected;
            self.update_row_flags(row);
            self.end_set_state();
            updated.push(row);
        }

        if let Some(trace) = &result.trace {
            for line in trace {
                tracing::info!(target: targets::PERSIST, "{line}");
            }
        }
        self.index.invalidate();
        self.relink_tree();
        self.reproject();
        if self.focus.row.is_none() && !dropped.is_empty() {
            self.refocus();
        }
        if !dropped.is_empty() {
            self.signals.rows_removed.emit(dropped);
        }
        if !updated.is_empty() {
            self.signals.rows_changed.emit(updated);
        }
        tracing::info!(target: targets::PERSIST, id = save.id.get(), "save applied");
        if accepted_any {
            self.notify_lookup_consumers();
            if let (Some(registry), Some(name)) = (self.registry.clone(), self.name()) {
                registry.rowset_changed(name);
            }
        }
    }

    /// Apply one row's server response. Returns `true` if the row was
    /// rejected.
    fn apply_row_result(&mut self, packed: &PackedRow, res: RowResult, row_error: Option<String>) -> bool {
        let row = packed.row;
        let mut rejected = false;
        if let Some(message) = row_error {
            self.store[row].tags.error = Some(RowError::server(message));
            rejected = true;
        }
        for (col, message) in res.field_errors.unwrap_or_default() {
            let Some(fi) = self.schema.try_index(col.as_str()) else {
                tracing::warn!(target: targets::PERSIST, %col, "field error for unknown column");
                continue;
            };
            self.store[row].set_slot(CellKey::Errors, fi, Slot::Errors(CellErrors::server(message)));
            rejected = true;
        }
        if rejected {
            return true;
        }

        for (fi, sent) in &packed.sent {
            let r = &mut self.store[row];
            if r.val(*fi) == sent {
                r.set_slot(CellKey::OldVal, *fi, Slot::Empty);
                r.set_slot(CellKey::Modified, *fi, Slot::Empty);
            } else {
                // Edited while the save was in flight.
                r.set_slot(CellKey::OldVal, *fi, Slot::Value(sent.clone()));
                r.set_slot(CellKey::Modified, *fi, Slot::Flag(true));
            }
        }
        for (col, value) in res.values.unwrap_or_default() {
            let Some(fi) = self.schema.try_index(col.as_str()) else {
                continue;
            };
            let r = &mut self.store[row];
            if !r.modified(fi) && r.val(fi) != &value {
                r.set_val(fi, value);
            }
        }
        let r = &mut self.store[row];
        r.tags.is_new = false;
        r.tags.error = None;
        false
    }

    // revert & commit ------------------------------------------------------

    /// Drop new rows, restore removed rows and modified cells, and discard
    /// pending invalid input. Aborts an in-flight save first.
    pub fn revert_changes(&mut self) {
        self.abort_saving();
        self.rows_moved = false;
        let rows: Vec<RowId> = self
            .store
            .iter()
            .filter(|(id, r)| self.changed.contains(id) || r.any_cell_errors() || r.tags.error.is_some())
            .map(|(id, _)| id)
            .collect();
        if rows.is_empty() {
            return;
        }
        self.batch(|nav| {
            let mut dropped = Vec::new();
            let mut reverted = Vec::new();
            for row in rows {
                if !nav.store.contains(row) {
                    continue;
                }
                if nav.store[row].tags.is_new {
                    // Children of a dropped new row may be dropped already.
                    nav.drop_row(row);
                    dropped.push(row);
                    continue;
                }
                nav.begin_set_state(row);
                let r = &mut nav.store[row];
                for fi in 0..r.field_count() {
                    if r.modified(fi) {
                        let old = r.old_val(fi).clone();
                        r.set_val(fi, old);
                    }
                    r.clear_cell_state(fi);
                }
                r.tags.removed = false;
                r.tags.error = None;
                nav.update_row_flags(row);
                nav.end_set_state();
                reverted.push(row);
            }
            nav.index.invalidate();
            nav.relink_tree();
            nav.reproject();
            nav.refocus();
            if !dropped.is_empty() {
                nav.signals.rows_removed.emit(dropped);
            }
            if !reverted.is_empty() {
                nav.signals.rows_changed.emit(reverted);
            }
        });
        tracing::debug!(target: targets::PERSIST, "changes reverted");
    }

    /// Accept every change locally without a round trip.
    pub fn commit_changes(&mut self) {
        self.rows_moved = false;
        let rows = self.changed_rows();
        if rows.is_empty() {
            return;
        }
        self.batch(|nav| nav.commit_rows(&rows));
    }

    fn commit_rows(&mut self, rows: &[RowId]) {
        let mut dropped = Vec::new();
        for &row in rows {
            if !self.store.contains(row) {
                continue;
            }
            if self.store[row].tags.removed {
                self.drop_row(row);
                dropped.push(row);
                continue;
            }
            self.begin_set_state(row);
            let r = &mut self.store[row];
            for fi in 0..r.field_count() {
                r.clear_cell_state(fi);
            }
            r.tags.is_new = false;
            r.tags.error = None;
            self.update_row_flags(row);
            self.end_set_state();
        }
        if !dropped.is_empty() {
            self.reproject();
            self.signals.rows_removed.emit(dropped);
        }
    }

    // loading --------------------------------------------------------------

    fn no_transport(&self) -> NavError {
        NavError::NoTransport {
            rowset: self.name().unwrap_or("<unnamed>").to_string(),
        }
    }

    /// Request the rowset from the server, aborting a previous load.
    ///
    /// With master parameters unavailable the rows are cleared and no
    /// request is made (`Ok(None)`).
    #[tracing::instrument(skip_all, target = "horizon_rowset::persist", fields(rowset = self.name()))]
    pub fn reload(&mut self) -> Result<Option<RequestId>> {
        if self.save_request.is_some() {
            return Err(NavError::ReloadWhileSaving);
        }
        let (Some(transport), Some(url)) = (self.transport.clone(), self.config.rowset_url.clone()) else {
            return Err(self.no_transport());
        };
        self.abort_loading();
        let params = match &self.param_vals {
            ParamVals::NoParams => None,
            ParamVals::Unavailable => {
                let empty = RowsetDoc {
                    rows: Vec::new(),
                    ..self.doc.clone()
                };
                self.reset(empty);
                return Ok(None);
            }
            ParamVals::Vals(sets) => Some(sets.clone()),
        };
        let id = RequestId::next();
        self.load_request = Some(id);
        self.signals.loading.emit(true);
        transport.load(id, LoadRequest { url, params });
        tracing::debug!(target: targets::PERSIST, id = id.get(), "load sent");
        Ok(Some(id))
    }

    /// Cancel the in-flight load.
    pub fn abort_loading(&mut self) {
        let Some(id) = self.load_request.take() else {
            return;
        };
        if let Some(transport) = &self.transport {
            transport.abort(id);
        }
        self.signals.loading.emit(false);
    }

    /// Reconcile a freshly loaded document with the local rows by primary
    /// key.
    ///
    /// Rows the server no longer has are dropped (local new rows are kept),
    /// new server rows are appended and existing rows are updated in place:
    /// locally modified cells keep their value and take the server value as
    /// their baseline. A document with different fields or keys forces a
    /// full reset.
    #[tracing::instrument(skip_all, target = "horizon_rowset::persist", fields(rows = doc.rows.len()))]
    pub fn diff_merge(&mut self, doc: RowsetDoc) {
        if self.pk.is_empty() || doc.field_names() != self.doc.field_names() || doc.pk != self.doc.pk {
            tracing::debug!(target: targets::PERSIST, "document shape changed, resetting");
            self.reset(doc);
            return;
        }
        self.batch(|nav| {
            let _span = PerfSpan::new("diff_merge");
            let pk_fis = nav.pk_fields();
            let index = nav.index_for(&pk_fis, &[]);
            let mut seen = HashSet::new();
            let mut added = Vec::new();
            let mut updated = Vec::new();
            for vals in &doc.rows {
                let key: Vec<Value> = pk_fis
                    .iter()
                    .map(|&fi| vals.get(fi).cloned().unwrap_or_default())
                    .collect();
                let existing = index
                    .lookup(&key)
                    .iter()
                    .copied()
                    .find(|r| nav.store.contains(*r) && !seen.contains(r));
                match existing {
                    Some(row) => {
                        seen.insert(row);
                        if nav.merge_row(row, vals) {
                            updated.push(row);
                        }
                    }
                    None => {
                        let row = nav.store.push(vals.clone());
                        seen.insert(row);
                        added.push(row);
                    }
                }
            }
            let gone: Vec<RowId> = nav
                .store
                .all_rows()
                .iter()
                .copied()
                .filter(|r| !seen.contains(r) && !nav.store[*r].tags.is_new)
                .collect();
            for &row in &gone {
                nav.drop_row(row);
            }
            nav.doc = doc;
            nav.index.invalidate();
            nav.relink_tree();
            nav.reproject();
            nav.refocus();
            tracing::debug!(
                target: targets::PERSIST,
                added = added.len(),
                removed = gone.len(),
                updated = updated.len(),
                "document merged"
            );
            if !added.is_empty() {
                nav.signals.rows_added.emit(added);
            }
            if !gone.is_empty() {
                nav.signals.rows_removed.emit(gone);
            }
            if !updated.is_empty() {
                nav.signals.rows_changed.emit(updated);
            }
        });
        self.notify_lookup_consumers();
    }

    /// Merge server values into one row. Returns `true` if anything changed.
    fn merge_row(&mut self, row: RowId, vals: &[Value]) -> bool {
        self.begin_set_state(row);
        let mut changed = false;
        let r = &mut self.store[row];
        for fi in 0..r.field_count() {
            let server = vals.get(fi).cloned().unwrap_or_default();
            if r.modified(fi) {
                if r.old_val(fi) == &server {
                    continue;
                }
                changed = true;
                if r.val(fi) == &server {
                    r.set_slot(CellKey::OldVal, fi, Slot::Empty);
                    r.set_slot(CellKey::Modified, fi, Slot::Empty);
                } else {
                    r.set_slot(CellKey::OldVal, fi, Slot::Value(server));
                }
            } else if r.val(fi) != &server {
                r.set_val(fi, server);
                changed = true;
            }
        }
        self.update_row_flags(row);
        self.end_set_state();
        changed
    }

    // serialization --------------------------------------------------------

    fn serialize_row_vals(&self, row: RowId) -> RowValues {
        let r = &self.store[row];
        self.schema
            .fields()
            .iter()
            .filter(|f| !f.nosave && r.val(f.val_index) != &f.default)
            .map(|f| (f.name.clone(), r.val(f.val_index).clone()))
            .collect()
    }

    fn deserialize_row_vals(&self, vals: &RowValues) -> Vec<Value> {
        self.schema
            .fields()
            .iter()
            .map(|f| vals.get(&f.name).cloned().unwrap_or_else(|| f.default.clone()))
            .collect()
    }

    /// Values of every non-removed row, keyed by column. Values equal to
    /// the field default and `nosave` fields are left out.
    pub fn serialize_all_row_vals(&self) -> Vec<RowValues> {
        self.store
            .iter()
            .filter(|(_, r)| !r.tags.removed)
            .map(|(id, _)| self.serialize_row_vals(id))
            .collect()
    }

    /// Replace every row with rows built from serialized values.
    pub fn deserialize_all_row_vals(&mut self, rows: &[RowValues]) {
        let doc = RowsetDoc {
            rows: rows.iter().map(|vals| self.deserialize_row_vals(vals)).collect(),
            ..self.doc.clone()
        };
        self.reset(doc);
    }

    /// Every row with its new/removed flags and cell edit state.
    pub fn serialize_all_row_states(&self) -> Vec<RowState> {
        self.store
            .iter()
            .map(|(id, r)| {
                let cells: BTreeMap<String, CellStateDoc> = self
                    .schema
                    .fields()
                    .iter()
                    .filter(|f| !f.nosave)
                    .filter_map(|f| {
                        let fi = f.val_index;
                        let input = match r.slot(CellKey::InputVal, fi) {
                            Slot::Value(v) => Some(v.clone()),
                            _ => None,
                        };
                        let modified = r.modified(fi);
                        (modified || input.is_some()).then(|| {
                            let doc = CellStateDoc {
                                modified,
                                old_val: r.old_val(fi).clone(),
                                input_val: input,
                            };
                            (f.name.clone(), doc)
                        })
                    })
                    .collect();
                RowState {
                    is_new: r.tags.is_new,
                    removed: r.tags.removed,
                    vals: self.serialize_row_vals(id),
                    cells: (!cells.is_empty()).then_some(cells),
                }
            })
            .collect()
    }

    /// Replace every row with rows restored from serialized states,
    /// including their new/removed flags and cell edit state.
    pub fn deserialize_all_row_states(&mut self, states: &[RowState]) {
        let doc = RowsetDoc {
            rows: states.iter().map(|s| self.deserialize_row_vals(&s.vals)).collect(),
            ..self.doc.clone()
        };
        self.batch(|nav| {
            nav.reset(doc);
            let rows = nav.store.all_rows().to_vec();
            for (row, state) in rows.into_iter().zip(states) {
                nav.restore_row_state(row, state);
            }
            nav.index.invalidate();
            nav.reproject();
            nav.refocus();
        });
    }

    fn restore_row_state(&mut self, row: RowId, state: &RowState) {
        self.begin_set_state(row);
        {
            let r = &mut self.store[row];
            r.tags.is_new = state.is_new;
            r.tags.removed = state.removed;
        }
        for (col, cell) in state.cells.iter().flatten() {
            let Some(fi) = self.schema.try_index(col.as_str()) else {
                continue;
            };
            let r = &mut self.store[row];
            if cell.modified && r.val(fi) != &cell.old_val {
                r.set_slot(CellKey::OldVal, fi, Slot::Value(cell.old_val.clone()));
                r.set_slot(CellKey::Modified, fi, Slot::Flag(true));
            }
            if let Some(input) = &cell.input_val {
                r.set_slot(CellKey::InputVal, fi, Slot::Value(input.clone()));
            }
        }
        if state.cells.is_some() {
            self.validate_row_cells(row);
        }
        self.update_row_flags(row);
        self.end_set_state();
    }
}
