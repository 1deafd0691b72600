//! The dataset engine.
//!
//! A [`Nav`] owns one dataset: its schema, rows with per-cell state, lazy
//! indices, the sort comparator, the visible-row filter, validators, the
//! focus/selection state and the in-flight load and save requests. Views
//! read through the `cell_*` and `row_*` accessors and drive it with
//! intents (`focus_cell`, `set_cell_val`, `insert_rows`, ...); it answers
//! through the signals in [`NavSignals`].
//!
//! # Projection
//!
//! ```text
//!  all_rows ──► filter (params, exclude sets, removed, collapsed) ──► sort ──► rows
//!  (load order)                                                            (row_index 0..n)
//! ```
//!
//! `rows` is rebuilt from `all_rows` whenever the filter, the order-by or
//! the tree shape changes; a cell edit does not move rows.
//!
//! # Batching
//!
//! Every public mutating operation runs inside [`Nav::batch`], so a cascade
//! such as insert, reindex, refilter, resort and refocus produces exactly
//! one `updated` emission. Cell and row state writes for one row are
//! grouped with [`Nav::begin_set_state`] / [`Nav::end_set_state`], which
//! diff the row against a snapshot and report each changed slot once.

mod cells;
mod fields;
mod focus;
mod persist;
mod rows;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use horizon_rowset_core::{PerfSpan, UpdateBatch, targets};

use crate::config::{NavConfig, Permissions, SaveTrigger};
use crate::error::TransportError;
use crate::events::{CellStateChange, NavSignals, RowStateChange, SelectionSnapshot, UpdateFlags};
use crate::filter::{self, FilterExpr, ParamVals, RowPredicate};
use crate::index::{self, IndexEngine, IndexNode, RangeDef};
use crate::registry::DatasetRegistry;
use crate::row::{CellKey, Row, RowId, RowStore};
use crate::schema::Schema;
use crate::sort::{self, OrderBy, RowCmp};
use crate::transport::{RequestId, RowsetDoc, Transport};
use crate::tree::{self, Hierarchy};
use crate::validate::{RowValidator, Validator};
use crate::value::Value;

pub use focus::{FocusOpts, RowSelection};
pub use persist::{CellStateDoc, RowState, SaveOutcome};
pub use rows::{InsertOptions, RowMove};

use focus::FocusState;
use persist::InFlightSave;

/// Values of one row keyed by column name.
pub type RowValues = BTreeMap<String, Value>;

struct StateTxn {
    row: RowId,
    before: Option<Row>,
}

/// A bound dataset.
pub struct Nav {
    config: NavConfig,
    perms: Permissions,
    schema: Schema,
    store: RowStore,
    /// Visible projection, filtered and sorted.
    rows: Vec<RowId>,
    index: IndexEngine,
    hierarchy: Hierarchy,
    pk: Vec<String>,
    id_col: Option<String>,
    parent_col: Option<String>,
    pos_col: Option<String>,
    name_col: Option<String>,
    tree_col: Option<String>,
    order_by: OrderBy,
    comparator: Option<RowCmp>,
    filter: Option<FilterExpr>,
    predicate: Option<RowPredicate>,
    param_vals: ParamVals,
    validators: HashMap<String, Vec<Validator>>,
    row_validators: Vec<RowValidator>,
    changed: HashSet<RowId>,
    /// Row order changed since the last save.
    rows_moved: bool,
    focus: FocusState,
    load_request: Option<RequestId>,
    save_request: Option<InFlightSave>,
    load_error: Option<TransportError>,
    transport: Option<Arc<dyn Transport>>,
    registry: Option<DatasetRegistry>,
    /// Last document, with rows as of the last load or local save.
    doc: RowsetDoc,
    local_states: Option<Vec<RowState>>,
    batch: UpdateBatch<UpdateFlags>,
    state_txns: Vec<StateTxn>,
    signals: Arc<NavSignals>,
}

static_assertions::assert_impl_all!(Nav: Send, Sync);

impl fmt::Debug for Nav {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Nav")
            .field("rowset", &self.config.rowset_name)
            .field("fields", &self.schema.len())
            .field("rows", &self.rows.len())
            .field("all_rows", &self.store.len())
            .field("tree", &self.hierarchy.active)
            .field("order_by", &self.order_by.to_string())
            .finish_non_exhaustive()
    }
}

impl Nav {
    /// Create an empty dataset.
    pub fn new(config: NavConfig) -> Self {
        let order_by = config.order_by.as_deref().map(OrderBy::parse).unwrap_or_default();
        let perms = Permissions::resolve(&config, &RowsetDoc::default());
        let mut schema = Schema::new(&[], config.col_attrs.clone());
        schema.set_cols(config.cols.clone());
        Self {
            config,
            perms,
            schema,
            store: RowStore::new(0),
            rows: Vec::new(),
            index: IndexEngine::default(),
            hierarchy: Hierarchy::default(),
            pk: Vec::new(),
            id_col: None,
            parent_col: None,
            pos_col: None,
            name_col: None,
            tree_col: None,
            order_by,
            comparator: None,
            filter: None,
            predicate: None,
            param_vals: ParamVals::NoParams,
            validators: HashMap::new(),
            row_validators: Vec::new(),
            changed: HashSet::new(),
            rows_moved: false,
            focus: FocusState::default(),
            load_request: None,
            save_request: None,
            load_error: None,
            transport: None,
            registry: None,
            doc: RowsetDoc::default(),
            local_states: None,
            batch: UpdateBatch::new(),
            state_txns: Vec::new(),
            signals: Arc::new(NavSignals::default()),
        }
    }

    /// Create a dataset from a rowset document.
    pub fn from_doc(config: NavConfig, doc: RowsetDoc) -> Self {
        let mut nav = Self::new(config);
        nav.reset(doc);
        nav
    }

    /// Builder: attach a transport, making the dataset server-backed when a
    /// `rowset_url` is configured.
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self.recompile_filter();
        self
    }

    // accessors ------------------------------------------------------------

    pub fn config(&self) -> &NavConfig {
        &self.config
    }

    pub fn permissions(&self) -> Permissions {
        self.perms
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn signals(&self) -> &Arc<NavSignals> {
        &self.signals
    }

    /// Registry name.
    pub fn name(&self) -> Option<&str> {
        self.config.rowset_name.as_deref()
    }

    /// Visible rows, in display order.
    pub fn rows(&self) -> &[RowId] {
        &self.rows
    }

    /// Every live row in load/insertion order, including hidden and
    /// removed ones.
    pub fn all_rows(&self) -> &[RowId] {
        self.store.all_rows()
    }

    /// Number of visible rows.
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Row at a visible position.
    pub fn row_id(&self, ri: usize) -> Option<RowId> {
        self.rows.get(ri).copied()
    }

    /// Visible position of a row.
    pub fn row_index(&self, row: RowId) -> Option<usize> {
        self.store.get(row).and_then(|r| r.row_index)
    }

    /// Returns `true` if `row` refers to a live row.
    pub fn contains_row(&self, row: RowId) -> bool {
        self.store.contains(row)
    }

    /// Row storage.
    ///
    /// # Panics
    ///
    /// Panics if the row does not exist.
    pub fn row(&self, row: RowId) -> &Row {
        &self.store[row]
    }

    /// Primary key columns.
    pub fn pk(&self) -> &[String] {
        &self.pk
    }

    /// Parent field of a hierarchical dataset; `None` in flat mode.
    pub fn parent_field(&self) -> Option<usize> {
        if !self.hierarchy.active {
            return None;
        }
        self.parent_col.as_deref().and_then(|c| self.schema.try_index(c))
    }

    /// Id field of a hierarchical dataset; `None` in flat mode.
    pub fn id_field(&self) -> Option<usize> {
        if !self.hierarchy.active {
            return None;
        }
        self.id_col.as_deref().and_then(|c| self.schema.try_index(c))
    }

    /// Returns `true` while rows are linked as a tree.
    pub fn is_tree(&self) -> bool {
        self.hierarchy.active
    }

    /// Root rows of a hierarchical dataset.
    pub fn root_rows(&self) -> &[RowId] {
        &self.hierarchy.roots
    }

    /// Current order-by.
    pub fn order_by(&self) -> &OrderBy {
        &self.order_by
    }

    /// Master-detail parameter state.
    pub fn param_vals(&self) -> &ParamVals {
        &self.param_vals
    }

    /// Error of the last failed load, cleared by the next successful one.
    pub fn load_error(&self) -> Option<&TransportError> {
        self.load_error.as_ref()
    }

    pub fn is_loading(&self) -> bool {
        self.load_request.is_some()
    }

    pub fn is_saving(&self) -> bool {
        self.save_request.is_some()
    }

    /// Rows loaded from a server endpoint and saved back to it.
    pub fn is_server_backed(&self) -> bool {
        self.transport.is_some() && self.config.rowset_url.is_some()
    }

    /// The last document, with rows as of the last load or local save.
    pub fn rowset_doc(&self) -> &RowsetDoc {
        &self.doc
    }

    /// Rows with uncommitted new, modified or removed state, in load order.
    pub fn changed_rows(&self) -> Vec<RowId> {
        self.store
            .all_rows()
            .iter()
            .copied()
            .filter(|id| self.changed.contains(id))
            .collect()
    }

    pub fn has_changes(&self) -> bool {
        !self.changed.is_empty() || self.rows_moved
    }

    /// Returns `true` if rows were moved since the last save.
    pub fn rows_moved(&self) -> bool {
        self.rows_moved
    }

    /// Returns `true` if changes can be saved at all: the dataset is
    /// server-backed or client-only. A dataset with a URL but no transport
    /// cannot save, and removes rows for good instead of marking them.
    pub fn can_save_changes(&self) -> bool {
        self.is_server_backed() || self.config.rowset_url.is_none()
    }

    /// Attach the registry used to resolve lookup datasets.
    pub(crate) fn set_registry(&mut self, registry: Option<DatasetRegistry>) {
        self.registry = registry;
    }

    pub(crate) fn registry(&self) -> Option<&DatasetRegistry> {
        self.registry.as_ref()
    }

    // validators -----------------------------------------------------------

    /// Register a user validator on a column. Runs after the built-ins.
    pub fn add_validator(&mut self, col: &str, validator: Validator) {
        let name = self.schema.field(self.schema.index(col)).name.clone();
        self.validators.entry(name).or_default().push(validator);
    }

    /// Register a row validator.
    pub fn add_row_validator(&mut self, validator: RowValidator) {
        self.row_validators.push(validator);
    }

    // batching -------------------------------------------------------------

    /// Open an update batch. Batches nest.
    pub fn begin_update(&mut self) {
        self.batch.begin();
    }

    /// Close an update batch; the outermost close emits `updated`.
    pub fn end_update(&mut self) {
        if let Some(flags) = self.batch.end() {
            self.signals.updated.emit(flags);
        }
    }

    /// Run `f` inside an update batch.
    pub fn batch<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        self.begin_update();
        let result = f(self);
        self.end_update();
        result
    }

    pub(crate) fn touch(&mut self, flags: UpdateFlags) {
        if let Some(flags) = self.batch.push(flags) {
            self.signals.updated.emit(flags);
        }
    }

    /// Start grouping state writes for `row`.
    pub fn begin_set_state(&mut self, row: RowId) {
        let before = self.store.get(row).cloned();
        self.state_txns.push(StateTxn { row, before });
    }

    /// Finish a state group and report what changed.
    ///
    /// Nested groups on the same row report once, when the outermost one
    /// closes.
    pub fn end_set_state(&mut self) {
        let Some(txn) = self.state_txns.pop() else {
            debug_assert!(false, "end_set_state without matching begin_set_state");
            return;
        };
        if self.state_txns.iter().any(|t| t.row == txn.row) {
            return;
        }
        let (Some(before), Some(after)) = (txn.before, self.store.get(txn.row)) else {
            return;
        };

        let mut cells = Vec::new();
        if before.field_count() == after.field_count() {
            for fi in 0..after.field_count() {
                for key in CellKey::ALL {
                    let slot = after.slot(key, fi);
                    if before.slot(key, fi) != slot {
                        cells.push(CellStateChange {
                            row: txn.row,
                            col: self.schema.field(fi).name.clone(),
                            fi,
                            key,
                            value: slot.clone(),
                        });
                    }
                }
            }
        }
        let keys = before.tags.diff(&after.tags);
        if cells.is_empty() && keys.is_empty() {
            return;
        }

        let vals_changed = cells.iter().any(|c| c.key == CellKey::Val);
        if vals_changed {
            self.index.invalidate();
        }
        for change in cells {
            self.signals.cell_state_changed.emit(change);
        }
        if !keys.is_empty() {
            self.signals
                .row_state_changed
                .emit(RowStateChange { row: txn.row, keys });
        }
        self.touch(UpdateFlags::STATE);
        if vals_changed && self.focus.selected.contains_key(&txn.row) {
            self.emit_selection();
        }
    }

    // projection -----------------------------------------------------------

    fn row_is_visible(&self, row: &Row) -> bool {
        !row.tags.removed
            && !row.tags.parent_collapsed
            && self.predicate.as_ref().is_none_or(|p| p(row))
    }

    /// Returns `true` if the row passes the current filter.
    pub fn row_visible(&self, row: RowId) -> bool {
        self.store.get(row).is_some_and(|r| self.row_is_visible(r))
    }

    /// Rebuild the visible projection from `all_rows`.
    pub(crate) fn reproject(&mut self) {
        let _span = PerfSpan::new("reproject");
        let mut rows: Vec<RowId> = self
            .store
            .iter()
            .filter(|(_, row)| self.row_is_visible(row))
            .map(|(id, _)| id)
            .collect();
        sort::sort_rows(&self.store, &mut rows, self.comparator.as_ref(), self.hierarchy.active);
        for &id in &self.rows {
            if let Some(row) = self.store.get_mut(id) {
                row.row_index = None;
            }
        }
        self.rows = rows;
        self.update_row_indices(0);
        tracing::debug!(target: targets::NAV, rows = self.rows.len(), all = self.store.len(), "rows projected");
        self.touch(UpdateFlags::ROWS);
    }

    /// Renumber `row_index` from visible position `from`.
    pub(crate) fn update_row_indices(&mut self, from: usize) {
        for (ri, &id) in self.rows.iter().enumerate().skip(from) {
            self.store[id].row_index = Some(ri);
        }
    }

    /// Recompile the order-by into a comparator.
    pub(crate) fn compile_sort(&mut self) {
        let pos_fi = self.pos_col.as_deref().and_then(|c| self.schema.try_index(c));
        let id_fi = self.id_field();
        self.comparator = sort::compile(&self.schema, &self.order_by, pos_fi, id_fi);
        for fi in 0..self.schema.len() {
            let name = self.schema.field(fi).name.clone();
            let priority = self.order_by.0.iter().position(|(c, _)| *c == name);
            let field = self.schema.field_mut(fi);
            field.sort_dir = self.order_by.dir(&name);
            field.sort_priority = priority;
        }
    }

    /// Recompile the visible-row predicate.
    pub(crate) fn recompile_filter(&mut self) {
        let by_params = !self.is_server_backed();
        self.predicate = filter::compose(&self.schema, &self.param_vals, by_params, self.filter.as_ref());
    }

    /// Set an extra filter expression and re-project.
    ///
    /// # Panics
    ///
    /// Panics if the expression names a column that does not exist.
    pub fn set_filter(&mut self, expr: Option<FilterExpr>) {
        self.batch(|nav| {
            nav.filter = expr;
            nav.recompile_filter();
            nav.reproject();
            nav.refocus();
        });
    }

    /// Apply new master parameters.
    ///
    /// A server-backed dataset reloads with them; a client-backed one
    /// refilters its rows without a round trip.
    pub fn set_param_vals(&mut self, vals: ParamVals) {
        if self.param_vals == vals {
            return;
        }
        tracing::debug!(target: targets::PARAMS, ?vals, "param values changed");
        self.param_vals = vals;
        if self.is_server_backed() {
            if let Err(err) = self.reload() {
                tracing::warn!(target: targets::PARAMS, %err, "reload with new params failed");
            }
            return;
        }
        self.batch(|nav| {
            nav.recompile_filter();
            nav.reproject();
            nav.refocus();
        });
    }

    /// Exclude values of a column from the visible rows.
    pub fn set_exclude_vals(&mut self, col: &str, vals: Vec<Value>) {
        let fi = self.schema.index(col);
        self.batch(|nav| {
            nav.schema.set_col_attr(
                fi,
                crate::field::FieldAttrs {
                    exclude_vals: Some(vals),
                    ..Default::default()
                },
            );
            nav.recompile_filter();
            nav.reproject();
            nav.refocus();
        });
    }

    /// Cached index over every live row.
    pub(crate) fn index_for(&self, fis: &[usize], ranges: &[Option<RangeDef>]) -> Arc<IndexNode> {
        let key = index::cache_key(fis, ranges);
        self.index
            .get_or_build(key, || index::build_index(&self.store, self.store.all_rows(), fis, ranges))
    }

    /// Relink the tree from the id and parent columns.
    pub(crate) fn relink_tree(&mut self) {
        let id_fi = self.id_col.as_deref().and_then(|c| self.schema.try_index(c));
        let parent_fi = self.parent_col.as_deref().and_then(|c| self.schema.try_index(c));
        let (Some(id_fi), Some(parent_fi)) = (id_fi, parent_fi) else {
            if self.hierarchy.active {
                tree::unlink_rows(&mut self.store);
            }
            self.hierarchy = Hierarchy::default();
            return;
        };
        let ids = self.index_for(&[id_fi], &[]);
        self.hierarchy = match tree::link_rows(&mut self.store, &ids, parent_fi) {
            Ok(roots) => Hierarchy { active: true, roots },
            Err(_) => Hierarchy::default(),
        };
    }

    // reset ----------------------------------------------------------------

    /// Rebuild the dataset from a document, dropping all local state.
    #[tracing::instrument(skip_all, target = "horizon_rowset::nav", fields(rows = doc.rows.len()))]
    pub fn reset(&mut self, doc: RowsetDoc) {
        self.batch(|nav| {
            let _span = PerfSpan::new("reset");
            nav.schema = Schema::new(&doc.fields, nav.config.col_attrs.clone());
            nav.schema.set_cols(nav.config.cols.clone());
            nav.pk = doc.pk.clone().unwrap_or_default();
            nav.id_col = doc
                .id_col
                .clone()
                .or_else(|| (doc.parent_col.is_some() && nav.pk.len() == 1).then(|| nav.pk[0].clone()));
            nav.parent_col = doc.parent_col.clone();
            nav.pos_col = doc.pos_col.clone();
            nav.name_col = nav.config.name_col.clone().or_else(|| doc.name_col.clone());
            nav.tree_col = nav.config.tree_col.clone().or_else(|| doc.tree_col.clone());
            nav.perms = Permissions::resolve(&nav.config, &doc);

            nav.store.reset(nav.schema.len());
            for vals in &doc.rows {
                nav.store.push(vals.clone());
            }
            nav.rows.clear();
            nav.changed.clear();
            nav.rows_moved = false;
            nav.state_txns.clear();
            nav.focus = FocusState::default();
            nav.index.invalidate();
            nav.relink_tree();
            nav.compile_sort();
            nav.recompile_filter();
            nav.reproject();
            nav.doc = doc;

            nav.touch(UpdateFlags::FIELDS.union(UpdateFlags::FOCUS).union(UpdateFlags::SELECTION));
            nav.signals.reset.emit(());
            if nav.config.auto_focus_first_cell {
                nav.focus_cell(Some(0), None, 0, 0, &FocusOpts::default());
            }
            nav.emit_selection();
        });
        self.notify_lookup_consumers();
        tracing::debug!(target: targets::NAV, rows = self.store.len(), fields = self.schema.len(), "dataset reset");
    }

    /// Tell datasets that display values looked up in this one.
    pub(crate) fn notify_lookup_consumers(&self) {
        if let (Some(registry), Some(name)) = (&self.registry, self.name()) {
            registry.lookup_changed(name);
        }
    }

    /// Save when a changed row's policy matches `trigger`.
    pub(crate) fn auto_save(&mut self, trigger: SaveTrigger) {
        if !self.is_server_backed() || self.save_request.is_some() {
            return;
        }
        let due = self.changed.iter().any(|&id| {
            let tags = &self.store[id].tags;
            let policy = if tags.is_new {
                self.config.save_new_row_on
            } else if tags.removed {
                self.config.save_row_remove_on
            } else {
                self.config.save_row_on
            };
            policy == trigger && !tags.has_errors
        });
        if due {
            if let Err(err) = self.save() {
                tracing::debug!(target: targets::PERSIST, %err, ?trigger, "auto-save skipped");
            }
        }
    }

    /// Emit `selected_rows_changed` with a snapshot of the selection.
    pub(crate) fn emit_selection(&mut self) {
        let snapshot = self.selection_snapshot();
        self.signals.selected_rows_changed.emit(snapshot);
        self.touch(UpdateFlags::SELECTION);
    }

    /// Values of the selected rows in visible order.
    pub fn selection_snapshot(&self) -> SelectionSnapshot {
        let mut selected: Vec<(usize, RowId)> = self
            .focus
            .selected
            .keys()
            .filter_map(|&id| self.row_index(id).map(|ri| (ri, id)))
            .collect();
        selected.sort_unstable();
        SelectionSnapshot {
            fields: self.schema.names(),
            rows: selected.into_iter().map(|(_, id)| self.store[id].vals()).collect(),
        }
    }
}

#[cfg(test)]
mod tests;
