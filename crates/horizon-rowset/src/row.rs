//! Row storage with per-cell shadow state.
//!
//! Every row is one flat vector of slots. The first block holds committed
//! values; each following block holds one kind of per-cell state (pending
//! input, value before the edit session, previous value, validation errors,
//! modified flag) for every field:
//!
//! ```text
//! [ val 0..n | input_val 0..n | old_val 0..n | prev_val 0..n | errors 0..n | modified 0..n ]
//! ```
//!
//! All addressing goes through [`slot_index`]. Adding or removing a field
//! inserts or removes one slot per block, shifting every slot above it.
//!
//! Rows live in a [`RowStore`] arena addressed by stable [`RowId`]s. The
//! store also keeps load/insertion order (`all_rows`).

use std::collections::HashSet;
use std::ops::{Index, IndexMut};
use std::sync::Arc;

use slotmap::{SlotMap, new_key_type};

use crate::transport::RequestId;
use crate::validate::CellErrors;
use crate::value::Value;

new_key_type! {
    /// Stable identifier of a row within one dataset.
    pub struct RowId;
}

/// Kind of per-cell state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CellKey {
    /// Committed value.
    Val,
    /// Value as last entered, valid or not.
    InputVal,
    /// Value before the current edit session.
    OldVal,
    /// Value before the last change.
    PrevVal,
    /// Validation results.
    Errors,
    /// Whether the value differs from `OldVal`.
    Modified,
}

impl CellKey {
    /// Every key, in block order.
    pub const ALL: [CellKey; 6] = [
        CellKey::Val,
        CellKey::InputVal,
        CellKey::OldVal,
        CellKey::PrevVal,
        CellKey::Errors,
        CellKey::Modified,
    ];

    fn block(self) -> usize {
        self as usize
    }
}

const BLOCKS: usize = CellKey::ALL.len();

/// Address of state `key` of field `fi` in a row with `field_count` fields.
#[inline]
pub fn slot_index(key: CellKey, fi: usize, field_count: usize) -> usize {
    debug_assert!(fi < field_count);
    key.block() * field_count + fi
}

/// Content of one slot.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Slot {
    /// State never written.
    #[default]
    Empty,
    Value(Value),
    Errors(CellErrors),
    Flag(bool),
}

/// Row-level validation error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowError {
    pub message: String,
    /// Leaving the row is blocked while this error is set.
    pub must_not_allow_exit_row: bool,
    /// Reported by the server on save.
    pub server: bool,
}

impl RowError {
    /// A client-side row error.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            must_not_allow_exit_row: false,
            server: false,
        }
    }

    /// A server-reported row error.
    pub fn server(message: impl Into<String>) -> Self {
        Self {
            server: true,
            ..Self::new(message)
        }
    }
}

/// Row-level state tags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowTags {
    pub is_new: bool,
    pub removed: bool,
    pub modified: bool,
    /// Row error or any cell error.
    pub has_errors: bool,
    pub error: Option<RowError>,
    pub can_remove: bool,
    pub can_change: bool,
    pub focusable: bool,
    /// In-flight save holding this row.
    pub save_request: Option<RequestId>,
    pub collapsed: bool,
    pub parent_collapsed: bool,
}

impl Default for RowTags {
    fn default() -> Self {
        Self {
            is_new: false,
            removed: false,
            modified: false,
            has_errors: false,
            error: None,
            can_remove: true,
            can_change: true,
            focusable: true,
            save_request: None,
            collapsed: false,
            parent_collapsed: false,
        }
    }
}

/// Row-level state kind, reported in change notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RowKey {
    IsNew,
    Removed,
    Modified,
    HasErrors,
    Error,
    SaveRequest,
    Collapsed,
    ParentCollapsed,
}

impl RowTags {
    /// Keys whose value differs between `self` and `other`.
    pub fn diff(&self, other: &RowTags) -> Vec<RowKey> {
        let mut keys = Vec::new();
        let mut check = |changed: bool, key| {
            if changed {
                keys.push(key);
            }
        };
        check(self.is_new != other.is_new, RowKey::IsNew);
        check(self.removed != other.removed, RowKey::Removed);
        check(self.modified != other.modified, RowKey::Modified);
        check(self.has_errors != other.has_errors, RowKey::HasErrors);
        check(self.error != other.error, RowKey::Error);
        check(self.save_request != other.save_request, RowKey::SaveRequest);
        check(self.collapsed != other.collapsed, RowKey::Collapsed);
        check(self.parent_collapsed != other.parent_collapsed, RowKey::ParentCollapsed);
        keys
    }
}

/// Parent/child links of a row in a hierarchical dataset.
#[derive(Debug, Clone, Default)]
pub struct TreeLinks {
    pub parent_row: Option<RowId>,
    pub child_rows: Vec<RowId>,
    /// Ancestors, nearest first. Siblings share one allocation.
    pub parent_rows: Arc<[RowId]>,
}

static NULL: Value = Value::Null;

/// One row: value and shadow-state slots plus tags.
#[derive(Debug, Clone)]
pub struct Row {
    slots: Vec<Slot>,
    field_count: usize,
    pub tags: RowTags,
    pub tree: TreeLinks,
    /// Position in the dataset's visible projection.
    pub row_index: Option<usize>,
}

impl Row {
    /// Create a row from committed values.
    pub fn new(vals: Vec<Value>) -> Self {
        let field_count = vals.len();
        let mut slots = Vec::with_capacity(field_count * BLOCKS);
        slots.extend(vals.into_iter().map(Slot::Value));
        slots.resize(field_count * BLOCKS, Slot::Empty);
        Self {
            slots,
            field_count,
            tags: RowTags::default(),
            tree: TreeLinks::default(),
            row_index: None,
        }
    }

    /// Number of fields.
    pub fn field_count(&self) -> usize {
        self.field_count
    }

    /// Raw slot access.
    pub fn slot(&self, key: CellKey, fi: usize) -> &Slot {
        &self.slots[slot_index(key, fi, self.field_count)]
    }

    /// Raw slot write.
    pub fn set_slot(&mut self, key: CellKey, fi: usize, slot: Slot) {
        let i = slot_index(key, fi, self.field_count);
        self.slots[i] = slot;
    }

    fn value_slot(&self, key: CellKey, fi: usize) -> Option<&Value> {
        match self.slot(key, fi) {
            Slot::Value(v) => Some(v),
            _ => None,
        }
    }

    /// Committed value.
    pub fn val(&self, fi: usize) -> &Value {
        self.value_slot(CellKey::Val, fi).unwrap_or(&NULL)
    }

    /// Set the committed value.
    pub fn set_val(&mut self, fi: usize, value: Value) {
        self.set_slot(CellKey::Val, fi, Slot::Value(value));
    }

    /// Committed values in storage order.
    pub fn vals(&self) -> Vec<Value> {
        (0..self.field_count).map(|fi| self.val(fi).clone()).collect()
    }

    /// Last entered value; the committed value if never edited.
    pub fn input_val(&self, fi: usize) -> &Value {
        self.value_slot(CellKey::InputVal, fi)
            .unwrap_or_else(|| self.val(fi))
    }

    /// Value before the edit session; the committed value if unmodified.
    pub fn old_val(&self, fi: usize) -> &Value {
        self.value_slot(CellKey::OldVal, fi)
            .unwrap_or_else(|| self.val(fi))
    }

    /// Value before the last change; the committed value if unchanged.
    pub fn prev_val(&self, fi: usize) -> &Value {
        self.value_slot(CellKey::PrevVal, fi)
            .unwrap_or_else(|| self.val(fi))
    }

    /// Validation results of a cell.
    pub fn errors(&self, fi: usize) -> Option<&CellErrors> {
        match self.slot(CellKey::Errors, fi) {
            Slot::Errors(errors) => Some(errors),
            _ => None,
        }
    }

    /// Returns `true` if the cell failed validation.
    pub fn cell_has_errors(&self, fi: usize) -> bool {
        self.errors(fi).is_some_and(|e| !e.passed)
    }

    /// Returns `true` if the cell differs from its pre-edit value.
    pub fn modified(&self, fi: usize) -> bool {
        matches!(self.slot(CellKey::Modified, fi), Slot::Flag(true))
    }

    /// Returns `true` if any cell failed validation.
    pub fn any_cell_errors(&self) -> bool {
        (0..self.field_count).any(|fi| self.cell_has_errors(fi))
    }

    /// Returns `true` if any cell is modified.
    pub fn any_cell_modified(&self) -> bool {
        (0..self.field_count).any(|fi| self.modified(fi))
    }

    /// Recompute the cached `has_errors` tag.
    pub fn update_has_errors(&mut self) {
        self.tags.has_errors = self.tags.error.is_some() || self.any_cell_errors();
    }

    /// Forget all shadow state of a cell.
    pub fn clear_cell_state(&mut self, fi: usize) {
        for key in &CellKey::ALL[1..] {
            self.set_slot(*key, fi, Slot::Empty);
        }
    }

    /// Insert a field at `fi`, shifting slots above it.
    pub fn insert_field(&mut self, fi: usize, value: Value) {
        let n = self.field_count;
        assert!(fi <= n, "field index out of range");
        for key in CellKey::ALL.iter().rev() {
            let slot = if *key == CellKey::Val {
                Slot::Value(value.clone())
            } else {
                Slot::Empty
            };
            self.slots.insert(key.block() * n + fi, slot);
        }
        self.field_count += 1;
    }

    /// Remove the field at `fi`, shifting slots above it.
    pub fn remove_field(&mut self, fi: usize) {
        let n = self.field_count;
        assert!(fi < n, "field index out of range");
        for key in CellKey::ALL.iter().rev() {
            self.slots.remove(key.block() * n + fi);
        }
        self.field_count -= 1;
    }
}

/// Arena of rows in load/insertion order.
#[derive(Debug, Default)]
pub struct RowStore {
    rows: SlotMap<RowId, Row>,
    all: Vec<RowId>,
    field_count: usize,
}

impl RowStore {
    /// Create an empty store for rows of `field_count` fields.
    pub fn new(field_count: usize) -> Self {
        Self {
            rows: SlotMap::with_key(),
            all: Vec::new(),
            field_count,
        }
    }

    /// Number of fields per row.
    pub fn field_count(&self) -> usize {
        self.field_count
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.all.len()
    }

    /// Returns `true` if the store holds no rows.
    pub fn is_empty(&self) -> bool {
        self.all.is_empty()
    }

    /// Row ids in load/insertion order.
    pub fn all_rows(&self) -> &[RowId] {
        &self.all
    }

    /// Returns `true` if `id` refers to a live row.
    pub fn contains(&self, id: RowId) -> bool {
        self.rows.contains_key(id)
    }

    pub fn get(&self, id: RowId) -> Option<&Row> {
        self.rows.get(id)
    }

    pub fn get_mut(&mut self, id: RowId) -> Option<&mut Row> {
        self.rows.get_mut(id)
    }

    /// Append a row. Missing values are null; extra values are dropped.
    pub fn push(&mut self, vals: Vec<Value>) -> RowId {
        let at = self.all.len();
        self.insert(at, vals)
    }

    /// Insert a row at position `at` of `all_rows`.
    pub fn insert(&mut self, at: usize, mut vals: Vec<Value>) -> RowId {
        vals.resize(self.field_count, Value::Null);
        let id = self.rows.insert(Row::new(vals));
        self.all.insert(at.min(self.all.len()), id);
        id
    }

    /// Remove a row.
    pub fn remove(&mut self, id: RowId) -> Option<Row> {
        let row = self.rows.remove(id)?;
        self.all.retain(|&r| r != id);
        Some(row)
    }

    /// Rearrange a subset of rows: the positions held by the rows of
    /// `order` are refilled with them in the given sequence. Other rows
    /// keep their positions.
    pub fn reorder(&mut self, order: &[RowId]) {
        let members: HashSet<RowId> = order.iter().copied().collect();
        let mut next = order.iter().copied().filter(|id| self.rows.contains_key(*id));
        for slot in &mut self.all {
            if members.contains(&*slot) {
                if let Some(id) = next.next() {
                    *slot = id;
                }
            }
        }
    }

    /// Remove every row.
    pub fn clear(&mut self) {
        self.rows.clear();
        self.all.clear();
    }

    /// Remove every row and change the field count.
    pub fn reset(&mut self, field_count: usize) {
        self.clear();
        self.field_count = field_count;
    }

    /// Insert a field slot at `fi` in every row.
    pub fn insert_field(&mut self, fi: usize, value: &Value) {
        for row in self.rows.values_mut() {
            row.insert_field(fi, value.clone());
        }
        self.field_count += 1;
    }

    /// Remove the field slot at `fi` from every row.
    pub fn remove_field(&mut self, fi: usize) {
        for row in self.rows.values_mut() {
            row.remove_field(fi);
        }
        self.field_count -= 1;
    }

    /// Iterate rows in load/insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (RowId, &Row)> {
        self.all.iter().filter_map(|&id| self.rows.get(id).map(|row| (id, row)))
    }
}

impl Index<RowId> for RowStore {
    type Output = Row;

    fn index(&self, id: RowId) -> &Row {
        &self.rows[id]
    }
}

impl IndexMut<RowId> for RowStore {
    fn index_mut(&mut self, id: RowId) -> &mut Row {
        &mut self.rows[id]
    }
}
