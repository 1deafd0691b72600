//! Outbound notifications of a dataset.
//!
//! Views connect to the signals in [`NavSignals`]. Fine-grained signals
//! (`cell_state_changed`, `rows_added`, ...) fire as changes happen; the
//! coarse `updated` signal fires once per outermost operation with the
//! union of everything the operation touched.

use horizon_rowset_core::{Coalesce, ConnectionId, Signal};

use crate::error::TransportError;
use crate::row::{CellKey, RowId, RowKey, Slot};
use crate::value::Value;

/// One changed `(row, field, key)` state slot.
#[derive(Debug, Clone, PartialEq)]
pub struct CellStateChange {
    pub row: RowId,
    /// Field name.
    pub col: String,
    /// Field storage index.
    pub fi: usize,
    pub key: CellKey,
    /// New slot content.
    pub value: Slot,
}

/// Changed row-level tags of one row.
#[derive(Debug, Clone, PartialEq)]
pub struct RowStateChange {
    pub row: RowId,
    pub keys: Vec<RowKey>,
}

/// Focus position after a focus change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FocusChange {
    pub row: Option<RowId>,
    pub row_index: Option<usize>,
    pub fi: Option<usize>,
}

/// Values of the selected rows, copied out so observers need no access to
/// the dataset that emitted them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SelectionSnapshot {
    /// Field names, in storage order.
    pub fields: Vec<String>,
    /// Committed values of each selected row, in row-index order.
    pub rows: Vec<Vec<Value>>,
}

impl SelectionSnapshot {
    /// Value of `col` in selected row `i`.
    pub fn val(&self, i: usize, col: &str) -> Option<&Value> {
        let fi = self.fields.iter().position(|f| f == col)?;
        self.rows.get(i)?.get(fi)
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Severity of a user notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyKind {
    Info,
    Error,
}

/// What an outermost operation touched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateFlags {
    /// The visible projection changed (rows added, removed, reordered).
    pub rows: bool,
    /// Cell or row state changed.
    pub state: bool,
    /// Fields were added, removed, shown, hidden or moved.
    pub fields: bool,
    pub focus: bool,
    pub selection: bool,
    pub sort: bool,
}

impl UpdateFlags {
    const NONE: Self = Self {
        rows: false,
        state: false,
        fields: false,
        focus: false,
        selection: false,
        sort: false,
    };
    pub const ROWS: Self = Self { rows: true, ..Self::NONE };
    pub const STATE: Self = Self { state: true, ..Self::NONE };
    pub const FIELDS: Self = Self { fields: true, ..Self::NONE };
    pub const FOCUS: Self = Self { focus: true, ..Self::NONE };
    pub const SELECTION: Self = Self { selection: true, ..Self::NONE };
    pub const SORT: Self = Self { sort: true, ..Self::NONE };

    /// Union of two flag sets.
    pub fn union(self, other: Self) -> Self {
        Self {
            rows: self.rows || other.rows,
            state: self.state || other.state,
            fields: self.fields || other.fields,
            focus: self.focus || other.focus,
            selection: self.selection || other.selection,
            sort: self.sort || other.sort,
        }
    }
}

impl Coalesce for UpdateFlags {
    fn coalesce(&mut self, other: Self) {
        *self = self.union(other);
    }

    fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Every signal a dataset emits.
#[derive(Debug, Default)]
pub struct NavSignals {
    pub rows_added: Signal<Vec<RowId>>,
    pub rows_removed: Signal<Vec<RowId>>,
    /// Rows whose values changed in place (merge, save result, upsert).
    pub rows_changed: Signal<Vec<RowId>>,
    /// Rows moved to a new position, in their new order.
    pub rows_moved: Signal<Vec<RowId>>,
    pub cell_state_changed: Signal<CellStateChange>,
    pub row_state_changed: Signal<RowStateChange>,
    pub focused_row_changed: Signal<FocusChange>,
    pub selected_rows_changed: Signal<SelectionSnapshot>,
    /// New order-by, formatted.
    pub sort_order_changed: Signal<String>,
    /// Display values changed; `Some(col)` for one column, `None` for all.
    pub display_vals_changed: Signal<Option<String>>,
    /// The dataset was rebuilt from a new document.
    pub reset: Signal<()>,
    pub loading: Signal<bool>,
    pub load_fail: Signal<TransportError>,
    pub saving: Signal<bool>,
    pub save_fail: Signal<TransportError>,
    pub notify: Signal<(NotifyKind, String)>,
    /// A picker chose the row through [`crate::Nav::pick_near_val`].
    pub val_picked: Signal<RowId>,
    pub updated: Signal<UpdateFlags>,
}

impl NavSignals {
    /// Connect to `cell_state_changed` for one column only.
    pub fn connect_cell_state_for<F>(&self, col: impl Into<String>, slot: F) -> ConnectionId
    where
        F: Fn(&CellStateChange) + Send + Sync + 'static,
    {
        let col = col.into();
        self.cell_state_changed.connect_filtered(move |change| change.col == col, slot)
    }

    /// Connect to `display_vals_changed` for one column (and to
    /// all-column changes).
    pub fn connect_display_vals_for<F>(&self, col: impl Into<String>, slot: F) -> ConnectionId
    where
        F: Fn(&Option<String>) + Send + Sync + 'static,
    {
        let col = col.into();
        self.display_vals_changed
            .connect_filtered(move |changed| changed.as_ref().is_none_or(|c| *c == col), slot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_update_flags_coalesce() {
        let mut flags = UpdateFlags::ROWS;
        flags.coalesce(UpdateFlags::FOCUS);
        assert!(flags.rows && flags.focus);
        assert!(!flags.sort);
        assert!(UpdateFlags::default().is_empty());
        assert!(!flags.is_empty());
    }

    #[test]
    fn test_connect_cell_state_for_filters_by_column() {
        let signals = NavSignals::default();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        signals.connect_cell_state_for("qty", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let change = |col: &str| CellStateChange {
            row: RowId::default(),
            col: col.to_string(),
            fi: 0,
            key: CellKey::Val,
            value: Slot::Value(Value::Int(1)),
        };
        signals.cell_state_changed.emit(change("qty"));
        signals.cell_state_changed.emit(change("name"));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_connect_display_vals_for_sees_global_changes() {
        let signals = NavSignals::default();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        signals.connect_display_vals_for("region", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        signals.display_vals_changed.emit(Some("region".into()));
        signals.display_vals_changed.emit(Some("name".into()));
        signals.display_vals_changed.emit(None);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_selection_snapshot_lookup() {
        let snapshot = SelectionSnapshot {
            fields: vec!["id".into(), "region".into()],
            rows: vec![vec![Value::Int(1), Value::from("EU")]],
        };
        assert_eq!(snapshot.val(0, "region"), Some(&Value::from("EU")));
        assert_eq!(snapshot.val(1, "region"), None);
        assert_eq!(snapshot.val(0, "missing"), None);
    }
}
