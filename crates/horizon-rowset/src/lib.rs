//! Horizon Rowset - an in-memory dataset engine for data-bound views.
//!
//! A [`Nav`] is the data-binding core that grids, dropdowns, forms and
//! pickers delegate to. It owns a typed field schema, rows with per-cell
//! edit/error state, lazy multi-key indices, a composed sort comparator,
//! parent/child trees, a compiled row filter, a validation pipeline and
//! change tracking with save/revert against a remote store.
//!
//! The engine performs no I/O and knows nothing about rendering. Views read
//! through accessors, send intents (`focus_cell`, `set_cell_val`,
//! `insert_rows`, ...) and observe the signals in [`NavSignals`]. Loads and
//! saves go through a [`Transport`] whose completions are fed back with
//! [`Nav::handle_transport_event`].
//!
//! # Example
//!
//! ```
//! use horizon_rowset::{FieldAttrs, FieldType, Nav, NavConfig, RowsetDoc, Value};
//!
//! let doc = RowsetDoc {
//!     fields: vec![
//!         FieldAttrs::named("id").with_type(FieldType::Number),
//!         FieldAttrs::named("qty").with_type(FieldType::Number).with_range(Some(0.0), None),
//!     ],
//!     rows: vec![vec![1.into(), 5.into()]],
//!     pk: Some(vec!["id".into()]),
//!     ..Default::default()
//! };
//! let mut nav = Nav::from_doc(NavConfig::default(), doc);
//! let row = nav.row_id(0).unwrap();
//!
//! nav.set_cell_val(row, "qty", -1).unwrap();
//! assert!(nav.cell_has_errors(row, "qty"));
//! assert_eq!(nav.cell_val(row, "qty"), &Value::Int(5));
//! ```

pub mod config;
pub mod error;
pub mod events;
pub mod field;
pub mod filter;
pub mod index;
pub mod master_detail;
pub mod nav;
pub mod registry;
pub mod row;
pub mod schema;
pub mod sort;
pub mod transport;
pub mod tree;
pub mod validate;
pub mod value;

pub use config::{NavConfig, Permissions, SaveTrigger};
pub use error::{NavError, Result, TransportError};
pub use events::{
    CellStateChange, FocusChange, NavSignals, NotifyKind, RowStateChange, SelectionSnapshot,
    UpdateFlags,
};
pub use field::{Align, Field, FieldAttrs, FieldHooks, FieldType, LookupLink};
pub use filter::{CmpOp, FilterExpr, ParamVals, and_filter};
pub use index::{IndexNode, RangeDef, RowGroup};
pub use master_detail::{ParamBinding, ParamMapping};
pub use nav::{
    CellStateDoc, FocusOpts, InsertOptions, Nav, RowMove, RowSelection, RowState, RowValues,
    SaveOutcome,
};
pub use registry::{DatasetRegistry, SharedNav};
pub use row::{CellKey, RowError, RowId, RowKey, RowTags, Slot};
pub use schema::{ColumnRef, Schema};
pub use sort::{DirChange, OrderBy, SortDir};
pub use transport::{
    ChangeKind, ChangeSet, LoadRequest, ParamSet, Pending, QueuedTransport, RequestId, RowChange,
    RowErrorDoc, RowResult, RowsetDoc, SaveRequest, SaveResult, Transport, TransportEvent,
};
pub use validate::{CellErrors, RowValidator, ValidationCtx, ValidationResult, Validator, Verdict};
pub use value::Value;
