//! Dataset configuration.
//!
//! [`NavConfig`] carries the permission flags, editing policies and binding
//! options of one dataset. It deserializes from TOML with every key
//! optional:
//!
//! ```
//! use horizon_rowset::{NavConfig, SaveTrigger};
//!
//! let config = NavConfig::from_toml_str(r#"
//!     rowset_name = "orders"
//!     order_by = "customer date:desc"
//!     save_row_on = "exit_row"
//!
//!     [col_attrs.qty]
//!     min = 0
//! "#).unwrap();
//! assert_eq!(config.save_row_on, SaveTrigger::ExitRow);
//! assert!(config.can_edit);
//! ```

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::field::FieldAttrs;
use crate::transport::RowsetDoc;

/// When a changed row is saved automatically.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SaveTrigger {
    /// On every accepted cell change.
    Input,
    /// When the editor is closed.
    #[default]
    ExitEdit,
    /// When focus leaves the row.
    ExitRow,
    /// Only through an explicit save.
    Manual,
}

/// Configuration of one dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NavConfig {
    // permissions
    pub can_edit: bool,
    pub can_add_rows: bool,
    pub can_remove_rows: bool,
    pub can_change_rows: bool,
    pub can_move_rows: bool,
    /// Moved rows may land under another parent.
    pub can_change_parent: bool,
    pub can_sort_rows: bool,
    pub can_focus_cells: bool,
    pub can_select_multiple: bool,
    pub can_select_non_siblings: bool,

    // focus behavior
    pub auto_focus_first_cell: bool,
    pub auto_edit_first_cell: bool,
    pub stay_in_edit_mode: bool,
    pub auto_advance_row: bool,

    // save policy
    pub save_row_on: SaveTrigger,
    pub save_new_row_on: SaveTrigger,
    pub save_row_remove_on: SaveTrigger,
    /// `input` or `manual`.
    pub save_row_move_on: SaveTrigger,
    pub can_exit_edit_on_errors: bool,
    pub can_exit_row_on_errors: bool,
    /// Client-only rowsets keep full cell state instead of plain values.
    pub save_row_states: bool,
    /// Reconcile reloads by primary key instead of resetting.
    pub merge_on_reload: bool,

    // binding
    /// Registry name.
    pub rowset_name: Option<String>,
    /// Load and save endpoint of a server-backed rowset.
    pub rowset_url: Option<String>,
    pub order_by: Option<String>,
    /// Explicit visible columns, in display order.
    pub cols: Option<Vec<String>>,
    /// Master-detail parameter mapping, `"param[=master_col] ..."`.
    pub params: Option<String>,
    pub quicksearch_col: Option<String>,
    /// Column naming a row, shown by pickers and lookups.
    pub name_col: Option<String>,
    /// Column carrying the tree expanders; the name column by default.
    pub tree_col: Option<String>,
    /// Per-column attribute overrides.
    pub col_attrs: HashMap<String, FieldAttrs>,
}

impl Default for NavConfig {
    fn default() -> Self {
        Self {
            can_edit: true,
            can_add_rows: true,
            can_remove_rows: true,
            can_change_rows: true,
            can_move_rows: true,
            can_change_parent: true,
            can_sort_rows: true,
            can_focus_cells: true,
            can_select_multiple: true,
            can_select_non_siblings: true,
            auto_focus_first_cell: true,
            auto_edit_first_cell: false,
            stay_in_edit_mode: true,
            auto_advance_row: false,
            save_row_on: SaveTrigger::ExitEdit,
            save_new_row_on: SaveTrigger::ExitRow,
            save_row_remove_on: SaveTrigger::ExitRow,
            save_row_move_on: SaveTrigger::Input,
            can_exit_edit_on_errors: true,
            can_exit_row_on_errors: false,
            save_row_states: false,
            merge_on_reload: true,
            rowset_name: None,
            rowset_url: None,
            order_by: None,
            cols: None,
            params: None,
            quicksearch_col: None,
            name_col: None,
            tree_col: None,
            col_attrs: HashMap::new(),
        }
    }
}

impl NavConfig {
    /// Parse a TOML configuration.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        Ok(toml::from_str(s)?)
    }

    /// Builder: set the registry name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.rowset_name = Some(name.into());
        self
    }

    /// Builder: set the endpoint URL.
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.rowset_url = Some(url.into());
        self
    }

    /// Builder: set the master-detail parameter mapping.
    pub fn with_params(mut self, params: impl Into<String>) -> Self {
        self.params = Some(params.into());
        self
    }

    /// Builder: set the initial order-by.
    pub fn with_order_by(mut self, order_by: impl Into<String>) -> Self {
        self.order_by = Some(order_by.into());
        self
    }

    /// Builder: add a per-column attribute override.
    pub fn with_col_attrs(mut self, col: impl Into<String>, attrs: FieldAttrs) -> Self {
        self.col_attrs.insert(col.into(), attrs);
        self
    }
}

/// Effective permissions: configuration ANDed with document flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Permissions {
    pub can_edit: bool,
    pub can_add_rows: bool,
    pub can_remove_rows: bool,
    pub can_change_rows: bool,
    pub can_move_rows: bool,
}

impl Permissions {
    pub fn resolve(config: &NavConfig, doc: &RowsetDoc) -> Self {
        let can_edit = config.can_edit && doc.can_edit.unwrap_or(true);
        Self {
            can_edit,
            can_add_rows: can_edit && config.can_add_rows && doc.can_add_rows.unwrap_or(true),
            can_remove_rows: can_edit && config.can_remove_rows && doc.can_remove_rows.unwrap_or(true),
            can_change_rows: can_edit && config.can_change_rows && doc.can_change_rows.unwrap_or(true),
            can_move_rows: can_edit && config.can_move_rows,
        }
    }
}
