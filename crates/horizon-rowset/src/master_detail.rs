//! Master-detail parameter propagation.
//!
//! A detail dataset is filtered (or reloaded) by values of the rows
//! selected in its master. The mapping is written
//! `"param1[=master_col1] param2[=master_col2] ..."`; a bare name uses the
//! same column name on both sides.
//!
//! ```text
//!  master.selected_rows_changed ──► ParamVals ──► detail.set_param_vals
//!                                                   ├─ server-backed: reload(params)
//!                                                   └─ client-backed: refilter + refocus
//! ```

use std::sync::{Arc, Weak};

use horizon_rowset_core::{ConnectionId, targets};
use parking_lot::RwLock;

use crate::events::{NavSignals, SelectionSnapshot};
use crate::filter::ParamVals;
use crate::nav::Nav;
use crate::registry::SharedNav;
use crate::transport::ParamSet;

/// One `param=master_col` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamMapping {
    /// Column of the detail dataset (and request parameter name).
    pub param: String,
    /// Column of the master dataset.
    pub master_col: String,
}

/// Parse `"param1[=master_col1] ..."`.
pub fn parse_params(params: &str) -> Vec<ParamMapping> {
    params
        .split_whitespace()
        .map(|entry| match entry.split_once('=') {
            Some((param, col)) => ParamMapping {
                param: param.to_string(),
                master_col: col.to_string(),
            },
            None => ParamMapping {
                param: entry.to_string(),
                master_col: entry.to_string(),
            },
        })
        .collect()
}

/// Parameter values for a master selection: one set per selected row, or
/// [`ParamVals::Unavailable`] when nothing is selected.
pub fn param_vals(mapping: &[ParamMapping], selection: &SelectionSnapshot) -> ParamVals {
    if selection.is_empty() {
        return ParamVals::Unavailable;
    }
    let sets = (0..selection.rows.len())
        .map(|i| {
            mapping
                .iter()
                .map(|m| {
                    let value = selection.val(i, &m.master_col).cloned().unwrap_or_default();
                    (m.param.clone(), value)
                })
                .collect::<ParamSet>()
        })
        .collect();
    ParamVals::Vals(sets)
}

/// A live master-detail link. Dropping it disconnects the detail.
pub struct ParamBinding {
    master: Arc<NavSignals>,
    connection: ConnectionId,
    detail: Weak<RwLock<Nav>>,
    mapping: Vec<ParamMapping>,
}

impl std::fmt::Debug for ParamBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParamBinding")
            .field("mapping", &self.mapping)
            .field("detail_alive", &(self.detail.strong_count() > 0))
            .finish_non_exhaustive()
    }
}

impl ParamBinding {
    /// Bind `detail` to the selection of `master`.
    ///
    /// An empty `params` falls back to the detail's configured `params`.
    /// The detail is synchronized with the current selection immediately.
    ///
    /// # Panics
    ///
    /// Panics if `master` and `detail` are the same dataset.
    pub fn bind(master: &SharedNav, detail: &SharedNav, params: &str) -> Self {
        assert!(!Arc::ptr_eq(master, detail), "a dataset cannot be its own master");
        let mapping = if params.trim().is_empty() {
            parse_params(detail.read().config().params.as_deref().unwrap_or_default())
        } else {
            parse_params(params)
        };
        let (signals, snapshot) = {
            let master = master.read();
            (master.signals().clone(), master.selection_snapshot())
        };

        let weak = Arc::downgrade(detail);
        let slot_mapping = mapping.clone();
        let connection = signals.selected_rows_changed.connect(move |selection| {
            let Some(detail) = weak.upgrade() else {
                return;
            };
            let vals = param_vals(&slot_mapping, selection);
            detail.write().set_param_vals(vals);
        });

        detail.write().set_param_vals(param_vals(&mapping, &snapshot));
        tracing::debug!(target: targets::PARAMS, params = ?mapping, "detail bound");
        Self {
            master: signals,
            connection,
            detail: Arc::downgrade(detail),
            mapping,
        }
    }

    pub fn mapping(&self) -> &[ParamMapping] {
        &self.mapping
    }

    /// Disconnect the detail. Its rows stay filtered by the last values.
    pub fn unbind(self) {}
}

impl Drop for ParamBinding {
    fn drop(&mut self) {
        self.master.selected_rows_changed.disconnect(self.connection);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    #[test]
    fn test_parse_params() {
        let mapping = parse_params("country_id=id  region");
        assert_eq!(
            mapping,
            vec![
                ParamMapping {
                    param: "country_id".into(),
                    master_col: "id".into()
                },
                ParamMapping {
                    param: "region".into(),
                    master_col: "region".into()
                },
            ]
        );
        assert!(parse_params("  ").is_empty());
    }

    #[test]
    fn test_param_vals_per_selected_row() {
        let mapping = parse_params("country_id=id");
        let selection = SelectionSnapshot {
            fields: vec!["id".into(), "name".into()],
            rows: vec![vec![1.into(), "a".into()], vec![2.into(), "b".into()]],
        };
        let ParamVals::Vals(sets) = param_vals(&mapping, &selection) else {
            panic!("expected values");
        };
        assert_eq!(sets.len(), 2);
        assert_eq!(sets[1]["country_id"], Value::Int(2));
        assert_eq!(
            param_vals(&mapping, &SelectionSnapshot::default()),
            ParamVals::Unavailable
        );
    }
}
