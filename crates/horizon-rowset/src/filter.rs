//! Row filtering.
//!
//! A [`FilterExpr`] is compiled once per filter change into a
//! [`RowPredicate`] closure with every column already resolved, so
//! evaluating it per row never consults the schema. The visible-row
//! predicate of a dataset is the conjunction of its master-detail parameter
//! filter and the per-field exclude sets ([`compose`]).

use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;

use horizon_rowset_core::targets;

use crate::row::Row;
use crate::schema::Schema;
use crate::transport::ParamSet;
use crate::value::Value;

/// A compiled row predicate.
pub type RowPredicate = Arc<dyn Fn(&Row) -> bool + Send + Sync>;

/// Comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOp {
    fn test(self, ordering: Ordering) -> bool {
        match self {
            CmpOp::Eq => ordering == Ordering::Equal,
            CmpOp::Ne => ordering != Ordering::Equal,
            CmpOp::Lt => ordering == Ordering::Less,
            CmpOp::Le => ordering != Ordering::Greater,
            CmpOp::Gt => ordering == Ordering::Greater,
            CmpOp::Ge => ordering != Ordering::Less,
        }
    }
}

/// Boolean filter expression over column comparisons.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterExpr {
    And(Vec<FilterExpr>),
    Or(Vec<FilterExpr>),
    Not(Box<FilterExpr>),
    Cmp { col: String, op: CmpOp, value: Value },
}

impl FilterExpr {
    /// `col op value`.
    pub fn cmp(col: impl Into<String>, op: CmpOp, value: impl Into<Value>) -> Self {
        FilterExpr::Cmp {
            col: col.into(),
            op,
            value: value.into(),
        }
    }

    /// `col == value`.
    pub fn eq(col: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::cmp(col, CmpOp::Eq, value)
    }

    /// Negation.
    pub fn negate(self) -> Self {
        FilterExpr::Not(Box::new(self))
    }

    /// Returns `true` if any comparison names `col`.
    pub fn mentions(&self, col: &str) -> bool {
        match self {
            FilterExpr::And(parts) | FilterExpr::Or(parts) => parts.iter().any(|p| p.mentions(col)),
            FilterExpr::Not(inner) => inner.mentions(col),
            FilterExpr::Cmp { col: c, .. } => c == col,
        }
    }

    /// Compile into a predicate.
    ///
    /// # Panics
    ///
    /// Panics if a comparison names a column that does not exist.
    pub fn compile(&self, schema: &Schema) -> RowPredicate {
        match self {
            FilterExpr::And(parts) => {
                let parts: Vec<RowPredicate> = parts.iter().map(|p| p.compile(schema)).collect();
                Arc::new(move |row| parts.iter().all(|p| p(row)))
            }
            FilterExpr::Or(parts) => {
                let parts: Vec<RowPredicate> = parts.iter().map(|p| p.compile(schema)).collect();
                Arc::new(move |row| parts.iter().any(|p| p(row)))
            }
            FilterExpr::Not(inner) => {
                let inner = inner.compile(schema);
                Arc::new(move |row| !inner(row))
            }
            FilterExpr::Cmp { col, op, value } => {
                let fi = schema.index(col.as_str());
                let (op, value) = (*op, value.clone());
                let compare = schema.field(fi).hooks.compare_vals.clone();
                Arc::new(move |row| {
                    let ordering = match &compare {
                        Some(compare) => compare(row.val(fi), &value),
                        None => row.val(fi).compare(&value),
                    };
                    op.test(ordering)
                })
            }
        }
    }
}

/// Equality filter: one `col == val` per pair, combined with AND.
pub fn and_filter(cols: &[&str], vals: &[Value]) -> FilterExpr {
    FilterExpr::And(
        cols.iter()
            .zip(vals)
            .map(|(col, val)| FilterExpr::eq(*col, val.clone()))
            .collect(),
    )
}

/// Master-detail parameter state of a detail dataset.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum ParamVals {
    /// The dataset is not bound to a master.
    #[default]
    NoParams,
    /// Bound, but the master has no selection: nothing is visible.
    Unavailable,
    /// One parameter set per selected master row.
    Vals(Vec<ParamSet>),
}

impl ParamVals {
    /// Parameter sets, if available.
    pub fn sets(&self) -> Option<&[ParamSet]> {
        match self {
            ParamVals::Vals(sets) => Some(sets),
            _ => None,
        }
    }

    /// First parameter set.
    pub fn first(&self) -> Option<&ParamSet> {
        self.sets().and_then(<[ParamSet]>::first)
    }
}

/// Filter matching any of the parameter sets. Parameters without a column
/// of the same name are ignored.
pub fn param_filter(schema: &Schema, sets: &[ParamSet]) -> FilterExpr {
    FilterExpr::Or(
        sets.iter()
            .map(|set| {
                FilterExpr::And(
                    set.iter()
                        .filter(|(param, _)| schema.try_index(param.as_str()).is_some())
                        .map(|(param, val)| FilterExpr::eq(param.clone(), val.clone()))
                        .collect(),
                )
            })
            .collect(),
    )
}

/// Predicate hiding rows whose value for a field is in that field's
/// `exclude_vals`. `None` when no field excludes anything.
pub fn exclude_predicate(schema: &Schema) -> Option<RowPredicate> {
    let excludes: Vec<(usize, HashSet<Value>)> = schema
        .fields()
        .iter()
        .filter_map(|field| {
            let vals = field.exclude_vals.as_ref().filter(|v| !v.is_empty())?;
            Some((field.val_index, vals.iter().cloned().collect()))
        })
        .collect();
    if excludes.is_empty() {
        return None;
    }
    Some(Arc::new(move |row| {
        excludes.iter().all(|(fi, vals)| !vals.contains(row.val(*fi)))
    }))
}

/// Compose the visible-row predicate.
///
/// `params` is applied only when `filter_by_params` is set (client-backed
/// detail datasets; server-backed ones reload instead). Returns `None`
/// when every row is visible.
pub fn compose(
    schema: &Schema,
    params: &ParamVals,
    filter_by_params: bool,
    extra: Option<&FilterExpr>,
) -> Option<RowPredicate> {
    let mut parts: Vec<RowPredicate> = Vec::new();
    if filter_by_params {
        match params {
            ParamVals::NoParams => {}
            ParamVals::Unavailable => parts.push(Arc::new(|_| false)),
            ParamVals::Vals(sets) => parts.push(param_filter(schema, sets).compile(schema)),
        }
    }
    if let Some(exclude) = exclude_predicate(schema) {
        parts.push(exclude);
    }
    if let Some(extra) = extra {
        parts.push(extra.compile(schema));
    }
    tracing::debug!(target: targets::FILTER, parts = parts.len(), "row filter compiled");
    match parts.len() {
        0 => None,
        1 => parts.pop(),
        _ => Some(Arc::new(move |row| parts.iter().all(|p| p(row)))),
    }
}
