//! Sort engine.
//!
//! An order-by (`"region name:desc"`) is compiled once into a chain of
//! comparator closures; sorting then never re-reads order-by metadata.
//!
//! Precedence, for equal earlier steps:
//!
//! 1. rows with errors first (once, at the head of the chain)
//! 2. per order-by key, in order:
//!    - rows whose cell for that key failed validation after valid ones
//!    - modified rows after unmodified ones
//!    - the field's value comparator, in the key's direction
//! 3. without an explicit order-by, the position field ascending
//!
//! Hierarchical datasets compare rows at their nearest differing ancestors
//! so children always stay inside their parent's block
//! ([`compare_in_tree`]).

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;

use horizon_rowset_core::{PerfSpan, targets};
use serde::{Deserialize, Serialize};

use crate::field::CompareValsFn;
use crate::row::{Row, RowId, RowStore};
use crate::schema::Schema;

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDir {
    Asc,
    Desc,
}

impl SortDir {
    /// Apply the direction to an ascending comparison.
    pub fn apply(self, ordering: Ordering) -> Ordering {
        match self {
            SortDir::Asc => ordering,
            SortDir::Desc => ordering.reverse(),
        }
    }
}

/// Requested direction change for [`crate::Nav::set_order_by_dir`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirChange {
    /// Set a direction, or remove the column from the order-by.
    Set(Option<SortDir>),
    /// Cycle asc, desc, none.
    Toggle,
}

impl DirChange {
    /// Resolve against the current direction.
    pub fn resolve(self, current: Option<SortDir>) -> Option<SortDir> {
        match self {
            DirChange::Set(dir) => dir,
            DirChange::Toggle => match current {
                None => Some(SortDir::Asc),
                Some(SortDir::Asc) => Some(SortDir::Desc),
                Some(SortDir::Desc) => None,
            },
        }
    }
}

/// Ordered list of sort keys.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrderBy(pub Vec<(String, SortDir)>);

impl OrderBy {
    /// Parse `"col1 col2:desc"`. Whitespace and commas separate entries.
    pub fn parse(s: &str) -> Self {
        let entries = s
            .split(|c: char| c.is_whitespace() || c == ',')
            .filter(|part| !part.is_empty())
            .map(|part| match part.split_once(':') {
                Some((col, dir)) if dir.eq_ignore_ascii_case("desc") => (col.to_string(), SortDir::Desc),
                Some((col, _)) => (col.to_string(), SortDir::Asc),
                None => (part.to_string(), SortDir::Asc),
            })
            .collect();
        Self(entries)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Direction of a column, if it is a key.
    pub fn dir(&self, col: &str) -> Option<SortDir> {
        self.0.iter().find(|(c, _)| c == col).map(|(_, d)| *d)
    }

    /// Set or remove one key.
    ///
    /// With `keep_others` the key is updated in place (or appended);
    /// otherwise it replaces the whole order-by.
    pub fn set(&mut self, col: &str, dir: Option<SortDir>, keep_others: bool) {
        if !keep_others {
            self.0.retain(|(c, _)| c == col);
        }
        match (self.0.iter().position(|(c, _)| c == col), dir) {
            (Some(i), Some(dir)) => self.0[i].1 = dir,
            (Some(i), None) => {
                self.0.remove(i);
            }
            (None, Some(dir)) => self.0.push((col.to_string(), dir)),
            (None, None) => {}
        }
    }
}

impl fmt::Display for OrderBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .0
            .iter()
            .map(|(col, dir)| match dir {
                SortDir::Asc => col.clone(),
                SortDir::Desc => format!("{col}:desc"),
            })
            .collect();
        f.write_str(&parts.join(" "))
    }
}

/// A compiled row comparator.
pub type RowCmp = Box<dyn Fn(&Row, &Row) -> Ordering + Send + Sync>;

fn chain(first: RowCmp, next: RowCmp) -> RowCmp {
    Box::new(move |a, b| first(a, b).then_with(|| next(a, b)))
}

fn value_step(fi: usize, dir: SortDir, compare: Option<CompareValsFn>) -> RowCmp {
    match compare {
        Some(compare) => {
            Box::new(move |a: &Row, b: &Row| dir.apply(compare(a.val(fi), b.val(fi)))) as RowCmp
        }
        None => Box::new(move |a: &Row, b: &Row| dir.apply(a.val(fi).compare(b.val(fi)))),
    }
}

/// Compile an order-by into a comparator.
///
/// Unknown columns are skipped. `pos_fi` is used when the order-by is
/// empty; `tree_id_fi` is appended in hierarchical datasets so sibling order
/// is total. Returns `None` when there is nothing to sort by.
pub fn compile(
    schema: &Schema,
    order_by: &OrderBy,
    pos_fi: Option<usize>,
    tree_id_fi: Option<usize>,
) -> Option<RowCmp> {
    let mut keys: Vec<(usize, SortDir)> = order_by
        .0
        .iter()
        .filter_map(|(col, dir)| schema.try_index(col.as_str()).map(|fi| (fi, *dir)))
        .collect();

    let mut steps: Vec<RowCmp> = Vec::new();
    if keys.is_empty() {
        if let Some(pos) = pos_fi {
            steps.push(value_step(pos, SortDir::Asc, None));
        }
    } else {
        steps.push(Box::new(|a: &Row, b: &Row| b.tags.has_errors.cmp(&a.tags.has_errors)));
        if let Some(id) = tree_id_fi {
            if !keys.iter().any(|(fi, _)| *fi == id) {
                keys.push((id, SortDir::Asc));
            }
        }
        for (fi, dir) in keys {
            steps.push(Box::new(move |a: &Row, b: &Row| {
                a.cell_has_errors(fi).cmp(&b.cell_has_errors(fi))
            }));
            steps.push(Box::new(|a: &Row, b: &Row| a.tags.modified.cmp(&b.tags.modified)));
            steps.push(value_step(fi, dir, schema.field(fi).hooks.compare_vals.clone()));
        }
    }

    let mut steps = steps.into_iter();
    let first = steps.next()?;
    tracing::trace!(target: targets::SORT, order_by = %order_by, "comparator compiled");
    Some(steps.fold(first, chain))
}

/// Compare two rows of a hierarchical dataset.
///
/// Rows are compared with `cmp` at their nearest differing ancestors; when
/// one row is an ancestor of the other, the ancestor comes first.
pub fn compare_in_tree(
    store: &RowStore,
    a: RowId,
    b: RowId,
    cmp: impl Fn(RowId, RowId) -> Ordering,
) -> Ordering {
    let (pa, pb) = (&store[a].tree.parent_rows, &store[b].tree.parent_rows);
    let (mut i, mut j) = (pa.len(), pb.len());
    while i > 0 && j > 0 && pa[i - 1] == pb[j - 1] {
        i -= 1;
        j -= 1;
    }
    let na = if i > 0 { pa[i - 1] } else { a };
    let nb = if j > 0 { pb[j - 1] } else { b };
    if na == nb {
        return i.cmp(&j);
    }
    cmp(na, nb)
}

/// Sort row ids in place.
///
/// Hierarchical sorts fall back to load order for ties so the result is a
/// total order.
pub fn sort_rows(store: &RowStore, rows: &mut [RowId], cmp: Option<&RowCmp>, tree: bool) {
    let _span = PerfSpan::new("sort_rows");
    match (cmp, tree) {
        (Some(cmp), false) => rows.sort_by(|&a, &b| cmp(&store[a], &store[b])),
        (None, false) => {}
        (cmp, true) => {
            let position: HashMap<RowId, usize> =
                store.all_rows().iter().enumerate().map(|(i, &id)| (id, i)).collect();
            let by_key = |x: RowId, y: RowId| {
                cmp.map_or(Ordering::Equal, |cmp| cmp(&store[x], &store[y]))
                    .then_with(|| position.get(&x).cmp(&position.get(&y)))
            };
            rows.sort_by(|&a, &b| compare_in_tree(store, a, b, &by_key));
        }
    }
    tracing::trace!(target: targets::SORT, rows = rows.len(), tree, "rows sorted");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::{FieldAttrs, FieldType};
    use crate::row::{CellKey, RowError, Slot};
    use crate::validate::CellErrors;
    use crate::value::Value;
    use std::sync::Arc;

    fn fixture() -> (Schema, RowStore, Vec<RowId>) {
        let schema = Schema::new(
            &[
                FieldAttrs::named("name"),
                FieldAttrs::named("qty").with_type(FieldType::Number),
            ],
            HashMap::new(),
        );
        let mut store = RowStore::new(2);
        let rows = vec![
            store.push(vec![Value::from("b"), Value::Int(2)]),
            store.push(vec![Value::from("a"), Value::Null]),
            store.push(vec![Value::from("c"), Value::Int(1)]),
            store.push(vec![Value::from("a"), Value::Int(3)]),
        ];
        (schema, store, rows)
    }

    fn sorted(schema: &Schema, store: &RowStore, order_by: &str) -> Vec<RowId> {
        let cmp = compile(schema, &OrderBy::parse(order_by), None, None);
        let mut rows = store.all_rows().to_vec();
        sort_rows(store, &mut rows, cmp.as_ref(), false);
        rows
    }

    #[test]
    fn test_parse_and_display() {
        let order = OrderBy::parse("region  name:desc,qty:asc");
        assert_eq!(
            order.0,
            vec![
                ("region".to_string(), SortDir::Asc),
                ("name".to_string(), SortDir::Desc),
                ("qty".to_string(), SortDir::Asc),
            ]
        );
        assert_eq!(order.to_string(), "region name:desc qty");
    }

    #[test]
    fn test_set_and_toggle() {
        let mut order = OrderBy::parse("a b:desc");
        order.set("b", DirChange::Toggle.resolve(order.dir("b")), true);
        assert_eq!(order.to_string(), "a");
        order.set("c", DirChange::Toggle.resolve(order.dir("c")), true);
        assert_eq!(order.to_string(), "a c");
        order.set("c", DirChange::Toggle.resolve(order.dir("c")), false);
        assert_eq!(order.to_string(), "c:desc");
    }

    #[test]
    fn test_multi_key_sort_nulls_first() {
        let (schema, store, rows) = fixture();
        assert_eq!(sorted(&schema, &store, "name qty:desc"), vec![rows[3], rows[1], rows[0], rows[2]]);
        assert_eq!(sorted(&schema, &store, "qty"), vec![rows[1], rows[2], rows[0], rows[3]]);
        assert_eq!(sorted(&schema, &store, ""), store.all_rows().to_vec());
        assert_eq!(sorted(&schema, &store, "nope"), store.all_rows().to_vec());
    }

    #[test]
    fn test_invalid_rows_first_and_modified_rows_last() {
        let (schema, mut store, rows) = fixture();
        store[rows[1]].tags.modified = true;
        assert_eq!(sorted(&schema, &store, "name"), vec![rows[3], rows[0], rows[2], rows[1]]);

        store[rows[0]].tags.error = Some(RowError::new("bad"));
        store[rows[0]].update_has_errors();
        assert_eq!(sorted(&schema, &store, "name"), vec![rows[0], rows[3], rows[2], rows[1]]);
    }

    #[test]
    fn test_cell_errors_sort_after_valid() {
        let (schema, mut store, rows) = fixture();
        let errors = CellErrors::server("rejected");
        store[rows[3]].set_slot(CellKey::Errors, 0, Slot::Errors(errors));
        // has_errors is left unset so only the per-key rule applies
        assert_eq!(sorted(&schema, &store, "name"), vec![rows[1], rows[0], rows[2], rows[3]]);
    }

    #[test]
    fn test_position_field_fallback_and_override() {
        let (mut schema, store, rows) = fixture();
        let cmp = compile(&schema, &OrderBy::default(), Some(1), None);
        let mut order = store.all_rows().to_vec();
        sort_rows(&store, &mut order, cmp.as_ref(), false);
        assert_eq!(order, vec![rows[1], rows[2], rows[0], rows[3]]);

        schema.field_mut(0).hooks.compare_vals = Some(Arc::new(|a: &Value, b: &Value| b.compare(a)));
        assert_eq!(sorted(&schema, &store, "name")[0], rows[2]);
    }

    #[test]
    fn test_tree_comparison_keeps_children_with_parent() {
        let (schema, mut store, rows) = fixture();
        // rows[2] ("c") is the parent of rows[1] ("a")
        let chain: Arc<[RowId]> = Arc::from(vec![rows[2]]);
        store[rows[1]].tree.parent_rows = chain;
        let cmp = compile(&schema, &OrderBy::parse("name"), None, None);
        let mut order = store.all_rows().to_vec();
        sort_rows(&store, &mut order, cmp.as_ref(), true);
        assert_eq!(order, vec![rows[3], rows[0], rows[2], rows[1]]);
    }
}
