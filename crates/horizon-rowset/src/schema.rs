//! Schema registry: the ordered field list of a dataset.
//!
//! The schema owns field definitions in storage order (the order of value
//! slots in every row) and a separate, derived list of visible fields that
//! views display. Moving or hiding a column never touches row storage;
//! adding or removing a field does, and the owning dataset is responsible
//! for renumbering the row slots alongside (see [`crate::row::RowStore`]).

use std::collections::HashMap;
use std::fmt;

use horizon_rowset_core::targets;

use crate::field::{Field, FieldAttrs, unique_name};

/// Something that names a column: a field name or a storage index.
pub trait ColumnRef: fmt::Display {
    /// Resolve to a storage index, if the column exists.
    fn field_index(&self, schema: &Schema) -> Option<usize>;
}

impl ColumnRef for usize {
    fn field_index(&self, schema: &Schema) -> Option<usize> {
        (*self < schema.len()).then_some(*self)
    }
}

impl ColumnRef for &str {
    fn field_index(&self, schema: &Schema) -> Option<usize> {
        schema.by_name.get(*self).copied()
    }
}

impl ColumnRef for String {
    fn field_index(&self, schema: &Schema) -> Option<usize> {
        schema.by_name.get(self.as_str()).copied()
    }
}

impl ColumnRef for &String {
    fn field_index(&self, schema: &Schema) -> Option<usize> {
        schema.by_name.get(self.as_str()).copied()
    }
}

/// Ordered field definitions plus the visible-column projection.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    fields: Vec<Field>,
    by_name: HashMap<String, usize>,
    /// Rowset-supplied attributes, parallel to `fields`.
    source: Vec<FieldAttrs>,
    col_attrs: HashMap<String, FieldAttrs>,
    prop_col_attrs: HashMap<String, FieldAttrs>,
    cols: Option<Vec<String>>,
    visible: Vec<usize>,
}

impl Schema {
    /// Build a schema from rowset-supplied field attributes.
    pub fn new(fields: &[FieldAttrs], col_attrs: HashMap<String, FieldAttrs>) -> Self {
        let mut schema = Self {
            col_attrs,
            ..Default::default()
        };
        for attrs in fields {
            schema.insert_field(schema.len(), attrs.clone());
        }
        schema
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns `true` if there are no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// All fields in storage order.
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Field at a storage index.
    pub fn field(&self, fi: usize) -> &Field {
        &self.fields[fi]
    }

    pub(crate) fn field_mut(&mut self, fi: usize) -> &mut Field {
        &mut self.fields[fi]
    }

    /// Resolve a column, returning `None` if it does not exist.
    pub fn try_index(&self, col: impl ColumnRef) -> Option<usize> {
        col.field_index(self)
    }

    /// Resolve a column.
    ///
    /// # Panics
    ///
    /// Panics if the column does not exist; referring to a missing column is
    /// a caller bug.
    pub fn index(&self, col: impl ColumnRef) -> usize {
        match col.field_index(self) {
            Some(fi) => fi,
            None => panic!("unknown column '{col}'"),
        }
    }

    /// Field names in storage order.
    pub fn names(&self) -> Vec<String> {
        self.fields.iter().map(|f| f.name.clone()).collect()
    }

    /// Insert a field at storage index `fi` and return its index.
    ///
    /// Fields at `fi` and above shift up by one. The caller must insert the
    /// matching row slots.
    pub fn insert_field(&mut self, fi: usize, mut attrs: FieldAttrs) -> usize {
        let fi = fi.min(self.fields.len());
        let name = unique_name(attrs.name.as_deref(), fi, |n| self.by_name.contains_key(n));
        attrs.name = Some(name.clone());

        self.source.insert(fi, attrs);
        let field = self.build_field(&name, fi);
        self.fields.insert(fi, field);
        self.renumber();
        self.update_visible();
        tracing::debug!(target: targets::SCHEMA, field = %name, fi, "field added");
        fi
    }

    /// Append a field and return its index.
    pub fn add_field(&mut self, attrs: FieldAttrs) -> usize {
        self.insert_field(self.fields.len(), attrs)
    }

    /// Remove a field.
    ///
    /// Fields above `fi` shift down by one. The caller must remove the
    /// matching row slots.
    pub fn remove_field(&mut self, fi: usize) -> Field {
        let field = self.fields.remove(fi);
        self.source.remove(fi);
        self.renumber();
        if let Some(cols) = &mut self.cols {
            cols.retain(|c| *c != field.name);
        }
        self.update_visible();
        tracing::debug!(target: targets::SCHEMA, field = %field.name, fi, "field removed");
        field
    }

    /// Replace the per-instance override layer of a column and re-resolve it.
    pub fn set_col_attr(&mut self, fi: usize, attrs: FieldAttrs) {
        let name = self.fields[fi].name.clone();
        self.prop_col_attrs.entry(name).or_default().merge(&attrs);
        self.reresolve(fi);
        self.update_visible();
    }

    fn build_field(&self, name: &str, fi: usize) -> Field {
        let empty = FieldAttrs::default();
        let col = self.col_attrs.get(name).unwrap_or(&empty);
        let prop = self.prop_col_attrs.get(name).unwrap_or(&empty);
        Field::resolve(name.to_string(), fi, &[&self.source[fi], col, prop])
    }

    fn reresolve(&mut self, fi: usize) {
        let old = &self.fields[fi];
        let mut field = self.build_field(&old.name, fi);
        field.hooks = old.hooks.clone();
        field.sort_dir = old.sort_dir;
        field.sort_priority = old.sort_priority;
        self.fields[fi] = field;
    }

    fn renumber(&mut self) {
        self.by_name.clear();
        for (fi, field) in self.fields.iter_mut().enumerate() {
            field.val_index = fi;
            self.by_name.insert(field.name.clone(), fi);
        }
    }

    // visible fields -------------------------------------------------------

    /// Storage indices of the visible fields, in display order.
    pub fn visible_fields(&self) -> &[usize] {
        &self.visible
    }

    /// Display position of a field, if visible.
    pub fn visible_index(&self, fi: usize) -> Option<usize> {
        self.visible.iter().position(|&v| v == fi)
    }

    /// Set the explicit display order (`None` shows all visible fields in
    /// storage order). Unknown names are ignored.
    pub fn set_cols(&mut self, cols: Option<Vec<String>>) {
        self.cols = cols;
        self.update_visible();
    }

    /// Show or hide a field, optionally at display position `at`.
    pub fn show_field(&mut self, fi: usize, on: bool, at: Option<usize>) {
        let name = self.fields[fi].name.clone();
        let mut cols: Vec<String> = self
            .visible
            .iter()
            .map(|&v| self.fields[v].name.clone())
            .filter(|n| *n != name)
            .collect();
        if on {
            let at = at.unwrap_or(cols.len()).min(cols.len());
            cols.insert(at, name);
            if !self.fields[fi].visible {
                self.set_col_attr(fi, FieldAttrs::default().with_visible(true));
            }
        }
        self.set_cols(Some(cols));
    }

    /// Move the visible field at display position `vi` over position
    /// `over_vi`.
    pub fn move_field(&mut self, vi: usize, over_vi: usize) {
        let len = self.visible.len();
        assert!(vi < len && over_vi <= len, "move_field out of range");
        let insert_vi = if over_vi > vi { over_vi - 1 } else { over_vi };
        let mut cols: Vec<String> = self.visible.iter().map(|&v| self.fields[v].name.clone()).collect();
        let name = cols.remove(vi);
        cols.insert(insert_vi.min(cols.len()), name);
        self.set_cols(Some(cols));
    }

    fn update_visible(&mut self) {
        self.visible = match &self.cols {
            Some(cols) => cols
                .iter()
                .filter_map(|c| self.by_name.get(c).copied())
                .filter(|&fi| self.fields[fi].visible)
                .collect(),
            None => (0..self.fields.len()).filter(|&fi| self.fields[fi].visible).collect(),
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::FieldType;

    fn schema() -> Schema {
        Schema::new(
            &[
                FieldAttrs::named("id").with_type(FieldType::Number),
                FieldAttrs::named("name"),
                FieldAttrs::named("qty").with_type(FieldType::Number),
            ],
            HashMap::new(),
        )
    }

    fn visible_names(schema: &Schema) -> Vec<&str> {
        schema
            .visible_fields()
            .iter()
            .map(|&fi| schema.field(fi).name.as_str())
            .collect()
    }

    #[test]
    fn test_resolve_columns() {
        let schema = schema();
        assert_eq!(schema.index("qty"), 2);
        assert_eq!(schema.index(1usize), 1);
        assert_eq!(schema.try_index("missing"), None);
        assert_eq!(schema.try_index(7usize), None);
    }

    #[test]
    #[should_panic(expected = "unknown column 'missing'")]
    fn test_unknown_column_panics() {
        schema().index("missing");
    }

    #[test]
    fn test_insert_and_remove_renumber() {
        let mut schema = schema();
        let fi = schema.insert_field(1, FieldAttrs::named("name"));
        assert_eq!(fi, 1);
        assert_eq!(schema.names(), vec!["id", "name2", "name", "qty"]);
        assert_eq!(schema.field(3).val_index, 3);
        assert_eq!(schema.index("qty"), 3);

        let removed = schema.remove_field(0);
        assert_eq!(removed.name, "id");
        assert_eq!(schema.names(), vec!["name2", "name", "qty"]);
        assert_eq!(schema.index("qty"), 2);
        assert_eq!(schema.field(2).val_index, 2);
    }

    #[test]
    fn test_col_attrs_layer() {
        let mut col_attrs = HashMap::new();
        col_attrs.insert("qty".to_string(), FieldAttrs::default().with_range(Some(0.0), Some(5.0)));
        let mut schema = Schema::new(&[FieldAttrs::named("qty").with_type(FieldType::Number)], col_attrs);
        assert_eq!(schema.field(0).max, Some(5.0));

        schema.set_col_attr(0, FieldAttrs::default().with_editable(false));
        assert!(!schema.field(0).editable);
        assert_eq!(schema.field(0).max, Some(5.0));
    }

    #[test]
    fn test_hidden_fields_and_cols() {
        let mut schema = Schema::new(
            &[
                FieldAttrs::named("id").with_visible(false),
                FieldAttrs::named("name"),
                FieldAttrs::named("qty"),
            ],
            HashMap::new(),
        );
        assert_eq!(visible_names(&schema), vec!["name", "qty"]);

        schema.set_cols(Some(vec!["qty".into(), "id".into(), "nope".into(), "name".into()]));
        assert_eq!(visible_names(&schema), vec!["qty", "name"]);

        schema.show_field(0, true, Some(0));
        assert_eq!(visible_names(&schema), vec!["id", "qty", "name"]);

        schema.show_field(1, false, None);
        assert_eq!(visible_names(&schema), vec!["id", "qty"]);
    }

    #[test]
    fn test_move_field() {
        let mut schema = schema();
        schema.move_field(0, 3);
        assert_eq!(visible_names(&schema), vec!["name", "qty", "id"]);
        schema.move_field(2, 0);
        assert_eq!(visible_names(&schema), vec!["id", "name", "qty"]);
        schema.move_field(0, 2);
        assert_eq!(visible_names(&schema), vec!["name", "id", "qty"]);
        assert_eq!(schema.visible_index(0), Some(1));
    }
}
