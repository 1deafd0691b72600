//! Runtime field changes and the visible field list.

use horizon_rowset_core::targets;

use super::Nav;
use crate::events::UpdateFlags;
use crate::field::{FieldAttrs, FieldHooks};
use crate::schema::ColumnRef;

impl Nav {
    /// Append a field; every row gets the field's default value.
    pub fn add_field(&mut self, attrs: FieldAttrs) -> usize {
        self.batch(|nav| {
            let mut doc_attrs = attrs.clone();
            let fi = nav.schema.add_field(attrs);
            let field = nav.schema.field(fi);
            let default = field.default.clone();
            doc_attrs.name = Some(field.name.clone());
            nav.store.insert_field(fi, &default);
            nav.doc.fields.insert(fi.min(nav.doc.fields.len()), doc_attrs);
            for vals in &mut nav.doc.rows {
                if vals.len() >= fi {
                    vals.insert(fi, default.clone());
                }
            }
            nav.fields_changed();
            fi
        })
    }

    /// Remove a field from the schema and every row.
    ///
    /// # Panics
    ///
    /// Panics if the column does not exist.
    pub fn remove_field(&mut self, col: impl ColumnRef) {
        let fi = self.schema.index(col);
        self.batch(|nav| {
            let field = nav.schema.remove_field(fi);
            nav.store.remove_field(fi);
            if fi < nav.doc.fields.len() {
                nav.doc.fields.remove(fi);
                for vals in &mut nav.doc.rows {
                    if fi < vals.len() {
                        vals.remove(fi);
                    }
                }
            }
            nav.focus.field_removed(fi);
            nav.validators.remove(&field.name);
            nav.pk.retain(|c| *c != field.name);
            let cols = [
                &mut nav.id_col,
                &mut nav.parent_col,
                &mut nav.pos_col,
                &mut nav.name_col,
                &mut nav.tree_col,
            ];
            for col in cols {
                if col.as_deref() == Some(field.name.as_str()) {
                    *col = None;
                }
            }
            nav.order_by.0.retain(|(c, _)| *c != field.name);
            if nav.filter.as_ref().is_some_and(|f| f.mentions(&field.name)) {
                tracing::warn!(target: targets::SCHEMA, field = %field.name, "filter dropped with its column");
                nav.filter = None;
            }
            nav.relink_tree();
            nav.fields_changed();
            nav.refocus();
        });
    }

    /// Recompile everything that captured field indices.
    fn fields_changed(&mut self) {
        self.index.invalidate();
        self.compile_sort();
        self.recompile_filter();
        self.reproject();
        self.touch(UpdateFlags::FIELDS);
        self.signals.display_vals_changed.emit(None);
    }

    /// Show or hide a field, optionally at display position `at`.
    pub fn show_field(&mut self, col: impl ColumnRef, on: bool, at: Option<usize>) {
        let fi = self.schema.index(col);
        self.schema.show_field(fi, on, at);
        if !on && self.focus.fi == Some(fi) {
            self.refocus_field();
        }
        self.touch(UpdateFlags::FIELDS);
    }

    /// Move the visible field at display position `vi` over `over_vi`.
    pub fn move_field(&mut self, vi: usize, over_vi: usize) {
        self.schema.move_field(vi, over_vi);
        self.touch(UpdateFlags::FIELDS);
    }

    /// Override attributes of a column at runtime.
    pub fn set_col_attr(&mut self, col: impl ColumnRef, attrs: FieldAttrs) {
        let fi = self.schema.index(col);
        self.batch(|nav| {
            let exclusion_changed = attrs.exclude_vals.is_some();
            nav.schema.set_col_attr(fi, attrs);
            if exclusion_changed {
                nav.recompile_filter();
                nav.reproject();
                nav.refocus();
            }
            if nav.schema.visible_index(fi).is_none() && nav.focus.fi == Some(fi) {
                nav.refocus_field();
            }
            nav.touch(UpdateFlags::FIELDS);
            nav.signals
                .display_vals_changed
                .emit(Some(nav.schema.field(fi).name.clone()));
        });
    }

    /// Install value hooks (comparator, formatter, converter) on a column.
    pub fn set_field_hooks(&mut self, col: impl ColumnRef, hooks: FieldHooks) {
        let fi = self.schema.index(col);
        self.schema.field_mut(fi).hooks = hooks;
        self.batch(|nav| {
            nav.compile_sort();
            nav.recompile_filter();
            nav.reproject();
            nav.signals
                .display_vals_changed
                .emit(Some(nav.schema.field(fi).name.clone()));
        });
    }

    /// Move focus off a field that stopped being visible.
    fn refocus_field(&mut self) {
        let ri = self.focused_row_index();
        self.focus.fi = None;
        self.focus.editing = false;
        self.focus_cell(ri, Some(0), 0, 0, &super::FocusOpts::default());
    }
}
