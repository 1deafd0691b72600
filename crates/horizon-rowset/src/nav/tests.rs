use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::*;
use crate::error::NavError;
use crate::field::{FieldAttrs, FieldType};
use crate::sort::{DirChange, SortDir};

fn items_doc() -> RowsetDoc {
    RowsetDoc {
        fields: vec![
            FieldAttrs::named("id").with_type(FieldType::Number),
            FieldAttrs::named("name"),
            FieldAttrs::named("qty")
                .with_type(FieldType::Number)
                .with_range(Some(0.0), None),
        ],
        rows: vec![
            vec![1.into(), "apple".into(), 5.into()],
            vec![2.into(), "banana".into(), 3.into()],
            vec![3.into(), "cherry".into(), 8.into()],
        ],
        pk: Some(vec!["id".to_string()]),
        ..Default::default()
    }
}

fn items() -> Nav {
    Nav::from_doc(NavConfig::default(), items_doc())
}

fn ids(nav: &Nav) -> Vec<i64> {
    nav.rows()
        .iter()
        .map(|&r| nav.cell_val(r, "id").as_i64().unwrap())
        .collect()
}

#[test]
fn test_fresh_cells_read_committed_values() {
    let nav = items();
    let row = nav.row_id(0).unwrap();
    assert_eq!(nav.cell_input_val(row, "qty"), nav.cell_val(row, "qty"));
    assert_eq!(nav.cell_old_val(row, "qty"), &Value::Int(5));
    assert!(!nav.cell_modified(row, "qty"));
    assert!(!nav.has_changes());
}

#[test]
fn test_invalid_input_keeps_committed_value() {
    let mut nav = items();
    let row = nav.row_id(0).unwrap();

    nav.set_cell_val(row, "qty", -1).unwrap();
    assert_eq!(nav.cell_input_val(row, "qty"), &Value::Int(-1));
    assert_eq!(nav.cell_val(row, "qty"), &Value::Int(5));
    assert!(nav.cell_has_errors(row, "qty"));
    assert!(nav.row_has_errors(row));
    assert_eq!(
        nav.cell_errors(row, "qty").and_then(|e| e.first_message()),
        Some("Value must be at least 0")
    );

    nav.set_cell_val(row, "qty", 7).unwrap();
    assert_eq!(nav.cell_val(row, "qty"), &Value::Int(7));
    assert_eq!(nav.cell_input_val(row, "qty"), &Value::Int(7));
    assert!(!nav.cell_has_errors(row, "qty"));
    assert!(nav.cell_modified(row, "qty"));
    assert_eq!(nav.cell_old_val(row, "qty"), &Value::Int(5));

    nav.set_cell_val(row, "qty", 5).unwrap();
    assert!(!nav.cell_modified(row, "qty"));
    assert!(!nav.row_modified(row));
}

#[test]
fn test_cell_state_signal_reports_each_slot_once() {
    let mut nav = items();
    let row = nav.row_id(1).unwrap();
    let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let sink = seen.clone();
    nav.signals().connect_cell_state_for("qty", move |change| sink.lock().push(change.key));

    nav.set_cell_val(row, "qty", 4).unwrap();
    let keys = seen.lock().clone();
    assert!(keys.contains(&CellKey::Val));
    assert!(keys.contains(&CellKey::Modified));
    assert_eq!(keys.iter().filter(|k| **k == CellKey::Val).count(), 1);
}

#[test]
fn test_batch_emits_updated_once() {
    let mut nav = items();
    let count = Arc::new(AtomicUsize::new(0));
    let c = count.clone();
    nav.signals().updated.connect(move |_| {
        c.fetch_add(1, Ordering::SeqCst);
    });

    nav.batch(|nav| {
        let row = nav.row_id(0).unwrap();
        nav.set_cell_val(row, "name", "apricot").unwrap();
        nav.insert_row([("id", 4)]).unwrap();
        nav.set_order_by("name:desc");
    });
    assert_eq!(count.load(Ordering::SeqCst), 1);
}

#[test]
fn test_revert_changes() {
    let mut nav = items();
    let first = nav.row_id(0).unwrap();
    let second = nav.row_id(1).unwrap();
    nav.set_cell_val(first, "name", "apricot").unwrap();
    nav.set_cell_val(first, "qty", -3).unwrap();
    nav.remove_row(second).unwrap();
    let added = nav.insert_row([("id", Value::from(9)), ("name", Value::from("fig"))]).unwrap();
    assert_eq!(nav.row_count(), 3);

    nav.revert_changes();
    assert!(!nav.contains_row(added));
    assert_eq!(nav.cell_val(first, "name"), &Value::from("apple"));
    assert!(!nav.cell_has_errors(first, "qty"));
    assert_eq!(nav.cell_input_val(first, "qty"), &Value::Int(5));
    assert!(!nav.row_tags(second).removed);
    assert_eq!(ids(&nav), vec![1, 2, 3]);
    assert!(!nav.has_changes());
}

#[test]
fn test_duplicate_key_is_a_cell_error() {
    let mut nav = items();
    let row = nav.insert_row([("id", Value::from(2)), ("name", Value::from("dup"))]).unwrap();
    assert!(nav.cell_has_errors(row, "id"));
    assert_eq!(
        nav.cell_errors(row, "id").and_then(|e| e.first_message()),
        Some("Duplicate key")
    );

    nav.set_cell_val(row, "id", 4).unwrap();
    assert!(!nav.row_has_errors(row));
    assert_eq!(nav.lookup(&["id"], &[4.into()]), vec![row]);
}

#[test]
fn test_lookup_excludes_removed_rows() {
    let mut nav = items();
    let row = nav.lookup(&["id"], &[2.into()])[0];
    nav.remove_row(row).unwrap();
    assert!(nav.lookup(&["id"], &[2.into()]).is_empty());
    assert_eq!(nav.row_count(), 2);
}

#[test]
fn test_sort_puts_rows_with_errors_first() {
    let mut nav = items();
    nav.set_order_by("id");
    let last = nav.row_id(2).unwrap();
    nav.set_cell_val(last, "qty", -1).unwrap();
    assert_eq!(ids(&nav), vec![1, 2, 3], "edits do not move rows");

    nav.resort();
    assert_eq!(ids(&nav), vec![3, 1, 2]);
}

#[test]
fn test_sort_puts_modified_rows_after_unmodified() {
    let doc = RowsetDoc {
        fields: vec![FieldAttrs::named("id"), FieldAttrs::named("grp")],
        rows: vec![
            vec!["a".into(), "x".into()],
            vec!["b".into(), "x".into()],
            vec!["c".into(), "x".into()],
        ],
        pk: Some(vec!["id".to_string()]),
        ..Default::default()
    };
    let mut nav = Nav::from_doc(NavConfig::default(), doc);
    nav.set_order_by("grp");
    let first = nav.row_id(0).unwrap();
    nav.set_cell_val(first, "id", "z").unwrap();
    nav.resort();
    assert_eq!(nav.row_id(2), Some(first));
}

#[test]
fn test_order_by_toggle_cycles() {
    let mut nav = items();
    nav.set_order_by_dir("qty", DirChange::Toggle, false).unwrap();
    assert_eq!(nav.order_by().dir("qty"), Some(SortDir::Asc));
    assert_eq!(ids(&nav), vec![2, 1, 3]);
    nav.set_order_by_dir("qty", DirChange::Toggle, false).unwrap();
    assert_eq!(ids(&nav), vec![3, 1, 2]);
    nav.set_order_by_dir("qty", DirChange::Toggle, false).unwrap();
    assert_eq!(nav.order_by().dir("qty"), None);
    assert_eq!(nav.schema().field(2).sort_dir, None);
}

#[test]
fn test_parent_cycle_falls_back_to_flat() {
    let doc = RowsetDoc {
        fields: vec![FieldAttrs::named("id"), FieldAttrs::named("parent_id")],
        rows: vec![vec!["a".into(), "b".into()], vec!["b".into(), "a".into()]],
        pk: Some(vec!["id".to_string()]),
        parent_col: Some("parent_id".to_string()),
        ..Default::default()
    };
    let nav = Nav::from_doc(NavConfig::default(), doc);
    assert!(!nav.is_tree());
    assert_eq!(nav.parent_field(), None);
    assert_eq!(nav.row_count(), 2);
}

#[test]
fn test_tree_children_follow_parent() {
    let doc = RowsetDoc {
        fields: vec![FieldAttrs::named("id"), FieldAttrs::named("parent_id")],
        rows: vec![
            vec!["b".into(), Value::Null],
            vec!["a2".into(), "a".into()],
            vec!["a".into(), Value::Null],
            vec!["a1".into(), "a".into()],
        ],
        pk: Some(vec!["id".to_string()]),
        parent_col: Some("parent_id".to_string()),
        ..Default::default()
    };
    let mut nav = Nav::from_doc(NavConfig::default().with_order_by("id"), doc);
    assert!(nav.is_tree());
    let names: Vec<String> = nav.rows().iter().map(|&r| nav.cell_val(r, "id").to_string()).collect();
    assert_eq!(names, ["a", "a1", "a2", "b"]);

    let a = nav.lookup(&["id"], &["a".into()])[0];
    nav.set_collapsed(a, true, false);
    assert_eq!(nav.row_count(), 2);
    nav.toggle_collapsed(a, false);
    assert_eq!(nav.row_count(), 4);

    let err = nav.change_row_parent(a, Some(nav.lookup(&["id"], &["a1".into()])[0]));
    assert!(matches!(err, Err(NavError::InvalidParent { .. })));
}

#[test]
fn test_exit_row_blocked_by_errors() {
    let mut nav = items();
    assert_eq!(nav.focused_row_index(), Some(0));
    let row = nav.row_id(0).unwrap();
    nav.set_cell_val(row, "qty", -1).unwrap();

    assert!(!nav.focus_cell(Some(1), None, 0, 0, &FocusOpts::default()));
    assert_eq!(nav.focused_row_index(), Some(0));

    nav.set_cell_val(row, "qty", 1).unwrap();
    assert!(nav.focus_cell(Some(1), None, 0, 0, &FocusOpts::default()));
    assert_eq!(nav.focused_row_index(), Some(1));
}

#[test]
fn test_focus_skips_unfocusable_columns() {
    let config = NavConfig::default().with_col_attrs(
        "name",
        FieldAttrs {
            focusable: Some(false),
            ..Default::default()
        },
    );
    let mut nav = Nav::from_doc(config, items_doc());
    assert_eq!(nav.focused_col(), Some(0));
    assert!(nav.focus_next_cell(1, &FocusOpts::default()));
    assert_eq!(nav.focused_field(), Some(2));
    assert!(!nav.focus_next_cell(1, &FocusOpts::default()));
}

#[test]
fn test_expand_selection_from_anchor() {
    let mut nav = items();
    let opts = FocusOpts {
        expand_selection: true,
        ..Default::default()
    };
    assert!(nav.focus_cell(Some(2), Some(1), 0, 0, &opts));
    assert_eq!(nav.selected_rows().len(), 3);
    assert!(nav.is_cell_selected(nav.row_id(1).unwrap(), "name"));
    assert!(!nav.is_cell_selected(nav.row_id(1).unwrap(), "qty"));

    let snapshot = nav.selection_snapshot();
    assert_eq!(snapshot.rows.len(), 3);
    assert_eq!(snapshot.val(0, "name"), Some(&Value::from("apple")));
}

#[test]
fn test_quicksearch_is_cyclic_and_case_insensitive() {
    let mut nav = items();
    assert_eq!(nav.quicksearch("CH", Some("name")), Some(2));
    assert_eq!(nav.focused_row_index(), Some(2));
    assert_eq!(nav.quicksearch("a", Some("name")), Some(0));
    assert_eq!(nav.quicksearch("zzz", Some("name")), None);
}

#[test]
fn test_bool_cells_toggle_on_enter_edit() {
    let doc = RowsetDoc {
        fields: vec![FieldAttrs::named("done").with_type(FieldType::Bool)],
        rows: vec![vec![false.into()]],
        ..Default::default()
    };
    let mut nav = Nav::from_doc(NavConfig::default(), doc);
    assert!(nav.enter_edit());
    let row = nav.row_id(0).unwrap();
    assert_eq!(nav.cell_val(row, "done"), &Value::Bool(true));
    assert!(!nav.is_editing());
}

#[test]
fn test_local_save_commits_rows() {
    let mut nav = items();
    let row = nav.row_id(0).unwrap();
    nav.set_cell_val(row, "qty", 9).unwrap();
    let gone = nav.row_id(1).unwrap();
    nav.remove_row(gone).unwrap();

    assert_eq!(nav.save().unwrap(), SaveOutcome::Committed);
    assert!(!nav.has_changes());
    assert!(!nav.contains_row(gone));
    assert_eq!(nav.rowset_doc().rows.len(), 2);
    assert_eq!(nav.rowset_doc().rows[0][2], Value::Int(9));
    assert_eq!(nav.save().unwrap(), SaveOutcome::NothingToSave);
}

#[test]
fn test_save_rejects_when_every_row_is_invalid() {
    let mut nav = items();
    nav.add_row_validator(RowValidator::new("Name required", |ctx| {
        (!ctx.cell_val("name").is_null()).into()
    }));
    let row = nav.row_id(0).unwrap();
    nav.set_cell_val(row, "name", Value::Null).unwrap();
    assert!(matches!(nav.save(), Err(NavError::InvalidRows { count: 1 })));
    assert_eq!(nav.row_error(row).map(|e| e.message.as_str()), Some("Name required"));
}

#[test]
fn test_row_states_round_trip() {
    let mut nav = Nav::from_doc(
        NavConfig {
            save_row_states: true,
            ..Default::default()
        },
        items_doc(),
    );
    let row = nav.row_id(0).unwrap();
    nav.set_cell_val(row, "name", "apricot").unwrap();
    nav.set_cell_val(row, "qty", -2).unwrap();
    nav.insert_row([("id", 7)]).unwrap();
    nav.remove_row(nav.row_id(1).unwrap()).unwrap();
    assert_eq!(nav.save().unwrap(), SaveOutcome::Committed);
    let states = nav.local_row_states().unwrap().to_vec();

    let json = serde_json::to_string(&states).unwrap();
    let decoded: Vec<RowState> = serde_json::from_str(&json).unwrap();
    assert_eq!(decoded, states);

    let mut restored = Nav::from_doc(NavConfig::default(), items_doc());
    restored.deserialize_all_row_states(&decoded);
    assert_eq!(restored.all_rows().len(), 4);
    assert_eq!(restored.row_count(), 3);
    let first = restored.all_rows()[0];
    assert!(restored.cell_modified(first, "name"));
    assert_eq!(restored.cell_old_val(first, "name"), &Value::from("apple"));
    assert_eq!(restored.cell_input_val(first, "qty"), &Value::Int(-2));
    assert!(restored.cell_has_errors(first, "qty"));
    assert!(restored.row_tags(restored.all_rows()[1]).removed);
    assert!(restored.row_tags(restored.all_rows()[3]).is_new);
    assert_eq!(restored.serialize_all_row_states(), states);
}

#[test]
fn test_row_vals_skip_defaults() {
    let mut doc = items_doc();
    doc.fields[2] = doc.fields[2].clone().with_default(0);
    let mut nav = Nav::from_doc(NavConfig::default(), doc);
    let row = nav.row_id(1).unwrap();
    nav.set_cell_val(row, "qty", 0).unwrap();
    let vals = nav.serialize_all_row_vals();
    assert_eq!(vals[1].get("qty"), None);
    assert_eq!(vals[0].get("qty"), Some(&Value::Int(5)));

    nav.deserialize_all_row_vals(&vals);
    let row = nav.row_id(1).unwrap();
    assert_eq!(nav.cell_val(row, "qty"), &Value::Int(0));
}

#[test]
fn test_diff_merge_preserves_local_edits() {
    let mut nav = items();
    let apple = nav.row_id(0).unwrap();
    let banana = nav.row_id(1).unwrap();
    nav.set_cell_val(apple, "qty", 6).unwrap();
    let local = nav.insert_row([("id", Value::from(10)), ("name", Value::from("kiwi"))]).unwrap();

    let mut server = items_doc();
    server.rows = vec![
        vec![1.into(), "Apple".into(), 50.into()],
        vec![3.into(), "cherry".into(), 8.into()],
        vec![4.into(), "date".into(), 1.into()],
    ];
    nav.diff_merge(server);

    assert!(!nav.contains_row(banana));
    assert!(nav.contains_row(local));
    assert_eq!(nav.cell_val(apple, "name"), &Value::from("Apple"));
    assert_eq!(nav.cell_val(apple, "qty"), &Value::Int(6));
    assert_eq!(nav.cell_old_val(apple, "qty"), &Value::Int(50));
    assert!(nav.cell_modified(apple, "qty"));
    assert_eq!(nav.lookup(&["id"], &[4.into()]).len(), 1);
    assert_eq!(nav.row_count(), 4);
}

#[test]
fn test_diff_merge_resets_on_schema_change() {
    let mut nav = items();
    let row = nav.row_id(0).unwrap();
    nav.set_cell_val(row, "qty", 6).unwrap();
    let mut server = items_doc();
    server.fields.push(FieldAttrs::named("price"));
    nav.diff_merge(server);
    assert!(!nav.contains_row(row));
    assert_eq!(nav.schema().len(), 4);
    assert!(!nav.has_changes());
}

#[test]
fn test_add_and_remove_field_keep_cells_aligned() {
    let mut nav = items();
    let row = nav.row_id(0).unwrap();
    let fi = nav.add_field(FieldAttrs::named("note").with_default("-"));
    assert_eq!(fi, 3);
    assert_eq!(nav.cell_val(row, "note"), &Value::from("-"));

    nav.set_cell_val(row, "qty", 2).unwrap();
    nav.remove_field("name");
    assert_eq!(nav.schema().index("qty"), 1);
    assert_eq!(nav.cell_val(row, "qty"), &Value::Int(2));
    assert!(nav.cell_modified(row, "qty"));
    assert_eq!(nav.cell_val(row, "note"), &Value::from("-"));
}

#[test]
fn test_exclude_vals_hide_rows() {
    let mut nav = items();
    nav.set_exclude_vals("name", vec!["banana".into()]);
    assert_eq!(ids(&nav), vec![1, 3]);
    nav.set_filter(Some(FilterExpr::cmp("qty", crate::filter::CmpOp::Gt, 5)));
    assert_eq!(ids(&nav), vec![3]);
}

#[test]
fn test_permissions_refuse_edits() {
    let config = NavConfig {
        can_change_rows: false,
        ..Default::default()
    };
    let mut nav = Nav::from_doc(config, items_doc());
    let row = nav.row_id(0).unwrap();
    assert!(matches!(
        nav.set_cell_val(row, "qty", 1),
        Err(NavError::NotPermitted { operation: "change rows" })
    ));
    let added = nav.insert_row([("id", 5)]).unwrap();
    assert!(nav.set_cell_val(added, "qty", 1).is_ok());
}

fn tree_doc(rows: &[(&str, Option<&str>)]) -> RowsetDoc {
    RowsetDoc {
        fields: vec![FieldAttrs::named("id"), FieldAttrs::named("parent_id")],
        rows: rows
            .iter()
            .map(|&(id, parent)| vec![Value::from(id), parent.map_or(Value::Null, Value::from)])
            .collect(),
        pk: Some(vec!["id".to_string()]),
        parent_col: Some("parent_id".to_string()),
        ..Default::default()
    }
}

fn row_by_id(nav: &Nav, id: &str) -> RowId {
    nav.lookup(&["id"], &[Value::from(id)])[0]
}

fn tree_ids(nav: &Nav) -> Vec<String> {
    nav.rows().iter().map(|&r| nav.cell_val(r, "id").to_string()).collect()
}

#[test]
fn test_reparent_out_of_collapsed_parent_shows_row() {
    let mut nav = Nav::from_doc(NavConfig::default(), tree_doc(&[("a", None), ("a1", Some("a"))]));
    let (a, a1) = (row_by_id(&nav, "a"), row_by_id(&nav, "a1"));
    nav.set_collapsed(a, true, false);
    assert_eq!(nav.row_count(), 1);

    nav.change_row_parent(a1, None).unwrap();
    assert_eq!(nav.row_count(), 2);
    assert!(nav.row_visible(a1));
    assert_eq!(nav.cell_val(a1, "parent_id"), &Value::Null);
}

#[test]
fn test_set_collapsed_all() {
    let doc = tree_doc(&[("a", None), ("a1", Some("a")), ("b", None), ("b1", Some("b"))]);
    let mut nav = Nav::from_doc(NavConfig::default(), doc);
    nav.set_collapsed_all(true);
    assert_eq!(tree_ids(&nav), ["a", "b"]);
    assert!(!nav.row(row_by_id(&nav, "a1")).tags.collapsed);

    nav.set_collapsed_all(false);
    assert_eq!(nav.row_count(), 4);
}

fn positioned_doc() -> RowsetDoc {
    RowsetDoc {
        fields: vec![
            FieldAttrs::named("id").with_type(FieldType::Number),
            FieldAttrs::named("name"),
            FieldAttrs::named("pos").with_type(FieldType::Number),
        ],
        rows: vec![
            vec![1.into(), "apple".into(), 1.into()],
            vec![2.into(), "banana".into(), 2.into()],
            vec![3.into(), "cherry".into(), 3.into()],
        ],
        pk: Some(vec!["id".to_string()]),
        pos_col: Some("pos".to_string()),
        ..Default::default()
    }
}

#[test]
fn test_move_renumbers_positions() {
    let mut nav = Nav::from_doc(NavConfig::default(), positioned_doc());
    let moved = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let sink = moved.clone();
    nav.signals().rows_moved.connect(move |rows| sink.lock().extend(rows.iter().copied()));

    assert!(nav.focus_cell(Some(1), None, 0, 0, &FocusOpts::default()));
    let mv = nav.start_move_selected_rows().unwrap();
    let banana = nav.row_id(1).unwrap();
    assert_eq!(mv.rows(), [banana]);
    assert_eq!(mv.insert_range(), 0..=2);

    nav.finish_move_rows(mv, 0, None).unwrap();
    assert_eq!(ids(&nav), vec![2, 1, 3]);
    let pos: Vec<&Value> = nav.rows().iter().map(|&r| nav.cell_val(r, "pos")).collect();
    assert_eq!(pos, [&Value::Int(1), &Value::Int(2), &Value::Int(3)]);
    assert!(nav.cell_modified(banana, "pos"));
    assert!(!nav.row_modified(nav.row_id(2).unwrap()));
    assert_eq!(nav.focused_row(), Some(banana));
    assert!(nav.rows_moved());
    assert_eq!(moved.lock().as_slice(), [banana]);

    assert_eq!(nav.save().unwrap(), SaveOutcome::Committed);
    assert!(!nav.rows_moved());
    assert!(!nav.has_changes());
    assert_eq!(nav.rowset_doc().rows[0][0], Value::Int(2));
}

#[test]
fn test_move_without_position_column_saves_order() {
    let mut nav = items();
    assert!(nav.move_selected_rows(2, None).unwrap());
    assert_eq!(ids(&nav), vec![2, 3, 1]);
    assert!(nav.has_changes());
    assert!(nav.changed_rows().is_empty());

    assert_eq!(nav.save().unwrap(), SaveOutcome::Committed);
    assert!(!nav.has_changes());
    assert_eq!(nav.rowset_doc().rows[2][0], Value::Int(1));
}

#[test]
fn test_move_refused_while_sorted() {
    let mut nav = Nav::from_doc(NavConfig::default().with_order_by("name"), items_doc());
    assert!(!nav.can_move_rows());
    assert!(nav.start_move_selected_rows().is_none());

    nav.set_order_by("");
    assert!(nav.can_move_rows());
    let mv = nav.start_move_selected_rows().unwrap();
    assert!(matches!(
        nav.finish_move_rows(mv, 7, None),
        Err(NavError::InvalidMove { .. })
    ));
}

#[test]
fn test_move_under_new_parent() {
    let doc = tree_doc(&[("a", None), ("a1", Some("a")), ("b", None)]);
    let mut nav = Nav::from_doc(NavConfig::default(), doc);
    assert_eq!(tree_ids(&nav), ["a", "a1", "b"]);

    let (a, b) = (row_by_id(&nav, "a"), row_by_id(&nav, "b"));
    assert!(nav.focus_cell(Some(2), None, 0, 0, &FocusOpts::default()));
    let mv = nav.start_move_selected_rows().unwrap();
    assert_eq!(mv.parent(), None);
    nav.finish_move_rows(mv, 1, Some(a)).unwrap();

    assert_eq!(tree_ids(&nav), ["a", "b", "a1"]);
    assert_eq!(nav.row(b).tree.parent_row, Some(a));
    assert_eq!(nav.cell_val(b, "parent_id"), &Value::from("a"));
    assert!(nav.row_modified(b));
}

#[test]
fn test_move_into_own_subtree_is_refused() {
    let doc = tree_doc(&[("a", None), ("a1", Some("a")), ("b", None)]);
    let mut nav = Nav::from_doc(NavConfig::default(), doc);
    let a1 = row_by_id(&nav, "a1");
    let mv = nav.start_move_selected_rows().unwrap();
    assert_eq!(mv.rows().len(), 2);

    let err = nav.finish_move_rows(mv, 0, Some(a1));
    assert!(matches!(err, Err(NavError::InvalidParent { .. })));
    assert_eq!(tree_ids(&nav), ["a", "a1", "b"]);
    assert!(!nav.rows_moved());
}

#[test]
fn test_remove_selected_rows() {
    let mut nav = items();
    let opts = FocusOpts {
        expand_selection: true,
        ..Default::default()
    };
    assert!(nav.focus_cell(Some(1), None, 0, 0, &opts));
    let removed = nav.remove_selected_rows().unwrap();
    assert_eq!(removed.len(), 2);
    assert_eq!(ids(&nav), vec![3]);
    assert_eq!(nav.changed_rows().len(), 2);
}

#[test]
fn test_rows_dropped_when_changes_cannot_be_saved() {
    let config = NavConfig::default().with_url("https://example.com/rowsets/items");
    let mut nav = Nav::from_doc(config, items_doc());
    assert!(!nav.can_save_changes());

    let row = nav.row_id(0).unwrap();
    assert!(nav.remove_row(row).unwrap());
    assert!(!nav.contains_row(row));
    assert!(!nav.has_changes());
}

#[test]
fn test_name_column_names_rows() {
    let mut nav = items();
    let row = nav.row_id(0).unwrap();
    assert_eq!(nav.row_display_val(row), None);

    nav.set_name_col(Some("name"));
    assert_eq!(nav.name_field(), Some(1));
    assert_eq!(nav.tree_field(), Some(1));
    assert_eq!(nav.row_display_val(row).as_deref(), Some("apple"));
    assert_eq!(nav.dropdown_display_val().as_deref(), Some("apple"));

    let doc = RowsetDoc {
        name_col: Some("name".to_string()),
        ..items_doc()
    };
    let mut nav = Nav::from_doc(NavConfig::default(), doc);
    nav.set_name_col(None);
    assert_eq!(nav.name_field(), Some(1));
}

#[test]
fn test_pick_near_val_moves_and_picks() {
    let mut nav = items();
    let picked = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let sink = picked.clone();
    nav.signals().val_picked.connect(move |row| sink.lock().push(*row));

    assert!(nav.pick_near_val(1));
    assert_eq!(nav.focused_row_index(), Some(1));
    assert_eq!(picked.lock().as_slice(), [nav.row_id(1).unwrap()]);
}

#[test]
fn test_unfocusable_cells_are_disabled() {
    let config = NavConfig::default().with_col_attrs(
        "name",
        FieldAttrs {
            focusable: Some(false),
            ..Default::default()
        },
    );
    let nav = Nav::from_doc(config, items_doc());
    let row = nav.row_id(0).unwrap();
    assert!(nav.is_cell_disabled(row, Some(1)));
    assert!(!nav.is_cell_disabled(row, Some(2)));
    assert!(!nav.is_cell_disabled(row, None));
}

#[test]
fn test_selection_stays_among_siblings() {
    let config = NavConfig {
        can_select_non_siblings: false,
        ..Default::default()
    };
    let doc = tree_doc(&[("a", None), ("a1", Some("a")), ("b", None)]);
    let mut nav = Nav::from_doc(config, doc);
    let (a1, b) = (row_by_id(&nav, "a1"), row_by_id(&nav, "b"));
    assert!(nav.is_row_selected(row_by_id(&nav, "a")));
    assert!(nav.can_select_cell(b, None, false));
    assert!(!nav.can_select_cell(a1, None, false));

    nav.select_all_cells();
    assert_eq!(nav.selected_rows().len(), 2);
    assert!(!nav.is_row_selected(a1));
}
