//! Integration tests for the load/save round trip against a queued
//! transport.

use std::collections::BTreeMap;
use std::sync::Arc;

use horizon_rowset::{
    ChangeKind, DatasetRegistry, FieldAttrs, FieldType, Nav, NavConfig, NavError, NotifyKind,
    Pending, QueuedTransport, RequestId, RowErrorDoc, RowResult, RowsetDoc, SaveOutcome,
    SaveRequest, SaveResult, SaveTrigger, Transport, TransportError, TransportEvent, Value,
};
use parking_lot::{Mutex, RwLock};

fn config() -> NavConfig {
    let mut config = NavConfig::default()
        .with_name("items")
        .with_url("https://example.com/rowsets/items");
    config.save_row_on = SaveTrigger::Manual;
    config.save_new_row_on = SaveTrigger::Manual;
    config.save_row_remove_on = SaveTrigger::Manual;
    config
}

fn doc() -> RowsetDoc {
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
        ],
        pk: Some(vec!["id".to_string()]),
        ..Default::default()
    }
}

/// A server-backed dataset with `doc()` loaded.
fn loaded(config: NavConfig) -> (Nav, Arc<QueuedTransport>) {
    let transport = Arc::new(QueuedTransport::new());
    let mut nav = Nav::new(config).with_transport(transport.clone() as Arc<dyn Transport>);
    let id = nav.reload().unwrap().unwrap();
    assert_eq!(transport.take().len(), 1);
    nav.handle_transport_event(TransportEvent::Loaded { id, result: Ok(doc()) });
    (nav, transport)
}

fn take_save(transport: &QueuedTransport) -> (RequestId, SaveRequest) {
    let mut pending = transport.take();
    assert_eq!(pending.len(), 1, "expected exactly one request");
    match pending.remove(0) {
        Pending::Save(id, request) => (id, request),
        other => panic!("expected a save, got {other:?}"),
    }
}

fn saved(id: RequestId, rows: Vec<RowResult>) -> TransportEvent {
    TransportEvent::Saved {
        id,
        result: Ok(SaveResult { rows, trace: None }),
    }
}

fn capture_notifications(nav: &Nav) -> Arc<Mutex<Vec<String>>> {
    let messages = Arc::new(Mutex::new(Vec::new()));
    let sink = messages.clone();
    nav.signals().notify.connect(move |(kind, message)| {
        if *kind == NotifyKind::Error {
            sink.lock().push(message.clone());
        }
    });
    messages
}

#[test]
fn test_update_is_packed_with_old_key() {
    let (mut nav, transport) = loaded(config());
    let apple = nav.row_id(0).unwrap();
    nav.set_cell_val(apple, "qty", 7).unwrap();

    let outcome = nav.save().unwrap();
    let (id, request) = take_save(&transport);
    assert_eq!(outcome, SaveOutcome::Sent(id));
    assert_eq!(request.url, "https://example.com/rowsets/items");
    assert_eq!(request.changes.rows.len(), 1);
    let change = &request.changes.rows[0];
    assert_eq!(change.kind, ChangeKind::Update);
    assert_eq!(
        change.values,
        BTreeMap::from([
            ("id:old".to_string(), Value::Int(1)),
            ("qty".to_string(), Value::Int(7)),
        ])
    );
    assert!(nav.is_saving());
    assert_eq!(nav.row_tags(apple).save_request, Some(id));

    nav.handle_transport_event(saved(id, vec![RowResult::default()]));
    assert!(!nav.is_saving());
    assert_eq!(nav.row_tags(apple).save_request, None);
    assert!(!nav.cell_modified(apple, "qty"));
    assert_eq!(nav.cell_val(apple, "qty"), &Value::Int(7));
    assert!(!nav.has_changes());
}

#[test]
fn test_save_and_reload_refused_while_saving() {
    let (mut nav, transport) = loaded(config());
    let messages = capture_notifications(&nav);
    let apple = nav.row_id(0).unwrap();
    nav.set_cell_val(apple, "qty", 7).unwrap();
    nav.save().unwrap();

    assert!(matches!(nav.save(), Err(NavError::SaveInProgress)));
    assert!(matches!(nav.reload(), Err(NavError::ReloadWhileSaving)));
    assert_eq!(messages.lock().as_slice(), ["Saving in progress. Please wait."]);
    assert_eq!(transport.pending_count(), 1);
}

#[test]
fn test_edit_during_save_stays_modified() {
    let (mut nav, transport) = loaded(config());
    let apple = nav.row_id(0).unwrap();
    nav.set_cell_val(apple, "qty", 7).unwrap();
    nav.save().unwrap();
    let (id, _) = take_save(&transport);

    nav.set_cell_val(apple, "qty", 9).unwrap();
    nav.handle_transport_event(saved(id, vec![RowResult::default()]));

    assert_eq!(nav.cell_val(apple, "qty"), &Value::Int(9));
    assert_eq!(nav.cell_old_val(apple, "qty"), &Value::Int(7));
    assert!(nav.cell_modified(apple, "qty"));
    assert_eq!(nav.changed_rows(), vec![apple]);
}

#[test]
fn test_new_row_takes_server_values() {
    let (mut nav, transport) = loaded(config());
    let row = nav.insert_row([("name", Value::from("cherry")), ("qty", Value::from(1))]).unwrap();
    assert_eq!(nav.cell_val(row, "id"), &Value::Null);

    nav.save().unwrap();
    let (id, request) = take_save(&transport);
    let change = &request.changes.rows[0];
    assert_eq!(change.kind, ChangeKind::New);
    assert!(!change.values.contains_key("id"));
    assert_eq!(change.values["name"], Value::from("cherry"));

    nav.handle_transport_event(saved(
        id,
        vec![RowResult {
            values: Some(BTreeMap::from([("id".to_string(), Value::Int(10))])),
            ..Default::default()
        }],
    ));
    assert_eq!(nav.cell_val(row, "id"), &Value::Int(10));
    assert!(!nav.row_tags(row).is_new);
    assert!(!nav.has_changes());
    assert_eq!(nav.lookup(&["id"], &[Value::Int(10)]), vec![row]);
}

#[test]
fn test_removed_row_is_dropped_on_success() {
    let (mut nav, transport) = loaded(config());
    let banana = nav.row_id(1).unwrap();
    assert!(nav.remove_row(banana).unwrap());
    assert!(nav.contains_row(banana));
    assert!(!nav.row_visible(banana));

    nav.save().unwrap();
    let (id, request) = take_save(&transport);
    let change = &request.changes.rows[0];
    assert_eq!(change.kind, ChangeKind::Remove);
    assert_eq!(change.values, BTreeMap::from([("id".to_string(), Value::Int(2))]));

    nav.handle_transport_event(saved(id, vec![RowResult::default()]));
    assert!(!nav.contains_row(banana));
    assert_eq!(nav.all_rows().len(), 1);
}

#[test]
fn test_server_row_error_rejects_row() {
    let (mut nav, transport) = loaded(config());
    let apple = nav.row_id(0).unwrap();
    nav.set_cell_val(apple, "qty", 7).unwrap();
    nav.save().unwrap();
    let (id, _) = take_save(&transport);

    nav.handle_transport_event(saved(
        id,
        vec![RowResult {
            error: Some(RowErrorDoc::Message("row is locked".into())),
            ..Default::default()
        }],
    ));
    let error = nav.row_error(apple).unwrap();
    assert_eq!(error.message, "row is locked");
    assert!(error.server);
    assert!(nav.row_has_errors(apple));
    assert!(nav.cell_modified(apple, "qty"));
    assert_eq!(nav.cell_old_val(apple, "qty"), &Value::Int(5));

    // Editing the row clears the server's verdict.
    nav.set_cell_val(apple, "qty", 6).unwrap();
    assert!(nav.row_error(apple).is_none());
}

#[test]
fn test_server_field_errors_mark_cells() {
    let (mut nav, transport) = loaded(config());
    let apple = nav.row_id(0).unwrap();
    nav.set_cell_val(apple, "qty", 700).unwrap();
    nav.save().unwrap();
    let (id, _) = take_save(&transport);

    nav.handle_transport_event(saved(
        id,
        vec![RowResult {
            field_errors: Some(BTreeMap::from([("qty".to_string(), "too many".to_string())])),
            ..Default::default()
        }],
    ));
    assert!(nav.cell_has_errors(apple, "qty"));
    assert_eq!(
        nav.cell_errors(apple, "qty").and_then(|e| e.first_message()),
        Some("too many")
    );
    assert!(nav.has_changes());

    nav.set_cell_val(apple, "qty", 70).unwrap();
    assert!(!nav.cell_has_errors(apple, "qty"));
}

#[test]
fn test_abort_ignores_late_response() {
    let (mut nav, transport) = loaded(config());
    let apple = nav.row_id(0).unwrap();
    nav.set_cell_val(apple, "qty", 7).unwrap();
    nav.save().unwrap();
    let (id, _) = take_save(&transport);

    nav.abort_saving();
    assert_eq!(transport.aborted(), vec![id]);
    assert!(!nav.is_saving());
    assert_eq!(nav.row_tags(apple).save_request, None);

    nav.handle_transport_event(saved(id, vec![RowResult::default()]));
    assert!(nav.cell_modified(apple, "qty"));
    assert!(nav.has_changes());
}

#[test]
fn test_failed_save_keeps_changes() {
    let (mut nav, transport) = loaded(config());
    let messages = capture_notifications(&nav);
    let apple = nav.row_id(0).unwrap();
    nav.set_cell_val(apple, "qty", 7).unwrap();
    nav.save().unwrap();
    let (id, _) = take_save(&transport);

    nav.handle_transport_event(TransportEvent::Saved {
        id,
        result: Err(TransportError::network("connection refused")),
    });
    assert!(!nav.is_saving());
    assert!(nav.cell_modified(apple, "qty"));
    assert_eq!(messages.lock().as_slice(), ["Saving failed: network error."]);
}

#[test]
fn test_failed_load_sets_load_error() {
    let transport = Arc::new(QueuedTransport::new());
    let mut nav = Nav::new(config()).with_transport(transport.clone() as Arc<dyn Transport>);
    let messages = capture_notifications(&nav);

    let id = nav.reload().unwrap().unwrap();
    nav.handle_transport_event(TransportEvent::Loaded {
        id,
        result: Err(TransportError::http(500, "Internal Server Error")),
    });
    assert!(!nav.is_loading());
    assert_eq!(nav.load_error(), Some(&TransportError::http(500, "Internal Server Error")));
    assert_eq!(messages.lock().as_slice(), ["Server returned 500 Internal Server Error"]);

    let id = nav.reload().unwrap().unwrap();
    nav.handle_transport_event(TransportEvent::Loaded { id, result: Ok(doc()) });
    assert!(nav.load_error().is_none());
    assert_eq!(nav.row_count(), 2);
}

#[test]
fn test_exit_edit_saves_automatically() {
    let mut config = config();
    config.save_row_on = SaveTrigger::ExitEdit;
    let (mut nav, transport) = loaded(config);
    let apple = nav.row_id(0).unwrap();
    assert_eq!(nav.focused_row(), Some(apple));

    assert!(nav.enter_edit());
    nav.set_cell_val(apple, "qty", 7).unwrap();
    assert_eq!(transport.pending_count(), 0);

    assert!(nav.exit_edit());
    let (_, request) = take_save(&transport);
    assert_eq!(request.changes.rows[0].values["qty"], Value::Int(7));
}

#[test]
fn test_accepted_save_reloads_other_datasets() {
    let registry = DatasetRegistry::new();
    let (a, transport) = loaded(config());
    let a = Arc::new(RwLock::new(a));
    let b = Arc::new(RwLock::new(
        Nav::new(config()).with_transport(transport.clone() as Arc<dyn Transport>),
    ));
    Nav::bind(&a, &registry);
    Nav::bind(&b, &registry);

    let id = {
        let mut a = a.write();
        let apple = a.row_id(0).unwrap();
        a.set_cell_val(apple, "qty", 7).unwrap();
        match a.save().unwrap() {
            SaveOutcome::Sent(id) => id,
            other => panic!("expected a sent save, got {other:?}"),
        }
    };
    assert_eq!(transport.take().len(), 1);

    a.write().handle_transport_event(saved(id, vec![RowResult::default()]));
    let pending = transport.take();
    assert_eq!(pending.len(), 1);
    assert!(matches!(pending[0], Pending::Load(..)));
    assert!(b.read().is_loading());
    assert!(!a.read().is_loading());
}
