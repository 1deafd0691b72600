//! Transport contract: rowset documents, change sets and save results.
//!
//! The engine never performs I/O. A [`Transport`] receives load and save
//! requests tagged with a [`RequestId`] and later delivers a
//! [`TransportEvent`] that the owner feeds into
//! [`crate::Nav::handle_transport_event`]. Responses for ids the dataset no
//! longer waits for are ignored.

use std::collections::BTreeMap;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::TransportError;
use crate::field::FieldAttrs;
use crate::value::Value;

/// Unique identifier for a load or save request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(u64);

impl RequestId {
    /// Allocate a new process-unique id.
    pub fn next() -> Self {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw id value.
    pub fn get(self) -> u64 {
        self.0
    }
}

/// A rowset document as returned by a load.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RowsetDoc {
    pub fields: Vec<FieldAttrs>,
    pub rows: Vec<Vec<Value>>,
    /// Primary key columns.
    #[serde(deserialize_with = "de_cols")]
    pub pk: Option<Vec<String>>,
    pub id_col: Option<String>,
    pub parent_col: Option<String>,
    pub pos_col: Option<String>,
    pub name_col: Option<String>,
    pub tree_col: Option<String>,
    pub can_add_rows: Option<bool>,
    pub can_remove_rows: Option<bool>,
    pub can_change_rows: Option<bool>,
    pub can_edit: Option<bool>,
}

/// Accept either `"a b"` or `["a", "b"]`.
fn de_cols<'de, D>(deserializer: D) -> Result<Option<Vec<String>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Cols {
        Text(String),
        List(Vec<String>),
    }
    Ok(match Option::<Cols>::deserialize(deserializer)? {
        None => None,
        Some(Cols::Text(s)) => Some(s.split_whitespace().map(str::to_string).collect()),
        Some(Cols::List(list)) => Some(list),
    })
}

impl RowsetDoc {
    /// Field names in document order.
    pub fn field_names(&self) -> Vec<String> {
        self.fields
            .iter()
            .enumerate()
            .map(|(i, f)| f.name.clone().unwrap_or_else(|| format!("f{i}")))
            .collect()
    }
}

/// Kind of a packed row change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    New,
    Update,
    Remove,
}

/// One packed row change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowChange {
    #[serde(rename = "type")]
    pub kind: ChangeKind,
    pub values: BTreeMap<String, Value>,
}

/// The body of a save request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChangeSet {
    pub rows: Vec<RowChange>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Row-level error reported by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RowErrorDoc {
    Message(String),
    Flag(bool),
}

impl RowErrorDoc {
    /// Error message, if the entry denotes an error.
    pub fn message(&self) -> Option<String> {
        match self {
            RowErrorDoc::Message(message) => Some(message.clone()),
            RowErrorDoc::Flag(true) => Some("Row rejected by the server".to_string()),
            RowErrorDoc::Flag(false) => None,
        }
    }
}

/// Server response for one packed row, in change-set order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RowResult {
    /// Server-side values to apply (generated keys, computed columns).
    pub values: Option<BTreeMap<String, Value>>,
    pub error: Option<RowErrorDoc>,
    pub field_errors: Option<BTreeMap<String, String>>,
    /// The row is gone on the server and must be dropped.
    pub remove: bool,
}

/// The body of a save response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SaveResult {
    pub rows: Vec<RowResult>,
    /// Server-side trace lines.
    pub trace: Option<Vec<String>>,
}

/// One set of master parameter values.
pub type ParamSet = BTreeMap<String, Value>;

/// A load request.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadRequest {
    pub url: String,
    /// Master-detail parameters, one map per selected master row.
    pub params: Option<Vec<ParamSet>>,
}

/// A save request.
#[derive(Debug, Clone, PartialEq)]
pub struct SaveRequest {
    pub url: String,
    pub changes: ChangeSet,
}

/// Completion of a request.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Loaded {
        id: RequestId,
        result: Result<RowsetDoc, TransportError>,
    },
    Saved {
        id: RequestId,
        result: Result<SaveResult, TransportError>,
    },
}

impl TransportEvent {
    pub fn id(&self) -> RequestId {
        match self {
            TransportEvent::Loaded { id, .. } | TransportEvent::Saved { id, .. } => *id,
        }
    }
}

/// Sends requests on behalf of a dataset.
///
/// Implementations must not call back into the dataset synchronously; the
/// completion is delivered later as a [`TransportEvent`].
pub trait Transport: Send + Sync {
    fn load(&self, id: RequestId, request: LoadRequest);
    fn save(&self, id: RequestId, request: SaveRequest);
    /// Cancel an in-flight request. Unknown ids are ignored.
    fn abort(&self, id: RequestId);
}

/// A request recorded by [`QueuedTransport`].
#[derive(Debug, Clone, PartialEq)]
pub enum Pending {
    Load(RequestId, LoadRequest),
    Save(RequestId, SaveRequest),
}

impl Pending {
    pub fn id(&self) -> RequestId {
        match self {
            Pending::Load(id, _) | Pending::Save(id, _) => *id,
        }
    }
}

/// A transport that only records requests.
///
/// The owner inspects [`QueuedTransport::take`] and answers with events;
/// used for in-process rowsets and tests.
#[derive(Debug, Default)]
pub struct QueuedTransport {
    pending: Mutex<Vec<Pending>>,
    aborted: Mutex<Vec<RequestId>>,
}

impl QueuedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drain recorded requests.
    pub fn take(&self) -> Vec<Pending> {
        std::mem::take(&mut *self.pending.lock())
    }

    /// Number of recorded requests.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Ids aborted so far.
    pub fn aborted(&self) -> Vec<RequestId> {
        self.aborted.lock().clone()
    }
}

impl Transport for QueuedTransport {
    fn load(&self, id: RequestId, request: LoadRequest) {
        self.pending.lock().push(Pending::Load(id, request));
    }

    fn save(&self, id: RequestId, request: SaveRequest) {
        self.pending.lock().push(Pending::Save(id, request));
    }

    fn abort(&self, id: RequestId) {
        self.pending.lock().retain(|p| p.id() != id);
        self.aborted.lock().push(id);
    }
}
