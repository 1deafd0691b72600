//! Multi-key lookup indices.
//!
//! An index is a tree of nested maps, one level per column of an ordered
//! column tuple. A level may bucket its values with a [`RangeDef`] (fixed
//! numeric ranges, months or years) instead of keying on the exact value.
//! Groups keep insertion order so grouped views come out in data order.
//!
//! Indices are cached per `(columns, ranges)` and invalidated wholesale on
//! any row insert, removal or value change; they are rebuilt lazily on the
//! next lookup.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Datelike, NaiveDate};
use horizon_rowset_core::{PerfSpan, targets};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::row::{RowId, RowStore};
use crate::value::Value;

/// Unit of a range bucket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RangeUnit {
    /// Plain numeric ranges.
    #[default]
    None,
    /// Calendar months of a unix timestamp.
    Month,
    /// Calendar years of a unix timestamp.
    Year,
}

/// Bucketing of one index level.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RangeDef {
    /// Bucket width in units.
    pub freq: f64,
    /// Bucket alignment in units.
    #[serde(default)]
    pub offset: f64,
    #[serde(default)]
    pub unit: RangeUnit,
}

impl RangeDef {
    /// Numeric buckets of width `freq`.
    pub fn fixed(freq: f64, offset: f64) -> Self {
        Self {
            freq,
            offset,
            unit: RangeUnit::None,
        }
    }

    /// Buckets of `freq` months.
    pub fn months(freq: u32) -> Self {
        Self {
            freq: freq.into(),
            offset: 0.0,
            unit: RangeUnit::Month,
        }
    }

    /// Buckets of `freq` years.
    pub fn years(freq: u32) -> Self {
        Self {
            freq: freq.into(),
            offset: 0.0,
            unit: RangeUnit::Year,
        }
    }

    fn start(&self, n: f64) -> f64 {
        let freq = if self.freq > 0.0 { self.freq } else { 1.0 };
        ((n - self.offset) / freq).floor() * freq + self.offset
    }

    /// Bucket key and label of a value.
    ///
    /// Values outside the unit's domain (text, null) key on themselves.
    pub fn bucket(&self, value: &Value) -> (Value, Option<String>) {
        let Some(n) = value.as_f64().filter(|n| n.is_finite()) else {
            return (value.clone(), None);
        };
        match self.unit {
            RangeUnit::None => {
                let start = self.start(n);
                let text = if self.freq <= 1.0 {
                    Value::number(start).to_string()
                } else {
                    format!("{} .. {}", Value::number(start), Value::number(start + self.freq - 1.0))
                };
                (Value::number(start), Some(text))
            }
            RangeUnit::Month => {
                let Some(date) = DateTime::from_timestamp(n.floor() as i64, 0) else {
                    return (value.clone(), None);
                };
                let months = i64::from(date.year()) * 12 + i64::from(date.month0());
                let start = self.start(months as f64) as i64;
                let end = start + (self.freq.max(1.0) as i64) - 1;
                let label = |m: i64| format!("{:04}-{:02}", m.div_euclid(12), m.rem_euclid(12) + 1);
                let text = if start == end {
                    label(start)
                } else {
                    format!("{} .. {}", label(start), label(end))
                };
                (month_timestamp(start), Some(text))
            }
            RangeUnit::Year => {
                let Some(date) = DateTime::from_timestamp(n.floor() as i64, 0) else {
                    return (value.clone(), None);
                };
                let start = self.start(f64::from(date.year())) as i64;
                let end = start + (self.freq.max(1.0) as i64) - 1;
                let text = if start == end {
                    format!("{start:04}")
                } else {
                    format!("{start:04} .. {end:04}")
                };
                (month_timestamp(start * 12), Some(text))
            }
        }
    }
}

/// Unix timestamp of the first day of the month `months` months after year 0.
fn month_timestamp(months: i64) -> Value {
    let year = i32::try_from(months.div_euclid(12)).ok();
    let month = u32::try_from(months.rem_euclid(12) + 1).ok();
    year.zip(month)
        .and_then(|(y, m)| NaiveDate::from_ymd_opt(y, m, 1))
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map_or(Value::Null, |dt| Value::Int(dt.and_utc().timestamp()))
}

/// One level of an index tree.
#[derive(Debug, Clone, Default)]
pub struct IndexNode {
    groups: Vec<IndexGroup>,
    keys: HashMap<Value, usize>,
}

/// A group of rows sharing one key at one level.
#[derive(Debug, Clone)]
pub struct IndexGroup {
    pub key: Value,
    /// Bucket label when the level is ranged.
    pub text: Option<String>,
    /// Every row under this group, in insertion order.
    pub rows: Vec<RowId>,
    /// Next level; `None` at the last column.
    pub children: Option<IndexNode>,
}

impl IndexNode {
    /// Groups at this level, in insertion order.
    pub fn groups(&self) -> &[IndexGroup] {
        &self.groups
    }

    /// Group for an exact key.
    pub fn group(&self, key: &Value) -> Option<&IndexGroup> {
        self.keys.get(key).map(|&i| &self.groups[i])
    }

    fn insert(&mut self, row: RowId, keys: &[(Value, Option<String>)]) {
        let Some(((key, text), rest)) = keys.split_first() else {
            return;
        };
        let i = match self.keys.get(key) {
            Some(&i) => i,
            None => {
                self.groups.push(IndexGroup {
                    key: key.clone(),
                    text: text.clone(),
                    rows: Vec::new(),
                    children: (!rest.is_empty()).then(IndexNode::default),
                });
                self.keys.insert(key.clone(), self.groups.len() - 1);
                self.groups.len() - 1
            }
        };
        let group = &mut self.groups[i];
        group.rows.push(row);
        if let Some(children) = &mut group.children {
            children.insert(row, rest);
        }
    }

    /// Rows matching a key prefix. Keys are matched after bucketing.
    pub fn lookup(&self, keys: &[Value]) -> &[RowId] {
        let mut node = self;
        let mut rows: &[RowId] = &[];
        for (depth, key) in keys.iter().enumerate() {
            let Some(group) = node.group(key) else {
                return &[];
            };
            rows = &group.rows;
            match &group.children {
                Some(children) => node = children,
                None if depth + 1 < keys.len() => return &[],
                None => {}
            }
        }
        rows
    }

    /// Flatten into leaf groups.
    pub fn leaf_groups(&self) -> Vec<RowGroup> {
        let mut out = Vec::new();
        self.collect_leaves(&mut Vec::new(), &mut out);
        out
    }

    fn collect_leaves(&self, path: &mut Vec<(Value, Option<String>)>, out: &mut Vec<RowGroup>) {
        for group in &self.groups {
            path.push((group.key.clone(), group.text.clone()));
            match &group.children {
                Some(children) => children.collect_leaves(path, out),
                None => out.push(RowGroup {
                    keys: path.iter().map(|(k, _)| k.clone()).collect(),
                    texts: path.iter().map(|(_, t)| t.clone()).collect(),
                    rows: group.rows.clone(),
                }),
            }
            path.pop();
        }
    }
}

/// A flattened leaf group of an index.
#[derive(Debug, Clone, PartialEq)]
pub struct RowGroup {
    pub keys: Vec<Value>,
    pub texts: Vec<Option<String>>,
    pub rows: Vec<RowId>,
}

/// Bucket one value for an index level.
pub fn index_key(value: &Value, range: Option<&RangeDef>) -> (Value, Option<String>) {
    match range {
        Some(range) => range.bucket(value),
        None => (value.clone(), None),
    }
}

/// Build an index over `rows` keyed by `cols`.
pub fn build_index(
    store: &RowStore,
    rows: &[RowId],
    cols: &[usize],
    ranges: &[Option<RangeDef>],
) -> IndexNode {
    let _span = PerfSpan::new("build_index");
    let mut root = IndexNode::default();
    let mut keys = Vec::with_capacity(cols.len());
    for &id in rows {
        let Some(row) = store.get(id) else { continue };
        keys.clear();
        keys.extend(
            cols.iter()
                .enumerate()
                .map(|(i, &fi)| index_key(row.val(fi), ranges.get(i).and_then(Option::as_ref))),
        );
        root.insert(id, &keys);
    }
    tracing::debug!(target: targets::INDEX, ?cols, rows = rows.len(), "index built");
    root
}

/// Cache key of an index.
pub fn cache_key(cols: &[usize], ranges: &[Option<RangeDef>]) -> String {
    let cols = cols.iter().map(usize::to_string).collect::<Vec<_>>().join(",");
    if ranges.iter().all(Option::is_none) {
        return cols;
    }
    let ranges = serde_json::to_string(ranges).unwrap_or_default();
    format!("{cols}|{ranges}")
}

/// Lazily built, wholesale-invalidated index cache.
#[derive(Debug, Default)]
pub struct IndexEngine {
    cache: Mutex<HashMap<String, Arc<IndexNode>>>,
}

impl IndexEngine {
    /// Drop every cached index.
    pub fn invalidate(&self) {
        let mut cache = self.cache.lock();
        if !cache.is_empty() {
            tracing::trace!(target: targets::INDEX, count = cache.len(), "indices invalidated");
            cache.clear();
        }
    }

    /// Number of cached indices.
    pub fn cached(&self) -> usize {
        self.cache.lock().len()
    }

    /// Cached index for `key`, building it on a miss.
    pub fn get_or_build(&self, key: String, build: impl FnOnce() -> IndexNode) -> Arc<IndexNode> {
        if let Some(index) = self.cache.lock().get(&key) {
            return index.clone();
        }
        let index = Arc::new(build());
        self.cache.lock().insert(key, index.clone());
        index
    }
}
