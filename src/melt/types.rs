use crate::schema::SectionId;
use crate::value::Value;
use chrono::{DateTime, Utc};
use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;
use std::collections::BTreeMap;

/// Array ordinals taken while descending from the document root.
///
/// Struct sections never extend the key, so two instances of the same
/// section share a key only if they are the same instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize)]
#[serde(transparent)]
pub struct InstanceKey(Vec<usize>);

impl InstanceKey {
    pub fn root() -> Self {
        InstanceKey(Vec::new())
    }

    /// Key of the `ordinal`-th element below this instance
    pub fn child(&self, ordinal: usize) -> Self {
        let mut key = self.0.clone();
        key.push(ordinal);
        InstanceKey(key)
    }

    pub fn as_slice(&self) -> &[usize] {
        &self.0
    }
}

impl From<Vec<usize>> for InstanceKey {
    fn from(ordinals: Vec<usize>) -> Self {
        InstanceKey(ordinals)
    }
}

/// One materialization of a section for one document.
///
/// Borrows the document: instances never outlive the flattening call
/// that produced them.
#[derive(Debug, Clone, PartialEq)]
pub struct SectionInstance<'a> {
    pub document_id: &'a str,
    pub section: SectionId,
    pub section_name: &'a str,
    pub instance_key: InstanceKey,
    pub value: &'a Value,
}

/// A coerced column value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Cell {
    Null,
    String(String),
    Double(f64),
    Boolean(bool),
    Timestamp(DateTime<Utc>),
}

impl Cell {
    pub fn is_null(&self) -> bool {
        matches!(self, Cell::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Cell::String(s) => Some(s),
            _ => None,
        }
    }
}

/// A wide output row for one leaf section instance
#[derive(Debug, Clone, PartialEq)]
pub struct FlatRow {
    pub document_id: String,
    pub section: String,
    pub instance_key: InstanceKey,
    /// `(column_name, value)` in column ordinal order
    pub columns: Vec<(String, Cell)>,
}

impl FlatRow {
    pub fn get(&self, column: &str) -> Option<&Cell> {
        self.columns
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, cell)| cell)
    }
}

impl Serialize for FlatRow {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.columns.len() + 3))?;
        map.serialize_entry("_document_id", &self.document_id)?;
        map.serialize_entry("_section", &self.section)?;
        map.serialize_entry("_instance_key", &self.instance_key)?;
        for (name, cell) in &self.columns {
            map.serialize_entry(name, cell)?;
        }
        map.end()
    }
}

/// Structural surprises recovered from during flattening
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    /// Struct section met an array value
    StructGotArray,
    /// Array section met a single object and the policy forbids normalizing
    ArrayGotStruct,
    /// Array section or component container met a bare scalar where
    /// normalizing is not allowed
    UnexpectedScalar,
    /// Section or column path tried to descend through an array
    CrossedArray,
    /// Section sits deeper than the configured maximum
    DepthExceeded,
}

/// Run-level counters for anomalies and coercion failures
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Diagnostics {
    /// section -> kind -> count
    pub anomalies: BTreeMap<String, BTreeMap<AnomalyKind, u64>>,
    /// column -> count
    pub coercion_failures: BTreeMap<String, u64>,
    /// section -> number of single objects treated as one-element arrays
    pub normalized_arrays: BTreeMap<String, u64>,
}

impl Diagnostics {
    pub fn record_anomaly(&mut self, section: &str, kind: AnomalyKind) {
        *self
            .anomalies
            .entry(section.to_string())
            .or_default()
            .entry(kind)
            .or_insert(0) += 1;
    }

    pub fn record_coercion_failure(&mut self, column: &str) {
        *self.coercion_failures.entry(column.to_string()).or_insert(0) += 1;
    }

    pub fn record_normalized_array(&mut self, section: &str) {
        *self.normalized_arrays.entry(section.to_string()).or_insert(0) += 1;
    }

    pub fn merge(&mut self, other: Diagnostics) {
        for (section, kinds) in other.anomalies {
            let target = self.anomalies.entry(section).or_default();
            for (kind, count) in kinds {
                *target.entry(kind).or_insert(0) += count;
            }
        }
        for (column, count) in other.coercion_failures {
            *self.coercion_failures.entry(column).or_insert(0) += count;
        }
        for (section, count) in other.normalized_arrays {
            *self.normalized_arrays.entry(section).or_insert(0) += count;
        }
    }

    pub fn anomaly_count(&self) -> u64 {
        self.anomalies.values().flat_map(|k| k.values()).sum()
    }

    pub fn anomaly_count_for(&self, section: &str, kind: AnomalyKind) -> u64 {
        self.anomalies
            .get(section)
            .and_then(|k| k.get(&kind))
            .copied()
            .unwrap_or(0)
    }

    pub fn coercion_failure_count(&self) -> u64 {
        self.coercion_failures.values().sum()
    }

    pub fn is_clean(&self) -> bool {
        self.anomalies.is_empty() && self.coercion_failures.is_empty()
    }
}
