//! Payload domain types: patches, size classification and chunk layout.

use std::collections::btree_map;
use std::collections::BTreeMap;
use std::time::Duration;

use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::constants::{
    DEFAULT_MEDIA_FIELD, DEFAULT_MEDIA_LIST_KEYS, DEFAULT_METADATA_FIELD,
    DEFAULT_UPDATED_AT_FIELD, MEDIA_ITEM_FIELDS,
};
use crate::errors::{Error, Result};

/// A flat, sanitized patch as handed to the writer.
pub type WritePatch = Map<String, Value>;

/// Value of a single field in a caller-submitted patch.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum FieldValue {
    /// "Don't touch this field". Dropped by sanitization.
    #[default]
    Absent,
    /// A concrete value. `Value::Null` means "clear this field".
    Value(Value),
}

impl FieldValue {
    pub fn is_absent(&self) -> bool {
        matches!(self, FieldValue::Absent)
    }

    pub fn as_value(&self) -> Option<&Value> {
        match self {
            FieldValue::Absent => None,
            FieldValue::Value(value) => Some(value),
        }
    }
}

impl From<Value> for FieldValue {
    fn from(value: Value) -> Self {
        FieldValue::Value(value)
    }
}

/// A partial update submitted by a caller.
///
/// Unlike [`WritePatch`], a `Patch` can carry fields explicitly marked
/// [`FieldValue::Absent`], which sanitization removes before any write.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Patch {
    fields: BTreeMap<String, FieldValue>,
}

impl Patch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style setter.
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(field, value);
        self
    }

    /// Builder-style absence marker.
    pub fn with_absent(mut self, field: impl Into<String>) -> Self {
        self.fields.insert(field.into(), FieldValue::Absent);
        self
    }

    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        self.fields
            .insert(field.into(), FieldValue::Value(value.into()));
    }

    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.fields.get(field)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, FieldValue> {
        self.fields.iter()
    }

    /// Folds a later submission into this one.
    ///
    /// Later values win key-by-key. An absent marker never erases a value an
    /// earlier submission supplied for the same field.
    pub fn merge(&mut self, later: Patch) {
        for (field, value) in later.fields {
            match value {
                FieldValue::Absent => {
                    self.fields.entry(field).or_insert(FieldValue::Absent);
                }
                value @ FieldValue::Value(_) => {
                    self.fields.insert(field, value);
                }
            }
        }
    }
}

impl From<WritePatch> for Patch {
    fn from(map: WritePatch) -> Self {
        map.into_iter()
            .map(|(field, value)| (field, FieldValue::Value(value)))
            .collect()
    }
}

impl FromIterator<(String, FieldValue)> for Patch {
    fn from_iter<I: IntoIterator<Item = (String, FieldValue)>>(iter: I) -> Self {
        Self {
            fields: iter.into_iter().collect(),
        }
    }
}

impl TryFrom<Value> for Patch {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(Patch::from(map)),
            other => Err(Error::InvalidPatch(format!(
                "expected a JSON object, got {}",
                json_kind(&other)
            ))),
        }
    }
}

impl IntoIterator for Patch {
    type Item = (String, FieldValue);
    type IntoIter = btree_map::IntoIter<String, FieldValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.into_iter()
    }
}

// Absent fields are omitted, the same way a JSON encoder drops undefined members.
impl Serialize for Patch {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let present = self.fields.values().filter(|v| !v.is_absent()).count();
        let mut map = serializer.serialize_map(Some(present))?;
        for (field, value) in &self.fields {
            if let FieldValue::Value(value) = value {
                map.serialize_entry(field, value)?;
            }
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Patch {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        WritePatch::deserialize(deserializer).map(Patch::from)
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Size classification
// ─────────────────────────────────────────────────────────────────────────────

/// Size bucket of a serialized patch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadCategory {
    Small,
    Medium,
    Large,
    Xlarge,
}

impl PayloadCategory {
    /// Upper bound (exclusive) of the small bucket.
    pub const SMALL_LIMIT: usize = 5_000;
    /// Upper bound (exclusive) of the medium bucket.
    pub const MEDIUM_LIMIT: usize = 15_000;
    /// Upper bound (exclusive) of the large bucket.
    pub const LARGE_LIMIT: usize = 50_000;

    pub fn from_size(size_bytes: usize) -> Self {
        if size_bytes < Self::SMALL_LIMIT {
            PayloadCategory::Small
        } else if size_bytes < Self::MEDIUM_LIMIT {
            PayloadCategory::Medium
        } else if size_bytes < Self::LARGE_LIMIT {
            PayloadCategory::Large
        } else {
            PayloadCategory::Xlarge
        }
    }

    /// Timeout the writer should apply to a call carrying this payload.
    pub fn recommended_timeout_ms(&self) -> u64 {
        match self {
            PayloadCategory::Small => 8_000,
            PayloadCategory::Medium => 20_000,
            PayloadCategory::Large => 30_000,
            PayloadCategory::Xlarge => 45_000,
        }
    }

    pub fn is_chunk_eligible(&self) -> bool {
        matches!(self, PayloadCategory::Large | PayloadCategory::Xlarge)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PayloadCategory::Small => "small",
            PayloadCategory::Medium => "medium",
            PayloadCategory::Large => "large",
            PayloadCategory::Xlarge => "xlarge",
        }
    }
}

/// Derived size information for one patch. Never cached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayloadSizeInfo {
    pub size_bytes: usize,
    pub category: PayloadCategory,
    pub recommended_timeout_ms: u64,
    /// Advisory; the coordinator also requires an absolute size floor.
    pub should_chunk: bool,
}

impl PayloadSizeInfo {
    pub fn recommended_timeout(&self) -> Duration {
        Duration::from_millis(self.recommended_timeout_ms)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Chunk layout
// ─────────────────────────────────────────────────────────────────────────────

/// Field identities the optimizer and chunker rely on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkSchema {
    /// Heavyweight nested content blob, written as its own chunk.
    pub media_field: String,
    /// Tiered/structured blob, written as its own chunk.
    pub metadata_field: String,
    /// Timestamp stamped on the core chunk.
    pub updated_at_field: String,
    /// Keys inside the media blob that hold lists of media items.
    pub media_list_keys: Vec<String>,
    /// Sub-fields kept on each media item.
    pub media_item_fields: Vec<String>,
}

impl Default for ChunkSchema {
    fn default() -> Self {
        Self {
            media_field: DEFAULT_MEDIA_FIELD.to_string(),
            metadata_field: DEFAULT_METADATA_FIELD.to_string(),
            updated_at_field: DEFAULT_UPDATED_AT_FIELD.to_string(),
            media_list_keys: DEFAULT_MEDIA_LIST_KEYS.iter().map(|k| k.to_string()).collect(),
            media_item_fields: MEDIA_ITEM_FIELDS.iter().map(|k| k.to_string()).collect(),
        }
    }
}

/// Which slice of a chunked save a sub-patch is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkKind {
    Core,
    Media,
    Metadata,
}

impl ChunkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkKind::Core => "core",
            ChunkKind::Media => "media",
            ChunkKind::Metadata => "metadata",
        }
    }
}

/// A patch partitioned by field identity.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkedPatch {
    pub core: WritePatch,
    pub media: Option<WritePatch>,
    pub metadata: Option<WritePatch>,
}

impl ChunkedPatch {
    /// Chunks in write order: core, media, metadata.
    pub fn into_ordered(self) -> Vec<(ChunkKind, WritePatch)> {
        let mut chunks = vec![(ChunkKind::Core, self.core)];
        if let Some(media) = self.media {
            chunks.push((ChunkKind::Media, media));
        }
        if let Some(metadata) = self.metadata {
            chunks.push((ChunkKind::Metadata, metadata));
        }
        chunks
    }

    /// Number of writes this layout takes.
    pub fn chunk_count(&self) -> usize {
        1 + usize::from(self.media.is_some()) + usize::from(self.metadata.is_some())
    }
}
