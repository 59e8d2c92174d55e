//! Patch sanitization, nested media trimming and schema-aware chunking.
//!
//! Everything here is pure and synchronous: the coordinator calls these
//! functions between suspension points and never holds state across them.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};

use super::payload_model::{ChunkSchema, ChunkedPatch, FieldValue, Patch, WritePatch};

/// Produces the writable form of a caller patch.
///
/// Absent fields are dropped. Empty strings become `null` so the writer
/// clears the field instead of storing an empty value.
pub fn sanitize(patch: &Patch) -> WritePatch {
    patch
        .iter()
        .filter_map(|(field, value)| match value {
            FieldValue::Absent => None,
            FieldValue::Value(Value::String(s)) if s.is_empty() => {
                Some((field.clone(), Value::Null))
            }
            FieldValue::Value(value) => Some((field.clone(), value.clone())),
        })
        .collect()
}

/// Trims a nested media container down to what the writer needs.
///
/// Items in every media list keep only the whitelisted sub-fields; keys
/// holding `null` or an empty string are removed at every object level.
pub fn optimize_nested_media(container: &Value, schema: &ChunkSchema) -> Value {
    match container {
        Value::Object(map) => Value::Object(optimize_object(map, schema)),
        Value::Array(items) => Value::Array(items.iter().map(|i| trim_media_item(i, schema)).collect()),
        other => other.clone(),
    }
}

/// Applies [`optimize_nested_media`] to the schema's heavy field, if present.
pub fn optimize_patch(patch: &WritePatch, schema: &ChunkSchema) -> WritePatch {
    let mut optimized = patch.clone();
    if let Some(container) = optimized.get_mut(&schema.media_field) {
        if !container.is_null() {
            *container = optimize_nested_media(container, schema);
        }
    }
    optimized
}

/// Splits a sanitized patch into core, media and metadata sub-patches.
///
/// The split is by field identity. The core chunk always exists and carries
/// a fresh update timestamp.
pub fn chunk(patch: &WritePatch, schema: &ChunkSchema, now: DateTime<Utc>) -> ChunkedPatch {
    let mut core = WritePatch::new();
    let mut media = None;
    let mut metadata = None;

    for (field, value) in patch {
        if *field == schema.media_field {
            media = Some(single_field(field, value));
        } else if *field == schema.metadata_field {
            metadata = Some(single_field(field, value));
        } else {
            core.insert(field.clone(), value.clone());
        }
    }

    core.insert(
        schema.updated_at_field.clone(),
        Value::String(now.to_rfc3339_opts(SecondsFormat::Millis, true)),
    );

    ChunkedPatch {
        core,
        media,
        metadata,
    }
}

fn single_field(field: &str, value: &Value) -> WritePatch {
    let mut patch = WritePatch::new();
    patch.insert(field.to_string(), value.clone());
    patch
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

fn is_media_list_key(schema: &ChunkSchema, key: &str) -> bool {
    schema.media_list_keys.iter().any(|k| k == key)
}

fn optimize_object(map: &Map<String, Value>, schema: &ChunkSchema) -> Map<String, Value> {
    map.iter()
        .filter(|(_, value)| !is_blank(value))
        .map(|(key, value)| {
            let optimized = match value {
                Value::Array(items) if is_media_list_key(schema, key) => {
                    Value::Array(items.iter().map(|i| trim_media_item(i, schema)).collect())
                }
                Value::Array(items) => Value::Array(
                    items
                        .iter()
                        .map(|item| match item {
                            Value::Object(inner) => Value::Object(optimize_object(inner, schema)),
                            other => other.clone(),
                        })
                        .collect(),
                ),
                Value::Object(inner) => Value::Object(optimize_object(inner, schema)),
                other => other.clone(),
            };
            (key.clone(), optimized)
        })
        .collect()
}

fn trim_media_item(item: &Value, schema: &ChunkSchema) -> Value {
    match item {
        Value::Object(fields) => Value::Object(
            fields
                .iter()
                .filter(|(key, value)| {
                    schema.media_item_fields.iter().any(|k| k == *key) && !is_blank(value)
                })
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect(),
        ),
        other => other.clone(),
    }
}
