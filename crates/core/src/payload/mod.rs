//! Payload module - patch types, size analysis and optimization.
//!
//! The analyzer classifies a sanitized patch by its serialized size; the
//! optimizer sanitizes patches, trims nested media blobs and splits large
//! patches into schema-aware chunks.

mod payload_analyzer;
mod payload_model;
mod payload_optimizer;

pub use payload_analyzer::{analyze, serialized_size};
pub use payload_model::{
    ChunkKind, ChunkSchema, ChunkedPatch, FieldValue, Patch, PayloadCategory, PayloadSizeInfo,
    WritePatch,
};
pub use payload_optimizer::{chunk, optimize_nested_media, optimize_patch, sanitize};
