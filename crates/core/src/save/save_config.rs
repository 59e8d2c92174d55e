//! Coordinator configuration.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::constants::{CHUNK_MIN_BYTES, DEBOUNCE_MS, SAVE_TIMEOUT_MS};
use crate::errors::{Error, Result};
use crate::payload::ChunkSchema;

/// Tunables for a [`SaveCoordinator`](super::SaveCoordinator).
#[derive(Debug, Clone, PartialEq)]
pub struct SaveConfig {
    /// Minimum spacing between two write starts for the same resource.
    pub debounce: Duration,
    /// Coordinator watchdog per promoted write. Independent of the
    /// per-category timeout handed to the writer.
    pub save_timeout: Duration,
    /// Serialized size a chunk-eligible payload must exceed to be chunked.
    pub chunk_min_bytes: usize,
    /// Resolve a promoted operation as skipped when every field it carries
    /// was already applied by the previous successful write.
    pub skip_redundant_writes: bool,
    pub schema: ChunkSchema,
}

impl Default for SaveConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(DEBOUNCE_MS),
            save_timeout: Duration::from_millis(SAVE_TIMEOUT_MS),
            chunk_min_bytes: CHUNK_MIN_BYTES,
            skip_redundant_writes: true,
            schema: ChunkSchema::default(),
        }
    }
}

impl SaveConfig {
    /// Reads overrides from the process environment.
    ///
    /// Recognized keys: `SAVE_DEBOUNCE_MS`, `SAVE_TIMEOUT_MS`,
    /// `SAVE_CHUNK_MIN_BYTES`, `SAVE_SKIP_REDUNDANT`, `SAVE_MEDIA_FIELD`,
    /// `SAVE_METADATA_FIELD`, `SAVE_UPDATED_AT_FIELD`.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an explicit key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let value = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        if let Some(raw) = value("SAVE_DEBOUNCE_MS") {
            config.debounce = Duration::from_millis(parse_number("SAVE_DEBOUNCE_MS", &raw)?);
        }
        if let Some(raw) = value("SAVE_TIMEOUT_MS") {
            let ms: u64 = parse_number("SAVE_TIMEOUT_MS", &raw)?;
            if ms == 0 {
                return Err(Error::invalid_config("SAVE_TIMEOUT_MS", &raw, "must be positive"));
            }
            config.save_timeout = Duration::from_millis(ms);
        }
        if let Some(raw) = value("SAVE_CHUNK_MIN_BYTES") {
            config.chunk_min_bytes = parse_number("SAVE_CHUNK_MIN_BYTES", &raw)?;
        }
        if let Some(raw) = value("SAVE_SKIP_REDUNDANT") {
            config.skip_redundant_writes = match raw.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" => true,
                "0" | "false" | "no" => false,
                _ => {
                    return Err(Error::invalid_config(
                        "SAVE_SKIP_REDUNDANT",
                        &raw,
                        "expected true or false",
                    ))
                }
            };
        }
        if let Some(field) = value("SAVE_MEDIA_FIELD") {
            config.schema.media_field = field;
        }
        if let Some(field) = value("SAVE_METADATA_FIELD") {
            config.schema.metadata_field = field;
        }
        if let Some(field) = value("SAVE_UPDATED_AT_FIELD") {
            config.schema.updated_at_field = field;
        }

        if config.schema.media_field == config.schema.metadata_field {
            return Err(Error::InvalidConfigValue(format!(
                "media and metadata fields must differ (both '{}')",
                config.schema.media_field
            )));
        }

        Ok(config)
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    pub fn with_save_timeout(mut self, save_timeout: Duration) -> Self {
        self.save_timeout = save_timeout;
        self
    }

    pub fn with_chunk_min_bytes(mut self, chunk_min_bytes: usize) -> Self {
        self.chunk_min_bytes = chunk_min_bytes;
        self
    }

    pub fn with_skip_redundant_writes(mut self, skip: bool) -> Self {
        self.skip_redundant_writes = skip;
        self
    }

    pub fn with_schema(mut self, schema: ChunkSchema) -> Self {
        self.schema = schema;
        self
    }
}

fn parse_number<T>(key: &str, raw: &str) -> Result<T>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    raw.parse::<T>()
        .map_err(|e| Error::invalid_config(key, raw, e))
}
