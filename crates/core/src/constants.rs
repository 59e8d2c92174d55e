/// Minimum spacing between two write starts for the same resource (ms)
pub const DEBOUNCE_MS: u64 = 1_000;

/// Coordinator watchdog for a single promoted write (ms)
pub const SAVE_TIMEOUT_MS: u64 = 20_000;

/// Absolute size a payload must exceed before it is written in chunks
pub const CHUNK_MIN_BYTES: usize = 15_000;

/// Result code for writes whose outcome is unknown
pub const TIMEOUT_CODE: &str = "TIMEOUT";

/// Result code for writes that died inside the coordinator
pub const INTERNAL_CODE: &str = "INTERNAL";

/// Default field holding the nested media/content blob
pub const DEFAULT_MEDIA_FIELD: &str = "content";

/// Default field holding the tiered/structured blob
pub const DEFAULT_METADATA_FIELD: &str = "tiers";

/// Default field stamped on the core chunk
pub const DEFAULT_UPDATED_AT_FIELD: &str = "updated_at";

/// Sub-fields of a media item that survive optimization
pub const MEDIA_ITEM_FIELDS: [&str; 4] = ["url", "type", "title", "description"];

/// Keys inside the media blob that hold lists of media items
pub const DEFAULT_MEDIA_LIST_KEYS: [&str; 4] = ["media", "images", "videos", "gallery"];
