//! Size-based payload classification.

use log::warn;

use super::payload_model::{PayloadCategory, PayloadSizeInfo, WritePatch};

/// Byte length of the patch's compact JSON encoding.
pub fn serialized_size(patch: &WritePatch) -> usize {
    match serde_json::to_vec(patch) {
        Ok(bytes) => bytes.len(),
        Err(e) => {
            // Unreachable for maps of JSON values.
            warn!("Failed to measure payload size: {}", e);
            0
        }
    }
}

/// Classifies a sanitized patch by serialized size.
pub fn analyze(patch: &WritePatch) -> PayloadSizeInfo {
    let size_bytes = serialized_size(patch);
    let category = PayloadCategory::from_size(size_bytes);

    PayloadSizeInfo {
        size_bytes,
        category,
        recommended_timeout_ms: category.recommended_timeout_ms(),
        should_chunk: category.is_chunk_eligible(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /// `{"a":"xxx..."}` is eight bytes of framing plus the string body.
    fn patch_of_size(size: usize) -> WritePatch {
        let mut patch = WritePatch::new();
        patch.insert("a".to_string(), json!("x".repeat(size - 8)));
        patch
    }

    #[test]
    fn test_size_is_measured_on_utf8_bytes() {
        let mut patch = WritePatch::new();
        patch.insert("t".to_string(), json!("é"));
        // {"t":"é"} -> 8 ASCII bytes + 2 bytes for é
        assert_eq!(serialized_size(&patch), 10);
    }

    #[test]
    fn test_4999_bytes_is_small_and_not_chunked() {
        let info = analyze(&patch_of_size(4_999));
        assert_eq!(info.size_bytes, 4_999);
        assert_eq!(info.category, PayloadCategory::Small);
        assert_eq!(info.recommended_timeout_ms, 8_000);
        assert!(!info.should_chunk);
    }

    #[test]
    fn test_medium_payload() {
        let info = analyze(&patch_of_size(5_000));
        assert_eq!(info.category, PayloadCategory::Medium);
        assert_eq!(info.recommended_timeout_ms, 20_000);
        assert!(!info.should_chunk);
    }

    #[test]
    fn test_large_and_xlarge_are_chunk_eligible() {
        let large = analyze(&patch_of_size(15_001));
        assert_eq!(large.category, PayloadCategory::Large);
        assert_eq!(large.recommended_timeout_ms, 30_000);
        assert!(large.should_chunk);

        let xlarge = analyze(&patch_of_size(50_000));
        assert_eq!(xlarge.category, PayloadCategory::Xlarge);
        assert_eq!(xlarge.recommended_timeout_ms, 45_000);
        assert!(xlarge.should_chunk);
    }

    #[test]
    fn test_empty_patch() {
        let info = analyze(&WritePatch::new());
        assert_eq!(info.size_bytes, 2);
        assert_eq!(info.category, PayloadCategory::Small);
    }
}
