// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Identity List Codec
//!
//! Identity id lists are persisted on partitions, partition results and
//! transition requests. Large lists are kept compact by encoding them as CSV
//! and compressing the text into an opaque string.
//!
//! The compression itself is a collaborator ([`IdListCodec`]); the CSV helpers
//! here are shared by every caller so that encode/decode stay symmetric.

use thiserror::Error;

/// Reversible, deterministic compression of text into an opaque string.
pub trait IdListCodec: Send + Sync {
    /// Compress `plain` into an opaque string safe to persist.
    fn compress(&self, plain: &str) -> Result<String, CodecError>;

    /// Reverse [`IdListCodec::compress`].
    fn decompress(&self, compressed: &str) -> Result<String, CodecError>;
}

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Compression failed: {0}")]
    Compress(String),

    #[error("Decompression failed: {0}")]
    Decompress(String),

    #[error("Compressed payload is not valid UTF-8")]
    InvalidUtf8,
}

/// Join ids into a CSV string. Ids never contain commas.
pub fn list_to_csv(ids: &[String]) -> String {
    ids.join(",")
}

/// Split a CSV string into ids, dropping blanks.
pub fn csv_to_list(csv: &str) -> Vec<String> {
    csv.split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .collect()
}

/// CSV-encode then compress an id list.
pub fn encode_ids(codec: &dyn IdListCodec, ids: &[String]) -> Result<String, CodecError> {
    codec.compress(&list_to_csv(ids))
}

/// Decompress then CSV-decode an id list. An empty payload is an empty list.
pub fn decode_ids(codec: &dyn IdListCodec, compressed: &str) -> Result<Vec<String>, CodecError> {
    if compressed.is_empty() {
        return Ok(Vec::new());
    }
    let csv = codec.decompress(compressed)?;
    Ok(csv_to_list(&csv))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_csv_round_trip() {
        let ids = vec!["a1".to_string(), "b2".to_string(), "c3".to_string()];
        assert_eq!(list_to_csv(&ids), "a1,b2,c3");
        assert_eq!(csv_to_list("a1,b2,c3"), ids);
    }

    #[test]
    fn test_csv_ignores_blanks() {
        assert!(csv_to_list("").is_empty());
        assert_eq!(csv_to_list(" a , ,b "), vec!["a".to_string(), "b".to_string()]);
    }
}
