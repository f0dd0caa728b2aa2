// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// zstd + base64 implementation of the identity list codec.
//
// Compressed bytes are base64 encoded so the result can be stored in any
// string column or YAML field.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::domain::codec::{CodecError, IdListCodec};

pub const DEFAULT_COMPRESSION_LEVEL: i32 = 3;

#[derive(Debug, Clone)]
pub struct ZstdIdListCodec {
    level: i32,
}

impl ZstdIdListCodec {
    pub fn new(level: i32) -> Self {
        Self { level }
    }
}

impl Default for ZstdIdListCodec {
    fn default() -> Self {
        Self::new(DEFAULT_COMPRESSION_LEVEL)
    }
}

impl IdListCodec for ZstdIdListCodec {
    fn compress(&self, plain: &str) -> Result<String, CodecError> {
        let compressed = zstd::encode_all(plain.as_bytes(), self.level)
            .map_err(|e| CodecError::Compress(e.to_string()))?;
        Ok(STANDARD.encode(compressed))
    }

    fn decompress(&self, compressed: &str) -> Result<String, CodecError> {
        let bytes = STANDARD
            .decode(compressed.trim())
            .map_err(|e| CodecError::Decompress(e.to_string()))?;
        let plain = zstd::decode_all(bytes.as_slice()).map_err(|e| CodecError::Decompress(e.to_string()))?;
        String::from_utf8(plain).map_err(|_| CodecError::InvalidUtf8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::codec::{decode_ids, encode_ids};
    use proptest::prelude::*;

    #[test]
    fn test_compression_is_deterministic() {
        let codec = ZstdIdListCodec::default();
        let a = codec.compress("id-1,id-2,id-3").unwrap();
        let b = codec.compress("id-1,id-2,id-3").unwrap();
        assert_eq!(a, b);
        assert_eq!(codec.decompress(&a).unwrap(), "id-1,id-2,id-3");
    }

    #[test]
    fn test_garbage_is_rejected() {
        let codec = ZstdIdListCodec::default();
        assert!(matches!(codec.decompress("not base64!!"), Err(CodecError::Decompress(_))));
        let not_zstd = STANDARD.encode(b"plain text");
        assert!(matches!(codec.decompress(&not_zstd), Err(CodecError::Decompress(_))));
    }

    #[test]
    fn test_empty_list() {
        let codec = ZstdIdListCodec::default();
        let encoded = encode_ids(&codec, &[]).unwrap();
        assert!(decode_ids(&codec, &encoded).unwrap().is_empty());
        assert!(decode_ids(&codec, "").unwrap().is_empty());
    }

    proptest! {
        #[test]
        fn prop_id_lists_survive_encoding(ids in proptest::collection::vec("[a-z0-9-]{1,12}", 0..50)) {
            let codec = ZstdIdListCodec::default();
            let encoded = encode_ids(&codec, &ids).unwrap();
            prop_assert_eq!(decode_ids(&codec, &encoded).unwrap(), ids);
        }
    }
}
