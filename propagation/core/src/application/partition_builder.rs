// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Splits the identities of an event into compressed partitions.

use std::sync::Arc;

use crate::domain::codec::{encode_ids, CodecError, IdListCodec};
use crate::domain::event::EventId;
use crate::domain::partition::{split_evenly, Partition};

pub const PARTITION_NAME_PREFIX: &str = "Role Propagation Partition";

#[derive(Clone)]
pub struct PartitionBuilder {
    codec: Arc<dyn IdListCodec>,
}

impl PartitionBuilder {
    pub fn new(codec: Arc<dyn IdListCodec>) -> Self {
        Self { codec }
    }

    /// Build `min(ids.len(), max_partitions)` partitions for `event_id`.
    ///
    /// `label` distinguishes the partitions of different events within a run.
    pub fn build(
        &self,
        event_id: EventId,
        label: &str,
        ids: &[String],
        max_partitions: usize,
    ) -> Result<Vec<Partition>, CodecError> {
        let chunks = split_evenly(ids, max_partitions);
        let count = chunks.len();

        chunks
            .into_iter()
            .enumerate()
            .map(|(index, chunk)| {
                let name = format!(
                    "{} {} - {} of {}",
                    PARTITION_NAME_PREFIX,
                    label,
                    index + 1,
                    count
                );
                let identity_list = encode_ids(self.codec.as_ref(), &chunk)?;
                Ok(Partition::new(name, event_id, chunk.len(), identity_list))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::codec::decode_ids;
    use crate::infrastructure::compression::ZstdIdListCodec;

    #[test]
    fn test_partitions_are_named_sized_and_decodable() {
        let codec = Arc::new(ZstdIdListCodec::default());
        let builder = PartitionBuilder::new(codec.clone());
        let ids: Vec<String> = (1..=10).map(|i| format!("id-{}", i)).collect();

        let partitions = builder.build(EventId::new(), "Engineering", &ids, 3).unwrap();
        let sizes: Vec<usize> = partitions.iter().map(|p| p.size).collect();
        assert_eq!(sizes, vec![4, 3, 3]);
        assert_eq!(partitions[0].name, "Role Propagation Partition Engineering - 1 of 3");

        let decoded: Vec<String> = partitions
            .iter()
            .flat_map(|p| decode_ids(codec.as_ref(), &p.identity_list).unwrap())
            .collect();
        assert_eq!(decoded, ids);
    }

    #[test]
    fn test_no_ids_no_partitions() {
        let builder = PartitionBuilder::new(Arc::new(ZstdIdListCodec::default()));
        assert!(builder.build(EventId::new(), "x", &[], 4).unwrap().is_empty());
    }
}
