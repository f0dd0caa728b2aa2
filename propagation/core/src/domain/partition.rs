// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Partitions of the identities affected by one event.

use serde::{Deserialize, Serialize};

use crate::domain::event::EventId;

/// A slice of an event's identities handled by one Provision request.
///
/// `identity_list` holds the compressed CSV of the ids.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partition {
    pub name: String,
    pub event_id: EventId,
    pub size: usize,
    pub identity_list: String,
}

impl Partition {
    pub fn new(name: impl Into<String>, event_id: EventId, size: usize, identity_list: String) -> Self {
        Self {
            name: name.into(),
            event_id,
            size,
            identity_list,
        }
    }
}

/// Split `items` into `min(len, max)` contiguous chunks whose sizes differ by
/// at most one. The first `len % n` chunks carry the extra item.
pub fn split_evenly<T: Clone>(items: &[T], max_partitions: usize) -> Vec<Vec<T>> {
    let total = items.len();
    if total == 0 || max_partitions == 0 {
        return Vec::new();
    }

    let count = total.min(max_partitions);
    let size = total / count;
    let remainder = total % count;

    let mut chunks = Vec::with_capacity(count);
    let mut start = 0;
    for index in 0..count {
        let len = if index < remainder { size + 1 } else { size };
        chunks.push(items[start..start + len].to_vec());
        start += len;
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_ten_into_three() {
        let ids: Vec<u32> = (0..10).collect();
        let chunks = split_evenly(&ids, 3);
        let sizes: Vec<usize> = chunks.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![4, 3, 3]);
        assert_eq!(chunks[0], vec![0, 1, 2, 3]);
        assert_eq!(chunks[2], vec![7, 8, 9]);
    }

    #[test]
    fn test_empty_inputs() {
        assert!(split_evenly::<u32>(&[], 3).is_empty());
        assert!(split_evenly(&[1, 2], 0).is_empty());
    }

    #[test]
    fn test_fewer_ids_than_partitions() {
        let chunks = split_evenly(&[1, 2], 5);
        assert_eq!(chunks, vec![vec![1], vec![2]]);
    }

    proptest! {
        #[test]
        fn prop_partitions_cover_input_in_order(
            ids in proptest::collection::vec(any::<u16>(), 0..200),
            max in 0usize..20,
        ) {
            let chunks = split_evenly(&ids, max);
            let expected = if max == 0 { 0 } else { ids.len().min(max) };
            prop_assert_eq!(chunks.len(), expected);

            let flattened: Vec<u16> = chunks.iter().flatten().copied().collect();
            if max > 0 {
                prop_assert_eq!(flattened, ids.clone());
            }

            if let (Some(largest), Some(smallest)) = (
                chunks.iter().map(Vec::len).max(),
                chunks.iter().map(Vec::len).min(),
            ) {
                prop_assert!(largest - smallest <= 1);
            }
        }
    }
}
