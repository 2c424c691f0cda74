//! Bounded, ordered batches of change records.

mod batcher;

pub use batcher::Batcher;

use crate::record::ChangeRecord;
use uuid::Uuid;

/// A bounded ordered group of change records processed together.
///
/// Batches are never mutated in place. Bisection derives child batches whose
/// ids extend the parent id (`<id>.0`, `<id>.1`).
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    /// Batch identifier
    pub batch_id: String,
    /// Records in arrival order
    pub records: Vec<ChangeRecord>,
    /// Size bound the batch was created with
    pub max_size: usize,
}

impl Batch {
    /// Create a root batch with a fresh id.
    pub fn new(records: Vec<ChangeRecord>, max_size: usize) -> Self {
        Self::with_id(Uuid::new_v4().simple().to_string(), records, max_size)
    }

    /// Create a batch with an explicit id.
    pub fn with_id(batch_id: impl Into<String>, records: Vec<ChangeRecord>, max_size: usize) -> Self {
        Self {
            batch_id: batch_id.into(),
            records,
            max_size,
        }
    }

    /// Derive a child batch holding a subset of this batch's records.
    pub fn child(&self, index: usize, records: Vec<ChangeRecord>) -> Self {
        Self {
            batch_id: format!("{}.{}", self.batch_id, index),
            max_size: records.len(),
            records,
        }
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the batch holds no record.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Sequence ids of the records, in order.
    pub fn sequence_ids(&self) -> Vec<u64> {
        self.records.iter().map(|r| r.sequence_id).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::EventKind;
    use std::collections::BTreeMap;

    #[test]
    fn test_child_batch_ids() {
        let records: Vec<_> = (1..=3)
            .map(|i| ChangeRecord::new(i.to_string(), EventKind::Insert, BTreeMap::new(), 0))
            .collect();
        let root = Batch::with_id("b1", records.clone(), 5);
        let child = root.child(1, records[1..].to_vec());

        assert_eq!(child.batch_id, "b1.1");
        assert_eq!(child.len(), 2);
        assert_eq!(child.max_size, 2);
        assert_eq!(root.len(), 3);
    }

    #[test]
    fn test_root_ids_are_unique() {
        let a = Batch::new(vec![], 5);
        let b = Batch::new(vec![], 5);
        assert_ne!(a.batch_id, b.batch_id);
        assert!(a.is_empty());
    }
}
