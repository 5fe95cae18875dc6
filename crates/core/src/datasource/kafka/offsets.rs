use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Settlement {
    Pending,
    Acked,
}

/// Delivered offsets per partition, in offset order.
///
/// A commit only ever covers the run of acked offsets at the front of a
/// partition, so it never moves past a message that is still pending or was
/// handed back for redelivery.
#[derive(Debug, Default)]
pub(crate) struct OffsetTracker {
    partitions: HashMap<(String, i32), BTreeMap<i64, Settlement>>,
}

impl OffsetTracker {
    pub fn delivered(&mut self, topic: &str, partition: i32, offset: i64) {
        self.partitions
            .entry((topic.to_string(), partition))
            .or_default()
            .insert(offset, Settlement::Pending);
    }

    /// Offsets that were never delivered, or were rewound, are ignored.
    pub fn ack(&mut self, topic: &str, partition: i32, offset: i64) {
        if let Some(settlement) = self
            .partitions
            .get_mut(&(topic.to_string(), partition))
            .and_then(|offsets| offsets.get_mut(&offset))
        {
            *settlement = Settlement::Acked;
        }
    }

    /// Drains the acked run at the front of every partition and returns the
    /// next offset to commit for each partition that advanced.
    pub fn committable(&mut self) -> Vec<(String, i32, i64)> {
        let mut commits = Vec::new();
        for ((topic, partition), offsets) in &mut self.partitions {
            let mut next = None;
            while let Some(entry) = offsets.first_entry() {
                if *entry.get() != Settlement::Acked {
                    break;
                }
                next = Some(*entry.key() + 1);
                entry.remove();
            }
            if let Some(next) = next {
                commits.push((topic.clone(), *partition, next));
            }
        }
        commits.sort();
        commits
    }

    /// Forgets `offset` and everything delivered after it on that partition.
    /// The caller seeks the partition back to `offset`, which delivers them
    /// again.
    pub fn rewind(&mut self, topic: &str, partition: i32, offset: i64) {
        if let Some(offsets) = self.partitions.get_mut(&(topic.to_string(), partition)) {
            offsets.split_off(&offset);
        }
    }
}
