// In-process partitioned log.
//
// Each topic owns a fixed set of append-only partitions. Records keyed
// by an entity id always land in the same partition, preserving
// per-entity order; unkeyed records are spread round-robin. Consumer
// groups track a committed offset per (group, topic, partition) and
// commit manually after the handler succeeds.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::pin::pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use teamline_common::events::Topic;
use tokio::sync::{Mutex, Notify, RwLock};

/// One record in the log.
#[derive(Debug, Clone)]
pub struct Record {
    pub topic: Topic,
    pub key: Option<Vec<u8>>,
    pub payload: Vec<u8>,
    pub timestamp: DateTime<Utc>,
    pub partition: usize,
    pub offset: u64,
}

#[derive(Default)]
struct PartitionState {
    records: RwLock<Vec<Arc<Record>>>,
    appended: Notify,
}

struct TopicState {
    partitions: Vec<PartitionState>,
    round_robin: AtomicUsize,
}

pub struct EventLog {
    partitions_per_topic: usize,
    topics: HashMap<Topic, TopicState>,
    /// Committed offsets per (group, topic, partition); the offset is
    /// the index of the next record the group has yet to consume.
    offsets: Mutex<HashMap<(String, Topic, usize), u64>>,
}

impl EventLog {
    pub fn new(partitions_per_topic: usize) -> Arc<Self> {
        let partitions_per_topic = partitions_per_topic.max(1);
        let topics = Topic::ALL
            .into_iter()
            .map(|topic| {
                let partitions =
                    (0..partitions_per_topic).map(|_| PartitionState::default()).collect();
                (topic, TopicState { partitions, round_robin: AtomicUsize::new(0) })
            })
            .collect();

        Arc::new(Self { partitions_per_topic, topics, offsets: Mutex::new(HashMap::new()) })
    }

    pub fn partitions(&self) -> usize {
        self.partitions_per_topic
    }

    fn topic_state(&self, topic: Topic) -> &TopicState {
        // The map is built over Topic::ALL, so every topic is present.
        &self.topics[&topic]
    }

    fn partition_for(&self, topic: Topic, key: Option<&[u8]>) -> usize {
        match key {
            Some(key) => {
                let mut hasher = DefaultHasher::new();
                key.hash(&mut hasher);
                (hasher.finish() as usize) % self.partitions_per_topic
            }
            None => {
                self.topic_state(topic).round_robin.fetch_add(1, Ordering::Relaxed)
                    % self.partitions_per_topic
            }
        }
    }

    /// Appends a record, returning its (partition, offset).
    pub async fn append(
        &self,
        topic: Topic,
        key: Option<Vec<u8>>,
        payload: Vec<u8>,
    ) -> (usize, u64) {
        let partition = self.partition_for(topic, key.as_deref());
        let state = &self.topic_state(topic).partitions[partition];

        let offset = {
            let mut records = state.records.write().await;
            let offset = records.len() as u64;
            records.push(Arc::new(Record {
                topic,
                key,
                payload,
                timestamp: Utc::now(),
                partition,
                offset,
            }));
            offset
        };

        state.appended.notify_waiters();
        (partition, offset)
    }

    /// Returns all records at or beyond `offset`, waiting for an append
    /// when the partition tail is empty.
    pub async fn next_batch(
        &self,
        topic: Topic,
        partition: usize,
        offset: u64,
    ) -> Vec<Arc<Record>> {
        let state = &self.topic_state(topic).partitions[partition];

        loop {
            let mut appended = pin!(state.appended.notified());
            appended.as_mut().enable();

            {
                let records = state.records.read().await;
                if (records.len() as u64) > offset {
                    return records[offset as usize..].to_vec();
                }
            }

            appended.await;
        }
    }

    pub async fn committed(&self, group: &str, topic: Topic, partition: usize) -> u64 {
        self.offsets
            .lock()
            .await
            .get(&(group.to_string(), topic, partition))
            .copied()
            .unwrap_or(0)
    }

    /// Records that the group has consumed everything before `next_offset`.
    pub async fn commit(&self, group: &str, topic: Topic, partition: usize, next_offset: u64) {
        let mut offsets = self.offsets.lock().await;
        let entry = offsets.entry((group.to_string(), topic, partition)).or_insert(0);
        *entry = (*entry).max(next_offset);
    }
}
