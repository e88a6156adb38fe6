// Async event publisher.
//
// `publish` JSON-encodes the payload and enqueues it onto a bounded
// producer queue, returning as soon as the queue accepts the record or
// when the enqueue deadline fires. A producer task appends queued
// records to the log and reports each delivery on an acknowledgement
// channel drained by a dedicated logging task, so callers never block
// on delivery.

use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use serde::Serialize;
use teamline_common::events::Topic;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use super::log::EventLog;
use crate::error::ApiError;

const PRODUCER_QUEUE_CAPACITY: usize = 1024;
const ENQUEUE_TIMEOUT: Duration = Duration::from_secs(5);

struct ProducerRecord {
    topic: Topic,
    key: Uuid,
    payload: Vec<u8>,
}

struct Delivery {
    topic: Topic,
    partition: usize,
    offset: u64,
}

#[derive(Clone)]
pub struct Publisher {
    inner: Arc<PublisherInner>,
}

struct PublisherInner {
    queue: mpsc::Sender<ProducerRecord>,
    shutdown: CancellationToken,
    workers: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl Publisher {
    pub fn new(log: Arc<EventLog>) -> Self {
        let (queue, queue_rx) = mpsc::channel::<ProducerRecord>(PRODUCER_QUEUE_CAPACITY);
        let (ack_tx, ack_rx) = mpsc::channel::<Delivery>(PRODUCER_QUEUE_CAPACITY);
        let shutdown = CancellationToken::new();

        let producer = tokio::spawn(produce_loop(log, queue_rx, ack_tx, shutdown.clone()));
        let ack_reader = tokio::spawn(ack_loop(ack_rx));

        Self {
            inner: Arc::new(PublisherInner {
                queue,
                shutdown,
                workers: std::sync::Mutex::new(vec![producer, ack_reader]),
            }),
        }
    }

    /// Enqueues an event keyed by the primary entity id so records for
    /// one entity stay in one partition.
    pub async fn publish<T: Serialize>(
        &self,
        topic: Topic,
        key: Uuid,
        payload: &T,
    ) -> Result<(), ApiError> {
        let payload = serde_json::to_vec(payload)
            .map_err(|error| ApiError::server("failed to marshal event payload", error))?;

        let record = ProducerRecord { topic, key, payload };

        match tokio::time::timeout(ENQUEUE_TIMEOUT, self.inner.queue.send(record)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(ApiError::server(
                "event producer is closed",
                anyhow!("producer queue receiver dropped"),
            )),
            Err(_) => Err(ApiError::server(
                "timed out enqueueing event",
                anyhow!("producer queue full for {}", ENQUEUE_TIMEOUT.as_secs()),
            )),
        }
    }

    /// Signals shutdown, lets the producer finish queued records, then
    /// waits for both worker tasks.
    pub async fn close(&self) {
        self.inner.shutdown.cancel();

        let workers: Vec<JoinHandle<()>> = {
            let mut guard = self.inner.workers.lock().expect("publisher worker lock poisoned");
            guard.drain(..).collect()
        };

        for worker in workers {
            let _ = worker.await;
        }
    }
}

async fn produce_loop(
    log: Arc<EventLog>,
    mut queue: mpsc::Receiver<ProducerRecord>,
    acks: mpsc::Sender<Delivery>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                // Finish records already accepted into the queue.
                while let Ok(record) = queue.try_recv() {
                    deliver(&log, &acks, record).await;
                }
                return;
            }
            record = queue.recv() => {
                match record {
                    Some(record) => deliver(&log, &acks, record).await,
                    None => return,
                }
            }
        }
    }
}

async fn deliver(log: &EventLog, acks: &mpsc::Sender<Delivery>, record: ProducerRecord) {
    let topic = record.topic;
    let (partition, offset) = log
        .append(topic, Some(record.key.as_bytes().to_vec()), record.payload)
        .await;

    if acks.send(Delivery { topic, partition, offset }).await.is_err() {
        warn!(topic = %topic, "delivery acknowledgement reader is gone");
    }
}

async fn ack_loop(mut acks: mpsc::Receiver<Delivery>) {
    while let Some(delivery) = acks.recv().await {
        debug!(
            topic = %delivery.topic,
            partition = delivery.partition,
            offset = delivery.offset,
            "event delivered"
        );
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use teamline_common::events::Topic;
    use uuid::Uuid;

    use super::Publisher;
    use crate::bus::EventLog;

    #[tokio::test]
    async fn published_payload_lands_in_the_log() {
        let log = EventLog::new(1);
        let publisher = Publisher::new(log.clone());

        publisher
            .publish(Topic::ProjectCreated, Uuid::new_v4(), &json!({ "name": "alpha" }))
            .await
            .expect("publish should succeed");

        let batch = log.next_batch(Topic::ProjectCreated, 0, 0).await;
        assert_eq!(batch.len(), 1);
        let decoded: serde_json::Value =
            serde_json::from_slice(&batch[0].payload).expect("payload should be json");
        assert_eq!(decoded["name"], "alpha");

        publisher.close().await;
    }

    #[tokio::test]
    async fn close_flushes_queued_records() {
        let log = EventLog::new(1);
        let publisher = Publisher::new(log.clone());

        for index in 0..10 {
            publisher
                .publish(Topic::TaskCreated, Uuid::new_v4(), &json!({ "index": index }))
                .await
                .expect("publish should succeed");
        }

        publisher.close().await;

        let batch = log.next_batch(Topic::TaskCreated, 0, 0).await;
        assert_eq!(batch.len(), 10);
    }

    #[tokio::test]
    async fn publish_after_close_errors() {
        let log = EventLog::new(1);
        let publisher = Publisher::new(log);
        publisher.close().await;

        let result = publisher
            .publish(Topic::TaskCreated, Uuid::new_v4(), &json!({}))
            .await;
        assert!(result.is_err());
    }
}
