// Subscriber runtime.
//
// A subscriber joins a named consumer group and runs one claim task per
// (topic, partition), so a partition's records reach the handler
// strictly in offset order while groups progress independently.
//
// Handler outcomes drive offset management:
// - success: commit and continue;
// - terminal: the record can never succeed (bad payload, irrecoverably
//   missing entity) — log, commit, continue, never block the partition;
// - transient: do not commit; back off with bounded exponential jitter
//   and redeliver from the committed offset.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use teamline_common::events::Topic;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use super::log::{EventLog, Record};

const BACKOFF_BASE: Duration = Duration::from_millis(100);
const BACKOFF_CAP: Duration = Duration::from_secs(30);

/// A record as seen by handlers.
#[derive(Debug, Clone)]
pub struct ConsumedRecord {
    pub topic: Topic,
    pub key: Option<Vec<u8>>,
    pub payload: Vec<u8>,
    pub timestamp: DateTime<Utc>,
}

impl From<&Record> for ConsumedRecord {
    fn from(record: &Record) -> Self {
        Self {
            topic: record.topic,
            key: record.key.clone(),
            payload: record.payload.clone(),
            timestamp: record.timestamp,
        }
    }
}

#[derive(Debug)]
pub enum HandlerError {
    /// The record is not retryable; it is logged and skipped.
    Terminal(anyhow::Error),
    /// Unknown-cause failure; the record is redelivered after backoff.
    Transient(anyhow::Error),
}

impl HandlerError {
    pub fn terminal(error: impl Into<anyhow::Error>) -> Self {
        Self::Terminal(error.into())
    }

    pub fn transient(error: impl Into<anyhow::Error>) -> Self {
        Self::Transient(error.into())
    }
}

pub type HandlerResult = Result<(), HandlerError>;

pub struct Subscriber {
    log: Arc<EventLog>,
    group: String,
    shutdown: CancellationToken,
    workers: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl Subscriber {
    pub fn new(log: Arc<EventLog>, group: impl Into<String>, shutdown: CancellationToken) -> Self {
        Self { log, group: group.into(), shutdown, workers: std::sync::Mutex::new(Vec::new()) }
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    /// Spawns one claim task per (topic, partition).
    pub fn subscribe<H, Fut>(&self, topics: &[Topic], handler: H)
    where
        H: Fn(ConsumedRecord) -> Fut + Clone + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        let mut workers = self.workers.lock().expect("subscriber worker lock poisoned");

        for &topic in topics {
            for partition in 0..self.log.partitions() {
                workers.push(tokio::spawn(consume_partition(
                    self.log.clone(),
                    self.group.clone(),
                    topic,
                    partition,
                    handler.clone(),
                    self.shutdown.clone(),
                )));
            }
        }
    }

    /// Waits for every claim task to finish the in-flight record and
    /// exit. Call after cancelling the shutdown token.
    pub async fn join(&self) {
        let workers: Vec<JoinHandle<()>> = {
            let mut guard = self.workers.lock().expect("subscriber worker lock poisoned");
            guard.drain(..).collect()
        };

        for worker in workers {
            let _ = worker.await;
        }
    }
}

async fn consume_partition<H, Fut>(
    log: Arc<EventLog>,
    group: String,
    topic: Topic,
    partition: usize,
    handler: H,
    shutdown: CancellationToken,
) where
    H: Fn(ConsumedRecord) -> Fut + Send + Sync,
    Fut: Future<Output = HandlerResult> + Send,
{
    let mut backoff = Backoff::default();

    loop {
        let offset = log.committed(&group, topic, partition).await;

        let batch = tokio::select! {
            _ = shutdown.cancelled() => return,
            batch = log.next_batch(topic, partition, offset) => batch,
        };

        for record in batch {
            match handler(ConsumedRecord::from(&*record)).await {
                Ok(()) => {
                    log.commit(&group, topic, partition, record.offset + 1).await;
                    backoff.reset();
                }
                Err(HandlerError::Terminal(cause)) => {
                    warn!(
                        group = %group,
                        topic = %topic,
                        partition,
                        offset = record.offset,
                        error = ?cause,
                        "dropping unprocessable record"
                    );
                    log.commit(&group, topic, partition, record.offset + 1).await;
                    backoff.reset();
                }
                Err(HandlerError::Transient(cause)) => {
                    let delay = backoff.next_delay();
                    error!(
                        group = %group,
                        topic = %topic,
                        partition,
                        offset = record.offset,
                        retry_in_ms = delay.as_millis() as u64,
                        error = ?cause,
                        "handler failed, will redeliver"
                    );
                    tokio::select! {
                        _ = shutdown.cancelled() => return,
                        _ = tokio::time::sleep(delay) => {}
                    }
                    // Re-read from the committed offset.
                    break;
                }
            }

            if shutdown.is_cancelled() {
                return;
            }
        }
    }
}

/// Bounded exponential backoff with jitter.
#[derive(Debug, Default)]
struct Backoff {
    attempt: u32,
}

impl Backoff {
    fn next_delay(&mut self) -> Duration {
        let exponent = self.attempt.min(8);
        self.attempt = self.attempt.saturating_add(1);

        let base = BACKOFF_BASE.saturating_mul(2u32.saturating_pow(exponent)).min(BACKOFF_CAP);
        let jitter_ceiling = (base.as_millis() as u64 / 2).max(1);
        let jitter = rand::thread_rng().gen_range(0..jitter_ceiling);

        base + Duration::from_millis(jitter)
    }

    fn reset(&mut self) {
        self.attempt = 0;
    }
}
