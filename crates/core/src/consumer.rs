use std::future::Future;
use std::ops::AddAssign;
use std::sync::Arc;
use std::time::Duration;

use avrosub_common::AvrosubError;
use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{error, info, instrument, warn};

use crate::datasource::{MessageSource, ReceivedMessage};
use crate::pipeline::{MessagePipeline, PipelineError};
use crate::sink::RecordSink;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckDecision {
    Ack,
    Nack,
}

/// How failed messages are settled. Transient failures are always nacked
/// so the transport redelivers them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AckPolicy {
    pub nack_permanent_failures: bool,
}

impl AckPolicy {
    pub fn decide(&self, error: &PipelineError) -> AckDecision {
        if error.is_transient() || self.nack_permanent_failures {
            AckDecision::Nack
        } else {
            AckDecision::Ack
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumerStats {
    pub received: usize,
    pub decoded: usize,
    pub failed: usize,
    pub acked: usize,
    pub nacked: usize,
    /// Messages whose ack or nack call failed; the transport redelivers them.
    pub unsettled: usize,
}

impl AddAssign for ConsumerStats {
    fn add_assign(&mut self, other: Self) {
        self.received += other.received;
        self.decoded += other.decoded;
        self.failed += other.failed;
        self.acked += other.acked;
        self.nacked += other.nacked;
        self.unsettled += other.unsettled;
    }
}

/// A batch was processed but not every message could be settled.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("failed to settle batch: {source}")]
pub struct SettleError {
    /// Outcome of the batch, with the unsettled messages counted.
    pub stats: ConsumerStats,
    pub source: AvrosubError,
}

/// Moves messages from a source through the pipeline into a sink.
pub struct Consumer {
    source: Arc<dyn MessageSource>,
    pipeline: MessagePipeline,
    sink: Arc<dyn RecordSink>,
    policy: AckPolicy,
    idle_backoff: Duration,
}

impl Consumer {
    pub fn new(
        source: Arc<dyn MessageSource>,
        pipeline: MessagePipeline,
        sink: Arc<dyn RecordSink>,
    ) -> Self {
        Self {
            source,
            pipeline,
            sink,
            policy: AckPolicy::default(),
            idle_backoff: Duration::from_secs(1),
        }
    }

    pub fn with_policy(mut self, policy: AckPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Pause after an empty batch or a failed receive.
    pub fn with_idle_backoff(mut self, backoff: Duration) -> Self {
        self.idle_backoff = backoff;
        self
    }

    /// Decodes one batch concurrently, hands records to the sink and settles
    /// every message. Acks and nacks are both attempted even if one fails.
    #[instrument(skip_all, fields(batch_size = batch.len()))]
    pub async fn process_batch(
        &self,
        batch: Vec<ReceivedMessage>,
    ) -> Result<ConsumerStats, SettleError> {
        let mut stats = ConsumerStats {
            received: batch.len(),
            ..Default::default()
        };

        let mut tasks = JoinSet::new();
        for received in batch {
            let pipeline = self.pipeline.clone();
            tasks.spawn(async move {
                let result = pipeline.handle(&received.message).await;
                (received, result)
            });
        }

        let mut acks = Vec::new();
        let mut nacks = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            let (received, result) = match joined {
                Ok(outcome) => outcome,
                Err(err) => {
                    // The ack id is lost with the task; the transport redelivers
                    // once the ack deadline passes.
                    error!(%err, "decode task failed");
                    stats.failed += 1;
                    continue;
                }
            };

            let decision = match result {
                Ok(record) => {
                    match self.sink.write_record(&received.message.id, &record).await {
                        Ok(()) => {
                            stats.decoded += 1;
                            AckDecision::Ack
                        }
                        Err(err) => {
                            warn!(message_id = %received.message.id, %err, "sink rejected record");
                            stats.failed += 1;
                            AckDecision::Nack
                        }
                    }
                }
                Err(err) => {
                    stats.failed += 1;
                    let decision = self.policy.decide(&err);
                    if err.is_transient() {
                        warn!(message_id = %err.message_id, stage = %err.stage, error = %err.source, "transient failure");
                    } else {
                        error!(message_id = %err.message_id, stage = %err.stage, error = %err.source, "failed to decode message");
                    }
                    decision
                }
            };

            match decision {
                AckDecision::Ack => acks.push(received.ack_id),
                AckDecision::Nack => nacks.push(received.ack_id),
            }
        }

        let acked = self.source.acknowledge(&acks).await;
        let nacked = self.source.negative_acknowledge(&nacks).await;

        let mut failures = Vec::new();
        match acked {
            Ok(()) => stats.acked = acks.len(),
            Err(err) => {
                stats.unsettled += acks.len();
                failures.push(format!("acknowledge: {err}"));
            }
        }
        match nacked {
            Ok(()) => stats.nacked = nacks.len(),
            Err(err) => {
                stats.unsettled += nacks.len();
                failures.push(format!("negative acknowledge: {err}"));
            }
        }

        if failures.is_empty() {
            Ok(stats)
        } else {
            Err(SettleError {
                stats,
                source: AvrosubError::Transport(failures.join("; ")),
            })
        }
    }

    /// Receives and processes batches until `shutdown` resolves.
    pub async fn run_until<F>(&self, shutdown: F) -> ConsumerStats
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut total = ConsumerStats::default();

        loop {
            let batch = tokio::select! {
                _ = &mut shutdown => break,
                batch = self.source.receive() => batch,
            };

            let idle = match batch {
                Ok(batch) if batch.is_empty() => true,
                Ok(batch) => match self.process_batch(batch).await {
                    Ok(stats) => {
                        total += stats;
                        false
                    }
                    Err(err) => {
                        warn!(error = %err.source, unsettled = err.stats.unsettled, "failed to settle batch");
                        total += err.stats;
                        true
                    }
                },
                Err(err) => {
                    warn!(%err, "receive failed");
                    true
                }
            };

            if idle {
                tokio::select! {
                    _ = &mut shutdown => break,
                    _ = tokio::time::sleep(self.idle_backoff) => {}
                }
            }
        }

        info!(
            received = total.received,
            decoded = total.decoded,
            failed = total.failed,
            unsettled = total.unsettled,
            "consumer stopped"
        );
        total
    }
}
