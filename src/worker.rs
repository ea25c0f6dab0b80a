//! Background dispatch workers.
//!
//! The writer only runs the pure checks; token lookup and delivery happen on
//! a fixed set of shard workers. A record always hashes to the same shard, so
//! dispatches for one order run in the order their writes were observed.

use futures::future::join_all;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::dispatch::{
    record_outcome, DispatchCoordinator, Plan, PlannedDispatch, DEFAULT_OWNER_FIELD,
    DEFAULT_STATUS_FIELD,
};
use crate::model::{DispatchOutcome, MutationEvent, SkipReason};

/// Called by the storage layer after a monitored record is written.
/// Implementations must return promptly and never fail the write.
pub trait MutationHook: Send + Sync {
    fn on_mutation(&self, event: &MutationEvent);

    /// Field name the hook reads the record status from.
    fn status_field(&self) -> &str {
        DEFAULT_STATUS_FIELD
    }

    /// Field name the hook reads the record owner from.
    fn owner_field(&self) -> &str {
        DEFAULT_OWNER_FIELD
    }
}

/// What happened to a submitted event on the caller's thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    Skipped(SkipReason),
    Queued { shard: usize },
    Dropped,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchStats {
    pub delivered: u64,
    pub skipped: u64,
    pub failed: u64,
    pub dropped: u64,
}

impl DispatchStats {
    fn record(&mut self, outcome: &DispatchOutcome) {
        match outcome {
            DispatchOutcome::Delivered(_) => self.delivered += 1,
            DispatchOutcome::Skipped(_) => self.skipped += 1,
            DispatchOutcome::Failed(_) => self.failed += 1,
        }
    }

    fn merge(&mut self, other: DispatchStats) {
        self.delivered += other.delivered;
        self.skipped += other.skipped;
        self.failed += other.failed;
        self.dropped += other.dropped;
    }
}

pub struct DispatchQueue {
    coordinator: Arc<DispatchCoordinator>,
    shards: Vec<mpsc::Sender<PlannedDispatch>>,
    workers: Vec<JoinHandle<DispatchStats>>,
    skipped: AtomicU64,
    dropped: AtomicU64,
}

/// Stable shard index for an entity id.
pub fn shard_for(entity_id: &str, shards: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    entity_id.hash(&mut hasher);
    (hasher.finish() % shards.max(1) as u64) as usize
}

impl DispatchQueue {
    /// Spawn `workers` shard tasks on the current tokio runtime, each with a
    /// bounded queue of `capacity` dispatches.
    pub fn start(coordinator: Arc<DispatchCoordinator>, workers: usize, capacity: usize) -> Self {
        let workers_n = workers.max(1);
        let mut shards = Vec::with_capacity(workers_n);
        let mut handles = Vec::with_capacity(workers_n);
        for shard in 0..workers_n {
            let (tx, rx) = mpsc::channel(capacity.max(1));
            shards.push(tx);
            handles.push(tokio::spawn(run_worker(shard, coordinator.clone(), rx)));
        }
        info!(workers = workers_n, capacity, "dispatch workers started");
        Self {
            coordinator,
            shards,
            workers: handles,
            skipped: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Run the pure checks inline and queue the rest. Never blocks.
    pub fn submit(&self, event: &MutationEvent) -> Submission {
        match self.coordinator.plan_event(event) {
            Plan::Skip(context, reason) => {
                record_outcome(&context, &DispatchOutcome::Skipped(reason));
                self.skipped.fetch_add(1, Ordering::Relaxed);
                Submission::Skipped(reason)
            }
            Plan::Dispatch(planned) => {
                let shard = shard_for(&planned.context.entity_id, self.shards.len());
                let ctx = planned.context.clone();
                match self.shards[shard].try_send(planned) {
                    Ok(()) => {
                        debug!(dispatch_id = %ctx.dispatch_id, shard, "dispatch queued");
                        Submission::Queued { shard }
                    }
                    Err(err) => {
                        let reason = match err {
                            TrySendError::Full(_) => "queue full",
                            TrySendError::Closed(_) => "queue closed",
                        };
                        warn!(
                            dispatch_id = %ctx.dispatch_id,
                            entity_id = %ctx.entity_id,
                            old_status = %ctx.old_status,
                            new_status = %ctx.new_status,
                            owner_id = %ctx.owner_id,
                            outcome = "dropped",
                            shard,
                            reason,
                            "dispatch dropped"
                        );
                        self.dropped.fetch_add(1, Ordering::Relaxed);
                        Submission::Dropped
                    }
                }
            }
        }
    }

    /// Close the queues and wait for every queued dispatch to finish.
    pub async fn shutdown(self) -> DispatchStats {
        let DispatchQueue {
            shards,
            workers,
            skipped,
            dropped,
            ..
        } = self;
        drop(shards);

        let mut stats = DispatchStats {
            skipped: skipped.into_inner(),
            dropped: dropped.into_inner(),
            ..Default::default()
        };
        for res in join_all(workers).await {
            match res {
                Ok(worker_stats) => stats.merge(worker_stats),
                Err(err) => error!(?err, "dispatch worker panicked"),
            }
        }
        info!(
            delivered = stats.delivered,
            skipped = stats.skipped,
            failed = stats.failed,
            dropped = stats.dropped,
            "dispatch workers stopped"
        );
        stats
    }
}

impl MutationHook for DispatchQueue {
    fn on_mutation(&self, event: &MutationEvent) {
        let _ = self.submit(event);
    }

    fn status_field(&self) -> &str {
        self.coordinator.status_field()
    }

    fn owner_field(&self) -> &str {
        self.coordinator.owner_field()
    }
}

async fn run_worker(
    shard: usize,
    coordinator: Arc<DispatchCoordinator>,
    mut rx: mpsc::Receiver<PlannedDispatch>,
) -> DispatchStats {
    let mut stats = DispatchStats::default();
    while let Some(planned) = rx.recv().await {
        // No retry: a second attempt could show the customer a duplicate.
        let outcome = coordinator.execute(planned).await;
        stats.record(&outcome);
    }
    debug!(shard, "dispatch worker drained");
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Fields;
    use crate::push::DeliveryGateway;
    use crate::recipient::{RecipientResolver, TokenStore};
    use async_trait::async_trait;
    use std::io;
    use std::sync::Mutex;

    struct NoTokens;

    #[async_trait]
    impl TokenStore for NoTokens {
        async fn lookup_by_owner(&self, _owner_id: &str) -> anyhow::Result<Option<String>> {
            Ok(None)
        }
    }

    #[derive(Clone, Default)]
    struct LogBuf(Arc<Mutex<Vec<u8>>>);

    impl io::Write for LogBuf {
        fn write(&mut self, data: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(data);
            Ok(data.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn cooking_event(order: &str) -> MutationEvent {
        let fields = |status: &str| -> Fields {
            [("status", status), ("customer", "alice")]
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect()
        };
        MutationEvent {
            entity_id: order.into(),
            owner_id: None,
            original_fields: fields("pending"),
            current_fields: fields("cooking"),
        }
    }

    #[tokio::test]
    async fn dropped_dispatch_log_carries_full_context() {
        let logs = LogBuf::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let coordinator = DispatchCoordinator::new(
            RecipientResolver::new(Arc::new(NoTokens)),
            DeliveryGateway::unavailable(),
        );
        let queue = DispatchQueue::start(Arc::new(coordinator), 1, 1);
        assert!(matches!(
            queue.submit(&cooking_event("o1")),
            Submission::Queued { .. }
        ));
        assert_eq!(queue.submit(&cooking_event("o1")), Submission::Dropped);
        queue.shutdown().await;

        let text = String::from_utf8(logs.0.lock().unwrap().clone()).unwrap();
        let line = text
            .lines()
            .find(|l| l.contains("dispatch dropped"))
            .expect("drop warning logged");
        for field in [
            "entity_id=o1",
            "old_status=pending",
            "new_status=cooking",
            "owner_id=alice",
            "outcome=\"dropped\"",
        ] {
            assert!(line.contains(field), "missing {field} in {line}");
        }
    }

    #[test]
    fn shard_is_stable_and_in_range() {
        for n in 1..8 {
            let a = shard_for("order-7", n);
            assert!(a < n);
            assert_eq!(a, shard_for("order-7", n));
        }
        assert_eq!(shard_for("anything", 0), 0);
    }

    #[test]
    fn stats_merge_adds_counts() {
        let mut a = DispatchStats {
            delivered: 1,
            skipped: 2,
            failed: 0,
            dropped: 1,
        };
        a.merge(DispatchStats {
            delivered: 3,
            skipped: 0,
            failed: 2,
            dropped: 0,
        });
        assert_eq!(
            a,
            DispatchStats {
                delivered: 4,
                skipped: 2,
                failed: 2,
                dropped: 1
            }
        );
    }
}
