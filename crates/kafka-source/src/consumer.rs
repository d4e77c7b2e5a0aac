//! The batch consumer loop.

use crate::batch::{group_batch, Heartbeat, TopicGroup};
use crate::connection::{BrokerAdmin, ConnectionManager};
use crate::error::Result;
use crate::router::{EventHandlers, TopicRouter};
use crate::session::{Liveness, LogSession};
use event_types::{LogRecord, TopicRegistry};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Lifecycle of a [`BatchConsumer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    Disconnected,
    Connecting,
    Running,
    Stopping,
    Stopped,
}

/// Why [`BatchConsumer::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The shutdown token was cancelled.
    Requested,
    /// The group membership was lost and cannot be resumed.
    SessionLost,
}

/// Settings for the batch loop itself. Transport settings live in
/// [`crate::ConsumerConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchSettings {
    /// Minimum time between two heartbeats while a batch is processed
    pub heartbeat_interval: Duration,
    /// Pause after a failed pull before trying again
    pub pull_retry_interval: Duration,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(3),
            pull_retry_interval: Duration::from_secs(1),
        }
    }
}

/// Running counters, readable while the consumer runs.
#[derive(Debug, Default)]
pub struct ConsumerStats {
    batches: AtomicU64,
    records_parsed: AtomicU64,
    records_skipped: AtomicU64,
    records_handled: AtomicU64,
    handler_failures: AtomicU64,
    batches_failed: AtomicU64,
    groups_abandoned: AtomicU64,
    commits: AtomicU64,
}

/// A point-in-time copy of [`ConsumerStats`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub batches: u64,
    pub records_parsed: u64,
    pub records_skipped: u64,
    pub records_handled: u64,
    pub handler_failures: u64,
    pub batches_failed: u64,
    pub groups_abandoned: u64,
    pub commits: u64,
}

impl ConsumerStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            batches: self.batches.load(Ordering::Relaxed),
            records_parsed: self.records_parsed.load(Ordering::Relaxed),
            records_skipped: self.records_skipped.load(Ordering::Relaxed),
            records_handled: self.records_handled.load(Ordering::Relaxed),
            handler_failures: self.handler_failures.load(Ordering::Relaxed),
            batches_failed: self.batches_failed.load(Ordering::Relaxed),
            groups_abandoned: self.groups_abandoned.load(Ordering::Relaxed),
            commits: self.commits.load(Ordering::Relaxed),
        }
    }
}

enum BatchOutcome {
    Completed,
    Abandoned(Liveness),
    Stopped,
}

/// Pulls batches from a [`LogSession`], groups them by topic and dispatches
/// each group through a [`TopicRouter`].
///
/// Groups of one batch are processed strictly one after another; the records
/// within a group are dispatched concurrently. Offsets are committed only after
/// every group of a batch has been dispatched.
pub struct BatchConsumer<H: EventHandlers> {
    router: TopicRouter<H>,
    registry: TopicRegistry,
    settings: BatchSettings,
    stats: Arc<ConsumerStats>,
    state: watch::Sender<ConsumerState>,
    shutdown: CancellationToken,
}

impl<H: EventHandlers> BatchConsumer<H> {
    pub fn new(router: TopicRouter<H>, registry: TopicRegistry, settings: BatchSettings) -> Self {
        let (state, _) = watch::channel(ConsumerState::Disconnected);
        Self {
            router,
            registry,
            settings,
            stats: Arc::new(ConsumerStats::default()),
            state,
            shutdown: CancellationToken::new(),
        }
    }

    /// Token that stops the consumer when cancelled.
    ///
    /// A batch already being dispatched finishes its current topic group;
    /// remaining groups are abandoned and nothing further is committed.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn state(&self) -> ConsumerState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConsumerState> {
        self.state.subscribe()
    }

    pub fn stats(&self) -> Arc<ConsumerStats> {
        Arc::clone(&self.stats)
    }

    pub fn router(&self) -> &TopicRouter<H> {
        &self.router
    }

    fn set_state(&self, next: ConsumerState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            debug!("Consumer state: {:?} -> {:?}", previous, next);
        }
    }

    /// Connect through `connections` and run until stopped.
    ///
    /// `connect` is retried under the manager's policy. If it never succeeds
    /// the consumer ends up `Stopped` and the error is returned.
    pub async fn start<A, S, F, Fut>(
        &self,
        connections: &ConnectionManager<A>,
        connect: F,
    ) -> Result<StopReason>
    where
        A: BrokerAdmin,
        S: LogSession,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<S>>,
    {
        self.set_state(ConsumerState::Connecting);
        let session = match connections
            .connect_with_retry("Connecting Kafka consumer", connect)
            .await
        {
            Ok(session) => session,
            Err(e) => {
                self.set_state(ConsumerState::Stopped);
                return Err(e);
            }
        };
        Ok(self.run(session).await)
    }

    /// Process batches from `session` until the shutdown token is cancelled
    /// or the membership is lost.
    pub async fn run<S: LogSession>(&self, mut session: S) -> StopReason {
        self.set_state(ConsumerState::Running);
        info!("Consumer running");

        let reason = loop {
            if self.shutdown.is_cancelled() {
                break StopReason::Requested;
            }
            if session.liveness() == Liveness::Lost {
                error!("Consumer group membership lost, stopping");
                break StopReason::SessionLost;
            }

            let pulled = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break StopReason::Requested,
                pulled = session.next_batch() => pulled,
            };

            let batch = match pulled {
                Ok(batch) => batch,
                Err(e) => {
                    error!("Failed to pull batch: {e}");
                    tokio::select! {
                        _ = self.shutdown.cancelled() => break StopReason::Requested,
                        _ = tokio::time::sleep(self.settings.pull_retry_interval) => continue,
                    }
                }
            };
            if batch.is_empty() {
                continue;
            }

            match self.process_batch(&mut session, batch).await {
                Ok(BatchOutcome::Completed) => match session.commit().await {
                    Ok(()) => {
                        self.stats.commits.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => warn!("Failed to commit offsets: {e}"),
                },
                Ok(BatchOutcome::Abandoned(liveness)) => {
                    warn!("Batch abandoned, session is {:?}", liveness);
                }
                Ok(BatchOutcome::Stopped) => break StopReason::Requested,
                Err(e) => {
                    self.stats.batches_failed.fetch_add(1, Ordering::Relaxed);
                    error!("Error processing batch: {e}");
                }
            }
        };

        self.set_state(ConsumerState::Stopping);
        if let Err(e) = session.close().await {
            warn!("Failed to close consumer session: {e}");
        }
        self.set_state(ConsumerState::Stopped);
        info!(
            "Consumer stopped ({:?}): {:?}",
            reason,
            self.stats.snapshot()
        );
        reason
    }

    async fn process_batch<S: LogSession + ?Sized>(
        &self,
        session: &mut S,
        batch: Vec<LogRecord>,
    ) -> Result<BatchOutcome> {
        self.stats.batches.fetch_add(1, Ordering::Relaxed);
        let size = batch.len();

        let mut heartbeat = Heartbeat::new(self.settings.heartbeat_interval);
        let (groups, summary) = group_batch(session, &self.registry, batch, &mut heartbeat).await?;
        self.stats
            .records_parsed
            .fetch_add(summary.parsed, Ordering::Relaxed);
        self.stats
            .records_skipped
            .fetch_add(summary.skipped(), Ordering::Relaxed);
        debug!(
            "Batch of {} records split into {} topic groups: {:?}",
            size,
            groups.len(),
            summary
        );

        for (index, group) in groups.iter().enumerate() {
            if self.shutdown.is_cancelled() {
                self.abandon(&groups[index..]);
                return Ok(BatchOutcome::Stopped);
            }
            match session.liveness() {
                Liveness::Live => {}
                other => {
                    self.abandon(&groups[index..]);
                    return Ok(BatchOutcome::Abandoned(other));
                }
            }

            let outcome = self.router.dispatch_group(group).await;
            self.stats
                .records_handled
                .fetch_add(outcome.handled, Ordering::Relaxed);
            self.stats
                .handler_failures
                .fetch_add(outcome.failed, Ordering::Relaxed);

            heartbeat.beat(session).await?;
        }

        Ok(BatchOutcome::Completed)
    }

    fn abandon(&self, remaining: &[TopicGroup]) {
        let topics: Vec<&str> = remaining.iter().map(|g| g.topic.as_str()).collect();
        warn!(
            "Abandoning {} remaining topic groups: {:?}",
            remaining.len(),
            topics
        );
        self.stats
            .groups_abandoned
            .fetch_add(remaining.len() as u64, Ordering::Relaxed);
    }
}
