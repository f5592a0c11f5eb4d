//! Connectivity-driven flush of the write queue.
//!
//! The scheduler is an explicit state machine:
//!
//! ```text
//! Idle ──trigger──▶ Flushing ──drained/offline──▶ Idle
//!                      │
//!                      ├──retryable failure──▶ Backoff { until_ms }
//!                      └──attempts exhausted──▶ Stalled
//! ```
//!
//! `Timer` and `Foreground` triggers respect an unexpired backoff window and
//! the stalled state. `Manual` and `ConnectivityRestored` always start a pass.
//! At most one pass runs at a time.
//!
//! [`FlushScheduler::run`] converts a backoff window into a runtime deadline
//! once, when it is entered, and retries when that deadline elapses.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, Interval, MissedTickBehavior};

use super::{MutationBackend, ReplayOutcome, RetryPolicy, SharedClock, SyncError};
use crate::models::{MutationId, QueuedMutation};
use crate::services::{ConflictStore, SyncStorage, WriteQueue};
use crate::Result;

/// What asked for a flush
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushTrigger {
    /// Connectivity went from offline to online
    ConnectivityRestored,
    /// The app returned to the foreground
    Foreground,
    /// The user pressed "flush now"
    Manual,
    /// Periodic timer or an elapsed backoff deadline
    Timer,
}

impl FlushTrigger {
    const fn bypasses_backoff(self) -> bool {
        matches!(self, Self::Manual | Self::ConnectivityRestored)
    }
}

/// Observable scheduler state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Flushing,
    /// Waiting before retrying the front mutation
    Backoff { until_ms: i64, attempts: u32 },
    /// Automatic retries gave up; shown to the user as "sync stalled"
    Stalled { mutation_id: MutationId, attempts: u32 },
}

/// How a flush request ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlushOutcome {
    /// The queue is empty
    Drained,
    /// Connectivity is down; nothing more was sent
    Offline,
    /// A transient failure paused the pass until `until_ms`
    RetryScheduled { until_ms: i64, attempts: u32 },
    /// A transient failure exhausted the retry budget
    Stalled { mutation_id: MutationId, attempts: u32 },
    /// Another pass was already running; this trigger was ignored
    AlreadyRunning,
    /// The trigger arrived during backoff or while stalled
    Deferred,
}

/// Summary of one flush request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlushReport {
    pub outcome: FlushOutcome,
    /// Mutations the backend applied in this pass
    pub applied: usize,
    /// Mutations the backend recognised by idempotency key
    pub already_applied: usize,
    /// Mutations moved to the conflict store
    pub conflicts: Vec<MutationId>,
    /// Malformed mutations dropped from the queue
    pub dropped: Vec<MutationId>,
}

impl FlushReport {
    const fn new(outcome: FlushOutcome) -> Self {
        Self {
            outcome,
            applied: 0,
            already_applied: 0,
            conflicts: Vec::new(),
            dropped: Vec::new(),
        }
    }

    /// Mutations removed from the queue as delivered
    pub const fn delivered(&self) -> usize {
        self.applied + self.already_applied
    }
}

/// Drains the [`WriteQueue`] against a [`MutationBackend`], one mutation at a time.
pub struct FlushScheduler<B> {
    queue: WriteQueue,
    conflicts: ConflictStore,
    backend: B,
    connectivity: watch::Receiver<bool>,
    clock: SharedClock,
    policy: RetryPolicy,
    periodic: Option<Duration>,
    in_flight: AtomicBool,
    state: watch::Sender<SchedulerState>,
}

impl<B: MutationBackend> FlushScheduler<B> {
    pub fn new(storage: &SyncStorage, backend: B, connectivity: watch::Receiver<bool>) -> Self {
        Self {
            queue: storage.queue(),
            conflicts: storage.conflicts(),
            backend,
            connectivity,
            clock: storage.clock(),
            policy: RetryPolicy::default(),
            periodic: None,
            in_flight: AtomicBool::new(false),
            state: watch::Sender::new(SchedulerState::Idle),
        }
    }

    #[must_use]
    pub const fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Enable the periodic `Timer` trigger in [`FlushScheduler::run`].
    #[must_use]
    pub const fn with_periodic_flush(mut self, interval: Option<Duration>) -> Self {
        self.periodic = interval;
        self
    }

    pub fn state(&self) -> SchedulerState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SchedulerState> {
        self.state.subscribe()
    }

    pub fn is_online(&self) -> bool {
        *self.connectivity.borrow()
    }

    pub fn is_flushing(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Handle one trigger. Never runs two passes concurrently.
    pub async fn trigger(&self, trigger: FlushTrigger) -> Result<FlushReport> {
        self.start_pass(trigger, !trigger.bypasses_backoff()).await
    }

    async fn start_pass(
        &self,
        trigger: FlushTrigger,
        respect_backoff: bool,
    ) -> Result<FlushReport> {
        let Some(_flight) = FlightGuard::acquire(&self.in_flight, &self.state) else {
            tracing::debug!(?trigger, "Flush already in progress; trigger ignored");
            return Ok(FlushReport::new(FlushOutcome::AlreadyRunning));
        };

        if respect_backoff && self.is_gated() {
            tracing::debug!(?trigger, state = ?self.state(), "Flush deferred");
            return Ok(FlushReport::new(FlushOutcome::Deferred));
        }

        self.state.send_replace(SchedulerState::Flushing);
        let mut report = FlushReport::new(FlushOutcome::Drained);

        match self.drain(&mut report).await {
            Ok(outcome) => {
                self.state.send_replace(Self::next_state(&outcome));
                report.outcome = outcome;
                tracing::info!(
                    ?trigger,
                    outcome = ?report.outcome,
                    applied = report.applied,
                    already_applied = report.already_applied,
                    conflicts = report.conflicts.len(),
                    dropped = report.dropped.len(),
                    "Flush pass finished"
                );
                Ok(report)
            }
            Err(error) => {
                self.state.send_replace(SchedulerState::Idle);
                tracing::error!(?trigger, "Flush pass failed: {error}");
                Err(error)
            }
        }
    }

    /// Event loop: connectivity edges, backoff deadlines, the periodic timer
    /// and externally sent triggers (foreground, manual).
    ///
    /// Returns when every trigger sender has been dropped.
    pub async fn run(&self, mut triggers: mpsc::Receiver<FlushTrigger>) -> Result<()> {
        let mut connectivity = self.connectivity.clone();
        let mut was_online = *connectivity.borrow_and_update();
        let mut connectivity_open = true;
        let mut ticker = self.periodic.map(|period| {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            interval
        });

        let mut retry_deadline = None;

        tracing::info!(online = was_online, "Flush scheduler started");

        loop {
            retry_deadline = self.retry_deadline(retry_deadline);

            tokio::select! {
                trigger = triggers.recv() => {
                    let Some(trigger) = trigger else { break };
                    self.dispatch(trigger).await;
                }
                changed = connectivity.changed(), if connectivity_open => {
                    if changed.is_err() {
                        connectivity_open = false;
                        continue;
                    }
                    let online = *connectivity.borrow_and_update();
                    if online && !was_online {
                        self.dispatch(FlushTrigger::ConnectivityRestored).await;
                    }
                    was_online = online;
                }
                () = sleep_until(retry_deadline) => {
                    retry_deadline = None;
                    // The window's own deadline: retry without re-reading the clock
                    if let Err(error) = self.start_pass(FlushTrigger::Timer, false).await {
                        tracing::error!("Backoff retry failed: {error}");
                    }
                }
                () = next_tick(&mut ticker) => {
                    self.dispatch(FlushTrigger::Timer).await;
                }
            }
        }

        tracing::info!("Flush scheduler stopped");
        Ok(())
    }

    async fn dispatch(&self, trigger: FlushTrigger) {
        if let Err(error) = self.trigger(trigger).await {
            tracing::error!(?trigger, "Flush trigger failed: {error}");
        }
    }

    fn is_gated(&self) -> bool {
        match self.state() {
            SchedulerState::Backoff { until_ms, .. } => self.clock.now_ms() < until_ms,
            SchedulerState::Stalled { .. } => true,
            SchedulerState::Idle | SchedulerState::Flushing => false,
        }
    }

    /// Runtime deadline for the current backoff window, kept stable while the
    /// window is unchanged so unrelated wakeups do not push the retry back.
    fn retry_deadline(&self, current: Option<RetryDeadline>) -> Option<RetryDeadline> {
        let SchedulerState::Backoff { until_ms, .. } = self.state() else {
            return None;
        };
        if let Some(current) = current.filter(|deadline| deadline.until_ms == until_ms) {
            return Some(current);
        }
        let remaining = until_ms.saturating_sub(self.clock.now_ms()).max(0);
        let wait = Duration::from_millis(u64::try_from(remaining).unwrap_or_default());
        Some(RetryDeadline {
            until_ms,
            at: Instant::now() + wait,
        })
    }

    const fn next_state(outcome: &FlushOutcome) -> SchedulerState {
        match *outcome {
            FlushOutcome::RetryScheduled { until_ms, attempts } => {
                SchedulerState::Backoff { until_ms, attempts }
            }
            FlushOutcome::Stalled {
                mutation_id,
                attempts,
            } => SchedulerState::Stalled {
                mutation_id,
                attempts,
            },
            _ => SchedulerState::Idle,
        }
    }

    /// Replay front-to-back until empty, offline, or paused by a retryable failure.
    async fn drain(&self, report: &mut FlushReport) -> Result<FlushOutcome> {
        loop {
            if !self.is_online() {
                return Ok(FlushOutcome::Offline);
            }
            let Some(mutation) = self.queue.peek_front().await? else {
                return Ok(FlushOutcome::Drained);
            };

            tracing::debug!(
                id = %mutation.id,
                operation = %mutation.operation,
                attempts = mutation.attempts,
                "Replaying mutation"
            );

            match self.backend.replay(&mutation).await {
                Ok(ReplayOutcome::Applied) => {
                    self.queue.remove_by_id(&mutation.id).await?;
                    report.applied += 1;
                }
                Ok(ReplayOutcome::AlreadyApplied) => {
                    self.queue.remove_by_id(&mutation.id).await?;
                    report.already_applied += 1;
                    tracing::debug!(id = %mutation.id, "Backend already applied mutation");
                }
                Err(SyncError::Retryable(detail)) => {
                    if let Some(outcome) = self.pause(&mutation, &detail).await? {
                        return Ok(outcome);
                    }
                }
                Err(SyncError::Conflict(detail)) => {
                    if self.conflicts.capture(&mutation.id, &detail).await?.is_some() {
                        tracing::warn!(
                            id = %mutation.id,
                            operation = %mutation.operation,
                            %detail,
                            "Replay conflict; moved to conflict store"
                        );
                        report.conflicts.push(mutation.id);
                    }
                }
                Err(SyncError::Malformed(detail)) => {
                    if self.queue.remove_by_id(&mutation.id).await? {
                        tracing::error!(
                            id = %mutation.id,
                            operation = %mutation.operation,
                            %detail,
                            "Dropping malformed mutation"
                        );
                        report.dropped.push(mutation.id);
                    }
                }
            }
        }
    }

    /// Requeue after a transient failure and decide how long to wait.
    ///
    /// Returns `None` when the mutation disappeared meanwhile, so the pass
    /// simply moves on to the new front.
    async fn pause(&self, mutation: &QueuedMutation, detail: &str) -> Result<Option<FlushOutcome>> {
        let Some(updated) = self.queue.requeue(&mutation.id, detail).await? else {
            return Ok(None);
        };

        if self.policy.is_exhausted(updated.attempts) {
            tracing::warn!(
                id = %updated.id,
                attempts = updated.attempts,
                %detail,
                "Sync stalled; automatic retries exhausted"
            );
            return Ok(Some(FlushOutcome::Stalled {
                mutation_id: updated.id,
                attempts: updated.attempts,
            }));
        }

        let delay = self.policy.delay_for(updated.attempts);
        let until_ms = self
            .clock
            .now_ms()
            .saturating_add(i64::try_from(delay.as_millis()).unwrap_or(i64::MAX));
        tracing::warn!(
            id = %updated.id,
            attempts = updated.attempts,
            retry_in_ms = delay.as_millis(),
            %detail,
            "Replay failed; will retry"
        );
        Ok(Some(FlushOutcome::RetryScheduled {
            until_ms,
            attempts: updated.attempts,
        }))
    }
}

/// Single-flight flag, cleared when the pass completes, fails or is cancelled.
struct FlightGuard<'a> {
    flag: &'a AtomicBool,
    state: &'a watch::Sender<SchedulerState>,
}

impl<'a> FlightGuard<'a> {
    fn acquire(flag: &'a AtomicBool, state: &'a watch::Sender<SchedulerState>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag, state })
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.state.send_if_modified(|state| {
            if matches!(state, SchedulerState::Flushing) {
                *state = SchedulerState::Idle;
                true
            } else {
                false
            }
        });
        self.flag.store(false, Ordering::Release);
    }
}

/// A backoff window pinned to the runtime clock
#[derive(Debug, Clone, Copy)]
struct RetryDeadline {
    until_ms: i64,
    at: Instant,
}

async fn sleep_until(deadline: Option<RetryDeadline>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline.at).await,
        None => std::future::pending().await,
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Operation;
    use crate::sync::{ManualClock, ReplayResult};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::collections::{HashMap, HashSet, VecDeque};
    use std::sync::atomic::AtomicUsize;
    use std::sync::{Arc, Mutex};

    /// Backend answering from per-path scripts; unscripted calls succeed.
    #[derive(Default)]
    struct ScriptedBackend {
        scripts: Mutex<HashMap<String, VecDeque<ReplayResult>>>,
        calls: Mutex<Vec<String>>,
        delay: Option<Duration>,
        active: AtomicUsize,
        max_active: AtomicUsize,
    }

    impl ScriptedBackend {
        fn with_delay(delay: Duration) -> Self {
            Self {
                delay: Some(delay),
                ..Self::default()
            }
        }

        fn script(&self, path: &str, results: impl IntoIterator<Item = ReplayResult>) {
            self.scripts
                .lock()
                .unwrap()
                .entry(path.to_string())
                .or_default()
                .extend(results);
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl MutationBackend for ScriptedBackend {
        async fn replay(&self, mutation: &QueuedMutation) -> ReplayResult {
            let path = mutation.operation.path.clone();
            self.calls.lock().unwrap().push(path.clone());

            let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(active, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.active.fetch_sub(1, Ordering::SeqCst);

            self.scripts
                .lock()
                .unwrap()
                .get_mut(&path)
                .and_then(VecDeque::pop_front)
                .unwrap_or(Ok(ReplayOutcome::Applied))
        }
    }

    /// Backend that applies each idempotency key once, losing the first response.
    #[derive(Default)]
    struct LossyIdempotentBackend {
        seen: Mutex<HashSet<MutationId>>,
        applied: AtomicUsize,
    }

    impl MutationBackend for LossyIdempotentBackend {
        async fn replay(&self, mutation: &QueuedMutation) -> ReplayResult {
            if !self.seen.lock().unwrap().insert(mutation.id) {
                return Ok(ReplayOutcome::AlreadyApplied);
            }
            self.applied.fetch_add(1, Ordering::SeqCst);
            Err(SyncError::Retryable("connection reset before response".to_string()))
        }
    }

    struct Harness {
        storage: SyncStorage,
        clock: ManualClock,
        online: watch::Sender<bool>,
    }

    impl Harness {
        fn new(online: bool) -> Self {
            let clock = ManualClock::new(1_000_000);
            let storage = SyncStorage::open_in_memory(Arc::new(clock.clone())).unwrap();
            let (online, _) = watch::channel(online);
            Self {
                storage,
                clock,
                online,
            }
        }

        fn scheduler<B: MutationBackend>(&self, backend: B) -> FlushScheduler<B> {
            FlushScheduler::new(&self.storage, backend, self.online.subscribe())
        }

        async fn enqueue(&self, path: &str) -> MutationId {
            self.storage
                .queue()
                .enqueue(
                    Operation::new(crate::models::HttpMethod::Post, path).unwrap(),
                    &json!({ "path": path }),
                )
                .await
                .unwrap()
        }

        async fn queued_paths(&self) -> Vec<String> {
            self.storage
                .queue()
                .list()
                .await
                .unwrap()
                .into_iter()
                .map(|m| m.operation.path)
                .collect()
        }
    }

    #[tokio::test]
    async fn drains_queue_in_fifo_order() {
        let harness = Harness::new(true);
        for path in ["/a", "/b", "/c"] {
            harness.enqueue(path).await;
        }
        let backend = Arc::new(ScriptedBackend::default());
        let scheduler = harness.scheduler(Arc::clone(&backend));

        let report = scheduler.trigger(FlushTrigger::Manual).await.unwrap();

        assert_eq!(report.outcome, FlushOutcome::Drained);
        assert_eq!(report.applied, 3);
        assert_eq!(backend.calls(), vec!["/a", "/b", "/c"]);
        assert!(harness.storage.queue().is_empty().await.unwrap());
        assert_eq!(scheduler.state(), SchedulerState::Idle);
    }

    #[tokio::test]
    async fn conflict_does_not_block_later_mutations() {
        let harness = Harness::new(true);
        let a = harness.enqueue("/sessions/1/lines").await;
        harness.enqueue("/sessions/2/lines").await;
        harness.enqueue("/sessions/3/lines").await;

        let backend = Arc::new(ScriptedBackend::default());
        backend.script(
            "/sessions/1/lines",
            [Err(SyncError::Conflict("session 1 already closed".to_string()))],
        );
        let scheduler = harness.scheduler(Arc::clone(&backend));

        let report = scheduler.trigger(FlushTrigger::Manual).await.unwrap();

        assert_eq!(report.outcome, FlushOutcome::Drained);
        assert_eq!(report.applied, 2);
        assert_eq!(report.conflicts, vec![a]);
        assert!(harness.storage.queue().get(&a).await.unwrap().is_none());

        let conflicts = harness.storage.conflicts().list().await.unwrap();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].id, a);
        assert_eq!(conflicts[0].detail, "session 1 already closed");
    }

    #[tokio::test]
    async fn retryable_failure_pauses_pass_and_preserves_order() {
        let harness = Harness::new(true);
        for path in ["/a", "/b", "/c", "/d"] {
            harness.enqueue(path).await;
        }
        let backend = Arc::new(ScriptedBackend::default());
        backend.script("/b", [Err(SyncError::Retryable("HTTP 503".to_string()))]);
        let scheduler = harness.scheduler(Arc::clone(&backend));

        let report = scheduler.trigger(FlushTrigger::Manual).await.unwrap();

        assert_eq!(
            report.outcome,
            FlushOutcome::RetryScheduled {
                until_ms: 1_000_000 + 2_000,
                attempts: 1
            }
        );
        assert_eq!(backend.calls(), vec!["/a", "/b"]);
        assert_eq!(harness.queued_paths().await, vec!["/b", "/c", "/d"]);

        let front = harness.storage.queue().peek_front().await.unwrap().unwrap();
        assert_eq!(front.attempts, 1);
        assert_eq!(front.last_error.as_deref(), Some("HTTP 503"));
        assert_eq!(
            scheduler.state(),
            SchedulerState::Backoff {
                until_ms: 1_002_000,
                attempts: 1
            }
        );
    }

    #[tokio::test]
    async fn timer_respects_backoff_but_manual_bypasses_it() {
        let harness = Harness::new(true);
        harness.enqueue("/a").await;
        let backend = Arc::new(ScriptedBackend::default());
        backend.script(
            "/a",
            [
                Err(SyncError::Retryable("timeout".to_string())),
                Err(SyncError::Retryable("timeout".to_string())),
            ],
        );
        let scheduler = harness.scheduler(Arc::clone(&backend));

        scheduler.trigger(FlushTrigger::Manual).await.unwrap();
        let deferred = scheduler.trigger(FlushTrigger::Timer).await.unwrap();
        assert_eq!(deferred.outcome, FlushOutcome::Deferred);
        let deferred = scheduler.trigger(FlushTrigger::Foreground).await.unwrap();
        assert_eq!(deferred.outcome, FlushOutcome::Deferred);
        assert_eq!(backend.calls().len(), 1);

        // Second failure doubles the delay
        let manual = scheduler.trigger(FlushTrigger::Manual).await.unwrap();
        assert_eq!(
            manual.outcome,
            FlushOutcome::RetryScheduled {
                until_ms: 1_000_000 + 4_000,
                attempts: 2
            }
        );

        harness.clock.advance(Duration::from_secs(4));
        let timer = scheduler.trigger(FlushTrigger::Timer).await.unwrap();
        assert_eq!(timer.outcome, FlushOutcome::Drained);
        assert_eq!(timer.applied, 1);
        assert_eq!(backend.calls().len(), 3);
    }

    #[tokio::test]
    async fn exhausted_retries_stall_until_manual_retry() {
        let harness = Harness::new(true);
        let id = harness.enqueue("/a").await;
        let backend = Arc::new(ScriptedBackend::default());
        backend.script(
            "/a",
            [
                Err(SyncError::Retryable("HTTP 502".to_string())),
                Err(SyncError::Retryable("HTTP 502".to_string())),
            ],
        );
        let scheduler = harness
            .scheduler(Arc::clone(&backend))
            .with_retry_policy(RetryPolicy {
                base_delay: Duration::from_millis(10),
                max_delay: Duration::from_millis(100),
                max_attempts: 2,
            });

        scheduler.trigger(FlushTrigger::Manual).await.unwrap();
        harness.clock.advance(Duration::from_secs(1));
        let report = scheduler.trigger(FlushTrigger::Timer).await.unwrap();
        assert_eq!(
            report.outcome,
            FlushOutcome::Stalled {
                mutation_id: id,
                attempts: 2
            }
        );
        assert_eq!(
            scheduler.state(),
            SchedulerState::Stalled {
                mutation_id: id,
                attempts: 2
            }
        );

        harness.clock.advance(Duration::from_secs(60));
        let timer = scheduler.trigger(FlushTrigger::Timer).await.unwrap();
        assert_eq!(timer.outcome, FlushOutcome::Deferred);

        let manual = scheduler.trigger(FlushTrigger::Manual).await.unwrap();
        assert_eq!(manual.outcome, FlushOutcome::Drained);
        assert_eq!(scheduler.state(), SchedulerState::Idle);
    }

    #[tokio::test]
    async fn concurrent_triggers_run_a_single_pass() {
        let harness = Harness::new(true);
        harness.enqueue("/a").await;
        harness.enqueue("/b").await;
        let backend = Arc::new(ScriptedBackend::with_delay(Duration::from_millis(20)));
        let scheduler = harness.scheduler(Arc::clone(&backend));

        let (first, second) = tokio::join!(
            scheduler.trigger(FlushTrigger::ConnectivityRestored),
            scheduler.trigger(FlushTrigger::Foreground),
        );

        let outcomes = [first.unwrap().outcome, second.unwrap().outcome];
        assert!(outcomes.contains(&FlushOutcome::Drained));
        assert!(outcomes.contains(&FlushOutcome::AlreadyRunning));
        assert_eq!(backend.max_active.load(Ordering::SeqCst), 1);
        assert_eq!(backend.calls(), vec!["/a", "/b"]);
        assert!(!scheduler.is_flushing());
    }

    #[tokio::test]
    async fn offline_scheduler_sends_nothing() {
        let harness = Harness::new(false);
        harness.enqueue("/a").await;
        let backend = Arc::new(ScriptedBackend::default());
        let scheduler = harness.scheduler(Arc::clone(&backend));

        let report = scheduler.trigger(FlushTrigger::Manual).await.unwrap();

        assert_eq!(report.outcome, FlushOutcome::Offline);
        assert!(backend.calls().is_empty());
        assert_eq!(harness.queued_paths().await, vec!["/a"]);
    }

    #[tokio::test]
    async fn malformed_mutation_is_dropped_and_pass_continues() {
        let harness = Harness::new(true);
        let bad = harness.enqueue("/bad").await;
        harness.enqueue("/good").await;
        let backend = Arc::new(ScriptedBackend::default());
        backend.script(
            "/bad",
            [Err(SyncError::Malformed("payload missing qty".to_string()))],
        );
        let scheduler = harness.scheduler(Arc::clone(&backend));

        let report = scheduler.trigger(FlushTrigger::Manual).await.unwrap();

        assert_eq!(report.dropped, vec![bad]);
        assert_eq!(report.applied, 1);
        assert!(harness.storage.queue().is_empty().await.unwrap());
        assert!(harness.storage.conflicts().is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn replay_of_already_applied_id_counts_as_success() {
        let harness = Harness::new(true);
        harness.enqueue("/sessions/1/lines").await;
        let backend = Arc::new(LossyIdempotentBackend::default());
        let scheduler = harness.scheduler(Arc::clone(&backend));

        let first = scheduler.trigger(FlushTrigger::Manual).await.unwrap();
        assert!(matches!(first.outcome, FlushOutcome::RetryScheduled { .. }));

        let second = scheduler.trigger(FlushTrigger::Manual).await.unwrap();
        assert_eq!(second.outcome, FlushOutcome::Drained);
        assert_eq!(second.already_applied, 1);
        assert!(second.conflicts.is_empty());
        assert_eq!(backend.applied.load(Ordering::SeqCst), 1);
        assert!(harness.storage.queue().is_empty().await.unwrap());
        assert!(harness.storage.conflicts().is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn run_flushes_when_connectivity_returns() {
        let harness = Harness::new(false);
        harness.enqueue("/a").await;
        harness.enqueue("/b").await;
        let backend = Arc::new(ScriptedBackend::default());
        let scheduler = harness.scheduler(Arc::clone(&backend));
        let (trigger_tx, trigger_rx) = mpsc::channel(4);
        let queue = harness.storage.queue();

        let driver = async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            assert!(backend.calls().is_empty());
            harness.online.send_replace(true);

            let mut pending = queue.subscribe();
            while *pending.borrow_and_update() > 0 {
                pending.changed().await.unwrap();
            }
            drop(trigger_tx);
        };

        let (result, ()) = tokio::join!(scheduler.run(trigger_rx), driver);

        result.unwrap();
        assert_eq!(backend.calls(), vec!["/a", "/b"]);
    }

    #[tokio::test]
    async fn run_handles_sent_triggers_and_stops_when_senders_drop() {
        let harness = Harness::new(true);
        harness.enqueue("/a").await;
        let backend = Arc::new(ScriptedBackend::default());
        let scheduler = harness.scheduler(Arc::clone(&backend));
        let (trigger_tx, trigger_rx) = mpsc::channel(4);

        trigger_tx.send(FlushTrigger::Foreground).await.unwrap();
        drop(trigger_tx);
        scheduler.run(trigger_rx).await.unwrap();

        assert_eq!(backend.calls(), vec!["/a"]);
        assert!(harness.storage.queue().is_empty().await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn run_retries_at_backoff_deadline_with_injected_clock() {
        let harness = Harness::new(true);
        harness.enqueue("/a").await;
        let backend = Arc::new(ScriptedBackend::default());
        backend.script("/a", [Err(SyncError::Retryable("502 Bad Gateway".to_string()))]);
        let scheduler = harness.scheduler(Arc::clone(&backend)).with_retry_policy(RetryPolicy {
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
            max_attempts: 5,
        });
        let (trigger_tx, trigger_rx) = mpsc::channel(4);
        let queue = harness.storage.queue();
        let mut state = scheduler.subscribe();

        let driver = async {
            trigger_tx.send(FlushTrigger::Manual).await.unwrap();
            while !matches!(*state.borrow_and_update(), SchedulerState::Backoff { .. }) {
                state.changed().await.unwrap();
            }
            assert_eq!(backend.calls(), vec!["/a"]);

            // Injected clock and runtime clock move together past the deadline
            harness.clock.advance(Duration::from_millis(2_100));
            tokio::time::advance(Duration::from_millis(2_100)).await;

            let mut pending = queue.subscribe();
            while *pending.borrow_and_update() > 0 {
                pending.changed().await.unwrap();
            }
            drop(trigger_tx);
        };

        let (result, ()) = tokio::join!(scheduler.run(trigger_rx), driver);

        result.unwrap();
        assert_eq!(backend.calls(), vec!["/a", "/a"]);
        assert_eq!(scheduler.state(), SchedulerState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn run_retries_at_deadline_even_if_injected_clock_lags() {
        let harness = Harness::new(true);
        harness.enqueue("/a").await;
        let backend = Arc::new(ScriptedBackend::default());
        backend.script("/a", [Err(SyncError::Retryable("timeout".to_string()))]);
        let scheduler = harness.scheduler(Arc::clone(&backend));
        let (trigger_tx, trigger_rx) = mpsc::channel(4);
        let queue = harness.storage.queue();

        let driver = async {
            trigger_tx.send(FlushTrigger::Manual).await.unwrap();
            // The manual clock never moves; only the runtime deadline elapses
            let mut pending = queue.subscribe();
            while *pending.borrow_and_update() > 0 {
                pending.changed().await.unwrap();
            }
            drop(trigger_tx);
        };

        let (result, ()) = tokio::join!(scheduler.run(trigger_rx), driver);

        result.unwrap();
        assert_eq!(backend.calls(), vec!["/a", "/a"]);
        assert!(queue.is_empty().await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn periodic_tick_flushes_newly_queued_mutation() {
        let harness = Harness::new(true);
        let backend = Arc::new(ScriptedBackend::default());
        let scheduler = harness
            .scheduler(Arc::clone(&backend))
            .with_periodic_flush(Some(Duration::from_secs(60)));
        let (trigger_tx, trigger_rx) = mpsc::channel(4);
        let queue = harness.storage.queue();

        let driver = async {
            harness.enqueue("/late").await;

            tokio::time::advance(Duration::from_secs(61)).await;
            let mut pending = queue.subscribe();
            while *pending.borrow_and_update() > 0 {
                pending.changed().await.unwrap();
            }
            drop(trigger_tx);
        };

        let (result, ()) = tokio::join!(scheduler.run(trigger_rx), driver);

        result.unwrap();
        assert_eq!(backend.calls(), vec!["/late"]);
    }
}
