//! Trial decryption harness.
//!
//! A producer thread feeds prioritized (candidate, configuration) pairs into
//! a bounded channel. A fixed pool of workers takes pairs off the channel and
//! runs each attempt on its own thread, so a worker can give up on an attempt
//! that overruns its deadline and move on. A worker holds at most one such
//! overrun: before leaving a second one behind it waits for the first to
//! exit, which keeps live attempt threads at twice the pool size or fewer.
//! The calling thread coordinates. It counts finished attempts and enforces
//! the search deadline, then joins the pool and any attempts still running.

use crate::report::{ResultAggregator, TrialAttempt};
use crate::settings::HarnessConfig;
use chrono::Utc;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, SendTimeoutError, Sender};
use indicatif::ProgressBar;
use sqlsift_core::matrix::WeightedConfig;
use sqlsift_core::{
    CancelToken, CipherConfig, KeyCandidate, TrialBackend, TrialOutcome, TrialRequest,
};
use std::path::Path;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(50);
const COORDINATOR_TICK: Duration = Duration::from_millis(100);
const EVENT_CHANNEL_CAPACITY: usize = 1000;
/// Added to the cancel grace when joining attempts left running at the end.
const OVERRUN_DRAIN: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct WorkItem {
    pub sequence: usize,
    pub candidate: Arc<KeyCandidate>,
    pub config: CipherConfig,
    pub priority: f64,
}

/// Pairs every candidate with every configuration once, highest
/// `confidence × weight` first. Equal priorities keep candidate-major order.
pub fn schedule(candidates: &[KeyCandidate], configs: &[WeightedConfig]) -> Vec<WorkItem> {
    let mut items = Vec::with_capacity(candidates.len() * configs.len());
    for candidate in candidates {
        let shared = Arc::new(candidate.clone());
        for weighted in configs {
            items.push(WorkItem {
                sequence: 0,
                candidate: Arc::clone(&shared),
                config: weighted.config,
                priority: candidate.confidence() * weighted.weight,
            });
        }
    }
    items.sort_by(|a, b| b.priority.total_cmp(&a.priority));
    for (sequence, item) in items.iter_mut().enumerate() {
        item.sequence = sequence;
    }
    items
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Exhausted,
    Winner,
    Deadline,
    Interrupted,
}

#[derive(Debug, Clone, Copy)]
pub struct HarnessSummary {
    pub scheduled: usize,
    pub executed: usize,
    pub stop: StopReason,
    pub elapsed: Duration,
}

#[derive(Debug, Clone, Copy)]
enum HarnessEvent {
    Finished,
    WorkerDone,
}

struct WorkerShared {
    target: Arc<Path>,
    backend: Arc<dyn TrialBackend>,
    aggregator: Arc<ResultAggregator>,
    stop: CancelToken,
    attempt_timeout: Duration,
    grace: Duration,
}

pub struct Harness {
    config: HarnessConfig,
    backend: Arc<dyn TrialBackend>,
}

impl Harness {
    pub fn new(config: HarnessConfig, backend: Arc<dyn TrialBackend>) -> Self {
        Self { config, backend }
    }

    /// Runs `work` against `target` until the first success, exhaustion,
    /// the search deadline or an external cancellation of `stop`.
    pub fn run(
        &self,
        target: &Path,
        work: Vec<WorkItem>,
        aggregator: &Arc<ResultAggregator>,
        stop: &CancelToken,
        progress: &ProgressBar,
    ) -> HarnessSummary {
        let start = Instant::now();
        let scheduled = work.len();
        let num_workers = self.config.workers.max(1);

        info!(
            target = %target.display(),
            scheduled,
            workers = num_workers,
            backend = self.backend.name(),
            "starting trial harness"
        );

        let (work_tx, work_rx): (Sender<WorkItem>, Receiver<WorkItem>) =
            bounded(self.config.queue_capacity.max(1));
        let (event_tx, event_rx): (Sender<HarnessEvent>, Receiver<HarnessEvent>) =
            bounded(EVENT_CHANNEL_CAPACITY);

        let shared = Arc::new(WorkerShared {
            target: Arc::from(target),
            backend: Arc::clone(&self.backend),
            aggregator: Arc::clone(aggregator),
            stop: stop.clone(),
            attempt_timeout: self.config.attempt_timeout(),
            grace: self.config.cancel_grace(),
        });

        let producer_stop = stop.clone();
        let producer_handle = thread::Builder::new()
            .name("harness-producer".to_string())
            .spawn(move || producer_thread(work, work_tx, producer_stop))
            .map_err(|e| error!(error = %e, "failed to spawn producer"))
            .ok();

        let mut worker_handles: Vec<JoinHandle<Vec<JoinHandle<()>>>> =
            Vec::with_capacity(num_workers);
        for worker_id in 0..num_workers {
            let rx = work_rx.clone();
            let tx = event_tx.clone();
            let shared = Arc::clone(&shared);

            match thread::Builder::new()
                .name(format!("harness-worker-{worker_id}"))
                .spawn(move || worker_thread(worker_id, rx, tx, shared))
            {
                Ok(handle) => worker_handles.push(handle),
                Err(e) => error!(worker = worker_id, error = %e, "failed to spawn worker"),
            }
        }

        drop(work_rx);
        drop(event_tx);

        let deadline = self.config.search_timeout().map(|t| start + t);
        let mut deadline_hit = false;
        let mut executed = 0usize;
        let mut workers_done = 0usize;

        loop {
            match event_rx.recv_timeout(COORDINATOR_TICK) {
                Ok(HarnessEvent::Finished) => {
                    executed += 1;
                    progress.inc(1);
                }
                Ok(HarnessEvent::WorkerDone) => {
                    workers_done += 1;
                    if workers_done == worker_handles.len() {
                        break;
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }

            if let Some(deadline) = deadline {
                if !deadline_hit && Instant::now() >= deadline {
                    warn!("search deadline reached, cancelling");
                    deadline_hit = true;
                    stop.cancel();
                }
            }
        }

        if let Some(handle) = producer_handle {
            if handle.join().is_err() {
                error!("producer thread panicked");
            }
        }

        let mut overruns = Vec::new();
        for (i, handle) in worker_handles.into_iter().enumerate() {
            match handle.join() {
                Ok(left) => overruns.extend(left),
                Err(_) => error!(worker = i, "worker thread panicked"),
            }
        }
        drain_overruns(overruns, self.config.cancel_grace() + OVERRUN_DRAIN);

        let stop_reason = if aggregator.has_winner() {
            StopReason::Winner
        } else if deadline_hit {
            StopReason::Deadline
        } else if stop.is_cancelled() {
            StopReason::Interrupted
        } else {
            StopReason::Exhausted
        };

        let summary = HarnessSummary {
            scheduled,
            executed,
            stop: stop_reason,
            elapsed: start.elapsed(),
        };
        info!(
            executed,
            scheduled,
            stop = ?summary.stop,
            elapsed_ms = summary.elapsed.as_millis() as u64,
            "trial harness finished"
        );
        summary
    }
}

fn producer_thread(work: Vec<WorkItem>, work_tx: Sender<WorkItem>, stop: CancelToken) {
    'outer: for mut item in work {
        loop {
            if stop.is_cancelled() {
                break 'outer;
            }
            match work_tx.send_timeout(item, POLL_INTERVAL) {
                Ok(()) => break,
                Err(SendTimeoutError::Timeout(returned)) => {
                    item = returned;
                }
                Err(SendTimeoutError::Disconnected(_)) => break 'outer,
            }
        }
    }
}

/// Returns the attempt threads it gave up on that were still running when
/// the worker stopped.
fn worker_thread(
    worker_id: usize,
    work_rx: Receiver<WorkItem>,
    event_tx: Sender<HarnessEvent>,
    shared: Arc<WorkerShared>,
) -> Vec<JoinHandle<()>> {
    let mut overrun: Option<JoinHandle<()>> = None;
    let mut left_running = Vec::new();

    loop {
        if shared.stop.is_cancelled() {
            break;
        }
        let item = match work_rx.recv_timeout(POLL_INTERVAL) {
            Ok(item) => item,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };

        let (attempt, running) = run_attempt(&shared, item);
        if let Some(handle) = running {
            if let Some(previous) = overrun.take() {
                debug!(worker = worker_id, "waiting for an earlier overrunning attempt");
                if let Some(still) = wait_for_exit(previous, &shared.stop) {
                    left_running.push(still);
                }
            }
            overrun = Some(handle);
        }

        let sequence = attempt.sequence;
        let success = attempt.outcome.is_success();
        debug!(
            worker = worker_id,
            sequence,
            candidate = %attempt.candidate.label(),
            config = %attempt.config,
            outcome = attempt.outcome.label(),
            elapsed_ms = attempt.elapsed_ms,
            "attempt finished"
        );
        shared.aggregator.record_attempt(attempt);

        if success && shared.aggregator.mark_winner(sequence) {
            info!(sequence, "verified key found, stopping search");
            shared.stop.cancel();
        }

        let _ = event_tx.send(HarnessEvent::Finished);
    }

    left_running.extend(overrun);
    let _ = event_tx.send(HarnessEvent::WorkerDone);
    left_running
}

/// Blocks until the attempt thread exits, unless the search stops first, in
/// which case the still-running handle is returned.
fn wait_for_exit(handle: JoinHandle<()>, stop: &CancelToken) -> Option<JoinHandle<()>> {
    while !handle.is_finished() {
        if stop.is_cancelled() {
            return Some(handle);
        }
        thread::sleep(POLL_INTERVAL);
    }
    reap(handle);
    None
}

/// Joins attempts that were given up on, waiting at most `bound` overall.
/// Threads that outlive it are detached; their tokens are already cancelled.
fn drain_overruns(mut pending: Vec<JoinHandle<()>>, bound: Duration) {
    if pending.is_empty() {
        return;
    }
    let deadline = Instant::now() + bound;
    loop {
        let (done, running): (Vec<_>, Vec<_>) =
            pending.into_iter().partition(|h| h.is_finished());
        done.into_iter().for_each(reap);
        pending = running;
        if pending.is_empty() {
            return;
        }
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        thread::sleep(POLL_INTERVAL.min(deadline - now));
    }
    warn!(
        attempts = pending.len(),
        "attempt threads still running after cancellation, detaching"
    );
}

fn reap(handle: JoinHandle<()>) {
    if handle.join().is_err() {
        debug!("attempt thread panicked");
    }
}

/// Runs one attempt on its own thread. The returned handle is `Some` when
/// the harness gave up on the attempt before its thread exited.
fn run_attempt(shared: &WorkerShared, item: WorkItem) -> (TrialAttempt, Option<JoinHandle<()>>) {
    let token = shared.stop.child();
    let started_at = Utc::now();
    let clock = Instant::now();

    let (outcome_tx, outcome_rx) = bounded::<TrialOutcome>(1);
    let backend = Arc::clone(&shared.backend);
    let target = Arc::clone(&shared.target);
    let candidate = Arc::clone(&item.candidate);
    let config = item.config;
    let attempt_token = token.clone();

    let spawned = thread::Builder::new()
        .name(format!("attempt-{}", item.sequence))
        .spawn(move || {
            let request = TrialRequest {
                target: &*target,
                candidate: &*candidate,
                config: &config,
            };
            let _ = outcome_tx.send(backend.attempt(&request, &attempt_token));
        });

    let (outcome, running) = match spawned {
        Ok(handle) => match await_outcome(
            &outcome_rx,
            &token,
            &shared.stop,
            shared.attempt_timeout,
            shared.grace,
        ) {
            Awaited::Reported(outcome) => {
                // The thread has sent or dropped its sender and is exiting.
                reap(handle);
                (outcome, None)
            }
            Awaited::GaveUp(outcome) => (outcome, Some(handle)),
        },
        Err(e) => (TrialOutcome::io(format!("cannot start attempt thread: {e}")), None),
    };

    let attempt = TrialAttempt {
        sequence: item.sequence,
        candidate: (*item.candidate).clone(),
        config,
        started_at,
        elapsed_ms: clock.elapsed().as_millis() as u64,
        outcome,
    };
    (attempt, running)
}

enum Awaited {
    /// The attempt thread delivered this outcome, or died without one.
    Reported(TrialOutcome),
    /// The harness stopped waiting; the thread may still be running.
    GaveUp(TrialOutcome),
}

fn await_outcome(
    rx: &Receiver<TrialOutcome>,
    token: &CancelToken,
    stop: &CancelToken,
    timeout: Duration,
    grace: Duration,
) -> Awaited {
    let deadline = Instant::now() + timeout;
    loop {
        let now = Instant::now();
        if now >= deadline {
            token.cancel();
            return Awaited::GaveUp(TrialOutcome::Timeout);
        }
        let remaining = deadline - now;

        if stop.is_cancelled() {
            return match rx.recv_timeout(grace.min(remaining)) {
                Ok(outcome) => Awaited::Reported(outcome),
                Err(RecvTimeoutError::Timeout) => {
                    token.cancel();
                    Awaited::GaveUp(TrialOutcome::Cancelled)
                }
                Err(RecvTimeoutError::Disconnected) => Awaited::Reported(abandoned()),
            };
        }

        match rx.recv_timeout(POLL_INTERVAL.min(remaining)) {
            Ok(outcome) => return Awaited::Reported(outcome),
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => return Awaited::Reported(abandoned()),
        }
    }
}

fn abandoned() -> TrialOutcome {
    TrialOutcome::io("attempt ended without reporting an outcome")
}
