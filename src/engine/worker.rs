//! Worker pool draining the combination queues
//!
//! Each worker owns exactly one executor instance and loops over the shared
//! queues, routing every classified outcome: matches and completions to the
//! aggregator, recoverable failures back to the retry queue, exhausted tasks
//! to the unresolved report. The retry queue is always drained before the
//! main queue.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::engine::aggregator::EngineEvent;
use crate::engine::monitor::{AdaptiveLoadBalancer, PerformanceMonitor};
use crate::engine::triage::{RateGovernor, SearchOutcome};
use crate::engine::StopSignal;
use crate::executor::{ExecutorProvider, RawStatus, SearchExecutor};
use crate::models::{PersonFields, Task, UnresolvedTask, WorkerStats};
use crate::utils::retry::{with_retry, RetryConfig};
use crate::validator::ResultValidator;

/// Bounded wait on the main queue before falling through to the
/// no-more-tasks check
const DEQUEUE_TIMEOUT: Duration = Duration::from_millis(250);

/// Idle wait while other workers still hold in-flight tasks
const IDLE_BACKOFF: Duration = Duration::from_millis(100);

/// Liveness probe bound: distinguishes a crashed executor from a slow one
const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// Base backoff after a transient error, scaled by the consecutive count
const TRANSIENT_BACKOFF: Duration = Duration::from_millis(250);

/// Startup stagger between workers
const STARTUP_STAGGER: Duration = Duration::from_millis(500);

/// What the queues handed back
enum NextTask {
    /// A task to process
    Task(Task),

    /// Nothing right now, but work may still appear
    Idle,

    /// Production finished, queues drained, nothing in flight
    Exhausted,
}

/// Shared main + retry queues with in-flight accounting
///
/// The retry queue is strictly drained first. A worker may only conclude the
/// run is exhausted when production has ended, both queues are empty, and no
/// task is in flight anywhere (an in-flight task can still be requeued).
pub struct TaskQueues {
    main: tokio::sync::Mutex<mpsc::Receiver<Task>>,
    retry: std::sync::Mutex<VecDeque<Task>>,
    in_flight: AtomicUsize,
    main_closed: AtomicBool,
}

impl TaskQueues {
    pub fn new(main_rx: mpsc::Receiver<Task>) -> Self {
        Self {
            main: tokio::sync::Mutex::new(main_rx),
            retry: std::sync::Mutex::new(VecDeque::new()),
            in_flight: AtomicUsize::new(0),
            main_closed: AtomicBool::new(false),
        }
    }

    /// Requeue a task for retry; must be called before [`task_done`] so the
    /// exhaustion check cannot miss it
    ///
    /// [`task_done`]: TaskQueues::task_done
    pub fn push_retry(&self, task: Task) {
        self.retry
            .lock()
            .expect("retry queue mutex poisoned")
            .push_back(task);
    }

    /// Mark the most recently dequeued task as resolved
    pub fn task_done(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    /// Pop a retry task, bumping in-flight under the same lock so a
    /// concurrent exhaustion check never sees the task in neither place
    fn pop_retry(&self) -> Option<Task> {
        let mut queue = self.retry.lock().expect("retry queue mutex poisoned");
        let task = queue.pop_front();
        if task.is_some() {
            self.in_flight.fetch_add(1, Ordering::SeqCst);
        }
        task
    }

    fn retry_is_empty(&self) -> bool {
        self.retry
            .lock()
            .expect("retry queue mutex poisoned")
            .is_empty()
    }

    async fn next(&self) -> NextTask {
        // Retry queue always wins
        if let Some(task) = self.pop_retry() {
            return NextTask::Task(task);
        }

        if !self.main_closed.load(Ordering::SeqCst) {
            let mut rx = self.main.lock().await;
            match tokio::time::timeout(DEQUEUE_TIMEOUT, rx.recv()).await {
                Ok(Some(task)) => {
                    self.in_flight.fetch_add(1, Ordering::SeqCst);
                    return NextTask::Task(task);
                }
                Ok(None) => {
                    self.main_closed.store(true, Ordering::SeqCst);
                }
                Err(_) => return NextTask::Idle,
            }
        }

        if self.retry_is_empty() && self.in_flight.load(Ordering::SeqCst) == 0 {
            NextTask::Exhausted
        } else {
            NextTask::Idle
        }
    }
}

/// Everything a worker needs, cloned per worker
#[derive(Clone)]
pub struct WorkerContext {
    pub person: Arc<PersonFields>,
    pub validator: Arc<ResultValidator>,
    pub governor: Arc<RateGovernor>,
    pub monitor: Arc<PerformanceMonitor>,
    pub balancer: Arc<AdaptiveLoadBalancer>,
    pub provider: Arc<dyn ExecutorProvider>,
    pub queues: Arc<TaskQueues>,
    pub events: mpsc::UnboundedSender<EngineEvent>,
    pub stop: StopSignal,
    pub max_retries_per_task: u32,
    pub max_consecutive_errors: u32,
}

/// Spawn `num_workers` workers over the shared context
pub fn spawn_workers(ctx: WorkerContext, num_workers: usize) -> Vec<JoinHandle<WorkerStats>> {
    (1..=num_workers)
        .map(|worker_id| {
            let worker = Worker {
                id: worker_id,
                ctx: ctx.clone(),
            };
            tokio::spawn(worker.run())
        })
        .collect()
}

struct Worker {
    id: usize,
    ctx: WorkerContext,
}

impl Worker {
    async fn run(self) -> WorkerStats {
        let mut stats = WorkerStats::new(self.id);

        // Stagger startup to avoid a thundering herd against the service
        let stagger = STARTUP_STAGGER * (self.id as u32 - 1);
        if !stagger.is_zero() && self.ctx.stop.sleep(stagger).await {
            return stats;
        }

        let mut executor = match self.acquire_executor().await {
            Ok(exec) => exec,
            Err(e) => {
                tracing::error!(worker_id = self.id, error = %e, "Worker failed to start executor");
                return stats;
            }
        };
        tracing::info!(worker_id = self.id, "Worker started");

        let started = Instant::now();
        let mut consecutive_errors: u32 = 0;

        loop {
            if self.ctx.stop.is_set() {
                tracing::debug!(worker_id = self.id, "Stop signal observed, exiting");
                break;
            }

            let task = match self.ctx.queues.next().await {
                NextTask::Task(task) => task,
                NextTask::Idle => {
                    self.ctx.stop.sleep(IDLE_BACKOFF).await;
                    continue;
                }
                NextTask::Exhausted => {
                    tracing::debug!(worker_id = self.id, "Queues exhausted, exiting");
                    break;
                }
            };

            // Advisory pacing published by the load balancer
            let delay = self.ctx.balancer.recommended_delay();
            if !delay.is_zero() {
                self.ctx.stop.sleep(delay).await;
            }

            let raw = executor.execute(&self.ctx.person, &task.combo).await;
            stats.searches += 1;
            self.ctx.monitor.record_search();

            // Only an Error status needs the liveness probe; it decides
            // between transient failure and a crashed executor
            let alive = if raw.status == RawStatus::Error {
                matches!(
                    tokio::time::timeout(PROBE_TIMEOUT, executor.is_alive()).await,
                    Ok(true)
                )
            } else {
                true
            };

            match self.ctx.governor.classify(raw, alive) {
                SearchOutcome::Success(content) => {
                    consecutive_errors = 0;
                    self.handle_success(&task, &content, &mut stats);
                }

                SearchOutcome::RateLimited(_) => {
                    self.ctx.monitor.record_error();
                    self.requeue_or_unresolved(task, "rate limited", &mut stats);

                    let pause = self.ctx.governor.cooldown_for_rate_limit();
                    self.ctx.stop.sleep(pause).await;
                }

                SearchOutcome::TransientError => {
                    stats.errors += 1;
                    self.ctx.monitor.record_error();
                    consecutive_errors += 1;
                    self.requeue_or_unresolved(task, "transient error", &mut stats);

                    let backoff = TRANSIENT_BACKOFF * consecutive_errors.min(8);
                    self.ctx.stop.sleep(backoff).await;

                    if consecutive_errors >= self.ctx.max_consecutive_errors {
                        tracing::warn!(
                            worker_id = self.id,
                            consecutive_errors,
                            "Too many consecutive errors, recreating executor"
                        );
                        executor.stop().await;
                        match self.acquire_executor().await {
                            Ok(exec) => {
                                executor = exec;
                                consecutive_errors = 0;
                            }
                            Err(e) => {
                                tracing::error!(
                                    worker_id = self.id,
                                    error = %e,
                                    "Executor recreation failed, worker terminating"
                                );
                                break;
                            }
                        }
                    }
                }

                SearchOutcome::ExecutorCrashed => {
                    stats.errors += 1;
                    self.ctx.monitor.record_error();

                    // Hand the task back before attempting recovery so
                    // another worker can pick it up
                    if task.attempt < self.ctx.max_retries_per_task {
                        stats.retries += 1;
                        self.ctx.queues.push_retry(task.next_attempt());
                        self.ctx.queues.task_done();
                    } else {
                        let _ = self.ctx.events.send(EngineEvent::Gap(UnresolvedTask {
                            index: task.index,
                            combo: task.combo.clone(),
                            attempts: task.attempt,
                            reason: "executor crashed".to_string(),
                        }));
                        self.ctx.queues.task_done();
                    }

                    executor.stop().await;
                    match self.acquire_executor().await {
                        Ok(exec) => {
                            executor = exec;
                            consecutive_errors = 0;
                            tracing::info!(worker_id = self.id, "Executor re-acquired");
                        }
                        Err(e) => {
                            tracing::error!(
                                worker_id = self.id,
                                error = %e,
                                "Executor re-acquisition failed, worker terminating"
                            );
                            break;
                        }
                    }
                }
            }
        }

        executor.stop().await;

        let elapsed = started.elapsed().as_secs_f64();
        stats.rate = if elapsed > 0.0 {
            stats.searches as f64 / elapsed
        } else {
            0.0
        };

        tracing::info!(
            worker_id = self.id,
            searches = stats.searches,
            matches = stats.matches,
            retries = stats.retries,
            errors = stats.errors,
            rate = format!("{:.2}/s", stats.rate),
            "Worker finished"
        );
        stats
    }

    /// Provision and start a fresh executor with bounded retries
    async fn acquire_executor(&self) -> crate::error::Result<Box<dyn SearchExecutor>> {
        let retry = RetryConfig {
            max_retries: 2,
            base_delay_ms: 500,
            max_delay_ms: 5000,
        };

        with_retry(&retry, || async {
            let mut executor = self.ctx.provider.provide(self.id);
            executor.start().await?;
            Ok(executor)
        })
        .await
    }

    fn handle_success(&self, task: &Task, content: &str, stats: &mut WorkerStats) {
        let validation = self.ctx.validator.validate(content, &task.combo.region);

        let matched = if validation.is_match() {
            let extracted_id = validation
                .extracted_id
                .clone()
                .unwrap_or_default();

            tracing::info!(
                worker_id = self.id,
                id = %extracted_id,
                combo = %task.combo,
                "Match found"
            );

            stats.matches += 1;
            self.ctx.monitor.record_match();

            Some(crate::models::MatchRecord::new(
                &self.ctx.person,
                extracted_id,
                validation.birth_date,
                task,
                self.id,
            ))
        } else {
            None
        };

        let found = matched.is_some();
        let _ = self.ctx.events.send(EngineEvent::Completed {
            index: task.index,
            combo: task.combo.clone(),
            matched,
        });
        self.ctx.queues.task_done();

        // First valid match stops the run; in-flight tasks finish cleanly
        if found {
            self.ctx.stop.trigger();
        }
    }

    /// Route a recoverable failure: back to the retry queue while attempts
    /// remain, otherwise surfaced as unresolved
    fn requeue_or_unresolved(&self, task: Task, reason: &str, stats: &mut WorkerStats) {
        if task.attempt < self.ctx.max_retries_per_task {
            stats.retries += 1;
            tracing::debug!(
                worker_id = self.id,
                index = task.index,
                attempt = task.attempt + 1,
                reason,
                "Requeueing task"
            );
            self.ctx.queues.push_retry(task.next_attempt());
        } else {
            tracing::warn!(
                worker_id = self.id,
                index = task.index,
                attempts = task.attempt,
                reason,
                "Retry budget exhausted, task unresolved"
            );
            let _ = self.ctx.events.send(EngineEvent::Unresolved(UnresolvedTask {
                index: task.index,
                combo: task.combo.clone(),
                attempts: task.attempt,
                reason: reason.to_string(),
            }));
        }
        self.ctx.queues.task_done();
    }
}
