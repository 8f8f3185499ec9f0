//! Search engine orchestration
//!
//! Wires the combination space, worker pool, aggregator, triage policy and
//! monitor into one resumable run:
//!
//! ```text
//! ┌───────────┐    ┌─────────────┐    ┌─────────────┐    ┌──────────────┐
//! │ Producer  │───▶│  TaskQueues │───▶│   Workers   │───▶│  Aggregator  │
//! │ (space)   │    │ retry-first │    │ (executors) │    │ single writer│
//! └───────────┘    └─────────────┘    └─────────────┘    └──────┬───────┘
//!                                            ▲                  │
//!                                       stop signal      checkpoint/sink
//! ```
//!
//! All cross-component communication is message passing; the only mutable
//! run state lives inside the aggregator.

pub mod aggregator;
pub mod monitor;
pub mod triage;
pub mod worker;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};

use crate::error::Result;
use crate::executor::ExecutorProvider;
use crate::models::{Checkpoint, PersonFields, RunReport, Task};
use crate::space::CombinationSpace;
use crate::storage::{CheckpointStore, ResultSink};
use crate::validator::ResultValidator;

pub use aggregator::{AggregatorConfig, EngineEvent, ResultAggregator};
pub use monitor::{AdaptiveLoadBalancer, PerformanceMonitor};
pub use triage::{RateGovernor, SearchOutcome};
pub use worker::{spawn_workers, TaskQueues, WorkerContext};

/// Buffered tasks between the producer and the workers
const TASK_CHANNEL_CAPACITY: usize = 1024;

/// Idempotent broadcast stop signal
///
/// Set exactly once, on the first valid match or an external interrupt.
/// Workers observe it at the top of their loop and at every backoff sleep.
#[derive(Clone)]
pub struct StopSignal(Arc<watch::Sender<bool>>);

impl Default for StopSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl StopSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self(Arc::new(tx))
    }

    /// Set the signal; safe to call any number of times
    pub fn trigger(&self) {
        self.0.send_replace(true);
    }

    pub fn is_set(&self) -> bool {
        *self.0.borrow()
    }

    /// Wait until the signal is set
    pub async fn cancelled(&self) {
        let mut rx = self.0.subscribe();
        // Only fails if the sender is gone, which we hold
        let _ = rx.wait_for(|stopped| *stopped).await;
    }

    /// Interruptible sleep; returns true when cut short by the signal
    pub async fn sleep(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(duration) => false,
            _ = self.cancelled() => true,
        }
    }
}

/// Engine tuning derived from [`crate::config::Config`]
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub num_workers: usize,
    pub max_retries_per_task: u32,
    pub max_consecutive_errors: u32,
    pub batch_size: usize,
    pub batch_timeout: Duration,
    pub checkpoint_interval: Duration,
    pub min_delay: Duration,
    pub max_delay: Duration,
    pub report_interval: Duration,
}

impl EngineOptions {
    /// Derive engine options from the application config
    pub fn from_config(config: &crate::config::Config) -> Self {
        Self {
            num_workers: config.workers.num_workers,
            max_retries_per_task: config.workers.max_retries_per_task,
            max_consecutive_errors: config.workers.max_consecutive_errors,
            batch_size: config.persistence.batch_size,
            batch_timeout: config.batch_timeout(),
            checkpoint_interval: config.checkpoint_interval(),
            min_delay: Duration::from_secs_f64(config.executor.min_delay_secs),
            max_delay: Duration::from_secs_f64(config.executor.max_delay_secs),
            report_interval: Duration::from_secs(60),
        }
    }
}

/// One resumable search run for one person
pub struct SearchEngine {
    options: EngineOptions,
    space: Arc<CombinationSpace>,
    person: PersonFields,
    provider: Arc<dyn ExecutorProvider>,
    governor: Arc<RateGovernor>,
    store: CheckpointStore,
    sink: Box<dyn ResultSink>,
}

impl SearchEngine {
    pub fn new(
        options: EngineOptions,
        space: CombinationSpace,
        person: PersonFields,
        provider: Arc<dyn ExecutorProvider>,
        governor: RateGovernor,
        store: CheckpointStore,
        sink: Box<dyn ResultSink>,
    ) -> Self {
        Self {
            options,
            space: Arc::new(space),
            person,
            provider,
            governor: Arc::new(governor),
            store,
            sink,
        }
    }

    /// Load the prior checkpoint if it belongs to this person and space
    fn load_resume_state(&self) -> Result<Option<Checkpoint>> {
        let Some(checkpoint) = self.store.load()? else {
            return Ok(None);
        };

        if checkpoint.person_id != self.person.person_id {
            tracing::warn!(
                checkpoint_person = checkpoint.person_id,
                current_person = self.person.person_id,
                "Checkpoint belongs to a different person, starting fresh"
            );
            return Ok(None);
        }

        if checkpoint.total_combinations != self.space.total() {
            tracing::warn!(
                checkpoint_total = checkpoint.total_combinations,
                current_total = self.space.total(),
                "Search range changed since checkpoint, starting fresh"
            );
            return Ok(None);
        }

        Ok(Some(checkpoint))
    }

    /// Run the search to completion, first match, or interrupt
    pub async fn run(self) -> Result<RunReport> {
        let total = self.space.total();
        let prior = self.load_resume_state()?;
        let resume_index = prior.as_ref().map_or(0, |c| c.resume_index);

        if let Some(ckpt) = &prior {
            tracing::info!(
                person = %self.person.full_name(),
                resume_index,
                prior_matches = ckpt.matches.len(),
                total,
                "Resuming search from checkpoint"
            );
        } else {
            tracing::info!(
                person = %self.person.full_name(),
                total,
                workers = self.options.num_workers,
                "Starting fresh search"
            );
        }

        let stop = StopSignal::new();

        // External interrupt: first ctrl-c stops the run cleanly
        let interrupt_stop = stop.clone();
        let interrupt_handle = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupt received, stopping workers");
                interrupt_stop.trigger();
            }
        });

        // Producer: seed tasks in ascending index order from the watermark
        let (task_tx, task_rx) = mpsc::channel::<Task>(TASK_CHANNEL_CAPACITY);
        let queues = Arc::new(TaskQueues::new(task_rx));
        let producer_space = Arc::clone(&self.space);
        let producer_stop = stop.clone();
        let producer_handle = tokio::spawn(async move {
            let mut seeded = 0u64;
            for (index, combo) in producer_space.iter_from(resume_index) {
                let task = Task::new(index, combo);
                tokio::select! {
                    sent = task_tx.send(task) => {
                        if sent.is_err() {
                            break;
                        }
                        seeded += 1;
                    }
                    _ = producer_stop.cancelled() => break,
                }
            }
            tracing::debug!(seeded, "Task production finished");
        });

        // Single-writer aggregator
        let (event_tx, event_rx) = mpsc::unbounded_channel::<EngineEvent>();
        let aggregator = ResultAggregator::new(
            event_rx,
            self.store,
            self.sink,
            AggregatorConfig {
                batch_size: self.options.batch_size,
                batch_timeout: self.options.batch_timeout,
                checkpoint_interval: self.options.checkpoint_interval,
            },
            self.person.clone(),
            total,
            stop.clone(),
            prior.as_ref(),
        );
        let aggregator_handle = tokio::spawn(aggregator.run());

        // Advisory monitor and pacing
        let monitor = Arc::new(PerformanceMonitor::default());
        let balancer = Arc::new(AdaptiveLoadBalancer::new(
            self.options.min_delay,
            self.options.min_delay,
            self.options.max_delay,
        ));

        let report_monitor = Arc::clone(&monitor);
        let report_balancer = Arc::clone(&balancer);
        let report_stop = stop.clone();
        let report_interval = self.options.report_interval;
        let num_workers = self.options.num_workers;
        let report_handle = tokio::spawn(async move {
            let mut timer = tokio::time::interval(report_interval);
            timer.tick().await;
            loop {
                tokio::select! {
                    _ = timer.tick() => {
                        let processed = resume_index + report_monitor.snapshot().total_searches;
                        report_monitor.log_status(total, processed.min(total));
                        report_balancer.adjust(&report_monitor);

                        let recommended =
                            report_balancer.recommended_workers(num_workers, &report_monitor);
                        if recommended != num_workers {
                            tracing::debug!(
                                current = num_workers,
                                recommended,
                                "Worker count recommendation"
                            );
                        }
                    }
                    _ = report_stop.cancelled() => break,
                }
            }
        });

        // Worker pool; each worker owns one executor
        let ctx = WorkerContext {
            person: Arc::new(self.person.clone()),
            validator: Arc::new(ResultValidator::new()),
            governor: Arc::clone(&self.governor),
            monitor: Arc::clone(&monitor),
            balancer: Arc::clone(&balancer),
            provider: Arc::clone(&self.provider),
            queues: Arc::clone(&queues),
            events: event_tx,
            stop: stop.clone(),
            max_retries_per_task: self.options.max_retries_per_task,
            max_consecutive_errors: self.options.max_consecutive_errors,
        };
        let worker_handles = spawn_workers(ctx, self.options.num_workers);

        // Join workers; their dropped event senders end the aggregator
        let mut worker_stats = Vec::with_capacity(worker_handles.len());
        for joined in futures::future::join_all(worker_handles).await {
            match joined {
                Ok(stats) => worker_stats.push(stats),
                Err(e) => tracing::error!(error = %e, "Worker task panicked"),
            }
        }

        // Unblock the producer if it is still waiting on channel capacity
        stop.trigger();
        let _ = producer_handle.await;
        report_handle.abort();
        interrupt_handle.abort();

        let outcome = aggregator_handle
            .await
            .map_err(|e| crate::error::Error::other(format!("Aggregator task failed: {e}")))??;

        let slow = monitor::identify_slow_workers(&worker_stats, 25);
        if !slow.is_empty() {
            tracing::debug!(workers = ?slow, "Workers below the 25th search percentile");
        }

        let report = RunReport {
            person_id: self.person.person_id,
            processed: outcome.processed,
            total_combinations: total,
            matches: outcome.matches,
            unresolved: outcome.unresolved,
            stopped_on_match: outcome.stopped_on_match,
            exhausted: outcome.exhausted,
            worker_stats,
        };

        tracing::info!(
            person = %self.person.full_name(),
            processed = report.processed,
            total,
            matches = report.matches.len(),
            unresolved = report.unresolved.len(),
            stopped_on_match = report.stopped_on_match,
            exhausted = report.exhausted,
            "Search run finished"
        );

        Ok(report)
    }
}
