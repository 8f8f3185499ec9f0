//! Single-writer result aggregation
//!
//! One aggregator task consumes every worker event and owns all mutable run
//! state: the processed count, the matches list, the unresolved report and
//! the resume watermark. Workers never touch this state directly, so
//! checkpoint snapshots are always internally consistent.
//!
//! The watermark is the lowest index not yet completed. Workers finish tasks
//! out of index order, so completions ahead of the frontier are parked in a
//! set until the gap closes; resuming from the watermark can re-process a few
//! indices but can never skip one.

use std::collections::BTreeSet;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;

use crate::engine::StopSignal;
use crate::error::Result;
use crate::models::{Checkpoint, MatchRecord, PersonFields, RunSummary, UnresolvedTask};
use crate::space::Combo;
use crate::storage::{CheckpointStore, ResultSink};

/// Worker-to-aggregator events
#[derive(Debug)]
pub enum EngineEvent {
    /// A task finished with a definitive outcome
    Completed {
        index: u64,
        combo: Combo,
        matched: Option<MatchRecord>,
    },

    /// A task exhausted its retry budget
    Unresolved(UnresolvedTask),

    /// A task was abandoned because its executor could not be re-acquired
    Gap(UnresolvedTask),
}

/// Aggregator timing and batching configuration
#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    /// Buffered matches that force a sink flush
    pub batch_size: usize,

    /// Flush a non-empty buffer after this long regardless of size
    pub batch_timeout: Duration,

    /// Wall-clock interval between checkpoint saves
    pub checkpoint_interval: Duration,
}

/// Final aggregator state returned to the engine
#[derive(Debug)]
pub struct AggregateOutcome {
    pub processed: u64,
    pub resume_index: u64,
    pub matches: Vec<MatchRecord>,
    pub unresolved: Vec<UnresolvedTask>,
    pub stopped_on_match: bool,
    pub exhausted: bool,
}

/// Single-writer sink for all run state mutation
pub struct ResultAggregator {
    rx: mpsc::UnboundedReceiver<EngineEvent>,
    store: CheckpointStore,
    sink: Box<dyn ResultSink>,
    config: AggregatorConfig,
    person: PersonFields,
    total: u64,
    stop: StopSignal,

    /// Lowest index not yet completed
    frontier: u64,

    /// Completed indices above the frontier, awaiting the gap to close
    completed_ahead: BTreeSet<u64>,

    processed: u64,
    matches: Vec<MatchRecord>,
    unresolved: Vec<UnresolvedTask>,
    buffer: Vec<MatchRecord>,
    last_combo: Option<Combo>,
    matched_this_run: bool,
}

impl ResultAggregator {
    /// Create an aggregator, optionally seeded from a prior checkpoint
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        rx: mpsc::UnboundedReceiver<EngineEvent>,
        store: CheckpointStore,
        sink: Box<dyn ResultSink>,
        config: AggregatorConfig,
        person: PersonFields,
        total: u64,
        stop: StopSignal,
        prior: Option<&Checkpoint>,
    ) -> Self {
        let (frontier, processed, matches, last_combo) = match prior {
            Some(ckpt) => (
                ckpt.resume_index,
                ckpt.processed_count,
                ckpt.matches.clone(),
                ckpt.last_combo.clone(),
            ),
            None => (0, 0, Vec::new(), None),
        };

        Self {
            rx,
            store,
            sink,
            config,
            person,
            total,
            stop,
            frontier,
            completed_ahead: BTreeSet::new(),
            processed,
            matches,
            unresolved: Vec::new(),
            buffer: Vec::new(),
            last_combo,
            matched_this_run: false,
        }
    }

    /// Run the aggregation loop until every event sender is gone
    ///
    /// Persistence failures are fatal: the stop signal is triggered and the
    /// error is surfaced, never swallowed.
    pub async fn run(mut self) -> Result<AggregateOutcome> {
        match self.run_inner().await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                tracing::error!(error = %e, "Aggregator persistence failure, aborting run");
                self.stop.trigger();
                Err(e)
            }
        }
    }

    async fn run_inner(&mut self) -> Result<AggregateOutcome> {
        let mut checkpoint_timer = tokio::time::interval(self.config.checkpoint_interval);
        checkpoint_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        checkpoint_timer.tick().await; // immediate first tick

        let mut flush_timer = tokio::time::interval(self.config.batch_timeout);
        flush_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        flush_timer.tick().await;

        loop {
            tokio::select! {
                event = self.rx.recv() => match event {
                    Some(event) => self.handle(event)?,
                    // All workers have dropped their senders
                    None => break,
                },
                _ = checkpoint_timer.tick() => self.save_checkpoint()?,
                _ = flush_timer.tick() => {
                    if !self.buffer.is_empty() {
                        self.flush()?;
                    }
                }
            }
        }

        self.finalize()
    }

    fn handle(&mut self, event: EngineEvent) -> Result<()> {
        match event {
            EngineEvent::Completed {
                index,
                combo,
                matched,
            } => {
                self.processed += 1;
                self.advance_watermark(index);
                self.last_combo = Some(combo);

                if let Some(record) = matched {
                    self.matched_this_run = true;
                    self.matches.push(record.clone());
                    self.buffer.push(record);

                    if self.buffer.len() >= self.config.batch_size {
                        self.flush()?;
                    }
                }
            }

            EngineEvent::Unresolved(task) => {
                tracing::warn!(
                    index = task.index,
                    attempts = task.attempts,
                    reason = %task.reason,
                    "Task unresolved"
                );
                self.unresolved.push(task);
            }

            EngineEvent::Gap(task) => {
                tracing::error!(
                    index = task.index,
                    combo = %task.combo,
                    "Task abandoned after executor loss"
                );
                self.unresolved.push(task);
            }
        }
        Ok(())
    }

    /// Advance the frontier past contiguously completed indices
    ///
    /// Indices below the frontier are resume re-processing and already
    /// accounted for.
    fn advance_watermark(&mut self, index: u64) {
        if index == self.frontier {
            self.frontier += 1;
            while self.completed_ahead.remove(&self.frontier) {
                self.frontier += 1;
            }
        } else if index > self.frontier {
            self.completed_ahead.insert(index);
        }
    }

    fn flush(&mut self) -> Result<()> {
        let summary = RunSummary::for_person(&self.person, self.matches.len());
        self.sink
            .write_batch(self.person.person_id, &self.buffer, &summary)?;
        self.buffer.clear();
        Ok(())
    }

    fn save_checkpoint(&self) -> Result<()> {
        let checkpoint = Checkpoint {
            person_id: self.person.person_id,
            person_name: self.person.full_name(),
            resume_index: self.frontier,
            last_combo: self.last_combo.clone(),
            matches: self.matches.clone(),
            processed_count: self.processed,
            total_combinations: self.total,
            saved_at: Utc::now(),
        };
        self.store.save(&checkpoint)?;

        tracing::info!(
            resume_index = self.frontier,
            processed = self.processed,
            total = self.total,
            progress_pct = format!("{:.2}", checkpoint.completion_percentage()),
            "Checkpoint saved"
        );
        Ok(())
    }

    /// Final flush and checkpoint handling on run termination
    fn finalize(&mut self) -> Result<AggregateOutcome> {
        if !self.buffer.is_empty() {
            self.flush()?;
        }

        let exhausted = self.frontier >= self.total;

        if self.matched_this_run || (exhausted && self.unresolved.is_empty()) {
            // Terminal state: the checkpoint has served its purpose
            self.store.clear()?;
        } else {
            self.save_checkpoint()?;
        }

        if !self.unresolved.is_empty() {
            tracing::warn!(
                count = self.unresolved.len(),
                "Run finished with unresolved tasks"
            );
        }

        Ok(AggregateOutcome {
            processed: self.processed,
            resume_index: self.frontier,
            matches: std::mem::take(&mut self.matches),
            unresolved: std::mem::take(&mut self.unresolved),
            stopped_on_match: self.matched_this_run,
            exhausted,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Gender, Task};
    use crate::storage::JsonlResultSink;
    use tempfile::TempDir;

    fn test_person() -> PersonFields {
        PersonFields {
            person_id: 1,
            first_name: "Ana".to_string(),
            last_name_1: "Prueba".to_string(),
            last_name_2: "López".to_string(),
            gender: Gender::M,
        }
    }

    fn combo(n: u8) -> Combo {
        Combo {
            day: n,
            month: 1,
            region: "Jalisco".to_string(),
            year: 1990,
        }
    }

    fn make_aggregator(
        dir: &TempDir,
        total: u64,
        prior: Option<&Checkpoint>,
    ) -> (
        mpsc::UnboundedSender<EngineEvent>,
        ResultAggregator,
        StopSignal,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        let store = CheckpointStore::new(&dir.path().join("ckpt")).unwrap();
        let sink = JsonlResultSink::new(&dir.path().join("out"), "test").unwrap();
        let stop = StopSignal::new();

        let aggregator = ResultAggregator::new(
            rx,
            store,
            Box::new(sink),
            AggregatorConfig {
                batch_size: 2,
                batch_timeout: Duration::from_secs(3600),
                checkpoint_interval: Duration::from_secs(3600),
            },
            test_person(),
            total,
            stop.clone(),
            prior,
        );

        (tx, aggregator, stop)
    }

    #[tokio::test]
    async fn test_watermark_advances_in_order() {
        let dir = TempDir::new().unwrap();
        let (tx, aggregator, _stop) = make_aggregator(&dir, 10, None);

        for index in [0u64, 2, 1, 5, 3] {
            tx.send(EngineEvent::Completed {
                index,
                combo: combo(1),
                matched: None,
            })
            .unwrap();
        }
        drop(tx);

        let outcome = aggregator.run().await.unwrap();
        assert_eq!(outcome.processed, 5);
        // 0..=3 contiguous, 4 missing, 5 parked
        assert_eq!(outcome.resume_index, 4);
        assert!(!outcome.exhausted);
    }

    #[tokio::test]
    async fn test_exhaustion_clears_checkpoint() {
        let dir = TempDir::new().unwrap();
        let (tx, aggregator, _stop) = make_aggregator(&dir, 3, None);

        for index in 0..3u64 {
            tx.send(EngineEvent::Completed {
                index,
                combo: combo(1),
                matched: None,
            })
            .unwrap();
        }
        drop(tx);

        let outcome = aggregator.run().await.unwrap();
        assert!(outcome.exhausted);
        assert_eq!(outcome.resume_index, 3);

        let store = CheckpointStore::new(&dir.path().join("ckpt")).unwrap();
        assert!(!store.exists());
    }

    #[tokio::test]
    async fn test_interrupted_run_saves_checkpoint() {
        let dir = TempDir::new().unwrap();
        let (tx, aggregator, _stop) = make_aggregator(&dir, 10, None);

        for index in 0..4u64 {
            tx.send(EngineEvent::Completed {
                index,
                combo: combo(1),
                matched: None,
            })
            .unwrap();
        }
        drop(tx);

        let outcome = aggregator.run().await.unwrap();
        assert!(!outcome.exhausted);

        let store = CheckpointStore::new(&dir.path().join("ckpt")).unwrap();
        let ckpt = store.load().unwrap().unwrap();
        assert_eq!(ckpt.resume_index, 4);
        assert_eq!(ckpt.processed_count, 4);
    }

    #[tokio::test]
    async fn test_match_buffered_and_flushed() {
        let dir = TempDir::new().unwrap();
        let (tx, aggregator, _stop) = make_aggregator(&dir, 10, None);

        let person = test_person();
        for index in 0..2u64 {
            let task = Task::new(index, combo(1));
            let record =
                MatchRecord::new(&person, "ABCD900101HDFXYZ01".to_string(), None, &task, 1);
            tx.send(EngineEvent::Completed {
                index,
                combo: combo(1),
                matched: Some(record),
            })
            .unwrap();
        }
        drop(tx);

        let outcome = aggregator.run().await.unwrap();
        assert_eq!(outcome.matches.len(), 2);
        assert!(outcome.stopped_on_match);

        let content = std::fs::read_to_string(
            dir.path().join("out").join("matches_person_1_test.jsonl"),
        )
        .unwrap();
        assert_eq!(content.lines().count(), 2);
    }

    #[tokio::test]
    async fn test_unresolved_blocks_watermark_and_exhaustion() {
        let dir = TempDir::new().unwrap();
        let (tx, aggregator, _stop) = make_aggregator(&dir, 3, None);

        tx.send(EngineEvent::Completed {
            index: 0,
            combo: combo(1),
            matched: None,
        })
        .unwrap();
        tx.send(EngineEvent::Unresolved(UnresolvedTask {
            index: 1,
            combo: combo(2),
            attempts: 3,
            reason: "rate limited".to_string(),
        }))
        .unwrap();
        tx.send(EngineEvent::Completed {
            index: 2,
            combo: combo(3),
            matched: None,
        })
        .unwrap();
        drop(tx);

        let outcome = aggregator.run().await.unwrap();
        assert_eq!(outcome.unresolved.len(), 1);
        // Index 1 never completed: the watermark stays below it
        assert_eq!(outcome.resume_index, 1);
        assert!(!outcome.exhausted);

        // Checkpoint kept so a re-run can retry the unresolved index
        let store = CheckpointStore::new(&dir.path().join("ckpt")).unwrap();
        assert!(store.exists());
    }

    #[tokio::test]
    async fn test_resume_seeding_from_checkpoint() {
        let dir = TempDir::new().unwrap();

        let prior = Checkpoint {
            person_id: 1,
            person_name: "Ana Prueba López".to_string(),
            resume_index: 5,
            last_combo: Some(combo(5)),
            matches: vec![],
            processed_count: 5,
            total_combinations: 10,
            saved_at: Utc::now(),
        };

        let (tx, aggregator, _stop) = make_aggregator(&dir, 10, Some(&prior));

        for index in 5..10u64 {
            tx.send(EngineEvent::Completed {
                index,
                combo: combo(1),
                matched: None,
            })
            .unwrap();
        }
        drop(tx);

        let outcome = aggregator.run().await.unwrap();
        assert_eq!(outcome.processed, 10);
        assert_eq!(outcome.resume_index, 10);
        assert!(outcome.exhausted);
    }
}
