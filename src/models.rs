// Core data structures for the sonda search engine

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::space::Combo;

/// Gender as accepted by the registry form
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Gender {
    /// Hombre
    H,
    /// Mujer
    M,
}

impl Gender {
    /// Form value
    pub fn as_code(&self) -> &'static str {
        match self {
            Self::H => "H",
            Self::M => "M",
        }
    }
}

impl std::str::FromStr for Gender {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "H" => Ok(Self::H),
            "M" => Ok(Self::M),
            other => Err(format!("Invalid gender code: {other}")),
        }
    }
}

/// Identity fields held fixed for the duration of a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonFields {
    pub person_id: u32,
    pub first_name: String,
    pub last_name_1: String,
    pub last_name_2: String,
    pub gender: Gender,
}

impl PersonFields {
    /// Display name used in logs and checkpoints
    pub fn full_name(&self) -> String {
        format!(
            "{} {} {}",
            self.first_name, self.last_name_1, self.last_name_2
        )
    }
}

/// One unit of work: a combination plus its position in the space
///
/// Produced once by the scheduler; `attempt` counts how many times the task
/// has been requeued after a recoverable failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    pub index: u64,
    pub combo: Combo,
    pub attempt: u32,
}

impl Task {
    pub fn new(index: u64, combo: Combo) -> Self {
        Self {
            index,
            combo,
            attempt: 0,
        }
    }

    /// Copy of this task with the attempt counter bumped
    pub fn next_attempt(&self) -> Self {
        Self {
            index: self.index,
            combo: self.combo.clone(),
            attempt: self.attempt + 1,
        }
    }
}

/// A validated match, immutable once created
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchRecord {
    pub person_id: u32,
    pub first_name: String,
    pub last_name_1: String,
    pub last_name_2: String,
    pub gender: Gender,

    /// Extracted 18-character registry identifier
    pub extracted_id: String,

    /// Birth date decoded from the identifier (or the result page)
    pub birth_date: Option<NaiveDate>,

    /// Region of the combination that produced the match
    pub region: String,

    /// Index of the source task
    pub source_index: u64,

    /// Combination that produced the match
    pub source_combo: Combo,

    /// Worker that found the match
    pub worker_id: usize,

    pub found_at: DateTime<Utc>,
}

impl MatchRecord {
    pub fn new(
        person: &PersonFields,
        extracted_id: String,
        birth_date: Option<NaiveDate>,
        task: &Task,
        worker_id: usize,
    ) -> Self {
        Self {
            person_id: person.person_id,
            first_name: person.first_name.clone(),
            last_name_1: person.last_name_1.clone(),
            last_name_2: person.last_name_2.clone(),
            gender: person.gender,
            extracted_id,
            birth_date,
            region: task.combo.region.clone(),
            source_index: task.index,
            source_combo: task.combo.clone(),
            worker_id,
            found_at: Utc::now(),
        }
    }
}

/// Durable snapshot of run progress
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub person_id: u32,
    pub person_name: String,

    /// Lowest index not yet completed; resuming re-issues `index >= resume_index`
    pub resume_index: u64,

    /// Last combination observed complete before the save
    pub last_combo: Option<Combo>,

    /// All matches found so far, append-only across the run
    pub matches: Vec<MatchRecord>,

    /// Count of tasks completed (reporting only, not the resume frontier)
    pub processed_count: u64,

    pub total_combinations: u64,

    pub saved_at: DateTime<Utc>,
}

impl Checkpoint {
    /// Check structural invariants before persisting
    pub fn validate(&self) -> Result<(), String> {
        if self.resume_index > self.total_combinations {
            return Err(format!(
                "resume_index {} exceeds total_combinations {}",
                self.resume_index, self.total_combinations
            ));
        }
        Ok(())
    }

    /// Completion percentage for progress display
    pub fn completion_percentage(&self) -> f64 {
        if self.total_combinations == 0 {
            return 100.0;
        }
        (self.processed_count as f64 / self.total_combinations as f64) * 100.0
    }
}

/// A task that exhausted its retry budget without a definitive outcome
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnresolvedTask {
    pub index: u64,
    pub combo: Combo,
    pub attempts: u32,
    pub reason: String,
}

/// Per-worker counters, mutated only by the owning worker
///
/// Read by the reporting path after the worker has been joined; never a
/// source of truth for resume.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkerStats {
    pub worker_id: usize,
    pub searches: u64,
    pub matches: u64,
    pub retries: u64,
    pub errors: u64,

    /// Searches per second over the worker's lifetime
    pub rate: f64,
}

impl WorkerStats {
    pub fn new(worker_id: usize) -> Self {
        Self {
            worker_id,
            ..Default::default()
        }
    }
}

/// Per-person summary handed to the result sink alongside match batches
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub person_id: u32,
    pub first_name: String,
    pub last_name_1: String,
    pub last_name_2: String,
    pub total_matches: usize,
}

impl RunSummary {
    pub fn for_person(person: &PersonFields, total_matches: usize) -> Self {
        Self {
            person_id: person.person_id,
            first_name: person.first_name.clone(),
            last_name_1: person.last_name_1.clone(),
            last_name_2: person.last_name_2.clone(),
            total_matches,
        }
    }
}

/// Final report for a completed (or interrupted) run
#[derive(Debug, Clone)]
pub struct RunReport {
    pub person_id: u32,
    pub processed: u64,
    pub total_combinations: u64,
    pub matches: Vec<MatchRecord>,

    /// Tasks that exhausted their retry budget, surfaced, never dropped
    pub unresolved: Vec<UnresolvedTask>,

    /// True when the run ended because a match set the stop signal
    pub stopped_on_match: bool,

    /// True when every index in the space completed
    pub exhausted: bool,

    pub worker_stats: Vec<WorkerStats>,
}

impl RunReport {
    /// Whether the run left work behind (interrupt or unresolved tasks)
    pub fn is_partial(&self) -> bool {
        !self.stopped_on_match && (!self.exhausted || !self.unresolved.is_empty())
    }
}
