//! Result sink: external persistence of matches
//!
//! The engine emits match batches through the [`ResultSink`] trait; the
//! shipped implementation appends JSON lines per person, keyed by a stable
//! run identifier chosen once at construction.

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::models::{MatchRecord, RunSummary};

/// External persistence of matches, append semantics per person
pub trait ResultSink: Send {
    /// Append a batch of matches for one person and refresh their summary
    fn write_batch(
        &mut self,
        person_id: u32,
        matches: &[MatchRecord],
        summary: &RunSummary,
    ) -> Result<()>;
}

/// JSON-lines file sink
///
/// One `matches_person_<id>_<run>.jsonl` file per person (append-only) plus a
/// `summary_person_<id>_<run>.json` rewritten on each batch.
pub struct JsonlResultSink {
    output_dir: PathBuf,
    run_id: String,
    match_files: HashMap<u32, PathBuf>,
}

impl JsonlResultSink {
    /// Create a sink rooted at `output_dir`, creating it if needed
    pub fn new(output_dir: &Path, run_id: &str) -> Result<Self> {
        fs::create_dir_all(output_dir).map_err(|e| {
            Error::persistence(
                format!("Failed to create output directory: {}", output_dir.display()),
                e,
            )
        })?;

        Ok(Self {
            output_dir: output_dir.to_path_buf(),
            run_id: run_id.to_string(),
            match_files: HashMap::new(),
        })
    }

    fn match_path(&mut self, person_id: u32) -> PathBuf {
        let output_dir = &self.output_dir;
        let run_id = &self.run_id;
        self.match_files
            .entry(person_id)
            .or_insert_with(|| {
                output_dir.join(format!("matches_person_{person_id}_{run_id}.jsonl"))
            })
            .clone()
    }

    fn summary_path(&self, person_id: u32) -> PathBuf {
        self.output_dir
            .join(format!("summary_person_{}_{}.json", person_id, self.run_id))
    }
}

impl ResultSink for JsonlResultSink {
    fn write_batch(
        &mut self,
        person_id: u32,
        matches: &[MatchRecord],
        summary: &RunSummary,
    ) -> Result<()> {
        let path = self.match_path(person_id);

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| {
                Error::persistence(format!("Failed to open result file: {}", path.display()), e)
            })?;

        for record in matches {
            let line = serde_json::to_string(record)
                .map_err(|e| Error::persistence("Failed to serialize match", e))?;
            writeln!(file, "{line}").map_err(|e| {
                Error::persistence(
                    format!("Failed to append match to {}", path.display()),
                    e,
                )
            })?;
        }

        let summary_json = serde_json::to_string_pretty(summary)
            .map_err(|e| Error::persistence("Failed to serialize summary", e))?;
        let summary_path = self.summary_path(person_id);
        fs::write(&summary_path, summary_json).map_err(|e| {
            Error::persistence(
                format!("Failed to write summary: {}", summary_path.display()),
                e,
            )
        })?;

        tracing::info!(
            person_id,
            batch = matches.len(),
            total = summary.total_matches,
            path = %path.display(),
            "Result batch written"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Gender, PersonFields, Task};
    use crate::space::Combo;
    use tempfile::TempDir;

    fn test_person() -> PersonFields {
        PersonFields {
            person_id: 3,
            first_name: "Ana".to_string(),
            last_name_1: "Prueba".to_string(),
            last_name_2: "López".to_string(),
            gender: Gender::M,
        }
    }

    fn test_match(person: &PersonFields, index: u64) -> MatchRecord {
        let task = Task::new(
            index,
            Combo {
                day: 1,
                month: 1,
                region: "Jalisco".to_string(),
                year: 1990,
            },
        );
        MatchRecord::new(person, "ABCD900101HDFXYZ01".to_string(), None, &task, 1)
    }

    #[test]
    fn test_write_batch_appends() {
        let dir = TempDir::new().unwrap();
        let mut sink = JsonlResultSink::new(dir.path(), "run1").unwrap();
        let person = test_person();

        let m1 = test_match(&person, 10);
        let m2 = test_match(&person, 20);

        sink.write_batch(3, &[m1], &RunSummary::for_person(&person, 1))
            .unwrap();
        sink.write_batch(3, &[m2], &RunSummary::for_person(&person, 2))
            .unwrap();

        let content =
            fs::read_to_string(dir.path().join("matches_person_3_run1.jsonl")).unwrap();
        assert_eq!(content.lines().count(), 2);

        let summary: RunSummary = serde_json::from_str(
            &fs::read_to_string(dir.path().join("summary_person_3_run1.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(summary.total_matches, 2);
    }

    #[test]
    fn test_records_roundtrip() {
        let dir = TempDir::new().unwrap();
        let mut sink = JsonlResultSink::new(dir.path(), "run1").unwrap();
        let person = test_person();
        let rec = test_match(&person, 42);

        sink.write_batch(3, std::slice::from_ref(&rec), &RunSummary::for_person(&person, 1))
            .unwrap();

        let content =
            fs::read_to_string(dir.path().join("matches_person_3_run1.jsonl")).unwrap();
        let parsed: MatchRecord = serde_json::from_str(content.lines().next().unwrap()).unwrap();
        assert_eq!(parsed, rec);
    }
}
