//! Checkpoint persistence for resumable runs
//!
//! A store holds at most one checkpoint per run and overwrites it atomically
//! on each save: the state is serialized to a temp file which is then renamed
//! over the live file, so a crash mid-write can never leave a torn checkpoint
//! observable. `load` returns the prior valid checkpoint or nothing.
//!
//! # Example
//!
//! ```no_run
//! use sonda::storage::CheckpointStore;
//! use std::path::Path;
//!
//! # fn example() -> sonda::error::Result<()> {
//! let store = CheckpointStore::new(Path::new("./data/checkpoints"))?;
//! if let Some(ckpt) = store.load()? {
//!     println!("Resuming from index {}", ckpt.resume_index);
//! }
//! # Ok(())
//! # }
//! ```

use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::models::Checkpoint;

const CHECKPOINT_FILE: &str = "search.checkpoint.json";

/// File-backed checkpoint store, one checkpoint per run
pub struct CheckpointStore {
    checkpoint_dir: PathBuf,
}

impl CheckpointStore {
    /// Create a store rooted at `checkpoint_dir`, creating it if needed
    pub fn new(checkpoint_dir: &Path) -> Result<Self> {
        fs::create_dir_all(checkpoint_dir).map_err(|e| {
            Error::persistence(
                format!(
                    "Failed to create checkpoint directory: {}",
                    checkpoint_dir.display()
                ),
                e,
            )
        })?;

        Ok(Self {
            checkpoint_dir: checkpoint_dir.to_path_buf(),
        })
    }

    fn live_path(&self) -> PathBuf {
        self.checkpoint_dir.join(CHECKPOINT_FILE)
    }

    fn temp_path(&self) -> PathBuf {
        self.checkpoint_dir.join(format!("{CHECKPOINT_FILE}.tmp"))
    }

    /// Save a checkpoint atomically
    pub fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        checkpoint
            .validate()
            .map_err(|msg| Error::other(format!("Refusing to save invalid checkpoint: {msg}")))?;

        let temp_path = self.temp_path();
        let live_path = self.live_path();

        let file = File::create(&temp_path).map_err(|e| {
            Error::persistence(
                format!("Failed to create checkpoint file: {}", temp_path.display()),
                e,
            )
        })?;

        let writer = BufWriter::new(file);
        serde_json::to_writer_pretty(writer, checkpoint)
            .map_err(|e| Error::persistence("Failed to serialize checkpoint", e))?;

        // Atomic rename: the live file is either the old state or the new one
        fs::rename(&temp_path, &live_path).map_err(|e| {
            Error::persistence(
                format!("Failed to rename checkpoint file: {}", live_path.display()),
                e,
            )
        })?;

        tracing::debug!(
            path = %live_path.display(),
            resume_index = checkpoint.resume_index,
            processed = checkpoint.processed_count,
            "Checkpoint saved"
        );
        Ok(())
    }

    /// Load the checkpoint, if one exists
    ///
    /// A missing file is `None`; an unreadable or corrupt file is an error,
    /// never a partial state.
    pub fn load(&self) -> Result<Option<Checkpoint>> {
        let path = self.live_path();
        if !path.exists() {
            return Ok(None);
        }

        let file = File::open(&path).map_err(|e| {
            Error::persistence(
                format!("Failed to open checkpoint file: {}", path.display()),
                e,
            )
        })?;

        let reader = BufReader::new(file);
        let checkpoint: Checkpoint = serde_json::from_reader(reader)
            .map_err(|e| Error::persistence("Failed to deserialize checkpoint", e))?;

        tracing::debug!(path = %path.display(), "Checkpoint loaded");
        Ok(Some(checkpoint))
    }

    /// Check whether a checkpoint exists
    pub fn exists(&self) -> bool {
        self.live_path().exists()
    }

    /// Delete the checkpoint and any stray temp file
    pub fn clear(&self) -> Result<()> {
        for path in [self.live_path(), self.temp_path()] {
            if path.exists() {
                fs::remove_file(&path).map_err(|e| {
                    Error::persistence(
                        format!("Failed to delete checkpoint: {}", path.display()),
                        e,
                    )
                })?;
            }
        }
        tracing::debug!("Checkpoint cleared");
        Ok(())
    }

    /// Get checkpoint directory
    pub fn checkpoint_dir(&self) -> &Path {
        &self.checkpoint_dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tempfile::TempDir;

    fn test_checkpoint(resume_index: u64) -> Checkpoint {
        Checkpoint {
            person_id: 7,
            person_name: "Ana Prueba López".to_string(),
            resume_index,
            last_combo: None,
            matches: vec![],
            processed_count: resume_index,
            total_combinations: 1000,
            saved_at: Utc::now(),
        }
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(dir.path()).unwrap();

        store.save(&test_checkpoint(250)).unwrap();
        assert!(store.exists());

        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.person_id, 7);
        assert_eq!(loaded.resume_index, 250);
        assert_eq!(loaded.total_combinations, 1000);
    }

    #[test]
    fn test_load_missing_is_none() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(dir.path()).unwrap();
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_overwrite_keeps_single_checkpoint() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(dir.path()).unwrap();

        store.save(&test_checkpoint(100)).unwrap();
        store.save(&test_checkpoint(200)).unwrap();

        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.resume_index, 200);

        let files: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(files.len(), 1);
    }

    #[test]
    fn test_torn_write_not_observable() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(dir.path()).unwrap();

        store.save(&test_checkpoint(100)).unwrap();

        // Simulate a crash mid-write: garbage in the temp file, never renamed
        fs::write(store.temp_path(), b"{\"person_id\": 7, \"trunc").unwrap();

        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.resume_index, 100);
    }

    #[test]
    fn test_clear() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(dir.path()).unwrap();

        store.save(&test_checkpoint(10)).unwrap();
        fs::write(store.temp_path(), b"garbage").unwrap();

        store.clear().unwrap();
        assert!(!store.exists());
        assert!(!store.temp_path().exists());
    }

    #[test]
    fn test_save_rejects_invalid_checkpoint() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(dir.path()).unwrap();

        let mut ckpt = test_checkpoint(10);
        ckpt.resume_index = ckpt.total_combinations + 1;
        assert!(store.save(&ckpt).is_err());
    }
}
