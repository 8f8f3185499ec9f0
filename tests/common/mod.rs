//! Common test utilities

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use sonda::engine::{EngineOptions, RateGovernor};
use sonda::executor::{ExecutorProvider, RawOutcome, SearchExecutor};
use sonda::models::{Gender, PersonFields};
use sonda::space::{Combo, CombinationSpace};

/// Identity fields used across engine tests
pub fn test_person(person_id: u32) -> PersonFields {
    PersonFields {
        person_id,
        first_name: "Ana".to_string(),
        last_name_1: "Prueba".to_string(),
        last_name_2: "López".to_string(),
        gender: Gender::M,
    }
}

/// Response carrying no record and no block markers
pub fn no_match_page() -> String {
    "<html><body><p>Sin registro para los datos proporcionados.</p></body></html>".to_string()
}

/// Response carrying a valid record in the results table
pub fn match_page() -> String {
    r#"<html><body><table>
    <tr><td>CURP:</td><td style="text-transform: uppercase;">ABCD900101HDFXYZ01</td></tr>
    <tr><td>Fecha de nacimiento:</td><td style="text-transform: uppercase;">01/01/1990</td></tr>
    <tr><td>Entidad de nacimiento:</td><td style="text-transform: uppercase;">JALISCO</td></tr>
    </table></body></html>"#
        .to_string()
}

/// Engine options tuned for tests: no pacing, large timers
pub fn test_options(num_workers: usize) -> EngineOptions {
    EngineOptions {
        num_workers,
        max_retries_per_task: 3,
        max_consecutive_errors: 5,
        batch_size: 10,
        batch_timeout: Duration::from_secs(1),
        checkpoint_interval: Duration::from_secs(3600),
        min_delay: Duration::ZERO,
        max_delay: Duration::ZERO,
        report_interval: Duration::from_secs(3600),
    }
}

/// Governor with heuristics and cooldowns shrunk for tests
pub fn test_governor() -> RateGovernor {
    RateGovernor::new()
        .with_min_content_len(0)
        .with_cooldowns(Duration::from_millis(5), Duration::from_millis(20))
}

/// Per-index script deciding what the executor returns
pub type Script = Arc<dyn Fn(u64) -> RawOutcome + Send + Sync>;

/// Deterministic executor provider that records every visited index
pub struct ScriptedProvider {
    space: Arc<CombinationSpace>,
    script: Script,
    pub visited: Arc<Mutex<Vec<u64>>>,
    pub acquisitions: Arc<AtomicU64>,
}

impl ScriptedProvider {
    pub fn new(space: CombinationSpace, script: Script) -> Arc<Self> {
        Arc::new(Self {
            space: Arc::new(space),
            script,
            visited: Arc::new(Mutex::new(Vec::new())),
            acquisitions: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Indices visited so far, in completion order
    pub fn visited(&self) -> Vec<u64> {
        self.visited.lock().unwrap().clone()
    }

    /// Executors handed out (initial acquisitions plus re-acquisitions)
    pub fn acquisitions(&self) -> u64 {
        self.acquisitions.load(Ordering::SeqCst)
    }
}

impl ExecutorProvider for ScriptedProvider {
    fn provide(&self, worker_id: usize) -> Box<dyn SearchExecutor> {
        self.acquisitions.fetch_add(1, Ordering::SeqCst);
        Box::new(ScriptedExecutor {
            space: Arc::clone(&self.space),
            script: Arc::clone(&self.script),
            visited: Arc::clone(&self.visited),
            worker_id,
        })
    }
}

pub struct ScriptedExecutor {
    space: Arc<CombinationSpace>,
    script: Script,
    visited: Arc<Mutex<Vec<u64>>>,
    #[allow(dead_code)]
    worker_id: usize,
}

#[async_trait]
impl SearchExecutor for ScriptedExecutor {
    async fn start(&mut self) -> sonda::error::Result<()> {
        Ok(())
    }

    async fn execute(&mut self, _person: &PersonFields, combo: &Combo) -> RawOutcome {
        let index = self
            .space
            .index_of(combo)
            .expect("executor handed a combo outside the space");
        self.visited.lock().unwrap().push(index);
        (self.script)(index)
    }

    async fn is_alive(&self) -> bool {
        true
    }

    async fn stop(&mut self) {}
}
