//! sonda - Resumable combinatorial search engine
//!
//! Brute-forces a large combinatorial search space against an external lookup
//! service: one person's identity fields held fixed while date-of-birth,
//! region and day are enumerated, looking for a matching registry record.
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - [`config`] - Configuration management and settings
//! - [`space`] - Bijective index/combination enumeration
//! - [`validator`] - Response content validation and identifier extraction
//! - [`executor`] - Search executor capability and HTTP implementation
//! - [`engine`] - Worker pool, triage, aggregation and orchestration
//! - [`storage`] - Checkpoint persistence and result sinks
//! - [`models`] - Core data structures and types
//! - [`utils`] - Common utilities and helpers
//!
//! # Example
//!
//! ```no_run
//! use sonda::config::Config;
//! use sonda::space::CombinationSpace;
//!
//! # fn main() -> anyhow::Result<()> {
//! let config = Config::from_env()?;
//! let space = CombinationSpace::from_bounds(&config.search.start, &config.search.end)?;
//! println!("{} combinations to search", space.total());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod executor;
pub mod models;
pub mod space;
pub mod storage;
pub mod utils;
pub mod validator;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::engine::{EngineOptions, RateGovernor, SearchEngine, StopSignal};
    pub use crate::error::{Error, ErrorCategory, Result};
    pub use crate::executor::{ExecutorProvider, RawOutcome, RawStatus, SearchExecutor};
    pub use crate::models::{Checkpoint, MatchRecord, PersonFields, RunReport, Task};
    pub use crate::space::{Combo, CombinationSpace};
    pub use crate::storage::{CheckpointStore, JsonlResultSink, ResultSink};
    pub use crate::validator::{ResultValidator, Validation};
}

// Direct re-exports for convenience
pub use models::{Checkpoint, MatchRecord, PersonFields, RunReport};
