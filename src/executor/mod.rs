//! Search executor capability
//!
//! An executor performs one search against the remote service and returns raw
//! content plus its own judgment about the transport. Executors are stateful
//! and not safe for concurrent use: each worker owns exactly one live
//! instance, obtained from an [`ExecutorProvider`] so crashed executors can be
//! re-acquired.

pub mod http;

use async_trait::async_trait;

use crate::models::PersonFields;
use crate::space::Combo;

pub use http::{HttpExecutor, HttpExecutorProvider};

/// Transport-level judgment about one search attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawStatus {
    /// Response received; content may still be a no-match or a soft block
    Ok,

    /// The transport itself signalled throttling (e.g. HTTP 429)
    RateLimited,

    /// The executor is gone (connection refused, process dead)
    Crashed,

    /// Something went wrong but the executor may still be usable
    Error,
}

/// Raw output of one search attempt
#[derive(Debug, Clone)]
pub struct RawOutcome {
    pub status: RawStatus,
    pub content: String,
}

impl RawOutcome {
    pub fn ok(content: String) -> Self {
        Self {
            status: RawStatus::Ok,
            content,
        }
    }

    pub fn rate_limited(content: String) -> Self {
        Self {
            status: RawStatus::RateLimited,
            content,
        }
    }

    pub fn crashed() -> Self {
        Self {
            status: RawStatus::Crashed,
            content: String::new(),
        }
    }

    pub fn error() -> Self {
        Self {
            status: RawStatus::Error,
            content: String::new(),
        }
    }
}

/// One search against the remote service
///
/// The engine never inspects executor internals; `execute` reports transport
/// failures through [`RawStatus`] rather than errors so the worker loop stays
/// an explicit state machine.
#[async_trait]
pub trait SearchExecutor: Send {
    /// Acquire the underlying resource; must be called before `execute`
    async fn start(&mut self) -> crate::error::Result<()>;

    /// Perform one search for the fixed identity fields and one combination
    async fn execute(&mut self, person: &PersonFields, combo: &Combo) -> RawOutcome;

    /// Liveness probe, bounded by a short internal timeout
    async fn is_alive(&self) -> bool;

    /// Release the underlying resource
    async fn stop(&mut self);
}

/// Factory for per-worker executors, also used for crash re-acquisition
pub trait ExecutorProvider: Send + Sync {
    fn provide(&self, worker_id: usize) -> Box<dyn SearchExecutor>;
}
