//! Durable persistence: checkpoints and result output

pub mod checkpoint;
pub mod results;

pub use checkpoint::CheckpointStore;
pub use results::{JsonlResultSink, ResultSink};
