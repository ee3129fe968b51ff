//! Adaptive task execution: the scheduling loop and its load classification.

mod executor;
mod load;

pub use executor::{AdaptiveExecutor, ExecutorStatus, PipelineOutcome, TickReport};
pub use load::{utilisation_level, LoadLevel, LoadTracker};
