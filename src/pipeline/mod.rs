//! Processing pipeline: turns a finished recording into a searchable
//! transcript and summary, with per-stage retry and idempotent resumption.

mod orchestrator;
mod retry;

pub use orchestrator::{PipelineHandle, PipelineOrchestrator};
pub use retry::RetryPolicy;
