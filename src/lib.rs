pub mod app;
pub mod capture;
pub mod config;
pub mod domain;
pub mod error;
pub mod events;
pub mod index;
pub mod pipeline;
pub mod services;
pub mod store;
pub mod transcript;

pub use app::{App, CapabilitySet};
pub use capture::{
    ArtifactWriter, ControllerCommand, FrameBuffer, PresenceSensor, RoomController,
    SessionRegistry,
};
pub use config::Config;
pub use domain::{
    IndexEntry, JobStage, PipelineJob, RecordingArtifact, RecordingSession, SearchFilters,
    SearchHit, SessionState, Summary, TranscriptSegment,
};
pub use error::{CaptureError, PipelineError, SearchError};
pub use events::{CoreEvent, EventBus};
pub use index::SearchIndex;
pub use pipeline::{PipelineHandle, PipelineOrchestrator, RetryPolicy};
pub use store::{DurableStore, MemoryStore};
pub use transcript::TranscriptChunker;
