//! Durable store seam.
//!
//! The core only needs a record store with two non-trivial guarantees: an
//! atomic compare-and-swap on a job's stage field, and append-only transcript
//! segment writes. Stage outputs are content-addressed by artifact checksum
//! so re-running a stage after a crash reproduces the same stored output
//! without duplicate side effects.

mod memory;

pub use memory::MemoryStore;

use crate::domain::{
    IndexEntry, JobStage, PipelineJob, RecordingArtifact, RecordingSession, SearchFilters,
    SessionState, TranscriptSegment,
};
use anyhow::Result;
use std::time::Duration;
use uuid::Uuid;

/// Fields a job CAS may rewrite alongside the stage transition.
#[derive(Debug, Clone, Default)]
pub struct JobUpdate {
    pub attempt: Option<u32>,
    pub last_error: Option<Option<String>>,
    pub failed_from: Option<Option<JobStage>>,
    pub cancel_requested: Option<bool>,
}

#[async_trait::async_trait]
pub trait DurableStore: Send + Sync {
    // --- sessions ---

    async fn put_session(&self, session: RecordingSession) -> Result<()>;
    async fn get_session(&self, id: Uuid) -> Result<Option<RecordingSession>>;
    async fn set_session_state(&self, id: Uuid, state: SessionState) -> Result<()>;
    /// Remove a session that never confirmed (false trigger, no artifact).
    async fn remove_session(&self, id: Uuid) -> Result<()>;
    async fn list_sessions(&self, room_id: Option<&str>) -> Result<Vec<RecordingSession>>;

    // --- artifacts ---

    async fn put_artifact(&self, artifact: RecordingArtifact) -> Result<()>;
    async fn get_artifact(&self, session_id: Uuid) -> Result<Option<RecordingArtifact>>;

    // --- jobs ---

    async fn put_job(&self, job: PipelineJob) -> Result<()>;
    async fn get_job(&self, id: Uuid) -> Result<Option<PipelineJob>>;
    async fn job_for_artifact(&self, artifact_id: Uuid) -> Result<Option<PipelineJob>>;

    /// Atomically move a job from `expect` to `next`, applying `update` in
    /// the same write. Returns false (and writes nothing) if the job is no
    /// longer in `expect`.
    async fn cas_job_stage(
        &self,
        id: Uuid,
        expect: JobStage,
        next: JobStage,
        update: JobUpdate,
    ) -> Result<bool>;

    /// Record a failed attempt without leaving the current stage.
    async fn record_job_attempt(&self, id: Uuid, attempt: u32, last_error: String) -> Result<()>;

    /// Flag a job for cancellation; workers observe the flag between
    /// attempts and stages.
    async fn request_job_cancel(&self, id: Uuid) -> Result<bool>;

    /// Jobs not yet in `Done`/`Failed`, for resumption after restart.
    async fn non_terminal_jobs(&self) -> Result<Vec<PipelineJob>>;

    // --- leases ---

    /// Claim exclusive processing rights on a job. Succeeds if the lease is
    /// free, expired, or already held by `worker`.
    async fn acquire_lease(&self, job_id: Uuid, worker: &str, ttl: Duration) -> Result<bool>;
    async fn release_lease(&self, job_id: Uuid, worker: &str) -> Result<()>;

    // --- transcript segments ---

    /// Append-only; callers guarantee one write per job.
    async fn append_segments(&self, segments: Vec<TranscriptSegment>) -> Result<()>;
    async fn segments_for_job(&self, job_id: Uuid) -> Result<Vec<TranscriptSegment>>;

    // --- content-addressed stage outputs ---

    /// Durably record a stage's output keyed by (artifact checksum, stage).
    /// Writing the same key twice with the same content is a no-op.
    async fn put_stage_output(
        &self,
        checksum: &str,
        stage: JobStage,
        output: serde_json::Value,
    ) -> Result<()>;
    async fn get_stage_output(
        &self,
        checksum: &str,
        stage: JobStage,
    ) -> Result<Option<serde_json::Value>>;

    // --- index entries ---

    /// Upsert by segment id, so re-running the indexing stage is idempotent.
    async fn put_index_entry(&self, entry: IndexEntry) -> Result<()>;
    async fn index_entries(&self, filters: &SearchFilters) -> Result<Vec<IndexEntry>>;
}
