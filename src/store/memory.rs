use super::{DurableStore, JobUpdate};
use crate::domain::{
    IndexEntry, JobStage, PipelineJob, RecordingArtifact, RecordingSession, SearchFilters,
    SessionState, TranscriptSegment,
};
use anyhow::{bail, Result};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use uuid::Uuid;

#[derive(Debug, Clone)]
struct Lease {
    worker: String,
    expires_at: Instant,
}

#[derive(Default)]
struct Inner {
    sessions: HashMap<Uuid, RecordingSession>,
    artifacts: HashMap<Uuid, RecordingArtifact>,
    jobs: HashMap<Uuid, PipelineJob>,
    leases: HashMap<Uuid, Lease>,
    segments: Vec<TranscriptSegment>,
    stage_outputs: HashMap<(String, &'static str), serde_json::Value>,
    index_entries: HashMap<Uuid, IndexEntry>,
}

/// In-memory reference implementation of [`DurableStore`].
///
/// Single lock over all tables; good enough for tests and single-process
/// deployments. Durability across process restarts is the responsibility of
/// real store implementations.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl DurableStore for MemoryStore {
    async fn put_session(&self, session: RecordingSession) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.sessions.insert(session.id, session);
        Ok(())
    }

    async fn get_session(&self, id: Uuid) -> Result<Option<RecordingSession>> {
        let inner = self.inner.read().await;
        Ok(inner.sessions.get(&id).cloned())
    }

    async fn set_session_state(&self, id: Uuid, state: SessionState) -> Result<()> {
        let mut inner = self.inner.write().await;
        match inner.sessions.get_mut(&id) {
            Some(session) => {
                session.state = state;
                Ok(())
            }
            None => bail!("session {} not found", id),
        }
    }

    async fn remove_session(&self, id: Uuid) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.sessions.remove(&id);
        Ok(())
    }

    async fn list_sessions(&self, room_id: Option<&str>) -> Result<Vec<RecordingSession>> {
        let inner = self.inner.read().await;
        let mut sessions: Vec<_> = inner
            .sessions
            .values()
            .filter(|s| room_id.map_or(true, |r| s.room_id == r))
            .cloned()
            .collect();
        sessions.sort_by_key(|s| s.started_at);
        Ok(sessions)
    }

    async fn put_artifact(&self, artifact: RecordingArtifact) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.artifacts.insert(artifact.session_id, artifact);
        Ok(())
    }

    async fn get_artifact(&self, session_id: Uuid) -> Result<Option<RecordingArtifact>> {
        let inner = self.inner.read().await;
        Ok(inner.artifacts.get(&session_id).cloned())
    }

    async fn put_job(&self, job: PipelineJob) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.jobs.insert(job.id, job);
        Ok(())
    }

    async fn get_job(&self, id: Uuid) -> Result<Option<PipelineJob>> {
        let inner = self.inner.read().await;
        Ok(inner.jobs.get(&id).cloned())
    }

    async fn job_for_artifact(&self, artifact_id: Uuid) -> Result<Option<PipelineJob>> {
        let inner = self.inner.read().await;
        Ok(inner
            .jobs
            .values()
            .find(|j| j.artifact_id == artifact_id)
            .cloned())
    }

    async fn cas_job_stage(
        &self,
        id: Uuid,
        expect: JobStage,
        next: JobStage,
        update: JobUpdate,
    ) -> Result<bool> {
        let mut inner = self.inner.write().await;
        let job = match inner.jobs.get_mut(&id) {
            Some(job) => job,
            None => bail!("job {} not found", id),
        };
        if job.stage != expect {
            return Ok(false);
        }
        job.stage = next;
        if let Some(attempt) = update.attempt {
            job.attempt = attempt;
        }
        if let Some(last_error) = update.last_error {
            job.last_error = last_error;
        }
        if let Some(failed_from) = update.failed_from {
            job.failed_from = failed_from;
        }
        if let Some(cancel_requested) = update.cancel_requested {
            job.cancel_requested = cancel_requested;
        }
        job.updated_at = Utc::now();
        Ok(true)
    }

    async fn record_job_attempt(&self, id: Uuid, attempt: u32, last_error: String) -> Result<()> {
        let mut inner = self.inner.write().await;
        match inner.jobs.get_mut(&id) {
            Some(job) => {
                job.attempt = attempt;
                job.last_error = Some(last_error);
                job.updated_at = Utc::now();
                Ok(())
            }
            None => bail!("job {} not found", id),
        }
    }

    async fn request_job_cancel(&self, id: Uuid) -> Result<bool> {
        let mut inner = self.inner.write().await;
        match inner.jobs.get_mut(&id) {
            Some(job) if !job.stage.is_terminal() => {
                job.cancel_requested = true;
                job.updated_at = Utc::now();
                Ok(true)
            }
            Some(_) => Ok(false),
            None => bail!("job {} not found", id),
        }
    }

    async fn non_terminal_jobs(&self) -> Result<Vec<PipelineJob>> {
        let inner = self.inner.read().await;
        let mut jobs: Vec<_> = inner
            .jobs
            .values()
            .filter(|j| !j.stage.is_terminal())
            .cloned()
            .collect();
        jobs.sort_by_key(|j| j.updated_at);
        Ok(jobs)
    }

    async fn acquire_lease(&self, job_id: Uuid, worker: &str, ttl: Duration) -> Result<bool> {
        let mut inner = self.inner.write().await;
        let now = Instant::now();
        match inner.leases.get(&job_id) {
            Some(lease) if lease.worker != worker && lease.expires_at > now => Ok(false),
            _ => {
                inner.leases.insert(
                    job_id,
                    Lease {
                        worker: worker.to_string(),
                        expires_at: now + ttl,
                    },
                );
                Ok(true)
            }
        }
    }

    async fn release_lease(&self, job_id: Uuid, worker: &str) -> Result<()> {
        let mut inner = self.inner.write().await;
        if let Some(lease) = inner.leases.get(&job_id) {
            if lease.worker == worker {
                inner.leases.remove(&job_id);
            }
        }
        Ok(())
    }

    async fn append_segments(&self, segments: Vec<TranscriptSegment>) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.segments.extend(segments);
        Ok(())
    }

    async fn segments_for_job(&self, job_id: Uuid) -> Result<Vec<TranscriptSegment>> {
        let inner = self.inner.read().await;
        let mut segments: Vec<_> = inner
            .segments
            .iter()
            .filter(|s| s.job_id == job_id)
            .cloned()
            .collect();
        segments.sort_by(|a, b| a.start_offset.total_cmp(&b.start_offset));
        Ok(segments)
    }

    async fn put_stage_output(
        &self,
        checksum: &str,
        stage: JobStage,
        output: serde_json::Value,
    ) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner
            .stage_outputs
            .insert((checksum.to_string(), stage.label()), output);
        Ok(())
    }

    async fn get_stage_output(
        &self,
        checksum: &str,
        stage: JobStage,
    ) -> Result<Option<serde_json::Value>> {
        let inner = self.inner.read().await;
        Ok(inner
            .stage_outputs
            .get(&(checksum.to_string(), stage.label()))
            .cloned())
    }

    async fn put_index_entry(&self, entry: IndexEntry) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.index_entries.insert(entry.segment_id, entry);
        Ok(())
    }

    async fn index_entries(&self, filters: &SearchFilters) -> Result<Vec<IndexEntry>> {
        let inner = self.inner.read().await;
        Ok(inner
            .index_entries
            .values()
            .filter(|e| filters.matches(e))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cas_rejects_stale_stage() -> Result<()> {
        let store = MemoryStore::new();
        let job = PipelineJob::new(Uuid::new_v4());
        let id = job.id;
        store.put_job(job).await?;

        let moved = store
            .cas_job_stage(
                id,
                JobStage::Transcribing,
                JobStage::Summarizing,
                JobUpdate::default(),
            )
            .await?;
        assert!(moved);

        // Second CAS against the old stage must fail without writing.
        let moved = store
            .cas_job_stage(
                id,
                JobStage::Transcribing,
                JobStage::Summarizing,
                JobUpdate::default(),
            )
            .await?;
        assert!(!moved);
        assert_eq!(
            store.get_job(id).await?.unwrap().stage,
            JobStage::Summarizing
        );
        Ok(())
    }

    #[tokio::test]
    async fn lease_excludes_other_workers_until_expiry() -> Result<()> {
        let store = MemoryStore::new();
        let job_id = Uuid::new_v4();

        assert!(
            store
                .acquire_lease(job_id, "worker-0", Duration::from_secs(60))
                .await?
        );
        assert!(
            !store
                .acquire_lease(job_id, "worker-1", Duration::from_secs(60))
                .await?
        );
        // Re-entrant for the holder.
        assert!(
            store
                .acquire_lease(job_id, "worker-0", Duration::from_secs(60))
                .await?
        );

        store.release_lease(job_id, "worker-0").await?;
        assert!(
            store
                .acquire_lease(job_id, "worker-1", Duration::from_secs(60))
                .await?
        );
        Ok(())
    }
}
