use super::retry::RetryPolicy;
use crate::config::{ChunkerConfig, PipelineConfig};
use crate::domain::{JobStage, PipelineJob, RecordingArtifact, Summary};
use crate::error::PipelineError;
use crate::events::{CoreEvent, EventBus};
use crate::index::SearchIndex;
use crate::services::{RawTranscript, Summarizer, Transcriber};
use crate::store::{DurableStore, JobUpdate};
use crate::transcript::TranscriptChunker;
use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

/// How long a worker may sit on a job before another may steal it.
const LEASE_TTL: Duration = Duration::from_secs(600);

/// Delay before re-queueing a job whose lease is held elsewhere.
const LEASE_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Everything a stage execution needs, shared across workers.
struct StageContext {
    store: Arc<dyn DurableStore>,
    transcriber: Arc<dyn Transcriber>,
    summarizer: Arc<dyn Summarizer>,
    index: Arc<SearchIndex>,
    chunker: TranscriptChunker,
    retry: RetryPolicy,
    events: EventBus,
    requeue: mpsc::Sender<Uuid>,
}

/// Operator surface onto the running pipeline.
#[derive(Clone)]
pub struct PipelineHandle {
    store: Arc<dyn DurableStore>,
    queue_tx: mpsc::Sender<Uuid>,
}

impl PipelineHandle {
    /// Move a failed job back to the stage it failed from and re-queue it
    /// with a fresh retry budget.
    pub async fn retry_job(&self, job_id: Uuid) -> Result<(), PipelineError> {
        let job = self
            .store
            .get_job(job_id)
            .await?
            .ok_or(PipelineError::JobNotFound(job_id))?;
        if job.stage != JobStage::Failed {
            return Err(PipelineError::NotFailed(job_id));
        }

        let resume = job.failed_from.unwrap_or(JobStage::Transcribing);
        let moved = self
            .store
            .cas_job_stage(
                job_id,
                JobStage::Failed,
                resume,
                JobUpdate {
                    attempt: Some(0),
                    failed_from: Some(None),
                    cancel_requested: Some(false),
                    ..Default::default()
                },
            )
            .await?;
        if !moved {
            return Err(PipelineError::NotFailed(job_id));
        }

        info!(%job_id, stage = resume.label(), "job re-queued by operator");
        self.queue_tx
            .send(job_id)
            .await
            .map_err(|e| PipelineError::Store(anyhow::anyhow!("pipeline stopped: {e}")))?;
        Ok(())
    }

    /// Flag a job for cancellation. The owning worker observes the flag
    /// between attempts and stages, releases its lease, and parks the job in
    /// `Failed`. Returns false if the job is already terminal.
    pub async fn cancel_job(&self, job_id: Uuid) -> Result<bool, PipelineError> {
        Ok(self.store.request_job_cancel(job_id).await?)
    }
}

/// Drives completed recordings through transcribe → summarize → chunk+index
/// with a bounded worker pool. One job per artifact; per-job leases keep two
/// workers off the same job; stage outputs are content-addressed by artifact
/// checksum so resumption after a crash never duplicates work.
pub struct PipelineOrchestrator {
    ctx: Arc<StageContext>,
    workers: usize,
    queue_tx: mpsc::Sender<Uuid>,
    queue_rx: mpsc::Receiver<Uuid>,
}

impl PipelineOrchestrator {
    pub fn new(
        store: Arc<dyn DurableStore>,
        transcriber: Arc<dyn Transcriber>,
        summarizer: Arc<dyn Summarizer>,
        index: Arc<SearchIndex>,
        chunker_config: ChunkerConfig,
        pipeline_config: &PipelineConfig,
        events: EventBus,
    ) -> Self {
        let (queue_tx, queue_rx) = mpsc::channel(256);
        Self {
            ctx: Arc::new(StageContext {
                store,
                transcriber,
                summarizer,
                index,
                chunker: TranscriptChunker::new(chunker_config),
                retry: RetryPolicy::from_config(pipeline_config),
                events,
                requeue: queue_tx.clone(),
            }),
            workers: pipeline_config.workers.max(1),
            queue_tx,
            queue_rx,
        }
    }

    pub fn handle(&self) -> PipelineHandle {
        PipelineHandle {
            store: Arc::clone(&self.ctx.store),
            queue_tx: self.queue_tx.clone(),
        }
    }

    /// Run until the artifact intake closes and all queued work has drained.
    pub async fn run(mut self, mut artifact_rx: mpsc::Receiver<RecordingArtifact>) {
        info!(workers = self.workers, "pipeline orchestrator started");

        let mut pending: VecDeque<Uuid> = VecDeque::new();

        // Jobs left in a non-terminal stage by a previous run resume from
        // that stage.
        match self.ctx.store.non_terminal_jobs().await {
            Ok(jobs) => {
                for job in jobs {
                    info!(job_id = %job.id, stage = job.stage.label(), "resuming job");
                    pending.push_back(job.id);
                }
            }
            Err(e) => error!("failed to list resumable jobs: {e}"),
        }

        let mut in_flight: FuturesUnordered<_> = FuturesUnordered::new();
        let mut intake_open = true;

        loop {
            // Pick up re-queued jobs before deciding whether work is drained,
            // so a lost-lease requeue sent just before a worker finished is
            // never dropped at shutdown.
            while let Ok(job_id) = self.queue_rx.try_recv() {
                pending.push_back(job_id);
            }
            while in_flight.len() < self.workers {
                match pending.pop_front() {
                    Some(job_id) => in_flight.push(process_job(Arc::clone(&self.ctx), job_id)),
                    None => break,
                }
            }

            if !intake_open && in_flight.is_empty() && pending.is_empty() {
                break;
            }

            tokio::select! {
                artifact = artifact_rx.recv(), if intake_open => {
                    match artifact {
                        Some(artifact) => match self.intake(artifact).await {
                            Ok(job_id) => pending.push_back(job_id),
                            Err(e) => error!("failed to accept artifact: {e}"),
                        },
                        None => intake_open = false,
                    }
                }
                requeued = self.queue_rx.recv() => {
                    if let Some(job_id) = requeued {
                        pending.push_back(job_id);
                    }
                }
                Some(_) = in_flight.next(), if !in_flight.is_empty() => {}
            }
        }

        info!("pipeline orchestrator stopped");
    }

    /// Create the artifact's job record and hand it to the pool.
    async fn intake(&self, artifact: RecordingArtifact) -> anyhow::Result<Uuid> {
        let job = PipelineJob::new(artifact.session_id);
        let job_id = job.id;
        self.ctx.store.put_job(job).await?;
        info!(
            %job_id,
            artifact_id = %artifact.session_id,
            checksum = %artifact.checksum,
            "artifact accepted into pipeline"
        );
        Ok(job_id)
    }
}

/// One worker's trip with one job: lease, drive stages, release.
async fn process_job(ctx: Arc<StageContext>, job_id: Uuid) {
    let worker = format!("worker-{}", &Uuid::new_v4().simple().to_string()[..8]);

    match ctx.store.acquire_lease(job_id, &worker, LEASE_TTL).await {
        Ok(true) => {}
        Ok(false) => {
            // Another worker (possibly one that just failed this job and has
            // not released yet) holds the lease. The job must not be dropped:
            // hand it back to the queue and try again shortly.
            warn!(%job_id, "{}, re-queueing", PipelineError::LeaseHeld(job_id));
            tokio::time::sleep(LEASE_RETRY_DELAY).await;
            if ctx.requeue.send(job_id).await.is_err() {
                warn!(%job_id, "queue closed, job resumes on next start");
            }
            return;
        }
        Err(e) => {
            error!(%job_id, "lease acquisition failed: {e}");
            return;
        }
    }

    if let Err(e) = drive(&ctx, job_id).await {
        match e {
            PipelineError::RetriesExhausted { .. } | PipelineError::Cancelled { .. } => {
                warn!(%job_id, "{e}");
            }
            other => error!(%job_id, "job processing aborted: {other}"),
        }
    }

    if let Err(e) = ctx.store.release_lease(job_id, &worker).await {
        warn!(%job_id, "lease release failed: {e}");
    }
}

/// Advance the job stage by stage until terminal.
async fn drive(ctx: &StageContext, job_id: Uuid) -> Result<(), PipelineError> {
    loop {
        let job = ctx
            .store
            .get_job(job_id)
            .await?
            .ok_or(PipelineError::JobNotFound(job_id))?;

        if job.cancel_requested && !job.stage.is_terminal() {
            cancel(ctx, &job).await?;
            return Err(PipelineError::Cancelled { job_id });
        }

        match job.stage {
            JobStage::Done | JobStage::Failed => return Ok(()),
            stage => run_stage(ctx, &job, stage).await?,
        }
    }
}

async fn cancel(ctx: &StageContext, job: &PipelineJob) -> Result<(), PipelineError> {
    let error = "cancelled by operator".to_string();
    ctx.store
        .cas_job_stage(
            job.id,
            job.stage,
            JobStage::Failed,
            JobUpdate {
                last_error: Some(Some(error.clone())),
                failed_from: Some(Some(job.stage)),
                cancel_requested: Some(false),
                ..Default::default()
            },
        )
        .await?;
    ctx.events.publish(CoreEvent::JobFailed {
        job_id: job.id,
        error,
    });
    Ok(())
}

/// Execute one stage with retry and durably record its output before
/// advancing. If the output is already recorded for this artifact checksum,
/// the external call is skipped entirely (idempotent resumption).
async fn run_stage(
    ctx: &StageContext,
    job: &PipelineJob,
    stage: JobStage,
) -> Result<(), PipelineError> {
    let artifact = ctx
        .store
        .get_artifact(job.artifact_id)
        .await?
        .ok_or_else(|| {
            PipelineError::Store(anyhow::anyhow!("artifact {} missing", job.artifact_id))
        })?;

    if ctx
        .store
        .get_stage_output(&artifact.checksum, stage)
        .await?
        .is_some()
    {
        info!(job_id = %job.id, stage = stage.label(), "stage output already durable, advancing");
        advance(ctx, job.id, stage, job.attempt).await?;
        return Ok(());
    }

    let mut calls: u32 = 0;
    loop {
        // Cancellation is observed between attempts, never mid-call.
        let fresh = ctx
            .store
            .get_job(job.id)
            .await?
            .ok_or(PipelineError::JobNotFound(job.id))?;
        if fresh.cancel_requested {
            cancel(ctx, &fresh).await?;
            return Err(PipelineError::Cancelled { job_id: job.id });
        }

        calls += 1;
        let delay = ctx.retry.delay_before(calls);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        match execute(ctx, job, stage, &artifact).await {
            Ok(output) => {
                ctx.store
                    .put_stage_output(&artifact.checksum, stage, output)
                    .await?;
                advance(ctx, job.id, stage, job.attempt.max(calls)).await?;
                return Ok(());
            }
            Err(e) => {
                let attempt = job.attempt.max(calls);
                warn!(
                    job_id = %job.id,
                    stage = stage.label(),
                    attempt,
                    "stage call failed: {e}"
                );
                ctx.store
                    .record_job_attempt(job.id, attempt, e.to_string())
                    .await?;

                if !ctx.retry.attempts_remaining(calls) {
                    let last_error = e.to_string();
                    ctx.store
                        .cas_job_stage(
                            job.id,
                            stage,
                            JobStage::Failed,
                            JobUpdate {
                                last_error: Some(Some(last_error.clone())),
                                failed_from: Some(Some(stage)),
                                ..Default::default()
                            },
                        )
                        .await?;
                    ctx.events.publish(CoreEvent::JobFailed {
                        job_id: job.id,
                        error: last_error.clone(),
                    });
                    return Err(PipelineError::RetriesExhausted {
                        job_id: job.id,
                        stage: stage.label(),
                        attempts: attempt,
                        last_error,
                    });
                }
            }
        }
    }
}

async fn advance(
    ctx: &StageContext,
    job_id: Uuid,
    from: JobStage,
    attempt: u32,
) -> Result<(), PipelineError> {
    let next = from.next().unwrap_or(JobStage::Done);
    let moved = ctx
        .store
        .cas_job_stage(
            job_id,
            from,
            next,
            JobUpdate {
                attempt: Some(attempt),
                last_error: Some(None),
                ..Default::default()
            },
        )
        .await?;
    if !moved {
        // Someone else moved the job under us; the lease should prevent
        // this, so treat it as corruption and stop.
        return Err(PipelineError::Store(anyhow::anyhow!(
            "stage CAS lost for job {job_id} at {}",
            from.label()
        )));
    }
    info!(%job_id, stage = next.label(), "job advanced");
    ctx.events.publish(CoreEvent::JobStageChanged {
        job_id,
        stage: next,
    });
    Ok(())
}

/// The external call and durable side writes for one stage.
async fn execute(
    ctx: &StageContext,
    job: &PipelineJob,
    stage: JobStage,
    artifact: &RecordingArtifact,
) -> Result<serde_json::Value, PipelineError> {
    match stage {
        JobStage::Transcribing => {
            let transcript = ctx
                .transcriber
                .transcribe(&artifact.audio_path)
                .await
                .map_err(|e| PipelineError::StageCallFailure {
                    stage: "transcribe",
                    attempt: job.attempt,
                    reason: e.to_string(),
                })?;
            validate_transcript(&transcript)?;
            Ok(serde_json::to_value(&transcript).map_err(anyhow::Error::from)?)
        }
        JobStage::Summarizing => {
            let transcript = load_transcript(ctx, &artifact.checksum).await?;
            let response = ctx
                .summarizer
                .summarize(&transcript.full_text())
                .await
                .map_err(|e| PipelineError::StageCallFailure {
                    stage: "summarize",
                    attempt: job.attempt,
                    reason: e.to_string(),
                })?;
            if response.summary.trim().is_empty() {
                return Err(PipelineError::MalformedExternalResponse {
                    stage: "summarize",
                    reason: "empty summary".to_string(),
                });
            }
            let summary = Summary {
                job_id: job.id,
                text: response.summary,
                key_points: response.key_points,
                topics: response.topics,
            };
            Ok(serde_json::to_value(&summary).map_err(anyhow::Error::from)?)
        }
        JobStage::Indexing => {
            let transcript = load_transcript(ctx, &artifact.checksum).await?;

            // Segments are written once per job; a re-run after a crash
            // reuses the durable rows instead of appending duplicates.
            let mut segments = ctx.store.segments_for_job(job.id).await?;
            if segments.is_empty() {
                segments = ctx
                    .chunker
                    .chunk(job.id, artifact.duration_secs, &transcript.spans);
                ctx.store.append_segments(segments.clone()).await?;
            }

            let indexed = ctx
                .index
                .index_segments(
                    &segments,
                    &artifact.faculty,
                    &artifact.subject,
                    artifact.recorded_at,
                )
                .await
                .map_err(|e| PipelineError::StageCallFailure {
                    stage: "index",
                    attempt: job.attempt,
                    reason: e.to_string(),
                })?;

            Ok(serde_json::json!({
                "segments": segments.len(),
                "indexed": indexed,
            }))
        }
        JobStage::Done | JobStage::Failed => unreachable!("terminal stages are never executed"),
    }
}

async fn load_transcript(
    ctx: &StageContext,
    checksum: &str,
) -> Result<RawTranscript, PipelineError> {
    let value = ctx
        .store
        .get_stage_output(checksum, JobStage::Transcribing)
        .await?
        .ok_or_else(|| {
            PipelineError::Store(anyhow::anyhow!(
                "transcript output missing for checksum {checksum}"
            ))
        })?;
    serde_json::from_value(value).map_err(|e| PipelineError::MalformedExternalResponse {
        stage: "transcribe",
        reason: format!("stored transcript unreadable: {e}"),
    })
}

fn validate_transcript(transcript: &RawTranscript) -> Result<(), PipelineError> {
    let mut prev_start = f64::NEG_INFINITY;
    for span in &transcript.spans {
        if !span.start.is_finite() || !span.end.is_finite() || span.end < span.start {
            return Err(PipelineError::MalformedExternalResponse {
                stage: "transcribe",
                reason: format!("span with invalid offsets [{}, {}]", span.start, span.end),
            });
        }
        // The chunker's contiguity guarantees depend on ordered input.
        if span.start < prev_start {
            return Err(PipelineError::MalformedExternalResponse {
                stage: "transcribe",
                reason: format!("span starting at {}s out of order", span.start),
            });
        }
        prev_start = span.start;
    }
    Ok(())
}
