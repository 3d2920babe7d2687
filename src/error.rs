use thiserror::Error;
use uuid::Uuid;

/// Faults raised while a room is capturing.
///
/// Sensor and buffer faults are handled inside the controller loop and never
/// abort the process; only `CaptureDevice` is fatal to its session.
#[derive(Debug, Error)]
pub enum CaptureError {
    /// A presence/audio sampling call failed or timed out. Recovered by
    /// treating the sample as `present = false`.
    #[error("sensor unavailable for room {room_id}: {reason}")]
    SensorUnavailable { room_id: String, reason: String },

    /// The frame buffer hit capacity. Recovered by encoding pending frames
    /// before accepting new writes; surfaced as a warning.
    #[error("frame buffer overflow in session {session_id}")]
    BufferOverflow { session_id: Uuid },

    /// The capture device failed mid-session. Fatal: the session is marked
    /// failed and no artifact is emitted.
    #[error("capture device failure in room {room_id}: {reason}")]
    CaptureDeviceFailure { room_id: String, reason: String },

    /// A second session was requested while one is active in the room.
    #[error("room {room_id} already has an active session")]
    RoomBusy { room_id: String },

    #[error("artifact write failed: {0}")]
    ArtifactWrite(#[from] anyhow::Error),
}

/// Faults raised while driving a job through the processing pipeline.
///
/// Isolated per job: one failing job never blocks the others.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// An external stage call failed (timeout, transport, service error).
    /// Retried with backoff up to the policy's attempt limit.
    #[error("{stage} call failed on attempt {attempt}: {reason}")]
    StageCallFailure {
        stage: &'static str,
        attempt: u32,
        reason: String,
    },

    /// The external service answered, but the payload was unusable.
    /// Treated exactly like a stage call failure for retry purposes.
    #[error("{stage} returned a malformed response: {reason}")]
    MalformedExternalResponse { stage: &'static str, reason: String },

    /// Retry budget exhausted; the job is parked in `Failed` for operator
    /// intervention, never dropped.
    #[error("job {job_id} exhausted {attempts} attempts at {stage}: {last_error}")]
    RetriesExhausted {
        job_id: Uuid,
        stage: &'static str,
        attempts: u32,
        last_error: String,
    },

    /// Operator cancelled the job mid-flight.
    #[error("job {job_id} cancelled by operator")]
    Cancelled { job_id: Uuid },

    #[error("job {0} not found")]
    JobNotFound(Uuid),

    /// Retry was requested for a job that is not parked in `Failed`.
    #[error("job {0} is not in a failed state")]
    NotFailed(Uuid),

    /// Another worker holds the job's lease.
    #[error("lease for job {0} is held elsewhere")]
    LeaseHeld(Uuid),

    #[error("store operation failed: {0}")]
    Store(#[from] anyhow::Error),
}

/// Faults raised while answering search queries.
#[derive(Debug, Error)]
pub enum SearchError {
    /// The embedding capability was unreachable within the latency budget.
    /// Queries degrade to keyword matching instead of failing.
    #[error("embedding index unavailable: {reason}")]
    IndexUnavailable { reason: String },

    #[error("store operation failed: {0}")]
    Store(#[from] anyhow::Error),
}
