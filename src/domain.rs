use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// Lifecycle of a persisted recording session.
///
/// `Armed` covers the confirmation window before capture actually starts; a
/// session that never confirms is removed rather than persisted as failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Armed,
    Recording,
    Draining,
    Completed,
    Failed,
}

impl SessionState {
    /// Terminal states are immutable; the controller never touches the
    /// session record again once one is reached.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Completed | SessionState::Failed)
    }
}

/// One presence-triggered (or manually started) recording in one room.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingSession {
    pub id: Uuid,
    pub room_id: String,
    pub faculty: String,
    pub subject: String,
    pub started_at: DateTime<Utc>,
    pub state: SessionState,
}

/// Durable output of one completed recording session.
///
/// Immutable once produced; owned by the pipeline from creation until
/// indexing completes or the job is marked failed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingArtifact {
    pub session_id: Uuid,
    /// Container written by the capture device, when it produced one.
    pub video_path: Option<PathBuf>,
    /// 16 kHz mono 16-bit WAV drained from the frame buffer.
    pub audio_path: PathBuf,
    pub duration_secs: f64,
    /// SHA-256 of the audio payload. Keys every downstream stage output.
    pub checksum: String,
    pub faculty: String,
    pub subject: String,
    pub recorded_at: DateTime<Utc>,
}

/// Pipeline stage a job is currently in.
///
/// Transitions are monotonic (`Transcribing → Summarizing → Indexing → Done`)
/// except for operator retry, which moves `Failed` back to the stage it
/// failed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStage {
    Transcribing,
    Summarizing,
    Indexing,
    Done,
    Failed,
}

impl JobStage {
    /// The stage that follows this one on success.
    pub fn next(&self) -> Option<JobStage> {
        match self {
            JobStage::Transcribing => Some(JobStage::Summarizing),
            JobStage::Summarizing => Some(JobStage::Indexing),
            JobStage::Indexing => Some(JobStage::Done),
            JobStage::Done | JobStage::Failed => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStage::Done | JobStage::Failed)
    }

    /// Stable label used in logs and stage-output keys.
    pub fn label(&self) -> &'static str {
        match self {
            JobStage::Transcribing => "transcribing",
            JobStage::Summarizing => "summarizing",
            JobStage::Indexing => "indexing",
            JobStage::Done => "done",
            JobStage::Failed => "failed",
        }
    }
}

/// One artifact's trip through the processing pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineJob {
    pub id: Uuid,
    pub artifact_id: Uuid,
    pub stage: JobStage,
    /// Highest number of external calls any single stage has needed,
    /// including the successful one. Reset to zero by operator retry.
    pub attempt: u32,
    pub last_error: Option<String>,
    /// Stage the job was in when it entered `Failed`; retry resumes here.
    pub failed_from: Option<JobStage>,
    /// Set by the operator; workers observe it between attempts and stages.
    pub cancel_requested: bool,
    pub updated_at: DateTime<Utc>,
}

impl PipelineJob {
    pub fn new(artifact_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            artifact_id,
            stage: JobStage::Transcribing,
            attempt: 0,
            last_error: None,
            failed_from: None,
            cancel_requested: false,
            updated_at: Utc::now(),
        }
    }
}

/// A time-aligned slice of a lecture transcript.
///
/// Segments for one job are contiguous, ordered by start offset, and cover
/// the artifact's full duration. Immutable once written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptSegment {
    pub id: Uuid,
    pub job_id: Uuid,
    /// Seconds from the start of the recording.
    pub start_offset: f64,
    pub end_offset: f64,
    pub text: String,
    pub confidence: f32,
}

/// Lecture summary produced by the summarization capability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Summary {
    pub job_id: Uuid,
    pub text: String,
    pub key_points: Vec<String>,
    pub topics: Vec<String>,
}

/// One transcript segment's entry in the semantic index.
///
/// Metadata is denormalized so queries can pre-filter without joins.
/// Append-only unless the embedding model changes, which rebuilds the index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexEntry {
    pub segment_id: Uuid,
    pub embedding: Vec<f32>,
    pub text: String,
    pub faculty: String,
    pub subject: String,
    pub date: DateTime<Utc>,
}

/// Structured pre-filters applied before similarity ranking.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchFilters {
    pub faculty: Option<String>,
    pub subject: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl SearchFilters {
    pub fn matches(&self, entry: &IndexEntry) -> bool {
        if let Some(faculty) = &self.faculty {
            if &entry.faculty != faculty {
                return false;
            }
        }
        if let Some(subject) = &self.subject {
            if &entry.subject != subject {
                return false;
            }
        }
        if let Some(from) = &self.from {
            if entry.date < *from {
                return false;
            }
        }
        if let Some(to) = &self.to {
            if entry.date > *to {
                return false;
            }
        }
        true
    }
}

/// One ranked search result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub segment_id: Uuid,
    pub score: f64,
    pub text: String,
    pub faculty: String,
    pub subject: String,
    pub date: DateTime<Utc>,
}
