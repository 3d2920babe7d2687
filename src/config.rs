use anyhow::Result;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub service: ServiceConfig,
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub rooms: Vec<RoomConfig>,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub chunker: ChunkerConfig,
    #[serde(default)]
    pub search: SearchConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
}

/// Capture tunables shared by all rooms unless a room overrides them.
#[derive(Debug, Clone, Deserialize)]
pub struct CaptureConfig {
    /// Presence/audio sampling period in milliseconds.
    pub sample_period_ms: u64,
    /// Per-sample detector timeout; a timed-out sample reads as absent.
    pub sensor_timeout_ms: u64,
    /// Presence confidence below this reads as absent.
    pub min_confidence: f32,
    /// Presence must be sustained this long before recording starts.
    pub confirm_window_secs: u64,
    /// Presence absent AND audio below threshold this long stops recording.
    pub silence_window_secs: u64,
    /// Audio level (dBFS) below which the room counts as silent.
    pub silence_threshold_db: f32,
    /// Frame buffer capacity before backpressure kicks in.
    pub buffer_capacity_frames: usize,
    /// Directory for artifact audio files.
    pub recordings_path: PathBuf,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            sample_period_ms: 1000,
            sensor_timeout_ms: 250,
            min_confidence: 0.5,
            confirm_window_secs: 3,
            silence_window_secs: 300, // 5 minutes
            silence_threshold_db: -50.0,
            buffer_capacity_frames: 512,
            recordings_path: PathBuf::from("recordings"),
        }
    }
}

/// One monitored classroom. Window overrides fall back to `[capture]`.
#[derive(Debug, Clone, Deserialize)]
pub struct RoomConfig {
    pub id: String,
    pub faculty: String,
    pub subject: String,
    pub confirm_window_secs: Option<u64>,
    pub silence_window_secs: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Bounded worker pool size; one job per worker at a time.
    pub workers: usize,
    /// External calls per stage before the job parks in `Failed`.
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_cap_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            max_attempts: 3,
            backoff_base_ms: 500,
            backoff_cap_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChunkerConfig {
    /// Upper bound on a transcript segment's duration in seconds.
    pub max_duration_secs: f64,
    /// Upper bound on a transcript segment's character count.
    pub max_chars: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            max_duration_secs: 60.0,
            max_chars: 1000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchConfig {
    pub top_k: usize,
    /// Latency budget for the query-time embedding call; past it, the query
    /// falls back to keyword matching.
    pub embed_timeout_ms: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            top_k: 10,
            embed_timeout_ms: 2_000,
        }
    }
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .build()?;

        Ok(settings.try_deserialize()?)
    }
}

impl CaptureConfig {
    pub fn sample_period(&self) -> Duration {
        Duration::from_millis(self.sample_period_ms)
    }

    pub fn sensor_timeout(&self) -> Duration {
        Duration::from_millis(self.sensor_timeout_ms)
    }
}

impl RoomConfig {
    /// Effective confirmation window for this room, in milliseconds.
    pub fn confirm_window_ms(&self, capture: &CaptureConfig) -> u64 {
        self.confirm_window_secs
            .unwrap_or(capture.confirm_window_secs)
            * 1000
    }

    /// Effective silence window for this room, in milliseconds.
    pub fn silence_window_ms(&self, capture: &CaptureConfig) -> u64 {
        self.silence_window_secs
            .unwrap_or(capture.silence_window_secs)
            * 1000
    }
}
