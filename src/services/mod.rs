//! Capability contracts for the external collaborators the core consumes.
//!
//! The detection models, speech-to-text, summarization, and embedding engines
//! live outside this crate; each is abstracted as a narrow request/response
//! trait. Implementations are expected to be remote clients or model
//! wrappers; tests script them.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;

/// One presence reading for a room.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PresenceSample {
    pub present: bool,
    pub confidence: f32,
}

/// Face/voice presence detection, sampled on a fixed period.
///
/// Callers treat errors and timeouts as `present = false`; a flaky detector
/// must never crash a room loop.
#[async_trait::async_trait]
pub trait PresenceDetector: Send + Sync {
    async fn sample(&self, room_id: &str) -> Result<PresenceSample>;

    /// Detector name for logging.
    fn name(&self) -> &str;
}

/// Room audio level metering, same cadence as presence.
#[async_trait::async_trait]
pub trait AudioLevelMonitor: Send + Sync {
    /// Current level in dBFS (negative, 0.0 = full scale).
    async fn level_db(&self, room_id: &str) -> Result<f32>;
}

/// Captured audio chunk (16-bit PCM, interleaved).
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureFrame {
    pub samples: Vec<i16>,
    pub sample_rate: u32,
    pub channels: u16,
    /// Milliseconds since capture started.
    pub timestamp_ms: u64,
}

/// A room's capture hardware for the duration of one session.
#[async_trait::async_trait]
pub trait CaptureDevice: Send + Sync {
    /// Start capturing. Returns the receiver the device feeds frames into;
    /// the bounded channel is the backpressure boundary toward the device.
    async fn start(&mut self) -> Result<mpsc::Receiver<CaptureFrame>>;

    /// Stop capturing. Returns the path of the video container the device
    /// wrote, if it records one.
    async fn stop(&mut self) -> Result<Option<PathBuf>>;

    /// Device name for logging.
    fn name(&self) -> &str;
}

/// Creates a capture device per session. One device instance is exclusively
/// owned by its session's controller.
pub trait CaptureDeviceFactory: Send + Sync {
    fn create(&self, room_id: &str) -> Result<Box<dyn CaptureDevice>>;
}

/// One time-aligned span of raw transcription output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptSpan {
    /// Seconds from the start of the audio.
    pub start: f64,
    pub end: f64,
    pub text: String,
    pub confidence: f32,
}

/// Raw transcription result, prior to chunking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawTranscript {
    pub spans: Vec<TranscriptSpan>,
}

impl RawTranscript {
    /// Full transcript text, span texts joined in order.
    pub fn full_text(&self) -> String {
        self.spans
            .iter()
            .map(|s| s.text.trim())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Speech-to-text over a finished artifact's audio.
#[async_trait::async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, audio_path: &Path) -> Result<RawTranscript>;
}

/// Summarization result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryResponse {
    pub summary: String,
    pub key_points: Vec<String>,
    pub topics: Vec<String>,
}

/// Lecture summarization over the full transcript text.
#[async_trait::async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, transcript: &str) -> Result<SummaryResponse>;
}

/// Text embedding, used both at index time and query time.
#[async_trait::async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}
