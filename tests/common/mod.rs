// Scripted capability implementations shared by the integration tests.
#![allow(dead_code)]

use anyhow::{anyhow, Result};
use lectern::services::{
    AudioLevelMonitor, CaptureDevice, CaptureDeviceFactory, CaptureFrame, Embedder,
    PresenceDetector, PresenceSample, RawTranscript, Summarizer, SummaryResponse, Transcriber,
    TranscriptSpan,
};
use std::collections::hash_map::DefaultHasher;
use std::collections::VecDeque;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

/// Presence detector that replays a fixed sequence of readings, then keeps
/// returning `default`.
pub struct ScriptedPresence {
    script: Mutex<VecDeque<bool>>,
    default: bool,
}

impl ScriptedPresence {
    pub fn new(script: Vec<bool>, default: bool) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            default,
        }
    }
}

#[async_trait::async_trait]
impl PresenceDetector for ScriptedPresence {
    async fn sample(&self, _room_id: &str) -> Result<PresenceSample> {
        let present = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(self.default);
        Ok(PresenceSample {
            present,
            confidence: 0.95,
        })
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Detector that is always unreachable.
pub struct BrokenPresence;

#[async_trait::async_trait]
impl PresenceDetector for BrokenPresence {
    async fn sample(&self, _room_id: &str) -> Result<PresenceSample> {
        Err(anyhow!("camera offline"))
    }

    fn name(&self) -> &str {
        "broken"
    }
}

pub struct StaticLevel(pub f32);

#[async_trait::async_trait]
impl AudioLevelMonitor for StaticLevel {
    async fn level_db(&self, _room_id: &str) -> Result<f32> {
        Ok(self.0)
    }
}

/// Capture device that delivers a fixed set of frames when started.
///
/// `drop_sender_early` simulates a device dying mid-session: the frame
/// channel closes while the controller still expects frames.
/// `burst_gap_ms` splits delivery into two bursts separated by a pause, for
/// exercising repeated backpressure episodes.
pub struct MockDeviceFactory {
    pub frames: Vec<CaptureFrame>,
    pub video_path: Option<PathBuf>,
    pub drop_sender_early: bool,
    pub burst_gap_ms: Option<u64>,
}

impl MockDeviceFactory {
    /// `seconds` of 16 kHz mono audio in 100 ms frames.
    pub fn with_audio(seconds: u64) -> Self {
        let frames = (0..seconds * 10)
            .map(|i| CaptureFrame {
                samples: vec![(i % 128) as i16 * 8; 1600],
                sample_rate: 16000,
                channels: 1,
                timestamp_ms: i * 100,
            })
            .collect();
        Self {
            frames,
            video_path: None,
            drop_sender_early: false,
            burst_gap_ms: None,
        }
    }
}

impl CaptureDeviceFactory for MockDeviceFactory {
    fn create(&self, _room_id: &str) -> Result<Box<dyn CaptureDevice>> {
        Ok(Box::new(MockDevice {
            frames: self.frames.clone(),
            video_path: self.video_path.clone(),
            drop_sender_early: self.drop_sender_early,
            burst_gap_ms: self.burst_gap_ms,
            tx: None,
        }))
    }
}

pub struct MockDevice {
    frames: Vec<CaptureFrame>,
    video_path: Option<PathBuf>,
    drop_sender_early: bool,
    burst_gap_ms: Option<u64>,
    tx: Option<mpsc::Sender<CaptureFrame>>,
}

#[async_trait::async_trait]
impl CaptureDevice for MockDevice {
    async fn start(&mut self) -> Result<mpsc::Receiver<CaptureFrame>> {
        let (tx, rx) = mpsc::channel(self.frames.len().max(1) + 1);
        if let Some(gap_ms) = self.burst_gap_ms {
            let frames: Vec<CaptureFrame> = self.frames.drain(..).collect();
            let feeder = tx.clone();
            tokio::spawn(async move {
                let second_burst = frames.len() / 2;
                for (i, frame) in frames.into_iter().enumerate() {
                    if i == second_burst {
                        tokio::time::sleep(Duration::from_millis(gap_ms)).await;
                    }
                    if feeder.send(frame).await.is_err() {
                        return;
                    }
                }
            });
        } else {
            for frame in self.frames.drain(..) {
                tx.try_send(frame).map_err(|_| anyhow!("channel full"))?;
            }
        }
        if !self.drop_sender_early {
            // Keep the channel open until stop(), like real hardware.
            self.tx = Some(tx);
        }
        Ok(rx)
    }

    async fn stop(&mut self) -> Result<Option<PathBuf>> {
        self.tx.take();
        Ok(self.video_path.clone())
    }

    fn name(&self) -> &str {
        "mock-device"
    }
}

/// Transcriber that fails its first `fail_times` calls, then returns the
/// configured spans. Counts every call.
pub struct FlakyTranscriber {
    pub spans: Vec<TranscriptSpan>,
    fail_remaining: AtomicU32,
    pub calls: AtomicU32,
}

impl FlakyTranscriber {
    pub fn new(fail_times: u32, spans: Vec<TranscriptSpan>) -> Self {
        Self {
            spans,
            fail_remaining: AtomicU32::new(fail_times),
            calls: AtomicU32::new(0),
        }
    }

    pub fn lecture_spans() -> Vec<TranscriptSpan> {
        vec![
            TranscriptSpan {
                start: 0.0,
                end: 4.0,
                text: "Welcome to the lecture on graph algorithms.".to_string(),
                confidence: 0.92,
            },
            TranscriptSpan {
                start: 4.0,
                end: 9.0,
                text: "Today we will study shortest paths.".to_string(),
                confidence: 0.88,
            },
        ]
    }
}

#[async_trait::async_trait]
impl Transcriber for FlakyTranscriber {
    async fn transcribe(&self, _audio_path: &Path) -> Result<RawTranscript> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let remaining = self.fail_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_remaining.store(remaining - 1, Ordering::SeqCst);
            return Err(anyhow!("transcription service timeout"));
        }
        Ok(RawTranscript {
            spans: self.spans.clone(),
        })
    }
}

pub struct FlakySummarizer {
    fail_remaining: AtomicU32,
    pub calls: AtomicU32,
}

impl FlakySummarizer {
    pub fn new(fail_times: u32) -> Self {
        Self {
            fail_remaining: AtomicU32::new(fail_times),
            calls: AtomicU32::new(0),
        }
    }
}

#[async_trait::async_trait]
impl Summarizer for FlakySummarizer {
    async fn summarize(&self, _transcript: &str) -> Result<SummaryResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let remaining = self.fail_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_remaining.store(remaining - 1, Ordering::SeqCst);
            return Err(anyhow!("summarization service unavailable"));
        }
        Ok(SummaryResponse {
            summary: "An overview of graph algorithms and shortest paths.".to_string(),
            key_points: vec!["Graphs".to_string(), "Shortest paths".to_string()],
            topics: vec!["algorithms".to_string()],
        })
    }
}

/// Deterministic bag-of-words embedder. Identical text produces an identical
/// vector, so exact-text queries score a perfect cosine similarity.
pub struct HashEmbedder {
    pub fail: AtomicBool,
    pub calls: AtomicU32,
}

impl HashEmbedder {
    pub fn new() -> Self {
        Self {
            fail: AtomicBool::new(false),
            calls: AtomicU32::new(0),
        }
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl Embedder for HashEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(anyhow!("embedding service unavailable"));
        }
        let mut vector = vec![0.0f32; 32];
        for word in text.to_lowercase().split_whitespace() {
            let mut hasher = DefaultHasher::new();
            word.hash(&mut hasher);
            vector[(hasher.finish() % 32) as usize] += 1.0;
        }
        Ok(vector)
    }
}

pub fn arc<T>(value: T) -> Arc<T> {
    Arc::new(value)
}
