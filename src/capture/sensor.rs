use crate::error::CaptureError;
use crate::services::{AudioLevelMonitor, PresenceDetector};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Level reported when the audio monitor is unreachable. Quiet enough to
/// count as silence under any sane threshold.
const FLOOR_DB: f32 = -90.0;

/// One combined sensor reading for a room.
#[derive(Debug, Clone, Copy)]
pub struct SensorReading {
    pub present: bool,
    pub level_db: f32,
}

/// Wraps the external face/voice detectors into a single periodic sample.
///
/// Sampling must never block the room loop beyond a short timeout: a slow or
/// failing detector reads as `present = false` for that sample, and an
/// unreachable audio monitor reads as the silence floor.
pub struct PresenceSensor {
    detector: Arc<dyn PresenceDetector>,
    audio: Arc<dyn AudioLevelMonitor>,
    timeout: Duration,
    min_confidence: f32,
}

impl PresenceSensor {
    pub fn new(
        detector: Arc<dyn PresenceDetector>,
        audio: Arc<dyn AudioLevelMonitor>,
        timeout: Duration,
        min_confidence: f32,
    ) -> Self {
        Self {
            detector,
            audio,
            timeout,
            min_confidence,
        }
    }

    pub async fn sample(&self, room_id: &str) -> SensorReading {
        let present = match tokio::time::timeout(self.timeout, self.detector.sample(room_id)).await
        {
            Ok(Ok(sample)) => sample.present && sample.confidence >= self.min_confidence,
            Ok(Err(e)) => {
                let fault = CaptureError::SensorUnavailable {
                    room_id: room_id.to_string(),
                    reason: e.to_string(),
                };
                warn!(detector = self.detector.name(), "{fault}, treating as absent");
                false
            }
            Err(_) => {
                let fault = CaptureError::SensorUnavailable {
                    room_id: room_id.to_string(),
                    reason: "presence sample timed out".to_string(),
                };
                warn!(detector = self.detector.name(), "{fault}, treating as absent");
                false
            }
        };

        let level_db = match tokio::time::timeout(self.timeout, self.audio.level_db(room_id)).await
        {
            Ok(Ok(level)) => level,
            Ok(Err(e)) => {
                let fault = CaptureError::SensorUnavailable {
                    room_id: room_id.to_string(),
                    reason: format!("audio level monitor: {e}"),
                };
                warn!("{fault}, reading as silence floor");
                FLOOR_DB
            }
            Err(_) => {
                let fault = CaptureError::SensorUnavailable {
                    room_id: room_id.to_string(),
                    reason: "audio level sample timed out".to_string(),
                };
                warn!("{fault}, reading as silence floor");
                FLOOR_DB
            }
        };

        SensorReading { present, level_db }
    }
}
