use crate::services::CaptureFrame;
use std::collections::VecDeque;

/// Outcome of offering a frame to the buffer.
#[derive(Debug, PartialEq, Eq)]
pub enum PushOutcome {
    Stored,
    /// Buffer is at capacity. The frame was NOT taken; the caller must
    /// encode pending frames (or otherwise relieve pressure) and re-offer.
    AtCapacity,
}

/// Fixed-capacity ring of captured frames pending encode.
///
/// Exclusively owned by one session's controller. Never drops a frame: at
/// capacity it refuses the write and lets the controller apply backpressure.
pub struct FrameBuffer {
    frames: VecDeque<CaptureFrame>,
    capacity: usize,
}

impl FrameBuffer {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "frame buffer capacity must be positive");
        Self {
            frames: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, frame: CaptureFrame) -> Result<PushOutcome, CaptureFrame> {
        if self.frames.len() >= self.capacity {
            return Err(frame);
        }
        self.frames.push_back(frame);
        Ok(PushOutcome::Stored)
    }

    pub fn is_full(&self) -> bool {
        self.frames.len() >= self.capacity
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Remove all pending frames in arrival order.
    pub fn drain(&mut self) -> Vec<CaptureFrame> {
        self.frames.drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(ts: u64) -> CaptureFrame {
        CaptureFrame {
            samples: vec![0i16; 160],
            sample_rate: 16000,
            channels: 1,
            timestamp_ms: ts,
        }
    }

    #[test]
    fn refuses_writes_at_capacity_without_dropping() {
        let mut buffer = FrameBuffer::new(2);
        assert_eq!(buffer.push(frame(0)), Ok(PushOutcome::Stored));
        assert_eq!(buffer.push(frame(100)), Ok(PushOutcome::Stored));
        assert!(buffer.is_full());

        // Rejected frame comes back to the caller intact.
        let rejected = buffer.push(frame(200)).unwrap_err();
        assert_eq!(rejected.timestamp_ms, 200);
        assert_eq!(buffer.len(), 2);
    }

    #[test]
    fn drain_preserves_arrival_order() {
        let mut buffer = FrameBuffer::new(4);
        for ts in [0, 100, 200] {
            buffer.push(frame(ts)).unwrap();
        }
        let drained = buffer.drain();
        let timestamps: Vec<u64> = drained.iter().map(|f| f.timestamp_ms).collect();
        assert_eq!(timestamps, vec![0, 100, 200]);
        assert!(buffer.is_empty());
    }
}
