use crate::services::CaptureFrame;
use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;

/// Result of finalizing an artifact's audio file.
#[derive(Debug, Clone)]
pub struct WrittenAudio {
    pub path: PathBuf,
    pub duration_secs: f64,
    /// SHA-256 over the PCM payload, hex-encoded. Content-addresses every
    /// downstream stage output for this artifact.
    pub checksum: String,
}

/// Encodes drained frame-buffer contents into the artifact WAV file.
///
/// Samples are hashed as they are written, so the checksum is available the
/// moment the file is finalized.
pub struct ArtifactWriter {
    writer: Option<hound::WavWriter<BufWriter<File>>>,
    hasher: Sha256,
    path: PathBuf,
    sample_rate: u32,
    channels: u16,
    samples_written: u64,
}

impl ArtifactWriter {
    pub fn create(path: PathBuf, sample_rate: u32, channels: u16) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create recordings directory")?;
        }

        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };

        let writer = hound::WavWriter::create(&path, spec)
            .with_context(|| format!("Failed to create WAV file: {:?}", path))?;

        Ok(Self {
            writer: Some(writer),
            hasher: Sha256::new(),
            path,
            sample_rate,
            channels,
            samples_written: 0,
        })
    }

    pub fn write_frame(&mut self, frame: &CaptureFrame) -> Result<()> {
        if let Some(writer) = &mut self.writer {
            for &sample in &frame.samples {
                writer
                    .write_sample(sample)
                    .context("Failed to write sample to WAV")?;
                self.hasher.update(sample.to_le_bytes());
            }
            self.samples_written += frame.samples.len() as u64;
        }
        Ok(())
    }

    pub fn write_frames<'a, I>(&mut self, frames: I) -> Result<()>
    where
        I: IntoIterator<Item = &'a CaptureFrame>,
    {
        for frame in frames {
            self.write_frame(frame)?;
        }
        Ok(())
    }

    pub fn finish(mut self) -> Result<WrittenAudio> {
        if let Some(writer) = self.writer.take() {
            writer.finalize().context("Failed to finalize WAV file")?;
        }

        let frames = self.samples_written / u64::from(self.channels.max(1));
        let duration_secs = frames as f64 / f64::from(self.sample_rate);
        let checksum = format!("{:x}", self.hasher.finalize());

        Ok(WrittenAudio {
            path: self.path,
            duration_secs,
            checksum,
        })
    }

    /// Abandon the file (capture failure: the partial artifact is discarded).
    pub fn discard(mut self) {
        self.writer.take();
        let _ = std::fs::remove_file(&self.path);
    }
}
