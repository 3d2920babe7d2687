//! Transcript post-processing: splitting raw transcription output into
//! time-aligned, storage- and search-ready segments.

mod chunker;

pub use chunker::TranscriptChunker;
