use crate::config::ChunkerConfig;
use crate::domain::TranscriptSegment;
use crate::services::TranscriptSpan;
use uuid::Uuid;

/// Splits raw transcription output into bounded, time-aligned segments.
///
/// Guarantees on the output:
/// - segments are ordered by start offset and non-overlapping;
/// - `segment[i].end_offset == segment[i+1].start_offset` for all i;
/// - the sequence covers `[0, duration]` exactly;
/// - every segment respects the duration bound, and the character bound is
///   respected by splitting overlong spans at word boundaries (a single word
///   longer than the bound is hard-split at character boundaries).
///
/// Cut points prefer sentence boundaries (`.`, `!`, `?`) when the
/// transcription output provides them.
pub struct TranscriptChunker {
    config: ChunkerConfig,
}

impl TranscriptChunker {
    pub fn new(config: ChunkerConfig) -> Self {
        Self { config }
    }

    pub fn chunk(
        &self,
        job_id: Uuid,
        duration_secs: f64,
        spans: &[TranscriptSpan],
    ) -> Vec<TranscriptSegment> {
        let spans = self.split_overlong_spans(spans);
        if spans.is_empty() {
            return Vec::new();
        }

        let duration = duration_secs.max(spans.last().map(|s| s.end).unwrap_or(0.0));

        // Walk spans accumulating a segment; cut when the next span would
        // overrun either bound, backing up to the most recent sentence end
        // inside the window when there is one.
        let mut segments: Vec<TranscriptSegment> = Vec::new();
        let mut cursor = 0usize;
        let mut segment_start = 0.0f64;

        while cursor < spans.len() {
            let mut end = cursor;
            let mut chars = 0usize;
            let mut last_sentence_end: Option<usize> = None;

            while end < spans.len() {
                let span = &spans[end];
                let next_chars = chars + span.text.len() + usize::from(chars > 0);
                let over_duration = span.end - segment_start > self.config.max_duration_secs;
                let over_chars = next_chars > self.config.max_chars;
                if end > cursor && (over_duration || over_chars) {
                    break;
                }
                chars = next_chars;
                if ends_sentence(&span.text) {
                    last_sentence_end = Some(end);
                }
                end += 1;
            }

            // Prefer cutting right after a sentence end, as long as that
            // still consumes at least one span.
            let cut_after = match last_sentence_end {
                Some(idx) if idx + 1 > cursor && idx + 1 < end => idx + 1,
                _ => end,
            };

            let batch = &spans[cursor..cut_after];
            let segment_end = if cut_after >= spans.len() {
                duration
            } else {
                // Next segment starts where this one ends: contiguity.
                spans[cut_after].start.max(batch.last().unwrap().end)
            };

            let text = batch
                .iter()
                .map(|s| s.text.trim())
                .collect::<Vec<_>>()
                .join(" ");
            let confidence = if batch.is_empty() {
                0.0
            } else {
                batch.iter().map(|s| s.confidence).sum::<f32>() / batch.len() as f32
            };

            segments.push(TranscriptSegment {
                id: Uuid::new_v4(),
                job_id,
                start_offset: segment_start.clamp(0.0, duration),
                end_offset: segment_end.clamp(0.0, duration),
                text,
                confidence,
            });

            segment_start = segment_end;
            cursor = cut_after;
        }

        segments
    }

    /// A single span longer than the character bound is split at word
    /// boundaries (hard-splitting any word that alone exceeds the bound),
    /// interpolating timestamps linearly across the text.
    fn split_overlong_spans(&self, spans: &[TranscriptSpan]) -> Vec<TranscriptSpan> {
        let mut out = Vec::with_capacity(spans.len());
        for span in spans {
            if span.text.len() <= self.config.max_chars {
                out.push(span.clone());
                continue;
            }

            let pieces = split_text(&span.text, self.config.max_chars);
            let total_chars = pieces.iter().map(String::len).sum::<usize>().max(1);
            let span_duration = (span.end - span.start).max(0.0);
            let piece_count = pieces.len();
            let mut consumed = 0usize;
            let mut piece_start = span.start;

            for (i, text) in pieces.into_iter().enumerate() {
                consumed += text.len();
                let piece_end = if i + 1 == piece_count {
                    span.end
                } else {
                    span.start + span_duration * (consumed as f64 / total_chars as f64)
                };
                out.push(TranscriptSpan {
                    start: piece_start,
                    end: piece_end,
                    text,
                    confidence: span.confidence,
                });
                piece_start = piece_end;
            }
        }
        out
    }
}

/// Word-boundary split into pieces of at most `max_chars`. A word longer
/// than the bound on its own is hard-split at character boundaries.
fn split_text(text: &str, max_chars: usize) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut piece = String::new();
    for word in text.split_whitespace() {
        if !piece.is_empty() && piece.len() + 1 + word.len() > max_chars {
            pieces.push(std::mem::take(&mut piece));
        }
        if word.len() > max_chars {
            let mut rest = word;
            while rest.len() > max_chars {
                let mut cut = max_chars;
                while !rest.is_char_boundary(cut) {
                    cut -= 1;
                }
                if cut == 0 {
                    // A single character wider than the bound; take it whole.
                    cut = rest.chars().next().map_or(rest.len(), char::len_utf8);
                }
                pieces.push(rest[..cut].to_string());
                rest = &rest[cut..];
            }
            piece.push_str(rest);
            continue;
        }
        if !piece.is_empty() {
            piece.push(' ');
        }
        piece.push_str(word);
    }
    if !piece.is_empty() {
        pieces.push(piece);
    }
    pieces
}

fn ends_sentence(text: &str) -> bool {
    matches!(text.trim_end().chars().last(), Some('.' | '!' | '?'))
}
