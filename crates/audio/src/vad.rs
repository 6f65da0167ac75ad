//! Stateless per-chunk speech classifier plus the per-session counters a
//! turn controller uses to find utterance boundaries. SPEC_FULL.md §4.2.

/// RMS threshold above which a chunk is classified as speech. Tuned
/// empirically for phone-grade noise floor (≈8) vs. speech (50+).
pub const SPEECH_THRESHOLD: f64 = 30.0;
/// Consecutive non-speech chunks (at ~20ms/frame) that close an utterance.
pub const SILENCE_CHUNKS_REQUIRED: u32 = 15;
/// Utterances shorter than this are dropped rather than transcribed.
pub const MIN_UTTERANCE_BYTES: usize = 3_200;

/// `rms = sqrt(mean(sample^2))` over signed 16-bit samples.
pub fn is_speech(chunk: &[u8]) -> bool {
    rms(chunk) > SPEECH_THRESHOLD
}

fn rms(chunk: &[u8]) -> f64 {
    if chunk.len() < 2 {
        return 0.0;
    }
    let samples = chunk.chunks_exact(2);
    let n = samples.len();
    if n == 0 {
        return 0.0;
    }
    let sum_sq: f64 = samples
        .map(|b| {
            let s = i16::from_le_bytes([b[0], b[1]]) as f64;
            s * s
        })
        .sum();
    (sum_sq / n as f64).sqrt()
}

/// Tracks the run of consecutive silent chunks since speech last became
/// active, owned by the turn controller per call (C6 drives this; C2
/// itself is stateless).
#[derive(Debug, Default)]
pub struct SegmenterState {
    pub speech_active: bool,
    pub silence_run: u32,
}

/// What the segmenter decided to do with the chunk just observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentEvent {
    /// Still accumulating; no decision yet.
    Continue,
    /// Silence run closed an utterance that met the minimum length.
    UtteranceComplete,
    /// Silence run closed an utterance that was too short to transcribe.
    UtteranceTooShort,
}

impl SegmenterState {
    /// Feed one chunk plus the accumulated utterance length so far and
    /// get back what the turn controller should do next.
    pub fn observe(&mut self, chunk: &[u8], accumulated_bytes: usize) -> SegmentEvent {
        if is_speech(chunk) {
            self.speech_active = true;
            self.silence_run = 0;
            return SegmentEvent::Continue;
        }

        if !self.speech_active {
            return SegmentEvent::Continue;
        }

        self.silence_run += 1;
        if self.silence_run < SILENCE_CHUNKS_REQUIRED {
            return SegmentEvent::Continue;
        }

        self.speech_active = false;
        self.silence_run = 0;
        if accumulated_bytes < MIN_UTTERANCE_BYTES {
            SegmentEvent::UtteranceTooShort
        } else {
            SegmentEvent::UtteranceComplete
        }
    }
}
