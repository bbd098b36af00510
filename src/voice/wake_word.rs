//! Wake word detection
//!
//! Two stages: a local energy gate finds complete speech segments, then the
//! segment's transcript is checked for the wake phrase.

use crate::{Error, Result};

/// Minimum RMS energy to count a chunk as speech
const ENERGY_THRESHOLD: f32 = 0.03;

/// Minimum speech length to consider (0.3s at 16kHz)
const MIN_SPEECH_SAMPLES: usize = 4800;

/// Trailing silence that ends an utterance (0.5s at 16kHz)
const SILENCE_SAMPLES: usize = 8000;

/// State of the wake word detector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectorState {
    /// Waiting for speech
    Idle,
    /// Speech heard, collecting a candidate wake segment
    Listening,
    /// Wake word heard (or listening forced), collecting the command
    Activated,
}

/// Detects wake phrases in microphone audio
pub struct WakeWordDetector {
    wake_words: Vec<String>,
    state: DetectorState,
    speech_buffer: Vec<f32>,
    silence_counter: usize,
}

impl WakeWordDetector {
    /// Create a detector for the given phrases (e.g. "jarvis")
    ///
    /// # Errors
    ///
    /// Returns error if no non-empty phrase is given
    pub fn new(wake_words: Vec<String>) -> Result<Self> {
        let normalized: Vec<String> = wake_words
            .into_iter()
            .map(|w| w.trim().to_lowercase())
            .filter(|w| !w.is_empty())
            .collect();

        if normalized.is_empty() {
            return Err(Error::WakeWord("at least one wake word required".to_string()));
        }

        tracing::debug!(wake_words = ?normalized, "wake word detector initialized");

        Ok(Self {
            wake_words: normalized,
            state: DetectorState::Idle,
            speech_buffer: Vec::new(),
            silence_counter: 0,
        })
    }

    /// Feed a chunk of samples
    ///
    /// Returns true when a candidate wake segment is complete (speech
    /// followed by silence) and should be transcribed.
    pub fn process(&mut self, samples: &[f32]) -> bool {
        let is_speech = rms(samples) > ENERGY_THRESHOLD;

        match self.state {
            DetectorState::Idle => {
                if is_speech {
                    self.state = DetectorState::Listening;
                    self.speech_buffer.clear();
                    self.speech_buffer.extend_from_slice(samples);
                    self.silence_counter = 0;
                    tracing::trace!("speech detected, listening");
                }
            }
            DetectorState::Listening => {
                self.accumulate(samples, is_speech);

                if self.segment_complete() {
                    tracing::debug!(samples = self.speech_buffer.len(), "speech segment complete");
                    return true;
                }

                // Too much silence without enough speech
                if self.silence_counter > SILENCE_SAMPLES * 2 {
                    tracing::trace!("timeout - resetting");
                    self.reset();
                }
            }
            DetectorState::Activated => {
                // Leading silence before the command is not buffered
                if is_speech || !self.speech_buffer.is_empty() {
                    self.accumulate(samples, is_speech);
                }
            }
        }

        false
    }

    fn accumulate(&mut self, samples: &[f32], is_speech: bool) {
        self.speech_buffer.extend_from_slice(samples);
        if is_speech {
            self.silence_counter = 0;
        } else {
            self.silence_counter += samples.len();
        }
    }

    fn segment_complete(&self) -> bool {
        self.silence_counter > SILENCE_SAMPLES && self.speech_buffer.len() > MIN_SPEECH_SAMPLES
    }

    /// Check a transcript for a wake phrase
    ///
    /// On a match the detector activates and the text following the phrase
    /// is returned (empty if the user only said the wake word). Otherwise
    /// the detector resets and `None` is returned.
    pub fn check_wake_word(&mut self, transcript: &str) -> Option<String> {
        let command = self
            .wake_words
            .iter()
            .find_map(|w| extract_command(transcript, w));

        if command.is_some() {
            tracing::info!(transcript, "wake word detected");
            self.state = DetectorState::Activated;
            self.speech_buffer.clear();
            self.silence_counter = 0;
        } else {
            self.reset();
        }
        command
    }

    /// Take the speech buffer, clearing it
    pub fn take_speech_buffer(&mut self) -> Vec<f32> {
        self.silence_counter = 0;
        std::mem::take(&mut self.speech_buffer)
    }

    #[must_use]
    pub fn speech_buffer(&self) -> &[f32] {
        &self.speech_buffer
    }

    #[must_use]
    pub fn is_activated(&self) -> bool {
        self.state == DetectorState::Activated
    }

    #[must_use]
    pub fn is_listening(&self) -> bool {
        self.state == DetectorState::Listening
    }

    /// Check if a command utterance has been captured after activation
    #[must_use]
    pub fn is_utterance_complete(&self) -> bool {
        self.state == DetectorState::Activated && self.segment_complete()
    }

    /// Reset detector to idle state
    pub fn reset(&mut self) {
        self.state = DetectorState::Idle;
        self.speech_buffer.clear();
        self.silence_counter = 0;
    }

    #[must_use]
    pub const fn state(&self) -> DetectorState {
        self.state
    }

    #[must_use]
    pub fn wake_words(&self) -> &[String] {
        &self.wake_words
    }

    /// Skip the wake phrase and capture the next utterance as a command
    pub fn activate(&mut self) {
        self.state = DetectorState::Activated;
        self.speech_buffer.clear();
        self.silence_counter = 0;
    }
}

/// Return the text after `wake_word` if the transcript contains it
///
/// `wake_word` must already be lowercase. Offsets come from the original
/// transcript, since lowercasing can change byte lengths.
fn extract_command(transcript: &str, wake_word: &str) -> Option<String> {
    let end = transcript.char_indices().find_map(|(start, _)| {
        lowercase_prefix_len(&transcript[start..], wake_word).map(|len| start + len)
    })?;
    Some(
        transcript[end..]
            .trim_start_matches(|c: char| c.is_whitespace() || c.is_ascii_punctuation())
            .trim_end()
            .to_string(),
    )
}

/// Byte length of the prefix of `text` whose lowercase form is `word`
fn lowercase_prefix_len(text: &str, word: &str) -> Option<usize> {
    if word.is_empty() {
        return Some(0);
    }
    let mut expected = word.chars();
    for (idx, c) in text.char_indices() {
        for lower in c.to_lowercase() {
            if expected.next() != Some(lower) {
                return None;
            }
        }
        if expected.as_str().is_empty() {
            return Some(idx + c.len_utf8());
        }
    }
    None
}

/// RMS energy of a chunk
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}
