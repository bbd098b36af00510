//! Voice processing module
//!
//! Microphone capture, wake word detection, speech-to-text, speech synthesis
//! and playback. [`VoiceListener`] ties the microphone side to an
//! [`Assistant`](crate::Assistant).

mod capture;
mod listener;
mod playback;
mod stt;
mod tts;
mod wake_word;

pub use capture::{AudioCapture, SAMPLE_RATE, samples_to_wav};
pub use listener::VoiceListener;
pub use playback::{
    AudioClip, AudioSink, DecodedAudio, PLAYBACK_SAMPLE_RATE, SilentSink, SpeakerSink, decode_mp3,
    resample,
};
pub use stt::{Transcriber, WhisperStt};
pub use tts::{ElevenLabsTts, OpenAiTts, SpeechSynthesizer};
pub use wake_word::{DetectorState, WakeWordDetector, rms};
