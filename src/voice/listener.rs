//! Microphone loop feeding the assistant
//!
//! Polls captured audio every 100ms. A speech segment heard while waiting is
//! transcribed and checked for the wake phrase; once the assistant is
//! listening, the next complete utterance becomes the turn's transcript.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use super::{AudioCapture, SAMPLE_RATE, Transcriber, WakeWordDetector, samples_to_wav};
use crate::orchestrator::Assistant;
use crate::{Error, Result};

/// Minimum samples to process per tick (100ms at 16kHz)
const CHUNK_SIZE: usize = 1600;

/// Segments shorter than this are not worth transcribing (0.5s)
const MIN_SEGMENT_SAMPLES: usize = SAMPLE_RATE as usize / 2;

/// Drives the assistant from the microphone
pub struct VoiceListener {
    assistant: Assistant,
    transcriber: Arc<dyn Transcriber>,
    wake_words: Vec<String>,
}

impl VoiceListener {
    #[must_use]
    pub fn new(
        assistant: Assistant,
        transcriber: Arc<dyn Transcriber>,
        wake_words: Vec<String>,
    ) -> Self {
        Self {
            assistant,
            transcriber,
            wake_words,
        }
    }

    /// Run until `shutdown` fires
    ///
    /// A missing microphone disables voice input on the assistant before the
    /// error is returned.
    ///
    /// # Errors
    ///
    /// Returns error if the microphone cannot be opened or started
    #[allow(clippy::future_not_send)]
    pub async fn run(&self, shutdown: &mut mpsc::Receiver<()>) -> Result<()> {
        let mut detector = WakeWordDetector::new(self.wake_words.clone())?;

        let mut capture = match AudioCapture::new().and_then(|mut c| c.start().map(|()| c)) {
            Ok(capture) => capture,
            Err(e) => {
                let reason = match &e {
                    Error::Unsupported(reason) => reason.clone(),
                    other => other.to_string(),
                };
                self.assistant.voice_input_unsupported(&reason).await;
                return Err(e);
            }
        };

        tracing::info!(wake_words = ?detector.wake_words(), "listening for wake word");
        let mut pending: Vec<f32> = Vec::new();

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("shutdown requested");
                    break;
                }
                () = tokio::time::sleep(Duration::from_millis(100)) => {
                    pending.extend(capture.take_buffer());
                    if pending.len() < CHUNK_SIZE {
                        continue;
                    }
                    let samples = std::mem::take(&mut pending);

                    match self.process_chunk(&mut detector, &samples).await {
                        // Audio recorded during a turn includes our own speech
                        Ok(true) => capture.clear_buffer(),
                        Ok(false) => {}
                        Err(e) => tracing::error!(error = %e, "voice processing error"),
                    }
                }
            }
        }

        capture.stop();
        Ok(())
    }

    /// Handle one chunk; returns true if buffered audio is now stale
    async fn process_chunk(
        &self,
        detector: &mut WakeWordDetector,
        samples: &[f32],
    ) -> Result<bool> {
        if !self.assistant.is_active().await || self.assistant.is_busy() {
            detector.reset();
            return Ok(false);
        }

        let state = self.assistant.state().await;
        if state.is_processing() || state.is_speaking() {
            detector.reset();
            return Ok(false);
        }
        if state.is_listening() && !detector.is_activated() {
            detector.activate();
        }

        let segment_ready = detector.process(samples);

        if segment_ready && !detector.is_activated() {
            let speech = detector.take_speech_buffer();
            if speech.len() <= MIN_SEGMENT_SAMPLES {
                detector.reset();
                return Ok(false);
            }

            tracing::debug!(samples = speech.len(), "checking for wake word");
            let text = match self.transcribe(&speech).await {
                Ok(text) => text,
                Err(e) => {
                    tracing::debug!(error = %e, "wake segment not transcribed");
                    detector.reset();
                    return Ok(false);
                }
            };

            let Some(command) = detector.check_wake_word(&text) else {
                return Ok(false);
            };

            self.assistant.wake_word_detected().await?;
            if !command.is_empty() {
                detector.reset();
                self.assistant.transcript_received(&command, true).await?;
            }
            return Ok(true);
        }

        if detector.is_utterance_complete() {
            let speech = detector.take_speech_buffer();
            detector.reset();

            match self.transcribe(&speech).await {
                Ok(text) if text.is_empty() => {
                    tracing::debug!("utterance had no words");
                    return Ok(false);
                }
                Ok(text) => {
                    tracing::info!(command = %text, "command received");
                    self.assistant.transcript_received(&text, true).await?;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "STT failed");
                    self.assistant.recognition_failed(&e.to_string()).await;
                }
            }
            return Ok(true);
        }

        Ok(false)
    }

    async fn transcribe(&self, samples: &[f32]) -> Result<String> {
        let wav = samples_to_wav(samples, SAMPLE_RATE)?;
        self.transcriber.transcribe(&wav).await
    }
}
