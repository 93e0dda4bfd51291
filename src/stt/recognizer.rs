//! Speech recognizer combining VAD and Whisper STT.
//!
//! Models are loaded once and shared by every engine instance. VAD and
//! Whisper sit behind separate locks: VAD runs on the capture thread and must
//! stay fast, Whisper runs on the transcription thread and is slow.

use std::time::Instant;

use anyhow::Result;
use parking_lot::Mutex;
use sherpa_rs::silero_vad::{SileroVad, SileroVadConfig};
use sherpa_rs::whisper::{WhisperConfig, WhisperRecognizer};
use tracing::{debug, info};

use crate::config::AppConfig;

/// Minimum speech duration in seconds to be considered valid.
const MIN_SPEECH_DURATION: f32 = 0.1;

/// Maximum speech duration in seconds (prevent runaway segments).
const MAX_SPEECH_DURATION: f32 = 30.0;

/// VAD window size in samples (512 samples = 32ms at 16kHz).
const VAD_WINDOW_SIZE: i32 = 512;

/// Buffer size in seconds for VAD (how much audio to accumulate).
const VAD_BUFFER_SIZE_SECONDS: f32 = 60.0;

/// Reply used when only the wake word was spoken.
const WAKE_WORD_GREETING: &str = "Hello";

struct VadState {
    vad: SileroVad,
    was_speaking: bool,
    speech_start: Option<Instant>,
}

/// Outcome of feeding audio to the VAD.
#[derive(Debug, Default)]
pub struct VadOutput {
    /// Speech began within this chunk.
    pub speech_started: bool,
    /// A completed speech segment, ready for transcription.
    pub segment: Option<Vec<f32>>,
}

/// Shared VAD + Whisper models.
pub struct Recognizer {
    vad: Mutex<VadState>,
    whisper: Mutex<WhisperRecognizer>,
    sample_rate: u32,
}

impl Recognizer {
    /// Load the VAD and Whisper models.
    ///
    /// # Errors
    /// Returns an error if either model fails to initialize.
    pub fn new(config: &AppConfig) -> Result<Self> {
        let sample_rate = config.sample_rate;
        let provider = config.effective_stt_provider();

        info!("Initializing speech recognizer with {} provider", provider);

        let vad_config = SileroVadConfig {
            model: config.vad_model_path().to_string_lossy().to_string(),
            threshold: config.vad_threshold,
            sample_rate,
            min_silence_duration: config.vad_silence_duration,
            min_speech_duration: MIN_SPEECH_DURATION,
            max_speech_duration: MAX_SPEECH_DURATION,
            window_size: VAD_WINDOW_SIZE,
            provider: Some(provider.as_sherpa_provider().to_string()),
            num_threads: Some(config.vad_threads.try_into().unwrap_or(1)),
            debug: config.verbose,
        };

        let vad = SileroVad::new(vad_config, VAD_BUFFER_SIZE_SECONDS).map_err(|e| anyhow::anyhow!("Failed to initialize Silero VAD: {}", e))?;

        let language = config.whisper_language();
        info!("Whisper language: {}", if language.is_empty() { "auto" } else { language.as_str() });

        let whisper_config = WhisperConfig {
            encoder: config.whisper_encoder_path().to_string_lossy().to_string(),
            decoder: config.whisper_decoder_path().to_string_lossy().to_string(),
            tokens: config.whisper_tokens_path().to_string_lossy().to_string(),
            language,
            provider: Some(provider.as_sherpa_provider().to_string()),
            num_threads: Some(config.stt_threads.try_into().unwrap_or(2)),
            debug: config.verbose,
            ..Default::default()
        };

        let whisper = WhisperRecognizer::new(whisper_config).map_err(|e| anyhow::anyhow!("Failed to initialize Whisper: {}", e))?;

        info!("Speech recognizer ready");

        Ok(Self { vad: Mutex::new(VadState { vad, was_speaking: false, speech_start: None }), whisper: Mutex::new(whisper), sample_rate })
    }

    /// Discard VAD state left over from a previous engine instance.
    pub fn reset(&self) {
        let mut state = self.vad.lock();
        while !state.vad.is_empty() {
            state.vad.pop();
        }
        state.was_speaking = false;
        state.speech_start = None;
    }

    /// Feed captured samples to the VAD.
    pub fn accept_waveform(&self, samples: &[f32]) -> VadOutput {
        let mut state = self.vad.lock();
        state.vad.accept_waveform(samples.to_vec());

        let mut output = VadOutput::default();
        let is_speech = state.vad.is_speech();
        if is_speech && !state.was_speaking {
            state.speech_start = Some(Instant::now());
            output.speech_started = true;
            info!("🎤 Speech started");
        } else if !is_speech
            && state.was_speaking
            && let Some(start) = state.speech_start.take()
        {
            info!("🎤 Speech ended ({:.1}s)", start.elapsed().as_secs_f32());
        }
        state.was_speaking = is_speech;

        if !state.vad.is_empty() {
            let segment = state.vad.front();
            state.vad.pop();
            if !segment.samples.is_empty() {
                debug!("Segment completed: {} samples", segment.samples.len());
                output.segment = Some(segment.samples);
            }
        }

        output
    }

    /// Transcribe a speech segment. Returns `None` for silence or empty text.
    pub fn transcribe(&self, samples: &[f32]) -> Option<String> {
        if samples.is_empty() {
            return None;
        }

        debug!("Transcribing {} samples", samples.len());
        let result = self.whisper.lock().transcribe(self.sample_rate, samples);

        let text = result.text.trim().to_string();
        if text.is_empty() {
            debug!("Empty transcription result");
            return None;
        }
        Some(text)
    }
}

/// Require `wake_word` in `text` and strip it.
///
/// Returns `None` when the wake word is absent, and a greeting when nothing
/// but the wake word was said.
pub fn strip_wake_word(text: &str, wake_word: &str) -> Option<String> {
    let lowered = text.to_lowercase();
    let wake_word = wake_word.to_lowercase();
    if !lowered.contains(&wake_word) {
        return None;
    }

    let cleaned = lowered
        .replacen(&wake_word, "", 1)
        .trim_start_matches(|c: char| c.is_whitespace() || c.is_ascii_punctuation())
        .trim()
        .to_string();

    if cleaned.is_empty() { Some(WAKE_WORD_GREETING.to_string()) } else { Some(cleaned) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wake_word_required() {
        assert_eq!(strip_wake_word("What's the weather", "jarvis"), None);
    }

    #[test]
    fn test_wake_word_stripped() {
        assert_eq!(strip_wake_word("Jarvis, book a flight", "jarvis").as_deref(), Some("book a flight"));
    }

    #[test]
    fn test_wake_word_alone_greets() {
        assert_eq!(strip_wake_word("Jarvis.", "Jarvis").as_deref(), Some(WAKE_WORD_GREETING));
    }
}
