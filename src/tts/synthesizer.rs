//! Text-to-speech synthesizer using Kokoro models.

use anyhow::Result;
use sherpa_rs::OnnxConfig;
use sherpa_rs::tts::{CommonTtsConfig, KokoroTts, KokoroTtsConfig};
use tracing::{debug, info};

use crate::config::AppConfig;

/// Kokoro always produces 24kHz audio.
const KOKORO_SAMPLE_RATE: u32 = 24000;

/// Turns one sentence of text into mono samples.
pub trait Synthesize: Send + 'static {
    /// Rate of the samples returned by [`Synthesize::synthesize`].
    fn sample_rate(&self) -> u32;

    /// Synthesize a single sentence. Blank input yields no samples.
    fn synthesize(&mut self, sentence: &str) -> Result<Vec<f32>>;
}

/// Kokoro multi-language synthesizer.
pub struct Synthesizer {
    tts: KokoroTts,
    speaker_id: i32,
    speed: f32,
}

impl Synthesizer {
    /// Load the Kokoro model for the configured voice.
    ///
    /// # Errors
    /// Returns an error if the model files are missing.
    pub fn new(config: &AppConfig) -> Result<Self> {
        let missing = config.missing_tts_models();
        if let Some(path) = missing.first() {
            anyhow::bail!("TTS model not found: {}", path.display());
        }

        let provider = config.effective_tts_provider();
        let voice = config.voice();

        info!("Initializing Kokoro TTS with {} provider", provider);
        info!("TTS voice: {} (speaker ID: {}, {})", voice.name, voice.speaker_id, voice.language.label());

        let tts_config = KokoroTtsConfig {
            model: config.tts_model_path().to_string_lossy().to_string(),
            voices: config.tts_voices_path().to_string_lossy().to_string(),
            tokens: config.tts_tokens_path().to_string_lossy().to_string(),
            data_dir: config.tts_data_dir().to_string_lossy().to_string(),
            dict_dir: config.tts_dict_dir().to_string_lossy().to_string(),
            lexicon: config.tts_lexicon(),
            lang: voice.language.kokoro_lang().to_string(),
            length_scale: 1.0 / config.tts_speed,
            onnx_config: OnnxConfig {
                provider: provider.as_sherpa_provider().to_string(),
                num_threads: config.tts_threads.try_into().unwrap_or(2),
                debug: config.verbose,
            },
            common_config: CommonTtsConfig { max_num_sentences: 1, ..Default::default() }, // Kokoro only supports 1
        };

        Ok(Self { tts: KokoroTts::new(tts_config), speaker_id: voice.speaker_id, speed: config.tts_speed })
    }
}

impl Synthesize for Synthesizer {
    fn sample_rate(&self) -> u32 {
        KOKORO_SAMPLE_RATE
    }

    fn synthesize(&mut self, sentence: &str) -> Result<Vec<f32>> {
        if sentence.trim().is_empty() {
            return Ok(Vec::new());
        }

        debug!("Synthesizing: \"{}\"", sentence);
        let audio = self.tts.create(sentence, self.speaker_id, self.speed).map_err(|e| anyhow::anyhow!("TTS generation failed: {}", e))?;
        debug!("🎵 Generated {} samples", audio.samples.len());

        Ok(audio.samples)
    }
}

/// Split text into sentences for streaming synthesis.
///
/// Sentences end at `.`, `!`, `?` or a newline; trailing text without a
/// terminator forms the last sentence.
pub fn split_sentences(text: &str) -> Vec<String> {
    text.split_inclusive(['.', '!', '?', '\n']).map(str::trim).filter(|s| !s.is_empty()).map(String::from).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_sentences_keeps_punctuation() {
        assert_eq!(split_sentences("It's sunny. High of 75°F! Want more?"), vec!["It's sunny.", "High of 75°F!", "Want more?"]);
    }

    #[test]
    fn test_split_sentences_trailing_fragment() {
        assert_eq!(split_sentences("First line\nsecond part"), vec!["First line", "second part"]);
        assert!(split_sentences("  \n ").is_empty());
    }
}
