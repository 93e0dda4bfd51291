//! Application configuration and CLI argument parsing.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::voices::{self, Voice};
use crate::session::SessionConfig;

/// Directory of the Kokoro multi-lang model inside the model directory.
const KOKORO_DIR: &str = "kokoro-multi-lang-v1_0";

/// Hardware acceleration provider for ONNX models.
/// Auto-detected based on platform if not specified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// CPU inference (default fallback, always available)
    #[default]
    Cpu,
    /// NVIDIA CUDA acceleration (Linux only, requires CUDA toolkit)
    Cuda,
    /// Apple CoreML acceleration (macOS only, uses Neural Engine)
    #[value(name = "coreml")]
    CoreMl,
}

impl Provider {
    /// Provider string understood by sherpa-rs.
    pub fn as_sherpa_provider(&self) -> &'static str {
        match self {
            Provider::Cpu => "cpu",
            Provider::Cuda => "cuda",
            Provider::CoreMl => "coreml",
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_sherpa_provider())
    }
}

/// What happens to voice input while a reply is being spoken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum InterruptMode {
    /// Keep listening while speaking (best for headsets)
    Always,
    /// Stop listening while speaking and resume afterwards (open speakers)
    #[default]
    Wait,
}

/// Voice session console configuration.
#[derive(Parser, Debug, Clone, Serialize, Deserialize)]
#[command(name = "voice-session")]
#[command(author, version, about = "A console voice assistant with resilient speech recognition", long_about = None)]
pub struct AppConfig {
    /// List all available TTS voices and exit
    #[arg(long)]
    pub list_voices: bool,

    /// Show details about a voice (name or index) and exit
    #[arg(long)]
    pub voice_info: Option<String>,

    /// Directory containing model files (Whisper, VAD, TTS)
    #[arg(long, short = 'd', env = "MODEL_DIR", default_value_os_t = default_model_dir())]
    pub model_dir: PathBuf,

    /// Recognition locale (e.g. en-US, es-ES). Use "auto" for language detection
    #[arg(long, short = 'l', env = "VOICE_LANGUAGE", default_value = "en-US")]
    pub language: String,

    /// Consecutive network-error restarts before voice input gives up
    #[arg(long, default_value = "3")]
    pub max_retries: u32,

    /// Delay before restarting recognition after a network error (ms)
    #[arg(long, default_value = "1000")]
    pub retry_backoff_ms: u64,

    /// Delay before restarting recognition after it ended on its own (ms)
    #[arg(long, default_value = "300")]
    pub restart_delay_ms: u64,

    /// Seconds without speech before the recognizer ends its listening window
    #[arg(long, default_value = "8")]
    pub silence_timeout_secs: u64,

    /// Audio sample rate for speech recognition
    #[arg(long, default_value = "16000")]
    pub sample_rate: u32,

    /// Voice activity detection threshold (0.0 - 1.0)
    #[arg(long, default_value = "0.5")]
    pub vad_threshold: f32,

    /// VAD silence duration in seconds (how long to wait before considering speech ended)
    #[arg(long, default_value = "0.8")]
    pub vad_silence_duration: f32,

    /// Wake word required at the start of voice requests (optional)
    #[arg(long, short = 'w')]
    pub wake_word: Option<String>,

    /// Simulated assistant thinking time (ms)
    #[arg(long, default_value = "1500")]
    pub reply_delay_ms: u64,

    /// Maximum number of request/response exchanges kept in history
    #[arg(long, default_value = "10")]
    pub max_history: usize,

    /// Write the conversation history as JSON to this file on exit
    #[arg(long)]
    pub history_file: Option<PathBuf>,

    /// Print replies without speaking them
    #[arg(long)]
    pub no_speech: bool,

    /// TTS voice, by name (e.g. af_bella, bf_emma) or catalogue index
    #[arg(long, default_value = voices::DEFAULT_VOICE)]
    pub tts_voice: String,

    /// Text-to-speech speed multiplier (0.9-0.95 for more natural, expressive speech)
    #[arg(long, default_value = "0.93")]
    pub tts_speed: f32,

    /// Interrupt mode: 'always' keeps listening while speaking, 'wait' pauses voice input during playback
    #[arg(long, value_enum, default_value = "wait")]
    pub interrupt_mode: InterruptMode,

    /// Delay before resuming voice input after playback ends (ms, 'wait' mode only)
    #[arg(long, default_value = "300")]
    pub post_playback_delay_ms: u64,

    /// Hardware acceleration provider (auto-detected if not specified)
    #[arg(long, value_enum)]
    pub provider: Option<Provider>,

    /// Provider for STT (overrides --provider for speech recognition)
    #[arg(long, value_enum)]
    pub stt_provider: Option<Provider>,

    /// Provider for TTS (overrides --provider for speech synthesis)
    #[arg(long, value_enum)]
    pub tts_provider: Option<Provider>,

    /// Number of threads for all models (0 = auto-detect based on CPU cores)
    #[arg(long, default_value = "0")]
    pub num_threads: usize,

    /// VAD threads (0 = auto, typically 1)
    #[arg(long, default_value = "0")]
    pub vad_threads: usize,

    /// STT threads (0 = use num_threads)
    #[arg(long, default_value = "0")]
    pub stt_threads: usize,

    /// TTS threads (0 = use num_threads)
    #[arg(long, default_value = "0")]
    pub tts_threads: usize,

    /// Enable verbose logging
    #[arg(long, short = 'v')]
    pub verbose: bool,
}

impl AppConfig {
    /// Parse configuration from command line arguments.
    ///
    /// Informational flags (`--list-voices`, `--voice-info`) print and exit.
    pub fn from_args() -> Self {
        let mut config = Self::parse();

        if config.list_voices {
            voices::print_catalogue();
            std::process::exit(0);
        }

        if let Some(ref selector) = config.voice_info {
            match voices::print_voice(selector) {
                Ok(()) => std::process::exit(0),
                Err(e) => {
                    eprintln!("Error: {}", e);
                    std::process::exit(1);
                }
            }
        }

        config.normalize_thread_counts();
        config
    }

    /// Fill in thread counts left at 0.
    ///
    /// With CUDA a single thread per model is used since the GPU handles the
    /// parallelism; on CPU STT and TTS share cores/3 and VAD gets one thread.
    fn normalize_thread_counts(&mut self) {
        let cpu_cores = num_cpus::get();
        let stt_cuda = self.effective_stt_provider() == Provider::Cuda;
        let tts_cuda = self.effective_tts_provider() == Provider::Cuda;

        if self.num_threads == 0 {
            self.num_threads = if stt_cuda || tts_cuda { 1 } else { (cpu_cores / 3).max(1) };
        }
        if self.vad_threads == 0 {
            self.vad_threads = 1;
        }
        if self.stt_threads == 0 {
            self.stt_threads = if stt_cuda { 1 } else { self.num_threads };
        }
        if self.tts_threads == 0 {
            self.tts_threads = if tts_cuda { 1 } else { self.num_threads };
        }

        if self.verbose {
            info!(
                "CPU cores: {}, threads: VAD={}, STT={}, TTS={}",
                cpu_cores, self.vad_threads, self.stt_threads, self.tts_threads
            );
        }
    }

    /// Session controller settings derived from the CLI.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            language: self.language.clone(),
            max_retries: self.max_retries,
            retry_backoff: Duration::from_millis(self.retry_backoff_ms),
            restart_delay: Duration::from_millis(self.restart_delay_ms),
        }
    }

    pub fn silence_timeout(&self) -> Duration {
        Duration::from_secs(self.silence_timeout_secs)
    }

    pub fn reply_delay(&self) -> Duration {
        Duration::from_millis(self.reply_delay_ms)
    }

    pub fn post_playback_delay(&self) -> Duration {
        Duration::from_millis(self.post_playback_delay_ms)
    }

    pub fn effective_stt_provider(&self) -> Provider {
        self.stt_provider.or(self.provider).unwrap_or_else(detect_provider)
    }

    pub fn effective_tts_provider(&self) -> Provider {
        self.tts_provider.or(self.provider).unwrap_or_else(detect_provider)
    }

    /// Whisper language code for a locale tag: `en-US` -> `en`, `auto` -> "" (detection).
    pub fn whisper_language(&self) -> String {
        if self.language.eq_ignore_ascii_case("auto") {
            return String::new();
        }
        self.language.split(['-', '_']).next().unwrap_or_default().to_ascii_lowercase()
    }

    pub fn whisper_encoder_path(&self) -> PathBuf {
        self.model_dir.join("whisper").join("whisper-small-encoder.int8.onnx")
    }

    pub fn whisper_decoder_path(&self) -> PathBuf {
        self.model_dir.join("whisper").join("whisper-small-decoder.int8.onnx")
    }

    pub fn whisper_tokens_path(&self) -> PathBuf {
        self.model_dir.join("whisper").join("whisper-small-tokens.txt")
    }

    pub fn vad_model_path(&self) -> PathBuf {
        self.model_dir.join("silero_vad.onnx")
    }

    fn kokoro_dir(&self) -> PathBuf {
        self.model_dir.join("tts").join(KOKORO_DIR)
    }

    pub fn tts_model_path(&self) -> PathBuf {
        self.kokoro_dir().join("model.onnx")
    }

    pub fn tts_voices_path(&self) -> PathBuf {
        self.kokoro_dir().join("voices.bin")
    }

    pub fn tts_tokens_path(&self) -> PathBuf {
        self.kokoro_dir().join("tokens.txt")
    }

    pub fn tts_data_dir(&self) -> PathBuf {
        self.kokoro_dir().join("espeak-ng-data")
    }

    pub fn tts_dict_dir(&self) -> PathBuf {
        self.kokoro_dir().join("dict")
    }

    /// The selected TTS voice, falling back to the default voice.
    pub fn voice(&self) -> &'static Voice {
        voices::resolve(&self.tts_voice)
            .or_else(|| voices::find(voices::DEFAULT_VOICE))
            .unwrap_or(&voices::all()[0])
    }

    /// Comma-separated lexicon paths for the selected voice (empty for espeak voices).
    pub fn tts_lexicon(&self) -> String {
        let dir = self.kokoro_dir();
        self.voice()
            .language
            .lexicons()
            .iter()
            .map(|file| dir.join(file).to_string_lossy().to_string())
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Model files needed for voice input that are missing.
    pub fn missing_stt_models(&self) -> Vec<PathBuf> {
        [self.whisper_encoder_path(), self.whisper_decoder_path(), self.whisper_tokens_path(), self.vad_model_path()]
            .into_iter()
            .filter(|path| !path.exists())
            .collect()
    }

    /// Model files needed for spoken replies that are missing.
    pub fn missing_tts_models(&self) -> Vec<PathBuf> {
        [self.tts_model_path(), self.tts_voices_path(), self.tts_tokens_path()].into_iter().filter(|path| !path.exists()).collect()
    }

    /// Validate numeric ranges and selectors.
    ///
    /// Missing model files are not an error: voice input reports an
    /// unsupported platform and replies fall back to text.
    pub fn validate(&self) -> Result<()> {
        if self.language.trim().is_empty() {
            anyhow::bail!("Recognition language must not be empty");
        }

        if !(0.0..=1.0).contains(&self.vad_threshold) {
            anyhow::bail!("VAD threshold must be between 0.0 and 1.0");
        }

        if self.vad_silence_duration <= 0.0 {
            anyhow::bail!("VAD silence duration must be positive");
        }

        if self.tts_speed <= 0.0 {
            anyhow::bail!("TTS speed must be positive");
        }

        if self.silence_timeout_secs == 0 {
            anyhow::bail!("Silence timeout must be at least one second");
        }

        if self.max_history == 0 {
            anyhow::bail!("History must keep at least one exchange");
        }

        if voices::resolve(&self.tts_voice).is_none() {
            anyhow::bail!("Unknown TTS voice '{}'. Run with --list-voices to see available voices", self.tts_voice);
        }

        Ok(())
    }

    /// Log the current configuration.
    pub fn log_config(&self) {
        let voice = self.voice();
        let whisper_language = self.whisper_language();
        info!("Configuration:");
        info!("  Model directory: {}", self.model_dir.display());
        info!("  Language: {} (whisper: {})", self.language, if whisper_language.is_empty() { "auto" } else { whisper_language.as_str() });
        info!("  Max retries: {}", self.max_retries);
        info!("  Retry backoff: {}ms, restart delay: {}ms", self.retry_backoff_ms, self.restart_delay_ms);
        info!("  Silence timeout: {}s", self.silence_timeout_secs);
        info!("  Sample rate: {} Hz", self.sample_rate);
        info!("  VAD threshold: {}", self.vad_threshold);
        info!("  Reply delay: {}ms", self.reply_delay_ms);
        info!("  TTS voice: {} (speaker {}, {})", voice.name, voice.speaker_id, voice.language.label());
        info!("  TTS speed: {}", self.tts_speed);
        info!("  STT provider: {}", self.effective_stt_provider());
        info!("  TTS provider: {}", self.effective_tts_provider());
        if let Some(ref wake_word) = self.wake_word {
            info!("  Wake word: {}", wake_word);
        }
        info!("  Interrupt mode: {:?}", self.interrupt_mode);
        if matches!(self.interrupt_mode, InterruptMode::Wait) {
            info!("  Post-playback delay: {}ms", self.post_playback_delay_ms);
        }
        if let Some(ref path) = self.history_file {
            info!("  History file: {}", path.display());
        }
    }
}

/// Get the default model directory (~/.voice-assistant/models).
fn default_model_dir() -> PathBuf {
    if let Some(home_dir) = dirs::home_dir() {
        home_dir.join(".voice-assistant").join("models")
    } else {
        PathBuf::from("models")
    }
}

/// Pick the best acceleration provider for this machine.
fn detect_provider() -> Provider {
    if cfg!(target_os = "macos") {
        Provider::CoreMl
    } else if cfg!(target_os = "linux") && has_nvidia_gpu() {
        Provider::Cuda
    } else {
        Provider::Cpu
    }
}

/// Check for NVIDIA device nodes, including Jetson (Tegra) boards.
fn has_nvidia_gpu() -> bool {
    ["/dev/nvidia0", "/dev/nvidiactl", "/dev/nvidia-uvm", "/dev/nvhost-ctrl", "/dev/nvhost-ctrl-gpu", "/etc/nv_tegra_release"]
        .iter()
        .any(|path| std::path::Path::new(path).exists())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> AppConfig {
        let mut argv = vec!["voice-session"];
        argv.extend_from_slice(args);
        AppConfig::try_parse_from(argv).expect("valid arguments")
    }

    #[test]
    fn test_session_defaults() {
        let config = parse(&["--model-dir", "/tmp/models"]).session_config();
        assert_eq!(config, SessionConfig::default());
    }

    #[test]
    fn test_session_overrides() {
        let config = parse(&["--language", "es-ES", "--max-retries", "5", "--retry-backoff-ms", "250"]).session_config();
        assert_eq!(config.language, "es-ES");
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.retry_backoff, Duration::from_millis(250));
    }

    #[test]
    fn test_whisper_language_from_locale() {
        assert_eq!(parse(&["--language", "en-US"]).whisper_language(), "en");
        assert_eq!(parse(&["--language", "pt_BR"]).whisper_language(), "pt");
        assert_eq!(parse(&["--language", "AUTO"]).whisper_language(), "");
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(parse(&[]).validate().is_ok());
        assert!(parse(&["--vad-threshold", "1.5"]).validate().is_err());
        assert!(parse(&["--tts-voice", "nobody"]).validate().is_err());
        assert!(parse(&["--max-history", "0"]).validate().is_err());
        assert!(parse(&["--silence-timeout-secs", "0"]).validate().is_err());
    }

    #[test]
    fn test_lexicon_follows_voice_language() {
        let config = parse(&["--model-dir", "/m", "--tts-voice", "bf_emma"]);
        assert!(config.tts_lexicon().ends_with("lexicon-gb-en.txt"));

        let config = parse(&["--model-dir", "/m", "--tts-voice", "ff_siwis"]);
        assert_eq!(config.tts_lexicon(), "");
        assert_eq!(config.voice().language.kokoro_lang(), "fr");
    }

    #[test]
    fn test_missing_models_reported() {
        let config = parse(&["--model-dir", "/nonexistent/voice-session-models"]);
        assert_eq!(config.missing_stt_models().len(), 4);
        assert_eq!(config.missing_tts_models().len(), 3);
    }
}
