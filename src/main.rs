//! Voice Session - a console voice assistant with resilient speech recognition.
//!
//! Voice input runs on-device (Silero VAD + Whisper) behind a session
//! controller that retries transient failures; replies come from a simulated
//! assistant and are spoken with Kokoro TTS.

mod assistant;
mod audio;
mod config;
mod session;
mod stt;
mod tts;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::LocalTime;

use assistant::history::PROCESSING_ERROR;
use assistant::{History, ReplyGenerator, SUGGESTIONS};
use audio::{AudioSink, Player};
use config::{AppConfig, InterruptMode, voices};
use session::{SessionEvent, SessionState, VoiceSessionController};
use stt::SherpaPlatform;
use tts::{Speaker, SpeakerSettings, SpeechEvent, Synthesize, Synthesizer};

/// Final transcripts must be longer than this to become requests.
const MIN_VOICE_REQUEST_CHARS: usize = 5;

/// How long shutdown waits for the recognizer to wind down.
const STOP_TIMEOUT: Duration = Duration::from_millis(500);

const HELP: &str = "Commands: /listen /stop /status /history /suggest /voices /mute /pause /resume /help /quit (anything else is sent as a request)";

/// A line typed at the console.
#[derive(Debug, PartialEq, Eq)]
enum Command {
    Request(String),
    Listen,
    Stop,
    Status,
    History,
    Suggest,
    Voices,
    Mute,
    Pause,
    Resume,
    Help,
    Quit,
    Unknown(String),
}

impl Command {
    /// Parse a console line. Blank lines yield `None`.
    fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }

        let Some(name) = line.strip_prefix('/') else {
            return Some(Command::Request(line.to_string()));
        };

        Some(match name.to_ascii_lowercase().as_str() {
            "listen" => Command::Listen,
            "stop" => Command::Stop,
            "status" => Command::Status,
            "history" => Command::History,
            "suggest" => Command::Suggest,
            "voices" => Command::Voices,
            "mute" => Command::Mute,
            "pause" => Command::Pause,
            "resume" => Command::Resume,
            "help" => Command::Help,
            "quit" | "exit" => Command::Quit,
            _ => Command::Unknown(line.to_string()),
        })
    }
}

/// Outcome of a reply task: request id and the reply.
type ReplyOutcome = (String, Result<String>);

struct App {
    config: AppConfig,
    controller: VoiceSessionController<SherpaPlatform>,
    speaker: Option<Speaker>,
    history: History,
    generator: ReplyGenerator,
    reply_tx: mpsc::UnboundedSender<ReplyOutcome>,
    resume_after_speech: bool,  // Voice input was stopped for playback
    resume_at: Option<Instant>, // When to restart voice input after playback
}

impl App {
    /// Apply a console command. Returns `false` to quit.
    fn handle_command(&mut self, command: Command) -> bool {
        match command {
            Command::Request(text) => self.submit(&text),
            Command::Listen => {
                self.resume_after_speech = false;
                self.resume_at = None;
                self.controller.start_listening();
            }
            Command::Stop => {
                self.resume_after_speech = false;
                self.resume_at = None;
                self.controller.stop_listening();
            }
            Command::Status => self.print_status(),
            Command::History => self.print_history(),
            Command::Suggest => {
                println!("Try one of these:");
                for (i, suggestion) in SUGGESTIONS.iter().enumerate() {
                    println!("  {}. {}", i + 1, suggestion);
                }
            }
            Command::Voices => self.print_voices(),
            Command::Mute => match self.speaker {
                Some(ref speaker) => speaker.stop(),
                None => println!("Speech output is disabled"),
            },
            Command::Pause => {
                if !self.speaker.as_ref().is_some_and(|s| s.pause()) {
                    println!("Nothing is being spoken");
                }
            }
            Command::Resume => {
                if !self.speaker.as_ref().is_some_and(|s| s.resume()) {
                    println!("Speech is not paused");
                }
            }
            Command::Help => println!("{}", HELP),
            Command::Quit => return false,
            Command::Unknown(line) => println!("Unknown command {}. {}", line, HELP),
        }
        true
    }

    fn submit(&mut self, text: &str) {
        let Some(request) = self.history.submit(text) else {
            if self.history.is_processing() {
                println!("⏳ Still working on your previous request");
            }
            return;
        };

        println!("👤 {}", request.text);
        if let Some(placeholder) = self.history.responses_for(&request.id).last() {
            println!("🤖 {}", placeholder.text);
        }

        let generator = self.generator.clone();
        let reply_tx = self.reply_tx.clone();
        tokio::spawn(async move {
            let reply = generator.reply(&request.text).await;
            let _ = reply_tx.send((request.id, reply));
        });
    }

    fn on_reply(&mut self, request_id: String, reply: Result<String>) {
        match reply {
            Ok(reply) => {
                if !self.history.complete(&request_id, &reply) {
                    return;
                }
                println!("🤖 {}", reply);
                if let Some(ref mut speaker) = self.speaker {
                    speaker.speak(&reply);
                }
            }
            Err(e) => {
                warn!("Request {} failed: {:#}", request_id, e);
                if self.history.fail(&request_id) {
                    println!("⚠️  {}", PROCESSING_ERROR);
                }
            }
        }
    }

    fn on_session_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Transcript(text) => {
                println!("🎤 {}", text);
                // Barge-in: the user talking over the reply cuts it short
                if self.config.interrupt_mode == InterruptMode::Always
                    && let Some(ref speaker) = self.speaker
                    && speaker.is_speaking()
                {
                    info!("⏸️  Reply interrupted by speech");
                    speaker.stop();
                }
            }
            SessionEvent::Final(text) => {
                if text.trim().chars().count() > MIN_VOICE_REQUEST_CHARS {
                    self.submit(&text);
                } else {
                    debug!("Ignoring short utterance: {}", text);
                }
            }
            SessionEvent::Error(e) => {
                println!("⚠️  Voice input stopped: {}", e);
                self.resume_after_speech = false;
                self.resume_at = None;
            }
        }
    }

    fn on_speech_event(&mut self, event: SpeechEvent) {
        match event {
            SpeechEvent::Started { id } => {
                debug!("Speaking utterance {}", id);
                self.resume_at = None;
                if self.config.interrupt_mode == InterruptMode::Wait && self.controller.is_listening() {
                    debug!("Pausing voice input for playback");
                    self.controller.stop_listening();
                    self.resume_after_speech = true;
                }
            }
            SpeechEvent::Ended { id } => {
                debug!("Utterance {} ended", id);
                let still_speaking = self.speaker.as_ref().is_some_and(|s| s.is_speaking());
                if self.resume_after_speech && !still_speaking {
                    self.resume_at = Some(Instant::now() + self.config.post_playback_delay());
                }
            }
            SpeechEvent::Error(message) => println!("⚠️  Could not speak the reply: {}", message),
        }
    }

    fn resume_listening(&mut self) {
        self.resume_at = None;
        if std::mem::take(&mut self.resume_after_speech) {
            debug!("Resuming voice input after playback");
            self.controller.start_listening();
        }
    }

    fn print_status(&self) {
        let controller = &self.controller;
        println!("Voice input: {} (language {})", controller.state(), controller.config().language);
        println!("Retries: {}/{}", controller.retry_count(), controller.config().max_retries);
        if !controller.transcript().is_empty() {
            println!("Last transcript: {}", controller.transcript());
        }
        if let Some(e) = controller.last_error() {
            println!("Last error: {}", e);
        }
        match self.speaker {
            Some(ref speaker) => println!("Speech: {}{}", speaker.voice().name, if speaker.is_paused() { " (paused)" } else { "" }),
            None => println!("Speech: disabled"),
        }
    }

    fn print_history(&self) {
        if let Some(welcome) = self.history.welcome() {
            println!("🤖 {}", welcome.text);
        }
        for request in self.history.requests() {
            println!("👤 [{}] {} ({:?})", request.timestamp, request.text, request.status);
            for response in self.history.responses_for(&request.id) {
                println!("🤖 {}", response.text);
            }
        }
    }

    fn print_voices(&self) {
        let current = self.speaker.as_ref().map_or(self.config.voice(), |s| s.voice());
        let catalogue = self.speaker.as_ref().map_or(voices::all(), |s| s.voices());
        for voice in catalogue {
            let marker = if voice.name == current.name { "*" } else { " " };
            println!("{} {:>3} {:<15} {}", marker, voice.speaker_id, voice.name, voice.language.label());
        }
    }

    /// Stop voice input and give the recognizer a moment to finish.
    async fn stop_voice_input(&mut self) {
        self.controller.stop_listening();
        let deadline = Instant::now() + STOP_TIMEOUT;
        while self.controller.state() != SessionState::Idle {
            match tokio::time::timeout_at(deadline, self.controller.process_next()).await {
                Ok(true) => {}
                Ok(false) | Err(_) => break,
            }
        }
        self.controller.shutdown();
    }
}

/// Build the reply speaker, or `None` when replies should only be printed.
fn build_speaker(config: &AppConfig) -> Option<(Speaker, mpsc::UnboundedReceiver<SpeechEvent>)> {
    if config.no_speech {
        info!("Speech output disabled");
        return None;
    }

    let missing = config.missing_tts_models();
    if !missing.is_empty() {
        for path in &missing {
            warn!("TTS model not found: {}", path.display());
        }
        warn!("Replies will be printed only");
        return None;
    }

    let speaker = Synthesizer::new(config).and_then(|synthesizer| {
        let player: Arc<dyn AudioSink> = Arc::new(Player::new(synthesizer.sample_rate())?);
        Speaker::new(synthesizer, player, SpeakerSettings { voice: config.voice() })
    });

    match speaker {
        Ok(speaker) => Some(speaker),
        Err(e) => {
            error!("❌ Speech output unavailable: {:#}", e);
            None
        }
    }
}

async fn recv_optional<T>(rx: &mut Option<mpsc::UnboundedReceiver<T>>) -> Option<T> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until_optional(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to register SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = signal::ctrl_c() => info!("🛑 Received Ctrl+C, shutting down..."),
        _ = terminate => info!("🛑 Received SIGTERM, shutting down..."),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::from_args();

    // Respect RUST_LOG, fall back to the verbose flag
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(if config.verbose { "debug" } else { "info" }));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_timer(LocalTime::new(time::macros::format_description!("[hour]:[minute]:[second]")))
        .init();

    info!("🎤 Voice Session v{}", env!("CARGO_PKG_VERSION"));

    if let Err(e) = config.validate() {
        error!("❌ Configuration error: {}", e);
        std::process::exit(1);
    }
    config.log_config();

    let platform = SherpaPlatform::new(&config);
    let (controller, mut session_events) = VoiceSessionController::new(platform, config.session_config());
    let (speaker, mut speech_events) = match build_speaker(&config) {
        Some((speaker, events)) => (Some(speaker), Some(events)),
        None => (None, None),
    };
    let (reply_tx, mut reply_rx) = mpsc::unbounded_channel();

    let mut app = App {
        generator: ReplyGenerator::new(config.reply_delay()),
        history: History::new(config.max_history),
        config,
        controller,
        speaker,
        reply_tx,
        resume_after_speech: false,
        resume_at: None,
    };

    if let Some(welcome) = app.history.welcome() {
        println!("🤖 {}", welcome.text);
    }
    println!("{}", HELP);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    if let Some(command) = Command::parse(&line)
                        && !app.handle_command(command)
                    {
                        break;
                    }
                }
                Ok(None) => {
                    info!("Input closed, shutting down...");
                    break;
                }
                Err(e) => {
                    error!("Failed to read input: {}", e);
                    break;
                }
            },
            Some(signal) = app.controller.next_signal() => app.controller.handle_signal(signal),
            Some(event) = session_events.recv() => app.on_session_event(event),
            Some((request_id, reply)) = reply_rx.recv() => app.on_reply(request_id, reply),
            Some(event) = recv_optional(&mut speech_events) => app.on_speech_event(event),
            _ = sleep_until_optional(app.resume_at) => app.resume_listening(),
        }
    }

    app.stop_voice_input().await;
    if let Some(ref speaker) = app.speaker {
        speaker.stop();
    }

    if let Some(ref path) = app.config.history_file
        && let Err(e) = app.history.export(path)
    {
        error!("❌ {:#}", e);
    }

    info!("✅ Voice session stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_is_a_request() {
        assert_eq!(Command::parse("  book a flight "), Some(Command::Request("book a flight".to_string())));
        assert_eq!(Command::parse("   "), None);
    }

    #[test]
    fn test_slash_commands() {
        assert_eq!(Command::parse("/listen"), Some(Command::Listen));
        assert_eq!(Command::parse("/STOP"), Some(Command::Stop));
        assert_eq!(Command::parse("/exit"), Some(Command::Quit));
        assert_eq!(Command::parse("/dance"), Some(Command::Unknown("/dance".to_string())));
    }
}
