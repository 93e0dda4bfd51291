//! Spoken replies.
//!
//! A [`Speaker`] owns a worker thread that synthesizes and plays one
//! utterance at a time, sentence by sentence. Starting a new utterance or
//! stopping cancels the current one at the next sentence boundary and cuts
//! its audio short.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{Context, Result};
use parking_lot::{Condvar, Mutex};
use tokio::sync::mpsc as tokio_mpsc;
use tracing::{debug, error, info, warn};

use super::synthesizer::{Synthesize, split_sentences};
use crate::audio::AudioSink;
use crate::config::voices::{self, Voice};

/// Upper bound on one wait for `resume` before re-checking for cancellation.
const PAUSE_POLL: Duration = Duration::from_millis(50);

/// No utterance is current.
const IDLE: u64 = 0;

/// Progress of utterances.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpeechEvent {
    Started { id: u64 },
    Ended { id: u64 },
    Error(String),
}

/// Settings for [`Speaker`].
#[derive(Debug, Clone, Copy)]
pub struct SpeakerSettings {
    pub voice: &'static Voice,
}

enum Command {
    Speak { id: u64, text: String },
    Shutdown,
}

struct Shared {
    current: AtomicU64, // Utterance allowed to play
    speaking: AtomicBool,
    paused: Mutex<bool>,
    resumed: Condvar,
}

impl Shared {
    fn is_current(&self, id: u64) -> bool {
        self.current.load(Ordering::SeqCst) == id
    }

    fn clear_pause(&self) {
        *self.paused.lock() = false;
        self.resumed.notify_all();
    }
}

/// Speaks text through a synthesizer and an audio sink.
pub struct Speaker {
    commands: Sender<Command>,
    shared: Arc<Shared>,
    sink: Arc<dyn AudioSink>,
    settings: SpeakerSettings,
    next_id: u64,
    worker: Option<JoinHandle<()>>,
}

impl Speaker {
    /// Spawn the speech worker.
    ///
    /// # Errors
    /// Returns an error if the worker thread cannot be spawned.
    pub fn new<S: Synthesize>(synth: S, sink: Arc<dyn AudioSink>, settings: SpeakerSettings) -> Result<(Self, tokio_mpsc::UnboundedReceiver<SpeechEvent>)> {
        let (commands, command_rx) = mpsc::channel();
        let (events, event_rx) = tokio_mpsc::unbounded_channel();
        let shared = Arc::new(Shared { current: AtomicU64::new(IDLE), speaking: AtomicBool::new(false), paused: Mutex::new(false), resumed: Condvar::new() });

        let worker = {
            let shared = shared.clone();
            let sink = sink.clone();
            std::thread::Builder::new()
                .name("speaker".to_string())
                .spawn(move || speech_loop(synth, sink.as_ref(), &shared, command_rx, &events))
                .context("Failed to spawn speech thread")?
        };

        info!("Speaker ready with voice {}", settings.voice.name);
        Ok((Self { commands, shared, sink, settings, next_id: IDLE, worker: Some(worker) }, event_rx))
    }

    /// Speak `text`, cancelling whatever is being spoken. Returns the utterance id.
    pub fn speak(&mut self, text: &str) -> u64 {
        self.next_id += 1;
        let id = self.next_id;

        self.shared.current.store(id, Ordering::SeqCst);
        self.shared.speaking.store(true, Ordering::SeqCst);
        self.shared.clear_pause();
        self.sink.interrupt();

        if self.commands.send(Command::Speak { id, text: text.to_string() }).is_err() {
            warn!("Speech worker is gone, dropping utterance {}", id);
            self.shared.speaking.store(false, Ordering::SeqCst);
        }
        id
    }

    /// Cancel the current utterance.
    pub fn stop(&self) {
        self.shared.current.store(IDLE, Ordering::SeqCst);
        self.shared.speaking.store(false, Ordering::SeqCst);
        self.shared.clear_pause();
        self.sink.interrupt();
    }

    /// Hold speech at the next sentence boundary. Returns `false` if there is nothing to pause.
    pub fn pause(&self) -> bool {
        if !self.is_speaking() {
            return false;
        }
        let mut paused = self.shared.paused.lock();
        if *paused {
            return false;
        }
        *paused = true;
        debug!("Speech paused");
        true
    }

    /// Continue paused speech. Returns `false` if speech was not paused.
    pub fn resume(&self) -> bool {
        let mut paused = self.shared.paused.lock();
        if !*paused {
            return false;
        }
        *paused = false;
        self.shared.resumed.notify_all();
        debug!("Speech resumed");
        true
    }

    pub fn is_speaking(&self) -> bool {
        self.shared.speaking.load(Ordering::SeqCst)
    }

    pub fn is_paused(&self) -> bool {
        *self.shared.paused.lock()
    }

    /// The voice catalogue.
    pub fn voices(&self) -> &'static [Voice] {
        voices::all()
    }

    /// The voice replies are spoken with.
    pub fn voice(&self) -> &'static Voice {
        self.settings.voice
    }
}

impl Drop for Speaker {
    fn drop(&mut self) {
        self.stop();
        let _ = self.commands.send(Command::Shutdown);
        if let Some(worker) = self.worker.take()
            && worker.join().is_err()
        {
            warn!("Speech thread panicked");
        }
    }
}

/// How an utterance finished.
enum Outcome {
    Completed,
    Cancelled,
    Failed(String),
}

fn speech_loop<S: Synthesize>(mut synth: S, sink: &dyn AudioSink, shared: &Shared, commands: Receiver<Command>, events: &tokio_mpsc::UnboundedSender<SpeechEvent>) {
    while let Ok(command) = commands.recv() {
        let (id, text) = match command {
            Command::Speak { id, text } => (id, text),
            Command::Shutdown => break,
        };

        if !shared.is_current(id) {
            debug!("Skipping superseded utterance {}", id);
            continue;
        }

        let _ = events.send(SpeechEvent::Started { id });
        match speak_utterance(&mut synth, sink, shared, id, &text) {
            Outcome::Completed => debug!("Utterance {} completed", id),
            Outcome::Cancelled => debug!("Utterance {} cancelled", id),
            Outcome::Failed(message) => {
                error!("❌ Speech failed: {}", message);
                let _ = events.send(SpeechEvent::Error(message));
            }
        }

        // A newer utterance keeps the speaking flag for itself
        if shared.current.compare_exchange(id, IDLE, Ordering::SeqCst, Ordering::SeqCst).is_ok() {
            shared.speaking.store(false, Ordering::SeqCst);
        }
        let _ = events.send(SpeechEvent::Ended { id });
    }
    debug!("Speech thread exiting");
}

fn speak_utterance<S: Synthesize>(synth: &mut S, sink: &dyn AudioSink, shared: &Shared, id: u64, text: &str) -> Outcome {
    let sentences = split_sentences(text);
    let total = sentences.len();

    for (i, sentence) in sentences.iter().enumerate() {
        wait_while_paused(shared, id);
        if !shared.is_current(id) {
            return Outcome::Cancelled;
        }

        let samples = match synth.synthesize(sentence) {
            Ok(samples) => samples,
            Err(e) => return Outcome::Failed(format!("{:#}", e)),
        };
        if samples.is_empty() {
            continue;
        }

        if !shared.is_current(id) {
            return Outcome::Cancelled;
        }

        debug!("🔊 Playing sentence {}/{} ({} samples)", i + 1, total, samples.len());
        if !sink.play(&samples) {
            return if shared.is_current(id) { Outcome::Failed("Audio playback did not complete".to_string()) } else { Outcome::Cancelled };
        }
    }

    Outcome::Completed
}

fn wait_while_paused(shared: &Shared, id: u64) {
    let mut paused = shared.paused.lock();
    while *paused && shared.is_current(id) {
        shared.resumed.wait_for(&mut paused, PAUSE_POLL);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    const WAIT: Duration = Duration::from_secs(2);

    #[derive(Clone, Default)]
    struct FakeSynth {
        spoken: Arc<Mutex<Vec<String>>>,
    }

    impl Synthesize for FakeSynth {
        fn sample_rate(&self) -> u32 {
            24000
        }

        fn synthesize(&mut self, sentence: &str) -> Result<Vec<f32>> {
            if sentence.contains("fail") {
                anyhow::bail!("voice model crashed");
            }
            self.spoken.lock().push(sentence.to_string());
            Ok(vec![0.0; 8])
        }
    }

    /// Plays instantly unless `hold` is set, in which case playback blocks
    /// until released or interrupted.
    #[derive(Default)]
    struct FakeSink {
        hold: AtomicBool,
        interrupted: AtomicBool,
        plays: AtomicUsize,
    }

    impl AudioSink for FakeSink {
        fn play(&self, _samples: &[f32]) -> bool {
            self.interrupted.store(false, Ordering::SeqCst);
            self.plays.fetch_add(1, Ordering::SeqCst);
            let deadline = Instant::now() + WAIT;
            while Instant::now() < deadline {
                if self.interrupted.swap(false, Ordering::SeqCst) {
                    return false;
                }
                if !self.hold.load(Ordering::SeqCst) {
                    return true;
                }
                std::thread::sleep(Duration::from_millis(1));
            }
            false
        }

        fn interrupt(&self) {
            self.interrupted.store(true, Ordering::SeqCst);
        }
    }

    fn speaker(hold: bool) -> (Speaker, tokio_mpsc::UnboundedReceiver<SpeechEvent>, FakeSynth, Arc<FakeSink>) {
        let synth = FakeSynth::default();
        let sink = Arc::new(FakeSink::default());
        sink.hold.store(hold, Ordering::SeqCst);
        let settings = SpeakerSettings { voice: voices::find(voices::DEFAULT_VOICE).unwrap() };
        let (speaker, events) = Speaker::new(synth.clone(), sink.clone(), settings).unwrap();
        (speaker, events, synth, sink)
    }

    fn wait_until(condition: impl Fn() -> bool) {
        let deadline = Instant::now() + WAIT;
        while !condition() {
            assert!(Instant::now() < deadline, "condition not reached in time");
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    fn next_event(events: &mut tokio_mpsc::UnboundedReceiver<SpeechEvent>) -> SpeechEvent {
        let deadline = Instant::now() + WAIT;
        loop {
            if let Ok(event) = events.try_recv() {
                return event;
            }
            assert!(Instant::now() < deadline, "no speech event in time");
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_speaks_every_sentence_in_order() {
        let (mut speaker, mut events, synth, _sink) = speaker(false);
        let id = speaker.speak("It's sunny. Highs of 75°F!");

        assert_eq!(next_event(&mut events), SpeechEvent::Started { id });
        assert_eq!(next_event(&mut events), SpeechEvent::Ended { id });
        assert_eq!(*synth.spoken.lock(), vec!["It's sunny.", "Highs of 75°F!"]);
        wait_until(|| !speaker.is_speaking());
    }

    #[test]
    fn test_new_utterance_cancels_current_without_error() {
        let (mut speaker, mut events, synth, sink) = speaker(true);
        let first = speaker.speak("One. Two.");
        assert_eq!(next_event(&mut events), SpeechEvent::Started { id: first });
        wait_until(|| sink.plays.load(Ordering::SeqCst) == 1);

        let second = speaker.speak("Three.");
        assert_eq!(next_event(&mut events), SpeechEvent::Ended { id: first });

        sink.hold.store(false, Ordering::SeqCst);
        assert_eq!(next_event(&mut events), SpeechEvent::Started { id: second });
        assert_eq!(next_event(&mut events), SpeechEvent::Ended { id: second });
        assert_eq!(*synth.spoken.lock(), vec!["One.", "Three."]);
    }

    #[test]
    fn test_stop_is_silent() {
        let (mut speaker, mut events, _synth, sink) = speaker(true);
        let id = speaker.speak("A long answer.");
        assert_eq!(next_event(&mut events), SpeechEvent::Started { id });
        wait_until(|| sink.plays.load(Ordering::SeqCst) == 1);

        speaker.stop();
        assert!(!speaker.is_speaking());
        assert_eq!(next_event(&mut events), SpeechEvent::Ended { id });
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_synthesis_failure_is_reported() {
        let (mut speaker, mut events, _synth, _sink) = speaker(false);
        let id = speaker.speak("This will fail.");

        assert_eq!(next_event(&mut events), SpeechEvent::Started { id });
        assert!(matches!(next_event(&mut events), SpeechEvent::Error(message) if message.contains("crashed")));
        assert_eq!(next_event(&mut events), SpeechEvent::Ended { id });
    }

    #[test]
    fn test_pause_holds_at_sentence_boundary() {
        let (mut speaker, mut events, synth, sink) = speaker(true);
        assert!(!speaker.pause(), "nothing to pause while idle");

        let id = speaker.speak("First. Second.");
        assert_eq!(next_event(&mut events), SpeechEvent::Started { id });
        wait_until(|| sink.plays.load(Ordering::SeqCst) == 1);

        assert!(speaker.pause());
        assert!(!speaker.pause());
        assert!(speaker.is_paused());
        sink.hold.store(false, Ordering::SeqCst);

        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(*synth.spoken.lock(), vec!["First."]);
        assert!(events.try_recv().is_err());

        assert!(speaker.resume());
        assert!(!speaker.resume());
        assert_eq!(next_event(&mut events), SpeechEvent::Ended { id });
        assert_eq!(*synth.spoken.lock(), vec!["First.", "Second."]);
    }

    #[test]
    fn test_voices_lists_catalogue() {
        let (speaker, _events, _synth, _sink) = speaker(false);
        assert_eq!(speaker.voices().len(), voices::all().len());
        assert_eq!(speaker.voice().name, voices::DEFAULT_VOICE);
    }
}
