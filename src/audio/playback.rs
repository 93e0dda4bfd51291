//! Audio playback using cpal.
//!
//! The output callback pulls from a lock-free ring buffer; [`Player::play`]
//! queues a buffer and waits until it drained or was interrupted.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Stream, StreamConfig};
use parking_lot::Mutex;
use ringbuf::HeapRb;
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use tracing::{debug, error, info, warn};

use super::AudioSink;
use super::resampler::resample;
use super::util::{device_name, find_best_config};

/// Playback ring buffer size in samples (~11 seconds at 48kHz).
const PLAYBACK_RING_SIZE: usize = 524288;

/// Time given to the output callback to flush an interrupted buffer.
const INTERRUPT_SETTLE: Duration = Duration::from_millis(20);

/// Speaker output for synthesized speech.
pub struct Player {
    _stream: Stream,
    device_rate: u32,
    input_rate: u32,
    producer: Mutex<ringbuf::HeapProd<f32>>,
    playing: Arc<AtomicBool>,
    interrupted: Arc<AtomicBool>,
}

impl Player {
    /// Open the default output device for audio produced at `sample_rate`.
    ///
    /// # Errors
    /// Returns an error if no output device is available or the stream cannot be opened.
    pub fn new(sample_rate: u32) -> Result<Self> {
        let host = cpal::default_host();
        let device = host.default_output_device().context("No output device available")?;
        info!("Using output device: {}", device_name(&device));

        let preferred_rate = match device.default_output_config() {
            Ok(default_config) => default_config.sample_rate(),
            Err(_) => 48000,
        };
        let supported = device.supported_output_configs().context("Failed to get supported output configs")?;
        let config = find_best_config(supported, preferred_rate)?;
        let device_rate = config.sample_rate();
        let channels = config.channels() as usize;
        let stream_config: StreamConfig = config.config();

        let (producer, mut consumer) = HeapRb::<f32>::new(PLAYBACK_RING_SIZE).split();
        let playing = Arc::new(AtomicBool::new(false));
        let interrupted = Arc::new(AtomicBool::new(false));
        let cb_playing = playing.clone();
        let cb_interrupted = interrupted.clone();

        let stream = device
            .build_output_stream(
                &stream_config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    if cb_interrupted.load(Ordering::Relaxed) {
                        while consumer.try_pop().is_some() {}
                        data.fill(0.0);
                        cb_playing.store(false, Ordering::SeqCst);
                        return;
                    }

                    for frame in data.chunks_mut(channels) {
                        frame.fill(consumer.try_pop().unwrap_or(0.0));
                    }

                    if consumer.is_empty() {
                        cb_playing.store(false, Ordering::SeqCst);
                    }
                },
                |err| error!("Audio playback error: {}", err),
                None,
            )
            .context("Failed to build output stream")?;

        stream.play().context("Failed to start playback stream")?;
        info!("Audio playback configured: input {} Hz -> device {} Hz", sample_rate, device_rate);

        Ok(Self { _stream: stream, device_rate, input_rate: sample_rate, producer: Mutex::new(producer), playing, interrupted })
    }
}

impl AudioSink for Player {
    fn play(&self, samples: &[f32]) -> bool {
        if samples.is_empty() {
            return true;
        }

        // Let the callback finish flushing a previous interruption first
        if self.interrupted.load(Ordering::SeqCst) {
            std::thread::sleep(INTERRUPT_SETTLE);
            self.interrupted.store(false, Ordering::SeqCst);
        }

        let queued = match resample(samples, self.input_rate, self.device_rate) {
            Ok(resampled) => resampled,
            Err(e) => {
                error!("Resampling failed: {}, playing without resampling", e);
                samples.to_vec()
            }
        };

        {
            let mut producer = self.producer.lock();
            let written = producer.push_slice(&queued);
            if written < queued.len() {
                warn!("Playback buffer overflow, dropped {} samples", queued.len() - written);
            }
        }
        self.playing.store(true, Ordering::SeqCst);

        let duration = Duration::from_secs_f64(queued.len() as f64 / self.device_rate as f64);
        let deadline = Instant::now() + duration + Duration::from_secs(1);
        debug!("Playing {} samples ({:?})", queued.len(), duration);

        while self.playing.load(Ordering::SeqCst) {
            if self.interrupted.load(Ordering::SeqCst) {
                debug!("Playback interrupted");
                return false;
            }
            if Instant::now() > deadline {
                warn!("Playback timeout exceeded");
                self.interrupt();
                return false;
            }
            std::thread::sleep(Duration::from_millis(10));
        }

        !self.interrupted.load(Ordering::SeqCst)
    }

    fn interrupt(&self) {
        self.interrupted.store(true, Ordering::SeqCst);
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        self.interrupt();
    }
}
