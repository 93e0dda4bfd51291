//! Microphone capture using cpal.
//!
//! A [`Capture`] lives for one recognition session: it opens the default
//! input device, converts the stream to mono at the requested rate and hands
//! chunks to a callback on its own thread. The cpal callback only pushes into
//! a lock-free ring buffer so it never blocks.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Stream, StreamConfig};
use ringbuf::HeapRb;
use ringbuf::traits::{Consumer, Producer, Split};
use tracing::{debug, info, warn};

use super::resampler::StreamResampler;
use super::util::{device_name, downmix, find_best_config};

/// Ring buffer size in samples (~4 seconds at 16kHz).
const RING_CAPACITY: usize = 65536;

/// Largest chunk handed to the sample callback.
const DRAIN_CHUNK: usize = 2048;

/// Whether the host has a default input device.
pub fn has_input_device() -> bool {
    cpal::default_host().default_input_device().is_some()
}

/// An open microphone stream.
pub struct Capture {
    stream: Stream,                    // cpal stream (kept alive)
    active: Arc<AtomicBool>,           // Cleared to stop the drain thread
    drain_handle: Option<JoinHandle<()>>,
}

impl Capture {
    /// Open the default input device and start streaming.
    ///
    /// # Arguments
    /// * `sample_rate` - Rate delivered to `on_samples` (typically 16000 for STT)
    /// * `on_samples` - Receives mono chunks on the capture thread
    /// * `on_error` - Receives stream errors reported by the audio backend
    ///
    /// # Errors
    /// Returns an error if no input device is available or the stream cannot be opened.
    pub fn start<F, E>(sample_rate: u32, mut on_samples: F, on_error: E) -> Result<Self>
    where
        F: FnMut(&[f32]) + Send + 'static,
        E: Fn(String) + Send + 'static,
    {
        let host = cpal::default_host();
        let device = host.default_input_device().context("No input device available")?;
        info!("Using input device: {}", device_name(&device));

        let supported = device.supported_input_configs().context("Failed to get supported input configs")?;
        let config = find_best_config(supported, sample_rate)?;
        let device_rate = config.sample_rate();
        let channels = config.channels() as usize;
        let stream_config: StreamConfig = config.config();

        let mut resampler = if device_rate != sample_rate {
            info!("Resampling capture from {} Hz to {} Hz", device_rate, sample_rate);
            Some(StreamResampler::new(device_rate, sample_rate)?)
        } else {
            None
        };

        let (mut producer, mut consumer) = HeapRb::<f32>::new(RING_CAPACITY).split();
        let dropped = AtomicU64::new(0);

        let stream = device
            .build_input_stream(
                &stream_config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    let mono = downmix(data, channels);
                    let samples = match resampler.as_mut() {
                        Some(resampler) => match resampler.push(&mono) {
                            Ok(samples) => samples,
                            Err(e) => {
                                warn!("Capture resampling failed: {}", e);
                                return;
                            }
                        },
                        None => mono,
                    };

                    if producer.push_slice(&samples) < samples.len() {
                        let count = dropped.fetch_add(1, Ordering::Relaxed);
                        if count.is_multiple_of(100) {
                            warn!("Capture buffer full, dropped {} chunks", count + 1);
                        }
                    }
                },
                move |err| on_error(err.to_string()),
                None,
            )
            .context("Failed to build input stream")?;

        stream.play().context("Failed to start audio stream")?;

        let active = Arc::new(AtomicBool::new(true));
        let drain_active = active.clone();
        let drain_handle = std::thread::Builder::new()
            .name("capture-drain".to_string())
            .spawn(move || {
                let mut buffer = vec![0.0f32; DRAIN_CHUNK];
                while drain_active.load(Ordering::Relaxed) {
                    let read = consumer.pop_slice(&mut buffer);
                    if read == 0 {
                        std::thread::sleep(Duration::from_millis(2));
                        continue;
                    }
                    on_samples(&buffer[..read]);
                }
                debug!("Capture drain thread exiting");
            })
            .context("Failed to spawn capture thread")?;

        info!("Audio capture started: device {} Hz -> {} Hz", device_rate, sample_rate);

        Ok(Self { stream, active, drain_handle: Some(drain_handle) })
    }

    /// Close the stream and wait for the drain thread. Idempotent.
    pub fn stop(&mut self) {
        if !self.active.swap(false, Ordering::SeqCst) {
            return;
        }

        if let Err(e) = self.stream.pause() {
            debug!("Failed to pause input stream: {}", e);
        }

        if let Some(handle) = self.drain_handle.take()
            && handle.join().is_err()
        {
            warn!("Capture drain thread panicked");
        }

        info!("Audio capture stopped");
    }
}

impl Drop for Capture {
    fn drop(&mut self) {
        self.stop();
    }
}
