//! Sample rate conversion using rubato's FFT resampler.
//!
//! [`StreamResampler`] accepts input of any size and converts it in fixed
//! chunks, which suits audio callbacks. [`resample`] converts a whole buffer.

use anyhow::{Context, Result};
use audioadapter_buffers::direct::InterleavedSlice;
use rubato::{Fft, FixedSync, Resampler};

/// Input frames per FFT pass.
const CHUNK_SIZE: usize = 1024;

/// Sub-chunks per FFT pass (higher = better quality, more CPU).
const SUB_CHUNKS: usize = 2;

/// Mono resampler that buffers input until a full chunk is available.
pub struct StreamResampler {
    resampler: Fft<f32>,
    pending: Vec<f32>, // Input not yet converted
    scratch: Vec<f32>, // Output of one pass
}

impl StreamResampler {
    pub fn new(from_rate: u32, to_rate: u32) -> Result<Self> {
        let resampler = Fft::<f32>::new(from_rate as usize, to_rate as usize, CHUNK_SIZE, SUB_CHUNKS, 1, FixedSync::Input)
            .context("Failed to create resampler")?;
        let scratch = vec![0.0f32; resampler.output_frames_max()];

        Ok(Self { resampler, pending: Vec::with_capacity(CHUNK_SIZE * 2), scratch })
    }

    /// Convert as many full chunks as the buffered input allows.
    pub fn push(&mut self, samples: &[f32]) -> Result<Vec<f32>> {
        self.pending.extend_from_slice(samples);

        let mut output = Vec::new();
        while self.pending.len() >= CHUNK_SIZE {
            let chunk: Vec<f32> = self.pending.drain(..CHUNK_SIZE).collect();
            self.convert(&chunk, &mut output)?;
        }
        Ok(output)
    }

    /// Convert the remaining input, padded with silence to a full chunk.
    pub fn flush(&mut self) -> Result<Vec<f32>> {
        let mut output = Vec::new();
        if self.pending.is_empty() {
            return Ok(output);
        }

        let mut chunk = std::mem::take(&mut self.pending);
        chunk.resize(CHUNK_SIZE, 0.0);
        self.convert(&chunk, &mut output)?;
        Ok(output)
    }

    fn convert(&mut self, chunk: &[f32], output: &mut Vec<f32>) -> Result<()> {
        let frames_max = self.scratch.len();
        let input = InterleavedSlice::new(chunk, 1, CHUNK_SIZE).context("Failed to create input adapter")?;
        let mut out = InterleavedSlice::new_mut(&mut self.scratch, 1, frames_max).context("Failed to create output adapter")?;

        let (_, written) = self.resampler.process_into_buffer(&input, &mut out, None).map_err(|e| anyhow::anyhow!("Resampling error: {}", e))?;
        output.extend_from_slice(&self.scratch[..written]);
        Ok(())
    }
}

/// Resample a complete mono buffer.
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>> {
    if from_rate == to_rate {
        return Ok(samples.to_vec());
    }

    let mut resampler = StreamResampler::new(from_rate, to_rate)?;
    let mut output = resampler.push(samples)?;
    output.extend(resampler.flush()?);

    // Drop most of the padding added by the final chunk
    let expected = (samples.len() as f64 * to_rate as f64 / from_rate as f64) as usize;
    output.truncate(expected + 100);

    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resample_upsampling() {
        let samples = vec![0.0; 16000];
        let result = resample(&samples, 16000, 48000).unwrap();
        assert!(result.len() >= 48000 && result.len() <= 48100, "got {}", result.len());
    }

    #[test]
    fn test_resample_downsampling() {
        let samples = vec![0.0; 48000];
        let result = resample(&samples, 48000, 16000).unwrap();
        assert!(result.len() >= 15900 && result.len() <= 16100, "got {}", result.len());
    }

    #[test]
    fn test_stream_resampler_buffers_partial_chunks() {
        let mut resampler = StreamResampler::new(48000, 16000).unwrap();
        assert!(resampler.push(&[0.0; 100]).unwrap().is_empty());
        assert!(!resampler.push(&[0.0; CHUNK_SIZE]).unwrap().is_empty());
        assert!(!resampler.flush().unwrap().is_empty());
        assert!(resampler.flush().unwrap().is_empty());
    }
}
