//! Shared audio utilities for capture and playback.

use anyhow::Result;
use cpal::traits::DeviceTrait;
use cpal::{Device, SampleFormat, SupportedStreamConfig, SupportedStreamConfigRange};

/// Human-readable device name, or "Unknown".
pub fn device_name(device: &Device) -> String {
    device.description().ok().map(|desc| desc.name().to_string()).unwrap_or_else(|| "Unknown".to_string())
}

/// Pick an F32 mono/stereo configuration, preferring one that supports
/// `target_sample_rate` and otherwise the closest rate of the first match.
pub fn find_best_config(configs: impl Iterator<Item = SupportedStreamConfigRange>, target_sample_rate: u32) -> Result<SupportedStreamConfig> {
    let candidates: Vec<SupportedStreamConfigRange> =
        configs.filter(|config| config.channels() <= 2 && config.sample_format() == SampleFormat::F32).collect();

    if let Some(exact) = candidates
        .iter()
        .find(|config| (config.min_sample_rate()..=config.max_sample_rate()).contains(&target_sample_rate))
    {
        return Ok((*exact).with_sample_rate(target_sample_rate));
    }

    let Some(fallback) = candidates.first() else {
        anyhow::bail!("No F32 audio configuration found on this device");
    };

    let rate = target_sample_rate.clamp(fallback.min_sample_rate(), fallback.max_sample_rate());
    Ok((*fallback).with_sample_rate(rate))
}

/// Mix interleaved frames down to mono by averaging channels.
pub fn downmix(data: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return data.to_vec();
    }
    data.chunks(channels).map(|frame| frame.iter().sum::<f32>() / channels as f32).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_downmix_stereo() {
        let data = vec![0.5f32, 1.0, -0.5, -1.0];
        assert_eq!(downmix(&data, 2), vec![0.75, -0.75]);
    }

    #[test]
    fn test_downmix_mono_is_copy() {
        let data = vec![0.1f32, 0.2, 0.3];
        assert_eq!(downmix(&data, 1), data);
    }
}
