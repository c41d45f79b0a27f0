use rubato::{InterpolationParameters, Resampler};

use crate::config::Configuration;
use crate::error::{Error, Result};

const MIN_SAMPLE_RATE: u32 = 1000;
const RESAMPLE_CHUNK: usize = 1024;

/// Adapts decoded PCM to the fingerprinting pipeline's expectations:
/// interleaved multi-channel input is downmixed to mono and foreign sample
/// rates are sinc-resampled to the configured rate.
///
/// Decoding itself stays outside the crate; input at the target rate with
/// one channel passes through untouched.
pub fn prepare_pcm(
    samples: &[f32],
    sample_rate: u32,
    channels: usize,
    config: &Configuration,
) -> Result<Vec<f32>> {
    if channels == 0 {
        return Err(Error::NoChannels);
    }
    if sample_rate < MIN_SAMPLE_RATE {
        return Err(Error::SampleRateTooLow { rate: sample_rate, min: MIN_SAMPLE_RATE });
    }

    let mono = downmix(samples, channels);
    if sample_rate == config.sample_rate() {
        return Ok(mono);
    }
    resample(&mono, sample_rate, config.sample_rate())
}

fn downmix(samples: &[f32], channels: usize) -> Vec<f32> {
    match channels {
        1 => samples.to_vec(),
        2 => samples
            .chunks_exact(2)
            .map(|frame| (frame[0] + frame[1]) / 2.0)
            .collect(),
        n => samples
            .chunks_exact(n)
            .map(|frame| frame.iter().sum::<f32>() / n as f32)
            .collect(),
    }
}

fn resample(input: &[f32], input_rate: u32, output_rate: u32) -> Result<Vec<f32>> {
    let mut resampler = rubato::SincFixedIn::<f64>::new(
        f64::from(output_rate) / f64::from(input_rate),
        1.0,
        InterpolationParameters {
            sinc_len: 16,
            f_cutoff: 0.8,
            oversampling_factor: 128,
            interpolation: rubato::InterpolationType::Nearest,
            window: rubato::WindowFunction::Blackman,
        },
        RESAMPLE_CHUNK,
        1,
    )?;

    // Fixed-size input chunks; the tail is zero-padded like a flush.
    let mut padded: Vec<f64> = input.iter().copied().map(f64::from).collect();
    padded.resize(padded.len().div_ceil(RESAMPLE_CHUNK) * RESAMPLE_CHUNK, 0.0);

    let mut output = Vec::with_capacity(
        (padded.len() as f64 * f64::from(output_rate) / f64::from(input_rate)) as usize + 1,
    );
    let mut output_buffer: Vec<f64> = Vec::new();
    for chunk in padded.chunks(RESAMPLE_CHUNK) {
        output_buffer.clear();
        resampler.process_into_buffer(
            &[chunk],
            std::slice::from_mut(&mut output_buffer),
            None,
        )?;
        output.extend(output_buffer.iter().map(|&s| s as f32));
    }

    Ok(output)
}
