use std::sync::Arc;

use rustfft::num_complex::Complex64;
use rustfft::num_traits::Zero;
use tracing::debug;

use crate::config::{Configuration, MagnitudeScale};

/// Floor of the log magnitude scale, in dB. Cells of silent frames clamp
/// here and sit far below any usable amplitude floor.
pub(crate) const SILENCE_FLOOR: f32 = -100.0;

/// Row-major grid of spectral magnitudes, `frames × bins`.
#[derive(Debug, Clone)]
pub struct Spectrogram {
    frames: usize,
    bins: usize,
    data: Vec<f32>,
}

impl Spectrogram {
    pub(crate) fn empty(bins: usize) -> Self {
        Self { frames: 0, bins, data: Vec::new() }
    }

    #[cfg(test)]
    pub(crate) fn from_data(bins: usize, data: Vec<f32>) -> Self {
        assert_eq!(data.len() % bins, 0);
        Self { frames: data.len() / bins, bins, data }
    }

    /// Number of analysis frames.
    pub fn frames(&self) -> usize {
        self.frames
    }

    /// Number of frequency bins per frame.
    pub fn bins(&self) -> usize {
        self.bins
    }

    pub fn is_empty(&self) -> bool {
        self.frames == 0
    }

    /// Magnitude at `(frame, bin)`.
    pub fn at(&self, frame: usize, bin: usize) -> f32 {
        debug_assert!(frame < self.frames && bin < self.bins);
        self.data[frame * self.bins + bin]
    }

    pub(crate) fn row(&self, frame: usize) -> &[f32] {
        &self.data[frame * self.bins..][..self.bins]
    }

    pub(crate) fn cells(&self) -> &[f32] {
        &self.data
    }
}

/// Short-time Fourier transform front-end.
///
/// Holds the FFT plan, window and scratch buffers so repeated enrollments
/// reuse the allocations.
pub(crate) struct Stft {
    window_size: usize,
    hop_size: usize,
    scale: MagnitudeScale,

    fft_plan: Arc<dyn rustfft::Fft<f64>>,
    fft_buffer: Box<[Complex64]>,
    fft_scratch: Box<[Complex64]>,

    window: Box<[f64]>,
}

impl Stft {
    pub(crate) fn new(config: &Configuration) -> Self {
        let window_size = config.fft_window_size;
        let fft_plan = rustfft::FftPlanner::new().plan_fft_forward(window_size);

        Self {
            window_size,
            hop_size: config.hop_size,
            scale: config.magnitude_scale,
            fft_buffer: vec![Complex64::zero(); window_size].into_boxed_slice(),
            fft_scratch: vec![Complex64::zero(); fft_plan.get_inplace_scratch_len()]
                .into_boxed_slice(),
            fft_plan,
            window: make_hann_window(window_size),
        }
    }

    /// Computes the magnitude spectrogram of a mono signal.
    ///
    /// The signal is DC-removed and peak-normalized to `max |x| = 1` first.
    /// Frame `t` spans samples `[t·hop, t·hop + window)`; a signal shorter
    /// than one window yields an empty spectrogram.
    pub(crate) fn spectrogram(&mut self, pcm: &[f32]) -> Spectrogram {
        let bins = self.window_size / 2 + 1;
        if pcm.len() < self.window_size {
            return Spectrogram::empty(bins);
        }

        let samples = condition(pcm);
        let frames = 1 + (samples.len() - self.window_size) / self.hop_size;
        let mut data = Vec::with_capacity(frames * bins);

        for t in 0..frames {
            let start = t * self.hop_size;
            let frame = &samples[start..start + self.window_size];

            for (out, (&sample, &w)) in self
                .fft_buffer
                .iter_mut()
                .zip(frame.iter().zip(self.window.iter()))
            {
                out.re = sample * w;
                out.im = 0.0;
            }

            self.fft_plan
                .process_with_scratch(&mut self.fft_buffer, &mut self.fft_scratch);

            for cell in &self.fft_buffer[..bins] {
                data.push(magnitude(cell.norm_sqr(), self.scale));
            }
        }

        debug!(frames, bins, "computed spectrogram");
        Spectrogram { frames, bins, data }
    }
}

/// One-shot spectrogram computation.
///
/// [crate::Recognizer] keeps the FFT plan alive between calls instead;
/// prefer it when fingerprinting more than one signal.
pub fn spectrogram(pcm: &[f32], config: &Configuration) -> Spectrogram {
    Stft::new(config).spectrogram(pcm)
}

fn magnitude(power: f64, scale: MagnitudeScale) -> f32 {
    match scale {
        MagnitudeScale::Linear => power.sqrt() as f32,
        MagnitudeScale::Log => {
            let db = 10.0 * power.log10() as f32;
            db.max(SILENCE_FLOOR)
        }
    }
}

/// DC removal followed by peak normalization into `[-1, 1]`.
fn condition(pcm: &[f32]) -> Vec<f64> {
    let mean = pcm.iter().copied().map(f64::from).sum::<f64>() / pcm.len() as f64;
    let mut samples: Vec<f64> = pcm.iter().map(|&x| f64::from(x) - mean).collect();

    let peak = samples.iter().fold(0.0f64, |acc, &x| acc.max(x.abs()));
    if peak > 0.0 {
        for sample in &mut samples {
            *sample /= peak;
        }
    }
    samples
}

fn make_hann_window(size: usize) -> Box<[f64]> {
    let n = size as f64;
    (0..size)
        .map(|i| 0.5 * (1.0 - f64::cos(2.0 * std::f64::consts::PI * i as f64 / (n - 1.0))))
        .collect()
}

#[cfg(test)]
mod tests {
    use crate::config::{Configuration, MagnitudeScale};

    use super::{condition, Stft};

    fn sine(freq: f64, rate: u32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| f64::sin(2.0 * std::f64::consts::PI * freq * i as f64 / rate as f64) as f32)
            .collect()
    }

    #[test]
    fn too_short_signal_yields_empty_grid() {
        let config = Configuration::default();
        let mut stft = Stft::new(&config);

        assert!(stft.spectrogram(&[]).is_empty());
        assert!(stft.spectrogram(&vec![0.5; 2047]).is_empty());
    }

    #[test]
    fn frame_count_follows_hop() {
        let config = Configuration::default();
        let mut stft = Stft::new(&config);

        assert_eq!(stft.spectrogram(&sine(440.0, 22_050, 2048)).frames(), 1);
        assert_eq!(stft.spectrogram(&sine(440.0, 22_050, 2048 + 1023)).frames(), 1);
        assert_eq!(stft.spectrogram(&sine(440.0, 22_050, 2048 + 1024)).frames(), 2);
        assert_eq!(
            stft.spectrogram(&sine(440.0, 22_050, 2048 + 10 * 1024)).frames(),
            11
        );
    }

    #[test]
    fn sine_energy_lands_in_its_bin() {
        let config = Configuration::default();
        let mut stft = Stft::new(&config);

        // Bin 100 center frequency for a 2048-point window at 22.05 kHz.
        let freq = 100.0 * 22_050.0 / 2048.0;
        let grid = stft.spectrogram(&sine(freq, 22_050, 4096));

        assert_eq!(grid.bins(), 1025);
        for t in 0..grid.frames() {
            let row = grid.row(t);
            let strongest = (0..row.len()).max_by(|&a, &b| row[a].total_cmp(&row[b])).unwrap();
            assert_eq!(strongest, 100);
            assert!(row[100] > 40.0, "ridge magnitude {} too weak", row[100]);
        }
    }

    #[test]
    fn linear_scale_is_non_negative() {
        let config = Configuration::default().with_magnitude_scale(MagnitudeScale::Linear);
        let mut stft = Stft::new(&config);

        let grid = stft.spectrogram(&sine(440.0, 22_050, 4096));
        assert!(grid.cells().iter().all(|&m| m >= 0.0));
    }

    #[test]
    fn conditioning_removes_dc_and_normalizes() {
        let samples = condition(&[0.3, 0.5, 0.3, 0.5]);

        let mean = samples.iter().sum::<f64>() / samples.len() as f64;
        assert!(mean.abs() < 1e-9, "dc offset {mean} survived conditioning");

        let peak = samples.iter().fold(0.0f64, |acc, &x| acc.max(x.abs()));
        assert!((peak - 1.0).abs() < 1e-9, "peak normalized to {peak}");
    }

    #[test]
    fn all_zero_signal_stays_finite() {
        let config = Configuration::default();
        let mut stft = Stft::new(&config);

        let grid = stft.spectrogram(&vec![0.0; 4096]);
        assert!(grid.cells().iter().all(|&m| m.is_finite()));
    }
}
