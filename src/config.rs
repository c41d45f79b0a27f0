use sha2::{Digest, Sha256};

/// Magnitude axis used for peak picking.
///
/// The choice must be identical between enrollment and identification and
/// is therefore part of the parameter digest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MagnitudeScale {
    /// Raw spectral magnitude.
    Linear,
    /// Decibel power, `10·log10(|X|²)`, clamped at the silence floor.
    Log,
}

/// Amplitude floor below which spectrogram cells never become peaks.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AmpFloor {
    /// Fixed threshold in the units of the configured magnitude scale.
    Absolute(f32),
    /// Percentile (0..100) of the non-silent cells of each spectrogram.
    Percentile(f32),
}

/// Structure containing configuration for the fingerprinting pipeline.
///
/// All values are fixed at build time; an index stores a digest of them and
/// refuses to open under a different configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Configuration {
    pub(crate) sample_rate: u32,
    pub(crate) fft_window_size: usize,
    pub(crate) hop_size: usize,
    pub(crate) peak_time_radius: usize,
    pub(crate) peak_freq_radius: usize,
    pub(crate) amp_floor: AmpFloor,
    pub(crate) magnitude_scale: MagnitudeScale,
    pub(crate) fan_out: usize,
    pub(crate) pair_delta_min: u32,
    pub(crate) pair_delta_max: u32,
    pub(crate) pair_freq_spread_max: u32,
    pub(crate) peaks_per_second_max: usize,
    pub(crate) min_match_count: u32,
    pub(crate) min_lead_ratio: f32,
    pub(crate) delta_epsilon: u32,
    pub(crate) dedup_postings: bool,
}

impl Configuration {
    fn new() -> Self {
        Self {
            sample_rate: 22_050,
            fft_window_size: 2048,
            hop_size: 1024,
            peak_time_radius: 10,
            peak_freq_radius: 10,
            amp_floor: AmpFloor::Absolute(10.0),
            magnitude_scale: MagnitudeScale::Log,
            fan_out: 15,
            pair_delta_min: 1,
            pair_delta_max: 200,
            pair_freq_spread_max: 200,
            peaks_per_second_max: 30,
            min_match_count: 5,
            min_lead_ratio: 2.0,
            delta_epsilon: 0,
            dedup_postings: false,
        }
    }

    /// Sets the STFT window size. Must be a power of two.
    pub fn with_fft_window_size(mut self, fft_window_size: usize) -> Self {
        self.fft_window_size = fft_window_size;
        self
    }

    /// Sets the hop between consecutive STFT frames, in samples.
    pub fn with_hop_size(mut self, hop_size: usize) -> Self {
        self.hop_size = hop_size;
        self
    }

    /// Sets the peak neighborhood radii, in frames and bins.
    pub fn with_peak_radius(mut self, time: usize, freq: usize) -> Self {
        self.peak_time_radius = time;
        self.peak_freq_radius = freq;
        self
    }

    /// Sets the amplitude floor for peak picking.
    pub fn with_amp_floor(mut self, floor: AmpFloor) -> Self {
        self.amp_floor = floor;
        self
    }

    /// Sets the magnitude scale used for peak picking.
    pub fn with_magnitude_scale(mut self, scale: MagnitudeScale) -> Self {
        self.magnitude_scale = scale;
        self
    }

    /// Sets the number of target pairings emitted per anchor peak.
    pub fn with_fan_out(mut self, fan_out: usize) -> Self {
        self.fan_out = fan_out;
        self
    }

    /// Sets the anchor-to-target time window, in frames.
    pub fn with_pair_delta(mut self, min: u32, max: u32) -> Self {
        self.pair_delta_min = min;
        self.pair_delta_max = max;
        self
    }

    /// Sets the maximum anchor-to-target frequency spread, in bins.
    pub fn with_pair_freq_spread(mut self, max: u32) -> Self {
        self.pair_freq_spread_max = max;
        self
    }

    /// Caps constellation density, in peaks per second of audio.
    pub fn with_peaks_per_second(mut self, max: usize) -> Self {
        self.peaks_per_second_max = max;
        self
    }

    /// Sets the minimum aligned-hit count for a confident match.
    pub fn with_min_match_count(mut self, count: u32) -> Self {
        self.min_match_count = count;
        self
    }

    /// Sets the required score lead over the second-best candidate.
    pub fn with_min_lead_ratio(mut self, ratio: f32) -> Self {
        self.min_lead_ratio = ratio;
        self
    }

    /// Sets the matcher's delta tolerance, in frames.
    pub fn with_delta_epsilon(mut self, epsilon: u32) -> Self {
        self.delta_epsilon = epsilon;
        self
    }

    /// Enables de-duplication of identical `(hash, track, time)` postings.
    pub fn with_deduped_postings(mut self, dedup: bool) -> Self {
        self.dedup_postings = dedup;
        self
    }

    /// Target sample rate of the fingerprinting pipeline.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Number of frequency bins per spectrogram frame.
    pub fn freq_bins(&self) -> usize {
        self.fft_window_size / 2 + 1
    }

    /// Analysis frames per second of audio.
    pub fn frames_per_second(&self) -> f64 {
        self.sample_rate as f64 / self.hop_size as f64
    }

    /// Number of frames a signal of `len` samples produces.
    pub fn frame_count(&self, len: usize) -> usize {
        if len < self.fft_window_size {
            0
        } else {
            1 + (len - self.fft_window_size) / self.hop_size
        }
    }

    /// SHA-256 digest over every parameter that shapes fingerprints.
    ///
    /// Stored in index files; enrollment and identification against an
    /// index are only valid when the digests agree.
    pub fn digest(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(b"soundprint.params.v1");
        hasher.update(b"sr");
        hasher.update(self.sample_rate.to_le_bytes());
        hasher.update(b"fft");
        hasher.update((self.fft_window_size as u64).to_le_bytes());
        hasher.update(b"hop");
        hasher.update((self.hop_size as u64).to_le_bytes());
        hasher.update(b"radius");
        hasher.update((self.peak_time_radius as u64).to_le_bytes());
        hasher.update((self.peak_freq_radius as u64).to_le_bytes());
        hasher.update(b"floor");
        match self.amp_floor {
            AmpFloor::Absolute(v) => {
                hasher.update([0u8]);
                hasher.update(v.to_le_bytes());
            }
            AmpFloor::Percentile(v) => {
                hasher.update([1u8]);
                hasher.update(v.to_le_bytes());
            }
        }
        hasher.update(b"scale");
        hasher.update([match self.magnitude_scale {
            MagnitudeScale::Linear => 0u8,
            MagnitudeScale::Log => 1u8,
        }]);
        hasher.update(b"fanout");
        hasher.update((self.fan_out as u64).to_le_bytes());
        hasher.update(b"delta");
        hasher.update(self.pair_delta_min.to_le_bytes());
        hasher.update(self.pair_delta_max.to_le_bytes());
        hasher.update(b"spread");
        hasher.update(self.pair_freq_spread_max.to_le_bytes());
        hasher.update(b"density");
        hasher.update((self.peaks_per_second_max as u64).to_le_bytes());
        hasher.update(b"minmatch");
        hasher.update(self.min_match_count.to_le_bytes());
        hasher.update(b"dedup");
        hasher.update([self.dedup_postings as u8]);
        hasher.finalize().into()
    }
}

impl Default for Configuration {
    fn default() -> Self {
        Self::new()
    }
}
