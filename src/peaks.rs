use std::collections::VecDeque;

use tracing::debug;

use crate::config::{AmpFloor, Configuration, MagnitudeScale};
use crate::spectrogram::{Spectrogram, SILENCE_FLOOR};

/// A constellation landmark: a cell that dominates its rectangular
/// time-frequency neighborhood.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Peak {
    pub frame: u32,
    pub bin: u32,
    pub magnitude: f32,
}

/// Extracts the constellation of a spectrogram.
///
/// A cell survives when it equals the maximum of the
/// `(2·Dt+1) × (2·Df+1)` window centered on it and clears the amplitude
/// floor. Among equal-magnitude cells of one neighborhood only the
/// lexicographically smallest `(frame, bin)` is kept, so the result is
/// deterministic. Density beyond the configured peaks-per-second cap is
/// trimmed on a rolling one-second window, dropping the weakest peaks
/// first.
pub fn find_peaks(grid: &Spectrogram, config: &Configuration) -> Vec<Peak> {
    if grid.is_empty() {
        return Vec::new();
    }

    let floor = match resolve_floor(grid, config) {
        Some(floor) => floor,
        None => return Vec::new(),
    };

    let local_max = local_max_filter(grid, config.peak_time_radius, config.peak_freq_radius);

    let mut peaks: Vec<Peak> = Vec::new();
    for frame in 0..grid.frames() {
        let row = grid.row(frame);
        let max_row = &local_max[frame * grid.bins()..][..grid.bins()];

        for (bin, (&cell, &neighborhood_max)) in row.iter().zip(max_row).enumerate() {
            if cell < floor || cell != neighborhood_max {
                continue;
            }

            // Equal-magnitude plateau: an earlier peak inside the window
            // already owns this neighborhood.
            let shadowed = peaks.iter().rev()
                .take_while(|p| p.frame as usize + config.peak_time_radius >= frame)
                .any(|p| bin.abs_diff(p.bin as usize) <= config.peak_freq_radius);
            if shadowed {
                continue;
            }

            peaks.push(Peak {
                frame: frame as u32,
                bin: bin as u32,
                magnitude: cell,
            });
        }
    }

    let peaks = cap_density(peaks, config);
    debug!(count = peaks.len(), frames = grid.frames(), "constellation extracted");
    peaks
}

/// Resolves the amplitude floor, or `None` when the grid holds nothing
/// above silence.
fn resolve_floor(grid: &Spectrogram, config: &Configuration) -> Option<f32> {
    match config.amp_floor {
        AmpFloor::Absolute(floor) => Some(floor),
        AmpFloor::Percentile(percentile) => {
            let silence = match config.magnitude_scale {
                MagnitudeScale::Log => SILENCE_FLOOR,
                MagnitudeScale::Linear => 0.0,
            };

            let mut audible: Vec<f32> = grid
                .cells()
                .iter()
                .copied()
                .filter(|&m| m > silence)
                .collect();
            if audible.is_empty() {
                return None;
            }

            audible.sort_unstable_by(f32::total_cmp);
            let rank = (percentile as f64 / 100.0 * (audible.len() - 1) as f64).round();
            Some(audible[rank as usize])
        }
    }
}

/// Rectangular maximum filter, computed as two separable sliding-maximum
/// passes (frequency, then time).
fn local_max_filter(grid: &Spectrogram, time_radius: usize, freq_radius: usize) -> Vec<f32> {
    let frames = grid.frames();
    let bins = grid.bins();

    let mut by_freq = vec![0.0f32; frames * bins];
    for frame in 0..frames {
        sliding_max(grid.row(frame), freq_radius, &mut by_freq[frame * bins..][..bins]);
    }

    let mut result = vec![0.0f32; frames * bins];
    let mut column = vec![0.0f32; frames];
    let mut column_max = vec![0.0f32; frames];
    for bin in 0..bins {
        for frame in 0..frames {
            column[frame] = by_freq[frame * bins + bin];
        }
        sliding_max(&column, time_radius, &mut column_max);
        for frame in 0..frames {
            result[frame * bins + bin] = column_max[frame];
        }
    }

    result
}

/// Sliding window maximum over `[i − radius, i + radius]` using a
/// monotonically decreasing index deque.
fn sliding_max(values: &[f32], radius: usize, out: &mut [f32]) {
    debug_assert_eq!(values.len(), out.len());

    let mut deque: VecDeque<usize> = VecDeque::new();
    for i in 0..values.len() + radius {
        if i < values.len() {
            while let Some(&back) = deque.back() {
                if values[back] <= values[i] {
                    deque.pop_back();
                } else {
                    break;
                }
            }
            deque.push_back(i);
        }

        if i >= radius {
            let center = i - radius;
            while let Some(&front) = deque.front() {
                if front + radius < center {
                    deque.pop_front();
                } else {
                    break;
                }
            }
            out[center] = values[*deque.front().unwrap()];
        }
    }
}

/// Enforces the peaks-per-second cap on a rolling one-second window.
///
/// Peaks arrive in frame order; whenever the trailing one-second span
/// holds more than the cap, the weakest peak of that span is dropped
/// (largest `(frame, bin)` loses magnitude ties). Every one-second span of
/// the result respects the cap, not just spans on a fixed grid.
fn cap_density(peaks: Vec<Peak>, config: &Configuration) -> Vec<Peak> {
    let span = config.frames_per_second().round().max(1.0) as u32;
    let cap = config.peaks_per_second_max;

    let mut kept: Vec<Peak> = Vec::with_capacity(peaks.len());
    for peak in peaks {
        kept.push(peak);

        let span_start = peak.frame.saturating_sub(span - 1);
        let first = kept.partition_point(|p| p.frame < span_start);
        if kept.len() - first <= cap {
            continue;
        }

        let weakest = kept[first..]
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| {
                a.magnitude
                    .total_cmp(&b.magnitude)
                    .then(b.frame.cmp(&a.frame))
                    .then(b.bin.cmp(&a.bin))
            })
            .map(|(i, _)| first + i)
            .unwrap();
        kept.remove(weakest);
    }

    kept
}

#[cfg(test)]
mod tests {
    use crate::config::{AmpFloor, Configuration};
    use crate::spectrogram::Spectrogram;

    use super::{find_peaks, sliding_max, Peak};

    fn test_config() -> Configuration {
        Configuration::default()
            .with_peak_radius(1, 1)
            .with_amp_floor(AmpFloor::Absolute(1.0))
    }

    #[test]
    fn sliding_max_matches_brute_force() {
        let values = [3.0, 1.0, 4.0, 1.0, 5.0, 9.0, 2.0, 6.0];
        for radius in 0..4 {
            let mut out = vec![0.0; values.len()];
            sliding_max(&values, radius, &mut out);

            for i in 0..values.len() {
                let lo = i.saturating_sub(radius);
                let hi = (i + radius).min(values.len() - 1);
                let expected = values[lo..=hi].iter().fold(f32::MIN, |a, &b| a.max(b));
                assert_eq!(out[i], expected, "radius {radius}, index {i}");
            }
        }
    }

    #[test]
    fn isolated_maxima_become_peaks() {
        // 4 frames × 4 bins, two clear maxima far enough apart.
        let grid = Spectrogram::from_data(4, vec![
            0.0, 0.0, 0.0, 0.0,
            0.0, 5.0, 0.0, 0.0,
            0.0, 0.0, 0.0, 0.0,
            0.0, 0.0, 0.0, 7.0,
        ]);

        let peaks = find_peaks(&grid, &test_config());
        assert_eq!(peaks, vec![
            Peak { frame: 1, bin: 1, magnitude: 5.0 },
            Peak { frame: 3, bin: 3, magnitude: 7.0 },
        ]);
    }

    #[test]
    fn floor_suppresses_weak_maxima() {
        let grid = Spectrogram::from_data(3, vec![
            0.0, 0.0, 0.0,
            0.0, 0.5, 0.0,
            0.0, 0.0, 0.0,
        ]);

        assert!(find_peaks(&grid, &test_config()).is_empty());
    }

    #[test]
    fn plateau_keeps_lexicographically_first_cell() {
        let grid = Spectrogram::from_data(3, vec![
            0.0, 0.0, 0.0,
            4.0, 4.0, 0.0,
            0.0, 0.0, 0.0,
        ]);

        let peaks = find_peaks(&grid, &test_config());
        assert_eq!(peaks, vec![Peak { frame: 1, bin: 0, magnitude: 4.0 }]);
    }

    #[test]
    fn no_two_peaks_share_a_cell() {
        let grid = Spectrogram::from_data(4, vec![
            2.0, 1.0, 2.0, 1.0,
            1.0, 2.0, 1.0, 2.0,
            2.0, 1.0, 2.0, 1.0,
            1.0, 2.0, 1.0, 2.0,
        ]);

        let peaks = find_peaks(&grid, &test_config());
        let mut cells: Vec<_> = peaks.iter().map(|p| (p.frame, p.bin)).collect();
        cells.dedup();
        assert_eq!(cells.len(), peaks.len());
    }

    #[test]
    fn every_peak_dominates_its_neighborhood() {
        // Deterministic pseudo-noise grid.
        let mut state = 0x2545_f491u32;
        let data: Vec<f32> = (0..20 * 8)
            .map(|_| {
                state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
                (state >> 8) as f32 / (1 << 24) as f32 * 10.0
            })
            .collect();
        let grid = Spectrogram::from_data(8, data);

        let config = test_config();
        let peaks = find_peaks(&grid, &config);
        assert!(!peaks.is_empty());

        for peak in &peaks {
            let (t, f) = (peak.frame as usize, peak.bin as usize);
            for nt in t.saturating_sub(1)..=(t + 1).min(grid.frames() - 1) {
                for nf in f.saturating_sub(1)..=(f + 1).min(grid.bins() - 1) {
                    assert!(grid.at(nt, nf) <= peak.magnitude);
                }
            }
        }
    }

    #[test]
    fn density_cap_keeps_strongest_peaks() {
        // One second covers ~21.5 frames at the default geometry; these
        // 4 well-separated peaks share a span with a cap of 2.
        let mut data = vec![0.0f32; 20 * 32];
        for &(frame, bin, mag) in &[(0usize, 4usize, 5.0f32), (5, 12, 9.0), (10, 20, 7.0), (15, 28, 3.0)] {
            data[frame * 32 + bin] = mag;
        }
        let grid = Spectrogram::from_data(32, data);

        let config = test_config().with_peaks_per_second(2);
        let peaks = find_peaks(&grid, &config);

        assert_eq!(peaks.len(), 2);
        assert_eq!((peaks[0].frame, peaks[0].bin), (5, 12));
        assert_eq!((peaks[1].frame, peaks[1].bin), (10, 20));
    }

    #[test]
    fn density_cap_rolls_across_second_boundaries() {
        // Frames 20..=23 straddle the boundary between the first and
        // second one-second spans (22 frames each at the default
        // geometry). A fixed per-second grid would admit all four; the
        // rolling window must keep only the strongest two.
        let mut data = vec![0.0f32; 30 * 40];
        for &(frame, bin, mag) in &[(20usize, 4usize, 5.0f32), (21, 12, 9.0), (22, 20, 7.0), (23, 28, 3.0)] {
            data[frame * 40 + bin] = mag;
        }
        let grid = Spectrogram::from_data(40, data);

        let config = test_config().with_peaks_per_second(2);
        let peaks = find_peaks(&grid, &config);

        assert_eq!(peaks.len(), 2);
        assert_eq!((peaks[0].frame, peaks[0].bin), (21, 12));
        assert_eq!((peaks[1].frame, peaks[1].bin), (22, 20));
    }
}
