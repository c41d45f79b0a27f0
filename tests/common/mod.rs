//! Deterministic signal generators shared by the integration tests.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

pub const RATE: u32 = 22_050;

/// Linear sine sweep from `f0` to `f1` Hz.
pub fn chirp(f0: f64, f1: f64, seconds: f64) -> Vec<f32> {
    let len = (seconds * RATE as f64) as usize;
    (0..len)
        .map(|i| {
            let t = i as f64 / RATE as f64;
            let phase = 2.0 * std::f64::consts::PI * (f0 * t + (f1 - f0) / (2.0 * seconds) * t * t);
            phase.sin() as f32
        })
        .collect()
}

/// Constant sine tone.
pub fn tone(freq: f64, seconds: f64) -> Vec<f32> {
    let len = (seconds * RATE as f64) as usize;
    (0..len)
        .map(|i| {
            f64::sin(2.0 * std::f64::consts::PI * freq * i as f64 / RATE as f64) as f32
        })
        .collect()
}

/// Uniform white noise in `[-1, 1]` from a fixed seed.
pub fn white_noise(seed: u64, seconds: f64) -> Vec<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    let len = (seconds * RATE as f64) as usize;
    (0..len).map(|_| rng.gen_range(-1.0f32..1.0)).collect()
}

/// `a` plus `b` scaled by `gain`, truncated to the shorter signal.
pub fn mix(a: &[f32], b: &[f32], gain: f32) -> Vec<f32> {
    a.iter().zip(b).map(|(&a, &b)| a + gain * b).collect()
}
