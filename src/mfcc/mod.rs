//! MFCC computation for the on-line front end.
//!
//! One base vector per frame: pre-emphasis, Hamming window, FFT, mel
//! filterbank, log, DCT-II, cepstral liftering, plus optional log energy
//! or the 0th cepstral coefficient. Delta and acceleration streams are
//! produced by the cycle buffers in [`delta`], and the whole per-frame
//! pipeline is driven by [`pipeline::FeaturePipeline`].

pub mod delta;
pub mod pipeline;

use crate::config::AnalysisConfig;
use rustfft::FftPlanner;
use rustfft::num_complex::Complex;
use std::f32::consts::PI;
use std::sync::Arc;

/// ln(10), used for dB-scaled quantities.
pub const LOG_TEN: f32 = 2.302_585_1;

/// Base MFCC computation over a single analysis window.
pub struct MfccCalc {
    config: AnalysisConfig,
    fft: Arc<dyn rustfft::Fft<f32>>,
    filterbank: Vec<Vec<f32>>,
    lifter_weights: Vec<f32>,
    /// FFT work buffer, reused across frames.
    spectrum: Vec<Complex<f32>>,
}

impl MfccCalc {
    /// Build the calculator for the given analysis parameters.
    #[must_use]
    pub fn new(config: &AnalysisConfig) -> Self {
        let mut planner = FftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(config.frame_size);
        let filterbank =
            build_mel_filterbank(config.fbank_num, config.frame_size, config.sample_rate);
        let lifter_weights = build_lifter(config.lifter, config.mfcc_dim);
        Self {
            config: config.clone(),
            fft,
            filterbank,
            lifter_weights,
            spectrum: vec![Complex::new(0.0, 0.0); config.frame_size],
        }
    }

    /// Compute the base vector for one window of `frame_size` samples.
    ///
    /// Returns the base cepstral vector (with c0/energy appended per the
    /// configuration) and the raw log energy of the frame. Energy
    /// normalisation against the running maximum is the caller's job,
    /// since it carries state across utterances.
    pub fn compute(&mut self, window: &[f32]) -> (Vec<f32>, f32) {
        debug_assert_eq!(window.len(), self.config.frame_size);
        let n = self.config.frame_size;

        let mut frame: Vec<f32> = window.to_vec();

        if self.config.zmean_frame {
            let mean = frame.iter().sum::<f32>() / n as f32;
            for s in &mut frame {
                *s -= mean;
            }
        }

        // Raw log energy is taken before pre-emphasis and windowing.
        let raw_energy = log_energy(&frame);

        // Pre-emphasis, in reverse so each sample sees its original left
        // neighbour.
        for i in (1..n).rev() {
            frame[i] -= self.config.preemph * frame[i - 1];
        }
        frame[0] *= 1.0 - self.config.preemph;

        let windowed_energy = if self.config.raw_energy {
            raw_energy
        } else {
            log_energy(&frame)
        };

        // Hamming window.
        for (i, s) in frame.iter_mut().enumerate() {
            *s *= 0.54 - 0.46 * (2.0 * PI * i as f32 / (n - 1) as f32).cos();
        }

        for (i, s) in frame.iter().enumerate() {
            self.spectrum[i] = Complex::new(*s, 0.0);
        }
        self.fft.process(&mut self.spectrum);

        let power_len = n / 2 + 1;
        let power: Vec<f32> = self.spectrum[..power_len]
            .iter()
            .map(|c| (c.re * c.re + c.im * c.im) / n as f32)
            .collect();

        let mel_energies: Vec<f32> = self
            .filterbank
            .iter()
            .map(|filter| {
                let e: f32 = filter.iter().zip(power.iter()).map(|(&f, &p)| f * p).sum();
                e.max(1e-10).ln()
            })
            .collect();

        let mut vec = dct_ii(&mel_energies, self.config.mfcc_dim);
        for (c, w) in vec.iter_mut().zip(self.lifter_weights.iter()) {
            *c *= w;
        }

        if self.config.use_c0 {
            let nf = mel_energies.len() as f32;
            let c0 = (2.0 / nf).sqrt() * mel_energies.iter().sum::<f32>();
            vec.push(c0);
        }
        if self.config.use_energy {
            vec.push(windowed_energy);
        }

        (vec, windowed_energy)
    }
}

/// Log energy of a frame, floored to avoid `ln(0)`.
fn log_energy(frame: &[f32]) -> f32 {
    frame
        .iter()
        .map(|s| s * s)
        .sum::<f32>()
        .max(f32::MIN_POSITIVE)
        .ln()
}

/// Running-maximum energy normalisation, carried across utterances.
///
/// The maximum of the previous utterance defines the reference level; the
/// silence floor bounds how far below it a frame may fall.
#[derive(Debug, Clone)]
pub struct EnergyWork {
    max: f32,
    max_last: f32,
    min_last: f32,
}

impl EnergyWork {
    /// Initial state used before any utterance has been seen.
    #[must_use]
    pub fn new() -> Self {
        Self {
            max: 5.0,
            max_last: 5.0,
            min_last: 0.0,
        }
    }

    /// Roll over to a new utterance.
    pub fn prepare(&mut self, silence_floor: f32) {
        self.max_last = self.max;
        self.min_last = self.max - (silence_floor * LOG_TEN) / 10.0;
        self.max = 0.0;
    }

    /// Normalise one raw log energy value.
    pub fn normalize(&mut self, e: f32, escale: f32) -> f32 {
        if self.max < e {
            self.max = e;
        }
        let e = e.max(self.min_last);
        1.0 - (self.max_last - e) * escale
    }
}

impl Default for EnergyWork {
    fn default() -> Self {
        Self::new()
    }
}

/// Build a mel-spaced triangular filterbank over the power spectrum bins.
fn build_mel_filterbank(num_filters: usize, fft_size: usize, sample_rate: u32) -> Vec<Vec<f32>> {
    let power_len = fft_size / 2 + 1;
    let low_mel = hz_to_mel(0.0);
    let high_mel = hz_to_mel(sample_rate as f32 / 2.0);

    let num_points = num_filters + 2;
    let mel_points: Vec<f32> = (0..num_points)
        .map(|i| low_mel + (high_mel - low_mel) * i as f32 / (num_points - 1) as f32)
        .collect();
    let bin_points: Vec<usize> = mel_points
        .iter()
        .map(|&m| ((fft_size as f32 + 1.0) * mel_to_hz(m) / sample_rate as f32).floor() as usize)
        .collect();

    let mut filterbank = Vec::with_capacity(num_filters);
    for m in 0..num_filters {
        let mut filter = vec![0.0f32; power_len];
        let left = bin_points[m];
        let center = bin_points[m + 1];
        let right = bin_points[m + 2];

        if center > left {
            let denom = (center - left) as f32;
            for (i, val) in filter.iter_mut().enumerate().take(center).skip(left) {
                *val = (i - left) as f32 / denom;
            }
        }
        if right > center {
            let denom = (right - center) as f32;
            for (i, val) in filter
                .iter_mut()
                .enumerate()
                .take((right + 1).min(power_len))
                .skip(center)
            {
                *val = (right - i) as f32 / denom;
            }
        }
        filterbank.push(filter);
    }
    filterbank
}

/// DCT-II with orthonormal-style scaling, coefficients 1..=num_coeffs.
fn dct_ii(input: &[f32], num_coeffs: usize) -> Vec<f32> {
    let n = input.len();
    let scale = (2.0 / n as f32).sqrt();
    (1..=num_coeffs)
        .map(|k| {
            let sum: f32 = input
                .iter()
                .enumerate()
                .map(|(j, &v)| v * (PI * k as f32 * (2 * j + 1) as f32 / (2 * n) as f32).cos())
                .sum();
            scale * sum
        })
        .collect()
}

/// Cepstral liftering weights: `1 + (L/2) sin(pi k / L)`.
fn build_lifter(lifter: usize, num_coeffs: usize) -> Vec<f32> {
    if lifter == 0 {
        return vec![1.0; num_coeffs];
    }
    let l = lifter as f32;
    (1..=num_coeffs)
        .map(|k| 1.0 + (l / 2.0) * (PI * k as f32 / l).sin())
        .collect()
}

fn hz_to_mel(hz: f32) -> f32 {
    2595.0 * (1.0 + hz / 700.0).log10()
}

fn mel_to_hz(mel: f32) -> f32 {
    700.0 * (10.0_f32.powf(mel / 2595.0) - 1.0)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;
    use crate::config::AnalysisConfig;

    fn test_config() -> AnalysisConfig {
        AnalysisConfig::default()
    }

    #[test]
    fn filterbank_shape_and_sign() {
        let fb = build_mel_filterbank(24, 400, 16_000);
        assert_eq!(fb.len(), 24);
        for filter in &fb {
            assert_eq!(filter.len(), 201);
            assert!(filter.iter().all(|&v| v >= 0.0));
        }
    }

    #[test]
    fn base_vector_dimension() {
        let config = test_config();
        let mut calc = MfccCalc::new(&config);
        let window = vec![0.01f32; config.frame_size];
        let (vec, _) = calc.compute(&window);
        assert_eq!(vec.len(), config.base_dim());
    }

    #[test]
    fn identical_windows_identical_vectors() {
        let config = test_config();
        let mut calc = MfccCalc::new(&config);
        let window: Vec<f32> = (0..config.frame_size)
            .map(|i| (i as f32 * 0.02).sin())
            .collect();
        let (a, ea) = calc.compute(&window);
        let (b, eb) = calc.compute(&window);
        assert_eq!(a, b);
        assert!((ea - eb).abs() < f32::EPSILON);
    }

    #[test]
    fn louder_signal_has_higher_energy() {
        let config = test_config();
        let mut calc = MfccCalc::new(&config);
        let quiet: Vec<f32> = (0..config.frame_size)
            .map(|i| 0.01 * (i as f32 * 0.1).sin())
            .collect();
        let loud: Vec<f32> = quiet.iter().map(|s| s * 100.0).collect();
        let (_, eq) = calc.compute(&quiet);
        let (_, el) = calc.compute(&loud);
        assert!(el > eq);
    }

    #[test]
    fn energy_normalization_tracks_maximum() {
        let mut work = EnergyWork::new();
        work.prepare(50.0);
        // With escale 1.0 the maximum of the last utterance maps to 1.0.
        let normalized = work.normalize(5.0, 1.0);
        assert!((normalized - 1.0).abs() < 1e-6);
        // Quieter frames fall below but are floored.
        let low = work.normalize(-100.0, 1.0);
        assert!(low < normalized);
    }

    #[test]
    fn lifter_is_identity_when_disabled() {
        assert_eq!(build_lifter(0, 4), vec![1.0; 4]);
    }
}
