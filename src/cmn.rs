//! MAP-based cepstral mean normalisation.
//!
//! Subtracts a running cepstral mean from each incoming vector. The mean is
//! smoothed with a weighted initial mean carried over from previous
//! utterances (MAP-CMN), so normalisation is usable from the very first
//! frame of an utterance.

use crate::error::{DecodeError, Result};
use std::collections::VecDeque;
use std::io::{Read, Write};
use std::path::Path;
use tracing::info;

/// Maximum number of frames accumulated into the initial mean.
const CPMAX: usize = 500;

/// Per-utterance cepstral sum retained for the initial-mean history.
#[derive(Debug, Clone)]
struct CepSum {
    sum: Vec<f32>,
    frames: usize,
}

/// MAP-CMN work area.
#[derive(Debug, Clone)]
pub struct MapCmn {
    dim: usize,
    map_weight: f32,
    /// Running sum for the current utterance.
    now_sum: Vec<f32>,
    now_frames: usize,
    /// Per-utterance sums of previous utterances, most recent first.
    history: VecDeque<CepSum>,
    /// Initial mean used for MAP smoothing.
    init_mean: Vec<f32>,
    init_set: bool,
}

impl MapCmn {
    /// Create a new work area for vectors of `dim` elements.
    #[must_use]
    pub fn new(dim: usize, map_weight: f32) -> Self {
        Self {
            dim,
            map_weight,
            now_sum: vec![0.0; dim],
            now_frames: 0,
            history: VecDeque::new(),
            init_mean: vec![0.0; dim],
            init_set: false,
        }
    }

    /// True if an initial mean has been established (loaded or learned).
    #[must_use]
    pub fn has_initial_mean(&self) -> bool {
        self.init_set
    }

    /// The current initial mean vector.
    #[must_use]
    pub fn initial_mean(&self) -> &[f32] {
        &self.init_mean
    }

    /// Reset the per-utterance state. Call at the start of each input.
    pub fn prepare(&mut self) {
        self.now_sum.iter_mut().for_each(|v| *v = 0.0);
        self.now_frames = 0;
    }

    /// Normalise one vector in place.
    ///
    /// With an initial mean the subtracted value for frame t is
    /// `(sum + w * mean0) / (t + w)`; without one, the plain running mean.
    pub fn process(&mut self, vec: &mut [f32]) {
        self.now_frames += 1;
        if self.init_set {
            for d in 0..self.dim {
                self.now_sum[d] += vec[d];
                let x = f64::from(self.now_sum[d]) + f64::from(self.map_weight) * f64::from(self.init_mean[d]);
                let y = self.now_frames as f64 + f64::from(self.map_weight);
                vec[d] -= (x / y) as f32;
            }
        } else {
            for d in 0..self.dim {
                self.now_sum[d] += vec[d];
                vec[d] -= self.now_sum[d] / self.now_frames as f32;
            }
        }
    }

    /// Fold the current utterance into the initial mean for the next input.
    ///
    /// Uses the current sums plus the history of previous utterances up to
    /// a cap of [`CPMAX`] frames. No-op when nothing was processed.
    pub fn update(&mut self) {
        if self.now_frames == 0 {
            return;
        }

        let mut mean: Vec<f32> = self.now_sum.clone();
        let mut frames = self.now_frames;
        for past in &self.history {
            for d in 0..self.dim {
                mean[d] += past.sum[d];
            }
            frames += past.frames;
            if frames >= CPMAX {
                break;
            }
        }
        for v in &mut mean {
            *v /= frames as f32;
        }
        self.init_mean = mean;
        self.init_set = true;

        self.history.push_front(CepSum {
            sum: self.now_sum.clone(),
            frames: self.now_frames,
        });
        // Entries beyond the frame cap can never contribute again.
        let mut kept = 0;
        self.history.retain(|entry| {
            let keep = kept < CPMAX;
            kept += entry.frames;
            keep
        });
    }

    /// Load an initial mean from a file.
    ///
    /// Format: 4-byte big-endian dimension, then that many big-endian f32s.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure or dimension mismatch.
    pub fn load(&mut self, path: &Path) -> Result<()> {
        let mut file = std::fs::File::open(path)?;
        let mut head = [0u8; 4];
        file.read_exact(&mut head)?;
        let dim = u32::from_be_bytes(head) as usize;
        if dim != self.dim {
            return Err(DecodeError::Model(format!(
                "CMN file {} has dimension {dim}, expected {}",
                path.display(),
                self.dim
            )));
        }
        let mut body = vec![0u8; dim * 4];
        file.read_exact(&mut body)?;
        for (d, chunk) in body.chunks_exact(4).enumerate() {
            self.init_mean[d] = f32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
        self.init_set = true;
        info!("loaded initial cepstral mean from {}", path.display());
        Ok(())
    }

    /// Save the initial mean to a file in the same format as [`Self::load`].
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure.
    pub fn save(&self, path: &Path) -> Result<()> {
        let mut file = std::fs::File::create(path)?;
        file.write_all(&(self.dim as u32).to_be_bytes())?;
        for &v in &self.init_mean {
            file.write_all(&v.to_be_bytes())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    #[test]
    fn running_mean_without_initial() {
        let mut cmn = MapCmn::new(2, 100.0);
        cmn.prepare();
        let mut v = vec![2.0, 4.0];
        cmn.process(&mut v);
        // First frame: mean equals the frame itself.
        assert!(v.iter().all(|x| x.abs() < 1e-6));

        let mut v2 = vec![4.0, 8.0];
        cmn.process(&mut v2);
        // Mean is now (3, 6).
        assert!((v2[0] - 1.0).abs() < 1e-6);
        assert!((v2[1] - 2.0).abs() < 1e-6);
    }

    #[test]
    fn map_weight_pulls_toward_initial_mean() {
        let mut cmn = MapCmn::new(1, 10.0);
        cmn.prepare();
        let mut v = vec![1.0];
        cmn.process(&mut v);
        cmn.update();
        assert!(cmn.has_initial_mean());
        assert!((cmn.initial_mean()[0] - 1.0).abs() < 1e-6);

        // Second utterance: subtracted mean is (x + w*mu) / (1 + w).
        cmn.prepare();
        let mut v = vec![0.0];
        cmn.process(&mut v);
        let expected = (0.0 + 10.0 * 1.0) / 11.0;
        assert!((v[0] + expected).abs() < 1e-6);
    }

    #[test]
    fn update_without_frames_is_noop() {
        let mut cmn = MapCmn::new(3, 100.0);
        cmn.prepare();
        cmn.update();
        assert!(!cmn.has_initial_mean());
    }

    #[test]
    fn save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cmn.bin");

        let mut cmn = MapCmn::new(2, 100.0);
        cmn.prepare();
        let mut v = vec![1.5, -2.5];
        cmn.process(&mut v);
        cmn.update();
        cmn.save(&path).unwrap();

        // File layout: dimension header then big-endian floats.
        let raw = std::fs::read(&path).unwrap();
        assert_eq!(raw.len(), 4 + 2 * 4);
        assert_eq!(u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]), 2);

        let mut other = MapCmn::new(2, 100.0);
        other.load(&path).unwrap();
        assert_eq!(other.initial_mean(), cmn.initial_mean());
    }

    #[test]
    fn load_rejects_dimension_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cmn.bin");
        let mut cmn = MapCmn::new(2, 100.0);
        cmn.prepare();
        let mut v = vec![0.5, 0.5];
        cmn.process(&mut v);
        cmn.update();
        cmn.save(&path).unwrap();

        let mut other = MapCmn::new(3, 100.0);
        assert!(other.load(&path).is_err());
    }
}
