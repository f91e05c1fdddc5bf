//! On-line feature extraction pipeline.
//!
//! Drives windowing, base MFCC computation, energy normalisation, the
//! delta/acceleration cycle buffers and MAP-CMN, producing final feature
//! vectors as PCM fragments arrive. The caller owns scheduling: `feed`
//! whenever samples are available, `end` when the utterance closes.

use crate::cmn::MapCmn;
use crate::config::{AnalysisConfig, FrontendConfig};
use crate::mfcc::delta::DeltaBuf;
use crate::mfcc::{EnergyWork, MfccCalc};

/// Minimum run length of exact zero samples that gets stripped.
const ZERO_STRIP_RUN: usize = 16;

/// Streaming front end: PCM samples in, feature vectors out.
pub struct FeaturePipeline {
    analysis: AnalysisConfig,
    frontend: FrontendConfig,
    calc: MfccCalc,
    energy: EnergyWork,
    delta: DeltaBuf,
    accel: Option<DeltaBuf>,
    cmn: MapCmn,
    /// Pending samples not yet consumed by a full window.
    window: Vec<f32>,
    /// Current run length of exact zero samples (capped at the strip
    /// threshold; longer runs are dropped as they grow).
    zero_run: usize,
    /// Running DC offset accumulator for whole-input mean removal.
    dc_sum: f64,
    dc_count: u64,
    emitted: usize,
}

impl FeaturePipeline {
    /// Build the pipeline for the given analysis and front-end settings.
    #[must_use]
    pub fn new(analysis: &AnalysisConfig, frontend: &FrontendConfig) -> Self {
        let base = analysis.base_dim();
        let accel = if analysis.use_accel {
            Some(DeltaBuf::new(base * 2, analysis.accel_window))
        } else {
            None
        };
        Self {
            analysis: analysis.clone(),
            frontend: frontend.clone(),
            calc: MfccCalc::new(analysis),
            energy: EnergyWork::new(),
            delta: DeltaBuf::new(base, analysis.delta_window),
            accel,
            cmn: MapCmn::new(analysis.vec_dim(), frontend.cmn_map_weight),
            window: Vec::new(),
            zero_run: 0,
            dc_sum: 0.0,
            dc_count: 0,
            emitted: 0,
        }
    }

    /// Access the CMN work area (for loading/saving the initial mean and
    /// the end-of-utterance update).
    pub fn cmn_mut(&mut self) -> &mut MapCmn {
        &mut self.cmn
    }

    /// Number of final vectors emitted since the last `prepare`.
    #[must_use]
    pub fn frames_emitted(&self) -> usize {
        self.emitted
    }

    /// Dimension of the emitted vectors.
    #[must_use]
    pub fn vec_dim(&self) -> usize {
        self.analysis.vec_dim()
    }

    /// Reset per-utterance state. Not called between short-pause segments
    /// of the same utterance, so the cycle buffers and CMN state carry
    /// over the boundary.
    pub fn prepare(&mut self) {
        self.window.clear();
        self.delta.prepare();
        if let Some(ab) = &mut self.accel {
            ab.prepare();
        }
        self.energy.prepare(self.analysis.silence_floor);
        self.cmn.prepare();
        self.zero_run = 0;
        self.dc_sum = 0.0;
        self.dc_count = 0;
        self.emitted = 0;
    }

    /// Feed a fragment of 16-bit PCM and append any completed feature
    /// vectors to `out`.
    ///
    /// Zero stripping and DC removal are stateful across fragments, so
    /// fragmentation does not change the produced vectors.
    pub fn feed(&mut self, samples: &[i16], out: &mut Vec<Vec<f32>>) {
        for &s in samples {
            if self.frontend.strip_zero_samples {
                if s == 0 {
                    // Runs reaching the threshold are dropped entirely;
                    // shorter runs are replayed when they end.
                    if self.zero_run < ZERO_STRIP_RUN {
                        self.zero_run += 1;
                    }
                    continue;
                }
                if self.zero_run > 0 && self.zero_run < ZERO_STRIP_RUN {
                    for _ in 0..self.zero_run {
                        self.accept_sample(0.0);
                    }
                }
                self.zero_run = 0;
            }
            self.accept_sample(f32::from(s));
        }
        self.run_windows(out);
    }

    /// DC removal against the running whole-input mean, then buffering.
    fn accept_sample(&mut self, s: f32) {
        let s = if self.frontend.zmean {
            self.dc_sum += f64::from(s);
            self.dc_count += 1;
            s - (self.dc_sum / self.dc_count as f64) as f32
        } else {
            s
        };
        self.window.push(s);
    }

    fn run_windows(&mut self, out: &mut Vec<Vec<f32>>) {
        while self.window.len() >= self.analysis.frame_size {
            let (mut base, _) = self.calc.compute(&self.window[..self.analysis.frame_size]);
            if self.analysis.use_energy && self.analysis.energy_normalize {
                let idx = base.len() - 1;
                base[idx] = self.energy.normalize(base[idx], self.analysis.escale);
            }
            self.push_base(&base, out);
            self.window.drain(..self.analysis.frame_shift);
        }
    }

    /// Flush the cycle buffers at the end of the utterance, appending the
    /// remaining tail vectors to `out`.
    pub fn end(&mut self, out: &mut Vec<Vec<f32>>) {
        // A short zero run pending at stream end is still real input.
        if self.frontend.strip_zero_samples && self.zero_run > 0 && self.zero_run < ZERO_STRIP_RUN
        {
            for _ in 0..self.zero_run {
                self.accept_sample(0.0);
            }
            self.zero_run = 0;
            self.run_windows(out);
        }
        // Drain the delta buffer through the accel buffer first.
        loop {
            let row = match self.delta.flush() {
                Some(row) => row.to_vec(),
                None => break,
            };
            self.push_pair(&row, out);
        }
        if self.accel.is_some() {
            loop {
                let row = match self.accel.as_mut().and_then(DeltaBuf::flush) {
                    Some(row) => row.to_vec(),
                    None => break,
                };
                self.emit(&row, out);
            }
        }
    }

    /// Convenience wrapper: run a whole utterance in one call.
    pub fn process_all(&mut self, samples: &[i16]) -> Vec<Vec<f32>> {
        self.prepare();
        let mut out = Vec::new();
        self.feed(samples, &mut out);
        self.end(&mut out);
        out
    }

    fn push_base(&mut self, base: &[f32], out: &mut Vec<Vec<f32>>) {
        let row = match self.delta.proceed(base) {
            Some(row) => row.to_vec(),
            None => return,
        };
        self.push_pair(&row, out);
    }

    fn push_pair(&mut self, pair: &[f32], out: &mut Vec<Vec<f32>>) {
        let row = match &mut self.accel {
            Some(ab) => match ab.proceed(pair) {
                Some(row) => row.to_vec(),
                None => return,
            },
            None => pair.to_vec(),
        };
        self.emit(&row, out);
    }

    /// Compose the final vector from a cycle-buffer row, apply absolute
    /// energy suppression and CMN, and emit.
    fn emit(&mut self, row: &[f32], out: &mut Vec<Vec<f32>>) {
        let base = self.analysis.base_dim();
        let mut vec: Vec<f32> = if self.accel.is_some() {
            // Row layout: [base | delta | d(base) | d(delta)]; the delta of
            // the delta stream is the acceleration.
            let mut v = Vec::with_capacity(base * 3);
            v.extend_from_slice(&row[..base * 2]);
            v.extend_from_slice(&row[base * 3..base * 4]);
            v
        } else {
            row[..base * 2].to_vec()
        };

        if self.analysis.absesup && self.analysis.use_energy {
            vec.remove(base - 1);
        }

        if self.frontend.cmn {
            self.cmn.process(&mut vec);
        }
        self.emitted += 1;
        out.push(vec);
    }
}
