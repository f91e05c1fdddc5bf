//! Gaussian mixture output probability computation.
//!
//! Scores a feature vector against the Gaussian mixtures of an HMM state,
//! with selectable pruning and a per-(state, frame) cache so a state probed
//! from several lexicon positions in the same frame is computed once.

use crate::am::{AcousticModel, Density, LOG_ZERO, LogProb, StateRef};
use crate::config::{GprunMethod, IwcdMethod};

/// Extra candidate ids around each previous top-K entry in heuristic mode.
const HEURISTIC_WINDOW: usize = 2;

/// Output probability scorer with pruning work areas.
pub struct GaussianScorer {
    method: GprunMethod,
    topk: usize,
    /// Best mixture score of the previous frame, per state (beam mode).
    last_best: Vec<LogProb>,
    /// Top-K mixture ids of the previous frame, per state (heuristic mode).
    last_ids: Vec<Vec<usize>>,
    /// Per-frame output probability cache, `NAN` = not computed.
    cache: Vec<f32>,
    cache_frame: Option<usize>,
    /// Scratch list of (score, mixture index) pairs.
    calced: Vec<(LogProb, usize)>,
}

impl GaussianScorer {
    /// Create a scorer for the given model.
    ///
    /// `topk` is the number of Gaussians kept per mixture under pruning;
    /// it is ignored (forced to the full mixture size) for
    /// [`GprunMethod::None`].
    #[must_use]
    pub fn new(am: &AcousticModel, method: GprunMethod, topk: usize) -> Self {
        let nstates = am.states.len();
        let topk = if method == GprunMethod::None {
            am.max_mixture.max(1)
        } else {
            topk.clamp(1, am.max_mixture.max(1))
        };
        Self {
            method,
            topk,
            last_best: vec![LOG_ZERO; nstates],
            last_ids: vec![Vec::new(); nstates],
            cache: vec![f32::NAN; nstates],
            cache_frame: None,
            calced: Vec::new(),
        }
    }

    /// Reset all per-utterance state.
    pub fn prepare(&mut self) {
        self.last_best.iter_mut().for_each(|v| *v = LOG_ZERO);
        self.last_ids.iter_mut().for_each(Vec::clear);
        self.cache_frame = None;
    }

    /// Start a new frame, invalidating the output probability cache.
    pub fn begin_frame(&mut self, frame: usize) {
        if self.cache_frame != Some(frame) {
            self.cache.iter_mut().for_each(|v| *v = f32::NAN);
            self.cache_frame = Some(frame);
        }
    }

    /// Output log probability of `state` for the current frame's vector.
    pub fn outprob(&mut self, am: &AcousticModel, state: usize, vec: &[f32]) -> LogProb {
        let cached = self.cache[state];
        if !cached.is_nan() {
            return cached;
        }
        let score = self.compute_state(am, state, vec);
        self.cache[state] = score;
        score
    }

    /// Output probability of a lexicon state reference. Clusters are
    /// summarised with the configured cross-word approximation.
    pub fn outprob_ref(
        &mut self,
        am: &AcousticModel,
        state: &StateRef,
        vec: &[f32],
        iwcd: IwcdMethod,
        iwcd_n: usize,
    ) -> LogProb {
        match state {
            StateRef::Single(s) => self.outprob(am, *s, vec),
            StateRef::Set(set) => {
                let mut scores: Vec<LogProb> =
                    set.iter().map(|&s| self.outprob(am, s, vec)).collect();
                match iwcd {
                    IwcdMethod::Max => scores.iter().copied().fold(LOG_ZERO, LogProb::max),
                    IwcdMethod::Avg => scores.iter().sum::<f32>() / scores.len() as f32,
                    IwcdMethod::Best => {
                        scores.sort_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));
                        let n = iwcd_n.clamp(1, scores.len());
                        scores[..n].iter().sum::<f32>() / n as f32
                    }
                }
            }
        }
    }

    /// Compute the state output probability from scratch.
    fn compute_state(&mut self, am: &AcousticModel, state: usize, vec: &[f32]) -> LogProb {
        let mixtures = &am.states[state].mixtures;
        if mixtures.is_empty() {
            return LOG_ZERO;
        }

        self.calced.clear();
        match self.method {
            GprunMethod::None => {
                for (i, m) in mixtures.iter().enumerate() {
                    let score = compute_g_base(&am.densities[m.density], vec);
                    self.calced.push((score, i));
                }
                self.calced
                    .sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
            }
            GprunMethod::Safe => {
                self.prune_loop(am, state, vec, LOG_ZERO, None);
            }
            GprunMethod::Beam => {
                let seed = self.last_best[state];
                self.prune_loop(am, state, vec, seed, None);
            }
            GprunMethod::Heuristic => {
                let candidates = self.heuristic_candidates(state, mixtures.len());
                self.prune_loop(am, state, vec, LOG_ZERO, Some(&candidates));
            }
        }

        // A stale seed threshold can prune everything; recover with a
        // full computation so a live state never scores log-zero here.
        if self.calced.is_empty() {
            for (i, m) in mixtures.iter().enumerate() {
                let score = compute_g_base(&am.densities[m.density], vec);
                self.insert_topk(score, i);
            }
        }

        // Remember per-state history for the next frame.
        if let Some(&(best, _)) = self.calced.first() {
            self.last_best[state] = best;
        }
        if self.method == GprunMethod::Heuristic {
            let ids: Vec<usize> = self.calced.iter().map(|&(_, i)| i).collect();
            self.last_ids[state] = ids;
        }

        // Combine the surviving Gaussians with their mixture weights.
        let mut total = LOG_ZERO;
        for &(score, i) in &self.calced {
            total = log_add(total, score + mixtures[i].weight);
        }
        total
    }

    /// Top-K computation with early-exit pruning.
    ///
    /// Walks the mixture (or the candidate subset), keeping a running
    /// K-th-best threshold; a Gaussian whose partial Mahalanobis sum
    /// already exceeds the threshold bound is abandoned mid-dimension.
    fn prune_loop(
        &mut self,
        am: &AcousticModel,
        state: usize,
        vec: &[f32],
        seed_thres: LogProb,
        candidates: Option<&[usize]>,
    ) {
        let mixtures = &am.states[state].mixtures;
        let total = candidates.map_or(mixtures.len(), <[usize]>::len);
        for n in 0..total {
            let i = candidates.map_or(n, |c| c[n]);
            let density = &am.densities[mixtures[i].density];
            let thres = if self.calced.len() < self.topk {
                seed_thres
            } else {
                // Current K-th best.
                self.calced[self.calced.len() - 1].0.max(seed_thres)
            };
            let score = if thres <= LOG_ZERO {
                Some(compute_g_base(density, vec))
            } else {
                compute_g_pruned(density, vec, thres)
            };
            if let Some(score) = score {
                self.insert_topk(score, i);
            }
        }
    }

    /// Insert into the sorted top-K score list.
    fn insert_topk(&mut self, score: LogProb, id: usize) {
        let pos = self
            .calced
            .partition_point(|&(s, _)| s > score);
        if pos >= self.topk {
            return;
        }
        self.calced.insert(pos, (score, id));
        self.calced.truncate(self.topk);
    }

    /// Candidate mixture ids for heuristic pruning: last frame's top-K
    /// plus a fixed window around each, or everything when no history.
    fn heuristic_candidates(&self, state: usize, num: usize) -> Vec<usize> {
        let last = &self.last_ids[state];
        if last.is_empty() {
            return (0..num).collect();
        }
        let mut mark = vec![false; num];
        for &id in last {
            let lo = id.saturating_sub(HEURISTIC_WINDOW);
            let hi = (id + HEURISTIC_WINDOW).min(num - 1);
            for slot in &mut mark[lo..=hi] {
                *slot = true;
            }
        }
        mark.iter()
            .enumerate()
            .filter_map(|(i, &m)| m.then_some(i))
            .collect()
    }
}

/// Log probability of one Gaussian density, computed in full.
#[must_use]
pub fn compute_g_base(density: &Density, vec: &[f32]) -> LogProb {
    let mut sum = density.gconst;
    for ((&x, &mean), &ivar) in vec
        .iter()
        .zip(density.mean.iter())
        .zip(density.ivar.iter())
    {
        let d = x - mean;
        sum += d * d * ivar;
    }
    -0.5 * sum
}

/// Log probability of one Gaussian with an early-exit bound.
///
/// Returns `None` when the partial sum already guarantees the final score
/// falls below `thres`.
#[must_use]
pub fn compute_g_pruned(density: &Density, vec: &[f32], thres: LogProb) -> Option<LogProb> {
    let limit = -2.0 * thres;
    let mut sum = density.gconst;
    for ((&x, &mean), &ivar) in vec
        .iter()
        .zip(density.mean.iter())
        .zip(density.ivar.iter())
    {
        let d = x - mean;
        sum += d * d * ivar;
        if sum > limit {
            return None;
        }
    }
    Some(-0.5 * sum)
}

/// `ln(exp(a) + exp(b))` with underflow protection.
#[must_use]
pub fn log_add(a: LogProb, b: LogProb) -> LogProb {
    if a <= LOG_ZERO {
        return b;
    }
    if b <= LOG_ZERO {
        return a;
    }
    let (hi, lo) = if a > b { (a, b) } else { (b, a) };
    let diff = lo - hi;
    if diff < -30.0 {
        hi
    } else {
        hi + diff.exp().ln_1p()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;
    use crate::am::{HmmState, Mixture};

    fn model_with_mixture(means: &[f32]) -> AcousticModel {
        let mut am = AcousticModel::new(1);
        let weight = (1.0 / means.len() as f32).ln();
        let mixtures: Vec<Mixture> = means
            .iter()
            .map(|&m| {
                let d = am.add_density(Density::from_variance(vec![m], &[1.0]));
                Mixture { density: d, weight }
            })
            .collect();
        am.add_state(HmmState { mixtures });
        am
    }

    #[test]
    fn gaussian_peak_at_mean() {
        let d = Density::from_variance(vec![1.0, -1.0], &[1.0, 1.0]);
        let at_mean = compute_g_base(&d, &[1.0, -1.0]);
        let off_mean = compute_g_base(&d, &[2.0, 0.0]);
        assert!(at_mean > off_mean);
        // At the mean the score is -0.5 * gconst.
        assert!((at_mean + 0.5 * d.gconst).abs() < 1e-5);
    }

    #[test]
    fn pruned_matches_full_when_kept() {
        let d = Density::from_variance(vec![0.5], &[2.0]);
        let full = compute_g_base(&d, &[1.0]);
        let pruned = compute_g_pruned(&d, &[1.0], full - 1.0);
        assert_eq!(pruned, Some(full));
        // A threshold above the final score abandons the computation.
        assert_eq!(compute_g_pruned(&d, &[1.0], full + 1.0), None);
    }

    #[test]
    fn log_add_is_commutative_and_correct() {
        let a = -1.0;
        let b = -2.0;
        let sum = log_add(a, b);
        let expected = ((-1.0f32).exp() + (-2.0f32).exp()).ln();
        assert!((sum - expected).abs() < 1e-5);
        assert!((log_add(b, a) - sum).abs() < 1e-6);
        assert_eq!(log_add(LOG_ZERO, a), a);
    }

    #[test]
    fn all_methods_agree_on_best_path_region() {
        // With topk = full mixture size, every method must produce the
        // same state score for a vector near the means.
        let means = [0.0, 1.0, 2.0, 3.0];
        let vec = [1.1f32];
        let reference = {
            let am = model_with_mixture(&means);
            let mut scorer = GaussianScorer::new(&am, GprunMethod::None, 4);
            scorer.begin_frame(0);
            scorer.outprob(&am, 0, &vec)
        };
        for method in [GprunMethod::Safe, GprunMethod::Beam, GprunMethod::Heuristic] {
            let am = model_with_mixture(&means);
            let mut scorer = GaussianScorer::new(&am, method, 4);
            scorer.prepare();
            scorer.begin_frame(0);
            let score = scorer.outprob(&am, 0, &vec);
            assert!(
                (score - reference).abs() < 1e-4,
                "{method:?} disagrees: {score} vs {reference}"
            );
        }
    }

    #[test]
    fn topk_pruning_keeps_dominant_terms() {
        let means = [0.0, 10.0, 20.0, 30.0];
        let am = model_with_mixture(&means);
        let mut full = GaussianScorer::new(&am, GprunMethod::None, 4);
        full.begin_frame(0);
        let all = full.outprob(&am, 0, &[0.1]);

        let mut pruned = GaussianScorer::new(&am, GprunMethod::Safe, 1);
        pruned.prepare();
        pruned.begin_frame(0);
        let top1 = pruned.outprob(&am, 0, &[0.1]);
        // The nearest Gaussian dominates, so top-1 is close to the full sum.
        assert!((all - top1).abs() < 0.1);
        assert!(top1 <= all + 1e-6);
    }

    #[test]
    fn cache_returns_identical_score() {
        let am = model_with_mixture(&[0.0, 1.0]);
        let mut scorer = GaussianScorer::new(&am, GprunMethod::Safe, 2);
        scorer.prepare();
        scorer.begin_frame(3);
        let a = scorer.outprob(&am, 0, &[0.4]);
        let b = scorer.outprob(&am, 0, &[9999.0]); // ignored: served from cache
        assert_eq!(a, b);
        scorer.begin_frame(4);
        let c = scorer.outprob(&am, 0, &[0.4]);
        assert!((a - c).abs() < 1e-6);
    }

    #[test]
    fn cluster_summaries_follow_method() {
        let mut am = AcousticModel::new(1);
        for m in [0.0f32, 4.0] {
            let d = am.add_density(Density::from_variance(vec![m], &[1.0]));
            am.add_state(HmmState {
                mixtures: vec![Mixture {
                    density: d,
                    weight: 0.0,
                }],
            });
        }
        let set = StateRef::Set(vec![0, 1]);
        let mut scorer = GaussianScorer::new(&am, GprunMethod::None, 1);
        scorer.begin_frame(0);
        let max = scorer.outprob_ref(&am, &set, &[0.0], IwcdMethod::Max, 1);
        let avg = scorer.outprob_ref(&am, &set, &[0.0], IwcdMethod::Avg, 1);
        let best1 = scorer.outprob_ref(&am, &set, &[0.0], IwcdMethod::Best, 1);
        assert!(max > avg);
        assert!((best1 - max).abs() < 1e-6);
    }
}
