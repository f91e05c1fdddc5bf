//! GMM-based utterance verification.
//!
//! Scores the feature stream against a set of single-state Gaussian
//! mixture models in parallel with the first pass. At utterance end the
//! best-scoring model decides acceptance: if its name is in the
//! configured reject set, the utterance is rejected. A posterior-style
//! confidence accompanies the decision.

use crate::am::{AcousticModel, LOG_ZERO, LogProb};
use crate::config::GprunMethod;
use crate::gauss::GaussianScorer;
use tracing::info;

/// GMM scoring work area.
pub struct GmmVerifier {
    /// The GMM set: one physical model with one state per GMM.
    am: AcousticModel,
    scorer: GaussianScorer,
    /// Accumulated log score per model.
    scores: Vec<LogProb>,
    framecount: usize,
    /// Names whose selection rejects the utterance.
    reject_names: Vec<String>,
    /// Posterior scaling factor.
    alpha: f32,
}

/// Outcome of GMM verification.
#[derive(Debug, Clone)]
pub struct GmmDecision {
    /// Name of the best-scoring model.
    pub name: String,
    /// Whether the utterance passes.
    pub accepted: bool,
    /// Posterior-style confidence of the decision.
    pub confidence: f32,
}

impl GmmVerifier {
    /// Create a verifier over a GMM definition set.
    ///
    /// Each physical model must have exactly one emitting state.
    /// `prune_num` bounds the Gaussians computed per frame and model.
    #[must_use]
    pub fn new(am: AcousticModel, prune_num: usize, reject_names: Vec<String>, alpha: f32) -> Self {
        let n = am.physical.len();
        let prune = if prune_num == 0 {
            GprunMethod::None
        } else {
            GprunMethod::Safe
        };
        let scorer = GaussianScorer::new(&am, prune, prune_num.max(1));
        Self {
            am,
            scorer,
            scores: vec![0.0; n],
            framecount: 0,
            reject_names,
            alpha,
        }
    }

    /// Number of models.
    #[must_use]
    pub fn num_models(&self) -> usize {
        self.am.physical.len()
    }

    /// Reset accumulated scores for a new utterance.
    pub fn prepare(&mut self) {
        self.scores.iter_mut().for_each(|v| *v = 0.0);
        self.framecount = 0;
        self.scorer.prepare();
    }

    /// Accumulate one frame.
    pub fn frame(&mut self, t: usize, vec: &[f32]) {
        self.scorer.begin_frame(t);
        for (i, phys) in self.am.physical.iter().enumerate() {
            let Some(&state) = phys.states.first() else {
                continue;
            };
            self.scores[i] += self.scorer.outprob(&self.am, state, vec);
        }
        self.framecount += 1;
    }

    /// Decide at utterance end.
    ///
    /// Returns `None` when no frame was scored or no model is loaded.
    #[must_use]
    pub fn decide(&self) -> Option<GmmDecision> {
        if self.framecount == 0 || self.scores.is_empty() {
            return None;
        }
        let (best, &best_score) = self
            .scores
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))?;

        // Posterior confidence: 1 / sum(exp(alpha * (s_i - max))).
        let denom: f32 = self
            .scores
            .iter()
            .map(|&s| (self.alpha * (s - best_score)).exp())
            .sum();
        let confidence = 1.0 / denom.max(f32::MIN_POSITIVE);

        let name = self.am.physical[best].name.clone();
        let accepted = !self.reject_names.contains(&name);
        info!(
            "GMM decision: {name} (confidence {confidence:.3}, {})",
            if accepted { "accepted" } else { "rejected" }
        );
        Some(GmmDecision {
            name,
            accepted,
            confidence,
        })
    }

    /// Best accumulated score so far.
    #[must_use]
    pub fn max_score(&self) -> LogProb {
        self.scores.iter().copied().fold(LOG_ZERO, LogProb::max)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;
    use crate::am::{Density, HmmState, Mixture, PhysicalHmm, Transition};

    fn gmm_set() -> AcousticModel {
        let mut am = AcousticModel::new(1);
        for (name, mean) in [("speech", 0.0f32), ("noise", 5.0)] {
            let d = am.add_density(Density::from_variance(vec![mean], &[1.0]));
            let s = am.add_state(HmmState {
                mixtures: vec![Mixture {
                    density: d,
                    weight: 0.0,
                }],
            });
            let t = am.add_transition(Transition {
                nstate: 3,
                a: vec![
                    LOG_ZERO, 0.0, LOG_ZERO,
                    LOG_ZERO, 0.0, LOG_ZERO,
                    LOG_ZERO, LOG_ZERO, LOG_ZERO,
                ],
            });
            am.add_physical(PhysicalHmm {
                name: name.into(),
                states: vec![s],
                trans: t,
            })
            .unwrap();
        }
        am
    }

    #[test]
    fn selects_best_model() {
        let mut gmm = GmmVerifier::new(gmm_set(), 0, vec![], 0.05);
        gmm.prepare();
        for t in 0..10 {
            gmm.frame(t, &[0.1]);
        }
        let decision = gmm.decide().unwrap();
        assert_eq!(decision.name, "speech");
        assert!(decision.accepted);
        assert!(decision.confidence > 0.5);
    }

    #[test]
    fn reject_list_rejects() {
        let mut gmm = GmmVerifier::new(gmm_set(), 0, vec!["noise".into()], 0.05);
        gmm.prepare();
        for t in 0..10 {
            gmm.frame(t, &[5.0]);
        }
        let decision = gmm.decide().unwrap();
        assert_eq!(decision.name, "noise");
        assert!(!decision.accepted);
    }

    #[test]
    fn no_frames_no_decision() {
        let mut gmm = GmmVerifier::new(gmm_set(), 0, vec![], 0.05);
        gmm.prepare();
        assert!(gmm.decide().is_none());
    }

    #[test]
    fn confidence_decreases_with_ambiguity() {
        let mut gmm = GmmVerifier::new(gmm_set(), 0, vec![], 0.05);
        gmm.prepare();
        // A point between the two means scores both models equally.
        for t in 0..10 {
            gmm.frame(t, &[2.5]);
        }
        let decision = gmm.decide().unwrap();
        assert!(decision.confidence < 0.6);
    }
}
